use crate::types::event::Position;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a signing key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyUsage {
    Ca,
    MetadataSigning,
    ResponseSigning,
}

impl KeyUsage {
    pub const ALL: [KeyUsage; 3] = [
        KeyUsage::Ca,
        KeyUsage::MetadataSigning,
        KeyUsage::ResponseSigning,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyUsage::Ca => "ca",
            KeyUsage::MetadataSigning => "metadata_signing",
            KeyUsage::ResponseSigning => "response_signing",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ca" => Some(KeyUsage::Ca),
            "metadata_signing" => Some(KeyUsage::MetadataSigning),
            "response_signing" => Some(KeyUsage::ResponseSigning),
            _ => None,
        }
    }

    /// Signing certificates are chained to an active CA
    pub fn requires_ca(&self) -> bool {
        !matches!(self, KeyUsage::Ca)
    }
}

impl fmt::Display for KeyUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Materialized key pair with its certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    pub id: String,
    pub usage: KeyUsage,
    pub algorithm: String,
    pub private_key: Vec<u8>,
    pub private_key_expiry: DateTime<Utc>,
    pub certificate: Vec<u8>,
    pub certificate_expiry: DateTime<Utc>,
    /// Log position of the event that created the record
    pub position: Position,
}

/// Result of an active-certificates query
#[derive(Debug, Clone, Default)]
pub struct ActiveCertificates {
    /// Ordered by creation position, oldest first
    pub records: Vec<CertificateRecord>,
    /// Latest position the read side had observed when answering
    pub latest_position: Position,
}

impl ActiveCertificates {
    /// Most recently created record
    pub fn latest(&self) -> Option<&CertificateRecord> {
        self.records.iter().max_by_key(|r| r.position)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
