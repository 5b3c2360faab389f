use crate::types::certificate::KeyUsage;
use crate::types::event::EntityType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Explicit event-kind tag carried by every event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventKind {
    OrgDomainAdded,
    OrgDomainVerificationAdded,
    OrgDomainVerified,
    OrgDomainPrimarySet,
    OrgDomainRemoved,
    OrgMetadataSet,
    OrgMetadataRemoved,
    OrgMetadataRemovedAll,
    OrgRemoved,
    ProjectMemberAdded,
    ProjectMemberChanged,
    ProjectMemberRemoved,
    ProjectMemberCascadeRemoved,
    ProjectRemoved,
    UserRemoved,
    InstanceRemoved,
    KeyPairAdded,
    QuotaAdded,
    QuotaNotified,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::OrgDomainAdded => "org.domain.added",
            EventKind::OrgDomainVerificationAdded => "org.domain.verification.added",
            EventKind::OrgDomainVerified => "org.domain.verification.succeeded",
            EventKind::OrgDomainPrimarySet => "org.domain.primary.set",
            EventKind::OrgDomainRemoved => "org.domain.removed",
            EventKind::OrgMetadataSet => "org.metadata.set",
            EventKind::OrgMetadataRemoved => "org.metadata.removed",
            EventKind::OrgMetadataRemovedAll => "org.metadata.removed.all",
            EventKind::OrgRemoved => "org.removed",
            EventKind::ProjectMemberAdded => "project.member.added",
            EventKind::ProjectMemberChanged => "project.member.changed",
            EventKind::ProjectMemberRemoved => "project.member.removed",
            EventKind::ProjectMemberCascadeRemoved => "project.member.cascade.removed",
            EventKind::ProjectRemoved => "project.removed",
            EventKind::UserRemoved => "user.removed",
            EventKind::InstanceRemoved => "instance.removed",
            EventKind::KeyPairAdded => "key_pair.added",
            EventKind::QuotaAdded => "quota.added",
            EventKind::QuotaNotified => "quota.notified",
        }
    }

    /// Entity type whose sequence this kind of event extends
    pub fn entity_type(&self) -> EntityType {
        match self {
            EventKind::OrgDomainAdded
            | EventKind::OrgDomainVerificationAdded
            | EventKind::OrgDomainVerified
            | EventKind::OrgDomainPrimarySet
            | EventKind::OrgDomainRemoved
            | EventKind::OrgMetadataSet
            | EventKind::OrgMetadataRemoved
            | EventKind::OrgMetadataRemovedAll
            | EventKind::OrgRemoved => EntityType::Org,
            EventKind::ProjectMemberAdded
            | EventKind::ProjectMemberChanged
            | EventKind::ProjectMemberRemoved
            | EventKind::ProjectMemberCascadeRemoved
            | EventKind::ProjectRemoved => EntityType::Project,
            EventKind::UserRemoved => EntityType::User,
            EventKind::InstanceRemoved => EntityType::Instance,
            EventKind::KeyPairAdded => EntityType::KeyPair,
            EventKind::QuotaAdded | EventKind::QuotaNotified => EntityType::Quota,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainValidationType {
    #[default]
    Unspecified,
    Http,
    Dns,
}

impl DomainValidationType {
    pub fn as_i64(&self) -> i64 {
        match self {
            DomainValidationType::Unspecified => 0,
            DomainValidationType::Http => 1,
            DomainValidationType::Dns => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaNotificationSpec {
    pub id: String,
    pub percent: u32,
    pub repeat: bool,
    pub call_url: String,
}

/// Versioned event payload, tagged by kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Payload {
    OrgDomainAdded {
        domain: String,
    },
    OrgDomainVerificationAdded {
        domain: String,
        validation_type: DomainValidationType,
    },
    OrgDomainVerified {
        domain: String,
    },
    OrgDomainPrimarySet {
        domain: String,
    },
    OrgDomainRemoved {
        domain: String,
    },
    OrgMetadataSet {
        key: String,
        value: Vec<u8>,
    },
    OrgMetadataRemoved {
        key: String,
    },
    OrgMetadataRemovedAll,
    OrgRemoved,
    ProjectMemberAdded {
        user_id: String,
        roles: Vec<String>,
    },
    ProjectMemberChanged {
        user_id: String,
        roles: Vec<String>,
    },
    ProjectMemberRemoved {
        user_id: String,
    },
    ProjectMemberCascadeRemoved {
        user_id: String,
    },
    ProjectRemoved,
    UserRemoved,
    InstanceRemoved,
    KeyPairAdded {
        usage: KeyUsage,
        algorithm: String,
        private_key: Vec<u8>,
        private_key_expiry: DateTime<Utc>,
        certificate: Vec<u8>,
        certificate_expiry: DateTime<Utc>,
    },
    QuotaAdded {
        unit: String,
        amount: u64,
        notifications: Vec<QuotaNotificationSpec>,
    },
    QuotaNotified {
        notification_id: String,
        threshold: u32,
        period_start: DateTime<Utc>,
        used: u64,
    },
}

impl Payload {
    pub fn kind(&self) -> EventKind {
        match self {
            Payload::OrgDomainAdded { .. } => EventKind::OrgDomainAdded,
            Payload::OrgDomainVerificationAdded { .. } => EventKind::OrgDomainVerificationAdded,
            Payload::OrgDomainVerified { .. } => EventKind::OrgDomainVerified,
            Payload::OrgDomainPrimarySet { .. } => EventKind::OrgDomainPrimarySet,
            Payload::OrgDomainRemoved { .. } => EventKind::OrgDomainRemoved,
            Payload::OrgMetadataSet { .. } => EventKind::OrgMetadataSet,
            Payload::OrgMetadataRemoved { .. } => EventKind::OrgMetadataRemoved,
            Payload::OrgMetadataRemovedAll => EventKind::OrgMetadataRemovedAll,
            Payload::OrgRemoved => EventKind::OrgRemoved,
            Payload::ProjectMemberAdded { .. } => EventKind::ProjectMemberAdded,
            Payload::ProjectMemberChanged { .. } => EventKind::ProjectMemberChanged,
            Payload::ProjectMemberRemoved { .. } => EventKind::ProjectMemberRemoved,
            Payload::ProjectMemberCascadeRemoved { .. } => EventKind::ProjectMemberCascadeRemoved,
            Payload::ProjectRemoved => EventKind::ProjectRemoved,
            Payload::UserRemoved => EventKind::UserRemoved,
            Payload::InstanceRemoved => EventKind::InstanceRemoved,
            Payload::KeyPairAdded { .. } => EventKind::KeyPairAdded,
            Payload::QuotaAdded { .. } => EventKind::QuotaAdded,
            Payload::QuotaNotified { .. } => EventKind::QuotaNotified,
        }
    }
}
