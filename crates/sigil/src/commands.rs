//! Certificate generation commands
//!
//! A command validates its input and appends exactly one `key_pair.added`
//! event. Success means the event was appended, not that the projection
//! has materialized it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sigil_core::{
    CertificateRecord, Editor, EventLog, KeyUsage, NewEvent, Payload, Result, SigilError,
    TenantId,
};
use std::sync::Arc;
use uuid::Uuid;

/// User recorded as the editor of system-issued certificates
pub const SYSTEM_USER: &str = "SAML";

/// Identity a command runs as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub tenant: TenantId,
    pub user_id: String,
}

impl Actor {
    pub fn system(tenant: TenantId) -> Self {
        Self {
            tenant,
            user_id: SYSTEM_USER.to_string(),
        }
    }
}

#[async_trait]
pub trait CertificateCommands: Send + Sync {
    /// Issue a self-signed CA certificate
    async fn generate_ca(&self, actor: &Actor, algorithm: &str) -> Result<()>;

    async fn generate_metadata_signing(
        &self,
        actor: &Actor,
        algorithm: &str,
        ca: &CertificateRecord,
    ) -> Result<()>;

    async fn generate_response_signing(
        &self,
        actor: &Actor,
        algorithm: &str,
        ca: &CertificateRecord,
    ) -> Result<()>;
}

/// Freshly generated key pair and certificate
#[derive(Debug, Clone)]
pub struct GeneratedKeyPair {
    pub private_key: Vec<u8>,
    pub private_key_expiry: DateTime<Utc>,
    pub certificate: Vec<u8>,
    pub certificate_expiry: DateTime<Utc>,
}

/// Produces key material; signing certificates are issued by `ca`
pub trait KeyGenerator: Send + Sync {
    fn generate(
        &self,
        usage: KeyUsage,
        algorithm: &str,
        ca: Option<&CertificateRecord>,
    ) -> Result<GeneratedKeyPair>;
}

/// Commands that append to an event log
pub struct LogCertificateCommands<G> {
    log: Arc<dyn EventLog>,
    generator: G,
    service: String,
}

impl<G: KeyGenerator> LogCertificateCommands<G> {
    pub fn new(log: Arc<dyn EventLog>, generator: G) -> Self {
        Self {
            log,
            generator,
            service: "sigil".to_string(),
        }
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    fn add_key_pair(
        &self,
        actor: &Actor,
        usage: KeyUsage,
        algorithm: &str,
        ca: Option<&CertificateRecord>,
    ) -> Result<()> {
        if algorithm.is_empty() {
            return Err(SigilError::InvalidArgument(
                "key_pair.algorithm.missing".to_string(),
            ));
        }
        if let Some(ca) = ca {
            if ca.usage != KeyUsage::Ca {
                return Err(SigilError::InvalidArgument(format!(
                    "key_pair.issuer.not_ca: {} is {}",
                    ca.id, ca.usage
                )));
            }
        }

        let generated = self.generator.generate(usage, algorithm, ca)?;
        let event = NewEvent::new(
            actor.tenant.clone(),
            Uuid::new_v4().to_string(),
            Payload::KeyPairAdded {
                usage,
                algorithm: algorithm.to_string(),
                private_key: generated.private_key,
                private_key_expiry: generated.private_key_expiry,
                certificate: generated.certificate,
                certificate_expiry: generated.certificate_expiry,
            },
        )
        .with_editor(Editor::new(actor.user_id.clone(), self.service.clone()))
        .with_expected_sequence(0);

        let appended = self.log.append(event)?;
        tracing::info!(
            "{} key pair {} requested for tenant {} at position {}",
            usage,
            appended.entity_id,
            actor.tenant,
            appended.position
        );
        Ok(())
    }
}

#[async_trait]
impl<G: KeyGenerator> CertificateCommands for LogCertificateCommands<G> {
    async fn generate_ca(&self, actor: &Actor, algorithm: &str) -> Result<()> {
        self.add_key_pair(actor, KeyUsage::Ca, algorithm, None)
    }

    async fn generate_metadata_signing(
        &self,
        actor: &Actor,
        algorithm: &str,
        ca: &CertificateRecord,
    ) -> Result<()> {
        self.add_key_pair(actor, KeyUsage::MetadataSigning, algorithm, Some(ca))
    }

    async fn generate_response_signing(
        &self,
        actor: &Actor,
        algorithm: &str,
        ca: &CertificateRecord,
    ) -> Result<()> {
        self.add_key_pair(actor, KeyUsage::ResponseSigning, algorithm, Some(ca))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use sigil_core::{EntityType, EventFilter, MemoryEventLog, Position};

    struct FixedGenerator;

    impl KeyGenerator for FixedGenerator {
        fn generate(
            &self,
            usage: KeyUsage,
            _algorithm: &str,
            ca: Option<&CertificateRecord>,
        ) -> Result<GeneratedKeyPair> {
            let expiry = Utc::now() + Duration::days(365);
            let issuer = ca.map(|c| c.id.as_str()).unwrap_or("self");
            Ok(GeneratedKeyPair {
                private_key: format!("key:{}", usage).into_bytes(),
                private_key_expiry: expiry,
                certificate: format!("cert:{}:{}", usage, issuer).into_bytes(),
                certificate_expiry: expiry,
            })
        }
    }

    #[tokio::test]
    async fn test_generate_ca_appends_one_event_as_actor() {
        let log = Arc::new(MemoryEventLog::new());
        let commands = LogCertificateCommands::new(log.clone(), FixedGenerator);
        let tenant = TenantId::new("instance-1");

        commands
            .generate_ca(&Actor::system(tenant.clone()), "RS256")
            .await
            .unwrap();

        let events = log.read(&EventFilter::new(tenant)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].entity_type, EntityType::KeyPair);
        assert_eq!(events[0].editor.user_id, SYSTEM_USER);
        assert_eq!(events[0].position, Position(1));
        assert!(matches!(
            events[0].payload,
            Payload::KeyPairAdded {
                usage: KeyUsage::Ca,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_signing_requires_ca_issuer() {
        let log = Arc::new(MemoryEventLog::new());
        let commands = LogCertificateCommands::new(log.clone(), FixedGenerator);
        let actor = Actor::system(TenantId::new("instance-1"));
        let expiry = Utc::now() + Duration::days(1);
        let not_a_ca = CertificateRecord {
            id: "k1".into(),
            usage: KeyUsage::MetadataSigning,
            algorithm: "RS256".into(),
            private_key: vec![],
            private_key_expiry: expiry,
            certificate: vec![],
            certificate_expiry: expiry,
            position: Position(1),
        };

        let err = commands
            .generate_response_signing(&actor, "RS256", &not_a_ca)
            .await
            .unwrap_err();
        assert!(matches!(err, SigilError::InvalidArgument(_)));
        assert!(log.is_empty());
    }
}
