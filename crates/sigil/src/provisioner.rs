//! Certificate provisioner
//!
//! Get-or-generate for signing certificates, safe to run on many service
//! instances at once:
//!
//! 1. Fetch active certificates of the usage; the newest one wins.
//! 2. If there are none, check that the read was not behind the log. A
//!    lagging read defers without side effects.
//! 3. Take the `signing_key.<usage>` lock for the tenant. A live holder means
//!    another instance is generating, so this pass defers.
//! 4. Signing certificates need an active CA; it is provisioned first
//!    through this same flow.
//! 5. Issue the generation command and defer. The new certificate shows up
//!    once the keys projection has caught up.
//!
//! [`CertificateProvisioner::get_certificate`] retries deferred passes with
//! a fixed delay. Generation failures are logged and never returned; the
//! lock is left to expire so a later pass can try again.

use crate::circuit_breaker::CircuitBreaker;
use crate::commands::{Actor, CertificateCommands};
use crate::consistency::ConsistencyChecker;
use crate::query::CertificateQuery;
use chrono::Utc;
use sigil_core::{
    CertificateRecord, DistributedLock, KeyUsage, ProvisionerConfig, Result, RetryPolicy,
    SigilError, TenantId,
};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

/// Lock resource prefix, one lock per usage
pub const SIGNING_KEY_RESOURCE: &str = "signing_key";

/// Outcome of one get-or-generate pass
#[derive(Debug, Clone, PartialEq)]
pub enum Provision {
    Ready(CertificateRecord),
    Deferred(DeferReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferReason {
    /// The read side is behind the log
    Lagging,
    /// Another instance holds the generation lock
    Contended,
    /// A generation command was issued
    Requested,
    /// Generation failed and was logged
    GenerationFailed,
    /// Too many recent generation failures for this usage
    BreakerOpen,
}

impl DeferReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeferReason::Lagging => "lagging",
            DeferReason::Contended => "contended",
            DeferReason::Requested => "requested",
            DeferReason::GenerationFailed => "generation_failed",
            DeferReason::BreakerOpen => "breaker_open",
        }
    }
}

type CertificateFuture<'a> = Pin<Box<dyn Future<Output = Result<CertificateRecord>> + Send + 'a>>;

pub struct CertificateProvisioner {
    query: Arc<dyn CertificateQuery>,
    commands: Arc<dyn CertificateCommands>,
    checker: ConsistencyChecker,
    lock: DistributedLock,
    retry: RetryPolicy,
    breakers: HashMap<KeyUsage, CircuitBreaker>,
    config: ProvisionerConfig,
}

impl CertificateProvisioner {
    pub fn new(
        query: Arc<dyn CertificateQuery>,
        commands: Arc<dyn CertificateCommands>,
        checker: ConsistencyChecker,
        lock: DistributedLock,
        config: ProvisionerConfig,
    ) -> Self {
        let breakers = KeyUsage::ALL
            .iter()
            .map(|usage| {
                (
                    *usage,
                    CircuitBreaker::new(
                        format!("{}.{}", SIGNING_KEY_RESOURCE, usage),
                        config.breaker.clone(),
                    ),
                )
            })
            .collect();
        Self {
            query,
            commands,
            checker,
            lock,
            retry: RetryPolicy::from_config(&config),
            breakers,
            config,
        }
    }

    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    pub fn breaker(&self, usage: KeyUsage) -> Option<&CircuitBreaker> {
        self.breakers.get(&usage)
    }

    /// Active certificate for `usage`, generating one if needed
    ///
    /// Fails with the last error seen, or `NotFound` when every attempt
    /// deferred.
    pub async fn get_certificate(
        &self,
        tenant: &TenantId,
        usage: KeyUsage,
    ) -> Result<CertificateRecord> {
        let what = format!("{} certificate for tenant {}", usage, tenant);
        self.retry
            .run(&what, move |_| async move {
                Ok(match self.provision(tenant, usage).await? {
                    Provision::Ready(record) => Some(record),
                    Provision::Deferred(_) => None,
                })
            })
            .await
    }

    fn get_ca<'a>(&'a self, tenant: &'a TenantId) -> CertificateFuture<'a> {
        Box::pin(self.get_certificate(tenant, KeyUsage::Ca))
    }

    /// One get-or-generate pass
    pub async fn provision(&self, tenant: &TenantId, usage: KeyUsage) -> Result<Provision> {
        let outcome = self.provision_inner(tenant, usage).await;
        let label = match &outcome {
            Ok(Provision::Ready(_)) => "ready",
            Ok(Provision::Deferred(reason)) => reason.as_str(),
            Err(_) => "error",
        };
        sigil_core::observe::record_provision(usage.as_str(), label);
        outcome
    }

    async fn provision_inner(&self, tenant: &TenantId, usage: KeyUsage) -> Result<Provision> {
        let not_expiring_before = Utc::now()
            + chrono::Duration::from_std(self.config.grace_period())
                .map_err(|e| SigilError::Config(format!("grace period out of range: {}", e)))?;
        let active = self
            .query
            .active_certificates(tenant, not_expiring_before, usage)?;
        if let Some(record) = active.latest() {
            return Ok(Provision::Ready(record.clone()));
        }

        if !self.checker.is_caught_up(tenant, active.latest_position)? {
            tracing::warn!(
                "no {} certificate for tenant {} and keys view is behind, retrying later",
                usage,
                tenant
            );
            return Ok(Provision::Deferred(DeferReason::Lagging));
        }

        let breaker = self
            .breakers
            .get(&usage)
            .ok_or_else(|| SigilError::InvalidState(format!("no breaker for {}", usage)))?;
        if !breaker.allow() {
            tracing::warn!(
                "{} generation for tenant {} suspended after repeated failures",
                usage,
                tenant
            );
            return Ok(Provision::Deferred(DeferReason::BreakerOpen));
        }

        let resource = format!("{}.{}", SIGNING_KEY_RESOURCE, usage);
        let guard = match self.lock.acquire(&resource, tenant, self.config.lock_ttl()) {
            Ok(guard) => guard,
            Err(SigilError::Contended { .. }) => {
                return Ok(Provision::Deferred(DeferReason::Contended));
            }
            Err(e) => return Err(e),
        };
        tracing::info!("lock {} acquired for tenant {}", resource, tenant);

        let ca = if usage.requires_ca() {
            // Dropping the guard on error releases the lock; nothing was issued
            Some(self.get_ca(tenant).await.map_err(|e| {
                tracing::warn!("no ca certificate for tenant {}: {}", tenant, e);
                SigilError::NotFound(format!("active ca certificate for tenant {}", tenant))
            })?)
        } else {
            None
        };

        let actor = Actor::system(tenant.clone());
        let algorithm = self.config.algorithm.as_str();
        let start = Instant::now();
        let result = match (usage, &ca) {
            (KeyUsage::Ca, _) => self.commands.generate_ca(&actor, algorithm).await,
            (KeyUsage::MetadataSigning, Some(ca)) => {
                self.commands
                    .generate_metadata_signing(&actor, algorithm, ca)
                    .await
            }
            (KeyUsage::ResponseSigning, Some(ca)) => {
                self.commands
                    .generate_response_signing(&actor, algorithm, ca)
                    .await
            }
            (_, None) => Err(SigilError::InvalidState(format!(
                "{} requires a ca certificate",
                usage
            ))),
        };
        sigil_core::observe::record_generation(usage.as_str(), start.elapsed(), result.is_ok());

        // Held until TTL expiry whatever the outcome
        let expires_at = guard.hold_until_expiry();
        match result {
            Ok(()) => {
                breaker.record_success();
                tracing::info!(
                    "{} certificate requested for tenant {}, lock held until {}",
                    usage,
                    tenant,
                    expires_at
                );
                Ok(Provision::Deferred(DeferReason::Requested))
            }
            Err(e) => {
                breaker.record_failure();
                tracing::warn!(
                    "could not create {} signing key for tenant {}: {}",
                    usage,
                    tenant,
                    e
                );
                Ok(Provision::Deferred(DeferReason::GenerationFailed))
            }
        }
    }
}
