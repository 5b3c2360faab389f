//! Unified sigil database interface
//!
//! Bundles the event log, projection store, lock store and one projector per
//! standard projection under a single directory.

use crate::commands::CertificateCommands;
use crate::consistency::ConsistencyChecker;
use crate::projections::{self, keys};
use crate::provisioner::CertificateProvisioner;
use crate::query::ProjectionCertificateQuery;
use crate::quota::QuotaNotifier;
use sigil_core::{
    DistributedLock, EventLog, LockManager, LockStore, ProjectionConfig, ProjectionStore,
    ProjectorConfig, ProvisionerConfig, Result, SigilError, TenantId,
};
use sigil_projector::{Projector, ProjectorStats};
use sigil_sqlite::{SqliteEventLog, SqliteLockStore, SqliteProjectionStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

pub type SigilProjector = Projector<SqliteEventLog, SqliteProjectionStore>;

/// Unified sigil database
///
/// Layout under the base directory:
/// - `events.db` - event log
/// - `projection.db` - projection tables and watermarks
/// - `locks.db` - distributed lock records
pub struct SigilDb {
    log: Arc<SqliteEventLog>,
    projection: Arc<SqliteProjectionStore>,
    locks: Arc<SqliteLockStore>,
    projectors: Vec<Arc<SigilProjector>>,
    base_path: PathBuf,
}

impl SigilDb {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, ProjectorConfig::default())
    }

    pub fn open_with_config<P: AsRef<Path>>(
        path: P,
        projector_config: ProjectorConfig,
    ) -> Result<Self> {
        let base_path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path)?;

        let notify = Arc::new(Notify::new());
        let log = Arc::new(
            SqliteEventLog::open(ProjectionConfig::new(base_path.join("events.db")))?
                .with_notify(notify.clone()),
        );
        let projection = Arc::new(SqliteProjectionStore::open(ProjectionConfig::new(
            base_path.join("projection.db"),
        ))?);
        let locks = Arc::new(SqliteLockStore::open(ProjectionConfig::new(
            base_path.join("locks.db"),
        ))?);

        let lanes = Arc::new(LockManager::new(
            64,
            Duration::from_millis(projector_config.lane_timeout_ms),
        ));
        let projectors = projections::standard()
            .into_iter()
            .map(|p| {
                Projector::new(
                    log.clone(),
                    projection.clone(),
                    Arc::new(p),
                    projector_config.clone(),
                )
                .map(|projector| {
                    Arc::new(
                        projector
                            .with_lanes(lanes.clone())
                            .with_event_notify(notify.clone()),
                    )
                })
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::info!(
            "Opened sigil database at {} with {} projections",
            base_path.display(),
            projectors.len()
        );

        Ok(Self {
            log,
            projection,
            locks,
            projectors,
            base_path,
        })
    }

    pub fn event_log(&self) -> &Arc<SqliteEventLog> {
        &self.log
    }

    pub fn projection(&self) -> &Arc<SqliteProjectionStore> {
        &self.projection
    }

    pub fn lock_store(&self) -> &Arc<SqliteLockStore> {
        &self.locks
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn projectors(&self) -> &[Arc<SigilProjector>] {
        &self.projectors
    }

    pub fn projector(&self, name: &str) -> Option<&Arc<SigilProjector>> {
        self.projectors.iter().find(|p| p.projection().name() == name)
    }

    /// Drive every projection until `tenant` has no unread events
    pub fn catch_up(&self, tenant: &TenantId) -> Result<ProjectorStats> {
        let mut total: Option<ProjectorStats> = None;
        for projector in &self.projectors {
            let stats = projector.catch_up(tenant)?;
            total = Some(match total {
                None => stats,
                Some(mut acc) => {
                    acc.events_applied += stats.events_applied;
                    acc.events_skipped += stats.events_skipped;
                    acc.duration += stats.duration;
                    acc.new_watermark = acc.new_watermark.max(stats.new_watermark);
                    acc
                }
            });
        }
        total.ok_or_else(|| SigilError::InvalidState("no projections registered".into()))
    }

    /// Run every projector continuously on the current tokio runtime
    pub fn spawn_projectors(&self) -> Vec<JoinHandle<Result<()>>> {
        self.projectors
            .iter()
            .map(|projector| {
                let projector = projector.clone();
                tokio::spawn(async move { projector.run_continuous().await })
            })
            .collect()
    }

    /// Signal every projector loop to stop
    pub fn shutdown(&self) {
        for projector in &self.projectors {
            projector.shutdown();
        }
    }

    pub fn certificate_query(&self) -> ProjectionCertificateQuery {
        ProjectionCertificateQuery::new(self.projection.clone())
    }

    /// Provisioner over this database's keys projection and lock store
    pub fn provisioner(
        &self,
        commands: Arc<dyn CertificateCommands>,
        config: ProvisionerConfig,
    ) -> CertificateProvisioner {
        let log: Arc<dyn EventLog> = self.log.clone();
        let locks: Arc<dyn LockStore> = self.locks.clone();
        CertificateProvisioner::new(
            Arc::new(self.certificate_query()),
            commands,
            ConsistencyChecker::for_projection(log, &keys::projection()),
            DistributedLock::new(locks),
            config,
        )
    }

    pub fn quota_notifier(&self) -> QuotaNotifier {
        QuotaNotifier::new(self.log.clone())
    }

    pub fn close(&self) -> Result<()> {
        self.shutdown();
        self.projection.close()
    }
}
