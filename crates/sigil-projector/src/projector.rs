use sigil_core::{
    error::Result,
    event_log::{EventFilter, EventLog},
    reducer::Projection,
    traits::{Applied, ProjectionStore, ProjectionTxn},
    types::{Position, TenantId},
    LockManager, ProjectorConfig,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Projector: reads new events for one projection, reduces them and applies
/// the resulting statements to the projection store
pub struct Projector<L, P>
where
    L: EventLog,
    P: ProjectionStore,
{
    log: Arc<L>,
    store: Arc<P>,
    projection: Arc<Projection>,
    config: ProjectorConfig,
    lanes: Arc<LockManager>,
    shutdown: Arc<AtomicBool>,
    /// When set, the projector awaits this notification instead of polling.
    /// Event logs fire `notify_waiters()` after every successful append.
    event_notify: Option<Arc<Notify>>,
}

impl<L, P> Projector<L, P>
where
    L: EventLog,
    P: ProjectionStore,
{
    /// Create a projector and make sure the projection's tables exist
    pub fn new(
        log: Arc<L>,
        store: Arc<P>,
        projection: Arc<Projection>,
        config: ProjectorConfig,
    ) -> Result<Self> {
        store.ensure_tables(projection.tables())?;
        let lanes = Arc::new(LockManager::new(
            64,
            Duration::from_millis(config.lane_timeout_ms),
        ));
        Ok(Self {
            log,
            store,
            projection,
            config,
            lanes,
            shutdown: Arc::new(AtomicBool::new(false)),
            event_notify: None,
        })
    }

    /// Share catch-up lanes with other projectors of the same process
    pub fn with_lanes(mut self, lanes: Arc<LockManager>) -> Self {
        self.lanes = lanes;
        self
    }

    /// Attach an event notification handle for push-based projection.
    pub fn with_event_notify(mut self, notify: Arc<Notify>) -> Self {
        self.event_notify = Some(notify);
        self
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    /// Apply one batch of new events for `tenant`
    ///
    /// Catch-up for the same projection and tenant is serialized. A failing
    /// statement rolls back the whole batch and leaves the watermark alone.
    pub fn run_once(&self, tenant: &TenantId) -> Result<ProjectorStats> {
        let start = Instant::now();
        let name = self.projection.name();
        let _lane = self.lanes.lane(name, tenant)?;

        let watermark = self.store.watermark(name, tenant)?;
        let filter = EventFilter::new(tenant.clone())
            .entity_types(&self.projection.entity_types())
            .after(watermark)
            .limit(self.config.batch_events_max);
        let events = self.log.read(&filter)?;

        let Some(last) = events.last() else {
            return Ok(ProjectorStats::empty(watermark));
        };
        let new_watermark = last.position;

        let statements = events
            .iter()
            .map(|e| self.projection.reduce(e))
            .collect::<Result<Vec<_>>>()?;

        let mut txn = self.store.begin_txn(name, tenant)?;
        let outcomes = match txn.execute_batch(&statements) {
            Ok(outcomes) => outcomes,
            Err(e) => {
                Box::new(txn).rollback();
                return Err(e);
            }
        };
        Box::new(txn).commit(new_watermark)?;

        let skipped = outcomes.iter().filter(|a| **a == Applied::Skipped).count();
        let stats = ProjectorStats {
            events_applied: outcomes.len() - skipped,
            events_skipped: skipped,
            duration: start.elapsed(),
            new_watermark,
        };
        sigil_core::observe::record_projector_run(
            name,
            stats.duration,
            stats.events_applied as u64,
            stats.events_skipped as u64,
        );
        Ok(stats)
    }

    /// Run batches until `tenant` has no unread events
    pub fn catch_up(&self, tenant: &TenantId) -> Result<ProjectorStats> {
        let start = Instant::now();
        let mut total = ProjectorStats::empty(Position::ZERO);
        loop {
            let stats = self.run_once(tenant)?;
            total.new_watermark = stats.new_watermark;
            if stats.is_empty() {
                break;
            }
            total.events_applied += stats.events_applied;
            total.events_skipped += stats.events_skipped;
        }
        total.duration = start.elapsed();
        Ok(total)
    }

    /// One pass over every tenant known to the log
    ///
    /// A failing tenant does not hold back the others. After the pass the
    /// first non-retryable error is returned, else the first retryable one.
    pub fn run_all(&self) -> Result<ProjectorStats> {
        let start = Instant::now();
        let mut total = ProjectorStats::empty(Position::ZERO);
        let mut fatal = None;
        let mut transient = None;
        for tenant in self.log.tenants()? {
            match self.run_once(&tenant) {
                Ok(stats) => {
                    total.events_applied += stats.events_applied;
                    total.events_skipped += stats.events_skipped;
                    total.new_watermark = total.new_watermark.max(stats.new_watermark);
                }
                Err(e) => {
                    tracing::warn!(
                        "Projector {} failed for tenant {}: {}",
                        self.projection.name(),
                        tenant.as_str(),
                        e
                    );
                    if !e.is_retryable() {
                        fatal.get_or_insert(e);
                    } else {
                        transient.get_or_insert(e);
                    }
                }
            }
        }
        if let Some(e) = fatal.or(transient) {
            return Err(e);
        }
        total.duration = start.elapsed();
        Ok(total)
    }

    /// Run the projector continuously until shutdown.
    ///
    /// When an `event_notify` handle is set (via [`Self::with_event_notify`]),
    /// the projector awaits the notification instead of polling. Falls back to
    /// `poll_interval_ms` sleep if no notifier is present.
    ///
    /// Retryable errors back off for `error_backoff_ms`. Anything else, such
    /// as a reducer wired to the wrong kind, stops the loop and is returned.
    pub async fn run_continuous(&self) -> Result<()> {
        while !self.shutdown.load(Ordering::SeqCst) {
            match self.run_all() {
                Ok(stats) => {
                    if stats.is_empty() {
                        let poll = Duration::from_millis(self.config.poll_interval_ms);
                        if let Some(notify) = &self.event_notify {
                            tokio::select! {
                                _ = notify.notified() => {}
                                _ = tokio::time::sleep(poll) => {}
                            }
                        } else {
                            tokio::time::sleep(poll).await;
                        }
                    } else {
                        tracing::debug!(
                            "{}: applied {} events, skipped {} in {:?}",
                            self.projection.name(),
                            stats.events_applied,
                            stats.events_skipped,
                            stats.duration
                        );
                    }
                }
                Err(e) => {
                    tracing::error!("Projector {} error: {}", self.projection.name(), e);
                    if !e.is_retryable() {
                        return Err(e);
                    }
                    tokio::time::sleep(Duration::from_millis(self.config.error_backoff_ms)).await;
                }
            }
        }

        Ok(())
    }

    /// Signal graceful shutdown
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Positions the tenant's projection is behind the log
    pub fn get_lag(&self, tenant: &TenantId) -> Result<u64> {
        let watermark = self.store.watermark(self.projection.name(), tenant)?;
        let tip = self
            .log
            .max_position(&self.projection.entity_types(), tenant)?;
        let lag = tip.0.saturating_sub(watermark.0);
        sigil_core::observe::set_projection_lag(self.projection.name(), lag);
        Ok(lag)
    }
}

#[derive(Debug, Clone)]
pub struct ProjectorStats {
    pub events_applied: usize,
    /// Events already applied earlier (redelivery)
    pub events_skipped: usize,
    pub duration: Duration,
    pub new_watermark: Position,
}

impl ProjectorStats {
    fn empty(watermark: Position) -> Self {
        Self {
            events_applied: 0,
            events_skipped: 0,
            duration: Duration::from_secs(0),
            new_watermark: watermark,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events_applied == 0 && self.events_skipped == 0
    }
}
