//! Certificate get-or-generate flow

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use sigil::prelude::*;
use sigil::projections::keys;
use sigil::{
    ActiveCertificates, LockKey, LockRecord, ProjectionCertificateQuery, SigilError,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tempfile::TempDir;

type KeysProjector = Projector<MemoryEventLog, SqliteProjectionStore>;

fn tenant() -> TenantId {
    TenantId::new("instance-1")
}

fn key_pair(usage: KeyUsage, expiry: DateTime<Utc>) -> Payload {
    Payload::KeyPairAdded {
        usage,
        algorithm: "RS256".into(),
        private_key: format!("key:{}", usage).into_bytes(),
        private_key_expiry: expiry,
        certificate: format!("cert:{}", usage).into_bytes(),
        certificate_expiry: expiry,
    }
}

fn next_year() -> DateTime<Utc> {
    Utc::now() + ChronoDuration::days(365)
}

/// Commands that append to the log, optionally materializing right away
struct RecordingCommands {
    log: Arc<MemoryEventLog>,
    projector: Arc<KeysProjector>,
    materialize: bool,
    fail: AtomicBool,
    calls: Mutex<Vec<(KeyUsage, Option<String>)>>,
}

impl RecordingCommands {
    fn issue(&self, actor: &Actor, usage: KeyUsage, ca: Option<&CertificateRecord>) -> Result<()> {
        self.calls.lock().push((usage, ca.map(|c| c.id.clone())));
        if self.fail.load(Ordering::SeqCst) {
            return Err(SigilError::Fatal("key service unavailable".into()));
        }
        self.log.append(
            NewEvent::new(
                actor.tenant.clone(),
                format!("key-{}", self.calls.lock().len()),
                key_pair(usage, next_year()),
            )
            .with_editor(sigil::Editor::new(actor.user_id.clone(), "test")),
        )?;
        if self.materialize {
            self.projector.catch_up(&actor.tenant)?;
        }
        Ok(())
    }

    fn usages(&self) -> Vec<KeyUsage> {
        self.calls.lock().iter().map(|(u, _)| *u).collect()
    }
}

#[async_trait]
impl CertificateCommands for RecordingCommands {
    async fn generate_ca(&self, actor: &Actor, _algorithm: &str) -> Result<()> {
        self.issue(actor, KeyUsage::Ca, None)
    }

    async fn generate_metadata_signing(
        &self,
        actor: &Actor,
        _algorithm: &str,
        ca: &CertificateRecord,
    ) -> Result<()> {
        self.issue(actor, KeyUsage::MetadataSigning, Some(ca))
    }

    async fn generate_response_signing(
        &self,
        actor: &Actor,
        _algorithm: &str,
        ca: &CertificateRecord,
    ) -> Result<()> {
        self.issue(actor, KeyUsage::ResponseSigning, Some(ca))
    }
}

/// Lock store that counts acquisition attempts
#[derive(Default)]
struct CountingLockStore {
    inner: MemoryLockStore,
    attempts: AtomicUsize,
}

impl LockStore for CountingLockStore {
    fn try_acquire(&self, key: &LockKey, record: &LockRecord, now: DateTime<Utc>) -> Result<bool> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.inner.try_acquire(key, record, now)
    }

    fn release(&self, key: &LockKey, token: &str) -> Result<bool> {
        self.inner.release(key, token)
    }

    fn holder(&self, key: &LockKey, now: DateTime<Utc>) -> Result<Option<LockRecord>> {
        self.inner.holder(key, now)
    }
}

/// Query that runs the keys projector before its `catch_up_on`-th answer
struct DelayedQuery {
    inner: ProjectionCertificateQuery,
    projector: Arc<KeysProjector>,
    calls: AtomicUsize,
    catch_up_on: usize,
}

impl CertificateQuery for DelayedQuery {
    fn active_certificates(
        &self,
        tenant: &TenantId,
        not_expiring_before: DateTime<Utc>,
        usage: KeyUsage,
    ) -> Result<ActiveCertificates> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.catch_up_on {
            self.projector.catch_up(tenant)?;
        }
        self.inner
            .active_certificates(tenant, not_expiring_before, usage)
    }
}

struct Fixture {
    log: Arc<MemoryEventLog>,
    store: Arc<SqliteProjectionStore>,
    projector: Arc<KeysProjector>,
    locks: Arc<CountingLockStore>,
    commands: Arc<RecordingCommands>,
    _dir: TempDir,
}

impl Fixture {
    fn new(materialize: bool) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(MemoryEventLog::new());
        let store = Arc::new(
            SqliteProjectionStore::open(ProjectionConfig::new(dir.path().join("projection.db")))
                .unwrap(),
        );
        let projector = Arc::new(
            Projector::new(
                log.clone(),
                store.clone(),
                Arc::new(keys::projection()),
                ProjectorConfig::default(),
            )
            .unwrap(),
        );
        let commands = Arc::new(RecordingCommands {
            log: log.clone(),
            projector: projector.clone(),
            materialize,
            fail: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        });
        Self {
            log,
            store,
            projector,
            locks: Arc::new(CountingLockStore::default()),
            commands,
            _dir: dir,
        }
    }

    fn config() -> ProvisionerConfig {
        ProvisionerConfig::default()
            .with_retry(3, 10)
            .with_lock_ttl_ms(30_000)
    }

    fn provisioner_with(
        &self,
        query: Arc<dyn CertificateQuery>,
        config: ProvisionerConfig,
    ) -> CertificateProvisioner {
        let log: Arc<dyn EventLog> = self.log.clone();
        let locks: Arc<dyn LockStore> = self.locks.clone();
        CertificateProvisioner::new(
            query,
            self.commands.clone(),
            ConsistencyChecker::for_projection(log, &keys::projection()),
            DistributedLock::with_owner(locks, "instance-a"),
            config,
        )
    }

    fn provisioner(&self, config: ProvisionerConfig) -> CertificateProvisioner {
        self.provisioner_with(
            Arc::new(ProjectionCertificateQuery::new(self.store.clone())),
            config,
        )
    }

    fn lock_attempts(&self) -> usize {
        self.locks.attempts.load(Ordering::SeqCst)
    }
}

#[tokio::test]
async fn test_generates_ca_and_returns_it_once_materialized() {
    let f = Fixture::new(false);
    let query = Arc::new(DelayedQuery {
        inner: ProjectionCertificateQuery::new(f.store.clone()),
        projector: f.projector.clone(),
        calls: AtomicUsize::new(0),
        catch_up_on: 3,
    });
    let provisioner = f.provisioner_with(query.clone(), Fixture::config());

    let ca = provisioner
        .get_certificate(&tenant(), KeyUsage::Ca)
        .await
        .unwrap();

    assert_eq!(ca.usage, KeyUsage::Ca);
    assert_eq!(f.commands.usages(), vec![KeyUsage::Ca]);
    // Generated, then lagging, then found
    assert_eq!(query.calls.load(Ordering::SeqCst), 3);
    assert_eq!(f.lock_attempts(), 1);
}

#[tokio::test]
async fn test_lagging_read_defers_without_lock_or_command() {
    let f = Fixture::new(false);
    // In the log but not yet projected
    f.log
        .append(NewEvent::new(
            tenant(),
            "key-x",
            key_pair(KeyUsage::MetadataSigning, next_year()),
        ))
        .unwrap();
    let provisioner = f.provisioner(Fixture::config());

    assert_eq!(
        provisioner.provision(&tenant(), KeyUsage::Ca).await.unwrap(),
        Provision::Deferred(DeferReason::Lagging)
    );
    let err = provisioner
        .get_certificate(&tenant(), KeyUsage::Ca)
        .await
        .unwrap_err();

    assert!(matches!(err, SigilError::NotFound(_)));
    assert_eq!(f.lock_attempts(), 0);
    assert!(f.commands.usages().is_empty());
}

#[tokio::test]
async fn test_signing_certificate_provisions_ca_first() {
    let f = Fixture::new(true);
    let provisioner = f.provisioner(Fixture::config());

    let signing = provisioner
        .get_certificate(&tenant(), KeyUsage::ResponseSigning)
        .await
        .unwrap();

    assert_eq!(signing.usage, KeyUsage::ResponseSigning);
    assert_eq!(
        f.commands.usages(),
        vec![KeyUsage::Ca, KeyUsage::ResponseSigning]
    );

    // Chained to the CA that was just generated
    let ca = provisioner
        .get_certificate(&tenant(), KeyUsage::Ca)
        .await
        .unwrap();
    let calls = f.commands.calls.lock().clone();
    assert_eq!(calls[1].1.as_deref(), Some(ca.id.as_str()));
}

#[tokio::test]
async fn test_existing_ca_is_reused_for_signing() {
    let f = Fixture::new(true);
    f.log
        .append(NewEvent::new(
            tenant(),
            "ca-1",
            key_pair(KeyUsage::Ca, next_year()),
        ))
        .unwrap();
    f.projector.catch_up(&tenant()).unwrap();
    let provisioner = f.provisioner(Fixture::config());

    provisioner
        .get_certificate(&tenant(), KeyUsage::MetadataSigning)
        .await
        .unwrap();

    assert_eq!(f.commands.usages(), vec![KeyUsage::MetadataSigning]);
    assert_eq!(f.commands.calls.lock()[0].1.as_deref(), Some("ca-1"));
}

#[tokio::test]
async fn test_contended_lock_defers() {
    let f = Fixture::new(true);
    let locks: Arc<dyn LockStore> = f.locks.clone();
    let other = DistributedLock::with_owner(locks, "instance-b");
    let _held = other
        .acquire("signing_key.ca", &tenant(), std::time::Duration::from_secs(30))
        .unwrap();
    let provisioner = f.provisioner(Fixture::config());

    assert_eq!(
        provisioner.provision(&tenant(), KeyUsage::Ca).await.unwrap(),
        Provision::Deferred(DeferReason::Contended)
    );
    assert!(f.commands.usages().is_empty());
}

#[tokio::test]
async fn test_generation_failure_is_swallowed() {
    let f = Fixture::new(true);
    f.commands.fail.store(true, Ordering::SeqCst);
    let provisioner = f.provisioner(Fixture::config());

    let err = provisioner
        .get_certificate(&tenant(), KeyUsage::Ca)
        .await
        .unwrap_err();

    assert!(matches!(err, SigilError::NotFound(_)));
    // The lock outlives the failed attempt, so later passes are contended
    assert_eq!(f.commands.usages(), vec![KeyUsage::Ca]);
    assert_eq!(f.lock_attempts(), 3);
}

#[tokio::test]
async fn test_open_breaker_stops_commands() {
    let f = Fixture::new(true);
    f.commands.fail.store(true, Ordering::SeqCst);
    let config = Fixture::config()
        .with_lock_ttl_ms(1)
        .with_breaker(BreakerConfig {
            failure_threshold: 1,
            window_secs: 60,
            open_secs: 300,
            half_open_successes: 1,
        });
    let provisioner = f.provisioner(config);

    assert_eq!(
        provisioner.provision(&tenant(), KeyUsage::Ca).await.unwrap(),
        Provision::Deferred(DeferReason::GenerationFailed)
    );
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    assert_eq!(
        provisioner.provision(&tenant(), KeyUsage::Ca).await.unwrap(),
        Provision::Deferred(DeferReason::BreakerOpen)
    );

    assert_eq!(f.commands.usages(), vec![KeyUsage::Ca]);
    assert_eq!(f.lock_attempts(), 1);
    assert_eq!(
        provisioner.breaker(KeyUsage::Ca).unwrap().state(),
        sigil::BreakerState::Open
    );
    // Other usages keep their own breaker
    assert_eq!(
        provisioner
            .breaker(KeyUsage::ResponseSigning)
            .unwrap()
            .state(),
        sigil::BreakerState::Closed
    );
}

#[tokio::test]
async fn test_newest_active_certificate_wins() {
    let f = Fixture::new(true);
    for id in ["ca-old", "ca-new"] {
        f.log
            .append(NewEvent::new(tenant(), id, key_pair(KeyUsage::Ca, next_year())))
            .unwrap();
    }
    // Expires inside the grace period
    f.log
        .append(NewEvent::new(
            tenant(),
            "ca-expiring",
            key_pair(KeyUsage::Ca, Utc::now() + ChronoDuration::minutes(5)),
        ))
        .unwrap();
    f.projector.catch_up(&tenant()).unwrap();
    let provisioner = f.provisioner(Fixture::config());

    match provisioner.provision(&tenant(), KeyUsage::Ca).await.unwrap() {
        Provision::Ready(record) => assert_eq!(record.id, "ca-new"),
        other => panic!("expected ready, got {:?}", other),
    }
    assert!(f.commands.usages().is_empty());
}

#[tokio::test]
async fn test_expiring_certificate_triggers_rotation() {
    let f = Fixture::new(true);
    f.log
        .append(NewEvent::new(
            tenant(),
            "ca-expiring",
            key_pair(KeyUsage::Ca, Utc::now() + ChronoDuration::minutes(5)),
        ))
        .unwrap();
    f.projector.catch_up(&tenant()).unwrap();
    let provisioner = f.provisioner(Fixture::config());

    let ca = provisioner
        .get_certificate(&tenant(), KeyUsage::Ca)
        .await
        .unwrap();

    assert_ne!(ca.id, "ca-expiring");
    assert_eq!(f.commands.usages(), vec![KeyUsage::Ca]);
}

#[tokio::test]
async fn test_cancelled_flow_releases_lock_early() {
    let f = Fixture::new(false);
    // Long enough that the nested CA retry is still sleeping when dropped
    let config = ProvisionerConfig::default()
        .with_retry(3, 60_000)
        .with_lock_ttl_ms(30_000);
    let provisioner = f.provisioner(config);

    let tenant_id = tenant();
    let flow = provisioner.get_certificate(&tenant_id, KeyUsage::ResponseSigning);
    assert!(
        tokio::time::timeout(std::time::Duration::from_millis(200), flow)
            .await
            .is_err()
    );

    let now = Utc::now();
    let signing = LockKey::new("signing_key.response_signing", tenant());
    assert!(f.locks.holder(&signing, now).unwrap().is_none());
    // The CA command went out, so its lock stays until expiry
    let ca = LockKey::new("signing_key.ca", tenant());
    assert!(f.locks.holder(&ca, now).unwrap().is_some());
    assert_eq!(f.commands.usages(), vec![KeyUsage::Ca]);
}
