//! Memory broker integration tests
//!
//! End-to-end tests running all four consumer roles against the in-memory
//! broker. Covers fan-out, per-role effects, failure isolation and
//! redelivery, broker restarts, shutdown, and audit file persistence.

use a3s_broadcast::audit::store::open_store;
use a3s_broadcast::policy::{
    CacheBackend, CacheKey, MemoryCache, NotificationKind, RecordingNotifier,
};
use a3s_broadcast::{
    Action, AnalyticsPolicy, AuditEntry, AuditFormat, AuditPolicy, AuditStore, AuditStoreConfig,
    Broker, BroadcastError, CacheInvalidator, ComplianceFlag, ConsumerPolicy, FailureSink,
    MemoryAuditStore, MemoryBroker, MemoryFailureSink, NotificationPolicy, Publisher, Result,
    RuntimeConfig, RuntimeHandle, RuntimeState, SubscriberRuntime, Topology, TopologyConfig,
};
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const CHANNEL: &str = "user_actions";

fn fast() -> RuntimeConfig {
    RuntimeConfig {
        retry_backoff_ms: 10,
        reconnect_delay_ms: 10,
        max_reconnect_attempts: 5,
    }
}

async fn wait<P: ConsumerPolicy>(
    handle: &RuntimeHandle<P>,
    predicate: impl FnMut(&RuntimeState<P::Snapshot>) -> bool,
) -> RuntimeState<P::Snapshot> {
    tokio::time::timeout(Duration::from_secs(3), handle.wait_until(predicate))
        .await
        .expect("runtime state timed out")
        .unwrap()
}

fn spawn<P: ConsumerPolicy>(broker: &MemoryBroker, queue: &str, policy: P) -> RuntimeHandle<P> {
    SubscriberRuntime::new(Arc::new(broker.clone()), CHANNEL, queue, policy)
        .with_config(fast())
        .spawn(CancellationToken::new())
}

/// All four roles on the default topology
struct Roles<C: CacheBackend + 'static = MemoryCache> {
    analytics: RuntimeHandle<AnalyticsPolicy>,
    notification: RuntimeHandle<NotificationPolicy<RecordingNotifier>>,
    audit: RuntimeHandle<AuditPolicy>,
    cache: RuntimeHandle<CacheInvalidator<C>>,
    notifier: RecordingNotifier,
    audit_store: MemoryAuditStore,
}

async fn start_roles<C: CacheBackend + 'static>(broker: &MemoryBroker, cache: C) -> Roles<C> {
    Topology::from(&TopologyConfig::default())
        .setup(broker)
        .await
        .unwrap();

    let notifier = RecordingNotifier::new();
    let audit_store = MemoryAuditStore::new();
    let roles = Roles {
        analytics: spawn(broker, "analytics_queue", AnalyticsPolicy::new()),
        notification: spawn(
            broker,
            "notification_queue",
            NotificationPolicy::new(notifier.clone()),
        ),
        audit: spawn(
            broker,
            "audit_queue",
            AuditPolicy::new(Arc::new(audit_store.clone())),
        ),
        cache: spawn(broker, "cache_queue", CacheInvalidator::new(cache)),
        notifier,
        audit_store,
    };

    wait(&roles.analytics, |s| s.connected).await;
    wait(&roles.notification, |s| s.connected).await;
    wait(&roles.audit, |s| s.connected).await;
    wait(&roles.cache, |s| s.connected).await;
    roles
}

async fn publisher(broker: &MemoryBroker) -> Publisher {
    Publisher::connect(Arc::new(broker.clone()), CHANNEL).await.unwrap()
}

// ─── Fan-out ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_every_bound_queue_gets_every_event() {
    let broker = MemoryBroker::new();
    Topology::from(&TopologyConfig::default())
        .setup(&broker)
        .await
        .unwrap();
    let publisher = publisher(&broker).await;

    for i in 0..3 {
        publisher
            .publish(Action::new("login", format!("user{}", i), json!({})))
            .await
            .unwrap();
    }

    let info = broker.info().await.unwrap();
    assert_eq!(info.queues.len(), 4);
    let copies: u64 = info.queues.iter().map(|q| q.ready).sum();
    assert_eq!(copies, 3 * 4);
    assert!(info.queues.iter().all(|q| q.ready == 3));
}

#[tokio::test]
async fn test_purchase_scenario_reaches_all_roles() {
    let broker = MemoryBroker::new();
    let cache = MemoryCache::new();
    let roles = start_roles(&broker, cache.clone()).await;

    publisher(&broker)
        .await
        .publish(Action::new(
            "purchase",
            "bob456",
            json!({"productId": "LAPTOP-001", "amount": 1299.99, "currency": "USD"}),
        ))
        .await
        .unwrap();

    let analytics = wait(&roles.analytics, |s| s.handled == 1).await.policy;
    assert_eq!(analytics.purchase, 1);
    assert_eq!(analytics.total, 1);
    assert_eq!(analytics.login, 0);

    wait(&roles.notification, |s| s.handled == 1).await;
    let sent = roles.notifier.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, NotificationKind::PurchaseConfirmation);
    assert_eq!(sent[0].subject_id, "bob456");
    assert!(sent[0].message.contains("LAPTOP-001"));
    assert!(sent[0].message.contains("1299.99"));

    wait(&roles.audit, |s| s.handled == 1).await;
    let entries = roles.audit_store.load().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(
        entries[0].compliance_flags.iter().copied().collect::<Vec<_>>(),
        vec![ComplianceFlag::Logged, ComplianceFlag::FinancialRecord]
    );

    let cache_stats = wait(&roles.cache, |s| s.handled == 1).await.policy;
    assert_eq!(cache_stats.invalidated, 2);
    assert_eq!(
        cache.invalidations().await,
        vec![
            CacheKey::Subject("bob456".to_string()),
            CacheKey::Product("LAPTOP-001".to_string())
        ]
    );
}

#[tokio::test]
async fn test_five_logins() {
    let broker = MemoryBroker::new();
    let roles = start_roles(&broker, MemoryCache::new()).await;
    let publisher = publisher(&broker).await;

    let users: Vec<String> = (1..=5).map(|i| format!("user{}", i)).collect();
    for user in &users {
        publisher
            .publish(Action::new("login", user.as_str(), json!({"ip": "10.0.0.1"})))
            .await
            .unwrap();
    }

    wait(&roles.analytics, |s| s.handled == 5).await;
    wait(&roles.notification, |s| s.handled == 5).await;
    wait(&roles.audit, |s| s.handled == 5).await;
    wait(&roles.cache, |s| s.handled == 5).await;

    // Nothing further arrives once every copy is acknowledged
    tokio::time::sleep(Duration::from_millis(100)).await;
    let analytics = roles.analytics.snapshot();
    assert_eq!((analytics.login, analytics.total), (5, 5));
    assert_eq!(roles.notification.snapshot().sent, 5);
    let cache = roles.cache.snapshot();
    assert_eq!((cache.invalidated, cache.skipped), (0, 5));

    let notified: Vec<String> = roles
        .notifier
        .sent()
        .await
        .into_iter()
        .inspect(|n| assert_eq!(n.kind, NotificationKind::LoginAlert))
        .map(|n| n.subject_id)
        .collect();
    assert_eq!(notified, users);

    let entries = roles.audit_store.load().await.unwrap();
    assert!(entries
        .iter()
        .all(|e| e.has_flag(ComplianceFlag::SecurityEvent)));
    let audited: Vec<String> = entries.into_iter().map(|e| e.subject_id).collect();
    assert_eq!(audited, users);

    let info = broker.info().await.unwrap();
    assert!(info.queues.iter().all(|q| q.ready == 0 && q.unacked == 0));
}

#[tokio::test]
async fn test_unrecognized_kind_falls_through() {
    let broker = MemoryBroker::new();
    let roles = start_roles(&broker, MemoryCache::new()).await;

    publisher(&broker)
        .await
        .publish(Action::new("logout", "alice123", json!({})))
        .await
        .unwrap();

    let analytics = wait(&roles.analytics, |s| s.handled == 1).await.policy;
    assert_eq!(analytics.total, 1);
    assert_eq!(analytics.login + analytics.purchase + analytics.profile_update, 0);

    let notification = wait(&roles.notification, |s| s.handled == 1).await.policy;
    assert_eq!((notification.sent, notification.skipped), (0, 1));

    wait(&roles.audit, |s| s.handled == 1).await;
    let entries = roles.audit_store.load().await.unwrap();
    assert_eq!(entries[0].compliance_flags.len(), 1);
    assert!(entries[0].has_flag(ComplianceFlag::Logged));

    let cache = wait(&roles.cache, |s| s.handled == 1).await.policy;
    assert_eq!(cache.skipped, 1);
}

// ─── Failure Isolation ───────────────────────────────────────────

/// Cache backend that fails its first `failures` calls
#[derive(Clone)]
struct FlakyCache {
    remaining: Arc<AtomicU32>,
    inner: MemoryCache,
}

#[async_trait]
impl CacheBackend for FlakyCache {
    async fn invalidate(&self, key: &CacheKey) -> Result<()> {
        if self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(BroadcastError::Handler {
                role: "cache".to_string(),
                reason: "cache unreachable".to_string(),
            });
        }
        self.inner.invalidate(key).await
    }
}

#[tokio::test]
async fn test_failing_role_does_not_affect_others() {
    let broker = MemoryBroker::new();
    let flaky = FlakyCache {
        remaining: Arc::new(AtomicU32::new(2)),
        inner: MemoryCache::new(),
    };
    let roles = start_roles(&broker, flaky.clone()).await;

    publisher(&broker)
        .await
        .publish(Action::new("profile_update", "carol789", json!({"field": "email"})))
        .await
        .unwrap();

    // Other roles settle on the first attempt
    let analytics = wait(&roles.analytics, |s| s.handled == 1).await;
    assert_eq!(analytics.failed, 0);
    assert_eq!(analytics.policy.profile_update, 1);
    let audit = wait(&roles.audit, |s| s.handled == 1).await;
    assert_eq!(audit.failed, 0);

    // The cache role retries until the backend recovers
    let cache = wait(&roles.cache, |s| s.handled == 1).await;
    assert_eq!(cache.failed, 2);
    assert_eq!(cache.policy.invalidated, 1);
    assert_eq!(
        flaky.inner.invalidations().await,
        vec![CacheKey::Subject("carol789".to_string())]
    );

    let info = broker.info().await.unwrap();
    assert!(info.queues.iter().all(|q| q.ready == 0 && q.unacked == 0));
}

#[tokio::test]
async fn test_failures_are_reported_to_sink() {
    let broker = MemoryBroker::new();
    let sink = Arc::new(MemoryFailureSink::default());
    let flaky = FlakyCache {
        remaining: Arc::new(AtomicU32::new(1)),
        inner: MemoryCache::new(),
    };
    let handle = SubscriberRuntime::new(
        Arc::new(broker.clone()),
        CHANNEL,
        "cache_queue",
        CacheInvalidator::new(flaky),
    )
    .with_config(fast())
    .with_failure_sink(sink.clone())
    .spawn(CancellationToken::new());
    wait(&handle, |s| s.connected).await;

    publisher(&broker)
        .await
        .publish(Action::new("purchase", "bob456", json!({"productId": "LAPTOP-001"})))
        .await
        .unwrap();
    wait(&handle, |s| s.handled == 1).await;

    let failures = sink.list(10).await.unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].role, "cache");
    assert_eq!(failures[0].queue, "cache_queue");
    assert!(failures[0].reason.contains("cache unreachable"));
    assert_eq!(failures[0].event.as_ref().unwrap().subject_id(), "bob456");

    handle.shutdown().await.unwrap();
}

// ─── Restart & Shutdown ──────────────────────────────────────────

#[tokio::test]
async fn test_durable_queue_survives_restart() {
    let broker = MemoryBroker::new();
    Topology::new(CHANNEL)
        .with_queue("analytics_queue")
        .setup(&broker)
        .await
        .unwrap();
    let publisher = publisher(&broker).await;
    for _ in 0..3 {
        publisher
            .publish(Action::new("purchase", "bob456", json!({})))
            .await
            .unwrap();
    }

    broker.restart().unwrap();

    // Subscriber started after the restart drains what was published before it
    let handle = spawn(&broker, "analytics_queue", AnalyticsPolicy::new());
    let state = wait(&handle, |s| s.handled == 3).await;
    assert_eq!(state.policy.purchase, 3);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_transient_topology_is_lost_on_restart() {
    let broker = MemoryBroker::new();
    Topology::new("scratch")
        .with_queue("scratch_queue")
        .durable(false)
        .setup(&broker)
        .await
        .unwrap();
    let publisher = Publisher::connect_with(Arc::new(broker.clone()), "scratch", false)
        .await
        .unwrap();
    publisher
        .publish(Action::new("login", "a", json!({})))
        .await
        .unwrap();

    broker.restart().unwrap();

    assert!(matches!(
        broker.subscribe("scratch_queue").await,
        Err(BroadcastError::QueueNotFound(_))
    ));
    assert!(publisher
        .publish(Action::new("login", "a", json!({})))
        .await
        .is_err());
}

#[tokio::test]
async fn test_roles_resume_after_restart() {
    let broker = MemoryBroker::new();
    let roles = start_roles(&broker, MemoryCache::new()).await;
    let publisher = publisher(&broker).await;

    publisher
        .publish(Action::new("login", "alice123", json!({})))
        .await
        .unwrap();
    // Everything settled, so the restart requeues nothing
    wait(&roles.analytics, |s| s.handled == 1).await;
    wait(&roles.notification, |s| s.handled == 1).await;
    wait(&roles.audit, |s| s.handled == 1).await;
    wait(&roles.cache, |s| s.handled == 1).await;

    broker.restart().unwrap();
    wait(&roles.analytics, |s| s.reconnects == 1 && s.connected).await;
    wait(&roles.audit, |s| s.reconnects == 1 && s.connected).await;

    publisher
        .publish(Action::new("login", "alice123", json!({})))
        .await
        .unwrap();

    let analytics = wait(&roles.analytics, |s| s.policy.login == 2).await;
    assert_eq!(analytics.policy.total, 2);
    wait(&roles.audit, |s| s.policy.appended == 2).await;
    assert_eq!(roles.audit_store.len().await.unwrap(), 2);
}

#[tokio::test]
async fn test_shutdown_returns_final_policies() {
    let broker = MemoryBroker::new();
    let roles = start_roles(&broker, MemoryCache::new()).await;
    let publisher = publisher(&broker).await;

    publisher
        .publish(Action::new("purchase", "bob456", json!({"productId": "LAPTOP-001"})))
        .await
        .unwrap();
    wait(&roles.analytics, |s| s.handled == 1).await;
    wait(&roles.cache, |s| s.handled == 1).await;

    let analytics = roles.analytics.shutdown().await.unwrap();
    assert_eq!(analytics.counts().purchase, 1);
    let cache = roles.cache.shutdown().await.unwrap();
    assert_eq!(cache.snapshot().invalidated, 2);

    roles.notification.shutdown().await.unwrap();
    roles.audit.shutdown().await.unwrap();

    // Published while every role is down: kept on the durable queues
    publisher
        .publish(Action::new("login", "alice123", json!({})))
        .await
        .unwrap();
    let info = broker.info().await.unwrap();
    assert!(info.queues.iter().all(|q| q.ready >= 1));
}

// ─── Audit Persistence ───────────────────────────────────────────

#[tokio::test]
async fn test_audit_role_writes_document_store() {
    let dir = tempfile::tempdir().unwrap();
    let config = AuditStoreConfig {
        path: dir.path().join("audit_log.json"),
        format: AuditFormat::Document,
        ..Default::default()
    };

    let broker = MemoryBroker::new();
    let handle = spawn(&broker, "audit_queue", AuditPolicy::from_config(&config));
    wait(&handle, |s| s.connected).await;

    let publisher = publisher(&broker).await;
    for kind in ["login", "purchase", "profile_update"] {
        publisher
            .publish(Action::new(kind, "dave", json!({})))
            .await
            .unwrap();
    }
    wait(&handle, |s| s.handled == 3).await;
    handle.shutdown().await.unwrap();

    let reopened = open_store(&config);
    let entries = reopened.load().await.unwrap();
    let kinds: Vec<&str> = entries.iter().map(|e| e.action_kind.as_str()).collect();
    assert_eq!(kinds, vec!["login", "purchase", "profile_update"]);
    assert!(entries[2].has_flag(ComplianceFlag::Gdpr));

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&config.path).unwrap()).unwrap();
    assert_eq!(raw.as_array().unwrap().len(), 3);
}

/// Audit store that rejects appends while `down` is set
#[derive(Clone, Default)]
struct OutageStore {
    inner: MemoryAuditStore,
    down: Arc<AtomicBool>,
}

#[async_trait]
impl AuditStore for OutageStore {
    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(BroadcastError::Storage("store offline".to_string()));
        }
        self.inner.append(entry).await
    }

    async fn load(&self) -> Result<Vec<AuditEntry>> {
        self.inner.load().await
    }
}

#[tokio::test]
async fn test_audit_outage_defers_events_to_broker() {
    let broker = MemoryBroker::new();
    let store = OutageStore::default();
    store.down.store(true, Ordering::SeqCst);

    let policy = AuditPolicy::new(Arc::new(store.clone())).with_max_backlog(1);
    let handle = spawn(&broker, "audit_queue", policy);
    wait(&handle, |s| s.connected).await;

    let publisher = publisher(&broker).await;
    for user in ["erin", "frank", "grace"] {
        publisher
            .publish(Action::new("login", user, json!({})))
            .await
            .unwrap();
    }

    // One entry fits the backlog; the next is refused and left with the broker
    let state = wait(&handle, |s| s.handled == 1 && s.failed >= 2).await;
    assert_eq!(state.policy.pending, 1);
    assert!(state.policy.refused >= 2);
    let info = broker.info().await.unwrap();
    let queue = info.queue("audit_queue").unwrap();
    assert_eq!(queue.ready + queue.unacked, 2);

    store.down.store(false, Ordering::SeqCst);
    let state = wait(&handle, |s| s.handled == 3).await;
    assert_eq!(state.policy.pending, 0);
    assert_eq!(state.policy.appended, 3);

    let subjects: Vec<String> = store
        .load()
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.subject_id)
        .collect();
    assert_eq!(subjects, vec!["erin", "frank", "grace"]);
    handle.shutdown().await.unwrap();
}
