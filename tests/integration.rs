//! Integration tests for the event ingestion pipeline

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::channel::mpsc;
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use glinr_monitor::error::{DeliveryError, EventStreamError, MonitorError};
use glinr_monitor::events::{
    ContainerSummary, DaemonEvent, EventMonitor, EventSource, EventStream, MonitorOptions,
    MonitorState,
};
use glinr_monitor::identity::{HashIdentityResolver, IdentityResolver};
use glinr_monitor::state::{AtomicGauge, ServiceState, StateCache};
use glinr_monitor::status::ServiceStatus;
use glinr_monitor::subscribers::{Subscriber, SubscriberId, SubscriberRegistry};
use parking_lot::Mutex;
use tokio::sync::watch;
use uuid::Uuid;

type EventSender = mpsc::UnboundedSender<Result<DaemonEvent, EventStreamError>>;

/// Event source fed by test code; each `subscribe` hands out the next queued stream
struct ScriptedSource {
    streams: Mutex<VecDeque<EventStream>>,
    containers: Vec<ContainerSummary>,
    subscriptions: Mutex<usize>,
    /// Subscriptions open when the container list was taken
    subscriptions_at_list: Mutex<Option<usize>>,
    /// Events emitted while the container list is being taken
    during_list: Mutex<Vec<(EventSender, DaemonEvent)>>,
}

impl ScriptedSource {
    fn new() -> Arc<Self> {
        Self::with_containers(Vec::new())
    }

    fn with_containers(containers: Vec<ContainerSummary>) -> Arc<Self> {
        Arc::new(Self {
            streams: Mutex::new(VecDeque::new()),
            containers,
            subscriptions: Mutex::new(0),
            subscriptions_at_list: Mutex::new(None),
            during_list: Mutex::new(Vec::new()),
        })
    }

    /// Queue a stream and return the sender feeding it
    fn push_stream(&self) -> EventSender {
        let (tx, rx) = mpsc::unbounded();
        self.streams.lock().push_back(rx.boxed());
        tx
    }

    fn subscriptions(&self) -> usize {
        *self.subscriptions.lock()
    }
}

impl EventSource for ScriptedSource {
    fn subscribe(&self) -> EventStream {
        *self.subscriptions.lock() += 1;
        self.streams
            .lock()
            .pop_front()
            .unwrap_or_else(|| stream::pending().boxed())
    }

    fn list_containers(&self) -> BoxFuture<'_, Result<Vec<ContainerSummary>, MonitorError>> {
        *self.subscriptions_at_list.lock() = Some(self.subscriptions());
        for (tx, event) in self.during_list.lock().drain(..) {
            let _ = tx.unbounded_send(Ok(event));
        }
        let containers = self.containers.clone();
        Box::pin(async move { Ok(containers) })
    }
}

struct Recording {
    id: SubscriberId,
    messages: Mutex<Vec<ServiceState>>,
}

impl Recording {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            messages: Mutex::new(Vec::new()),
        })
    }
}

impl Subscriber for Recording {
    fn id(&self) -> SubscriberId {
        self.id
    }

    fn send(&self, message: Arc<str>) -> Result<(), DeliveryError> {
        let state = serde_json::from_str(&message).map_err(|_| DeliveryError::Closed)?;
        self.messages.lock().push(state);
        Ok(())
    }
}

struct Failing(SubscriberId);

impl Subscriber for Failing {
    fn id(&self) -> SubscriberId {
        self.0
    }

    fn send(&self, _message: Arc<str>) -> Result<(), DeliveryError> {
        Err(DeliveryError::Closed)
    }
}

struct Harness {
    source: Arc<ScriptedSource>,
    cache: Arc<StateCache>,
    registry: Arc<SubscriberRegistry>,
    gauge: Arc<AtomicGauge>,
    monitor: Arc<EventMonitor>,
}

fn harness(source: Arc<ScriptedSource>, options: MonitorOptions) -> Harness {
    let registry = SubscriberRegistry::new();
    let gauge = AtomicGauge::new();
    let cache = StateCache::new(Arc::clone(&registry), gauge.clone());
    let monitor = EventMonitor::new(
        source.clone(),
        Arc::clone(&cache),
        Arc::new(HashIdentityResolver::new()),
        options,
    );
    Harness {
        source,
        cache,
        registry,
        gauge,
        monitor,
    }
}

fn fast_options() -> MonitorOptions {
    MonitorOptions {
        reconcile_on_start: false,
        resubscribe_delay: Duration::from_millis(10),
    }
}

fn service_id(name: &str) -> i64 {
    HashIdentityResolver::new().resolve(name).unwrap()
}

/// Poll until `condition` holds or the timeout expires
async fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

fn send(tx: &EventSender, action: &str, id: &str, name: &str) {
    tx.unbounded_send(Ok(DaemonEvent::container(action, id, name)))
        .unwrap();
}

// ============================================================================
// Ingestion Loop Tests
// ============================================================================

#[tokio::test]
async fn test_only_managed_container_events_reach_cache() {
    let h = harness(ScriptedSource::new(), fast_options());
    let tx = h.source.push_stream();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = h.monitor.start(shutdown_rx).await.unwrap();

    let mut volume = DaemonEvent::container("create", "v1", "glinr_3_database");
    volume.kind = "volume".to_string();
    tx.unbounded_send(Ok(volume)).unwrap();
    send(&tx, "start", "n1", "nginx");
    send(&tx, "start", "c3", "glinr_3_database");

    let id = service_id("glinr_3_database");
    assert!(wait_until(|| h.cache.get(id).is_some(), Duration::from_secs(5)).await);
    assert_eq!(h.cache.len(), 1);
    assert_eq!(h.cache.get(id).unwrap().status, ServiceStatus::Running);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_per_service_updates_apply_in_order() {
    let h = harness(ScriptedSource::new(), fast_options());
    let subscriber = Recording::new();
    h.registry.add(subscriber.clone());

    let tx = h.source.push_stream();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = h.monitor.start(shutdown_rx).await.unwrap();

    for action in ["create", "start", "pause", "stop", "die", "destroy"] {
        send(&tx, action, "c1", "glinr_1_api");
    }

    assert!(wait_until(|| subscriber.messages.lock().len() == 5, Duration::from_secs(5)).await);
    let statuses: Vec<ServiceStatus> = subscriber.messages.lock().iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![
            ServiceStatus::Created,
            ServiceStatus::Running,
            ServiceStatus::Stopped,
            ServiceStatus::Dead,
            ServiceStatus::Removed,
        ]
    );
    let id = service_id("glinr_1_api");
    assert_eq!(h.cache.get(id).unwrap().status, ServiceStatus::Removed);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_stream_errors_do_not_stop_loop() {
    let h = harness(ScriptedSource::new(), fast_options());
    let tx = h.source.push_stream();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = h.monitor.start(shutdown_rx).await.unwrap();

    tx.unbounded_send(Err(EventStreamError("connection reset".to_string())))
        .unwrap();
    send(&tx, "start", "c1", "glinr_api");
    send(&tx, "start", "c2", "glinr_2_worker");

    let id = service_id("glinr_2_worker");
    assert!(wait_until(|| h.cache.get(id).is_some(), Duration::from_secs(5)).await);
    assert_eq!(h.monitor.state(), MonitorState::Running);
    assert_eq!(h.cache.len(), 1);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_resubscribes_after_stream_ends() {
    let h = harness(ScriptedSource::new(), fast_options());
    let first = h.source.push_stream();
    let second = h.source.push_stream();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = h.monitor.start(shutdown_rx).await.unwrap();

    send(&first, "start", "c1", "glinr_1_api");
    drop(first);
    send(&second, "start", "c2", "glinr_1_worker");

    let worker = service_id("glinr_1_worker");
    assert!(wait_until(|| h.cache.get(worker).is_some(), Duration::from_secs(5)).await);
    assert_eq!(h.source.subscriptions(), 2);
    assert_eq!(h.cache.len(), 2);
    assert_eq!(h.monitor.state(), MonitorState::Running);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_shutdown_stops_monitor() {
    let h = harness(ScriptedSource::new(), fast_options());
    let _tx = h.source.push_stream();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = h.monitor.start(shutdown_rx).await.unwrap();
    assert_eq!(h.monitor.state(), MonitorState::Running);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("monitor did not stop")
        .unwrap();
    assert_eq!(h.monitor.state(), MonitorState::Stopped);
}

#[tokio::test]
async fn test_dropped_shutdown_sender_stops_monitor() {
    let h = harness(ScriptedSource::new(), fast_options());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = h.monitor.start(shutdown_rx).await.unwrap();

    drop(shutdown_tx);
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("monitor did not stop")
        .unwrap();
    assert_eq!(h.monitor.state(), MonitorState::Stopped);
}

#[tokio::test]
async fn test_shutdown_during_resubscribe_delay() {
    let options = MonitorOptions {
        reconcile_on_start: false,
        resubscribe_delay: Duration::from_secs(3600),
    };
    let h = harness(ScriptedSource::new(), options);
    let tx = h.source.push_stream();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = h.monitor.start(shutdown_rx).await.unwrap();

    drop(tx);
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("monitor did not stop while waiting to resubscribe")
        .unwrap();
    assert_eq!(h.source.subscriptions(), 1);
}

// ============================================================================
// Broadcast and Metrics Tests
// ============================================================================

#[tokio::test]
async fn test_fan_out_prunes_failing_subscriber() {
    let h = harness(ScriptedSource::new(), fast_options());
    let a = Recording::new();
    let b = Recording::new();
    let failing = Arc::new(Failing(Uuid::new_v4()));
    h.registry.add(a.clone());
    h.registry.add(b.clone());
    h.registry.add(failing.clone());

    let tx = h.source.push_stream();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = h.monitor.start(shutdown_rx).await.unwrap();

    send(&tx, "start", "c1", "glinr_1_api");

    assert!(wait_until(|| a.messages.lock().len() == 1, Duration::from_secs(5)).await);
    assert_eq!(b.messages.lock().len(), 1);
    assert!(!h.registry.contains(failing.id()));
    assert_eq!(h.registry.len(), 2);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_running_gauge_follows_events() {
    let h = harness(ScriptedSource::new(), fast_options());
    let tx = h.source.push_stream();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = h.monitor.start(shutdown_rx).await.unwrap();

    send(&tx, "start", "a", "glinr_1_api");
    send(&tx, "start", "b", "glinr_1_worker");
    send(&tx, "stop", "c", "glinr_1_cron");
    assert!(wait_until(|| h.cache.len() == 3, Duration::from_secs(5)).await);
    assert_eq!(h.gauge.get(), 2);

    send(&tx, "die", "b", "glinr_1_worker");
    let worker = service_id("glinr_1_worker");
    assert!(
        wait_until(
            || h.cache.get(worker).map(|s| s.status) == Some(ServiceStatus::Dead),
            Duration::from_secs(5)
        )
        .await
    );
    assert_eq!(h.gauge.get(), 1);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

// ============================================================================
// Reconciliation Tests
// ============================================================================

#[tokio::test]
async fn test_reconcile_on_start_seeds_cache() {
    let source = ScriptedSource::with_containers(vec![
        ContainerSummary {
            id: "a".to_string(),
            name: "/glinr_1_api".to_string(),
            state: "running".to_string(),
        },
        ContainerSummary {
            id: "b".to_string(),
            name: "/redis".to_string(),
            state: "running".to_string(),
        },
    ]);
    let options = MonitorOptions {
        reconcile_on_start: true,
        resubscribe_delay: Duration::from_millis(10),
    };
    let h = harness(source, options);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = h.monitor.start(shutdown_rx).await.unwrap();

    // Seeding finishes before start returns
    assert_eq!(h.cache.len(), 1);
    assert_eq!(h.gauge.get(), 1);
    let api = h.cache.get(service_id("glinr_1_api")).unwrap();
    assert_eq!(api.container_id, "a");
    assert_eq!(api.status, ServiceStatus::Running);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_changes_during_reconcile_apply_after_seed() {
    let source = ScriptedSource::with_containers(vec![ContainerSummary {
        id: "a".to_string(),
        name: "/glinr_1_api".to_string(),
        state: "running".to_string(),
    }]);
    let tx = source.push_stream();
    source
        .during_list
        .lock()
        .push((tx.clone(), DaemonEvent::container("die", "a", "glinr_1_api")));

    let options = MonitorOptions {
        reconcile_on_start: true,
        resubscribe_delay: Duration::from_millis(10),
    };
    let h = harness(source, options);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = h.monitor.start(shutdown_rx).await.unwrap();

    // The subscription already existed when the list was taken
    assert_eq!(*h.source.subscriptions_at_list.lock(), Some(1));

    let id = service_id("glinr_1_api");
    assert!(
        wait_until(
            || h.cache.get(id).map(|s| s.status) == Some(ServiceStatus::Stopped),
            Duration::from_secs(2),
        )
        .await
    );
    assert_eq!(h.gauge.get(), 0);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_no_reconcile_by_default() {
    let source = ScriptedSource::with_containers(vec![ContainerSummary {
        id: "a".to_string(),
        name: "/glinr_1_api".to_string(),
        state: "running".to_string(),
    }]);
    let h = harness(source, fast_options());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = h.monitor.start(shutdown_rx).await.unwrap();

    assert!(h.cache.is_empty());

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}
