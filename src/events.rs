//! Ingestion of the daemon's container event stream
//!
//! The monitor runs one long-lived task that turns raw container lifecycle
//! events into [`StateCache`] updates. No single event can stop it: foreign
//! containers and unknown actions are dropped, malformed names are logged and
//! dropped, and stream errors are logged. Only the shutdown signal ends the
//! loop.

use crate::error::{EventStreamError, MonitorError};
use crate::identity::IdentityResolver;
use crate::state::{ServiceState, StateCache};
use crate::status::{map_action, map_container_state};
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Event type of container lifecycle events
pub const CONTAINER_EVENT_TYPE: &str = "container";

/// A raw event as reported by the daemon
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DaemonEvent {
    /// Resource type (`container`, `network`, `image`, ...)
    pub kind: String,
    /// Lifecycle action (`start`, `die`, ...)
    pub action: String,
    /// Id of the resource the event is about
    pub actor_id: String,
    /// Actor attributes; container events carry `name`
    pub attributes: HashMap<String, String>,
}

impl DaemonEvent {
    /// Container event for `name` with the given action
    pub fn container(action: &str, container_id: &str, name: &str) -> Self {
        let mut attributes = HashMap::new();
        attributes.insert("name".to_string(), name.to_string());
        Self {
            kind: CONTAINER_EVENT_TYPE.to_string(),
            action: action.to_string(),
            actor_id: container_id.to_string(),
            attributes,
        }
    }

    pub fn container_name(&self) -> Option<&str> {
        self.attributes.get("name").map(String::as_str)
    }
}

/// A container as reported by the daemon's container listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    /// Daemon state (`created`, `running`, `exited`, ...)
    pub state: String,
}

pub type EventStream = BoxStream<'static, Result<DaemonEvent, EventStreamError>>;

/// Upstream provider of container events
pub trait EventSource: Send + Sync {
    /// Open a new subscription to container events.
    ///
    /// Events that happen after this call must reach the stream even if it
    /// is first polled later.
    fn subscribe(&self) -> EventStream;

    /// List every container the daemon knows about, running or not
    fn list_containers(&self) -> BoxFuture<'_, Result<Vec<ContainerSummary>, MonitorError>>;
}

/// Lifecycle of the ingestion loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    NotStarted,
    Running,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct MonitorOptions {
    /// Seed the cache from the container list before consuming events
    pub reconcile_on_start: bool,
    /// Wait before resubscribing after the daemon closed the stream
    pub resubscribe_delay: Duration,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            reconcile_on_start: false,
            resubscribe_delay: Duration::from_secs(5),
        }
    }
}

/// Consumes daemon events and applies them to the state cache.
///
/// Like other background-task owners, the monitor lives behind an `Arc`;
/// [`start`](EventMonitor::start) clones it into the spawned loop.
pub struct EventMonitor {
    source: Arc<dyn EventSource>,
    cache: Arc<StateCache>,
    resolver: Arc<dyn IdentityResolver>,
    options: MonitorOptions,
    state: Mutex<MonitorState>,
}

impl EventMonitor {
    pub fn new(
        source: Arc<dyn EventSource>,
        cache: Arc<StateCache>,
        resolver: Arc<dyn IdentityResolver>,
        options: MonitorOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            source,
            cache,
            resolver,
            options,
            state: Mutex::new(MonitorState::NotStarted),
        })
    }

    pub fn state(&self) -> MonitorState {
        *self.state.lock()
    }

    /// Subscribe to the event stream and spawn the consumption loop.
    ///
    /// Returns once the subscription exists; the loop keeps running until
    /// `shutdown` turns `true` or its sender is dropped. The returned handle
    /// completes when the monitor reaches [`MonitorState::Stopped`].
    pub async fn start(
        self: &Arc<Self>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<JoinHandle<()>, MonitorError> {
        {
            let mut state = self.state.lock();
            if *state != MonitorState::NotStarted {
                return Err(MonitorError::AlreadyStarted);
            }
            *state = MonitorState::Running;
        }

        // Subscribe before listing: changes made while listing must land on
        // top of the seed
        let stream = self.source.subscribe();

        if self.options.reconcile_on_start {
            match self.reconcile().await {
                Ok(count) => info!(count, "Seeded service state from running containers"),
                Err(e) => warn!(error = %e, "Startup reconciliation failed, starting from empty state"),
            }
        }

        info!(prefix = self.resolver.prefix(), "Docker event monitor started");

        let monitor = Arc::clone(self);
        Ok(tokio::spawn(async move {
            monitor.run(stream, shutdown).await;
        }))
    }

    async fn run(&self, mut stream: EventStream, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                next = stream.next() => match next {
                    Some(Ok(event)) => {
                        self.handle_event(&event);
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "Error on Docker event stream");
                    }
                    None => {
                        error!(
                            delay_secs = self.options.resubscribe_delay.as_secs_f64(),
                            "Docker event stream closed, resubscribing"
                        );
                        tokio::select! {
                            biased;
                            _ = shutdown_requested(&mut shutdown) => break,
                            _ = tokio::time::sleep(self.options.resubscribe_delay) => {}
                        }
                        stream = self.source.subscribe();
                    }
                }
            }
        }

        drop(stream);
        *self.state.lock() = MonitorState::Stopped;
        info!("Docker event monitor stopped");
    }

    /// Apply one daemon event, returning the new state if it changed the cache
    pub fn handle_event(&self, event: &DaemonEvent) -> Option<ServiceState> {
        if event.kind != CONTAINER_EVENT_TYPE {
            return None;
        }

        let name = event.container_name()?;
        if !self.resolver.is_managed(name) {
            trace!(container_name = name, "Ignoring unmanaged container");
            return None;
        }

        let service_id = match self.resolver.resolve(name) {
            Ok(id) => id,
            Err(e) => {
                warn!(container_name = name, error = %e, "Dropping event for malformed container name");
                return None;
            }
        };

        let status = map_action(&event.action)?;
        Some(self.cache.update(service_id, &event.actor_id, name, status))
    }

    /// Seed the cache from the daemon's current container list.
    ///
    /// Returns how many services were written.
    pub async fn reconcile(&self) -> Result<usize, MonitorError> {
        let containers = self.source.list_containers().await?;
        let mut applied = 0;

        for container in &containers {
            let name = container.name.trim_start_matches('/');
            if !self.resolver.is_managed(name) {
                continue;
            }
            let service_id = match self.resolver.resolve(name) {
                Ok(id) => id,
                Err(e) => {
                    warn!(container_name = name, error = %e, "Skipping container with malformed name");
                    continue;
                }
            };
            let Some(status) = map_container_state(&container.state) else {
                debug!(container_name = name, state = %container.state, "Skipping container in untracked state");
                continue;
            };
            self.cache.update(service_id, &container.id, name, status);
            applied += 1;
        }

        Ok(applied)
    }
}

/// Resolves once shutdown is signalled or the sender is gone.
///
/// A value that was already `true` before the call counts too.
pub(crate) async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
