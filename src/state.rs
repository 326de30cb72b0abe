//! In-memory cache of the last-known state of every managed service
//!
//! One reader-writer lock guards the whole mapping. Reads (dashboard
//! queries) vastly outnumber writes (container lifecycle events), and the
//! number of services on one node is small, so a coarse lock is enough.

use crate::identity::ServiceId;
use crate::status::ServiceStatus;
use crate::subscribers::SubscriberRegistry;
use chrono::{DateTime, Utc};
use parking_lot::{RwLock, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Last-known lifecycle state of one service's container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceState {
    pub service_id: ServiceId,
    /// Daemon-assigned id; changes when the container is recreated
    pub container_id: String,
    pub container_name: String,
    pub status: ServiceStatus,
    pub last_updated: DateTime<Utc>,
}

impl ServiceState {
    /// Build a record stamped with the current time
    pub fn new(
        service_id: ServiceId,
        container_id: impl Into<String>,
        container_name: impl Into<String>,
        status: ServiceStatus,
    ) -> Self {
        Self {
            service_id,
            container_id: container_id.into(),
            container_name: container_name.into(),
            status,
            last_updated: Utc::now(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == ServiceStatus::Running
    }
}

/// Sink for the number of running services
pub trait RunningGauge: Send + Sync {
    fn set(&self, running: usize);
}

/// Gauge kept in an atomic, read back by the API
#[derive(Debug, Default)]
pub struct AtomicGauge(AtomicUsize);

impl AtomicGauge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

impl RunningGauge for AtomicGauge {
    fn set(&self, running: usize) {
        self.0.store(running, Ordering::Relaxed);
    }
}

/// Shared map from service id to its current state.
///
/// Every write replaces the whole record, updates the running gauge and
/// broadcasts the new record. Records are never deleted; a destroyed
/// container shows up as [`ServiceStatus::Removed`].
pub struct StateCache {
    services: RwLock<HashMap<ServiceId, ServiceState>>,
    subscribers: Arc<SubscriberRegistry>,
    gauge: Arc<dyn RunningGauge>,
}

impl StateCache {
    pub fn new(subscribers: Arc<SubscriberRegistry>, gauge: Arc<dyn RunningGauge>) -> Arc<Self> {
        Arc::new(Self {
            services: RwLock::new(HashMap::new()),
            subscribers,
            gauge,
        })
    }

    /// Insert or overwrite the state of a service.
    ///
    /// The gauge is recomputed once the write is visible, still excluding
    /// other writers so gauge values are published in write order. The
    /// broadcast runs after every cache lock has been released.
    pub fn update(
        &self,
        service_id: ServiceId,
        container_id: &str,
        container_name: &str,
        status: ServiceStatus,
    ) -> ServiceState {
        let mut state = ServiceState::new(service_id, container_id, container_name, status);

        {
            let mut services = self.services.write();
            // Wall clock may step backwards; keep per-service timestamps ordered.
            if let Some(previous) = services.get(&service_id) {
                if previous.last_updated > state.last_updated {
                    state.last_updated = previous.last_updated;
                }
            }
            services.insert(service_id, state.clone());

            let services = RwLockWriteGuard::downgrade(services);
            let running = services.values().filter(|s| s.is_running()).count();
            self.gauge.set(running);
        }

        debug!(
            service_id,
            container_id,
            container_name,
            status = %status,
            "Service state updated"
        );

        self.subscribers.broadcast(&state);
        state
    }

    /// Look up one service; `None` means nothing has been seen for it yet
    pub fn get(&self, service_id: ServiceId) -> Option<ServiceState> {
        self.services.read().get(&service_id).cloned()
    }

    /// Independent copy of every tracked service
    pub fn get_all(&self) -> HashMap<ServiceId, ServiceState> {
        self.services.read().clone()
    }

    /// Tracked services ordered by id
    pub fn list(&self) -> Vec<ServiceState> {
        let mut services: Vec<ServiceState> = self.services.read().values().cloned().collect();
        services.sort_by_key(|s| s.service_id);
        services
    }

    pub fn running_count(&self) -> usize {
        self.services.read().values().filter(|s| s.is_running()).count()
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }
}
