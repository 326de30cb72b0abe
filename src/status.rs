//! Normalized service status and the mapping from raw daemon actions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Last-known lifecycle status of a managed service's container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// Container exists but has not been started
    Created,
    /// Container is running
    Running,
    /// Container was stopped
    Stopped,
    /// Container process exited
    Dead,
    /// Container was destroyed
    Removed,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Created => "created",
            ServiceStatus::Running => "running",
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::Dead => "dead",
            ServiceStatus::Removed => "removed",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a container event action to a status.
///
/// Returns `None` for actions the dashboard does not track (`pause`,
/// `health_status: healthy`, `exec_start: ...` and anything the daemon adds
/// later). Matching is exact and case-sensitive.
pub fn map_action(action: &str) -> Option<ServiceStatus> {
    match action {
        "create" => Some(ServiceStatus::Created),
        "start" => Some(ServiceStatus::Running),
        "stop" => Some(ServiceStatus::Stopped),
        "die" => Some(ServiceStatus::Dead),
        "destroy" => Some(ServiceStatus::Removed),
        _ => None,
    }
}

/// Map the `State` column of a container listing to a status.
///
/// Used when seeding the cache from the daemon's container list, where
/// there is no action, only the container's current state.
pub fn map_container_state(state: &str) -> Option<ServiceStatus> {
    match state {
        "created" => Some(ServiceStatus::Created),
        "running" => Some(ServiceStatus::Running),
        "exited" => Some(ServiceStatus::Stopped),
        "dead" => Some(ServiceStatus::Dead),
        "removing" => Some(ServiceStatus::Removed),
        _ => None,
    }
}
