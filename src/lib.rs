//! glinr-monitor - live container state for the glinr dashboard
//!
//! This library tracks the lifecycle of containers deployed by glinr:
//! - Consumes the Docker daemon's container event stream
//! - Maps raw lifecycle actions to a normalized service status
//! - Resolves managed container names to stable service identifiers
//! - Keeps a concurrent in-memory snapshot of every service's last state
//! - Fans state changes out to connected WebSocket subscribers
//! - Serves the snapshot and a running-services gauge over HTTP

pub mod api;
pub mod config;
pub mod docker;
pub mod error;
pub mod events;
pub mod identity;
pub mod state;
pub mod status;
pub mod subscribers;
pub mod ws;
