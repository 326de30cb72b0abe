//! Docker daemon as an event source

use crate::error::{EventStreamError, MonitorError};
use crate::events::{ContainerSummary, DaemonEvent, EventSource, EventStream, CONTAINER_EVENT_TYPE};
use bollard::container::ListContainersOptions;
use bollard::models::EventMessage;
use bollard::system::EventsOptions;
use bollard::Docker;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::StreamExt;
use std::collections::HashMap;
use tracing::debug;

/// Event source backed by a Docker daemon connection
pub struct DockerEventSource {
    client: Docker,
}

impl DockerEventSource {
    /// Connect to the Docker daemon and verify it responds.
    ///
    /// Connection priority:
    /// 1. Explicit docker_host parameter
    /// 2. DOCKER_HOST environment variable
    /// 3. Common socket paths (platform-specific)
    pub async fn connect(docker_host: Option<&str>) -> Result<Self, MonitorError> {
        let client = if let Some(host) = docker_host {
            Self::connect_to_host(host)?
        } else if let Ok(host) = std::env::var("DOCKER_HOST") {
            Self::connect_to_host(&host)?
        } else {
            Self::connect_with_defaults().await?
        };

        client.ping().await.map_err(|e| {
            MonitorError::DockerConnect(format!(
                "Docker daemon is not responding: {}. \
                 Ensure Docker Desktop, Colima, or dockerd is running.",
                e
            ))
        })?;

        debug!("Connected to Docker daemon");
        Ok(Self { client })
    }

    fn connect_to_host(host: &str) -> Result<Docker, MonitorError> {
        if let Some(socket_path) = host.strip_prefix("unix://") {
            Docker::connect_with_socket(socket_path, 120, bollard::API_DEFAULT_VERSION).map_err(|e| {
                MonitorError::DockerConnect(format!("cannot connect to Unix socket '{}': {}", socket_path, e))
            })
        } else if host.starts_with("tcp://") || host.starts_with("http://") {
            Docker::connect_with_http(host, 120, bollard::API_DEFAULT_VERSION).map_err(|e| {
                MonitorError::DockerConnect(format!("cannot connect to TCP endpoint '{}': {}", host, e))
            })
        } else {
            Err(MonitorError::DockerConnect(format!(
                "invalid docker host '{}', expected 'unix:///path/to/socket' or 'tcp://host:port'",
                host
            )))
        }
    }

    async fn connect_with_defaults() -> Result<Docker, MonitorError> {
        let home = std::env::var("HOME").unwrap_or_default();
        let xdg_runtime = std::env::var("XDG_RUNTIME_DIR").unwrap_or_default();

        let mut socket_paths: Vec<(&str, String)> =
            vec![("Linux default", "/var/run/docker.sock".to_string())];
        if !home.is_empty() {
            socket_paths.push(("Docker Desktop (macOS)", format!("{}/.docker/run/docker.sock", home)));
            socket_paths.push(("Colima (macOS)", format!("{}/.colima/default/docker.sock", home)));
        }
        if !xdg_runtime.is_empty() {
            socket_paths.push(("Podman (Linux)", format!("{}/podman/podman.sock", xdg_runtime)));
        }

        for (name, path) in &socket_paths {
            if std::path::Path::new(path).exists() {
                debug!(path, name, "Found Docker socket");
                if let Ok(client) = Docker::connect_with_socket(path, 120, bollard::API_DEFAULT_VERSION) {
                    if client.ping().await.is_ok() {
                        return Ok(client);
                    }
                }
            }
        }

        Docker::connect_with_socket_defaults().map_err(|e| {
            MonitorError::DockerConnect(format!(
                "no reachable Docker socket found; start dockerd or set DOCKER_HOST ({})",
                e
            ))
        })
    }
}

impl From<EventMessage> for DaemonEvent {
    fn from(message: EventMessage) -> Self {
        let (actor_id, attributes) = message
            .actor
            .map(|actor| (actor.id.unwrap_or_default(), actor.attributes.unwrap_or_default()))
            .unwrap_or_default();

        DaemonEvent {
            kind: message.typ.map(|t| t.to_string()).unwrap_or_default(),
            action: message.action.unwrap_or_default(),
            actor_id,
            attributes,
        }
    }
}

impl EventSource for DockerEventSource {
    fn subscribe(&self) -> EventStream {
        let mut filters = HashMap::new();
        filters.insert("type".to_string(), vec![CONTAINER_EVENT_TYPE.to_string()]);
        // Anchored at subscribe time; the request is only sent on first poll
        let options = EventsOptions::<String> {
            since: Some(Utc::now()),
            filters,
            ..Default::default()
        };

        self.client
            .events(Some(options))
            .map(|result| {
                result
                    .map(DaemonEvent::from)
                    .map_err(|e| EventStreamError(e.to_string()))
            })
            .boxed()
    }

    fn list_containers(&self) -> BoxFuture<'_, Result<Vec<ContainerSummary>, MonitorError>> {
        Box::pin(async move {
            let options = ListContainersOptions::<String> {
                all: true,
                ..Default::default()
            };
            let containers = self
                .client
                .list_containers(Some(options))
                .await
                .map_err(|e| MonitorError::Reconcile(e.to_string()))?;

            Ok(containers
                .into_iter()
                .filter_map(|c| {
                    let name = c.names.and_then(|names| names.into_iter().next())?;
                    Some(ContainerSummary {
                        id: c.id.unwrap_or_default(),
                        name,
                        state: c.state.unwrap_or_default(),
                    })
                })
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::{EventActor, EventMessageTypeEnum};

    #[test]
    fn test_event_message_conversion() {
        let mut attributes = HashMap::new();
        attributes.insert("name".to_string(), "glinr_1_api".to_string());
        attributes.insert("image".to_string(), "nginx:latest".to_string());

        let message = EventMessage {
            typ: Some(EventMessageTypeEnum::CONTAINER),
            action: Some("start".to_string()),
            actor: Some(EventActor {
                id: Some("abc123".to_string()),
                attributes: Some(attributes),
            }),
            ..Default::default()
        };

        let event = DaemonEvent::from(message);
        assert_eq!(event.kind, "container");
        assert_eq!(event.action, "start");
        assert_eq!(event.actor_id, "abc123");
        assert_eq!(event.container_name(), Some("glinr_1_api"));
    }

    #[test]
    fn test_event_message_without_actor() {
        let event = DaemonEvent::from(EventMessage::default());
        assert_eq!(event.kind, "");
        assert_eq!(event.container_name(), None);
    }

    #[test]
    fn test_invalid_host_scheme() {
        assert!(matches!(
            DockerEventSource::connect_to_host("ftp://example"),
            Err(MonitorError::DockerConnect(_))
        ));
    }
}
