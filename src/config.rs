use crate::events::MonitorOptions;
use crate::identity::DEFAULT_PREFIX;
use crate::ws::SessionOptions;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Global configuration for the monitor
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// API server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Docker daemon and event ingestion settings
    #[serde(default)]
    pub docker: DockerConfig,

    /// Real-time subscriber settings
    #[serde(default)]
    pub subscribers: SubscriberConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Bind address (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// API port (default: 8090)
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DockerConfig {
    /// Docker host URL (`unix:///var/run/docker.sock` or `tcp://host:port`).
    /// Falls back to DOCKER_HOST, then common socket paths.
    pub host: Option<String>,

    /// Name prefix of managed containers (default: glinr)
    #[serde(default = "default_container_prefix")]
    pub container_prefix: String,

    /// Seed state from the daemon's container list at startup (default: false)
    #[serde(default)]
    pub reconcile_on_start: bool,

    /// Delay before resubscribing when the daemon closes the event stream (default: 5)
    #[serde(default = "default_resubscribe_delay")]
    pub resubscribe_delay_secs: u64,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            host: None,
            container_prefix: default_container_prefix(),
            reconcile_on_start: false,
            resubscribe_delay_secs: default_resubscribe_delay(),
        }
    }
}

impl DockerConfig {
    pub fn monitor_options(&self) -> MonitorOptions {
        MonitorOptions {
            reconcile_on_start: self.reconcile_on_start,
            resubscribe_delay: Duration::from_secs(self.resubscribe_delay_secs),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SubscriberConfig {
    /// Messages buffered per subscriber before it counts as too slow (default: 64)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Seconds one message may take to reach a client before it is dropped (default: 10)
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            send_timeout_secs: default_send_timeout(),
        }
    }
}

impl SubscriberConfig {
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            queue_capacity: self.queue_capacity,
            send_timeout: Duration::from_secs(self.send_timeout_secs),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8090
}

fn default_container_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_resubscribe_delay() -> u64 {
    5
}

fn default_queue_capacity() -> usize {
    64
}

fn default_send_timeout() -> u64 {
    10
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration, using defaults when the file does not exist
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate all configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        let prefix = &self.docker.container_prefix;
        if prefix.is_empty() {
            errors.push("docker.container_prefix must not be empty".to_string());
        } else if prefix.contains('_') {
            errors.push(format!(
                "docker.container_prefix '{}' must not contain '_'",
                prefix
            ));
        }

        if self.docker.resubscribe_delay_secs == 0 {
            errors.push("docker.resubscribe_delay_secs must be greater than 0".to_string());
        }

        if let Some(ref host) = self.docker.host {
            if !(host.starts_with("unix://") || host.starts_with("tcp://") || host.starts_with("http://")) {
                errors.push(format!(
                    "docker.host '{}' must start with unix://, tcp:// or http://",
                    host
                ));
            }
        }

        if self.subscribers.queue_capacity == 0 {
            errors.push("subscribers.queue_capacity must be greater than 0".to_string());
        }

        if self.subscribers.send_timeout_secs == 0 {
            errors.push("subscribers.send_timeout_secs must be greater than 0".to_string());
        }

        if !errors.is_empty() {
            anyhow::bail!("Configuration errors:\n  - {}", errors.join("\n  - "));
        }

        Ok(())
    }
}
