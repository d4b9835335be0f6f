//! Centralized server configuration.
//!
//! Strongly-typed configuration loaded via the `config` crate from
//! environment variables (`LOOMWRIGHT__FIELD__NESTED=value`).

use serde::Deserialize;

/// Server configuration.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// PostgreSQL connection URL. Has no default in production — boot
    /// refuses to start without it.
    pub database_url: String,

    /// NATS connection URL for the event bus.
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// Container runtime configuration.
    #[serde(default)]
    pub container: ContainerConfig,

    /// Safety envelope configuration.
    #[serde(default)]
    pub safety: SafetyConfig,

    /// Observability exporter configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

fn default_port() -> u16 {
    9002
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

/// Per-agent resource ceilings for container invocations.
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerConfig {
    /// Default memory ceiling in megabytes.
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u32,
    /// Default wall-clock budget in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_memory_mb() -> u32 {
    512
}

fn default_timeout_secs() -> u64 {
    300
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self { memory_mb: default_memory_mb(), timeout_secs: default_timeout_secs() }
    }
}

/// Rate-limit and circuit-breaker configuration for the safety envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct SafetyConfig {
    /// Requests per minute allowed per caller identity.
    #[serde(default = "default_rate_limit")]
    pub requests_per_minute: u32,
}

fn default_rate_limit() -> u32 {
    100
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self { requests_per_minute: default_rate_limit() }
    }
}

/// Where spans/metrics are exported.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// OTLP (or stdout, for local dev) exporter endpoint.
    #[serde(default = "default_exporter_endpoint")]
    pub exporter_endpoint: String,
}

fn default_exporter_endpoint() -> String {
    "stdout".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { exporter_endpoint: default_exporter_endpoint() }
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables prefixed `LOOMWRIGHT`.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration (notably `database_url`) is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Environment::with_prefix("LOOMWRIGHT").separator("__").try_parsing(true))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_config_has_policy_defaults() {
        let config = ContainerConfig::default();
        assert_eq!(config.memory_mb, 512);
        assert_eq!(config.timeout_secs, 300);
    }

    #[test]
    fn safety_config_defaults_to_hundred_per_minute() {
        assert_eq!(SafetyConfig::default().requests_per_minute, 100);
    }
}
