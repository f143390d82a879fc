use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use rand::Rng;
use serde::Deserialize;
use anyhow::{Context, Result};
use shared::protocol;
use crate::error::ConfigError;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub segment: SegmentConfig,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

/// Protocol timers. Defaults follow RFC 6762 §8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TimingConfig {
    /// Exclusive upper bound of the pre-probe jitter, 0 disables it
    #[serde(default = "default_probe_jitter")]
    pub probe_jitter_ms: u64,
    #[serde(default = "default_probe_interval")]
    pub probe_interval_ms: u64,
    #[serde(default = "default_probe_attempts")]
    pub probe_attempts: u32,
    #[serde(default = "default_announce_initial_delay")]
    pub announce_initial_delay_ms: u64,
    #[serde(default = "default_announce_backoff_factor")]
    pub announce_backoff_factor: u32,
    #[serde(default = "default_announce_max_delay")]
    pub announce_max_delay_ms: u64,
}

/// Parameters of the simulated segment the daemon runs on
#[derive(Debug, Clone, Deserialize)]
pub struct SegmentConfig {
    #[serde(default = "default_latency")]
    pub latency_ms: u64,
    /// Services already claimed by another host on the segment
    #[serde(default)]
    pub peers: Vec<ServiceConfig>,
}

/// Options accepted by [`Registry::publish`](crate::Registry::publish)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub service_type: String,
    pub port: u16,
    /// Check the name is free before announcing it
    #[serde(default = "default_probe")]
    pub probe: bool,
    /// Target of the SRV record, defaults to `<hostname>.local`
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub addresses: Vec<IpAddr>,
}

fn default_probe_jitter() -> u64 {
    protocol::PROBE_JITTER_MS
}

fn default_probe_interval() -> u64 {
    protocol::PROBE_INTERVAL_MS
}

fn default_probe_attempts() -> u32 {
    protocol::PROBE_ATTEMPTS
}

fn default_announce_initial_delay() -> u64 {
    protocol::ANNOUNCE_INITIAL_DELAY_MS
}

fn default_announce_backoff_factor() -> u32 {
    protocol::ANNOUNCE_BACKOFF_FACTOR
}

fn default_announce_max_delay() -> u64 {
    protocol::ANNOUNCE_MAX_DELAY_MS
}

fn default_latency() -> u64 {
    2
}

fn default_probe() -> bool {
    true
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            probe_jitter_ms: default_probe_jitter(),
            probe_interval_ms: default_probe_interval(),
            probe_attempts: default_probe_attempts(),
            announce_initial_delay_ms: default_announce_initial_delay(),
            announce_backoff_factor: default_announce_backoff_factor(),
            announce_max_delay_ms: default_announce_max_delay(),
        }
    }
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            latency_ms: default_latency(),
            peers: Vec::new(),
        }
    }
}

impl TimingConfig {
    /// Draw a fresh pre-probe delay, uniform in [0, probe_jitter_ms)
    pub fn probe_jitter(&self) -> Duration {
        if self.probe_jitter_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..self.probe_jitter_ms))
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn announce_initial_delay(&self) -> Duration {
        Duration::from_millis(self.announce_initial_delay_ms)
    }

    pub fn announce_max_delay(&self) -> Duration {
        Duration::from_millis(self.announce_max_delay_ms)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.probe_attempts == 0 {
            return Err(ConfigError::InvalidTiming("probe_attempts must be at least 1".into()));
        }
        if self.announce_initial_delay_ms == 0 {
            return Err(ConfigError::InvalidTiming(
                "announce_initial_delay_ms must be positive".into(),
            ));
        }
        if self.announce_backoff_factor < 2 {
            return Err(ConfigError::InvalidTiming(
                "announce_backoff_factor must be at least 2".into(),
            ));
        }
        Ok(())
    }
}

impl ServiceConfig {
    pub fn new(name: impl Into<String>, service_type: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            service_type: service_type.into(),
            port,
            probe: true,
            host: None,
            addresses: Vec::new(),
        }
    }

    /// Announce straight away without probing
    pub fn without_probe(mut self) -> Self {
        self.probe = false;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_addresses(mut self, addresses: impl IntoIterator<Item = IpAddr>) -> Self {
        self.addresses = addresses.into_iter().collect();
        self
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidService {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.service_type.trim().is_empty() {
            return Err(invalid("type must not be empty"));
        }
        if self.port == 0 {
            return Err(invalid("port must not be 0"));
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        self.timing.validate()?;
        for service in self.services.iter().chain(self.segment.peers.iter()) {
            service.validate()?;
        }
        Ok(())
    }
}
