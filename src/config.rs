//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{FieldlinkError, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub uplink: UplinkConfig,
    #[serde(default)]
    pub provisioning: ProvisioningConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Device identity
#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    #[serde(default = "default_device_id")]
    pub id: u32,
}

/// Offline queue configuration
#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    #[serde(default = "default_queue_path")]
    pub path: String,

    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
}

/// Control loop timing
#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_send_interval_ms")]
    pub send_interval_ms: u64,

    #[serde(default = "default_drain_interval_ms")]
    pub drain_interval_ms: u64,

    #[serde(default = "default_link_check_interval_ms")]
    pub link_check_interval_ms: u64,

    #[serde(default = "default_reconnect_cooldown_ms")]
    pub reconnect_cooldown_ms: u64,

    #[serde(default = "default_cycle_budget_ms")]
    pub cycle_budget_ms: u64,
}

/// Collector endpoint configuration
#[derive(Debug, Deserialize, Clone)]
pub struct UplinkConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

/// Provisioning portal configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ProvisioningConfig {
    #[serde(default = "default_portal_name")]
    pub portal_name: String,

    #[serde(default = "default_portal_timeout_s")]
    pub portal_timeout_s: u64,
}

/// Log output configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// Directory for daily rolling log files; stdout only when unset
    #[serde(default)]
    pub dir: Option<String>,
}

// Default value functions
fn default_device_id() -> u32 { 1 }

fn default_queue_path() -> String { "./data/queue.jsonl".to_string() }
fn default_queue_capacity() -> usize { crate::queue::DEFAULT_CAPACITY }

fn default_send_interval_ms() -> u64 { 2000 }
fn default_drain_interval_ms() -> u64 { 15000 }
fn default_link_check_interval_ms() -> u64 { 5000 }
fn default_reconnect_cooldown_ms() -> u64 { 30000 }
fn default_cycle_budget_ms() -> u64 { 1000 }

fn default_endpoint() -> String { "http://127.0.0.1:8080/api/telemetry".to_string() }
fn default_send_timeout_ms() -> u64 { 5000 }

fn default_portal_name() -> String { "FIELDLINK_SETUP".to_string() }
fn default_portal_timeout_s() -> u64 { 180 }

impl Default for DeviceConfig {
    fn default() -> Self {
        Self { id: default_device_id() }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            path: default_queue_path(),
            capacity: default_queue_capacity(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            send_interval_ms: default_send_interval_ms(),
            drain_interval_ms: default_drain_interval_ms(),
            link_check_interval_ms: default_link_check_interval_ms(),
            reconnect_cooldown_ms: default_reconnect_cooldown_ms(),
            cycle_budget_ms: default_cycle_budget_ms(),
        }
    }
}

impl Default for UplinkConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            portal_name: default_portal_name(),
            portal_timeout_s: default_portal_timeout_s(),
        }
    }
}

impl SyncConfig {
    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }

    pub fn link_check_interval(&self) -> Duration {
        Duration::from_millis(self.link_check_interval_ms)
    }

    pub fn reconnect_cooldown(&self) -> Duration {
        Duration::from_millis(self.reconnect_cooldown_ms)
    }

    pub fn cycle_budget(&self) -> Duration {
        Duration::from_millis(self.cycle_budget_ms)
    }
}

impl UplinkConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl ProvisioningConfig {
    pub fn portal_timeout(&self) -> Duration {
        Duration::from_secs(self.portal_timeout_s)
    }
}

/// Upper bound for every sync timer, in milliseconds
const MAX_INTERVAL_MS: u64 = 600_000;

/// Upper bound for the queue capacity, in records
const MAX_QUEUE_CAPACITY: usize = 100_000;

fn invalid(msg: impl std::fmt::Display) -> FieldlinkError {
    FieldlinkError::Config(toml::de::Error::custom(msg))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing sections and fields take their defaults.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use fieldlink::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.queue.path.is_empty() {
            return Err(invalid("queue path cannot be empty"));
        }

        if self.queue.capacity == 0 || self.queue.capacity > MAX_QUEUE_CAPACITY {
            return Err(invalid(format!(
                "queue capacity must be between 1 and {}",
                MAX_QUEUE_CAPACITY
            )));
        }

        for (name, value) in [
            ("send_interval_ms", self.sync.send_interval_ms),
            ("drain_interval_ms", self.sync.drain_interval_ms),
            ("link_check_interval_ms", self.sync.link_check_interval_ms),
            ("reconnect_cooldown_ms", self.sync.reconnect_cooldown_ms),
            ("cycle_budget_ms", self.sync.cycle_budget_ms),
        ] {
            if value == 0 || value > MAX_INTERVAL_MS {
                return Err(invalid(format!(
                    "{} must be between 1 and {}",
                    name, MAX_INTERVAL_MS
                )));
            }
        }

        if self.uplink.send_timeout_ms == 0 || self.uplink.send_timeout_ms > 60000 {
            return Err(invalid("send_timeout_ms must be between 1 and 60000"));
        }

        match reqwest::Url::parse(&self.uplink.endpoint) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            Ok(_) => return Err(invalid("uplink endpoint must be an http or https URL")),
            Err(e) => return Err(invalid(format!("uplink endpoint is not a valid URL: {}", e))),
        }

        if self.provisioning.portal_name.is_empty() {
            return Err(invalid("portal_name cannot be empty"));
        }

        if self.provisioning.portal_timeout_s == 0 {
            return Err(invalid("portal_timeout_s must be greater than 0"));
        }

        if let Some(dir) = &self.logging.dir {
            if dir.is_empty() {
                return Err(invalid("logging dir cannot be empty when set"));
            }
        }

        Ok(())
    }
}
