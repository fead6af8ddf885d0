//! Configuration management for MIDI Manipulator
//!
//! Handles loading, parsing, validation and hot-reloading of the YAML device
//! configuration.

pub mod watcher;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tokio::fs;

pub use watcher::ConfigWatcher;

/// Lowest accepted supervisor tick
pub const MIN_RECONNECT_INTERVAL_MS: u64 = 1000;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub midi_devices: Vec<DeviceConfig>,
}

/// One physical controller
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeviceConfig {
    /// Also used as the port-name substring and the command alias
    pub device_name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Press duration before a key counts as held (ms)
    #[serde(default = "default_hold_delta")]
    pub hold_delta: u64,
    #[serde(default)]
    pub startup_delay: u64,
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval: u64,
    pub namespace: String,
    #[serde(default)]
    pub accumulate_controls: Vec<ControlConfig>,
    /// 0 means the default period of one second
    #[serde(default)]
    pub blinking_period_ms: u64,
}

/// Accumulator declaration shared by a list of control keys
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ControlConfig {
    pub keys: Vec<u8>,
    #[serde(default)]
    pub rotate: bool,
    pub value_range: [u8; 2],
    #[serde(default)]
    pub initial_value: u8,
    pub triggers: ControlTriggers,
}

/// Raw control-change values that step the accumulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ControlTriggers {
    pub increment: u8,
    pub decrement: u8,
}

impl DeviceConfig {
    /// Defaults used by the probe tool
    pub fn with_name(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            active: true,
            hold_delta: default_hold_delta(),
            startup_delay: 0,
            reconnect_interval: default_reconnect_interval(),
            namespace: "default".to_string(),
            accumulate_controls: Vec::new(),
            blinking_period_ms: 0,
        }
    }

    pub fn hold_delta(&self) -> Duration {
        Duration::from_millis(self.hold_delta)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay)
    }

    /// Supervisor tick, never below the floor
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval.max(MIN_RECONNECT_INTERVAL_MS))
    }

    pub fn blinking_period(&self) -> Duration {
        match self.blinking_period_ms {
            0 => Duration::from_secs(1),
            ms => Duration::from_millis(ms),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.device_name.is_empty() {
            anyhow::bail!("device_name cannot be empty");
        }
        if self.namespace.is_empty() {
            anyhow::bail!("namespace cannot be empty");
        }
        if self.reconnect_interval < MIN_RECONNECT_INTERVAL_MS {
            anyhow::bail!(
                "reconnect_interval {} is below the minimum of {} ms",
                self.reconnect_interval,
                MIN_RECONNECT_INTERVAL_MS
            );
        }

        for (idx, control) in self.accumulate_controls.iter().enumerate() {
            let [low, high] = control.value_range;
            if low > high {
                anyhow::bail!("Control {} value_range [{}, {}] is reversed", idx, low, high);
            }
            if !(low..=high).contains(&control.initial_value) {
                anyhow::bail!(
                    "Control {} initial_value {} is outside [{}, {}]",
                    idx,
                    control.initial_value,
                    low,
                    high
                );
            }
        }

        Ok(())
    }
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&contents)
            .with_context(|| format!("Failed to load config file: {}", path.display()))
    }

    /// Parse and validate a YAML document held in memory
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig =
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();

        for (idx, device) in self.midi_devices.iter().enumerate() {
            device
                .validate()
                .with_context(|| format!("Invalid device {} ('{}')", idx, device.device_name))?;

            if !names.insert(device.device_name.as_str()) {
                anyhow::bail!("Device '{}' is declared more than once", device.device_name);
            }
        }

        Ok(())
    }
}

// Default value functions
fn default_true() -> bool { true }
fn default_hold_delta() -> u64 { 1000 }
fn default_reconnect_interval() -> u64 { MIN_RECONNECT_INTERVAL_MS }
