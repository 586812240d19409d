//! Configuration for the BLE-MIDI monitor
//!
//! Loaded from a YAML file. Every field has a default, so a missing file or
//! a partial one is fine.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::info;
use uuid::{uuid, Uuid};

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub reconciler: ReconcilerConfig,
    pub midi: MidiConfig,
    pub gatt: GattConfig,
    pub ble: BleConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ReconcilerConfig {
    #[serde(default = "default_reconcile_interval")]
    pub interval_ms: u64,
}

/// MIDI input side
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MidiConfig {
    /// Deadline for a single port open
    #[serde(default = "default_open_timeout")]
    pub open_timeout_ms: u64,
    /// How often the port list is polled for changes
    #[serde(default = "default_scan_interval")]
    pub scan_interval_ms: u64,
    #[serde(default = "default_client_name")]
    pub client_name: String,
}

/// GATT allow-lists, in priority order
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GattConfig {
    #[serde(default = "default_services")]
    pub services: Vec<Uuid>,
    #[serde(default = "default_characteristics")]
    pub characteristics: Vec<Uuid>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct BleConfig {
    #[serde(default)]
    pub adapter_index: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DisplayConfig {
    /// Minimum time between two table redraws
    #[serde(default = "default_min_refresh")]
    pub min_refresh_ms: u64,
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: AppConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults
    pub async fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if fs::try_exists(path).await.unwrap_or(false) {
            Self::load(path).await
        } else {
            info!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Validate configuration for correctness
    pub fn validate(&self) -> Result<()> {
        if self.reconciler.interval_ms == 0 {
            anyhow::bail!("reconciler.interval_ms must be greater than 0");
        }
        if self.midi.open_timeout_ms == 0 {
            anyhow::bail!("midi.open_timeout_ms must be at least 1");
        }
        if self.midi.scan_interval_ms == 0 {
            anyhow::bail!("midi.scan_interval_ms must be greater than 0");
        }
        if self.midi.client_name.trim().is_empty() {
            anyhow::bail!("midi.client_name cannot be empty");
        }
        if self.gatt.services.is_empty() {
            anyhow::bail!("gatt.services must list at least one service UUID");
        }
        if self.gatt.characteristics.is_empty() {
            anyhow::bail!("gatt.characteristics must list at least one characteristic UUID");
        }
        if self.display.min_refresh_ms == 0 {
            anyhow::bail!("display.min_refresh_ms must be greater than 0");
        }
        Ok(())
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconciler.interval_ms)
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.midi.open_timeout_ms)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.midi.scan_interval_ms)
    }

    pub fn min_refresh(&self) -> Duration {
        Duration::from_millis(self.display.min_refresh_ms)
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_reconcile_interval(),
        }
    }
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            open_timeout_ms: default_open_timeout(),
            scan_interval_ms: default_scan_interval(),
            client_name: default_client_name(),
        }
    }
}

impl Default for GattConfig {
    fn default() -> Self {
        Self {
            services: default_services(),
            characteristics: default_characteristics(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            min_refresh_ms: default_min_refresh(),
        }
    }
}

fn default_reconcile_interval() -> u64 { 1000 }
fn default_open_timeout() -> u64 { 2000 }
fn default_scan_interval() -> u64 { 500 }
fn default_client_name() -> String { "ble-midi-monitor".to_string() }
fn default_min_refresh() -> u64 { 100 }

fn default_services() -> Vec<Uuid> {
    vec![
        uuid!("65e9296c-8dfb-11ea-bc55-0242ac130003"),
        uuid!("0e5a1523-ede8-4b33-a751-6ce34ec47c00"),
    ]
}

fn default_characteristics() -> Vec<Uuid> {
    vec![
        uuid!("65e92bb0-8dfb-11ea-bc55-0242ac130003"),
        uuid!("0e5a1525-ede8-4b33-a751-6ce34ec47c00"),
    ]
}
