//! BLE-MIDI monitor
//!
//! Watches MIDI input ports and paired BLE peripherals, joins the two by
//! container id, keeps a GATT notification session per connected peripheral
//! and a MIDI input per correlated port, and counts the traffic of both.

pub mod config;
pub mod device;
pub mod display;
pub mod error;
pub mod gatt;
pub mod metrics;
pub mod midi;
pub mod monitor;
pub mod reconciler;
pub mod task;
pub mod transport;
pub mod watcher;

pub use config::AppConfig;
pub use error::{DeviceError, DeviceResult};
pub use metrics::{MetricsBridge, Snapshot, SnapshotRow};
pub use monitor::DeviceMonitor;
