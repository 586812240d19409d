//! Device identifiers and records

use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Transport-local device identifier
///
/// MIDI and BLE ids live in different namespaces and are never compared
/// with each other. Use [`ContainerId`] to correlate transports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cross-transport correlation key for one physical peripheral
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Container id in the braced GUID form the OS property bag uses
    pub fn from_guid(guid: &Uuid) -> Self {
        Self(guid.braced().to_string())
    }

    /// Synthesize a container id for backends that have no native one
    ///
    /// MIDI port names and BLE advertised names of the same peripheral
    /// normalize to the same string, so they hash to the same id.
    pub fn from_device_name(name: &str) -> Option<Self> {
        let normalized = normalize_device_name(name);
        if normalized.is_empty() {
            return None;
        }
        let guid = Uuid::new_v5(&Uuid::NAMESPACE_OID, normalized.as_bytes());
        Some(Self::from_guid(&guid))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ContainerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Strip the decorations MIDI backends add to a peripheral's name
///
/// ALSA reports `Client:Port 20:0`, CoreMIDI appends ` Bluetooth`.
fn normalize_device_name(name: &str) -> String {
    let base = name.split(':').next().unwrap_or(name);
    let lowered = base.trim().to_lowercase();
    let stripped = lowered
        .strip_suffix(" bluetooth")
        .unwrap_or(&lowered)
        .trim_end();

    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A MIDI input interface reported by the MIDI watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiDeviceRecord {
    pub device_id: DeviceId,
    /// `None` means the device cannot be correlated with a BLE endpoint
    pub container_id: Option<ContainerId>,
    pub name: String,
    pub enabled: bool,
    pub is_default: bool,
}

/// A paired BLE endpoint reported by the BLE watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BleDeviceRecord {
    pub device_id: DeviceId,
    pub container_id: ContainerId,
    pub name: String,
    pub connected: bool,
}
