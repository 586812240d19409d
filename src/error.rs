//! Error taxonomy for device discovery, GATT sessions and MIDI transports
//!
//! None of these errors are fatal to the process. Watcher failures skip a
//! record, session failures reset the session to `Disconnected`, and open
//! failures leave the device eligible for the next reconciler tick.

use thiserror::Error;

use crate::device::{ContainerId, DeviceId};

/// Errors raised inside the device lifecycle engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// A watcher event was malformed or missed an expected property
    #[error("discovery failure for '{device_id}': {reason}")]
    Discovery { device_id: DeviceId, reason: String },

    /// The platform could not establish a BLE connection
    #[error("failed to connect to BLE device '{device_id}': {reason}")]
    ConnectFailed { device_id: DeviceId, reason: String },

    /// None of the discovered services is on the allow-list
    #[error("no allow-listed service on '{device_id}', available: [{}]", .available.join(", "))]
    ServiceNotFound {
        device_id: DeviceId,
        available: Vec<String>,
    },

    /// None of the discovered characteristics is on the allow-list
    #[error("no allow-listed characteristic on '{device_id}', available: [{}]", .available.join(", "))]
    CharacteristicNotFound {
        device_id: DeviceId,
        available: Vec<String>,
    },

    /// Writing the notification descriptor failed
    #[error("failed to enable notifications on '{device_id}': {reason}")]
    SubscribeFailed { device_id: DeviceId, reason: String },

    /// The MIDI input port could not be opened
    #[error("failed to open MIDI port '{device_id}': {reason}")]
    OpenFailed { device_id: DeviceId, reason: String },

    /// The MIDI input port did not open before the deadline
    #[error("timed out after {timeout_ms}ms opening MIDI port '{device_id}'")]
    OpenTimeout { device_id: DeviceId, timeout_ms: u64 },

    /// A transport was requested for a container with no MIDI record
    #[error("no MIDI device record for container '{0}'")]
    UnknownContainer(ContainerId),

    /// Any other failure reported by an OS transport
    #[error("transport error: {0}")]
    Transport(String),
}

pub type DeviceResult<T> = std::result::Result<T, DeviceError>;
