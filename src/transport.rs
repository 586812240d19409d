//! OS collaborators: device enumeration, MIDI input ports, BLE GATT
//!
//! The engine only talks to these traits. Real backends live behind the
//! `midi-hardware` (midir) and `ble-hardware` (btleplug) features; tests use
//! the in-memory doubles in `mock`.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::device::DeviceId;
use crate::error::DeviceResult;
use crate::watcher::{WatchEvent, WatchRequest};

#[cfg(feature = "ble-hardware")]
pub mod btleplug_backend;
#[cfg(feature = "midi-hardware")]
pub mod midir_backend;
#[cfg(test)]
pub(crate) mod mock;

/// Callback invoked with the raw bytes of every received MIDI message
pub type MessageCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Stream of watcher events for one subscription
pub type WatchStream = BoxStream<'static, WatchEvent>;

/// Stream of characteristic values, copied out of the platform buffer
pub type ValueStream = BoxStream<'static, Bytes>;

/// OS device enumeration service
#[async_trait]
pub trait DeviceEnumerator: Send + Sync {
    /// Subscribe to add/update/remove events for the devices a request selects
    async fn watch(&self, request: WatchRequest) -> DeviceResult<WatchStream>;
}

/// An open MIDI input port
///
/// Dropping the handle closes the port.
pub trait MidiInputHandle: Send {
    /// Release the port; calling it again is a no-op
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// MIDI transport service
#[async_trait]
pub trait MidiTransport: Send + Sync {
    /// Open an input port by its transport-local id
    async fn open(
        &self,
        device_id: &DeviceId,
        on_message: MessageCallback,
    ) -> DeviceResult<Box<dyn MidiInputHandle>>;
}

/// A GATT service as reported by discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
}

/// A GATT characteristic as reported by discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub service_uuid: Uuid,
}

impl fmt::Display for GattService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uuid.braced())
    }
}

impl fmt::Display for GattCharacteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uuid.braced())
    }
}

/// A live platform connection to one BLE peripheral
#[async_trait]
pub trait BleConnection: Send + Sync {
    fn device_id(&self) -> &DeviceId;

    async fn discover_services(&self) -> DeviceResult<Vec<GattService>>;

    async fn discover_characteristics(
        &self,
        service: &GattService,
    ) -> DeviceResult<Vec<GattCharacteristic>>;

    /// Register for value changes of a characteristic
    ///
    /// Values only flow once notifications are enabled, but registering
    /// first means no value is missed after the descriptor write.
    async fn value_changes(&self, characteristic: &GattCharacteristic) -> DeviceResult<ValueStream>;

    /// Write the client characteristic configuration descriptor (notify)
    async fn enable_notifications(&self, characteristic: &GattCharacteristic) -> DeviceResult<()>;

    async fn disconnect(&self) -> DeviceResult<()>;
}

/// BLE transport service
#[async_trait]
pub trait BleTransport: Send + Sync {
    async fn connect(&self, device_id: &DeviceId) -> DeviceResult<Arc<dyn BleConnection>>;
}
