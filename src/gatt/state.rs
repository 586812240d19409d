//! Per-device GATT session state

use std::fmt;
use std::sync::Arc;
use tokio::task::AbortHandle;

use crate::transport::{BleConnection, GattCharacteristic, GattService};

/// Position of a session in the discovery pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    ServicesDiscovered,
    CharacteristicReady,
    Subscribed,
    Streaming,
}

impl SessionState {
    /// True once value changes are being forwarded
    pub fn is_streaming(self) -> bool {
        self == SessionState::Streaming
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::ServicesDiscovered => "services-discovered",
            SessionState::CharacteristicReady => "characteristic-ready",
            SessionState::Subscribed => "subscribed",
            SessionState::Streaming => "streaming",
        };
        f.write_str(name)
    }
}

/// A live session as stored in the device tables
///
/// The slot owns the platform connection and the task driving the session.
/// `generation` identifies this session among all sessions ever created for
/// the same device id; async completions carry it and are dropped once it
/// no longer matches.
pub struct SessionSlot {
    pub generation: u64,
    pub state: SessionState,
    pub(crate) connection: Option<Arc<dyn BleConnection>>,
    pub(crate) task: Option<AbortHandle>,
    pub service: Option<GattService>,
    pub characteristic: Option<GattCharacteristic>,
}

impl SessionSlot {
    pub fn new(generation: u64, state: SessionState) -> Self {
        Self {
            generation,
            state,
            connection: None,
            task: None,
            service: None,
            characteristic: None,
        }
    }

    pub fn has_connection(&self) -> bool {
        self.connection.is_some()
    }
}

impl fmt::Debug for SessionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSlot")
            .field("generation", &self.generation)
            .field("state", &self.state)
            .field("connected", &self.connection.is_some())
            .field("service", &self.service)
            .field("characteristic", &self.characteristic)
            .finish()
    }
}
