//! GATT session manager
//!
//! One session per connected BLE device, driven through
//! `Connecting -> ServicesDiscovered -> CharacteristicReady -> Subscribed ->
//! Streaming`. Any failure resets the session to `Disconnected`.

mod manager;
mod selection;
mod state;

pub use manager::GattSessionManager;
pub use selection::{describe, select_allowed};
pub use state::{SessionSlot, SessionState};
