//! DeviceInfo store - known MIDI and BLE records, open transports, live sessions
//!
//! Every table lives behind a single mutex. Callers mutate through
//! [`DeviceStore::with`], which takes a synchronous closure, so the lock can
//! never be held across an `.await`.

mod store;
mod types;

pub use store::{DeviceStore, DeviceTables, OpenCandidate};
pub use types::{BleDeviceRecord, ContainerId, DeviceId, MidiDeviceRecord};
