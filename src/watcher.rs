//! Device watcher adapter
//!
//! Two independent enumeration feeds (MIDI input interfaces, paired BLE
//! endpoints) deliver add/update/remove events on arbitrary threads and in
//! no particular order. The adapter normalizes them into store mutations.

mod adapter;
mod events;

pub use adapter::{LinkChange, WatcherAdapter};
pub use events::{
    DeviceInformation, DeviceInformationKind, DeviceInformationUpdate, PropertyBag,
    PropertyValue, WatchEvent, WatchRequest, AEP_CONTAINER_ID, AEP_IS_CONNECTED,
    BLE_PROTOCOL_ID, MIDI_CONTAINER_ID,
};
