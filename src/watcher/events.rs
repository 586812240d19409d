//! Watch requests and the events an enumeration feed delivers

use std::collections::HashMap;
use uuid::Uuid;

use crate::device::{ContainerId, DeviceId};

/// Container id property of a MIDI device interface
pub const MIDI_CONTAINER_ID: &str = "System.Devices.ContainerId";

/// Container id property of an association endpoint
pub const AEP_CONTAINER_ID: &str = "System.Devices.Aep.ContainerId";

/// Connection flag of an association endpoint
pub const AEP_IS_CONNECTED: &str = "System.Devices.Aep.IsConnected";

/// Protocol identifier of Bluetooth LE association endpoints
pub const BLE_PROTOCOL_ID: &str = "{bb7bb05e-5972-42b5-94fc-76eaa7084d49}";

/// Interface class selector for enabled MIDI input ports
const MIDI_INPUT_SELECTOR: &str = "System.Devices.InterfaceClassGuid:=\"{504be32c-ccf6-4d2c-b73f-6f8b3747e22b}\" \
     AND System.Devices.InterfaceEnabled:=System.StructuredQueryType.Boolean#True";

/// What kind of object an enumeration feed reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceInformationKind {
    DeviceInterface,
    AssociationEndpoint,
}

/// Parameters of one enumeration subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRequest {
    pub selector: String,
    pub properties: Vec<String>,
    pub kind: DeviceInformationKind,
}

impl WatchRequest {
    /// Feed of MIDI input device interfaces
    pub fn midi_inputs() -> Self {
        Self {
            selector: MIDI_INPUT_SELECTOR.to_string(),
            properties: Self::correlation_properties(),
            kind: DeviceInformationKind::DeviceInterface,
        }
    }

    /// Feed of paired Bluetooth LE endpoints
    pub fn paired_ble() -> Self {
        Self {
            selector: format!(
                "System.Devices.Aep.ProtocolId:=\"{}\" \
                 AND System.Devices.Aep.IsPaired:=System.StructuredQueryType.Boolean#True",
                BLE_PROTOCOL_ID
            ),
            properties: Self::correlation_properties(),
            kind: DeviceInformationKind::AssociationEndpoint,
        }
    }

    fn correlation_properties() -> Vec<String> {
        vec![
            MIDI_CONTAINER_ID.to_string(),
            AEP_CONTAINER_ID.to_string(),
            AEP_IS_CONNECTED.to_string(),
        ]
    }
}

/// A value in a device's property bag
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Guid(Uuid),
    Bool(bool),
    Text(String),
}

/// Vendor property bag attached to watcher events
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyBag(HashMap<String, PropertyValue>);

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: PropertyValue) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: PropertyValue) {
        self.0.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.0.get(key)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Read a container id property
    ///
    /// Accepts a GUID or its string form. Empty strings and the nil GUID
    /// mean "no container".
    pub fn get_container(&self, key: &str) -> Option<ContainerId> {
        match self.get(key)? {
            PropertyValue::Guid(guid) if !guid.is_nil() => Some(ContainerId::from_guid(guid)),
            PropertyValue::Text(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return None;
                }
                match Uuid::parse_str(text) {
                    Ok(guid) if guid.is_nil() => None,
                    Ok(guid) => Some(ContainerId::from_guid(&guid)),
                    Err(_) => Some(ContainerId::new(text)),
                }
            }
            _ => None,
        }
    }
}

/// Payload of an "added" event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInformation {
    pub id: DeviceId,
    pub name: String,
    pub kind: DeviceInformationKind,
    /// `None` when the feed did not report the enabled flag
    pub is_enabled: Option<bool>,
    pub is_default: bool,
    pub properties: PropertyBag,
}

/// Payload of an "updated" event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInformationUpdate {
    pub id: DeviceId,
    pub properties: PropertyBag,
}

/// One event of an enumeration feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Added(DeviceInformation),
    Updated(DeviceInformationUpdate),
    Removed(DeviceId),
}

impl WatchEvent {
    pub fn device_id(&self) -> &DeviceId {
        match self {
            WatchEvent::Added(info) => &info.id,
            WatchEvent::Updated(update) => &update.id,
            WatchEvent::Removed(id) => id,
        }
    }
}
