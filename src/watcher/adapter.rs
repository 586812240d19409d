//! Folds watcher events into the device store

use std::sync::Arc;
use tracing::{debug, info};

use super::events::{
    DeviceInformation, DeviceInformationUpdate, WatchEvent, AEP_CONTAINER_ID, AEP_IS_CONNECTED,
    MIDI_CONTAINER_ID,
};
use crate::device::{BleDeviceRecord, ContainerId, DeviceId, DeviceStore, MidiDeviceRecord};
use crate::error::{DeviceError, DeviceResult};

/// BLE link transition produced by a watcher event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkChange {
    /// Nothing the session manager needs to act on
    Unchanged,
    /// `connected` went false -> true
    Connected { device_id: DeviceId },
    /// `connected` went true -> false, or a down report found work still live
    Disconnected {
        device_id: DeviceId,
        container_id: ContainerId,
    },
    /// The endpoint disappeared from the feed
    Removed {
        device_id: DeviceId,
        container_id: ContainerId,
    },
}

/// Normalizes both enumeration feeds into store mutations
///
/// Every method takes the device-table lock once, performs a pure
/// in-memory mutation and returns. No async work happens here.
#[derive(Clone)]
pub struct WatcherAdapter {
    store: Arc<DeviceStore>,
}

impl WatcherAdapter {
    pub fn new(store: Arc<DeviceStore>) -> Self {
        Self { store }
    }

    /// Apply an event from the MIDI input feed
    pub fn apply_midi(&self, event: WatchEvent) -> DeviceResult<()> {
        match event {
            WatchEvent::Added(info) => self.midi_added(info),
            WatchEvent::Removed(device_id) => {
                debug!("Removing MIDI device: {}", device_id);
                self.store.with(|t| t.remove_midi(&device_id));
                Ok(())
            }
            // MIDI records are replaced (removed + added), never updated
            WatchEvent::Updated(update) => {
                debug!("Ignoring MIDI device update: {}", update.id);
                Ok(())
            }
        }
    }

    fn midi_added(&self, info: DeviceInformation) -> DeviceResult<()> {
        debug!("Detected MIDI device: {}", info.id);

        match info.is_enabled {
            Some(true) => {}
            Some(false) => {
                debug!("MIDI device not enabled: {}", info.id);
                return Ok(());
            }
            None => {
                return Err(DeviceError::Discovery {
                    device_id: info.id,
                    reason: "missing enabled flag".to_string(),
                });
            }
        }

        let record = MidiDeviceRecord {
            container_id: info.properties.get_container(MIDI_CONTAINER_ID),
            device_id: info.id,
            name: info.name,
            enabled: true,
            is_default: info.is_default,
        };

        info!(
            "Adding MIDI device: {} container={} name='{}'",
            record.device_id,
            record
                .container_id
                .as_ref()
                .map(ContainerId::as_str)
                .unwrap_or("-"),
            record.name
        );

        self.store.with(|t| t.insert_midi(record));
        Ok(())
    }

    /// Apply an event from the paired BLE feed
    pub fn apply_ble(&self, event: WatchEvent) -> DeviceResult<LinkChange> {
        match event {
            WatchEvent::Added(info) => self.ble_added(info),
            WatchEvent::Updated(update) => Ok(self.ble_updated(update)),
            WatchEvent::Removed(device_id) => {
                debug!("Removing BLE device: {}", device_id);
                let removed = self.store.with(|t| t.remove_ble(&device_id));
                Ok(match removed {
                    Some(record) => LinkChange::Removed {
                        device_id,
                        container_id: record.container_id,
                    },
                    None => LinkChange::Unchanged,
                })
            }
        }
    }

    fn ble_added(&self, info: DeviceInformation) -> DeviceResult<LinkChange> {
        debug!("Detected paired BLE device: {}, '{}'", info.id, info.name);

        let Some(container_id) = info.properties.get_container(AEP_CONTAINER_ID) else {
            return Err(DeviceError::Discovery {
                device_id: info.id,
                reason: format!("missing {}", AEP_CONTAINER_ID),
            });
        };

        let reported = info.properties.get_bool(AEP_IS_CONNECTED);
        let record = self.store.with(|t| {
            // A re-add without the flag keeps what we already know
            let connected = reported
                .or_else(|| t.ble_device(&info.id).map(|r| r.connected))
                .unwrap_or(false);
            let record = BleDeviceRecord {
                device_id: info.id,
                container_id,
                name: info.name,
                connected,
            };
            t.insert_ble(record.clone());
            record
        });

        info!(
            "Adding BLE device: {} container={} name='{}' {}",
            record.device_id,
            record.container_id,
            record.name,
            if record.connected { "connected" } else { "disconnected" }
        );

        Ok(LinkChange::Unchanged)
    }

    fn ble_updated(&self, update: DeviceInformationUpdate) -> LinkChange {
        let Some(connected) = update.properties.get_bool(AEP_IS_CONNECTED) else {
            debug!("BLE device updated without connection flag: {}", update.id);
            return LinkChange::Unchanged;
        };

        let change = self.store.with(|t| {
            let previous = t.set_ble_connected(&update.id, connected)?;
            let container_id = t.ble_device(&update.id)?.container_id.clone();
            let live = t.session(&update.id).is_some() || t.has_transport(&container_id);
            Some((previous, container_id, live))
        });

        let Some((previous, container_id, live)) = change else {
            debug!("Ignoring update for unknown BLE device: {}", update.id);
            return LinkChange::Unchanged;
        };

        // A link reported down still releases whatever is running on it
        if previous == connected && (connected || !live) {
            return LinkChange::Unchanged;
        }

        info!(
            "BLE device connection status change: {} {} {}",
            update.id,
            container_id,
            if connected { "connected" } else { "disconnected" }
        );

        if connected {
            LinkChange::Connected {
                device_id: update.id,
            }
        } else {
            LinkChange::Disconnected {
                device_id: update.id,
                container_id,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::events::{DeviceInformationKind, PropertyBag, PropertyValue};
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn midi_added(id: &str, container: &str, enabled: Option<bool>) -> WatchEvent {
        WatchEvent::Added(DeviceInformation {
            id: DeviceId::from(id),
            name: format!("MIDI {}", id),
            kind: DeviceInformationKind::DeviceInterface,
            is_enabled: enabled,
            is_default: false,
            properties: PropertyBag::new()
                .with(MIDI_CONTAINER_ID, PropertyValue::Text(container.to_string())),
        })
    }

    fn ble_added(id: &str, container: &str) -> WatchEvent {
        WatchEvent::Added(DeviceInformation {
            id: DeviceId::from(id),
            name: format!("BLE {}", id),
            kind: DeviceInformationKind::AssociationEndpoint,
            is_enabled: Some(true),
            is_default: false,
            properties: PropertyBag::new()
                .with(AEP_CONTAINER_ID, PropertyValue::Text(container.to_string())),
        })
    }

    fn ble_connected(id: &str, connected: bool) -> WatchEvent {
        WatchEvent::Updated(DeviceInformationUpdate {
            id: DeviceId::from(id),
            properties: PropertyBag::new()
                .with(AEP_IS_CONNECTED, PropertyValue::Bool(connected)),
        })
    }

    fn adapter() -> (WatcherAdapter, Arc<DeviceStore>) {
        let store = Arc::new(DeviceStore::new());
        (WatcherAdapter::new(store.clone()), store)
    }

    #[test]
    fn test_midi_without_enabled_flag_is_dropped() {
        let (adapter, store) = adapter();

        let result = adapter.apply_midi(midi_added("M1", "C1", None));

        assert!(matches!(result, Err(DeviceError::Discovery { .. })));
        assert!(store.midi_devices().is_empty());
    }

    #[test]
    fn test_disabled_midi_is_not_inserted() {
        let (adapter, store) = adapter();

        adapter.apply_midi(midi_added("M1", "C1", Some(false))).unwrap();

        assert!(store.midi_devices().is_empty());
    }

    #[test]
    fn test_ble_without_container_is_skipped() {
        let (adapter, store) = adapter();

        let result = adapter.apply_ble(ble_added("B1", ""));

        assert!(result.is_err());
        assert!(store.ble_device(&DeviceId::from("B1")).is_none());
    }

    #[test]
    fn test_update_for_unseen_ble_is_ignored() {
        let (adapter, store) = adapter();

        let change = adapter.apply_ble(ble_connected("B9", true)).unwrap();

        assert_eq!(change, LinkChange::Unchanged);
        assert!(store.ble_device(&DeviceId::from("B9")).is_none());
    }

    #[test]
    fn test_connection_transitions() {
        let (adapter, _store) = adapter();
        adapter.apply_ble(ble_added("B1", "C1")).unwrap();

        assert_eq!(
            adapter.apply_ble(ble_connected("B1", true)).unwrap(),
            LinkChange::Connected {
                device_id: DeviceId::from("B1")
            }
        );
        // Same value again is not a transition
        assert_eq!(
            adapter.apply_ble(ble_connected("B1", true)).unwrap(),
            LinkChange::Unchanged
        );
        assert_eq!(
            adapter.apply_ble(ble_connected("B1", false)).unwrap(),
            LinkChange::Disconnected {
                device_id: DeviceId::from("B1"),
                container_id: ContainerId::from("C1"),
            }
        );
    }

    #[test]
    fn test_re_add_without_flag_keeps_connection_state() {
        let (adapter, store) = adapter();
        adapter.apply_ble(ble_added("B1", "C1")).unwrap();
        adapter.apply_ble(ble_connected("B1", true)).unwrap();

        adapter.apply_ble(ble_added("B1", "C1")).unwrap();

        assert!(store.ble_device(&DeviceId::from("B1")).unwrap().connected);
        assert_eq!(
            adapter.apply_ble(ble_connected("B1", false)).unwrap(),
            LinkChange::Disconnected {
                device_id: DeviceId::from("B1"),
                container_id: ContainerId::from("C1"),
            }
        );
    }

    #[test]
    fn test_repeated_down_with_live_session_still_disconnects() {
        let (adapter, store) = adapter();
        adapter.apply_ble(ble_added("B1", "C1")).unwrap();
        store.with(|t| t.begin_session(&DeviceId::from("B1")));

        // Flag already false, but a session is still registered
        assert!(matches!(
            adapter.apply_ble(ble_connected("B1", false)).unwrap(),
            LinkChange::Disconnected { .. }
        ));

        store.with(|t| t.remove_session(&DeviceId::from("B1")));
        assert_eq!(
            adapter.apply_ble(ble_connected("B1", false)).unwrap(),
            LinkChange::Unchanged
        );
    }

    #[test]
    fn test_remove_is_idempotent() {
        let (adapter, _store) = adapter();
        adapter.apply_ble(ble_added("B1", "C1")).unwrap();

        let first = adapter
            .apply_ble(WatchEvent::Removed(DeviceId::from("B1")))
            .unwrap();
        let second = adapter
            .apply_ble(WatchEvent::Removed(DeviceId::from("B1")))
            .unwrap();

        assert!(matches!(first, LinkChange::Removed { .. }));
        assert_eq!(second, LinkChange::Unchanged);
        assert!(adapter
            .apply_midi(WatchEvent::Removed(DeviceId::from("M404")))
            .is_ok());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add { id: u8, enabled: Option<bool> },
        Remove { id: u8 },
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..6, prop::option::of(any::<bool>()))
                .prop_map(|(id, enabled)| Op::Add { id, enabled }),
            (0u8..6).prop_map(|id| Op::Remove { id }),
        ]
    }

    proptest! {
        #[test]
        fn prop_replay_leaves_enabled_non_removed_records(ops in prop::collection::vec(op_strategy(), 0..40)) {
            let (adapter, store) = adapter();
            let mut expected = BTreeSet::new();

            for op in &ops {
                match op {
                    Op::Add { id, enabled } => {
                        let name = format!("M{}", id);
                        let _ = adapter.apply_midi(midi_added(&name, &format!("C{}", id), *enabled));
                        if *enabled == Some(true) {
                            expected.insert(name);
                        }
                    }
                    Op::Remove { id } => {
                        let name = format!("M{}", id);
                        adapter.apply_midi(WatchEvent::Removed(DeviceId::from(name.as_str()))).unwrap();
                        expected.remove(&name);
                    }
                }
            }

            let actual: BTreeSet<String> = store
                .midi_devices()
                .into_iter()
                .map(|d| d.device_id.to_string())
                .collect();
            prop_assert_eq!(actual, expected);
        }
    }
}
