//! Device tables guarded by the single device-table lock

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

use super::types::{BleDeviceRecord, ContainerId, DeviceId, MidiDeviceRecord};
use crate::gatt::{SessionSlot, SessionState};
use crate::midi::OpenMidiTransport;

/// A MIDI device the reconciler should try to open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenCandidate {
    pub container_id: ContainerId,
    pub device_id: DeviceId,
    pub name: String,
    /// Transport epoch at selection time; a teardown bumps it
    pub epoch: u64,
}

/// Everything protected by the device-table lock
#[derive(Default)]
pub struct DeviceTables {
    midi: Vec<MidiDeviceRecord>,
    ble: HashMap<DeviceId, BleDeviceRecord>,
    transports: HashMap<ContainerId, OpenMidiTransport>,
    opening: HashSet<ContainerId>,
    transport_epochs: HashMap<ContainerId, u64>,
    /// Containers whose BLE endpoint was removed and not added back since
    links_down: HashSet<ContainerId>,
    sessions: HashMap<DeviceId, SessionSlot>,
    next_generation: u64,
}

impl DeviceTables {
    // =========================================================================
    // MIDI records
    // =========================================================================

    pub fn midi_devices(&self) -> &[MidiDeviceRecord] {
        &self.midi
    }

    /// Insert a MIDI record, replacing any record with the same id
    pub fn insert_midi(&mut self, record: MidiDeviceRecord) {
        match self.midi.iter_mut().find(|d| d.device_id == record.device_id) {
            Some(existing) => *existing = record,
            None => self.midi.push(record),
        }
    }

    pub fn remove_midi(&mut self, device_id: &DeviceId) -> Option<MidiDeviceRecord> {
        let idx = self.midi.iter().position(|d| &d.device_id == device_id)?;
        Some(self.midi.remove(idx))
    }

    pub fn midi_by_container(&self, container_id: &ContainerId) -> Option<&MidiDeviceRecord> {
        self.midi
            .iter()
            .find(|d| d.container_id.as_ref() == Some(container_id))
    }

    // =========================================================================
    // BLE records
    // =========================================================================

    pub fn ble_device(&self, device_id: &DeviceId) -> Option<&BleDeviceRecord> {
        self.ble.get(device_id)
    }

    pub fn ble_by_container(&self, container_id: &ContainerId) -> Option<&BleDeviceRecord> {
        self.ble.values().find(|d| &d.container_id == container_id)
    }

    pub fn insert_ble(&mut self, record: BleDeviceRecord) {
        self.links_down.remove(&record.container_id);
        self.ble.insert(record.device_id.clone(), record);
    }

    /// Forget a BLE endpoint, keeping its container marked as link-down
    pub fn remove_ble(&mut self, device_id: &DeviceId) -> Option<BleDeviceRecord> {
        let record = self.ble.remove(device_id)?;
        self.links_down.insert(record.container_id.clone());
        Some(record)
    }

    /// Merge the connected flag, returning the previous value
    ///
    /// Returns `None` for an id that was never added.
    pub fn set_ble_connected(&mut self, device_id: &DeviceId, connected: bool) -> Option<bool> {
        let record = self.ble.get_mut(device_id)?;
        let previous = record.connected;
        record.connected = connected;
        Some(previous)
    }

    // =========================================================================
    // Open MIDI transports
    // =========================================================================

    pub fn has_transport(&self, container_id: &ContainerId) -> bool {
        self.transports.contains_key(container_id)
    }

    pub fn transports(&self) -> impl Iterator<Item = &OpenMidiTransport> {
        self.transports.values()
    }

    pub fn is_opening(&self, container_id: &ContainerId) -> bool {
        self.opening.contains(container_id)
    }

    fn epoch(&self, container_id: &ContainerId) -> u64 {
        self.transport_epochs.get(container_id).copied().unwrap_or(0)
    }

    /// Select enabled MIDI devices that have no transport yet and mark them opening
    ///
    /// Devices without a container id are skipped, as are containers whose
    /// correlated BLE endpoint is known and disconnected or was removed.
    pub fn claim_open_candidates(&mut self) -> Vec<OpenCandidate> {
        let mut candidates = Vec::new();

        for record in self.midi.iter().filter(|d| d.enabled) {
            let Some(container_id) = record.container_id.as_ref() else {
                continue;
            };
            if self.transports.contains_key(container_id) || self.opening.contains(container_id) {
                continue;
            }
            let link_down = self.links_down.contains(container_id)
                || self
                    .ble
                    .values()
                    .any(|b| &b.container_id == container_id && !b.connected);
            if link_down {
                continue;
            }
            if candidates
                .iter()
                .any(|c: &OpenCandidate| &c.container_id == container_id)
            {
                continue;
            }

            candidates.push(OpenCandidate {
                container_id: container_id.clone(),
                device_id: record.device_id.clone(),
                name: record.name.clone(),
                epoch: self.epoch(container_id),
            });
        }

        for candidate in &candidates {
            self.opening.insert(candidate.container_id.clone());
        }
        candidates
    }

    /// Complete an open started by [`claim_open_candidates`](Self::claim_open_candidates)
    ///
    /// The transport is accepted only if no teardown happened in between and
    /// the MIDI record is still known. A rejected transport is handed back so
    /// the caller can close it outside the lock.
    pub fn finish_open(
        &mut self,
        candidate: &OpenCandidate,
        transport: Option<OpenMidiTransport>,
    ) -> Option<OpenMidiTransport> {
        self.opening.remove(&candidate.container_id);
        let transport = transport?;

        let still_current = self.epoch(&candidate.container_id) == candidate.epoch
            && !self.transports.contains_key(&candidate.container_id)
            && self.midi_by_container(&candidate.container_id).is_some();

        if still_current {
            self.transports
                .insert(candidate.container_id.clone(), transport);
            None
        } else {
            Some(transport)
        }
    }

    /// Remove the transport for a container and invalidate in-flight opens
    pub fn take_transport(&mut self, container_id: &ContainerId) -> Option<OpenMidiTransport> {
        *self
            .transport_epochs
            .entry(container_id.clone())
            .or_insert(0) += 1;
        self.transports.remove(container_id)
    }

    pub fn take_all_transports(&mut self) -> Vec<OpenMidiTransport> {
        let containers: Vec<ContainerId> = self
            .transports
            .keys()
            .chain(self.opening.iter())
            .cloned()
            .collect();
        containers
            .iter()
            .filter_map(|c| self.take_transport(c))
            .collect()
    }

    // =========================================================================
    // GATT sessions
    // =========================================================================

    pub fn session(&self, device_id: &DeviceId) -> Option<&SessionSlot> {
        self.sessions.get(device_id)
    }

    pub fn session_mut(&mut self, device_id: &DeviceId) -> Option<&mut SessionSlot> {
        self.sessions.get_mut(device_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Register a new `Connecting` session, unless one already exists
    ///
    /// Returns the generation that identifies this session's completions.
    pub fn begin_session(&mut self, device_id: &DeviceId) -> Option<u64> {
        if self.sessions.contains_key(device_id) {
            return None;
        }
        self.next_generation += 1;
        let generation = self.next_generation;
        self.sessions.insert(
            device_id.clone(),
            SessionSlot::new(generation, SessionState::Connecting),
        );
        Some(generation)
    }

    /// True if `generation` is still the live session for `device_id`
    pub fn is_current_session(&self, device_id: &DeviceId, generation: u64) -> bool {
        self.sessions
            .get(device_id)
            .is_some_and(|s| s.generation == generation)
    }

    pub fn remove_session(&mut self, device_id: &DeviceId) -> Option<SessionSlot> {
        self.sessions.remove(device_id)
    }

    /// Remove a session only if it is still the given generation
    pub fn remove_session_if_current(
        &mut self,
        device_id: &DeviceId,
        generation: u64,
    ) -> Option<SessionSlot> {
        if self.is_current_session(device_id, generation) {
            self.sessions.remove(device_id)
        } else {
            None
        }
    }

    pub fn take_all_sessions(&mut self) -> Vec<(DeviceId, SessionSlot)> {
        self.sessions.drain().collect()
    }
}

/// Shared handle to the device tables
#[derive(Default)]
pub struct DeviceStore {
    tables: Mutex<DeviceTables>,
}

impl DeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a pure in-memory mutation under the device-table lock
    pub fn with<R>(&self, f: impl FnOnce(&mut DeviceTables) -> R) -> R {
        let mut tables = self.tables.lock();
        f(&mut tables)
    }

    pub fn midi_devices(&self) -> Vec<MidiDeviceRecord> {
        self.with(|t| t.midi_devices().to_vec())
    }

    pub fn ble_device(&self, device_id: &DeviceId) -> Option<BleDeviceRecord> {
        self.with(|t| t.ble_device(device_id).cloned())
    }

    pub fn open_containers(&self) -> Vec<ContainerId> {
        let mut containers = self.with(|t| t.transports.keys().cloned().collect::<Vec<_>>());
        containers.sort();
        containers
    }

    pub fn session_state(&self, device_id: &DeviceId) -> SessionState {
        self.with(|t| {
            t.session(device_id)
                .map(|s| s.state)
                .unwrap_or(SessionState::Disconnected)
        })
    }

    pub fn session_count(&self) -> usize {
        self.with(|t| t.session_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn midi(id: &str, container: Option<&str>) -> MidiDeviceRecord {
        MidiDeviceRecord {
            device_id: DeviceId::from(id),
            container_id: container.map(ContainerId::from),
            name: format!("{} name", id),
            enabled: true,
            is_default: false,
        }
    }

    fn ble(id: &str, container: &str, connected: bool) -> BleDeviceRecord {
        BleDeviceRecord {
            device_id: DeviceId::from(id),
            container_id: ContainerId::from(container),
            name: id.to_string(),
            connected,
        }
    }

    #[test]
    fn test_insert_midi_replaces_same_id() {
        let mut tables = DeviceTables::default();
        tables.insert_midi(midi("M1", Some("C1")));
        tables.insert_midi(midi("M1", Some("C2")));

        assert_eq!(tables.midi_devices().len(), 1);
        assert_eq!(
            tables.midi_devices()[0].container_id,
            Some(ContainerId::from("C2"))
        );
    }

    #[test]
    fn test_claim_skips_uncorrelatable_and_disconnected() {
        let mut tables = DeviceTables::default();
        tables.insert_midi(midi("M1", Some("C1")));
        tables.insert_midi(midi("M2", None));
        tables.insert_midi(midi("M3", Some("C3")));
        tables.insert_ble(ble("B3", "C3", false));

        let candidates = tables.claim_open_candidates();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].container_id, ContainerId::from("C1"));
        assert!(tables.is_opening(&ContainerId::from("C1")));

        // Already opening: not claimed twice
        assert!(tables.claim_open_candidates().is_empty());
    }

    #[test]
    fn test_removed_endpoint_blocks_reopen_until_added_again() {
        let mut tables = DeviceTables::default();
        tables.insert_midi(midi("M1", Some("C1")));
        tables.insert_ble(ble("B1", "C1", true));

        assert!(tables.remove_ble(&DeviceId::from("B1")).is_some());
        assert!(tables.claim_open_candidates().is_empty());

        // Added back but still down
        tables.insert_ble(ble("B1", "C1", false));
        assert!(tables.claim_open_candidates().is_empty());

        tables.set_ble_connected(&DeviceId::from("B1"), true);
        let candidates = tables.claim_open_candidates();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].container_id, ContainerId::from("C1"));
    }

    #[test]
    fn test_begin_session_is_idempotent() {
        let mut tables = DeviceTables::default();
        let id = DeviceId::from("B1");

        let first = tables.begin_session(&id);
        let second = tables.begin_session(&id);

        assert!(first.is_some());
        assert_eq!(second, None);
        assert_eq!(tables.session_count(), 1);
        assert!(tables.is_current_session(&id, first.unwrap()));
    }

    #[test]
    fn test_stale_generation_is_not_removed() {
        let mut tables = DeviceTables::default();
        let id = DeviceId::from("B1");

        let old = tables.begin_session(&id).unwrap();
        tables.remove_session(&id);
        let new = tables.begin_session(&id).unwrap();

        assert!(tables.remove_session_if_current(&id, old).is_none());
        assert!(tables.is_current_session(&id, new));
    }
}
