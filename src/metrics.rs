//! Metrics bridge - per-device traffic counters and coalesced refresh signal
//!
//! Counters are fed from transport callbacks on arbitrary threads and read
//! by the presentation layer as an immutable [`Snapshot`]. The counters have
//! their own lock, separate from the device-table lock, so a display refresh
//! never blocks discovery work.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::Notify;
use tracing::trace;

use crate::device::{ContainerId, DeviceId, DeviceStore};

#[derive(Default)]
struct Counters {
    midi_messages: HashMap<ContainerId, u64>,
    ble_packets: HashMap<DeviceId, u64>,
    refresh_pending: bool,
}

/// Thread-safe message/packet counters
#[derive(Default)]
pub struct MetricsBridge {
    counters: Mutex<Counters>,
    refresh: Notify,
}

impl MetricsBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one MIDI message for a container
    ///
    /// Returns true if this call scheduled a refresh.
    pub fn record_midi_message(&self, container_id: &ContainerId) -> bool {
        let schedule = {
            let mut counters = self.counters.lock();
            *counters
                .midi_messages
                .entry(container_id.clone())
                .or_insert(0) += 1;
            Self::mark_pending(&mut counters)
        };
        trace!("MIDI message counted for {}", container_id);
        self.signal(schedule)
    }

    /// Count one BLE packet for a device
    ///
    /// Returns true if this call scheduled a refresh.
    pub fn record_ble_packet(&self, device_id: &DeviceId) -> bool {
        let schedule = {
            let mut counters = self.counters.lock();
            *counters.ble_packets.entry(device_id.clone()).or_insert(0) += 1;
            Self::mark_pending(&mut counters)
        };
        trace!("BLE packet counted for {}", device_id);
        self.signal(schedule)
    }

    fn mark_pending(counters: &mut Counters) -> bool {
        let schedule = !counters.refresh_pending;
        counters.refresh_pending = true;
        schedule
    }

    fn signal(&self, schedule: bool) -> bool {
        if schedule {
            self.refresh.notify_one();
        }
        schedule
    }

    pub fn midi_message_count(&self, container_id: &ContainerId) -> u64 {
        self.counters
            .lock()
            .midi_messages
            .get(container_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn ble_packet_count(&self, device_id: &DeviceId) -> u64 {
        self.counters
            .lock()
            .ble_packets
            .get(device_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn is_refresh_pending(&self) -> bool {
        self.counters.lock().refresh_pending
    }

    /// Consume the pending refresh, if any
    pub fn take_refresh(&self) -> bool {
        std::mem::take(&mut self.counters.lock().refresh_pending)
    }

    /// Wait until a refresh is scheduled, then consume it
    ///
    /// Counts recorded after this returns schedule a new refresh, so a
    /// snapshot taken right after never misses an increment for good.
    pub async fn refreshed(&self) {
        loop {
            self.refresh.notified().await;
            if self.take_refresh() {
                return;
            }
        }
    }

    /// Point-in-time view of every open transport and its counts
    ///
    /// Takes the device-table lock and the counters lock one after the
    /// other, never both at once.
    pub fn snapshot(&self, store: &DeviceStore) -> Snapshot {
        let devices: Vec<(String, ContainerId, Option<DeviceId>)> = store.with(|t| {
            t.transports()
                .map(|transport| {
                    let container_id = transport.container_id().clone();
                    let ble_id = t
                        .ble_by_container(&container_id)
                        .map(|b| b.device_id.clone());
                    (transport.name().to_string(), container_id, ble_id)
                })
                .collect()
        });

        let mut rows: Vec<SnapshotRow> = {
            let counters = self.counters.lock();
            devices
                .into_iter()
                .map(|(name, container_id, ble_id)| SnapshotRow {
                    midi_message_count: counters
                        .midi_messages
                        .get(&container_id)
                        .copied()
                        .unwrap_or(0),
                    ble_packet_count: ble_id
                        .and_then(|id| counters.ble_packets.get(&id).copied())
                        .unwrap_or(0),
                    name,
                    container_id,
                })
                .collect()
        };
        rows.sort_by(|a, b| a.name.cmp(&b.name).then(a.container_id.cmp(&b.container_id)));

        Snapshot {
            taken_at: Utc::now(),
            rows,
        }
    }
}

/// One display row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotRow {
    pub name: String,
    pub container_id: ContainerId,
    pub midi_message_count: u64,
    pub ble_packet_count: u64,
}

/// Immutable view handed to the presentation layer
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    pub rows: Vec<SnapshotRow>,
}
