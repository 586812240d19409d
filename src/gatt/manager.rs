//! Drives GATT sessions from connect to streaming

use futures::StreamExt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::selection::{describe, select_allowed};
use super::state::{SessionSlot, SessionState};
use crate::device::{ContainerId, DeviceId, DeviceStore};
use crate::error::{DeviceError, DeviceResult};
use crate::metrics::MetricsBridge;
use crate::transport::{BleConnection, BleTransport};

/// Owns every GATT session through the device tables
///
/// Each session runs as one task. Before acting on an async completion the
/// task checks that its generation is still the live one for the device, so
/// a teardown racing an in-flight step is always safe.
pub struct GattSessionManager {
    store: Arc<DeviceStore>,
    metrics: Arc<MetricsBridge>,
    transport: Arc<dyn BleTransport>,
    services: Vec<Uuid>,
    characteristics: Vec<Uuid>,
    runtime: Handle,
}

impl GattSessionManager {
    pub fn new(
        store: Arc<DeviceStore>,
        metrics: Arc<MetricsBridge>,
        transport: Arc<dyn BleTransport>,
        services: Vec<Uuid>,
        characteristics: Vec<Uuid>,
        runtime: Handle,
    ) -> Self {
        Self {
            store,
            metrics,
            transport,
            services,
            characteristics,
            runtime,
        }
    }

    /// Start a session for a device whose link just came up
    ///
    /// Returns false if a session already exists for this id.
    pub fn on_connected(self: &Arc<Self>, device_id: &DeviceId) -> bool {
        let Some(generation) = self.store.with(|t| t.begin_session(device_id)) else {
            debug!("GATT session already live for {}", device_id);
            return false;
        };

        info!("Starting GATT session for {} (gen {})", device_id, generation);

        let manager = self.clone();
        let id = device_id.clone();
        let task = self
            .runtime
            .spawn(async move { manager.drive(id, generation).await })
            .abort_handle();

        self.store.with(|t| match t.session_mut(device_id) {
            Some(slot) if slot.generation == generation => slot.task = Some(task),
            // Torn down before we got here
            _ => task.abort(),
        });
        true
    }

    /// Tear down the session for a device and the MIDI transport riding on it
    ///
    /// The tables are updated before this returns; the platform disconnect
    /// runs on its own task. Returns true if a session was live.
    pub fn teardown(&self, device_id: &DeviceId, container_id: &ContainerId) -> bool {
        let (slot, transport) = self.store.with(|t| {
            (t.remove_session(device_id), t.take_transport(container_id))
        });

        let had_session = slot.is_some();
        if let Some(slot) = slot {
            info!("Tearing down GATT session for {} ({})", device_id, slot.state);
            if let Some(connection) = stop(slot) {
                let id = device_id.clone();
                self.runtime.spawn(async move { disconnect(&id, connection).await });
            }
        }

        if let Some(mut transport) = transport {
            info!("Closing MIDI transport for {}", container_id);
            transport.close();
        }

        had_session
    }

    /// Tear down every session, waiting for each disconnect
    pub async fn shutdown_all(&self) {
        let sessions = self.store.with(|t| t.take_all_sessions());
        for (device_id, slot) in sessions {
            if let Some(connection) = stop(slot) {
                disconnect(&device_id, connection).await;
            }
        }
    }

    async fn drive(self: Arc<Self>, device_id: DeviceId, generation: u64) {
        if let Err(e) = self.run_session(&device_id, generation).await {
            warn!("GATT session for {} reset: {}", device_id, e);
            self.reset(&device_id, generation).await;
        }
    }

    /// Drop a failed session back to `Disconnected`
    async fn reset(&self, device_id: &DeviceId, generation: u64) {
        let slot = self
            .store
            .with(|t| t.remove_session_if_current(device_id, generation));

        // The slot's task is the one running this
        if let Some(connection) = slot.and_then(|s| s.connection) {
            if let Err(e) = connection.disconnect().await {
                warn!("Failed to release partial connection to {}: {}", device_id, e);
            }
        }
    }

    async fn run_session(&self, device_id: &DeviceId, generation: u64) -> DeviceResult<()> {
        let connection = self.transport.connect(device_id).await?;

        let attached = self.store.with(|t| match t.session_mut(device_id) {
            Some(slot) if slot.generation == generation => {
                slot.connection = Some(connection.clone());
                true
            }
            _ => false,
        });
        if !attached {
            debug!("Discarding stale connect completion for {}", device_id);
            if let Err(e) = connection.disconnect().await {
                warn!("Failed to release stale connection to {}: {}", device_id, e);
            }
            return Ok(());
        }

        // Services
        let services = connection.discover_services().await?;
        let Some(service) = select_allowed(&services, &self.services, |s| s.uuid).cloned() else {
            return Err(DeviceError::ServiceNotFound {
                device_id: device_id.clone(),
                available: describe(&services, |s| s.uuid),
            });
        };
        let selected = service.clone();
        if !self.advance(device_id, generation, SessionState::ServicesDiscovered, |slot| {
            slot.service = Some(selected)
        }) {
            return Ok(());
        }
        debug!("Selected service {} on {}", service, device_id);

        // Characteristics
        let characteristics = connection.discover_characteristics(&service).await?;
        let Some(characteristic) =
            select_allowed(&characteristics, &self.characteristics, |c| c.uuid).cloned()
        else {
            return Err(DeviceError::CharacteristicNotFound {
                device_id: device_id.clone(),
                available: describe(&characteristics, |c| c.uuid),
            });
        };
        let selected = characteristic.clone();
        if !self.advance(device_id, generation, SessionState::CharacteristicReady, |slot| {
            slot.characteristic = Some(selected)
        }) {
            return Ok(());
        }
        debug!("Selected characteristic {} on {}", characteristic, device_id);

        // Register before the descriptor write so no value is missed
        let mut values = connection.value_changes(&characteristic).await?;

        match connection.enable_notifications(&characteristic).await {
            Ok(()) => {
                if !self.advance(device_id, generation, SessionState::Subscribed, |_| {})
                    || !self.advance(device_id, generation, SessionState::Streaming, |_| {})
                {
                    return Ok(());
                }
                info!("BLE device {} streaming on {}", device_id, characteristic);
            }
            Err(e) => {
                // Not retried; the session stays up in case the peer resends
                let err = DeviceError::SubscribeFailed {
                    device_id: device_id.clone(),
                    reason: e.to_string(),
                };
                warn!("{}", err);
            }
        }

        while let Some(packet) = values.next().await {
            if !self
                .store
                .with(|t| t.is_current_session(device_id, generation))
            {
                debug!("Dropping packet for stale session {}", device_id);
                break;
            }
            trace!("BLE RX <- {}: {}", device_id, hex::encode(&packet));
            self.metrics.record_ble_packet(device_id);
        }

        debug!("Value stream ended for {}", device_id);
        Ok(())
    }

    /// Move a session forward if it is still the current one
    fn advance(
        &self,
        device_id: &DeviceId,
        generation: u64,
        state: SessionState,
        update: impl FnOnce(&mut SessionSlot),
    ) -> bool {
        let advanced = self.store.with(|t| match t.session_mut(device_id) {
            Some(slot) if slot.generation == generation => {
                slot.state = state;
                update(slot);
                true
            }
            _ => false,
        });

        if advanced {
            debug!("GATT session {} -> {}", device_id, state);
        } else {
            debug!("Discarding stale {} completion for {}", state, device_id);
        }
        advanced
    }
}

/// Abort the session task and hand back its connection
fn stop(slot: SessionSlot) -> Option<Arc<dyn BleConnection>> {
    if let Some(task) = slot.task {
        task.abort();
    }
    slot.connection
}

async fn disconnect(device_id: &DeviceId, connection: Arc<dyn BleConnection>) {
    if let Err(e) = connection.disconnect().await {
        warn!("Failed to disconnect {}: {}", device_id, e);
    }
}
