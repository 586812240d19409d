//! MIDI port manager - opens one input transport per container

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

use super::message::MidiMessage;
use crate::device::{ContainerId, DeviceId, DeviceStore};
use crate::error::{DeviceError, DeviceResult};
use crate::metrics::MetricsBridge;
use crate::transport::{MessageCallback, MidiInputHandle, MidiTransport};

/// A live MIDI input bound to one container
pub struct OpenMidiTransport {
    container_id: ContainerId,
    device_id: DeviceId,
    name: String,
    handle: Box<dyn MidiInputHandle>,
}

impl OpenMidiTransport {
    pub fn container_id(&self) -> &ContainerId {
        &self.container_id
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_open()
    }

    /// Release the underlying port; safe to call more than once
    pub fn close(&mut self) {
        if self.handle.is_open() {
            debug!("Closing MIDI port {} ({})", self.device_id, self.container_id);
        }
        self.handle.close();
    }
}

impl fmt::Debug for OpenMidiTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenMidiTransport")
            .field("container_id", &self.container_id)
            .field("device_id", &self.device_id)
            .field("name", &self.name)
            .field("open", &self.handle.is_open())
            .finish()
    }
}

/// Opens MIDI inputs and forwards their traffic to the metrics bridge
pub struct MidiPortManager {
    store: Arc<DeviceStore>,
    metrics: Arc<MetricsBridge>,
    transport: Arc<dyn MidiTransport>,
    open_timeout: Duration,
}

impl MidiPortManager {
    pub fn new(
        store: Arc<DeviceStore>,
        metrics: Arc<MetricsBridge>,
        transport: Arc<dyn MidiTransport>,
        open_timeout: Duration,
    ) -> Self {
        Self {
            store,
            metrics,
            transport,
            open_timeout,
        }
    }

    /// Open the MIDI input of the device with this container id
    ///
    /// The container must belong to a known MIDI record; anything else is a
    /// caller bug and reported as [`DeviceError::UnknownContainer`].
    pub async fn open(&self, container_id: &ContainerId) -> DeviceResult<OpenMidiTransport> {
        let record = self.store.with(|t| {
            t.midi_by_container(container_id)
                .map(|d| (d.device_id.clone(), d.name.clone()))
        });

        let Some((device_id, name)) = record else {
            error!("Opening MIDI transport for unknown container {}", container_id);
            return Err(DeviceError::UnknownContainer(container_id.clone()));
        };

        self.open_device(container_id, &device_id, &name).await
    }

    /// Open an already-resolved device, bounded by the open timeout
    pub async fn open_device(
        &self,
        container_id: &ContainerId,
        device_id: &DeviceId,
        name: &str,
    ) -> DeviceResult<OpenMidiTransport> {
        let callback = self.message_callback(container_id);

        let handle = match tokio::time::timeout(
            self.open_timeout,
            self.transport.open(device_id, callback),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    "Timed out opening MIDI port {} after {:?}",
                    device_id, self.open_timeout
                );
                return Err(DeviceError::OpenTimeout {
                    device_id: device_id.clone(),
                    timeout_ms: self.open_timeout.as_millis() as u64,
                });
            }
        };

        info!("MIDI port opened: {} '{}' ({})", device_id, name, container_id);

        Ok(OpenMidiTransport {
            container_id: container_id.clone(),
            device_id: device_id.clone(),
            name: name.to_string(),
            handle,
        })
    }

    fn message_callback(&self, container_id: &ContainerId) -> MessageCallback {
        let metrics = self.metrics.clone();
        let container_id = container_id.clone();

        Arc::new(move |data: &[u8]| {
            let message = MidiMessage::from_raw(data);
            trace!("MIDI RX <- {}: {}", container_id, message);
            metrics.record_midi_message(&container_id);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MidiDeviceRecord;
    use crate::transport::mock::MockMidiTransport;

    fn setup(transport: Arc<MockMidiTransport>) -> (MidiPortManager, Arc<DeviceStore>, Arc<MetricsBridge>) {
        let store = Arc::new(DeviceStore::new());
        let metrics = Arc::new(MetricsBridge::new());
        store.with(|t| {
            t.insert_midi(MidiDeviceRecord {
                device_id: DeviceId::from("M1"),
                container_id: Some(ContainerId::from("C1")),
                name: "Keys".to_string(),
                enabled: true,
                is_default: false,
            })
        });
        let manager = MidiPortManager::new(
            store.clone(),
            metrics.clone(),
            transport,
            Duration::from_millis(50),
        );
        (manager, store, metrics)
    }

    #[tokio::test]
    async fn test_open_resolves_container_and_counts_messages() {
        let transport = Arc::new(MockMidiTransport::new());
        let (manager, _store, metrics) = setup(transport.clone());

        let mut opened = manager.open(&ContainerId::from("C1")).await.unwrap();

        assert_eq!(opened.device_id(), &DeviceId::from("M1"));
        assert_eq!(transport.open_calls(), vec![DeviceId::from("M1")]);

        assert!(transport.deliver(&DeviceId::from("M1"), &[0x90, 60, 100]));
        assert!(transport.deliver(&DeviceId::from("M1"), &[0x80, 60, 0]));
        assert_eq!(metrics.midi_message_count(&ContainerId::from("C1")), 2);

        opened.close();
        opened.close();
        assert!(!opened.is_open());
        assert_eq!(transport.close_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_container_is_rejected() {
        let transport = Arc::new(MockMidiTransport::new());
        let (manager, _store, _metrics) = setup(transport.clone());

        let result = manager.open(&ContainerId::from("C404")).await;

        assert!(matches!(result, Err(DeviceError::UnknownContainer(_))));
        assert!(transport.open_calls().is_empty());
    }

    #[tokio::test]
    async fn test_open_timeout_yields_no_handle() {
        let transport = Arc::new(MockMidiTransport::new());
        transport.hang(&DeviceId::from("M1"));
        let (manager, _store, _metrics) = setup(transport.clone());

        let result = manager.open(&ContainerId::from("C1")).await;

        assert!(matches!(result, Err(DeviceError::OpenTimeout { timeout_ms: 50, .. })));
    }

    #[tokio::test]
    async fn test_open_failure_is_reported() {
        let transport = Arc::new(MockMidiTransport::new());
        transport.fail(&DeviceId::from("M1"));
        let (manager, _store, _metrics) = setup(transport.clone());

        let result = manager.open(&ContainerId::from("C1")).await;

        assert!(matches!(result, Err(DeviceError::OpenFailed { .. })));
    }
}
