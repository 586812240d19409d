//! Device monitor - wires watchers, sessions, ports and the reconciler together
//!
//! ```text
//! OS feeds -> WatcherAdapter -> DeviceStore <- Reconciler -> MidiPortManager
//!                  |                                              |
//!                  +-> GattSessionManager ---> MetricsBridge <----+
//! ```

use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::device::DeviceStore;
use crate::error::DeviceResult;
use crate::gatt::GattSessionManager;
use crate::metrics::{MetricsBridge, Snapshot};
use crate::midi::MidiPortManager;
use crate::reconciler::{Reconciler, TickReport};
use crate::task::TaskHandle;
use crate::transport::{BleTransport, DeviceEnumerator, MidiTransport, WatchStream};
use crate::watcher::{LinkChange, WatchEvent, WatchRequest, WatcherAdapter};


/// The device lifecycle engine
pub struct DeviceMonitor {
    store: Arc<DeviceStore>,
    metrics: Arc<MetricsBridge>,
    adapter: WatcherAdapter,
    gatt: Arc<GattSessionManager>,
    ports: Arc<MidiPortManager>,
    reconciler: Arc<Reconciler>,
    tasks: Mutex<Vec<TaskHandle>>,
}

impl DeviceMonitor {
    /// Build the engine around the given transports
    ///
    /// Must be called from within a tokio runtime; GATT sessions are spawned
    /// on it.
    pub fn new(
        config: &AppConfig,
        midi: Arc<dyn MidiTransport>,
        ble: Arc<dyn BleTransport>,
    ) -> Arc<Self> {
        let store = Arc::new(DeviceStore::new());
        let metrics = Arc::new(MetricsBridge::new());

        let gatt = Arc::new(GattSessionManager::new(
            store.clone(),
            metrics.clone(),
            ble,
            config.gatt.services.clone(),
            config.gatt.characteristics.clone(),
            Handle::current(),
        ));
        let ports = Arc::new(MidiPortManager::new(
            store.clone(),
            metrics.clone(),
            midi,
            config.open_timeout(),
        ));
        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            ports.clone(),
            config.reconcile_interval(),
        ));

        Arc::new(Self {
            adapter: WatcherAdapter::new(store.clone()),
            store,
            metrics,
            gatt,
            ports,
            reconciler,
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn store(&self) -> &Arc<DeviceStore> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<MetricsBridge> {
        &self.metrics
    }

    pub fn ports(&self) -> &Arc<MidiPortManager> {
        &self.ports
    }

    /// Subscribe to both feeds and start the reconciler
    pub async fn start(
        self: &Arc<Self>,
        midi: Arc<dyn DeviceEnumerator>,
        ble: Arc<dyn DeviceEnumerator>,
    ) -> DeviceResult<()> {
        let midi_feed = midi.watch(WatchRequest::midi_inputs()).await?;
        let ble_feed = ble.watch(WatchRequest::paired_ble()).await?;

        let handles = vec![
            self.spawn_feed("midi-watcher", midi_feed, Feed::Midi),
            self.spawn_feed("ble-watcher", ble_feed, Feed::Ble),
            self.reconciler.clone().spawn(),
        ];
        self.tasks.lock().extend(handles);

        info!("Device monitor started");
        Ok(())
    }

    /// Apply one event from the MIDI input feed
    pub fn handle_midi_event(&self, event: WatchEvent) {
        if let Err(e) = self.adapter.apply_midi(event) {
            warn!("Skipping MIDI device: {}", e);
        }
    }

    /// Apply one event from the paired BLE feed and act on link transitions
    pub fn handle_ble_event(&self, event: WatchEvent) {
        match self.adapter.apply_ble(event) {
            Ok(LinkChange::Unchanged) => {}
            Ok(LinkChange::Connected { device_id }) => {
                self.gatt.on_connected(&device_id);
            }
            Ok(LinkChange::Disconnected {
                device_id,
                container_id,
            })
            | Ok(LinkChange::Removed {
                device_id,
                container_id,
            }) => {
                self.gatt.teardown(&device_id, &container_id);
            }
            Err(e) => warn!("Skipping BLE device: {}", e),
        }
    }

    /// Run one reconciler pass now
    pub async fn reconcile(&self) -> TickReport {
        self.reconciler.tick().await
    }

    pub fn snapshot(&self) -> Snapshot {
        self.metrics.snapshot(&self.store)
    }

    /// Stop every task, then close all sessions and transports
    pub async fn shutdown(&self) {
        let tasks: Vec<TaskHandle> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let name = task.name();
            if let Err(e) = task.shutdown().await {
                warn!("Task {} ended abnormally: {}", name, e);
            }
        }

        self.gatt.shutdown_all().await;

        let transports = self.store.with(|t| t.take_all_transports());
        for mut transport in transports {
            transport.close();
        }

        info!("Device monitor stopped");
    }

    fn spawn_feed(self: &Arc<Self>, name: &'static str, mut feed: WatchStream, kind: Feed) -> TaskHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let monitor = self.clone();

        let handle = tokio::spawn(async move {
            debug!("{} started", name);
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    event = feed.next() => {
                        let Some(event) = event else {
                            warn!("{} feed ended", name);
                            break;
                        };
                        match kind {
                            Feed::Midi => monitor.handle_midi_event(event),
                            Feed::Ble => monitor.handle_ble_event(event),
                        }
                    }
                }
            }
            debug!("{} stopped", name);
        });

        TaskHandle::new(name, handle, shutdown_tx)
    }
}

#[derive(Debug, Clone, Copy)]
enum Feed {
    Midi,
    Ble,
}
