//! In-memory transports for tests

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio_stream::wrappers::{ReceiverStream, UnboundedReceiverStream};
use uuid::Uuid;

use super::{
    BleConnection, BleTransport, DeviceEnumerator, GattCharacteristic, GattService,
    MessageCallback, MidiInputHandle, MidiTransport, ValueStream, WatchStream,
};
use crate::device::DeviceId;
use crate::error::{DeviceError, DeviceResult};
use crate::watcher::{WatchEvent, WatchRequest};

/// Poll a condition until it holds, for up to a second
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

// =============================================================================
// MIDI
// =============================================================================

#[derive(Default)]
struct MidiState {
    open_calls: Vec<DeviceId>,
    callbacks: HashMap<DeviceId, MessageCallback>,
    failing: HashSet<DeviceId>,
    hanging: HashSet<DeviceId>,
}

#[derive(Default)]
pub struct MockMidiTransport {
    state: Mutex<MidiState>,
    closed: Arc<AtomicUsize>,
}

impl MockMidiTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, device_id: &DeviceId) {
        self.state.lock().failing.insert(device_id.clone());
    }

    /// Make opens of this device never complete
    pub fn hang(&self, device_id: &DeviceId) {
        self.state.lock().hanging.insert(device_id.clone());
    }

    pub fn heal(&self, device_id: &DeviceId) {
        let mut state = self.state.lock();
        state.failing.remove(device_id);
        state.hanging.remove(device_id);
    }

    pub fn open_calls(&self) -> Vec<DeviceId> {
        self.state.lock().open_calls.clone()
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Feed a message to the port's callback, as the OS would
    pub fn deliver(&self, device_id: &DeviceId, data: &[u8]) -> bool {
        let callback = self.state.lock().callbacks.get(device_id).cloned();
        match callback {
            Some(callback) => {
                callback(data);
                true
            }
            None => false,
        }
    }
}

struct MockInputHandle {
    open: bool,
    closed: Arc<AtomicUsize>,
}

impl MidiInputHandle for MockInputHandle {
    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

impl Drop for MockInputHandle {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl MidiTransport for MockMidiTransport {
    async fn open(
        &self,
        device_id: &DeviceId,
        on_message: MessageCallback,
    ) -> DeviceResult<Box<dyn MidiInputHandle>> {
        let (fails, hangs) = {
            let mut state = self.state.lock();
            state.open_calls.push(device_id.clone());
            (
                state.failing.contains(device_id),
                state.hanging.contains(device_id),
            )
        };

        if hangs {
            futures::future::pending::<()>().await;
        }
        if fails {
            return Err(DeviceError::OpenFailed {
                device_id: device_id.clone(),
                reason: "mock failure".to_string(),
            });
        }

        self.state
            .lock()
            .callbacks
            .insert(device_id.clone(), on_message);
        Ok(Box::new(MockInputHandle {
            open: true,
            closed: self.closed.clone(),
        }))
    }
}

// =============================================================================
// BLE
// =============================================================================

#[derive(Default)]
struct BleState {
    services: Vec<Uuid>,
    characteristics: Vec<Uuid>,
    fail_connect: bool,
    fail_subscribe: bool,
    connect_calls: usize,
    characteristic_discoveries: usize,
    subscribe_calls: usize,
    disconnects: usize,
    disconnect_gate: Option<Arc<Semaphore>>,
    senders: HashMap<DeviceId, mpsc::UnboundedSender<Bytes>>,
}

/// BLE transport whose peripherals all expose the same GATT profile
pub struct MockBleTransport {
    state: Arc<Mutex<BleState>>,
    connect_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MockBleTransport {
    pub fn new(services: Vec<Uuid>, characteristics: Vec<Uuid>) -> Self {
        Self {
            state: Arc::new(Mutex::new(BleState {
                services,
                characteristics,
                ..Default::default()
            })),
            connect_gate: Mutex::new(None),
        }
    }

    pub fn fail_connect(&self) {
        self.state.lock().fail_connect = true;
    }

    pub fn fail_subscribe(&self) {
        self.state.lock().fail_subscribe = true;
    }

    /// Hold every connect until [`release_connects`](Self::release_connects)
    pub fn hold_connects(&self) {
        *self.connect_gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_connects(&self, n: usize) {
        if let Some(gate) = self.connect_gate.lock().as_ref() {
            gate.add_permits(n);
        }
    }

    /// Hold every disconnect until [`release_disconnects`](Self::release_disconnects)
    pub fn hold_disconnects(&self) {
        self.state.lock().disconnect_gate = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_disconnects(&self, n: usize) {
        if let Some(gate) = self.state.lock().disconnect_gate.as_ref() {
            gate.add_permits(n);
        }
    }

    pub fn connect_calls(&self) -> usize {
        self.state.lock().connect_calls
    }

    pub fn characteristic_discoveries(&self) -> usize {
        self.state.lock().characteristic_discoveries
    }

    pub fn subscribe_calls(&self) -> usize {
        self.state.lock().subscribe_calls
    }

    pub fn disconnects(&self) -> usize {
        self.state.lock().disconnects
    }

    /// Push a value change to the device's registered characteristic
    pub fn send_packet(&self, device_id: &DeviceId, packet: &[u8]) -> bool {
        let state = self.state.lock();
        match state.senders.get(device_id) {
            Some(tx) => tx.send(Bytes::copy_from_slice(packet)).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl BleTransport for MockBleTransport {
    async fn connect(&self, device_id: &DeviceId) -> DeviceResult<Arc<dyn BleConnection>> {
        self.state.lock().connect_calls += 1;

        let gate = self.connect_gate.lock().clone();
        if let Some(gate) = gate {
            gate.acquire()
                .await
                .map_err(|e| DeviceError::Transport(e.to_string()))?
                .forget();
        }

        if self.state.lock().fail_connect {
            return Err(DeviceError::ConnectFailed {
                device_id: device_id.clone(),
                reason: "mock failure".to_string(),
            });
        }

        Ok(Arc::new(MockConnection {
            device_id: device_id.clone(),
            state: self.state.clone(),
        }))
    }
}

struct MockConnection {
    device_id: DeviceId,
    state: Arc<Mutex<BleState>>,
}

#[async_trait]
impl BleConnection for MockConnection {
    fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    async fn discover_services(&self) -> DeviceResult<Vec<GattService>> {
        let state = self.state.lock();
        Ok(state
            .services
            .iter()
            .map(|uuid| GattService { uuid: *uuid })
            .collect())
    }

    async fn discover_characteristics(
        &self,
        service: &GattService,
    ) -> DeviceResult<Vec<GattCharacteristic>> {
        let mut state = self.state.lock();
        state.characteristic_discoveries += 1;
        Ok(state
            .characteristics
            .iter()
            .map(|uuid| GattCharacteristic {
                uuid: *uuid,
                service_uuid: service.uuid,
            })
            .collect())
    }

    async fn value_changes(&self, _characteristic: &GattCharacteristic) -> DeviceResult<ValueStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().senders.insert(self.device_id.clone(), tx);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn enable_notifications(&self, _characteristic: &GattCharacteristic) -> DeviceResult<()> {
        let mut state = self.state.lock();
        state.subscribe_calls += 1;
        if state.fail_subscribe {
            return Err(DeviceError::Transport("descriptor write rejected".to_string()));
        }
        Ok(())
    }

    async fn disconnect(&self) -> DeviceResult<()> {
        let gate = self.state.lock().disconnect_gate.clone();
        if let Some(gate) = gate {
            gate.acquire()
                .await
                .map_err(|e| DeviceError::Transport(e.to_string()))?
                .forget();
        }

        let mut state = self.state.lock();
        state.disconnects += 1;
        state.senders.remove(&self.device_id);
        Ok(())
    }
}

// =============================================================================
// Enumeration
// =============================================================================

/// Enumerator whose single feed is driven by the test
pub struct MockEnumerator {
    tx: mpsc::Sender<WatchEvent>,
    rx: Mutex<Option<mpsc::Receiver<WatchEvent>>>,
    requests: Mutex<Vec<WatchRequest>>,
}

impl MockEnumerator {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(64);
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn sender(&self) -> mpsc::Sender<WatchEvent> {
        self.tx.clone()
    }

    pub fn requests(&self) -> Vec<WatchRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl DeviceEnumerator for MockEnumerator {
    async fn watch(&self, request: WatchRequest) -> DeviceResult<WatchStream> {
        self.requests.lock().push(request);
        let rx = self
            .rx
            .lock()
            .take()
            .ok_or_else(|| DeviceError::Transport("feed already watched".to_string()))?;
        Ok(ReceiverStream::new(rx).boxed())
    }
}
