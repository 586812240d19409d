//! BLE backend on top of btleplug
//!
//! btleplug reports peripherals per adapter with no pairing or container
//! information. The enumerator turns central events into the paired-endpoint
//! feed and synthesizes container ids from the advertised name.

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use bytes::Bytes;
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use super::{
    BleConnection, BleTransport, DeviceEnumerator, GattCharacteristic, GattService, ValueStream,
    WatchStream,
};
use crate::device::{ContainerId, DeviceId};
use crate::error::{DeviceError, DeviceResult};
use crate::watcher::{
    DeviceInformation, DeviceInformationKind, DeviceInformationUpdate, PropertyBag,
    PropertyValue, WatchEvent, WatchRequest, AEP_CONTAINER_ID, AEP_IS_CONNECTED,
};

fn transport_error(e: btleplug::Error) -> DeviceError {
    DeviceError::Transport(e.to_string())
}

/// Pick the adapter at `index`
pub async fn open_adapter(index: usize) -> DeviceResult<Adapter> {
    let manager = Manager::new().await.map_err(transport_error)?;
    let adapters = manager.adapters().await.map_err(transport_error)?;
    let count = adapters.len();

    adapters
        .into_iter()
        .nth(index)
        .ok_or_else(|| DeviceError::Transport(format!("no BLE adapter #{} ({} found)", index, count)))
}

async fn find_peripheral(adapter: &Adapter, device_id: &DeviceId) -> DeviceResult<Peripheral> {
    let peripherals = adapter.peripherals().await.map_err(transport_error)?;
    peripherals
        .into_iter()
        .find(|p| p.id().to_string() == device_id.as_str())
        .ok_or_else(|| DeviceError::ConnectFailed {
            device_id: device_id.clone(),
            reason: "peripheral not known to the adapter".to_string(),
        })
}

/// Connects to peripherals seen by one adapter
pub struct BtleplugTransport {
    adapter: Adapter,
}

impl BtleplugTransport {
    pub fn new(adapter: Adapter) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl BleTransport for BtleplugTransport {
    async fn connect(&self, device_id: &DeviceId) -> DeviceResult<Arc<dyn BleConnection>> {
        let peripheral = find_peripheral(&self.adapter, device_id).await?;

        let connected = peripheral.is_connected().await.map_err(transport_error)?;
        if !connected {
            peripheral
                .connect()
                .await
                .map_err(|e| DeviceError::ConnectFailed {
                    device_id: device_id.clone(),
                    reason: e.to_string(),
                })?;
        }

        Ok(Arc::new(BtleplugConnection {
            device_id: device_id.clone(),
            peripheral,
        }))
    }
}

struct BtleplugConnection {
    device_id: DeviceId,
    peripheral: Peripheral,
}

impl BtleplugConnection {
    fn characteristic(
        &self,
        characteristic: &GattCharacteristic,
    ) -> DeviceResult<btleplug::api::Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| {
                c.uuid == characteristic.uuid && c.service_uuid == characteristic.service_uuid
            })
            .ok_or_else(|| DeviceError::CharacteristicNotFound {
                device_id: self.device_id.clone(),
                available: Vec::new(),
            })
    }
}

#[async_trait]
impl BleConnection for BtleplugConnection {
    fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    async fn discover_services(&self) -> DeviceResult<Vec<GattService>> {
        self.peripheral
            .discover_services()
            .await
            .map_err(transport_error)?;

        Ok(self
            .peripheral
            .services()
            .iter()
            .map(|s| GattService { uuid: s.uuid })
            .collect())
    }

    async fn discover_characteristics(
        &self,
        service: &GattService,
    ) -> DeviceResult<Vec<GattCharacteristic>> {
        // btleplug discovers characteristics together with services
        Ok(self
            .peripheral
            .services()
            .iter()
            .filter(|s| s.uuid == service.uuid)
            .flat_map(|s| s.characteristics.iter())
            .map(|c| GattCharacteristic {
                uuid: c.uuid,
                service_uuid: c.service_uuid,
            })
            .collect())
    }

    async fn value_changes(&self, characteristic: &GattCharacteristic) -> DeviceResult<ValueStream> {
        let wanted = characteristic.uuid;
        let notifications = self
            .peripheral
            .notifications()
            .await
            .map_err(transport_error)?;

        Ok(notifications
            .filter_map(move |n| {
                futures::future::ready((n.uuid == wanted).then(|| Bytes::from(n.value)))
            })
            .boxed())
    }

    async fn enable_notifications(&self, characteristic: &GattCharacteristic) -> DeviceResult<()> {
        let target = self.characteristic(characteristic)?;
        self.peripheral
            .subscribe(&target)
            .await
            .map_err(|e| DeviceError::SubscribeFailed {
                device_id: self.device_id.clone(),
                reason: e.to_string(),
            })
    }

    async fn disconnect(&self) -> DeviceResult<()> {
        self.peripheral.disconnect().await.map_err(transport_error)
    }
}

/// Paired-endpoint feed built from adapter central events
pub struct BtleplugEnumerator {
    adapter: Adapter,
}

impl BtleplugEnumerator {
    pub fn new(adapter: Adapter) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl DeviceEnumerator for BtleplugEnumerator {
    async fn watch(&self, request: WatchRequest) -> DeviceResult<WatchStream> {
        if request.kind != DeviceInformationKind::AssociationEndpoint {
            return Err(DeviceError::Transport(
                "btleplug only enumerates BLE endpoints".to_string(),
            ));
        }

        let mut events = self.adapter.events().await.map_err(transport_error)?;
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(transport_error)?;
        info!("BLE scan started");

        let (tx, rx) = mpsc::channel(64);
        let adapter = self.adapter.clone();

        tokio::spawn(async move {
            let mut announced: HashSet<PeripheralId> = HashSet::new();

            while let Some(event) = events.next().await {
                let watch_event = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                        if announced.contains(&id) {
                            continue;
                        }
                        match added_event(&adapter, &id).await {
                            Some(event) => {
                                announced.insert(id);
                                event
                            }
                            None => continue,
                        }
                    }
                    CentralEvent::DeviceConnected(id) => connection_event(&id, true),
                    CentralEvent::DeviceDisconnected(id) => connection_event(&id, false),
                    _ => continue,
                };

                if tx.send(watch_event).await.is_err() {
                    break;
                }
            }

            debug!("BLE event feed closed");
            if let Err(e) = adapter.stop_scan().await {
                warn!("Failed to stop BLE scan: {}", e);
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }
}

/// Build an `Added` event once a peripheral has advertised a name
async fn added_event(adapter: &Adapter, id: &PeripheralId) -> Option<WatchEvent> {
    let peripheral = adapter.peripheral(id).await.ok()?;
    let properties = peripheral.properties().await.ok()??;
    let name = properties.local_name?;
    let connected = peripheral.is_connected().await.unwrap_or(false);

    let mut bag = PropertyBag::new().with(AEP_IS_CONNECTED, PropertyValue::Bool(connected));
    if let Some(container) = ContainerId::from_device_name(&name) {
        bag.insert(AEP_CONTAINER_ID, PropertyValue::Text(container.to_string()));
    }

    Some(WatchEvent::Added(DeviceInformation {
        id: DeviceId::new(id.to_string()),
        name,
        kind: DeviceInformationKind::AssociationEndpoint,
        is_enabled: Some(true),
        is_default: false,
        properties: bag,
    }))
}

fn connection_event(id: &PeripheralId, connected: bool) -> WatchEvent {
    WatchEvent::Updated(DeviceInformationUpdate {
        id: DeviceId::new(id.to_string()),
        properties: PropertyBag::new().with(AEP_IS_CONNECTED, PropertyValue::Bool(connected)),
    })
}
