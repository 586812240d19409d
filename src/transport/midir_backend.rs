//! MIDI input backend on top of midir
//!
//! midir has no device watcher, so the enumerator polls the port list and
//! diffs it into added/removed events. Port opens block, so they run on the
//! blocking pool.

use async_trait::async_trait;
use colored::*;
use futures::StreamExt;
use midir::{Ignore, MidiInput, MidiInputConnection};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, trace};

use super::{DeviceEnumerator, MessageCallback, MidiInputHandle, MidiTransport, WatchStream};
use crate::device::{ContainerId, DeviceId};
use crate::error::{DeviceError, DeviceResult};
use crate::watcher::{
    DeviceInformation, DeviceInformationKind, PropertyBag, PropertyValue, WatchEvent,
    WatchRequest, MIDI_CONTAINER_ID,
};

/// A MIDI input port as listed by the OS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub id: String,
    pub name: String,
}

/// List the MIDI input ports currently present
pub fn list_ports(client_name: &str) -> DeviceResult<Vec<PortInfo>> {
    let midi_in = MidiInput::new(client_name).map_err(|e| DeviceError::Transport(e.to_string()))?;

    Ok(midi_in
        .ports()
        .iter()
        .filter_map(|port| {
            let name = midi_in.port_name(port).ok()?;
            Some(PortInfo {
                id: port.id(),
                name,
            })
        })
        .collect())
}

/// Print available MIDI input ports with their container ids
pub fn print_ports(client_name: &str) -> DeviceResult<()> {
    let ports = list_ports(client_name)?;

    println!("\n{}", "=== MIDI Input Ports ===".bold().cyan());
    if ports.is_empty() {
        println!("  {}", "No input ports found".dimmed());
    }
    for port in &ports {
        let container = ContainerId::from_device_name(&port.name)
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {} {} {}",
            "•".green(),
            port.name.bright_white(),
            container.dimmed()
        );
    }
    println!();
    Ok(())
}

/// Opens midir input ports by port id
pub struct MidirTransport {
    client_name: String,
}

impl MidirTransport {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }
}

#[async_trait]
impl MidiTransport for MidirTransport {
    async fn open(
        &self,
        device_id: &DeviceId,
        on_message: MessageCallback,
    ) -> DeviceResult<Box<dyn MidiInputHandle>> {
        let client_name = self.client_name.clone();
        let id = device_id.clone();

        let connection = tokio::task::spawn_blocking(move || {
            let open_failed = |reason: String| DeviceError::OpenFailed {
                device_id: id.clone(),
                reason,
            };

            let mut midi_in = MidiInput::new(&client_name).map_err(|e| open_failed(e.to_string()))?;
            midi_in.ignore(Ignore::None);

            let port = midi_in
                .find_port_by_id(id.to_string())
                .ok_or_else(|| open_failed("port not found".to_string()))?;

            midi_in
                .connect(
                    &port,
                    &format!("{}-in", client_name),
                    move |_timestamp, data, _| on_message(data),
                    (),
                )
                .map_err(|e| open_failed(e.to_string()))
        })
        .await
        .map_err(|e| DeviceError::Transport(e.to_string()))??;

        debug!("midir input connected: {}", device_id);
        Ok(Box::new(MidirInputHandle {
            connection: Some(connection),
        }))
    }
}

struct MidirInputHandle {
    connection: Option<MidiInputConnection<()>>,
}

impl MidiInputHandle for MidirInputHandle {
    fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
    }

    fn is_open(&self) -> bool {
        self.connection.is_some()
    }
}

/// MIDI input feed built by polling the port list
pub struct MidirEnumerator {
    client_name: String,
    scan_interval: Duration,
}

impl MidirEnumerator {
    pub fn new(client_name: impl Into<String>, scan_interval: Duration) -> Self {
        Self {
            client_name: client_name.into(),
            scan_interval,
        }
    }
}

#[async_trait]
impl DeviceEnumerator for MidirEnumerator {
    async fn watch(&self, request: WatchRequest) -> DeviceResult<WatchStream> {
        if request.kind != DeviceInformationKind::DeviceInterface {
            return Err(DeviceError::Transport(
                "midir only enumerates MIDI device interfaces".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel(64);
        let client_name = self.client_name.clone();
        let scan_interval = self.scan_interval;

        tokio::spawn(async move {
            let mut known: HashMap<String, String> = HashMap::new();
            info!("MIDI port scan started (every {:?})", scan_interval);

            loop {
                let name = client_name.clone();
                let ports = match tokio::task::spawn_blocking(move || list_ports(&name)).await {
                    Ok(Ok(ports)) => ports,
                    Ok(Err(e)) => {
                        debug!("MIDI port scan failed: {}", e);
                        Vec::new()
                    }
                    Err(e) => {
                        debug!("MIDI port scan task failed: {}", e);
                        Vec::new()
                    }
                };

                for event in diff_ports(&mut known, ports) {
                    trace!("MIDI feed event for {}", event.device_id());
                    if tx.send(event).await.is_err() {
                        debug!("MIDI port scan stopped");
                        return;
                    }
                }

                tokio::time::sleep(scan_interval).await;
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }
}

/// Turn the current port list into events against what was seen before
fn diff_ports(known: &mut HashMap<String, String>, ports: Vec<PortInfo>) -> Vec<WatchEvent> {
    let mut events = Vec::new();

    let current: HashMap<String, String> = ports.into_iter().map(|p| (p.id, p.name)).collect();

    let mut removed: Vec<&String> = known.keys().filter(|id| !current.contains_key(*id)).collect();
    removed.sort();
    for id in removed {
        events.push(WatchEvent::Removed(DeviceId::new(id.as_str())));
    }

    let mut added: Vec<(&String, &String)> = current
        .iter()
        .filter(|(id, _)| !known.contains_key(*id))
        .collect();
    added.sort();
    for (id, name) in added {
        let mut properties = PropertyBag::new();
        if let Some(container) = ContainerId::from_device_name(name) {
            properties.insert(MIDI_CONTAINER_ID, PropertyValue::Text(container.to_string()));
        }
        events.push(WatchEvent::Added(DeviceInformation {
            id: DeviceId::new(id.as_str()),
            name: name.clone(),
            kind: DeviceInformationKind::DeviceInterface,
            is_enabled: Some(true),
            is_default: false,
            properties,
        }));
    }

    *known = current;
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(id: &str, name: &str) -> PortInfo {
        PortInfo {
            id: id.to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_diff_reports_added_and_removed() {
        let mut known = HashMap::new();

        let first = diff_ports(&mut known, vec![port("p1", "WIDI Master"), port("p2", "Keys")]);
        let second = diff_ports(&mut known, vec![port("p2", "Keys")]);
        let third = diff_ports(&mut known, vec![port("p2", "Keys")]);

        assert_eq!(first.len(), 2);
        assert_eq!(second, vec![WatchEvent::Removed(DeviceId::from("p1"))]);
        assert!(third.is_empty());
    }

    #[test]
    fn test_added_port_carries_synthesized_container() {
        let mut known = HashMap::new();

        let events = diff_ports(&mut known, vec![port("p1", "WIDI Master")]);

        let WatchEvent::Added(info) = &events[0] else {
            panic!("expected Added");
        };
        assert_eq!(
            info.properties.get_container(MIDI_CONTAINER_ID),
            ContainerId::from_device_name("WIDI Master")
        );
    }
}
