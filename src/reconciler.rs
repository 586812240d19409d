//! Polling reconciler
//!
//! Each tick opens a MIDI transport for every enabled, correlated MIDI device
//! that has none yet. Transports are never closed here; closing is the GATT
//! teardown's job. Opening is level-triggered, closing is edge-triggered.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::device::DeviceStore;
use crate::midi::MidiPortManager;
use crate::task::TaskHandle;

/// Outcome of a single tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub attempted: usize,
    pub opened: usize,
    pub failed: usize,
}

pub struct Reconciler {
    store: Arc<DeviceStore>,
    ports: Arc<MidiPortManager>,
    interval: Duration,
}

impl Reconciler {
    pub fn new(store: Arc<DeviceStore>, ports: Arc<MidiPortManager>, interval: Duration) -> Self {
        Self {
            store,
            ports,
            interval,
        }
    }

    /// Run one reconciliation pass
    ///
    /// Candidates are claimed under the device-table lock; the opens run
    /// concurrently with the lock released, and each result is accepted only
    /// if no teardown touched its container in the meantime.
    pub async fn tick(&self) -> TickReport {
        let candidates = self.store.with(|t| t.claim_open_candidates());
        if candidates.is_empty() {
            return TickReport::default();
        }

        debug!("Reconciler opening {} MIDI transport(s)", candidates.len());

        let results = join_all(candidates.iter().map(|c| {
            self.ports
                .open_device(&c.container_id, &c.device_id, &c.name)
        }))
        .await;

        let mut report = TickReport {
            attempted: candidates.len(),
            ..Default::default()
        };

        for (candidate, result) in candidates.iter().zip(results) {
            let transport = match result {
                Ok(transport) => Some(transport),
                Err(e) => {
                    warn!("MIDI open for {} failed: {}", candidate.container_id, e);
                    report.failed += 1;
                    None
                }
            };
            let opened = transport.is_some();

            let rejected = self.store.with(|t| t.finish_open(candidate, transport));
            match rejected {
                Some(mut transport) => {
                    debug!(
                        "Discarding MIDI transport for {}: torn down while opening",
                        candidate.container_id
                    );
                    transport.close();
                }
                None if opened => report.opened += 1,
                None => {}
            }
        }

        report
    }

    /// Run [`tick`](Self::tick) on a fixed period until shut down
    pub fn spawn(self: Arc<Self>) -> TaskHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            info!("Reconciler started (every {:?})", self.interval);
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        info!("Reconciler stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        let report = self.tick().await;
                        if report.attempted > 0 {
                            debug!(
                                "Reconcile tick: {} attempted, {} opened, {} failed",
                                report.attempted, report.opened, report.failed
                            );
                        }
                    }
                }
            }
        });

        TaskHandle::new("reconciler", handle, shutdown_tx)
    }
}
