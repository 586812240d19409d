//! Handle for background tasks that support a graceful stop

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Handle for a spawned watch or reconcile loop
pub struct TaskHandle {
    name: &'static str,
    handle: JoinHandle<()>,
    shutdown_sender: oneshot::Sender<()>,
}

impl TaskHandle {
    pub fn new(name: &'static str, handle: JoinHandle<()>, shutdown_sender: oneshot::Sender<()>) -> Self {
        Self {
            name,
            handle,
            shutdown_sender,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Ask the task to stop and wait for it
    pub async fn shutdown(self) -> Result<(), tokio::task::JoinError> {
        let _ = self.shutdown_sender.send(());
        self.handle.await
    }
}
