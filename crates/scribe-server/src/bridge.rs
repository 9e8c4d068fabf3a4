use std::sync::Arc;

use scribe_core::StatusEvent;
use tokio::sync::broadcast;

use crate::client::ClientRegistry;

/// Subscribes to the engine's status broadcast and forwards each event to
/// the WebSocket clients watching that job.
pub struct StatusBridge {
    registry: Arc<ClientRegistry>,
}

impl StatusBridge {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }

    /// Spawn the forwarding task. Lagging behind the broadcast drops the
    /// missed events; watchers recover from the next push or a snapshot.
    pub fn start(&self, mut rx: broadcast::Receiver<StatusEvent>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(&self.registry);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Ok(json) = serde_json::to_string(&event) {
                            registry.broadcast_to_job(event.job_id(), &json);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "status bridge lagged, dropped events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("status bridge channel closed");
                        break;
                    }
                }
            }
        })
    }
}

/// Create a bridge wired to a broadcast receiver.
pub fn create_bridge(
    registry: Arc<ClientRegistry>,
    rx: broadcast::Receiver<StatusEvent>,
) -> tokio::task::JoinHandle<()> {
    StatusBridge::new(registry).start(rx)
}
