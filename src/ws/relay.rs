use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::StoreError;
use crate::models::Envelope;
use crate::ws::registry::{Broadcast, RegistryHandle};

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(2);

/// Publish/subscribe channel shared by every process
#[async_trait]
pub trait SyncBus: Send + Sync {
    async fn publish(&self, payload: String) -> Result<(), StoreError>;

    async fn subscribe(&self) -> Result<BoxStream<'static, String>, StoreError>;
}

/// Bus confined to one process
pub struct LocalBus {
    tx: broadcast::Sender<String>,
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }
}

#[async_trait]
impl SyncBus for LocalBus {
    async fn publish(&self, payload: String) -> Result<(), StoreError> {
        // No subscriber yet is not an error
        let _ = self.tx.send(payload);
        Ok(())
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, String>, StoreError> {
        let rx = self.tx.subscribe();
        let stream = stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => return Some((payload, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Local bus subscriber lagged, skipped {} messages", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed();
        Ok(stream)
    }
}

/// Bus payload: the envelope plus the process that published it
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    #[serde(default)]
    pub origin: Option<Uuid>,
    #[serde(flatten)]
    pub envelope: Envelope,
}

/// Mirrors room traffic between processes
pub struct SyncRelay {
    bus: Arc<dyn SyncBus>,
    instance_id: Uuid,
}

impl SyncRelay {
    pub fn new(bus: Arc<dyn SyncBus>, instance_id: Uuid) -> Self {
        Self { bus, instance_id }
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Publish a locally received envelope. Failures are logged only.
    pub async fn publish(&self, envelope: &Envelope) {
        let message = BusMessage {
            origin: Some(self.instance_id),
            envelope: envelope.clone(),
        };
        let payload = match serde_json::to_string(&message) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode bus message for room {}: {}", envelope.room_id, e);
                return;
            }
        };
        if let Err(e) = self.bus.publish(payload).await {
            error!("Failed to publish room {} to bus: {}", envelope.room_id, e);
        }
    }

    /// Decode a bus payload, skipping our own publications
    fn accept(&self, payload: &str) -> Option<Envelope> {
        match serde_json::from_str::<BusMessage>(payload) {
            Ok(message) if message.origin == Some(self.instance_id) => None,
            Ok(message) => Some(message.envelope),
            Err(e) => {
                error!("Error unmarshaling bus message: {}", e);
                None
            }
        }
    }

    /// Feed remote envelopes into the local registry until it stops.
    /// Never publishes.
    pub fn spawn_listener(self: Arc<Self>, registry: RegistryHandle) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let mut messages = match self.bus.subscribe().await {
                    Ok(messages) => messages,
                    Err(e) => {
                        error!("Bus subscription failed: {}", e);
                        tokio::time::sleep(RESUBSCRIBE_DELAY).await;
                        continue;
                    }
                };
                info!("Listening for bus messages (instance {})", self.instance_id);

                while let Some(payload) = messages.next().await {
                    let Some(envelope) = self.accept(&payload) else {
                        continue;
                    };
                    debug!("Remote message for room {}", envelope.room_id);
                    if !registry.broadcast(Broadcast::remote(envelope)).await {
                        info!("Registry stopped, bus listener exiting");
                        return;
                    }
                }

                warn!("Bus subscription ended, resubscribing");
                tokio::time::sleep(RESUBSCRIBE_DELAY).await;
            }
        })
    }
}
