use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::models::{Action, Envelope};
use crate::services::StorageGateway;

/// Sending side of the persistence coordinator
#[derive(Clone)]
pub struct PersistenceHandle {
    submit_tx: mpsc::Sender<Envelope>,
    flush_tx: mpsc::Sender<oneshot::Sender<usize>>,
    pending: watch::Receiver<usize>,
}

impl PersistenceHandle {
    /// Offer an envelope without waiting. Fails when the queue is full.
    pub fn try_submit(&self, envelope: Envelope) -> Result<(), TrySendError<Envelope>> {
        self.submit_tx.try_send(envelope)
    }

    /// Flush every pending write now. Returns how many entries are still pending
    /// afterwards, or `None` when the coordinator is gone.
    pub async fn flush_now(&self) -> Option<usize> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.flush_tx.send(reply_tx).await.ok()?;
        reply_rx.await.ok()
    }

    /// Rooms currently waiting for the next flush
    pub fn pending_len(&self) -> usize {
        *self.pending.borrow()
    }

    /// A handle whose submissions land in the returned receiver
    #[cfg(test)]
    pub fn detached(capacity: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (submit_tx, submit_rx) = mpsc::channel(capacity);
        let (flush_tx, _) = mpsc::channel(1);
        let (_, pending) = watch::channel(0);
        let handle = Self {
            submit_tx,
            flush_tx,
            pending,
        };
        (handle, submit_rx)
    }
}

/// Debounces room writes. Owns the pending map; every write it issues happens
/// inside `run`, one at a time.
pub struct PersistenceCoordinator {
    gateway: Arc<StorageGateway>,
    submit_rx: mpsc::Receiver<Envelope>,
    flush_rx: mpsc::Receiver<oneshot::Sender<usize>>,
    pending_tx: watch::Sender<usize>,
    pending: HashMap<String, String>,
    flush_interval: Duration,
}

impl PersistenceCoordinator {
    pub fn new(
        gateway: Arc<StorageGateway>,
        capacity: usize,
        flush_interval: Duration,
    ) -> (Self, PersistenceHandle) {
        let (submit_tx, submit_rx) = mpsc::channel(capacity.max(1));
        let (flush_tx, flush_rx) = mpsc::channel(8);
        let (pending_tx, pending_rx) = watch::channel(0);
        let coordinator = Self {
            gateway,
            submit_rx,
            flush_rx,
            pending_tx,
            pending: HashMap::new(),
            flush_interval,
        };
        let handle = PersistenceHandle {
            submit_tx,
            flush_tx,
            pending: pending_rx,
        };
        (coordinator, handle)
    }

    pub async fn run(mut self) {
        info!(
            "Persistence coordinator started (flush every {:?})",
            self.flush_interval
        );
        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.flush_interval, self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                submitted = self.submit_rx.recv() => match submitted {
                    Some(envelope) => self.apply(envelope).await,
                    None => break,
                },
                Some(reply) = self.flush_rx.recv() => {
                    // Whatever was queued before the request belongs to this flush
                    while let Ok(envelope) = self.submit_rx.try_recv() {
                        self.apply(envelope).await;
                    }
                    self.flush().await;
                    let _ = reply.send(self.pending.len());
                }
                _ = ticker.tick() => self.flush().await,
            }
        }

        // All producers are gone; write what is left before stopping
        self.flush().await;
        info!(
            "Persistence coordinator stopped ({} writes left pending)",
            self.pending.len()
        );
    }

    async fn apply(&mut self, envelope: Envelope) {
        debug!("Persist {:?} for room {}", envelope.action, envelope.room_id);
        match envelope.action {
            Action::Clear => {
                // Drop the pending entry so a later flush cannot bring the room back
                self.pending.remove(&envelope.room_id);
                match self.gateway.delete(&envelope.room_id).await {
                    Ok(()) => info!("Room {} cleared from DB", envelope.room_id),
                    Err(e) => error!("Error deleting room {}: {}", envelope.room_id, e),
                }
            }
            Action::Save => {
                self.pending.remove(&envelope.room_id);
                if let Err(e) = self
                    .gateway
                    .write(&envelope.room_id, &envelope.content)
                    .await
                {
                    error!("Error forced-saving room {}: {}", envelope.room_id, e);
                }
            }
            Action::Update => {
                self.pending.insert(envelope.room_id, envelope.content);
            }
        }
        self.publish_pending();
    }

    async fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.pending);
        let total = batch.len();
        for (room_id, content) in batch {
            if let Err(e) = self.gateway.write(&room_id, &content).await {
                // Left in place; the next tick tries again
                error!("Debounced save error for {}: {}", room_id, e);
                self.pending.insert(room_id, content);
            }
        }
        debug!(
            "Flushed {} of {} pending rooms",
            total - self.pending.len(),
            total
        );
        self.publish_pending();
    }

    fn publish_pending(&self) {
        self.pending_tx.send_replace(self.pending.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ContentStore;
    use crate::services::storage_gateway::tests::memory_gateway;
    use std::sync::atomic::Ordering;

    fn clear(room_id: &str) -> Envelope {
        Envelope {
            room_id: room_id.to_string(),
            content: String::new(),
            action: Action::Clear,
        }
    }

    fn save(room_id: &str, content: &str) -> Envelope {
        Envelope {
            room_id: room_id.to_string(),
            content: content.to_string(),
            action: Action::Save,
        }
    }

    #[tokio::test]
    async fn updates_coalesce_into_last_write() {
        let (gateway, store, _) = memory_gateway();
        let (mut coordinator, handle) =
            PersistenceCoordinator::new(gateway, 16, Duration::from_secs(10));

        coordinator.apply(Envelope::update("abc", "h")).await;
        coordinator.apply(Envelope::update("abc", "he")).await;
        coordinator.apply(Envelope::update("abc", "hello")).await;
        assert_eq!(handle.pending_len(), 1);
        assert_eq!(store.inner.fetch("abc").await.unwrap(), None);

        coordinator.flush().await;
        assert_eq!(handle.pending_len(), 0);
        assert_eq!(store.inner.fetch("abc").await.unwrap().as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn save_writes_immediately_and_cancels_pending() {
        let (gateway, store, _) = memory_gateway();
        let (mut coordinator, _handle) =
            PersistenceCoordinator::new(gateway, 16, Duration::from_secs(10));

        coordinator.apply(Envelope::update("abc", "draft")).await;
        coordinator.apply(save("abc", "final")).await;
        assert!(coordinator.pending.is_empty());
        assert_eq!(store.inner.fetch("abc").await.unwrap().as_deref(), Some("final"));
    }

    #[tokio::test]
    async fn clear_is_not_undone_by_next_flush() {
        let (gateway, store, _) = memory_gateway();
        let (mut coordinator, _handle) =
            PersistenceCoordinator::new(gateway, 16, Duration::from_secs(10));

        store.inner.upsert("abc", "old").await.unwrap();
        coordinator.apply(Envelope::update("abc", "newer")).await;
        coordinator.apply(clear("abc")).await;
        assert_eq!(store.inner.fetch("abc").await.unwrap(), None);

        coordinator.flush().await;
        assert_eq!(store.inner.fetch("abc").await.unwrap(), None);
    }

    #[tokio::test]
    async fn failed_flush_is_retried_on_next_tick() {
        let (gateway, store, _) = memory_gateway();
        let (mut coordinator, handle) =
            PersistenceCoordinator::new(gateway, 16, Duration::from_secs(10));

        store.failing.store(true, Ordering::SeqCst);
        coordinator.apply(Envelope::update("abc", "hello")).await;
        coordinator.apply(Envelope::update("xyz", "world")).await;
        coordinator.flush().await;
        assert_eq!(handle.pending_len(), 2);

        store.failing.store(false, Ordering::SeqCst);
        coordinator.flush().await;
        assert_eq!(handle.pending_len(), 0);
        assert_eq!(store.inner.fetch("abc").await.unwrap().as_deref(), Some("hello"));
        assert_eq!(store.inner.fetch("xyz").await.unwrap().as_deref(), Some("world"));
    }

    #[tokio::test(start_paused = true)]
    async fn timer_flushes_after_debounce_window() {
        let (gateway, store, _) = memory_gateway();
        let (coordinator, handle) =
            PersistenceCoordinator::new(gateway, 16, Duration::from_secs(10));
        tokio::spawn(coordinator.run());

        handle.try_submit(Envelope::update("abc", "hello")).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(store.inner.fetch("abc").await.unwrap(), None);
        assert_eq!(handle.pending_len(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(store.inner.fetch("abc").await.unwrap().as_deref(), Some("hello"));
        assert_eq!(handle.pending_len(), 0);
    }

    #[tokio::test]
    async fn flush_now_and_full_queue() {
        let (gateway, store, _) = memory_gateway();
        let (coordinator, handle) =
            PersistenceCoordinator::new(gateway, 1, Duration::from_secs(3600));

        // Not running yet, so the single slot fills up
        handle.try_submit(Envelope::update("abc", "one")).unwrap();
        assert!(matches!(
            handle.try_submit(Envelope::update("abc", "two")),
            Err(TrySendError::Full(_))
        ));

        tokio::spawn(coordinator.run());
        assert_eq!(handle.flush_now().await, Some(0));
        assert_eq!(store.inner.fetch("abc").await.unwrap().as_deref(), Some("one"));
    }
}
