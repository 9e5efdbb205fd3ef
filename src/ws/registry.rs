use std::collections::HashMap;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::Envelope;
use crate::ws::persistence::PersistenceHandle;

/// What the registry keeps for one connected session
#[derive(Debug)]
pub struct SessionHandle {
    pub id: Uuid,
    pub room_id: String,
    pub outbound: mpsc::Sender<String>,
}

/// Where a broadcast came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Read from a session of this process
    Local,
    /// Replayed from another process through the bus
    Remote,
}

#[derive(Debug, Clone)]
pub struct Broadcast {
    pub envelope: Envelope,
    /// Session that produced the envelope; it is not sent its own edit back
    pub sender: Option<Uuid>,
    pub origin: Origin,
}

impl Broadcast {
    /// An edit read from `sender`. Every other member of the room receives it;
    /// the sender does not get its own edit echoed back.
    pub fn local(envelope: Envelope, sender: Uuid) -> Self {
        Self {
            envelope,
            sender: Some(sender),
            origin: Origin::Local,
        }
    }

    pub fn remote(envelope: Envelope) -> Self {
        Self {
            envelope,
            sender: None,
            origin: Origin::Remote,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub rooms: usize,
    pub sessions: usize,
}

/// Inbox of the registry loop. Cheap to clone.
#[derive(Clone)]
pub struct RegistryHandle {
    register_tx: mpsc::Sender<SessionHandle>,
    unregister_tx: mpsc::Sender<(String, Uuid)>,
    broadcast_tx: mpsc::Sender<Broadcast>,
    stats_tx: mpsc::Sender<oneshot::Sender<RegistryStats>>,
}

impl RegistryHandle {
    /// Add a session to its room. Returns false when the registry has stopped.
    pub async fn join(&self, session: SessionHandle) -> bool {
        self.register_tx.send(session).await.is_ok()
    }

    /// Remove a session from its room. Safe to call more than once.
    pub async fn leave(&self, room_id: &str, session_id: Uuid) {
        let _ = self
            .unregister_tx
            .send((room_id.to_string(), session_id))
            .await;
    }

    pub async fn broadcast(&self, broadcast: Broadcast) -> bool {
        self.broadcast_tx.send(broadcast).await.is_ok()
    }

    pub async fn stats(&self) -> Option<RegistryStats> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.stats_tx.send(reply_tx).await.ok()?;
        reply_rx.await.ok()
    }
}

/// Owns room membership. All mutation of `rooms` happens inside `run`.
pub struct ConnectionRegistry {
    rooms: HashMap<String, HashMap<Uuid, mpsc::Sender<String>>>,
    register_rx: mpsc::Receiver<SessionHandle>,
    unregister_rx: mpsc::Receiver<(String, Uuid)>,
    broadcast_rx: mpsc::Receiver<Broadcast>,
    stats_rx: mpsc::Receiver<oneshot::Sender<RegistryStats>>,
    persistence: PersistenceHandle,
    persist_remote: bool,
}

impl ConnectionRegistry {
    pub fn new(
        persistence: PersistenceHandle,
        capacity: usize,
        persist_remote: bool,
    ) -> (Self, RegistryHandle) {
        let capacity = capacity.max(1);
        let (register_tx, register_rx) = mpsc::channel(capacity);
        let (unregister_tx, unregister_rx) = mpsc::channel(capacity);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(capacity);
        let (stats_tx, stats_rx) = mpsc::channel(16);
        let registry = Self {
            rooms: HashMap::new(),
            register_rx,
            unregister_rx,
            broadcast_rx,
            stats_rx,
            persistence,
            persist_remote,
        };
        let handle = RegistryHandle {
            register_tx,
            unregister_tx,
            broadcast_tx,
            stats_tx,
        };
        (registry, handle)
    }

    pub async fn run(mut self) {
        info!("Connection registry started");
        loop {
            // Membership changes first, so a stats reply reflects everything sent before it
            tokio::select! {
                biased;
                Some(session) = self.register_rx.recv() => self.join(session),
                Some((room_id, session_id)) = self.unregister_rx.recv() => self.leave(&room_id, session_id),
                Some(broadcast) = self.broadcast_rx.recv() => self.broadcast(broadcast),
                Some(reply) = self.stats_rx.recv() => {
                    let _ = reply.send(self.stats());
                }
                else => break,
            }
        }
        info!("Connection registry stopped");
    }

    fn join(&mut self, session: SessionHandle) {
        debug!("Session {} joined room {}", session.id, session.room_id);
        self.rooms
            .entry(session.room_id)
            .or_default()
            .insert(session.id, session.outbound);
    }

    fn leave(&mut self, room_id: &str, session_id: Uuid) {
        let Some(members) = self.rooms.get_mut(room_id) else {
            return;
        };
        // Dropping the sender closes the session's outbound queue
        if members.remove(&session_id).is_some() {
            debug!("Session {} left room {}", session_id, room_id);
        }
        if members.is_empty() {
            self.rooms.remove(room_id);
        }
    }

    fn broadcast(&mut self, broadcast: Broadcast) {
        let Broadcast {
            envelope,
            sender,
            origin,
        } = broadcast;

        if let Some(members) = self.rooms.get_mut(&envelope.room_id) {
            let mut evicted = Vec::new();
            for (session_id, outbound) in members.iter() {
                if sender == Some(*session_id) {
                    continue;
                }
                match outbound.try_send(envelope.content.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!(
                            "Outbound queue full for session {} in room {}, disconnecting",
                            session_id, envelope.room_id
                        );
                        evicted.push(*session_id);
                    }
                    Err(TrySendError::Closed(_)) => evicted.push(*session_id),
                }
            }
            for session_id in evicted {
                members.remove(&session_id);
            }
            if members.is_empty() {
                self.rooms.remove(&envelope.room_id);
            }
        }

        if origin == Origin::Remote && !self.persist_remote {
            return;
        }
        let room_id = envelope.room_id.clone();
        match self.persistence.try_submit(envelope) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(
                    "Save queue full, dropping write for room {} to protect performance",
                    room_id
                );
            }
            Err(TrySendError::Closed(_)) => {
                error!("Persistence coordinator is gone, write for room {} lost", room_id);
            }
        }
    }

    fn stats(&self) -> RegistryStats {
        RegistryStats {
            rooms: self.rooms.len(),
            sessions: self.rooms.values().map(HashMap::len).sum(),
        }
    }
}
