use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::Inbound;
use crate::ws::registry::{Broadcast, RegistryHandle, SessionHandle};
use crate::ws::relay::SyncRelay;

/// Largest inbound message accepted from a client
pub const MAX_MESSAGE_SIZE: usize = 50 * 1024;

/// A client that has not answered a ping within this window is dropped
const PONG_WAIT: Duration = Duration::from_secs(60);

/// Ping a little before the peer would time out
const PING_PERIOD: Duration = Duration::from_secs(54);

/// Upper bound for a single frame write
const WRITE_WAIT: Duration = Duration::from_secs(10);

/// One connected client in one room
pub struct Session {
    id: Uuid,
    room_id: String,
    registry: RegistryHandle,
    relay: Arc<SyncRelay>,
}

impl Session {
    pub fn new(room_id: String, registry: RegistryHandle, relay: Arc<SyncRelay>) -> Self {
        Self {
            id: Uuid::new_v4(),
            room_id,
            registry,
            relay,
        }
    }

    /// Register with the room, then pump frames until either side closes.
    ///
    /// `initial` is queued ahead of everything else, so the client sees the
    /// room's content before any broadcast. A broadcast racing with the read
    /// that produced `initial` may still be missed or seen twice.
    pub async fn run(self, socket: WebSocket, queue_capacity: usize, initial: Option<String>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(queue_capacity.max(1));
        if let Some(content) = initial {
            let _ = outbound_tx.try_send(content);
        }

        let joined = self
            .registry
            .join(SessionHandle {
                id: self.id,
                room_id: self.room_id.clone(),
                outbound: outbound_tx,
            })
            .await;
        if !joined {
            warn!("Registry unavailable, dropping session for room {}", self.room_id);
            return;
        }
        info!("Session {} connected to room {}", self.id, self.room_id);

        let (sink, stream) = socket.split();
        let mut writer = tokio::spawn(write_loop(sink, outbound_rx, self.id));
        let mut reader = tokio::spawn(read_loop(
            stream,
            self.id,
            self.room_id.clone(),
            self.registry.clone(),
            self.relay.clone(),
        ));

        // Whichever half stops first takes the other one down with it
        tokio::select! {
            _ = (&mut reader) => writer.abort(),
            _ = (&mut writer) => reader.abort(),
        };

        self.registry.leave(&self.room_id, self.id).await;
        info!("Session {} left room {}", self.id, self.room_id);
    }
}

async fn read_loop<S, E>(
    mut stream: S,
    session_id: Uuid,
    room_id: String,
    registry: RegistryHandle,
    relay: Arc<SyncRelay>,
) where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let mut deadline = Instant::now() + PONG_WAIT;
    loop {
        let message = match tokio::time::timeout_at(deadline, stream.next()).await {
            Err(_) => {
                info!("Session {} missed its heartbeat, closing", session_id);
                return;
            }
            Ok(None) => return,
            Ok(Some(Err(e))) => {
                debug!("Session {} read error: {}", session_id, e);
                return;
            }
            Ok(Some(Ok(message))) => message,
        };

        let frame = match message {
            Message::Text(text) => text,
            Message::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Message::Pong(_) => {
                deadline = Instant::now() + PONG_WAIT;
                continue;
            }
            Message::Ping(_) => continue,
            Message::Close(_) => return,
        };

        let envelope = Inbound::decode(&frame).into_envelope(&room_id);
        debug!(
            "Session {} sent {:?} for room {} ({} bytes)",
            session_id,
            envelope.action,
            envelope.room_id,
            envelope.content.len()
        );

        if !registry
            .broadcast(Broadcast::local(envelope.clone(), session_id))
            .await
        {
            return;
        }
        relay.publish(&envelope).await;
    }
}

async fn write_loop<S>(mut sink: S, mut outbound_rx: mpsc::Receiver<String>, session_id: Uuid)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + PING_PERIOD, PING_PERIOD);
    loop {
        tokio::select! {
            next = outbound_rx.recv() => match next {
                Some(content) => {
                    if !send_frame(&mut sink, Message::Text(content), session_id).await {
                        return;
                    }
                }
                None => {
                    // The registry let go of us
                    send_frame(&mut sink, Message::Close(None), session_id).await;
                    return;
                }
            },
            _ = ticker.tick() => {
                if !send_frame(&mut sink, Message::Ping(Vec::new()), session_id).await {
                    return;
                }
            }
        }
    }
}

async fn send_frame<S>(sink: &mut S, message: Message, session_id: Uuid) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    match tokio::time::timeout(WRITE_WAIT, sink.send(message)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!("Session {} write error: {}", session_id, e);
            false
        }
        Err(_) => {
            warn!("Session {} write timed out", session_id);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::persistence::PersistenceHandle;
    use crate::ws::registry::ConnectionRegistry;
    use crate::ws::relay::LocalBus;
    use futures_util::{sink, stream};
    use std::io;

    /// Sink that records every frame the writer emits
    fn recording_sink(
        frames: mpsc::UnboundedSender<Message>,
    ) -> impl Sink<Message, Error = io::Error> + Unpin {
        Box::pin(sink::unfold(
            frames,
            |frames, message: Message| async move {
                frames
                    .send(message)
                    .map_err(|_| io::Error::other("frame recorder dropped"))?;
                Ok::<_, io::Error>(frames)
            },
        ))
    }

    #[test]
    fn heartbeat_fires_inside_the_idle_window() {
        assert!(PING_PERIOD < PONG_WAIT);
        assert_eq!(PING_PERIOD, PONG_WAIT * 9 / 10);
    }

    #[tokio::test(start_paused = true)]
    async fn writer_pings_on_schedule_and_closes_with_its_queue() {
        let (frames_tx, mut frames_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::channel(8);
        let started = Instant::now();
        let writer = tokio::spawn(write_loop(
            recording_sink(frames_tx),
            outbound_rx,
            Uuid::new_v4(),
        ));

        outbound_tx.send("hello".to_string()).await.unwrap();
        assert!(matches!(frames_rx.recv().await, Some(Message::Text(text)) if text == "hello"));

        tokio::time::sleep(PING_PERIOD - Duration::from_secs(1)).await;
        assert!(frames_rx.try_recv().is_err());
        assert!(matches!(frames_rx.recv().await, Some(Message::Ping(_))));
        assert!(started.elapsed() >= PING_PERIOD);

        // Eviction drops the queue's sender; the client is told to close
        drop(outbound_tx);
        assert!(matches!(frames_rx.recv().await, Some(Message::Close(_))));
        writer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn reader_stops_when_pongs_stop() {
        let (persistence, _persisted) = PersistenceHandle::detached(16);
        let (registry, handle) = ConnectionRegistry::new(persistence, 16, true);
        tokio::spawn(registry.run());
        let relay = Arc::new(SyncRelay::new(Arc::new(LocalBus::new(8)), Uuid::new_v4()));

        let (peer_tx, mut peer_rx) = mpsc::channel(8);
        assert!(
            handle
                .join(SessionHandle {
                    id: Uuid::new_v4(),
                    room_id: "abc".to_string(),
                    outbound: peer_tx,
                })
                .await
        );

        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<Result<Message, io::Error>>();
        let frames = stream::poll_fn(move |cx| inbound_rx.poll_recv(cx));
        let started = Instant::now();
        let reader = tokio::spawn(read_loop(
            frames,
            Uuid::new_v4(),
            "abc".to_string(),
            handle.clone(),
            relay,
        ));

        inbound_tx.send(Ok(Message::Text("hello".to_string()))).unwrap();
        assert_eq!(peer_rx.recv().await.as_deref(), Some("hello"));

        // A pong halfway through pushes the deadline out
        tokio::time::sleep(PONG_WAIT / 2).await;
        inbound_tx.send(Ok(Message::Pong(Vec::new()))).unwrap();
        tokio::time::sleep(PONG_WAIT * 3 / 4).await;
        assert!(!reader.is_finished());

        // Then silence: the reader gives up one window after the last pong
        reader.await.unwrap();
        assert!(started.elapsed() >= PONG_WAIT / 2 + PONG_WAIT);
    }
}
