//! Change channel adapter: the low-latency push channel.
//!
//! Wraps a bidirectional WebSocket with connect/reconnect, a
//! fire-and-forget send, and a single-consumer event stream. No business
//! logic lives here — reconciliation decides what inbound changes mean,
//! and the session decides what to do when liveness drops.
//!
//! `send` is advisory only: no acknowledgement, no retry, no offline
//! queue. The durable path for local edits is the persistence commit;
//! the channel just shaves latency off peer notification. When the
//! socket is down an outbound broadcast is silently skipped.
//!
//! Reference: Kleppmann, Chapter 5 — Replication

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use coscribe_core::{DocumentId, EditEvent, UserId};

use crate::protocol::{ChangeEnvelope, MessageKind, PeerInfo, WireMessage};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events produced by the channel for the session to consume.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// Connection established (or re-established).
    Connected,
    /// Connection lost; the session falls back to pull refresh.
    Disconnected,
    /// A persisted change arrived. Self echoes are NOT filtered out —
    /// the reconciliation engine classifies them.
    Change(ChangeEnvelope),
    /// A peer joined the document.
    PeerJoined(PeerInfo),
    /// A peer left the document.
    PeerLeft(UserId),
}

/// Channel errors. Loss of connectivity is a degraded-mode signal, not
/// a failure of the core — editing and manual save keep working.
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    #[error("failed to connect: {0}")]
    Connect(String),
    #[error("channel is not connected")]
    NotConnected,
}

/// A bidirectional push channel for one document.
#[async_trait]
pub trait ChangeChannel: Send + Sync {
    /// Establish (or re-establish) the connection and restart the event
    /// stream. Safe to call again after a drop.
    async fn connect(&self, document_id: DocumentId) -> Result<(), ChannelError>;

    /// Best-effort outbound broadcast. Never fails; skipped when the
    /// channel is down.
    fn send(&self, event: &EditEvent);

    /// Announce departure and stop sending. Best effort.
    fn disconnect(&self);

    /// Whether the push channel is currently connected.
    fn is_live(&self) -> bool;

    /// Take the inbound event stream. Single consumer; returns `None`
    /// after the first call.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ChannelEvent>>;
}

/// WebSocket implementation of [`ChangeChannel`].
pub struct WsChannel {
    local: PeerInfo,
    server_url: String,
    live: Arc<AtomicBool>,
    state: Arc<Mutex<ConnectionState>>,
    document_id: Mutex<Option<DocumentId>>,
    outgoing_tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    event_tx: mpsc::UnboundedSender<ChannelEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<ChannelEvent>>>,
}

impl WsChannel {
    pub fn new(local: PeerInfo, server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            local,
            server_url: server_url.into(),
            live: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            document_id: Mutex::new(None),
            outgoing_tx: Mutex::new(None),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.lock().expect("state lock poisoned")
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().expect("state lock poisoned") = state;
        self.live
            .store(state == ConnectionState::Connected, Ordering::SeqCst);
    }

    fn queue_raw(&self, bytes: Vec<u8>) -> bool {
        let guard = self.outgoing_tx.lock().expect("outgoing lock poisoned");
        match guard.as_ref() {
            Some(tx) => tx.send(bytes).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl ChangeChannel for WsChannel {
    async fn connect(&self, document_id: DocumentId) -> Result<(), ChannelError> {
        self.set_state(ConnectionState::Connecting);
        *self.document_id.lock().expect("doc lock poisoned") = Some(document_id);

        let url = format!("{}/{}", self.server_url, document_id);
        let (ws_stream, _) = tokio_tungstenite::connect_async(&url).await.map_err(|e| {
            self.set_state(ConnectionState::Disconnected);
            ChannelError::Connect(e.to_string())
        })?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward the outgoing queue onto the socket.
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let pong_tx = out_tx.clone();
        *self.outgoing_tx.lock().expect("outgoing lock poisoned") = Some(out_tx);
        tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                if ws_writer.send(Message::Binary(data.into())).await.is_err() {
                    break;
                }
            }
        });

        // Announce ourselves before anything else.
        if let Ok(join) = WireMessage::join(document_id, &self.local) {
            if let Ok(encoded) = join.encode() {
                self.queue_raw(encoded);
            }
        }

        self.set_state(ConnectionState::Connected);
        let _ = self.event_tx.send(ChannelEvent::Connected);
        log::info!("channel connected for document {document_id}");

        // Reader task: decode inbound frames into channel events.
        let event_tx = self.event_tx.clone();
        let live = self.live.clone();
        let state = self.state.clone();
        let local_id = self.local.user_id;
        tokio::spawn(async move {
            while let Some(frame) = ws_reader.next().await {
                match frame {
                    Ok(Message::Binary(data)) => {
                        let Ok(msg) = WireMessage::decode(&data) else {
                            log::warn!("dropping undecodable channel frame");
                            continue;
                        };
                        let event = match msg.kind {
                            MessageKind::Change => msg.envelope().ok().map(ChannelEvent::Change),
                            MessageKind::Join => msg.peer_info().ok().map(ChannelEvent::PeerJoined),
                            MessageKind::Leave => Some(ChannelEvent::PeerLeft(msg.sender)),
                            MessageKind::Ping => {
                                // Heartbeat is answered, not surfaced.
                                if let Ok(encoded) = WireMessage::pong(local_id).encode() {
                                    let _ = pong_tx.send(encoded);
                                }
                                None
                            }
                            MessageKind::Edit | MessageKind::Pong => None,
                        };
                        if let Some(event) = event {
                            let _ = event_tx.send(event);
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            live.store(false, Ordering::SeqCst);
            *state.lock().expect("state lock poisoned") = ConnectionState::Disconnected;
            let _ = event_tx.send(ChannelEvent::Disconnected);
        });

        Ok(())
    }

    fn send(&self, event: &EditEvent) {
        if !self.is_live() {
            log::debug!("channel down, skipping broadcast");
            return;
        }
        match WireMessage::edit(event).and_then(|m| m.encode()) {
            Ok(encoded) => {
                if !self.queue_raw(encoded) {
                    log::debug!("writer gone, skipping broadcast");
                }
            }
            Err(e) => log::warn!("failed to encode outbound edit: {e}"),
        }
    }

    fn disconnect(&self) {
        let document_id = *self.document_id.lock().expect("doc lock poisoned");
        if let Some(document_id) = document_id {
            if let Ok(encoded) = WireMessage::leave(document_id, self.local.user_id).encode() {
                self.queue_raw(encoded);
            }
        }
        // Dropping the sender ends the writer task.
        *self.outgoing_tx.lock().expect("outgoing lock poisoned") = None;
        self.set_state(ConnectionState::Disconnected);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ChannelEvent>> {
        self.event_rx.lock().expect("event lock poisoned").take()
    }
}
