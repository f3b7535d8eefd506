//! Binary protocol for document change notifications.
//!
//! Wire format (bincode-encoded):
//! ```text
//! ┌──────────┬───────────┬──────────┬──────────┐
//! │ kind     │ sender    │ doc_id   │ payload  │
//! │ 1 byte   │ 16 bytes  │ 16 bytes │ variable │
//! └──────────┴───────────┴──────────┴──────────┘
//! ```
//!
//! A `Change` payload carries the full [`ChangeEnvelope`]: the persisted
//! snapshot that resulted from a save plus the edit event that produced
//! it. Duplicate delivery is harmless — the reconciliation engine treats
//! an already-seen content as a no-op.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use coscribe_core::{DocumentId, DocumentSnapshot, EditEvent, UserId};

/// Message kinds carried on the push channel.
///
/// `Edit` flows client→server (a bare change attempt); `Change` flows
/// server→client (the accepted snapshot plus the edit that produced it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageKind {
    /// Outbound change attempt.
    Edit = 1,
    /// An accepted, persisted change: snapshot + originating edit.
    Change = 2,
    /// A user started viewing/editing the document.
    Join = 3,
    /// A user stopped viewing/editing the document.
    Leave = 4,
    /// Heartbeat ping.
    Ping = 5,
    /// Heartbeat pong.
    Pong = 6,
}

/// Peer identity announced on join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub user_id: UserId,
    pub username: String,
}

impl PeerInfo {
    pub fn new(user_id: UserId, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
        }
    }
}

/// What the server broadcasts after accepting an edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEnvelope {
    pub document: DocumentSnapshot,
    pub change: EditEvent,
}

/// Top-level protocol message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub kind: MessageKind,
    pub sender: UserId,
    pub document_id: DocumentId,
    /// Payload, varies by kind. Empty for Leave/Ping/Pong.
    pub payload: Vec<u8>,
}

impl WireMessage {
    /// Create a change notification.
    pub fn change(envelope: &ChangeEnvelope) -> Result<Self, ProtocolError> {
        let payload = bincode::serde::encode_to_vec(envelope, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        Ok(Self {
            kind: MessageKind::Change,
            sender: envelope.change.user_id,
            document_id: envelope.document.id,
            payload,
        })
    }

    /// Create an outbound edit broadcast. The server rebuilds the
    /// authoritative envelope around it after persisting.
    pub fn edit(event: &EditEvent) -> Result<Self, ProtocolError> {
        let payload = bincode::serde::encode_to_vec(event, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        Ok(Self {
            kind: MessageKind::Edit,
            sender: event.user_id,
            document_id: event.document_id,
            payload,
        })
    }

    /// Create a join announcement.
    pub fn join(document_id: DocumentId, info: &PeerInfo) -> Result<Self, ProtocolError> {
        let payload = bincode::serde::encode_to_vec(info, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        Ok(Self {
            kind: MessageKind::Join,
            sender: info.user_id,
            document_id,
            payload,
        })
    }

    /// Create a leave announcement.
    pub fn leave(document_id: DocumentId, user_id: UserId) -> Self {
        Self {
            kind: MessageKind::Leave,
            sender: user_id,
            document_id,
            payload: Vec::new(),
        }
    }

    /// Create a heartbeat ping.
    pub fn ping(user_id: UserId) -> Self {
        Self {
            kind: MessageKind::Ping,
            sender: user_id,
            document_id: Uuid::nil(),
            payload: Vec::new(),
        }
    }

    /// Create a heartbeat pong.
    pub fn pong(user_id: UserId) -> Self {
        Self {
            kind: MessageKind::Pong,
            sender: user_id,
            document_id: Uuid::nil(),
            payload: Vec::new(),
        }
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(msg)
    }

    /// Parse a change payload.
    pub fn envelope(&self) -> Result<ChangeEnvelope, ProtocolError> {
        if self.kind != MessageKind::Change {
            return Err(ProtocolError::InvalidKind);
        }
        let (envelope, _) =
            bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
                .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(envelope)
    }

    /// Parse an edit payload.
    pub fn edit_event(&self) -> Result<EditEvent, ProtocolError> {
        if self.kind != MessageKind::Edit {
            return Err(ProtocolError::InvalidKind);
        }
        let (event, _) =
            bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
                .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(event)
    }

    /// Parse a join payload.
    pub fn peer_info(&self) -> Result<PeerInfo, ProtocolError> {
        if self.kind != MessageKind::Join {
            return Err(ProtocolError::InvalidKind);
        }
        let (info, _) =
            bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
                .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(info)
    }
}

/// Protocol errors.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
    #[error("payload does not match message kind")]
    InvalidKind,
}

#[cfg(test)]
mod tests {
    use super::*;
    use coscribe_core::EditKind;

    fn sample_envelope() -> ChangeEnvelope {
        let doc_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        ChangeEnvelope {
            document: DocumentSnapshot {
                id: doc_id,
                title: "Notes".into(),
                content: "Hello".into(),
                owner_id: user_id,
                is_shared: true,
                updated_at_ms: 99,
            },
            change: EditEvent::new(doc_id, user_id, "Hello", EditKind::Update),
        }
    }

    #[test]
    fn test_change_roundtrip() {
        let envelope = sample_envelope();
        let msg = WireMessage::change(&envelope).unwrap();
        let decoded = WireMessage::decode(&msg.encode().unwrap()).unwrap();

        assert_eq!(decoded.kind, MessageKind::Change);
        assert_eq!(decoded.sender, envelope.change.user_id);
        assert_eq!(decoded.document_id, envelope.document.id);
        assert_eq!(decoded.envelope().unwrap(), envelope);
    }

    #[test]
    fn test_edit_roundtrip() {
        let event = EditEvent::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "draft text",
            EditKind::Update,
        );

        let msg = WireMessage::edit(&event).unwrap();
        let decoded = WireMessage::decode(&msg.encode().unwrap()).unwrap();

        assert_eq!(decoded.kind, MessageKind::Edit);
        assert_eq!(decoded.sender, event.user_id);
        assert_eq!(decoded.edit_event().unwrap(), event);
    }

    #[test]
    fn test_join_roundtrip() {
        let doc = Uuid::new_v4();
        let info = PeerInfo::new(Uuid::new_v4(), "alice");

        let msg = WireMessage::join(doc, &info).unwrap();
        let decoded = WireMessage::decode(&msg.encode().unwrap()).unwrap();

        assert_eq!(decoded.kind, MessageKind::Join);
        assert_eq!(decoded.peer_info().unwrap(), info);
    }

    #[test]
    fn test_leave_roundtrip() {
        let doc = Uuid::new_v4();
        let user = Uuid::new_v4();

        let msg = WireMessage::leave(doc, user);
        let decoded = WireMessage::decode(&msg.encode().unwrap()).unwrap();

        assert_eq!(decoded.kind, MessageKind::Leave);
        assert_eq!(decoded.sender, user);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_ping_pong() {
        let user = Uuid::new_v4();
        let ping = WireMessage::decode(&WireMessage::ping(user).encode().unwrap()).unwrap();
        let pong = WireMessage::decode(&WireMessage::pong(user).encode().unwrap()).unwrap();

        assert_eq!(ping.kind, MessageKind::Ping);
        assert_eq!(pong.kind, MessageKind::Pong);
        assert_eq!(ping.document_id, Uuid::nil());
    }

    #[test]
    fn test_kind_mismatch_errors() {
        let msg = WireMessage::ping(Uuid::new_v4());
        assert!(msg.envelope().is_err());
        assert!(msg.peer_info().is_err());
        assert!(msg.edit_event().is_err());
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(WireMessage::decode(&[0xFF, 0xFE, 0xFD]).is_err());
    }
}
