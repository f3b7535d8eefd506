//! Document model: snapshots, edit events, and display profiles.
//!
//! A [`DocumentSnapshot`] is the last known *persisted* state of a
//! document. The sync core replaces it wholesale whenever an update is
//! accepted; it is never mutated in place. An [`EditEvent`] is one change
//! attempt — local or remote — constructed at the point of intent and
//! discarded after processing.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies a document across all collaborators.
pub type DocumentId = Uuid;

/// Identifies a user across all collaborators.
pub type UserId = Uuid;

/// Current wall-clock time as epoch milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Last known persisted state of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub id: DocumentId,
    pub title: String,
    pub content: String,
    pub owner_id: UserId,
    /// Whether the document has been shared with collaborators.
    pub is_shared: bool,
    /// Server-side last-modified time, epoch milliseconds.
    pub updated_at_ms: u64,
}

/// What kind of change an [`EditEvent`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EditKind {
    /// First save of a brand-new document.
    Create,
    /// Content update to an existing document.
    Update,
}

/// One change attempt, local or remote. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditEvent {
    pub document_id: DocumentId,
    pub user_id: UserId,
    pub content: String,
    pub kind: EditKind,
    pub timestamp_ms: u64,
}

impl EditEvent {
    /// Construct an edit event stamped with the current time.
    pub fn new(
        document_id: DocumentId,
        user_id: UserId,
        content: impl Into<String>,
        kind: EditKind,
    ) -> Self {
        Self {
            document_id,
            user_id,
            content: content.into(),
            kind,
            timestamp_ms: now_ms(),
        }
    }
}

/// Display identity of a user, for presence lists and attribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
}

impl UserProfile {
    pub fn new(id: UserId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
        }
    }
}

/// A named checkpoint of document content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub id: Uuid,
    pub document_id: DocumentId,
    pub user_id: UserId,
    pub label: String,
    pub content: String,
    pub created_at_ms: u64,
}
