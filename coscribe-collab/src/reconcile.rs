//! Reconciliation engine: merging remote changes with unsaved local edits.
//!
//! The engine owns the authoritative in-memory state for one open
//! document and decides, for every inbound change, whether to adopt it
//! silently, acknowledge it as the echo of our own save, or surface a
//! conflict for the user to resolve. It never merges text — conflicts
//! are resolved by last-writer attribution plus an explicit apply/ignore
//! choice.
//!
//! ## State machine
//!
//! ```text
//!              apply_local_edit           begin_commit
//! ┌────────┐ ───────────────────► ┌───────┐ ───────────► ┌────────┐
//! │ synced │                      │ dirty │              │ saving │
//! └────────┘ ◄─────────────────── └───┬───┘ ◄─────────── └────────┘
//!     ▲        complete_commit        │       fail_commit
//!     │                               │ foreign remote update
//!     │ resolve_conflict              ▼
//!     └─────────────────────── ┌──────────┐
//!                              │ conflict │
//!                              └──────────┘
//! ```
//!
//! Two invariants hold across every transition: `local_content ==
//! last_synced_content` exactly when no unsaved edits exist, and
//! `local_content` is never overwritten while a conflict is pending
//! except through `resolve_conflict(true)`.
//!
//! Reference: Kleppmann, Chapter 5 — Handling Write Conflicts

use thiserror::Error;

use coscribe_core::{DocumentId, DocumentSnapshot, DocumentStore, EditKind, UserId};

use crate::protocol::ChangeEnvelope;

/// Failure modes of a commit. Returned, never thrown; in every case the
/// local state is left unchanged so no work is lost.
#[derive(Debug, Clone, Error)]
pub enum SaveError {
    #[error("document content cannot be empty")]
    EmptyContent,
    #[error("a save is already in flight")]
    InFlight,
    #[error("failed to save document: {0}")]
    Persistence(String),
}

/// Derived per-session sync state. Not persisted anywhere.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationState {
    /// What the user's editor currently shows.
    pub local_content: String,
    /// The last content this client knows to be persisted.
    pub last_synced_content: String,
    /// Set while a foreign remote change awaits an apply/ignore decision.
    pub pending_conflict: Option<ConflictRecord>,
}

/// A remote change that diverged from unsaved local edits.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictRecord {
    pub incoming_content: String,
    pub author_user_id: UserId,
    pub is_self_originated: bool,
}

/// How an inbound remote update was classified.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteOutcome {
    /// Echo of content this client already has. No-op.
    Duplicate,
    /// No unsaved local edits; the remote content was adopted silently.
    Adopted,
    /// Echo of this client's own save, arriving after it typed further.
    /// The sync baseline advanced; local edits stay ahead of it.
    SelfAcknowledged,
    /// Foreign divergence against unsaved edits. Requires resolution.
    Conflict(ConflictRecord),
}

/// A validated commit: the content and kind captured at begin time.
#[derive(Debug, Clone)]
pub struct PendingCommit {
    pub document_id: DocumentId,
    pub content: String,
    pub kind: EditKind,
}

/// The reconciliation state machine for one open document.
pub struct ReconciliationEngine {
    current_user_id: UserId,
    document: Option<DocumentSnapshot>,
    state: ReconciliationState,
    /// Whether any content for this document has ever been persisted.
    /// A first commit against a never-persisted document is a `Create`.
    ever_persisted: bool,
    saving: bool,
}

impl ReconciliationEngine {
    pub fn new(current_user_id: UserId) -> Self {
        Self {
            current_user_id,
            document: None,
            state: ReconciliationState {
                local_content: String::new(),
                last_synced_content: String::new(),
                pending_conflict: None,
            },
            ever_persisted: false,
            saving: false,
        }
    }

    /// Seed the engine from the initial snapshot. Called once per
    /// session, before any local edit is accepted.
    pub fn load_initial(&mut self, snapshot: &DocumentSnapshot) {
        self.state.local_content = snapshot.content.clone();
        self.state.last_synced_content = snapshot.content.clone();
        self.ever_persisted = !snapshot.content.is_empty();
        self.document = Some(snapshot.clone());
    }

    /// Record a local edit. Always succeeds; debounce re-arming is the
    /// caller's side effect, not the engine's.
    pub fn apply_local_edit(&mut self, text: impl Into<String>) {
        self.state.local_content = text.into();
    }

    /// Validate and start a commit. The returned [`PendingCommit`]
    /// captures the content as of this call; edits made while the save
    /// is in flight stay local and are not part of it.
    pub fn begin_commit(&mut self) -> Result<PendingCommit, SaveError> {
        if self.saving {
            return Err(SaveError::InFlight);
        }
        if self.state.local_content.trim().is_empty() {
            return Err(SaveError::EmptyContent);
        }
        let document = self
            .document
            .as_ref()
            .ok_or_else(|| SaveError::Persistence("no document loaded".into()))?;

        self.saving = true;
        Ok(PendingCommit {
            document_id: document.id,
            content: self.state.local_content.clone(),
            kind: if self.ever_persisted {
                EditKind::Update
            } else {
                EditKind::Create
            },
        })
    }

    /// Finish a successful commit. `committed_content` must be the
    /// content captured by the matching [`Self::begin_commit`]; the sync
    /// baseline moves to it, not to the possibly-advanced local content.
    pub fn complete_commit(&mut self, snapshot: DocumentSnapshot, committed_content: &str) {
        self.saving = false;
        self.ever_persisted = true;
        self.state.last_synced_content = committed_content.to_owned();
        self.document = Some(snapshot);
    }

    /// Abandon a failed commit. State is otherwise unchanged so the
    /// user's edits survive and the next save attempt retries them.
    pub fn fail_commit(&mut self) {
        self.saving = false;
    }

    /// Persist the current local content through the store. Convenience
    /// composition of the three commit phases for callers that do not
    /// need the save to overlap other event processing.
    pub async fn commit_local_edit(
        &mut self,
        store: &dyn DocumentStore,
    ) -> Result<DocumentSnapshot, SaveError> {
        let pending = self.begin_commit()?;
        match store
            .edit_document(
                pending.document_id,
                self.current_user_id,
                &pending.content,
                pending.kind,
            )
            .await
        {
            Ok(snapshot) => {
                self.complete_commit(snapshot.clone(), &pending.content);
                Ok(snapshot)
            }
            Err(e) => {
                self.fail_commit();
                Err(SaveError::Persistence(e.to_string()))
            }
        }
    }

    /// Reconcile an inbound remote change against the current state.
    ///
    /// The envelope is evaluated against the state as it stands right
    /// now — an in-flight commit is not awaited, so the echo of that
    /// very commit classifies as self-originated (or, once the commit
    /// already advanced the baseline, as a duplicate).
    pub fn on_remote_update(&mut self, envelope: &ChangeEnvelope) -> RemoteOutcome {
        let incoming = &envelope.document.content;

        // Rule 1: echo of content we already have.
        if *incoming == self.state.last_synced_content {
            return RemoteOutcome::Duplicate;
        }

        // New persisted state: the snapshot is replaced wholesale even
        // when the content ends up in conflict.
        self.document = Some(envelope.document.clone());
        self.ever_persisted = true;

        // Rule 2: no unsaved local edits — adopt silently.
        if self.state.local_content == self.state.last_synced_content {
            self.state.local_content = incoming.clone();
            self.state.last_synced_content = incoming.clone();
            return RemoteOutcome::Adopted;
        }

        // Rule 3: local edits diverge from the sync baseline.
        if envelope.change.user_id == self.current_user_id {
            // Echo of our own save; local content is ahead of it.
            self.state.last_synced_content = incoming.clone();
            return RemoteOutcome::SelfAcknowledged;
        }

        let conflict = ConflictRecord {
            incoming_content: incoming.clone(),
            author_user_id: envelope.change.user_id,
            is_self_originated: false,
        };
        // A newer foreign change supersedes an unresolved conflict.
        self.state.pending_conflict = Some(conflict.clone());
        log::debug!(
            "conflict on document {}: foreign change by {}",
            envelope.document.id,
            envelope.change.user_id
        );
        RemoteOutcome::Conflict(conflict)
    }

    /// Resolve the pending conflict. Accepting adopts the incoming
    /// content as both local and synced; rejecting keeps the local edits
    /// (they win locally until the next save or remote update). Returns
    /// the resolved record, or `None` when no conflict was pending.
    pub fn resolve_conflict(&mut self, accept: bool) -> Option<ConflictRecord> {
        let conflict = self.state.pending_conflict.take()?;
        if accept {
            self.state.local_content = conflict.incoming_content.clone();
            self.state.last_synced_content = conflict.incoming_content.clone();
        }
        Some(conflict)
    }

    pub fn state(&self) -> &ReconciliationState {
        &self.state
    }

    pub fn snapshot(&self) -> Option<&DocumentSnapshot> {
        self.document.as_ref()
    }

    /// Whether unsaved local edits exist.
    pub fn is_dirty(&self) -> bool {
        self.state.local_content != self.state.last_synced_content
    }

    pub fn is_saving(&self) -> bool {
        self.saving
    }

    pub fn current_user_id(&self) -> UserId {
        self.current_user_id
    }
}
