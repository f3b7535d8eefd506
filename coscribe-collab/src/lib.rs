//! # coscribe-collab — Client-side synchronization core for Coscribe
//!
//! Reconciles local in-progress edits, debounced autosave and
//! asynchronously-arriving remote changes into one coherent document
//! state, without ever silently discarding unsaved work. Conflicts are
//! resolved by last-writer attribution plus an explicit apply/ignore
//! choice — there is no operational-transform or CRDT merging here.
//!
//! ## Architecture
//!
//! ```text
//! keystrokes ──► DocumentSession ──► ReconciliationEngine (local buffer)
//!                     │                      │
//!        ┌────────────┼──────────────┐       │ commit (debounced 2s)
//!        ▼            ▼              ▼       ▼
//!  PresenceTracker  DebounceTimers  ChangeChannel   DocumentStore
//!        ▲                           │  (600ms)          │
//!        │                           ▼                   │
//!        └────── inbound envelopes ◄─┴───────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — binary wire protocol (bincode-encoded [`protocol::WireMessage`])
//! - [`channel`] — push channel adapter with liveness and fire-and-forget send
//! - [`presence`] — membership set sourced from join/leave events
//! - [`reconcile`] — the reconciliation state machine
//! - [`autosave`] — restartable debounce timers and the autosave policy
//! - [`session`] — per-document controller wiring everything together

pub mod autosave;
pub mod channel;
pub mod presence;
pub mod protocol;
pub mod reconcile;
pub mod session;

#[cfg(test)]
mod support;

pub use autosave::{AutosavePolicy, DebounceTimer, AUTOSAVE_DELAY, BROADCAST_DELAY};
pub use channel::{ChangeChannel, ChannelError, ChannelEvent, ConnectionState, WsChannel};
pub use presence::{PresenceDelta, PresenceEntry, PresenceTracker};
pub use protocol::{ChangeEnvelope, MessageKind, PeerInfo, ProtocolError, WireMessage};
pub use reconcile::{
    ConflictRecord, PendingCommit, ReconciliationEngine, ReconciliationState, RemoteOutcome,
    SaveError,
};
pub use session::{DocumentSession, SessionConfig, SessionError, SessionEvent};
