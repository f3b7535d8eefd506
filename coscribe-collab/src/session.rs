//! Document session controller: one open document, wired end to end.
//!
//! The session owns the reconciliation engine, the presence tracker and
//! both debounce timers for a single document, and drives them from one
//! task draining one ordered command queue. Public handle methods and
//! timer callbacks only enqueue commands; channel events are merged into
//! the same loop. Every state transition therefore runs to completion
//! before the next event is looked at — no locking on the document
//! state, no interleaving.
//!
//! ```text
//! edit()/save()/resolve_conflict()     channel events
//!            │                              │
//!            ▼                              ▼
//!       ┌─────────────────────────────────────┐
//!       │        command queue (ordered)      │
//!       └──────────────────┬──────────────────┘
//!                          ▼
//!                    driver task ──► SessionEvent stream
//!                          │
//!            spawned store calls (commit, version, poll)
//!                          │
//!                          └──► results re-enter the queue
//! ```
//!
//! Store calls are spawned and report back into the queue, so local
//! edits and remote events are never blocked by an in-flight save.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use coscribe_core::{
    DocumentId, DocumentSnapshot, DocumentStore, EditEvent, EditKind, ProfileDirectory,
    UserProfile, VersionRecord,
};

use crate::autosave::{AutosavePolicy, DebounceTimer, AUTOSAVE_DELAY, BROADCAST_DELAY};
use crate::channel::{ChangeChannel, ChannelEvent};
use crate::presence::{PresenceEntry, PresenceTracker};
use crate::protocol::ChangeEnvelope;
use crate::reconcile::{ConflictRecord, ReconciliationEngine, ReconciliationState};

/// Session lifecycle errors.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// A document is already open on this controller. Caller error;
    /// the existing session is left intact.
    #[error("a document is already open on this session")]
    AlreadyOpen,
    /// No document is open (never opened, or closed).
    #[error("session is closed")]
    Closed,
    /// The initial snapshot fetch failed; nothing was opened.
    #[error("failed to load document: {0}")]
    DocumentLoad(String),
}

/// Timing knobs for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Quiet period after the last edit before autosave commits.
    pub autosave_delay: Duration,
    /// Quiet period after the last edit before the advisory broadcast.
    pub broadcast_delay: Duration,
    /// Pull-refresh cadence while the push channel is down.
    pub poll_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            autosave_delay: AUTOSAVE_DELAY,
            broadcast_delay: BROADCAST_DELAY,
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// Notifications surfaced to the presentation layer.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The reconciliation state changed; re-render from it.
    StateChanged(ReconciliationState),
    /// The persisted snapshot was replaced.
    SnapshotUpdated(DocumentSnapshot),
    /// A commit left for the store.
    SaveStarted,
    /// A commit succeeded.
    Saved(DocumentSnapshot),
    /// A commit (or version checkpoint) failed; local edits are intact.
    SaveFailed(String),
    /// A foreign change diverged from unsaved edits. `author` is filled
    /// from presence when known; otherwise a directory lookup may
    /// follow up with [`SessionEvent::ConflictAuthorResolved`].
    ConflictDetected {
        conflict: ConflictRecord,
        author: Option<UserProfile>,
    },
    /// Late attribution for the pending conflict.
    ConflictAuthorResolved(UserProfile),
    /// Membership of the document changed.
    Presence(Vec<PresenceEntry>),
    /// Push-channel liveness changed.
    ChannelLive(bool),
    /// A version checkpoint was recorded.
    VersionCreated(VersionRecord),
}

/// Everything the driver loop reacts to, in arrival order.
enum SessionCommand {
    Edit(String),
    Save,
    ResolveConflict(bool),
    SetAutosave(bool),
    CreateVersion(String),
    AutosaveTick,
    BroadcastTick,
    PollTick,
    CommitFinished {
        result: Result<DocumentSnapshot, String>,
        content: String,
    },
    VersionFinished(Result<VersionRecord, String>),
    AuthorResolved(UserProfile),
    PollFetched(Result<DocumentSnapshot, String>),
    Close,
}

struct ActiveSession {
    document_id: DocumentId,
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
    driver: JoinHandle<Option<mpsc::UnboundedReceiver<ChannelEvent>>>,
}

/// Controller for editing one document at a time.
pub struct DocumentSession {
    local_user: UserProfile,
    config: SessionConfig,
    store: Arc<dyn DocumentStore>,
    channel: Arc<dyn ChangeChannel>,
    directory: Arc<dyn ProfileDirectory>,
    /// Inbound channel events; parked here between opens.
    channel_rx: Option<mpsc::UnboundedReceiver<ChannelEvent>>,
    active: Option<ActiveSession>,
}

impl DocumentSession {
    pub fn new(
        local_user: UserProfile,
        store: Arc<dyn DocumentStore>,
        channel: Arc<dyn ChangeChannel>,
        directory: Arc<dyn ProfileDirectory>,
        config: SessionConfig,
    ) -> Self {
        let channel_rx = channel.take_events();
        Self {
            local_user,
            config,
            store,
            channel,
            directory,
            channel_rx,
            active: None,
        }
    }

    /// Open a document: fetch the initial snapshot, connect the push
    /// channel (failure degrades to pull refresh, it does not fail the
    /// open) and start the driver. Returns the session event stream.
    pub async fn open(
        &mut self,
        document_id: DocumentId,
    ) -> Result<mpsc::UnboundedReceiver<SessionEvent>, SessionError> {
        if self.active.is_some() {
            return Err(SessionError::AlreadyOpen);
        }

        let snapshot = self
            .store
            .get_document(document_id)
            .await
            .map_err(|e| SessionError::DocumentLoad(e.to_string()))?;

        let mut engine = ReconciliationEngine::new(self.local_user.id);
        engine.load_initial(&snapshot);

        if let Err(e) = self.channel.connect(document_id).await {
            log::warn!("push channel unavailable, falling back to polling: {e}");
        }

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            document_id,
            local_user: self.local_user.clone(),
            config: self.config.clone(),
            store: self.store.clone(),
            channel: self.channel.clone(),
            directory: self.directory.clone(),
            engine,
            presence: PresenceTracker::new(self.local_user.clone()),
            autosave: AutosavePolicy::with_delay(self.config.autosave_delay),
            autosave_timer: DebounceTimer::new(),
            broadcast_timer: DebounceTimer::new(),
            poll_timer: DebounceTimer::new(),
            cmd_tx: cmd_tx.clone(),
            cmd_rx,
            channel_rx: self.channel_rx.take(),
            event_tx,
        };
        let handle = tokio::spawn(driver.run());

        self.active = Some(ActiveSession {
            document_id,
            cmd_tx,
            driver: handle,
        });
        log::info!("opened document {document_id}");
        Ok(event_rx)
    }

    /// Close the open session: cancel timers, detach from the channel,
    /// stop the driver. An in-flight commit may still complete but its
    /// result is discarded. No-op when nothing is open.
    pub async fn close(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        let _ = active.cmd_tx.send(SessionCommand::Close);
        self.channel.disconnect();
        if let Ok(rx) = active.driver.await {
            self.channel_rx = rx;
        }
        log::info!("closed document {}", active.document_id);
    }

    pub fn is_open(&self) -> bool {
        self.active.is_some()
    }

    pub fn document_id(&self) -> Option<DocumentId> {
        self.active.as_ref().map(|a| a.document_id)
    }

    /// Record a local edit.
    pub fn edit(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.command(SessionCommand::Edit(text.into()))
    }

    /// Request an immediate save of the current local content.
    pub fn save(&self) -> Result<(), SessionError> {
        self.command(SessionCommand::Save)
    }

    /// Apply (`true`) or ignore (`false`) the pending conflict.
    pub fn resolve_conflict(&self, accept: bool) -> Result<(), SessionError> {
        self.command(SessionCommand::ResolveConflict(accept))
    }

    /// Enable or disable autosave. Disabling cancels any armed timer.
    pub fn set_autosave(&self, enabled: bool) -> Result<(), SessionError> {
        self.command(SessionCommand::SetAutosave(enabled))
    }

    /// Record a named checkpoint of the current local content.
    pub fn create_version(&self, label: impl Into<String>) -> Result<(), SessionError> {
        self.command(SessionCommand::CreateVersion(label.into()))
    }

    fn command(&self, cmd: SessionCommand) -> Result<(), SessionError> {
        let active = self.active.as_ref().ok_or(SessionError::Closed)?;
        active.cmd_tx.send(cmd).map_err(|_| SessionError::Closed)
    }
}

enum Wakeup {
    Command(Option<SessionCommand>),
    Channel(Option<ChannelEvent>),
}

struct Driver {
    document_id: DocumentId,
    local_user: UserProfile,
    config: SessionConfig,
    store: Arc<dyn DocumentStore>,
    channel: Arc<dyn ChangeChannel>,
    directory: Arc<dyn ProfileDirectory>,
    engine: ReconciliationEngine,
    presence: PresenceTracker,
    autosave: AutosavePolicy,
    autosave_timer: DebounceTimer,
    broadcast_timer: DebounceTimer,
    poll_timer: DebounceTimer,
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
    cmd_rx: mpsc::UnboundedReceiver<SessionCommand>,
    channel_rx: Option<mpsc::UnboundedReceiver<ChannelEvent>>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
}

impl Driver {
    /// Drain the command queue until the session closes. Returns the
    /// channel event receiver so the controller can be reopened.
    async fn run(mut self) -> Option<mpsc::UnboundedReceiver<ChannelEvent>> {
        self.emit_state();
        self.emit(SessionEvent::Presence(self.presence.entries()));
        let live = self.channel.is_live();
        self.emit(SessionEvent::ChannelLive(live));
        if !live {
            self.arm_poll();
        }

        loop {
            let wakeup = tokio::select! {
                cmd = self.cmd_rx.recv() => Wakeup::Command(cmd),
                event = Self::next_channel_event(&mut self.channel_rx) => Wakeup::Channel(event),
            };
            match wakeup {
                Wakeup::Command(Some(SessionCommand::Close)) | Wakeup::Command(None) => break,
                Wakeup::Command(Some(cmd)) => self.handle_command(cmd),
                Wakeup::Channel(Some(event)) => self.handle_channel_event(event),
                Wakeup::Channel(None) => self.channel_rx = None,
            }
        }

        self.autosave_timer.cancel();
        self.broadcast_timer.cancel();
        self.poll_timer.cancel();
        self.channel_rx.take()
    }

    async fn next_channel_event(
        rx: &mut Option<mpsc::UnboundedReceiver<ChannelEvent>>,
    ) -> Option<ChannelEvent> {
        match rx {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    }

    fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Edit(text) => {
                self.engine.apply_local_edit(text);
                self.emit_state();
                let tx = self.cmd_tx.clone();
                self.broadcast_timer.arm(self.config.broadcast_delay, move || {
                    let _ = tx.send(SessionCommand::BroadcastTick);
                });
                if let Some(delay) = self.autosave.on_edit() {
                    let tx = self.cmd_tx.clone();
                    self.autosave_timer.arm(delay, move || {
                        let _ = tx.send(SessionCommand::AutosaveTick);
                    });
                }
            }
            SessionCommand::Save => self.start_commit(true),
            SessionCommand::AutosaveTick => {
                // Nothing to do when already saving, already synced, or
                // blank; the next edit re-arms.
                if !self.engine.is_saving()
                    && self.engine.is_dirty()
                    && !self.engine.state().local_content.trim().is_empty()
                {
                    self.start_commit(false);
                }
            }
            SessionCommand::BroadcastTick => {
                let event = EditEvent::new(
                    self.document_id,
                    self.local_user.id,
                    self.engine.state().local_content.clone(),
                    EditKind::Update,
                );
                self.channel.send(&event);
            }
            SessionCommand::ResolveConflict(accept) => {
                if self.engine.resolve_conflict(accept).is_some() {
                    self.emit_state();
                }
            }
            SessionCommand::SetAutosave(enabled) => {
                self.autosave.set_enabled(enabled);
                if !enabled {
                    self.autosave_timer.cancel();
                }
            }
            SessionCommand::CreateVersion(label) => {
                let store = self.store.clone();
                let tx = self.cmd_tx.clone();
                let document_id = self.document_id;
                let user_id = self.local_user.id;
                let content = self.engine.state().local_content.clone();
                tokio::spawn(async move {
                    let result = store
                        .create_version(document_id, user_id, &content, &label)
                        .await
                        .map_err(|e| e.to_string());
                    let _ = tx.send(SessionCommand::VersionFinished(result));
                });
            }
            SessionCommand::CommitFinished { result, content } => match result {
                Ok(snapshot) => {
                    self.engine.complete_commit(snapshot.clone(), &content);
                    self.emit(SessionEvent::Saved(snapshot.clone()));
                    self.emit(SessionEvent::SnapshotUpdated(snapshot));
                    self.emit_state();
                    // Mirror the save onto the channel so peers see it
                    // without waiting for the server broadcast.
                    let event = EditEvent::new(
                        self.document_id,
                        self.local_user.id,
                        content,
                        EditKind::Update,
                    );
                    self.channel.send(&event);
                }
                Err(message) => {
                    self.engine.fail_commit();
                    self.emit(SessionEvent::SaveFailed(message));
                }
            },
            SessionCommand::VersionFinished(result) => match result {
                Ok(record) => self.emit(SessionEvent::VersionCreated(record)),
                Err(message) => {
                    self.emit(SessionEvent::SaveFailed(format!(
                        "failed to create version: {message}"
                    )));
                }
            },
            SessionCommand::AuthorResolved(profile) => {
                let still_pending = self
                    .engine
                    .state()
                    .pending_conflict
                    .as_ref()
                    .is_some_and(|c| c.author_user_id == profile.id);
                if still_pending {
                    self.emit(SessionEvent::ConflictAuthorResolved(profile));
                }
            }
            SessionCommand::PollTick => {
                if self.channel.is_live() {
                    return;
                }
                self.arm_poll();
                let channel = self.channel.clone();
                let store = self.store.clone();
                let tx = self.cmd_tx.clone();
                let document_id = self.document_id;
                tokio::spawn(async move {
                    // Try to restore the push channel, then catch up on
                    // anything missed while it was down.
                    let _ = channel.connect(document_id).await;
                    let result = store
                        .get_document(document_id)
                        .await
                        .map_err(|e| e.to_string());
                    let _ = tx.send(SessionCommand::PollFetched(result));
                });
            }
            SessionCommand::PollFetched(Ok(snapshot)) => {
                // A polled snapshot has no author; the nil id never
                // matches a real user, so foreign divergence still
                // surfaces and attribution degrades to anonymous.
                let change = EditEvent::new(
                    snapshot.id,
                    Uuid::nil(),
                    snapshot.content.clone(),
                    EditKind::Update,
                );
                self.reconcile_remote(ChangeEnvelope {
                    document: snapshot,
                    change,
                });
            }
            SessionCommand::PollFetched(Err(message)) => {
                log::debug!("pull refresh failed: {message}");
            }
            // Close is intercepted by the driver loop itself.
            SessionCommand::Close => {}
        }
    }

    fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected => {
                self.poll_timer.cancel();
                self.emit(SessionEvent::ChannelLive(true));
            }
            ChannelEvent::Disconnected => {
                self.presence.clear_remote();
                self.emit(SessionEvent::Presence(self.presence.entries()));
                self.emit(SessionEvent::ChannelLive(false));
                self.arm_poll();
            }
            ChannelEvent::Change(envelope) => self.reconcile_remote(envelope),
            ChannelEvent::PeerJoined(info) => {
                if self.presence.handle_join(info).is_some() {
                    self.emit(SessionEvent::Presence(self.presence.entries()));
                }
            }
            ChannelEvent::PeerLeft(user_id) => {
                if self.presence.handle_leave(user_id).is_some() {
                    self.emit(SessionEvent::Presence(self.presence.entries()));
                }
            }
        }
    }

    fn reconcile_remote(&mut self, envelope: ChangeEnvelope) {
        use crate::reconcile::RemoteOutcome;

        match self.engine.on_remote_update(&envelope) {
            RemoteOutcome::Duplicate => {}
            RemoteOutcome::Adopted | RemoteOutcome::SelfAcknowledged => {
                if let Some(snapshot) = self.engine.snapshot() {
                    self.emit(SessionEvent::SnapshotUpdated(snapshot.clone()));
                }
                self.emit_state();
            }
            RemoteOutcome::Conflict(conflict) => {
                if let Some(snapshot) = self.engine.snapshot() {
                    self.emit(SessionEvent::SnapshotUpdated(snapshot.clone()));
                }
                self.emit_state();

                // Attribution: presence first, then the directory as a
                // spawned fallback — never blocks the conflict itself.
                let author_id = conflict.author_user_id;
                let author = self
                    .presence
                    .username_of(author_id)
                    .map(|name| UserProfile::new(author_id, name));
                if author.is_none() && !author_id.is_nil() {
                    let directory = self.directory.clone();
                    let tx = self.cmd_tx.clone();
                    tokio::spawn(async move {
                        if let Ok(profile) = directory.profile(author_id).await {
                            let _ = tx.send(SessionCommand::AuthorResolved(profile));
                        }
                    });
                }
                self.emit(SessionEvent::ConflictDetected { conflict, author });
            }
        }
    }

    fn start_commit(&mut self, manual: bool) {
        match self.engine.begin_commit() {
            Ok(pending) => {
                self.emit(SessionEvent::SaveStarted);
                let store = self.store.clone();
                let tx = self.cmd_tx.clone();
                let user_id = self.local_user.id;
                tokio::spawn(async move {
                    let result = store
                        .edit_document(pending.document_id, user_id, &pending.content, pending.kind)
                        .await
                        .map_err(|e| e.to_string());
                    let _ = tx.send(SessionCommand::CommitFinished {
                        result,
                        content: pending.content,
                    });
                });
            }
            Err(e) if manual => self.emit(SessionEvent::SaveFailed(e.to_string())),
            Err(_) => {}
        }
    }

    fn arm_poll(&mut self) {
        let tx = self.cmd_tx.clone();
        self.poll_timer.arm(self.config.poll_interval, move || {
            let _ = tx.send(SessionCommand::PollTick);
        });
    }

    fn emit_state(&self) {
        self.emit(SessionEvent::StateChanged(self.engine.state().clone()));
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }
}
