//! Shared test doubles for the collaborator seams.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use coscribe_core::{
    now_ms, DirectoryError, DocumentId, DocumentSnapshot, DocumentStore, EditEvent, EditKind,
    ProfileDirectory, StoreError, UserId, UserProfile, VersionRecord,
};

use crate::channel::{ChangeChannel, ChannelError, ChannelEvent};

pub(crate) fn snapshot_with(content: &str) -> DocumentSnapshot {
    DocumentSnapshot {
        id: Uuid::new_v4(),
        title: "Test Document".into(),
        content: content.into(),
        owner_id: Uuid::new_v4(),
        is_shared: false,
        updated_at_ms: now_ms(),
    }
}

/// In-memory store that counts collaborator calls and can be told to
/// fail the next edit.
pub(crate) struct MemoryStore {
    docs: Mutex<HashMap<DocumentId, DocumentSnapshot>>,
    edit_calls: AtomicUsize,
    version_calls: AtomicUsize,
    fail_next_edit: AtomicBool,
    last_edit_kind: Mutex<Option<EditKind>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            docs: Mutex::new(HashMap::new()),
            edit_calls: AtomicUsize::new(0),
            version_calls: AtomicUsize::new(0),
            fail_next_edit: AtomicBool::new(false),
            last_edit_kind: Mutex::new(None),
        }
    }

    /// Insert a document directly, bypassing call counters.
    pub async fn seed_document(&self, title: &str, content: &str) -> DocumentSnapshot {
        let snapshot = DocumentSnapshot {
            id: Uuid::new_v4(),
            title: title.into(),
            content: content.into(),
            owner_id: Uuid::new_v4(),
            is_shared: false,
            updated_at_ms: now_ms(),
        };
        self.docs
            .lock()
            .expect("docs lock poisoned")
            .insert(snapshot.id, snapshot.clone());
        snapshot
    }

    /// Overwrite content directly, simulating another client's save.
    pub fn set_content(&self, id: DocumentId, content: &str) {
        let mut docs = self.docs.lock().expect("docs lock poisoned");
        if let Some(doc) = docs.get_mut(&id) {
            doc.content = content.into();
            doc.updated_at_ms = now_ms();
        }
    }

    pub fn edit_calls(&self) -> usize {
        self.edit_calls.load(Ordering::SeqCst)
    }

    pub fn version_calls(&self) -> usize {
        self.version_calls.load(Ordering::SeqCst)
    }

    pub fn fail_next_edit(&self) {
        self.fail_next_edit.store(true, Ordering::SeqCst);
    }

    pub fn last_edit_kind(&self) -> Option<EditKind> {
        *self.last_edit_kind.lock().expect("kind lock poisoned")
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create_document(
        &self,
        title: &str,
        owner_id: UserId,
    ) -> Result<DocumentSnapshot, StoreError> {
        let snapshot = DocumentSnapshot {
            id: Uuid::new_v4(),
            title: title.into(),
            content: String::new(),
            owner_id,
            is_shared: false,
            updated_at_ms: now_ms(),
        };
        self.docs
            .lock()
            .expect("docs lock poisoned")
            .insert(snapshot.id, snapshot.clone());
        Ok(snapshot)
    }

    async fn edit_document(
        &self,
        id: DocumentId,
        _user_id: UserId,
        content: &str,
        kind: EditKind,
    ) -> Result<DocumentSnapshot, StoreError> {
        self.edit_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_edit_kind.lock().expect("kind lock poisoned") = Some(kind);
        if self.fail_next_edit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        let mut docs = self.docs.lock().expect("docs lock poisoned");
        let doc = docs.get_mut(&id).ok_or(StoreError::NotFound)?;
        doc.content = content.into();
        doc.updated_at_ms = now_ms();
        Ok(doc.clone())
    }

    async fn get_document(&self, id: DocumentId) -> Result<DocumentSnapshot, StoreError> {
        self.docs
            .lock()
            .expect("docs lock poisoned")
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn create_version(
        &self,
        id: DocumentId,
        user_id: UserId,
        content: &str,
        label: &str,
    ) -> Result<VersionRecord, StoreError> {
        self.version_calls.fetch_add(1, Ordering::SeqCst);
        if !self
            .docs
            .lock()
            .expect("docs lock poisoned")
            .contains_key(&id)
        {
            return Err(StoreError::NotFound);
        }
        Ok(VersionRecord {
            id: Uuid::new_v4(),
            document_id: id,
            user_id,
            label: label.into(),
            content: content.into(),
            created_at_ms: now_ms(),
        })
    }
}

/// Fixed profile directory.
pub(crate) struct StaticDirectory {
    profiles: HashMap<UserId, UserProfile>,
}

impl StaticDirectory {
    pub fn new(profiles: impl IntoIterator<Item = UserProfile>) -> Self {
        Self {
            profiles: profiles.into_iter().map(|p| (p.id, p)).collect(),
        }
    }

    pub fn empty() -> Self {
        Self::new([])
    }
}

#[async_trait]
impl ProfileDirectory for StaticDirectory {
    async fn profile(&self, user_id: UserId) -> Result<UserProfile, DirectoryError> {
        self.profiles
            .get(&user_id)
            .cloned()
            .ok_or(DirectoryError::NotFound)
    }
}

/// Hand-fed channel: tests push events in, the session consumes them.
pub(crate) struct StubChannel {
    live: AtomicBool,
    accept_connect: AtomicBool,
    sent: Mutex<Vec<EditEvent>>,
    event_tx: mpsc::UnboundedSender<ChannelEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<ChannelEvent>>>,
}

impl StubChannel {
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            live: AtomicBool::new(false),
            accept_connect: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
        }
    }

    /// Make every subsequent connect attempt fail.
    pub fn refuse_connections(&self) {
        self.accept_connect.store(false, Ordering::SeqCst);
        self.live.store(false, Ordering::SeqCst);
    }

    pub fn push(&self, event: ChannelEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Simulate the socket dropping.
    pub fn drop_connection(&self) {
        self.live.store(false, Ordering::SeqCst);
        self.push(ChannelEvent::Disconnected);
    }

    pub fn sent(&self) -> Vec<EditEvent> {
        self.sent.lock().expect("sent lock poisoned").clone()
    }
}

#[async_trait]
impl ChangeChannel for StubChannel {
    async fn connect(&self, _document_id: DocumentId) -> Result<(), ChannelError> {
        if !self.accept_connect.load(Ordering::SeqCst) {
            return Err(ChannelError::Connect("refused".into()));
        }
        self.live.store(true, Ordering::SeqCst);
        let _ = self.event_tx.send(ChannelEvent::Connected);
        Ok(())
    }

    fn send(&self, event: &EditEvent) {
        if self.live.load(Ordering::SeqCst) {
            self.sent
                .lock()
                .expect("sent lock poisoned")
                .push(event.clone());
        }
    }

    fn disconnect(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ChannelEvent>> {
        self.event_rx.lock().expect("event lock poisoned").take()
    }
}
