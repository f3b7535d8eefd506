//! Collaborator interfaces consumed by the synchronization core.
//!
//! Persistence and profile lookup live behind external services; the core
//! only sees these traits. Implementations are expected to fold every
//! transport or server error into the single `Unavailable` variant — the
//! core treats all persistence failures uniformly.

use async_trait::async_trait;
use thiserror::Error;

use crate::document::{DocumentId, DocumentSnapshot, EditKind, UserId, UserProfile, VersionRecord};

/// Failure modes of the persistence collaborator.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("document not found")]
    NotFound,
    #[error("persistence unavailable: {0}")]
    Unavailable(String),
}

/// Failure modes of the profile lookup collaborator.
///
/// Callers swallow these entirely: attribution degrades to anonymous.
#[derive(Debug, Clone, Error)]
pub enum DirectoryError {
    #[error("no such user")]
    NotFound,
    #[error("profile lookup unavailable: {0}")]
    Unavailable(String),
}

/// Durable document persistence.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create a brand-new document owned by `owner_id`.
    async fn create_document(
        &self,
        title: &str,
        owner_id: UserId,
    ) -> Result<DocumentSnapshot, StoreError>;

    /// Persist new content for an existing document and return the
    /// resulting snapshot.
    async fn edit_document(
        &self,
        id: DocumentId,
        user_id: UserId,
        content: &str,
        kind: EditKind,
    ) -> Result<DocumentSnapshot, StoreError>;

    /// Fetch the current persisted snapshot.
    async fn get_document(&self, id: DocumentId) -> Result<DocumentSnapshot, StoreError>;

    /// Record a named checkpoint of the given content.
    async fn create_version(
        &self,
        id: DocumentId,
        user_id: UserId,
        content: &str,
        label: &str,
    ) -> Result<VersionRecord, StoreError>;
}

/// Profile lookup, used only as the fallback for conflict attribution.
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    async fn profile(&self, user_id: UserId) -> Result<UserProfile, DirectoryError>;
}
