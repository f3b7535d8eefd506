//! # coscribe-core — Shared document model for Coscribe
//!
//! Data types and collaborator interfaces used by the synchronization
//! core. This crate knows nothing about transport or timers: it defines
//! what a document, an edit, and a persistence/profile collaborator look
//! like, and nothing else.
//!
//! ## Modules
//!
//! - [`document`] — snapshots, edit events, profiles, version records
//! - [`store`] — async collaborator traits (persistence, profile lookup)

pub mod document;
pub mod store;

pub use document::{
    now_ms, DocumentId, DocumentSnapshot, EditEvent, EditKind, UserId, UserProfile, VersionRecord,
};
pub use store::{DirectoryError, DocumentStore, ProfileDirectory, StoreError};
