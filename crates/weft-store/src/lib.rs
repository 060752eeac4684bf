// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Persistence for conversation records (§4.C).
//!
//! Two backends implement the same [`Store`] trait: [`sqlite::SqliteStore`]
//! (the default, a single embedded database) and [`file_store::FileStore`]
//! (one JSON file per conversation, used when SQLite isn't available). Both
//! share cross-process advisory locking from [`lock`] keyed on conversation
//! id, and the same ordered [`migrations`] list governs the SQLite schema.

mod error;
mod file_store;
mod lock;
mod migrations;
mod record;
mod sqlite;

pub use error::StoreError;
pub use file_store::FileStore;
pub use record::{
    new_sortable_id, BackgroundProcessRecord, ConversationRecord, ConversationSummary, ListFilter,
    Page, SortOrder, SCHEMA_VERSION,
};
pub use sqlite::SqliteStore;

use async_trait::async_trait;

/// Persistence contract implemented by every backend (§4.C).
///
/// `save` both inserts and updates (keyed on `record.id`); the store stamps
/// `updated_at` itself. A `save` that returns `Err` must not be treated by
/// the caller as having taken effect — the in-memory Thread state must not
/// advance as though the turn was durably recorded (§7 "PersistenceFailed").
#[async_trait]
pub trait Store: Send + Sync {
    async fn save(&self, record: &mut ConversationRecord) -> Result<(), StoreError>;
    async fn load(&self, id: &str) -> Result<ConversationRecord, StoreError>;
    async fn list(
        &self,
        filter: &ListFilter,
        sort: SortOrder,
        page: Page,
    ) -> Result<Vec<ConversationSummary>, StoreError>;
    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}

/// Open the default backend (SQLite) at `<base>/conversations.db`, falling
/// back to the file-per-record backend if SQLite can't be opened there
/// (e.g. a read-only filesystem or a corrupt database file).
pub fn open_default(base: impl AsRef<std::path::Path>) -> Result<Box<dyn Store>, StoreError> {
    let base = base.as_ref();
    match SqliteStore::open(base.join("conversations.db")) {
        Ok(store) => Ok(Box::new(store)),
        Err(err) => {
            tracing::warn!(%err, "falling back to file-per-record store: could not open sqlite backend");
            Ok(Box::new(FileStore::open(base)?))
        }
    }
}
