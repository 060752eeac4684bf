// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! File-per-record fallback backend (§4.C "Fallback backend" — used when
//! SQLite is unavailable, e.g. a read-only or exotic filesystem, or the
//! caller explicitly opts out of the embedded database).
//!
//! One JSON file per conversation under `<base>/conversations/<id>.json`.
//! Writes are atomic: serialize to a temp file in the same directory, fsync
//! it, then rename over the destination — a crash mid-write never leaves a
//! torn record behind.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::error::StoreError;
use crate::lock;
use crate::record::{ConversationRecord, ConversationSummary, ListFilter, Page, SortOrder};
use crate::Store;

pub struct FileStore {
    base: PathBuf,
}

impl FileStore {
    pub fn open(base: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base = base.as_ref().to_path_buf();
        std::fs::create_dir_all(base.join("conversations"))?;
        std::fs::create_dir_all(base.join("locks"))?;
        Ok(Self { base })
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.base.join("conversations").join(format!("{id}.json"))
    }

    fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<(), StoreError> {
        let dir = path.parent().expect("record path always has a parent");
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }
}

#[async_trait]
impl Store for FileStore {
    #[instrument(skip(self, record), fields(id = %record.id))]
    async fn save(&self, record: &mut ConversationRecord) -> Result<(), StoreError> {
        record.touch();
        if record.schema_version != crate::record::SCHEMA_VERSION {
            return Err(StoreError::SchemaVersionMismatch {
                id: record.id.clone(),
                found: record.schema_version,
                expected: crate::record::SCHEMA_VERSION,
            });
        }
        let _guard = lock::acquire_write(&self.base, &record.id)?;
        let data = serde_json::to_vec_pretty(record)?;
        self.write_atomic(&self.record_path(&record.id), &data)?;
        debug!("saved conversation record to file store");
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<ConversationRecord, StoreError> {
        let _guard = lock::acquire_read(&self.base, id)?;
        let path = self.record_path(id);
        if !path.exists() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        let data = std::fs::read(&path)?;
        let record: ConversationRecord = serde_json::from_slice(&data)?;
        if record.schema_version != crate::record::SCHEMA_VERSION {
            return Err(StoreError::SchemaVersionMismatch {
                id: id.to_string(),
                found: record.schema_version,
                expected: crate::record::SCHEMA_VERSION,
            });
        }
        Ok(record)
    }

    async fn list(
        &self,
        filter: &ListFilter,
        sort: SortOrder,
        page: Page,
    ) -> Result<Vec<ConversationSummary>, StoreError> {
        let dir = self.base.join("conversations");
        let mut summaries = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = std::fs::read(entry.path())?;
            let record: ConversationRecord = match serde_json::from_slice(&data) {
                Ok(r) => r,
                Err(_) => continue,
            };
            if let Some(tag) = &filter.provider_tag {
                if &record.provider_tag != tag {
                    continue;
                }
            }
            if let Some(since) = &filter.since {
                if &record.updated_at < since {
                    continue;
                }
            }
            summaries.push(ConversationSummary::from(&record));
        }

        match sort {
            SortOrder::CreatedAsc => summaries.sort_by_key(|s| s.created_at),
            SortOrder::CreatedDesc => summaries.sort_by_key(|s| std::cmp::Reverse(s.created_at)),
            SortOrder::UpdatedDesc => summaries.sort_by_key(|s| std::cmp::Reverse(s.updated_at)),
        }

        Ok(summaries.into_iter().skip(page.offset).take(page.limit).collect())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let _guard = lock::acquire_write(&self.base, id)?;
        let path = self.record_path(id);
        if !path.exists() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        std::fs::remove_file(path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let mut record = ConversationRecord::new("anthropic");
        record.summary = Some("hi there".into());
        store.save(&mut record).await.unwrap();

        let loaded = store.load(&record.id).await.unwrap();
        assert_eq!(loaded.summary.as_deref(), Some("hi there"));
    }

    #[tokio::test]
    async fn load_missing_id_returns_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(matches!(store.load("nope").await.unwrap_err(), StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn save_overwrites_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let mut record = ConversationRecord::new("anthropic");
        store.save(&mut record).await.unwrap();
        record.summary = Some("v2".into());
        store.save(&mut record).await.unwrap();

        let loaded = store.load(&record.id).await.unwrap();
        assert_eq!(loaded.summary.as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn list_respects_page_limit() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        for _ in 0..5 {
            let mut r = ConversationRecord::new("anthropic");
            store.save(&mut r).await.unwrap();
        }
        let page = Page { offset: 0, limit: 2 };
        let results = store.list(&ListFilter::default(), SortOrder::default(), page).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn delete_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let mut record = ConversationRecord::new("anthropic");
        store.save(&mut record).await.unwrap();
        store.delete(&record.id).await.unwrap();
        assert!(!store.record_path(&record.id).exists());
    }
}
