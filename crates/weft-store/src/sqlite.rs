// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Default persistence backend: a single embedded SQLite database via
//! `rusqlite`'s `bundled` feature (§4.C "Default backend" — matches the
//! source project's own choice for its persistent-memory crate).
//!
//! One row per conversation; the full [`ConversationRecord`] is stored as a
//! JSON blob in `data`, with a handful of columns promoted out for indexed
//! listing/filtering. `conversations.id` is globally unique and immutable.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, instrument};

use crate::error::StoreError;
use crate::migrations;
use crate::record::{ConversationRecord, ConversationSummary, ListFilter, Page, SortOrder};
use crate::Store;

pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open (creating if needed) the SQLite database at `path`, running any
    /// pending migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut conn = Connection::open(&db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&mut conn)?;
        Ok(Self { conn: Mutex::new(conn), db_path })
    }

    /// Open an in-memory database, useful for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let mut conn = Connection::open_in_memory()?;
        migrations::run(&mut conn)?;
        Ok(Self { conn: Mutex::new(conn), db_path: PathBuf::from(":memory:") })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

#[async_trait]
impl Store for SqliteStore {
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
        let data = serde_json::to_string(record)?;
        let conn = self.conn.lock().map_err(|_| StoreError::LockContended(record.id.clone()))?;
        conn.execute(
            "INSERT INTO conversations (id, provider_tag, created_at, updated_at, schema_version, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                provider_tag = excluded.provider_tag,
                updated_at = excluded.updated_at,
                schema_version = excluded.schema_version,
                data = excluded.data",
            params![
                record.id,
                record.provider_tag,
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
                record.schema_version,
                data,
            ],
        )?;
        debug!("saved conversation record");
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<ConversationRecord, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockContended(id.to_string()))?;
        let data: String = conn
            .query_row("SELECT data FROM conversations WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let record: ConversationRecord = serde_json::from_str(&data)?;
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
        let conn = self.conn.lock().map_err(|_| StoreError::LockContended("list".to_string()))?;

        let order_by = match sort {
            SortOrder::CreatedAsc => "created_at ASC",
            SortOrder::CreatedDesc => "created_at DESC",
            SortOrder::UpdatedDesc => "updated_at DESC",
        };

        let mut sql = String::from("SELECT data FROM conversations WHERE 1=1");
        if filter.provider_tag.is_some() {
            sql.push_str(" AND provider_tag = ?1");
        }
        if filter.since.is_some() {
            let idx = if filter.provider_tag.is_some() { 2 } else { 1 };
            sql.push_str(&format!(" AND updated_at >= ?{idx}"));
        }
        sql.push_str(&format!(" ORDER BY {order_by} LIMIT ?{}", if filter.provider_tag.is_some() && filter.since.is_some() { 3 } else if filter.provider_tag.is_some() || filter.since.is_some() { 2 } else { 1 }));
        sql.push_str(&format!(" OFFSET ?{}", if filter.provider_tag.is_some() && filter.since.is_some() { 4 } else if filter.provider_tag.is_some() || filter.since.is_some() { 3 } else { 2 }));

        let mut stmt = conn.prepare(&sql)?;
        let mut idx = 1;
        let mut bind: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(tag) = &filter.provider_tag {
            bind.push(Box::new(tag.clone()));
            idx += 1;
        }
        if let Some(since) = &filter.since {
            bind.push(Box::new(since.to_rfc3339()));
            idx += 1;
        }
        let _ = idx;
        bind.push(Box::new(page.limit as i64));
        bind.push(Box::new(page.offset as i64));

        let params_ref: Vec<&dyn rusqlite::ToSql> = bind.iter().map(|b| b.as_ref()).collect();
        let rows = stmt.query_map(params_ref.as_slice(), |row| {
            let data: String = row.get(0)?;
            Ok(data)
        })?;

        let mut out = Vec::new();
        for row in rows {
            let data = row?;
            let record: ConversationRecord = serde_json::from_str(&data)?;
            out.push(ConversationSummary::from(&record));
        }
        Ok(out)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockContended(id.to_string()))?;
        let affected = conn.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
        if affected == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }
}
