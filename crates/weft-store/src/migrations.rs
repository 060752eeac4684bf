// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Ordered schema migrations for the SQLite backend (§4.C "Schema
//! migrations"). Applied once at `SqliteStore::open`, inside the same
//! transaction that sets up the store-wide lock, so concurrent first-time
//! opens from multiple processes don't race each other.
//!
//! Migrations are idempotent: each statement only creates objects that
//! don't already exist, so re-running the full list against an
//! already-migrated database is a no-op.

use rusqlite::Connection;

use crate::error::StoreError;

/// `(version, sql)` pairs applied in order. Add new entries here; never edit
/// or remove an existing one once shipped.
pub const MIGRATIONS: &[(u32, &str)] = &[(
    1,
    r#"
    CREATE TABLE IF NOT EXISTS conversations (
        id              TEXT PRIMARY KEY,
        provider_tag    TEXT NOT NULL,
        created_at      TEXT NOT NULL,
        updated_at      TEXT NOT NULL,
        schema_version  INTEGER NOT NULL,
        data            TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_conversations_updated_at ON conversations(updated_at);
    CREATE INDEX IF NOT EXISTS idx_conversations_provider_tag ON conversations(provider_tag);
    "#,
)];

pub const LATEST_VERSION: u32 = MIGRATIONS[MIGRATIONS.len() - 1].0;

/// Run any migrations newer than the database's current `user_version`
/// pragma, inside a single transaction.
pub fn run(conn: &mut Connection) -> Result<(), StoreError> {
    let current: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if current >= LATEST_VERSION {
        return Ok(());
    }
    let tx = conn.transaction()?;
    for (version, sql) in MIGRATIONS {
        if *version > current {
            tx.execute_batch(sql)?;
        }
    }
    tx.pragma_update(None, "user_version", LATEST_VERSION)?;
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        run(&mut conn).unwrap();
        run(&mut conn).unwrap();
        let version: u32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0)).unwrap();
        assert_eq!(version, LATEST_VERSION);
    }

    #[test]
    fn conversations_table_exists_after_run() {
        let mut conn = Connection::open_in_memory().unwrap();
        run(&mut conn).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='conversations'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
