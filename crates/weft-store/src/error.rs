// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

/// Failure modes for the persistence store (§4.C "Failure semantics", §7).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conversation record not found: {0}")]
    NotFound(String),

    #[error("conversation record {id} has schema version {found}, expected {expected}")]
    SchemaVersionMismatch { id: String, found: u32, expected: u32 },

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("sqlite store error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("could not acquire advisory lock for conversation {0}")]
    LockContended(String),

    #[error("store backend error: {0}")]
    Backend(#[source] anyhow::Error),
}
