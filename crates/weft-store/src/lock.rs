// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Cross-process advisory locking keyed on conversation id (§4.C
//! "Concurrency"), shared by both the SQLite and file-per-record backends.
//!
//! One lock file per conversation id under `<base>/locks/<id>.lock`,
//! acquired with `fs4`'s cross-platform `lock_exclusive` / `lock_shared`.
//! The lock is released when the returned guard is dropped.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;

use crate::error::StoreError;

fn lock_path(base: &Path, id: &str) -> PathBuf {
    base.join("locks").join(format!("{id}.lock"))
}

fn open_lock_file(base: &Path, id: &str) -> Result<File, StoreError> {
    let path = lock_path(base, id);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new().create(true).write(true).open(path)?)
}

/// Held for the duration of one `save`/`delete` — releases the exclusive
/// lock on drop.
pub struct WriteGuard {
    _file: File,
}

/// Held for the duration of one `load`/`list` read — multiple readers may
/// overlap; only a single writer may hold the exclusive lock concurrently.
pub struct ReadGuard {
    _file: File,
}

pub fn acquire_write(base: &Path, id: &str) -> Result<WriteGuard, StoreError> {
    let file = open_lock_file(base, id)?;
    FileExt::lock_exclusive(&file).map_err(|_| StoreError::LockContended(id.to_string()))?;
    Ok(WriteGuard { _file: file })
}

pub fn acquire_read(base: &Path, id: &str) -> Result<ReadGuard, StoreError> {
    let file = open_lock_file(base, id)?;
    FileExt::lock_shared(&file).map_err(|_| StoreError::LockContended(id.to_string()))?;
    Ok(ReadGuard { _file: file })
}
