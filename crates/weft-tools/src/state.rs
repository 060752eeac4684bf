// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Runtime state shared across every tool dispatched within one conversation.
//!
//! Each field uses its own lock so that concurrently-dispatched tools never
//! contend on state they don't touch: a file read only takes the access-time
//! lock, a background shell command only takes the process-table lock.
//!
//! Timestamps are wall-clock (`DateTime<Utc>`), not `Instant`: both maps are
//! snapshotted into a persisted conversation record between exchanges, and
//! `Instant` carries no meaning across a process restart.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

/// A long-running process started by a tool (e.g. a backgrounded shell
/// command) that outlives the `execute()` call that spawned it.
#[derive(Debug, Clone)]
pub struct BackgroundProcess {
    pub command: String,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
}

/// Cross-call runtime state for one conversation, `Arc`-shared across every
/// tool task dispatched concurrently within a turn.
#[derive(Default)]
pub struct State {
    file_last_access: RwLock<HashMap<PathBuf, DateTime<Utc>>>,
    background_processes: Mutex<HashMap<String, BackgroundProcess>>,
    todo_path: RwLock<Option<PathBuf>>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_todo_path(todo_path: PathBuf) -> Self {
        Self { todo_path: RwLock::new(Some(todo_path)), ..Self::default() }
    }

    /// Seed the file-access table from a persisted snapshot, e.g. when
    /// resuming a conversation.
    pub fn with_file_access(map: HashMap<PathBuf, DateTime<Utc>>) -> Self {
        Self { file_last_access: RwLock::new(map), ..Self::default() }
    }

    pub fn touch_file(&self, path: PathBuf) {
        self.file_last_access.write().unwrap().insert(path, Utc::now());
    }

    pub fn last_access(&self, path: &PathBuf) -> Option<DateTime<Utc>> {
        self.file_last_access.read().unwrap().get(path).copied()
    }

    /// Snapshot every tracked file access, for folding into a persisted
    /// conversation record between exchanges.
    pub fn snapshot_file_access(&self) -> HashMap<PathBuf, DateTime<Utc>> {
        self.file_last_access.read().unwrap().clone()
    }

    pub async fn register_process(&self, handle: impl Into<String>, process: BackgroundProcess) {
        self.background_processes.lock().await.insert(handle.into(), process);
    }

    pub async fn take_process(&self, handle: &str) -> Option<BackgroundProcess> {
        self.background_processes.lock().await.remove(handle)
    }

    pub async fn process_handles(&self) -> Vec<String> {
        self.background_processes.lock().await.keys().cloned().collect()
    }

    /// Snapshot every still-running background process, for folding into a
    /// persisted conversation record between exchanges.
    pub async fn snapshot_processes(&self) -> Vec<(String, BackgroundProcess)> {
        self.background_processes
            .lock()
            .await
            .iter()
            .map(|(handle, proc)| (handle.clone(), proc.clone()))
            .collect()
    }

    pub fn todo_path(&self) -> Option<PathBuf> {
        self.todo_path.read().unwrap().clone()
    }

    pub fn set_todo_path(&self, path: PathBuf) {
        *self.todo_path.write().unwrap() = Some(path);
    }
}

// ── Unit tests ───────────────────────────────────────────────────────────
