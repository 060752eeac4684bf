// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Error taxonomy for the Thread exchange loop (§7).
//!
//! `InvalidToolInput` and `ToolExecutionFailed` never reach here — they are
//! converted into a failed tool-result inside the loop and never surfaced.
//! Everything in this enum is a terminal condition for the current `Send`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ThreadError {
    #[error("provider error: {0}")]
    ProviderFatal(#[source] anyhow::Error),

    #[error("persistence failed: {0}")]
    PersistenceFailed(#[from] weft_store::StoreError),

    #[error("cancelled")]
    Cancelled,

    #[error("turn cap of {0} reached")]
    TurnCapped(u32),

    #[error("transcript schema mismatch: found {found}, expected {expected}")]
    SchemaVersionMismatch { found: u32, expected: u32 },
}
