// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Unified event vocabulary emitted to a `Send`'s handler (§4.F, §6).
//!
//! Ordered within one turn: `TurnStart` → zero or more of {`TextDelta`,
//! `ThinkingStart`, `ThinkingDelta`, `ThinkingEnd`, `ToolCallPartial`} →
//! `AssistantMessageComplete` → `Usage` → `TurnEnd`. Structural events
//! (`ToolUse`, `ToolResult`, `AssistantMessageComplete`, `TurnEnd`, `Usage`,
//! `Failed`) are never dropped by a bounded handler queue; delta events may
//! be dropped under backpressure.

use weft_model::{StructuredResult, ThreadUsage, TurnEndReason, Usage};

/// One event in the stream handed to a `Send`'s caller.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    TurnStart,
    TextDelta(String),
    ThinkingStart,
    ThinkingDelta(String),
    ThinkingEnd { signature: Option<String> },
    /// A partial tool-call argument delta, keyed by its position among this
    /// turn's parallel calls.
    ToolCallPartial { index: u32, call_id: Option<String>, tool_name: Option<String>, arguments_delta: String },
    /// The assistant's turn is fully assembled; `text` is the concatenation
    /// of its text blocks, `tool_calls` the tool-use blocks it requested.
    AssistantMessageComplete { text: String, tool_calls: Vec<(String, String, serde_json::Value)> },
    /// One tool call has been dispatched (structural — never dropped).
    ToolUse { call_id: String, tool_name: String, input: serde_json::Value },
    /// One tool call has produced a result (structural — never dropped).
    ToolResult { call_id: String, success: bool, result: StructuredResult },
    Usage(Usage),
    TurnEnd { reason: TurnEndReason },

    /// Out-of-band: compaction ran between turns.
    CompactionStarted,
    CompactionComplete { tokens_before: usize, tokens_after: usize },
    /// Out-of-band: a steer message was drained and applied as the next
    /// user turn.
    SteerApplied,
    /// Out-of-band: a tool backgrounded a process.
    BackgroundProcessSpawned { handle: String, command: String },

    /// The exchange finished: final cumulative usage for the Thread.
    TurnComplete { usage: ThreadUsage },
    /// The exchange was cancelled mid-flight.
    Cancelled,
    /// The exchange failed with an unrecoverable error.
    Failed { message: String },
}
