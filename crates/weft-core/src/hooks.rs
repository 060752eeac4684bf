// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! External hook points (§4.E "Hook points").
//!
//! Hooks may block a tool call (returning a synthetic failed result),
//! rewrite tool inputs/outputs, or inject follow-up user messages. Multiple
//! hooks may be registered; blocking is deny-fast — the first hook that
//! blocks decides and later hooks are not consulted. A hook that times out
//! is treated as non-blocking (§9 "deny-fast at before_tool_call").

use std::time::Duration;

use async_trait::async_trait;
use weft_tools::{ToolCall, ToolOutput};

/// Outcome of a `before_tool_call` hook.
pub enum BeforeToolCallDecision {
    /// Let the call proceed unmodified.
    Allow,
    /// Let the call proceed with a rewritten input.
    Rewrite(serde_json::Value),
    /// Block the call; it never runs. The reason becomes the synthetic
    /// failed tool-result's error message.
    Block(String),
}

/// Outcome of an `after_tool_call` hook.
pub enum AfterToolCallDecision {
    /// Keep the output unmodified.
    Keep,
    /// Replace the output (e.g. redact, truncate further).
    Replace(ToolOutput),
}

#[async_trait]
pub trait Hooks: Send + Sync {
    async fn before_tool_call(&self, _call: &ToolCall) -> BeforeToolCallDecision {
        BeforeToolCallDecision::Allow
    }

    async fn after_tool_call(&self, _call: &ToolCall, _output: &ToolOutput) -> AfterToolCallDecision {
        AfterToolCallDecision::Keep
    }

    /// Called as a user message is about to be appended (the initial `Send`
    /// message or a drained steer message). Returning `Some` rewrites it.
    async fn user_message_send(&self, text: &str) -> Option<String> {
        let _ = text;
        None
    }

    /// Called once the Thread reaches a terminal state.
    async fn agent_stop(&self, _reason: &str) {}

    /// Called after every completed turn (tool-use or stop/error alike).
    async fn turn_end(&self, _turn_index: u32) {}
}

/// The default, permissive hook set — used when the caller registers none.
pub struct NoopHooks;

#[async_trait]
impl Hooks for NoopHooks {}

/// Per-call timeout applied when dispatching a `before_tool_call`/
/// `after_tool_call` hook. A hook that exceeds this is treated as `Allow`/
/// `Keep` respectively — hooks must never be able to hang the loop.
pub const HOOK_TIMEOUT: Duration = Duration::from_secs(5);

/// Run `before_tool_call`, collapsing a timeout to `Allow`.
pub async fn run_before_tool_call(hooks: &dyn Hooks, call: &ToolCall) -> BeforeToolCallDecision {
    match tokio::time::timeout(HOOK_TIMEOUT, hooks.before_tool_call(call)).await {
        Ok(decision) => decision,
        Err(_) => {
            tracing::warn!(tool = %call.name, "before_tool_call hook timed out; allowing");
            BeforeToolCallDecision::Allow
        }
    }
}

/// Run `after_tool_call`, collapsing a timeout to `Keep`.
pub async fn run_after_tool_call(hooks: &dyn Hooks, call: &ToolCall, output: ToolOutput) -> ToolOutput {
    match tokio::time::timeout(HOOK_TIMEOUT, hooks.after_tool_call(call, &output)).await {
        Ok(AfterToolCallDecision::Keep) => output,
        Ok(AfterToolCallDecision::Replace(replacement)) => replacement,
        Err(_) => {
            tracing::warn!(tool = %call.name, "after_tool_call hook timed out; keeping original output");
            output
        }
    }
}
