// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Subagent re-entrancy (§4.B): a `Tool` that constructs and drives a fresh,
//! narrower [`Thread`] to completion and returns its final text as the
//! parent's tool result.
//!
//! The child's usage is reported back to the parent through an unbounded
//! channel rather than a return value — mirroring how the source project
//! threads stateful tool side-effects (todo updates, mode switches) back to
//! the owning agent loop through a paired `mpsc` channel rather than through
//! `ToolOutput` itself. The parent `Thread` drains this channel and folds
//! each entry in with `ThreadUsage::merge_child` once its own turn ends.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use weft_config::{AgentConfig, AgentMode};
use weft_model::{Provider, ThreadUsage};
use weft_tools::policy::ApprovalPolicy;
use weft_tools::{State, Tool, ToolCall, ToolOutput, ToolRegistry};

use crate::events::AgentEvent;
use crate::hooks::{Hooks, NoopHooks};
use crate::steer::SteerBus;
use crate::thread::{PromptSettings, SendOptions, Thread, ThreadDeps};

/// Maximum subagent nesting depth (§4.B "Non-goals": depth is bounded, not
/// unlimited recursion).
pub const MAX_DEPTH: usize = 3;

/// Spawns a focused, single-exchange subagent (§4.B) and surfaces its final
/// answer as plain text. Never persists the subagent's conversation — it
/// exists only for the duration of one `execute()` call.
pub struct TaskTool {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    config: AgentConfig,
    depth: Arc<AtomicUsize>,
    usage_tx: mpsc::UnboundedSender<ThreadUsage>,
}

impl TaskTool {
    /// `usage_tx` is the sending half of the channel whose receiver the
    /// owning `Thread` was constructed with (`ThreadDeps::child_usage_tx`'s
    /// paired receiver) — every subagent spawned by this tool reports its
    /// final usage there.
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        config: AgentConfig,
        depth: Arc<AtomicUsize>,
        usage_tx: mpsc::UnboundedSender<ThreadUsage>,
    ) -> Self {
        Self { provider, tools, config, depth, usage_tx }
    }
}

#[async_trait]
impl Tool for TaskTool {
    fn name(&self) -> &str {
        "task"
    }

    fn description(&self) -> &str {
        "Spawn a subagent to complete a focused, self-contained task and return its final \
         answer. Useful for delegating research or implementation subtasks that don't need \
         to share the parent's running context. The subagent sees none of the parent's \
         transcript — give it everything it needs in the prompt."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "Complete, self-contained task description for the subagent"
                },
                "mode": {
                    "type": "string",
                    "enum": ["research", "plan", "agent"],
                    "description": "Operating mode for the subagent (default: agent)"
                },
                "max_turns": {
                    "type": "integer",
                    "description": "Maximum provider round trips before the subagent is capped (default: inherited)"
                }
            },
            "required": ["prompt"]
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Ask
    }

    fn modes(&self) -> &[AgentMode] {
        &[AgentMode::Agent]
    }

    async fn execute(&self, call: &ToolCall, _state: &State, cancel: &CancellationToken) -> ToolOutput {
        let Some(prompt) = call.args.get("prompt").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing required argument: prompt");
        };
        let mode = match call.args.get("mode").and_then(|v| v.as_str()).unwrap_or("agent") {
            "research" => AgentMode::Research,
            "plan" => AgentMode::Plan,
            "agent" => AgentMode::Agent,
            other => return ToolOutput::err(&call.id, format!("unknown mode: {other}")),
        };

        let depth = self.depth.load(Ordering::SeqCst);
        if depth >= MAX_DEPTH {
            return ToolOutput::err(&call.id, format!("maximum subagent nesting depth ({MAX_DEPTH}) reached"));
        }
        self.depth.fetch_add(1, Ordering::SeqCst);

        let mut config = self.config.clone();
        if let Some(max_turns) = call.args.get("max_turns").and_then(|v| v.as_u64()) {
            config.max_turns = max_turns as u32;
        }

        let deps = ThreadDeps {
            provider: Arc::clone(&self.provider),
            tools: Arc::clone(&self.tools),
            store: None,
            steer_bus: SteerBus::new(),
            hooks: Arc::new(NoopHooks) as Arc<dyn Hooks>,
            child_usage_rx: None,
        };
        let mut subagent = Thread::new("subagent", mode, config, deps, PromptSettings::default());

        let (tx, mut rx) = mpsc::channel(256);
        let mut opts = SendOptions::new(tx);
        opts.no_save = true;
        opts.cancel_token = cancel.clone();

        let send_result = subagent.send(prompt, None, opts).await;

        let mut text = String::new();
        while let Ok(ev) = rx.try_recv() {
            if let AgentEvent::TextDelta(delta) = ev {
                text.push_str(&delta);
            }
        }

        let _ = self.usage_tx.send(subagent.usage());
        self.depth.fetch_sub(1, Ordering::SeqCst);

        match send_result {
            Ok(_) => {
                if text.is_empty() {
                    ToolOutput::ok(&call.id, "(subagent produced no text output)")
                } else {
                    ToolOutput::ok(&call.id, text)
                }
            }
            Err(err) => ToolOutput::err(&call.id, format!("subagent failed: {err}")),
        }
    }
}
