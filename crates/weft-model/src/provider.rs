// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Provider-agnostic adapter contract and the unified streaming vocabulary
//! every concrete adapter (Anthropic-style, OpenAI Chat-style, OpenAI
//! Responses-style) emits.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::types::{ContentBlock, Message};

/// A tool schema advertised to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Why a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TurnEndReason {
    Stop,
    ToolUse,
    MaxTokens,
    Refusal,
    Error,
}

/// Token/cost usage reported for one turn.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cache_read_tokens: u32,
    pub cache_write_tokens: u32,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
        self.cache_write_tokens += other.cache_write_tokens;
    }
}

/// Per-million-token pricing for a model.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriceTable {
    pub input: f64,
    pub output: f64,
    pub cache_read: f64,
    pub cache_write: f64,
}

impl PriceTable {
    pub fn cost(&self, usage: &Usage) -> f64 {
        let m = 1_000_000.0;
        usage.input_tokens as f64 / m * self.input
            + usage.output_tokens as f64 / m * self.output
            + usage.cache_read_tokens as f64 / m * self.cache_read
            + usage.cache_write_tokens as f64 / m * self.cache_write
    }
}

/// Cumulative usage for one [`weft_core`-level] Thread, tracked across every
/// exchange (§3 "Thread Usage"). Updated strictly monotonically after every
/// exchange; only compaction resets the tokens used for the *context window*
/// fraction, never `total_cost` or the cumulative counters here.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ThreadUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub total_cost: f64,
}

impl ThreadUsage {
    /// Fold one exchange's [`Usage`] into the running totals, pricing it
    /// with `price` and adding the result to `total_cost`. Never decrements.
    pub fn add_exchange(&mut self, usage: &Usage, price: &PriceTable) {
        self.input_tokens += usage.input_tokens as u64;
        self.output_tokens += usage.output_tokens as u64;
        self.cache_read_tokens += usage.cache_read_tokens as u64;
        self.cache_write_tokens += usage.cache_write_tokens as u64;
        self.total_cost += price.cost(usage);
    }

    /// Merge a subagent's final usage into this (parent) total. Used when a
    /// child `Thread` constructed by a tool (e.g. `task`) completes (§4.B).
    pub fn merge_child(&mut self, child: &ThreadUsage) {
        self.input_tokens += child.input_tokens;
        self.output_tokens += child.output_tokens;
        self.cache_read_tokens += child.cache_read_tokens;
        self.cache_write_tokens += child.cache_write_tokens;
        self.total_cost += child.total_cost;
    }
}

/// Unified event vocabulary emitted by every adapter, in order, within one
/// turn:
///
/// `TurnStart` → zero or more of {`TextDelta`, `ThinkingStart`,
/// `ThinkingDelta`, `ThinkingEnd`, `ToolCallPartial`} → `AssistantMessageComplete`
/// → `Usage` → `TurnEnd`.
#[derive(Debug, Clone)]
pub enum ResponseEvent {
    TurnStart,
    TextDelta(String),
    ThinkingStart,
    ThinkingDelta(String),
    ThinkingEnd {
        signature: Option<String>,
    },
    /// A partial tool-call argument delta, keyed by the call's position
    /// among parallel calls in this turn so interleaved deltas can be routed
    /// to the right accumulator.
    ToolCallPartial {
        index: u32,
        call_id: Option<String>,
        tool_name: Option<String>,
        arguments_delta: String,
    },
    AssistantMessageComplete {
        blocks: Vec<ContentBlock>,
    },
    Usage(Usage),
    TurnEnd {
        reason: TurnEndReason,
    },
}

/// Options for one `send_and_stream` call.
#[derive(Debug, Clone, Default)]
pub struct SendOpts {
    /// Anthropic extended-thinking token budget, if the model supports it.
    pub thinking_budget_tokens: Option<u32>,
    /// OpenAI Responses-style: id of the previous turn's response, so the
    /// adapter can omit full history.
    pub previous_response_id: Option<String>,
}

pub type ResponseStream = Pin<Box<dyn Stream<Item = anyhow::Result<ResponseEvent>> + Send>>;

/// Capability set every concrete provider adapter implements (§4.D).
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    fn model_name(&self) -> &str;

    /// Stream one turn: the assistant's response to `messages` given
    /// `system_prompt` and the currently advertised `tools`.
    async fn send_and_stream(
        &self,
        system_prompt: &str,
        messages: &[Message],
        tools: &[ToolSchema],
        opts: &SendOpts,
    ) -> anyhow::Result<ResponseStream>;

    /// Ask the provider for a concise summary of `messages`, used by
    /// compaction (§4.G). Not a streamed call — returns the full text.
    async fn summarize(&self, messages: &[Message], prompt: &str) -> anyhow::Result<String>;

    /// Maximum context window this adapter advertises for its configured
    /// model, from the static catalog.
    fn advertised_max_context(&self) -> u32;

    /// Per-million-token pricing for the configured model.
    fn price_per_million(&self) -> PriceTable;

    /// Whether this adapter supports dispatching all of a turn's tool calls
    /// concurrently. OpenAI Chat-style falls back to sequential execution
    /// when this is `false`.
    fn supports_parallel_tool_calls(&self) -> bool {
        true
    }

    /// Serialize `messages` into this adapter's wire format (§3 "Raw
    /// provider message"). Populates `raw_provider_messages` on persistence
    /// and is called again after compaction to rebuild it against the new
    /// canonical list (§4.G step 3). Adapters with no provider-specific wire
    /// shape (the mock provider) return `Value::Null`.
    fn serialize_messages(&self, messages: &[Message]) -> serde_json::Value {
        let _ = messages;
        serde_json::Value::Null
    }
}
