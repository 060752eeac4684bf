// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// Used for config fields that should be enabled unless the user explicitly
/// sets them to `false`. `#[serde(default)]` on a `bool` always falls back
/// to `bool::default()` (i.e. `false`), so a named function is required.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    /// Named provider configurations.
    ///
    /// Define custom endpoints, local models, or additional accounts here and
    /// reference them by name.
    ///
    /// ```yaml
    /// providers:
    ///   my_ollama:
    ///     provider: openai-chat
    ///     base_url: http://localhost:11434/v1
    ///     name: llama3.2
    ///   work_anthropic:
    ///     provider: anthropic
    ///     api_key_env: WORK_ANTHROPIC_KEY
    ///     name: claude-opus-4-5
    /// ```
    #[serde(default)]
    pub providers: std::collections::HashMap<String, ModelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier: "anthropic" | "openai-chat" | "openai-responses" | "mock"
    pub provider: String,
    /// Model name forwarded to the provider API.
    pub name: String,
    /// Environment variable that holds the API key, read at runtime.
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer `api_key_env` in checked-in config files.
    pub api_key: Option<String>,
    /// Base URL override, for OpenAI-compatible endpoints and proxies.
    pub base_url: Option<String>,
    /// Maximum tokens to request in a single completion.
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0-2.0).
    pub temperature: Option<f32>,

    // ── Prompt caching (Anthropic) ──────────────────────────────────────
    /// Attach an explicit cache-control marker to the system message.
    #[serde(default = "default_true")]
    pub cache_system_prompt: bool,
    /// Use the extended (1-hour) cache TTL instead of the default 5-minute window.
    #[serde(default)]
    pub extended_cache_time: bool,
    /// Cache tool definitions, which are stable across a session.
    #[serde(default = "default_true")]
    pub cache_tools: bool,
    /// Cache conversation history up to the last message.
    #[serde(default = "default_true")]
    pub cache_conversation: bool,
    /// Cache image content blocks.
    #[serde(default = "default_true")]
    pub cache_images: bool,
    /// Cache large tool results.
    #[serde(default = "default_true")]
    pub cache_tool_results: bool,

    /// Free-form provider-specific options forwarded as-is to the driver.
    #[serde(default)]
    pub driver_options: serde_json::Value,

    /// Path to a YAML scripted-responses file, used when `provider = "mock"`.
    pub mock_responses_file: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".into(),
            name: "claude-opus-4-5".into(),
            api_key_env: None,
            api_key: None,
            base_url: None,
            max_tokens: Some(8192),
            temperature: Some(0.2),
            cache_system_prompt: true,
            extended_cache_time: false,
            cache_tools: true,
            cache_conversation: true,
            cache_images: true,
            cache_tool_results: true,
            driver_options: serde_json::Value::Null,
            mock_responses_file: None,
        }
    }
}

/// The operating mode of a thread: governs both the system prompt
/// instructions and which tools are advertised to the model
/// (`ToolRegistry::schemas_for_mode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// Read-only tools, no writes.
    Research,
    /// Produce a structured plan; no code changes.
    Plan,
    /// Full read/write tool access.
    Agent,
}

impl std::fmt::Display for AgentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentMode::Research => write!(f, "research"),
            AgentMode::Plan => write!(f, "plan"),
            AgentMode::Agent => write!(f, "agent"),
        }
    }
}

/// Strategy used when compacting the session context.
///
/// `Structured` (default) asks the provider for a typed Markdown checkpoint
/// with fixed sections. `Narrative` uses a free-form summarization prompt.
/// Both still collapse to a single `system-summary` content block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompactionStrategy {
    #[default]
    Structured,
    Narrative,
}

impl std::fmt::Display for CompactionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompactionStrategy::Structured => write!(f, "structured"),
            CompactionStrategy::Narrative => write!(f, "narrative"),
        }
    }
}

/// Backoff strategy for provider retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    Fixed,
    #[default]
    Exponential,
    ExponentialWithJitter,
}

fn default_retry_attempts() -> u32 {
    5
}
fn default_initial_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default)]
    pub strategy: BackoffStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            strategy: BackoffStrategy::default(),
        }
    }
}

fn default_max_turns() -> u32 {
    0
}
fn default_compact_ratio() -> f32 {
    0.8
}
fn default_compaction_keep_recent() -> usize {
    2
}
fn default_tool_result_token_cap() -> usize {
    4000
}
fn default_tool_cancel_grace_ms() -> u64 {
    2_000
}

/// Per-thread policy: turn cap, compaction trigger, tool-result truncation,
/// retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// 0 = unlimited, positive = hard cap on assistant turns per `Send`.
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    /// `cumulative_input_tokens / advertised_max_context` ratio that triggers
    /// auto-compaction between turns.
    #[serde(default = "default_compact_ratio")]
    pub compact_ratio: f32,
    /// Number of trailing user turns kept verbatim after compaction.
    #[serde(default = "default_compaction_keep_recent")]
    pub compaction_keep_recent: usize,
    #[serde(default)]
    pub compaction_strategy: CompactionStrategy,
    /// Maximum tokens allowed for a single tool result before deterministic
    /// truncation. 0 disables truncation.
    #[serde(default = "default_tool_result_token_cap")]
    pub tool_result_token_cap: usize,
    /// Upper bound on how long tool dispatch waits for a cancelled call to
    /// unwind cooperatively before the result is forced to `cancelled` (§4.H
    /// "maximum tool grace period").
    #[serde(default = "default_tool_cancel_grace_ms")]
    pub tool_cancel_grace_ms: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            compact_ratio: default_compact_ratio(),
            compaction_keep_recent: default_compaction_keep_recent(),
            compaction_strategy: CompactionStrategy::default(),
            tool_result_token_cap: default_tool_result_token_cap(),
            tool_cancel_grace_ms: default_tool_cancel_grace_ms(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}

/// Per-turn tool policy: allow-lists and deny-lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Automatically approve tool calls matching these glob patterns.
    #[serde(default)]
    pub auto_approve_patterns: Vec<String>,
    /// Block tool calls matching these glob patterns.
    #[serde(default)]
    pub deny_patterns: Vec<String>,
    /// Timeout in seconds for a single foreground tool call.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            auto_approve_patterns: vec![
                "cat *".into(),
                "ls *".into(),
                "find *".into(),
                "rg *".into(),
                "grep *".into(),
            ],
            deny_patterns: vec!["rm -rf /*".into(), "dd if=*".into()],
            timeout_secs: default_timeout_secs(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────
