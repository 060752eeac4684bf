// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The exchange loop (§4.E): the state machine that turns one `Send` call
//! into zero or more round trips to a provider, dispatching tools in
//! parallel between them, until the provider emits a stop turn or a
//! terminal condition fires.
//!
//! Text and thinking content are assembled from the streamed deltas, not
//! from `AssistantMessageComplete`'s `blocks` field — the latter is treated
//! only as a carrier for opaque `redacted` blocks a provider may attach
//! directly to the completed message. This keeps one source of truth for
//! "what was said" regardless of whether a given adapter duplicates content
//! into both places.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use weft_config::{AgentConfig, AgentMode};
use weft_model::{
    ContentBlock, ImageRef, Provider, ResultKind, SendOpts, StructuredResult, ThreadUsage,
    Transcript, TurnEndReason,
};
use weft_store::{BackgroundProcessRecord, ConversationRecord, Store};
use weft_tools::{State, Tool, ToolCall, ToolOutput, ToolRegistry};

use crate::compact;
use crate::error::ThreadError;
use crate::events::AgentEvent;
use crate::hooks::{self, BeforeToolCallDecision, Hooks};
use crate::prompts::{self, PromptContext};
use crate::steer::{SteerBus, SteerSubscription};
use crate::truncate;

/// Immutable collaborators a `Thread` is constructed with.
pub struct ThreadDeps {
    pub provider: Arc<dyn Provider>,
    pub tools: Arc<ToolRegistry>,
    /// `None` disables persistence entirely (equivalent to always passing
    /// `no_save` to every `Send`).
    pub store: Option<Arc<dyn Store>>,
    pub steer_bus: SteerBus,
    pub hooks: Arc<dyn Hooks>,
    /// Receiving half of the channel whose sender was handed to any `task`
    /// tool in `tools` (§4.B re-entrancy) — every subagent it spawns reports
    /// its final usage here so this `Thread` can fold it into its own total.
    pub child_usage_rx: Option<mpsc::UnboundedReceiver<ThreadUsage>>,
}

/// Context fed into the system prompt builder. Owned copies, since a
/// `Thread` outlives any one `Send` and the prompt is rebuilt every turn.
#[derive(Debug, Default, Clone)]
pub struct PromptSettings {
    pub project_root: Option<PathBuf>,
    pub git_context: Option<String>,
    pub project_context_file: Option<String>,
    pub custom_system_prompt: Option<String>,
    pub append: Option<String>,
}

/// Options for one `Send` (§4.E).
pub struct SendOptions {
    /// Overrides `AgentConfig::max_turns` for this call only; `None` uses
    /// the thread's configured value.
    pub max_turns: Option<u32>,
    /// Restricts the tool set advertised this `Send` to the intersection of
    /// this list and the mode's tools; `None` advertises everything the
    /// mode allows.
    pub allowed_tools: Option<Vec<String>>,
    /// Skip persistence entirely for this exchange.
    pub no_save: bool,
    pub cancel_token: CancellationToken,
    /// Sink for the unified event stream. Structural events are delivered
    /// with backpressure (never dropped); delta events are dropped under
    /// backpressure.
    pub events: mpsc::Sender<AgentEvent>,
}

impl SendOptions {
    pub fn new(events: mpsc::Sender<AgentEvent>) -> Self {
        Self {
            max_turns: None,
            allowed_tools: None,
            no_save: false,
            cancel_token: CancellationToken::new(),
            events,
        }
    }
}

#[derive(Clone)]
struct Emitter {
    tx: mpsc::Sender<AgentEvent>,
}

impl Emitter {
    /// Send a structural event, awaiting queue capacity. Never dropped —
    /// per §4.F these must survive handler backpressure.
    async fn structural(&self, event: AgentEvent) {
        if self.tx.send(event).await.is_err() {
            tracing::debug!("event handler dropped; caller stopped listening");
        }
    }

    /// Send a delta event, dropping it silently if the queue is full.
    fn delta(&self, event: AgentEvent) {
        let _ = self.tx.try_send(event);
    }
}

#[derive(Default)]
struct PartialToolCall {
    call_id: Option<String>,
    tool_name: Option<String>,
    arguments: String,
}

/// Assembles one assistant turn from its streamed events.
#[derive(Default)]
struct TurnAccumulator {
    text: String,
    thinking: String,
    thinking_signature: Option<String>,
    tool_calls: BTreeMap<u32, PartialToolCall>,
    passthrough: Vec<ContentBlock>,
}

impl TurnAccumulator {
    fn into_blocks(self) -> Vec<ContentBlock> {
        let mut blocks = Vec::new();
        if !self.thinking.is_empty() {
            blocks.push(ContentBlock::Thinking { text: self.thinking, signature: self.thinking_signature });
        }
        if !self.text.is_empty() {
            blocks.push(ContentBlock::Text { text: self.text });
        }
        for block in self.passthrough {
            if matches!(block, ContentBlock::Redacted { .. }) {
                blocks.push(block);
            }
        }
        for (_, call) in self.tool_calls {
            let input = serde_json::from_str(&call.arguments).unwrap_or_else(|_| serde_json::json!({}));
            blocks.push(ContentBlock::ToolUse {
                call_id: call.call_id.unwrap_or_default(),
                tool_name: call.tool_name.unwrap_or_default(),
                input,
            });
        }
        blocks
    }
}

enum TurnOutcome {
    Completed,
    TurnCapped,
    Cancelled,
}

/// One live conversational exchange (§3 "Ownership"): owns the canonical
/// message list and usage counters exclusively; persistence and handlers
/// only ever see copies.
pub struct Thread {
    conversation_id: String,
    provider_tag: String,
    created_at: chrono::DateTime<Utc>,
    mode: AgentMode,
    config: AgentConfig,
    transcript: Transcript,
    usage: ThreadUsage,
    summary: Option<String>,
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    tool_state: Arc<State>,
    store: Option<Arc<dyn Store>>,
    steer_bus: SteerBus,
    hooks: Arc<dyn Hooks>,
    prompt: PromptSettings,
    child_usage_rx: Option<mpsc::UnboundedReceiver<ThreadUsage>>,
}

impl Thread {
    /// Start a brand-new conversation.
    pub fn new(provider_tag: impl Into<String>, mode: AgentMode, config: AgentConfig, deps: ThreadDeps, prompt: PromptSettings) -> Self {
        let now = Utc::now();
        Self {
            conversation_id: weft_store::new_sortable_id(now),
            provider_tag: provider_tag.into(),
            created_at: now,
            mode,
            config,
            transcript: Transcript::new(),
            usage: ThreadUsage::default(),
            summary: None,
            provider: deps.provider,
            tools: deps.tools,
            tool_state: Arc::new(State::new()),
            store: deps.store,
            steer_bus: deps.steer_bus,
            hooks: deps.hooks,
            prompt,
            child_usage_rx: deps.child_usage_rx,
        }
    }

    /// Resume a previously persisted conversation. Orphan tool-uses left by
    /// a crash mid-turn are trimmed before the thread becomes usable again
    /// (§3 invariant M1).
    pub fn resume(record: ConversationRecord, mode: AgentMode, config: AgentConfig, deps: ThreadDeps, prompt: PromptSettings) -> Result<Self, ThreadError> {
        if record.schema_version != weft_store::SCHEMA_VERSION {
            return Err(ThreadError::SchemaVersionMismatch {
                found: record.schema_version,
                expected: weft_store::SCHEMA_VERSION,
            });
        }
        let value = serde_json::json!({
            "schema_version": weft_model::SCHEMA_VERSION,
            "messages": record.canonical_messages,
        });
        let mut transcript = Transcript::from_value(value).map_err(|e| ThreadError::SchemaVersionMismatch {
            found: e.found,
            expected: e.expected,
        })?;
        transcript.trim_orphan_tool_uses();

        let file_access = record
            .file_last_access
            .into_iter()
            .map(|(path, at)| (PathBuf::from(path), at))
            .collect();
        let tool_state = Arc::new(State::with_file_access(file_access));

        Ok(Self {
            conversation_id: record.id,
            provider_tag: record.provider_tag,
            created_at: record.created_at,
            mode,
            config,
            transcript,
            usage: record.usage,
            summary: record.summary,
            provider: deps.provider,
            tools: deps.tools,
            tool_state,
            store: deps.store,
            steer_bus: deps.steer_bus,
            hooks: deps.hooks,
            prompt,
            child_usage_rx: deps.child_usage_rx,
        })
    }

    /// Drain any subagent usage reported by a `task` tool since the last
    /// drain and fold it into the running total (§4.B).
    fn absorb_child_usage(&mut self) {
        let Some(rx) = self.child_usage_rx.as_mut() else { return };
        while let Ok(child) = rx.try_recv() {
            self.usage.merge_child(&child);
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn usage(&self) -> ThreadUsage {
        self.usage
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn mode(&self) -> AgentMode {
        self.mode
    }

    /// Run one exchange to completion (§4.E algorithm). Returns the
    /// thread's cumulative usage on success. A `TurnCapped`/`Cancelled`
    /// result is still reflected in the persisted record (if persistence is
    /// enabled) before the error is returned.
    pub async fn send(&mut self, user_message: impl Into<String>, images: Option<Vec<ImageRef>>, mut opts: SendOptions) -> Result<ThreadUsage, ThreadError> {
        let emitter = Emitter { tx: opts.events.clone() };
        let max_turns = opts.max_turns.take().unwrap_or(self.config.max_turns);

        let mut text = user_message.into();
        if let Some(rewritten) = self.hooks.user_message_send(&text).await {
            text = rewritten;
        }
        self.transcript.append_user(text, images);
        self.transcript.trim_orphan_tool_uses();

        let mut steer_sub = self.steer_bus.subscribe(self.conversation_id.clone());

        let outcome = self
            .run_turns(max_turns, opts.allowed_tools.as_deref(), &opts.cancel_token, &emitter, &mut steer_sub)
            .await;

        drop(steer_sub);

        match outcome {
            Ok(TurnOutcome::Completed) => {
                if !opts.no_save {
                    self.persist().await?;
                }
                emitter.structural(AgentEvent::TurnComplete { usage: self.usage }).await;
                self.hooks.agent_stop("stop").await;
                Ok(self.usage)
            }
            Ok(TurnOutcome::TurnCapped) => {
                if !opts.no_save {
                    self.persist().await?;
                }
                emitter.structural(AgentEvent::TurnComplete { usage: self.usage }).await;
                self.hooks.agent_stop("turn-capped").await;
                Err(ThreadError::TurnCapped(max_turns))
            }
            Ok(TurnOutcome::Cancelled) => {
                self.persist_best_effort().await;
                emitter.structural(AgentEvent::Cancelled).await;
                self.hooks.agent_stop("cancelled").await;
                Err(ThreadError::Cancelled)
            }
            Err(err) => {
                self.persist_best_effort().await;
                emitter.structural(AgentEvent::Failed { message: err.to_string() }).await;
                self.hooks.agent_stop("failed").await;
                Err(err)
            }
        }
    }

    async fn run_turns(
        &mut self,
        max_turns: u32,
        allowed_tools: Option<&[String]>,
        cancel: &CancellationToken,
        emitter: &Emitter,
        steer: &mut SteerSubscription,
    ) -> Result<TurnOutcome, ThreadError> {
        let mut k: u32 = 0;
        loop {
            k += 1;

            if cancel.is_cancelled() {
                self.transcript.trim_orphan_tool_uses();
                return Ok(TurnOutcome::Cancelled);
            }

            if max_turns > 0 && k > max_turns {
                self.append_turn_cap_notice(max_turns);
                return Ok(TurnOutcome::TurnCapped);
            }

            if compact::should_compact(&self.transcript, self.provider.advertised_max_context(), self.config.compact_ratio) {
                emitter.structural(AgentEvent::CompactionStarted).await;
                let tokens_before =
                    compact::compact(self.provider.as_ref(), &mut self.transcript, &self.config.compaction_strategy, self.config.compaction_keep_recent).await;
                let tokens_after = self.transcript.approx_context_tokens();
                emitter.structural(AgentEvent::CompactionComplete { tokens_before, tokens_after }).await;
            }

            let mut schemas = self.tools.schemas_for_mode(self.mode);
            if let Some(allowed) = allowed_tools {
                schemas.retain(|s| allowed.iter().any(|a| a == &s.name));
            }
            let tool_names: Vec<String> = schemas.iter().map(|s| s.name.clone()).collect();
            let model_schemas: Vec<weft_model::ToolSchema> = schemas
                .into_iter()
                .map(|s| weft_model::ToolSchema { name: s.name, description: s.description, input_schema: s.parameters })
                .collect();
            let system_prompt = self.build_system_prompt(&tool_names);

            emitter.structural(AgentEvent::TurnStart).await;

            let mut stream = self
                .provider
                .send_and_stream(&system_prompt, self.transcript.messages(), &model_schemas, &SendOpts::default())
                .await
                .map_err(ThreadError::ProviderFatal)?;

            let mut accum = TurnAccumulator::default();
            let turn_end_reason = loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        self.transcript.trim_orphan_tool_uses();
                        return Ok(TurnOutcome::Cancelled);
                    }
                    ev = stream.next() => ev,
                };
                let Some(ev) = next else {
                    return Err(ThreadError::ProviderFatal(anyhow::anyhow!(
                        "provider stream closed before a turn-end event"
                    )));
                };
                let ev = ev.map_err(ThreadError::ProviderFatal)?;
                use weft_model::ResponseEvent;
                match ev {
                    ResponseEvent::TurnStart => {}
                    ResponseEvent::TextDelta(delta) => {
                        accum.text.push_str(&delta);
                        emitter.delta(AgentEvent::TextDelta(delta));
                    }
                    ResponseEvent::ThinkingStart => emitter.delta(AgentEvent::ThinkingStart),
                    ResponseEvent::ThinkingDelta(delta) => {
                        accum.thinking.push_str(&delta);
                        emitter.delta(AgentEvent::ThinkingDelta(delta));
                    }
                    ResponseEvent::ThinkingEnd { signature } => {
                        accum.thinking_signature = signature.clone();
                        emitter.structural(AgentEvent::ThinkingEnd { signature }).await;
                    }
                    ResponseEvent::ToolCallPartial { index, call_id, tool_name, arguments_delta } => {
                        let entry = accum.tool_calls.entry(index).or_default();
                        if let Some(id) = call_id.clone() {
                            entry.call_id = Some(id);
                        }
                        if let Some(name) = tool_name.clone() {
                            entry.tool_name = Some(name);
                        }
                        entry.arguments.push_str(&arguments_delta);
                        emitter.delta(AgentEvent::ToolCallPartial { index, call_id, tool_name, arguments_delta });
                    }
                    ResponseEvent::AssistantMessageComplete { blocks } => accum.passthrough = blocks,
                    ResponseEvent::Usage(usage) => {
                        self.usage.add_exchange(&usage, &self.provider.price_per_million());
                        emitter.structural(AgentEvent::Usage(usage)).await;
                    }
                    ResponseEvent::TurnEnd { reason } => break reason,
                }
            };

            let blocks = accum.into_blocks();
            let tool_calls: Vec<(String, String, serde_json::Value)> = blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolUse { call_id, tool_name, input } => Some((call_id.clone(), tool_name.clone(), input.clone())),
                    _ => None,
                })
                .collect();
            let text: String = blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect();

            emitter
                .structural(AgentEvent::AssistantMessageComplete { text, tool_calls: tool_calls.clone() })
                .await;
            self.transcript.append_assistant_from_provider(blocks);
            emitter.structural(AgentEvent::TurnEnd { reason: turn_end_reason }).await;

            if turn_end_reason != TurnEndReason::ToolUse {
                return Ok(TurnOutcome::Completed);
            }

            if cancel.is_cancelled() {
                self.transcript.trim_orphan_tool_uses();
                return Ok(TurnOutcome::Cancelled);
            }

            let results = self.dispatch_tools(tool_calls, emitter, cancel).await;
            self.transcript.append_tool_results(results);
            self.absorb_child_usage();

            for steered in steer.drain() {
                let mut text = steered.text;
                if let Some(rewritten) = self.hooks.user_message_send(&text).await {
                    text = rewritten;
                }
                self.transcript.append_user(text, steered.images);
                emitter.structural(AgentEvent::SteerApplied).await;
            }
        }
    }

    /// Execute every tool call from one assistant turn, preserving
    /// tool-use order in the returned `tool-result` blocks regardless of
    /// completion order (§5 "Ordering guarantees").
    ///
    /// Each call races against `cancel`: once it fires, the call gets
    /// `tool_cancel_grace_ms` to unwind cooperatively (the tool itself also
    /// sees `cancel` and can abort its own I/O) before the result is forced
    /// to a cancelled `ToolResult` regardless of whether the tool ever
    /// returns (§4.H property 7).
    async fn dispatch_tools(&self, calls: Vec<(String, String, serde_json::Value)>, emitter: &Emitter, cancel: &CancellationToken) -> Vec<ContentBlock> {
        let cap = self.config.tool_result_token_cap;
        let grace = Duration::from_millis(self.config.tool_cancel_grace_ms);
        let tasks: Vec<_> = calls
            .into_iter()
            .map(|(call_id, tool_name, input)| {
                let registry = Arc::clone(&self.tools);
                let state = Arc::clone(&self.tool_state);
                let hooks = Arc::clone(&self.hooks);
                let emitter = emitter.clone();
                let cancel = cancel.clone();
                async move {
                    emitter
                        .structural(AgentEvent::ToolUse { call_id: call_id.clone(), tool_name: tool_name.clone(), input: input.clone() })
                        .await;

                    let call = ToolCall { id: call_id.clone(), name: tool_name.clone(), args: input };
                    let mut run = Box::pin(async {
                        match hooks::run_before_tool_call(hooks.as_ref(), &call).await {
                            BeforeToolCallDecision::Block(reason) => ToolOutput::err(&call.id, reason),
                            BeforeToolCallDecision::Rewrite(new_input) => {
                                let rewritten = ToolCall { args: new_input, ..call.clone() };
                                registry.execute(&rewritten, &state, &cancel).await
                            }
                            BeforeToolCallDecision::Allow => registry.execute(&call, &state, &cancel).await,
                        }
                    });

                    let raw_output = tokio::select! {
                        out = &mut run => out,
                        _ = cancel.cancelled() => match tokio::time::timeout(grace, &mut run).await {
                            Ok(out) => out,
                            Err(_) => ToolOutput::cancelled(
                                &call_id,
                                ResultKind::Shell {
                                    exit_code: -1,
                                    stdout: String::new(),
                                    stderr: String::new(),
                                    duration_ms: grace.as_millis() as u64,
                                    cancelled: true,
                                },
                            ),
                        },
                    };
                    let output = hooks::run_after_tool_call(hooks.as_ref(), &call, raw_output).await;

                    let category = registry.get(&tool_name).map(|t| t.output_category()).unwrap_or_default();
                    let content = truncate::smart_truncate(&output.content, category, cap);
                    let success = !output.is_error;
                    let kind = output.kind.unwrap_or(ResultKind::Generic { text: content.clone() });
                    let structured = StructuredResult {
                        tool_name: tool_name.clone(),
                        success,
                        error_message: if success { None } else { Some(content) },
                        timestamp: Utc::now(),
                        kind,
                    };

                    emitter
                        .structural(AgentEvent::ToolResult { call_id: call_id.clone(), success, result: structured.clone() })
                        .await;

                    ContentBlock::ToolResult { call_id, success, structured }
                }
            })
            .collect();

        if self.provider.supports_parallel_tool_calls() {
            futures::future::join_all(tasks).await
        } else {
            let mut out = Vec::with_capacity(tasks.len());
            for task in tasks {
                out.push(task.await);
            }
            out
        }
    }

    fn append_turn_cap_notice(&mut self, max_turns: u32) {
        let notice = format!("[Turn cap reached: stopped after {max_turns} turn(s) without a final answer. Send another message to continue.]");
        self.transcript.append_assistant_from_provider(vec![ContentBlock::text(notice)]);
    }

    fn build_system_prompt(&self, tool_names: &[String]) -> String {
        let ctx = PromptContext {
            project_root: self.prompt.project_root.as_deref(),
            git_context: self.prompt.git_context.as_deref(),
            project_context_file: self.prompt.project_context_file.as_deref(),
            append: self.prompt.append.as_deref(),
        };
        prompts::system_prompt(self.mode, tool_names, self.prompt.custom_system_prompt.as_deref(), ctx)
    }

    async fn persist(&mut self) -> Result<(), ThreadError> {
        let Some(store) = self.store.clone() else { return Ok(()) };
        let mut record = self.to_record().await;
        store.save(&mut record).await?;
        self.summary = record.summary;
        Ok(())
    }

    async fn persist_best_effort(&mut self) {
        if let Err(err) = self.persist().await {
            tracing::warn!(%err, "best-effort persistence after non-normal termination failed");
        }
    }

    async fn to_record(&self) -> ConversationRecord {
        let file_last_access = self
            .tool_state
            .snapshot_file_access()
            .into_iter()
            .map(|(path, at)| (path.to_string_lossy().into_owned(), at))
            .collect();
        let background_processes = self
            .tool_state
            .snapshot_processes()
            .await
            .into_iter()
            .map(|(handle, proc)| BackgroundProcessRecord {
                handle,
                command: proc.command,
                pid: proc.pid,
                started_at: proc.started_at,
            })
            .collect();
        let tool_results_by_call_id = self
            .transcript
            .messages()
            .iter()
            .flat_map(|m| m.tool_results().map(|(id, _, r)| (id.to_string(), r.clone())))
            .collect();

        ConversationRecord {
            id: self.conversation_id.clone(),
            schema_version: weft_store::SCHEMA_VERSION,
            provider_tag: self.provider_tag.clone(),
            created_at: self.created_at,
            updated_at: Utc::now(),
            summary: self.summary.clone(),
            canonical_messages: self.transcript.messages().to_vec(),
            raw_provider_messages: self.provider.serialize_messages(self.transcript.messages()),
            usage: self.usage,
            file_last_access,
            background_processes,
            tool_results_by_call_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::hooks::NoopHooks;
    use weft_config::ToolsConfig;
    use weft_model::{MockProvider, ScriptedMockProvider};
    use weft_tools::policy::ApprovalPolicy;
    use weft_tools::ToolOutput;

    struct EchoShellTool;

    #[async_trait]
    impl Tool for EchoShellTool {
        fn name(&self) -> &str {
            "shell"
        }
        fn description(&self) -> &str {
            "runs a shell command"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({ "type": "object", "properties": { "command": { "type": "string" } }, "required": ["command"] })
        }
        fn default_policy(&self) -> ApprovalPolicy {
            ApprovalPolicy::Auto
        }
        async fn execute(&self, call: &ToolCall, _state: &State, _cancel: &CancellationToken) -> ToolOutput {
            ToolOutput::structured(
                &call.id,
                "hi\n",
                ResultKind::Shell { exit_code: 0, stdout: "hi\n".into(), stderr: String::new(), duration_ms: 1, cancelled: false },
            )
        }
    }

    /// Ignores `cancel` entirely, so tests exercise the dispatcher's own
    /// forced cutoff rather than cooperative cancellation.
    struct SleepyTool;

    #[async_trait]
    impl Tool for SleepyTool {
        fn name(&self) -> &str {
            "sleepy"
        }
        fn description(&self) -> &str {
            "sleeps for a long time"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({ "type": "object" })
        }
        fn default_policy(&self) -> ApprovalPolicy {
            ApprovalPolicy::Auto
        }
        async fn execute(&self, call: &ToolCall, _state: &State, _cancel: &CancellationToken) -> ToolOutput {
            tokio::time::sleep(Duration::from_secs(10)).await;
            ToolOutput::ok(&call.id, "woke up")
        }
    }

    fn deps(provider: Arc<dyn Provider>, tools: ToolRegistry) -> ThreadDeps {
        ThreadDeps {
            provider,
            tools: Arc::new(tools),
            store: None,
            steer_bus: SteerBus::new(),
            hooks: Arc::new(NoopHooks),
            child_usage_rx: None,
        }
    }

    fn default_config() -> AgentConfig {
        AgentConfig { tool_result_token_cap: 0, ..AgentConfig::default() }
    }

    #[tokio::test]
    async fn simple_qna_completes_with_stop_reason() {
        let provider: Arc<dyn Provider> = Arc::new(MockProvider);
        let mut thread = Thread::new("mock", AgentMode::Agent, default_config(), deps(provider, ToolRegistry::new()), PromptSettings::default());

        let (tx, mut rx) = mpsc::channel(32);
        let usage = thread.send("what is 2+2?", None, SendOptions::new(tx)).await.unwrap();
        assert!(usage.input_tokens > 0);
        assert!(usage.output_tokens > 0);

        let mut saw_turn_complete = false;
        while let Ok(ev) = rx.try_recv() {
            if matches!(ev, AgentEvent::TurnComplete { .. }) {
                saw_turn_complete = true;
            }
        }
        assert!(saw_turn_complete);
        assert_eq!(thread.transcript().messages().len(), 2);
    }

    #[tokio::test]
    async fn single_tool_call_round_trips_through_registry() {
        let provider: Arc<dyn Provider> =
            Arc::new(ScriptedMockProvider::tool_then_text("call-1", "shell", r#"{"command":"echo hi"}"#, "done"));
        let mut tools = ToolRegistry::new();
        tools.register(EchoShellTool);
        let mut thread = Thread::new("mock", AgentMode::Agent, default_config(), deps(provider, tools), PromptSettings::default());

        let (tx, mut rx) = mpsc::channel(64);
        thread.send("run `echo hi`", None, SendOptions::new(tx)).await.unwrap();

        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        assert!(events.iter().any(|e| matches!(e, AgentEvent::ToolUse { tool_name, .. } if tool_name == "shell")));
        assert!(events.iter().any(|e| matches!(e, AgentEvent::ToolResult { success: true, .. })));

        // user, assistant(tool-use), tool-result, assistant(final text)
        assert_eq!(thread.transcript().messages().len(), 4);
    }

    #[tokio::test]
    async fn turn_cap_stops_before_next_provider_call() {
        let provider: Arc<dyn Provider> =
            Arc::new(ScriptedMockProvider::tool_then_text("call-1", "shell", r#"{"command":"ls"}"#, "done"));
        let mut tools = ToolRegistry::new();
        tools.register(EchoShellTool);
        let config = AgentConfig { max_turns: 1, ..default_config() };
        let mut thread = Thread::new("mock", AgentMode::Agent, config, deps(provider, tools), PromptSettings::default());

        let (tx, _rx) = mpsc::channel(64);
        let err = thread.send("do a multi-step task", None, SendOptions::new(tx)).await.unwrap_err();
        assert!(matches!(err, ThreadError::TurnCapped(1)));
        assert!(thread
            .transcript()
            .messages()
            .iter()
            .any(|m| m.as_text().map(|t| t.contains("Turn cap reached")).unwrap_or(false)));
    }

    #[tokio::test]
    async fn cancellation_before_provider_call_returns_cancelled() {
        let provider: Arc<dyn Provider> = Arc::new(MockProvider);
        let mut thread = Thread::new("mock", AgentMode::Agent, default_config(), deps(provider, ToolRegistry::new()), PromptSettings::default());

        let (tx, _rx) = mpsc::channel(8);
        let mut opts = SendOptions::new(tx);
        opts.cancel_token.cancel();
        let err = thread.send("hello", None, opts).await.unwrap_err();
        assert!(matches!(err, ThreadError::Cancelled));
    }

    #[tokio::test]
    async fn allowed_tools_filters_what_is_advertised() {
        let provider: Arc<dyn Provider> = Arc::new(MockProvider);
        let mut tools = ToolRegistry::new();
        tools.register(EchoShellTool);
        let mut thread = Thread::new("mock", AgentMode::Agent, default_config(), deps(provider, tools), PromptSettings::default());

        let (tx, _rx) = mpsc::channel(8);
        let mut opts = SendOptions::new(tx);
        opts.allowed_tools = Some(vec!["nonexistent".into()]);
        // shell is filtered out, so the mock provider (which ignores tools
        // entirely) still completes normally with no tool calls observed.
        let usage = thread.send("hi", None, opts).await.unwrap();
        assert!(usage.input_tokens > 0);
    }

    #[test]
    fn tools_config_default_is_permissive_enough_for_tests() {
        // sanity check that weft-config's default deny-list doesn't match the
        // commands these mock tests run ("echo hi", "ls")
        use weft_tools::policy::{ApprovalPolicy, ToolPolicy};
        let policy = ToolPolicy::from_config(&ToolsConfig::default());
        assert_ne!(policy.decide("echo hi"), ApprovalPolicy::Deny);
    }

    #[tokio::test]
    async fn persisted_conversation_resumes_with_same_history() {
        let store: Arc<dyn weft_store::Store> = Arc::new(weft_store::SqliteStore::open_in_memory().unwrap());
        let provider: Arc<dyn Provider> = Arc::new(MockProvider);
        let mut deps = deps(provider, ToolRegistry::new());
        deps.store = Some(Arc::clone(&store));
        let mut thread = Thread::new("mock", AgentMode::Agent, default_config(), deps, PromptSettings::default());
        let conversation_id = thread.conversation_id().to_string();

        let (tx, _rx) = mpsc::channel(32);
        thread.send("remember this", None, SendOptions::new(tx)).await.unwrap();

        let record = store.load(&conversation_id).await.unwrap();
        assert_eq!(record.canonical_messages.len(), 2);
        assert_eq!(record.created_at, thread.created_at);

        let provider: Arc<dyn Provider> = Arc::new(MockProvider);
        let mut deps2 = deps(provider, ToolRegistry::new());
        deps2.store = Some(store);
        let resumed = Thread::resume(record, AgentMode::Agent, default_config(), deps2, PromptSettings::default()).unwrap();
        assert_eq!(resumed.transcript().messages().len(), 2);
        assert_eq!(resumed.conversation_id(), conversation_id);
    }

    #[tokio::test]
    async fn subagent_usage_is_merged_into_parent_total() {
        use crate::task_tool::TaskTool;
        use std::sync::atomic::AtomicUsize;

        let provider: Arc<dyn Provider> =
            Arc::new(ScriptedMockProvider::tool_then_text("call-1", "task", r#"{"prompt":"do a thing"}"#, "parent done"));

        let (usage_tx, usage_rx) = mpsc::unbounded_channel();
        let mut tools = ToolRegistry::new();
        tools.register(TaskTool::new(
            Arc::new(MockProvider),
            Arc::new(ToolRegistry::new()),
            AgentConfig::default(),
            Arc::new(AtomicUsize::new(0)),
            usage_tx,
        ));

        let mut d = deps(provider, tools);
        d.child_usage_rx = Some(usage_rx);
        let mut thread = Thread::new("mock", AgentMode::Agent, default_config(), d, PromptSettings::default());

        let (tx, _rx) = mpsc::channel(64);
        let usage_before_children = ThreadUsage::default();
        let usage = thread.send("delegate this", None, SendOptions::new(tx)).await.unwrap();

        // The parent's tool-use round reports zero usage (scripted), its
        // final text round reports 10, and the subagent's single exchange
        // reports another 10 — merged in via `absorb_child_usage`.
        assert!(usage.input_tokens > usage_before_children.input_tokens);
        assert_eq!(usage.input_tokens, 20);
    }

    #[tokio::test]
    async fn cancelled_tool_call_is_bounded_by_grace_period() {
        let provider: Arc<dyn Provider> =
            Arc::new(ScriptedMockProvider::tool_then_text("call-1", "sleepy", r#"{}"#, "done"));
        let mut tools = ToolRegistry::new();
        tools.register(SleepyTool);
        let config = AgentConfig { tool_cancel_grace_ms: 50, ..default_config() };
        let mut thread = Thread::new("mock", AgentMode::Agent, config, deps(provider, tools), PromptSettings::default());

        let (tx, mut rx) = mpsc::channel(64);
        let mut opts = SendOptions::new(tx);
        let cancel = opts.cancel_token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let started = std::time::Instant::now();
        let err = thread.send("run sleepy", None, opts).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(matches!(err, ThreadError::Cancelled));

        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        let cancelled_shell_result = events.iter().any(|e| match e {
            AgentEvent::ToolResult { success: false, result, .. } => {
                matches!(result.kind, ResultKind::Shell { cancelled: true, .. })
            }
            _ => false,
        });
        assert!(cancelled_shell_result);
    }
}
