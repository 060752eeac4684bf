// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! End-to-end tests driving `weft-core`'s [`Thread`] against the mock model
//! provider and a toy tool registry, exercising the same exchange loop the
//! binary uses without any network access.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use weft_config::{AgentConfig, AgentMode, Config, ToolsConfig};
use weft_core::{AgentEvent, NoopHooks, PromptSettings, SendOptions, SteerBus, Thread, ThreadDeps, ThreadError};
use weft_model::{MockProvider, Provider, ScriptedMockProvider};
use weft_tools::{ApprovalPolicy, State, Tool, ToolCall, ToolOutput, ToolRegistry};

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
        ToolOutput::ok(&call.id, "hi\n")
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

#[tokio::test]
async fn thread_send_returns_mock_text_response() {
    let provider: Arc<dyn Provider> = Arc::new(MockProvider);
    let mut thread = Thread::new(
        "mock",
        AgentMode::Agent,
        AgentConfig::default(),
        deps(provider, ToolRegistry::new()),
        PromptSettings::default(),
    );

    let (tx, mut rx) = mpsc::channel(64);
    thread.send("hello", None, SendOptions::new(tx)).await.unwrap();

    let mut got_text = false;
    while let Ok(event) = rx.try_recv() {
        if let AgentEvent::TextDelta(t) = event {
            assert!(t.contains("MOCK"));
            got_text = true;
        }
    }
    assert!(got_text, "expected at least one TextDelta event");
}

#[tokio::test]
async fn thread_round_trips_a_tool_call() {
    let provider: Arc<dyn Provider> =
        Arc::new(ScriptedMockProvider::tool_then_text("call-1", "shell", r#"{"command":"echo hi"}"#, "done"));
    let mut tools = ToolRegistry::new();
    tools.register(EchoShellTool);
    let mut thread = Thread::new(
        "mock",
        AgentMode::Agent,
        AgentConfig { tool_result_token_cap: 0, ..AgentConfig::default() },
        deps(provider, tools),
        PromptSettings::default(),
    );

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
async fn thread_errors_when_turn_cap_is_exceeded() {
    let provider: Arc<dyn Provider> =
        Arc::new(ScriptedMockProvider::tool_then_text("call-1", "shell", r#"{"command":"ls"}"#, "done"));
    let mut tools = ToolRegistry::new();
    tools.register(EchoShellTool);
    let config = AgentConfig { max_turns: 1, ..AgentConfig::default() };
    let mut thread = Thread::new("mock", AgentMode::Agent, config, deps(provider, tools), PromptSettings::default());

    let (tx, _rx) = mpsc::channel(64);
    let err = thread.send("do a multi-step task", None, SendOptions::new(tx)).await.unwrap_err();
    assert!(matches!(err, ThreadError::TurnCapped(1)));
}

#[test]
fn config_defaults_are_valid() {
    let cfg = Config::default();
    assert_eq!(cfg.model.provider, "anthropic");
    assert!(cfg.agent.compaction_keep_recent > 0);
}

#[test]
fn tool_policy_auto_approves_plain_commands() {
    use weft_tools::ToolPolicy;

    let cfg = ToolsConfig::default();
    let policy = ToolPolicy::from_config(&cfg);
    assert_eq!(policy.decide("cat /etc/hosts"), ApprovalPolicy::Auto);
}
