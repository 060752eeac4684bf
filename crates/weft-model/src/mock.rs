// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Deterministic, network-free providers used by `weft-core`'s thread tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use crate::{
    catalog::InputModality,
    provider::{PriceTable, Provider, ResponseEvent, ResponseStream, SendOpts, ToolSchema, TurnEndReason, Usage},
    types::Message,
};

fn text_turn(text: impl Into<String>) -> Vec<ResponseEvent> {
    vec![
        ResponseEvent::TurnStart,
        ResponseEvent::TextDelta(text.into()),
        ResponseEvent::AssistantMessageComplete {
            blocks: vec![crate::types::ContentBlock::text("")],
        },
        ResponseEvent::Usage(Usage { input_tokens: 10, output_tokens: 10, ..Default::default() }),
        ResponseEvent::TurnEnd { reason: TurnEndReason::Stop },
    ]
}

/// Echoes the last user message back as the assistant response. Useful for
/// smoke tests that don't care about exact event shape.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn send_and_stream(
        &self,
        _system_prompt: &str,
        messages: &[Message],
        _tools: &[ToolSchema],
        _opts: &SendOpts,
    ) -> anyhow::Result<ResponseStream> {
        let reply = messages
            .iter()
            .rev()
            .find(|m| m.role == crate::types::Role::User)
            .and_then(|m| m.as_text())
            .unwrap_or("[no input]")
            .to_string();

        let mut events = vec![ResponseEvent::TurnStart, ResponseEvent::TextDelta(format!("MOCK: {reply}"))];
        events.push(ResponseEvent::AssistantMessageComplete {
            blocks: vec![crate::types::ContentBlock::text(format!("MOCK: {reply}"))],
        });
        events.push(ResponseEvent::Usage(Usage {
            input_tokens: 10,
            output_tokens: 10,
            ..Default::default()
        }));
        events.push(ResponseEvent::TurnEnd { reason: TurnEndReason::Stop });

        let wrapped: Vec<anyhow::Result<ResponseEvent>> = events.into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(wrapped)))
    }

    async fn summarize(&self, _messages: &[Message], _prompt: &str) -> anyhow::Result<String> {
        Ok("mock summary".into())
    }

    fn advertised_max_context(&self) -> u32 {
        100_000
    }

    fn price_per_million(&self) -> PriceTable {
        PriceTable::default()
    }
}

/// A pre-scripted provider. Each call to `send_and_stream` pops the next
/// response script from the front of the queue, so tests can specify exact
/// event sequences — including tool calls — without network access.
pub struct ScriptedMockProvider {
    scripts: Arc<Mutex<Vec<Vec<ResponseEvent>>>>,
    name: String,
    modalities: Vec<InputModality>,
    /// The messages seen by the last `send_and_stream` call.
    pub last_messages: Arc<Mutex<Option<Vec<Message>>>>,
}

impl ScriptedMockProvider {
    pub fn new(scripts: Vec<Vec<ResponseEvent>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            name: "scripted-mock".into(),
            modalities: vec![InputModality::Text],
            last_messages: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_vision(mut self) -> Self {
        self.modalities = vec![InputModality::Text, InputModality::Image];
        self
    }

    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![text_turn(reply)])
    }

    /// Round 1: the model emits a single tool call. Round 2: it responds
    /// with final text after the tool result comes back.
    pub fn tool_then_text(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        args_json: impl Into<String>,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            vec![
                ResponseEvent::TurnStart,
                ResponseEvent::ToolCallPartial {
                    index: 0,
                    call_id: Some(call_id.into()),
                    tool_name: Some(tool_name.into()),
                    arguments_delta: args_json.into(),
                },
                ResponseEvent::AssistantMessageComplete { blocks: vec![] },
                ResponseEvent::Usage(Usage::default()),
                ResponseEvent::TurnEnd { reason: TurnEndReason::ToolUse },
            ],
            text_turn(final_text),
        ])
    }
}

#[async_trait]
impl Provider for ScriptedMockProvider {
    fn name(&self) -> &str {
        &self.name
    }
    fn model_name(&self) -> &str {
        "scripted-mock-model"
    }

    async fn send_and_stream(
        &self,
        _system_prompt: &str,
        messages: &[Message],
        _tools: &[ToolSchema],
        _opts: &SendOpts,
    ) -> anyhow::Result<ResponseStream> {
        *self.last_messages.lock().unwrap() = Some(messages.to_vec());
        let events = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                vec![
                    ResponseEvent::TurnStart,
                    ResponseEvent::TextDelta("[no more scripts]".into()),
                    ResponseEvent::AssistantMessageComplete {
                        blocks: vec![crate::types::ContentBlock::text("[no more scripts]")],
                    },
                    ResponseEvent::Usage(Usage::default()),
                    ResponseEvent::TurnEnd { reason: TurnEndReason::Stop },
                ]
            } else {
                scripts.remove(0)
            }
        };
        let wrapped: Vec<anyhow::Result<ResponseEvent>> = events.into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(wrapped)))
    }

    async fn summarize(&self, _messages: &[Message], _prompt: &str) -> anyhow::Result<String> {
        Ok("scripted summary".into())
    }

    fn advertised_max_context(&self) -> u32 {
        100_000
    }

    fn price_per_million(&self) -> PriceTable {
        PriceTable::default()
    }
}

// ─── Unit tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::types::Message;

    fn one_user_message() -> Vec<Message> {
        let mut t = crate::types::Transcript::new();
        t.append_user("hi", None);
        t.messages().to_vec()
    }

    #[tokio::test]
    async fn mock_echoes_last_user_message() {
        let p = MockProvider;
        let msgs = one_user_message();
        let mut stream = p.send_and_stream("", &msgs, &[], &SendOpts::default()).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert!(matches!(first, ResponseEvent::TurnStart));
        let second = stream.next().await.unwrap().unwrap();
        match second {
            ResponseEvent::TextDelta(t) => assert!(t.contains("MOCK: hi")),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn mock_ends_with_turn_end() {
        let p = MockProvider;
        let msgs = one_user_message();
        let mut stream = p.send_and_stream("", &msgs, &[], &SendOpts::default()).await.unwrap();
        let mut events = Vec::new();
        while let Some(ev) = stream.next().await {
            events.push(ev.unwrap());
        }
        assert!(matches!(events.last(), Some(ResponseEvent::TurnEnd { reason: TurnEndReason::Stop })));
    }

    #[tokio::test]
    async fn scripted_single_text_reply() {
        let p = ScriptedMockProvider::always_text("hello world");
        let msgs = one_user_message();
        let mut stream = p.send_and_stream("", &msgs, &[], &SendOpts::default()).await.unwrap();
        stream.next().await; // TurnStart
        let ev = stream.next().await.unwrap().unwrap();
        assert!(matches!(ev, ResponseEvent::TextDelta(t) if t == "hello world"));
    }

    #[tokio::test]
    async fn scripted_tool_then_text_two_rounds() {
        let p = ScriptedMockProvider::tool_then_text("call-1", "shell", r#"{"command":"ls"}"#, "done");
        let msgs = one_user_message();

        let mut round1 = Vec::new();
        let mut s1 = p.send_and_stream("", &msgs, &[], &SendOpts::default()).await.unwrap();
        while let Some(ev) = s1.next().await {
            round1.push(ev.unwrap());
        }
        assert!(round1
            .iter()
            .any(|e| matches!(e, ResponseEvent::ToolCallPartial { tool_name: Some(n), .. } if n == "shell")));

        let mut round2 = Vec::new();
        let mut s2 = p.send_and_stream("", &msgs, &[], &SendOpts::default()).await.unwrap();
        while let Some(ev) = s2.next().await {
            round2.push(ev.unwrap());
        }
        assert!(round2.iter().any(|e| matches!(e, ResponseEvent::TextDelta(t) if t == "done")));
    }

    #[tokio::test]
    async fn scripted_fallback_when_scripts_exhausted() {
        let p = ScriptedMockProvider::new(vec![]);
        let msgs = one_user_message();
        let mut stream = p.send_and_stream("", &msgs, &[], &SendOpts::default()).await.unwrap();
        stream.next().await; // TurnStart
        let ev = stream.next().await.unwrap().unwrap();
        assert!(matches!(ev, ResponseEvent::TextDelta(t) if t.contains("no more scripts")));
    }

    #[tokio::test]
    async fn scripted_records_last_messages_seen() {
        let p = ScriptedMockProvider::always_text("ok");
        let msgs = one_user_message();
        let _ = p.send_and_stream("", &msgs, &[], &SendOpts::default()).await.unwrap();
        assert!(p.last_messages.lock().unwrap().is_some());
    }
}
