// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! OpenAI Responses API adapter. Unlike Chat Completions, the Responses
//! API can run statefully: passing `previous_response_id` lets the server
//! recall the prior turn's reasoning and tool context, so only the new
//! input items need to be sent. The id returned by each turn is cached
//! internally and threaded into the next call automatically unless the
//! caller overrides it via `SendOpts::previous_response_id`.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::Mutex;

use crate::{
    catalog,
    provider::{PriceTable, Provider, ResponseEvent, ResponseStream, SendOpts, ToolSchema, TurnEndReason, Usage},
    types::{parse_data_url, ContentBlock, Message, ResultKind, Role},
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiResponsesProvider {
    model: String,
    api_key: Option<String>,
    base_url: String,
    max_tokens: u32,
    temperature: Option<f32>,
    http: reqwest::Client,
    last_response_id: Mutex<Option<String>>,
}

impl OpenAiResponsesProvider {
    pub fn new(
        model: String,
        api_key: Option<String>,
        base_url: Option<String>,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Self {
        Self {
            max_tokens: max_tokens
                .unwrap_or_else(|| catalog::max_output_tokens("openai-responses", &model, 4096)),
            model,
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.into()),
            temperature,
            http: reqwest::Client::new(),
            last_response_id: Mutex::new(None),
        }
    }

    fn image_item(url: &str) -> Value {
        let _ = parse_data_url(url);
        json!({ "type": "input_image", "image_url": url })
    }

    fn message_to_items(m: &Message, items: &mut Vec<Value>) {
        let mut parts: Vec<Value> = Vec::new();
        for c in &m.content {
            match c {
                ContentBlock::Text { text } => parts.push(json!({ "type": "input_text", "text": text })),
                ContentBlock::Thinking { .. } | ContentBlock::Redacted { .. } => {}
                ContentBlock::ToolUse { call_id, tool_name, input } => {
                    items.push(json!({
                        "type": "function_call",
                        "call_id": call_id,
                        "name": tool_name,
                        "arguments": input.to_string(),
                    }));
                }
                ContentBlock::ToolResult { call_id, structured, .. } => {
                    items.push(json!({
                        "type": "function_call_output",
                        "call_id": call_id,
                        "output": structured_to_text(structured),
                    }));
                }
            }
        }
        if let Some(images) = &m.images {
            for img in images {
                parts.push(Self::image_item(&img.url));
            }
        }
        if !parts.is_empty() {
            let role = match m.role {
                Role::Assistant => "assistant",
                Role::User | Role::SystemSummary | Role::ToolResult => "user",
            };
            items.push(json!({ "role": role, "content": parts }));
        }
    }

    fn build_body(
        &self,
        system_prompt: &str,
        messages: &[Message],
        tools: &[ToolSchema],
        opts: &SendOpts,
    ) -> Value {
        let previous_response_id = opts
            .previous_response_id
            .clone()
            .or_else(|| self.last_response_id.lock().unwrap().clone());

        let mut items = Vec::new();
        let source_messages: &[Message] = if previous_response_id.is_some() {
            let tail = messages.len().saturating_sub(1);
            &messages[tail..]
        } else {
            messages
        };
        for m in source_messages {
            Self::message_to_items(m, &mut items);
        }

        let mut body = json!({
            "model": self.model,
            "input": items,
            "instructions": system_prompt,
            "max_output_tokens": self.max_tokens,
            "stream": true,
        });
        if let Some(id) = previous_response_id {
            body["previous_response_id"] = json!(id);
        }
        if !tools.is_empty() {
            let tool_defs: Vec<Value> = tools
                .iter()
                .map(|t| json!({
                    "type": "function",
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.input_schema,
                }))
                .collect();
            body["tools"] = Value::Array(tool_defs);
        }
        if let Some(t) = self.temperature {
            body["temperature"] = json!(t);
        }
        body
    }
}

fn structured_to_text(s: &crate::types::StructuredResult) -> String {
    match &s.kind {
        ResultKind::FileRead { lines, .. } => lines.join("\n"),
        ResultKind::Shell { stdout, stderr, exit_code, .. } => {
            if stderr.is_empty() {
                stdout.clone()
            } else {
                format!("{stdout}\n[stderr]\n{stderr}\n[exit {exit_code}]")
            }
        }
        ResultKind::Grep { matches, .. } => matches
            .iter()
            .map(|m| format!("{}:{}:{}: {}", m.path, m.line, m.col, m.text))
            .collect::<Vec<_>>()
            .join("\n"),
        ResultKind::Generic { text } => text.clone(),
    }
}

#[derive(Default)]
struct Accumulator {
    text: String,
    tool_calls: Vec<(String, String, String)>,
    response_id: Option<String>,
}

impl Accumulator {
    fn into_blocks(&mut self) -> Vec<ContentBlock> {
        let mut blocks = Vec::new();
        if !self.text.is_empty() {
            blocks.push(ContentBlock::text(std::mem::take(&mut self.text)));
        }
        for (call_id, tool_name, json_buf) in self.tool_calls.drain(..) {
            let input = serde_json::from_str(&json_buf).unwrap_or(Value::Object(Default::default()));
            blocks.push(ContentBlock::ToolUse { call_id, tool_name, input });
        }
        blocks
    }

    fn tool_slot(&mut self, item_id: &str) -> &mut (String, String, String) {
        if !self.tool_calls.iter().any(|(id, ..)| id == item_id) {
            self.tool_calls.push((item_id.to_string(), String::new(), String::new()));
        }
        self.tool_calls.iter_mut().find(|(id, ..)| id == item_id).unwrap()
    }
}

fn apply_event(acc: &mut Accumulator, event_type: &str, v: &Value) -> Vec<anyhow::Result<ResponseEvent>> {
    let mut out = Vec::new();
    match event_type {
        "response.output_text.delta" => {
            let delta = v["delta"].as_str().unwrap_or("");
            acc.text.push_str(delta);
            out.push(Ok(ResponseEvent::TextDelta(delta.to_string())));
        }
        "response.output_item.added" => {
            let item = &v["item"];
            if item["type"] == "function_call" {
                let call_id = item["call_id"].as_str().unwrap_or_default().to_string();
                let name = item["name"].as_str().map(String::from);
                let item_id = item["id"].as_str().unwrap_or(&call_id).to_string();
                let slot = acc.tool_slot(&item_id);
                slot.0 = call_id.clone();
                if let Some(n) = &name {
                    slot.1 = n.clone();
                }
                out.push(Ok(ResponseEvent::ToolCallPartial {
                    index: (acc.tool_calls.len() as u32).saturating_sub(1),
                    call_id: Some(call_id),
                    tool_name: name,
                    arguments_delta: String::new(),
                }));
            }
        }
        "response.function_call_arguments.delta" => {
            let item_id = v["item_id"].as_str().unwrap_or_default().to_string();
            let delta = v["delta"].as_str().unwrap_or("").to_string();
            let index = acc
                .tool_calls
                .iter()
                .position(|(id, ..)| *id == item_id)
                .unwrap_or(0);
            let slot = acc.tool_slot(&item_id);
            slot.2.push_str(&delta);
            out.push(Ok(ResponseEvent::ToolCallPartial {
                index: index as u32,
                call_id: None,
                tool_name: None,
                arguments_delta: delta,
            }));
        }
        "response.completed" | "response.incomplete" | "response.failed" => {
            let response = &v["response"];
            acc.response_id = response["id"].as_str().map(String::from);
            if let Some(usage) = response.get("usage").filter(|u| !u.is_null()) {
                out.push(Ok(ResponseEvent::Usage(Usage {
                    input_tokens: usage["input_tokens"].as_u64().unwrap_or(0) as u32,
                    output_tokens: usage["output_tokens"].as_u64().unwrap_or(0) as u32,
                    cache_read_tokens: usage["input_tokens_details"]["cached_tokens"].as_u64().unwrap_or(0) as u32,
                    cache_write_tokens: 0,
                })));
            }
            let has_tool_calls = !acc.tool_calls.is_empty();
            let blocks = acc.into_blocks();
            out.push(Ok(ResponseEvent::AssistantMessageComplete { blocks }));
            let reason = match event_type {
                "response.failed" => TurnEndReason::Error,
                "response.incomplete" => TurnEndReason::MaxTokens,
                _ if has_tool_calls => TurnEndReason::ToolUse,
                _ => TurnEndReason::Stop,
            };
            out.push(Ok(ResponseEvent::TurnEnd { reason }));
        }
        _ => {}
    }
    out
}

#[async_trait]
impl Provider for OpenAiResponsesProvider {
    fn name(&self) -> &str {
        "openai-responses"
    }
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn send_and_stream(
        &self,
        system_prompt: &str,
        messages: &[Message],
        tools: &[ToolSchema],
        opts: &SendOpts,
    ) -> anyhow::Result<ResponseStream> {
        let body = self.build_body(system_prompt, messages, tools, opts);

        let mut req = self.http.post(format!("{}/responses", self.base_url));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.json(&body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI Responses error {status}: {text}");
        }

        let byte_stream = resp.bytes_stream();
        let sse_events = byte_stream
            .scan(String::new(), |buf, chunk| {
                let text = match chunk {
                    Ok(b) => String::from_utf8_lossy(&b).to_string(),
                    Err(e) => return futures::future::ready(Some(vec![Err(anyhow::anyhow!(e))])),
                };
                buf.push_str(&text);
                let mut out = Vec::new();
                let mut pending_event: Option<String> = None;
                while let Some(pos) = buf.find('\n') {
                    let line = buf[..pos].trim_end_matches('\r').to_string();
                    buf.drain(..=pos);
                    if let Some(ev) = line.strip_prefix("event: ") {
                        pending_event = Some(ev.trim().to_string());
                    } else if let Some(data) = line.strip_prefix("data: ") {
                        if let Ok(v) = serde_json::from_str::<Value>(data.trim()) {
                            let event_type = pending_event
                                .clone()
                                .or_else(|| v["type"].as_str().map(String::from))
                                .unwrap_or_default();
                            out.push(Ok((event_type, v)));
                        }
                    }
                }
                futures::future::ready(Some(out))
            })
            .flat_map(futures::stream::iter);

        // `Accumulator` itself isn't `Send`-shareable across the scan closure
        // boundary cleanly with a `Mutex` write-back, so the response id is
        // captured via a side channel and stored after the stream completes.
        let last_id = &self.last_response_id;
        let assembled = sse_events
            .scan(Accumulator::default(), |acc, raw| {
                let (event_type, v) = match raw {
                    Ok(pair) => pair,
                    Err(e) => return futures::future::ready(Some(vec![Err(e)])),
                };
                let events = apply_event(acc, &event_type, &v);
                if let Some(id) = acc.response_id.clone() {
                    *last_id.lock().unwrap() = Some(id);
                }
                futures::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        let with_start = futures::stream::once(async { Ok(ResponseEvent::TurnStart) }).chain(assembled);
        Ok(Box::pin(with_start))
    }

    async fn summarize(&self, messages: &[Message], prompt: &str) -> anyhow::Result<String> {
        let mut stream = self.send_and_stream(prompt, messages, &[], &SendOpts::default()).await?;
        let mut text = String::new();
        while let Some(ev) = stream.next().await {
            if let ResponseEvent::TextDelta(t) = ev? {
                text.push_str(&t);
            }
        }
        Ok(text)
    }

    fn advertised_max_context(&self) -> u32 {
        catalog::context_window("openai-responses", &self.model, 128_000)
    }

    fn price_per_million(&self) -> PriceTable {
        catalog::price_per_million("openai-responses", &self.model)
    }

    fn serialize_messages(&self, messages: &[Message]) -> Value {
        let mut items = Vec::new();
        for m in messages {
            Self::message_to_items(m, &mut items);
        }
        Value::Array(items)
    }
}

// ── Unit tests ───────────────────────────────────────────────────────────
