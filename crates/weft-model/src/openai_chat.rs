// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! OpenAI Chat Completions API adapter: streaming deltas, parallel tool
//! calls addressed by array index, no native prompt-caching control (the
//! API caches automatically on the provider side).

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};

use crate::{
    catalog,
    provider::{PriceTable, Provider, ResponseEvent, ResponseStream, SendOpts, ToolSchema, TurnEndReason, Usage},
    types::{parse_data_url, ContentBlock, Message, ResultKind, Role},
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiChatProvider {
    model: String,
    api_key: Option<String>,
    base_url: String,
    max_tokens: u32,
    temperature: Option<f32>,
    http: reqwest::Client,
}

impl OpenAiChatProvider {
    pub fn new(
        model: String,
        api_key: Option<String>,
        base_url: Option<String>,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Self {
        Self {
            max_tokens: max_tokens
                .unwrap_or_else(|| catalog::max_output_tokens("openai-chat", &model, 4096)),
            model,
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.into()),
            temperature,
            http: reqwest::Client::new(),
        }
    }

    fn image_block(url: &str) -> Value {
        if parse_data_url(url).is_some() {
            json!({ "type": "image_url", "image_url": { "url": url } })
        } else {
            json!({ "type": "image_url", "image_url": { "url": url } })
        }
    }

    /// One `ToolResult` content block fans out into one standalone
    /// `role: "tool"` message; every other block folds into the owning
    /// message's `content` array (or a single string when it's the only
    /// text block, matching what most Chat Completions-compatible servers
    /// expect).
    fn message_to_wire(&self, m: &Message, wire_messages: &mut Vec<Value>) {
        let mut parts: Vec<Value> = Vec::new();
        let mut tool_calls: Vec<Value> = Vec::new();

        for c in &m.content {
            match c {
                ContentBlock::Text { text } => parts.push(json!({ "type": "text", "text": text })),
                ContentBlock::Thinking { .. } | ContentBlock::Redacted { .. } => {
                    // Chat Completions has no reasoning-block wire shape; dropped.
                }
                ContentBlock::ToolUse { call_id, tool_name, input } => {
                    tool_calls.push(json!({
                        "id": call_id,
                        "type": "function",
                        "function": { "name": tool_name, "arguments": input.to_string() },
                    }));
                }
                ContentBlock::ToolResult { call_id, structured, .. } => {
                    wire_messages.push(json!({
                        "role": "tool",
                        "tool_call_id": call_id,
                        "content": structured_to_text(structured),
                    }));
                }
            }
        }
        if let Some(images) = &m.images {
            for img in images {
                parts.push(Self::image_block(&img.url));
            }
        }

        if parts.is_empty() && tool_calls.is_empty() {
            return;
        }

        let role = match m.role {
            Role::Assistant => "assistant",
            Role::User | Role::SystemSummary => "user",
            // ToolResult messages are split into individual "tool" messages
            // above; nothing else to emit for the wrapping message itself.
            Role::ToolResult => return,
        };

        let content = if parts.len() == 1 {
            if let Some(text) = parts[0].get("text").and_then(|t| t.as_str()) {
                json!(text)
            } else {
                Value::Array(parts)
            }
        } else if parts.is_empty() {
            Value::Null
        } else {
            Value::Array(parts)
        };

        let mut wire = json!({ "role": role, "content": content });
        if !tool_calls.is_empty() {
            wire["tool_calls"] = Value::Array(tool_calls);
            if content.is_null() {
                wire["content"] = Value::Null;
            }
        }
        wire_messages.push(wire);
    }

    fn build_body(&self, system_prompt: &str, messages: &[Message], tools: &[ToolSchema]) -> Value {
        let mut wire_messages = vec![json!({ "role": "system", "content": system_prompt })];
        for m in messages {
            self.message_to_wire(m, &mut wire_messages);
        }

        let mut body = json!({
            "model": self.model,
            "messages": wire_messages,
            "max_tokens": self.max_tokens,
            "stream": true,
            "stream_options": { "include_usage": true },
        });
        if !tools.is_empty() {
            let tool_defs: Vec<Value> = tools
                .iter()
                .map(|t| json!({
                    "type": "function",
                    "function": { "name": t.name, "description": t.description, "parameters": t.input_schema },
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
    /// Keyed by the provider's `index` so interleaved deltas land correctly.
    tool_calls: Vec<(String, String, String)>,
}

impl Accumulator {
    fn into_blocks(self) -> Vec<ContentBlock> {
        let mut blocks = Vec::new();
        if !self.text.is_empty() {
            blocks.push(ContentBlock::text(self.text));
        }
        for (call_id, tool_name, json_buf) in self.tool_calls {
            let input = serde_json::from_str(&json_buf).unwrap_or(Value::Object(Default::default()));
            blocks.push(ContentBlock::ToolUse { call_id, tool_name, input });
        }
        blocks
    }
}

fn ensure_slot(acc: &mut Accumulator, index: usize) {
    while acc.tool_calls.len() <= index {
        acc.tool_calls.push((String::new(), String::new(), String::new()));
    }
}

fn apply_chunk(acc: &mut Accumulator, v: &Value) -> Vec<anyhow::Result<ResponseEvent>> {
    let mut out = Vec::new();

    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        out.push(Ok(ResponseEvent::Usage(Usage {
            input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
            cache_read_tokens: usage["prompt_tokens_details"]["cached_tokens"].as_u64().unwrap_or(0) as u32,
            cache_write_tokens: 0,
        })));
    }

    let Some(choice) = v["choices"].get(0) else {
        return out;
    };
    let delta = &choice["delta"];

    if let Some(text) = delta["content"].as_str() {
        if !text.is_empty() {
            acc.text.push_str(text);
            out.push(Ok(ResponseEvent::TextDelta(text.to_string())));
        }
    }

    if let Some(calls) = delta["tool_calls"].as_array() {
        for tc in calls {
            let index = tc["index"].as_u64().unwrap_or(0) as usize;
            ensure_slot(acc, index);
            let id = tc["id"].as_str();
            let name = tc["function"]["name"].as_str();
            if let Some(id) = id {
                acc.tool_calls[index].0 = id.to_string();
            }
            if let Some(name) = name {
                acc.tool_calls[index].1 = name.to_string();
            }
            let args_delta = tc["function"]["arguments"].as_str().unwrap_or("");
            acc.tool_calls[index].2.push_str(args_delta);
            out.push(Ok(ResponseEvent::ToolCallPartial {
                index: index as u32,
                call_id: id.map(String::from),
                tool_name: name.map(String::from),
                arguments_delta: args_delta.to_string(),
            }));
        }
    }

    if let Some(reason) = choice["finish_reason"].as_str() {
        let reason = match reason {
            "tool_calls" => TurnEndReason::ToolUse,
            "length" => TurnEndReason::MaxTokens,
            "content_filter" => TurnEndReason::Refusal,
            _ => TurnEndReason::Stop,
        };
        let blocks = std::mem::take(acc).into_blocks();
        out.push(Ok(ResponseEvent::AssistantMessageComplete { blocks }));
        out.push(Ok(ResponseEvent::TurnEnd { reason }));
    }

    out
}

#[async_trait]
impl Provider for OpenAiChatProvider {
    fn name(&self) -> &str {
        "openai-chat"
    }
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn send_and_stream(
        &self,
        system_prompt: &str,
        messages: &[Message],
        tools: &[ToolSchema],
        _opts: &SendOpts,
    ) -> anyhow::Result<ResponseStream> {
        let body = self.build_body(system_prompt, messages, tools);

        let mut req = self.http.post(format!("{}/chat/completions", self.base_url));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.json(&body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI Chat Completions error {status}: {text}");
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
                while let Some(pos) = buf.find('\n') {
                    let line = buf[..pos].trim_end_matches('\r').to_string();
                    buf.drain(..=pos);
                    if let Some(data) = line.strip_prefix("data: ") {
                        let data = data.trim();
                        if data == "[DONE]" {
                            continue;
                        }
                        if let Ok(v) = serde_json::from_str::<Value>(data) {
                            out.push(Ok(v));
                        }
                    }
                }
                futures::future::ready(Some(out))
            })
            .flat_map(futures::stream::iter);

        let assembled = sse_events.scan(Accumulator::default(), |acc, raw| {
            let v = match raw {
                Ok(v) => v,
                Err(e) => return futures::future::ready(Some(vec![Err(e)])),
            };
            futures::future::ready(Some(apply_chunk(acc, &v)))
        });

        let flat = assembled.flat_map(futures::stream::iter);
        let with_start = futures::stream::once(async { Ok(ResponseEvent::TurnStart) }).chain(flat);
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
        catalog::context_window("openai-chat", &self.model, 128_000)
    }

    fn price_per_million(&self) -> PriceTable {
        catalog::price_per_million("openai-chat", &self.model)
    }

    fn supports_parallel_tool_calls(&self) -> bool {
        true
    }

    fn serialize_messages(&self, messages: &[Message]) -> Value {
        let mut wire_messages = Vec::new();
        for m in messages {
            self.message_to_wire(m, &mut wire_messages);
        }
        Value::Array(wire_messages)
    }
}

// ── Unit tests ───────────────────────────────────────────────────────────
