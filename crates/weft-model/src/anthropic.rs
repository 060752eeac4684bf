// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Anthropic Messages API adapter: streaming text/thinking/tool-use deltas,
//! extended thinking, and prompt caching.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};

use crate::{
    catalog,
    provider::{PriceTable, Provider, ResponseEvent, ResponseStream, SendOpts, ToolSchema, TurnEndReason, Usage},
    types::{parse_data_url, ContentBlock, Message, ResultKind, Role},
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    model: String,
    api_key: Option<String>,
    base_url: String,
    max_tokens: u32,
    temperature: Option<f32>,
    http: reqwest::Client,

    cache_system_prompt: bool,
    extended_cache_time: bool,
    cache_tools: bool,
    cache_conversation: bool,
    cache_images: bool,
    cache_tool_results: bool,
}

impl AnthropicProvider {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model: String,
        api_key: Option<String>,
        base_url: Option<String>,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
        cache_system_prompt: bool,
        extended_cache_time: bool,
        cache_tools: bool,
        cache_conversation: bool,
        cache_images: bool,
        cache_tool_results: bool,
    ) -> Self {
        Self {
            max_tokens: max_tokens
                .unwrap_or_else(|| catalog::max_output_tokens("anthropic", &model, 8192)),
            model,
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.into()),
            temperature,
            http: reqwest::Client::new(),
            cache_system_prompt,
            extended_cache_time,
            cache_tools,
            cache_conversation,
            cache_images,
            cache_tool_results,
        }
    }

    fn cache_control(&self) -> Value {
        if self.extended_cache_time {
            json!({ "type": "ephemeral", "ttl": "1h" })
        } else {
            json!({ "type": "ephemeral" })
        }
    }

    fn image_block(&self, url: &str) -> Value {
        if let Some((mime, data)) = parse_data_url(url) {
            json!({ "type": "image", "source": { "type": "base64", "media_type": mime, "data": data } })
        } else {
            json!({ "type": "image", "source": { "type": "url", "url": url } })
        }
    }

    fn message_to_blocks(&self, m: &Message) -> Vec<Value> {
        let mut blocks = Vec::new();
        for c in &m.content {
            let block = match c {
                ContentBlock::Text { text } => json!({ "type": "text", "text": text }),
                ContentBlock::Thinking { text, signature } => {
                    json!({ "type": "thinking", "thinking": text, "signature": signature })
                }
                ContentBlock::ToolUse { call_id, tool_name, input } => {
                    json!({ "type": "tool_use", "id": call_id, "name": tool_name, "input": input })
                }
                ContentBlock::ToolResult { call_id, success, structured } => {
                    let mut block = json!({
                        "type": "tool_result",
                        "tool_use_id": call_id,
                        "content": structured_to_text(structured),
                        "is_error": !success,
                    });
                    if self.cache_tool_results {
                        block["cache_control"] = self.cache_control();
                    }
                    block
                }
                ContentBlock::Redacted { data } => json!({ "type": "redacted_thinking", "data": data }),
            };
            blocks.push(block);
        }
        if let Some(images) = &m.images {
            for img in images {
                let mut block = self.image_block(&img.url);
                if self.cache_images {
                    block["cache_control"] = self.cache_control();
                }
                blocks.push(block);
            }
        }
        blocks
    }

    fn wire_role(role: Role) -> &'static str {
        match role {
            Role::Assistant => "assistant",
            // Anthropic expects tool_result content blocks inside a
            // user-role message, and we fold the leading system-summary
            // into the first user turn of the window.
            Role::User | Role::ToolResult | Role::SystemSummary => "user",
        }
    }

    fn build_body(
        &self,
        system_prompt: &str,
        messages: &[Message],
        tools: &[ToolSchema],
        opts: &SendOpts,
    ) -> Value {
        let mut system_blocks = vec![json!({ "type": "text", "text": system_prompt })];
        if self.cache_system_prompt {
            if let Some(last) = system_blocks.last_mut() {
                last["cache_control"] = self.cache_control();
            }
        }

        let mut wire_messages = Vec::with_capacity(messages.len());
        for (i, m) in messages.iter().enumerate() {
            let mut content = self.message_to_blocks(m);
            if self.cache_conversation && i == messages.len() - 1 {
                if let Some(last) = content.last_mut() {
                    last["cache_control"] = self.cache_control();
                }
            }
            wire_messages.push(json!({ "role": Self::wire_role(m.role), "content": content }));
        }

        let mut tool_defs: Vec<Value> = tools
            .iter()
            .map(|t| json!({ "name": t.name, "description": t.description, "input_schema": t.input_schema }))
            .collect();
        if self.cache_tools {
            if let Some(last) = tool_defs.last_mut() {
                last["cache_control"] = self.cache_control();
            }
        }

        let mut body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": wire_messages,
            "system": system_blocks,
            "stream": true,
        });
        if !tool_defs.is_empty() {
            body["tools"] = Value::Array(tool_defs);
        }
        if let Some(t) = self.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(budget) = opts.thinking_budget_tokens {
            body["thinking"] = json!({ "type": "enabled", "budget_tokens": budget });
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

/// Running accumulator for one turn's streamed content blocks, so the
/// adapter can emit `AssistantMessageComplete` with the same shape it will
/// persist to the transcript.
#[derive(Default)]
struct Accumulator {
    text: String,
    thinking: String,
    thinking_signature: Option<String>,
    tool_calls: Vec<(String, String, String)>, // (call_id, tool_name, json_buf)
    current_tool_index: Option<usize>,
}

impl Accumulator {
    fn into_blocks(self) -> Vec<ContentBlock> {
        let mut blocks = Vec::new();
        if !self.thinking.is_empty() {
            blocks.push(ContentBlock::Thinking { text: self.thinking, signature: self.thinking_signature });
        }
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

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
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

        let mut req = self
            .http
            .post(format!("{}/messages", self.base_url))
            .header("content-type", "application/json")
            .header("anthropic-version", API_VERSION);
        if let Some(key) = &self.api_key {
            req = req.header("x-api-key", key);
        }
        if opts.thinking_budget_tokens.is_some() || self.cache_system_prompt || self.cache_tools {
            let mut betas = vec!["prompt-caching-2024-07-31"];
            if self.extended_cache_time {
                betas.push("extended-cache-ttl-2025-04-11");
            }
            req = req.header("anthropic-beta", betas.join(","));
        }

        let resp = req.json(&body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Anthropic error {status}: {text}");
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
                        if let Ok(v) = serde_json::from_str::<Value>(data.trim()) {
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
            futures::future::ready(Some(apply_event(acc, &v)))
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
        catalog::context_window("anthropic", &self.model, 200_000)
    }

    fn price_per_million(&self) -> PriceTable {
        catalog::price_per_million("anthropic", &self.model)
    }

    fn serialize_messages(&self, messages: &[Message]) -> Value {
        let wire_messages: Vec<Value> = messages
            .iter()
            .map(|m| json!({ "role": Self::wire_role(m.role), "content": self.message_to_blocks(m) }))
            .collect();
        Value::Array(wire_messages)
    }
}

/// Translate one Anthropic SSE event into zero or more unified
/// [`ResponseEvent`]s, mutating `acc` so the eventual
/// `AssistantMessageComplete` carries the full assembled message.
fn apply_event(acc: &mut Accumulator, v: &Value) -> Vec<anyhow::Result<ResponseEvent>> {
    let event_type = v["type"].as_str().unwrap_or("");
    match event_type {
        "content_block_start" => {
            let index = v["index"].as_u64().unwrap_or(0) as usize;
            let block = &v["content_block"];
            if block["type"].as_str() == Some("tool_use") {
                let id = block["id"].as_str().unwrap_or("").to_string();
                let name = block["name"].as_str().unwrap_or("").to_string();
                acc.tool_calls.push((id.clone(), name.clone(), String::new()));
                acc.current_tool_index = Some(acc.tool_calls.len() - 1);
                vec![Ok(ResponseEvent::ToolCallPartial {
                    index: index as u32,
                    call_id: Some(id),
                    tool_name: Some(name),
                    arguments_delta: String::new(),
                })]
            } else if block["type"].as_str() == Some("thinking") {
                vec![Ok(ResponseEvent::ThinkingStart)]
            } else {
                vec![]
            }
        }
        "content_block_delta" => {
            let index = v["index"].as_u64().unwrap_or(0) as u32;
            let delta = &v["delta"];
            match delta["type"].as_str().unwrap_or("") {
                "text_delta" => {
                    let text = delta["text"].as_str().unwrap_or("").to_string();
                    acc.text.push_str(&text);
                    vec![Ok(ResponseEvent::TextDelta(text))]
                }
                "input_json_delta" => {
                    let partial = delta["partial_json"].as_str().unwrap_or("").to_string();
                    if let Some(i) = acc.current_tool_index {
                        acc.tool_calls[i].2.push_str(&partial);
                    }
                    vec![Ok(ResponseEvent::ToolCallPartial {
                        index,
                        call_id: None,
                        tool_name: None,
                        arguments_delta: partial,
                    })]
                }
                "thinking_delta" => {
                    let thinking = delta["thinking"].as_str().unwrap_or("").to_string();
                    acc.thinking.push_str(&thinking);
                    vec![Ok(ResponseEvent::ThinkingDelta(thinking))]
                }
                "signature_delta" => {
                    let sig = delta["signature"].as_str().unwrap_or("").to_string();
                    acc.thinking_signature.get_or_insert_with(String::new).push_str(&sig);
                    vec![]
                }
                _ => vec![],
            }
        }
        "content_block_stop" => {
            if !acc.thinking.is_empty() && acc.current_tool_index.is_none() {
                vec![Ok(ResponseEvent::ThinkingEnd { signature: acc.thinking_signature.clone() })]
            } else {
                vec![]
            }
        }
        "message_start" => {
            if let Some(usage) = v["message"].get("usage") {
                vec![Ok(ResponseEvent::Usage(Usage {
                    input_tokens: usage["input_tokens"].as_u64().unwrap_or(0) as u32,
                    output_tokens: 0,
                    cache_read_tokens: usage["cache_read_input_tokens"].as_u64().unwrap_or(0) as u32,
                    cache_write_tokens: usage["cache_creation_input_tokens"].as_u64().unwrap_or(0) as u32,
                }))]
            } else {
                vec![]
            }
        }
        "message_delta" => {
            let mut out = Vec::new();
            if let Some(usage) = v.get("usage") {
                out.push(Ok(ResponseEvent::Usage(Usage {
                    input_tokens: 0,
                    output_tokens: usage["output_tokens"].as_u64().unwrap_or(0) as u32,
                    cache_read_tokens: 0,
                    cache_write_tokens: 0,
                })));
            }
            let stop_reason = v["delta"]["stop_reason"].as_str().unwrap_or("");
            let reason = match stop_reason {
                "tool_use" => Some(TurnEndReason::ToolUse),
                "max_tokens" => Some(TurnEndReason::MaxTokens),
                "refusal" => Some(TurnEndReason::Refusal),
                "end_turn" | "stop_sequence" => Some(TurnEndReason::Stop),
                _ => None,
            };
            if let Some(reason) = reason {
                let blocks = std::mem::take(acc).into_blocks();
                out.push(Ok(ResponseEvent::AssistantMessageComplete { blocks }));
                out.push(Ok(ResponseEvent::TurnEnd { reason }));
            }
            out
        }
        _ => vec![],
    }
}

// ── Unit tests ───────────────────────────────────────────────────────────
