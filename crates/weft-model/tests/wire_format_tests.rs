// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Wire-format tests: spin up a minimal HTTP/1.1 mock server, point a driver
//! built via [`from_config`] at it, issue a turn, and assert both the HTTP
//! request the driver sent and the [`ResponseEvent`]s it emitted.
//!
//! These tests run without any API keys and without external network access.

use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use weft_config::ModelConfig;
use weft_model::{from_config, ResponseEvent, SendOpts, Transcript};

// ── Minimal one-shot HTTP/1.1 mock server ─────────────────────────────────

struct CapturedRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: Value,
}

async fn mock_server_once(
    status: u16,
    resp_body: impl Into<String> + Send + 'static,
) -> (u16, tokio::sync::oneshot::Receiver<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = tokio::sync::oneshot::channel::<CapturedRequest>();

    tokio::spawn(async move {
        let resp_body: String = resp_body.into();
        let (stream, _) = listener.accept().await.expect("accept");
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let mut request_line = String::new();
        reader.read_line(&mut request_line).await.unwrap();
        let request_line = request_line.trim().to_string();
        let mut parts = request_line.splitn(3, ' ');
        let method = parts.next().unwrap_or("").to_string();
        let path = parts.next().unwrap_or("").to_string();

        let mut headers: HashMap<String, String> = HashMap::new();
        let mut content_length: usize = 0;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }
            if let Some((k, v)) = trimmed.split_once(": ") {
                let key = k.to_lowercase();
                if key == "content-length" {
                    content_length = v.parse().unwrap_or(0);
                }
                headers.insert(key, v.to_string());
            }
        }

        let mut body_bytes = vec![0u8; content_length];
        reader.read_exact(&mut body_bytes).await.unwrap();
        let body: Value = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);

        let _ = tx.send(CapturedRequest { method, path, headers, body });

        let http_resp = format!(
            "HTTP/1.1 {status} OK\r\nContent-Type: text/event-stream\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            resp_body.len(),
            resp_body,
        );
        let _ = write_half.write_all(http_resp.as_bytes()).await;
    });

    (port, rx)
}

fn sse(lines: &[&str]) -> String {
    lines.iter().map(|l| format!("data: {l}\n\n")).collect()
}

fn no_cache_anthropic_cfg(base_url: String) -> ModelConfig {
    ModelConfig {
        provider: "anthropic".into(),
        name: "claude-3-haiku-20240307".into(),
        api_key: Some("sk-ant-test".into()),
        base_url: Some(base_url),
        max_tokens: Some(64),
        cache_system_prompt: false,
        cache_tools: false,
        cache_conversation: false,
        cache_images: false,
        cache_tool_results: false,
        ..ModelConfig::default()
    }
}

// ── Anthropic ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn anthropic_sends_correct_request_shape_and_auth() {
    let body_sse = sse(&[
        r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"hi"}}"#,
        r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":1}}"#,
    ]);
    let (port, req_rx) = mock_server_once(200, body_sse).await;

    let cfg = no_cache_anthropic_cfg(format!("http://127.0.0.1:{port}/v1"));
    let provider = from_config(&cfg).unwrap();

    let mut t = Transcript::new();
    t.append_user("hello", None);
    let mut stream =
        provider.send_and_stream("be brief", t.messages(), &[], &SendOpts::default()).await.unwrap();

    let mut got_text = false;
    while let Some(ev) = stream.next().await {
        if let ResponseEvent::TextDelta(text) = ev.unwrap() {
            got_text = got_text || text == "hi";
        }
    }
    assert!(got_text);

    let req = req_rx.await.unwrap();
    assert_eq!(req.method, "POST");
    assert_eq!(req.path, "/v1/messages");
    assert_eq!(req.headers.get("x-api-key").unwrap(), "sk-ant-test");
    assert!(req.headers.get("authorization").is_none(), "Anthropic must not send a Bearer header");
    assert_eq!(req.headers.get("anthropic-version").unwrap(), "2023-06-01");
    // No caching flags set, so the system prompt is a plain text block with no cache_control.
    assert_eq!(req.body["system"][0]["text"], "be brief");
    assert!(req.body["system"][0].get("cache_control").is_none());
}

#[tokio::test]
async fn anthropic_tools_use_input_schema_not_parameters() {
    let (port, req_rx) = mock_server_once(200, sse(&[r#"{"type":"message_delta","delta":{}}"#])).await;
    let cfg = no_cache_anthropic_cfg(format!("http://127.0.0.1:{port}/v1"));
    let provider = from_config(&cfg).unwrap();

    let mut t = Transcript::new();
    t.append_user("run ls", None);
    let tools = vec![weft_model::ToolSchema {
        name: "shell".into(),
        description: "run shell commands".into(),
        input_schema: serde_json::json!({"type": "object", "properties": {"cmd": {"type": "string"}}}),
    }];
    let mut stream = provider.send_and_stream("sys", t.messages(), &tools, &SendOpts::default()).await.unwrap();
    while stream.next().await.is_some() {}

    let req = req_rx.await.unwrap();
    let wire_tools = req.body["tools"].as_array().unwrap();
    assert_eq!(wire_tools[0]["name"], "shell");
    assert!(wire_tools[0]["input_schema"].is_object());
    assert!(wire_tools[0].get("parameters").is_none());
}

#[tokio::test]
async fn anthropic_cache_system_prompt_adds_cache_control() {
    let (port, req_rx) = mock_server_once(200, sse(&[r#"{"type":"message_delta","delta":{}}"#])).await;
    let mut cfg = no_cache_anthropic_cfg(format!("http://127.0.0.1:{port}/v1"));
    cfg.cache_system_prompt = true;
    let provider = from_config(&cfg).unwrap();

    let mut t = Transcript::new();
    t.append_user("hi", None);
    let mut stream = provider.send_and_stream("be helpful", t.messages(), &[], &SendOpts::default()).await.unwrap();
    while stream.next().await.is_some() {}

    let req = req_rx.await.unwrap();
    assert_eq!(req.body["system"][0]["cache_control"]["type"], "ephemeral");
    let beta = req.headers.get("anthropic-beta").expect("beta header required for caching");
    assert!(beta.contains("prompt-caching-2024-07-31"));
}

#[tokio::test]
async fn anthropic_thinking_budget_included_when_requested() {
    let (port, req_rx) = mock_server_once(200, sse(&[r#"{"type":"message_delta","delta":{}}"#])).await;
    let cfg = no_cache_anthropic_cfg(format!("http://127.0.0.1:{port}/v1"));
    let provider = from_config(&cfg).unwrap();

    let mut t = Transcript::new();
    t.append_user("think hard", None);
    let opts = SendOpts { thinking_budget_tokens: Some(2048), ..Default::default() };
    let mut stream = provider.send_and_stream("sys", t.messages(), &[], &opts).await.unwrap();
    while stream.next().await.is_some() {}

    let req = req_rx.await.unwrap();
    assert_eq!(req.body["thinking"]["budget_tokens"], 2048);
}

#[tokio::test]
async fn anthropic_tool_result_is_sent_as_user_role_block() {
    let (port, req_rx) = mock_server_once(200, sse(&[r#"{"type":"message_delta","delta":{}}"#])).await;
    let cfg = no_cache_anthropic_cfg(format!("http://127.0.0.1:{port}/v1"));
    let provider = from_config(&cfg).unwrap();

    let mut t = Transcript::new();
    t.append_user("run ls", None);
    t.append_tool_results(vec![weft_model::ContentBlock::ToolResult {
        call_id: "call_123".into(),
        success: true,
        structured: weft_model::StructuredResult::ok(
            "shell",
            chrono::Utc::now(),
            weft_model::ResultKind::Generic { text: "file.txt".into() },
        ),
    }]);
    let mut stream = provider.send_and_stream("sys", t.messages(), &[], &SendOpts::default()).await.unwrap();
    while stream.next().await.is_some() {}

    let req = req_rx.await.unwrap();
    let msgs = req.body["messages"].as_array().unwrap();
    assert_eq!(msgs[1]["role"], "user");
    assert_eq!(msgs[1]["content"][0]["type"], "tool_result");
    assert_eq!(msgs[1]["content"][0]["tool_use_id"], "call_123");
}

// ── OpenAI Chat Completions ────────────────────────────────────────────────

fn openai_chat_cfg(base_url: String) -> ModelConfig {
    ModelConfig {
        provider: "openai-chat".into(),
        name: "gpt-4o-mini".into(),
        api_key: Some("sk-test".into()),
        base_url: Some(base_url),
        max_tokens: Some(32),
        temperature: Some(0.5),
        ..ModelConfig::default()
    }
}

#[tokio::test]
async fn openai_chat_sends_correct_request_body_and_bearer_auth() {
    let body_sse = sse(&[
        r#"{"choices":[{"delta":{"content":"hi"},"finish_reason":null}]}"#,
        r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
    ]);
    let (port, req_rx) = mock_server_once(200, body_sse).await;
    let cfg = openai_chat_cfg(format!("http://127.0.0.1:{port}/v1"));
    let provider = from_config(&cfg).unwrap();

    let mut t = Transcript::new();
    t.append_user("hello", None);
    let mut stream = provider.send_and_stream("be brief", t.messages(), &[], &SendOpts::default()).await.unwrap();
    while stream.next().await.is_some() {}

    let req = req_rx.await.unwrap();
    assert_eq!(req.method, "POST");
    assert_eq!(req.path, "/v1/chat/completions");
    assert_eq!(req.headers.get("authorization").unwrap(), "Bearer sk-test");
    assert_eq!(req.body["model"], "gpt-4o-mini");
    assert_eq!(req.body["max_tokens"], 32);
    assert_eq!(req.body["messages"][0]["role"], "system");
    assert_eq!(req.body["messages"][0]["content"], "be brief");
    assert_eq!(req.body["messages"][1]["role"], "user");
}

#[tokio::test]
async fn openai_chat_formats_tools_with_parameters_key() {
    let (port, req_rx) = mock_server_once(200, sse(&[r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#])).await;
    let cfg = openai_chat_cfg(format!("http://127.0.0.1:{port}/v1"));
    let provider = from_config(&cfg).unwrap();

    let mut t = Transcript::new();
    t.append_user("run ls", None);
    let tools = vec![weft_model::ToolSchema {
        name: "shell".into(),
        description: "run shell commands".into(),
        input_schema: serde_json::json!({"type": "object", "properties": {"cmd": {"type": "string"}}}),
    }];
    let mut stream = provider.send_and_stream("sys", t.messages(), &tools, &SendOpts::default()).await.unwrap();
    while stream.next().await.is_some() {}

    let req = req_rx.await.unwrap();
    let wire_tools = req.body["tools"].as_array().unwrap();
    assert_eq!(wire_tools[0]["type"], "function");
    assert_eq!(wire_tools[0]["function"]["name"], "shell");
    assert!(wire_tools[0]["function"]["parameters"].is_object());
    assert!(wire_tools[0]["function"].get("input_schema").is_none());
}

#[tokio::test]
async fn openai_chat_emits_tool_result_as_standalone_tool_message() {
    let (port, req_rx) = mock_server_once(200, sse(&[r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#])).await;
    let cfg = openai_chat_cfg(format!("http://127.0.0.1:{port}/v1"));
    let provider = from_config(&cfg).unwrap();

    let mut t = Transcript::new();
    t.append_user("run ls", None);
    t.append_tool_results(vec![weft_model::ContentBlock::ToolResult {
        call_id: "call-1".into(),
        success: true,
        structured: weft_model::StructuredResult::ok(
            "shell",
            chrono::Utc::now(),
            weft_model::ResultKind::Generic { text: "ok".into() },
        ),
    }]);
    let mut stream = provider.send_and_stream("sys", t.messages(), &[], &SendOpts::default()).await.unwrap();
    while stream.next().await.is_some() {}

    let req = req_rx.await.unwrap();
    let msgs = req.body["messages"].as_array().unwrap();
    let tool_msg = &msgs[2];
    assert_eq!(tool_msg["role"], "tool");
    assert_eq!(tool_msg["tool_call_id"], "call-1");
}

#[tokio::test]
async fn openai_chat_reads_usage_with_cached_token_details() {
    let body_sse = sse(&[
        r#"{"choices":[{"delta":{"content":"ok"}}], "usage": {"prompt_tokens": 100, "completion_tokens": 20, "prompt_tokens_details": {"cached_tokens": 40}}}"#,
        r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
    ]);
    let (port, _) = mock_server_once(200, body_sse).await;
    let cfg = openai_chat_cfg(format!("http://127.0.0.1:{port}/v1"));
    let provider = from_config(&cfg).unwrap();

    let mut t = Transcript::new();
    t.append_user("hi", None);
    let mut stream = provider.send_and_stream("sys", t.messages(), &[], &SendOpts::default()).await.unwrap();

    let mut usage = None;
    while let Some(ev) = stream.next().await {
        if let ResponseEvent::Usage(u) = ev.unwrap() {
            usage = Some(u);
        }
    }
    let usage = usage.expect("usage event must be emitted");
    assert_eq!(usage.input_tokens, 100);
    assert_eq!(usage.cache_read_tokens, 40);
}

// ── OpenAI Responses ───────────────────────────────────────────────────────

fn openai_responses_cfg(base_url: String) -> ModelConfig {
    ModelConfig {
        provider: "openai-responses".into(),
        name: "gpt-4.1".into(),
        api_key: Some("sk-test".into()),
        base_url: Some(base_url),
        max_tokens: Some(64),
        ..ModelConfig::default()
    }
}

#[tokio::test]
async fn openai_responses_sends_instructions_and_full_input_without_previous_id() {
    let body_sse = sse(&[r#"{"type":"response.completed","response":{"id":"resp_1"}}"#]);
    let (port, req_rx) = mock_server_once(200, body_sse).await;
    let cfg = openai_responses_cfg(format!("http://127.0.0.1:{port}/v1"));
    let provider = from_config(&cfg).unwrap();

    let mut t = Transcript::new();
    t.append_user("hi", None);
    t.append_user("again", None);
    let mut stream = provider.send_and_stream("be brief", t.messages(), &[], &SendOpts::default()).await.unwrap();
    while stream.next().await.is_some() {}

    let req = req_rx.await.unwrap();
    assert_eq!(req.method, "POST");
    assert_eq!(req.path, "/v1/responses");
    assert_eq!(req.headers.get("authorization").unwrap(), "Bearer sk-test");
    assert_eq!(req.body["instructions"], "be brief");
    assert_eq!(req.body["input"].as_array().unwrap().len(), 2);
    assert!(req.body.get("previous_response_id").is_none());
}

#[tokio::test]
async fn openai_responses_sends_only_tail_with_previous_response_id() {
    let body_sse = sse(&[r#"{"type":"response.completed","response":{"id":"resp_2"}}"#]);
    let (port, req_rx) = mock_server_once(200, body_sse).await;
    let cfg = openai_responses_cfg(format!("http://127.0.0.1:{port}/v1"));
    let provider = from_config(&cfg).unwrap();

    let mut t = Transcript::new();
    t.append_user("hi", None);
    t.append_user("again", None);
    let opts = SendOpts { previous_response_id: Some("resp_1".into()), ..Default::default() };
    let mut stream = provider.send_and_stream("sys", t.messages(), &[], &opts).await.unwrap();
    while stream.next().await.is_some() {}

    let req = req_rx.await.unwrap();
    assert_eq!(req.body["input"].as_array().unwrap().len(), 1);
    assert_eq!(req.body["previous_response_id"], "resp_1");
}

#[tokio::test]
async fn openai_responses_tool_shape_has_name_at_top_level() {
    let body_sse = sse(&[r#"{"type":"response.completed","response":{"id":"resp_3"}}"#]);
    let (port, req_rx) = mock_server_once(200, body_sse).await;
    let cfg = openai_responses_cfg(format!("http://127.0.0.1:{port}/v1"));
    let provider = from_config(&cfg).unwrap();

    let mut t = Transcript::new();
    t.append_user("run ls", None);
    let tools = vec![weft_model::ToolSchema {
        name: "shell".into(),
        description: "run shell commands".into(),
        input_schema: serde_json::json!({"type": "object"}),
    }];
    let mut stream = provider.send_and_stream("sys", t.messages(), &tools, &SendOpts::default()).await.unwrap();
    while stream.next().await.is_some() {}

    let req = req_rx.await.unwrap();
    let wire_tools = req.body["tools"].as_array().unwrap();
    assert_eq!(wire_tools[0]["type"], "function");
    // Responses-style tool defs put name/description at the top level, unlike
    // Chat Completions which nests them under "function".
    assert_eq!(wire_tools[0]["name"], "shell");
    assert!(wire_tools[0].get("function").is_none());
}

// ── Non-2xx responses ──────────────────────────────────────────────────────

#[tokio::test]
async fn anthropic_non_200_response_surfaces_status_and_body() {
    let (port, _) = mock_server_once(401, r#"{"error":{"message":"invalid x-api-key"}}"#).await;
    let cfg = no_cache_anthropic_cfg(format!("http://127.0.0.1:{port}/v1"));
    let provider = from_config(&cfg).unwrap();

    let mut t = Transcript::new();
    t.append_user("hi", None);
    let result = provider.send_and_stream("sys", t.messages(), &[], &SendOpts::default()).await;
    let err = result.err().expect("non-200 must produce an error");
    assert!(err.to_string().contains("401"));
}
