// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Canonical, provider-independent transcript representation.
//!
//! This is the one message shape every adapter translates to and from; it is
//! also the shape persisted by the store. See [`Transcript`] for the
//! append/trim/window operations that own the invariants around tool-use and
//! tool-result pairing.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current persisted schema version for a [`Transcript`].
///
/// Bumped only when a field is removed or its type changes; new optional
/// fields may be added without a bump.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
#[error("unknown transcript schema version {found}, expected {expected}")]
pub struct SchemaVersionMismatch {
    pub found: u32,
    pub expected: u32,
}

/// The role a [`Message`] plays in the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    User,
    Assistant,
    ToolResult,
    SystemSummary,
}

/// A reference to an image attached to a user message.
///
/// Kept as a data URL (`data:<mime>;base64,<b64>`) or an HTTPS URL; the
/// provider adapter decides how to embed it in the wire request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub url: String,
    /// OpenAI vision detail level ("low" | "high" | "auto"); ignored by
    /// providers that do not distinguish detail tiers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Parse a data URL of the form `data:<mime>;base64,<b64>`. Returns `None`
/// for non-data-URLs so callers can fall back to treating the string as a
/// plain HTTPS reference.
pub fn parse_data_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("data:")?;
    let (meta, b64) = rest.split_once(',')?;
    let mime = meta.strip_suffix(";base64").unwrap_or(meta);
    Some((mime, b64))
}

impl ImageRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), detail: None }
    }

    pub fn with_detail(url: impl Into<String>, detail: impl Into<String>) -> Self {
        Self { url: url.into(), detail: Some(detail.into()) }
    }

    /// Approximate token cost, per OpenAI's published vision token estimates.
    pub fn approx_tokens(&self) -> usize {
        if self.detail.as_deref() == Some("low") {
            85
        } else {
            765
        }
    }
}

/// One block of a message's content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    /// Reasoning text the provider may surface. `signature` carries opaque
    /// bytes (base64) the provider requires echoed back verbatim on the next
    /// turn; absent for providers that don't sign their thinking blocks.
    Thinking {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    ToolUse {
        call_id: String,
        tool_name: String,
        input: serde_json::Value,
    },
    ToolResult {
        call_id: String,
        success: bool,
        structured: StructuredResult,
    },
    /// Opaque passthrough block: provider-returned data the runtime must
    /// echo back unchanged without interpreting it.
    Redacted {
        data: String,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn approx_tokens(&self) -> usize {
        let chars = match self {
            ContentBlock::Text { text } => text.len(),
            ContentBlock::Thinking { text, signature } => {
                text.len() + signature.as_deref().map(str::len).unwrap_or(0)
            }
            ContentBlock::ToolUse { tool_name, input, .. } => {
                tool_name.len() + input.to_string().len()
            }
            ContentBlock::ToolResult { structured, .. } => structured.approx_chars(),
            ContentBlock::Redacted { data } => data.len(),
        };
        (chars / 4).max(1)
    }
}

/// A single grep match line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrepMatch {
    pub path: String,
    pub line: usize,
    pub col: usize,
    pub text: String,
}

/// Tool-specific payload of a [`StructuredResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultKind {
    FileRead {
        path: String,
        lines: Vec<String>,
        truncated: bool,
        total_lines: usize,
    },
    Shell {
        exit_code: i32,
        stdout: String,
        stderr: String,
        duration_ms: u64,
        /// Set when the process was killed due to cancellation rather than
        /// exiting on its own.
        #[serde(default)]
        cancelled: bool,
    },
    Grep {
        matches: Vec<GrepMatch>,
        truncated: bool,
    },
    /// Catch-all for tool kinds that do not need a dedicated shape.
    Generic {
        text: String,
    },
}

impl ResultKind {
    fn approx_chars(&self) -> usize {
        match self {
            ResultKind::FileRead { lines, .. } => lines.iter().map(|l| l.len()).sum(),
            ResultKind::Shell { stdout, stderr, .. } => stdout.len() + stderr.len(),
            ResultKind::Grep { matches, .. } => matches.iter().map(|m| m.text.len()).sum(),
            ResultKind::Generic { text } => text.len(),
        }
    }
}

/// The outcome of one tool execution, carried inside a `ToolResult` content
/// block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredResult {
    pub tool_name: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub kind: ResultKind,
}

impl StructuredResult {
    pub fn ok(tool_name: impl Into<String>, timestamp: chrono::DateTime<chrono::Utc>, kind: ResultKind) -> Self {
        Self { tool_name: tool_name.into(), success: true, error_message: None, timestamp, kind }
    }

    pub fn failed(
        tool_name: impl Into<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: false,
            error_message: Some(error_message.into()),
            timestamp,
            kind: ResultKind::Generic { text: String::new() },
        }
    }

    fn approx_chars(&self) -> usize {
        self.kind.approx_chars() + self.error_message.as_deref().map(str::len).unwrap_or(0)
    }
}

/// A single message in the canonical transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    /// Monotonically assigned within one [`Transcript`]; stable across
    /// compaction only for messages that survive it.
    pub index: u64,
    /// Images attached to a user turn. `None`/empty for all other roles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<ImageRef>>,
    pub content: Vec<ContentBlock>,
}

impl Message {
    /// Plain text if this message is exactly one text block, else `None`.
    pub fn as_text(&self) -> Option<&str> {
        match self.content.as_slice() {
            [ContentBlock::Text { text }] => Some(text),
            _ => None,
        }
    }

    /// All `tool-use` blocks in this message, in order.
    pub fn tool_uses(&self) -> impl Iterator<Item = (&str, &str, &serde_json::Value)> {
        self.content.iter().filter_map(|b| match b {
            ContentBlock::ToolUse { call_id, tool_name, input } => {
                Some((call_id.as_str(), tool_name.as_str(), input))
            }
            _ => None,
        })
    }

    /// All `tool-result` blocks in this message, in order.
    pub fn tool_results(&self) -> impl Iterator<Item = (&str, bool, &StructuredResult)> {
        self.content.iter().filter_map(|b| match b {
            ContentBlock::ToolResult { call_id, success, structured } => {
                Some((call_id.as_str(), *success, structured))
            }
            _ => None,
        })
    }

    /// Approximate token count: sum of per-block estimates plus any image
    /// attachments.
    pub fn approx_tokens(&self) -> usize {
        let content_tokens: usize = self.content.iter().map(ContentBlock::approx_tokens).sum();
        let image_tokens: usize = self
            .images
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .map(ImageRef::approx_tokens)
            .sum();
        (content_tokens + image_tokens).max(1)
    }
}

/// Persisted envelope wrapping a `Vec<Message>` with its schema version.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedTranscript {
    schema_version: u32,
    messages: Vec<Message>,
}

/// Owns the canonical message list for one conversation and enforces
/// invariants M1 (tool-use/tool-result pairing) and M2 (tool-result role
/// placement) across append, trim, and window operations.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<Message>,
    next_index: u64,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn alloc_index(&mut self) -> u64 {
        let i = self.next_index;
        self.next_index += 1;
        i
    }

    /// Append a user message, with optional image attachments.
    pub fn append_user(&mut self, text: impl Into<String>, images: Option<Vec<ImageRef>>) -> u64 {
        let index = self.alloc_index();
        self.messages.push(Message {
            role: Role::User,
            index,
            images,
            content: vec![ContentBlock::text(text)],
        });
        index
    }

    /// Append an assistant message assembled from a completed provider turn.
    pub fn append_assistant_from_provider(&mut self, blocks: Vec<ContentBlock>) -> u64 {
        let index = self.alloc_index();
        self.messages.push(Message { role: Role::Assistant, index, images: None, content: blocks });
        index
    }

    /// Append a single tool-result message carrying every result from one
    /// turn, in the same order as the originating tool-use blocks (§4.E
    /// step g, invariant M2).
    pub fn append_tool_results(&mut self, results: Vec<ContentBlock>) -> u64 {
        debug_assert!(
            results.iter().all(|b| matches!(b, ContentBlock::ToolResult { .. })),
            "append_tool_results only accepts ToolResult blocks"
        );
        let index = self.alloc_index();
        self.messages.push(Message {
            role: Role::ToolResult,
            index,
            images: None,
            content: results,
        });
        index
    }

    /// Remove `tool-use` blocks that have no matching `tool-result` anywhere
    /// later in the transcript (invariant M1). Idempotent: a second call
    /// finds nothing left to trim.
    pub fn trim_orphan_tool_uses(&mut self) {
        use std::collections::HashSet;

        let resolved: HashSet<&str> = self
            .messages
            .iter()
            .flat_map(|m| m.tool_results().map(|(id, ..)| id))
            .collect();

        for msg in &mut self.messages {
            if msg.role != Role::Assistant {
                continue;
            }
            msg.content.retain(|b| match b {
                ContentBlock::ToolUse { call_id, .. } => resolved.contains(call_id.as_str()),
                _ => true,
            });
        }
        // Drop assistant messages left with no content after trimming.
        self.messages.retain(|m| !(m.role == Role::Assistant && m.content.is_empty()));
    }

    /// Select the messages to send to the provider: everything, or — after
    /// compaction — a leading summary plus the trailing `keep_recent` user
    /// turns and everything after them.
    pub fn select_window(&self) -> &[Message] {
        &self.messages
    }

    /// Replace the entire transcript with a single `system-summary` message
    /// followed by the tail of the last `keep_recent` user turns onward
    /// (§4.G step 3). Re-indexes everything that survives.
    pub fn compact_to_summary(&mut self, summary_text: String, keep_recent: usize) {
        let user_positions: Vec<usize> = self
            .messages
            .iter()
            .enumerate()
            .filter_map(|(i, m)| (m.role == Role::User).then_some(i))
            .collect();

        let tail_start = if user_positions.len() > keep_recent {
            user_positions[user_positions.len() - keep_recent]
        } else {
            0
        };

        let tail = self.messages.split_off(tail_start);
        self.messages.clear();
        self.next_index = 0;

        let summary_index = self.alloc_index();
        self.messages.push(Message {
            role: Role::SystemSummary,
            index: summary_index,
            images: None,
            content: vec![ContentBlock::text(summary_text)],
        });

        for mut m in tail {
            m.index = self.alloc_index();
            self.messages.push(m);
        }
    }

    /// Sum of `approx_tokens()` across the current window.
    pub fn approx_context_tokens(&self) -> usize {
        self.messages.iter().map(Message::approx_tokens).sum()
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(PersistedTranscript {
            schema_version: SCHEMA_VERSION,
            messages: self.messages.clone(),
        })
        .expect("Transcript serializes infallibly")
    }

    pub fn from_value(v: serde_json::Value) -> Result<Self, SchemaVersionMismatch> {
        let persisted: PersistedTranscript =
            serde_json::from_value(v).map_err(|_| SchemaVersionMismatch {
                found: 0,
                expected: SCHEMA_VERSION,
            })?;
        if persisted.schema_version != SCHEMA_VERSION {
            return Err(SchemaVersionMismatch {
                found: persisted.schema_version,
                expected: SCHEMA_VERSION,
            });
        }
        let next_index = persisted.messages.last().map(|m| m.index + 1).unwrap_or(0);
        Ok(Self { messages: persisted.messages, next_index })
    }
}

// ─── Unit tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_use(call_id: &str) -> ContentBlock {
        ContentBlock::ToolUse {
            call_id: call_id.into(),
            tool_name: "shell".into(),
            input: serde_json::json!({"command": "echo hi"}),
        }
    }

    fn tool_result(call_id: &str, success: bool) -> ContentBlock {
        ContentBlock::ToolResult {
            call_id: call_id.into(),
            success,
            structured: StructuredResult::ok(
                "shell",
                chrono::Utc::now(),
                ResultKind::Shell {
                    exit_code: 0,
                    stdout: "hi\n".into(),
                    stderr: String::new(),
                    duration_ms: 5,
                    cancelled: false,
                },
            ),
        }
    }

    #[test]
    fn append_user_assigns_monotonic_index() {
        let mut t = Transcript::new();
        let i1 = t.append_user("one", None);
        let i2 = t.append_user("two", None);
        assert!(i2 > i1);
    }

    #[test]
    fn trim_orphan_tool_uses_removes_unmatched_call() {
        let mut t = Transcript::new();
        t.append_user("go", None);
        t.append_assistant_from_provider(vec![tool_use("call-1")]);
        // no matching tool-result appended
        t.trim_orphan_tool_uses();
        assert!(t.messages().iter().all(|m| m.tool_uses().count() == 0));
    }

    #[test]
    fn trim_orphan_tool_uses_keeps_resolved_pairs() {
        let mut t = Transcript::new();
        t.append_user("go", None);
        t.append_assistant_from_provider(vec![tool_use("call-1")]);
        t.append_tool_results(vec![tool_result("call-1", true)]);
        t.trim_orphan_tool_uses();
        assert_eq!(t.messages()[1].tool_uses().count(), 1);
    }

    #[test]
    fn trim_orphan_tool_uses_is_idempotent() {
        let mut t = Transcript::new();
        t.append_user("go", None);
        t.append_assistant_from_provider(vec![tool_use("call-1"), tool_use("call-2")]);
        t.append_tool_results(vec![tool_result("call-1", true)]);

        t.trim_orphan_tool_uses();
        let once = t.to_value();
        t.trim_orphan_tool_uses();
        let twice = t.to_value();
        assert_eq!(once, twice);
    }

    #[test]
    fn compact_to_summary_keeps_recent_user_turns() {
        let mut t = Transcript::new();
        t.append_user("first", None);
        t.append_assistant_from_provider(vec![ContentBlock::text("a1")]);
        t.append_user("second", None);
        t.append_assistant_from_provider(vec![ContentBlock::text("a2")]);
        t.append_user("third", None);

        t.compact_to_summary("summary of prior turns".into(), 2);

        assert_eq!(t.messages()[0].role, Role::SystemSummary);
        // second, a2, third survive (last 2 user turns onward)
        assert!(t.messages().iter().any(|m| m.as_text() == Some("second")));
        assert!(t.messages().iter().any(|m| m.as_text() == Some("third")));
        assert!(!t.messages().iter().any(|m| m.as_text() == Some("first")));
    }

    #[test]
    fn compact_to_summary_is_idempotent_on_structure() {
        let mut t = Transcript::new();
        t.append_user("first", None);
        t.append_assistant_from_provider(vec![ContentBlock::text("a1")]);
        t.compact_to_summary("s1".into(), 2);
        let after_first = t.messages().len();
        t.compact_to_summary("s2".into(), 2);
        assert_eq!(t.messages().len(), after_first);
        assert_eq!(t.messages()[0].role, Role::SystemSummary);
    }

    #[test]
    fn round_trip_serialization_preserves_messages() {
        let mut t = Transcript::new();
        t.append_user("hi", None);
        t.append_assistant_from_provider(vec![ContentBlock::text("hello")]);
        let v = t.to_value();
        let back = Transcript::from_value(v).unwrap();
        assert_eq!(back.messages().len(), t.messages().len());
        assert_eq!(back.messages()[0].as_text(), Some("hi"));
    }

    #[test]
    fn from_value_rejects_unknown_schema_version() {
        let v = serde_json::json!({ "schema_version": 999, "messages": [] });
        let err = Transcript::from_value(v).unwrap_err();
        assert_eq!(err.found, 999);
    }

    #[test]
    fn message_approx_tokens_includes_image_attachments() {
        let m = Message {
            role: Role::User,
            index: 0,
            images: Some(vec![ImageRef::with_detail("data:image/png;base64,A", "low")]),
            content: vec![ContentBlock::text("describe this")],
        };
        assert!(m.approx_tokens() >= 85);
    }
}
