// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Auto-compaction (§4.G).
//!
//! Triggered between turns when `cumulative_input_tokens / advertised_max_context
//! >= compact_ratio`. Builds a dedicated summary request from the current
//! transcript, asks the provider for either a structured checkpoint or a
//! narrative summary, and replaces the transcript prefix with a single
//! `system-summary` message followed by the tail of the last `keep_recent`
//! user turns. Idempotent: compacting an already-compacted transcript with
//! no new turns produces the same structure.

use weft_config::CompactionStrategy;
use weft_model::{Provider, Role, Transcript};

const SUMMARIZE_PROMPT: &str =
    "You are a context compaction assistant. Summarise the following conversation history \
     in a concise, information-dense way. Preserve all technical details, decisions, file \
     names, code snippets, and tool outputs that may be relevant to future work. \
     The summary will replace the original history to free up context space.";

const STRUCTURED_COMPACTION_PROMPT: &str = "\
You are a context compaction assistant for a software engineering agent. \
Produce a structured state checkpoint from the conversation history below. \
Use EXACTLY the following Markdown sections — do not add or remove sections. \
Be information-dense: preserve file paths, function names, error messages, \
code snippets, test names, and technical decisions verbatim where they matter.

## Active Task
Describe in 1-3 sentences what the agent is currently working on.

## Key Decisions & Rationale
List every significant technical decision made and why (bullet points). \
Include file or component names.

## Files & Artifacts
List every file that was read, modified, or created, with a brief note on what was done.

## Constraints & Requirements
List every requirement, constraint, or user preference that must be preserved.

## Pending Items
List every unfinished subtask or open question.

## Session Narrative
Write a dense technical summary (2-5 paragraphs) of what happened, \
capturing the essential flow of events, tool outputs, and reasoning. \
Focus on facts the agent will need to continue correctly.";

const EMERGENCY_NOTICE: &str = "[Context emergency-compacted: the summarization request itself would \
have overflowed the context window, so earlier history was dropped deterministically without a model \
call. The agent may lack full context for earlier decisions.]";

/// Between-turn trigger check (§4.E step 2b).
pub fn should_compact(transcript: &Transcript, advertised_max_context: u32, compact_ratio: f32) -> bool {
    if compact_ratio <= 0.0 {
        return false;
    }
    let used = transcript.approx_context_tokens() as f32;
    used / advertised_max_context.max(1) as f32 >= compact_ratio
}

fn prompt_for(strategy: &CompactionStrategy) -> &'static str {
    match strategy {
        CompactionStrategy::Structured => STRUCTURED_COMPACTION_PROMPT,
        CompactionStrategy::Narrative => SUMMARIZE_PROMPT,
    }
}

/// Run compaction in place. Returns `(tokens_before, tokens_after)` for the
/// `compaction-complete` event. Falls back to a deterministic, model-free
/// emergency compaction if the provider's `summarize` call itself fails
/// (e.g. the history is too large even for a summarization request).
pub async fn compact(
    provider: &dyn Provider,
    transcript: &mut Transcript,
    strategy: &CompactionStrategy,
    keep_recent: usize,
) -> usize {
    let tokens_before = transcript.approx_context_tokens();

    let summary = match provider.summarize(transcript.messages(), prompt_for(strategy)).await {
        Ok(text) => text,
        Err(err) => {
            tracing::warn!(%err, "summarize failed; falling back to emergency compaction");
            EMERGENCY_NOTICE.to_string()
        }
    };

    transcript.compact_to_summary(summary, keep_recent);
    tokens_before
}

/// True if `transcript` already begins with a system-summary block — used by
/// callers that want to avoid re-triggering compaction immediately after one
/// just ran without any new turns in between.
pub fn already_compacted(transcript: &Transcript) -> bool {
    matches!(transcript.messages().first(), Some(m) if m.role == Role::SystemSummary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_model::{ContentBlock, MockProvider};

    fn filled_transcript(n_user_turns: usize) -> Transcript {
        let mut t = Transcript::new();
        for i in 0..n_user_turns {
            t.append_user(format!("turn {i}: {}", "x".repeat(500)), None);
            t.append_assistant_from_provider(vec![ContentBlock::text("ack".repeat(50))]);
        }
        t
    }

    #[test]
    fn should_compact_false_when_ratio_disabled() {
        let t = filled_transcript(50);
        assert!(!should_compact(&t, 1000, 0.0));
    }

    #[test]
    fn should_compact_true_when_over_threshold() {
        let t = filled_transcript(50);
        assert!(should_compact(&t, 1000, 0.5));
    }

    #[test]
    fn should_compact_false_when_under_threshold() {
        let t = filled_transcript(1);
        assert!(!should_compact(&t, 1_000_000, 0.8));
    }

    #[tokio::test]
    async fn compact_replaces_prefix_with_summary() {
        let mut t = filled_transcript(5);
        let provider = MockProvider;
        compact(&provider, &mut t, &CompactionStrategy::Narrative, 2).await;
        assert!(already_compacted(&t));
    }

    #[tokio::test]
    async fn compact_is_idempotent_on_structure() {
        let mut t = filled_transcript(5);
        let provider = MockProvider;
        compact(&provider, &mut t, &CompactionStrategy::Structured, 2).await;
        let len_once = t.messages().len();
        compact(&provider, &mut t, &CompactionStrategy::Structured, 2).await;
        assert_eq!(t.messages().len(), len_once);
        assert!(already_compacted(&t));
    }

    #[tokio::test]
    async fn compact_returns_pre_compaction_token_count() {
        let mut t = filled_transcript(5);
        let provider = MockProvider;
        let before = t.approx_context_tokens();
        let reported = compact(&provider, &mut t, &CompactionStrategy::Narrative, 2).await;
        assert_eq!(reported, before);
    }
}
