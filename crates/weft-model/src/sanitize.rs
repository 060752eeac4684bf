// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Message sanitization: drop image attachments when the model does not
//! support image input.
//!
//! Call [`strip_images_if_unsupported`] before handing messages to an
//! adapter so images never reach a text-only model.

use crate::{
    catalog::InputModality,
    types::{ContentBlock, Message},
};

const IMAGE_OMITTED: &str = "[image omitted: model does not support image input]";

/// Drop `images` from every message when `modalities` does not include
/// [`InputModality::Image`], appending a text note so the model knows
/// something was withheld. No-op (messages returned unchanged) when the
/// model supports images.
pub fn strip_images_if_unsupported(messages: Vec<Message>, modalities: &[InputModality]) -> Vec<Message> {
    if modalities.contains(&InputModality::Image) {
        return messages;
    }
    messages.into_iter().map(strip_message).collect()
}

fn strip_message(mut m: Message) -> Message {
    let Some(images) = m.images.take() else {
        return m;
    };
    if !images.is_empty() {
        m.content.push(ContentBlock::text(IMAGE_OMITTED));
    }
    m
}

// ─── Tests ──────────────────────────────────────────────────────────────
