// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Process-wide keyed steer bus (§4.H "Steer").
//!
//! External clients enqueue out-of-band user messages for an in-flight
//! thread by conversation id. The Thread subscribes for the duration of one
//! `Send` and drains the bus between turns. If no `Send` is in flight for
//! that id, `send` simply returns `false` — the caller falls back to
//! starting a new `Send` or queuing the message itself.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;

const STEER_CHANNEL_CAPACITY: usize = 16;

/// One steer message: plain user text, optionally with image attachments.
#[derive(Debug, Clone)]
pub struct SteerMessage {
    pub text: String,
    pub images: Option<Vec<weft_model::ImageRef>>,
}

pub struct SteerSubscription {
    conversation_id: String,
    rx: mpsc::Receiver<SteerMessage>,
    bus: SteerBus,
}

impl SteerSubscription {
    /// Drain every message currently queued without blocking.
    pub fn drain(&mut self) -> Vec<SteerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            out.push(msg);
        }
        out
    }
}

impl Drop for SteerSubscription {
    fn drop(&mut self) {
        self.bus.unsubscribe(&self.conversation_id);
    }
}

/// A cheaply-cloned handle to the process-wide steer registry.
#[derive(Clone, Default)]
pub struct SteerBus {
    inner: std::sync::Arc<Mutex<HashMap<String, mpsc::Sender<SteerMessage>>>>,
}

impl SteerBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a Thread to its conversation id for the lifetime of one
    /// `Send`. Replaces any stale subscription for the same id.
    pub fn subscribe(&self, conversation_id: impl Into<String>) -> SteerSubscription {
        let conversation_id = conversation_id.into();
        let (tx, rx) = mpsc::channel(STEER_CHANNEL_CAPACITY);
        self.inner.lock().unwrap().insert(conversation_id.clone(), tx);
        SteerSubscription { conversation_id, rx, bus: self.clone() }
    }

    fn unsubscribe(&self, conversation_id: &str) {
        self.inner.lock().unwrap().remove(conversation_id);
    }

    /// Enqueue a steer message for `conversation_id`. Returns `false` if no
    /// thread is currently subscribed (caller falls back to a new `Send`),
    /// or if the channel is full (backpressure — caller should retry).
    pub fn send(&self, conversation_id: &str, message: SteerMessage) -> bool {
        let tx = self.inner.lock().unwrap().get(conversation_id).cloned();
        match tx {
            Some(tx) => tx.try_send(message).is_ok(),
            None => false,
        }
    }

    pub fn is_subscribed(&self, conversation_id: &str) -> bool {
        self.inner.lock().unwrap().contains_key(conversation_id)
    }
}
