// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Static model catalog: context windows, output caps, modalities, pricing.

use serde::{Deserialize, Serialize};

use crate::provider::PriceTable;

/// Input modalities supported by a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputModality {
    Text,
    Image,
}

fn default_input_modalities() -> Vec<InputModality> {
    vec![InputModality::Text]
}

fn default_price() -> ModelPrice {
    ModelPrice::default()
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelPrice {
    #[serde(default)]
    pub input: f64,
    #[serde(default)]
    pub output: f64,
    #[serde(default)]
    pub cache_read: f64,
    #[serde(default)]
    pub cache_write: f64,
}

impl From<ModelPrice> for PriceTable {
    fn from(p: ModelPrice) -> Self {
        PriceTable { input: p.input, output: p.output, cache_read: p.cache_read, cache_write: p.cache_write }
    }
}

/// Metadata for a single model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelCatalogEntry {
    pub id: String,
    pub name: String,
    /// Provider identifier: "anthropic" | "openai-chat" | "openai-responses" | "mock"
    pub provider: String,
    pub context_window: u32,
    pub max_output_tokens: u32,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_input_modalities")]
    pub input_modalities: Vec<InputModality>,
    #[serde(default = "default_price")]
    pub price_per_million: ModelPrice,
}

impl ModelCatalogEntry {
    pub fn supports_images(&self) -> bool {
        self.input_modalities.contains(&InputModality::Image)
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    models: Vec<ModelCatalogEntry>,
}

/// Return all entries from the bundled static catalog.
pub fn static_catalog() -> Vec<ModelCatalogEntry> {
    let yaml = include_str!("../models.yaml");
    let catalog: CatalogFile =
        serde_yaml::from_str(yaml).expect("bundled models.yaml must be valid");
    catalog.models
}

/// Look up a single model by provider and id (or name).
pub fn lookup(provider: &str, model_id: &str) -> Option<ModelCatalogEntry> {
    static_catalog()
        .into_iter()
        .find(|e| e.provider == provider && (e.id == model_id || e.name == model_id))
}

/// Look up a model by id or name alone, regardless of provider. Used when
/// resolving a bare model-name override with no provider prefix.
pub fn lookup_by_model_name(model_id: &str) -> Option<ModelCatalogEntry> {
    static_catalog()
        .into_iter()
        .find(|e| e.id == model_id || e.name == model_id)
}

/// Return `true` if the model supports image input, defaulting to `false`.
pub fn supports_images(provider: &str, model_id: &str) -> bool {
    lookup(provider, model_id).map(|e| e.supports_images()).unwrap_or(false)
}

/// Context window for a model, falling back to `default` if unknown.
pub fn context_window(provider: &str, model_id: &str, default: u32) -> u32 {
    lookup(provider, model_id).map(|e| e.context_window).unwrap_or(default)
}

/// Max output tokens for a model, falling back to `default` if unknown.
pub fn max_output_tokens(provider: &str, model_id: &str, default: u32) -> u32 {
    lookup(provider, model_id).map(|e| e.max_output_tokens).unwrap_or(default)
}

/// Per-million-token pricing for a model; `PriceTable::default()` (all
/// zeroes) if unknown.
pub fn price_per_million(provider: &str, model_id: &str) -> PriceTable {
    lookup(provider, model_id).map(|e| e.price_per_million.into()).unwrap_or_default()
}

// ── Unit tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_catalog_is_non_empty() {
        assert!(!static_catalog().is_empty());
    }

    #[test]
    fn claude_opus_is_in_catalog_and_supports_images() {
        let entry = lookup("anthropic", "claude-opus-4-5").expect("must be in catalog");
        assert!(entry.context_window >= 200_000);
        assert!(entry.supports_images());
    }

    #[test]
    fn gpt4o_is_in_catalog_and_supports_images() {
        let entry = lookup("openai-chat", "gpt-4o").expect("must be in catalog");
        assert!(entry.supports_images());
    }

    #[test]
    fn openai_responses_model_is_in_catalog() {
        let entry = lookup("openai-responses", "gpt-4.1").expect("must be in catalog");
        assert!(entry.context_window > 0);
    }

    #[test]
    fn lookup_by_model_name_finds_entry_without_provider() {
        let entry = lookup_by_model_name("claude-opus-4-5").expect("must be in catalog");
        assert_eq!(entry.provider, "anthropic");
    }

    #[test]
    fn lookup_unknown_model_returns_none() {
        assert!(lookup("anthropic", "nonexistent-model-xyz").is_none());
    }

    #[test]
    fn context_window_fallback_used_when_unknown() {
        assert_eq!(context_window("anthropic", "no-such-model", 4096), 4096);
    }

    #[test]
    fn price_per_million_unknown_model_is_zero() {
        let p = price_per_million("anthropic", "no-such-model");
        assert_eq!(p.input, 0.0);
    }

    #[test]
    fn price_per_million_known_model_is_positive() {
        let p = price_per_million("anthropic", "claude-opus-4-5");
        assert!(p.input > 0.0);
        assert!(p.output > 0.0);
    }

    #[test]
    fn all_entries_have_text_modality_and_nonzero_windows() {
        for entry in static_catalog() {
            assert!(entry.input_modalities.contains(&InputModality::Text));
            assert!(entry.context_window > 0, "{} has zero context_window", entry.id);
            assert!(entry.max_output_tokens > 0, "{} has zero max_output_tokens", entry.id);
        }
    }
}
