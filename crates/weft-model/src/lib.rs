// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod catalog;
pub mod name_map;
pub mod retry;
pub mod sanitize;
mod anthropic;
mod mock;
mod openai_chat;
mod openai_responses;
mod provider;
mod types;

pub use anthropic::AnthropicProvider;
pub use catalog::{InputModality, ModelCatalogEntry};
pub use mock::{MockProvider, ScriptedMockProvider};
pub use openai_chat::OpenAiChatProvider;
pub use openai_responses::OpenAiResponsesProvider;
pub use provider::*;
pub use types::*;

use weft_config::ModelConfig;

/// The complete set of provider ids this crate knows how to construct.
pub const KNOWN_PROVIDERS: &[&str] = &["anthropic", "openai-chat", "openai-responses", "mock"];

/// Construct a boxed [`Provider`] from configuration.
///
/// Selects the driver implementation based on `cfg.provider`, one of
/// [`KNOWN_PROVIDERS`]. When `max_tokens` is not set in config, the model's
/// `max_output_tokens` is resolved from the static catalog, falling back to
/// a conservative default when the model is unknown there too.
pub fn from_config(cfg: &ModelConfig) -> anyhow::Result<Box<dyn Provider>> {
    let key = resolve_api_key(cfg);

    match cfg.provider.as_str() {
        "anthropic" => Ok(Box::new(AnthropicProvider::new(
            cfg.name.clone(),
            key,
            cfg.base_url.clone(),
            cfg.max_tokens,
            cfg.temperature,
            cfg.cache_system_prompt,
            cfg.extended_cache_time,
            cfg.cache_tools,
            cfg.cache_conversation,
            cfg.cache_images,
            cfg.cache_tool_results,
        ))),
        "openai-chat" => Ok(Box::new(OpenAiChatProvider::new(
            cfg.name.clone(),
            key,
            cfg.base_url.clone(),
            cfg.max_tokens,
            cfg.temperature,
        ))),
        "openai-responses" => Ok(Box::new(OpenAiResponsesProvider::new(
            cfg.name.clone(),
            key,
            cfg.base_url.clone(),
            cfg.max_tokens,
            cfg.temperature,
        ))),
        "mock" => Ok(Box::new(MockProvider)),
        other => anyhow::bail!(
            "unknown model provider: {other:?}\nKnown providers: {known}",
            known = KNOWN_PROVIDERS.join(", ")
        ),
    }
}

fn resolve_api_key(cfg: &ModelConfig) -> Option<String> {
    if let Some(k) = &cfg.api_key {
        return Some(k.clone());
    }
    if let Some(env) = &cfg.api_key_env {
        return std::env::var(env).ok();
    }
    None
}

// ── Model-config resolution ────────────────────────────────────────────────

/// Build a [`ModelConfig`] by applying `override_str` on top of `base`.
///
/// The override string may be:
/// - `"provider/model"` → sets both provider and name (e.g. `"anthropic/claude-opus-4-5"`)
/// - a bare provider id from [`KNOWN_PROVIDERS`] → changes provider, keeps model name
/// - a bare model name → changes model name, keeps provider
///
/// When the provider changes, inherited `api_key` / `api_key_env` fields are
/// cleared so the correct credential env-var for the new provider is looked up.
pub fn resolve_model_cfg(base: &ModelConfig, override_str: &str) -> ModelConfig {
    let mut cfg = base.clone();
    let provider_changed;
    if let Some((provider, model)) = override_str.split_once('/') {
        provider_changed = provider != base.provider;
        cfg.provider = provider.to_string();
        cfg.name = model.to_string();
    } else if KNOWN_PROVIDERS.contains(&override_str) {
        provider_changed = override_str != base.provider;
        cfg.provider = override_str.to_string();
    } else {
        cfg.name = override_str.to_string();
        provider_changed = false;
    }
    if provider_changed {
        cfg.api_key = None;
        cfg.api_key_env = None;
    }
    cfg
}

/// Resolve a [`ModelConfig`] using `override_str`, checking
/// `config.providers` for named custom providers first.
///
/// If the prefix of `override_str` (the part before an optional `/`) matches
/// a key in `config.providers`, that named config is used as the base and
/// only the model name portion is optionally overridden.
///
/// Otherwise the call falls back to [`resolve_model_cfg`] with
/// `config.model` as the base, supporting the same `"provider/name"` /
/// bare-provider / bare-name syntax. A bare model name found in the static
/// catalog resets to that provider's clean defaults rather than inheriting
/// `config.model`'s `base_url`, to avoid leaking a custom endpoint onto an
/// unrelated provider.
pub fn resolve_model_from_config(config: &weft_config::Config, override_str: &str) -> ModelConfig {
    let (provider_key, model_suffix) = if let Some((p, m)) = override_str.split_once('/') {
        (p, Some(m))
    } else {
        (override_str, None)
    };

    if let Some(named) = config.providers.get(provider_key) {
        let mut cfg = named.clone();
        if let Some(model) = model_suffix {
            cfg.name = model.to_string();
        }
        return cfg;
    }

    let catalog_entry = if let Some(model_name) = model_suffix {
        if KNOWN_PROVIDERS.contains(&provider_key) {
            catalog::lookup(provider_key, model_name)
        } else {
            None
        }
    } else if !KNOWN_PROVIDERS.contains(&override_str) {
        catalog::lookup_by_model_name(override_str)
    } else {
        None
    };

    if let Some(entry) = catalog_entry {
        let mut cfg = ModelConfig { provider: entry.provider.clone(), name: entry.id.clone(), ..ModelConfig::default() };
        if cfg.provider == config.model.provider {
            cfg.api_key = config.model.api_key.clone();
            cfg.api_key_env = config.model.api_key_env.clone();
        }
        return cfg;
    }

    resolve_model_cfg(&config.model, override_str)
}
