// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Reversible mapping between registry tool names and provider-safe wire
//! identifiers (§4.D "Tool-name normalization").
//!
//! Some providers constrain tool identifiers to `[a-zA-Z0-9_-]{1,64}`.
//! Registry names that already satisfy this pass through unchanged; any
//! other character is percent-escaped as `_x{hex}_` so the mapping is total
//! on the advertised set and trivially reversible.

use std::collections::HashMap;

/// Built once per `send_and_stream` call from the tool set being advertised.
#[derive(Debug, Default)]
pub struct ToolNameMap {
    to_wire: HashMap<String, String>,
    to_registry: HashMap<String, String>,
}

fn is_wire_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn encode(name: &str) -> String {
    if name.chars().all(is_wire_safe) && !name.is_empty() && name.len() <= 64 {
        return name.to_string();
    }
    let mut out = String::new();
    for c in name.chars() {
        if is_wire_safe(c) {
            out.push(c);
        } else {
            out.push_str(&format!("_x{:x}_", c as u32));
        }
    }
    out.truncate(64);
    out
}

impl ToolNameMap {
    pub fn build(registry_names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let mut to_wire = HashMap::new();
        let mut to_registry = HashMap::new();
        for name in registry_names {
            let name = name.into();
            let mut wire = encode(&name);
            // Guarantee collision-freedom: if two registry names encode to
            // the same wire id, disambiguate deterministically.
            while to_registry.contains_key(&wire) {
                wire.push('_');
            }
            to_registry.insert(wire.clone(), name.clone());
            to_wire.insert(name, wire);
        }
        Self { to_wire, to_registry }
    }

    pub fn to_wire(&self, registry_name: &str) -> &str {
        self.to_wire.get(registry_name).map(String::as_str).unwrap_or(registry_name)
    }

    pub fn to_registry(&self, wire_name: &str) -> &str {
        self.to_registry.get(wire_name).map(String::as_str).unwrap_or(wire_name)
    }
}
