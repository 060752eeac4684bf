// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Typed configuration consumed by every other crate in the workspace.
//!
//! Loading these structs from a file, environment, or CLI flags is the
//! front-end's job; this crate only defines the shape the rest of the
//! runtime agrees on.
mod loader;
mod schema;

pub use loader::load;
pub use schema::*;
