// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! System prompt construction (§4.E step c "Build the system prompt from
//! context files and configuration"). Concrete tool implementations are out
//! of scope for this crate, so the prompt advertises whatever the caller's
//! [`weft_tools::ToolRegistry`] happens to have registered for the current
//! mode rather than naming specific tools.

use chrono::Local;
use std::path::Path;

use weft_config::AgentMode;

/// Optional contextual blocks injected into the system prompt. All fields
/// come from ambient files/state the front-end gathers; this crate only
/// assembles them.
#[derive(Debug, Default)]
pub struct PromptContext<'a> {
    /// Absolute path to the project root (from `.git` detection).
    pub project_root: Option<&'a Path>,
    /// Pre-formatted git context (branch, commit, dirty status).
    ///
    /// **Caching note**: volatile — changes on every commit and file edit.
    /// Providers with prompt caching keep this in a separate, uncached
    /// system block so the stable prefix remains cacheable across turns.
    pub git_context: Option<&'a str>,
    /// Contents of a project-level instructions file (e.g. `AGENTS.md`).
    pub project_context_file: Option<&'a str>,
    /// Text appended verbatim after the default Guidelines section.
    pub append: Option<&'a str>,
}

mod guidelines {
    pub fn general() -> &'static str {
        "- Be concise and precise. Use tools instead of guessing.\n\
         - Prefer reading a file over asking the user what it contains."
    }

    pub fn tool_usage() -> &'static str {
        "- Discovery workflow: search broadly first, then narrow, then read the specific \
           ranges needed for context.\n\
         - Batch independent read-only tool calls in parallel within a single turn."
    }

    pub fn code_quality() -> &'static str {
        "- Code you write must be production quality: clear separation of concerns, no \
           half-finished implementations.\n\
         - Never create new files proactively unless explicitly requested.\n\
         - Write tests for new functionality; preserve existing code structure and style."
    }

    pub fn workflow_efficiency() -> &'static str {
        "- For multi-step tasks, track progress explicitly and mark each step done as you finish it.\n\
         - Batch independent tool calls in parallel to reduce round trips."
    }

    pub fn error_handling() -> &'static str {
        "- When a tool fails, try a different approach before giving up.\n\
         - Never bypass safety checks (force-push, skipped hooks, `--no-verify`) without \
           explicit user permission."
    }
}

fn build_guidelines_section() -> String {
    format!(
        "## Guidelines\n\n\
         ### General Principles\n{}\n\n\
         ### Tool Usage Patterns\n{}\n\n\
         ### Code Quality\n{}\n\n\
         ### Workflow Efficiency\n{}\n\n\
         ### Error Handling\n{}",
        guidelines::general(),
        guidelines::tool_usage(),
        guidelines::code_quality(),
        guidelines::workflow_efficiency(),
        guidelines::error_handling(),
    )
}

fn mode_instructions(mode: AgentMode) -> &'static str {
    match mode {
        AgentMode::Research => {
            "You are a research assistant. You may read files, search the codebase, and look up \
             information. You MUST NOT write, modify, or delete any files. Research mode is \
             non-destructive: focus on gathering all information needed to satisfy the request."
        }
        AgentMode::Plan => {
            "You are a planning assistant. Analyse the request and produce a clear, structured \
             plan with numbered steps. You may read files to inform the plan, but MUST NOT \
             modify them. Output the plan in Markdown."
        }
        AgentMode::Agent => {
            "You are a capable coding agent. You can read and write files, run commands, and \
             search the codebase. Work systematically, verify your changes, and report your \
             progress clearly. Maximize parallel tool calls, and complete every step of the \
             task before ending your turn."
        }
    }
}

/// Build the system prompt for `mode`, advertising `available_tools` (the
/// names the registry advertises for this mode). `custom`, when set,
/// overrides the generated prompt entirely (still honoring `ctx.append`).
pub fn system_prompt(mode: AgentMode, available_tools: &[String], custom: Option<&str>, ctx: PromptContext<'_>) -> String {
    if let Some(custom) = custom {
        if let Some(extra) = ctx.append {
            return format!("{}\n\n{}", custom.trim_end(), extra);
        }
        return custom.to_string();
    }

    let identity = format!(
        "You are Weft, an AI coding agent.\n\n\
         Operating Mode: `{mode}`\n\
         Current date and time: `{now}`\n\
         Available tools this turn: {tools}",
        now = Local::now().format("%Y-%m-%d %H:%M:%S"),
        tools = if available_tools.is_empty() { "none".to_string() } else { available_tools.join(", ") },
    );

    let project_section = ctx.project_root.map(|root| {
        format!(
            "\n\n## Project Context\nProject root directory: `{}`\n\
             Prefer absolute paths over relative paths in every tool call.",
            root.display()
        )
    }).unwrap_or_default();

    let git_section = ctx.git_context.map(|g| format!("\n\n{g}")).unwrap_or_default();

    let context_file_section = ctx
        .project_context_file
        .map(|c| format!("\n\n## Project Instructions\n\n{c}"))
        .unwrap_or_default();

    let guidelines_section = build_guidelines_section();
    let append_section = ctx.append.map(|extra| format!("\n\n{extra}")).unwrap_or_default();

    format!(
        "{identity}\n\n{mode_instructions}{project_section}{context_file_section}{git_section}\n\n\
         {guidelines_section}{append_section}",
        mode_instructions = mode_instructions(mode),
    )
}
