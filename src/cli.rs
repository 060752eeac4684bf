// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use std::path::PathBuf;
use weft_config::AgentMode;

/// Output format for a headless run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormatArg {
    /// Only the final assistant text.
    #[default]
    Text,
    /// Structured JSON: the full canonical transcript.
    Json,
}

#[derive(Parser, Debug)]
#[command(
    name = "weft",
    about = "Agent thread runtime for an AI coding CLI",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// The task or message to send.
    #[arg(value_name = "PROMPT")]
    pub prompt: Option<String>,

    /// Agent mode: research (read-only), plan (no writes), agent (full access).
    #[arg(long, short = 'm', value_enum, default_value = "agent")]
    pub mode: AgentMode,

    /// Model override, e.g. "claude-opus-4-5" or a bare provider id.
    #[arg(long, short = 'M', env = "WEFT_MODEL")]
    pub model: Option<String>,

    /// Resume a saved conversation by id.
    #[arg(long, value_name = "ID")]
    pub resume: Option<String>,

    /// Path to config file (overrides auto-discovery).
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Output format for the final result.
    #[arg(long, value_enum, default_value = "text")]
    pub output_format: OutputFormatArg,

    /// Increase verbosity (-v = debug, -vv = trace).
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate a shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
    /// Print the effective configuration and exit.
    ShowConfig,
    /// List saved conversations.
    Chats {
        /// Maximum number of conversations to show.
        #[arg(long, short = 'n', default_value = "20")]
        limit: usize,
    },
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "weft", &mut std::io::stdout());
}
