// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands, OutputFormatArg};
use weft_core::{AgentEvent, NoopHooks, PromptSettings, SendOptions, SteerBus, TaskTool, Thread, ThreadDeps};
use weft_store::{ListFilter, Page, SortOrder};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(cmd) = &cli.command {
        match cmd {
            Commands::Completions { shell } => {
                cli::print_completions(*shell);
                return Ok(());
            }
            Commands::ShowConfig => {
                let config = weft_config::load(cli.config.as_deref())?;
                println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
                return Ok(());
            }
            Commands::Chats { limit } => {
                return print_chats(*limit).await;
            }
        }
    }

    let Some(prompt) = cli.prompt.clone() else {
        anyhow::bail!("no prompt given — pass one as an argument, or use a subcommand (see --help)");
    };

    let config = weft_config::load(cli.config.as_deref())?;
    let model_cfg = match &cli.model {
        Some(m) => weft_model::resolve_model_from_config(&config, m),
        None => config.model.clone(),
    };
    let provider_tag = model_cfg.provider.clone();
    let provider: Arc<dyn weft_model::Provider> = Arc::from(weft_model::from_config(&model_cfg)?);

    // Subagents spawned by the `task` tool get their own, narrower registry
    // (no further task tool) so nesting depth is bounded structurally rather
    // than by convention alone.
    let subagent_tools = Arc::new(weft_tools::ToolRegistry::new());
    let (child_usage_tx, child_usage_rx) = mpsc::unbounded_channel();
    let task_tool = TaskTool::new(
        Arc::clone(&provider),
        Arc::clone(&subagent_tools),
        config.agent.clone(),
        Arc::new(AtomicUsize::new(0)),
        child_usage_tx,
    );
    let mut registry = weft_tools::ToolRegistry::new();
    registry.register(task_tool);
    let registry = Arc::new(registry);

    let store = weft_store::open_default(history_dir())?;
    let store: Arc<dyn weft_store::Store> = Arc::from(store);

    let deps = ThreadDeps {
        provider: Arc::clone(&provider),
        tools: Arc::clone(&registry),
        store: Some(Arc::clone(&store)),
        steer_bus: SteerBus::new(),
        hooks: Arc::new(NoopHooks),
        child_usage_rx: Some(child_usage_rx),
    };

    let prompt_settings = PromptSettings { project_root: find_project_root(), ..Default::default() };

    let mut thread = match &cli.resume {
        Some(id) => {
            let record = store.load(id).await.with_context(|| format!("loading conversation '{id}'"))?;
            Thread::resume(record, cli.mode, config.agent.clone(), deps, prompt_settings)?
        }
        None => Thread::new(provider_tag, cli.mode, config.agent.clone(), deps, prompt_settings),
    };

    let (tx, mut rx) = mpsc::channel(256);
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            cancel.cancel();
        });
    }
    let mut opts = SendOptions::new(tx);
    opts.cancel_token = cancel;

    let json_mode = cli.output_format == OutputFormatArg::Json;
    let printer = tokio::spawn(async move {
        let mut text = String::new();
        while let Some(ev) = rx.recv().await {
            match ev {
                AgentEvent::TextDelta(delta) if !json_mode => {
                    use std::io::Write;
                    print!("{delta}");
                    let _ = std::io::stdout().flush();
                    text.push_str(&delta);
                }
                AgentEvent::TextDelta(delta) => text.push_str(&delta),
                AgentEvent::ToolUse { tool_name, .. } => {
                    tracing::info!(tool = %tool_name, "running tool");
                }
                AgentEvent::Failed { message } => {
                    eprintln!("\n[weft] turn failed: {message}");
                }
                _ => {}
            }
        }
        text
    });

    let result = thread.send(prompt, None, opts).await;
    let text = printer.await.unwrap_or_default();

    match result {
        Ok(usage) => {
            if json_mode {
                let messages = thread.transcript().messages().to_vec();
                println!("{}", serde_json::to_string_pretty(&messages)?);
            } else if !text.ends_with('\n') {
                println!();
            }
            tracing::debug!(
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                cost = usage.total_cost,
                "turn complete"
            );
            Ok(())
        }
        Err(err) => {
            eprintln!("\n[weft] error: {err}");
            std::process::exit(1);
        }
    }
}

/// Print the list of saved conversations to stdout.
async fn print_chats(limit: usize) -> anyhow::Result<()> {
    let store = weft_store::open_default(history_dir())?;
    let page = Page { offset: 0, limit };
    let entries = store.list(&ListFilter::default(), SortOrder::UpdatedDesc, page).await?;

    if entries.is_empty() {
        println!("No saved conversations found.");
        println!("Conversations are stored in: {}", history_dir().display());
        return Ok(());
    }

    println!("{:<45}  {:<20}  {:<5}  SUMMARY", "ID (use with --resume)", "UPDATED", "MSGS");
    println!("{}", "-".repeat(95));
    for e in &entries {
        let summary = e.summary.as_deref().unwrap_or("(no summary yet)");
        let summary = if summary.chars().count() > 40 {
            format!("{}…", summary.chars().take(39).collect::<String>())
        } else {
            summary.to_string()
        };
        println!(
            "{:<45}  {:<20}  {:<5}  {}",
            e.id,
            e.updated_at.format("%Y-%m-%d %H:%M"),
            e.message_count,
            summary
        );
    }
    println!("\nTotal: {} conversation(s)", entries.len());
    Ok(())
}

/// Walk upward from the current directory looking for a `.git` entry.
fn find_project_root() -> Option<PathBuf> {
    let start = std::env::current_dir().ok()?;
    let mut dir: &Path = &start;
    loop {
        if dir.join(".git").exists() {
            return Some(dir.to_path_buf());
        }
        dir = dir.parent()?;
    }
}

/// Directory conversation records are stored under: `$XDG_DATA_HOME/weft`,
/// falling back to `~/.weft`.
fn history_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("weft"))
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".weft"))
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
