// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::Cli;
use lace_config::Config;
use lace_core::{
    handle_command, Agent, AgentEvent, BusApprovalCallback, CommandOutcome, DelegateTool,
    EventBus,
};
use lace_model::{ModelProvider, ProviderRegistry};
use lace_store::{EventType, SqliteStore};
use lace_threads::ThreadManager;
use lace_tools::{
    ApprovalCallback, ApprovalDecision, ApprovalPolicy, ApprovalRequest, ToolExecutor,
    ToolRegistry,
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("lace: {e:#}");
            std::process::exit(1);
        }
    }
}

fn init_logging(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(cli.log_level.as_deref().unwrap_or("info")))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let log_file = cli
        .log_file
        .as_ref()
        .and_then(|path| std::fs::File::options().create(true).append(true).open(path).ok());
    match log_file {
        Some(file) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(file).with_ansi(false))
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let config = Arc::new(build_config(&cli)?);

    // Persistent state: one SQLite event store per LACE_DIR.
    let lace_dir = resolve_lace_dir(&config)?;
    std::fs::create_dir_all(&lace_dir)
        .with_context(|| format!("creating {}", lace_dir.display()))?;
    let store = Arc::new(SqliteStore::open(&lace_dir.join("lace.db"))?);
    let threads = Arc::new(ThreadManager::new(store));
    let bus = Arc::new(EventBus::new());

    // Providers: the mock driver ships built in; HTTP drivers register here
    // in driver-enabled builds.
    let providers = Arc::new(ProviderRegistry::new());
    let model_spec = format!("{}:{}", config.model.provider, config.model.name);
    let provider: Arc<dyn ModelProvider> = providers.create(&model_spec)?;

    // Thread selection: continue or fresh.
    let (thread_id, resumed) = match &cli.continue_thread {
        Some(id) if id.is_empty() => {
            let latest = threads
                .latest_thread()?
                .context("--continue: no previous thread to resume")?;
            (latest, true)
        }
        Some(id) => {
            anyhow::ensure!(threads.thread_exists(id)?, "--continue: unknown thread {id}");
            (id.clone(), true)
        }
        None => (threads.create_thread()?, false),
    };
    debug!(thread_id = %thread_id, resumed, "session thread selected");

    // Tools: delegation is built in; concrete tool bodies register here in
    // tool-enabled builds.
    let delegate = Arc::new(DelegateTool::new(
        &threads,
        Arc::clone(&providers),
        Arc::clone(&bus),
        Arc::clone(&config),
    ));
    let mut registry = ToolRegistry::new();
    registry.register_arc(delegate.clone());

    let callback: Arc<dyn ApprovalCallback> = Arc::new(BusApprovalCallback::new(
        Arc::new(TerminalApprovalCallback),
        Arc::clone(&bus),
    ));
    let approvals = Arc::new(ApprovalPolicy::new(config.tools.clone(), Some(callback)));
    let executor = Arc::new(ToolExecutor::new(Arc::new(registry), approvals, &config));
    delegate.bind_parent_executor(&executor);

    let mut agent = Agent::new(
        provider,
        executor,
        Arc::clone(&threads),
        Arc::clone(&bus),
        Arc::clone(&config),
        thread_id.clone(),
    );
    if let Ok(cwd) = std::env::current_dir() {
        agent = agent.with_working_directory(cwd);
    }

    spawn_renderer(&bus);

    if resumed {
        let replayed = agent.replay_session_events()?;
        debug!(events = replayed, "replayed session history");
    }

    // Single-shot mode.
    if let Some(prompt) = &cli.prompt {
        if !run_turn_interruptible(&mut agent, prompt).await? {
            return Ok(130);
        }
        return Ok(0);
    }

    repl(&mut agent, &threads, &bus, &thread_id).await
}

/// The interactive loop. Returns the process exit code.
async fn repl(
    agent: &mut Agent,
    threads: &Arc<ThreadManager>,
    bus: &Arc<EventBus>,
    thread_id: &str,
) -> anyhow::Result<i32> {
    loop {
        let Some(line) = read_line_interruptible("> ").await? else {
            return Ok(130); // SIGINT at the prompt
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        match handle_command(&line, threads, thread_id, bus, agent.session())? {
            CommandOutcome::Exit => return Ok(0),
            CommandOutcome::Handled => continue,
            CommandOutcome::NotACommand => {}
        }

        if !run_turn_interruptible(agent, &line).await? {
            return Ok(130); // double interrupt during the turn
        }
    }
}

/// Drive one turn; SIGINT aborts it, a second SIGINT within 2 s exits.
/// Returns `false` when the process should terminate with 130.
async fn run_turn_interruptible(agent: &mut Agent, text: &str) -> anyhow::Result<bool> {
    let abort = agent.abort_handle();
    let turn = agent.send_message(text);
    tokio::pin!(turn);

    let mut last_interrupt: Option<Instant> = None;
    loop {
        tokio::select! {
            res = &mut turn => {
                res?;
                return Ok(true);
            }
            _ = tokio::signal::ctrl_c() => {
                if last_interrupt.is_some_and(|t| t.elapsed() < Duration::from_secs(2)) {
                    return Ok(false);
                }
                last_interrupt = Some(Instant::now());
                abort.abort();
            }
        }
    }
}

/// Blocking stdin read that a SIGINT can pre-empt. `None` means interrupted.
async fn read_line_interruptible(prompt: &str) -> anyhow::Result<Option<String>> {
    print!("{prompt}");
    std::io::stdout().flush().ok();

    let read = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|n| (n, line))
    });
    tokio::pin!(read);

    tokio::select! {
        res = &mut read => {
            let (n, line) = res.context("stdin reader panicked")??;
            if n == 0 {
                // EOF behaves like /exit.
                Ok(Some("/exit".into()))
            } else {
                Ok(Some(line))
            }
        }
        _ = tokio::signal::ctrl_c() => Ok(None),
    }
}

/// Minimal headless renderer: prints streamed text and tool activity.
/// Richer UIs subscribe to the same bus.
fn spawn_renderer(bus: &Arc<EventBus>) {
    let (_, mut rx) = bus.subscribe();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                AgentEvent::Token { delta } => {
                    print!("{delta}");
                    std::io::stdout().flush().ok();
                }
                AgentEvent::ResponseComplete { .. } => println!(),
                AgentEvent::ToolCallStart { call } => {
                    println!("[tool] {}({})", call.name, call.arguments);
                }
                AgentEvent::ToolCallComplete {
                    tool_name,
                    is_error,
                    ..
                } => {
                    println!("[tool] {tool_name} {}", if is_error { "failed" } else { "ok" });
                }
                AgentEvent::ThreadEventAdded { event }
                    if event.event_type == EventType::LocalSystemMessage =>
                {
                    if let Some(text) = event.payload.as_text() {
                        println!("[lace] {text}");
                    }
                }
                AgentEvent::TurnAborted { .. } => println!("\n[lace] turn aborted"),
                AgentEvent::Error { message } => eprintln!("[error] {message}"),
                _ => {}
            }
        }
    });
}

/// The user prompt for tool approval, on the terminal.
struct TerminalApprovalCallback;

#[async_trait::async_trait]
impl ApprovalCallback for TerminalApprovalCallback {
    async fn request_approval(&self, req: ApprovalRequest) -> anyhow::Result<ApprovalDecision> {
        let answer = tokio::task::spawn_blocking(move || {
            println!(
                "\nApprove tool '{}' with arguments {}? [y]es / [s]ession / [n]o",
                req.tool_name, req.arguments
            );
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map(|_| line)
        })
        .await
        .context("approval prompt interrupted")??;

        Ok(match answer.trim().to_lowercase().as_str() {
            "y" | "yes" => ApprovalDecision::AllowOnce,
            "s" | "session" => ApprovalDecision::AllowSession,
            _ => ApprovalDecision::Deny,
        })
    }
}

fn build_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = lace_config::load(cli.config.as_deref())?;

    if let Some(provider) = &cli.provider {
        config.model.provider = provider.clone();
    }
    if let Some(model) = &cli.model {
        config.model.name = model.clone();
    }
    if cli.allow_non_destructive_tools {
        config.tools.allow_non_destructive_tools = true;
    }
    if cli.disable_all_tools {
        config.tools.disable_all_tools = true;
    }
    if cli.disable_tool_guardrails {
        config.tools.disable_tool_guardrails = true;
    }
    config
        .tools
        .auto_approve_tools
        .extend(cli.auto_approve_tools.iter().cloned());
    config
        .tools
        .disable_tools
        .extend(cli.disable_tools.iter().cloned());
    if let Some(level) = &cli.log_level {
        config.logging.level = Some(level.clone());
    }
    if let Some(file) = &cli.log_file {
        config.logging.file = Some(file.clone());
    }
    if let Some(har) = &cli.har {
        config.har_file = Some(har.clone());
    }

    Ok(config)
}

fn resolve_lace_dir(config: &Config) -> anyhow::Result<PathBuf> {
    if let Some(dir) = &config.lace_dir {
        return Ok(dir.clone());
    }
    if let Ok(dir) = std::env::var("LACE_DIR") {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    dirs::home_dir()
        .map(|h| h.join(".lace"))
        .context("cannot determine home directory; set LACE_DIR")
}
