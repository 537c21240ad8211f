#![forbid(unsafe_code)]

//! `ime-bridge` — standalone harness for the input-method agent.
//!
//! Starts the agent program, pushes commands to it and prints whatever it
//! sends back, without an editor attached.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
#[cfg(unix)]
use tokio::signal::unix::SignalKind;
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use ime_bridge::agent::{dispatch_line, EventHandler};
use ime_bridge::chat::{ChatSession, LoggingHandler, SessionOptions};
use ime_bridge::{AppError, CommandAgent, GlobalConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "ime-bridge", about = "Input-method agent harness", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the directory holding the agent program.
    #[arg(long)]
    agent_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the agent, run the bootstrap sequence and type some keys.
    Run {
        /// Keys to type after bootstrap.
        #[arg(long, default_value = "aiu")]
        keys: String,

        /// How long to keep printing agent output, in milliseconds.
        #[arg(long, default_value_t = 1000)]
        linger_ms: u64,
    },

    /// Send raw lines to the agent program and log every reply.
    Chat {
        /// Lines to send; the terminator is appended to each.
        lines: Vec<String>,

        /// How long to keep logging replies, in milliseconds.
        #[arg(long, default_value_t = 1000)]
        linger_ms: u64,
    },
}

/// Prints every event the agent reports.
struct PrintingHandler;

impl EventHandler for PrintingHandler {
    fn on_message(&mut self, message: &str) {
        println!("message: {message}");
    }

    fn on_error(&mut self, message: &str) {
        println!("error: {message}");
    }

    fn on_setq(&mut self, name: &str, value: &serde_json::Value) {
        println!("setq: {name} = {value}");
    }

    fn on_log(&mut self, message: &str) {
        println!("log: {message}");
    }

    fn on_imcontext_created(&mut self, id_no: u32) {
        println!("imcontext created: {id_no}");
    }

    fn on_status_changed(&mut self, id_no: u32, engine_name: Option<&str>) {
        println!("status changed: {id_no} engine={engine_name:?}");
    }

    fn on_update_preedit_text(
        &mut self,
        id_no: u32,
        text: &str,
        cursor_pos: u32,
        visible: bool,
        _attributes: &str,
    ) {
        println!("preedit [{id_no}]: {text:?} cursor={cursor_pos} visible={visible}");
    }

    fn on_commit_text(&mut self, id_no: u32, text: &str) {
        println!("commit [{id_no}]: {text:?}");
    }

    fn on_show_lookup_table(&mut self, id_no: u32, candidates: &[String], cursor_pos: u32) {
        println!("candidates [{id_no}]: {candidates:?} cursor={cursor_pos}");
    }

    fn on_key_event_processed(&mut self, id_no: u32, handled: bool) {
        println!("key processed [{id_no}]: handled={handled}");
    }

    fn on_active_engines(&mut self, engines: &[String]) {
        println!("active engines: {engines:?}");
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    if let Some(dir) = args.agent_dir {
        config.agent_dir = dir;
    }
    info!(agent_dir = %config.agent_dir.display(), "configuration loaded");

    match args.command {
        Command::Run { keys, linger_ms } => run_agent(config, &keys, linger_ms).await,
        Command::Chat { lines, linger_ms } => run_chat(&config, &lines, linger_ms).await,
    }
}

async fn run_agent(config: GlobalConfig, keys: &str, linger_ms: u64) -> Result<()> {
    let agent_dir = config.agent_dir.clone();
    let mut agent = CommandAgent::new(config);
    let mut printer = PrintingHandler;
    agent.register_callback(move |line| dispatch_line(&mut printer, &line));
    agent.start(&agent_dir)?;

    let outcome = async {
        agent.setup().await?;
        agent.feed_keys(keys).await?;
        tokio::select! {
            _ = tokio::time::timeout(Duration::from_millis(linger_ms), agent.run_until_closed()) => {}
            signal = shutdown_signal() => info!(signal, "shutdown signal received"),
        }
        Ok::<(), AppError>(())
    }
    .await;

    if let Some(code) = agent.exit_code() {
        warn!(code, "agent exited on its own");
    }
    agent.stop()?;
    outcome
}

async fn run_chat(config: &GlobalConfig, lines: &[String], linger_ms: u64) -> Result<()> {
    let options = SessionOptions {
        current_dir: Some(config.agent_dir.clone()),
        ..SessionOptions::from(config)
    };
    let mut chat = ChatSession::with_options(LoggingHandler, options);
    chat.set_terminator(config.terminator.clone());
    chat.start(&config.argv(&config.agent_dir))?;

    let outcome = async {
        for line in lines {
            chat.push(&format!("{line}{}", config.terminator)).await?;
        }
        tokio::select! {
            _ = tokio::time::timeout(Duration::from_millis(linger_ms), chat.run_until_closed()) => {}
            signal = shutdown_signal() => info!(signal, "shutdown signal received"),
        }
        Ok::<(), AppError>(())
    }
    .await;

    chat.stop()?;
    outcome
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM and names the signal received.
async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(%err, "SIGTERM handler unavailable, waiting for ctrl-c only");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                warn!(%err, "ctrl-c handler failed");
                std::future::pending::<()>().await;
            }
            "ctrl-c"
        }
        () = terminate => "SIGTERM",
    }
}

/// Logs go to stderr; stdout carries the printed agent events.
fn init_tracing(log_format: LogFormat) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let installed = match log_format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().flatten_event(true).try_init(),
    };
    installed.map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))
}
