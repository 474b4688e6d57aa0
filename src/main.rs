//! agent-bridge command line client.
//!
//! ```text
//! agent-bridge [--config agent-bridge.toml] <command>
//!
//!   ask <text>          one query, full reply
//!   stream <text>       one query, reply printed as it arrives
//!   chat                interactive session (/new, /stats, /quit)
//!   history [--limit N] messages of the current session
//!   stats               connection and memory statistics
//! ```

use std::error::Error;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

use agent_bridge::config::load_or_default;
use agent_bridge::config::watcher::ConfigWatcher;
use agent_bridge::lifecycle::build_bridge;
use agent_bridge::lifecycle::signals::spawn_cleanup_on_signal;
use agent_bridge::observability::{logging, metrics};
use agent_bridge::{AgentBridge, QueryResponse, ResponseKind};

#[derive(Parser)]
#[command(name = "agent-bridge")]
#[command(about = "Resilient client for a remote agent service", long_about = None)]
struct Cli {
    /// Configuration file (defaults apply when it does not exist)
    #[arg(short, long, default_value = "agent-bridge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one query and print the reply
    Ask {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Send one query and print the reply as it streams
    Stream {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Interactive chat with hot config reload
    Chat,
    /// Show messages of the current session
    History {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Show connection and memory statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = load_or_default(&cli.config)?;

    // Initialize tracing subscriber
    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), config = ?cli.config, "agent-bridge starting");

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let bridge = Arc::new(build_bridge(&config)?);
    let mut cleanup = spawn_cleanup_on_signal(bridge.clone());

    match cli.command {
        Commands::Ask { text } => {
            connect(&bridge).await;
            let response = bridge.process_query(&text.join(" ")).await;
            println!("{}", response.text());
            report(&response);
        }
        Commands::Stream { text } => {
            connect(&bridge).await;
            stream_reply(&bridge, text.join(" ")).await?;
        }
        Commands::Chat => {
            connect(&bridge).await;
            chat(&bridge, &cli.config, &mut cleanup).await?;
        }
        Commands::History { limit } => {
            for message in bridge.memory().get_conversation_context(limit) {
                println!(
                    "[{}] {}: {}",
                    message.created_at.format("%Y-%m-%d %H:%M:%S"),
                    message.role,
                    message.content
                );
            }
        }
        Commands::Stats => print_json(&bridge.snapshot())?,
    }

    bridge.cleanup_connection();
    cleanup.abort();
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn connect(bridge: &AgentBridge) {
    if !bridge.initialize_connection().await {
        eprintln!("warning: {}; replies will use fallbacks", bridge.status());
    }
}

async fn stream_reply(bridge: &Arc<AgentBridge>, text: String) -> Result<(), Box<dyn Error>> {
    let (mut chunks, handle) = bridge.open_stream(text);
    let mut stdout = std::io::stdout();
    while let Some(chunk) = chunks.recv().await {
        write!(stdout, "{}", chunk)?;
        stdout.flush()?;
    }
    writeln!(stdout)?;

    let response = handle.await??;
    if response.kind == ResponseKind::Error {
        println!("{}", response.text());
    }
    report(&response);
    Ok(())
}

async fn chat(
    bridge: &Arc<AgentBridge>,
    config_path: &Path,
    cleanup: &mut JoinHandle<()>,
) -> Result<(), Box<dyn Error>> {
    let (watcher, mut reloads) = ConfigWatcher::new(config_path);
    let _watcher = match watcher.run() {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            tracing::warn!(error = %e, "Config hot reload unavailable");
            None
        }
    };

    let mut status = bridge.subscribe_status();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt()?;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "" => {}
                    "/quit" | "/exit" => break,
                    "/new" => println!("started session {}", bridge.memory().start_new_session()),
                    "/stats" => print_json(&bridge.snapshot())?,
                    text => stream_reply(bridge, text.to_string()).await?,
                }
                prompt()?;
            }
            Some(config) = reloads.recv() => bridge.apply_config(&config),
            Ok(()) = status.changed() => {
                let current = status.borrow_and_update().clone();
                eprintln!("[{}]", current);
            }
            _ = &mut *cleanup => break,
        }
    }
    Ok(())
}

fn prompt() -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    write!(stdout, "> ")?;
    stdout.flush()
}

fn report(response: &QueryResponse) {
    if let (ResponseKind::Fallback, Some(detail)) = (response.kind, &response.detail) {
        eprintln!("(fallback: {})", detail);
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
