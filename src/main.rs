mod repl;

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use refit_core::Config;
use refit_core::bootstrap::build_app;
use refit_memory::SessionId;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::repl::{Input, next_input};

#[derive(Debug, Parser)]
#[command(name = "refit", version, about = "Conversational Python code-quality assistant")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Resume or name a conversation; a fresh id is generated when omitted.
    #[arg(long)]
    session: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config);
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let app = build_app(&config).await?;
    let session = cli.session.map_or_else(SessionId::generate, SessionId::new);
    tracing::info!(session = %session, "session started");

    println!("refit: Python code-quality assistant. Paste code in ``` fences; `exit` quits.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("You: ");
        std::io::stdout().flush()?;

        let text = match next_input(&mut lines).await? {
            Input::Quit => break,
            Input::Skip => continue,
            Input::Message(text) => text,
        };
        match app.orchestrator.advance(&session, &text).await {
            Ok(answer) => println!("refit: {answer}"),
            Err(e) => {
                tracing::warn!("turn failed: {e}");
                println!("refit: Sorry, that request failed: {e}");
            }
        }
    }

    tracing::info!(session = %session, "session ended");
    Ok(())
}

fn init_subscriber() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_config_path(flag: Option<PathBuf>) -> PathBuf {
    if let Some(path) = flag {
        return path;
    }
    if let Ok(path) = std::env::var("REFIT_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("config/default.toml")
}
