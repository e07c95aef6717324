use clap::{Parser, Subcommand};
use colored::*;
use anyhow::{Context, Result};
use std::time::Duration;

mod app;
mod handler;
mod logging;
mod tui;
mod ui;

use app::App;
use pocketchat_core::{Backend, ChatSession, Config, SessionError, SubmitError};
use tui::EventHandler;

/// How long quitting waits for an in-flight reply before releasing the model
const REPLY_GRACE: Duration = Duration::from_secs(3);

#[derive(Parser)]
#[command(name = "pocketchat")]
#[command(about = "Chat with a local language model from the terminal")]
struct Cli {
    /// Backend to use: embedded (multi-turn) or http (single prompt)
    #[arg(short, long, global = true)]
    backend: Option<Backend>,
    /// Model name, e.g. llama3.2:latest
    #[arg(short, long, global = true)]
    model: Option<String>,
    /// Ollama server URL
    #[arg(long, global = true)]
    host: Option<String>,
    /// Verbose logging to the log file
    #[arg(long, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat (default)
    Chat,
    /// Ask a single question and print the reply
    Ask {
        /// Your question
        question: String,
    },
    /// List available Ollama models
    Models,
    /// Save a model as the default
    Use {
        /// Model name as listed by `pocketchat models`
        model: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = logging::init(cli.debug)?;

    let mut config = Config::load().unwrap_or_else(|e| {
        eprintln!("{}: {:#}", "Ignoring config file".yellow(), e);
        Config::new()
    });
    config.apply_env()?;
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    if let Some(model) = cli.model {
        config.default_model = model;
    }
    if let Some(host) = cli.host {
        config.ollama_url = pocketchat_core::config::normalize_host(&host);
    }

    tracing::info!(
        backend = config.backend.as_str(),
        model = %config.default_model,
        url = %config.ollama_url,
        "starting"
    );

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => run_chat(&config).await?,
        Commands::Ask { question } => ask_once(&config, &question).await?,
        Commands::Models => list_ollama_models(&config).await?,
        Commands::Use { model } => {
            Config::save_default_model(&model)?;
            println!("Default model set to {}", model.bold().green());
        }
    }

    Ok(())
}

async fn start_session(config: &Config) -> Result<ChatSession> {
    let session = ChatSession::new(config.build_gateway(), config.greeting.as_deref());
    session.initialize().await.with_context(|| {
        format!(
            "Could not start {} with model {} at {}",
            config.backend.display_name(),
            config.default_model,
            config.ollama_url
        )
    })?;
    tracing::info!(gateway = session.gateway_name(), "gateway ready");
    Ok(session)
}

async fn run_chat(config: &Config) -> Result<()> {
    let session = start_session(config).await?;

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = EventHandler::new();
    let mut app = App::new(session.clone(), config, events.sender());

    let result = async {
        while !app.should_quit {
            terminal.draw(|frame| ui::render(&mut app, frame))?;
            match events.next().await {
                Some(event) => handler::handle_event(&mut app, event)?,
                None => break,
            }
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    tui::restore()?;
    if session.is_awaiting_reply() && !session.settle(REPLY_GRACE).await {
        tracing::warn!(
            grace_secs = REPLY_GRACE.as_secs(),
            "quitting with a reply still in flight, abandoning it"
        );
    }
    session.cleanup().await;
    tracing::info!("session closed");
    result
}

async fn ask_once(config: &Config, question: &str) -> Result<()> {
    let session = start_session(config).await?;

    println!("🤖 Asking {}...\n", config.default_model.bold().magenta());

    let outcome = session.send(question, None).await;
    session.cleanup().await;

    match outcome {
        Ok(reply) => println!("{}", reply.text()),
        Err(SessionError::Submit(SubmitError::Empty)) => {
            println!("{}", "Nothing to ask: the question is empty".yellow());
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

async fn list_ollama_models(config: &Config) -> Result<()> {
    let ollama = config.ollama_client();

    println!("\n{}", "🤖 Available Ollama Models".bold().blue());
    println!("{}", "=".repeat(30).dimmed());

    match ollama.list_models().await {
        Ok(models) => {
            if models.is_empty() {
                println!("{}", "No models found. Pull a model with: ollama pull llama3.2".yellow());
            } else {
                for model in models {
                    let marker = if model == config.default_model { " (default)" } else { "" };
                    println!("  • {}{}", model.green(), marker.dimmed());
                }
            }
        }
        Err(e) => {
            println!("{}: {}", "Error connecting to Ollama".red(), e);
            println!("Make sure Ollama is running: {}", "ollama serve".bold());
            println!("Then pull a model: {}", "ollama pull llama3.2".bold());
        }
    }

    Ok(())
}
