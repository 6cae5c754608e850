use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use colored::Colorize;
use plauder::{
    persona::{PERSONA_NAME, ROLE_PROMPT},
    providers::{deepseek::DeepSeek, scripted::ScriptedProvider},
    Config, ConfigOverrides, LLMProvider, Session, Summarizer, TranscriptStore,
};
use tokio::io::BufReader;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "plauder")]
#[command(about = "Streaming chat client with a persisted, self-summarizing transcript")]
struct Args {
    /// DeepSeek API key (can also set DEEPSEEK_API_KEY env var)
    #[arg(long)]
    api_key: Option<String>,

    /// API base URL (can also set DEEPSEEK_BASE_URL env var)
    #[arg(long)]
    base_url: Option<String>,

    /// Model identifier (can also set DEEPSEEK_MODEL env var)
    #[arg(long)]
    model: Option<String>,

    /// Sampling temperature
    #[arg(long)]
    temperature: Option<f32>,

    /// Transcript file (can also set PLAUDER_HISTORY env var)
    #[arg(long)]
    history: Option<PathBuf>,

    /// Directory for pre-summary backups (defaults to backup/ next to the transcript)
    #[arg(long)]
    backup_dir: Option<PathBuf>,

    /// Echo replies locally instead of calling the API
    #[arg(long)]
    offline: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match Config::from_env(ConfigOverrides {
        api_key: args.api_key,
        base_url: args.base_url,
        model: args.model,
        temperature: args.temperature,
        history: args.history,
        backup_dir: args.backup_dir,
        offline: args.offline,
    }) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("{} {error}", "error:".red().bold());
            std::process::exit(1);
        }
    };

    let provider: Arc<dyn LLMProvider> = match config.provider_config() {
        Some(provider_config) if !config.offline => Arc::new(DeepSeek::from_config(provider_config)?),
        _ => Arc::new(ScriptedProvider::echo()),
    };
    tracing::debug!(provider = provider.name(), model = %config.model, "provider ready");

    let mut store = TranscriptStore::new(&config.history_path, ROLE_PROMPT);
    if let Some(backup_dir) = &config.backup_dir {
        store = store.with_backup_dir(backup_dir);
    }

    let summarizer = Summarizer::new(Arc::clone(&provider), config.model.clone())
        .with_temperature(config.temperature);
    let mut session = Session::start(store, provider, config.model.clone())
        .with_temperature(config.temperature)
        .with_summarizer(summarizer);

    println!(
        "{} chat client (type 'exit' to quit, '/s' to summarize)",
        PERSONA_NAME.bold()
    );

    let shutdown = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!(%error, "could not listen for interrupts");
            std::future::pending::<()>().await;
        }
    };

    let mut stdout = std::io::stdout();
    let result = session
        .run(BufReader::new(tokio::io::stdin()), &mut stdout, shutdown)
        .await;

    // The blocking stdin reader would otherwise hold the runtime open after an interrupt.
    match result {
        Ok(end) => {
            tracing::debug!(?end, "session ended");
            std::process::exit(0);
        }
        Err(error) => {
            eprintln!("{} {error}", "error:".red().bold());
            std::process::exit(1);
        }
    }
}
