use anyhow::Context;
use bot_runtime::{BotConfig, BotContext, StdoutTransport};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "bot")]
#[command(about = "Chat bot front-end reading JSON-lines events from stdin")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, env = "BOT_CONFIG")]
    config: Option<PathBuf>,

    /// Read events from this file instead of stdin
    #[arg(long)]
    input: Option<PathBuf>,
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = BotConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str())),
        )
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_line_number(true)
                .with_file(false)
                .with_writer(std::io::stderr),
        )
        .init();

    tracing::info!(bot_id = config.bot.bot_id, backend = ?config.backend.kind, "Starting bot...");

    let ctx = BotContext::builder(config)
        .transport(Arc::new(StdoutTransport::stdout()))
        .build()
        .context("failed to build bot context")?;

    if let Err(e) = ctx.store.ping().await {
        tracing::warn!("State store is not reachable yet: {}", e);
    }

    let ctx = Arc::new(ctx);
    let summary = match cli.input {
        Some(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            bot_runtime::run(ctx, BufReader::new(file), shutdown_signal()).await
        }
        None => bot_runtime::run(ctx, BufReader::new(tokio::io::stdin()), shutdown_signal()).await,
    };

    if summary.malformed > 0 {
        tracing::warn!(malformed = summary.malformed, "Some input lines were not valid events");
    }
    Ok(())
}
