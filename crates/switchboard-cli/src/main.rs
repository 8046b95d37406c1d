//! Switchboard CLI - route, run and rate requests against local models
use anyhow::Result;
use clap::Parser as _;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt as _, util::SubscriberInitExt as _};

mod cli;
mod handlers;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "switchboard_routing=info,switchboard_providers=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Route(request) => handlers::handle_route(config_path, &request).await?,
        Commands::Run { request, json } => handlers::handle_run(config_path, &request, json).await?,
        Commands::Feedback {
            id,
            quality,
            feedback,
            latency_ms,
            tokens,
            error,
            retries,
        } => {
            let outcome = handlers::outcome(quality, feedback, latency_ms, tokens, error.then_some(retries));
            handlers::handle_feedback(config_path, id, outcome).await?;
        }
        Commands::Stats { strategy, model } => handlers::handle_stats(config_path, strategy, model).await?,
        Commands::Config { path } => handlers::handle_config(config_path, path)?,
    }

    Ok(())
}
