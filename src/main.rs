use anyhow::Context;
use betterbot_backend::config::Config;
use betterbot_backend::engine::Engine;
use betterbot_backend::exchange::{ExchangeClient, PaperExchangeClient};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("betterbot_backend={level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    init_tracing(&config.log_level);

    info!(dry_run = config.dry_run, "betterbot.starting");

    // Wire protocol details are out of scope; until a live HTTP client is
    // built against the exchange, the engine always runs against the paper
    // exchange, with `dry_run` governing whether the order manager simulates
    // fills (always, currently) or would submit live orders.
    let exchange: Arc<dyn ExchangeClient> = Arc::new(PaperExchangeClient::new(config.starting_balance_usd));

    let engine = Arc::new(Engine::bootstrap(config, exchange).await.context("engine bootstrap failed")?);
    engine.clone().run().await.context("engine run failed")?;

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    info!("betterbot.shutdown_signal_received");
    engine.shutdown().await.context("engine shutdown failed")?;

    Ok(())
}
