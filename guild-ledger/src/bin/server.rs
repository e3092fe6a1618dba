//! Guild ledger service binary

use anyhow::Context;
use guild_ledger::{Config, Ledger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting guild ledger");

    // Load configuration
    let config = match std::env::var("GUILD_LEDGER_CONFIG") {
        Ok(path) => Config::from_file(&path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        Err(_) => Config::from_env().context("Failed to load config from environment")?,
    };

    let service_name = config.service_name.clone();
    let ledger = Ledger::open(config).await.context("Failed to open ledger")?;

    let stats = ledger.stats()?;
    tracing::info!(
        approximate_entries = stats.approximate_entries,
        last_entry_id = ?stats.last_entry_id,
        service = %service_name,
        "Ledger ready"
    );

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down guild ledger");
    ledger.shutdown().await?;
    Ok(())
}
