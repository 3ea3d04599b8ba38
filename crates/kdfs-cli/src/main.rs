use anyhow::Result;
use clap::{Parser, Subcommand};
use kdfs_storage::Store;
use kdfs_sync::{run_scheduler, SyncConfig, SyncEngine};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "kdfs")]
#[command(about = "Incremental disaster news and alert feed synchronizer")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Sync once immediately, then on the configured interval, forever.
    Run,
    /// Run a single sync cycle and exit.
    Sync,
    /// Create the feed tables if absent and exit.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    // A store connection failure here is fatal; nothing runs without one.
    let store = Store::connect(&config.database_url).await?;
    store.migrate().await?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Migrate => {
            println!("schema ready");
        }
        Commands::Sync => {
            let engine = SyncEngine::new(store, config)?;
            let summary = engine.run_cycle().await;
            println!(
                "sync complete: run_id={} news={} messages={}",
                summary.run_id, summary.news_inserted, summary.messages_inserted
            );
        }
        Commands::Run => {
            let poll_interval = config.poll_interval;
            let engine = SyncEngine::new(store, config)?;
            info!(interval_secs = poll_interval.as_secs(), "starting scheduler");
            run_scheduler(&engine, poll_interval).await;
        }
    }

    Ok(())
}
