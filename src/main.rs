use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use finreports::db::Database;
use finreports::models::Config;
use finreports::pipeline::FetchPipeline;
use finreports::provider::VciClient;
use finreports::scheduler::Scheduler;
use finreports::scraper::extract::TextExtractor;
use finreports::scraper::{CafefReportSource, ReportScraper};
use finreports::store::StatementStore;

#[derive(Parser, Debug)]
#[command(name = "finreports", about = "Financial statement acquisition service")]
struct Args {
    /// SQLite database path, overrides DATABASE_PATH
    #[arg(long)]
    database: Option<String>,

    /// Run one full sweep immediately and exit
    #[arg(long)]
    sweep_once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("finreports=info")),
        )
        .init();

    let args = Args::parse();
    let mut config = Config::from_env()?;
    if let Some(database) = args.database {
        config.database_path = database;
    }

    info!(database = %config.database_path, "starting");
    let db = Database::new(&config.database_path).await?;

    let provider = Arc::new(VciClient::new(&config)?);
    let store = Arc::new(StatementStore::new(db, provider.clone()));
    let source = Arc::new(CafefReportSource::new(&config)?);
    let scraper = Arc::new(ReportScraper::new(
        source,
        Arc::new(TextExtractor),
        store.clone(),
        config.horizon_years,
    ));
    let pipeline = Arc::new(FetchPipeline::new(
        store.clone(),
        provider,
        scraper,
        &config.lang,
    ));
    let scheduler = Scheduler::new(pipeline, store, config);

    if args.sweep_once {
        scheduler.run_sweep().await;
        return Ok(());
    }

    scheduler.start().await;
    {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.sync_initial_batch().await });
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    scheduler.shutdown().await;
    Ok(())
}
