//! Task Board Sync demo entry point

use std::sync::Arc;
use task_board_sync::config::BoardConfig;
use task_board_sync::demo;
use task_board_sync::store::memory::MemoryStore;
use tracing::info;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = BoardConfig::load()?;
    config.validate()?;

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.max_log_level()?)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Task Board Sync");

    let store = Arc::new(MemoryStore::new());
    demo::run(store, &config).await?;
    Ok(())
}
