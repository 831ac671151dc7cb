//! ORCHARD sync daemon entry point.

use orchard_sync::config::SyncConfig;
use orchard_sync::error::SyncError;
use orchard_sync::telemetry::init_tracing;

#[tokio::main]
async fn main() -> Result<(), SyncError> {
    let config = SyncConfig::load()?;
    init_tracing(&config.logging())?;
    orchard_sync::run(config).await
}
