//! Daemon wiring: warm the cache, run the bridge and cleanup, log stats.

use crate::client::{RestClient, WsClient};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::realtime::WsChangeFeed;
use crate::rest::RestRemoteSource;
use orchard_core::Orchard;
use orchard_store::{
    cleanup_task, BridgeConfig, BridgeMetricsSnapshot, CacheStats, ChangeFeed, CleanupConfig,
    CleanupSnapshot, EntityCache, RemoteSource, SubscriptionBridge,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

/// Runtime settings for [`run_with`].
#[derive(Debug, Clone)]
pub struct DaemonSettings {
    /// Owner whose entities are preloaded next to the public set.
    pub owner_id: Option<String>,
    pub bridge: BridgeConfig,
    pub cleanup: CleanupConfig,
    pub stats_interval: Duration,
}

impl DaemonSettings {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            owner_id: config.owner_id.clone(),
            bridge: config.bridge_config(),
            cleanup: config.cleanup_config(),
            stats_interval: config.stats_interval(),
        }
    }
}

/// Final counters, reported once the daemon has stopped.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonReport {
    pub cache: CacheStats,
    pub bridge: BridgeMetricsSnapshot,
    pub cleanup: CleanupSnapshot,
}

/// Run the daemon against the configured backend until Ctrl-C.
pub async fn run(config: SyncConfig) -> Result<(), SyncError> {
    config.validate()?;
    let settings = DaemonSettings::from_config(&config);

    let remote = RestRemoteSource::<Orchard>::new(
        RestClient::new(&config)?,
        settings.bridge.primary_table.clone(),
    )
    .with_id_column(settings.bridge.id_column.clone());
    let cache = Arc::new(EntityCache::new(remote, config.cache_config()));
    let feed = Arc::new(WsChangeFeed::spawn(
        WsClient::new(&config)?,
        settings.bridge.channel_capacity,
    ));

    tracing::info!(
        rest_base_url = %config.rest_base_url,
        ws_endpoint = %config.ws_endpoint,
        table = %settings.bridge.primary_table,
        "Sync daemon starting"
    );

    let result = run_with(cache, Arc::clone(&feed), settings, shutdown_signal()).await;
    feed.shutdown();
    let report = result?;

    tracing::info!(
        report = %serde_json::to_string(&report).unwrap_or_default(),
        "Sync daemon stopped"
    );
    Ok(())
}

/// Run the daemon over any cache and feed until `shutdown` resolves.
///
/// Shutdown order: bridge first so no new syncs are scheduled, then the
/// cleanup task with its final sweep.
pub async fn run_with<S, F>(
    cache: Arc<EntityCache<S>>,
    feed: Arc<F>,
    settings: DaemonSettings,
    shutdown: impl Future<Output = ()>,
) -> Result<DaemonReport, SyncError>
where
    S: RemoteSource + 'static,
    F: ChangeFeed + 'static,
{
    let _change_log = cache.subscribe(|id, version| {
        tracing::trace!(entity_id = %id, version, "Entity changed");
    });

    match cache.refresh_all(settings.owner_id.as_deref()).await {
        Ok(loaded) => tracing::info!(loaded, "Cache warmed"),
        Err(err) => tracing::warn!(error = %err, "Cache warm-up failed, continuing cold"),
    }

    let mut bridge = SubscriptionBridge::new(Arc::clone(&cache), feed, settings.bridge);
    bridge.start().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let cleanup = tokio::spawn(cleanup_task(
        Arc::clone(&cache),
        settings.cleanup,
        shutdown_rx,
    ));

    let mut stats_interval = interval(settings.stats_interval);
    stats_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    stats_interval.tick().await;

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Shutdown requested");
                break;
            }
            _ = stats_interval.tick() => {
                log_stats(&cache.stats(), &bridge.metrics());
            }
        }
    }

    bridge.shutdown().await;
    let _ = shutdown_tx.send(true);
    let cleanup = cleanup.await?.snapshot();

    Ok(DaemonReport {
        cache: cache.stats(),
        bridge: bridge.metrics(),
        cleanup,
    })
}

fn log_stats(cache: &CacheStats, bridge: &BridgeMetricsSnapshot) {
    tracing::info!(
        entries = cache.entry_count,
        version = cache.version,
        hits = cache.hits,
        misses = cache.misses,
        failures = cache.failures,
        evictions = cache.evictions,
        events = bridge.events_received,
        syncs = bridge.syncs_completed,
        "Cache stats"
    );
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for Ctrl-C, shutting down");
    }
}
