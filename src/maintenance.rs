//! Periodic cache upkeep: expiry sweeps and statistics snapshots.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::cache::TieredCache;

/// Expired entries are swept every five minutes.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Cache statistics are logged every hour.
const STATS_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Run both maintenance timers until shutdown is signalled.
pub async fn run_maintenance(cache: Arc<TieredCache>, mut shutdown_rx: broadcast::Receiver<()>) {
    let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
    let mut stats = tokio::time::interval(STATS_INTERVAL);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    stats.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Intervals fire immediately on the first tick; consume those so the
    // first real run happens one period from now.
    sweep.tick().await;
    stats.tick().await;

    info!("Cache maintenance tasks started");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Maintenance tasks received shutdown signal");
                break;
            }

            _ = sweep.tick() => {
                match cache.clean_expired().await {
                    Ok(count) => info!("Expiry sweep removed {} cache entries", count),
                    Err(e) => warn!("Expiry sweep failed: {}", e),
                }
            }

            _ = stats.tick() => {
                match cache.stats().await {
                    Ok(stats) => {
                        let counters = cache.counters();
                        info!(
                            "Cache stats: {} total, {} valid, {} expired, {} listed, {} not listed, {} errors ({} L1 hits, {} L2 hits, {} misses since start)",
                            stats.total,
                            stats.valid,
                            stats.expired,
                            stats.listed,
                            stats.not_listed,
                            stats.errors,
                            counters.l1_hits.load(Ordering::Relaxed),
                            counters.l2_hits.load(Ordering::Relaxed),
                            counters.misses.load(Ordering::Relaxed)
                        );
                    }
                    Err(e) => warn!("Cache stats snapshot failed: {}", e),
                }
            }
        }
    }
}
