use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::observability;
use crate::persist::WalStore;

/// Background task that compacts the WAL once `threshold` records have been
/// appended since the last compaction.
pub async fn run_compactor(store: Arc<WalStore>, threshold: u64, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let appended = store.appends_since_compact().await;
        if appended < threshold {
            continue;
        }
        match store.compact().await {
            Ok(()) => {
                metrics::counter!(observability::WAL_COMPACTIONS_TOTAL).increment(1);
                info!("compacted {} after {appended} appends", store.path().display());
            }
            Err(e) => tracing::warn!("compaction of {} failed: {e}", store.path().display()),
        }
    }
}
