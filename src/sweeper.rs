use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

fn wall_clock_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

/// Background task that archives terminal bookings past the retention window.
pub async fn run_archiver(engine: Arc<Engine>, retention_ms: i64) {
    let mut interval = tokio::time::interval(Duration::from_secs(3600));
    loop {
        interval.tick().await;
        match engine.archive_eligible(wall_clock_ms(), retention_ms).await {
            Ok(0) => {}
            Ok(n) => info!("archived {n} bookings past retention"),
            Err(e) => tracing::warn!("archive sweep failed: {e}"),
        }
    }
}

/// Background task that compacts the WAL once enough appends have accumulated.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::warn!("WAL compaction failed: {e}"),
        }
    }
}
