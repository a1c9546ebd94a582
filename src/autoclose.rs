//! Background tasks: the auto-close listener and the periodic WAL compactor.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::info;
use ulid::Ulid;

use crate::engine::Engine;
use crate::model::CloseTrigger;

/// Drains first-correct signals from the engine and closes each question
/// once. The close itself is idempotent, so duplicate signals (two correct
/// answers racing) collapse into a single close event.
pub async fn run_autoclose(engine: Arc<Engine>, mut rx: mpsc::Receiver<Ulid>) {
    while let Some(question_id) = rx.recv().await {
        let now = OffsetDateTime::now_utc();
        match engine.force_close(question_id, CloseTrigger::Auto, now).await {
            Ok(true) => info!("auto-closed question {question_id}"),
            Ok(false) => {
                // Lost the race against a manual close or an earlier signal
                tracing::debug!("auto-close skip {question_id}: already closed");
            }
            Err(e) => {
                // Question may have been removed meanwhile
                tracing::debug!("auto-close skip {question_id}: {e}");
            }
        }
    }
}

/// Periodically compacts the WAL once the append count since the last
/// compaction crosses `threshold`.
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
