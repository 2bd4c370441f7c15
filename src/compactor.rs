use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::{Engine, EngineError};
use crate::observability;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task: rewrite the WAL as a snapshot once `threshold` appends
/// have accumulated since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_due(&engine, threshold).await {
            tracing::error!("WAL compaction failed: {e}");
        }
    }
}

/// Returns whether a compaction ran.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> Result<bool, EngineError> {
    let appends = engine.wal_appends_since_compact().await?;
    if appends < threshold {
        return Ok(false);
    }
    engine.compact_wal().await?;
    metrics::counter!(observability::WAL_COMPACTIONS_TOTAL).increment(1);
    info!("WAL compacted after {appends} appends");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::model::LocationPatch;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("netdoc_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn location(name: &str) -> LocationPatch {
        LocationPatch { name: Some(name.into()), ..Default::default() }
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let engine = Engine::new(path.clone(), Arc::new(AuditLog::new(16))).unwrap();

        let id = Ulid::new();
        engine.create_location(id, location("Lab")).await.unwrap();
        for n in 0..4 {
            engine.update_location(id, location(&format!("Lab {n}"))).await.unwrap();
        }
        assert!(!compact_if_due(&engine, 10).await.unwrap());
        assert!(compact_if_due(&engine, 5).await.unwrap());
        assert_eq!(engine.wal_appends_since_compact().await.unwrap(), 0);

        drop(engine);
        let reopened = Engine::new(path, Arc::new(AuditLog::new(16))).unwrap();
        let locations = reopened.list_locations().await;
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].name, "Lab 3");
    }
}
