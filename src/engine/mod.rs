mod conflict;
mod error;
mod mutations;
mod queries;
mod store;
mod validate;

pub use conflict::{is_port_occupied, is_rack_range_occupied, would_shrink_conflict, Occupancy};
pub(crate) use conflict::now_ms;
pub use error::{EngineError, ErrorClass};
pub use store::{Inventory, Occupant, UNKNOWN_PC};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, RwLock};

use crate::audit::AuditLog;
use crate::model::Event;
use crate::observability;
use crate::wal::Wal;

/// Most appends folded into one fsync.
const WAL_BATCH_LIMIT: usize = 256;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        snapshot: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Every wakeup drains whatever is queued; consecutive appends
/// share one fsync, control commands run in arrival order between batches.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    let mut queued = Vec::with_capacity(WAL_BATCH_LIMIT);
    let mut batch: Vec<PendingAppend> = Vec::new();
    while rx.recv_many(&mut queued, WAL_BATCH_LIMIT).await > 0 {
        for cmd in queued.drain(..) {
            match cmd {
                WalCommand::Append { event, response } => batch.push((event, response)),
                WalCommand::Compact { snapshot, response } => {
                    commit_batch(&mut wal, &mut batch);
                    let _ = response.send(wal.compact(&snapshot));
                }
                WalCommand::AppendsSinceCompact { response } => {
                    commit_batch(&mut wal, &mut batch);
                    let _ = response.send(wal.appends_since_compact());
                }
            }
        }
        commit_batch(&mut wal, &mut batch);
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    if batch.is_empty() {
        return;
    }
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let appended = batch.iter().try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so no half-written batch lingers in the buffer.
    let flushed = wal.flush_sync();
    let result = appended.and(flushed);

    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed: {e}");
    }
    for (_, response) in batch.drain(..) {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = response.send(reply);
    }
}

/// The allocation engine: the committed inventory behind one lock, a durable
/// log, and the audit recorder.
///
/// Mutations validate and commit under the write lock, so an occupancy check and
/// the write it guards can never interleave with another mutation.
pub struct Engine {
    inventory: RwLock<Inventory>,
    wal_tx: mpsc::Sender<WalCommand>,
    pub audit: Arc<AuditLog>,
}

impl Engine {
    /// Replay the log at `wal_path` and start the writer task. Needs a Tokio runtime.
    pub fn new(wal_path: PathBuf, audit: Arc<AuditLog>) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let mut inventory = Inventory::default();
        for event in &events {
            inventory.apply(event);
        }
        tracing::info!(
            path = %wal_path.display(),
            events = events.len(),
            "inventory replayed"
        );

        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            inventory: RwLock::new(inventory),
            wal_tx,
            audit,
        })
    }

    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append, apply, audit. The caller holds the write lock across its checks and this call.
    pub(super) async fn commit(
        &self,
        inv: &mut Inventory,
        event: Event,
        before: Option<Value>,
    ) -> Result<(), EngineError> {
        self.wal_append(&event).await?;
        inv.apply(&event);
        self.audit.record(&event, before);
        Ok(())
    }

    /// Rewrite the log as a snapshot of current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Read lock: no mutation can append between the snapshot and the swap.
        let inv = self.inventory.read().await;
        let snapshot = inv.snapshot();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { snapshot, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> Result<u64, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))
    }
}
