//! Background ledger writer.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::db::LedgerDatabase;
use crate::ledger::LedgerEntry;
use crate::session::{SessionInfo, StopReason};

pub(crate) enum PersistOp {
    SessionStarted(Box<SessionInfo>),
    Entry(Box<LedgerEntry>),
    SessionStopped {
        session_id: String,
        stopped_at_ms: i64,
        reason: StopReason,
    },
    /// Reply once every earlier operation has been written.
    Flush(oneshot::Sender<()>),
}

pub(crate) type PersistSender = mpsc::UnboundedSender<PersistOp>;

/// Spawn the writer task. It runs until every sender is dropped.
pub(crate) fn spawn_writer(db: LedgerDatabase) -> PersistSender {
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(op) = rx.recv().await {
            let result = match op {
                PersistOp::SessionStarted(info) => db.insert_session(&info).await,
                PersistOp::Entry(entry) => db.append_entry(&entry).await,
                PersistOp::SessionStopped {
                    session_id,
                    stopped_at_ms,
                    reason,
                } => {
                    db.mark_session_stopped(&session_id, stopped_at_ms, &reason)
                        .await
                }
                PersistOp::Flush(done) => {
                    let _ = done.send(());
                    Ok(())
                }
            };
            if let Err(e) = result {
                warn!(error = %e, "Failed to persist ledger operation");
            }
        }
        debug!("Ledger writer stopped");
    });
    tx
}
