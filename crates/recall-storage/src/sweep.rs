//! Background reclamation of deleted entries' chunks.
//!
//! `delete_async` removes the entry row at once and records the entry in
//! `deletion_queue`. The queued `start_order` is where reclamation begins:
//! each sweep deletes a bounded number of chunks from there upwards and
//! remembers how far it got. Once the tail is gone the sweep wraps around to
//! any chunks below the starting order, since nothing else owns them, and
//! drops the queue row only when the entry has no chunks left.

use rusqlite::params;
use tracing::{debug, info};
use uuid::Uuid;

use recall_core::config::StorageConfig;
use recall_core::error::Result;

use crate::db::{now_millis, sql_err, Database};
use crate::entries::delete_and_enqueue;
use crate::namespaces::parse_uuid;

/// Result of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepResult {
    /// Chunk rows removed.
    pub chunks_deleted: usize,
    /// Queued entries fully reclaimed.
    pub entries_completed: usize,
    /// Stale pending entries expired into the queue.
    pub pending_expired: usize,
}

/// Runs deletion sweeps.
pub struct DeletionSweeper;

impl DeletionSweeper {
    /// Run one sweep: expire stale pending entries (when a TTL is set), then
    /// delete up to `sweep_batch_size` queued chunks.
    pub fn run_sweep(db: &Database, config: &StorageConfig) -> Result<SweepResult> {
        let mut result = SweepResult::default();

        if config.pending_ttl_hours > 0 {
            let cutoff = now_millis() - i64::from(config.pending_ttl_hours) * 3_600_000;
            result.pending_expired = Self::expire_pending(db, cutoff)?;
        }

        let mut budget = config.sweep_batch_size.max(1);
        let queue: Vec<(String, i64)> = db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT entry_id, start_order FROM deletion_queue ORDER BY enqueued_at, entry_id")
                .map_err(sql_err("Deletion queue prepare"))?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(sql_err("Deletion queue query"))?;
            let mut queue = Vec::new();
            for row in rows {
                queue.push(row.map_err(sql_err("Deletion queue row"))?);
            }
            Ok(queue)
        })?;

        for (entry_id, start_order) in queue {
            if budget == 0 {
                break;
            }
            let (deleted, finished) = db.with_tx(|tx| {
                let deleted = tx
                    .execute(
                        "DELETE FROM chunks WHERE rowid IN (
                             SELECT rowid FROM chunks WHERE entry_id = ?1 AND ord >= ?2
                             ORDER BY ord LIMIT ?3
                         )",
                        params![entry_id, start_order, budget as i64],
                    )
                    .map_err(sql_err("Chunk sweep failed"))?;

                let above: Option<i64> = tx
                    .query_row(
                        "SELECT MIN(ord) FROM chunks WHERE entry_id = ?1 AND ord >= ?2",
                        params![entry_id, start_order],
                        |row| row.get(0),
                    )
                    .map_err(sql_err("Chunk sweep progress"))?;
                let next = match above {
                    Some(next) => Some(next),
                    None => tx
                        .query_row(
                            "SELECT MIN(ord) FROM chunks WHERE entry_id = ?1",
                            params![entry_id],
                            |row| row.get(0),
                        )
                        .map_err(sql_err("Chunk sweep progress"))?,
                };

                match next {
                    Some(next) => {
                        tx.execute(
                            "UPDATE deletion_queue SET start_order = ?1 WHERE entry_id = ?2",
                            params![next, entry_id],
                        )
                        .map_err(sql_err("Deletion queue update"))?;
                        Ok((deleted, false))
                    }
                    None => {
                        tx.execute("DELETE FROM deletion_queue WHERE entry_id = ?1", params![entry_id])
                            .map_err(sql_err("Deletion queue cleanup"))?;
                        Ok((deleted, true))
                    }
                }
            })?;

            debug!(entry_id = %entry_id, deleted, finished, "Swept queued chunks");
            budget = budget.saturating_sub(deleted);
            result.chunks_deleted += deleted;
            if finished {
                result.entries_completed += 1;
            }
        }

        if result != SweepResult::default() {
            info!(
                chunks_deleted = result.chunks_deleted,
                entries_completed = result.entries_completed,
                pending_expired = result.pending_expired,
                "Deletion sweep complete"
            );
        }
        Ok(result)
    }

    /// Entries still waiting for their chunks to be reclaimed.
    pub fn queued_entries(db: &Database) -> Result<u64> {
        db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM deletion_queue", [], |row| row.get(0))
                .map_err(sql_err("Deletion queue count"))?;
            Ok(count as u64)
        })
    }

    /// Delete pending entries not touched since `cutoff` (Unix millis).
    fn expire_pending(db: &Database, cutoff: i64) -> Result<usize> {
        db.with_tx(|tx| {
            let stale: Vec<Uuid> = {
                let mut stmt = tx
                    .prepare("SELECT id FROM entries WHERE status = 'pending' AND updated_at < ?1")
                    .map_err(sql_err("Stale pending query prepare"))?;
                let rows = stmt
                    .query_map(params![cutoff], |row| row.get::<_, String>(0))
                    .map_err(sql_err("Stale pending query"))?;
                let mut ids = Vec::new();
                for row in rows {
                    ids.push(parse_uuid(&row.map_err(sql_err("Stale pending row"))?)?);
                }
                ids
            };
            for id in &stale {
                delete_and_enqueue(tx, *id, 0)?;
            }
            Ok(stale.len())
        })
    }
}
