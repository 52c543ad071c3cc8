//! Chunk storage.
//!
//! Chunks of an entry carry orders `0..n` with no gaps. They are appended
//! with a caller-supplied start order that must equal the current count, and
//! truncated from the top in bounded pages before a re-chunk.

use std::sync::Arc;

use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use recall_core::error::{RecallError, Result};
use recall_core::lifecycle::ensure_writable;
use recall_core::pagination::{PaginationOpts, PaginationResult};
use recall_core::types::{Chunk, ChunkContent, ChunkInput, Entry, Namespace, Status};

use crate::cursor::{self, PageRow, Position};
use crate::db::{sql_err, Database};
use crate::entries::load_entry;
use crate::namespaces::{load_writable_namespace, parse_uuid};

const CHUNK_COLUMNS: &str = "entry_id, ord, text, metadata, embedding, searchable_text";

/// Outcome of [`ChunkStore::insert`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct InsertResult {
    /// Order the next batch must start at.
    pub next_order: u32,
    /// Status of the entry after the write; always `Pending`.
    pub status: Status,
}

/// Progress of a truncation started with [`ChunkStore::replace_chunks_page`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplaceStatus {
    /// Chunks at or above the start order remain; call again.
    Pending,
    /// Truncation finished; new chunks may be inserted at `next_start_order`.
    Ready,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplaceResult {
    pub next_start_order: u32,
    pub status: ReplaceStatus,
}

/// Repository for chunks.
pub struct ChunkStore {
    db: Arc<Database>,
    replace_batch_size: usize,
}

impl ChunkStore {
    pub fn new(db: Arc<Database>, replace_batch_size: usize) -> Self {
        Self {
            db,
            replace_batch_size: replace_batch_size.max(1),
        }
    }

    /// Append chunks to a pending entry starting at `start_order`.
    ///
    /// Fails with `OutOfOrder` unless `start_order` equals the number of
    /// chunks already stored, so a retried batch is rejected instead of
    /// duplicated.
    pub fn insert(&self, entry_id: Uuid, chunks: Vec<ChunkInput>, start_order: u32) -> Result<InsertResult> {
        let (next_order, status) = self.db.with_tx(|tx| {
            let (entry, ns) = load_writable_entry(tx, entry_id)?;
            check_chunks(&ns, &chunks)?;

            let current = count_chunks(tx, entry_id)?;
            if start_order != current {
                return Err(RecallError::OutOfOrder {
                    entry_id,
                    expected: current,
                    actual: start_order,
                });
            }
            let next = insert_chunk_rows(tx, entry_id, start_order, &chunks)?;
            Ok((next, entry.status))
        })?;

        debug!(entry_id = %entry_id, start_order, next_order, "Chunks inserted");
        Ok(InsertResult { next_order, status })
    }

    /// List an entry's chunks in order.
    pub fn list(&self, entry_id: Uuid, opts: &PaginationOpts) -> Result<PaginationResult<Chunk>> {
        opts.validate()?;
        let scope = format!("chunks:{}", entry_id);
        let start = cursor::decode(opts.cursor.as_deref(), &scope)?;
        let after = start.as_ref().map_or(-1, |pos| pos.t);

        let rows = self.db.with_conn(|conn| {
            load_entry(conn, entry_id)?.ok_or(RecallError::EntryNotFound(entry_id))?;

            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM chunks WHERE entry_id = ?1 AND ord > ?2 ORDER BY ord LIMIT ?3",
                    CHUNK_COLUMNS
                ))
                .map_err(sql_err("Failed to prepare chunk listing"))?;
            let raw = stmt
                .query_map(
                    params![entry_id.to_string(), after, (opts.num_items + 1) as i64],
                    RawChunk::from_row,
                )
                .map_err(sql_err("Failed to list chunks"))?;

            let mut rows = Vec::new();
            for r in raw {
                let r = r.map_err(sql_err("Failed to read chunk row"))?;
                let bytes = r.approx_bytes();
                let position = Position::new(r.ord, String::new());
                rows.push(PageRow {
                    item: r.into_chunk()?,
                    position,
                    bytes,
                });
            }
            Ok(rows)
        })?;

        Ok(cursor::assemble(rows, opts, &scope, start.as_ref()))
    }

    /// Remove one bounded page of chunks at or above `start_order`,
    /// highest orders first.
    ///
    /// Call repeatedly until the status is `Ready`; the chunk sequence stays
    /// contiguous after every call.
    pub fn replace_chunks_page(&self, entry_id: Uuid, start_order: u32) -> Result<ReplaceResult> {
        let batch = self.replace_batch_size as i64;
        let result = self.db.with_tx(|tx| {
            load_writable_entry(tx, entry_id)?;

            let current = count_chunks(tx, entry_id)?;
            if start_order > current {
                return Err(RecallError::OutOfOrder {
                    entry_id,
                    expected: current,
                    actual: start_order,
                });
            }

            tx.execute(
                "DELETE FROM chunks WHERE rowid IN (
                     SELECT rowid FROM chunks WHERE entry_id = ?1 AND ord >= ?2
                     ORDER BY ord DESC LIMIT ?3
                 )",
                params![entry_id.to_string(), start_order, batch],
            )
            .map_err(sql_err("Failed to truncate chunks"))?;

            let remaining = count_chunks(tx, entry_id)?;
            let status = if remaining > start_order {
                ReplaceStatus::Pending
            } else {
                ReplaceStatus::Ready
            };
            Ok(ReplaceResult {
                next_start_order: start_order,
                status,
            })
        })?;

        debug!(entry_id = %entry_id, start_order, status = ?result.status, "Chunk page replaced");
        Ok(result)
    }

    pub fn count(&self, entry_id: Uuid) -> Result<u32> {
        self.db.with_conn(|conn| count_chunks(conn, entry_id))
    }

    /// Chunks with orders in `start..=end`, in order.
    pub fn range(&self, entry_id: Uuid, start: u32, end: u32) -> Result<Vec<Chunk>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare_cached(&format!(
                    "SELECT {} FROM chunks WHERE entry_id = ?1 AND ord BETWEEN ?2 AND ?3 ORDER BY ord",
                    CHUNK_COLUMNS
                ))
                .map_err(sql_err("Failed to prepare chunk range"))?;
            let rows = stmt
                .query_map(params![entry_id.to_string(), start, end], RawChunk::from_row)
                .map_err(sql_err("Failed to query chunk range"))?;
            let mut chunks = Vec::new();
            for row in rows {
                chunks.push(row.map_err(sql_err("Failed to read chunk row"))?.into_chunk()?);
            }
            Ok(chunks)
        })
    }
}

// =============================================================================
// Row helpers shared with the entry repository
// =============================================================================

struct RawChunk {
    entry_id: String,
    ord: i64,
    text: String,
    metadata: Option<String>,
    embedding: Vec<u8>,
    searchable_text: Option<String>,
}

impl RawChunk {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            entry_id: row.get(0)?,
            ord: row.get(1)?,
            text: row.get(2)?,
            metadata: row.get(3)?,
            embedding: row.get(4)?,
            searchable_text: row.get(5)?,
        })
    }

    fn approx_bytes(&self) -> usize {
        self.text.len()
            + self.searchable_text.as_ref().map_or(0, String::len)
            + self.metadata.as_ref().map_or(0, String::len)
            + self.embedding.len()
    }

    fn into_chunk(self) -> Result<Chunk> {
        Ok(Chunk {
            entry_id: parse_uuid(&self.entry_id)?,
            order: self.ord as u32,
            content: ChunkContent {
                text: self.text,
                metadata: self.metadata.as_deref().map(serde_json::from_str).transpose()?,
            },
            embedding: decode_embedding(&self.embedding),
            searchable_text: self.searchable_text,
        })
    }
}

/// Embeddings are stored as little-endian f32 blobs.
pub(crate) fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub(crate) fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Every embedding must match the namespace dimension and be finite.
pub(crate) fn check_chunks(ns: &Namespace, chunks: &[ChunkInput]) -> Result<()> {
    for chunk in chunks {
        if chunk.embedding.len() != ns.dimension {
            return Err(RecallError::DimensionMismatch {
                expected: ns.dimension,
                actual: chunk.embedding.len(),
            });
        }
        if chunk.embedding.iter().any(|v| !v.is_finite()) {
            return Err(RecallError::Validation("embedding contains non-finite values".into()));
        }
    }
    Ok(())
}

/// Write `chunks` with orders starting at `start_order`. Returns the next
/// free order.
pub(crate) fn insert_chunk_rows(
    conn: &Connection,
    entry_id: Uuid,
    start_order: u32,
    chunks: &[ChunkInput],
) -> Result<u32> {
    let id = entry_id.to_string();
    let mut stmt = conn
        .prepare_cached(
            "INSERT INTO chunks (entry_id, ord, text, metadata, embedding, searchable_text)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .map_err(sql_err("Failed to prepare chunk insert"))?;

    let mut order = start_order;
    for chunk in chunks {
        let metadata = chunk.metadata.as_ref().map(serde_json::to_string).transpose()?;
        stmt.execute(params![
            id,
            order,
            chunk.text,
            metadata,
            encode_embedding(&chunk.embedding),
            chunk.searchable_text,
        ])
        .map_err(sql_err("Failed to insert chunk"))?;
        order += 1;
    }
    Ok(order)
}

fn count_chunks(conn: &Connection, entry_id: Uuid) -> Result<u32> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM chunks WHERE entry_id = ?1",
            params![entry_id.to_string()],
            |row| row.get(0),
        )
        .map_err(sql_err("Failed to count chunks"))?;
    Ok(count as u32)
}

/// A pending entry in a namespace that still accepts writes.
fn load_writable_entry(conn: &Connection, entry_id: Uuid) -> Result<(Entry, Namespace)> {
    let entry = load_entry(conn, entry_id)?.ok_or(RecallError::EntryNotFound(entry_id))?;
    ensure_writable(entry.status)?;
    let ns = load_writable_namespace(conn, entry.namespace_id)?;
    Ok((entry, ns))
}

#[cfg(test)]
mod tests {
    use super::*;
    use recall_core::pagination::PageStatus;
    use recall_core::types::{EntryInput, NamespaceConfig};

    use crate::entries::EntryManager;
    use crate::namespaces::NamespaceManager;

    struct Fixture {
        entries: EntryManager,
        chunks: ChunkStore,
        ns: Uuid,
    }

    fn setup(replace_batch_size: usize) -> Fixture {
        let db = Arc::new(Database::in_memory().unwrap());
        let ns = NamespaceManager::new(db.clone())
            .create_pending_version(&NamespaceConfig::new("docs", "m", 2))
            .unwrap()
            .namespace_id;
        Fixture {
            entries: EntryManager::new(db.clone()),
            chunks: ChunkStore::new(db, replace_batch_size),
            ns,
        }
    }

    fn batch(texts: &[&str]) -> Vec<ChunkInput> {
        texts.iter().map(|t| ChunkInput::new(*t, vec![0.5, 0.5])).collect()
    }

    fn orders(chunks: &[Chunk]) -> Vec<u32> {
        chunks.iter().map(|c| c.order).collect()
    }

    #[test]
    fn test_embedding_blob_round_trip() {
        let v = vec![0.25f32, -1.5, 3.0];
        assert_eq!(decode_embedding(&encode_embedding(&v)), v);
    }

    #[test]
    fn test_insert_in_batches() {
        let f = setup(10);
        let entry = f.entries.add(f.ns, EntryInput::keyed("doc"), None).unwrap().entry_id;

        let first = f.chunks.insert(entry, batch(&["a", "b"]), 0).unwrap();
        assert_eq!(first.next_order, 2);
        let second = f.chunks.insert(entry, batch(&["c"]), 2).unwrap();
        assert_eq!(second.next_order, 3);

        let all = f.chunks.range(entry, 0, 10).unwrap();
        assert_eq!(orders(&all), vec![0, 1, 2]);
        assert_eq!(all[2].content.text, "c");
        assert_eq!(all[0].embedding, vec![0.5, 0.5]);
    }

    #[test]
    fn test_insert_out_of_order() {
        let f = setup(10);
        let entry = f.entries.add(f.ns, EntryInput::keyed("doc"), None).unwrap().entry_id;
        f.chunks.insert(entry, batch(&["a"]), 0).unwrap();

        // Retrying the first batch and skipping ahead both fail.
        for start in [0, 5] {
            assert!(matches!(
                f.chunks.insert(entry, batch(&["b"]), start),
                Err(RecallError::OutOfOrder { expected: 1, .. })
            ));
        }
        assert_eq!(f.chunks.count(entry).unwrap(), 1);
    }

    #[test]
    fn test_insert_dimension_mismatch() {
        let f = setup(10);
        let entry = f.entries.add(f.ns, EntryInput::keyed("doc"), None).unwrap().entry_id;
        let bad = vec![ChunkInput::new("x", vec![1.0, 2.0, 3.0])];
        assert!(matches!(
            f.chunks.insert(entry, bad, 0),
            Err(RecallError::DimensionMismatch { expected: 2, actual: 3 })
        ));
        let nan = vec![ChunkInput::new("x", vec![f32::NAN, 0.0])];
        assert!(matches!(f.chunks.insert(entry, nan, 0), Err(RecallError::Validation(_))));
    }

    #[test]
    fn test_insert_into_ready_entry_fails() {
        let f = setup(10);
        let entry = f
            .entries
            .add(f.ns, EntryInput::keyed("doc"), Some(batch(&["a"])))
            .unwrap()
            .entry_id;
        assert!(matches!(
            f.chunks.insert(entry, batch(&["b"]), 1),
            Err(RecallError::InvalidTransition { .. })
        ));
        assert!(matches!(
            f.chunks.insert(Uuid::new_v4(), batch(&["b"]), 0),
            Err(RecallError::EntryNotFound(_))
        ));
    }

    #[test]
    fn test_replace_chunks_page_truncates_from_top() {
        let f = setup(2);
        let entry = f.entries.add(f.ns, EntryInput::keyed("doc"), None).unwrap().entry_id;
        f.chunks
            .insert(entry, batch(&["a", "b", "c", "d", "e"]), 0)
            .unwrap();

        let step = f.chunks.replace_chunks_page(entry, 1).unwrap();
        assert_eq!(step.status, ReplaceStatus::Pending);
        assert_eq!(orders(&f.chunks.range(entry, 0, 10).unwrap()), vec![0, 1, 2]);

        let step = f.chunks.replace_chunks_page(entry, 1).unwrap();
        assert_eq!(step.status, ReplaceStatus::Ready);
        assert_eq!(step.next_start_order, 1);
        assert_eq!(orders(&f.chunks.range(entry, 0, 10).unwrap()), vec![0]);

        // Re-chunk from the kept prefix.
        let next = f.chunks.insert(entry, batch(&["B", "C"]), 1).unwrap();
        assert_eq!(next.next_order, 3);
        let texts: Vec<String> = f
            .chunks
            .range(entry, 0, 10)
            .unwrap()
            .into_iter()
            .map(|c| c.content.text)
            .collect();
        assert_eq!(texts, vec!["a", "B", "C"]);
    }

    #[test]
    fn test_replace_chunks_page_past_end() {
        let f = setup(2);
        let entry = f.entries.add(f.ns, EntryInput::keyed("doc"), None).unwrap().entry_id;
        f.chunks.insert(entry, batch(&["a"]), 0).unwrap();
        assert!(matches!(
            f.chunks.replace_chunks_page(entry, 3),
            Err(RecallError::OutOfOrder { .. })
        ));
        let done = f.chunks.replace_chunks_page(entry, 1).unwrap();
        assert_eq!(done.status, ReplaceStatus::Ready);
    }

    #[test]
    fn test_list_pages_are_contiguous() {
        let f = setup(10);
        let entry = f.entries.add(f.ns, EntryInput::keyed("doc"), None).unwrap().entry_id;
        let texts: Vec<String> = (0..9).map(|i| format!("chunk {}", i)).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        f.chunks.insert(entry, batch(&refs), 0).unwrap();

        let mut seen = Vec::new();
        let mut opts = PaginationOpts::first(4);
        loop {
            let page = f.chunks.list(entry, &opts).unwrap();
            seen.extend(orders(&page.page));
            if page.is_done {
                break;
            }
            opts = opts.resume(page.continue_cursor);
        }
        assert_eq!(seen, (0..9).collect::<Vec<u32>>());
    }

    #[test]
    fn test_list_with_byte_budget_splits() {
        let f = setup(10);
        let entry = f.entries.add(f.ns, EntryInput::keyed("doc"), None).unwrap().entry_id;
        f.chunks
            .insert(entry, batch(&["aaaa", "bbbb", "cccc", "dddd"]), 0)
            .unwrap();

        // Each row is 4 text bytes plus 8 embedding bytes.
        let mut opts = PaginationOpts::first(10);
        opts.maximum_bytes_read = Some(20);
        let page = f.chunks.list(entry, &opts).unwrap();
        assert_eq!(orders(&page.page), vec![0, 1]);
        assert_eq!(page.page_status, Some(PageStatus::SplitRequired));
        assert!(!page.is_done);

        let rest = f.chunks.list(entry, &opts.resume(page.continue_cursor)).unwrap();
        assert_eq!(orders(&rest.page), vec![2, 3]);
        assert!(rest.is_done);
    }

    #[test]
    fn test_list_deleted_entry() {
        let f = setup(10);
        let entry = f
            .entries
            .add(f.ns, EntryInput::keyed("doc"), Some(batch(&["a"])))
            .unwrap()
            .entry_id;
        f.entries.delete_async(entry, 0).unwrap();
        assert!(matches!(
            f.chunks.list(entry, &PaginationOpts::first(10)),
            Err(RecallError::EntryNotFound(_))
        ));
    }
}
