//! Entry repository.
//!
//! An entry is one logical document inside a namespace. Entries that share a
//! key are versions of the same document: at most one is `Ready` and at most
//! one is `Pending` at any time, and promotion swaps them atomically.

use std::collections::HashMap;
use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use recall_core::error::{RecallError, Result};
use recall_core::lifecycle::validate_transition;
use recall_core::pagination::{PaginationOpts, PaginationResult};
use recall_core::types::{ChunkInput, Entry, EntryInput, Namespace, NamespaceConfig, SortOrder, Status};

use crate::chunks::{check_chunks, insert_chunk_rows};
use crate::cursor::{self, PageRow, Position};
use crate::db::{from_millis, now_millis, sql_err, Database};
use crate::namespaces::{load_writable_namespace, parse_uuid, NamespaceManager, Promotion};

const ENTRY_COLUMNS: &str = "id, namespace_id, key, title, content_hash, filter_values, \
     importance, metadata, status, chunker, created_at, updated_at";

/// Outcome of [`EntryManager::add`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AddResult {
    pub entry_id: Uuid,
    /// `false` when an entry with the same key and content hash already
    /// existed and nothing was written.
    pub created: bool,
    pub status: Status,
    pub replaced_version: Option<Entry>,
}

/// Outcome of [`EntryManager::add_async`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AddAsyncResult {
    pub entry_id: Uuid,
    pub created: bool,
    pub status: Status,
}

/// Repository for entries.
pub struct EntryManager {
    db: Arc<Database>,
    namespaces: NamespaceManager,
}

impl EntryManager {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            namespaces: NamespaceManager::new(db.clone()),
            db,
        }
    }

    /// Create an entry, optionally writing all of its chunks at once.
    ///
    /// With `all_chunks`, the chunks are inserted and the entry promoted in
    /// the same transaction, so the new version becomes searchable at the
    /// instant the old one is replaced. Without them, the entry stays pending
    /// for chunks to be streamed in.
    pub fn add(
        &self,
        namespace_id: Uuid,
        input: EntryInput,
        all_chunks: Option<Vec<ChunkInput>>,
    ) -> Result<AddResult> {
        input.validate()?;

        let result = self.db.with_tx(|tx| {
            let ns = load_writable_namespace(tx, namespace_id)?;
            ns.check_filter_names(input.filter_values.iter().map(|f| f.name.as_str()))?;
            if let Some(chunks) = &all_chunks {
                check_chunks(&ns, chunks)?;
            }

            if let Some(key) = &input.key {
                if let Some(existing) = find_by_key(tx, namespace_id, key, Status::Ready)? {
                    if input.content_hash.is_some() && existing.content_hash == input.content_hash {
                        return Ok(AddResult {
                            entry_id: existing.entry_id,
                            created: false,
                            status: Status::Ready,
                            replaced_version: None,
                        });
                    }
                }
                if find_by_key(tx, namespace_id, key, Status::Pending)?.is_some() {
                    return Err(RecallError::DuplicateKey {
                        key: key.clone(),
                        namespace_id,
                    });
                }
            }

            let mut entry = insert_entry(tx, &ns, &input, None)?;
            match all_chunks {
                Some(chunks) => {
                    insert_chunk_rows(tx, entry.entry_id, 0, &chunks)?;
                    let replaced = promote_within(tx, &mut entry)?;
                    Ok(AddResult {
                        entry_id: entry.entry_id,
                        created: true,
                        status: Status::Ready,
                        replaced_version: replaced,
                    })
                }
                None => Ok(AddResult {
                    entry_id: entry.entry_id,
                    created: true,
                    status: Status::Pending,
                    replaced_version: None,
                }),
            }
        })?;

        debug!(
            entry_id = %result.entry_id,
            created = result.created,
            status = %result.status,
            "Entry added"
        );
        Ok(result)
    }

    /// Create a pending entry whose chunks will be produced by `chunker`.
    ///
    /// Retrying with the same key and content hash returns the existing
    /// entry instead of failing.
    pub fn add_async(&self, namespace_id: Uuid, input: EntryInput, chunker: &str) -> Result<AddAsyncResult> {
        input.validate()?;

        self.db.with_tx(|tx| {
            let ns = load_writable_namespace(tx, namespace_id)?;
            ns.check_filter_names(input.filter_values.iter().map(|f| f.name.as_str()))?;

            if let Some(key) = &input.key {
                let same_content =
                    |e: &Entry| input.content_hash.is_some() && e.content_hash == input.content_hash;

                if let Some(pending) = find_by_key(tx, namespace_id, key, Status::Pending)? {
                    if same_content(&pending) {
                        return Ok(AddAsyncResult {
                            entry_id: pending.entry_id,
                            created: false,
                            status: Status::Pending,
                        });
                    }
                    return Err(RecallError::DuplicateKey {
                        key: key.clone(),
                        namespace_id,
                    });
                }
                if let Some(ready) = find_by_key(tx, namespace_id, key, Status::Ready)? {
                    if same_content(&ready) {
                        return Ok(AddAsyncResult {
                            entry_id: ready.entry_id,
                            created: false,
                            status: Status::Ready,
                        });
                    }
                }
            }

            let entry = insert_entry(tx, &ns, &input, Some(chunker))?;
            Ok(AddAsyncResult {
                entry_id: entry.entry_id,
                created: true,
                status: Status::Pending,
            })
        })
    }

    /// Find the entry for `key` whose content hash matches, across the ready
    /// and pending versions of `config`.
    ///
    /// Versions are searched newest first; within a version the ready entry
    /// wins over a pending one.
    pub fn find_by_content_hash(
        &self,
        config: &NamespaceConfig,
        key: &str,
        content_hash: &str,
    ) -> Result<Option<Entry>> {
        for ns in self.namespaces.live_versions(config)? {
            if let Some(entry) = self.find_by_key_and_hash(ns.namespace_id, key, content_hash)? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Ready or pending entry in `namespace_id` with this key and hash.
    pub fn find_by_key_and_hash(
        &self,
        namespace_id: Uuid,
        key: &str,
        content_hash: &str,
    ) -> Result<Option<Entry>> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM entries
                     WHERE namespace_id = ?1 AND key = ?2 AND content_hash = ?3
                       AND status IN ('ready', 'pending')
                     ORDER BY CASE status WHEN 'ready' THEN 0 ELSE 1 END
                     LIMIT 1",
                    ENTRY_COLUMNS
                ),
                params![namespace_id.to_string(), key, content_hash],
                RawEntry::from_row,
            )
            .optional()
            .map_err(sql_err("Failed to find entry by content hash"))?
            .map(RawEntry::into_entry)
            .transpose()
        })
    }

    /// Atomically make `entry_id` the ready version of its key.
    ///
    /// Promoting an already-ready entry is a no-op.
    pub fn promote_to_ready(&self, entry_id: Uuid) -> Result<Promotion<Entry>> {
        let promotion = self.db.with_tx(|tx| {
            let mut entry = load_entry(tx, entry_id)?.ok_or(RecallError::EntryNotFound(entry_id))?;
            if entry.status == Status::Ready {
                return Ok(Promotion { replaced_version: None });
            }
            load_writable_namespace(tx, entry.namespace_id)?;
            let replaced = promote_within(tx, &mut entry)?;
            Ok(Promotion {
                replaced_version: replaced,
            })
        })?;

        debug!(
            entry_id = %entry_id,
            replaced = ?promotion.replaced_version.as_ref().map(|e| e.entry_id),
            "Entry promoted to ready"
        );
        Ok(promotion)
    }

    /// Remove an entry from every read path now and queue its chunks,
    /// from `start_order` onwards, for background deletion.
    ///
    /// Deleting an already deleted entry only re-queues its chunks.
    pub fn delete_async(&self, entry_id: Uuid, start_order: u32) -> Result<()> {
        let removed = self.db.with_tx(|tx| delete_and_enqueue(tx, entry_id, start_order))?;
        info!(entry_id = %entry_id, removed, start_order, "Entry queued for deletion");
        Ok(())
    }

    pub fn get(&self, entry_id: Uuid) -> Result<Option<Entry>> {
        self.db.with_conn(|conn| load_entry(conn, entry_id))
    }

    /// Load several entries, keeping the order of `entry_ids` and skipping
    /// ids that no longer exist.
    pub fn get_many(&self, entry_ids: &[Uuid]) -> Result<Vec<Entry>> {
        if entry_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut found: HashMap<Uuid, Entry> = self.db.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=entry_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT {} FROM entries WHERE id IN ({})",
                ENTRY_COLUMNS,
                placeholders.join(", ")
            );
            let ids: Vec<String> = entry_ids.iter().map(Uuid::to_string).collect();
            let mut stmt = conn.prepare(&sql).map_err(sql_err("Failed to prepare entry query"))?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(ids.iter()), RawEntry::from_row)
                .map_err(sql_err("Failed to query entries"))?;
            let mut found = HashMap::new();
            for row in rows {
                let entry = row.map_err(sql_err("Failed to read entry row"))?.into_entry()?;
                found.insert(entry.entry_id, entry);
            }
            Ok(found)
        })?;

        Ok(entry_ids.iter().filter_map(|id| found.remove(id)).collect())
    }

    /// List entries of a namespace with `status`, ordered by creation time.
    pub fn list(
        &self,
        namespace_id: Uuid,
        status: Status,
        order: SortOrder,
        opts: &PaginationOpts,
    ) -> Result<PaginationResult<Entry>> {
        opts.validate()?;
        let scope = format!("entries:{}:{}:{:?}", namespace_id, status, order);
        let start = cursor::decode(opts.cursor.as_deref(), &scope)?;

        let (seek, direction, default_t) = match order {
            SortOrder::Asc => (
                "(created_at > ?3 OR (created_at = ?3 AND id > ?4))",
                "ASC",
                i64::MIN,
            ),
            SortOrder::Desc => (
                "(created_at < ?3 OR (created_at = ?3 AND id < ?4))",
                "DESC",
                i64::MAX,
            ),
        };
        let (after_t, after_id) = match &start {
            Some(pos) => (pos.t, pos.id.clone()),
            // "~" sorts after any uuid string, "" before.
            None if order == SortOrder::Desc => (default_t, "~".to_string()),
            None => (default_t, String::new()),
        };

        let rows = self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {cols} FROM entries
                 WHERE namespace_id = ?1 AND status = ?2 AND {seek}
                 ORDER BY created_at {dir}, id {dir}
                 LIMIT ?5",
                cols = ENTRY_COLUMNS,
                seek = seek,
                dir = direction
            );
            let mut stmt = conn.prepare(&sql).map_err(sql_err("Failed to prepare entry listing"))?;
            let raw = stmt
                .query_map(
                    params![
                        namespace_id.to_string(),
                        status.as_str(),
                        after_t,
                        after_id,
                        (opts.num_items + 1) as i64
                    ],
                    RawEntry::from_row,
                )
                .map_err(sql_err("Failed to list entries"))?;

            let mut rows = Vec::new();
            for r in raw {
                let r = r.map_err(sql_err("Failed to read entry row"))?;
                let bytes = r.approx_bytes();
                let position = Position::new(r.created_at, r.id.clone());
                rows.push(PageRow {
                    item: r.into_entry()?,
                    position,
                    bytes,
                });
            }
            Ok(rows)
        })?;

        Ok(cursor::assemble(rows, opts, &scope, start.as_ref()))
    }
}

// =============================================================================
// Row helpers
// =============================================================================

struct RawEntry {
    id: String,
    namespace_id: String,
    key: Option<String>,
    title: Option<String>,
    content_hash: Option<String>,
    filter_values: String,
    importance: f64,
    metadata: Option<String>,
    status: String,
    chunker: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl RawEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            namespace_id: row.get(1)?,
            key: row.get(2)?,
            title: row.get(3)?,
            content_hash: row.get(4)?,
            filter_values: row.get(5)?,
            importance: row.get(6)?,
            metadata: row.get(7)?,
            status: row.get(8)?,
            chunker: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn approx_bytes(&self) -> usize {
        let opt = |s: &Option<String>| s.as_ref().map_or(0, String::len);
        self.id.len()
            + self.namespace_id.len()
            + opt(&self.key)
            + opt(&self.title)
            + opt(&self.content_hash)
            + self.filter_values.len()
            + opt(&self.metadata)
            + opt(&self.chunker)
            + 32
    }

    fn into_entry(self) -> Result<Entry> {
        Ok(Entry {
            entry_id: parse_uuid(&self.id)?,
            namespace_id: parse_uuid(&self.namespace_id)?,
            key: self.key,
            title: self.title,
            content_hash: self.content_hash,
            filter_values: serde_json::from_str(&self.filter_values)?,
            importance: self.importance,
            metadata: self.metadata.as_deref().map(serde_json::from_str).transpose()?,
            status: self.status.parse()?,
            chunker: self.chunker,
            created_at: from_millis(self.created_at),
            updated_at: from_millis(self.updated_at),
        })
    }
}

pub(crate) fn load_entry(conn: &Connection, entry_id: Uuid) -> Result<Option<Entry>> {
    conn.query_row(
        &format!("SELECT {} FROM entries WHERE id = ?1", ENTRY_COLUMNS),
        params![entry_id.to_string()],
        RawEntry::from_row,
    )
    .optional()
    .map_err(sql_err("Failed to load entry"))?
    .map(RawEntry::into_entry)
    .transpose()
}

fn find_by_key(conn: &Connection, namespace_id: Uuid, key: &str, status: Status) -> Result<Option<Entry>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM entries WHERE namespace_id = ?1 AND key = ?2 AND status = ?3",
            ENTRY_COLUMNS
        ),
        params![namespace_id.to_string(), key, status.as_str()],
        RawEntry::from_row,
    )
    .optional()
    .map_err(sql_err("Failed to find entry by key"))?
    .map(RawEntry::into_entry)
    .transpose()
}

fn insert_entry(conn: &Connection, ns: &Namespace, input: &EntryInput, chunker: Option<&str>) -> Result<Entry> {
    let now = now_millis();
    let entry = Entry {
        entry_id: Uuid::new_v4(),
        namespace_id: ns.namespace_id,
        key: input.key.clone(),
        title: input.title.clone(),
        content_hash: input.content_hash.clone(),
        filter_values: input.filter_values.clone(),
        importance: input.importance,
        metadata: input.metadata.clone(),
        status: Status::Pending,
        chunker: chunker.map(str::to_string),
        created_at: from_millis(now),
        updated_at: from_millis(now),
    };
    let id = entry.entry_id.to_string();
    let metadata = entry.metadata.as_ref().map(serde_json::to_string).transpose()?;

    conn.execute(
        "INSERT INTO entries
            (id, namespace_id, key, title, content_hash, filter_values, importance,
             metadata, status, chunker, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
        params![
            id,
            ns.namespace_id.to_string(),
            entry.key,
            entry.title,
            entry.content_hash,
            serde_json::to_string(&entry.filter_values)?,
            entry.importance,
            metadata,
            entry.status.as_str(),
            entry.chunker,
            now,
        ],
    )
    .map_err(sql_err("Failed to insert entry"))?;

    let mut stmt = conn
        .prepare_cached("INSERT INTO entry_filters (entry_id, name, value) VALUES (?1, ?2, ?3)")
        .map_err(sql_err("Failed to prepare filter insert"))?;
    for filter in &entry.filter_values {
        stmt.execute(params![id, filter.name, filter.canonical_value()])
            .map_err(sql_err("Failed to insert entry filter"))?;
    }

    Ok(entry)
}

/// Demote the ready entry sharing `entry`'s key, then promote `entry`.
/// Must run inside a transaction.
fn promote_within(conn: &Connection, entry: &mut Entry) -> Result<Option<Entry>> {
    validate_transition(entry.status, Status::Ready)?;
    let now = now_millis();

    let previous = match &entry.key {
        Some(key) => find_by_key(conn, entry.namespace_id, key, Status::Ready)?,
        None => None,
    };
    let previous = match previous {
        Some(mut prev) => {
            validate_transition(prev.status, Status::Replaced)?;
            set_status(conn, prev.entry_id, Status::Replaced, now)?;
            prev.status = Status::Replaced;
            prev.updated_at = from_millis(now);
            Some(prev)
        }
        None => None,
    };

    set_status(conn, entry.entry_id, Status::Ready, now)?;
    entry.status = Status::Ready;
    entry.updated_at = from_millis(now);
    Ok(previous)
}

fn set_status(conn: &Connection, entry_id: Uuid, status: Status, now: i64) -> Result<()> {
    conn.execute(
        "UPDATE entries SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_str(), now, entry_id.to_string()],
    )
    .map_err(sql_err("Failed to update entry status"))?;
    Ok(())
}

/// Delete the entry row (its filters cascade) and queue its chunks.
/// Returns whether an entry row existed.
pub(crate) fn delete_and_enqueue(conn: &Connection, entry_id: Uuid, start_order: u32) -> Result<bool> {
    let id = entry_id.to_string();
    let removed = conn
        .execute("DELETE FROM entries WHERE id = ?1", params![id])
        .map_err(sql_err("Failed to delete entry"))?;
    conn.execute(
        "INSERT INTO deletion_queue (entry_id, start_order, enqueued_at) VALUES (?1, ?2, ?3)
         ON CONFLICT (entry_id) DO UPDATE SET start_order = MIN(start_order, excluded.start_order)",
        params![id, start_order, now_millis()],
    )
    .map_err(sql_err("Failed to enqueue deletion"))?;
    Ok(removed > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use recall_core::types::FilterValue;

    fn setup() -> (Arc<Database>, EntryManager, Uuid) {
        let db = Arc::new(Database::in_memory().unwrap());
        let namespaces = NamespaceManager::new(db.clone());
        let config = NamespaceConfig::new("docs", "m", 3).with_filter_names(["region"]);
        let ns = namespaces.create_pending_version(&config).unwrap();
        (db.clone(), EntryManager::new(db), ns.namespace_id)
    }

    fn docs_config() -> NamespaceConfig {
        NamespaceConfig::new("docs", "m", 3).with_filter_names(["region"])
    }

    fn chunk(text: &str) -> ChunkInput {
        ChunkInput::new(text, vec![1.0, 0.0, 0.0])
    }

    fn versioned(key: &str, hash: &str) -> EntryInput {
        EntryInput {
            content_hash: Some(hash.to_string()),
            ..EntryInput::keyed(key)
        }
    }

    fn ready_count(db: &Database, ns: Uuid, key: &str) -> i64 {
        db.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM entries WHERE namespace_id = ?1 AND key = ?2 AND status = 'ready'",
                params![ns.to_string(), key],
                |row| row.get(0),
            )
            .map_err(sql_err("count"))
        })
        .unwrap()
    }

    #[test]
    fn test_add_with_chunks_is_ready() {
        let (_db, mgr, ns) = setup();
        let result = mgr
            .add(ns, versioned("doc", "h1"), Some(vec![chunk("a"), chunk("b")]))
            .unwrap();
        assert!(result.created);
        assert_eq!(result.status, Status::Ready);
        assert!(result.replaced_version.is_none());

        let entry = mgr.get(result.entry_id).unwrap().unwrap();
        assert_eq!(entry.status, Status::Ready);
        assert_eq!(entry.content_hash.as_deref(), Some("h1"));
    }

    #[test]
    fn test_add_without_chunks_is_pending() {
        let (_db, mgr, ns) = setup();
        let result = mgr.add(ns, EntryInput::keyed("doc"), None).unwrap();
        assert_eq!(result.status, Status::Pending);
        assert_eq!(mgr.get(result.entry_id).unwrap().unwrap().status, Status::Pending);
    }

    #[test]
    fn test_add_same_hash_is_unchanged() {
        let (_db, mgr, ns) = setup();
        let first = mgr.add(ns, versioned("doc", "h1"), Some(vec![chunk("a")])).unwrap();
        let second = mgr.add(ns, versioned("doc", "h1"), Some(vec![chunk("a")])).unwrap();
        assert!(!second.created);
        assert_eq!(second.entry_id, first.entry_id);
        assert_eq!(second.status, Status::Ready);
    }

    #[test]
    fn test_add_new_hash_replaces_previous() {
        let (db, mgr, ns) = setup();
        let first = mgr.add(ns, versioned("doc", "h1"), Some(vec![chunk("a")])).unwrap();
        let second = mgr.add(ns, versioned("doc", "h2"), Some(vec![chunk("b")])).unwrap();
        assert!(second.created);
        let replaced = second.replaced_version.unwrap();
        assert_eq!(replaced.entry_id, first.entry_id);
        assert_eq!(replaced.status, Status::Replaced);
        assert_eq!(ready_count(&db, ns, "doc"), 1);
        assert_eq!(mgr.get(first.entry_id).unwrap().unwrap().status, Status::Replaced);
    }

    #[test]
    fn test_add_conflicts_with_pending_key() {
        let (_db, mgr, ns) = setup();
        mgr.add(ns, EntryInput::keyed("doc"), None).unwrap();
        assert!(matches!(
            mgr.add(ns, EntryInput::keyed("doc"), None),
            Err(RecallError::DuplicateKey { .. })
        ));
    }

    #[test]
    fn test_add_checks_dimension_before_writing() {
        let (db, mgr, ns) = setup();
        let bad = ChunkInput::new("x", vec![1.0, 2.0]);
        assert!(matches!(
            mgr.add(ns, EntryInput::keyed("doc"), Some(vec![bad])),
            Err(RecallError::DimensionMismatch { expected: 3, actual: 2 })
        ));
        let count: i64 = db
            .with_conn(|c| {
                c.query_row("SELECT COUNT(*) FROM entries", [], |r| r.get(0))
                    .map_err(sql_err("count"))
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_add_rejects_undeclared_filter() {
        let (_db, mgr, ns) = setup();
        let input = EntryInput {
            filter_values: vec![FilterValue::new("color", "red")],
            ..EntryInput::keyed("doc")
        };
        assert!(matches!(mgr.add(ns, input, None), Err(RecallError::Validation(_))));
    }

    #[test]
    fn test_add_to_unknown_namespace() {
        let (_db, mgr, _ns) = setup();
        assert!(matches!(
            mgr.add(Uuid::new_v4(), EntryInput::keyed("doc"), None),
            Err(RecallError::NamespaceNotFound(_))
        ));
    }

    #[test]
    fn test_replaced_namespace_rejects_writes() {
        let (db, mgr, ns) = setup();
        let namespaces = NamespaceManager::new(db);
        namespaces.promote_to_ready(ns).unwrap();
        let v2 = namespaces.create_pending_version(&docs_config()).unwrap();
        namespaces.promote_to_ready(v2.namespace_id).unwrap();

        assert!(matches!(
            mgr.add(ns, EntryInput::keyed("doc"), None),
            Err(RecallError::NamespaceNotWritable(id)) if id == ns
        ));
        assert!(matches!(
            mgr.add_async(ns, EntryInput::keyed("doc"), "fixed:10:0"),
            Err(RecallError::NamespaceNotWritable(_))
        ));
    }

    #[test]
    fn test_keyless_entries_never_conflict() {
        let (_db, mgr, ns) = setup();
        let a = mgr.add(ns, EntryInput::default(), Some(vec![chunk("a")])).unwrap();
        let b = mgr.add(ns, EntryInput::default(), Some(vec![chunk("a")])).unwrap();
        assert_ne!(a.entry_id, b.entry_id);
        assert!(b.replaced_version.is_none());
    }

    #[test]
    fn test_add_async_retry_is_idempotent() {
        let (_db, mgr, ns) = setup();
        let first = mgr.add_async(ns, versioned("doc", "h1"), "fixed:100:10").unwrap();
        assert!(first.created);
        let retry = mgr.add_async(ns, versioned("doc", "h1"), "fixed:100:10").unwrap();
        assert!(!retry.created);
        assert_eq!(retry.entry_id, first.entry_id);

        assert!(matches!(
            mgr.add_async(ns, versioned("doc", "h2"), "fixed:100:10"),
            Err(RecallError::DuplicateKey { .. })
        ));

        let entry = mgr.get(first.entry_id).unwrap().unwrap();
        assert_eq!(entry.chunker.as_deref(), Some("fixed:100:10"));
    }

    #[test]
    fn test_promote_entry() {
        let (db, mgr, ns) = setup();
        let v1 = mgr.add(ns, versioned("doc", "h1"), Some(vec![chunk("a")])).unwrap();
        let v2 = mgr.add(ns, versioned("doc", "h2"), None).unwrap();
        assert_eq!(ready_count(&db, ns, "doc"), 1);

        let promotion = mgr.promote_to_ready(v2.entry_id).unwrap();
        assert_eq!(promotion.replaced_version.unwrap().entry_id, v1.entry_id);
        assert_eq!(ready_count(&db, ns, "doc"), 1);

        let retry = mgr.promote_to_ready(v2.entry_id).unwrap();
        assert!(retry.replaced_version.is_none());

        assert!(matches!(
            mgr.promote_to_ready(v1.entry_id),
            Err(RecallError::InvalidTransition { .. })
        ));
        assert!(matches!(
            mgr.promote_to_ready(Uuid::new_v4()),
            Err(RecallError::EntryNotFound(_))
        ));
    }

    #[test]
    fn test_find_by_content_hash_prefers_newest_version() {
        let (db, mgr, ns) = setup();
        let namespaces = NamespaceManager::new(db);
        let old = mgr.add(ns, versioned("doc", "h1"), Some(vec![chunk("a")])).unwrap();
        namespaces.promote_to_ready(ns).unwrap();

        let found = mgr.find_by_content_hash(&docs_config(), "doc", "h1").unwrap().unwrap();
        assert_eq!(found.entry_id, old.entry_id);

        let v2 = namespaces.create_pending_version(&docs_config()).unwrap();
        let new = mgr
            .add(v2.namespace_id, versioned("doc", "h1"), Some(vec![chunk("a")]))
            .unwrap();
        let found = mgr.find_by_content_hash(&docs_config(), "doc", "h1").unwrap().unwrap();
        assert_eq!(found.entry_id, new.entry_id);

        assert!(mgr.find_by_content_hash(&docs_config(), "doc", "h9").unwrap().is_none());
        assert!(mgr.find_by_content_hash(&docs_config(), "other", "h1").unwrap().is_none());
    }

    #[test]
    fn test_find_by_content_hash_sees_pending() {
        let (_db, mgr, ns) = setup();
        let pending = mgr.add_async(ns, versioned("doc", "h1"), "fixed:10:0").unwrap();
        let found = mgr.find_by_content_hash(&docs_config(), "doc", "h1").unwrap().unwrap();
        assert_eq!(found.entry_id, pending.entry_id);
        assert_eq!(found.status, Status::Pending);
    }

    #[test]
    fn test_delete_async_hides_entry() {
        let (db, mgr, ns) = setup();
        let added = mgr.add(ns, versioned("doc", "h1"), Some(vec![chunk("a")])).unwrap();
        mgr.delete_async(added.entry_id, 0).unwrap();
        assert!(mgr.get(added.entry_id).unwrap().is_none());
        // Deleting twice is harmless.
        mgr.delete_async(added.entry_id, 0).unwrap();

        let queued: i64 = db
            .with_conn(|c| {
                c.query_row("SELECT COUNT(*) FROM deletion_queue", [], |r| r.get(0))
                    .map_err(sql_err("count"))
            })
            .unwrap();
        assert_eq!(queued, 1);
        // The key is free again.
        assert!(mgr.add(ns, versioned("doc", "h1"), None).unwrap().created);
    }

    #[test]
    fn test_get_many_keeps_order() {
        let (_db, mgr, ns) = setup();
        let a = mgr.add(ns, EntryInput::keyed("a"), None).unwrap().entry_id;
        let b = mgr.add(ns, EntryInput::keyed("b"), None).unwrap().entry_id;
        let found = mgr.get_many(&[b, Uuid::new_v4(), a]).unwrap();
        let ids: Vec<Uuid> = found.iter().map(|e| e.entry_id).collect();
        assert_eq!(ids, vec![b, a]);
    }

    #[test]
    fn test_list_pages_cover_every_entry_once() {
        let (_db, mgr, ns) = setup();
        let mut expected = Vec::new();
        for i in 0..7 {
            let added = mgr
                .add(ns, EntryInput::keyed(format!("doc-{}", i)), Some(vec![chunk("x")]))
                .unwrap();
            expected.push(added.entry_id);
        }
        mgr.add(ns, EntryInput::keyed("pending"), None).unwrap();

        for order in [SortOrder::Asc, SortOrder::Desc] {
            let mut seen = Vec::new();
            let mut opts = PaginationOpts::first(3);
            loop {
                let page = mgr.list(ns, Status::Ready, order, &opts).unwrap();
                seen.extend(page.page.iter().map(|e| e.entry_id));
                if page.is_done {
                    break;
                }
                opts = opts.resume(page.continue_cursor);
            }
            assert_eq!(seen.len(), expected.len());
            let mut sorted = seen.clone();
            sorted.sort();
            sorted.dedup();
            assert_eq!(sorted.len(), expected.len());
        }
    }

    #[test]
    fn test_list_desc_reverses_asc() {
        let (_db, mgr, ns) = setup();
        for i in 0..4 {
            mgr.add(ns, EntryInput::keyed(format!("doc-{}", i)), Some(vec![chunk("x")]))
                .unwrap();
        }
        let asc = mgr
            .list(ns, Status::Ready, SortOrder::Asc, &PaginationOpts::first(10))
            .unwrap();
        let desc = mgr
            .list(ns, Status::Ready, SortOrder::Desc, &PaginationOpts::first(10))
            .unwrap();
        let mut reversed: Vec<Uuid> = desc.page.iter().map(|e| e.entry_id).collect();
        reversed.reverse();
        let forward: Vec<Uuid> = asc.page.iter().map(|e| e.entry_id).collect();
        assert_eq!(forward, reversed);
    }

    #[test]
    fn test_concurrent_versions_keep_one_ready() {
        let (db, mgr, ns) = setup();
        let mgr = Arc::new(mgr);
        let mut handles = Vec::new();
        for t in 0..4 {
            let mgr = mgr.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..10 {
                    let input = versioned("shared", &format!("h-{}-{}", t, i));
                    // A concurrent pending version may already hold the key.
                    let _ = mgr.add(ns, input, Some(vec![chunk("x")]));
                }
            }));
        }
        let reader = {
            let db = db.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    assert!(ready_count(&db, ns, "shared") <= 1);
                }
            })
        };
        for h in handles {
            h.join().unwrap();
        }
        reader.join().unwrap();
        assert_eq!(ready_count(&db, ns, "shared"), 1);
    }
}
