//! Row counts reported by the health endpoint.

use serde::{Deserialize, Serialize};

use recall_core::error::Result;

use crate::db::{sql_err, Database};

/// Storage statistics from the database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    pub ready_namespaces: u64,
    pub ready_entries: u64,
    pub pending_entries: u64,
    pub chunks: u64,
    pub queued_deletions: u64,
    pub db_size_bytes: u64,
}

pub fn storage_stats(db: &Database) -> Result<StorageStats> {
    db.with_conn(|conn| {
        let count = |sql: &str| -> Result<u64> {
            let n: i64 = conn
                .query_row(sql, [], |row| row.get(0))
                .map_err(sql_err("Stats query failed"))?;
            Ok(n as u64)
        };

        // page_count * page_size gives approximate DB size.
        let page_count = count("PRAGMA page_count")?;
        let page_size = count("PRAGMA page_size")?;

        Ok(StorageStats {
            ready_namespaces: count("SELECT COUNT(*) FROM namespaces WHERE status = 'ready'")?,
            ready_entries: count("SELECT COUNT(*) FROM entries WHERE status = 'ready'")?,
            pending_entries: count("SELECT COUNT(*) FROM entries WHERE status = 'pending'")?,
            chunks: count("SELECT COUNT(*) FROM chunks")?,
            queued_deletions: count("SELECT COUNT(*) FROM deletion_queue")?,
            db_size_bytes: page_count * page_size,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use recall_core::types::{ChunkInput, EntryInput, NamespaceConfig};

    use crate::entries::EntryManager;
    use crate::namespaces::NamespaceManager;

    #[test]
    fn test_stats_count_rows() {
        let db = Arc::new(Database::in_memory().unwrap());
        assert_eq!(storage_stats(&db).unwrap().chunks, 0);

        let namespaces = NamespaceManager::new(db.clone());
        let ns = namespaces
            .create_pending_version(&NamespaceConfig::new("docs", "m", 1))
            .unwrap()
            .namespace_id;
        namespaces.promote_to_ready(ns).unwrap();
        let entries = EntryManager::new(db.clone());
        let chunks = vec![ChunkInput::new("a", vec![1.0]), ChunkInput::new("b", vec![1.0])];
        entries.add(ns, EntryInput::keyed("a"), Some(chunks)).unwrap();
        entries.add(ns, EntryInput::keyed("b"), None).unwrap();

        let stats = storage_stats(&db).unwrap();
        assert_eq!(stats.ready_namespaces, 1);
        assert_eq!(stats.ready_entries, 1);
        assert_eq!(stats.pending_entries, 1);
        assert_eq!(stats.chunks, 2);
        assert_eq!(stats.queued_deletions, 0);
        assert!(stats.db_size_bytes > 0);
    }
}
