//! Recall storage crate - SQLite persistence for namespaces, entries, and
//! chunks, with listing cursors, search queries, and deletion sweeps.

pub(crate) mod cursor;
pub mod chunks;
pub mod db;
pub mod entries;
pub mod migrations;
pub mod namespaces;
pub mod search;
pub mod stats;
pub mod sweep;

pub use chunks::{ChunkStore, InsertResult, ReplaceResult, ReplaceStatus};
pub use db::Database;
pub use entries::{AddAsyncResult, AddResult, EntryManager};
pub use namespaces::{NamespaceManager, Promotion, ResolvedNamespace};
pub use search::{sanitize_fts5_query, ChunkSearch, KeywordHit, VectorCandidate};
pub use stats::{storage_stats, StorageStats};
pub use sweep::{DeletionSweeper, SweepResult};
