//! Versioned namespaces.
//!
//! Every distinct [`NamespaceConfig`] owns a sequence of versions. At most one
//! version per config is `Ready`; promoting a pending version demotes the old
//! one inside the same transaction.

use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use recall_core::error::{RecallError, Result};
use recall_core::lifecycle::validate_transition;
use recall_core::pagination::{PaginationOpts, PaginationResult};
use recall_core::types::{Namespace, NamespaceConfig, Status};

use crate::cursor::{self, PageRow, Position};
use crate::db::{from_millis, now_millis, sql_err, Database};

const NAMESPACE_COLUMNS: &str =
    "id, namespace, model_id, dimension, filter_names, status, version, created_at";

/// Outcome of [`NamespaceManager::get_or_create`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolvedNamespace {
    pub namespace_id: Uuid,
    pub status: Status,
    pub created: bool,
}

/// Outcome of a promotion. `replaced_version` is the previously ready
/// version, now `Replaced`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Promotion<T> {
    pub replaced_version: Option<T>,
}

/// Repository for namespace versions.
pub struct NamespaceManager {
    db: Arc<Database>,
}

impl NamespaceManager {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Resolve `config` to a namespace id in the requested or a more advanced
    /// status, else to a pending version.
    ///
    /// Asking for `Pending` accepts the pending or the ready version. Asking
    /// for `Ready` accepts only the ready version. Without a match the result
    /// is pending: the version already under construction when there is one
    /// (`created == false`), otherwise a new one. Callers check the returned
    /// `status` and promote pending versions once their entries are written.
    pub fn get_or_create(&self, config: &NamespaceConfig, status: Status) -> Result<ResolvedNamespace> {
        config.validate()?;
        let accepted: &[Status] = match status {
            Status::Pending => &[Status::Pending, Status::Ready],
            Status::Ready => &[Status::Ready],
            Status::Replaced => {
                return Err(RecallError::Validation(
                    "get_or_create accepts only pending or ready".into(),
                ))
            }
        };
        let key = config.config_key();

        self.db.with_tx(|tx| {
            // Falling back to pending reuses the version under construction.
            for wanted in accepted.iter().chain(&[Status::Pending]) {
                if let Some(ns) = find_by_config(tx, &key, *wanted)? {
                    return Ok(ResolvedNamespace {
                        namespace_id: ns.namespace_id,
                        status: ns.status,
                        created: false,
                    });
                }
            }
            let ns = insert_pending(tx, config, &key)?;
            Ok(ResolvedNamespace {
                namespace_id: ns.namespace_id,
                status: ns.status,
                created: true,
            })
        })
    }

    /// Start a new pending version of `config` even when a ready one exists.
    /// An existing pending version is returned instead of starting a second.
    pub fn create_pending_version(&self, config: &NamespaceConfig) -> Result<Namespace> {
        config.validate()?;
        let key = config.config_key();
        self.db.with_tx(|tx| {
            if let Some(existing) = find_by_config(tx, &key, Status::Pending)? {
                return Ok(existing);
            }
            insert_pending(tx, config, &key)
        })
    }

    /// The ready version of `config`, if any.
    pub fn get(&self, config: &NamespaceConfig) -> Result<Option<Namespace>> {
        let key = config.config_key();
        self.db.with_conn(|conn| find_by_config(conn, &key, Status::Ready))
    }

    /// Id of the ready version of `config`, if any.
    pub fn lookup(&self, config: &NamespaceConfig) -> Result<Option<Uuid>> {
        Ok(self.get(config)?.map(|ns| ns.namespace_id))
    }

    pub fn get_by_id(&self, namespace_id: Uuid) -> Result<Option<Namespace>> {
        self.db.with_conn(|conn| load_namespace(conn, namespace_id))
    }

    /// All live versions of `config` (ready or pending), newest first.
    pub fn live_versions(&self, config: &NamespaceConfig) -> Result<Vec<Namespace>> {
        let key = config.config_key();
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM namespaces
                     WHERE config_key = ?1 AND status IN ('ready', 'pending')
                     ORDER BY version DESC",
                    NAMESPACE_COLUMNS
                ))
                .map_err(sql_err("Failed to prepare namespace query"))?;
            let rows = stmt
                .query_map(params![key], RawNamespace::from_row)
                .map_err(sql_err("Failed to query namespaces"))?;
            let mut versions = Vec::new();
            for row in rows {
                versions.push(row.map_err(sql_err("Failed to read namespace row"))?.into_namespace()?);
            }
            Ok(versions)
        })
    }

    /// Atomically make `namespace_id` the ready version of its config.
    ///
    /// Promoting an already-ready version is a no-op, so retries are safe.
    pub fn promote_to_ready(&self, namespace_id: Uuid) -> Result<Promotion<Namespace>> {
        let promotion = self.db.with_tx(|tx| {
            let ns = load_namespace(tx, namespace_id)?
                .ok_or_else(|| RecallError::NamespaceNotFound(namespace_id.to_string()))?;
            if ns.status == Status::Ready {
                debug!(namespace_id = %namespace_id, "Namespace already ready");
                return Ok(Promotion { replaced_version: None });
            }
            validate_transition(ns.status, Status::Ready)?;

            let key = ns.config().config_key();
            let previous = find_by_config(tx, &key, Status::Ready)?;
            if let Some(prev) = &previous {
                validate_transition(prev.status, Status::Replaced)?;
                set_status(tx, prev.namespace_id, Status::Replaced)?;
            }
            set_status(tx, namespace_id, Status::Ready)?;

            Ok(Promotion {
                replaced_version: previous.map(|mut prev| {
                    prev.status = Status::Replaced;
                    prev
                }),
            })
        })?;

        info!(
            namespace_id = %namespace_id,
            replaced = ?promotion.replaced_version.as_ref().map(|ns| ns.namespace_id),
            "Namespace promoted to ready"
        );
        Ok(promotion)
    }

    /// List namespaces with `status`, oldest first.
    pub fn list(&self, status: Status, opts: &PaginationOpts) -> Result<PaginationResult<Namespace>> {
        opts.validate()?;
        let scope = format!("namespaces:{}", status);
        let start = cursor::decode(opts.cursor.as_deref(), &scope)?;
        let (after_t, after_id) = match &start {
            Some(pos) => (pos.t, pos.id.clone()),
            None => (i64::MIN, String::new()),
        };

        let rows = self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM namespaces
                     WHERE status = ?1 AND (created_at > ?2 OR (created_at = ?2 AND id > ?3))
                     ORDER BY created_at ASC, id ASC
                     LIMIT ?4",
                    NAMESPACE_COLUMNS
                ))
                .map_err(sql_err("Failed to prepare namespace listing"))?;
            let raw = stmt
                .query_map(
                    params![status.as_str(), after_t, after_id, (opts.num_items + 1) as i64],
                    RawNamespace::from_row,
                )
                .map_err(sql_err("Failed to list namespaces"))?;

            let mut rows = Vec::new();
            for r in raw {
                let r = r.map_err(sql_err("Failed to read namespace row"))?;
                let bytes = r.approx_bytes();
                let position = Position::new(r.created_at, r.id.clone());
                rows.push(PageRow {
                    item: r.into_namespace()?,
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
// Row helpers shared with the entry and chunk repositories
// =============================================================================

struct RawNamespace {
    id: String,
    namespace: String,
    model_id: String,
    dimension: i64,
    filter_names: String,
    status: String,
    version: i64,
    created_at: i64,
}

impl RawNamespace {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            namespace: row.get(1)?,
            model_id: row.get(2)?,
            dimension: row.get(3)?,
            filter_names: row.get(4)?,
            status: row.get(5)?,
            version: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn approx_bytes(&self) -> usize {
        self.id.len() + self.namespace.len() + self.model_id.len() + self.filter_names.len() + 32
    }

    fn into_namespace(self) -> Result<Namespace> {
        Ok(Namespace {
            namespace_id: parse_uuid(&self.id)?,
            namespace: self.namespace,
            model_id: self.model_id,
            dimension: self.dimension as usize,
            filter_names: serde_json::from_str(&self.filter_names)?,
            status: self.status.parse()?,
            version: self.version as u32,
            created_at: from_millis(self.created_at),
        })
    }
}

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| RecallError::Storage(format!("Corrupt id '{}': {}", s, e)))
}

pub(crate) fn load_namespace(conn: &Connection, namespace_id: Uuid) -> Result<Option<Namespace>> {
    conn.query_row(
        &format!("SELECT {} FROM namespaces WHERE id = ?1", NAMESPACE_COLUMNS),
        params![namespace_id.to_string()],
        RawNamespace::from_row,
    )
    .optional()
    .map_err(sql_err("Failed to load namespace"))?
    .map(RawNamespace::into_namespace)
    .transpose()
}

/// Load a namespace that must accept new entries and chunks.
pub(crate) fn load_writable_namespace(conn: &Connection, namespace_id: Uuid) -> Result<Namespace> {
    let ns = load_namespace(conn, namespace_id)?
        .ok_or_else(|| RecallError::NamespaceNotFound(namespace_id.to_string()))?;
    if ns.status == Status::Replaced {
        return Err(RecallError::NamespaceNotWritable(namespace_id));
    }
    Ok(ns)
}

fn find_by_config(conn: &Connection, config_key: &str, status: Status) -> Result<Option<Namespace>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM namespaces WHERE config_key = ?1 AND status = ?2
             ORDER BY version DESC LIMIT 1",
            NAMESPACE_COLUMNS
        ),
        params![config_key, status.as_str()],
        RawNamespace::from_row,
    )
    .optional()
    .map_err(sql_err("Failed to find namespace"))?
    .map(RawNamespace::into_namespace)
    .transpose()
}

fn insert_pending(conn: &Connection, config: &NamespaceConfig, config_key: &str) -> Result<Namespace> {
    let version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM namespaces WHERE config_key = ?1",
            params![config_key],
            |row| row.get(0),
        )
        .map_err(sql_err("Failed to compute namespace version"))?;

    let ns = Namespace {
        namespace_id: Uuid::new_v4(),
        namespace: config.namespace.clone(),
        model_id: config.model_id.clone(),
        dimension: config.dimension,
        filter_names: config.filter_names.clone(),
        status: Status::Pending,
        version: version as u32,
        created_at: from_millis(now_millis()),
    };

    conn.execute(
        "INSERT INTO namespaces
            (id, namespace, model_id, dimension, filter_names, config_key, status, version, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            ns.namespace_id.to_string(),
            ns.namespace,
            ns.model_id,
            ns.dimension as i64,
            serde_json::to_string(&ns.filter_names)?,
            config_key,
            ns.status.as_str(),
            version,
            ns.created_at.timestamp_millis(),
        ],
    )
    .map_err(sql_err("Failed to insert namespace"))?;

    info!(
        namespace_id = %ns.namespace_id,
        namespace = %ns.namespace,
        version = ns.version,
        "Created pending namespace version"
    );
    Ok(ns)
}

fn set_status(conn: &Connection, namespace_id: Uuid, status: Status) -> Result<()> {
    conn.execute(
        "UPDATE namespaces SET status = ?1 WHERE id = ?2",
        params![status.as_str(), namespace_id.to_string()],
    )
    .map_err(sql_err("Failed to update namespace status"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> NamespaceManager {
        let db = Arc::new(Database::in_memory().unwrap());
        NamespaceManager::new(db)
    }

    fn docs() -> NamespaceConfig {
        NamespaceConfig::new("docs", "minilm", 3).with_filter_names(["region"])
    }

    #[test]
    fn test_get_or_create_creates_pending() {
        let mgr = setup();
        let resolved = mgr.get_or_create(&docs(), Status::Ready).unwrap();
        assert!(resolved.created);
        assert_eq!(resolved.status, Status::Pending);

        let again = mgr.get_or_create(&docs(), Status::Pending).unwrap();
        assert!(!again.created);
        assert_eq!(again.namespace_id, resolved.namespace_id);
    }

    #[test]
    fn test_get_or_create_prefers_ready() {
        let mgr = setup();
        let first = mgr.get_or_create(&docs(), Status::Ready).unwrap();
        mgr.promote_to_ready(first.namespace_id).unwrap();
        let pending = mgr.create_pending_version(&docs()).unwrap();

        let ready = mgr.get_or_create(&docs(), Status::Ready).unwrap();
        assert_eq!(ready.namespace_id, first.namespace_id);
        assert_eq!(ready.status, Status::Ready);

        let in_flight = mgr.get_or_create(&docs(), Status::Pending).unwrap();
        assert_eq!(in_flight.namespace_id, pending.namespace_id);
    }

    #[test]
    fn test_get_or_create_ready_without_ready_reuses_pending() {
        let mgr = setup();
        let building = mgr.create_pending_version(&docs()).unwrap();

        let resolved = mgr.get_or_create(&docs(), Status::Ready).unwrap();
        assert!(!resolved.created);
        assert_eq!(resolved.status, Status::Pending);
        assert_eq!(resolved.namespace_id, building.namespace_id);
        assert!(mgr.get(&docs()).unwrap().is_none());
    }

    #[test]
    fn test_get_or_create_pending_accepts_ready() {
        let mgr = setup();
        let first = mgr.create_pending_version(&docs()).unwrap();
        mgr.promote_to_ready(first.namespace_id).unwrap();

        let resolved = mgr.get_or_create(&docs(), Status::Pending).unwrap();
        assert!(!resolved.created);
        assert_eq!(resolved.status, Status::Ready);
        assert_eq!(resolved.namespace_id, first.namespace_id);
    }

    #[test]
    fn test_get_or_create_rejects_replaced() {
        let mgr = setup();
        assert!(matches!(
            mgr.get_or_create(&docs(), Status::Replaced),
            Err(RecallError::Validation(_))
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mgr = setup();
        let bad = NamespaceConfig::new("docs", "minilm", 0);
        assert!(mgr.get_or_create(&bad, Status::Ready).is_err());
    }

    #[test]
    fn test_distinct_configs_are_independent() {
        let mgr = setup();
        let a = mgr.get_or_create(&docs(), Status::Ready).unwrap();
        let b = mgr
            .get_or_create(&NamespaceConfig::new("docs", "minilm", 4), Status::Ready)
            .unwrap();
        assert_ne!(a.namespace_id, b.namespace_id);
    }

    #[test]
    fn test_promotion_swaps_versions() {
        let mgr = setup();
        let v1 = mgr.create_pending_version(&docs()).unwrap();
        assert_eq!(v1.version, 1);
        let first = mgr.promote_to_ready(v1.namespace_id).unwrap();
        assert!(first.replaced_version.is_none());

        let v2 = mgr.create_pending_version(&docs()).unwrap();
        assert_eq!(v2.version, 2);
        // Reads keep resolving to v1 until v2 is promoted.
        assert_eq!(mgr.lookup(&docs()).unwrap(), Some(v1.namespace_id));

        let swap = mgr.promote_to_ready(v2.namespace_id).unwrap();
        let replaced = swap.replaced_version.unwrap();
        assert_eq!(replaced.namespace_id, v1.namespace_id);
        assert_eq!(replaced.status, Status::Replaced);

        assert_eq!(mgr.lookup(&docs()).unwrap(), Some(v2.namespace_id));
        let old = mgr.get_by_id(v1.namespace_id).unwrap().unwrap();
        assert_eq!(old.status, Status::Replaced);
    }

    #[test]
    fn test_promotion_is_idempotent() {
        let mgr = setup();
        let v1 = mgr.create_pending_version(&docs()).unwrap();
        mgr.promote_to_ready(v1.namespace_id).unwrap();
        let retry = mgr.promote_to_ready(v1.namespace_id).unwrap();
        assert!(retry.replaced_version.is_none());
        assert_eq!(mgr.lookup(&docs()).unwrap(), Some(v1.namespace_id));
    }

    #[test]
    fn test_replaced_cannot_be_promoted() {
        let mgr = setup();
        let v1 = mgr.create_pending_version(&docs()).unwrap();
        mgr.promote_to_ready(v1.namespace_id).unwrap();
        let v2 = mgr.create_pending_version(&docs()).unwrap();
        mgr.promote_to_ready(v2.namespace_id).unwrap();

        assert!(matches!(
            mgr.promote_to_ready(v1.namespace_id),
            Err(RecallError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_promote_unknown_namespace() {
        let mgr = setup();
        assert!(matches!(
            mgr.promote_to_ready(Uuid::new_v4()),
            Err(RecallError::NamespaceNotFound(_))
        ));
    }

    #[test]
    fn test_create_pending_version_reuses_in_flight() {
        let mgr = setup();
        let a = mgr.create_pending_version(&docs()).unwrap();
        let b = mgr.create_pending_version(&docs()).unwrap();
        assert_eq!(a.namespace_id, b.namespace_id);
    }

    #[test]
    fn test_get_only_sees_ready() {
        let mgr = setup();
        mgr.create_pending_version(&docs()).unwrap();
        assert!(mgr.get(&docs()).unwrap().is_none());
        assert!(mgr.lookup(&docs()).unwrap().is_none());
    }

    #[test]
    fn test_live_versions_newest_first() {
        let mgr = setup();
        let v1 = mgr.create_pending_version(&docs()).unwrap();
        mgr.promote_to_ready(v1.namespace_id).unwrap();
        let v2 = mgr.create_pending_version(&docs()).unwrap();

        let versions = mgr.live_versions(&docs()).unwrap();
        let ids: Vec<Uuid> = versions.iter().map(|ns| ns.namespace_id).collect();
        assert_eq!(ids, vec![v2.namespace_id, v1.namespace_id]);
    }

    #[test]
    fn test_list_paginates_by_status() {
        let mgr = setup();
        let mut created = Vec::new();
        for i in 0..5 {
            let config = NamespaceConfig::new(format!("ns-{}", i), "m", 3);
            let ns = mgr.create_pending_version(&config).unwrap();
            created.push(ns.namespace_id);
        }
        let ready = mgr.create_pending_version(&docs()).unwrap();
        mgr.promote_to_ready(ready.namespace_id).unwrap();

        let mut seen = Vec::new();
        let mut opts = PaginationOpts::first(2);
        loop {
            let page = mgr.list(Status::Pending, &opts).unwrap();
            seen.extend(page.page.iter().map(|ns| ns.namespace_id));
            if page.is_done {
                break;
            }
            opts = opts.resume(page.continue_cursor);
        }
        seen.sort();
        created.sort();
        assert_eq!(seen, created);

        let ready_page = mgr.list(Status::Ready, &PaginationOpts::first(10)).unwrap();
        assert_eq!(ready_page.page.len(), 1);
        assert!(ready_page.is_done);
    }

    #[test]
    fn test_list_rejects_foreign_cursor() {
        let mgr = setup();
        mgr.create_pending_version(&docs()).unwrap();
        let page = mgr.list(Status::Pending, &PaginationOpts::first(1)).unwrap();
        let opts = PaginationOpts::first(1).resume(page.continue_cursor);
        assert!(matches!(
            mgr.list(Status::Ready, &opts),
            Err(RecallError::InvalidCursor(_))
        ));
    }
}
