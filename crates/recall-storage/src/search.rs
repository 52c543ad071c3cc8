//! Read paths used by search: vector candidates and FTS5 keyword hits.
//!
//! Both only see chunks of `Ready` entries in the given namespace, and both
//! apply filters inside SQL so filtered-out chunks never reach ranking.

use std::sync::Arc;

use rusqlite::types::ToSql;
use uuid::Uuid;

use recall_core::error::Result;
use recall_core::types::FilterValue;

use crate::chunks::decode_embedding;
use crate::db::{sql_err, Database};
use crate::namespaces::parse_uuid;

/// A chunk eligible for vector scoring.
#[derive(Debug, Clone)]
pub struct VectorCandidate {
    pub entry_id: Uuid,
    pub order: u32,
    pub importance: f64,
    pub embedding: Vec<f32>,
}

/// A single full-text hit, best first.
#[derive(Debug, Clone)]
pub struct KeywordHit {
    pub entry_id: Uuid,
    pub order: u32,
    /// BM25 relevance, negated so higher is better.
    pub rank: f64,
}

/// Search-side queries over chunks.
pub struct ChunkSearch {
    db: Arc<Database>,
}

impl ChunkSearch {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Every searchable chunk of `namespace_id` whose entry matches all
    /// `filters` exactly.
    pub fn vector_candidates(&self, namespace_id: Uuid, filters: &[FilterValue]) -> Result<Vec<VectorCandidate>> {
        let mut params_vec: Vec<Box<dyn ToSql>> = vec![Box::new(namespace_id.to_string())];
        let filter_sql = filter_clause(filters, &mut params_vec);
        let sql = format!(
            "SELECT c.entry_id, c.ord, e.importance, c.embedding
             FROM chunks c
             JOIN entries e ON e.id = c.entry_id
             WHERE e.namespace_id = ?1 AND e.status = 'ready'{}",
            filter_sql
        );

        self.db.with_conn(|conn| {
            let params_refs: Vec<&dyn ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
            let mut stmt = conn
                .prepare(&sql)
                .map_err(sql_err("Vector candidate query prepare"))?;
            let rows = stmt
                .query_map(params_refs.as_slice(), |row| {
                    let entry_id: String = row.get(0)?;
                    let ord: i64 = row.get(1)?;
                    let importance: f64 = row.get(2)?;
                    let blob: Vec<u8> = row.get(3)?;
                    Ok((entry_id, ord, importance, blob))
                })
                .map_err(sql_err("Vector candidate query"))?;

            let mut candidates = Vec::new();
            for row in rows {
                let (entry_id, ord, importance, blob) =
                    row.map_err(sql_err("Vector candidate row"))?;
                candidates.push(VectorCandidate {
                    entry_id: parse_uuid(&entry_id)?,
                    order: ord as u32,
                    importance,
                    embedding: decode_embedding(&blob),
                });
            }
            Ok(candidates)
        })
    }

    /// Keyword search over chunk text (or `searchable_text` when set).
    ///
    /// Free text is reduced to quoted terms joined with OR, so user input
    /// can never be parsed as FTS5 syntax.
    pub fn keyword(
        &self,
        namespace_id: Uuid,
        query: &str,
        filters: &[FilterValue],
        limit: usize,
    ) -> Result<Vec<KeywordHit>> {
        let Some(match_expr) = sanitize_fts5_query(query) else {
            return Ok(Vec::new());
        };

        let mut params_vec: Vec<Box<dyn ToSql>> = vec![
            Box::new(match_expr),
            Box::new(namespace_id.to_string()),
        ];
        let filter_sql = filter_clause(filters, &mut params_vec);
        params_vec.push(Box::new(limit as i64));
        let limit_param = params_vec.len();
        let sql = format!(
            "SELECT c.entry_id, c.ord, chunks_fts.rank
             FROM chunks_fts
             JOIN chunks c ON c.rowid = chunks_fts.rowid
             JOIN entries e ON e.id = c.entry_id
             WHERE chunks_fts MATCH ?1
               AND e.namespace_id = ?2 AND e.status = 'ready'{}
             ORDER BY chunks_fts.rank, c.entry_id, c.ord
             LIMIT ?{}",
            filter_sql, limit_param
        );

        self.db.with_conn(|conn| {
            let params_refs: Vec<&dyn ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
            let mut stmt = conn.prepare(&sql).map_err(sql_err("FTS5 query prepare failed"))?;
            let rows = stmt
                .query_map(params_refs.as_slice(), |row| {
                    let entry_id: String = row.get(0)?;
                    let ord: i64 = row.get(1)?;
                    let rank: f64 = row.get(2)?;
                    Ok((entry_id, ord, rank))
                })
                .map_err(sql_err("FTS5 query failed"))?;

            let mut hits = Vec::new();
            for row in rows {
                let (entry_id, ord, rank) = row.map_err(sql_err("FTS5 row"))?;
                hits.push(KeywordHit {
                    entry_id: parse_uuid(&entry_id)?,
                    order: ord as u32,
                    // FTS5 rank is negative (lower = better), negate for consistency.
                    rank: -rank,
                });
            }
            Ok(hits)
        })
    }
}

/// One `EXISTS` clause per filter, ANDed. Values compare in canonical JSON.
fn filter_clause(filters: &[FilterValue], params_vec: &mut Vec<Box<dyn ToSql>>) -> String {
    let mut sql = String::new();
    for filter in filters {
        params_vec.push(Box::new(filter.name.clone()));
        let name_idx = params_vec.len();
        params_vec.push(Box::new(filter.canonical_value()));
        let value_idx = params_vec.len();
        sql.push_str(&format!(
            " AND EXISTS (SELECT 1 FROM entry_filters f
                          WHERE f.entry_id = e.id AND f.name = ?{} AND f.value = ?{})",
            name_idx, value_idx
        ));
    }
    sql
}

/// Quote every alphanumeric term and join them with OR.
/// Returns `None` when the query has no searchable terms.
pub fn sanitize_fts5_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}
