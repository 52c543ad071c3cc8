//! Opaque listing cursors and budget-aware page assembly.
//!
//! A cursor is the hex encoding of a small JSON document naming the listing
//! it belongs to (`scope`) and the last position returned. Positions are a
//! `(sort value, tie-breaker id)` pair, so resuming is a strict "greater
//! than" seek that never skips or repeats a row.

use serde::{Deserialize, Serialize};

use recall_core::error::{RecallError, Result};
use recall_core::pagination::{PageStatus, PaginationOpts, PaginationResult};

/// Sort key of a row within its listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Position {
    pub t: i64,
    pub id: String,
}

impl Position {
    pub fn new(t: i64, id: impl Into<String>) -> Self {
        Self { t, id: id.into() }
    }
}

#[derive(Serialize, Deserialize)]
struct CursorBody {
    scope: String,
    after: Option<Position>,
}

pub(crate) fn encode(scope: &str, after: Option<&Position>) -> String {
    let body = CursorBody {
        scope: scope.to_string(),
        after: after.cloned(),
    };
    // Serializing a struct of strings and integers cannot fail.
    hex::encode(serde_json::to_vec(&body).unwrap_or_default())
}

/// Decode a cursor for `scope`. `None` means "from the beginning".
pub(crate) fn decode(cursor: Option<&str>, scope: &str) -> Result<Option<Position>> {
    let Some(cursor) = cursor else {
        return Ok(None);
    };
    let bytes = hex::decode(cursor)
        .map_err(|e| RecallError::InvalidCursor(format!("not hex: {}", e)))?;
    let body: CursorBody = serde_json::from_slice(&bytes)
        .map_err(|e| RecallError::InvalidCursor(format!("malformed: {}", e)))?;
    if body.scope != scope {
        return Err(RecallError::InvalidCursor(
            "cursor belongs to a different listing".into(),
        ));
    }
    Ok(body.after)
}

/// A fetched row with its position and approximate size.
pub(crate) struct PageRow<T> {
    pub item: T,
    pub position: Position,
    pub bytes: usize,
}

/// Build a page from up to `num_items + 1` rows fetched after `start`.
///
/// The extra row only signals that more data exists. A page always holds at
/// least one item when any remain; read budgets cut it short afterwards and
/// mark it `SplitRequired`.
pub(crate) fn assemble<T>(
    rows: Vec<PageRow<T>>,
    opts: &PaginationOpts,
    scope: &str,
    start: Option<&Position>,
) -> PaginationResult<T> {
    let has_more = rows.len() > opts.num_items;
    let total = rows.len().min(opts.num_items);

    let mut page = Vec::with_capacity(total);
    let mut positions = Vec::with_capacity(total);
    let mut bytes_read = 0usize;
    let mut truncated = false;

    for row in rows.into_iter().take(total) {
        bytes_read += row.bytes;
        page.push(row.item);
        positions.push(row.position);

        let rows_read = page.len();
        let over_bytes = opts.maximum_bytes_read.is_some_and(|max| bytes_read >= max);
        let over_rows = opts.maximum_rows_read.is_some_and(|max| rows_read >= max);
        let remaining = rows_read < total || has_more;
        if (over_bytes || over_rows) && remaining {
            truncated = true;
            break;
        }
    }

    let near_budget = opts.maximum_bytes_read.is_some_and(|max| bytes_read * 2 > max)
        || opts.maximum_rows_read.is_some_and(|max| page.len() * 2 > max);

    let page_status = if truncated {
        Some(PageStatus::SplitRequired)
    } else if near_budget && page.len() > 1 {
        Some(PageStatus::SplitRecommended)
    } else {
        None
    };

    let split_cursor = match page_status {
        Some(_) if positions.len() >= 2 => {
            Some(encode(scope, Some(&positions[positions.len() / 2 - 1])))
        }
        _ => None,
    };

    let continue_cursor = encode(scope, positions.last().or(start));

    PaginationResult {
        page,
        continue_cursor,
        is_done: !truncated && !has_more,
        page_status,
        split_cursor,
    }
}
