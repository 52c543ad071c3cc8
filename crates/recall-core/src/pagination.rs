//! Request and response shapes shared by every paginated listing.

use serde::{Deserialize, Serialize};

use crate::error::{RecallError, Result};

/// Forward-only pagination request.
///
/// `cursor` is opaque: pass back the `continue_cursor` of the previous page,
/// or `None` to start from the beginning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaginationOpts {
    #[serde(default)]
    pub cursor: Option<String>,
    pub num_items: usize,
    #[serde(default)]
    pub maximum_bytes_read: Option<usize>,
    #[serde(default)]
    pub maximum_rows_read: Option<usize>,
}

impl PaginationOpts {
    /// First page of `num_items` with no read budget.
    pub fn first(num_items: usize) -> Self {
        Self {
            cursor: None,
            num_items,
            maximum_bytes_read: None,
            maximum_rows_read: None,
        }
    }

    /// Same budget, resuming from `cursor`.
    pub fn resume(&self, cursor: impl Into<String>) -> Self {
        Self {
            cursor: Some(cursor.into()),
            ..self.clone()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_items == 0 {
            return Err(RecallError::Validation("num_items must be positive".into()));
        }
        if self.maximum_bytes_read == Some(0) || self.maximum_rows_read == Some(0) {
            return Err(RecallError::Validation(
                "read budgets must be positive when set".into(),
            ));
        }
        Ok(())
    }
}

/// Advice returned when a page ran close to, or over, its read budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    /// The page completed but used more than half of a budget; request
    /// smaller pages.
    SplitRecommended,
    /// The page was cut short by a budget; `continue_cursor` resumes it.
    SplitRequired,
}

/// One page of results.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaginationResult<T> {
    pub page: Vec<T>,
    pub continue_cursor: String,
    pub is_done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_status: Option<PageStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split_cursor: Option<String>,
}

impl<T> PaginationResult<T> {
    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> PaginationResult<U> {
        PaginationResult {
            page: self.page.into_iter().map(f).collect(),
            continue_cursor: self.continue_cursor,
            is_done: self.is_done,
            page_status: self.page_status,
            split_cursor: self.split_cursor,
        }
    }
}
