//! Recall core crate - domain types, lifecycle rules, content hashing,
//! errors, and configuration shared by every other crate.

pub mod config;
pub mod error;
pub mod hash;
pub mod lifecycle;
pub mod pagination;
pub mod types;

pub use config::RecallConfig;
pub use error::{RecallError, Result};
pub use hash::ContentHasher;
pub use pagination::{PageStatus, PaginationOpts, PaginationResult};
pub use types::*;
