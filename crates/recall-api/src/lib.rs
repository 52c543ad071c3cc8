//! Recall API crate - axum HTTP server and route handlers.
//!
//! Exposes namespace, entry, chunk and search operations as JSON
//! endpoints, plus a health check.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
