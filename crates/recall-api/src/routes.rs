//! Router setup with all API routes and middleware.
//!
//! Configures the axum Router with CORS, tracing, compression,
//! and all endpoint handlers.

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    // CORS: allow localhost origins on the configured port.
    let port = state.config.general.port;
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", port),
        format!("http://localhost:{}", port),
    ]
    .iter()
    .filter_map(|origin| origin.parse::<HeaderValue>().ok())
    .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    let namespace_routes = Router::new()
        .route("/namespaces", get(handlers::list_namespaces))
        .route("/namespaces/get_or_create", post(handlers::get_or_create_namespace))
        .route("/namespaces/create_pending", post(handlers::create_pending_namespace))
        .route("/namespaces/get", post(handlers::get_namespace))
        .route("/namespaces/lookup", post(handlers::lookup_namespace))
        .route("/namespaces/{id}/promote", post(handlers::promote_namespace))
        .route("/namespaces/{id}/documents", post(handlers::ingest_documents));

    let entry_routes = Router::new()
        .route("/entries", get(handlers::list_entries).post(handlers::add_entry))
        .route("/entries/async", post(handlers::add_entry_async))
        .route("/entries/find_by_content_hash", post(handlers::find_by_content_hash))
        .route("/entries/{id}", get(handlers::get_entry))
        .route("/entries/{id}/promote", post(handlers::promote_entry))
        .route("/entries/{id}/delete", post(handlers::delete_entry));

    let chunk_routes = Router::new()
        .route("/chunks/{entry_id}", get(handlers::list_chunks))
        .route("/chunks/{entry_id}/insert", post(handlers::insert_chunks))
        .route("/chunks/{entry_id}/replace_page", post(handlers::replace_chunks_page));

    let search_routes = Router::new()
        .route("/search", post(handlers::search))
        .route("/search/hybrid", post(handlers::search_hybrid));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(namespace_routes)
        .merge(entry_routes)
        .merge(chunk_routes)
        .merge(search_routes)
        .layer(DefaultBodyLimit::max(16 * 1024 * 1024)) // chunk batches carry embeddings
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
