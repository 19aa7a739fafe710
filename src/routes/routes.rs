//! Defines routes for all share-record operations.
//!
//! ## Structure
//! - **Collection endpoints**
//!   - `POST   /files` — streaming upload (metadata in `x-*` headers)
//!   - `GET    /files` — list records for the caller's session token
//!
//! - **Record endpoints**
//!   - `GET    /files/{code}` — public metadata
//!   - `PATCH  /files/{code}` — rename code, change password, extend lifetime
//!   - `DELETE /files/{code}` — soft-delete and reclaim storage
//!   - `GET    /files/{code}/download` — streamed payload (password in query)
//!   - `GET    /files/{code}/qr` — SVG access artifact
//!
//! - **Utility endpoints**
//!   - `GET    /codes/{code}/availability` — pre-flight code check
//!   - `GET    /stats` — aggregate counters

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        share_handlers::{
            check_code, delete_file, download_file, edit_file, get_file, get_qr, get_stats,
            list_files, upload_file,
        },
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build and return the router for every public endpoint.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Collection routes
        .route("/files", post(upload_file).get(list_files))
        // Record routes
        .route(
            "/files/{code}",
            get(get_file).patch(edit_file).delete(delete_file),
        )
        .route("/files/{code}/download", get(download_file))
        .route("/files/{code}/qr", get(get_qr))
        // Utility routes
        .route("/codes/{code}/availability", get(check_code))
        .route("/stats", get(get_stats))
}
