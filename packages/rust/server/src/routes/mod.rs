//! API routes

use axum::Router;

use crate::AppState;

mod documents;
mod ingest;
mod query;
mod scrape;

/// Build the API router with all endpoints.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/query", query::router())
        .nest("/doc", documents::router())
        .nest("/ingest", ingest::router())
        .nest("/scrape", scrape::router())
}
