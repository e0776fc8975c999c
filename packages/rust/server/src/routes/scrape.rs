//! Product search and catalog refresh.

use std::sync::atomic::Ordering;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    routing::post,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{Instrument, error, info, info_span};

use docmuse_scraper::{ProductSearchResult, store_new_products};
use docmuse_shared::DocMuseError;

use crate::AppState;
use crate::error::AppError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/search", post(search_products))
        .route("/refresh_products", post(refresh_products))
}

#[derive(Debug, Deserialize)]
pub struct SearchBody {
    pub query: String,
}

/// Search the storefront, store anything new, and return every match.
async fn search_products(
    State(state): State<AppState>,
    payload: Result<Json<SearchBody>, JsonRejection>,
) -> Result<Json<ProductSearchResult>, AppError> {
    let Json(body) = payload?;
    let query = body.query.trim();
    if query.is_empty() {
        return Err(DocMuseError::validation("query must not be empty").into());
    }
    let result = state.scraper.search(query).await?;
    let stored = store_new_products(&result.products, &state.storage).await?;
    info!(total = result.total, new = stored.len(), "product search served");
    Ok(Json(result))
}

/// Re-scrape the whole catalog in the background. Only one refresh runs at
/// a time; a second request while one is running is acknowledged as such.
async fn refresh_products(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    if state.refreshing.swap(true, Ordering::SeqCst) {
        return (
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "running",
                "message": "A product refresh is already in progress",
            })),
        );
    }

    let scraper = state.scraper.clone();
    let storage = state.storage.clone();
    let refreshing = state.refreshing.clone();
    tokio::spawn(
        async move {
            let outcome = async {
                let catalog = scraper.catalog().await?;
                let stored = store_new_products(&catalog.products, &storage).await?;
                Ok::<_, DocMuseError>((catalog.total, stored.len()))
            }
            .await;
            match outcome {
                Ok((total, new)) => info!(total, new, "product refresh complete"),
                Err(e) => error!(error = %e, "product refresh failed"),
            }
            refreshing.store(false, Ordering::SeqCst);
        }
        .instrument(info_span!("product_refresh")),
    );

    (
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "started",
            "message": "Product refresh started in the background",
        })),
    )
}
