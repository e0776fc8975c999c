//! Document ingestion over HTTP.

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    routing::post,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use docmuse_shared::{DocMuseError, KnowledgeBase};

use crate::AppState;
use crate::error::AppError;

pub fn router() -> Router<AppState> {
    Router::new().route("/", post(ingest))
}

#[derive(Debug, Deserialize)]
pub struct IngestBody {
    pub kb: String,
    pub content: String,
    #[serde(default)]
    pub title: Option<String>,
    /// Replace the document with this ID instead of creating a new one.
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Serialize)]
struct IngestResponse {
    id: String,
    kb: KnowledgeBase,
    title: String,
    chunks: usize,
    created: bool,
    status: &'static str,
}

/// Store a text document and index it as one chunk.
async fn ingest(
    State(state): State<AppState>,
    payload: Result<Json<IngestBody>, JsonRejection>,
) -> Result<(StatusCode, Json<IngestResponse>), AppError> {
    let Json(body) = payload?;
    let kb: KnowledgeBase = body.kb.parse()?;
    if body.content.trim().is_empty() {
        return Err(DocMuseError::validation("content must not be empty").into());
    }
    let title = body
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or("Untitled document")
        .to_string();
    let id = body.id.as_deref().map(str::trim).filter(|id| !id.is_empty());

    let ingested = state
        .storage
        .ingest_document(id, kb, &title, &body.content, &json!({ "title": title }))
        .await?;
    info!(doc_id = %ingested.record.id, %kb, created = ingested.created, "document ingested");

    let status = if ingested.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(IngestResponse {
            id: ingested.record.id,
            kb,
            title,
            chunks: 1,
            created: ingested.created,
            status: "success",
        }),
    ))
}
