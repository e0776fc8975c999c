//! Stored document lookup.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use serde::Serialize;

use docmuse_shared::{DocumentRecord, KnowledgeBase};

use crate::AppState;
use crate::error::AppError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:kb", get(list_documents))
        .route("/:kb/:doc_id", get(get_document))
}

/// Listing entry; content is left out.
#[derive(Debug, Serialize)]
struct DocumentSummary {
    id: String,
    title: String,
    content_hash: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

async fn get_document(
    State(state): State<AppState>,
    Path((kb, doc_id)): Path<(String, String)>,
) -> Result<Json<DocumentRecord>, AppError> {
    let kb: KnowledgeBase = kb.parse()?;
    state
        .documents
        .get(&doc_id, kb)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Document not found: {doc_id}")))
}

async fn list_documents(
    State(state): State<AppState>,
    Path(kb): Path<String>,
) -> Result<Json<Vec<DocumentSummary>>, AppError> {
    let kb: KnowledgeBase = kb.parse()?;
    let documents = state.storage.list_documents(kb).await?;
    Ok(Json(
        documents
            .into_iter()
            .map(|d| DocumentSummary {
                id: d.id,
                title: d.title,
                content_hash: d.content_hash,
                created_at: d.created_at,
            })
            .collect(),
    ))
}
