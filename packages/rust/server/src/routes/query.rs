//! Streaming query endpoints.

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    response::Response,
    routing::post,
};
use serde::Deserialize;
use tracing::info;

use docmuse_core::RunRequest;
use docmuse_shared::KnowledgeBase;

use crate::AppState;
use crate::error::AppError;
use crate::stream::start_run;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(query))
        .route("/supplement/rewrite", post(rewrite_supplement))
}

#[derive(Debug, Deserialize)]
pub struct QueryBody {
    pub kb: String,
    pub prompt: String,
    #[serde(default)]
    pub doc_id: Option<String>,
    #[serde(default)]
    pub stream_tokens: bool,
}

#[derive(Debug, Deserialize)]
pub struct RewriteBody {
    pub doc_id: String,
    #[serde(default)]
    pub tone: String,
}

async fn query(
    State(state): State<AppState>,
    payload: Result<Json<QueryBody>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(body) = payload?;
    let request =
        RunRequest::new(&body.kb, &body.prompt, body.doc_id)?.with_token_stream(body.stream_tokens);
    info!(kb = %request.knowledge_base, scoped = request.document_scope.is_some(), "query received");
    Ok(start_run(&state, request))
}

async fn rewrite_supplement(
    State(state): State<AppState>,
    payload: Result<Json<RewriteBody>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(body) = payload?;
    let request = RunRequest::supplement_rewrite(&body.doc_id, &body.tone)?.with_token_stream(true);
    let doc_id = body.doc_id.trim();
    if state
        .documents
        .get(doc_id, KnowledgeBase::Supplements)
        .await?
        .is_none()
    {
        return Err(AppError::NotFound(format!("Document not found: {doc_id}")));
    }
    info!(%doc_id, "rewrite received");
    Ok(start_run(&state, request))
}
