use axum::{extract::State, Extension, Json};
use serde::{Deserialize, Serialize};

use common::storage::types::ingestion_job::{IngestionJob, IngestionPayload, IngestionStats};

use crate::{api_state::ApiState, error::ApiError, middleware_auth::Principal};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestTurnRequest {
    pub user_text: String,
    pub assistant_text: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestTurnResponse {
    pub conversation_id: Option<String>,
    pub stats: IngestionStats,
}

/// Ingest one conversation turn into the caller's private namespace. The
/// response carries the DONE acknowledgment, so a follow-up consultation
/// sees this turn's facts.
pub async fn ingest_turn(
    State(state): State<ApiState>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<IngestTurnRequest>,
) -> Result<Json<IngestTurnResponse>, ApiError> {
    let user = principal.require_user()?;

    let job = IngestionJob::new(
        user.namespace(),
        principal.as_subject(),
        IngestionPayload::ConversationTurn {
            user_text: request.user_text,
            assistant_text: request.assistant_text,
            conversation_id: request.conversation_id,
        },
    );

    let outcome = state.coordinator.enqueue_and_wait(job).await?;

    Ok(Json(IngestTurnResponse {
        conversation_id: outcome.conversation_id,
        stats: outcome.stats,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestDocumentRequest {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub content_base64: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default = "default_document_type")]
    pub document_type: String,
    /// Additionally builds the hierarchical vector tree over the chunks.
    #[serde(default)]
    pub math_mode: bool,
}

fn default_document_type() -> String {
    "text".to_string()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestDocumentResponse {
    pub stats: IngestionStats,
    pub entities: Vec<String>,
    pub chunks: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_tree: Option<ingestion_pipeline::VectorTree>,
}

pub async fn ingest_document(
    State(state): State<ApiState>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<IngestDocumentRequest>,
) -> Result<Json<IngestDocumentResponse>, ApiError> {
    let user = principal.require_user()?;

    let payload = match (request.text, request.content_base64) {
        (Some(text), None) => IngestionPayload::DocumentText {
            text,
            filename: request.filename,
            math_mode: request.math_mode,
        },
        (None, Some(content_base64)) => IngestionPayload::DocumentBlob {
            content_base64,
            filename: request.filename.ok_or_else(|| {
                ApiError::ValidationError("filename is required for binary uploads".to_string())
            })?,
            document_type: request.document_type,
        },
        _ => {
            return Err(ApiError::ValidationError(
                "provide exactly one of text or contentBase64".to_string(),
            ))
        }
    };

    let job = IngestionJob::new(user.namespace(), principal.as_subject(), payload);
    let outcome = state.coordinator.enqueue_and_wait(job).await?;

    Ok(Json(IngestDocumentResponse {
        stats: outcome.stats,
        entities: outcome.entity_ids,
        chunks: outcome.chunk_texts,
        vector_tree: outcome.vector_tree,
    }))
}
