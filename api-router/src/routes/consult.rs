use std::time::Duration;

use axum::{extract::State, Extension, Json};
use serde::{Deserialize, Serialize};

use crate::{api_state::ApiState, error::ApiError, middleware_auth::Principal};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsultRequest {
    pub query: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsultResponse {
    pub answer: String,
    pub confidence: f32,
    pub retrieved_ids: Vec<String>,
    pub partial: bool,
}

/// Consult the memory graph. The namespace defaults to the caller's own;
/// naming another namespace still passes every candidate through the policy
/// engine, so cross-tenant reads need an explicit ALLOW.
pub async fn consult(
    State(state): State<ApiState>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<ConsultRequest>,
) -> Result<Json<ConsultResponse>, ApiError> {
    if request.query.trim().is_empty() {
        return Err(ApiError::ValidationError("query must not be empty".into()));
    }

    let namespace = match (&principal, request.namespace) {
        (_, Some(namespace)) => namespace,
        (Principal::User(user), None) => user.namespace(),
        (Principal::Anonymous, None) => {
            return Err(ApiError::Unauthorized(
                "anonymous consultations must name a namespace".to_string(),
            ))
        }
    };

    // A cancelled consultation still answers 200 with partial=true.
    let deadline = Duration::from_secs(state.config.deadlines.synthesis_timeout_secs);
    let consultation = state
        .consultation
        .consult(
            &principal.as_subject(),
            &namespace,
            &request.query,
            request.conversation_id.as_deref(),
            deadline,
        )
        .await?;

    Ok(Json(ConsultResponse {
        answer: consultation.answer,
        confidence: consultation.confidence,
        retrieved_ids: consultation.retrieved_ids,
        partial: consultation.partial,
    }))
}
