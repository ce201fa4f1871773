use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};

use common::storage::types::audit_record::AuditRecord;
use common::storage::types::policy::{Policy, PolicyEffect};

use crate::{api_state::ApiState, error::ApiError, middleware_auth::Principal};

#[derive(Debug, Serialize)]
pub struct PolicyEntry {
    pub id: String,
    pub effect: String,
    pub subjects: Vec<String>,
    pub resources: Vec<String>,
    pub actions: Vec<String>,
    pub description: String,
}

impl From<Policy> for PolicyEntry {
    fn from(policy: Policy) -> Self {
        Self {
            id: policy.id,
            effect: match policy.effect {
                PolicyEffect::Allow => "ALLOW".to_string(),
                PolicyEffect::Deny => "DENY".to_string(),
            },
            subjects: policy.subjects,
            resources: policy.resources,
            actions: policy.actions,
            description: policy.description,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PoliciesResponse {
    pub policies: Vec<PolicyEntry>,
}

pub async fn list_policies(
    State(state): State<ApiState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<PoliciesResponse>, ApiError> {
    principal.require_admin()?;

    let policies = state
        .policy
        .list_policies()
        .await?
        .into_iter()
        .map(PolicyEntry::from)
        .collect();

    Ok(Json(PoliciesResponse { policies }))
}

#[derive(Debug, Deserialize)]
pub struct CreatePolicyRequest {
    pub effect: String,
    pub subjects: Vec<String>,
    pub resources: Vec<String>,
    pub actions: Vec<String>,
    #[serde(default)]
    pub description: String,
}

pub async fn create_policy(
    State(state): State<ApiState>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<CreatePolicyRequest>,
) -> Result<Json<PolicyEntry>, ApiError> {
    principal.require_admin()?;

    let effect = match request.effect.to_uppercase().as_str() {
        "ALLOW" => PolicyEffect::Allow,
        "DENY" => PolicyEffect::Deny,
        other => {
            return Err(ApiError::ValidationError(format!(
                "effect must be ALLOW or DENY, got '{other}'"
            )))
        }
    };
    if request.subjects.is_empty() || request.resources.is_empty() || request.actions.is_empty() {
        return Err(ApiError::ValidationError(
            "subjects, resources and actions must not be empty".to_string(),
        ));
    }

    let policy = state
        .policy
        .put_policy(Policy::new(
            effect,
            request.subjects,
            request.resources,
            request.actions,
            request.description,
        ))
        .await?;

    Ok(Json(PolicyEntry::from(policy)))
}

pub async fn delete_policy(
    State(state): State<ApiState>,
    Extension(principal): Extension<Principal>,
    Path(policy_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    principal.require_admin()?;

    state.policy.delete_policy(&policy_id).await?;

    Ok(Json(serde_json::json!({"status": "deleted"})))
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    #[serde(default = "default_audit_limit")]
    pub limit: usize,
}

fn default_audit_limit() -> usize {
    100
}

#[derive(Debug, Serialize)]
pub struct AuditEntry {
    pub time: String,
    pub principal: String,
    pub action: String,
    pub resource: String,
    pub decision: String,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct AuditResponse {
    pub records: Vec<AuditEntry>,
}

pub async fn audit_log(
    State(state): State<ApiState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<AuditResponse>, ApiError> {
    principal.require_admin()?;

    let records = AuditRecord::latest(&state.db, query.limit.min(1000))
        .await?
        .into_iter()
        .map(|record| AuditEntry {
            time: record.created_at.to_rfc3339(),
            principal: record.principal,
            action: record.action,
            resource: record.resource,
            decision: record.decision,
            reason: record.reason,
        })
        .collect();

    Ok(Json(AuditResponse { records }))
}
