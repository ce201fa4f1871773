use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};

use common::error::AppError;
use common::storage::types::invitation::Invitation;
use common::storage::types::share_token::ShareToken;
use common::storage::types::workspace::{MemberRole, Workspace, WorkspaceRole};

use crate::{api_state::ApiState, error::ApiError, middleware_auth::Principal};

fn parse_role(role: Option<&str>) -> Result<WorkspaceRole, ApiError> {
    match role.unwrap_or("subuser").to_lowercase().as_str() {
        "admin" => Ok(WorkspaceRole::Admin),
        "subuser" | "member" => Ok(WorkspaceRole::Subuser),
        other => Err(ApiError::ValidationError(format!(
            "unknown role '{other}'"
        ))),
    }
}

async fn load_workspace(state: &ApiState, workspace_id: &str) -> Result<Workspace, ApiError> {
    let workspace: Option<Workspace> = state
        .db
        .get_item(workspace_id)
        .await
        .map_err(AppError::Database)?;
    workspace.ok_or_else(|| ApiError::NotFound(format!("workspace {workspace_id} not found")))
}

#[derive(Debug, Deserialize)]
pub struct CreateWorkspaceRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkspaceResponse {
    pub workspace_id: String,
    pub namespace: String,
}

pub async fn create_workspace(
    State(state): State<ApiState>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<CreateWorkspaceRequest>,
) -> Result<Json<CreateWorkspaceResponse>, ApiError> {
    let user = principal.require_admin()?;

    let workspace = Workspace::create(&state.db, user, &request.name).await?;

    Ok(Json(CreateWorkspaceResponse {
        workspace_id: workspace.id,
        namespace: workspace.namespace,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteRequest {
    pub invitee_user_id: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub ttl_secs: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteResponse {
    pub invitation_id: String,
}

pub async fn invite(
    State(state): State<ApiState>,
    Extension(principal): Extension<Principal>,
    Path(workspace_id): Path<String>,
    Json(request): Json<InviteRequest>,
) -> Result<Json<InviteResponse>, ApiError> {
    let user = principal.require_user()?;
    let workspace = load_workspace(&state, &workspace_id).await?;
    let role = parse_role(request.role.as_deref())?;
    let ttl = chrono::Duration::seconds(request.ttl_secs.unwrap_or(7 * 24 * 3600));

    let invitation = Invitation::create(
        &state.db,
        user,
        &workspace,
        &request.invitee_user_id,
        role,
        ttl,
    )
    .await?;

    Ok(Json(InviteResponse {
        invitation_id: invitation.id,
    }))
}

#[derive(Debug, Serialize)]
pub struct InvitationStatusResponse {
    pub status: String,
}

pub async fn accept_invitation(
    State(state): State<ApiState>,
    Extension(principal): Extension<Principal>,
    Path(invitation_id): Path<String>,
) -> Result<Json<InvitationStatusResponse>, ApiError> {
    let user = principal.require_user()?;
    Invitation::accept(&state.db, &invitation_id, user).await?;
    Ok(Json(InvitationStatusResponse {
        status: "accepted".to_string(),
    }))
}

pub async fn decline_invitation(
    State(state): State<ApiState>,
    Extension(principal): Extension<Principal>,
    Path(invitation_id): Path<String>,
) -> Result<Json<InvitationStatusResponse>, ApiError> {
    let user = principal.require_user()?;
    Invitation::decline(&state.db, &invitation_id, user).await?;
    Ok(Json(InvitationStatusResponse {
        status: "declined".to_string(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareLinkRequest {
    #[serde(default = "default_max_uses")]
    pub max_uses: u32,
    #[serde(default)]
    pub ttl_secs: Option<i64>,
    #[serde(default)]
    pub role: Option<String>,
}

fn default_max_uses() -> u32 {
    10
}

#[derive(Debug, Serialize)]
pub struct ShareLinkResponse {
    pub token: String,
    pub url: String,
}

pub async fn create_share_link(
    State(state): State<ApiState>,
    Extension(principal): Extension<Principal>,
    Path(workspace_id): Path<String>,
    Json(request): Json<ShareLinkRequest>,
) -> Result<Json<ShareLinkResponse>, ApiError> {
    let user = principal.require_user()?;
    let workspace = load_workspace(&state, &workspace_id).await?;
    let role = parse_role(request.role.as_deref())?;
    let ttl = chrono::Duration::seconds(request.ttl_secs.unwrap_or(7 * 24 * 3600));

    let token = ShareToken::issue(&state.db, user, &workspace, role, request.max_uses, ttl).await?;

    let url = format!("/join/{}", token.id);
    Ok(Json(ShareLinkResponse {
        token: token.id,
        url,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    pub workspace_id: String,
    pub namespace: String,
}

pub async fn join_via_token(
    State(state): State<ApiState>,
    Extension(principal): Extension<Principal>,
    Path(token): Path<String>,
) -> Result<Json<JoinResponse>, ApiError> {
    let user = principal.require_user()?;

    let workspace = ShareToken::redeem(&state.db, user, &token).await?;

    Ok(Json(JoinResponse {
        workspace_id: workspace.id,
        namespace: workspace.namespace,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberEntry {
    pub user_id: String,
    pub role: String,
}

#[derive(Debug, Serialize)]
pub struct MembersResponse {
    pub members: Vec<MemberEntry>,
}

pub async fn list_members(
    State(state): State<ApiState>,
    Extension(principal): Extension<Principal>,
    Path(workspace_id): Path<String>,
) -> Result<Json<MembersResponse>, ApiError> {
    let user = principal.require_user()?;
    let workspace = load_workspace(&state, &workspace_id).await?;

    if workspace.member_role(&state.db, &user.id).await? == MemberRole::None {
        return Err(ApiError::Forbidden {
            reason: "not a workspace member".to_string(),
            matched_policy_id: None,
        });
    }

    let members = workspace
        .members(&state.db)
        .await?
        .into_iter()
        .map(|m| MemberEntry {
            user_id: m.user_id,
            role: match m.role {
                WorkspaceRole::Admin => "admin".to_string(),
                WorkspaceRole::Subuser => "subuser".to_string(),
            },
        })
        .collect();

    Ok(Json(MembersResponse { members }))
}

pub async fn remove_member(
    State(state): State<ApiState>,
    Extension(principal): Extension<Principal>,
    Path((workspace_id, member_id)): Path<(String, String)>,
) -> Result<Json<InvitationStatusResponse>, ApiError> {
    let user = principal.require_user()?;
    let workspace = load_workspace(&state, &workspace_id).await?;

    let is_self_removal = user.id == member_id;
    if !is_self_removal && workspace.member_role(&state.db, &user.id).await? != MemberRole::Admin {
        return Err(ApiError::Forbidden {
            reason: "only workspace admins can remove members".to_string(),
            matched_policy_id: None,
        });
    }

    workspace.remove_member(&state.db, &member_id).await?;

    Ok(Json(InvitationStatusResponse {
        status: "removed".to_string(),
    }))
}
