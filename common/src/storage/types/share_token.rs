use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::user::User;
use super::workspace::{MemberRole, Workspace, WorkspaceRole};

stored_object!(ShareToken, "share_token", {
    workspace_id: String,
    role: WorkspaceRole,
    max_uses: u32,
    uses_remaining: u32,
    #[serde(
        serialize_with = "serialize_datetime",
        deserialize_with = "deserialize_datetime",
        default
    )]
    expires_at: DateTime<Utc>,
    #[serde(default)]
    revoked: bool
});

/// Tokens are SHA-256 digests over fresh UUID entropy, so the join URL
/// carries no guessable structure.
fn generate_token() -> String {
    let mut hasher = Sha256::new();
    hasher.update(Uuid::new_v4().as_bytes());
    hasher.update(Uuid::new_v4().as_bytes());
    format!("{:x}", hasher.finalize())
}

impl ShareToken {
    /// Issue a share token for a workspace. Admin-only.
    pub async fn issue(
        db: &SurrealDbClient,
        admin: &User,
        workspace: &Workspace,
        role: WorkspaceRole,
        max_uses: u32,
        ttl: chrono::Duration,
    ) -> Result<Self, AppError> {
        if workspace.member_role(db, &admin.id).await? != MemberRole::Admin {
            return Err(AppError::Auth(
                "only workspace admins can issue share tokens".into(),
            ));
        }
        if max_uses == 0 {
            return Err(AppError::Validation("max_uses must be positive".into()));
        }

        let now = Utc::now();
        let token = Self {
            id: generate_token(),
            created_at: now,
            updated_at: now,
            workspace_id: workspace.id.clone(),
            role,
            max_uses,
            uses_remaining: max_uses,
            expires_at: now + ttl,
            revoked: false,
        };

        let stored = db
            .store_item(token)
            .await?
            .ok_or_else(|| AppError::StoreReject("share token insert returned nothing".into()))?;
        Ok(stored)
    }

    /// Redeem a token for the calling user. The decrement happens in a single
    /// conditional UPDATE so concurrent redemptions cannot exceed `max_uses`.
    pub async fn redeem(db: &SurrealDbClient, user: &User, token: &str) -> Result<Workspace, AppError> {
        let mut response = db
            .client
            .query(
                "UPDATE type::thing($table, $token_id)
                 SET uses_remaining -= 1, updated_at = time::now()
                 WHERE uses_remaining > 0 AND revoked = false AND expires_at > time::now()
                 RETURN AFTER",
            )
            .bind(("table", Self::table_name()))
            .bind(("token_id", token.to_owned()))
            .await?;

        let updated: Vec<Self> = response.take(0)?;
        let Some(share) = updated.into_iter().next() else {
            // Distinguish a dead token from an unknown one for the caller.
            let existing: Option<Self> = db.get_item(token).await?;
            return Err(match existing {
                Some(t) if t.revoked => AppError::Conflict("share token is revoked".into()),
                Some(t) if t.uses_remaining == 0 => {
                    AppError::Conflict("share token is exhausted".into())
                }
                Some(_) => AppError::Conflict("share token has expired".into()),
                None => AppError::NotFound("share token not found".into()),
            });
        };

        let workspace: Workspace = db
            .get_item(&share.workspace_id)
            .await?
            .ok_or_else(|| AppError::NotFound("workspace not found".into()))?;

        workspace.add_member(db, user, share.role).await?;

        Ok(workspace)
    }

    pub async fn revoke(db: &SurrealDbClient, admin: &User, token: &str) -> Result<(), AppError> {
        let share: Self = db
            .get_item(token)
            .await?
            .ok_or_else(|| AppError::NotFound("share token not found".into()))?;

        let workspace: Workspace = db
            .get_item(&share.workspace_id)
            .await?
            .ok_or_else(|| AppError::NotFound("workspace not found".into()))?;
        if workspace.member_role(db, &admin.id).await? != MemberRole::Admin {
            return Err(AppError::Auth(
                "only workspace admins can revoke share tokens".into(),
            ));
        }

        db.client
            .query(
                "UPDATE type::thing($table, $token_id)
                 SET revoked = true, updated_at = time::now()",
            )
            .bind(("table", Self::table_name()))
            .bind(("token_id", token.to_owned()))
            .await?
            .check()?;

        Ok(())
    }
}
