use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use uuid::Uuid;

use super::user::User;
use super::workspace::{MemberRole, Workspace, WorkspaceRole};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Declined,
    Revoked,
}

impl InvitationStatus {
    /// Accepted, declined and revoked invitations never change again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InvitationStatus::Pending)
    }
}

stored_object!(Invitation, "invitation", {
    workspace_id: String,
    inviter_id: String,
    invitee_id: String,
    role: WorkspaceRole,
    status: InvitationStatus,
    #[serde(
        serialize_with = "serialize_datetime",
        deserialize_with = "deserialize_datetime",
        default
    )]
    expires_at: DateTime<Utc>
});

impl Invitation {
    /// Invite a user into a workspace. Only workspace admins may invite.
    pub async fn create(
        db: &SurrealDbClient,
        inviter: &User,
        workspace: &Workspace,
        invitee_id: &str,
        role: WorkspaceRole,
        ttl: chrono::Duration,
    ) -> Result<Self, AppError> {
        if workspace.member_role(db, &inviter.id).await? != MemberRole::Admin {
            return Err(AppError::Auth(
                "only workspace admins can send invitations".into(),
            ));
        }

        let invitee: Option<User> = db.get_item(invitee_id).await?;
        if invitee.is_none() {
            return Err(AppError::NotFound(format!("user {invitee_id} not found")));
        }

        let now = Utc::now();
        let invitation = Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            workspace_id: workspace.id.clone(),
            inviter_id: inviter.id.clone(),
            invitee_id: invitee_id.to_string(),
            role,
            status: InvitationStatus::Pending,
            expires_at: now + ttl,
        };

        let stored = db
            .store_item(invitation)
            .await?
            .ok_or_else(|| AppError::StoreReject("invitation insert returned nothing".into()))?;
        Ok(stored)
    }

    async fn load(db: &SurrealDbClient, id: &str) -> Result<Self, AppError> {
        db.get_item(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("invitation {id} not found")))
    }

    async fn transition(
        self,
        db: &SurrealDbClient,
        next: InvitationStatus,
    ) -> Result<Self, AppError> {
        if self.status.is_terminal() {
            return Err(AppError::Conflict(format!(
                "invitation is already {:?}",
                self.status
            )));
        }

        let mut updated = self;
        updated.status = next;
        updated.updated_at = Utc::now();
        db.update_item(updated.clone()).await?;
        Ok(updated)
    }

    /// Accept on behalf of the invitee and grant the membership edge.
    pub async fn accept(db: &SurrealDbClient, id: &str, user: &User) -> Result<Self, AppError> {
        let invitation = Self::load(db, id).await?;

        if invitation.invitee_id != user.id {
            return Err(AppError::Auth(
                "only the invited user can accept this invitation".into(),
            ));
        }
        if invitation.expires_at < Utc::now() {
            return Err(AppError::Conflict("invitation has expired".into()));
        }

        let workspace: Workspace = db
            .get_item(&invitation.workspace_id)
            .await?
            .ok_or_else(|| AppError::NotFound("workspace not found".into()))?;

        let accepted = invitation
            .transition(db, InvitationStatus::Accepted)
            .await?;
        workspace.add_member(db, user, accepted.role).await?;

        Ok(accepted)
    }

    pub async fn decline(db: &SurrealDbClient, id: &str, user: &User) -> Result<Self, AppError> {
        let invitation = Self::load(db, id).await?;

        if invitation.invitee_id != user.id {
            return Err(AppError::Auth(
                "only the invited user can decline this invitation".into(),
            ));
        }

        invitation.transition(db, InvitationStatus::Declined).await
    }

    /// Withdraw a pending invitation; allowed for the inviter or any
    /// workspace admin.
    pub async fn revoke(db: &SurrealDbClient, id: &str, by: &User) -> Result<Self, AppError> {
        let invitation = Self::load(db, id).await?;

        if invitation.inviter_id != by.id {
            let workspace: Workspace = db
                .get_item(&invitation.workspace_id)
                .await?
                .ok_or_else(|| AppError::NotFound("workspace not found".into()))?;
            if workspace.member_role(db, &by.id).await? != MemberRole::Admin {
                return Err(AppError::Auth(
                    "only the inviter or a workspace admin can revoke".into(),
                ));
            }
        }

        invitation.transition(db, InvitationStatus::Revoked).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> (SurrealDbClient, User, User, Workspace) {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");
        db.ensure_initialized(3)
            .await
            .expect("Failed to initialize schema");

        let admin = User::create_new("admin".to_string(), "hash".to_string(), &db)
            .await
            .expect("create admin");
        let invitee = User::create_new("invitee".to_string(), "hash".to_string(), &db)
            .await
            .expect("create invitee");
        let workspace = Workspace::create(&db, &admin, "Research")
            .await
            .expect("create workspace");

        (db, admin, invitee, workspace)
    }

    #[tokio::test]
    async fn test_accept_grants_membership() {
        let (db, admin, invitee, workspace) = setup().await;

        let invitation = Invitation::create(
            &db,
            &admin,
            &workspace,
            &invitee.id,
            WorkspaceRole::Subuser,
            chrono::Duration::days(7),
        )
        .await
        .expect("create invitation");

        let accepted = Invitation::accept(&db, &invitation.id, &invitee)
            .await
            .expect("accept");
        assert_eq!(accepted.status, InvitationStatus::Accepted);

        assert_eq!(
            workspace
                .member_role(&db, &invitee.id)
                .await
                .expect("role"),
            MemberRole::Subuser
        );
    }

    #[tokio::test]
    async fn test_non_admin_cannot_invite() {
        let (db, _admin, invitee, workspace) = setup().await;

        let outsider = User::create_new("outsider".to_string(), "hash".to_string(), &db)
            .await
            .expect("create outsider");

        let result = Invitation::create(
            &db,
            &outsider,
            &workspace,
            &invitee.id,
            WorkspaceRole::Subuser,
            chrono::Duration::days(7),
        )
        .await;

        assert!(matches!(result, Err(AppError::Auth(_))));
    }

    #[tokio::test]
    async fn test_accept_by_non_invitee_fails() {
        let (db, admin, invitee, workspace) = setup().await;

        let invitation = Invitation::create(
            &db,
            &admin,
            &workspace,
            &invitee.id,
            WorkspaceRole::Subuser,
            chrono::Duration::days(7),
        )
        .await
        .expect("create invitation");

        let impostor = User::create_new("impostor".to_string(), "hash".to_string(), &db)
            .await
            .expect("create impostor");

        let result = Invitation::accept(&db, &invitation.id, &impostor).await;
        assert!(matches!(result, Err(AppError::Auth(_))));
    }

    #[tokio::test]
    async fn test_terminal_states_are_immutable() {
        let (db, admin, invitee, workspace) = setup().await;

        let invitation = Invitation::create(
            &db,
            &admin,
            &workspace,
            &invitee.id,
            WorkspaceRole::Subuser,
            chrono::Duration::days(7),
        )
        .await
        .expect("create invitation");

        Invitation::decline(&db, &invitation.id, &invitee)
            .await
            .expect("decline");

        let accept_after = Invitation::accept(&db, &invitation.id, &invitee).await;
        assert!(matches!(accept_after, Err(AppError::Conflict(_))));

        let revoke_after = Invitation::revoke(&db, &invitation.id, &admin).await;
        assert!(matches!(revoke_after, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_expired_invitation_cannot_be_accepted() {
        let (db, admin, invitee, workspace) = setup().await;

        let invitation = Invitation::create(
            &db,
            &admin,
            &workspace,
            &invitee.id,
            WorkspaceRole::Subuser,
            chrono::Duration::seconds(-1),
        )
        .await
        .expect("create invitation");

        let result = Invitation::accept(&db, &invitation.id, &invitee).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }
}
