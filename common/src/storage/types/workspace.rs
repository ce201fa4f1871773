use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use uuid::Uuid;

use super::memory_edge::{edge_kind, MemoryEdge};
use super::memory_node::{MemoryNode, NodeKind};
use super::user::User;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceRole {
    Admin,
    Subuser,
}

impl WorkspaceRole {
    pub fn edge_kind(&self) -> &'static str {
        match self {
            WorkspaceRole::Admin => edge_kind::HAS_ADMIN,
            WorkspaceRole::Subuser => edge_kind::HAS_MEMBER,
        }
    }
}

/// The canonical membership probe answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRole {
    None,
    Subuser,
    Admin,
}

stored_object!(Workspace, "workspace", {
    name: String,
    namespace: String,
    owner_id: String,
    node_id: String
});

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WorkspaceMember {
    pub user_id: String,
    pub role: WorkspaceRole,
}

impl Workspace {
    /// Create a workspace: a fresh `group_<id>` namespace, a Workspace node
    /// inside it, and a weight-1.0 `has_admin` edge for the owner.
    pub async fn create(
        db: &SurrealDbClient,
        owner: &User,
        name: &str,
    ) -> Result<Self, AppError> {
        if name.trim().is_empty() {
            return Err(AppError::Validation(
                "workspace name must not be empty".into(),
            ));
        }

        let id = Uuid::new_v4().to_string();
        let namespace = format!("group_{id}");

        let node = MemoryNode::new(
            namespace.clone(),
            name.to_string(),
            NodeKind::Workspace,
            format!("Shared workspace {name}"),
            owner.id.clone(),
        );
        let node_id = node.id.clone();
        db.store_item(node).await?;

        let now = Utc::now();
        let workspace = Self {
            id,
            created_at: now,
            updated_at: now,
            name: name.to_string(),
            namespace,
            owner_id: owner.id.clone(),
            node_id,
        };
        let workspace = db
            .store_item(workspace)
            .await?
            .ok_or_else(|| AppError::StoreReject("workspace insert returned nothing".into()))?;

        workspace
            .add_member(db, owner, WorkspaceRole::Admin)
            .await?;

        Ok(workspace)
    }

    /// Grant (or change) membership. The membership edge runs from the
    /// workspace node to the member's user node; `source_id` records the
    /// member's user id so probes don't need to resolve node ids.
    pub async fn add_member(
        &self,
        db: &SurrealDbClient,
        user: &User,
        role: WorkspaceRole,
    ) -> Result<(), AppError> {
        self.remove_member(db, &user.id).await?;

        MemoryEdge::new(
            self.node_id.clone(),
            user.node_id.clone(),
            role.edge_kind().to_string(),
            1.0,
            self.namespace.clone(),
            user.id.clone(),
        )
        .store(db)
        .await
    }

    pub async fn remove_member(&self, db: &SurrealDbClient, user_id: &str) -> Result<(), AppError> {
        db.client
            .query(
                "DELETE FROM relates_to
                 WHERE in = type::thing('memory_node', $node_id)
                   AND source_id = $user_id
                   AND kind IN $kinds",
            )
            .bind(("node_id", self.node_id.clone()))
            .bind(("user_id", user_id.to_owned()))
            .bind((
                "kinds",
                vec![
                    edge_kind::HAS_ADMIN.to_string(),
                    edge_kind::HAS_MEMBER.to_string(),
                ],
            ))
            .await?
            .check()?;
        Ok(())
    }

    /// The canonical membership probe.
    pub async fn member_role(
        &self,
        db: &SurrealDbClient,
        user_id: &str,
    ) -> Result<MemberRole, AppError> {
        #[derive(Deserialize)]
        struct Row {
            kind: String,
        }

        let mut response = db
            .client
            .query(
                "SELECT kind FROM relates_to
                 WHERE in = type::thing('memory_node', $node_id)
                   AND source_id = $user_id
                   AND kind IN $kinds
                 LIMIT 1",
            )
            .bind(("node_id", self.node_id.clone()))
            .bind(("user_id", user_id.to_owned()))
            .bind((
                "kinds",
                vec![
                    edge_kind::HAS_ADMIN.to_string(),
                    edge_kind::HAS_MEMBER.to_string(),
                ],
            ))
            .await?;

        let rows: Vec<Row> = response.take(0)?;
        Ok(match rows.first().map(|r| r.kind.as_str()) {
            Some(edge_kind::HAS_ADMIN) => MemberRole::Admin,
            Some(edge_kind::HAS_MEMBER) => MemberRole::Subuser,
            _ => MemberRole::None,
        })
    }

    pub async fn members(&self, db: &SurrealDbClient) -> Result<Vec<WorkspaceMember>, AppError> {
        #[derive(Deserialize)]
        struct Row {
            kind: String,
            source_id: String,
        }

        let mut response = db
            .client
            .query(
                "SELECT kind, source_id FROM relates_to
                 WHERE in = type::thing('memory_node', $node_id)
                   AND kind IN $kinds",
            )
            .bind(("node_id", self.node_id.clone()))
            .bind((
                "kinds",
                vec![
                    edge_kind::HAS_ADMIN.to_string(),
                    edge_kind::HAS_MEMBER.to_string(),
                ],
            ))
            .await?;

        let rows: Vec<Row> = response.take(0)?;
        Ok(rows
            .into_iter()
            .map(|r| WorkspaceMember {
                user_id: r.source_id,
                role: if r.kind == edge_kind::HAS_ADMIN {
                    WorkspaceRole::Admin
                } else {
                    WorkspaceRole::Subuser
                },
            })
            .collect())
    }

    /// Look up a workspace by the namespace string it owns.
    pub async fn find_by_namespace(
        db: &SurrealDbClient,
        namespace: &str,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .client
            .query("SELECT * FROM type::table($table) WHERE namespace = $namespace LIMIT 1")
            .bind(("table", Self::table_name()))
            .bind(("namespace", namespace.to_owned()))
            .await?;
        let rows: Vec<Self> = response.take(0)?;
        Ok(rows.into_iter().next())
    }
}
