use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use uuid::Uuid;

use super::memory_node::{MemoryNode, NodeKind};

stored_object!(User, "user", {
    name: String,
    pw_hash: String,
    #[serde(default)]
    anonymous: bool,
    api_key: Option<String>,
    #[serde(default)]
    admin: bool,
    node_id: String
});

impl User {
    /// The private namespace owned by this user.
    pub fn namespace(&self) -> String {
        format!("user_{}", self.id)
    }

    pub fn principal(&self) -> String {
        format!("user:{}", self.id)
    }

    /// Create a user together with its User node inside a fresh
    /// `user_<id>` namespace. The transport supplies the password hash.
    pub async fn create_new(
        name: String,
        pw_hash: String,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        if name.trim().is_empty() {
            return Err(AppError::Validation("user name must not be empty".into()));
        }

        let id = Uuid::new_v4().to_string();
        let namespace = format!("user_{id}");

        let node = MemoryNode::new(
            namespace,
            name.clone(),
            NodeKind::User,
            format!("Account owner {name}"),
            id.clone(),
        );
        let node_id = node.id.clone();
        db.store_item(node).await?;

        let now = Utc::now();
        let user = Self {
            id,
            created_at: now,
            updated_at: now,
            name,
            pw_hash,
            anonymous: false,
            api_key: Some(Uuid::new_v4().to_string()),
            admin: false,
            node_id,
        };

        let stored = db
            .store_item(user)
            .await?
            .ok_or_else(|| AppError::StoreReject("user insert returned nothing".into()))?;

        Ok(stored)
    }

    pub async fn find_by_api_key(
        api_key: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut result = db
            .client
            .query("SELECT * FROM type::table($table) WHERE api_key = $api_key LIMIT 1")
            .bind(("table", Self::table_name()))
            .bind(("api_key", api_key.to_owned()))
            .await?;

        let users: Vec<Self> = result.take(0)?;
        Ok(users.into_iter().next())
    }

    pub async fn set_admin(db: &SurrealDbClient, id: &str, admin: bool) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing($table, $id)
                 SET admin = $admin, updated_at = time::now()",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_owned()))
            .bind(("admin", admin))
            .await?
            .check()?;
        Ok(())
    }
}
