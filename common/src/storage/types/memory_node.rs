use std::collections::HashMap;

use crate::{
    error::AppError, storage::db::SurrealDbClient,
    storage::types::node_embedding::NodeEmbedding, stored_object,
};
use uuid::Uuid;

/// Every node starts in the middle of the activation range so that a single
/// boost or a few decay ticks are both visible.
pub const DEFAULT_ACTIVATION: f32 = 0.5;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Entity,
    Fact,
    Event,
    Preference,
    Insight,
    Pattern,
    Conversation,
    User,
    Workspace,
    Document,
    Chunk,
    Summary,
}

impl NodeKind {
    pub fn variants() -> &'static [&'static str] {
        &[
            "Entity",
            "Fact",
            "Event",
            "Preference",
            "Insight",
            "Pattern",
            "Conversation",
            "User",
            "Workspace",
            "Document",
            "Chunk",
            "Summary",
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Entity => "Entity",
            NodeKind::Fact => "Fact",
            NodeKind::Event => "Event",
            NodeKind::Preference => "Preference",
            NodeKind::Insight => "Insight",
            NodeKind::Pattern => "Pattern",
            NodeKind::Conversation => "Conversation",
            NodeKind::User => "User",
            NodeKind::Workspace => "Workspace",
            NodeKind::Document => "Document",
            NodeKind::Chunk => "Chunk",
            NodeKind::Summary => "Summary",
        }
    }
}

impl From<String> for NodeKind {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "entity" => NodeKind::Entity,
            "fact" => NodeKind::Fact,
            "event" => NodeKind::Event,
            "preference" => NodeKind::Preference,
            "insight" => NodeKind::Insight,
            "pattern" => NodeKind::Pattern,
            "conversation" => NodeKind::Conversation,
            "user" => NodeKind::User,
            "workspace" => NodeKind::Workspace,
            "document" => NodeKind::Document,
            "chunk" => NodeKind::Chunk,
            "summary" => NodeKind::Summary,
            _ => NodeKind::Entity, // Default case
        }
    }
}

stored_object!(MemoryNode, "memory_node", {
    name: String,
    kind: NodeKind,
    description: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    attributes: HashMap<String, String>,
    namespace: String,
    activation: f32,
    #[serde(default)]
    access_count: u32,
    #[serde(
        serialize_with = "serialize_datetime",
        deserialize_with = "deserialize_datetime",
        default
    )]
    last_accessed: DateTime<Utc>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    last_decayed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    superseded_by: Option<String>,
    source_id: String
});

/// Vector search result including the hydrated node.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct MemoryNodeVectorResult {
    pub node: MemoryNode,
    pub score: f32,
}

/// Every read and write is namespace-scoped; an empty namespace means the
/// caller forgot the tenant filter.
pub fn ensure_namespace(namespace: &str) -> Result<(), AppError> {
    if namespace.trim().is_empty() {
        return Err(AppError::Validation(
            "query is missing a namespace filter".to_string(),
        ));
    }
    Ok(())
}

impl MemoryNode {
    pub fn new(
        namespace: String,
        name: String,
        kind: NodeKind,
        description: String,
        source_id: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            name,
            kind,
            description,
            tags: Vec::new(),
            attributes: HashMap::new(),
            namespace,
            activation: DEFAULT_ACTIVATION,
            access_count: 0,
            last_accessed: now,
            last_decayed_at: None,
            superseded_by: None,
            source_id,
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn is_active(&self) -> bool {
        self.superseded_by.is_none()
    }

    /// Find the active node matching the `(namespace, name, kind)` uniqueness key.
    pub async fn find_by_identity(
        db: &SurrealDbClient,
        namespace: &str,
        name: &str,
        kind: &NodeKind,
    ) -> Result<Option<Self>, AppError> {
        ensure_namespace(namespace)?;

        let mut response = db
            .client
            .query(
                "SELECT * FROM type::table($table)
                 WHERE namespace = $namespace AND name = $name AND kind = $kind
                   AND superseded_by IS NONE
                 LIMIT 1",
            )
            .bind(("table", Self::table_name()))
            .bind(("namespace", namespace.to_owned()))
            .bind(("name", name.to_owned()))
            .bind(("kind", *kind))
            .await?;

        let rows: Vec<Self> = response.take(0)?;
        Ok(rows.into_iter().next())
    }

    /// Insert keyed by `(namespace, name, kind)`. A duplicate insert returns
    /// the already stored node instead of creating a second one.
    pub async fn upsert(self, db: &SurrealDbClient) -> Result<Self, AppError> {
        ensure_namespace(&self.namespace)?;

        if let Some(existing) =
            Self::find_by_identity(db, &self.namespace, &self.name, &self.kind).await?
        {
            return Ok(existing);
        }

        let stored = db
            .store_item(self)
            .await?
            .ok_or_else(|| AppError::StoreReject("node insert returned nothing".to_string()))?;
        Ok(stored)
    }

    /// Atomically store a node and its embedding row.
    pub async fn store_with_embedding(
        node: MemoryNode,
        embedding: Vec<f32>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        ensure_namespace(&node.namespace)?;
        let emb = NodeEmbedding::new(&node.id, node.namespace.clone(), embedding);

        let query = format!(
            "
            BEGIN TRANSACTION;
              CREATE type::thing('{node_table}', $node_id) CONTENT $node;
              CREATE type::thing('{emb_table}', $emb_id) CONTENT $emb;
            COMMIT TRANSACTION;
            ",
            node_table = Self::table_name(),
            emb_table = NodeEmbedding::table_name(),
        );

        db.client
            .query(query)
            .bind(("node_id", node.id.clone()))
            .bind(("node", node))
            .bind(("emb_id", emb.id.clone()))
            .bind(("emb", emb))
            .await
            .map_err(AppError::Database)?
            .check()
            .map_err(AppError::Database)?;

        Ok(())
    }

    /// BM25 full-text match over name and description, restricted to one
    /// namespace, ordered by activation so hot memories surface first.
    pub async fn fulltext_search(
        db: &SurrealDbClient,
        namespace: &str,
        terms: &str,
        limit: usize,
    ) -> Result<Vec<Self>, AppError> {
        ensure_namespace(namespace)?;

        let sql = r#"
            SELECT * FROM memory_node
            WHERE
                (name @0@ $terms OR description @1@ $terms)
                AND namespace = $namespace
                AND superseded_by IS NONE
            ORDER BY activation DESC
            LIMIT $limit;
        "#;

        Ok(db
            .client
            .query(sql)
            .bind(("terms", terms.to_owned()))
            .bind(("namespace", namespace.to_owned()))
            .bind(("limit", limit))
            .await?
            .take(0)?)
    }

    /// Most recently created active nodes in a namespace.
    pub async fn recent(
        db: &SurrealDbClient,
        namespace: &str,
        limit: usize,
    ) -> Result<Vec<Self>, AppError> {
        ensure_namespace(namespace)?;

        Ok(db
            .client
            .query(
                "SELECT * FROM type::table($table)
                 WHERE namespace = $namespace AND superseded_by IS NONE
                 ORDER BY created_at DESC
                 LIMIT $limit",
            )
            .bind(("table", Self::table_name()))
            .bind(("namespace", namespace.to_owned()))
            .bind(("limit", limit))
            .await?
            .take(0)?)
    }

    pub async fn list(
        db: &SurrealDbClient,
        namespace: &str,
        kind: Option<NodeKind>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Self>, AppError> {
        ensure_namespace(namespace)?;

        let sql = match kind {
            Some(_) => {
                "SELECT * FROM type::table($table)
                 WHERE namespace = $namespace AND kind = $kind AND superseded_by IS NONE
                 ORDER BY created_at DESC LIMIT $limit START $offset"
            }
            None => {
                "SELECT * FROM type::table($table)
                 WHERE namespace = $namespace AND superseded_by IS NONE
                 ORDER BY created_at DESC LIMIT $limit START $offset"
            }
        };

        let mut query = db
            .client
            .query(sql)
            .bind(("table", Self::table_name()))
            .bind(("namespace", namespace.to_owned()))
            .bind(("limit", limit))
            .bind(("offset", offset));
        if let Some(kind) = kind {
            query = query.bind(("kind", kind));
        }

        Ok(query.await?.take(0)?)
    }

    /// Batch fetch of active nodes by id, restricted to one namespace.
    pub async fn get_many_in_namespace(
        db: &SurrealDbClient,
        ids: &[String],
        namespace: &str,
    ) -> Result<Vec<Self>, AppError> {
        ensure_namespace(namespace)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let things: Vec<surrealdb::sql::Thing> = ids
            .iter()
            .map(|id| surrealdb::sql::Thing::from((Self::table_name(), id.as_str())))
            .collect();

        Ok(db
            .client
            .query(
                "SELECT * FROM type::table($table)
                 WHERE id IN $ids AND namespace = $namespace AND superseded_by IS NONE",
            )
            .bind(("table", Self::table_name()))
            .bind(("ids", things))
            .bind(("namespace", namespace.to_owned()))
            .await?
            .take(0)?)
    }

    /// Fetch a node and verify it belongs to the requesting namespace.
    pub async fn get_in_namespace(
        db: &SurrealDbClient,
        id: &str,
        namespace: &str,
    ) -> Result<Self, AppError> {
        ensure_namespace(namespace)?;

        let node: Self = db
            .get_item(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("node {id} not found")))?;

        if node.namespace != namespace {
            return Err(AppError::NotFound(format!("node {id} not found")));
        }

        Ok(node)
    }

    /// Mark `loser_id` superseded by `winner_id`. The losing node is kept
    /// until the retention window expires so audits can replay the decision.
    pub async fn mark_superseded(
        db: &SurrealDbClient,
        loser_id: &str,
        winner_id: &str,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing($table, $id)
                 SET superseded_by = $winner, updated_at = time::now()",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", loser_id.to_owned()))
            .bind(("winner", winner_id.to_owned()))
            .await?
            .check()?;

        Ok(())
    }

    /// Drop superseded nodes (and their embeddings) older than the retention window.
    pub async fn purge_superseded(
        db: &SurrealDbClient,
        retention_days: i64,
    ) -> Result<(), AppError> {
        let cutoff = Utc::now() - chrono::Duration::days(retention_days);

        db.client
            .query(
                "BEGIN TRANSACTION;
                 LET $stale = (SELECT VALUE id FROM memory_node
                     WHERE superseded_by IS NOT NONE AND updated_at < $cutoff);
                 DELETE node_embedding WHERE node_id IN $stale;
                 DELETE memory_node WHERE id IN $stale;
                 COMMIT TRANSACTION;",
            )
            .bind(("cutoff", surrealdb::Datetime::from(cutoff)))
            .await?
            .check()?;

        Ok(())
    }

    /// Delete a node after verifying the namespace. Edges referencing it are
    /// removed alongside to keep traversals from dangling.
    pub async fn delete_in_namespace(
        db: &SurrealDbClient,
        id: &str,
        namespace: &str,
    ) -> Result<(), AppError> {
        let node = Self::get_in_namespace(db, id, namespace).await?;

        db.client
            .query(
                "BEGIN TRANSACTION;
                 DELETE relates_to WHERE in = type::thing('memory_node', $id)
                     OR out = type::thing('memory_node', $id);
                 DELETE node_embedding WHERE node_id = type::thing('memory_node', $id);
                 DELETE type::thing('memory_node', $id);
                 COMMIT TRANSACTION;",
            )
            .bind(("id", node.id))
            .await?
            .check()?;

        Ok(())
    }
}
