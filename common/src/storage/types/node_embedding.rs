use surrealdb::RecordId;

use crate::{
    error::AppError,
    storage::db::SurrealDbClient,
    storage::types::memory_node::{ensure_namespace, MemoryNode, MemoryNodeVectorResult},
    stored_object,
};

stored_object!(NodeEmbedding, "node_embedding", {
    node_id: RecordId,
    /// Denormalized tenant scope for query filtering
    namespace: String,
    embedding: Vec<f32>
});

impl NodeEmbedding {
    /// Embedding rows reuse the node key so one upsert per node is natural.
    pub fn new(node_id: &str, namespace: String, embedding: Vec<f32>) -> Self {
        let now = Utc::now();
        Self {
            id: node_id.to_string(),
            created_at: now,
            updated_at: now,
            node_id: RecordId::from_table_key(MemoryNode::table_name(), node_id),
            namespace,
            embedding,
        }
    }

    /// Insert or replace the embedding for a node.
    pub async fn upsert(self, db: &SurrealDbClient) -> Result<(), AppError> {
        ensure_namespace(&self.namespace)?;

        db.client
            .query(
                "UPSERT type::thing($table, $id) SET
                     node_id = $node_id,
                     namespace = $namespace,
                     embedding = $embedding,
                     created_at = IF created_at != NONE THEN created_at ELSE time::now() END,
                     updated_at = time::now()",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("node_id", self.node_id))
            .bind(("namespace", self.namespace))
            .bind(("embedding", self.embedding))
            .await?
            .check()?;

        Ok(())
    }

    pub async fn remove(
        db: &SurrealDbClient,
        namespace: &str,
        node_id: &str,
    ) -> Result<(), AppError> {
        ensure_namespace(namespace)?;

        let rid = RecordId::from_table_key(MemoryNode::table_name(), node_id);
        db.client
            .query("DELETE FROM node_embedding WHERE node_id = $node_id AND namespace = $namespace")
            .bind(("node_id", rid))
            .bind(("namespace", namespace.to_owned()))
            .await?
            .check()?;

        Ok(())
    }

    pub async fn get_by_node_id(
        db: &SurrealDbClient,
        node_id: &str,
    ) -> Result<Option<Self>, AppError> {
        let rid = RecordId::from_table_key(MemoryNode::table_name(), node_id);
        let mut response = db
            .client
            .query("SELECT * FROM type::table($table) WHERE node_id = $node_id LIMIT 1")
            .bind(("table", Self::table_name()))
            .bind(("node_id", rid))
            .await?;
        let rows: Vec<Self> = response.take(0)?;
        Ok(rows.into_iter().next())
    }

    /// Approximate nearest neighbours within one namespace, hydrating the
    /// node rows. Scores are cosine similarity; results below `min_score`
    /// and superseded nodes are dropped.
    pub async fn search(
        db: &SurrealDbClient,
        namespace: &str,
        query_embedding: Vec<f32>,
        k: usize,
        min_score: f32,
    ) -> Result<Vec<MemoryNodeVectorResult>, AppError> {
        ensure_namespace(namespace)?;

        #[derive(Deserialize)]
        struct Row {
            node_id: MemoryNode,
            score: f32,
        }

        let sql = format!(
            r#"
            SELECT
                node_id,
                vector::similarity::cosine(embedding, $embedding) AS score
            FROM {emb_table}
            WHERE namespace = $namespace
              AND embedding <|{k},100|> $embedding
            ORDER BY score DESC
            LIMIT {k}
            FETCH node_id;
            "#,
            emb_table = Self::table_name(),
            k = k
        );

        let mut response = db
            .query(&sql)
            .bind(("embedding", query_embedding))
            .bind(("namespace", namespace.to_owned()))
            .await
            .map_err(AppError::Database)?;

        response = response.check().map_err(AppError::Database)?;

        let rows: Vec<Row> = response.take::<Vec<Row>>(0).map_err(AppError::Database)?;

        Ok(rows
            .into_iter()
            .filter(|r| r.score >= min_score && r.node_id.superseded_by.is_none())
            .map(|r| MemoryNodeVectorResult {
                node: r.node_id,
                score: r.score,
            })
            .collect())
    }
}
