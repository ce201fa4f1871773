//! Seed retrieval: full-text, recency, and vector searches fan out in
//! parallel and union into the seed set that spreading activation grows.

use std::collections::HashMap;
use std::time::Duration;

use futures::try_join;
use tracing::warn;

use common::error::AppError;
use common::storage::db::SurrealDbClient;
use common::storage::types::memory_node::MemoryNode;
use common::storage::types::node_embedding::NodeEmbedding;
use common::utils::config::KernelTuning;
use common::utils::embedding::EmbeddingProvider;

use crate::expansion::QueryExpansion;

/// The union of the three seed searches. `similarity` keeps the vector score
/// for nodes the embedding search surfaced.
#[derive(Debug, Default)]
pub struct SeedSet {
    pub nodes: Vec<MemoryNode>,
    pub similarity: HashMap<String, f32>,
}

impl SeedSet {
    pub fn ids(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.id.clone()).collect()
    }

    fn push_unique(&mut self, node: MemoryNode) {
        if !self.nodes.iter().any(|n| n.id == node.id) {
            self.nodes.push(node);
        }
    }
}

pub async fn collect_seeds(
    db: &SurrealDbClient,
    embedder: &EmbeddingProvider,
    namespace: &str,
    query: &str,
    expansion: &QueryExpansion,
    tuning: &KernelTuning,
    embedding_deadline: Duration,
) -> Result<SeedSet, AppError> {
    let terms = expansion.all_terms().join(" ");
    let fts_terms = if terms.is_empty() {
        query.to_string()
    } else {
        terms
    };

    // The vector leg degrades quietly when the embedder is unavailable; the
    // lexical legs still serve.
    let query_embedding = match embedder.embed(query, embedding_deadline).await {
        Ok(embedding) => Some(embedding),
        Err(err) => {
            warn!(error = %err, "query embedding failed; vector seeds skipped");
            None
        }
    };

    let vector_future = async {
        match &query_embedding {
            Some(embedding) => {
                NodeEmbedding::search(
                    db,
                    namespace,
                    embedding.clone(),
                    tuning.seed_vector_limit,
                    tuning.recall_min_score,
                )
                .await
            }
            None => Ok(Vec::new()),
        }
    };

    let (fts_nodes, recent_nodes, vector_hits) = try_join!(
        MemoryNode::fulltext_search(db, namespace, &fts_terms, tuning.seed_fts_limit),
        MemoryNode::recent(db, namespace, tuning.seed_recency_limit),
        vector_future,
    )?;

    let mut seeds = SeedSet::default();
    for node in fts_nodes {
        seeds.push_unique(node);
    }
    for node in recent_nodes {
        seeds.push_unique(node);
    }
    for hit in vector_hits {
        seeds.similarity.insert(hit.node.id.clone(), hit.score);
        seeds.push_unique(hit.node);
    }

    // Deterministic ordering for identical graph state
    seeds.nodes.sort_by(|a, b| a.id.cmp(&b.id));

    Ok(seeds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expansion::fallback_tokenize;
    use common::storage::types::memory_node::NodeKind;
    use uuid::Uuid;

    async fn setup() -> (SurrealDbClient, EmbeddingProvider) {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");
        let embedder = EmbeddingProvider::new_hashed(64);
        db.ensure_initialized(embedder.dimension())
            .await
            .expect("Failed to initialize schema");
        (db, embedder)
    }

    async fn store_with_embedding(
        db: &SurrealDbClient,
        embedder: &EmbeddingProvider,
        namespace: &str,
        name: &str,
        description: &str,
    ) -> String {
        let node = MemoryNode::new(
            namespace.to_string(),
            name.to_string(),
            NodeKind::Fact,
            description.to_string(),
            "src".to_string(),
        );
        let id = node.id.clone();
        let embedding = embedder
            .embed(description, Duration::from_secs(1))
            .await
            .expect("embed");
        MemoryNode::store_with_embedding(node, embedding, db)
            .await
            .expect("store");
        id
    }

    #[tokio::test]
    async fn test_seeds_union_all_three_searches() {
        let (db, embedder) = setup().await;

        let lexical = store_with_embedding(
            &db,
            &embedder,
            "user_a",
            "badge code",
            "The badge code is 4242",
        )
        .await;
        let semantic = store_with_embedding(
            &db,
            &embedder,
            "user_a",
            "entry pass",
            "Security credentials for the building",
        )
        .await;

        let query = "what is the badge code";
        let expansion = fallback_tokenize(query);
        let seeds = collect_seeds(
            &db,
            &embedder,
            "user_a",
            query,
            &expansion,
            &KernelTuning::default(),
            Duration::from_secs(1),
        )
        .await
        .expect("seeds");

        let ids = seeds.ids();
        assert!(ids.contains(&lexical));
        // Recency search picks up everything in a small namespace
        assert!(ids.contains(&semantic));
        // No duplicates despite overlapping searches
        let mut deduped = ids.clone();
        deduped.dedup();
        assert_eq!(ids.len(), deduped.len());
    }

    #[tokio::test]
    async fn test_seeds_are_namespace_scoped() {
        let (db, embedder) = setup().await;

        store_with_embedding(&db, &embedder, "user_a", "mine", "my private fact").await;
        store_with_embedding(&db, &embedder, "user_b", "theirs", "their private fact").await;

        let expansion = fallback_tokenize("private fact");
        let seeds = collect_seeds(
            &db,
            &embedder,
            "user_a",
            "private fact",
            &expansion,
            &KernelTuning::default(),
            Duration::from_secs(1),
        )
        .await
        .expect("seeds");

        assert!(!seeds.nodes.is_empty());
        assert!(seeds.nodes.iter().all(|n| n.namespace == "user_a"));
    }

    #[tokio::test]
    async fn test_vector_hits_carry_similarity_scores() {
        let (db, embedder) = setup().await;

        let id = store_with_embedding(
            &db,
            &embedder,
            "user_a",
            "coffee",
            "prefers espresso over filter coffee",
        )
        .await;

        let query = "prefers espresso over filter coffee";
        let expansion = fallback_tokenize(query);
        let seeds = collect_seeds(
            &db,
            &embedder,
            "user_a",
            query,
            &expansion,
            &KernelTuning::default(),
            Duration::from_secs(1),
        )
        .await
        .expect("seeds");

        let score = seeds.similarity.get(&id).copied().expect("similarity kept");
        assert!(score > 0.9, "identical text should score near 1.0");
    }
}
