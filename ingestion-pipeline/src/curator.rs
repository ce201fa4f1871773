//! The decision layer between extraction and storage: semantic dedup,
//! merging, and contradiction resolution.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use common::error::AppError;
use common::storage::db::SurrealDbClient;
use common::storage::types::memory_edge::{edge_kind, MemoryEdge};
use common::storage::types::memory_node::{MemoryNode, NodeKind};
use common::storage::types::node_embedding::NodeEmbedding;
use common::utils::config::KernelTuning;
use common::utils::embedding::EmbeddingProvider;
use common::utils::llm::LanguageModel;

use crate::extractor::EntityDraft;

/// Case-fold, collapse whitespace, and strip terminal punctuation.
pub fn canonicalize_name(name: &str) -> String {
    let folded = name.to_lowercase();
    let collapsed = folded.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_end_matches(['.', ',', '!', '?', ';', ':'])
        .to_string()
}

/// Names refer to the same thing when they match canonically or one is a
/// clear substring/superset of the other.
pub fn names_equivalent(a: &str, b: &str) -> bool {
    let a = canonicalize_name(a);
    let b = canonicalize_name(b);
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b {
        return true;
    }
    (a.len() >= 3 && b.len() >= 3) && (a.contains(&b) || b.contains(&a))
}

#[derive(Debug)]
pub enum CurationOutcome {
    Created { node: MemoryNode },
    Merged { node: MemoryNode },
    Superseded { winner: MemoryNode, loser_id: String },
}

impl CurationOutcome {
    pub fn node(&self) -> &MemoryNode {
        match self {
            CurationOutcome::Created { node }
            | CurationOutcome::Merged { node }
            | CurationOutcome::Superseded { winner: node, .. } => node,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ContradictionCheck {
    contradicts: bool,
}

#[derive(Debug, Deserialize)]
struct ResolutionVerdict {
    winner_index: u8,
}

#[derive(Debug, Deserialize)]
struct DescriptionPreference {
    prefer_newer: bool,
}

pub struct Curator {
    db: Arc<SurrealDbClient>,
    embedder: Arc<EmbeddingProvider>,
    llm: Arc<dyn LanguageModel>,
    tuning: KernelTuning,
    llm_deadline: Duration,
    embedding_deadline: Duration,
}

impl Curator {
    pub fn new(
        db: Arc<SurrealDbClient>,
        embedder: Arc<EmbeddingProvider>,
        llm: Arc<dyn LanguageModel>,
        tuning: KernelTuning,
        llm_deadline: Duration,
        embedding_deadline: Duration,
    ) -> Self {
        Self {
            db,
            embedder,
            llm,
            tuning,
            llm_deadline,
            embedding_deadline,
        }
    }

    fn embedding_input(name: &str, description: &str, kind: &NodeKind) -> String {
        format!("name: {name}, description: {description}, kind: {kind:?}")
    }

    /// Run one draft through candidate search, merge/contradiction decisions,
    /// and storage. Every path leaves the namespace with exactly one active
    /// node for the draft's identity.
    pub async fn curate(
        &self,
        namespace: &str,
        source_id: &str,
        draft: &EntityDraft,
    ) -> Result<CurationOutcome, AppError> {
        let embedding = self
            .embedder
            .embed(
                &Self::embedding_input(&draft.name, &draft.description, &draft.kind),
                self.embedding_deadline,
            )
            .await?;

        let candidates = NodeEmbedding::search(
            &self.db,
            namespace,
            embedding.clone(),
            self.tuning.candidate_k,
            self.tuning.candidate_min_score,
        )
        .await?;

        // Same identity requires clearing the strong-similarity merge gate
        // on top of the recall gate the candidate search applied; a name
        // match alone can be two different referents.
        let identity_match = candidates.iter().find(|c| {
            c.score >= self.tuning.dedup_threshold
                && c.node.kind == draft.kind
                && names_equivalent(&c.node.name, &draft.name)
        });

        let Some(candidate) = identity_match else {
            let node = self
                .create_new(namespace, source_id, draft, embedding)
                .await?;
            return Ok(CurationOutcome::Created { node });
        };
        let candidate = candidate.node.clone();

        if self.detect_contradiction(&candidate, draft).await {
            return self
                .resolve_contradiction(namespace, source_id, candidate, draft)
                .await;
        }

        let merged = self.merge(candidate, draft).await?;
        Ok(CurationOutcome::Merged { node: merged })
    }

    /// Store a fresh node with its embedding. Also the fallback when any
    /// curation step errors: a draft is never dropped silently.
    pub async fn create_new(
        &self,
        namespace: &str,
        source_id: &str,
        draft: &EntityDraft,
        embedding: Vec<f32>,
    ) -> Result<MemoryNode, AppError> {
        let node = MemoryNode::new(
            namespace.to_string(),
            draft.name.clone(),
            draft.kind,
            draft.description.clone(),
            source_id.to_string(),
        )
        .with_tags(draft.tags.clone());

        MemoryNode::store_with_embedding(node.clone(), embedding, &self.db).await?;
        Ok(node)
    }

    async fn detect_contradiction(&self, candidate: &MemoryNode, draft: &EntityDraft) -> bool {
        if candidate.description.trim().is_empty() || draft.description.trim().is_empty() {
            return false;
        }
        if canonicalize_name(&candidate.description) == canonicalize_name(&draft.description) {
            return false;
        }

        let prompt = format!(
            r#"Two statements describe the same subject "{name}".

Statement 1: {existing}
Statement 2: {incoming}

Do the statements contradict each other (state mutually exclusive facts)?
Return JSON: {{"contradicts": true or false}}"#,
            name = draft.name,
            existing = candidate.description,
            incoming = draft.description,
        );

        match self.llm.extract_json(&prompt, self.llm_deadline).await {
            Ok(value) => serde_json::from_value::<ContradictionCheck>(value)
                .map(|c| c.contradicts)
                .unwrap_or(false),
            Err(err) => {
                warn!(error = %err, "contradiction check failed; treating as compatible");
                false
            }
        }
    }

    /// Ask which of two same-named facts stays current; when the model
    /// abstains or fails, the newer `created_at` wins.
    async fn resolve_contradiction(
        &self,
        namespace: &str,
        source_id: &str,
        candidate: MemoryNode,
        draft: &EntityDraft,
    ) -> Result<CurationOutcome, AppError> {
        let prompt = format!(
            r#"You are a fact verification expert. Two facts appear to contradict each other.

Fact 1:
- Name: {existing_name}
- Description: {existing_desc}
- Created: {existing_created}

Fact 2:
- Name: {new_name}
- Description: {new_desc}
- Created: {new_created}

Determine which fact should be kept as current. Consider:
1. More recent information usually supersedes older
2. More specific information is more reliable
3. Direct statements override implications

Return JSON:
{{"winner_index": 1 or 2, "reason": "brief explanation"}}"#,
            existing_name = candidate.name,
            existing_desc = candidate.description,
            existing_created = candidate.created_at,
            new_name = draft.name,
            new_desc = draft.description,
            new_created = chrono::Utc::now(),
        );

        let winner_index = match self.llm.extract_json(&prompt, self.llm_deadline).await {
            Ok(value) => serde_json::from_value::<ResolutionVerdict>(value)
                .map(|v| v.winner_index)
                .unwrap_or(2),
            Err(err) => {
                warn!(error = %err, "contradiction resolution failed; newer fact wins");
                2
            }
        };

        if winner_index == 1 {
            // Existing fact stands; the draft is stored superseded for audit.
            let mut loser = MemoryNode::new(
                namespace.to_string(),
                draft.name.clone(),
                draft.kind,
                draft.description.clone(),
                source_id.to_string(),
            )
            .with_tags(draft.tags.clone());
            loser.superseded_by = Some(candidate.id.clone());
            let loser_id = loser.id.clone();
            self.db.store_item(loser).await?;

            MemoryEdge::new(
                candidate.id.clone(),
                loser_id.clone(),
                edge_kind::SUPERSEDES.to_string(),
                1.0,
                namespace.to_string(),
                source_id.to_string(),
            )
            .store(&self.db)
            .await?;

            debug!(winner = %candidate.id, "existing fact retained over contradicting draft");
            return Ok(CurationOutcome::Superseded {
                winner: candidate,
                loser_id,
            });
        }

        let embedding = self
            .embedder
            .embed(
                &Self::embedding_input(&draft.name, &draft.description, &draft.kind),
                self.embedding_deadline,
            )
            .await?;
        let winner = self
            .create_new(namespace, source_id, draft, embedding)
            .await?;

        MemoryNode::mark_superseded(&self.db, &candidate.id, &winner.id).await?;
        MemoryEdge::new(
            winner.id.clone(),
            candidate.id.clone(),
            edge_kind::SUPERSEDES.to_string(),
            1.0,
            namespace.to_string(),
            source_id.to_string(),
        )
        .store(&self.db)
        .await?;

        debug!(winner = %winner.id, loser = %candidate.id, "contradicting fact superseded");
        Ok(CurationOutcome::Superseded {
            winner,
            loser_id: candidate.id,
        })
    }

    /// Merge a draft into an existing node: union tags, pick the better
    /// description, bump the merge counter, refresh the embedding.
    async fn merge(
        &self,
        mut candidate: MemoryNode,
        draft: &EntityDraft,
    ) -> Result<MemoryNode, AppError> {
        for tag in &draft.tags {
            if !candidate.tags.contains(tag) {
                candidate.tags.push(tag.clone());
            }
        }

        let use_newer = if draft.description.len() > candidate.description.len() {
            true
        } else if draft.description.trim().is_empty()
            || draft.description == candidate.description
        {
            false
        } else {
            self.prefer_newer_description(&candidate.description, &draft.description)
                .await
        };
        if use_newer {
            candidate.description = draft.description.clone();
        }

        let merge_count = candidate
            .attributes
            .get("merge_count")
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(0)
            + 1;
        candidate
            .attributes
            .insert("merge_count".to_string(), merge_count.to_string());
        candidate.updated_at = chrono::Utc::now();

        self.db.update_item(candidate.clone()).await?;

        let embedding = self
            .embedder
            .embed(
                &Self::embedding_input(&candidate.name, &candidate.description, &candidate.kind),
                self.embedding_deadline,
            )
            .await?;
        NodeEmbedding::new(&candidate.id, candidate.namespace.clone(), embedding)
            .upsert(&self.db)
            .await?;

        debug!(node = %candidate.id, merge_count, "merged draft into existing node");
        Ok(candidate)
    }

    async fn prefer_newer_description(&self, existing: &str, incoming: &str) -> bool {
        let prompt = format!(
            r#"Two descriptions of the same entity. Which should be kept?

Existing: {existing}
Newer: {incoming}

Return JSON: {{"prefer_newer": true or false}}"#
        );

        match self.llm.extract_json(&prompt, self.llm_deadline).await {
            Ok(value) => serde_json::from_value::<DescriptionPreference>(value)
                .map(|p| p.prefer_newer)
                .unwrap_or(false),
            Err(_) => false,
        }
    }
}
