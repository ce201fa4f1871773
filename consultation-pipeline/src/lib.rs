#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

//! The consultation engine: query expansion, hybrid seed retrieval,
//! spreading activation, policy filtering, ranking, and synthesis.

pub mod expansion;
pub mod scoring;
pub mod seeds;
pub mod spread;
pub mod synthesis;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use common::activation;
use common::error::AppError;
use common::policy::{action, PolicyEngine};
use common::storage::db::SurrealDbClient;
use common::storage::types::conversation::Conversation;
use common::storage::types::memory_node::{ensure_namespace, MemoryNode};
use common::utils::config::{DeadlineConfig, KernelTuning};
use common::utils::embedding::EmbeddingProvider;
use common::utils::llm::LanguageModel;

pub use expansion::{expand_query, fallback_tokenize, QueryExpansion};
pub use scoring::{rank_candidates, ScoredNode, Signals};
pub use seeds::{collect_seeds, SeedSet};
pub use spread::{spread_activation, ALLOWED_SPREAD_KINDS};
pub use synthesis::{compose_facts, synthesize, SynthesisResult};

/// The answer returned to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Consultation {
    pub answer: String,
    pub confidence: f32,
    pub retrieved_ids: Vec<String>,
    pub partial: bool,
}

pub struct ConsultationEngine {
    db: Arc<SurrealDbClient>,
    embedder: Arc<EmbeddingProvider>,
    llm: Arc<dyn LanguageModel>,
    policy: Arc<PolicyEngine>,
    tuning: KernelTuning,
    deadlines: DeadlineConfig,
}

impl ConsultationEngine {
    pub fn new(
        db: Arc<SurrealDbClient>,
        embedder: Arc<EmbeddingProvider>,
        llm: Arc<dyn LanguageModel>,
        policy: Arc<PolicyEngine>,
        tuning: KernelTuning,
        deadlines: DeadlineConfig,
    ) -> Self {
        Self {
            db,
            embedder,
            llm,
            policy,
            tuning,
            deadlines,
        }
    }

    /// Answer a query from the namespace's memory graph. `deadline` bounds
    /// the whole call; when it fires before synthesis the best context
    /// assembled so far is returned with `partial = true`.
    #[instrument(skip_all, fields(%principal, %namespace))]
    pub async fn consult(
        &self,
        principal: &str,
        namespace: &str,
        query: &str,
        conversation_id: Option<&str>,
        deadline: Duration,
    ) -> Result<Consultation, AppError> {
        ensure_namespace(namespace)?;
        let deadline_at = Instant::now() + deadline;

        let expansion_deadline =
            remaining(deadline_at).min(Duration::from_secs(self.deadlines.extraction_timeout_secs));
        let expansion = expand_query(&self.llm, query, expansion_deadline).await;

        let seeds = collect_seeds(
            &self.db,
            &self.embedder,
            namespace,
            query,
            &expansion,
            &self.tuning,
            remaining(deadline_at)
                .min(Duration::from_secs(self.deadlines.embedding_timeout_secs)),
        )
        .await?;

        debug!(seed_count = seeds.nodes.len(), "seed set assembled");

        let seed_activations: Vec<(String, f32)> = seeds
            .nodes
            .iter()
            .map(|n| (n.id.clone(), n.activation))
            .collect();
        let spread_scores = spread_activation(
            &self.db,
            namespace,
            &seed_activations,
            self.tuning.spread_gamma,
            self.tuning.spread_depth,
        )
        .await?;

        let seed_ids: HashSet<String> = seeds.nodes.iter().map(|n| n.id.clone()).collect();
        let discovered_ids: Vec<String> = {
            let mut ids: Vec<String> = spread_scores
                .keys()
                .filter(|id| !seed_ids.contains(*id))
                .cloned()
                .collect();
            ids.sort();
            ids
        };
        let discovered =
            MemoryNode::get_many_in_namespace(&self.db, &discovered_ids, namespace).await?;

        let mut candidates: Vec<ScoredNode> = Vec::new();
        for node in seeds.nodes {
            let signals = Signals {
                vector: seeds.similarity.get(&node.id).copied(),
                spread: spread_scores.get(&node.id).copied(),
            };
            candidates.push(ScoredNode {
                node,
                signals,
                score: 0.0,
            });
        }
        for node in discovered {
            let signals = Signals {
                vector: None,
                spread: spread_scores.get(&node.id).copied(),
            };
            candidates.push(ScoredNode {
                node,
                signals,
                score: 0.0,
            });
        }

        // Policy filter: a failed check drops only that candidate.
        let mut permitted = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let resource = format!("node:{}", candidate.node.id);
            match self
                .policy
                .check(principal, action::READ, &resource, &candidate.node.namespace)
                .await
            {
                Ok(decision) if decision.allowed => permitted.push(candidate),
                Ok(_) => {}
                Err(err) => {
                    warn!(error = %err, node = %candidate.node.id, "policy check failed; dropping candidate");
                }
            }
        }

        let ranked = rank_candidates(permitted, self.tuning.rank_alpha);
        let top: Vec<ScoredNode> = ranked
            .into_iter()
            .take(self.tuning.context_top_k)
            .collect();
        let retrieved_ids: Vec<String> = top.iter().map(|c| c.node.id.clone()).collect();

        let facts = compose_facts(&top);
        let prior_turn = self
            .prior_turn_summary(namespace, conversation_id)
            .await
            .unwrap_or(None);

        // Boost is best-effort and never blocks the response.
        {
            let db = Arc::clone(&self.db);
            let ids = retrieved_ids.clone();
            let amount = self.tuning.boost_amount;
            tokio::spawn(async move {
                if let Err(err) = activation::boost(&db, &ids, amount).await {
                    warn!(error = %err, "async activation boost failed");
                }
            });
        }

        if remaining(deadline_at).is_zero() {
            info!("deadline fired before synthesis; returning partial context");
            return Ok(Consultation {
                answer: synthesis::degraded_answer(&facts),
                confidence: 0.0,
                retrieved_ids,
                partial: true,
            });
        }

        let synthesis_deadline =
            remaining(deadline_at).min(Duration::from_secs(self.deadlines.synthesis_timeout_secs));
        let result = synthesize(
            &self.llm,
            query,
            &facts,
            prior_turn.as_deref(),
            synthesis_deadline,
        )
        .await;

        Ok(Consultation {
            answer: result.brief,
            confidence: result.confidence,
            retrieved_ids,
            partial: false,
        })
    }

    async fn prior_turn_summary(
        &self,
        namespace: &str,
        conversation_id: Option<&str>,
    ) -> Result<Option<String>, AppError> {
        let Some(conversation_id) = conversation_id else {
            return Ok(None);
        };

        let (_, turns) = Conversation::get_complete(conversation_id, namespace, &self.db).await?;
        Ok(turns.last().map(|turn| {
            let user: String = turn.user_text.chars().take(200).collect();
            let assistant: String = turn.assistant_text.chars().take(200).collect();
            format!("User: {user}\nAssistant: {assistant}")
        }))
    }
}

fn remaining(deadline_at: Instant) -> Duration {
    deadline_at.saturating_duration_since(Instant::now())
}
