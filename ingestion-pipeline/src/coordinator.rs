//! Orchestrates one ingestion job through
//! `NEW -> CHUNKED -> EXTRACTED -> CURATED -> INDEXED -> DONE`, with a
//! bounded queue in front and per-namespace serialization around the
//! curation and indexing stages.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tracing::{debug, info, instrument, warn};

use common::error::AppError;
use common::storage::db::SurrealDbClient;
use common::storage::types::conversation::Conversation;
use common::storage::types::ingestion_job::{
    IngestionJob, IngestionPayload, IngestionStats, JobStatus,
};
use common::storage::types::memory_edge::{edge_kind, MemoryEdge, DEFAULT_EDGE_WEIGHT};
use common::storage::types::memory_node::{MemoryNode, NodeKind};
use common::storage::types::turn::Turn;
use common::utils::config::{DeadlineConfig, KernelTuning};
use common::utils::embedding::EmbeddingProvider;
use common::utils::file_validation::validate_upload;
use common::utils::llm::LanguageModel;

use crate::chunker::{Chunker, ChunkerConfig};
use crate::curator::{canonicalize_name, CurationOutcome, Curator};
use crate::extractor::{EntityDraft, Extractor};
use crate::vision_tree::{build_tree, VectorTree};

/// What a finished job hands back to a waiting caller: the counters plus
/// the artifacts the transport surfaces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobOutcome {
    pub stats: IngestionStats,
    pub conversation_id: Option<String>,
    pub entity_ids: Vec<String>,
    pub chunk_texts: Vec<String>,
    pub vector_tree: Option<VectorTree>,
}

/// A job travelling through the queue, optionally carrying a completion
/// channel for callers that await the DONE acknowledgment.
pub struct QueuedJob {
    pub job: IngestionJob,
    pub done: Option<oneshot::Sender<Result<JobOutcome, String>>>,
}

pub type JobReceiver = mpsc::Receiver<QueuedJob>;

pub struct IngestionCoordinator {
    db: Arc<SurrealDbClient>,
    extractor: Extractor,
    curator: Curator,
    embedder: Arc<EmbeddingProvider>,
    tuning: KernelTuning,
    embedding_deadline: Duration,
    tx: mpsc::Sender<QueuedJob>,
    namespace_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl IngestionCoordinator {
    pub fn new(
        db: Arc<SurrealDbClient>,
        embedder: Arc<EmbeddingProvider>,
        llm: Arc<dyn LanguageModel>,
        tuning: KernelTuning,
        deadlines: DeadlineConfig,
    ) -> (Arc<Self>, JobReceiver) {
        let (tx, rx) = mpsc::channel(tuning.ingestion_queue_capacity.max(1));

        let extraction_deadline = Duration::from_secs(deadlines.extraction_timeout_secs);
        let embedding_deadline = Duration::from_secs(deadlines.embedding_timeout_secs);

        let extractor = Extractor::new(Arc::clone(&llm), extraction_deadline);
        let curator = Curator::new(
            Arc::clone(&db),
            Arc::clone(&embedder),
            llm,
            tuning.clone(),
            extraction_deadline,
            embedding_deadline,
        );

        let coordinator = Arc::new(Self {
            db,
            extractor,
            curator,
            embedder,
            tuning,
            embedding_deadline,
            tx,
            namespace_locks: Mutex::new(HashMap::new()),
        });

        (coordinator, rx)
    }

    fn namespace_lock(&self, namespace: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .namespace_locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(
            locks
                .entry(namespace.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    async fn push(&self, queued: QueuedJob) -> Result<(), AppError> {
        let job_row = queued.job.clone();
        self.db.store_item(job_row).await?;

        match self.tx.try_send(queued) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(rejected)) => {
                let _removed: Option<IngestionJob> =
                    self.db.delete_item(&rejected.job.id).await?;
                Err(AppError::Overloaded(
                    "ingestion queue is full; retry later".into(),
                ))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(AppError::InternalError(
                "ingestion queue is closed".into(),
            )),
        }
    }

    /// Fire-and-forget enqueue. Fails immediately with `Overloaded` when the
    /// queue is full; the caller decides whether to retry.
    pub async fn enqueue(&self, job: IngestionJob) -> Result<String, AppError> {
        let job_id = job.id.clone();
        self.push(QueuedJob { job, done: None }).await?;
        Ok(job_id)
    }

    /// Enqueue and await the DONE acknowledgment, which makes this turn's
    /// writes visible to the caller's next consultation.
    pub async fn enqueue_and_wait(&self, job: IngestionJob) -> Result<JobOutcome, AppError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.push(QueuedJob {
            job,
            done: Some(done_tx),
        })
        .await?;

        match done_rx.await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(reason)) => Err(AppError::Processing(reason)),
            Err(_) => Err(AppError::InternalError(
                "ingestion worker dropped the job".into(),
            )),
        }
    }

    /// Process a queued job and deliver its completion signal.
    pub async fn process_queued(self: &Arc<Self>, queued: QueuedJob) {
        let job_id = queued.job.id.clone();
        let result = self.process_job(queued.job).await;

        if let Err(err) = &result {
            warn!(%job_id, error = %err, "ingestion job failed");
        }

        if let Some(done) = queued.done {
            let _ = done.send(result.map_err(|e| e.to_string()));
        }
    }

    #[instrument(skip_all, fields(job_id = %job.id, namespace = %job.namespace))]
    pub async fn process_job(&self, job: IngestionJob) -> Result<JobOutcome, AppError> {
        let job_id = job.id.clone();
        let mut outcome = JobOutcome::default();

        let result = self.drive(&job, &mut outcome).await;

        match result {
            Ok(()) => {
                IngestionJob::record_result(&job_id, JobStatus::Done, &outcome.stats, &self.db)
                    .await?;
                info!(
                    chunks = outcome.stats.chunks,
                    drafts = outcome.stats.drafts,
                    created = outcome.stats.created,
                    merged = outcome.stats.merged,
                    superseded = outcome.stats.superseded,
                    "ingestion job finished"
                );
                Ok(outcome)
            }
            Err(err) => {
                // Partial writes roll forward; the job records how far it got.
                let reason = err.to_string();
                IngestionJob::record_result(
                    &job_id,
                    JobStatus::Failed(reason.clone()),
                    &outcome.stats,
                    &self.db,
                )
                .await?;
                Err(err)
            }
        }
    }

    async fn drive(&self, job: &IngestionJob, outcome: &mut JobOutcome) -> Result<(), AppError> {
        match &job.payload {
            IngestionPayload::ConversationTurn {
                user_text,
                assistant_text,
                conversation_id,
            } => {
                self.ingest_turn(
                    job,
                    user_text,
                    assistant_text,
                    conversation_id.as_deref(),
                    outcome,
                )
                .await
            }
            IngestionPayload::DocumentText {
                text,
                filename,
                math_mode,
            } => {
                self.ingest_document(job, text, filename.as_deref(), *math_mode, outcome)
                    .await
            }
            IngestionPayload::DocumentBlob {
                content_base64,
                filename,
                document_type,
            } => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(content_base64)
                    .map_err(|e| AppError::Validation(format!("invalid base64 payload: {e}")))?;
                let upload = validate_upload(filename, &bytes)?;

                if document_type == "pdf" || upload.extension == "pdf" {
                    // PDF parsing is an upstream concern; the kernel ingests
                    // extracted text only.
                    return Err(AppError::Validation(
                        "pdf uploads must be converted to text before ingestion".into(),
                    ));
                }

                let text = String::from_utf8(bytes)
                    .map_err(|_| AppError::Validation("upload is not valid UTF-8 text".into()))?;
                self.ingest_document(job, &text, Some(&upload.filename), false, outcome)
                    .await
            }
        }
    }

    async fn ingest_turn(
        &self,
        job: &IngestionJob,
        user_text: &str,
        assistant_text: &str,
        conversation_id: Option<&str>,
        outcome: &mut JobOutcome,
    ) -> Result<(), AppError> {
        if user_text.trim().is_empty() && assistant_text.trim().is_empty() {
            return Ok(());
        }

        outcome.stats.chunks = 1;
        IngestionJob::update_status(&job.id, JobStatus::Chunked, &self.db).await?;

        let drafts = self
            .extractor
            .extract_turn(user_text, assistant_text, None)
            .await;
        outcome.stats.drafts = drafts.len() as u32;
        IngestionJob::update_status(&job.id, JobStatus::Extracted, &self.db).await?;

        // Conversation bookkeeping happens even for chitchat turns.
        let title: String = user_text.chars().take(48).collect();
        let conversation =
            Conversation::get_or_create(&self.db, &job.namespace, conversation_id, &title).await?;
        outcome.conversation_id = Some(conversation.id.clone());
        self.db
            .store_item(Turn::new(
                conversation.id.clone(),
                user_text.to_string(),
                assistant_text.to_string(),
            ))
            .await?;

        let conversation_node = MemoryNode::new(
            job.namespace.clone(),
            conversation.id.clone(),
            NodeKind::Conversation,
            title,
            job.id.clone(),
        )
        .upsert(&self.db)
        .await?;

        self.curate_and_index(job, drafts, Some(&conversation_node.id), outcome)
            .await
    }

    async fn ingest_document(
        &self,
        job: &IngestionJob,
        text: &str,
        filename: Option<&str>,
        math_mode: bool,
        outcome: &mut JobOutcome,
    ) -> Result<(), AppError> {
        if text.trim().is_empty() {
            return Ok(());
        }

        let chunker = Chunker::new(ChunkerConfig {
            size: self.tuning.chunk_size,
            delimiters: b"\n.?!".to_vec(),
            prefix_mode: false,
            collapse_consecutive: true,
            forward_fallback: true,
        });
        let chunks = chunker.chunk(text);
        outcome.stats.chunks = chunks.len() as u32;
        outcome.chunk_texts = chunks.iter().map(|c| c.text.clone()).collect();
        IngestionJob::update_status(&job.id, JobStatus::Chunked, &self.db).await?;

        let (drafts, tier_stats) = self
            .extractor
            .extract_document(
                text,
                &chunks,
                self.tuning.representative_stride,
                self.tuning.tier3_llm_call_budget,
            )
            .await;
        outcome.stats.drafts = drafts.len() as u32;
        outcome.stats.tier1 = tier_stats.tier1;
        outcome.stats.tier2_reps = tier_stats.tier2_reps;
        outcome.stats.tier3_llm_calls = tier_stats.tier3_llm_calls;
        IngestionJob::update_status(&job.id, JobStatus::Extracted, &self.db).await?;

        if math_mode {
            let mut embedded_chunks = Vec::with_capacity(chunks.len());
            for chunk in &chunks {
                let embedding = self
                    .embedder
                    .embed(&chunk.text, self.embedding_deadline)
                    .await?;
                embedded_chunks.push((chunk.text.clone(), embedding));
            }
            outcome.vector_tree = build_tree(embedded_chunks, self.tuning.tree_branching);
        }

        let document_name = filename
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| format!("document-{}", job.id));
        let document_node = MemoryNode::new(
            job.namespace.clone(),
            document_name,
            NodeKind::Document,
            text.chars().take(160).collect(),
            job.id.clone(),
        )
        .upsert(&self.db)
        .await?;

        self.curate_and_index(job, drafts, Some(&document_node.id), outcome)
            .await
    }

    /// Curation and indexing run under the namespace lock so concurrent jobs
    /// for one tenant cannot race duplicate creates. Reads never take this
    /// lock.
    async fn curate_and_index(
        &self,
        job: &IngestionJob,
        drafts: Vec<EntityDraft>,
        provenance_node_id: Option<&str>,
        outcome: &mut JobOutcome,
    ) -> Result<(), AppError> {
        let lock = self.namespace_lock(&job.namespace);
        let _guard = lock.lock().await;

        let mut nodes_by_name: HashMap<String, String> = HashMap::new();
        let mut curated: Vec<(EntityDraft, String)> = Vec::new();

        for draft in drafts {
            let node_id = match self.curator.curate(&job.namespace, &job.id, &draft).await {
                Ok(CurationOutcome::Created { node }) => {
                    outcome.stats.created += 1;
                    node.id
                }
                Ok(CurationOutcome::Merged { node }) => {
                    outcome.stats.merged += 1;
                    node.id
                }
                Ok(CurationOutcome::Superseded { winner, .. }) => {
                    outcome.stats.superseded += 1;
                    winner.id
                }
                Err(err) => {
                    // A failed curation never drops the draft.
                    warn!(error = %err, name = %draft.name, "curation failed; storing draft as-is");
                    let node_id = self.fallback_create(job, &draft).await?;
                    outcome.stats.created += 1;
                    node_id
                }
            };

            nodes_by_name.insert(canonicalize_name(&draft.name), node_id.clone());
            outcome.entity_ids.push(node_id.clone());
            curated.push((draft, node_id));
        }

        IngestionJob::update_status(&job.id, JobStatus::Curated, &self.db).await?;

        for (draft, node_id) in &curated {
            for relation in &draft.relations {
                let Some(target_id) = nodes_by_name.get(&canonicalize_name(&relation.target))
                else {
                    debug!(target = %relation.target, "relation target not found in batch");
                    continue;
                };
                if target_id == node_id {
                    continue;
                }
                MemoryEdge::new(
                    node_id.clone(),
                    target_id.clone(),
                    relation.kind.clone(),
                    DEFAULT_EDGE_WEIGHT,
                    job.namespace.clone(),
                    job.id.clone(),
                )
                .store(&self.db)
                .await?;
            }

            if let Some(provenance) = provenance_node_id {
                MemoryEdge::new(
                    node_id.clone(),
                    provenance.to_string(),
                    edge_kind::PRODUCED_BY.to_string(),
                    DEFAULT_EDGE_WEIGHT,
                    job.namespace.clone(),
                    job.id.clone(),
                )
                .store(&self.db)
                .await?;
            }
        }

        IngestionJob::update_status(&job.id, JobStatus::Indexed, &self.db).await?;
        Ok(())
    }

    async fn fallback_create(
        &self,
        job: &IngestionJob,
        draft: &EntityDraft,
    ) -> Result<String, AppError> {
        let embedding_input = format!(
            "name: {}, description: {}, kind: {:?}",
            draft.name, draft.description, draft.kind
        );

        match self
            .embedder
            .embed(&embedding_input, self.embedding_deadline)
            .await
        {
            Ok(embedding) => {
                let node = self
                    .curator
                    .create_new(&job.namespace, &job.id, draft, embedding)
                    .await?;
                Ok(node.id)
            }
            Err(err) => {
                // Last resort: store without an embedding; the vector index
                // can be rebuilt later.
                warn!(error = %err, "embedding failed; storing node without vector");
                let node = MemoryNode::new(
                    job.namespace.clone(),
                    draft.name.clone(),
                    draft.kind,
                    draft.description.clone(),
                    job.id.clone(),
                )
                .with_tags(draft.tags.clone());
                let stored = self
                    .db
                    .store_item(node)
                    .await?
                    .ok_or_else(|| AppError::StoreReject("node insert returned nothing".into()))?;
                Ok(stored.id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use uuid::Uuid;

    struct StubLm {
        responses: Mutex<Vec<serde_json::Value>>,
    }

    impl StubLm {
        fn returning(responses: Vec<serde_json::Value>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
            })
        }
    }

    #[async_trait]
    impl LanguageModel for StubLm {
        async fn extract_json(
            &self,
            _prompt: &str,
            _deadline: Duration,
        ) -> Result<serde_json::Value, AppError> {
            let mut responses = self
                .responses
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if responses.is_empty() {
                Err(AppError::LLMUnavailable("script exhausted".into()))
            } else {
                Ok(responses.remove(0))
            }
        }

        async fn generate(
            &self,
            _system: &str,
            _user: &str,
            _deadline: Duration,
        ) -> Result<String, AppError> {
            Ok(String::new())
        }
    }

    async fn setup(
        llm: Arc<dyn LanguageModel>,
        queue_capacity: usize,
    ) -> (Arc<SurrealDbClient>, Arc<IngestionCoordinator>, JobReceiver) {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = Arc::new(
            SurrealDbClient::memory(namespace, database)
                .await
                .expect("Failed to start in-memory surrealdb"),
        );
        let embedder = Arc::new(EmbeddingProvider::new_hashed(64));
        db.ensure_initialized(embedder.dimension())
            .await
            .expect("Failed to initialize schema");

        let tuning = KernelTuning {
            ingestion_queue_capacity: queue_capacity,
            ..KernelTuning::default()
        };
        let (coordinator, rx) = IngestionCoordinator::new(
            Arc::clone(&db),
            embedder,
            llm,
            tuning,
            DeadlineConfig::default(),
        );
        (db, coordinator, rx)
    }

    fn turn_job(namespace: &str, user_text: &str) -> IngestionJob {
        IngestionJob::new(
            namespace.to_string(),
            "user:test".to_string(),
            IngestionPayload::ConversationTurn {
                user_text: user_text.to_string(),
                assistant_text: "Noted.".to_string(),
                conversation_id: None,
            },
        )
    }

    #[tokio::test]
    async fn test_turn_job_runs_to_done_with_stats() {
        let llm = StubLm::returning(vec![serde_json::json!([
            {
                "name": "Emma",
                "type": "Entity",
                "description": "User's sister",
                "tags": ["family"],
                "relations": [{"target": "Boston", "type": "related_to"}]
            },
            {"name": "Boston", "type": "Entity", "description": "Where Emma lives"}
        ])]);
        let (db, coordinator, _rx) = setup(llm, 8).await;

        let job = turn_job("user_a", "My sister Emma lives in Boston");
        let job_id = job.id.clone();
        db.store_item(job.clone()).await.expect("store job row");

        let outcome = coordinator.process_job(job).await.expect("process");

        assert_eq!(outcome.stats.chunks, 1);
        assert_eq!(outcome.stats.drafts, 2);
        assert_eq!(outcome.stats.created, 2);
        assert!(outcome.conversation_id.is_some());
        assert_eq!(outcome.entity_ids.len(), 2);

        let row: IngestionJob = db.get_item(&job_id).await.expect("get").expect("job row");
        assert_eq!(row.status, JobStatus::Done);

        // Nodes, conversation bookkeeping and the relation edge all landed
        let emma = MemoryNode::find_by_identity(&db, "user_a", "Emma", &NodeKind::Entity)
            .await
            .expect("find")
            .expect("emma exists");
        let edges = MemoryEdge::out_neighbors(&db, "user_a", &[emma.id], None)
            .await
            .expect("edges");
        assert!(edges.iter().any(|e| e.kind == "related_to"));
        assert!(edges.iter().any(|e| e.kind == edge_kind::PRODUCED_BY));

        let turns: Vec<Turn> = db.get_all_stored_items().await.expect("turns");
        assert_eq!(turns.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_turn_finishes_with_zeroed_stats() {
        let (db, coordinator, _rx) = setup(StubLm::returning(vec![]), 8).await;

        let job = turn_job("user_a", "   ");
        let job_id = job.id.clone();
        db.store_item(job.clone()).await.expect("store job row");

        let outcome = coordinator.process_job(job).await.expect("process");
        assert_eq!(outcome.stats, IngestionStats::default());

        let row: IngestionJob = db.get_item(&job_id).await.expect("get").expect("job row");
        assert_eq!(row.status, JobStatus::Done);
    }

    #[tokio::test]
    async fn test_chitchat_turn_stores_conversation_but_no_entities() {
        let (db, coordinator, _rx) = setup(StubLm::returning(vec![]), 8).await;

        let job = turn_job("user_a", "thanks!");
        coordinator.process_job(job).await.expect("process");

        let nodes: Vec<MemoryNode> = db.get_all_stored_items().await.expect("nodes");
        assert!(nodes.iter().all(|n| n.kind == NodeKind::Conversation));

        let turns: Vec<Turn> = db.get_all_stored_items().await.expect("turns");
        assert_eq!(turns.len(), 1);
    }

    #[tokio::test]
    async fn test_full_queue_rejects_with_overloaded() {
        let (_db, coordinator, _rx) = setup(StubLm::returning(vec![]), 1).await;

        coordinator
            .enqueue(turn_job("user_a", "first message about topic one"))
            .await
            .expect("first enqueue fits");

        let second = coordinator
            .enqueue(turn_job("user_a", "second message about topic two"))
            .await;
        assert!(matches!(second, Err(AppError::Overloaded(_))));
    }

    #[tokio::test]
    async fn test_enqueue_and_wait_returns_stats_from_worker() {
        let llm = StubLm::returning(vec![serde_json::json!([
            {"name": "Hiking", "type": "Preference", "description": "Enjoys hiking"}
        ])]);
        let (_db, coordinator, mut rx) = setup(llm, 8).await;

        let worker_coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move {
            while let Some(queued) = rx.recv().await {
                worker_coordinator.process_queued(queued).await;
            }
        });

        let outcome = coordinator
            .enqueue_and_wait(turn_job("user_a", "I like hiking"))
            .await
            .expect("job succeeded");
        assert_eq!(outcome.stats.drafts, 1);
        assert_eq!(outcome.stats.created, 1);
    }

    #[tokio::test]
    async fn test_document_text_job_reports_tier_stats() {
        let llm = StubLm::returning(vec![serde_json::json!([
            {"name": "Quarterly Report", "type": "Entity", "description": "The Q3 report"}
        ])]);
        let (db, coordinator, _rx) = setup(llm, 8).await;

        let text = "Revenue grew 12% to $1,200,000. Contact cfo@example.com for details. \
                    The outlook section describes several risks. More prose follows here."
            .to_string();
        let job = IngestionJob::new(
            "user_a".to_string(),
            "user:test".to_string(),
            IngestionPayload::DocumentText {
                text,
                filename: Some("q3-report.txt".to_string()),
                math_mode: false,
            },
        );
        db.store_item(job.clone()).await.expect("store job row");

        let outcome = coordinator.process_job(job).await.expect("process");

        assert!(outcome.stats.chunks >= 1);
        assert!(outcome.stats.tier1 >= 3, "email, money and percent hits expected");
        assert!(outcome.stats.tier2_reps >= 1);
        assert_eq!(outcome.stats.tier3_llm_calls, 1);
        assert_eq!(outcome.chunk_texts.len(), outcome.stats.chunks as usize);

        let document =
            MemoryNode::find_by_identity(&db, "user_a", "q3-report.txt", &NodeKind::Document)
                .await
                .expect("find")
                .expect("document node exists");
        assert_eq!(document.kind, NodeKind::Document);
    }

    #[tokio::test]
    async fn test_math_mode_document_builds_vector_tree() {
        let llm = StubLm::returning(vec![serde_json::json!([])]);
        let (db, coordinator, _rx) = setup(llm, 8).await;

        let text = "First sentence about planning. Second sentence about budgets. \
                    Third sentence about staffing. Fourth sentence about delivery. \
                    Fifth sentence about review cycles. Sixth sentence about risks."
            .to_string();
        let job = IngestionJob::new(
            "user_a".to_string(),
            "user:test".to_string(),
            IngestionPayload::DocumentText {
                text,
                filename: Some("plan.txt".to_string()),
                math_mode: true,
            },
        );
        db.store_item(job.clone()).await.expect("store job row");

        let outcome = coordinator.process_job(job).await.expect("process");

        let tree = outcome.vector_tree.expect("math mode builds a tree");
        let root = tree.nodes.get(&tree.root_id).expect("root present");
        assert!(root.leaf_text.is_some() || !root.child_ids.is_empty());

        let leaves = tree
            .nodes
            .values()
            .filter(|n| n.leaf_text.is_some())
            .count();
        assert_eq!(leaves, outcome.stats.chunks as usize);
    }

    #[tokio::test]
    async fn test_blob_with_bad_extension_fails_job() {
        let (db, coordinator, _rx) = setup(StubLm::returning(vec![]), 8).await;

        let body = base64::engine::general_purpose::STANDARD
            .encode("x".repeat(200));
        let job = IngestionJob::new(
            "user_a".to_string(),
            "user:test".to_string(),
            IngestionPayload::DocumentBlob {
                content_base64: body,
                filename: "malware.exe".to_string(),
                document_type: "text".to_string(),
            },
        );
        let job_id = job.id.clone();
        db.store_item(job.clone()).await.expect("store job row");

        let result = coordinator.process_job(job).await;
        assert!(matches!(result, Err(AppError::Validation(_))));

        let row: IngestionJob = db.get_item(&job_id).await.expect("get").expect("job row");
        assert!(matches!(row.status, JobStatus::Failed(_)));
    }

    #[tokio::test]
    async fn test_valid_text_blob_is_ingested() {
        let llm = StubLm::returning(vec![serde_json::json!([])]);
        let (db, coordinator, _rx) = setup(llm, 8).await;

        let text = "Meeting notes from the planning session. The team agreed on three milestones \
                    and assigned owners to each of them for the next quarter.";
        let body = base64::engine::general_purpose::STANDARD.encode(text);
        let job = IngestionJob::new(
            "user_a".to_string(),
            "user:test".to_string(),
            IngestionPayload::DocumentBlob {
                content_base64: body,
                filename: "notes.txt".to_string(),
                document_type: "text".to_string(),
            },
        );
        db.store_item(job.clone()).await.expect("store job row");

        let outcome = coordinator.process_job(job).await.expect("process");
        assert!(outcome.stats.chunks >= 1);

        let document = MemoryNode::find_by_identity(&db, "user_a", "notes.txt", &NodeKind::Document)
            .await
            .expect("find")
            .expect("document node exists");
        assert!(document.description.starts_with("Meeting notes"));
    }
}
