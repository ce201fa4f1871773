#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod chunker;
pub mod coordinator;
pub mod curator;
pub mod extractor;
pub mod vision_tree;

use std::sync::Arc;

use tracing::info;

pub use chunker::{Chunk, Chunker, ChunkerConfig};
pub use coordinator::{IngestionCoordinator, JobOutcome, JobReceiver, QueuedJob};
pub use curator::{CurationOutcome, Curator};
pub use extractor::{DocumentTierStats, EntityDraft, Extractor, RelationDraft};
pub use vision_tree::{build_tree, VectorTree, VectorTreeNode};

/// Drain the ingestion queue. Jobs spawn onto the runtime so distinct
/// namespaces proceed in parallel; the coordinator's per-namespace lock
/// serializes writes within one tenant.
pub async fn run_worker_loop(coordinator: Arc<IngestionCoordinator>, mut rx: JobReceiver) {
    info!("ingestion worker started");

    while let Some(queued) = rx.recv().await {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move {
            coordinator.process_queued(queued).await;
        });
    }

    info!("ingestion queue closed; worker exiting");
}
