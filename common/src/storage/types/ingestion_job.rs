use surrealdb::opt::PatchOp;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IngestionPayload {
    ConversationTurn {
        user_text: String,
        assistant_text: String,
        conversation_id: Option<String>,
    },
    DocumentText {
        text: String,
        filename: Option<String>,
        /// Math mode additionally builds the hierarchical vector tree over
        /// the document's chunks.
        #[serde(default)]
        math_mode: bool,
    },
    DocumentBlob {
        content_base64: String,
        filename: String,
        document_type: String,
    },
}

/// Linear job lifecycle; every transition is persisted so callers can poll.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum JobStatus {
    New,
    Chunked,
    Extracted,
    Curated,
    Indexed,
    Done,
    Failed(String),
}

/// Counters returned to the caller once a job reaches Done.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IngestionStats {
    pub chunks: u32,
    pub drafts: u32,
    pub created: u32,
    pub merged: u32,
    pub superseded: u32,
    pub tier1: u32,
    pub tier2_reps: u32,
    pub tier3_llm_calls: u32,
}

stored_object!(IngestionJob, "ingestion_job", {
    namespace: String,
    principal: String,
    payload: IngestionPayload,
    status: JobStatus,
    #[serde(default)]
    stats: IngestionStats
});

impl IngestionJob {
    pub fn new(namespace: String, principal: String, payload: IngestionPayload) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            namespace,
            principal,
            payload,
            status: JobStatus::New,
            stats: IngestionStats::default(),
        }
    }

    pub async fn update_status(
        id: &str,
        status: JobStatus,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let _job: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/status", status))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::default(),
            ))
            .await?;

        Ok(())
    }

    pub async fn record_result(
        id: &str,
        status: JobStatus,
        stats: &IngestionStats,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let _job: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/status", status))
            .patch(PatchOp::replace("/stats", stats.clone()))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::sql::Datetime::default(),
            ))
            .await?;

        Ok(())
    }
}
