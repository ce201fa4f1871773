use tracing::debug;

use crate::{error::AppError, storage::db::SurrealDbClient};

const FTS_ANALYZER_NAME: &str = "rmk_fts_analyzer";

#[derive(Clone, Copy)]
struct FtsIndexSpec {
    index_name: &'static str,
    table: &'static str,
    field: &'static str,
}

const fn fts_index_specs() -> [FtsIndexSpec; 3] {
    [
        FtsIndexSpec {
            index_name: "memory_node_name_fts_idx",
            table: "memory_node",
            field: "name",
        },
        FtsIndexSpec {
            index_name: "memory_node_description_fts_idx",
            table: "memory_node",
            field: "description",
        },
        FtsIndexSpec {
            index_name: "turn_user_text_fts_idx",
            table: "turn",
            field: "user_text",
        },
    ]
}

impl FtsIndexSpec {
    fn definition(&self) -> String {
        format!(
            "DEFINE INDEX IF NOT EXISTS {index} ON TABLE {table} FIELDS {field} \
             SEARCH ANALYZER {analyzer} BM25;",
            index = self.index_name,
            table = self.table,
            field = self.field,
            analyzer = FTS_ANALYZER_NAME,
        )
    }
}

/// Build runtime Surreal indexes (analyzer, FTS, HNSW, plain field indexes).
/// Idempotent: every definition uses IF NOT EXISTS except the HNSW index,
/// which is overwritten so a dimension change takes effect.
pub async fn ensure_runtime_indexes(
    db: &SurrealDbClient,
    embedding_dimension: usize,
) -> Result<(), AppError> {
    db.client
        .query(format!(
            "DEFINE ANALYZER IF NOT EXISTS {FTS_ANALYZER_NAME}
                TOKENIZERS class
                FILTERS lowercase, ascii;"
        ))
        .await?
        .check()?;

    for spec in fts_index_specs() {
        // Sequential creation; concurrent DEFINEs clash in SurrealDB.
        db.client.query(spec.definition()).await?.check()?;
        debug!(index = spec.index_name, table = spec.table, "FTS index ready");
    }

    db.client
        .query(format!(
            "DEFINE INDEX OVERWRITE idx_node_embedding_hnsw ON TABLE node_embedding \
             FIELDS embedding HNSW DIMENSION {embedding_dimension} DIST COSINE TYPE F32 EFC 100 M 8;"
        ))
        .await?
        .check()?;

    let field_indexes = [
        "DEFINE INDEX IF NOT EXISTS idx_memory_node_namespace ON TABLE memory_node FIELDS namespace;",
        "DEFINE INDEX IF NOT EXISTS idx_node_embedding_namespace ON TABLE node_embedding FIELDS namespace;",
        "DEFINE INDEX IF NOT EXISTS idx_ingestion_job_status ON TABLE ingestion_job FIELDS status;",
        "DEFINE INDEX IF NOT EXISTS idx_audit_record_time ON TABLE audit_record FIELDS created_at;",
    ];
    for definition in field_indexes {
        db.client.query(definition).await?.check()?;
    }

    Ok(())
}
