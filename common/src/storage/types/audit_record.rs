use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use uuid::Uuid;

stored_object!(AuditRecord, "audit_record", {
    principal: String,
    action: String,
    resource: String,
    decision: String,
    reason: String
});

impl AuditRecord {
    pub fn new(
        principal: String,
        action: String,
        resource: String,
        decision: String,
        reason: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            principal,
            action,
            resource,
            decision,
            reason,
        }
    }

    pub async fn latest(db: &SurrealDbClient, limit: usize) -> Result<Vec<Self>, AppError> {
        Ok(db
            .client
            .query(
                "SELECT * FROM type::table($table)
                 ORDER BY created_at DESC
                 LIMIT $limit",
            )
            .bind(("table", Self::table_name()))
            .bind(("limit", limit))
            .await?
            .take(0)?)
    }
}
