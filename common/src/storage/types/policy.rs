use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum PolicyEffect {
    Allow,
    Deny,
}

stored_object!(Policy, "policy", {
    effect: PolicyEffect,
    subjects: Vec<String>,
    resources: Vec<String>,
    actions: Vec<String>,
    description: String
});

/// `*` matches anything; `prefix*` matches by prefix; otherwise exact.
/// Patterns and values use the typed forms `user:<id>`, `ns:<name>`,
/// `node:<id>`.
pub fn pattern_matches(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return value.starts_with(prefix);
    }
    pattern == value
}

impl Policy {
    pub fn new(
        effect: PolicyEffect,
        subjects: Vec<String>,
        resources: Vec<String>,
        actions: Vec<String>,
        description: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            effect,
            subjects,
            resources,
            actions,
            description,
        }
    }

    pub fn matches(&self, principal: &str, action: &str, resource: &str) -> bool {
        self.subjects.iter().any(|s| pattern_matches(s, principal))
            && self.actions.iter().any(|a| pattern_matches(a, action))
            && self.resources.iter().any(|r| pattern_matches(r, resource))
    }

    pub async fn list_all(db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        Ok(db.get_all_stored_items().await?)
    }
}
