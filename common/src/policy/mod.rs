use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use tracing::warn;

use crate::error::AppError;
use crate::storage::db::SurrealDbClient;
use crate::storage::types::audit_record::AuditRecord;
use crate::storage::types::policy::{Policy, PolicyEffect};
use crate::storage::types::workspace::{MemberRole, Workspace};

/// Actions the kernel distinguishes today.
pub mod action {
    pub const READ: &str = "READ";
    pub const WRITE: &str = "WRITE";
    pub const ADMIN: &str = "ADMIN";
}

const DECISION_CACHE_SIZE: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub matched_policy_id: Option<String>,
    pub reason: String,
}

impl PolicyDecision {
    fn decision_str(&self) -> &'static str {
        if self.allowed {
            "ALLOW"
        } else {
            "DENY"
        }
    }

    /// Turn a denial into the error the transport reports.
    pub fn into_result(self) -> Result<(), AppError> {
        if self.allowed {
            Ok(())
        } else {
            Err(AppError::forbidden(self.reason, self.matched_policy_id))
        }
    }
}

type CacheKey = (String, String, String);

pub struct PolicyEngine {
    db: Arc<SurrealDbClient>,
    cache: Mutex<LruCache<CacheKey, PolicyDecision>>,
}

impl PolicyEngine {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        let capacity =
            NonZeroUsize::new(DECISION_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
        Self {
            db,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Evaluate `(principal, action, resource)`. `resource_namespace` is the
    /// namespace the resource lives in; the in-namespace default rule needs
    /// it when no policy matches.
    pub async fn check(
        &self,
        principal: &str,
        action: &str,
        resource: &str,
        resource_namespace: &str,
    ) -> Result<PolicyDecision, AppError> {
        let key = (
            principal.to_string(),
            action.to_string(),
            resource.to_string(),
        );

        let cached = {
            let mut cache = self
                .cache
                .lock()
                .map_err(|_| AppError::InternalError("policy cache poisoned".into()))?;
            cache.get(&key).cloned()
        };

        let decision = match cached {
            Some(decision) => decision,
            None => {
                let decision = self
                    .evaluate(principal, action, resource, resource_namespace)
                    .await?;
                let mut cache = self
                    .cache
                    .lock()
                    .map_err(|_| AppError::InternalError("policy cache poisoned".into()))?;
                cache.put(key, decision.clone());
                decision
            }
        };

        self.audit(principal, action, resource, &decision).await;

        Ok(decision)
    }

    async fn evaluate(
        &self,
        principal: &str,
        action: &str,
        resource: &str,
        resource_namespace: &str,
    ) -> Result<PolicyDecision, AppError> {
        let policies = Policy::list_all(&self.db).await?;

        let mut allow_match: Option<&Policy> = None;
        for policy in &policies {
            if !policy.matches(principal, action, resource) {
                continue;
            }
            match policy.effect {
                PolicyEffect::Deny => {
                    return Ok(PolicyDecision {
                        allowed: false,
                        matched_policy_id: Some(policy.id.clone()),
                        reason: "matched DENY policy".to_string(),
                    });
                }
                PolicyEffect::Allow => {
                    if allow_match.is_none() {
                        allow_match = Some(policy);
                    }
                }
            }
        }

        if let Some(policy) = allow_match {
            return Ok(PolicyDecision {
                allowed: true,
                matched_policy_id: Some(policy.id.clone()),
                reason: "matched ALLOW policy".to_string(),
            });
        }

        // No policy matched: allow only in-namespace principals.
        if self
            .principal_in_namespace(principal, resource_namespace)
            .await?
        {
            Ok(PolicyDecision {
                allowed: true,
                matched_policy_id: None,
                reason: "default allow for in-namespace principal".to_string(),
            })
        } else {
            Ok(PolicyDecision {
                allowed: false,
                matched_policy_id: None,
                reason: "default deny outside namespace".to_string(),
            })
        }
    }

    async fn principal_in_namespace(
        &self,
        principal: &str,
        namespace: &str,
    ) -> Result<bool, AppError> {
        let Some(user_id) = principal.strip_prefix("user:") else {
            return Ok(false);
        };

        if let Some(owner) = namespace.strip_prefix("user_") {
            return Ok(owner == user_id);
        }

        if namespace.starts_with("group_") {
            let Some(workspace) = Workspace::find_by_namespace(&self.db, namespace).await? else {
                return Ok(false);
            };
            return Ok(workspace.member_role(&self.db, user_id).await? != MemberRole::None);
        }

        Ok(false)
    }

    // Audit is best-effort: a failed append must not change the decision
    // already made, so failures are logged and swallowed.
    async fn audit(&self, principal: &str, action: &str, resource: &str, decision: &PolicyDecision) {
        let record = AuditRecord::new(
            principal.to_string(),
            action.to_string(),
            resource.to_string(),
            decision.decision_str().to_string(),
            decision.reason.clone(),
        );

        if let Err(err) = self.db.store_item(record).await {
            warn!(error = %err, "failed to append audit record");
        }
    }

    fn invalidate_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    /// Store a policy and drop every cached decision.
    pub async fn put_policy(&self, policy: Policy) -> Result<Policy, AppError> {
        let stored = self
            .db
            .store_item(policy)
            .await?
            .ok_or_else(|| AppError::StoreReject("policy insert returned nothing".into()))?;
        self.invalidate_cache();
        Ok(stored)
    }

    pub async fn delete_policy(&self, id: &str) -> Result<(), AppError> {
        let deleted: Option<Policy> = self.db.delete_item(id).await?;
        if deleted.is_none() {
            return Err(AppError::NotFound(format!("policy {id} not found")));
        }
        self.invalidate_cache();
        Ok(())
    }

    pub async fn list_policies(&self) -> Result<Vec<Policy>, AppError> {
        Policy::list_all(&self.db).await
    }
}
