//! Access-driven boost, periodic exponential decay, and retrieval ordering.

use std::cmp::Ordering;

use chrono::{Duration, Utc};
use tracing::debug;

use crate::error::AppError;
use crate::storage::db::SurrealDbClient;

pub const DEFAULT_BOOST_AMOUNT: f32 = 0.15;
pub const DEFAULT_DAILY_DECAY_RATE: f64 = 0.005;
pub const DEFAULT_RANK_ALPHA: f32 = 0.7;

/// Raise activation for a set of nodes in one batched store write.
/// Activation clamps at 1.0; access bookkeeping moves the node back inside
/// the decay protection window.
pub async fn boost(
    db: &SurrealDbClient,
    ids: &[String],
    amount: f32,
) -> Result<(), AppError> {
    if ids.is_empty() {
        return Ok(());
    }

    let things: Vec<surrealdb::sql::Thing> = ids
        .iter()
        .map(|id| surrealdb::sql::Thing::from(("memory_node", id.as_str())))
        .collect();

    db.client
        .query(
            "UPDATE memory_node SET
                 activation = math::min([1.0, activation + $amount]),
                 access_count += 1,
                 last_accessed = time::now(),
                 updated_at = time::now()
             WHERE id IN $ids",
        )
        .bind(("ids", things))
        .bind(("amount", amount))
        .await?
        .check()?;

    debug!(count = ids.len(), amount, "boosted node activations");
    Ok(())
}

/// The exponent the store applies for a given idle stretch:
/// `(1 - daily_rate) ^ idle_days`.
pub fn decay_factor(daily_rate: f64, days: f64) -> f64 {
    if days <= 0.0 {
        return 1.0;
    }
    (1.0 - daily_rate).powf(days)
}

/// Apply exponential decay to every node whose last access is older than the
/// protection window, in one parameterized store write. Idle time is counted
/// from the later of `last_decayed_at` and `last_accessed`, which makes a
/// repeat run inside the same tick a no-op. Returns how many nodes decayed.
pub async fn decay(
    db: &SurrealDbClient,
    daily_rate: f64,
    protection_window: Duration,
) -> Result<usize, AppError> {
    let cutoff = Utc::now() - protection_window;

    let mut response = db
        .client
        .query(
            "UPDATE memory_node SET
                 activation = math::max([0.0, math::min([1.0,
                     activation * math::pow(1.0 - $rate, duration::days(time::now() - (
                         IF last_decayed_at != NONE AND last_decayed_at > last_accessed
                         THEN last_decayed_at
                         ELSE last_accessed
                         END
                     )))])]),
                 last_decayed_at = time::now()
             WHERE last_accessed < $cutoff
             RETURN VALUE id",
        )
        .bind(("rate", daily_rate))
        .bind(("cutoff", surrealdb::Datetime::from(cutoff)))
        .await?;

    response = response.check()?;
    let updated: Vec<surrealdb::sql::Thing> = response.take(0)?;

    debug!(count = updated.len(), daily_rate, "applied activation decay");
    Ok(updated.len())
}

/// A retrieval candidate carrying both ranking signals.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedCandidate {
    pub id: String,
    pub activation: f32,
    pub similarity: f32,
}

impl RankedCandidate {
    pub fn score(&self, alpha: f32) -> f32 {
        alpha
            .mul_add(self.activation, (1.0 - alpha) * self.similarity)
            .clamp(0.0, 1.0)
    }
}

/// Order candidates by `alpha * activation + (1 - alpha) * similarity`
/// descending, ties broken by id so the ordering is deterministic.
pub fn rank(mut candidates: Vec<RankedCandidate>, alpha: f32) -> Vec<RankedCandidate> {
    candidates.sort_by(|a, b| {
        b.score(alpha)
            .partial_cmp(&a.score(alpha))
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::memory_node::{MemoryNode, NodeKind};
    use uuid::Uuid;

    async fn setup_test_db() -> SurrealDbClient {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");
        db.ensure_initialized(3)
            .await
            .expect("Failed to initialize schema");
        db
    }

    async fn store_node(db: &SurrealDbClient, activation: f32, accessed_days_ago: i64) -> String {
        let mut node = MemoryNode::new(
            "user_a".to_string(),
            Uuid::new_v4().to_string(),
            NodeKind::Fact,
            "a fact".to_string(),
            "src".to_string(),
        );
        node.activation = activation;
        node.last_accessed = Utc::now() - Duration::days(accessed_days_ago);
        let stored = db.store_item(node).await.expect("store node");
        stored.expect("node returned").id
    }

    async fn activation_of(db: &SurrealDbClient, id: &str) -> f32 {
        let node: MemoryNode = db.get_item(id).await.expect("get").expect("node");
        node.activation
    }

    #[tokio::test]
    async fn test_boost_raises_and_clamps() {
        let db = setup_test_db().await;

        let id = store_node(&db, 0.5, 0).await;
        boost(&db, &[id.clone()], DEFAULT_BOOST_AMOUNT)
            .await
            .expect("boost");

        let node: MemoryNode = db.get_item(&id).await.expect("get").expect("node");
        assert!((node.activation - 0.65).abs() < 1e-6);
        assert_eq!(node.access_count, 1);

        // Repeated boosts never exceed 1.0
        for _ in 0..5 {
            boost(&db, &[id.clone()], DEFAULT_BOOST_AMOUNT)
                .await
                .expect("boost");
        }
        let node: MemoryNode = db.get_item(&id).await.expect("get").expect("node");
        assert!(node.activation <= 1.0);
        assert_eq!(node.access_count, 6);
    }

    #[tokio::test]
    async fn test_boost_updates_only_the_given_ids() {
        let db = setup_test_db().await;

        let boosted = store_node(&db, 0.5, 0).await;
        let untouched = store_node(&db, 0.5, 0).await;

        boost(&db, &[boosted.clone()], DEFAULT_BOOST_AMOUNT)
            .await
            .expect("boost");

        assert!((activation_of(&db, &boosted).await - 0.65).abs() < 1e-6);
        assert!((activation_of(&db, &untouched).await - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_decay_skips_recently_accessed_nodes() {
        let db = setup_test_db().await;

        let fresh = store_node(&db, 0.8, 0).await;
        let stale = store_node(&db, 0.8, 10).await;

        let updated = decay(&db, DEFAULT_DAILY_DECAY_RATE, Duration::days(1))
            .await
            .expect("decay");
        assert_eq!(updated, 1);

        assert!((activation_of(&db, &fresh).await - 0.8).abs() < 1e-6);

        let stale_activation = activation_of(&db, &stale).await;
        let expected = (0.8 * decay_factor(DEFAULT_DAILY_DECAY_RATE, 10.0)) as f32;
        assert!(stale_activation < 0.8);
        assert!((stale_activation - expected).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_decay_twice_in_one_tick_is_idempotent() {
        let db = setup_test_db().await;

        let id = store_node(&db, 0.8, 10).await;

        decay(&db, DEFAULT_DAILY_DECAY_RATE, Duration::days(1))
            .await
            .expect("first decay");
        let after_first = activation_of(&db, &id).await;

        decay(&db, DEFAULT_DAILY_DECAY_RATE, Duration::days(1))
            .await
            .expect("second decay");
        let after_second = activation_of(&db, &id).await;

        assert!(
            (after_first - after_second).abs() < 1e-4,
            "an immediate second tick must not compound decay"
        );
    }

    #[tokio::test]
    async fn test_boost_then_decay_inside_protection_window_equals_boost() {
        let db = setup_test_db().await;

        let id = store_node(&db, 0.5, 0).await;
        boost(&db, &[id.clone()], DEFAULT_BOOST_AMOUNT)
            .await
            .expect("boost");
        decay(&db, DEFAULT_DAILY_DECAY_RATE, Duration::days(1))
            .await
            .expect("decay");

        assert!((activation_of(&db, &id).await - 0.65).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_activation_stays_in_unit_range_under_mixed_operations() {
        let db = setup_test_db().await;

        let id = store_node(&db, 0.95, 400).await;
        for _ in 0..3 {
            decay(&db, 0.5, Duration::days(1)).await.expect("decay");
            boost(&db, &[id.clone()], 0.9).await.expect("boost");
        }

        let activation = activation_of(&db, &id).await;
        assert!((0.0..=1.0).contains(&activation));
    }

    #[test]
    fn test_decay_factor_monotonicity() {
        assert!((decay_factor(0.005, 0.0) - 1.0).abs() < f64::EPSILON);
        assert!(decay_factor(0.005, 1.0) > decay_factor(0.005, 10.0));
        assert!(decay_factor(0.005, 365.0) > 0.0);
    }

    #[test]
    fn test_rank_orders_by_blended_score_with_stable_ties() {
        let candidates = vec![
            RankedCandidate {
                id: "b".to_string(),
                activation: 0.5,
                similarity: 0.5,
            },
            RankedCandidate {
                id: "a".to_string(),
                activation: 0.5,
                similarity: 0.5,
            },
            RankedCandidate {
                id: "hot".to_string(),
                activation: 0.9,
                similarity: 0.2,
            },
            RankedCandidate {
                id: "similar".to_string(),
                activation: 0.1,
                similarity: 0.95,
            },
        ];

        let ranked = rank(candidates, DEFAULT_RANK_ALPHA);
        // alpha = 0.7 favors activation over similarity
        assert_eq!(ranked[0].id, "hot");
        assert_eq!(ranked[1].id, "a", "ties resolve by id");
        assert_eq!(ranked[2].id, "b");
        assert_eq!(ranked[3].id, "similar");
    }
}
