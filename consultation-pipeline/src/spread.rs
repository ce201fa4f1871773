//! Spreading activation: seed scores propagate along weighted edges,
//! attenuated by gamma per hop, additively accumulated and capped at 1.0.

use std::collections::{HashMap, HashSet};

use common::error::AppError;
use common::storage::db::SurrealDbClient;
use common::storage::types::memory_edge::{edge_kind, MemoryEdge};

/// Edge kinds activation may flow along. Structural edges (membership,
/// supersession, provenance) never spread.
pub const ALLOWED_SPREAD_KINDS: &[&str] = &[
    edge_kind::RELATED_TO,
    edge_kind::FAMILY_MEMBER,
    edge_kind::HAS_MANAGER,
    edge_kind::WORKS_AT,
    edge_kind::LIKES,
    edge_kind::PART_OF,
];

/// Propagate from `(node id, activation)` seeds. Returns the accumulated
/// contribution per reached node; seeds themselves are not scored.
pub async fn spread_activation(
    db: &SurrealDbClient,
    namespace: &str,
    seeds: &[(String, f32)],
    gamma: f32,
    depth: usize,
) -> Result<HashMap<String, f32>, AppError> {
    let mut contributions: HashMap<String, f32> = HashMap::new();
    let mut visited: HashSet<String> = seeds.iter().map(|(id, _)| id.clone()).collect();
    let mut frontier: HashMap<String, f32> = seeds.iter().cloned().collect();

    for _ in 0..depth {
        if frontier.is_empty() {
            break;
        }

        let frontier_ids: Vec<String> = frontier.keys().cloned().collect();
        let edges = MemoryEdge::out_neighbors(
            db,
            namespace,
            &frontier_ids,
            Some(ALLOWED_SPREAD_KINDS),
        )
        .await?;

        let mut next_frontier: HashMap<String, f32> = HashMap::new();
        for edge in edges {
            let Some(source_strength) = frontier.get(&edge.from) else {
                continue;
            };

            let contribution = source_strength * edge.weight * gamma;
            if contribution <= 0.0 {
                continue;
            }

            let entry = contributions.entry(edge.to.clone()).or_insert(0.0);
            *entry = (*entry + contribution).min(1.0);

            // Cycles and back-edges stop here; a node propagates once.
            if visited.insert(edge.to.clone()) {
                let next = next_frontier.entry(edge.to).or_insert(0.0);
                *next = (*next + contribution).min(1.0);
            }
        }

        frontier = next_frontier;
    }

    Ok(contributions)
}
