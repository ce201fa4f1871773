//! Score bookkeeping for retrieval candidates and the blended ranking that
//! orders them before context composition.

use std::cmp::Ordering;

use common::storage::types::memory_node::MemoryNode;

/// Retrieval signals gathered for one candidate.
#[derive(Debug, Clone, Copy, Default)]
pub struct Signals {
    pub vector: Option<f32>,
    pub spread: Option<f32>,
}

impl Signals {
    /// The similarity term of the blend: the strongest available signal.
    pub fn similarity(&self) -> f32 {
        self.vector
            .unwrap_or(0.0)
            .max(self.spread.unwrap_or(0.0))
            .clamp(0.0, 1.0)
    }
}

/// A candidate with its signals and final blended score.
#[derive(Debug, Clone)]
pub struct ScoredNode {
    pub node: MemoryNode,
    pub signals: Signals,
    pub score: f32,
}

pub const fn clamp_unit(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

/// Blend `alpha * activation + (1 - alpha) * similarity` and sort
/// descending, ties broken by node id so identical inputs rank identically.
pub fn rank_candidates(mut candidates: Vec<ScoredNode>, alpha: f32) -> Vec<ScoredNode> {
    for candidate in &mut candidates {
        candidate.score = clamp_unit(alpha.mul_add(
            clamp_unit(candidate.node.activation),
            (1.0 - alpha) * candidate.signals.similarity(),
        ));
    }

    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.node.id.cmp(&b.node.id))
    });

    candidates
}
