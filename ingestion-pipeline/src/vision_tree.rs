//! Hierarchical clustering of chunk embeddings into a vector tree.
//!
//! Leaves are document chunks; each layer groups the one below it with
//! k-means (k = ceil(n / branching)) and mean-pools the members into the
//! parent vector. The whole construction is a pure function of its input:
//! centroids seed from evenly spaced positions and iteration is capped, so
//! the same chunks always produce the same tree.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

const KMEANS_MAX_ITERATIONS: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorTreeNode {
    pub id: String,
    pub vector: Vec<f32>,
    pub child_ids: Vec<String>,
    pub depth: usize,
    pub leaf_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorTree {
    pub nodes: HashMap<String, VectorTreeNode>,
    pub root_id: String,
}

impl VectorTree {
    pub fn root(&self) -> Option<&VectorTreeNode> {
        self.nodes.get(&self.root_id)
    }

    pub fn depth(&self) -> usize {
        self.root().map_or(0, |r| r.depth)
    }
}

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum()
}

fn mean_pool(vectors: &[&Vec<f32>]) -> Vec<f32> {
    let Some(first) = vectors.first() else {
        return Vec::new();
    };
    let mut pooled = vec![0.0_f32; first.len()];
    for vector in vectors {
        for (slot, value) in pooled.iter_mut().zip(vector.iter()) {
            *slot += value;
        }
    }
    let count = vectors.len() as f32;
    for slot in &mut pooled {
        *slot /= count;
    }
    pooled
}

/// Deterministic k-means over row vectors. Returns each row's cluster index.
/// Centroids seed from evenly spaced input positions; ties assign to the
/// lowest cluster index.
fn kmeans_assign(vectors: &[&Vec<f32>], k: usize) -> Vec<usize> {
    let n = vectors.len();
    let k = k.clamp(1, n);

    let mut centroids: Vec<Vec<f32>> = (0..k)
        .map(|i| vectors[i * n / k].clone())
        .collect();
    let mut assignments = vec![0_usize; n];

    for _ in 0..KMEANS_MAX_ITERATIONS {
        let mut changed = false;

        for (row, vector) in vectors.iter().enumerate() {
            let mut best = 0_usize;
            let mut best_distance = f32::INFINITY;
            for (cluster, centroid) in centroids.iter().enumerate() {
                let distance = squared_distance(vector, centroid);
                if distance < best_distance {
                    best_distance = distance;
                    best = cluster;
                }
            }
            if assignments[row] != best {
                assignments[row] = best;
                changed = true;
            }
        }

        if !changed {
            break;
        }

        for (cluster, centroid) in centroids.iter_mut().enumerate() {
            let members: Vec<&Vec<f32>> = vectors
                .iter()
                .enumerate()
                .filter(|(row, _)| assignments[*row] == cluster)
                .map(|(_, v)| *v)
                .collect();
            if !members.is_empty() {
                *centroid = mean_pool(&members);
            }
        }
    }

    assignments
}

/// Build the tree from `(text, embedding)` chunk pairs. Returns None for an
/// empty input. A single chunk becomes its own root.
pub fn build_tree(chunks: Vec<(String, Vec<f32>)>, branching: usize) -> Option<VectorTree> {
    if chunks.is_empty() {
        return None;
    }
    let branching = branching.max(2);

    let mut nodes: HashMap<String, VectorTreeNode> = HashMap::new();
    let mut counter = 0_usize;
    let mut next_id = |counter: &mut usize| {
        let id = format!("vt-{counter}");
        *counter += 1;
        id
    };

    let mut current_layer: Vec<String> = Vec::new();
    for (text, vector) in chunks {
        let id = next_id(&mut counter);
        nodes.insert(
            id.clone(),
            VectorTreeNode {
                id: id.clone(),
                vector,
                child_ids: Vec::new(),
                depth: 0,
                leaf_text: Some(text),
            },
        );
        current_layer.push(id);
    }

    let mut depth = 0_usize;
    while current_layer.len() > 1 {
        depth += 1;
        let vectors: Vec<&Vec<f32>> = current_layer
            .iter()
            .map(|id| &nodes[id].vector)
            .collect();
        let k = current_layer.len().div_ceil(branching);
        let assignments = kmeans_assign(&vectors, k);

        let mut next_layer = Vec::new();
        for cluster in 0..k {
            let member_ids: Vec<String> = current_layer
                .iter()
                .enumerate()
                .filter(|(row, _)| assignments[*row] == cluster)
                .map(|(_, id)| id.clone())
                .collect();
            if member_ids.is_empty() {
                continue;
            }

            let member_vectors: Vec<&Vec<f32>> = member_ids
                .iter()
                .map(|id| &nodes[id].vector)
                .collect();
            let parent_vector = mean_pool(&member_vectors);

            let id = next_id(&mut counter);
            nodes.insert(
                id.clone(),
                VectorTreeNode {
                    id: id.clone(),
                    vector: parent_vector,
                    child_ids: member_ids,
                    depth,
                    leaf_text: None,
                },
            );
            next_layer.push(id);
        }

        // A degenerate layer that failed to shrink would never terminate.
        if next_layer.len() >= current_layer.len() {
            break;
        }
        current_layer = next_layer;
    }

    let root_id = current_layer.first()?.clone();
    Some(VectorTree { nodes, root_id })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks_around(centers: &[(f32, f32)], per_center: usize) -> Vec<(String, Vec<f32>)> {
        let mut chunks = Vec::new();
        for (c, (x, y)) in centers.iter().enumerate() {
            for i in 0..per_center {
                let jitter = i as f32 * 0.01;
                chunks.push((
                    format!("chunk {c}-{i}"),
                    vec![x + jitter, y - jitter],
                ));
            }
        }
        chunks
    }

    #[test]
    fn test_empty_input_produces_no_tree() {
        assert!(build_tree(Vec::new(), 10).is_none());
    }

    #[test]
    fn test_single_chunk_is_its_own_root() {
        let tree = build_tree(vec![("only".to_string(), vec![1.0, 0.0])], 10)
            .expect("tree");
        let root = tree.root().expect("root");
        assert_eq!(root.leaf_text.as_deref(), Some("only"));
        assert_eq!(root.depth, 0);
        assert_eq!(tree.nodes.len(), 1);
    }

    #[test]
    fn test_tree_reduces_to_single_root() {
        let chunks = chunks_around(&[(0.0, 0.0), (10.0, 10.0), (0.0, 10.0)], 8);
        let tree = build_tree(chunks, 4).expect("tree");

        let root = tree.root().expect("root");
        assert!(root.depth >= 1);
        assert!(!root.child_ids.is_empty());

        // Every non-root node is referenced by exactly one parent
        let mut referenced: Vec<&String> = tree
            .nodes
            .values()
            .flat_map(|n| n.child_ids.iter())
            .collect();
        referenced.sort();
        referenced.dedup();
        assert_eq!(referenced.len(), tree.nodes.len() - 1);
    }

    #[test]
    fn test_parent_vector_is_mean_of_children() {
        let chunks = vec![
            ("a".to_string(), vec![0.0, 0.0]),
            ("b".to_string(), vec![2.0, 4.0]),
        ];
        let tree = build_tree(chunks, 10).expect("tree");
        let root = tree.root().expect("root");
        assert_eq!(root.child_ids.len(), 2);
        assert_eq!(root.vector, vec![1.0, 2.0]);
    }

    #[test]
    fn test_construction_is_deterministic() {
        let chunks = chunks_around(&[(0.0, 0.0), (5.0, 5.0)], 12);
        let a = build_tree(chunks.clone(), 5).expect("tree a");
        let b = build_tree(chunks, 5).expect("tree b");
        assert_eq!(a, b);
    }

    #[test]
    fn test_clusters_respect_geometry() {
        // Two tight, well-separated groups with branching sized so the first
        // layer builds exactly two parents.
        let chunks = chunks_around(&[(0.0, 0.0), (100.0, 100.0)], 5);
        let tree = build_tree(chunks, 5).expect("tree");

        let layer_one: Vec<&VectorTreeNode> = tree
            .nodes
            .values()
            .filter(|n| n.depth == 1)
            .collect();
        assert_eq!(layer_one.len(), 2);

        for parent in layer_one {
            let leaf_prefixes: Vec<char> = parent
                .child_ids
                .iter()
                .filter_map(|id| tree.nodes[id].leaf_text.as_ref())
                .filter_map(|t| t.chars().nth(6))
                .collect();
            assert!(
                leaf_prefixes.iter().all(|c| *c == leaf_prefixes[0]),
                "a cluster mixed chunks from different groups"
            );
        }
    }
}
