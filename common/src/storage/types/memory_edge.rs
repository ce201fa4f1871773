use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage::types::memory_node::ensure_namespace;
use crate::{error::AppError, storage::db::SurrealDbClient};

/// Weight attached to an edge when the writer did not supply one.
pub const DEFAULT_EDGE_WEIGHT: f32 = 0.5;

/// Maximum nodes pulled in per expansion hop.
pub const MAX_FANOUT_PER_HOP: usize = 200;

/// Well-known edge kinds. The set is open; these are the names the
/// extractor and the workspace layer emit.
pub mod edge_kind {
    pub const RELATED_TO: &str = "related_to";
    pub const FAMILY_MEMBER: &str = "family_member";
    pub const HAS_MANAGER: &str = "has_manager";
    pub const WORKS_AT: &str = "works_at";
    pub const LIKES: &str = "likes";
    pub const PART_OF: &str = "part_of";
    pub const PRODUCED_BY: &str = "produced_by";
    pub const SUPERSEDES: &str = "supersedes";
    pub const HAS_ADMIN: &str = "has_admin";
    pub const HAS_MEMBER: &str = "has_member";
}

fn default_weight() -> f32 {
    DEFAULT_EDGE_WEIGHT
}

fn deserialize_record_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    // Edge endpoints come back as Things from RELATE rows.
    let thing = surrealdb::sql::Thing::deserialize(deserializer)?;
    Ok(thing.id.to_raw())
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MemoryEdge {
    pub id: String,
    #[serde(rename = "in", deserialize_with = "deserialize_record_id")]
    pub in_: String,
    #[serde(deserialize_with = "deserialize_record_id")]
    pub out: String,
    pub kind: String,
    #[serde(default = "default_weight")]
    pub weight: f32,
    pub namespace: String,
    pub source_id: String,
}

/// Edge endpoints with their namespace, for co-occurrence sampling.
#[derive(Debug, Deserialize, Clone)]
pub struct EdgeEndpoints {
    #[serde(rename = "in", deserialize_with = "deserialize_record_id")]
    pub from: String,
    #[serde(rename = "out", deserialize_with = "deserialize_record_id")]
    pub to: String,
    pub namespace: String,
}

/// One outgoing edge seen during traversal.
#[derive(Debug, Deserialize, Clone)]
pub struct OutgoingEdge {
    #[serde(rename = "in", deserialize_with = "deserialize_record_id")]
    pub from: String,
    #[serde(rename = "out", deserialize_with = "deserialize_record_id")]
    pub to: String,
    pub kind: String,
    #[serde(default = "default_weight")]
    pub weight: f32,
}

impl MemoryEdge {
    pub fn new(
        in_: String,
        out: String,
        kind: String,
        weight: f32,
        namespace: String,
        source_id: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            in_,
            out,
            kind,
            weight: weight.clamp(f32::EPSILON, 1.0),
            namespace,
            source_id,
        }
    }

    pub async fn store(&self, db_client: &SurrealDbClient) -> Result<(), AppError> {
        ensure_namespace(&self.namespace)?;

        db_client
            .client
            .query(
                r#"BEGIN TRANSACTION;
                LET $in_node = type::thing('memory_node', $in_id);
                LET $out_node = type::thing('memory_node', $out_id);
                LET $edge = type::thing('relates_to', $edge_id);
                DELETE type::thing('relates_to', $edge_id);
                RELATE $in_node->$edge->$out_node SET
                    kind = $kind,
                    weight = $weight,
                    namespace = $namespace,
                    source_id = $source_id;
                COMMIT TRANSACTION;"#,
            )
            .bind(("edge_id", self.id.clone()))
            .bind(("in_id", self.in_.clone()))
            .bind(("out_id", self.out.clone()))
            .bind(("kind", self.kind.clone()))
            .bind(("weight", self.weight))
            .bind(("namespace", self.namespace.clone()))
            .bind(("source_id", self.source_id.clone()))
            .await?
            .check()?;

        Ok(())
    }

    /// Outgoing edges for a frontier of node ids, optionally restricted to an
    /// allowed kind set. Fan-out is bounded per hop.
    pub async fn out_neighbors(
        db: &SurrealDbClient,
        namespace: &str,
        node_ids: &[String],
        allowed_kinds: Option<&[&str]>,
    ) -> Result<Vec<OutgoingEdge>, AppError> {
        ensure_namespace(namespace)?;
        if node_ids.is_empty() {
            return Ok(Vec::new());
        }

        let things: Vec<surrealdb::sql::Thing> = node_ids
            .iter()
            .map(|id| surrealdb::sql::Thing::from(("memory_node", id.as_str())))
            .collect();

        let sql = match allowed_kinds {
            Some(_) => {
                "SELECT in, out, kind, weight FROM relates_to
                 WHERE in IN $frontier AND namespace = $namespace AND kind IN $kinds
                 LIMIT $limit"
            }
            None => {
                "SELECT in, out, kind, weight FROM relates_to
                 WHERE in IN $frontier AND namespace = $namespace
                 LIMIT $limit"
            }
        };

        let mut query = db
            .client
            .query(sql)
            .bind(("frontier", things))
            .bind(("namespace", namespace.to_owned()))
            .bind(("limit", MAX_FANOUT_PER_HOP));
        if let Some(kinds) = allowed_kinds {
            let kinds: Vec<String> = kinds.iter().map(|k| (*k).to_string()).collect();
            query = query.bind(("kinds", kinds));
        }

        Ok(query.await?.take(0)?)
    }

    /// Breadth-first expansion from seed ids, deduplicated across hops.
    /// Returns all node ids reached, the seeds included.
    pub async fn expand(
        db: &SurrealDbClient,
        namespace: &str,
        seed_ids: &[String],
        depth: usize,
        allowed_kinds: Option<&[&str]>,
    ) -> Result<HashSet<String>, AppError> {
        ensure_namespace(namespace)?;

        let mut visited: HashSet<String> = seed_ids.iter().cloned().collect();
        let mut frontier: Vec<String> = seed_ids.to_vec();

        for _ in 0..depth {
            if frontier.is_empty() {
                break;
            }

            let edges = Self::out_neighbors(db, namespace, &frontier, allowed_kinds).await?;
            let mut next = Vec::new();
            for edge in edges {
                if visited.insert(edge.to.clone()) {
                    next.push(edge.to);
                }
                if next.len() >= MAX_FANOUT_PER_HOP {
                    break;
                }
            }
            frontier = next;
        }

        Ok(visited)
    }

    /// Every content edge in the store as `(namespace, from, to)` triples,
    /// for co-occurrence analysis across namespaces. Structural edge kinds
    /// are excluded.
    pub async fn content_edge_endpoints(
        db: &SurrealDbClient,
        kinds: &[&str],
    ) -> Result<Vec<EdgeEndpoints>, AppError> {
        let kinds: Vec<String> = kinds.iter().map(|k| (*k).to_string()).collect();

        Ok(db
            .client
            .query("SELECT in, out, namespace FROM relates_to WHERE kind IN $kinds")
            .bind(("kinds", kinds))
            .await?
            .take(0)?)
    }

    pub async fn delete_by_source_id(
        source_id: &str,
        db_client: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db_client
            .client
            .query("DELETE FROM relates_to WHERE source_id = $source_id")
            .bind(("source_id", source_id.to_owned()))
            .await?
            .check()?;

        Ok(())
    }
}
