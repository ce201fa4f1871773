#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

//! The reflection loop: periodic activation decay, insight generation over
//! co-activated node pairs, and slower-cadence namespace summaries.
//!
//! A tick that fires while the previous one is still running is skipped
//! outright, so reflection can never build a backlog or throttle ingestion
//! and consultation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use common::activation;
use common::error::AppError;
use common::storage::db::SurrealDbClient;
use common::storage::types::memory_edge::{edge_kind, MemoryEdge};
use common::storage::types::memory_node::{MemoryNode, NodeKind};
use common::utils::config::{DeadlineConfig, KernelTuning};
use common::utils::llm::LanguageModel;

/// Edge kinds that count as content for co-occurrence sampling.
const CONTENT_EDGE_KINDS: &[&str] = &[
    edge_kind::RELATED_TO,
    edge_kind::FAMILY_MEMBER,
    edge_kind::HAS_MANAGER,
    edge_kind::WORKS_AT,
    edge_kind::LIKES,
    edge_kind::PART_OF,
];

const INSIGHT_CATEGORIES: &[&str] = &["warning", "opportunity", "dependency", "pattern"];

/// What one tick accomplished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReflectionReport {
    pub decayed: usize,
    pub pairs_probed: usize,
    pub insights_created: usize,
    pub summaries_updated: usize,
    pub skipped: bool,
}

/// A candidate pair of nodes sharing out-neighbors within one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidatePair {
    pub namespace: String,
    pub a: String,
    pub b: String,
    pub shared_neighbors: usize,
}

/// Deterministic sampling rule: pairs of distinct source nodes pointing at a
/// common neighbor, ordered by shared-neighbor count descending, then by the
/// lexicographically smallest `(namespace, a, b)` triple. The first `limit`
/// pairs are probed.
pub fn candidate_pairs(
    edges: &[(String, String, String)],
    limit: usize,
) -> Vec<CandidatePair> {
    // neighbor -> sources pointing at it, per namespace
    let mut by_target: BTreeMap<(String, String), BTreeSet<String>> = BTreeMap::new();
    for (namespace, from, to) in edges {
        by_target
            .entry((namespace.clone(), to.clone()))
            .or_default()
            .insert(from.clone());
    }

    let mut shared: BTreeMap<(String, String, String), usize> = BTreeMap::new();
    for ((namespace, _target), sources) in by_target {
        let sources: Vec<&String> = sources.iter().collect();
        for i in 0..sources.len() {
            for j in (i + 1)..sources.len() {
                let key = (namespace.clone(), sources[i].clone(), sources[j].clone());
                *shared.entry(key).or_insert(0) += 1;
            }
        }
    }

    let mut pairs: Vec<CandidatePair> = shared
        .into_iter()
        .map(|((namespace, a, b), count)| CandidatePair {
            namespace,
            a,
            b,
            shared_neighbors: count,
        })
        .collect();

    pairs.sort_by(|x, y| {
        y.shared_neighbors
            .cmp(&x.shared_neighbors)
            .then_with(|| (&x.namespace, &x.a, &x.b).cmp(&(&y.namespace, &y.a, &y.b)))
    });
    pairs.truncate(limit);
    pairs
}

#[derive(Debug, Deserialize)]
struct InsightProbe {
    has_insight: bool,
    #[serde(default)]
    insight_type: String,
    #[serde(default)]
    summary: String,
}

pub struct ReflectionLoop {
    db: Arc<SurrealDbClient>,
    llm: Arc<dyn LanguageModel>,
    tuning: KernelTuning,
    llm_deadline: Duration,
    busy: AsyncMutex<()>,
    ticks: AtomicU32,
}

impl ReflectionLoop {
    pub fn new(
        db: Arc<SurrealDbClient>,
        llm: Arc<dyn LanguageModel>,
        tuning: KernelTuning,
        deadlines: &DeadlineConfig,
    ) -> Self {
        Self {
            db,
            llm,
            tuning,
            llm_deadline: Duration::from_secs(deadlines.extraction_timeout_secs),
            busy: AsyncMutex::new(()),
            ticks: AtomicU32::new(0),
        }
    }

    /// Run forever at the configured cadence.
    pub async fn run(self: Arc<Self>) {
        let period = Duration::from_secs(self.tuning.reflection_interval_secs.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(period_secs = period.as_secs(), "reflection loop started");

        loop {
            interval.tick().await;
            match self.tick().await {
                Ok(report) if report.skipped => {
                    debug!("previous reflection run still active; tick skipped");
                }
                Ok(report) => {
                    info!(
                        decayed = report.decayed,
                        pairs_probed = report.pairs_probed,
                        insights = report.insights_created,
                        summaries = report.summaries_updated,
                        "reflection tick finished"
                    );
                }
                Err(err) => warn!(error = %err, "reflection tick failed"),
            }
        }
    }

    /// One reflection pass. Returns `skipped: true` when a previous pass is
    /// still holding the loop.
    pub async fn tick(&self) -> Result<ReflectionReport, AppError> {
        let Ok(_guard) = self.busy.try_lock() else {
            return Ok(ReflectionReport {
                skipped: true,
                ..ReflectionReport::default()
            });
        };

        let mut report = ReflectionReport::default();

        report.decayed = activation::decay(
            &self.db,
            self.tuning.decay_daily_rate,
            chrono::Duration::seconds(self.tuning.protection_window_secs as i64),
        )
        .await?;

        self.generate_insights(&mut report).await?;

        let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        if tick % self.tuning.summary_every_ticks.max(1) == 0 {
            report.summaries_updated = self.refresh_summaries().await?;
        }

        MemoryNode::purge_superseded(&self.db, self.tuning.retention_days).await?;

        Ok(report)
    }

    async fn generate_insights(&self, report: &mut ReflectionReport) -> Result<(), AppError> {
        let endpoints =
            MemoryEdge::content_edge_endpoints(&self.db, CONTENT_EDGE_KINDS).await?;
        let edges: Vec<(String, String, String)> = endpoints
            .into_iter()
            .map(|e| (e.namespace, e.from, e.to))
            .collect();

        let pairs = candidate_pairs(&edges, self.tuning.insight_pairs_per_tick);

        for pair in pairs {
            let (Some(a), Some(b)) = (
                self.db.get_item::<MemoryNode>(&pair.a).await?,
                self.db.get_item::<MemoryNode>(&pair.b).await?,
            ) else {
                continue;
            };
            // Derived nodes never feed back into insight generation.
            if matches!(a.kind, NodeKind::Insight | NodeKind::Summary)
                || matches!(b.kind, NodeKind::Insight | NodeKind::Summary)
            {
                continue;
            }

            report.pairs_probed += 1;

            let Some(probe) = self.probe_pair(&a, &b).await else {
                continue;
            };
            if !probe.has_insight || probe.summary.trim().is_empty() {
                continue;
            }

            let category = if INSIGHT_CATEGORIES.contains(&probe.insight_type.as_str()) {
                probe.insight_type.clone()
            } else {
                "pattern".to_string()
            };

            let name = format!("insight: {} / {}", a.name, b.name);
            let existing =
                MemoryNode::find_by_identity(&self.db, &pair.namespace, &name, &NodeKind::Insight)
                    .await?;
            if existing.is_some() {
                continue;
            }

            let insight = MemoryNode::new(
                pair.namespace.clone(),
                name,
                NodeKind::Insight,
                probe.summary,
                "reflection".to_string(),
            )
            .with_tags(vec![category]);
            let insight = self
                .db
                .store_item(insight)
                .await?
                .ok_or_else(|| AppError::StoreReject("insight insert returned nothing".into()))?;

            for parent in [&a.id, &b.id] {
                MemoryEdge::new(
                    insight.id.clone(),
                    parent.clone(),
                    edge_kind::RELATED_TO.to_string(),
                    0.8,
                    pair.namespace.clone(),
                    "reflection".to_string(),
                )
                .store(&self.db)
                .await?;
            }

            report.insights_created += 1;
        }

        Ok(())
    }

    async fn probe_pair(&self, a: &MemoryNode, b: &MemoryNode) -> Option<InsightProbe> {
        let prompt = format!(
            r#"Two memories from the same knowledge graph share neighbors.

Memory 1 ({a_kind:?}): {a_name} - {a_desc}
Memory 2 ({b_kind:?}): {b_name} - {b_desc}

Is there a non-obvious insight connecting them? Categories: warning,
opportunity, dependency, pattern.

Return JSON: {{"has_insight": true or false, "insight_type": "...", "summary": "..."}}"#,
            a_kind = a.kind,
            a_name = a.name,
            a_desc = a.description,
            b_kind = b.kind,
            b_name = b.name,
            b_desc = b.description,
        );

        match self.llm.extract_json(&prompt, self.llm_deadline).await {
            Ok(value) => serde_json::from_value::<InsightProbe>(value).ok(),
            Err(err) => {
                debug!(error = %err, "insight probe failed");
                None
            }
        }
    }

    /// Refresh one Summary node per namespace from its hottest memories.
    async fn refresh_summaries(&self) -> Result<usize, AppError> {
        #[derive(Deserialize)]
        struct NamespaceRow {
            namespace: String,
        }

        let mut response = self
            .db
            .client
            .query("SELECT namespace FROM memory_node GROUP BY namespace")
            .await?;
        let namespaces: Vec<NamespaceRow> = response.take(0)?;

        let mut updated = 0_usize;
        for row in namespaces {
            let top: Vec<MemoryNode> = self
                .db
                .client
                .query(
                    "SELECT * FROM memory_node
                     WHERE namespace = $namespace AND superseded_by IS NONE
                       AND kind NOT IN ['Summary', 'Conversation']
                     ORDER BY activation DESC
                     LIMIT 10",
                )
                .bind(("namespace", row.namespace.clone()))
                .await?
                .take(0)?;
            if top.is_empty() {
                continue;
            }

            let digest: String = top
                .iter()
                .map(|n| format!("{}: {}", n.name, n.description))
                .collect::<Vec<_>>()
                .join("; ")
                .chars()
                .take(1000)
                .collect();

            match MemoryNode::find_by_identity(
                &self.db,
                &row.namespace,
                "namespace summary",
                &NodeKind::Summary,
            )
            .await?
            {
                Some(mut summary) => {
                    summary.description = digest;
                    summary.updated_at = chrono::Utc::now();
                    self.db.update_item(summary).await?;
                }
                None => {
                    let summary = MemoryNode::new(
                        row.namespace.clone(),
                        "namespace summary".to_string(),
                        NodeKind::Summary,
                        digest,
                        "reflection".to_string(),
                    );
                    self.db.store_item(summary).await?;
                }
            }
            updated += 1;
        }

        Ok(updated)
    }
}

impl std::fmt::Debug for ReflectionLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReflectionLoop")
            .field("ticks", &self.ticks.load(Ordering::SeqCst))
            .finish()
    }
}
