//! Context composition and the synthesis call that turns retrieved facts
//! into a brief. Synthesis failures degrade to a structured fact listing
//! with zero confidence instead of failing the consultation.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use common::utils::llm::LanguageModel;
use common::utils::sanitize::sanitize_prompt_input;

use crate::scoring::ScoredNode;

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisResult {
    pub brief: String,
    pub confidence: f32,
    pub degraded: bool,
}

#[derive(Debug, Deserialize)]
struct SynthesisResponse {
    brief: String,
    #[serde(default)]
    confidence: f32,
}

/// Facts rendered the way the synthesis prompt consumes them: name,
/// description, kind, and any attributes worth carrying.
pub fn compose_facts(candidates: &[ScoredNode]) -> String {
    candidates
        .iter()
        .map(|scored| {
            let node = &scored.node;
            let mut line = format!("- {}", node.name);
            if !node.description.is_empty() {
                line.push_str(&format!(": {}", node.description));
            } else {
                line.push_str(&format!(" ({:?})", node.kind));
            }
            if !node.attributes.is_empty() {
                let mut attrs: Vec<String> = node
                    .attributes
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect();
                attrs.sort();
                line.push_str(&format!(" [{}]", attrs.join(", ")));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// The fallback answer when synthesis is unavailable: the facts themselves.
pub fn degraded_answer(facts: &str) -> String {
    if facts.is_empty() {
        String::new()
    } else {
        format!("Retrieved facts (synthesis unavailable):\n{facts}")
    }
}

pub async fn synthesize(
    llm: &Arc<dyn LanguageModel>,
    query: &str,
    facts: &str,
    prior_turn_summary: Option<&str>,
    deadline: Duration,
) -> SynthesisResult {
    if facts.is_empty() {
        return SynthesisResult {
            brief: String::new(),
            confidence: 0.0,
            degraded: false,
        };
    }

    let sanitized_query = sanitize_prompt_input(query);
    let context_section = prior_turn_summary
        .map(|summary| format!("Previous turn:\n{summary}\n\n"))
        .unwrap_or_default();

    let prompt = format!(
        r#"Answer the question using only the remembered facts below.

{context_section}Facts:
{facts}

Question: {query}

Return JSON: {{"brief": "a concise answer", "confidence": 0.0 to 1.0}}"#,
        query = sanitized_query.text,
    );

    match llm.extract_json(&prompt, deadline).await {
        Ok(value) => match serde_json::from_value::<SynthesisResponse>(value) {
            Ok(response) => SynthesisResult {
                brief: response.brief,
                confidence: response.confidence.clamp(0.0, 1.0),
                degraded: false,
            },
            Err(err) => {
                warn!(error = %err, "synthesis response unparseable; degrading");
                SynthesisResult {
                    brief: degraded_answer(facts),
                    confidence: 0.0,
                    degraded: true,
                }
            }
        },
        Err(err) => {
            warn!(error = %err, "synthesis failed; degrading");
            SynthesisResult {
                brief: degraded_answer(facts),
                confidence: 0.0,
                degraded: true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::error::AppError;
    use common::storage::types::memory_node::{MemoryNode, NodeKind};
    use crate::scoring::Signals;

    struct StubLm(Option<serde_json::Value>);

    #[async_trait]
    impl LanguageModel for StubLm {
        async fn extract_json(
            &self,
            _prompt: &str,
            _deadline: Duration,
        ) -> Result<serde_json::Value, AppError> {
            self.0
                .clone()
                .ok_or_else(|| AppError::LLMUnavailable("down".into()))
        }

        async fn generate(
            &self,
            _system: &str,
            _user: &str,
            _deadline: Duration,
        ) -> Result<String, AppError> {
            Ok(String::new())
        }
    }

    fn scored(name: &str, description: &str) -> ScoredNode {
        let mut node = MemoryNode::new(
            "user_a".to_string(),
            name.to_string(),
            NodeKind::Fact,
            description.to_string(),
            "src".to_string(),
        );
        node.attributes
            .insert("merge_count".to_string(), "2".to_string());
        ScoredNode {
            node,
            signals: Signals::default(),
            score: 0.5,
        }
    }

    #[test]
    fn test_compose_facts_renders_name_description_attributes() {
        let facts = compose_facts(&[scored("Emma", "User's sister")]);
        assert_eq!(facts, "- Emma: User's sister [merge_count=2]");
    }

    #[tokio::test]
    async fn test_synthesize_happy_path() {
        let llm: Arc<dyn LanguageModel> = Arc::new(StubLm(Some(serde_json::json!({
            "brief": "Emma is your sister.",
            "confidence": 0.9
        }))));

        let result = synthesize(
            &llm,
            "who is Emma?",
            "- Emma: User's sister",
            None,
            Duration::from_secs(1),
        )
        .await;

        assert_eq!(result.brief, "Emma is your sister.");
        assert!((result.confidence - 0.9).abs() < f32::EPSILON);
        assert!(!result.degraded);
    }

    #[tokio::test]
    async fn test_synthesize_degrades_on_llm_failure() {
        let llm: Arc<dyn LanguageModel> = Arc::new(StubLm(None));

        let result = synthesize(
            &llm,
            "who is Emma?",
            "- Emma: User's sister",
            None,
            Duration::from_secs(1),
        )
        .await;

        assert!(result.degraded);
        assert_eq!(result.confidence, 0.0);
        assert!(result.brief.contains("Emma: User's sister"));
    }

    #[tokio::test]
    async fn test_empty_facts_short_circuit() {
        let llm: Arc<dyn LanguageModel> = Arc::new(StubLm(None));
        let result = synthesize(&llm, "anything?", "", None, Duration::from_secs(1)).await;
        assert!(result.brief.is_empty());
        assert!(!result.degraded);
    }
}
