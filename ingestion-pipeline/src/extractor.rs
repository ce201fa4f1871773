//! LLM-mediated entity extraction.
//!
//! Conversation turns go through a chitchat filter and input hardening
//! before a single few-shot prompt. Documents run a three-tier ladder:
//! rule-based regex first, representative-chunk selection second, and a
//! budgeted set of LLM calls last.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use common::error::AppError;
use common::storage::types::memory_node::NodeKind;
use common::utils::llm::LanguageModel;
use common::utils::sanitize::sanitize_prompt_input;

use crate::chunker::Chunk;

/// A relation suggested by extraction, to be wired once targets exist.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RelationDraft {
    pub target: String,
    #[serde(alias = "type")]
    pub kind: String,
}

/// One extracted entity before curation.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDraft {
    pub name: String,
    pub kind: NodeKind,
    pub description: String,
    pub tags: Vec<String>,
    pub relations: Vec<RelationDraft>,
}

/// Tier counters surfaced in the ingestion statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DocumentTierStats {
    pub tier1: u32,
    pub tier2_reps: u32,
    pub tier3_llm_calls: u32,
}

const CHITCHAT_PATTERNS: &[&str] = &[
    r"^(hi|hello|hey|yo|sup)[\s!.?]*$",
    r"^(bye|goodbye|see you|later|cya)[\s!.?]*$",
    r"^(thanks|thank you|thx|ty)[\s!.?]*$",
    r"^(ok|okay|sure|yes|no|yep|nope)[\s!.?]*$",
    r"^(good|great|nice|cool|awesome)[\s!.?]*$",
    r"^(how are you|what's up|how's it going)[\s!.?]*$",
    r"^(lol|haha|hehe|xd)[\s!.?]*$",
    r"^[\s.!?]+$",
];

fn chitchat_regexes() -> &'static Vec<Regex> {
    static REGEXES: OnceLock<Vec<Regex>> = OnceLock::new();
    REGEXES.get_or_init(|| {
        CHITCHAT_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(&format!("(?i){p}")).ok())
            .collect()
    })
}

/// Messages that never warrant an LLM call.
pub fn is_chitchat(text: &str) -> bool {
    let text = text.trim();
    if text.chars().count() < 3 {
        return true;
    }
    chitchat_regexes().iter().any(|r| r.is_match(text))
}

struct RulePattern {
    pattern: &'static str,
    kind: NodeKind,
    tags: &'static [&'static str],
    description: &'static str,
    cap: usize,
}

const RULE_PATTERNS: &[RulePattern] = &[
    RulePattern {
        pattern: r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
        kind: NodeKind::Entity,
        tags: &["email"],
        description: "Email address",
        cap: 20,
    },
    RulePattern {
        pattern: r#"https?://[^\s<>"{}|\\^`\[\]]+"#,
        kind: NodeKind::Entity,
        tags: &["url"],
        description: "Web address",
        cap: 10,
    },
    RulePattern {
        pattern: r"\$[\d,]+(?:\.\d{2})?",
        kind: NodeKind::Fact,
        tags: &["metric", "money"],
        description: "Monetary value",
        cap: 20,
    },
    RulePattern {
        pattern: r"\b\d+(?:\.\d+)?%",
        kind: NodeKind::Fact,
        tags: &["metric", "percentage"],
        description: "Percentage",
        cap: 20,
    },
    RulePattern {
        pattern: r"\b\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\b",
        kind: NodeKind::Event,
        tags: &["date"],
        description: "Date",
        cap: 20,
    },
];

fn rule_regexes() -> &'static Vec<(Regex, &'static RulePattern)> {
    static REGEXES: OnceLock<Vec<(Regex, &'static RulePattern)>> = OnceLock::new();
    REGEXES.get_or_init(|| {
        RULE_PATTERNS
            .iter()
            .filter_map(|rule| Regex::new(rule.pattern).map(|r| (r, rule)).ok())
            .collect()
    })
}

/// Raw JSON shape the extraction prompt demands.
#[derive(Debug, Deserialize)]
struct RawDraft {
    name: String,
    #[serde(alias = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    relations: Vec<RelationDraft>,
}

impl From<RawDraft> for EntityDraft {
    fn from(raw: RawDraft) -> Self {
        Self {
            name: raw.name,
            kind: raw.kind.map(NodeKind::from).unwrap_or(NodeKind::Entity),
            description: raw.description,
            tags: raw.tags,
            relations: raw.relations,
        }
    }
}

pub struct Extractor {
    llm: Arc<dyn LanguageModel>,
    extraction_deadline: Duration,
}

impl Extractor {
    pub fn new(llm: Arc<dyn LanguageModel>, extraction_deadline: Duration) -> Self {
        Self {
            llm,
            extraction_deadline,
        }
    }

    fn turn_prompt(user_text: &str, assistant_text: &str, context: Option<&str>) -> String {
        let context_line = context
            .map(|c| format!("Context: \"{c}\"\n"))
            .unwrap_or_default();

        format!(
            r#"Extract entities from this conversation. Return a JSON array.

EXAMPLES:
Conversation:
User: "My favorite dessert is gulab jamun"
AI: "That sounds delicious."
Output: [{{"name": "Gulab Jamun", "type": "Preference", "description": "User's favorite dessert", "tags": ["food", "dessert", "favorite"]}}]

Conversation:
User: "My sister Emma lives in Boston"
AI: "I've noted that about Emma."
Output: [{{"name": "Emma", "type": "Entity", "description": "User's sister", "tags": ["family", "sister"], "relations": [{{"target": "Boston", "type": "related_to"}}]}}, {{"name": "Boston", "type": "Entity", "description": "Where Emma lives", "tags": ["city", "location"]}}]

Conversation:
User: "I like hiking"
AI: "Hiking is great exercise."
Output: [{{"name": "Hiking", "type": "Preference", "description": "Activity user enjoys", "tags": ["hobby", "activity", "outdoors"]}}]

Conversation:
User: "The weather is nice today"
AI: "Yes it is."
Output: []

NOW EXTRACT FROM:
{context_line}Conversation:
User: "{user_text}"
AI: "{assistant_text}"

Output JSON array (empty [] if nothing to extract):"#
        )
    }

    fn drafts_from_json(value: serde_json::Value) -> Vec<EntityDraft> {
        let Some(items) = value.as_array() else {
            return Vec::new();
        };

        items
            .iter()
            .filter_map(|item| serde_json::from_value::<RawDraft>(item.clone()).ok())
            .filter(|raw| !raw.name.trim().is_empty())
            .map(EntityDraft::from)
            .collect()
    }

    /// Extract entities from one conversation turn. LLM failures degrade to
    /// an empty result so a turn never fails outright on provider trouble.
    pub async fn extract_turn(
        &self,
        user_text: &str,
        assistant_text: &str,
        context: Option<&str>,
    ) -> Vec<EntityDraft> {
        if is_chitchat(user_text) {
            debug!(
                preview = %user_text.chars().take(30).collect::<String>(),
                "skipping chitchat turn"
            );
            return Vec::new();
        }

        let user = sanitize_prompt_input(user_text);
        let assistant = sanitize_prompt_input(assistant_text);
        let prompt = Self::turn_prompt(&user.text, &assistant.text, context);

        match self.llm.extract_json(&prompt, self.extraction_deadline).await {
            Ok(value) => {
                let drafts = Self::drafts_from_json(value);
                debug!(count = drafts.len(), "extracted entities from turn");
                drafts
            }
            Err(err) => {
                warn!(error = %err, "turn extraction failed; producing no entities");
                Vec::new()
            }
        }
    }

    /// Tier 1: regex entities over the full text, no LLM involved.
    fn extract_rules(text: &str) -> Vec<EntityDraft> {
        let mut entities = Vec::new();

        for (regex, rule) in rule_regexes() {
            for m in regex.find_iter(text).take(rule.cap) {
                entities.push(EntityDraft {
                    name: m.as_str().to_string(),
                    kind: rule.kind,
                    description: rule.description.to_string(),
                    tags: rule.tags.iter().map(|t| (*t).to_string()).collect(),
                    relations: Vec::new(),
                });
            }
        }

        entities
    }

    async fn extract_chunk_with_llm(&self, text: &str) -> Result<Vec<EntityDraft>, AppError> {
        let sanitized = sanitize_prompt_input(text);
        let excerpt: String = sanitized.text.chars().take(2000).collect();
        let prompt = format!(
            r#"Extract key entities from this text. Return JSON array:
[{{"name": "...", "type": "Entity|Fact|Event|Preference", "description": "..."}}]

Text:
{excerpt}

JSON:"#
        );

        let value = self
            .llm
            .extract_json(&prompt, self.extraction_deadline)
            .await?;
        Ok(Self::drafts_from_json(value))
    }

    /// Tiered document extraction: regex, representative selection, then a
    /// budgeted LLM pass over the representatives only.
    pub async fn extract_document(
        &self,
        full_text: &str,
        chunks: &[Chunk],
        representative_stride: usize,
        llm_call_budget: usize,
    ) -> (Vec<EntityDraft>, DocumentTierStats) {
        let mut stats = DocumentTierStats::default();
        let mut entities = Self::extract_rules(full_text);
        stats.tier1 = entities.len() as u32;

        let stride = representative_stride.max(1);
        let representatives: Vec<&Chunk> = chunks
            .iter()
            .enumerate()
            .filter(|(i, _)| i % stride == 0)
            .map(|(_, c)| c)
            .collect();
        stats.tier2_reps = representatives.len() as u32;

        for chunk in representatives.iter().take(llm_call_budget) {
            match self.extract_chunk_with_llm(&chunk.text).await {
                Ok(mut drafts) => {
                    stats.tier3_llm_calls += 1;
                    entities.append(&mut drafts);
                }
                Err(err) => {
                    // Individual chunk failures are tolerated.
                    warn!(error = %err, "chunk extraction failed");
                }
            }
        }

        // Deduplicate within the document by (name, kind)
        let mut seen = std::collections::HashSet::new();
        entities.retain(|e| seen.insert((e.name.to_lowercase(), e.kind)));

        (entities, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct StubLm {
        responses: Mutex<Vec<Result<serde_json::Value, AppError>>>,
        calls: Mutex<u32>,
    }

    impl StubLm {
        fn returning(responses: Vec<Result<serde_json::Value, AppError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(0),
            })
        }

        fn call_count(&self) -> u32 {
            *self.calls.lock().expect("lock")
        }
    }

    #[async_trait]
    impl LanguageModel for StubLm {
        async fn extract_json(
            &self,
            _prompt: &str,
            _deadline: Duration,
        ) -> Result<serde_json::Value, AppError> {
            *self.calls.lock().expect("lock") += 1;
            let mut responses = self.responses.lock().expect("lock");
            if responses.is_empty() {
                Ok(serde_json::json!([]))
            } else {
                responses.remove(0)
            }
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

    fn chunk(text: &str) -> Chunk {
        Chunk {
            text: text.to_string(),
            start_offset: 0,
            end_offset: text.len(),
            page_number: None,
        }
    }

    #[test]
    fn test_chitchat_filter_matches_spec_patterns() {
        for text in [
            "hi", "Hello!", "hey", "thanks", "Thank you!!", "ok", "yep", "cool",
            "how are you", "lol", "...", "  ", "a",
        ] {
            assert!(is_chitchat(text), "{text:?} should be chitchat");
        }

        for text in [
            "My sister Emma lives in Boston",
            "what is the capital of France?",
            "remember that my badge code is 4242",
        ] {
            assert!(!is_chitchat(text), "{text:?} should not be chitchat");
        }
    }

    #[tokio::test]
    async fn test_chitchat_turn_short_circuits_without_llm_call() {
        let llm = StubLm::returning(vec![]);
        let extractor = Extractor::new(llm.clone(), Duration::from_secs(1));

        let drafts = extractor.extract_turn("hello", "Hi there!", None).await;
        assert!(drafts.is_empty());
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_extract_turn_parses_drafts() {
        let llm = StubLm::returning(vec![Ok(serde_json::json!([
            {
                "name": "Emma",
                "type": "Entity",
                "description": "User's sister",
                "tags": ["family"],
                "relations": [{"target": "Boston", "type": "related_to"}]
            },
            {"name": "Boston", "type": "Entity", "description": "A city"}
        ]))]);
        let extractor = Extractor::new(llm.clone(), Duration::from_secs(1));

        let drafts = extractor
            .extract_turn("My sister Emma lives in Boston", "Noted.", None)
            .await;

        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].name, "Emma");
        assert_eq!(drafts[0].kind, NodeKind::Entity);
        assert_eq!(drafts[0].relations.len(), 1);
        assert_eq!(drafts[0].relations[0].target, "Boston");
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_llm_failure_degrades_to_empty_result() {
        let llm = StubLm::returning(vec![Err(AppError::LLMUnavailable("down".into()))]);
        let extractor = Extractor::new(llm, Duration::from_secs(1));

        let drafts = extractor
            .extract_turn("My sister Emma lives in Boston", "Noted.", None)
            .await;
        assert!(drafts.is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_response_yields_empty_result() {
        let llm = StubLm::returning(vec![Ok(serde_json::json!({"not": "an array"}))]);
        let extractor = Extractor::new(llm, Duration::from_secs(1));

        let drafts = extractor
            .extract_turn("My sister Emma lives in Boston", "Noted.", None)
            .await;
        assert!(drafts.is_empty());
    }

    #[test]
    fn test_tier1_rule_extraction() {
        let text = "Contact sam@example.com or visit https://example.com. \
                    Budget was $12,000.50 which is 85% of the plan, due 12/31/2025.";
        let entities = Extractor::extract_rules(text);

        let names: Vec<&str> = entities.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"sam@example.com"));
        assert!(names.iter().any(|n| n.starts_with("https://example.com")));
        assert!(names.contains(&"$12,000.50"));
        assert!(names.contains(&"85%"));
        assert!(names.contains(&"12/31/2025"));
    }

    #[tokio::test]
    async fn test_document_tiers_cap_llm_calls_and_report_stats() {
        let draft = serde_json::json!([{"name": "Topic", "type": "Entity", "description": "d"}]);
        let llm = StubLm::returning((0..20).map(|_| Ok(draft.clone())).collect());
        let extractor = Extractor::new(llm.clone(), Duration::from_secs(1));

        // 60 chunks -> 12 representatives at stride 5, but budget caps at 10
        let chunks: Vec<Chunk> = (0..60).map(|i| chunk(&format!("chunk {i} body"))).collect();
        let (entities, stats) = extractor
            .extract_document("Revenue was $100 this week.", &chunks, 5, 10)
            .await;

        assert_eq!(stats.tier1, 1);
        assert_eq!(stats.tier2_reps, 12);
        assert_eq!(stats.tier3_llm_calls, 10);
        assert_eq!(llm.call_count(), 10);
        // Duplicate "Topic" drafts collapse to one
        assert_eq!(
            entities
                .iter()
                .filter(|e| e.name == "Topic")
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_document_tolerates_individual_chunk_failures() {
        let good = serde_json::json!([{"name": "Kept", "type": "Entity", "description": "d"}]);
        let llm = StubLm::returning(vec![
            Err(AppError::LLMUnavailable("down".into())),
            Ok(good),
        ]);
        let extractor = Extractor::new(llm, Duration::from_secs(1));

        let chunks: Vec<Chunk> = (0..10).map(|i| chunk(&format!("chunk {i}"))).collect();
        let (entities, stats) = extractor.extract_document("plain", &chunks, 5, 10).await;

        assert_eq!(stats.tier3_llm_calls, 1, "only the successful call counts");
        assert!(entities.iter().any(|e| e.name == "Kept"));
    }
}
