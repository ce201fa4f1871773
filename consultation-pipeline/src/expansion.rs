//! Query expansion: an LLM proposes search terms and entity names; on any
//! failure the query falls back to plain whitespace tokenization.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use common::utils::llm::LanguageModel;
use common::utils::sanitize::sanitize_prompt_input;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct QueryExpansion {
    #[serde(default)]
    pub search_terms: Vec<String>,
    #[serde(default)]
    pub entity_names: Vec<String>,
}

impl QueryExpansion {
    /// All terms usable for full-text matching, deduplicated, in order.
    pub fn all_terms(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.search_terms
            .iter()
            .chain(self.entity_names.iter())
            .filter(|t| !t.trim().is_empty())
            .filter(|t| seen.insert(t.to_lowercase()))
            .cloned()
            .collect()
    }
}

/// Whitespace tokenization keeping terms of three or more characters.
pub fn fallback_tokenize(query: &str) -> QueryExpansion {
    QueryExpansion {
        search_terms: query
            .split_whitespace()
            .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|t| t.chars().count() >= 3)
            .map(str::to_lowercase)
            .collect(),
        entity_names: Vec::new(),
    }
}

pub async fn expand_query(
    llm: &Arc<dyn LanguageModel>,
    query: &str,
    deadline: Duration,
) -> QueryExpansion {
    let sanitized = sanitize_prompt_input(query);
    let prompt = format!(
        r#"Expand this memory query into search terms and probable entity names.

Query: "{query}"

Return JSON: {{"search_terms": ["..."], "entity_names": ["..."]}}"#,
        query = sanitized.text
    );

    match llm.extract_json(&prompt, deadline).await {
        Ok(value) => match serde_json::from_value::<QueryExpansion>(value) {
            Ok(expansion) if !expansion.all_terms().is_empty() => {
                debug!(terms = expansion.all_terms().len(), "query expanded");
                expansion
            }
            _ => fallback_tokenize(query),
        },
        Err(_) => fallback_tokenize(query),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::error::AppError;

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

    #[test]
    fn test_fallback_tokenize_filters_short_tokens() {
        let expansion = fallback_tokenize("what is my secret code?");
        assert_eq!(expansion.search_terms, vec!["what", "secret", "code"]);
    }

    #[tokio::test]
    async fn test_expansion_uses_llm_result() {
        let llm: Arc<dyn LanguageModel> = Arc::new(StubLm(Some(serde_json::json!({
            "search_terms": ["boss", "manager"],
            "entity_names": ["John Smith"]
        }))));

        let expansion = expand_query(&llm, "who is my boss?", Duration::from_secs(1)).await;
        assert_eq!(
            expansion.all_terms(),
            vec!["boss", "manager", "John Smith"]
        );
    }

    #[tokio::test]
    async fn test_expansion_falls_back_on_llm_failure() {
        let llm: Arc<dyn LanguageModel> = Arc::new(StubLm(None));

        let expansion = expand_query(&llm, "where does Emma live", Duration::from_secs(1)).await;
        assert_eq!(
            expansion.search_terms,
            vec!["where", "does", "emma", "live"]
        );
    }

    #[tokio::test]
    async fn test_expansion_falls_back_on_empty_llm_result() {
        let llm: Arc<dyn LanguageModel> = Arc::new(StubLm(Some(serde_json::json!({
            "search_terms": [],
            "entity_names": []
        }))));

        let expansion = expand_query(&llm, "favorite color", Duration::from_secs(1)).await;
        assert_eq!(expansion.search_terms, vec!["favorite", "color"]);
    }
}
