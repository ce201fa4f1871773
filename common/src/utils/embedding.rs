use std::sync::Arc;
use std::time::Duration;

use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client};
use sha2::{Digest, Sha256};

use crate::error::AppError;
use crate::utils::config::AppConfig;

/// Embedding backends. The hashed backend is deterministic and offline,
/// which is what the test suites run against.
pub enum EmbeddingProvider {
    OpenAi {
        client: Arc<Client<OpenAIConfig>>,
        model: String,
        dimensions: u32,
    },
    Hashed {
        dimensions: u32,
    },
}

impl EmbeddingProvider {
    pub fn from_config(
        config: &AppConfig,
        client: Arc<Client<OpenAIConfig>>,
    ) -> Self {
        Self::OpenAi {
            client,
            model: config.embedding_model.clone(),
            dimensions: config.embedding_dimensions,
        }
    }

    pub fn new_hashed(dimensions: u32) -> Self {
        Self::Hashed { dimensions }
    }

    pub fn dimension(&self) -> usize {
        match self {
            Self::OpenAi { dimensions, .. } | Self::Hashed { dimensions } => *dimensions as usize,
        }
    }

    pub async fn embed(&self, input: &str, deadline: Duration) -> Result<Vec<f32>, AppError> {
        match self {
            Self::OpenAi {
                client,
                model,
                dimensions,
            } => {
                let request = CreateEmbeddingRequestArgs::default()
                    .model(model)
                    .dimensions(*dimensions)
                    .input([input])
                    .build()?;

                let embeddings = client.embeddings();
                let call = embeddings.create(request);
                let response = tokio::time::timeout(deadline, call)
                    .await
                    .map_err(|_| {
                        AppError::LLMUnavailable(format!(
                            "embedding call timed out after {deadline:?}"
                        ))
                    })??;

                let embedding: Vec<f32> = response
                    .data
                    .first()
                    .ok_or_else(|| AppError::LLMParsing("No embedding data received".into()))?
                    .embedding
                    .clone();

                Ok(embedding)
            }
            Self::Hashed { dimensions } => Ok(hashed_embedding(input, *dimensions as usize)),
        }
    }
}

/// Deterministic bag-of-tokens embedding: each token hashes to a bucket and a
/// sign, the result is L2-normalized. Texts sharing vocabulary land close in
/// cosine space, which is all the offline tests need.
fn hashed_embedding(input: &str, dimensions: usize) -> Vec<f32> {
    let mut vector = vec![0.0_f32; dimensions.max(1)];

    for token in input
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let digest = Sha256::digest(token.as_bytes());
        let bucket = usize::from(digest[0]) << 8 | usize::from(digest[1]);
        let index = bucket % vector.len();
        let sign = if digest[2] % 2 == 0 { 1.0 } else { -1.0 };
        if let Some(slot) = vector.get_mut(index) {
            *slot += sign;
        }
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }

    vector
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
