//! Embedding generation for the vector index
//!
//! Produces fixed-size vectors for question text. A remote embedding
//! endpoint can be configured; when it is absent or fails, a local hashed
//! n-gram embedding keeps the pipeline running. The local scheme is crude
//! but deterministic, which is what the sync loop needs: re-embedding the
//! same question always yields the same vector.

use crate::error::{MathesisError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tracing::{debug, warn};

/// Embedding dimension (384 for compatibility with all-MiniLM-L6-v2)
pub const EMBEDDING_DIM: usize = 384;

/// Embedding generator with optional remote backend
pub struct Embedder {
    client: Client,
    endpoint: Option<String>,
    model: String,
}

#[derive(Serialize)]
struct RemoteRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct RemoteResponse {
    embedding: Vec<f32>,
}

impl Embedder {
    /// Local-only embedder (hashed n-grams, no network)
    pub fn local() -> Self {
        Self {
            client: Client::new(),
            endpoint: None,
            model: String::new(),
        }
    }

    /// Embedder backed by a remote endpoint, with local fallback
    pub fn with_remote(endpoint: String, model: String) -> Self {
        Self {
            client: Client::new(),
            endpoint: Some(endpoint),
            model,
        }
    }

    /// Generate an embedding vector for `text`
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!("Generating embedding for text ({} chars)", text.len());

        if let Some(endpoint) = &self.endpoint {
            match self.call_remote(endpoint, text).await {
                Ok(embedding) => return Ok(embedding),
                Err(e) => {
                    warn!("Remote embedding failed, using local fallback: {}", e);
                }
            }
        }

        Ok(Self::local_embedding(text))
    }

    async fn call_remote(&self, endpoint: &str, text: &str) -> Result<Vec<f32>> {
        let request = RemoteRequest {
            model: &self.model,
            input: text,
        };

        let response = self
            .client
            .post(endpoint)
            .json(&request)
            .send()
            .await?
            .error_for_status()?;

        let body: RemoteResponse = response.json().await?;

        if body.embedding.len() != EMBEDDING_DIM {
            return Err(MathesisError::Embedding(format!(
                "remote returned {} dimensions, expected {}",
                body.embedding.len(),
                EMBEDDING_DIM
            )));
        }

        Ok(body.embedding)
    }

    /// Hashed character n-gram embedding, normalized to unit length
    ///
    /// Question text here is short and often CJK, where one character is
    /// a morpheme and whitespace tokenization finds nothing. Unigrams are
    /// included for that reason, and longer n-grams weigh more since they
    /// carry more word-like signal. Whitespace-delimited tokens, where
    /// they exist, weigh the most.
    fn local_embedding(text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0; EMBEDDING_DIM];

        let text_lower = text.to_lowercase();
        let chars: Vec<char> = text_lower.chars().collect();

        for window_size in 1..=3 {
            for window in chars.windows(window_size) {
                let mut hasher = DefaultHasher::new();
                window_size.hash(&mut hasher);
                window.iter().collect::<String>().hash(&mut hasher);
                let hash = hasher.finish();

                let dim = (hash as usize) % EMBEDDING_DIM;
                embedding[dim] += window_size as f32;
            }
        }

        for word in text_lower.split_whitespace() {
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            let hash = hasher.finish();

            let dim = (hash as usize) % EMBEDDING_DIM;
            embedding[dim] += 4.0;
        }

        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for val in &mut embedding {
                *val /= magnitude;
            }
        }

        embedding
    }
}

/// Cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    dot_product / (magnitude_a * magnitude_b)
}
