//! Vector index abstraction and its SQLite implementation
//!
//! The index holds one vector per active, synced corpus entry, keyed by a
//! deterministic `vector_id` derived from namespace and question text.
//! Namespaces are physically separated at query time, never mixed.

pub mod embeddings;
pub mod sqlite_vec;

use crate::error::Result;
use crate::types::Namespace;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use embeddings::{cosine_similarity, Embedder, EMBEDDING_DIM};
pub use sqlite_vec::SqliteVecIndex;

/// One search hit from the index
#[derive(Debug, Clone)]
pub struct IndexMatch {
    pub vector_id: String,
    pub question: String,
    pub answer: String,

    /// Similarity in [0, 1], higher is closer
    pub score: f32,
    pub metadata: IndexMetadata,
}

/// Metadata stored alongside each vector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub category: Option<String>,
    pub quality_score: f32,
    pub source: String,
}

/// Searchable vector index over corpus entries
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Top-k nearest entries within a namespace
    async fn search(
        &self,
        query: &str,
        limit: usize,
        namespace: &Namespace,
    ) -> Result<Vec<IndexMatch>>;

    /// Insert or replace one entry's vector and metadata
    ///
    /// Returns the vector id, or `None` when the question is blank and
    /// there is nothing to embed.
    async fn upsert_single<'a>(
        &self,
        question: &str,
        answer: &str,
        category: Option<&'a str>,
        namespace: &Namespace,
        quality_score: f32,
        source: &str,
    ) -> Result<Option<String>>;

    /// Patch metadata in place without re-embedding
    ///
    /// Returns false when the vector does not exist.
    async fn update_metadata(
        &self,
        vector_id: &str,
        metadata: &IndexMetadata,
        namespace: &Namespace,
    ) -> Result<bool>;

    /// Remove one vector; returns false when it was already absent
    async fn delete_vector(&self, vector_id: &str, namespace: &Namespace) -> Result<bool>;
}

/// Deterministic vector id for a (namespace, question) pair
///
/// Re-upserting the same question in the same namespace always lands on
/// the same id, so sync retries replace rather than duplicate.
pub fn vector_id_for(namespace: &Namespace, question: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(namespace.index_key().as_bytes());
    hasher.update(b"\x00");
    hasher.update(question.trim().as_bytes());
    let digest = hasher.finalize();
    hex_prefix(&digest, 16)
}

fn hex_prefix(bytes: &[u8], len: usize) -> String {
    bytes
        .iter()
        .take(len)
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_id_deterministic() {
        let ns = Namespace::Shared;
        assert_eq!(vector_id_for(&ns, "价格多少"), vector_id_for(&ns, "价格多少"));
        assert_eq!(vector_id_for(&ns, " 价格多少 "), vector_id_for(&ns, "价格多少"));
    }

    #[test]
    fn test_vector_id_separates_namespaces() {
        let shared = Namespace::Shared;
        let tenant = Namespace::Tenant {
            id: "acme".to_string(),
        };
        assert_ne!(vector_id_for(&shared, "q"), vector_id_for(&tenant, "q"));
    }

    #[test]
    fn test_vector_id_is_hex() {
        let id = vector_id_for(&Namespace::Shared, "anything");
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
