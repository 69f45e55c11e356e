//! Vector index implementation using sqlite-vec
//!
//! Dual-table layout: a vec0 virtual table holds the embeddings, a plain
//! table holds the searchable metadata. Both are keyed by the deterministic
//! vector id, so a sync retry replaces the old vector instead of
//! duplicating it. Namespace filtering happens on the metadata join; a
//! tenant query never sees shared vectors and vice versa.

use crate::error::{MathesisError, Result};
use crate::index::{vector_id_for, Embedder, IndexMatch, IndexMetadata, VectorIndex, EMBEDDING_DIM};
use crate::types::Namespace;
use async_trait::async_trait;
use deadpool_sqlite::{Config, Pool, Runtime};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Default connection pool size
const DEFAULT_POOL_SIZE: usize = 8;

/// KNN candidate over-fetch factor, to survive namespace filtering
const CANDIDATE_FACTOR: usize = 10;

/// sqlite-vec backed vector index with connection pooling
pub struct SqliteVecIndex {
    pool: Pool,
    embedder: Arc<Embedder>,
    dimensions: usize,
}

impl SqliteVecIndex {
    /// Open (or create) the index at `db_path`
    pub fn new<P: AsRef<Path>>(db_path: P, embedder: Arc<Embedder>) -> Result<Self> {
        Self::with_pool_size(db_path, embedder, DEFAULT_POOL_SIZE)
    }

    /// Open the index with a custom pool size
    pub fn with_pool_size<P: AsRef<Path>>(
        db_path: P,
        embedder: Arc<Embedder>,
        pool_size: usize,
    ) -> Result<Self> {
        let path_str = db_path.as_ref().to_string_lossy().to_string();
        info!(
            "Creating vector index pool at: {} (dimensions: {}, pool_size: {})",
            path_str, EMBEDDING_DIM, pool_size
        );

        // Load sqlite-vec as an auto-extension so every pooled connection
        // has the vec0 module available
        unsafe {
            use rusqlite::ffi::sqlite3_auto_extension;

            #[allow(clippy::missing_transmute_annotations)]
            sqlite3_auto_extension(Some(std::mem::transmute(
                sqlite_vec::sqlite3_vec_init as *const (),
            )));
        }

        let config = Config::new(path_str);
        let pool = config.create_pool(Runtime::Tokio1).map_err(|e| {
            MathesisError::Index(format!("Failed to create connection pool: {}", e))
        })?;

        Ok(Self {
            pool,
            embedder,
            dimensions: EMBEDDING_DIM,
        })
    }

    /// Create the vec0 virtual table and its metadata companion
    ///
    /// Safe to call multiple times (uses IF NOT EXISTS).
    pub async fn init_schema(&self) -> Result<()> {
        let vec_sql = format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS corpus_vectors USING vec0(
                vector_id TEXT PRIMARY KEY,
                embedding FLOAT[{}]
            )",
            self.dimensions
        );

        let conn = self.conn().await?;
        conn.interact(move |conn| -> Result<()> {
            conn.execute(&vec_sql, [])
                .map_err(|e| MathesisError::Index(format!("Failed to create vec0 table: {}", e)))?;

            conn.execute(
                "CREATE TABLE IF NOT EXISTS vector_meta (
                    vector_id TEXT PRIMARY KEY,
                    namespace TEXT NOT NULL,
                    question TEXT NOT NULL,
                    answer TEXT NOT NULL,
                    category TEXT,
                    quality_score REAL NOT NULL,
                    source TEXT NOT NULL
                )",
                [],
            )
            .map_err(|e| MathesisError::Index(format!("Failed to create meta table: {}", e)))?;

            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_vector_meta_namespace
                     ON vector_meta(namespace)",
                [],
            )
            .map_err(|e| MathesisError::Index(format!("Failed to create meta index: {}", e)))?;

            Ok(())
        })
        .await
        .map_err(|e| MathesisError::Index(format!("Pool interaction failed: {}", e)))??;

        debug!("Vector index schema initialized");
        Ok(())
    }

    async fn conn(&self) -> Result<deadpool_sqlite::Object> {
        self.pool.get().await.map_err(|e| {
            MathesisError::Index(format!("Failed to get connection from pool: {}", e))
        })
    }
}

#[async_trait]
impl VectorIndex for SqliteVecIndex {
    async fn search(
        &self,
        query: &str,
        limit: usize,
        namespace: &Namespace,
    ) -> Result<Vec<IndexMatch>> {
        if query.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let embedding = self.embedder.embed(query).await?;
        let query_json = serde_json::to_string(&embedding)?;
        let namespace_key = namespace.index_key();
        let candidates = (limit * CANDIDATE_FACTOR).max(limit) as i64;

        debug!(
            "Searching index (namespace: {}, limit: {})",
            namespace_key, limit
        );

        let conn = self.conn().await?;
        conn.interact(move |conn| -> Result<Vec<IndexMatch>> {
            // KNN runs over all namespaces; over-fetch, then filter on the
            // metadata join.
            let mut stmt = conn
                .prepare(
                    "SELECT v.vector_id, v.distance, m.question, m.answer,
                            m.category, m.quality_score, m.source
                     FROM (
                         SELECT vector_id, distance
                         FROM corpus_vectors
                         WHERE embedding MATCH vec_f32(?1)
                         ORDER BY distance
                         LIMIT ?2
                     ) v
                     JOIN vector_meta m ON m.vector_id = v.vector_id
                     WHERE m.namespace = ?3
                     ORDER BY v.distance
                     LIMIT ?4",
                )
                .map_err(|e| MathesisError::Index(format!("Failed to prepare search: {}", e)))?;

            let matches = stmt
                .query_map(
                    rusqlite::params![query_json, candidates, namespace_key, limit as i64],
                    |row| {
                        let distance: f32 = row.get(1)?;
                        Ok(IndexMatch {
                            vector_id: row.get(0)?,
                            // distance = 1 - cosine_similarity
                            score: 1.0 - distance,
                            question: row.get(2)?,
                            answer: row.get(3)?,
                            metadata: IndexMetadata {
                                category: row.get(4)?,
                                quality_score: row.get(5)?,
                                source: row.get(6)?,
                            },
                        })
                    },
                )
                .and_then(|mapped| mapped.collect::<rusqlite::Result<Vec<_>>>())
                .map_err(|e| MathesisError::Index(format!("Search failed: {}", e)))?;

            Ok(matches)
        })
        .await
        .map_err(|e| MathesisError::Index(format!("Pool interaction failed: {}", e)))?
    }

    async fn upsert_single<'a>(
        &self,
        question: &str,
        answer: &str,
        category: Option<&'a str>,
        namespace: &Namespace,
        quality_score: f32,
        source: &str,
    ) -> Result<Option<String>> {
        if question.trim().is_empty() {
            debug!("Skipping upsert of blank question");
            return Ok(None);
        }

        let vector_id = vector_id_for(namespace, question);
        let embedding = self.embedder.embed(question).await?;
        let embedding_json = serde_json::to_string(&embedding)?;

        let id = vector_id.clone();
        let namespace_key = namespace.index_key();
        let question = question.to_string();
        let answer = answer.to_string();
        let category = category.map(|c| c.to_string());
        let source = source.to_string();

        let conn = self.conn().await?;
        conn.interact(move |conn| -> Result<()> {
            // vec0 tables don't support INSERT OR REPLACE, delete first
            conn.execute(
                "DELETE FROM corpus_vectors WHERE vector_id = ?",
                rusqlite::params![&id],
            )
            .map_err(|e| {
                MathesisError::Index(format!("Failed to delete existing vector: {}", e))
            })?;

            conn.execute(
                "INSERT INTO corpus_vectors (vector_id, embedding) VALUES (?, vec_f32(?))",
                rusqlite::params![&id, &embedding_json],
            )
            .map_err(|e| MathesisError::Index(format!("Failed to store vector: {}", e)))?;

            conn.execute(
                "INSERT OR REPLACE INTO vector_meta
                     (vector_id, namespace, question, answer, category, quality_score, source)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    &id,
                    namespace_key,
                    question,
                    answer,
                    category,
                    quality_score,
                    source
                ],
            )
            .map_err(|e| MathesisError::Index(format!("Failed to store metadata: {}", e)))?;

            Ok(())
        })
        .await
        .map_err(|e| MathesisError::Index(format!("Pool interaction failed: {}", e)))??;

        debug!("Upserted vector {}", vector_id);
        Ok(Some(vector_id))
    }

    async fn update_metadata(
        &self,
        vector_id: &str,
        metadata: &IndexMetadata,
        namespace: &Namespace,
    ) -> Result<bool> {
        let vector_id = vector_id.to_string();
        let namespace_key = namespace.index_key();
        let metadata = metadata.clone();

        let conn = self.conn().await?;
        let changed = conn
            .interact(move |conn| -> Result<usize> {
                conn.execute(
                    "UPDATE vector_meta
                     SET category = ?1, quality_score = ?2, source = ?3
                     WHERE vector_id = ?4 AND namespace = ?5",
                    rusqlite::params![
                        metadata.category,
                        metadata.quality_score,
                        metadata.source,
                        vector_id,
                        namespace_key
                    ],
                )
                .map_err(|e| MathesisError::Index(format!("Failed to update metadata: {}", e)))
            })
            .await
            .map_err(|e| MathesisError::Index(format!("Pool interaction failed: {}", e)))??;

        Ok(changed > 0)
    }

    async fn delete_vector(&self, vector_id: &str, namespace: &Namespace) -> Result<bool> {
        let vector_id = vector_id.to_string();
        let namespace_key = namespace.index_key();

        let conn = self.conn().await?;
        let deleted = conn
            .interact(move |conn| -> Result<usize> {
                // Only delete the vector when the metadata row confirms the
                // namespace owns it
                let owned = conn
                    .execute(
                        "DELETE FROM vector_meta WHERE vector_id = ?1 AND namespace = ?2",
                        rusqlite::params![&vector_id, namespace_key],
                    )
                    .map_err(|e| {
                        MathesisError::Index(format!("Failed to delete metadata: {}", e))
                    })?;

                if owned > 0 {
                    conn.execute(
                        "DELETE FROM corpus_vectors WHERE vector_id = ?",
                        rusqlite::params![&vector_id],
                    )
                    .map_err(|e| {
                        MathesisError::Index(format!("Failed to delete vector: {}", e))
                    })?;
                }

                Ok(owned)
            })
            .await
            .map_err(|e| MathesisError::Index(format!("Pool interaction failed: {}", e)))??;

        Ok(deleted > 0)
    }
}
