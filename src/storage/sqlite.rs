//! SQLite implementation of the feedback and corpus stores
//!
//! Uses connection pooling (deadpool-sqlite) so the learning service and
//! both scheduler loops can share one store. All writes commit per
//! statement: a failed item loses only itself, never the rest of a batch.

use crate::error::{MathesisError, Result};
use crate::storage::{CorpusStore, EntryUpdate, FeedbackCounts, FeedbackStore, NewEntry};
use crate::types::{
    clamp_quality, CorpusEntry, EntryId, EntrySource, EntryStatus, Feedback, FeedbackId,
    FeedbackStatus, FeedbackType, Namespace,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_sqlite::{Config, Pool, Runtime};
use rusqlite::types::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Default connection pool size
const DEFAULT_POOL_SIZE: usize = 8;

/// Pooled SQLite store implementing both [`FeedbackStore`] and
/// [`CorpusStore`]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    /// Open (or create) the store at `db_path`
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        Self::with_pool_size(db_path, DEFAULT_POOL_SIZE)
    }

    /// Open the store with a custom pool size
    pub fn with_pool_size<P: AsRef<Path>>(db_path: P, pool_size: usize) -> Result<Self> {
        let path_str = db_path.as_ref().to_string_lossy().to_string();
        info!(
            "Creating store pool at: {} (pool_size: {})",
            path_str, pool_size
        );

        let config = Config::new(path_str);
        let pool = config.create_pool(Runtime::Tokio1).map_err(|e| {
            MathesisError::Database(format!("Failed to create connection pool: {}", e))
        })?;

        Ok(Self { pool })
    }

    /// Create the feedback and corpus tables
    ///
    /// Safe to call multiple times (uses IF NOT EXISTS).
    pub async fn init_schema(&self) -> Result<()> {
        let conn = self.conn().await?;

        conn.interact(|conn| -> Result<()> {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS feedback (
                    id TEXT PRIMARY KEY,
                    tenant_id TEXT,
                    conversation_id TEXT,
                    message_id TEXT,
                    user_question TEXT NOT NULL,
                    original_answer TEXT NOT NULL,
                    rating INTEGER NOT NULL,
                    feedback_type TEXT NOT NULL,
                    corrected_answer TEXT,
                    status TEXT NOT NULL DEFAULT 'pending',
                    applied_at TEXT,
                    applied_entry_id TEXT,
                    reviewed_by TEXT,
                    reviewed_at TEXT,
                    attributes TEXT,
                    created_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_feedback_status
                    ON feedback(status, tenant_id);
                CREATE INDEX IF NOT EXISTS idx_feedback_question
                    ON feedback(user_question);

                CREATE TABLE IF NOT EXISTS corpus_entries (
                    id TEXT PRIMARY KEY,
                    tenant_id TEXT,
                    question TEXT NOT NULL,
                    answer TEXT NOT NULL,
                    category TEXT,
                    source TEXT NOT NULL,
                    quality_score REAL NOT NULL,
                    keywords TEXT,
                    vector_id TEXT,
                    is_synced INTEGER NOT NULL DEFAULT 0,
                    synced_at TEXT,
                    source_feedback_id TEXT,
                    status TEXT NOT NULL DEFAULT 'active',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_corpus_sync
                    ON corpus_entries(is_synced, tenant_id);
                CREATE INDEX IF NOT EXISTS idx_corpus_question
                    ON corpus_entries(question);
                "#,
            )
            .map_err(|e| MathesisError::Database(format!("Failed to create schema: {}", e)))?;
            Ok(())
        })
        .await
        .map_err(|e| MathesisError::Database(format!("Pool interaction failed: {}", e)))??;

        debug!("Store schema initialized");
        Ok(())
    }

    async fn conn(&self) -> Result<deadpool_sqlite::Object> {
        self.pool.get().await.map_err(|e| {
            MathesisError::Database(format!("Failed to get connection from pool: {}", e))
        })
    }
}

/// SQL fragment and bind value for an optional namespace filter
fn namespace_filter(namespace: Option<&Namespace>) -> (&'static str, Option<String>) {
    match namespace {
        None => ("", None),
        Some(Namespace::Shared) => (" AND tenant_id IS NULL", None),
        Some(Namespace::Tenant { id }) => (" AND tenant_id = ?", Some(id.clone())),
    }
}

fn parse_timestamp(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_opt_timestamp(idx: usize, s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_timestamp(idx, &s)).transpose()
}

fn conversion_err<E: std::error::Error + Send + Sync + 'static>(
    idx: usize,
    e: E,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn row_to_feedback(row: &rusqlite::Row<'_>) -> rusqlite::Result<Feedback> {
    let id: String = row.get(0)?;
    let tenant_id: Option<String> = row.get(1)?;
    let feedback_type: String = row.get(7)?;
    let status: String = row.get(9)?;
    let applied_at: Option<String> = row.get(10)?;
    let applied_entry_id: Option<String> = row.get(11)?;
    let reviewed_at: Option<String> = row.get(13)?;
    let attributes: Option<String> = row.get(14)?;
    let created_at: String = row.get(15)?;

    let attributes: HashMap<String, serde_json::Value> = match attributes {
        Some(json) => serde_json::from_str(&json).map_err(|e| conversion_err(14, e))?,
        None => HashMap::new(),
    };

    Ok(Feedback {
        id: FeedbackId::from_string(&id).map_err(|e| conversion_err(0, e))?,
        namespace: Namespace::from_tenant(tenant_id),
        conversation_id: row.get(2)?,
        message_id: row.get(3)?,
        user_question: row.get(4)?,
        original_answer: row.get(5)?,
        rating: row.get(6)?,
        feedback_type: FeedbackType::parse(&feedback_type),
        corrected_answer: row.get(8)?,
        status: FeedbackStatus::parse(&status).ok_or_else(|| {
            conversion_err(
                9,
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("unknown feedback status: {}", status),
                ),
            )
        })?,
        applied_at: parse_opt_timestamp(10, applied_at)?,
        applied_entry_id: applied_entry_id
            .map(|s| EntryId::from_string(&s).map_err(|e| conversion_err(11, e)))
            .transpose()?,
        reviewed_by: row.get(12)?,
        reviewed_at: parse_opt_timestamp(13, reviewed_at)?,
        attributes,
        created_at: parse_timestamp(15, &created_at)?,
    })
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<CorpusEntry> {
    let id: String = row.get(0)?;
    let tenant_id: Option<String> = row.get(1)?;
    let source: String = row.get(5)?;
    let keywords: Option<String> = row.get(7)?;
    let is_synced: i64 = row.get(9)?;
    let synced_at: Option<String> = row.get(10)?;
    let source_feedback_id: Option<String> = row.get(11)?;
    let status: String = row.get(12)?;
    let created_at: String = row.get(13)?;
    let updated_at: String = row.get(14)?;

    let keywords: Vec<String> = match keywords {
        Some(json) => serde_json::from_str(&json).map_err(|e| conversion_err(7, e))?,
        None => Vec::new(),
    };

    Ok(CorpusEntry {
        id: EntryId::from_string(&id).map_err(|e| conversion_err(0, e))?,
        namespace: Namespace::from_tenant(tenant_id),
        question: row.get(2)?,
        answer: row.get(3)?,
        category: row.get(4)?,
        source: EntrySource::parse(&source),
        quality_score: row.get(6)?,
        keywords,
        vector_id: row.get(8)?,
        is_synced: is_synced != 0,
        synced_at: parse_opt_timestamp(10, synced_at)?,
        source_feedback_id: source_feedback_id
            .map(|s| FeedbackId::from_string(&s).map_err(|e| conversion_err(11, e)))
            .transpose()?,
        status: EntryStatus::parse(&status).ok_or_else(|| {
            conversion_err(
                12,
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("unknown entry status: {}", status),
                ),
            )
        })?,
        created_at: parse_timestamp(13, &created_at)?,
        updated_at: parse_timestamp(14, &updated_at)?,
    })
}

const FEEDBACK_COLUMNS: &str = "id, tenant_id, conversation_id, message_id, user_question, \
     original_answer, rating, feedback_type, corrected_answer, status, applied_at, \
     applied_entry_id, reviewed_by, reviewed_at, attributes, created_at";

const ENTRY_COLUMNS: &str = "id, tenant_id, question, answer, category, source, quality_score, \
     keywords, vector_id, is_synced, synced_at, source_feedback_id, status, created_at, \
     updated_at";

#[async_trait]
impl FeedbackStore for SqliteStore {
    async fn insert_feedback(&self, feedback: &Feedback) -> Result<()> {
        let conn = self.conn().await?;
        let fb = feedback.clone();

        conn.interact(move |conn| -> Result<()> {
            let attributes = if fb.attributes.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&fb.attributes)?)
            };

            conn.execute(
                &format!(
                    "INSERT INTO feedback ({}) VALUES \
                     (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                    FEEDBACK_COLUMNS
                ),
                rusqlite::params![
                    fb.id.to_string(),
                    fb.namespace.tenant_id(),
                    fb.conversation_id,
                    fb.message_id,
                    fb.user_question,
                    fb.original_answer,
                    fb.rating,
                    fb.feedback_type.as_str(),
                    fb.corrected_answer,
                    fb.status.as_str(),
                    fb.applied_at.map(|t| t.to_rfc3339()),
                    fb.applied_entry_id.map(|id| id.to_string()),
                    fb.reviewed_by,
                    fb.reviewed_at.map(|t| t.to_rfc3339()),
                    attributes,
                    fb.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| MathesisError::Database(format!("Failed to insert feedback: {}", e)))?;
            Ok(())
        })
        .await
        .map_err(|e| MathesisError::Database(format!("Pool interaction failed: {}", e)))??;

        debug!("Inserted feedback {}", feedback.id);
        Ok(())
    }

    async fn get_feedback(&self, id: FeedbackId) -> Result<Feedback> {
        let conn = self.conn().await?;

        conn.interact(move |conn| -> Result<Feedback> {
            let sql = format!("SELECT {} FROM feedback WHERE id = ?", FEEDBACK_COLUMNS);
            match conn.query_row(&sql, rusqlite::params![id.to_string()], row_to_feedback) {
                Ok(feedback) => Ok(feedback),
                Err(rusqlite::Error::QueryReturnedNoRows) => {
                    Err(MathesisError::FeedbackNotFound(id.to_string()))
                }
                Err(e) => Err(MathesisError::Database(format!(
                    "Failed to fetch feedback: {}",
                    e
                ))),
            }
        })
        .await
        .map_err(|e| MathesisError::Database(format!("Pool interaction failed: {}", e)))?
    }

    async fn get_pending(
        &self,
        namespace: Option<&Namespace>,
        limit: usize,
    ) -> Result<Vec<Feedback>> {
        let conn = self.conn().await?;
        let (filter, tenant) = namespace_filter(namespace);
        let sql = format!(
            "SELECT {} FROM feedback WHERE status = 'pending'{} ORDER BY created_at ASC LIMIT ?",
            FEEDBACK_COLUMNS, filter
        );

        conn.interact(move |conn| -> Result<Vec<Feedback>> {
            let mut params: Vec<Value> = Vec::new();
            if let Some(id) = tenant {
                params.push(Value::Text(id));
            }
            params.push(Value::Integer(limit as i64));

            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| MathesisError::Database(format!("Failed to prepare query: {}", e)))?;

            let rows = stmt
                .query_map(rusqlite::params_from_iter(params), row_to_feedback)
                .and_then(|mapped| mapped.collect::<rusqlite::Result<Vec<_>>>())
                .map_err(|e| {
                    MathesisError::Database(format!("Failed to fetch pending feedback: {}", e))
                })?;

            Ok(rows)
        })
        .await
        .map_err(|e| MathesisError::Database(format!("Pool interaction failed: {}", e)))?
    }

    async fn update_status(
        &self,
        id: FeedbackId,
        status: FeedbackStatus,
        applied_entry_id: Option<EntryId>,
    ) -> Result<Feedback> {
        if applied_entry_id.is_some() && status != FeedbackStatus::Applied {
            return Err(MathesisError::Validation(format!(
                "applied_entry_id may only be set together with status 'applied', got '{}'",
                status
            )));
        }

        let conn = self.conn().await?;

        conn.interact(move |conn| -> Result<Feedback> {
            let changed = if status == FeedbackStatus::Applied {
                conn.execute(
                    "UPDATE feedback SET status = ?1, applied_at = ?2, applied_entry_id = ?3 \
                     WHERE id = ?4",
                    rusqlite::params![
                        status.as_str(),
                        Utc::now().to_rfc3339(),
                        applied_entry_id.map(|e| e.to_string()),
                        id.to_string(),
                    ],
                )
            } else {
                conn.execute(
                    "UPDATE feedback SET status = ?1 WHERE id = ?2",
                    rusqlite::params![status.as_str(), id.to_string()],
                )
            }
            .map_err(|e| MathesisError::Database(format!("Failed to update status: {}", e)))?;

            if changed == 0 {
                return Err(MathesisError::FeedbackNotFound(id.to_string()));
            }

            let sql = format!("SELECT {} FROM feedback WHERE id = ?", FEEDBACK_COLUMNS);
            conn.query_row(&sql, rusqlite::params![id.to_string()], row_to_feedback)
                .map_err(|e| MathesisError::Database(format!("Failed to re-read feedback: {}", e)))
        })
        .await
        .map_err(|e| MathesisError::Database(format!("Pool interaction failed: {}", e)))?
    }

    async fn get_similar_feedback_count(
        &self,
        question: &str,
        namespace: Option<&Namespace>,
    ) -> Result<u32> {
        self.count_feedback_rows(question, namespace, false).await
    }

    async fn get_negative_count_for_question(
        &self,
        question: &str,
        namespace: Option<&Namespace>,
    ) -> Result<u32> {
        self.count_feedback_rows(question, namespace, true).await
    }

    async fn count_by_status(&self, namespace: Option<&Namespace>) -> Result<FeedbackCounts> {
        let conn = self.conn().await?;
        let (filter, tenant) = namespace_filter(namespace);
        let sql = format!(
            "SELECT status, COUNT(*) FROM feedback WHERE 1=1{} GROUP BY status",
            filter
        );

        conn.interact(move |conn| -> Result<FeedbackCounts> {
            let mut params: Vec<Value> = Vec::new();
            if let Some(id) = tenant {
                params.push(Value::Text(id));
            }

            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| MathesisError::Database(format!("Failed to prepare query: {}", e)))?;

            let pairs = stmt
                .query_map(rusqlite::params_from_iter(params), |row| {
                    let status: String = row.get(0)?;
                    let count: i64 = row.get(1)?;
                    Ok((status, count as usize))
                })
                .and_then(|mapped| mapped.collect::<rusqlite::Result<Vec<_>>>())
                .map_err(|e| {
                    MathesisError::Database(format!("Failed to count feedback: {}", e))
                })?;

            let mut counts = FeedbackCounts::default();
            for (status, count) in pairs {
                match FeedbackStatus::parse(&status) {
                    Some(FeedbackStatus::Pending) => counts.pending = count,
                    Some(FeedbackStatus::Applied) => counts.applied = count,
                    Some(FeedbackStatus::Rejected) => counts.rejected = count,
                    Some(FeedbackStatus::Flagged) => counts.flagged = count,
                    Some(FeedbackStatus::Approved) => counts.approved = count,
                    None => {}
                }
            }
            Ok(counts)
        })
        .await
        .map_err(|e| MathesisError::Database(format!("Pool interaction failed: {}", e)))?
    }
}

impl SqliteStore {
    async fn count_feedback_rows(
        &self,
        question: &str,
        namespace: Option<&Namespace>,
        negative_only: bool,
    ) -> Result<u32> {
        let conn = self.conn().await?;
        let (filter, tenant) = namespace_filter(namespace);
        let type_filter = if negative_only {
            " AND feedback_type = 'negative'"
        } else {
            ""
        };
        let sql = format!(
            "SELECT COUNT(*) FROM feedback WHERE user_question = ?{}{}",
            type_filter, filter
        );
        let question = question.to_string();

        conn.interact(move |conn| -> Result<u32> {
            let mut params: Vec<Value> = vec![Value::Text(question)];
            if let Some(id) = tenant {
                params.push(Value::Text(id));
            }

            let count: i64 = conn
                .query_row(&sql, rusqlite::params_from_iter(params), |row| row.get(0))
                .map_err(|e| {
                    MathesisError::Database(format!("Failed to count feedback rows: {}", e))
                })?;
            Ok(count as u32)
        })
        .await
        .map_err(|e| MathesisError::Database(format!("Pool interaction failed: {}", e)))?
    }
}

#[async_trait]
impl CorpusStore for SqliteStore {
    async fn create_entry(&self, new: NewEntry) -> Result<CorpusEntry> {
        let conn = self.conn().await?;
        let id = EntryId::new();
        let now = Utc::now();

        conn.interact(move |conn| -> Result<CorpusEntry> {
            let keywords = serde_json::to_string(&new.keywords)?;

            conn.execute(
                &format!(
                    "INSERT INTO corpus_entries ({}) VALUES \
                     (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, 0, NULL, ?9, 'active', ?10, ?11)",
                    ENTRY_COLUMNS
                ),
                rusqlite::params![
                    id.to_string(),
                    new.namespace.tenant_id(),
                    new.question,
                    new.answer,
                    new.category,
                    new.source.as_str(),
                    clamp_quality(new.quality_score),
                    keywords,
                    new.source_feedback_id.map(|f| f.to_string()),
                    now.to_rfc3339(),
                    now.to_rfc3339(),
                ],
            )
            .map_err(|e| MathesisError::Database(format!("Failed to create entry: {}", e)))?;

            let sql = format!("SELECT {} FROM corpus_entries WHERE id = ?", ENTRY_COLUMNS);
            conn.query_row(&sql, rusqlite::params![id.to_string()], row_to_entry)
                .map_err(|e| MathesisError::Database(format!("Failed to re-read entry: {}", e)))
        })
        .await
        .map_err(|e| MathesisError::Database(format!("Pool interaction failed: {}", e)))?
    }

    async fn update_entry(&self, id: EntryId, update: EntryUpdate) -> Result<CorpusEntry> {
        let conn = self.conn().await?;
        let desyncs = update.desyncs();

        conn.interact(move |conn| -> Result<CorpusEntry> {
            let keywords = update
                .keywords
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;

            let changed = conn
                .execute(
                    "UPDATE corpus_entries SET \
                         answer = COALESCE(?1, answer), \
                         category = COALESCE(?2, category), \
                         keywords = COALESCE(?3, keywords), \
                         quality_score = COALESCE(?4, quality_score), \
                         is_synced = CASE WHEN ?5 THEN 0 ELSE is_synced END, \
                         updated_at = ?6 \
                     WHERE id = ?7",
                    rusqlite::params![
                        update.answer,
                        update.category,
                        keywords,
                        update.quality_score.map(clamp_quality),
                        desyncs,
                        Utc::now().to_rfc3339(),
                        id.to_string(),
                    ],
                )
                .map_err(|e| MathesisError::Database(format!("Failed to update entry: {}", e)))?;

            if changed == 0 {
                return Err(MathesisError::EntryNotFound(id.to_string()));
            }

            let sql = format!("SELECT {} FROM corpus_entries WHERE id = ?", ENTRY_COLUMNS);
            conn.query_row(&sql, rusqlite::params![id.to_string()], row_to_entry)
                .map_err(|e| MathesisError::Database(format!("Failed to re-read entry: {}", e)))
        })
        .await
        .map_err(|e| MathesisError::Database(format!("Pool interaction failed: {}", e)))?
    }

    async fn get_entry(&self, id: EntryId) -> Result<CorpusEntry> {
        let conn = self.conn().await?;

        conn.interact(move |conn| -> Result<CorpusEntry> {
            let sql = format!("SELECT {} FROM corpus_entries WHERE id = ?", ENTRY_COLUMNS);
            match conn.query_row(&sql, rusqlite::params![id.to_string()], row_to_entry) {
                Ok(entry) => Ok(entry),
                Err(rusqlite::Error::QueryReturnedNoRows) => {
                    Err(MathesisError::EntryNotFound(id.to_string()))
                }
                Err(e) => Err(MathesisError::Database(format!(
                    "Failed to fetch entry: {}",
                    e
                ))),
            }
        })
        .await
        .map_err(|e| MathesisError::Database(format!("Pool interaction failed: {}", e)))?
    }

    async fn find_by_question(
        &self,
        question: &str,
        namespace: Option<&Namespace>,
    ) -> Result<Option<CorpusEntry>> {
        let conn = self.conn().await?;
        let (filter, tenant) = namespace_filter(namespace);
        let sql = format!(
            "SELECT {} FROM corpus_entries WHERE question = ? AND status = 'active'{} \
             ORDER BY updated_at DESC LIMIT 1",
            ENTRY_COLUMNS, filter
        );
        let question = question.trim().to_string();

        conn.interact(move |conn| -> Result<Option<CorpusEntry>> {
            let mut params: Vec<Value> = vec![Value::Text(question)];
            if let Some(id) = tenant {
                params.push(Value::Text(id));
            }

            match conn.query_row(&sql, rusqlite::params_from_iter(params), row_to_entry) {
                Ok(entry) => Ok(Some(entry)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(MathesisError::Database(format!(
                    "Failed to look up entry by question: {}",
                    e
                ))),
            }
        })
        .await
        .map_err(|e| MathesisError::Database(format!("Pool interaction failed: {}", e)))?
    }

    async fn mark_synced(&self, id: EntryId, vector_id: &str) -> Result<CorpusEntry> {
        let conn = self.conn().await?;
        let vector_id = vector_id.to_string();

        conn.interact(move |conn| -> Result<CorpusEntry> {
            let now = Utc::now().to_rfc3339();
            let changed = conn
                .execute(
                    "UPDATE corpus_entries SET vector_id = ?1, is_synced = 1, synced_at = ?2, \
                     updated_at = ?2 WHERE id = ?3",
                    rusqlite::params![vector_id, now, id.to_string()],
                )
                .map_err(|e| {
                    MathesisError::Database(format!("Failed to mark entry synced: {}", e))
                })?;

            if changed == 0 {
                return Err(MathesisError::EntryNotFound(id.to_string()));
            }

            let sql = format!("SELECT {} FROM corpus_entries WHERE id = ?", ENTRY_COLUMNS);
            conn.query_row(&sql, rusqlite::params![id.to_string()], row_to_entry)
                .map_err(|e| MathesisError::Database(format!("Failed to re-read entry: {}", e)))
        })
        .await
        .map_err(|e| MathesisError::Database(format!("Pool interaction failed: {}", e)))?
    }

    async fn clear_sync(&self, id: EntryId) -> Result<CorpusEntry> {
        let conn = self.conn().await?;

        conn.interact(move |conn| -> Result<CorpusEntry> {
            let changed = conn
                .execute(
                    "UPDATE corpus_entries SET vector_id = NULL, is_synced = 0, \
                     synced_at = NULL, updated_at = ?1 WHERE id = ?2",
                    rusqlite::params![Utc::now().to_rfc3339(), id.to_string()],
                )
                .map_err(|e| {
                    MathesisError::Database(format!("Failed to clear sync state: {}", e))
                })?;

            if changed == 0 {
                return Err(MathesisError::EntryNotFound(id.to_string()));
            }

            let sql = format!("SELECT {} FROM corpus_entries WHERE id = ?", ENTRY_COLUMNS);
            conn.query_row(&sql, rusqlite::params![id.to_string()], row_to_entry)
                .map_err(|e| MathesisError::Database(format!("Failed to re-read entry: {}", e)))
        })
        .await
        .map_err(|e| MathesisError::Database(format!("Pool interaction failed: {}", e)))?
    }

    async fn get_unsynced(
        &self,
        namespace: Option<&Namespace>,
        limit: usize,
    ) -> Result<Vec<CorpusEntry>> {
        let conn = self.conn().await?;
        let (filter, tenant) = namespace_filter(namespace);
        let sql = format!(
            "SELECT {} FROM corpus_entries WHERE is_synced = 0 AND status = 'active'{} \
             ORDER BY updated_at ASC LIMIT ?",
            ENTRY_COLUMNS, filter
        );

        conn.interact(move |conn| -> Result<Vec<CorpusEntry>> {
            let mut params: Vec<Value> = Vec::new();
            if let Some(id) = tenant {
                params.push(Value::Text(id));
            }
            params.push(Value::Integer(limit as i64));

            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| MathesisError::Database(format!("Failed to prepare query: {}", e)))?;

            let rows = stmt
                .query_map(rusqlite::params_from_iter(params), row_to_entry)
                .and_then(|mapped| mapped.collect::<rusqlite::Result<Vec<_>>>())
                .map_err(|e| {
                    MathesisError::Database(format!("Failed to fetch unsynced entries: {}", e))
                })?;

            Ok(rows)
        })
        .await
        .map_err(|e| MathesisError::Database(format!("Pool interaction failed: {}", e)))?
    }

    async fn count_entries(&self, namespace: Option<&Namespace>) -> Result<usize> {
        self.count_corpus_rows(namespace, false).await
    }

    async fn count_unsynced(&self, namespace: Option<&Namespace>) -> Result<usize> {
        self.count_corpus_rows(namespace, true).await
    }
}

impl SqliteStore {
    async fn count_corpus_rows(
        &self,
        namespace: Option<&Namespace>,
        unsynced_only: bool,
    ) -> Result<usize> {
        let conn = self.conn().await?;
        let (filter, tenant) = namespace_filter(namespace);
        let sync_filter = if unsynced_only {
            " AND is_synced = 0"
        } else {
            ""
        };
        let sql = format!(
            "SELECT COUNT(*) FROM corpus_entries WHERE status = 'active'{}{}",
            sync_filter, filter
        );

        conn.interact(move |conn| -> Result<usize> {
            let mut params: Vec<Value> = Vec::new();
            if let Some(id) = tenant {
                params.push(Value::Text(id));
            }

            let count: i64 = conn
                .query_row(&sql, rusqlite::params_from_iter(params), |row| row.get(0))
                .map_err(|e| {
                    MathesisError::Database(format!("Failed to count entries: {}", e))
                })?;
            Ok(count as usize)
        })
        .await
        .map_err(|e| MathesisError::Database(format!("Pool interaction failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_store() -> (SqliteStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteStore::new(temp_dir.path().join("test.db")).unwrap();
        store.init_schema().await.unwrap();
        (store, temp_dir)
    }

    fn sample_feedback(namespace: Namespace, question: &str, rating: i32) -> Feedback {
        Feedback::new(
            namespace,
            question.to_string(),
            "original answer text".to_string(),
            rating,
            FeedbackType::Positive,
            None,
        )
    }

    fn sample_entry(namespace: Namespace, question: &str) -> NewEntry {
        NewEntry {
            namespace,
            question: question.to_string(),
            answer: "an answer".to_string(),
            category: Some("price".to_string()),
            source: EntrySource::Feedback,
            quality_score: 0.75,
            keywords: vec!["price".to_string()],
            source_feedback_id: None,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get_pending() {
        let (store, _temp) = create_test_store().await;
        let fb = sample_feedback(Namespace::Shared, "what is the price", 5);
        store.insert_feedback(&fb).await.unwrap();

        let pending = store.get_pending(None, 10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, fb.id);
        assert_eq!(pending[0].user_question, "what is the price");
        assert_eq!(pending[0].status, FeedbackStatus::Pending);
    }

    #[tokio::test]
    async fn test_get_feedback_by_id() {
        let (store, _temp) = create_test_store().await;
        let fb = sample_feedback(Namespace::Shared, "what is the price", 5);
        store.insert_feedback(&fb).await.unwrap();

        let fetched = store.get_feedback(fb.id).await.unwrap();
        assert_eq!(fetched.id, fb.id);
        assert_eq!(fetched.user_question, "what is the price");

        let missing = store.get_feedback(FeedbackId::new()).await;
        assert!(matches!(missing, Err(MathesisError::FeedbackNotFound(_))));
    }

    #[tokio::test]
    async fn test_get_pending_tenant_isolation() {
        let (store, _temp) = create_test_store().await;
        let tenant = Namespace::Tenant {
            id: "acme".to_string(),
        };
        store
            .insert_feedback(&sample_feedback(tenant.clone(), "q1", 5))
            .await
            .unwrap();
        store
            .insert_feedback(&sample_feedback(Namespace::Shared, "q2", 5))
            .await
            .unwrap();

        let tenant_rows = store.get_pending(Some(&tenant), 10).await.unwrap();
        assert_eq!(tenant_rows.len(), 1);
        assert_eq!(tenant_rows[0].user_question, "q1");

        let shared_rows = store.get_pending(Some(&Namespace::Shared), 10).await.unwrap();
        assert_eq!(shared_rows.len(), 1);
        assert_eq!(shared_rows[0].user_question, "q2");

        let all = store.get_pending(None, 10).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_update_status_applied_sets_timestamps() {
        let (store, _temp) = create_test_store().await;
        let fb = sample_feedback(Namespace::Shared, "q", 5);
        store.insert_feedback(&fb).await.unwrap();

        let entry_id = EntryId::new();
        let updated = store
            .update_status(fb.id, FeedbackStatus::Applied, Some(entry_id))
            .await
            .unwrap();

        assert_eq!(updated.status, FeedbackStatus::Applied);
        assert_eq!(updated.applied_entry_id, Some(entry_id));
        assert!(updated.applied_at.is_some());
    }

    #[tokio::test]
    async fn test_update_status_rejects_entry_link_outside_applied() {
        let (store, _temp) = create_test_store().await;
        let fb = sample_feedback(Namespace::Shared, "q", 1);
        store.insert_feedback(&fb).await.unwrap();

        let result = store
            .update_status(fb.id, FeedbackStatus::Flagged, Some(EntryId::new()))
            .await;
        assert!(matches!(result, Err(MathesisError::Validation(_))));
    }

    #[tokio::test]
    async fn test_update_status_missing_row() {
        let (store, _temp) = create_test_store().await;
        let result = store
            .update_status(FeedbackId::new(), FeedbackStatus::Flagged, None)
            .await;
        assert!(matches!(result, Err(MathesisError::FeedbackNotFound(_))));
    }

    #[tokio::test]
    async fn test_occurrence_and_negative_counts() {
        let (store, _temp) = create_test_store().await;
        for _ in 0..3 {
            store
                .insert_feedback(&sample_feedback(Namespace::Shared, "recurring", 5))
                .await
                .unwrap();
        }
        let mut negative = sample_feedback(Namespace::Shared, "recurring", 1);
        negative.feedback_type = FeedbackType::Negative;
        store.insert_feedback(&negative).await.unwrap();

        assert_eq!(
            store
                .get_similar_feedback_count("recurring", None)
                .await
                .unwrap(),
            4
        );
        assert_eq!(
            store
                .get_negative_count_for_question("recurring", None)
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            store
                .get_similar_feedback_count("unseen", None)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_create_entry_clamps_quality() {
        let (store, _temp) = create_test_store().await;
        let mut new = sample_entry(Namespace::Shared, "q");
        new.quality_score = 1.7;

        let entry = store.create_entry(new).await.unwrap();
        assert!((entry.quality_score - 1.0).abs() < f32::EPSILON);
        assert!(!entry.is_synced);
        assert!(entry.vector_id.is_none());
    }

    #[tokio::test]
    async fn test_update_entry_answer_resets_sync() {
        let (store, _temp) = create_test_store().await;
        let entry = store
            .create_entry(sample_entry(Namespace::Shared, "q"))
            .await
            .unwrap();
        store.mark_synced(entry.id, "vec-1").await.unwrap();

        let updated = store
            .update_entry(
                entry.id,
                EntryUpdate {
                    answer: Some("new answer".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.answer, "new answer");
        assert!(!updated.is_synced, "answer change must desync the entry");
    }

    #[tokio::test]
    async fn test_update_entry_quality_only_keeps_sync() {
        let (store, _temp) = create_test_store().await;
        let entry = store
            .create_entry(sample_entry(Namespace::Shared, "q"))
            .await
            .unwrap();
        store.mark_synced(entry.id, "vec-1").await.unwrap();

        let updated = store
            .update_entry(
                entry.id,
                EntryUpdate {
                    quality_score: Some(0.8),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!((updated.quality_score - 0.8).abs() < f32::EPSILON);
        assert!(updated.is_synced, "quality-only change keeps sync state");
        assert_eq!(updated.vector_id.as_deref(), Some("vec-1"));
    }

    #[tokio::test]
    async fn test_mark_and_clear_sync() {
        let (store, _temp) = create_test_store().await;
        let entry = store
            .create_entry(sample_entry(Namespace::Shared, "q"))
            .await
            .unwrap();

        let synced = store.mark_synced(entry.id, "vec-9").await.unwrap();
        assert!(synced.is_synced);
        assert_eq!(synced.vector_id.as_deref(), Some("vec-9"));
        assert!(synced.synced_at.is_some());

        let cleared = store.clear_sync(entry.id).await.unwrap();
        assert!(!cleared.is_synced);
        assert!(cleared.vector_id.is_none());
        assert!(cleared.synced_at.is_none());
    }

    #[tokio::test]
    async fn test_get_unsynced_and_counts() {
        let (store, _temp) = create_test_store().await;
        let e1 = store
            .create_entry(sample_entry(Namespace::Shared, "q1"))
            .await
            .unwrap();
        store
            .create_entry(sample_entry(Namespace::Shared, "q2"))
            .await
            .unwrap();
        store.mark_synced(e1.id, "vec-1").await.unwrap();

        let unsynced = store.get_unsynced(None, 10).await.unwrap();
        assert_eq!(unsynced.len(), 1);
        assert_eq!(unsynced[0].question, "q2");

        assert_eq!(store.count_entries(None).await.unwrap(), 2);
        assert_eq!(store.count_unsynced(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_find_by_question() {
        let (store, _temp) = create_test_store().await;
        let tenant = Namespace::Tenant {
            id: "acme".to_string(),
        };
        store
            .create_entry(sample_entry(tenant.clone(), "价格多少"))
            .await
            .unwrap();

        let found = store
            .find_by_question("价格多少", Some(&tenant))
            .await
            .unwrap();
        assert!(found.is_some());

        let other_tenant = Namespace::Tenant {
            id: "other".to_string(),
        };
        let missed = store
            .find_by_question("价格多少", Some(&other_tenant))
            .await
            .unwrap();
        assert!(missed.is_none());
    }

    #[tokio::test]
    async fn test_count_by_status() {
        let (store, _temp) = create_test_store().await;
        let fb1 = sample_feedback(Namespace::Shared, "q1", 5);
        let fb2 = sample_feedback(Namespace::Shared, "q2", 1);
        store.insert_feedback(&fb1).await.unwrap();
        store.insert_feedback(&fb2).await.unwrap();
        store
            .update_status(fb2.id, FeedbackStatus::Flagged, None)
            .await
            .unwrap();

        let counts = store.count_by_status(None).await.unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.flagged, 1);
        assert_eq!(counts.applied, 0);
    }
}
