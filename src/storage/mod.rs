//! Storage layer for the corpus-learning pipeline
//!
//! Provides the abstractions and SQLite implementation for persistent
//! storage of feedback rows and corpus entries. The vector index is a
//! separate service; see [`crate::index`].

pub mod sqlite;

use crate::error::Result;
use crate::types::{
    CorpusEntry, EntryId, Feedback, FeedbackId, FeedbackStatus, EntrySource, Namespace,
};
use async_trait::async_trait;
use serde::Serialize;

/// Fields for creating a new corpus entry
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub namespace: Namespace,
    pub question: String,
    pub answer: String,
    pub category: Option<String>,
    pub source: EntrySource,
    pub quality_score: f32,
    pub keywords: Vec<String>,
    pub source_feedback_id: Option<FeedbackId>,
}

/// Partial update of an existing corpus entry
///
/// Changing `answer`, `category`, or `keywords` resets `is_synced`; a
/// quality-only change does not, because quality lives in index metadata
/// and is patched in place.
#[derive(Debug, Clone, Default)]
pub struct EntryUpdate {
    pub answer: Option<String>,
    pub category: Option<String>,
    pub keywords: Option<Vec<String>>,
    pub quality_score: Option<f32>,
}

impl EntryUpdate {
    /// Whether this update touches indexed text and must desync the entry
    pub fn desyncs(&self) -> bool {
        self.answer.is_some() || self.category.is_some() || self.keywords.is_some()
    }
}

/// Feedback counts by status, for the statistics surface
#[derive(Debug, Clone, Default, Serialize)]
pub struct FeedbackCounts {
    pub pending: usize,
    pub applied: usize,
    pub rejected: usize,
    pub flagged: usize,
    pub approved: usize,
}

/// Store of user feedback rows
#[async_trait]
pub trait FeedbackStore: Send + Sync {
    /// Insert a new feedback row (used by the external ingestion surface)
    async fn insert_feedback(&self, feedback: &Feedback) -> Result<()>;

    /// Fetch one feedback row by id
    async fn get_feedback(&self, id: FeedbackId) -> Result<Feedback>;

    /// Fetch a bounded batch of pending feedback, oldest first
    async fn get_pending(
        &self,
        namespace: Option<&Namespace>,
        limit: usize,
    ) -> Result<Vec<Feedback>>;

    /// Transition a feedback row's status, optionally linking the corpus
    /// entry it produced; returns the updated row
    async fn update_status(
        &self,
        id: FeedbackId,
        status: FeedbackStatus,
        applied_entry_id: Option<EntryId>,
    ) -> Result<Feedback>;

    /// Number of previously recorded feedback items for the same question
    async fn get_similar_feedback_count(
        &self,
        question: &str,
        namespace: Option<&Namespace>,
    ) -> Result<u32>;

    /// Number of negative feedback items recorded for the same question
    async fn get_negative_count_for_question(
        &self,
        question: &str,
        namespace: Option<&Namespace>,
    ) -> Result<u32>;

    /// Feedback counts grouped by status
    async fn count_by_status(&self, namespace: Option<&Namespace>) -> Result<FeedbackCounts>;
}

/// Store of corpus entries (question/answer pairs)
#[async_trait]
pub trait CorpusStore: Send + Sync {
    /// Create a new entry; quality is clamped into the valid range
    async fn create_entry(&self, new: NewEntry) -> Result<CorpusEntry>;

    /// Apply a partial update; text changes reset `is_synced`
    async fn update_entry(&self, id: EntryId, update: EntryUpdate) -> Result<CorpusEntry>;

    /// Fetch one entry by id
    async fn get_entry(&self, id: EntryId) -> Result<CorpusEntry>;

    /// Exact-question lookup among active entries, newest first
    async fn find_by_question(
        &self,
        question: &str,
        namespace: Option<&Namespace>,
    ) -> Result<Option<CorpusEntry>>;

    /// Record a successful index push
    async fn mark_synced(&self, id: EntryId, vector_id: &str) -> Result<CorpusEntry>;

    /// Remove the entry's index linkage (vector deleted or invalidated)
    async fn clear_sync(&self, id: EntryId) -> Result<CorpusEntry>;

    /// Active entries not currently reflected in the vector index
    async fn get_unsynced(
        &self,
        namespace: Option<&Namespace>,
        limit: usize,
    ) -> Result<Vec<CorpusEntry>>;

    /// Count of active entries
    async fn count_entries(&self, namespace: Option<&Namespace>) -> Result<usize>;

    /// Count of active entries with `is_synced = false`
    async fn count_unsynced(&self, namespace: Option<&Namespace>) -> Result<usize>;
}
