//! Core data types for the Mathesis corpus-learning pipeline
//!
//! This module defines the fundamental data structures shared across the
//! pipeline: feedback rows, corpus entries, tenant namespaces, and the
//! identifier newtypes that keep the two from being mixed up.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Lowest quality score an entry can hold after any number of penalties.
pub const QUALITY_FLOOR: f32 = 0.1;

/// Highest quality score an entry can hold after any number of boosts.
pub const QUALITY_CEIL: f32 = 1.0;

/// Unique identifier for feedback rows
///
/// Wraps a UUID to provide type safety and prevent mixing feedback IDs
/// with corpus entry IDs elsewhere in the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedbackId(pub Uuid);

impl FeedbackId {
    /// Create a new random feedback ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a feedback ID from a string
    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for FeedbackId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for FeedbackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for corpus entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub Uuid);

impl EntryId {
    /// Create a new random entry ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an entry ID from a string
    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tenant scope for feedback and corpus data
///
/// `Shared` corresponds to a NULL tenant column: template entries and
/// global knowledge visible to every tenant. `Tenant` isolates one
/// customer's corpus and its vector index namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Namespace {
    /// Shared/template data, not owned by any tenant
    Shared,

    /// Data scoped to a single tenant
    Tenant {
        /// Tenant identifier
        id: String,
    },
}

impl Namespace {
    /// Build a namespace from a nullable tenant column
    pub fn from_tenant(tenant_id: Option<String>) -> Self {
        match tenant_id {
            Some(id) => Namespace::Tenant { id },
            None => Namespace::Shared,
        }
    }

    /// The tenant id as stored in the relational store (NULL for shared)
    pub fn tenant_id(&self) -> Option<&str> {
        match self {
            Namespace::Shared => None,
            Namespace::Tenant { id } => Some(id),
        }
    }

    /// Partition key used in the vector index
    pub fn index_key(&self) -> String {
        match self {
            Namespace::Shared => "shared".to_string(),
            Namespace::Tenant { id } => format!("tenant:{}", id),
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Namespace::Shared => write!(f, "shared"),
            Namespace::Tenant { id } => write!(f, "tenant:{}", id),
        }
    }
}

/// Kind of judgment a user made about an answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedbackType {
    /// The answer was good
    Positive,

    /// The answer was wrong or unhelpful
    Negative,

    /// The user supplied a corrected answer
    Corrected,

    /// Unrecognized type; flows into the skip path instead of erroring
    Other(String),
}

impl FeedbackType {
    /// Parse from the stored string form
    pub fn parse(s: &str) -> Self {
        match s {
            "positive" => FeedbackType::Positive,
            "negative" => FeedbackType::Negative,
            "corrected" => FeedbackType::Corrected,
            other => FeedbackType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FeedbackType::Positive => "positive",
            FeedbackType::Negative => "negative",
            FeedbackType::Corrected => "corrected",
            FeedbackType::Other(s) => s,
        }
    }
}

impl std::fmt::Display for FeedbackType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state of a feedback row
///
/// Rows are created externally in `Pending`. Transitions out of `Pending`
/// are one-way, except that `Flagged` may later be moved to `Approved` or
/// `Rejected` by the external review collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackStatus {
    Pending,
    Applied,
    Rejected,
    Flagged,
    Approved,
}

impl FeedbackStatus {
    /// Parse from the stored string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(FeedbackStatus::Pending),
            "applied" => Some(FeedbackStatus::Applied),
            "rejected" => Some(FeedbackStatus::Rejected),
            "flagged" => Some(FeedbackStatus::Flagged),
            "approved" => Some(FeedbackStatus::Approved),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackStatus::Pending => "pending",
            FeedbackStatus::Applied => "applied",
            FeedbackStatus::Rejected => "rejected",
            FeedbackStatus::Flagged => "flagged",
            FeedbackStatus::Approved => "approved",
        }
    }
}

impl std::fmt::Display for FeedbackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One user judgment on one previously-given answer
#[derive(Debug, Clone)]
pub struct Feedback {
    pub id: FeedbackId,
    pub namespace: Namespace,
    pub conversation_id: Option<String>,
    pub message_id: Option<String>,
    pub user_question: String,
    pub original_answer: String,

    /// Star rating in 1..=5
    pub rating: i32,
    pub feedback_type: FeedbackType,

    /// Present only for `corrected` feedback
    pub corrected_answer: Option<String>,
    pub status: FeedbackStatus,
    pub applied_at: Option<DateTime<Utc>>,

    /// Set iff `status == Applied` and a corpus mutation actually occurred
    pub applied_entry_id: Option<EntryId>,

    /// Set only by the external review collaborator
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,

    /// Free-form extra attributes
    pub attributes: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Feedback {
    /// Build a new pending feedback row
    pub fn new(
        namespace: Namespace,
        user_question: String,
        original_answer: String,
        rating: i32,
        feedback_type: FeedbackType,
        corrected_answer: Option<String>,
    ) -> Self {
        Self {
            id: FeedbackId::new(),
            namespace,
            conversation_id: None,
            message_id: None,
            user_question,
            original_answer,
            rating,
            feedback_type,
            corrected_answer,
            status: FeedbackStatus::Pending,
            applied_at: None,
            applied_entry_id: None,
            reviewed_by: None,
            reviewed_at: None,
            attributes: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Whether the user supplied a replacement answer
    pub fn has_correction(&self) -> bool {
        self.corrected_answer
            .as_deref()
            .map(|s| !s.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Where a corpus entry came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntrySource {
    Manual,
    Import,
    Feedback,
    Template,
    Other(String),
}

impl EntrySource {
    /// Parse from the stored string form
    pub fn parse(s: &str) -> Self {
        match s {
            "manual" => EntrySource::Manual,
            "import" => EntrySource::Import,
            "feedback" => EntrySource::Feedback,
            "template" => EntrySource::Template,
            other => EntrySource::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EntrySource::Manual => "manual",
            EntrySource::Import => "import",
            EntrySource::Feedback => "feedback",
            EntrySource::Template => "template",
            EntrySource::Other(s) => s,
        }
    }
}

impl std::fmt::Display for EntrySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Soft-delete state of a corpus entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Active,
    Deleted,
}

impl EntryStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(EntryStatus::Active),
            "deleted" => Some(EntryStatus::Deleted),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Active => "active",
            EntryStatus::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One unit of answerable knowledge: a stored question/answer pair
///
/// Invariant: `is_synced == true` implies `vector_id` is non-null and the
/// vector index reflects the entry's text and metadata as of `synced_at`.
/// Any mutation of question, answer, category, or keywords resets
/// `is_synced` until the next sync pass picks the entry up again.
#[derive(Debug, Clone)]
pub struct CorpusEntry {
    pub id: EntryId,
    pub namespace: Namespace,
    pub question: String,
    pub answer: String,
    pub category: Option<String>,
    pub source: EntrySource,

    /// Quality score in [0.1, 1.0]
    pub quality_score: f32,
    pub keywords: Vec<String>,
    pub vector_id: Option<String>,
    pub is_synced: bool,
    pub synced_at: Option<DateTime<Utc>>,

    /// Back-reference to the feedback that produced this entry
    pub source_feedback_id: Option<FeedbackId>,
    pub status: EntryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CorpusEntry {
    /// Quality after one reinforcement, clamped to the ceiling
    pub fn boosted_quality(&self, delta: f32) -> f32 {
        clamp_quality(self.quality_score + delta)
    }

    /// Quality after one penalty, clamped to the floor
    pub fn penalized_quality(&self, delta: f32) -> f32 {
        clamp_quality(self.quality_score - delta)
    }
}

/// Clamp a quality score into the valid [0.1, 1.0] range
pub fn clamp_quality(score: f32) -> f32 {
    score.clamp(QUALITY_FLOOR, QUALITY_CEIL)
}
