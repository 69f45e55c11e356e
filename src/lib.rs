//! Mathesis - Feedback-Driven Corpus Learning Pipeline
//!
//! A continuous learning system for question/answer corpora: user feedback
//! on answers flows in, a rule engine decides what each item deserves, and
//! approved items mutate the corpus and its vector index.
//!
//! # Architecture
//!
//! - **Types**: Core data structures (Feedback, CorpusEntry, Namespace)
//! - **Quality**: Heuristic evaluation of question/answer pairs
//! - **Rules**: Priority-chain decisioning over pending feedback
//! - **Storage**: SQLite stores for feedback and corpus entries
//! - **Index**: sqlite-vec backed similarity search with local embeddings
//! - **Learning**: Per-feedback-type corpus mutation and index sync
//! - **Scheduler**: Background processing and sync loops
//!
//! # Example
//!
//! ```ignore
//! use mathesis::{LearningConfig, LearningScheduler, LearningService};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = LearningConfig::default();
//!     let store = Arc::new(mathesis::SqliteStore::new("mathesis.db")?);
//!     store.init_schema().await?;
//!
//!     let embedder = Arc::new(mathesis::Embedder::local());
//!     let index = Arc::new(mathesis::SqliteVecIndex::new("mathesis.db", embedder)?);
//!     index.init_schema().await?;
//!
//!     let service = Arc::new(LearningService::new(
//!         store.clone(),
//!         store,
//!         index,
//!         &config,
//!     ));
//!     let scheduler = LearningScheduler::new(service, config.scheduler);
//!     scheduler.start().await;
//!
//!     tokio::signal::ctrl_c().await?;
//!     scheduler.stop().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod index;
pub mod learning;
pub mod quality;
pub mod rules;
pub mod scheduler;
pub mod storage;
pub mod types;

// Re-export commonly used types
pub use config::{LearningConfig, SchedulerConfig};
pub use error::{MathesisError, Result};
pub use index::{Embedder, SqliteVecIndex, VectorIndex};
pub use learning::{BatchReport, LearningService, RuleBatchReport, SyncReport};
pub use quality::{QualityEvaluator, QualityReport};
pub use rules::{RuleAction, RuleDecision, RuleEngine};
pub use scheduler::{LearningScheduler, SchedulerStatus};
pub use storage::{sqlite::SqliteStore, CorpusStore, FeedbackStore};
pub use types::{CorpusEntry, EntryId, Feedback, FeedbackId, FeedbackType, Namespace};
