//! Learning service: turns feedback into corpus mutations
//!
//! The service owns the per-feedback-type dispatch and keeps the corpus
//! and the vector index consistent. Every batch operation commits per
//! item: one bad item is counted and logged, the rest of the batch goes
//! through. Index writes are ordered so a crash mid-item can only leave
//! an entry unsynced, never pointing at a stale vector.

use crate::config::{LearningConfig, QualityThresholds, SimilarityThresholds};
use crate::error::Result;
use crate::index::{IndexMetadata, VectorIndex};
use crate::quality::{QualityEvaluator, CATEGORY_RULES};
use crate::rules::{RuleAction, RuleEngine, RuleInput};
use crate::storage::{CorpusStore, EntryUpdate, FeedbackStore, NewEntry};
use crate::types::{CorpusEntry, EntrySource, Feedback, FeedbackStatus, FeedbackType, Namespace};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of applying one feedback item to the corpus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A new corpus entry was created
    Created,

    /// An existing entry was updated
    Updated,

    /// Applied with no corpus effect
    Skipped,
}

/// Result of one direct-processing batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub processed: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Result of one rule-driven batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct RuleBatchReport {
    pub processed: usize,
    pub auto_approved: usize,
    pub flagged: usize,
    pub require_review: usize,
    pub errors: usize,
}

/// Result of one index synchronization pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub scanned: usize,
    pub synced: usize,
    pub failed: usize,
}

/// Aggregate pipeline statistics
#[derive(Debug, Clone, Serialize)]
pub struct LearningStatistics {
    pub feedback: crate::storage::FeedbackCounts,
    pub corpus_entries: usize,
    pub unsynced_entries: usize,
    pub rules: crate::config::RuleThresholds,
    pub similarity: SimilarityThresholds,
    pub quality: QualityThresholds,
}

/// Feedback-to-corpus learning service
pub struct LearningService {
    feedback: Arc<dyn FeedbackStore>,
    corpus: Arc<dyn CorpusStore>,
    index: Arc<dyn VectorIndex>,
    rules: RuleEngine,
    evaluator: QualityEvaluator,
    similarity: SimilarityThresholds,
    quality: QualityThresholds,
}

impl LearningService {
    pub fn new(
        feedback: Arc<dyn FeedbackStore>,
        corpus: Arc<dyn CorpusStore>,
        index: Arc<dyn VectorIndex>,
        config: &LearningConfig,
    ) -> Self {
        Self {
            feedback,
            corpus,
            index,
            rules: RuleEngine::new(config.rules),
            evaluator: QualityEvaluator::new(),
            similarity: config.similarity,
            quality: config.quality,
        }
    }

    /// Quality evaluator, for the ad-hoc evaluation surface
    pub fn evaluator(&self) -> &QualityEvaluator {
        &self.evaluator
    }

    /// Apply every pending feedback item directly, skipping the rule chain
    pub async fn process_pending_feedbacks(
        &self,
        namespace: Option<&Namespace>,
        limit: usize,
    ) -> Result<BatchReport> {
        let pending = self.feedback.get_pending(namespace, limit).await?;
        let mut report = BatchReport::default();

        for item in pending {
            report.processed += 1;
            match self.apply_feedback(&item).await {
                Ok(ApplyOutcome::Created) => report.created += 1,
                Ok(ApplyOutcome::Updated) => report.updated += 1,
                Ok(ApplyOutcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    warn!("Failed to apply feedback {}: {}", item.id, e);
                    report.errors += 1;
                }
            }
        }

        info!(
            "Processed {} feedback items (created: {}, updated: {}, skipped: {}, errors: {})",
            report.processed, report.created, report.updated, report.skipped, report.errors
        );
        Ok(report)
    }

    /// Run the rule chain over pending feedback and act on each decision
    ///
    /// Auto-approved items go through the same application path as direct
    /// processing; flagged items transition to `flagged`; everything else
    /// stays pending for a human reviewer. Either automatic action can be
    /// disabled, turning its decisions into no-ops.
    pub async fn process_with_rules(
        &self,
        namespace: Option<&Namespace>,
        limit: usize,
        apply_auto_approve: bool,
        apply_auto_flag: bool,
    ) -> Result<RuleBatchReport> {
        let pending = self.feedback.get_pending(namespace, limit).await?;
        let mut report = RuleBatchReport::default();

        for item in pending {
            report.processed += 1;
            match self
                .decide_and_apply(&item, apply_auto_approve, apply_auto_flag)
                .await
            {
                Ok(RuleAction::AutoApprove) => report.auto_approved += 1,
                Ok(RuleAction::AutoFlag) => report.flagged += 1,
                Ok(RuleAction::RequireReview) => report.require_review += 1,
                Err(e) => {
                    warn!("Rule processing failed for feedback {}: {}", item.id, e);
                    report.errors += 1;
                }
            }
        }

        info!(
            "Rule pass over {} items (approved: {}, flagged: {}, review: {}, errors: {})",
            report.processed,
            report.auto_approved,
            report.flagged,
            report.require_review,
            report.errors
        );
        Ok(report)
    }

    async fn decide_and_apply(
        &self,
        item: &Feedback,
        apply_auto_approve: bool,
        apply_auto_flag: bool,
    ) -> Result<RuleAction> {
        let namespace = Some(&item.namespace);
        let occurrence_count = self
            .feedback
            .get_similar_feedback_count(&item.user_question, namespace)
            .await?;
        let negative_count = self
            .feedback
            .get_negative_count_for_question(&item.user_question, namespace)
            .await?;

        let decision = self.rules.evaluate(&RuleInput {
            rating: item.rating,
            feedback_type: &item.feedback_type,
            has_correction: item.has_correction(),
            occurrence_count,
            negative_count,
        });

        debug!(
            "Feedback {} -> {} ({}, confidence {:.2})",
            item.id, decision.action, decision.reason, decision.confidence
        );

        match decision.action {
            RuleAction::AutoApprove if apply_auto_approve => {
                self.apply_feedback(item).await?;
            }
            RuleAction::AutoFlag if apply_auto_flag => {
                self.feedback
                    .update_status(item.id, FeedbackStatus::Flagged, None)
                    .await?;
            }
            // Disabled automatic actions and require-review both leave the
            // item pending
            _ => {}
        }

        Ok(decision.action)
    }

    /// Apply one feedback item to the corpus and mark it applied
    pub async fn apply_feedback(&self, item: &Feedback) -> Result<ApplyOutcome> {
        let outcome = match &item.feedback_type {
            FeedbackType::Corrected => self.apply_correction(item).await?,
            FeedbackType::Positive => self.apply_reinforcement(item, true).await?,
            FeedbackType::Negative => self.apply_reinforcement(item, false).await?,
            FeedbackType::Other(kind) => {
                debug!("Feedback {} has unhandled type '{}', skipping", item.id, kind);
                (ApplyOutcome::Skipped, None)
            }
        };

        let (outcome, entry_id) = outcome;
        self.feedback
            .update_status(item.id, FeedbackStatus::Applied, entry_id)
            .await?;
        Ok(outcome)
    }

    /// Corrected feedback: rewrite the matched entry or create a new one
    async fn apply_correction(
        &self,
        item: &Feedback,
    ) -> Result<(ApplyOutcome, Option<crate::types::EntryId>)> {
        let corrected = match item.corrected_answer.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => {
                debug!("Corrected feedback {} carries no correction text", item.id);
                return Ok((ApplyOutcome::Skipped, None));
            }
        };

        if let Some(entry) = self.find_same_question(item).await? {
            let new_quality = entry.boosted_quality(self.quality.reinforcement_boost);
            let updated = self
                .corpus
                .update_entry(
                    entry.id,
                    EntryUpdate {
                        answer: Some(corrected),
                        quality_score: Some(new_quality),
                        ..Default::default()
                    },
                )
                .await?;

            self.try_sync_entry(&updated).await;
            return Ok((ApplyOutcome::Updated, Some(updated.id)));
        }

        let question = item.user_question.trim().to_string();
        let category = self.evaluator.classify(&question).map(|c| c.to_string());
        let keywords = extract_keywords(&question);

        let entry = self
            .corpus
            .create_entry(NewEntry {
                namespace: item.namespace.clone(),
                question,
                answer: corrected,
                category,
                source: EntrySource::Feedback,
                quality_score: self.quality.initial_corrected_score,
                keywords,
                source_feedback_id: Some(item.id),
            })
            .await?;

        self.try_sync_entry(&entry).await;
        Ok((ApplyOutcome::Created, Some(entry.id)))
    }

    /// Positive or negative feedback: nudge the matched entry's quality
    async fn apply_reinforcement(
        &self,
        item: &Feedback,
        positive: bool,
    ) -> Result<(ApplyOutcome, Option<crate::types::EntryId>)> {
        let entry = match self.find_reinforcement_target(item).await? {
            Some(entry) => entry,
            None => {
                debug!(
                    "No corpus match above reinforcement threshold for feedback {}",
                    item.id
                );
                return Ok((ApplyOutcome::Skipped, None));
            }
        };

        let new_quality = if positive {
            entry.boosted_quality(self.quality.reinforcement_boost)
        } else {
            entry.penalized_quality(self.quality.negative_penalty)
        };

        if !positive && new_quality < self.quality.sync_threshold {
            // The entry drops out of the index. Remove the vector before
            // touching the row: a retry after a partial failure must not
            // penalize the score twice while the stale vector lives on.
            if let Some(vector_id) = &entry.vector_id {
                self.index.delete_vector(vector_id, &item.namespace).await?;
            }
            self.corpus
                .update_entry(
                    entry.id,
                    EntryUpdate {
                        quality_score: Some(new_quality),
                        ..Default::default()
                    },
                )
                .await?;
            let updated = self.corpus.clear_sync(entry.id).await?;
            info!(
                "Entry {} fell below the sync threshold and was removed from the index",
                updated.id
            );
            return Ok((ApplyOutcome::Updated, Some(updated.id)));
        }

        let updated = self
            .corpus
            .update_entry(
                entry.id,
                EntryUpdate {
                    quality_score: Some(new_quality),
                    ..Default::default()
                },
            )
            .await?;

        // Quality lives in index metadata too; patch it in place. A failed
        // patch is tolerable drift, the next full upsert repairs it.
        if let Some(vector_id) = &updated.vector_id {
            let patch = IndexMetadata {
                category: updated.category.clone(),
                quality_score: updated.quality_score,
                source: updated.source.as_str().to_string(),
            };
            match self
                .index
                .update_metadata(vector_id, &patch, &item.namespace)
                .await
            {
                Ok(true) => {}
                Ok(false) => warn!("Vector {} missing during metadata patch", vector_id),
                Err(e) => warn!("Metadata patch failed for vector {}: {}", vector_id, e),
            }
        }

        Ok((ApplyOutcome::Updated, Some(updated.id)))
    }

    /// Push unsynced entries at or above the sync threshold to the index
    pub async fn sync_unsynced_entries(
        &self,
        namespace: Option<&Namespace>,
        limit: usize,
    ) -> Result<SyncReport> {
        let entries = self.corpus.get_unsynced(namespace, limit).await?;
        let mut report = SyncReport::default();

        for entry in entries {
            report.scanned += 1;

            if entry.quality_score < self.quality.sync_threshold {
                debug!(
                    "Entry {} below sync threshold ({:.2}), not pushed",
                    entry.id, entry.quality_score
                );
                continue;
            }

            match self.push_to_index(&entry).await {
                Ok(true) => report.synced += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!("Failed to sync entry {}: {}", entry.id, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Sync pass scanned {} entries (synced: {}, failed: {})",
            report.scanned, report.synced, report.failed
        );
        Ok(report)
    }

    /// Aggregate statistics for the stats surface
    pub async fn get_learning_statistics(
        &self,
        namespace: Option<&Namespace>,
    ) -> Result<LearningStatistics> {
        Ok(LearningStatistics {
            feedback: self.feedback.count_by_status(namespace).await?,
            corpus_entries: self.corpus.count_entries(namespace).await?,
            unsynced_entries: self.corpus.count_unsynced(namespace).await?,
            rules: *self.rules.thresholds(),
            similarity: self.similarity,
            quality: self.quality,
        })
    }

    /// The corpus entry whose question the index considers "the same" as
    /// the feedback's, if any
    async fn find_same_question(&self, item: &Feedback) -> Result<Option<CorpusEntry>> {
        self.find_match_above(item, self.similarity.same_question)
            .await
    }

    async fn find_reinforcement_target(&self, item: &Feedback) -> Result<Option<CorpusEntry>> {
        self.find_match_above(item, self.similarity.reinforcement)
            .await
    }

    async fn find_match_above(
        &self,
        item: &Feedback,
        threshold: f32,
    ) -> Result<Option<CorpusEntry>> {
        let matches = self
            .index
            .search(&item.user_question, 1, &item.namespace)
            .await?;

        let hit = match matches.first() {
            Some(hit) if hit.score > threshold => hit,
            _ => return Ok(None),
        };

        self.corpus
            .find_by_question(&hit.question, Some(&item.namespace))
            .await
    }

    /// Push one entry to the index right away when it qualifies
    ///
    /// A failed push is logged and swallowed; the entry stays unsynced and
    /// the background sync loop retries it.
    async fn try_sync_entry(&self, entry: &CorpusEntry) {
        if entry.quality_score < self.quality.sync_threshold {
            return;
        }
        match self.push_to_index(entry).await {
            Ok(_) => {}
            Err(e) => warn!(
                "Immediate sync of entry {} failed, leaving it for the sync loop: {}",
                entry.id, e
            ),
        }
    }

    async fn push_to_index(&self, entry: &CorpusEntry) -> Result<bool> {
        let vector_id = self
            .index
            .upsert_single(
                &entry.question,
                &entry.answer,
                entry.category.as_deref(),
                &entry.namespace,
                entry.quality_score,
                entry.source.as_str(),
            )
            .await?;

        match vector_id {
            Some(vector_id) => {
                self.corpus.mark_synced(entry.id, &vector_id).await?;
                Ok(true)
            }
            None => {
                debug!("Entry {} has nothing to embed, not synced", entry.id);
                Ok(false)
            }
        }
    }
}

/// Domain keywords present in the text, in classification-table order
fn extract_keywords(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut keywords: Vec<String> = Vec::new();
    for rule in CATEGORY_RULES {
        for kw in rule.keywords {
            if lowered.contains(kw) && !keywords.iter().any(|k| k == kw) {
                keywords.push((*kw).to_string());
            }
        }
    }
    keywords
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexMatch, MockVectorIndex};
    use crate::storage::sqlite::SqliteStore;
    use mockall::predicate::*;
    use tempfile::TempDir;

    async fn create_stores() -> (Arc<SqliteStore>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteStore::new(temp_dir.path().join("test.db")).unwrap();
        store.init_schema().await.unwrap();
        (Arc::new(store), temp_dir)
    }

    fn service_with_index(
        store: Arc<SqliteStore>,
        index: MockVectorIndex,
    ) -> LearningService {
        LearningService::new(
            store.clone(),
            store,
            Arc::new(index),
            &LearningConfig::default(),
        )
    }

    fn corrected_feedback(question: &str, correction: &str) -> Feedback {
        Feedback::new(
            Namespace::Shared,
            question.to_string(),
            "wrong answer".to_string(),
            2,
            FeedbackType::Corrected,
            Some(correction.to_string()),
        )
    }

    fn index_match(question: &str, score: f32) -> IndexMatch {
        IndexMatch {
            vector_id: "vec-1".to_string(),
            question: question.to_string(),
            answer: "stored answer".to_string(),
            score,
            metadata: IndexMetadata {
                category: None,
                quality_score: 0.5,
                source: "feedback".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_correction_with_no_match_creates_entry() {
        let (store, _temp) = create_stores().await;
        let mut index = MockVectorIndex::new();
        index.expect_search().returning(|_, _, _| Ok(Vec::new()));
        index
            .expect_upsert_single()
            .returning(|_, _, _, _, _, _| Ok(Some("vec-new".to_string())));

        let service = service_with_index(store.clone(), index);
        let fb = corrected_feedback("价格多少", "和服租赁6000日元起");
        store.insert_feedback(&fb).await.unwrap();

        let report = service.process_pending_feedbacks(None, 10).await.unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.errors, 0);

        let entry = store
            .find_by_question("价格多少", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.answer, "和服租赁6000日元起");
        assert!((entry.quality_score - 0.75).abs() < f32::EPSILON);
        assert_eq!(entry.category.as_deref(), Some("price"));
        assert_eq!(entry.source, EntrySource::Feedback);
        assert_eq!(entry.source_feedback_id, Some(fb.id));
        assert!(entry.is_synced, "0.75 is above the sync threshold");

        let applied = store.get_pending(None, 10).await.unwrap();
        assert!(applied.is_empty(), "feedback should no longer be pending");
    }

    #[tokio::test]
    async fn test_correction_updates_matched_entry() {
        let (store, _temp) = create_stores().await;
        let existing = store
            .create_entry(NewEntry {
                namespace: Namespace::Shared,
                question: "价格多少".to_string(),
                answer: "旧答案".to_string(),
                category: Some("price".to_string()),
                source: EntrySource::Feedback,
                quality_score: 0.75,
                keywords: vec![],
                source_feedback_id: None,
            })
            .await
            .unwrap();

        let mut index = MockVectorIndex::new();
        index
            .expect_search()
            .returning(|_, _, _| Ok(vec![index_match("价格多少", 0.97)]));
        index
            .expect_upsert_single()
            .returning(|_, _, _, _, _, _| Ok(Some("vec-1".to_string())));

        let service = service_with_index(store.clone(), index);
        let fb = corrected_feedback("价格是多少钱", "6000日元起，含发型设计");
        store.insert_feedback(&fb).await.unwrap();

        let report = service.process_pending_feedbacks(None, 10).await.unwrap();
        assert_eq!(report.updated, 1);

        let entry = store.get_entry(existing.id).await.unwrap();
        assert_eq!(entry.answer, "6000日元起，含发型设计");
        assert!((entry.quality_score - 0.80).abs() < 0.001, "0.75 + 0.05 boost");
    }

    #[tokio::test]
    async fn test_correction_survives_index_failure() {
        let (store, _temp) = create_stores().await;
        let mut index = MockVectorIndex::new();
        index.expect_search().returning(|_, _, _| Ok(Vec::new()));
        index.expect_upsert_single().returning(|_, _, _, _, _, _| {
            Err(crate::error::MathesisError::Index("down".to_string()))
        });

        let service = service_with_index(store.clone(), index);
        let fb = corrected_feedback("价格多少", "6000日元起");
        store.insert_feedback(&fb).await.unwrap();

        let report = service.process_pending_feedbacks(None, 10).await.unwrap();
        assert_eq!(report.created, 1, "index failure must not fail the item");

        let entry = store
            .find_by_question("价格多少", None)
            .await
            .unwrap()
            .unwrap();
        assert!(!entry.is_synced, "entry stays unsynced for the sync loop");
    }

    #[tokio::test]
    async fn test_positive_feedback_boosts_matched_entry() {
        let (store, _temp) = create_stores().await;
        let entry = store
            .create_entry(NewEntry {
                namespace: Namespace::Shared,
                question: "营业时间".to_string(),
                answer: "10点到18点".to_string(),
                category: Some("hours".to_string()),
                source: EntrySource::Manual,
                quality_score: 0.5,
                keywords: vec![],
                source_feedback_id: None,
            })
            .await
            .unwrap();
        store.mark_synced(entry.id, "vec-1").await.unwrap();

        let mut index = MockVectorIndex::new();
        index
            .expect_search()
            .returning(|_, _, _| Ok(vec![index_match("营业时间", 0.85)]));
        index
            .expect_update_metadata()
            .returning(|_, _, _| Ok(true));

        let service = service_with_index(store.clone(), index);
        let fb = Feedback::new(
            Namespace::Shared,
            "几点开门".to_string(),
            "10点到18点".to_string(),
            5,
            FeedbackType::Positive,
            None,
        );
        store.insert_feedback(&fb).await.unwrap();

        let report = service.process_pending_feedbacks(None, 10).await.unwrap();
        assert_eq!(report.updated, 1);

        let updated = store.get_entry(entry.id).await.unwrap();
        assert!((updated.quality_score - 0.55).abs() < 0.001);
        assert!(updated.is_synced, "quality-only update keeps the sync state");

        // The applied row links the entry it mutated
        let applied = store.get_feedback(fb.id).await.unwrap();
        assert_eq!(applied.status, FeedbackStatus::Applied);
        assert_eq!(applied.applied_entry_id, Some(entry.id));
    }

    #[tokio::test]
    async fn test_positive_feedback_without_match_is_skipped() {
        let (store, _temp) = create_stores().await;
        let mut index = MockVectorIndex::new();
        // Below the 0.8 reinforcement threshold
        index
            .expect_search()
            .returning(|_, _, _| Ok(vec![index_match("unrelated", 0.5)]));

        let service = service_with_index(store.clone(), index);
        let fb = Feedback::new(
            Namespace::Shared,
            "新问题".to_string(),
            "answer".to_string(),
            5,
            FeedbackType::Positive,
            None,
        );
        store.insert_feedback(&fb).await.unwrap();

        let report = service.process_pending_feedbacks(None, 10).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert!(store.get_pending(None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_negative_feedback_below_threshold_desyncs_entry() {
        let (store, _temp) = create_stores().await;
        let entry = store
            .create_entry(NewEntry {
                namespace: Namespace::Shared,
                question: "预约方式".to_string(),
                answer: "打电话".to_string(),
                category: Some("booking".to_string()),
                source: EntrySource::Feedback,
                quality_score: 0.41,
                keywords: vec![],
                source_feedback_id: None,
            })
            .await
            .unwrap();
        store.mark_synced(entry.id, "vec-1").await.unwrap();

        let mut index = MockVectorIndex::new();
        index
            .expect_search()
            .returning(|_, _, _| Ok(vec![index_match("预约方式", 0.9)]));
        index
            .expect_delete_vector()
            .with(eq("vec-1"), always())
            .times(1)
            .returning(|_, _| Ok(true));

        let service = service_with_index(store.clone(), index);
        let fb = Feedback::new(
            Namespace::Shared,
            "怎么预约".to_string(),
            "打电话".to_string(),
            3,
            FeedbackType::Negative,
            None,
        );
        store.insert_feedback(&fb).await.unwrap();

        let report = service.process_pending_feedbacks(None, 10).await.unwrap();
        assert_eq!(report.updated, 1);

        let updated = store.get_entry(entry.id).await.unwrap();
        assert!((updated.quality_score - 0.38).abs() < 0.001, "0.41 - 0.03");
        assert!(!updated.is_synced);
        assert!(updated.vector_id.is_none());

        // Desyncing is still a corpus mutation, so the row links the entry
        let applied = store.get_feedback(fb.id).await.unwrap();
        assert_eq!(applied.applied_entry_id, Some(entry.id));
    }

    #[tokio::test]
    async fn test_negative_feedback_clamps_at_floor() {
        let (store, _temp) = create_stores().await;
        let entry = store
            .create_entry(NewEntry {
                namespace: Namespace::Shared,
                question: "q".to_string(),
                answer: "a".to_string(),
                category: None,
                source: EntrySource::Manual,
                quality_score: 0.11,
                keywords: vec![],
                source_feedback_id: None,
            })
            .await
            .unwrap();

        let mut index = MockVectorIndex::new();
        index
            .expect_search()
            .returning(|_, _, _| Ok(vec![index_match("q", 0.9)]));

        let service = service_with_index(store.clone(), index);
        let fb = Feedback::new(
            Namespace::Shared,
            "q".to_string(),
            "a".to_string(),
            3,
            FeedbackType::Negative,
            None,
        );
        store.insert_feedback(&fb).await.unwrap();

        service.process_pending_feedbacks(None, 10).await.unwrap();
        let updated = store.get_entry(entry.id).await.unwrap();
        assert!((updated.quality_score - 0.1).abs() < 0.001, "clamped at the floor");
    }

    #[tokio::test]
    async fn test_unknown_feedback_type_is_applied_without_effect() {
        let (store, _temp) = create_stores().await;
        let index = MockVectorIndex::new();
        let service = service_with_index(store.clone(), index);

        let fb = Feedback::new(
            Namespace::Shared,
            "q".to_string(),
            "a".to_string(),
            3,
            FeedbackType::Other("suggestion".to_string()),
            None,
        );
        store.insert_feedback(&fb).await.unwrap();

        let report = service.process_pending_feedbacks(None, 10).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(store.count_entries(None).await.unwrap(), 0);
        assert!(store.get_pending(None, 10).await.unwrap().is_empty());

        // No corpus mutation, so no entry link on the applied row
        let applied = store.get_feedback(fb.id).await.unwrap();
        assert_eq!(applied.status, FeedbackStatus::Applied);
        assert!(applied.applied_entry_id.is_none());
    }

    #[tokio::test]
    async fn test_one_bad_item_does_not_abort_the_batch() {
        let (store, _temp) = create_stores().await;
        let mut index = MockVectorIndex::new();
        // Search fails for everything; each item records an error, the
        // batch still completes
        index.expect_search().returning(|_, _, _| {
            Err(crate::error::MathesisError::Index("unavailable".to_string()))
        });

        let service = service_with_index(store.clone(), index);
        for i in 0..3 {
            store
                .insert_feedback(&corrected_feedback(&format!("q{}", i), "answer"))
                .await
                .unwrap();
        }

        let report = service.process_pending_feedbacks(None, 10).await.unwrap();
        assert_eq!(report.processed, 3);
        assert_eq!(report.errors, 3);
    }

    #[tokio::test]
    async fn test_rules_flag_and_leave_pending() {
        let (store, _temp) = create_stores().await;
        let index = MockVectorIndex::new();
        let service = service_with_index(store.clone(), index);

        let flaggable = Feedback::new(
            Namespace::Shared,
            "bad".to_string(),
            "a".to_string(),
            1,
            FeedbackType::Negative,
            None,
        );
        let ambiguous = Feedback::new(
            Namespace::Shared,
            "meh".to_string(),
            "a".to_string(),
            3,
            FeedbackType::Positive,
            None,
        );
        store.insert_feedback(&flaggable).await.unwrap();
        store.insert_feedback(&ambiguous).await.unwrap();

        let report = service
            .process_with_rules(None, 10, true, true)
            .await
            .unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(report.flagged, 1);
        assert_eq!(report.require_review, 1);

        let counts = store.count_by_status(None).await.unwrap();
        assert_eq!(counts.flagged, 1);
        assert_eq!(counts.pending, 1, "require-review items stay pending");
    }

    #[tokio::test]
    async fn test_rules_auto_approve_disabled_leaves_item_pending() {
        let (store, _temp) = create_stores().await;
        let mut index = MockVectorIndex::new();
        index.expect_search().returning(|_, _, _| Ok(Vec::new()));

        let service = service_with_index(store.clone(), index);
        // Three occurrences of a top-rated positive question
        for _ in 0..3 {
            store
                .insert_feedback(&Feedback::new(
                    Namespace::Shared,
                    "popular".to_string(),
                    "a".to_string(),
                    5,
                    FeedbackType::Positive,
                    None,
                ))
                .await
                .unwrap();
        }

        let report = service
            .process_with_rules(None, 10, false, true)
            .await
            .unwrap();
        assert_eq!(report.auto_approved, 3, "decisions are still reported");

        let counts = store.count_by_status(None).await.unwrap();
        assert_eq!(counts.pending, 3, "disabled approval applies nothing");
    }

    #[tokio::test]
    async fn test_sync_skips_low_quality_and_is_idempotent() {
        let (store, _temp) = create_stores().await;
        let mut index = MockVectorIndex::new();
        index
            .expect_upsert_single()
            .returning(|question, _, _, _, _, _| Ok(Some(format!("vec-{}", question))));

        let service = service_with_index(store.clone(), index);
        store
            .create_entry(NewEntry {
                namespace: Namespace::Shared,
                question: "good".to_string(),
                answer: "a".to_string(),
                category: None,
                source: EntrySource::Manual,
                quality_score: 0.8,
                keywords: vec![],
                source_feedback_id: None,
            })
            .await
            .unwrap();
        store
            .create_entry(NewEntry {
                namespace: Namespace::Shared,
                question: "poor".to_string(),
                answer: "a".to_string(),
                category: None,
                source: EntrySource::Manual,
                quality_score: 0.2,
                keywords: vec![],
                source_feedback_id: None,
            })
            .await
            .unwrap();

        let report = service.sync_unsynced_entries(None, 10).await.unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.synced, 1);
        assert_eq!(report.failed, 0);

        let second = service.sync_unsynced_entries(None, 10).await.unwrap();
        assert_eq!(second.synced, 0, "second pass finds nothing new to push");
    }

    #[tokio::test]
    async fn test_statistics_surface() {
        let (store, _temp) = create_stores().await;
        let index = MockVectorIndex::new();
        let service = service_with_index(store.clone(), index);

        store
            .insert_feedback(&corrected_feedback("q", "a"))
            .await
            .unwrap();
        store
            .create_entry(NewEntry {
                namespace: Namespace::Shared,
                question: "q2".to_string(),
                answer: "a".to_string(),
                category: None,
                source: EntrySource::Manual,
                quality_score: 0.5,
                keywords: vec![],
                source_feedback_id: None,
            })
            .await
            .unwrap();

        let stats = service.get_learning_statistics(None).await.unwrap();
        assert_eq!(stats.feedback.pending, 1);
        assert_eq!(stats.corpus_entries, 1);
        assert_eq!(stats.unsynced_entries, 1);
        assert_eq!(stats.rules.min_approve_rating, 5);
    }

    #[test]
    fn test_extract_keywords() {
        let keywords = extract_keywords("请问价格和费用是多少钱");
        assert!(keywords.contains(&"价格".to_string()));
        assert!(keywords.contains(&"费用".to_string()));
        assert!(keywords.contains(&"多少钱".to_string()));
        assert!(extract_keywords("hello world").is_empty());
    }
}
