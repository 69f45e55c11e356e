//! Rule engine for feedback decisioning
//!
//! A pure decision function mapping feedback attributes to one of three
//! actions. Evaluation order is a fixed priority chain, first match wins:
//! auto-flag outranks require-review outranks auto-approve. The ordering is
//! a safety property: a question that is both frequently liked and
//! frequently disliked elsewhere must never auto-approve.
//!
//! Thresholds come from [`RuleThresholds`] so deployments can tune them
//! without touching the decision logic. The function is total over its
//! inputs; there is no error path.

use crate::config::RuleThresholds;
use crate::types::FeedbackType;
use serde::Serialize;

/// What to do with one pending feedback item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    /// Apply the feedback to the corpus without human review
    AutoApprove,

    /// Leave the item pending for a human reviewer
    RequireReview,

    /// Mark the item flagged for mandatory review
    AutoFlag,
}

impl std::fmt::Display for RuleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleAction::AutoApprove => write!(f, "auto_approve"),
            RuleAction::RequireReview => write!(f, "require_review"),
            RuleAction::AutoFlag => write!(f, "auto_flag"),
        }
    }
}

/// Attributes of one feedback item, as seen by the rule chain
#[derive(Debug, Clone)]
pub struct RuleInput<'a> {
    /// Star rating in 1..=5
    pub rating: i32,
    pub feedback_type: &'a FeedbackType,

    /// Whether the user supplied a corrected answer
    pub has_correction: bool,

    /// How many similar feedback items were previously recorded
    pub occurrence_count: u32,

    /// How much negative feedback this question has accumulated
    pub negative_count: u32,
}

/// Decision with its justification and confidence
#[derive(Debug, Clone, Serialize)]
pub struct RuleDecision {
    pub action: RuleAction,
    pub reason: String,
    pub confidence: f32,
}

/// Threshold-driven decision function over feedback attributes
#[derive(Debug, Clone)]
pub struct RuleEngine {
    thresholds: RuleThresholds,
}

impl RuleEngine {
    pub fn new(thresholds: RuleThresholds) -> Self {
        Self { thresholds }
    }

    /// The active thresholds, for the statistics surface
    pub fn thresholds(&self) -> &RuleThresholds {
        &self.thresholds
    }

    /// Classify one feedback item
    pub fn evaluate(&self, input: &RuleInput<'_>) -> RuleDecision {
        let t = &self.thresholds;

        // 1. Auto-flag: terrible rating or a pile-up of negative feedback.
        if input.rating <= t.max_flag_rating {
            return RuleDecision {
                action: RuleAction::AutoFlag,
                reason: format!("rating {} at or below {}", input.rating, t.max_flag_rating),
                confidence: 0.9,
            };
        }
        if input.negative_count >= t.flag_negative_count {
            return RuleDecision {
                action: RuleAction::AutoFlag,
                reason: format!(
                    "{} negative reports reached the flag threshold of {}",
                    input.negative_count, t.flag_negative_count
                ),
                confidence: 0.9,
            };
        }

        // 2. Require-review: every human-supplied correction is reviewed,
        // regardless of rating; mid-range ratings are ambiguous.
        if input.has_correction {
            return RuleDecision {
                action: RuleAction::RequireReview,
                reason: "user-supplied correction requires review".to_string(),
                confidence: 0.8,
            };
        }
        // Above the flag threshold but below the approve minimum
        // (2..=4 with default thresholds).
        if input.rating < t.min_approve_rating {
            return RuleDecision {
                action: RuleAction::RequireReview,
                reason: format!("mid-range rating {}", input.rating),
                confidence: 0.8,
            };
        }

        // 3. Auto-approve: consistently top-rated positive feedback.
        if input.rating >= t.min_approve_rating
            && *input.feedback_type == FeedbackType::Positive
            && input.occurrence_count >= t.min_occurrences
        {
            return RuleDecision {
                action: RuleAction::AutoApprove,
                reason: format!(
                    "rating {} with {} similar occurrences",
                    input.rating, input.occurrence_count
                ),
                confidence: 0.95,
            };
        }

        // 4. Default: uncertain, hand it to a reviewer.
        RuleDecision {
            action: RuleAction::RequireReview,
            reason: "no rule matched".to_string(),
            confidence: 0.5,
        }
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new(RuleThresholds::default())
    }
}
