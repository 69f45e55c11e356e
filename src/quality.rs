//! Quality evaluation for question/answer pairs
//!
//! Scores a pair on structural and relevance heuristics before anything is
//! written to the vector index. No side effects; deterministic given inputs.
//!
//! The overall score is a weighted sum: question 0.3, answer 0.5,
//! relevance 0.2. Each component starts at 1.0 and accumulates penalties
//! (floored at 0.0); the answer score can earn a small structure bonus.

use serde::Serialize;

/// Component weights for the overall score
const QUESTION_WEIGHT: f32 = 0.3;
const ANSWER_WEIGHT: f32 = 0.5;
const RELEVANCE_WEIGHT: f32 = 0.2;

/// Ratio of characters outside the allow-listed set that marks gibberish
const GIBBERISH_RATIO: f32 = 0.1;

/// Evaluation result for a single question/answer pair
#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    /// Weighted overall score in [0.0, 1.0]
    pub overall: f32,
    pub question_score: f32,
    pub answer_score: f32,
    pub relevance_score: f32,

    /// Detected problems, for review surfaces
    pub issues: Vec<String>,

    /// Actionable hints for improving the pair
    pub suggestions: Vec<String>,
}

/// Score distribution buckets for batch evaluation
#[derive(Debug, Clone, Default, Serialize)]
pub struct QualityDistribution {
    /// overall >= 0.9
    pub excellent: usize,
    /// 0.7 <= overall < 0.9
    pub good: usize,
    /// 0.5 <= overall < 0.7
    pub fair: usize,
    /// overall < 0.5
    pub poor: usize,
}

/// Aggregate result for a batch of pairs
#[derive(Debug, Clone, Serialize)]
pub struct BatchQualityReport {
    pub average: f32,
    pub distribution: QualityDistribution,

    /// Indices of pairs scoring below 0.5
    pub low_quality: Vec<usize>,
}

/// One classification rule: a category and the keywords that select it
///
/// Rules are evaluated in order, first match wins, so the table is
/// deterministic and reproducible across deployments.
#[derive(Debug, Clone, Copy)]
pub struct CategoryRule {
    pub category: &'static str,
    pub keywords: &'static [&'static str],
}

/// Ordered classification table; earlier rules take priority
pub const CATEGORY_RULES: &[CategoryRule] = &[
    CategoryRule {
        category: "price",
        keywords: &["价格", "多少钱", "费用", "收费", "优惠", "price", "cost", "fee"],
    },
    CategoryRule {
        category: "booking",
        keywords: &["预约", "预订", "取消", "改期", "booking", "reserve", "appointment"],
    },
    CategoryRule {
        category: "service",
        keywords: &["租赁", "服务", "套餐", "归还", "rental", "service", "package"],
    },
    CategoryRule {
        category: "location",
        keywords: &["地址", "位置", "在哪", "怎么走", "location", "address", "directions"],
    },
    CategoryRule {
        category: "hours",
        keywords: &["营业", "几点", "时间", "hours", "open", "close"],
    },
];

/// Substring markers that identify a question as interrogative
const INTERROGATIVE_MARKERS: &[&str] = &[
    "?", "？", "吗", "呢", "什么", "多少", "怎么", "如何", "哪", "为什么", "请问", "能否", "可以",
];

/// English question words, matched as whole words only
const INTERROGATIVE_WORDS: &[&str] = &[
    "what", "how", "why", "when", "where", "who", "which", "can", "could", "is", "are", "do",
    "does",
];

/// Quality evaluator for question/answer pairs
#[derive(Debug, Clone, Default)]
pub struct QualityEvaluator;

impl QualityEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate one question/answer pair
    pub fn evaluate(&self, question: &str, answer: &str, category: Option<&str>) -> QualityReport {
        let mut issues = Vec::new();
        let mut suggestions = Vec::new();

        let question_score = self.score_question(question, &mut issues, &mut suggestions);
        let answer_score = self.score_answer(answer, &mut issues, &mut suggestions);
        let relevance_score =
            self.score_relevance(question, answer, category, &mut issues, &mut suggestions);

        let overall = QUESTION_WEIGHT * question_score
            + ANSWER_WEIGHT * answer_score
            + RELEVANCE_WEIGHT * relevance_score;

        QualityReport {
            overall,
            question_score,
            answer_score,
            relevance_score,
            issues,
            suggestions,
        }
    }

    /// Evaluate a batch of pairs and summarize the distribution
    pub fn batch_evaluate(&self, pairs: &[(String, String)]) -> BatchQualityReport {
        let mut distribution = QualityDistribution::default();
        let mut low_quality = Vec::new();
        let mut total = 0.0;

        for (i, (question, answer)) in pairs.iter().enumerate() {
            let report = self.evaluate(question, answer, None);
            total += report.overall;

            if report.overall >= 0.9 {
                distribution.excellent += 1;
            } else if report.overall >= 0.7 {
                distribution.good += 1;
            } else if report.overall >= 0.5 {
                distribution.fair += 1;
            } else {
                distribution.poor += 1;
                low_quality.push(i);
            }
        }

        let average = if pairs.is_empty() {
            0.0
        } else {
            total / pairs.len() as f32
        };

        BatchQualityReport {
            average,
            distribution,
            low_quality,
        }
    }

    /// Classify a text against the ordered category table, first match wins
    pub fn classify(&self, text: &str) -> Option<&'static str> {
        let lowered = text.to_lowercase();
        CATEGORY_RULES
            .iter()
            .find(|rule| rule.keywords.iter().any(|kw| lowered.contains(kw)))
            .map(|rule| rule.category)
    }

    /// Count how many distinct domain keywords occur in the text
    pub fn domain_hits(&self, text: &str) -> usize {
        let lowered = text.to_lowercase();
        CATEGORY_RULES
            .iter()
            .flat_map(|rule| rule.keywords.iter())
            .filter(|kw| lowered.contains(*kw))
            .count()
    }

    fn score_question(
        &self,
        question: &str,
        issues: &mut Vec<String>,
        suggestions: &mut Vec<String>,
    ) -> f32 {
        let mut score: f32 = 1.0;
        let len = question.chars().count();

        if len < 5 {
            score -= 0.5;
            issues.push("question is too short".to_string());
        } else if len > 500 {
            score -= 0.1;
            issues.push("question is unusually long".to_string());
            suggestions.push("split the question into smaller ones".to_string());
        }

        if !is_interrogative(question) {
            score -= 0.1;
            suggestions.push("phrase the entry as a question".to_string());
        }

        if gibberish_ratio(question) > GIBBERISH_RATIO {
            score -= 0.3;
            issues.push("question contains gibberish characters".to_string());
        }

        if is_repetitive(question) {
            score -= 0.2;
            issues.push("question is repetitive".to_string());
        }

        score.max(0.0)
    }

    fn score_answer(
        &self,
        answer: &str,
        issues: &mut Vec<String>,
        suggestions: &mut Vec<String>,
    ) -> f32 {
        let mut score: f32 = 1.0;
        let len = answer.chars().count();

        if len < 10 {
            score -= 0.6;
            issues.push("answer is too short".to_string());
            suggestions.push("provide a complete answer".to_string());
        }
        if len < 20 {
            score -= 0.1;
            issues.push("answer carries little information".to_string());
        }

        if gibberish_ratio(answer) > GIBBERISH_RATIO {
            score -= 0.3;
            issues.push("answer contains gibberish characters".to_string());
        }

        if is_repetitive(answer) {
            score -= 0.2;
            issues.push("answer is repetitive".to_string());
        }

        if !has_terminal_punctuation(answer) {
            score -= 0.05;
            suggestions.push("end the answer with punctuation".to_string());
        }

        if has_structural_markers(answer) {
            score = (score + 0.05).min(1.0);
        }

        score.max(0.0)
    }

    fn score_relevance(
        &self,
        question: &str,
        answer: &str,
        category: Option<&str>,
        issues: &mut Vec<String>,
        suggestions: &mut Vec<String>,
    ) -> f32 {
        let mut score: f32 = 1.0;

        let combined = format!("{} {}", question, answer);
        let hits = self.domain_hits(&combined);
        if hits == 0 {
            score -= 0.2;
            if category.is_none() {
                suggestions.push("no domain keywords found; check the category".to_string());
            }
        } else if hits >= 3 {
            score = (score + 0.1).min(1.0);
        }

        let overlap = charset_overlap(question, answer);
        if overlap < 0.1 {
            score -= 0.1;
        }

        // An answer barely longer than the question with high overlap is
        // usually the question read back, not an answer.
        let question_len = question.chars().count();
        let answer_len = answer.chars().count();
        if answer_len <= question_len + 10 && overlap > 0.8 {
            score -= 0.2;
            issues.push("answer looks like a restatement of the question".to_string());
        }

        score.max(0.0)
    }
}

/// Whether the text reads as a question
fn is_interrogative(text: &str) -> bool {
    let lowered = text.to_lowercase();
    if INTERROGATIVE_MARKERS.iter().any(|m| lowered.contains(m)) {
        return true;
    }

    lowered
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .any(|w| INTERROGATIVE_WORDS.contains(&w))
}

/// Ratio of characters outside the allow-listed alphabet and punctuation
///
/// The allow list covers ASCII alphanumerics, whitespace, common
/// punctuation, CJK ideographs, kana, and CJK/fullwidth punctuation.
fn gibberish_ratio(text: &str) -> f32 {
    let total = text.chars().count();
    if total == 0 {
        return 0.0;
    }

    let disallowed = text.chars().filter(|&c| !is_allowed_char(c)).count();
    disallowed as f32 / total as f32
}

fn is_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || c.is_whitespace()
        || ".,!?;:'\"()-%$&/@#+*=<>[]{}_~".contains(c)
        || ('\u{4E00}'..='\u{9FFF}').contains(&c) // CJK unified ideographs
        || ('\u{3040}'..='\u{30FF}').contains(&c) // hiragana + katakana
        || ('\u{3000}'..='\u{303F}').contains(&c) // CJK punctuation
        || ('\u{FF00}'..='\u{FFEF}').contains(&c) // fullwidth forms
}

/// Detect excessive character or phrase repetition
fn is_repetitive(text: &str) -> bool {
    let chars: Vec<char> = text.chars().collect();

    // A run of five or more identical characters
    let mut run = 1;
    for pair in chars.windows(2) {
        if pair[0] == pair[1] && !pair[0].is_whitespace() {
            run += 1;
            if run >= 5 {
                return true;
            }
        } else {
            run = 1;
        }
    }

    // The same trigram occurring four or more times
    if chars.len() >= 12 {
        let mut counts: std::collections::HashMap<&[char], usize> = std::collections::HashMap::new();
        for gram in chars.windows(3) {
            let count = counts.entry(gram).or_insert(0);
            *count += 1;
            if *count >= 4 {
                return true;
            }
        }
    }

    false
}

fn has_terminal_punctuation(text: &str) -> bool {
    text.trim_end()
        .chars()
        .last()
        .map(|c| ".!?。！？".contains(c))
        .unwrap_or(false)
}

/// Numbered or bulleted content counts as structure
fn has_structural_markers(text: &str) -> bool {
    text.lines().any(|line| {
        let trimmed = line.trim_start();
        trimmed.starts_with('-')
            || trimmed.starts_with('•')
            || trimmed.starts_with('*')
            || trimmed
                .chars()
                .next()
                .map(|c| c.is_ascii_digit())
                .unwrap_or(false)
                && trimmed
                    .chars()
                    .nth(1)
                    .map(|c| c == '.' || c == '、' || c == ')' || c == '）')
                    .unwrap_or(false)
    })
}

/// Overlap between the question's character set and the answer's,
/// restricted to alphanumerics and CJK so punctuation does not inflate it
fn charset_overlap(question: &str, answer: &str) -> f32 {
    let significant = |c: &char| c.is_alphanumeric() || ('\u{4E00}'..='\u{9FFF}').contains(c);

    let q_chars: std::collections::HashSet<char> =
        question.chars().filter(significant).collect();
    if q_chars.is_empty() {
        return 0.0;
    }

    let a_chars: std::collections::HashSet<char> = answer.chars().filter(significant).collect();
    let shared = q_chars.intersection(&a_chars).count();
    shared as f32 / q_chars.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degenerate_pair_scores_poor() {
        let evaluator = QualityEvaluator::new();
        let report = evaluator.evaluate("?", "好", None);
        assert!(
            report.overall < 0.5,
            "expected poor score, got {}",
            report.overall
        );
        assert!(!report.issues.is_empty());
    }

    #[test]
    fn test_well_formed_pair_scores_good() {
        let evaluator = QualityEvaluator::new();
        let report = evaluator.evaluate(
            "请问和服租赁的价格是多少？",
            "我们的租赁价格从3000日元起，根据款式不同...",
            None,
        );
        assert!(
            report.overall > 0.7,
            "expected good score, got {}",
            report.overall
        );
    }

    #[test]
    fn test_short_answer_penalized() {
        let evaluator = QualityEvaluator::new();
        let report = evaluator.evaluate("What are your opening hours today?", "9am.", None);
        assert!(report.answer_score < 0.5);
        assert!(report.issues.iter().any(|i| i.contains("too short")));
    }

    #[test]
    fn test_restatement_detected() {
        let evaluator = QualityEvaluator::new();
        let report = evaluator.evaluate(
            "和服租赁的价格是多少",
            "和服租赁的价格是多少。",
            None,
        );
        assert!(report
            .issues
            .iter()
            .any(|i| i.contains("restatement")));
    }

    #[test]
    fn test_gibberish_detection() {
        assert!(gibberish_ratio("normal text 正常文本") < 0.05);
        assert!(gibberish_ratio("\u{0001}\u{0002}\u{0003}\u{0004}text") > 0.1);
    }

    #[test]
    fn test_repetition_detection() {
        assert!(is_repetitive("aaaaaaa"));
        assert!(is_repetitive("abcabcabcabcabc"));
        assert!(!is_repetitive("我们的租赁价格从3000日元起"));
        assert!(!is_repetitive("a normal sentence without repeats"));
    }

    #[test]
    fn test_structural_bonus() {
        let evaluator = QualityEvaluator::new();
        let plain = evaluator.evaluate(
            "How do I book a fitting appointment?",
            "You can book a fitting online or by phone, and payment is due on arrival.",
            None,
        );
        let structured = evaluator.evaluate(
            "How do I book a fitting appointment?",
            "1. Open the booking page.\n2. Pick a time slot.\n3. Pay the deposit on arrival.",
            None,
        );
        assert!(structured.answer_score >= plain.answer_score);
    }

    #[test]
    fn test_category_table_first_match_wins() {
        let evaluator = QualityEvaluator::new();
        // "价格" (price) appears before "租赁" (service) in the table
        assert_eq!(evaluator.classify("和服租赁的价格"), Some("price"));
        assert_eq!(evaluator.classify("和服租赁流程"), Some("service"));
        assert_eq!(evaluator.classify("completely unrelated text"), None);
    }

    #[test]
    fn test_domain_hits() {
        let evaluator = QualityEvaluator::new();
        assert_eq!(evaluator.domain_hits("nothing relevant here"), 0);
        assert!(evaluator.domain_hits("租赁价格和预约时间") >= 3);
    }

    #[test]
    fn test_batch_distribution() {
        let evaluator = QualityEvaluator::new();
        let pairs = vec![
            (
                "请问和服租赁的价格是多少？".to_string(),
                "我们的租赁价格从3000日元起，根据款式不同...".to_string(),
            ),
            ("?".to_string(), "好".to_string()),
        ];

        let report = evaluator.batch_evaluate(&pairs);
        assert_eq!(report.distribution.poor, 1);
        assert_eq!(report.low_quality, vec![1]);
        assert!(report.average > 0.0 && report.average < 1.0);
    }

    #[test]
    fn test_batch_empty() {
        let evaluator = QualityEvaluator::new();
        let report = evaluator.batch_evaluate(&[]);
        assert_eq!(report.average, 0.0);
        assert!(report.low_quality.is_empty());
    }
}
