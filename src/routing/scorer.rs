//! Pattern confidence scoring.
//!
//! Scores a query (plus optional context) against every pattern in a
//! [`PatternIndex`] and reports the patterns whose confidence reaches their
//! own detection threshold.
//!
//! ## Formula
//!
//! For each pattern:
//!
//! 1. **Positive sum**: add the weights of every matching indicator.
//! 2. **Diminishing returns**: if more than `diminishing_after` (3)
//!    indicators matched, multiply the positive sum by `diminishing_factor`
//!    (0.9) so verbose queries are not over-rewarded.
//! 3. **Contradictions**: subtract the weights of matching negative
//!    indicators; if any matched, multiply the result by
//!    `contradiction_factor` (0.7).
//! 4. Clamp to `[0.0, 1.0]`.
//!
//! Output is sorted by descending confidence, ties broken by pattern id.

use std::cmp::Ordering;
use std::sync::Arc;

use super::pattern::PatternIndex;
use crate::config::ScoringConfig;

/// A pattern whose confidence reached its detection threshold.
///
/// Created fresh for every scoring call.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedPattern {
    /// Id of the detected pattern.
    pub pattern_id: String,
    /// Confidence in `[0.0, 1.0]`.
    pub confidence: f64,
    /// Descriptions of the positive indicators that matched, in order.
    pub evidence: Vec<String>,
}

/// Full scoring detail for one pattern, detected or not.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternScore {
    /// Id of the scored pattern.
    pub pattern_id: String,
    /// Confidence in `[0.0, 1.0]`.
    pub confidence: f64,
    /// The pattern's own detection threshold.
    pub threshold: f64,
    /// Number of positive indicators that matched.
    pub positive_matches: usize,
    /// Number of negative indicators that matched.
    pub negative_matches: usize,
    /// Descriptions of the positive indicators that matched.
    pub evidence: Vec<String>,
}

impl PatternScore {
    /// `true` if the confidence reaches the pattern's threshold.
    pub fn is_detected(&self) -> bool {
        self.confidence >= self.threshold
    }
}

impl From<PatternScore> for DetectedPattern {
    fn from(score: PatternScore) -> Self {
        Self {
            pattern_id: score.pattern_id,
            confidence: score.confidence,
            evidence: score.evidence,
        }
    }
}

/// Combine matched indicator weights into a confidence in `[0.0, 1.0]`.
///
/// Pure; exposed so the formula can be tested in isolation.
pub fn combine_score(
    positive_sum: f64,
    positive_matches: usize,
    negative_sum: f64,
    negative_matches: usize,
    config: &ScoringConfig,
) -> f64 {
    let mut positive = positive_sum;
    if positive_matches > config.diminishing_after {
        positive *= config.diminishing_factor;
    }

    let mut score = positive - negative_sum;
    if negative_matches > 0 {
        score *= config.contradiction_factor;
    }

    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// Scores free text against a shared, read-only [`PatternIndex`].
///
/// Stateless apart from the index and constants; cheap to clone.
#[derive(Debug, Clone)]
pub struct ConfidenceScorer {
    index: Arc<PatternIndex>,
    config: ScoringConfig,
}

impl ConfidenceScorer {
    /// Create a scorer over `index` with the given constants.
    pub fn new(index: Arc<PatternIndex>, config: ScoringConfig) -> Self {
        Self { index, config }
    }

    /// The index being scored against.
    pub fn index(&self) -> &PatternIndex {
        &self.index
    }

    /// Score every pattern, detected or not, in output order.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use tokio_hybrid_router::config::ScoringConfig;
    /// use tokio_hybrid_router::{ConfidenceScorer, PatternIndex};
    ///
    /// let index = PatternIndex::from_toml_str(r#"
    /// [[patterns]]
    /// id = "retry-storm"
    /// name = "Retry storm"
    /// threshold = 0.5
    /// response = "Add jitter and a retry budget."
    /// [[patterns.indicators]]
    /// matcher = { keyword = "retry" }
    /// weight = 0.6
    /// description = "mentions retry"
    /// "#, "inline").unwrap();
    ///
    /// let scorer = ConfidenceScorer::new(Arc::new(index), ScoringConfig::default());
    /// let scores = scorer.evaluate("every client hits retry at once", None);
    /// assert!(scores[0].is_detected());
    ///
    /// // Keywords match as substrings, so "retries" does not contain "retry".
    /// let scores = scorer.evaluate("every client retries at once", None);
    /// assert!(!scores[0].is_detected());
    /// ```
    pub fn evaluate(&self, text: &str, context: Option<&str>) -> Vec<PatternScore> {
        let haystack = match context {
            Some(ctx) if !ctx.is_empty() => format!("{text}\n{ctx}"),
            _ => text.to_string(),
        };
        let lower = haystack.to_lowercase();

        let mut scores: Vec<PatternScore> = self
            .index
            .compiled()
            .iter()
            .map(|pattern| {
                let def = &pattern.definition;

                let mut positive_sum = 0.0;
                let mut evidence = Vec::new();
                for (matcher, indicator) in pattern.positive.iter().zip(&def.indicators) {
                    if matcher.is_match(&haystack, &lower) {
                        positive_sum += indicator.weight;
                        evidence.push(indicator.description.clone());
                    }
                }
                let positive_matches = evidence.len();

                let mut negative_sum = 0.0;
                let mut negative_matches = 0;
                for (matcher, indicator) in pattern.negative.iter().zip(&def.negative_indicators) {
                    if matcher.is_match(&haystack, &lower) {
                        negative_sum += indicator.weight;
                        negative_matches += 1;
                    }
                }

                PatternScore {
                    pattern_id: def.id.clone(),
                    confidence: combine_score(
                        positive_sum,
                        positive_matches,
                        negative_sum,
                        negative_matches,
                        &self.config,
                    ),
                    threshold: def.threshold,
                    positive_matches,
                    negative_matches,
                    evidence,
                }
            })
            .collect();

        scores.sort_by(|a, b| rank(a.confidence, &a.pattern_id, b.confidence, &b.pattern_id));
        scores
    }

    /// Patterns whose confidence reaches their threshold, best first.
    pub fn detect(&self, text: &str, context: Option<&str>) -> Vec<DetectedPattern> {
        self.evaluate(text, context)
            .into_iter()
            .filter(PatternScore::is_detected)
            .map(DetectedPattern::from)
            .collect()
    }

    /// The single best detected pattern, if any.
    pub fn best(&self, text: &str, context: Option<&str>) -> Option<DetectedPattern> {
        self.evaluate(text, context)
            .into_iter()
            .find(PatternScore::is_detected)
            .map(DetectedPattern::from)
    }
}

/// Descending confidence, then ascending id.
fn rank(a_conf: f64, a_id: &str, b_conf: f64, b_id: &str) -> Ordering {
    b_conf.total_cmp(&a_conf).then_with(|| a_id.cmp(b_id))
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::pattern::{
        Indicator, MatcherSpec, NegativeIndicator, PatternDefinition, Severity,
    };

    fn indicator(keyword: &str, weight: f64) -> Indicator {
        Indicator {
            matcher: MatcherSpec::Keyword(keyword.to_string()),
            weight,
            description: format!("mentions {keyword}"),
        }
    }

    fn pattern(id: &str, threshold: f64, indicators: Vec<Indicator>) -> PatternDefinition {
        PatternDefinition {
            id: id.to_string(),
            name: id.to_string(),
            severity: Severity::Medium,
            category: None,
            threshold,
            response: format!("response for {id}"),
            indicators,
            negative_indicators: vec![],
        }
    }

    fn scorer(defs: Vec<PatternDefinition>) -> ConfidenceScorer {
        let index = PatternIndex::from_definitions(defs).expect("test: valid patterns");
        ConfidenceScorer::new(Arc::new(index), ScoringConfig::default())
    }

    // -- combine_score ---------------------------------------------------

    #[test]
    fn test_four_matches_are_dampened_then_clamped() {
        // 4 × 0.4 = 1.6 → × 0.9 = 1.44 → clamp 1.0
        let score = combine_score(1.6, 4, 0.0, 0, &ScoringConfig::default());
        assert!((score - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_damping_applies_only_above_three_matches() {
        let cfg = ScoringConfig::default();
        assert!((combine_score(0.6, 3, 0.0, 0, &cfg) - 0.6).abs() < 1e-12);
        assert!((combine_score(0.8, 4, 0.0, 0, &cfg) - 0.72).abs() < 1e-12);
    }

    #[test]
    fn test_negative_match_subtracts_then_dampens() {
        // (0.8 - 0.2) × 0.7 = 0.42
        let score = combine_score(0.8, 2, 0.2, 1, &ScoringConfig::default());
        assert!((score - 0.42).abs() < 1e-12);
    }

    #[test]
    fn test_score_never_negative() {
        let score = combine_score(0.1, 1, 0.9, 2, &ScoringConfig::default());
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_custom_factors_are_honoured() {
        let cfg = ScoringConfig {
            diminishing_after: 1,
            diminishing_factor: 0.5,
            contradiction_factor: 1.0,
        };
        assert!((combine_score(0.8, 2, 0.0, 0, &cfg) - 0.4).abs() < 1e-12);
        assert!((combine_score(0.8, 1, 0.3, 1, &cfg) - 0.5).abs() < 1e-12);
    }

    // -- evaluate / detect -----------------------------------------------

    #[test]
    fn test_detects_pattern_above_threshold_with_evidence() {
        let s = scorer(vec![pattern(
            "retry-storm",
            0.5,
            vec![indicator("retry", 0.3), indicator("timeout", 0.3), indicator("queue", 0.3)],
        )]);

        let detected = s.detect("Clients retry after every timeout", None);
        assert_eq!(detected.len(), 1);
        assert_eq!(detected[0].pattern_id, "retry-storm");
        assert!((detected[0].confidence - 0.6).abs() < 1e-12);
        assert_eq!(detected[0].evidence, vec!["mentions retry", "mentions timeout"]);
    }

    #[test]
    fn test_below_threshold_is_scored_but_not_detected() {
        let s = scorer(vec![pattern("p", 0.8, vec![indicator("alpha", 0.5)])]);
        let scores = s.evaluate("alpha", None);
        assert_eq!(scores.len(), 1);
        assert!(!scores[0].is_detected());
        assert!(s.detect("alpha", None).is_empty());
        assert!(s.best("alpha", None).is_none());
    }

    #[test]
    fn test_confidence_equal_to_threshold_is_detected() {
        let s = scorer(vec![pattern("p", 0.5, vec![indicator("alpha", 0.5)])]);
        assert!(s.best("alpha", None).is_some());
    }

    #[test]
    fn test_context_is_searched_too() {
        let s = scorer(vec![pattern("p", 0.5, vec![indicator("deadlock", 0.6)])]);
        assert!(s.best("why does this hang?", None).is_none());
        assert!(s.best("why does this hang?", Some("log: deadlock detected")).is_some());
    }

    #[test]
    fn test_negative_indicator_reduces_confidence() {
        let mut def = pattern("p", 0.3, vec![indicator("mutex", 0.6)]);
        def.negative_indicators.push(NegativeIndicator {
            matcher: MatcherSpec::Keyword("single thread".to_string()),
            weight: 0.2,
        });
        let s = scorer(vec![def]);

        let plain = s.evaluate("mutex contention", None);
        let contradicted = s.evaluate("mutex contention on a single thread", None);
        assert!((plain[0].confidence - 0.6).abs() < 1e-12);
        assert!((contradicted[0].confidence - 0.28).abs() < 1e-12);
        assert_eq!(contradicted[0].negative_matches, 1);
    }

    #[test]
    fn test_sorted_by_confidence_then_id() {
        let s = scorer(vec![
            pattern("zeta", 0.1, vec![indicator("shared", 0.5)]),
            pattern("alpha", 0.1, vec![indicator("shared", 0.5)]),
            pattern("top", 0.1, vec![indicator("shared", 0.9)]),
        ]);

        let ids: Vec<_> = s
            .detect("shared word", None)
            .into_iter()
            .map(|d| d.pattern_id)
            .collect();
        assert_eq!(ids, vec!["top", "alpha", "zeta"]);
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let s = scorer(vec![
            pattern("a", 0.2, vec![indicator("x", 0.4), indicator("y", 0.4)]),
            pattern("b", 0.2, vec![indicator("y", 0.8)]),
        ]);
        assert_eq!(s.evaluate("x y", None), s.evaluate("x y", None));
    }

    #[test]
    fn test_empty_index_scores_nothing() {
        let s = ConfidenceScorer::new(Arc::new(PatternIndex::default()), ScoringConfig::default());
        assert!(s.evaluate("anything", None).is_empty());
        assert!(s.best("anything", None).is_none());
    }

    #[test]
    fn test_keyword_matches_substring_not_stem() {
        let s = scorer(vec![pattern("retry-storm", 0.5, vec![indicator("retry", 0.6)])]);
        assert!(s.evaluate("every client hits retry at once", None)[0].is_detected());
        assert!(!s.evaluate("every client retries at once", None)[0].is_detected());
    }
}
