//! Fixed-order arbitration rules.
//!
//! Thresholds only ever apply to the closed-set confidence; the open-set
//! ranking contributes rank membership and its top label, never a score
//! compared against a closed-set probability.

use std::collections::HashSet;

use crate::config::ArbitrationConfig;
use crate::error::{ConfigError, InferenceError};
use crate::labels::{normalize_label, LabelSet};
use crate::types::{ClosedSetResult, ReasonCode, SimilarityRanking, Verdict, VerdictSource};

/// Decides between the closed-set prediction and the open-set ranking.
#[derive(Debug, Clone)]
pub struct ArbitrationPolicy {
    general_threshold: f64,
    severity_threshold: f64,
    top_k: usize,
    severity_labels: HashSet<String>,
}

impl ArbitrationPolicy {
    /// Build a policy, checking threshold ranges, `top_k`, and that every
    /// severity label exists in `labels`.
    pub fn new(config: &ArbitrationConfig, labels: &LabelSet) -> Result<Self, ConfigError> {
        for (name, value) in [
            ("arbitration.general_threshold", config.general_threshold),
            ("arbitration.severity_threshold", config.severity_threshold),
        ] {
            // NaN fails the range check too.
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be between 0.0 and 1.0, got {value}"
                )));
            }
        }
        if config.top_k == 0 {
            return Err(ConfigError::ValidationError(
                "arbitration.top_k must be > 0".to_string(),
            ));
        }

        let mut severity_labels = HashSet::new();
        for label in &config.severity_labels {
            if !labels.contains(label) {
                return Err(ConfigError::ValidationError(format!(
                    "arbitration.severity_labels: '{label}' is not in the label set"
                )));
            }
            severity_labels.insert(normalize_label(label));
        }
        Ok(Self {
            general_threshold: config.general_threshold,
            severity_threshold: config.severity_threshold,
            top_k: config.top_k,
            severity_labels,
        })
    }

    /// Whether `label` is treated as severe.
    pub fn is_severe(&self, label: &str) -> bool {
        self.severity_labels.contains(&normalize_label(label))
    }

    /// Apply the rules in order; the first match wins.
    ///
    /// 1. severe label at or above the severity threshold: keep closed-set
    /// 2. confident and within the open-set top-K: keep closed-set
    /// 3. confident but outside the top-K: take the open-set top label
    /// 4. otherwise: take the open-set top label
    ///
    /// Rules 3 and 4 refuse an empty ranking instead of inventing a label.
    pub fn decide(
        &self,
        closed: &ClosedSetResult,
        ranking: &SimilarityRanking,
    ) -> Result<Verdict, InferenceError> {
        let confident = closed.confidence >= self.general_threshold;

        let verdict = if self.is_severe(&closed.label)
            && closed.confidence >= self.severity_threshold
        {
            Self::keep(closed, ReasonCode::SeverityOverride)
        } else if confident && ranking.contains_in_top_k(&closed.label, self.top_k) {
            Self::keep(closed, ReasonCode::ConfidentAndValidated)
        } else if confident {
            Self::defer(ranking, ReasonCode::RejectedByValidator)?
        } else {
            Self::defer(ranking, ReasonCode::LowConfidence)?
        };

        tracing::debug!(
            closed_label = %closed.label,
            closed_confidence = closed.confidence,
            open_top = ranking.top().map(|r| r.label.as_str()).unwrap_or(""),
            general_threshold = self.general_threshold,
            severity_threshold = self.severity_threshold,
            top_k = self.top_k,
            reason = ?verdict.reason,
            "Arbitration: {} ({})",
            verdict.final_label,
            verdict.source
        );

        Ok(verdict)
    }

    fn keep(closed: &ClosedSetResult, reason: ReasonCode) -> Verdict {
        Verdict {
            final_label: closed.label.clone(),
            final_confidence: closed.confidence,
            source: VerdictSource::ClosedSet,
            reason,
        }
    }

    fn defer(ranking: &SimilarityRanking, reason: ReasonCode) -> Result<Verdict, InferenceError> {
        let top = ranking.top().ok_or_else(|| {
            InferenceError::DistributionInvalid("open-set ranking is empty".to_string())
        })?;
        Ok(Verdict {
            final_label: top.label.clone(),
            final_confidence: top.score,
            source: VerdictSource::OpenSet,
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProbabilityVector;

    const LABELS: [&str; 6] = [
        "Acne",
        "Basal Cell Carcinoma",
        "Eczema",
        "Melanoma",
        "Psoriasis",
        "Rosacea",
    ];

    fn label_set() -> LabelSet {
        LabelSet::new(LABELS.iter().map(|s| s.to_string()).collect()).unwrap()
    }

    fn policy() -> ArbitrationPolicy {
        ArbitrationPolicy::new(&ArbitrationConfig::default(), &label_set()).unwrap()
    }

    fn closed(label: &str, confidence: f64) -> ClosedSetResult {
        let index = LABELS.iter().position(|l| *l == label).unwrap();
        let rest = (1.0 - confidence) / (LABELS.len() - 1) as f64;
        let values = (0..LABELS.len())
            .map(|i| if i == index { confidence } else { rest })
            .collect();
        ClosedSetResult {
            label: label.to_string(),
            index,
            confidence,
            distribution: ProbabilityVector::new(values).unwrap(),
        }
    }

    /// Ranking in the given order with strictly decreasing scores.
    fn ranking(labels: &[&str]) -> SimilarityRanking {
        let names: Vec<String> = labels.iter().map(|s| s.to_string()).collect();
        let raw: Vec<f64> = (0..labels.len()).map(|i| (labels.len() - i) as f64).collect();
        let total: f64 = raw.iter().sum();
        let scores: Vec<f64> = raw.iter().map(|s| s / total).collect();
        SimilarityRanking::from_scores(&names, &scores)
    }

    #[test]
    fn test_scenario_severity_override() {
        let verdict = policy()
            .decide(&closed("Melanoma", 0.30), &ranking(&["acne", "eczema"]))
            .unwrap();
        assert_eq!(verdict.source, VerdictSource::ClosedSet);
        assert_eq!(verdict.final_label, "Melanoma");
        assert_eq!(verdict.reason, ReasonCode::SeverityOverride);
        assert!(verdict.reason.to_string().contains("severity override"));
    }

    #[test]
    fn test_scenario_confident_agreement() {
        let open = ranking(&["Rosacea", "Eczema", "Psoriasis", "Acne", "Vitiligo"]);
        let verdict = policy().decide(&closed("Acne", 0.92), &open).unwrap();
        assert_eq!(verdict.final_label, "Acne");
        assert_eq!(verdict.source, VerdictSource::ClosedSet);
        assert_eq!(verdict.reason, ReasonCode::ConfidentAndValidated);
        assert!((verdict.final_confidence - 0.92).abs() < 1e-12);
    }

    #[test]
    fn test_scenario_confident_but_rejected() {
        let open = ranking(&["Rosacea", "Eczema", "Psoriasis", "Vitiligo", "Melanoma", "Acne"]);
        let verdict = policy().decide(&closed("Acne", 0.92), &open).unwrap();
        assert_eq!(verdict.source, VerdictSource::OpenSet);
        assert_eq!(verdict.final_label, "Rosacea");
        assert_eq!(verdict.reason, ReasonCode::RejectedByValidator);
        assert_eq!(verdict.final_confidence, open.top().unwrap().score);
    }

    #[test]
    fn test_scenario_low_confidence() {
        // Agreement does not matter below the general threshold.
        let open = ranking(&["Eczema", "Acne"]);
        let verdict = policy().decide(&closed("Acne", 0.10), &open).unwrap();
        assert_eq!(verdict.source, VerdictSource::OpenSet);
        assert_eq!(verdict.final_label, "Eczema");
        assert_eq!(verdict.reason, ReasonCode::LowConfidence);
    }

    #[test]
    fn test_severity_override_beats_agreement() {
        let open = ranking(&["melanoma", "acne"]);
        let verdict = policy().decide(&closed("Melanoma", 0.95), &open).unwrap();
        assert_eq!(verdict.reason, ReasonCode::SeverityOverride);
    }

    #[test]
    fn test_severe_label_below_severity_threshold_falls_through() {
        let open = ranking(&["eczema"]);
        let verdict = policy().decide(&closed("Melanoma", 0.20), &open).unwrap();
        assert_eq!(verdict.reason, ReasonCode::LowConfidence);
        assert_eq!(verdict.final_label, "eczema");
    }

    #[test]
    fn test_thresholds_are_inclusive() {
        let verdict = policy()
            .decide(&closed("Basal Cell Carcinoma", 0.25), &ranking(&["acne"]))
            .unwrap();
        assert_eq!(verdict.reason, ReasonCode::SeverityOverride);

        let verdict = policy()
            .decide(&closed("Acne", 0.75), &ranking(&["acne"]))
            .unwrap();
        assert_eq!(verdict.reason, ReasonCode::ConfidentAndValidated);
    }

    #[test]
    fn test_agreement_matches_across_naming_styles() {
        let open = ranking(&["basal_cell_carcinoma"]);
        let mut config = ArbitrationConfig::default();
        config.severity_labels.clear();
        let policy = ArbitrationPolicy::new(&config, &label_set()).unwrap();
        let verdict = policy
            .decide(&closed("Basal Cell Carcinoma", 0.9), &open)
            .unwrap();
        assert_eq!(verdict.reason, ReasonCode::ConfidentAndValidated);
    }

    #[test]
    fn test_top_k_bounds_agreement() {
        let mut config = ArbitrationConfig::default();
        config.top_k = 1;
        let policy = ArbitrationPolicy::new(&config, &label_set()).unwrap();
        let verdict = policy
            .decide(&closed("Acne", 0.9), &ranking(&["eczema", "acne"]))
            .unwrap();
        assert_eq!(verdict.reason, ReasonCode::RejectedByValidator);
    }

    #[test]
    fn test_empty_ranking_is_refused() {
        let empty = SimilarityRanking::from_scores(&[], &[]);
        let err = policy().decide(&closed("Acne", 0.1), &empty).unwrap_err();
        assert!(matches!(err, InferenceError::DistributionInvalid(_)));
        // Rule 1 and 2 never look at the ranking's top entry.
        assert!(policy().decide(&closed("Melanoma", 0.5), &empty).is_ok());
    }

    #[test]
    fn test_decide_is_deterministic() {
        let open = ranking(&["Rosacea", "Acne", "Eczema"]);
        let input = closed("Acne", 0.8);
        let p = policy();
        let first = p.decide(&input, &open).unwrap();
        for _ in 0..10 {
            assert_eq!(p.decide(&input, &open).unwrap(), first);
        }
    }

    #[test]
    fn test_unknown_severity_label_rejected() {
        let mut config = ArbitrationConfig::default();
        config.severity_labels.push("Lupus".to_string());
        let err = ArbitrationPolicy::new(&config, &label_set()).unwrap_err();
        assert!(err.to_string().contains("Lupus"));
    }

    #[test]
    fn test_rejects_zero_top_k() {
        let config = ArbitrationConfig {
            top_k: 0,
            ..Default::default()
        };
        let err = ArbitrationPolicy::new(&config, &label_set()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
        assert!(err.to_string().contains("top_k"));
    }

    #[test]
    fn test_rejects_out_of_range_threshold() {
        for (general, severity) in [(0.5, -3.0), (1.5, 0.25), (f64::NAN, 0.25), (0.5, f64::NAN)] {
            let config = ArbitrationConfig {
                general_threshold: general,
                severity_threshold: severity,
                ..Default::default()
            };
            let err = ArbitrationPolicy::new(&config, &label_set()).unwrap_err();
            assert!(matches!(err, ConfigError::ValidationError(_)), "{general}/{severity}");
        }

        // The boundaries themselves are valid.
        let config = ArbitrationConfig {
            general_threshold: 1.0,
            severity_threshold: 0.0,
            ..Default::default()
        };
        assert!(ArbitrationPolicy::new(&config, &label_set()).is_ok());
    }
}
