//! Keyword-based issue classification.
//!
//! Each label has a keyword list. A label's score is the fraction of its
//! keywords that occur in the lowercased issue text. Labels scoring at least
//! `min_confidence` apply; when none do, every label tied at the best
//! non-zero score applies instead.
//!
//! Priority comes from separate keyword rules:
//! - P0 if any critical keyword occurs
//! - P1 if any high keyword occurs
//! - P3 if every applied label is a low-priority label (docs, question)
//! - P2 otherwise

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::debug;

use triage_embeddings::issue_text;
use triage_types::{ClassifierSettings, Priority};

use crate::error::PipelineError;
use crate::pipeline::IssueClassifier;
use crate::types::{Classification, Issue};

struct LoweredRule {
    label: String,
    keywords: Vec<String>,
}

/// Classifier driven by [`ClassifierSettings`] keyword tables.
pub struct KeywordClassifier {
    min_confidence: f32,
    rules: Vec<LoweredRule>,
    critical_keywords: Vec<String>,
    high_keywords: Vec<String>,
    low_priority_labels: Vec<String>,
}

fn lowered(words: &[String]) -> Vec<String> {
    words.iter().map(|w| w.to_lowercase()).collect()
}

fn round2(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}

impl KeywordClassifier {
    pub fn new(settings: &ClassifierSettings) -> Self {
        Self {
            min_confidence: settings.min_confidence,
            rules: settings
                .labels
                .iter()
                .map(|rule| LoweredRule {
                    label: rule.label.clone(),
                    keywords: lowered(&rule.keywords),
                })
                .collect(),
            critical_keywords: lowered(&settings.critical_keywords),
            high_keywords: lowered(&settings.high_keywords),
            low_priority_labels: settings.low_priority_labels.clone(),
        }
    }

    /// Raw per-label scores in table order.
    pub fn scores(&self, text: &str) -> Vec<(&str, f32)> {
        let text = text.to_lowercase();
        self.rules
            .iter()
            .map(|rule| {
                let score = if rule.keywords.is_empty() {
                    0.0
                } else {
                    let matched = rule
                        .keywords
                        .iter()
                        .filter(|k| text.contains(k.as_str()))
                        .count();
                    matched as f32 / rule.keywords.len() as f32
                };
                (rule.label.as_str(), score)
            })
            .collect()
    }

    /// Priority from keyword rules and the applied labels.
    pub fn assess_priority(&self, text: &str, labels: &[String]) -> Priority {
        let text = text.to_lowercase();
        let contains_any = |words: &[String]| words.iter().any(|w| text.contains(w.as_str()));

        if contains_any(&self.critical_keywords) {
            Priority::P0
        } else if contains_any(&self.high_keywords) {
            Priority::P1
        } else if !labels.is_empty()
            && labels.iter().all(|l| self.low_priority_labels.contains(l))
        {
            Priority::P3
        } else {
            Priority::P2
        }
    }

    /// Classify an issue's title and optional body.
    pub fn classify_text(&self, title: &str, body: Option<&str>) -> Classification {
        let text = issue_text(title, body);
        let scores = self.scores(&text);

        let mut labels: Vec<String> = scores
            .iter()
            .filter(|(_, score)| *score >= self.min_confidence)
            .map(|(label, _)| label.to_string())
            .collect();

        let best = scores.iter().map(|(_, s)| *s).fold(0.0_f32, f32::max);
        if labels.is_empty() && best > 0.0 {
            labels = scores
                .iter()
                .filter(|(_, score)| *score == best)
                .map(|(label, _)| label.to_string())
                .collect();
        }

        let priority = self.assess_priority(&text, &labels);

        debug!(
            labels = ?labels,
            priority = %priority,
            confidence = round2(best),
            "Classified issue"
        );

        Classification {
            labels,
            priority,
            confidence: round2(best),
            scores: scores
                .into_iter()
                .map(|(label, score)| (label.to_string(), round2(score)))
                .collect::<BTreeMap<_, _>>(),
        }
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new(&ClassifierSettings::default())
    }
}

#[async_trait]
impl IssueClassifier for KeywordClassifier {
    async fn classify(&self, issue: &Issue) -> Result<Classification, PipelineError> {
        Ok(self.classify_text(&issue.title, issue.body.as_deref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crash_is_bug() {
        let classifier = KeywordClassifier::default();
        let result = classifier.classify_text(
            "App crashes on startup",
            Some("Error: the app is broken and throws an exception, a real bug"),
        );
        assert_eq!(result.labels, vec!["bug".to_string()]);
        assert_eq!(result.priority, Priority::P1);
        assert!(result.confidence >= 0.6);
    }

    #[test]
    fn test_falls_back_to_top_scoring_labels() {
        let classifier = KeywordClassifier::default();
        // One keyword each for docs ("readme") and question ("how"): 1/5 ties
        let result = classifier.classify_text("How do I read the readme", None);
        assert_eq!(result.labels, vec!["docs".to_string(), "question".to_string()]);
        assert!((result.confidence - 0.2).abs() < 1e-6);
        assert_eq!(result.priority, Priority::P3);
    }

    #[test]
    fn test_no_match_yields_no_labels() {
        let classifier = KeywordClassifier::default();
        let result = classifier.classify_text("Zzz", None);
        assert!(result.labels.is_empty());
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.priority, Priority::P2);
    }

    #[test]
    fn test_security_keywords_are_critical() {
        let classifier = KeywordClassifier::default();
        let result = classifier.classify_text("CVE-2024-1234 exploit in login", None);
        assert!(result.labels.contains(&"security".to_string()));
        assert_eq!(result.priority, Priority::P0);
        // Keywords match case-insensitively, including "CVE"
        assert!((result.scores["security"] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_scores_are_rounded() {
        let classifier = KeywordClassifier::default();
        let result = classifier.classify_text("slow", None);
        assert!((result.scores["performance"] - 0.2).abs() < 1e-6);
        assert_eq!(result.scores.len(), 6);
    }

    #[test]
    fn test_min_confidence_is_configurable() {
        let settings = ClassifierSettings {
            min_confidence: 0.1,
            ..Default::default()
        };
        let classifier = KeywordClassifier::new(&settings);
        let result = classifier.classify_text("Add support for slow networks", None);
        assert_eq!(
            result.labels,
            vec!["feature".to_string(), "performance".to_string()]
        );
    }

    #[tokio::test]
    async fn test_trait_impl() {
        let classifier = KeywordClassifier::default();
        let issue = Issue {
            repo: "acme/app".to_string(),
            number: 1,
            title: "Docs guide has a typo in the readme tutorial".to_string(),
            body: None,
            labels: vec![],
        };
        let result = classifier.classify(&issue).await.unwrap();
        assert_eq!(result.labels, vec!["docs".to_string()]);
        assert_eq!(result.priority, Priority::P3);
    }
}
