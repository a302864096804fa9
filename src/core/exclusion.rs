//! core/exclusion.rs
//! Named subject/grating exclusion rules.
//!
//! Some units are known to be unusable (raw data problems, non-standard
//! observers). The rules are data, passed explicitly to whatever needs them,
//! so the same policy drives both the point slopes and the bootstrap.

use serde::{Deserialize, Serialize};

const LABEL_EPS: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExclusionRule {
    pub subject: String,
    /// Nominal grating label; `None` excludes the subject at every grating.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ExclusionRule {
    pub fn subject(subject: &str, reason: &str) -> Self {
        Self {
            subject: subject.to_string(),
            grating: None,
            reason: Some(reason.to_string()),
        }
    }

    pub fn unit(subject: &str, grating: f64, reason: &str) -> Self {
        Self {
            subject: subject.to_string(),
            grating: Some(grating),
            reason: Some(reason.to_string()),
        }
    }

    pub fn matches(&self, subject: &str, grating: f64) -> bool {
        self.subject == subject && self.grating.is_none_or(|g| (g - grating).abs() <= LABEL_EPS)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExclusionPolicy {
    rules: Vec<ExclusionRule>,
}

impl ExclusionPolicy {
    pub fn new(rules: Vec<ExclusionRule>) -> Self {
        Self { rules }
    }

    pub fn none() -> Self {
        Self::default()
    }

    /// Observers that deviate from the standard protocol, and n4 at .2 cpd
    /// whose raw matches are unusable.
    pub fn standard() -> Self {
        Self::new(Self::standard_rules())
    }

    pub fn standard_rules() -> Vec<ExclusionRule> {
        vec![
            ExclusionRule::subject("e1", "non-standard observer"),
            ExclusionRule::subject("n7", "non-standard observer"),
            ExclusionRule::subject("n2", "non-standard observer"),
            ExclusionRule::unit("n4", 0.2, "unusable raw data"),
        ]
    }

    pub fn rules(&self) -> &[ExclusionRule] {
        &self.rules
    }

    pub fn excludes(&self, subject: &str, grating: f64) -> Option<&ExclusionRule> {
        self.rules.iter().find(|r| r.matches(subject, grating))
    }

    pub fn is_excluded(&self, subject: &str, grating: f64) -> bool {
        self.excludes(subject, grating).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_rule_covers_every_grating() {
        let policy = ExclusionPolicy::standard();
        assert!(policy.is_excluded("n7", 0.1));
        assert!(policy.is_excluded("n7", 0.8));
        assert!(policy.is_excluded("n4", 0.2));
        assert!(!policy.is_excluded("n4", 0.4));
        assert!(!policy.is_excluded("n1", 0.2));
    }

    #[test]
    fn excludes_reports_matching_rule() {
        let policy = ExclusionPolicy::standard();
        let rule = policy.excludes("n4", 0.2).unwrap();
        assert_eq!(rule.reason.as_deref(), Some("unusable raw data"));
        assert!(ExclusionPolicy::none().excludes("n4", 0.2).is_none());
    }
}
