//! Inhibition: muting target alerts while a related source alert fires.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::matcher::{matches_all, parse_matchers, Matcher};
use crate::types::{Alert, LabelSet};

/// Inhibit rule as written in the alerting configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InhibitRuleConfig {
    /// Matchers selecting the alerts that inhibit.
    #[serde(default)]
    pub source_matchers: Vec<String>,
    /// Matchers selecting the alerts that get inhibited.
    #[serde(default)]
    pub target_matchers: Vec<String>,
    /// Labels that must carry the same value on source and target.
    #[serde(default)]
    pub equal: Vec<String>,
}

/// A compiled inhibit rule.
#[derive(Debug, Clone)]
pub struct InhibitRule {
    source: Vec<Matcher>,
    target: Vec<Matcher>,
    equal: Vec<String>,
}

impl InhibitRule {
    /// Compiles a rule from its configuration.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::InvalidPayload` if a matcher is malformed.
    pub fn from_config(config: &InhibitRuleConfig) -> Result<Self> {
        Ok(Self {
            source: parse_matchers(&config.source_matchers)?,
            target: parse_matchers(&config.target_matchers)?,
            equal: config.equal.clone(),
        })
    }

    fn equal_labels_match(&self, source: &LabelSet, target: &LabelSet) -> bool {
        self.equal
            .iter()
            .all(|name| source.get(name) == target.get(name))
    }
}

/// Evaluates inhibit rules against a batch of firing alerts.
#[derive(Debug, Clone, Default)]
pub struct Inhibitor {
    rules: Vec<InhibitRule>,
}

impl Inhibitor {
    /// Creates an inhibitor from compiled rules.
    #[must_use]
    pub const fn new(rules: Vec<InhibitRule>) -> Self {
        Self { rules }
    }

    /// Returns the number of rules.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Returns the fingerprints of the firing alerts that inhibit `target`.
    ///
    /// An alert never inhibits itself, even when it matches both sides of a rule.
    #[must_use]
    pub fn inhibited_by(&self, target: &Alert, firing: &[&Alert]) -> Vec<String> {
        let target_fp = target.fingerprint();
        let mut sources: Vec<String> = Vec::new();

        for rule in &self.rules {
            if !matches_all(&rule.target, &target.labels) {
                continue;
            }
            for source in firing {
                let source_fp = source.fingerprint();
                if source_fp == target_fp || sources.contains(&source_fp) {
                    continue;
                }
                if matches_all(&rule.source, &source.labels)
                    && rule.equal_labels_match(&source.labels, &target.labels)
                {
                    sources.push(source_fp);
                }
            }
        }

        sources
    }
}
