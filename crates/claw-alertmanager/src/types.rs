//! Core alert types.
//!
//! - [`LabelSet`]: the identity of an alert
//! - [`Alert`]: a firing or resolved alert as received from the rule evaluator
//! - [`AlertStatus`]: firing or resolved at a point in time

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Label name to value mapping. Ordered so fingerprints and payloads are stable.
pub type LabelSet = BTreeMap<String, String>;

/// Label holding the alert's rule name.
pub const ALERTNAME_LABEL: &str = "alertname";

/// Whether an alert is still firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    /// The alert is actively firing.
    Firing,
    /// The alert has ended.
    Resolved,
}

impl AlertStatus {
    /// Returns the status as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Firing => "firing",
            Self::Resolved => "resolved",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An alert produced by the rule evaluation subsystem.
///
/// Field names follow the Alertmanager `PostableAlert` wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    /// Identifying labels.
    pub labels: LabelSet,
    /// Descriptive annotations (summary, description, runbook...).
    #[serde(default)]
    pub annotations: LabelSet,
    /// When the alert started firing.
    pub starts_at: DateTime<Utc>,
    /// When the alert ended, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
    /// Link back to the generator of this alert.
    #[serde(default, rename = "generatorURL")]
    pub generator_url: String,
}

impl Alert {
    /// Creates a firing alert starting now.
    #[must_use]
    pub fn new(labels: LabelSet) -> Self {
        Self {
            labels,
            annotations: LabelSet::new(),
            starts_at: Utc::now(),
            ends_at: None,
            generator_url: String::new(),
        }
    }

    /// Adds an annotation.
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Sets the start time.
    #[must_use]
    pub const fn starting_at(mut self, starts_at: DateTime<Utc>) -> Self {
        self.starts_at = starts_at;
        self
    }

    /// Sets the end time.
    #[must_use]
    pub const fn ending_at(mut self, ends_at: DateTime<Utc>) -> Self {
        self.ends_at = Some(ends_at);
        self
    }

    /// Sets the generator URL.
    #[must_use]
    pub fn with_generator_url(mut self, url: impl Into<String>) -> Self {
        self.generator_url = url.into();
        self
    }

    /// Returns the `alertname` label, or an empty string.
    #[must_use]
    pub fn name(&self) -> &str {
        self.labels.get(ALERTNAME_LABEL).map_or("", String::as_str)
    }

    /// Returns the status of the alert at `now`.
    #[must_use]
    pub fn status_at(&self, now: DateTime<Utc>) -> AlertStatus {
        match self.ends_at {
            Some(ends_at) if ends_at <= now => AlertStatus::Resolved,
            _ => AlertStatus::Firing,
        }
    }

    /// Returns true if the alert has ended at `now`.
    #[must_use]
    pub fn is_resolved_at(&self, now: DateTime<Utc>) -> bool {
        self.status_at(now) == AlertStatus::Resolved
    }

    /// Returns the stable fingerprint of the label set.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.labels)
    }
}

/// Computes a stable fingerprint for a label set: the first 16 hex digits of
/// the blake3 hash over length-prefixed names and values.
#[must_use]
pub fn fingerprint(labels: &LabelSet) -> String {
    let mut hasher = blake3::Hasher::new();
    for (k, v) in labels {
        for part in [k, v] {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
    }
    hasher.finalize().to_hex().as_str()[..16].to_string()
}

/// Builds a label set from string pairs.
#[must_use]
pub fn label_set<K: AsRef<str>, V: AsRef<str>>(pairs: &[(K, V)]) -> LabelSet {
    pairs
        .iter()
        .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
        .collect()
}
