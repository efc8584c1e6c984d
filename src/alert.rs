//! Alert data model and the group key used as external dedup identity.
//!
//! An [`AlertGroup`] is what a notifier receives: a non-empty list of alerts
//! sharing one set of grouping labels. Its [`GroupKey`] hash is the identity
//! stateful integrations use to find the incident, alert or issue they created
//! for the group earlier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Label or annotation set. Keys are unique and iterate in sorted order.
pub type LabelSet = BTreeMap<String, String>;

/// Label carrying the alert rule name.
pub const ALERTNAME_LABEL: &str = "alertname";

/// Firing state of an alert or a group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    #[default]
    Firing,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Firing => "firing",
            AlertStatus::Resolved => "resolved",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single alert as received by the pipeline.
///
/// Notifiers never mutate alerts they are handed; enrichment works on clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(default)]
    pub status: AlertStatus,
    #[serde(default)]
    pub labels: LabelSet,
    #[serde(default)]
    pub annotations: LabelSet,
    pub starts_at: DateTime<Utc>,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub generator_url: Option<String>,
    /// Reference to an image associated with the alert (URL or provider token).
    #[serde(default)]
    pub image_ref: Option<String>,
}

impl Alert {
    /// Creates a firing alert with the given labels, started now.
    pub fn firing(labels: LabelSet) -> Self {
        Self {
            status: AlertStatus::Firing,
            labels,
            annotations: LabelSet::new(),
            starts_at: Utc::now(),
            ends_at: None,
            generator_url: None,
            image_ref: None,
        }
    }

    /// Value of the `alertname` label, if present.
    pub fn name(&self) -> Option<&str> {
        self.labels.get(ALERTNAME_LABEL).map(String::as_str)
    }

    pub fn is_resolved(&self) -> bool {
        self.status == AlertStatus::Resolved
    }

    /// Short stable identifier of the alert's label set.
    pub fn fingerprint(&self) -> String {
        let digest = hash_label_set(&self.labels);
        digest[..16].to_string()
    }
}

/// The grouping labels of an alert group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct GroupKey {
    labels: LabelSet,
}

impl GroupKey {
    pub fn new(labels: LabelSet) -> Self {
        Self { labels }
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    /// SHA-256 (hex) of the grouping label set.
    ///
    /// Depends only on the labels: not on alert order, alert status, or
    /// process state. Every stateful integration keys its external entity
    /// on this value.
    pub fn hash(&self) -> String {
        hash_label_set(&self.labels)
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.labels.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={:?}", k, v)?;
        }
        f.write_str("}")
    }
}

/// Length-prefixed encoding keeps `{a="bc"}` and `{ab="c"}` apart.
fn hash_label_set(labels: &LabelSet) -> String {
    let mut hasher = Sha256::new();
    for (k, v) in labels {
        hasher.update((k.len() as u64).to_le_bytes());
        hasher.update(k.as_bytes());
        hasher.update((v.len() as u64).to_le_bytes());
        hasher.update(v.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("alert group must contain at least one alert")]
pub struct EmptyAlertGroup;

/// A non-empty ordered list of alerts sharing one set of grouping labels.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertGroup {
    key: GroupKey,
    alerts: Vec<Alert>,
}

impl AlertGroup {
    pub fn new(group_labels: LabelSet, alerts: Vec<Alert>) -> Result<Self, EmptyAlertGroup> {
        if alerts.is_empty() {
            return Err(EmptyAlertGroup);
        }
        Ok(Self {
            key: GroupKey::new(group_labels),
            alerts,
        })
    }

    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    /// Shorthand for `self.key().hash()`.
    pub fn key_hash(&self) -> String {
        self.key.hash()
    }

    pub fn alerts(&self) -> &[Alert] {
        &self.alerts
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    /// Resolved iff every alert is resolved.
    pub fn status(&self) -> AlertStatus {
        if self.alerts.iter().all(Alert::is_resolved) {
            AlertStatus::Resolved
        } else {
            AlertStatus::Firing
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.status() == AlertStatus::Resolved
    }

    pub fn firing(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.iter().filter(|a| !a.is_resolved())
    }

    pub fn resolved(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.iter().filter(|a| a.is_resolved())
    }

    /// Labels present with the same value on every alert.
    pub fn common_labels(&self) -> LabelSet {
        intersect(self.alerts.iter().map(|a| &a.labels))
    }

    /// Annotations present with the same value on every alert.
    pub fn common_annotations(&self) -> LabelSet {
        intersect(self.alerts.iter().map(|a| &a.annotations))
    }
}

fn intersect<'a>(mut sets: impl Iterator<Item = &'a LabelSet>) -> LabelSet {
    let Some(first) = sets.next() else {
        return LabelSet::new();
    };
    let mut common = first.clone();
    for set in sets {
        common.retain(|k, v| set.get(k) == Some(v));
    }
    common
}
