//! Template-visible view of an alert group.

use crate::alert::{Alert, AlertGroup, AlertStatus, LabelSet};
use minijinja::{Value, context};
use serde::Serialize;

/// Synthetic annotation carrying an attached image URL.
pub const IMAGE_URL_ANNOTATION: &str = "image_url";

/// One alert as seen by templates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderAlert {
    pub status: AlertStatus,
    pub labels: LabelSet,
    pub annotations: LabelSet,
    pub starts_at: String,
    pub ends_at: Option<String>,
    pub generator_url: Option<String>,
    pub fingerprint: String,
    pub image_url: Option<String>,
}

impl RenderAlert {
    fn from_alert(alert: &Alert) -> Self {
        Self {
            status: alert.status,
            labels: alert.labels.clone(),
            annotations: alert.annotations.clone(),
            starts_at: alert.starts_at.to_rfc3339(),
            ends_at: alert.ends_at.map(|t| t.to_rfc3339()),
            generator_url: alert.generator_url.clone(),
            fingerprint: alert.fingerprint(),
            image_url: None,
        }
    }
}

/// Data every template of one notification attempt is rendered against.
///
/// Built once per attempt from the [`AlertGroup`]; it holds copies, so
/// enrichment (see [`RenderContext::attach_image_url`]) never touches the
/// caller's alerts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderContext {
    pub receiver: String,
    pub status: AlertStatus,
    pub group_key: String,
    pub group_key_hash: String,
    pub group_labels: LabelSet,
    pub common_labels: LabelSet,
    pub common_annotations: LabelSet,
    pub external_url: String,
    pub alerts: Vec<RenderAlert>,
}

impl RenderContext {
    pub fn new(group: &AlertGroup, receiver: &str, external_url: &str) -> Self {
        Self {
            receiver: receiver.to_string(),
            status: group.status(),
            group_key: group.key().to_string(),
            group_key_hash: group.key_hash(),
            group_labels: group.key().labels().clone(),
            common_labels: group.common_labels(),
            common_annotations: group.common_annotations(),
            external_url: external_url.to_string(),
            alerts: group.alerts().iter().map(RenderAlert::from_alert).collect(),
        }
    }

    /// Attaches an image URL to the alert at `index`, also exposing it as the
    /// `image_url` annotation. Out-of-range indexes are ignored.
    pub fn attach_image_url(&mut self, index: usize, url: &str) {
        if let Some(alert) = self.alerts.get_mut(index) {
            alert.image_url = Some(url.to_string());
            alert
                .annotations
                .insert(IMAGE_URL_ANNOTATION.to_string(), url.to_string());
        }
    }

    pub fn firing(&self) -> impl Iterator<Item = &RenderAlert> {
        self.alerts
            .iter()
            .filter(|a| a.status == AlertStatus::Firing)
    }

    pub fn resolved(&self) -> impl Iterator<Item = &RenderAlert> {
        self.alerts
            .iter()
            .filter(|a| a.status == AlertStatus::Resolved)
    }

    /// Value handed to minijinja. Adds the `firing` / `resolved` partitions.
    pub(crate) fn template_value(&self) -> Value {
        let firing: Vec<&RenderAlert> = self.firing().collect();
        let resolved: Vec<&RenderAlert> = self.resolved().collect();
        context! {
            receiver => &self.receiver,
            status => self.status.as_str(),
            group_key => &self.group_key,
            group_key_hash => &self.group_key_hash,
            group_labels => &self.group_labels,
            common_labels => &self.common_labels,
            common_annotations => &self.common_annotations,
            external_url => &self.external_url,
            alerts => &self.alerts,
            firing => firing,
            resolved => resolved,
        }
    }
}
