//! Generic webhook notifier.
//!
//! Posts an Alertmanager version 4 webhook payload, extended with a rendered
//! `title`, `state` and `message`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{FactoryContext, HttpMethod, Notifier, NotifierConfig, NotifyContext, NotifyFuture, WebhookRequest, WebhookSender};
use crate::error::{AlertmanagerError, Result};
use crate::template::{TemplateData, DEFAULT_MESSAGE_TEXT, DEFAULT_TITLE_TEXT};
use crate::types::{Alert, AlertStatus, LabelSet};

/// Type tag.
pub const KIND: &str = "webhook";

/// Webhook payload, compatible with Alertmanager webhook receivers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    /// Payload format version.
    pub version: String,
    /// Key of the alert group.
    pub group_key: String,
    /// Number of alerts dropped by `maxAlerts`.
    pub truncated_alerts: usize,
    /// `firing` or `resolved`.
    pub status: String,
    /// Receiver name.
    pub receiver: String,
    /// Labels the group was formed on.
    pub group_labels: LabelSet,
    /// Labels common to all alerts.
    pub common_labels: LabelSet,
    /// Annotations common to all alerts.
    pub common_annotations: LabelSet,
    /// Link back to the alerting UI.
    #[serde(rename = "externalURL")]
    pub external_url: String,
    /// The alerts in this notification.
    pub alerts: Vec<WebhookAlert>,
    /// Rendered title.
    pub title: String,
    /// `alerting` or `ok`.
    pub state: String,
    /// Rendered message.
    pub message: String,
}

/// Alert format in webhook payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAlert {
    /// `firing` or `resolved`.
    pub status: String,
    /// Alert labels.
    pub labels: LabelSet,
    /// Alert annotations.
    pub annotations: LabelSet,
    /// When the alert started firing.
    pub starts_at: String,
    /// When the alert ended, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<String>,
    /// Link to the alert's generator.
    #[serde(rename = "generatorURL")]
    pub generator_url: String,
    /// Fingerprint of the label set.
    pub fingerprint: String,
}

impl WebhookPayload {
    fn build(data: &TemplateData, group_key: &str, truncated: usize, title: String, message: String) -> Self {
        let state = if data.status == "firing" { "alerting" } else { "ok" };
        Self {
            version: "4".to_string(),
            group_key: group_key.to_string(),
            truncated_alerts: truncated,
            status: data.status.clone(),
            receiver: data.receiver.clone(),
            group_labels: data.group_labels.clone(),
            common_labels: data.common_labels.clone(),
            common_annotations: data.common_annotations.clone(),
            external_url: data.external_url.clone(),
            alerts: data
                .alerts
                .iter()
                .map(|a| WebhookAlert {
                    status: a.status.clone(),
                    labels: a.labels.clone(),
                    annotations: a.annotations.clone(),
                    starts_at: a.starts_at.clone(),
                    ends_at: (!a.ends_at.is_empty()).then(|| a.ends_at.clone()),
                    generator_url: a.generator_url.clone(),
                    fingerprint: a.fingerprint.clone(),
                })
                .collect(),
            title,
            state: state.to_string(),
            message,
        }
    }
}

/// Sends alert groups to an arbitrary HTTP endpoint.
#[derive(Debug)]
pub struct WebhookNotifier {
    name: String,
    url: String,
    method: HttpMethod,
    basic_auth: Option<(String, String)>,
    max_alerts: usize,
    title: String,
    message: String,
    send_resolved: bool,
    sender: Arc<dyn WebhookSender>,
}

impl WebhookNotifier {
    /// Builds the notifier from its settings.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::Validation` if `url` is missing, `httpMethod`
    /// isn't `POST`/`PUT`, or `maxAlerts` is malformed.
    pub fn from_config(config: &NotifierConfig, ctx: &FactoryContext) -> Result<Self> {
        let url = config
            .setting("url")
            .ok_or_else(|| AlertmanagerError::validation("could not find url property in settings"))?;

        let method = match config.setting("httpMethod") {
            None => HttpMethod::Post,
            Some(m) => HttpMethod::parse(&m).ok_or_else(|| {
                AlertmanagerError::validation(format!("unsupported httpMethod {m:?}, use POST or PUT"))
            })?,
        };

        let basic_auth = config
            .setting("username")
            .map(|user| (user, config.secret("password").unwrap_or_default()));

        let max_alerts = config
            .setting_u64("maxAlerts")?
            .map_or(0, |n| usize::try_from(n).unwrap_or(usize::MAX));

        Ok(Self {
            name: config.display_name().to_string(),
            url,
            method,
            basic_auth,
            max_alerts,
            title: config.setting_or("title", DEFAULT_TITLE_TEXT),
            message: config.setting_or("message", DEFAULT_MESSAGE_TEXT),
            send_resolved: !config.disable_resolve_message,
            sender: Arc::clone(&ctx.sender),
        })
    }

    /// Returns the target URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        KIND
    }

    fn notify<'a>(&'a self, ctx: &'a NotifyContext, alerts: &'a [Alert]) -> NotifyFuture<'a> {
        Box::pin(async move {
            let (kept, truncated) = if self.max_alerts > 0 && alerts.len() > self.max_alerts {
                (&alerts[..self.max_alerts], alerts.len() - self.max_alerts)
            } else {
                (alerts, 0)
            };

            let mut data = ctx.template_data(kept);
            // The group is firing if any alert is, including dropped ones.
            if alerts.iter().any(|a| !a.is_resolved_at(ctx.now)) {
                data.status = AlertStatus::Firing.as_str().to_string();
            }
            let mut tmpl = ctx.templates.expander(&data);
            let title = tmpl.expand(&self.title);
            let message = tmpl.expand(&self.message);
            tmpl.finish(&self.name, &[&title, &message])?;

            let payload = WebhookPayload::build(&data, &ctx.group_key, truncated, title, message);
            let mut request = WebhookRequest::json(&self.url, &payload)?.with_method(self.method);
            if let Some((user, password)) = &self.basic_auth {
                request = request.with_basic_auth(user, password);
            }

            debug!(notifier = %self.name, alerts = kept.len(), truncated, "sending webhook");
            self.sender.send(request).await?;
            info!(notifier = %self.name, receiver = %ctx.receiver, "webhook notification sent");
            Ok(true)
        })
    }

    fn send_resolved(&self) -> bool {
        self.send_resolved
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;

    fn build(config: &NotifierConfig, sender: &Arc<RecordingSender>) -> Result<WebhookNotifier> {
        WebhookNotifier::from_config(config, &factory_ctx(Arc::clone(sender)))
    }

    #[test]
    fn missing_url_is_rejected() {
        let sender = Arc::new(RecordingSender::default());
        let err = build(&NotifierConfig::new("ops", KIND), &sender).unwrap_err();
        assert!(matches!(err, AlertmanagerError::Validation { .. }));
        assert!(err.to_string().contains("url"));
    }

    #[test]
    fn unsupported_method_is_rejected() {
        let sender = Arc::new(RecordingSender::default());
        let cfg = NotifierConfig::new("ops", KIND)
            .with_setting("url", "http://hook")
            .with_setting("httpMethod", "DELETE");
        assert!(build(&cfg, &sender).is_err());
    }

    #[tokio::test]
    async fn posts_v4_payload() {
        let sender = Arc::new(RecordingSender::default());
        let cfg = NotifierConfig::new("ops", KIND)
            .with_setting("url", "http://hook")
            .with_setting("httpMethod", "PUT")
            .with_setting("username", "admin")
            .with_secure_setting("password", "pw");
        let notifier = build(&cfg, &sender).unwrap();

        let ctx = notify_ctx();
        let alerts = vec![firing_alert()];
        assert!(notifier.notify(&ctx, &alerts).await.unwrap());

        let request = sender.last();
        assert_eq!(request.url, "http://hook");
        assert_eq!(request.method, HttpMethod::Put);
        assert_eq!(request.basic_auth, Some(("admin".into(), "pw".into())));

        let body = request.json_body().unwrap();
        assert_eq!(body["version"], "4");
        assert_eq!(body["status"], "firing");
        assert_eq!(body["state"], "alerting");
        assert_eq!(body["receiver"], "ops");
        assert_eq!(body["title"], "[FIRING:1] Foo");
        assert_eq!(body["externalURL"], "http://grafana.local");
        assert_eq!(body["alerts"][0]["labels"]["instance"], "node-1");
        assert!(body["message"].as_str().unwrap().contains("disk full"));
    }

    #[tokio::test]
    async fn truncates_to_max_alerts() {
        let sender = Arc::new(RecordingSender::default());
        let cfg = NotifierConfig::new("ops", KIND)
            .with_setting("url", "http://hook")
            .with_setting("maxAlerts", 1);
        let notifier = build(&cfg, &sender).unwrap();

        let second = Alert::new(crate::types::label_set(&[("alertname", "Foo"), ("instance", "node-2")]));
        let alerts = vec![firing_alert(), second];
        notifier.notify(&notify_ctx(), &alerts).await.unwrap();

        let body = sender.last().json_body().unwrap();
        assert_eq!(body["alerts"].as_array().unwrap().len(), 1);
        assert_eq!(body["truncatedAlerts"], 1);
    }

    #[tokio::test]
    async fn truncated_firing_alert_keeps_group_firing() {
        let sender = Arc::new(RecordingSender::default());
        let cfg = NotifierConfig::new("ops", KIND)
            .with_setting("url", "http://hook")
            .with_setting("maxAlerts", 1);
        let notifier = build(&cfg, &sender).unwrap();

        let alerts = vec![resolved_alert(), firing_alert()];
        notifier.notify(&notify_ctx(), &alerts).await.unwrap();

        let body = sender.last().json_body().unwrap();
        assert_eq!(body["alerts"].as_array().unwrap().len(), 1);
        assert_eq!(body["alerts"][0]["status"], "resolved");
        assert_eq!(body["status"], "firing");
        assert_eq!(body["state"], "alerting");
    }

    #[tokio::test]
    async fn resolved_state_is_ok() {
        let sender = Arc::new(RecordingSender::default());
        let cfg = NotifierConfig::new("ops", KIND).with_setting("url", "http://hook");
        let notifier = build(&cfg, &sender).unwrap();

        let alerts = vec![resolved_alert()];
        notifier.notify(&notify_ctx(), &alerts).await.unwrap();
        let body = sender.last().json_body().unwrap();
        assert_eq!(body["status"], "resolved");
        assert_eq!(body["state"], "ok");
        assert!(body["alerts"][0]["endsAt"].is_string());
    }

    #[tokio::test]
    async fn transport_failure_propagates() {
        let sender = Arc::new(RecordingSender::failing());
        let cfg = NotifierConfig::new("ops", KIND).with_setting("url", "http://hook");
        let notifier = build(&cfg, &sender).unwrap();

        let alerts = vec![firing_alert()];
        let err = notifier.notify(&notify_ctx(), &alerts).await.unwrap_err();
        assert!(matches!(err, AlertmanagerError::NotificationFailed { .. }));
    }

    #[tokio::test]
    async fn broken_template_with_no_output_fails() {
        let sender = Arc::new(RecordingSender::default());
        let cfg = NotifierConfig::new("ops", KIND)
            .with_setting("url", "http://hook")
            .with_setting("title", "{{ .Status.Nope }}")
            .with_setting("message", "{{ template \"missing\" . }}");
        let notifier = build(&cfg, &sender).unwrap();

        let alerts = vec![firing_alert()];
        let err = notifier.notify(&notify_ctx(), &alerts).await.unwrap_err();
        assert!(matches!(err, AlertmanagerError::TemplateExecution { .. }));
        assert!(sender.requests.lock().is_empty());
    }
}
