//! PagerDuty Events API v2 notifier.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::info;

use super::{FactoryContext, Notifier, NotifierConfig, NotifyContext, NotifyFuture, WebhookRequest, WebhookSender};
use crate::error::{AlertmanagerError, Result};
use crate::template::{DEFAULT_MESSAGE_TEXT, DEFAULT_TITLE_TEXT};
use crate::types::Alert;

/// Type tag.
pub const KIND: &str = "pagerduty";

/// Events API v2 endpoint.
pub const EVENTS_URL: &str = "https://events.pagerduty.com/v2/enqueue";

const MAX_SUMMARY_CHARS: usize = 1024;
const SEVERITIES: [&str; 4] = ["critical", "error", "warning", "info"];

#[derive(Debug, Serialize)]
struct PagerDutyEvent {
    routing_key: String,
    dedup_key: String,
    event_action: &'static str,
    payload: PagerDutyPayload,
    client: &'static str,
    client_url: String,
    links: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct PagerDutyPayload {
    summary: String,
    source: String,
    severity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    component: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    group: Option<String>,
    custom_details: serde_json::Value,
}

/// Triggers and resolves PagerDuty incidents.
#[derive(Debug)]
pub struct PagerDutyNotifier {
    name: String,
    integration_key: String,
    url: String,
    severity: String,
    class: Option<String>,
    component: Option<String>,
    group: Option<String>,
    summary: String,
    send_resolved: bool,
    sender: Arc<dyn WebhookSender>,
}

impl PagerDutyNotifier {
    /// Builds the notifier from its settings.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::Validation` if `integrationKey` is missing
    /// or `severity` is unknown.
    pub fn from_config(config: &NotifierConfig, ctx: &FactoryContext) -> Result<Self> {
        let integration_key = config.secret("integrationKey").ok_or_else(|| {
            AlertmanagerError::validation("could not find integration key property in settings")
        })?;

        let severity = config.setting_or("severity", "critical");
        if !SEVERITIES.contains(&severity.as_str()) {
            return Err(AlertmanagerError::validation(format!(
                "invalid severity {severity:?}"
            )));
        }

        Ok(Self {
            name: config.display_name().to_string(),
            integration_key,
            url: config.setting_or("url", EVENTS_URL),
            severity,
            class: config.setting("class"),
            component: config.setting("component"),
            group: config.setting("group"),
            summary: config.setting_or("summary", DEFAULT_TITLE_TEXT),
            send_resolved: !config.disable_resolve_message,
            sender: Arc::clone(&ctx.sender),
        })
    }

    /// Incident key for a group: the same group always maps to the same incident.
    #[must_use]
    pub fn dedup_key(group_key: &str) -> String {
        blake3::hash(group_key.as_bytes()).to_hex().as_str()[..32].to_string()
    }
}

impl Notifier for PagerDutyNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        KIND
    }

    fn notify<'a>(&'a self, ctx: &'a NotifyContext, alerts: &'a [Alert]) -> NotifyFuture<'a> {
        Box::pin(async move {
            let data = ctx.template_data(alerts);
            let mut tmpl = ctx.templates.expander(&data);
            let summary: String = tmpl.expand(&self.summary).chars().take(MAX_SUMMARY_CHARS).collect();
            let details = tmpl.expand(DEFAULT_MESSAGE_TEXT);
            tmpl.finish(&self.name, &[&summary])?;

            let firing = data.firing_count();
            let event_action = if firing > 0 { "trigger" } else { "resolve" };

            let event = PagerDutyEvent {
                routing_key: self.integration_key.clone(),
                dedup_key: Self::dedup_key(&ctx.group_key),
                event_action,
                payload: PagerDutyPayload {
                    summary,
                    source: ctx.receiver.clone(),
                    severity: self.severity.clone(),
                    class: self.class.clone(),
                    component: self.component.clone(),
                    group: self.group.clone(),
                    custom_details: json!({
                        "firing": details,
                        "num_firing": firing.to_string(),
                        "num_resolved": (data.alerts.len() - firing).to_string(),
                    }),
                },
                client: "claw-alertmanager",
                client_url: ctx.external_url.clone(),
                links: vec![json!({"href": ctx.external_url, "text": "External URL"})],
            };

            self.sender.send(WebhookRequest::json(&self.url, &event)?).await?;
            info!(
                notifier = %self.name,
                receiver = %ctx.receiver,
                action = event_action,
                "pagerduty event sent"
            );
            Ok(true)
        })
    }

    fn send_resolved(&self) -> bool {
        self.send_resolved
    }
}
