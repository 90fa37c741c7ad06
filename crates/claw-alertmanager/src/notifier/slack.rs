//! Slack incoming-webhook notifier.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use super::{FactoryContext, Notifier, NotifierConfig, NotifyContext, NotifyFuture, WebhookRequest, WebhookSender};
use crate::error::{AlertmanagerError, Result};
use crate::template::{DEFAULT_MESSAGE_TEXT, DEFAULT_TITLE_TEXT};
use crate::types::Alert;

/// Type tag.
pub const KIND: &str = "slack";

const FIRING_COLOR: &str = "#D63232";
const RESOLVED_COLOR: &str = "#36a64f";

#[derive(Debug, Serialize)]
struct SlackMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon_emoji: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Serialize)]
struct SlackAttachment {
    color: &'static str,
    title: String,
    title_link: String,
    text: String,
    fallback: String,
    footer: &'static str,
    ts: i64,
}

/// Posts alert groups to a Slack channel.
#[derive(Debug)]
pub struct SlackNotifier {
    name: String,
    url: String,
    recipient: Option<String>,
    username: Option<String>,
    icon_emoji: Option<String>,
    icon_url: Option<String>,
    mention_channel: Option<String>,
    title: String,
    text: String,
    send_resolved: bool,
    sender: Arc<dyn WebhookSender>,
}

impl SlackNotifier {
    /// Builds the notifier from its settings.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::Validation` if `url` is missing or
    /// `mentionChannel` isn't `here` or `channel`.
    pub fn from_config(config: &NotifierConfig, ctx: &FactoryContext) -> Result<Self> {
        let url = config
            .secret("url")
            .ok_or_else(|| AlertmanagerError::validation("could not find url property in settings"))?;

        let mention_channel = config.setting("mentionChannel");
        if let Some(mention) = &mention_channel {
            if mention != "here" && mention != "channel" {
                return Err(AlertmanagerError::validation(format!(
                    "invalid mentionChannel {mention:?}, use here or channel"
                )));
            }
        }

        Ok(Self {
            name: config.display_name().to_string(),
            url,
            recipient: config.setting("recipient"),
            username: config.setting("username"),
            icon_emoji: config.setting("icon_emoji"),
            icon_url: config.setting("icon_url"),
            mention_channel,
            title: config.setting_or("title", DEFAULT_TITLE_TEXT),
            text: config.setting_or("text", DEFAULT_MESSAGE_TEXT),
            send_resolved: !config.disable_resolve_message,
            sender: Arc::clone(&ctx.sender),
        })
    }
}

impl Notifier for SlackNotifier {
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
            let title = tmpl.expand(&self.title);
            let text = tmpl.expand(&self.text);
            tmpl.finish(&self.name, &[&title, &text])?;

            let color = if data.status == "firing" {
                FIRING_COLOR
            } else {
                RESOLVED_COLOR
            };

            let message = SlackMessage {
                channel: self.recipient.clone(),
                username: self.username.clone(),
                icon_emoji: self.icon_emoji.clone(),
                icon_url: self.icon_url.clone(),
                text: self.mention_channel.as_ref().map(|m| format!("<!{m}|{m}>")),
                attachments: vec![SlackAttachment {
                    color,
                    fallback: title.clone(),
                    title,
                    title_link: ctx.external_url.clone(),
                    text,
                    footer: "claw-alertmanager",
                    ts: ctx.now.timestamp(),
                }],
            };

            self.sender.send(WebhookRequest::json(&self.url, &message)?).await?;
            info!(notifier = %self.name, receiver = %ctx.receiver, "slack notification sent");
            Ok(true)
        })
    }

    fn send_resolved(&self) -> bool {
        self.send_resolved
    }
}
