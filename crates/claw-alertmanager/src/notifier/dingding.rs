//! DingTalk ("DingDing") robot notifier.

use std::sync::Arc;

use serde_json::json;
use tracing::info;
use url::form_urlencoded;

use super::{FactoryContext, Notifier, NotifierConfig, NotifyContext, NotifyFuture, WebhookRequest, WebhookSender};
use crate::error::{AlertmanagerError, Result};
use crate::template::{DEFAULT_MESSAGE_TEXT, DEFAULT_TITLE_TEXT};
use crate::types::Alert;

/// Type tag.
pub const KIND: &str = "dingding";

const DEFAULT_MSG_TYPE: &str = "link";

/// Message layout sent to the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    /// A link card that opens the message URL.
    Link,
    /// An action card with a single "More" button.
    ActionCard,
}

/// Sends alert groups to a DingTalk robot webhook.
#[derive(Debug)]
pub struct DingDingNotifier {
    name: String,
    url: String,
    msg_type: MsgType,
    message: String,
    send_resolved: bool,
    sender: Arc<dyn WebhookSender>,
}

impl DingDingNotifier {
    /// Builds the notifier from its settings.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::Validation` if `url` is missing or
    /// `msgType` is unknown.
    pub fn from_config(config: &NotifierConfig, ctx: &FactoryContext) -> Result<Self> {
        let url = config
            .setting("url")
            .ok_or_else(|| AlertmanagerError::validation("could not find url property in settings"))?;

        let msg_type = match config.setting_or("msgType", DEFAULT_MSG_TYPE).as_str() {
            "link" => MsgType::Link,
            "actionCard" => MsgType::ActionCard,
            other => {
                return Err(AlertmanagerError::validation(format!(
                    "unsupported msgType {other:?}, use link or actionCard"
                )));
            }
        };

        Ok(Self {
            name: config.display_name().to_string(),
            url,
            msg_type,
            message: config.setting_or("message", DEFAULT_MESSAGE_TEXT),
            send_resolved: !config.disable_resolve_message,
            sender: Arc::clone(&ctx.sender),
        })
    }

    /// Link that makes the DingTalk client open `external_url` in a browser.
    #[must_use]
    pub fn message_url(external_url: &str) -> String {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("pc_slide", "false")
            .append_pair("url", external_url)
            .finish();
        format!("dingtalk://dingtalkclient/page/link?{query}")
    }
}

impl Notifier for DingDingNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        KIND
    }

    fn notify<'a>(&'a self, ctx: &'a NotifyContext, alerts: &'a [Alert]) -> NotifyFuture<'a> {
        Box::pin(async move {
            let message_url = Self::message_url(&ctx.external_url);

            let data = ctx.template_data(alerts);
            let mut tmpl = ctx.templates.expander(&data);
            let message = tmpl.expand(&self.message);
            let title = tmpl.expand(DEFAULT_TITLE_TEXT);
            tmpl.finish(&self.name, &[&message])?;

            let body = match self.msg_type {
                MsgType::ActionCard => json!({
                    "msgtype": "actionCard",
                    "actionCard": {
                        "text": message,
                        "title": title,
                        "singleTitle": "More",
                        "singleURL": message_url,
                    },
                }),
                MsgType::Link => json!({
                    "msgtype": "link",
                    "link": {
                        "text": message,
                        "title": title,
                        "messageUrl": message_url,
                    },
                }),
            };

            self.sender.send(WebhookRequest::json(&self.url, &body)?).await?;
            info!(notifier = %self.name, receiver = %ctx.receiver, "dingding notification sent");
            Ok(true)
        })
    }

    fn send_resolved(&self) -> bool {
        self.send_resolved
    }
}
