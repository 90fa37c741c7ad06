//! Notifier that writes notifications to the process log.
//!
//! Used by the built-in default configuration so a fresh install has
//! somewhere to deliver to.

use tracing::{info, warn};

use super::{Notifier, NotifierConfig, NotifyContext, NotifyFuture};
use crate::template::DEFAULT_TITLE_TEXT;
use crate::types::{Alert, AlertStatus};

/// Type tag.
pub const KIND: &str = "log";

/// Logs every alert of a group through `tracing`.
#[derive(Debug, Clone)]
pub struct LogNotifier {
    name: String,
    send_resolved: bool,
}

impl LogNotifier {
    /// Creates a log notifier.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            send_resolved: true,
        }
    }

    /// Builds the notifier from its configuration. It has no required settings.
    #[must_use]
    pub fn from_config(config: &NotifierConfig) -> Self {
        Self {
            name: config.display_name().to_string(),
            send_resolved: !config.disable_resolve_message,
        }
    }
}

impl Default for LogNotifier {
    fn default() -> Self {
        Self::new(KIND)
    }
}

impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        KIND
    }

    fn notify<'a>(&'a self, ctx: &'a NotifyContext, alerts: &'a [Alert]) -> NotifyFuture<'a> {
        Box::pin(async move {
            let data = ctx.template_data(alerts);
            let title = ctx.templates.render_text(DEFAULT_TITLE_TEXT, &data).text;

            info!(
                notifier = %self.name,
                receiver = %ctx.receiver,
                group = %ctx.group_key,
                alerts = alerts.len(),
                "{title}"
            );
            for alert in alerts {
                match alert.status_at(ctx.now) {
                    AlertStatus::Firing => warn!(
                        alert = %alert.name(),
                        fingerprint = %alert.fingerprint(),
                        labels = ?alert.labels,
                        "alert firing"
                    ),
                    AlertStatus::Resolved => info!(
                        alert = %alert.name(),
                        fingerprint = %alert.fingerprint(),
                        "alert resolved"
                    ),
                }
            }
            Ok(true)
        })
    }

    fn send_resolved(&self) -> bool {
        self.send_resolved
    }
}
