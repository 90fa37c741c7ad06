//! Notifiers: the integrations a receiver delivers through.
//!
//! A [`Notifier`] is built from a [`NotifierConfig`] by the factory registered
//! for its type tag in the [`NotifierRegistry`]. The built-in types are
//! `webhook`, `slack`, `dingding`, `pagerduty` and `log`; callers can register
//! more through [`NotifierRegistryBuilder`].

pub mod dingding;
pub mod http;
pub mod log;
pub mod pagerduty;
pub mod slack;
pub mod webhook;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AlertmanagerError, Result};
use crate::template::{TemplateData, TemplateSet};
use crate::types::{Alert, LabelSet};

pub use self::http::{HttpMethod, ReqwestSender, WebhookRequest, WebhookResponse, WebhookSender};

/// Boxed future returned by [`Notifier::notify`].
pub type NotifyFuture<'a> = Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>>;

/// A configured integration that delivers notifications for alert groups.
pub trait Notifier: Send + Sync + fmt::Debug {
    /// Returns the configured name.
    fn name(&self) -> &str;

    /// Returns the type tag (`webhook`, `slack`, ...).
    fn kind(&self) -> &str;

    /// Delivers one notification for `alerts`.
    ///
    /// Returns `Ok(true)` when the notification was sent. Notifiers do not
    /// retry.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::NotificationFailed` on transport failure and
    /// `AlertmanagerError::TemplateExecution` when nothing could be rendered.
    fn notify<'a>(&'a self, ctx: &'a NotifyContext, alerts: &'a [Alert]) -> NotifyFuture<'a>;

    /// Returns true if resolved alerts should be delivered.
    fn send_resolved(&self) -> bool;
}

/// Per-group context handed to [`Notifier::notify`].
#[derive(Debug, Clone)]
pub struct NotifyContext {
    /// Receiver the group was routed to.
    pub receiver: String,
    /// Key of the alert group.
    pub group_key: String,
    /// Labels the group was formed on.
    pub group_labels: LabelSet,
    /// Templates of the configuration the dispatch runs under.
    pub templates: Arc<TemplateSet>,
    /// Link back to the alerting UI.
    pub external_url: String,
    /// Evaluation time of the dispatch.
    pub now: DateTime<Utc>,
}

impl NotifyContext {
    /// Creates a context for one group.
    #[must_use]
    pub fn new(receiver: impl Into<String>, group_key: impl Into<String>, templates: Arc<TemplateSet>) -> Self {
        Self {
            receiver: receiver.into(),
            group_key: group_key.into(),
            group_labels: LabelSet::new(),
            templates,
            external_url: String::new(),
            now: Utc::now(),
        }
    }

    /// Sets the group labels.
    #[must_use]
    pub fn with_group_labels(mut self, labels: LabelSet) -> Self {
        self.group_labels = labels;
        self
    }

    /// Sets the external URL.
    #[must_use]
    pub fn with_external_url(mut self, url: impl Into<String>) -> Self {
        self.external_url = url.into();
        self
    }

    /// Sets the evaluation time.
    #[must_use]
    pub const fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Builds the template data for `alerts`.
    #[must_use]
    pub fn template_data(&self, alerts: &[Alert]) -> TemplateData {
        TemplateData::new(
            &self.receiver,
            &self.group_labels,
            alerts,
            &self.external_url,
            self.now,
        )
    }
}

/// Secret notifier settings. Never printed by `Debug`.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecureSettings(BTreeMap<String, String>);

impl SecureSettings {
    /// Returns the value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Sets a value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Returns the key names.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Returns true if there are no secrets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecureSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.0.keys().map(|k| (k, "<redacted>")))
            .finish()
    }
}

/// Configuration of a single notifier within a receiver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifierConfig {
    /// Stable identifier.
    #[serde(default)]
    pub uid: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Type tag selecting the factory.
    #[serde(rename = "type")]
    pub kind: String,
    /// Marks the default notifier of the configuration.
    #[serde(default)]
    pub is_default: bool,
    /// Kept for compatibility; reminders are driven by `frequency`.
    #[serde(default)]
    pub send_reminder: bool,
    /// Suppresses notifications for resolved alerts.
    #[serde(default)]
    pub disable_resolve_message: bool,
    /// Minimum interval between identical notifications, e.g. `5m`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub frequency: String,
    /// Type-specific settings.
    #[serde(default)]
    pub settings: Map<String, Value>,
    /// Type-specific secrets.
    #[serde(default, skip_serializing_if = "SecureSettings::is_empty")]
    pub secure_settings: SecureSettings,
}

impl NotifierConfig {
    /// Creates a config with the given name and type tag.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            ..Default::default()
        }
    }

    /// Adds a setting.
    #[must_use]
    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    /// Adds a secret setting.
    #[must_use]
    pub fn with_secure_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.secure_settings.insert(key, value);
        self
    }

    /// Disables resolved notifications.
    #[must_use]
    pub const fn without_resolve_message(mut self) -> Self {
        self.disable_resolve_message = true;
        self
    }

    /// Sets the throttling frequency.
    #[must_use]
    pub fn with_frequency(mut self, frequency: impl Into<String>) -> Self {
        self.frequency = frequency.into();
        self
    }

    /// Returns a non-empty string setting. Numbers and booleans are stringified.
    #[must_use]
    pub fn setting(&self, key: &str) -> Option<String> {
        let s = match self.settings.get(key)? {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => return None,
        };
        (!s.is_empty()).then_some(s)
    }

    /// Returns a string setting or `default`.
    #[must_use]
    pub fn setting_or(&self, key: &str, default: &str) -> String {
        self.setting(key).unwrap_or_else(|| default.to_string())
    }

    /// Returns a secret, falling back to the plain setting of the same key.
    #[must_use]
    pub fn secret(&self, key: &str) -> Option<String> {
        self.secure_settings
            .get(key)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .or_else(|| self.setting(key))
    }

    /// Returns a boolean setting; `"true"` strings count as true.
    #[must_use]
    pub fn setting_bool(&self, key: &str) -> bool {
        match self.settings.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    /// Returns an unsigned integer setting.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::Validation` if the value isn't a non-negative integer.
    pub fn setting_u64(&self, key: &str) -> Result<Option<u64>> {
        match self.settings.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n.as_u64().map(Some).ok_or_else(|| {
                AlertmanagerError::validation(format!("{key} must be a non-negative integer"))
            }),
            Some(Value::String(s)) if s.is_empty() => Ok(None),
            Some(Value::String(s)) => s.parse().map(Some).map_err(|_| {
                AlertmanagerError::validation(format!("{key} must be a non-negative integer"))
            }),
            Some(_) => Err(AlertmanagerError::validation(format!(
                "{key} must be a non-negative integer"
            ))),
        }
    }

    /// Returns the parsed throttling frequency.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::InvalidConfig` if `frequency` is malformed.
    pub fn frequency(&self) -> Result<Option<Duration>> {
        if self.frequency.is_empty() {
            return Ok(None);
        }
        parse_duration(&self.frequency)
            .map(Some)
            .map_err(|e| AlertmanagerError::invalid_config(format!("notifier {:?}: {e}", self.name)))
    }

    /// Returns the display name, falling back to the type tag.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.kind
        } else {
            &self.name
        }
    }
}

/// Parses durations such as `30s`, `5m`, `1h`, `1d` or `1h30m`.
///
/// # Errors
///
/// Returns `AlertmanagerError::InvalidConfig` if the text is not a valid
/// positive duration.
pub fn parse_duration(text: &str) -> Result<Duration> {
    let bad = || AlertmanagerError::invalid_config(format!("invalid duration {text:?}"));

    let mut total = 0u64;
    let mut digits = String::new();
    for c in text.trim().chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let n: u64 = digits.parse().map_err(|_| bad())?;
        digits.clear();
        let unit = match c {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            'd' => 86_400,
            _ => return Err(bad()),
        };
        total = n
            .checked_mul(unit)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(bad)?;
    }

    if !digits.is_empty() || total == 0 {
        return Err(bad());
    }
    Ok(Duration::from_secs(total))
}

/// Shared dependencies handed to notifier factories.
#[derive(Clone)]
pub struct FactoryContext {
    /// Outbound HTTP capability.
    pub sender: Arc<dyn WebhookSender>,
    /// Templates of the configuration being built.
    pub templates: Arc<TemplateSet>,
}

impl fmt::Debug for FactoryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryContext")
            .field("sender", &self.sender)
            .field("templates", &self.templates.names().len())
            .finish()
    }
}

/// Builds a notifier from its configuration.
pub type NotifierFactory =
    Arc<dyn Fn(&NotifierConfig, &FactoryContext) -> Result<Arc<dyn Notifier>> + Send + Sync>;

static DEFAULT_REGISTRY: Lazy<NotifierRegistry> =
    Lazy::new(|| NotifierRegistryBuilder::new().with_defaults().build());

/// Immutable table from type tag to notifier factory.
#[derive(Clone)]
pub struct NotifierRegistry {
    factories: Arc<HashMap<String, NotifierFactory>>,
}

impl Default for NotifierRegistry {
    fn default() -> Self {
        DEFAULT_REGISTRY.clone()
    }
}

impl fmt::Debug for NotifierRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifierRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl NotifierRegistry {
    /// Returns the registry with the built-in notifier types.
    #[must_use]
    pub fn with_defaults() -> Self {
        DEFAULT_REGISTRY.clone()
    }

    /// Starts building a custom registry.
    #[must_use]
    pub fn builder() -> NotifierRegistryBuilder {
        NotifierRegistryBuilder::new()
    }

    /// Returns the registered type tags, sorted.
    #[must_use]
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.factories.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Returns true if `kind` is registered.
    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Builds a notifier.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::Validation` for unknown types or invalid settings.
    pub fn build(&self, config: &NotifierConfig, ctx: &FactoryContext) -> Result<Arc<dyn Notifier>> {
        let factory = self.factories.get(&config.kind).ok_or_else(|| {
            AlertmanagerError::validation(format!("unsupported notifier type {:?}", config.kind))
        })?;
        factory(config, ctx)
    }
}

/// Builder for [`NotifierRegistry`].
#[derive(Default)]
pub struct NotifierRegistryBuilder {
    factories: HashMap<String, NotifierFactory>,
}

impl NotifierRegistryBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the built-in notifier types.
    #[must_use]
    pub fn with_defaults(self) -> Self {
        self.register(webhook::KIND, |cfg, ctx| {
            Ok(Arc::new(webhook::WebhookNotifier::from_config(cfg, ctx)?) as Arc<dyn Notifier>)
        })
        .register(slack::KIND, |cfg, ctx| {
            Ok(Arc::new(slack::SlackNotifier::from_config(cfg, ctx)?) as Arc<dyn Notifier>)
        })
        .register(dingding::KIND, |cfg, ctx| {
            Ok(Arc::new(dingding::DingDingNotifier::from_config(cfg, ctx)?) as Arc<dyn Notifier>)
        })
        .register(pagerduty::KIND, |cfg, ctx| {
            Ok(Arc::new(pagerduty::PagerDutyNotifier::from_config(cfg, ctx)?) as Arc<dyn Notifier>)
        })
        .register(log::KIND, |cfg, _ctx| {
            Ok(Arc::new(log::LogNotifier::from_config(cfg)) as Arc<dyn Notifier>)
        })
    }

    /// Registers (or replaces) the factory for `kind`.
    #[must_use]
    pub fn register<F>(mut self, kind: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&NotifierConfig, &FactoryContext) -> Result<Arc<dyn Notifier>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
        self
    }

    /// Freezes the registry.
    #[must_use]
    pub fn build(self) -> NotifierRegistry {
        NotifierRegistry {
            factories: Arc::new(self.factories),
        }
    }
}
