//! Alerting configuration: schema, validation and the active snapshot.
//!
//! A configuration is loaded from JSON into an [`ActiveConfig`] (compiled
//! routes, built notifiers, parsed templates) and swapped in atomically.
//! Dispatches hold an `Arc` to the snapshot they started with, so applying a
//! new configuration never affects work already in flight.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::{AlertmanagerError, Result};
use crate::inhibit::{InhibitRule, InhibitRuleConfig, Inhibitor};
use crate::notifier::{FactoryContext, Notifier, NotifierConfig, NotifierRegistry, WebhookSender};
use crate::route::{Route, RouteConfig};
use crate::settings::EngineSettings;
use crate::store::{ConfigStore, StoredConfiguration};
use crate::template::TemplateSet;

// ============ Schema ============

/// A named receiver and its notifiers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReceiverConfig {
    /// Unique receiver name.
    pub name: String,
    /// Notifiers the receiver delivers through.
    #[serde(default, rename = "grafana_managed_receiver_configs", alias = "notifiers")]
    pub notifiers: Vec<NotifierConfig>,
}

impl ReceiverConfig {
    /// Creates a receiver.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            notifiers: Vec::new(),
        }
    }

    /// Adds a notifier.
    #[must_use]
    pub fn with_notifier(mut self, notifier: NotifierConfig) -> Self {
        self.notifiers.push(notifier);
        self
    }
}

/// Routing, receivers and inhibition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertingConfig {
    /// Root of the routing tree.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<RouteConfig>,
    /// Receivers.
    #[serde(default)]
    pub receivers: Vec<ReceiverConfig>,
    /// Inhibit rules.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inhibit_rules: Vec<InhibitRuleConfig>,
}

/// The user-facing alerting configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserConfig {
    /// Template file name to template source.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub template_files: BTreeMap<String, String>,
    /// The Alertmanager configuration.
    pub alertmanager_config: AlertingConfig,
}

impl UserConfig {
    /// Parses a configuration document.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::InvalidConfig` if the JSON doesn't match the schema.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| AlertmanagerError::invalid_config(format!("failed to parse configuration: {e}")))
    }

    /// Serializes the document.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::SerializationError` on failure.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// The built-in configuration: everything goes to one `log` receiver.
    #[must_use]
    pub fn builtin_default(receiver_name: &str) -> Self {
        let mut notifier = NotifierConfig::new("log", crate::notifier::log::KIND);
        notifier.is_default = true;

        Self {
            template_files: BTreeMap::new(),
            alertmanager_config: AlertingConfig {
                route: Some(RouteConfig::to(receiver_name).grouped_by(["alertname"])),
                receivers: vec![ReceiverConfig::new(receiver_name).with_notifier(notifier)],
                inhibit_rules: Vec::new(),
            },
        }
    }
}

/// Read-back view of a notifier with secrets replaced by `secureFields`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GettableNotifier {
    /// Stable identifier.
    pub uid: String,
    /// Display name.
    pub name: String,
    /// Type tag.
    #[serde(rename = "type")]
    pub kind: String,
    /// Default notifier flag.
    pub is_default: bool,
    /// Reminder flag.
    pub send_reminder: bool,
    /// Resolved notifications disabled.
    pub disable_resolve_message: bool,
    /// Throttling frequency.
    pub frequency: String,
    /// Plain settings.
    pub settings: Map<String, Value>,
    /// Names of the secret settings that are set.
    pub secure_fields: BTreeMap<String, bool>,
}

/// Read-back view of a receiver.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GettableReceiver {
    /// Receiver name.
    pub name: String,
    /// Redacted notifiers.
    pub grafana_managed_receiver_configs: Vec<GettableNotifier>,
}

/// Read-back view of the Alertmanager configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GettableAlertingConfig {
    /// Root route.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<RouteConfig>,
    /// Inhibit rules.
    pub inhibit_rules: Vec<InhibitRuleConfig>,
    /// Redacted receivers.
    pub receivers: Vec<GettableReceiver>,
}

/// Read-back view of the whole document. Never contains secret values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GettableUserConfig {
    /// Template files.
    pub template_files: BTreeMap<String, String>,
    /// The redacted Alertmanager configuration.
    pub alertmanager_config: GettableAlertingConfig,
}

impl From<&UserConfig> for GettableUserConfig {
    fn from(config: &UserConfig) -> Self {
        let am = &config.alertmanager_config;
        Self {
            template_files: config.template_files.clone(),
            alertmanager_config: GettableAlertingConfig {
                route: am.route.clone(),
                inhibit_rules: am.inhibit_rules.clone(),
                receivers: am
                    .receivers
                    .iter()
                    .map(|r| GettableReceiver {
                        name: r.name.clone(),
                        grafana_managed_receiver_configs: r
                            .notifiers
                            .iter()
                            .map(|n| GettableNotifier {
                                uid: n.uid.clone(),
                                name: n.name.clone(),
                                kind: n.kind.clone(),
                                is_default: n.is_default,
                                send_reminder: n.send_reminder,
                                disable_resolve_message: n.disable_resolve_message,
                                frequency: n.frequency.clone(),
                                settings: n.settings.clone(),
                                secure_fields: n
                                    .secure_settings
                                    .keys()
                                    .map(|k| (k.to_string(), true))
                                    .collect(),
                            })
                            .collect(),
                    })
                    .collect(),
            },
        }
    }
}

// ============ Compiled configuration ============

/// A built notifier with its throttling window.
#[derive(Debug, Clone)]
pub struct ReceiverNotifier {
    /// The notifier.
    pub notifier: Arc<dyn Notifier>,
    /// Minimum interval between identical notifications.
    pub frequency: Option<Duration>,
}

/// A receiver with its notifiers built.
#[derive(Debug, Clone)]
pub struct Receiver {
    name: String,
    notifiers: Vec<ReceiverNotifier>,
}

impl Receiver {
    /// Returns the receiver name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the built notifiers.
    #[must_use]
    pub fn notifiers(&self) -> &[ReceiverNotifier] {
        &self.notifiers
    }
}

/// A validated configuration ready for dispatch. Immutable once built.
#[derive(Debug)]
pub struct ActiveConfig {
    version: u64,
    config: UserConfig,
    route: Route,
    receivers: BTreeMap<String, Arc<Receiver>>,
    inhibitor: Inhibitor,
    templates: Arc<TemplateSet>,
}

impl ActiveConfig {
    /// Store version this configuration was loaded from; 0 if never saved.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Returns the source document.
    #[must_use]
    pub const fn config(&self) -> &UserConfig {
        &self.config
    }

    /// Returns the routing tree.
    #[must_use]
    pub const fn route(&self) -> &Route {
        &self.route
    }

    /// Returns the inhibitor.
    #[must_use]
    pub const fn inhibitor(&self) -> &Inhibitor {
        &self.inhibitor
    }

    /// Returns the template set.
    #[must_use]
    pub fn templates(&self) -> Arc<TemplateSet> {
        Arc::clone(&self.templates)
    }

    /// Returns the receiver named `name`.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::ReceiverNotFound` if there is no such receiver.
    pub fn receiver(&self, name: &str) -> Result<Arc<Receiver>> {
        self.receivers
            .get(name)
            .cloned()
            .ok_or_else(|| AlertmanagerError::ReceiverNotFound {
                name: name.to_string(),
            })
    }

    /// Returns the receiver names, sorted.
    #[must_use]
    pub fn receiver_names(&self) -> Vec<&str> {
        self.receivers.keys().map(String::as_str).collect()
    }
}

// ============ Manager ============

/// Loads, validates, persists and swaps alerting configurations.
pub struct ConfigManager {
    registry: NotifierRegistry,
    sender: Arc<dyn WebhookSender>,
    store: Arc<dyn ConfigStore>,
    active: RwLock<Option<Arc<ActiveConfig>>>,
    // Held across store writes and the swap so the active version always
    // matches the latest stored one.
    writer: Mutex<()>,
    settings: EngineSettings,
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigManager")
            .field("registry", &self.registry)
            .field("version", &self.active.read().as_ref().map(|c| c.version))
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ConfigManager {
    /// Creates a manager with the built-in notifier types and no active configuration.
    #[must_use]
    pub fn new(store: Arc<dyn ConfigStore>, sender: Arc<dyn WebhookSender>, settings: EngineSettings) -> Self {
        Self {
            registry: NotifierRegistry::with_defaults(),
            sender,
            store,
            active: RwLock::new(None),
            writer: Mutex::new(()),
            settings,
        }
    }

    /// Replaces the notifier registry.
    #[must_use]
    pub fn with_registry(mut self, registry: NotifierRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Returns the engine settings.
    #[must_use]
    pub const fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Parses and validates a raw configuration without applying it.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::InvalidConfig` for schema violations and
    /// `AlertmanagerError::Validation` when a notifier rejects its settings.
    pub fn load(&self, raw: &str) -> Result<ActiveConfig> {
        self.load_config(UserConfig::from_json(raw)?)
    }

    /// Validates a parsed configuration without applying it.
    ///
    /// # Errors
    ///
    /// See [`ConfigManager::load`].
    pub fn load_config(&self, config: UserConfig) -> Result<ActiveConfig> {
        let am = &config.alertmanager_config;

        if am.receivers.is_empty() {
            return Err(AlertmanagerError::invalid_config("no receivers defined"));
        }

        let templates = Arc::new(
            TemplateSet::from_files(&config.template_files)
                .map_err(|e| AlertmanagerError::invalid_config(e.to_string()))?
                .with_max_output_bytes(self.settings.max_template_output_bytes),
        );

        let mut names = HashSet::new();
        let mut default_receiver: Option<&str> = None;
        for receiver in &am.receivers {
            if receiver.name.is_empty() {
                return Err(AlertmanagerError::invalid_config("receiver name cannot be empty"));
            }
            if !names.insert(receiver.name.as_str()) {
                return Err(AlertmanagerError::invalid_config(format!(
                    "duplicate receiver name {:?}",
                    receiver.name
                )));
            }
            if receiver.notifiers.iter().any(|n| n.is_default) {
                if default_receiver.is_some() {
                    return Err(AlertmanagerError::invalid_config(
                        "only one notifier can be the default",
                    ));
                }
                if receiver.notifiers.iter().filter(|n| n.is_default).count() > 1 {
                    return Err(AlertmanagerError::invalid_config(
                        "only one notifier can be the default",
                    ));
                }
                default_receiver = Some(&receiver.name);
            }
        }

        let route_config = am
            .route
            .as_ref()
            .ok_or_else(|| AlertmanagerError::invalid_config("missing root route"))?;
        let route = Route::compile_root(route_config, default_receiver)?;
        for name in route.receivers() {
            if !names.contains(name) {
                return Err(AlertmanagerError::invalid_config(format!(
                    "route references unknown receiver {name:?}"
                )));
            }
        }

        let rules = am
            .inhibit_rules
            .iter()
            .map(|r| {
                InhibitRule::from_config(r)
                    .map_err(|e| AlertmanagerError::invalid_config(format!("inhibit rule: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let receivers = am
            .receivers
            .iter()
            .map(|r| Ok((r.name.clone(), Arc::new(self.build_receiver(r, Arc::clone(&templates))?))))
            .collect::<Result<BTreeMap<_, _>>>()?;

        Ok(ActiveConfig {
            version: 0,
            route,
            receivers,
            inhibitor: Inhibitor::new(rules),
            templates,
            config,
        })
    }

    /// Builds the notifiers of a single receiver against `templates`.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::InvalidConfig` for a receiver without
    /// notifiers, a bad `frequency` or a broken template setting, and
    /// `AlertmanagerError::Validation` when a notifier rejects its settings.
    pub fn build_receiver(&self, config: &ReceiverConfig, templates: Arc<TemplateSet>) -> Result<Receiver> {
        if config.notifiers.is_empty() {
            return Err(AlertmanagerError::invalid_config(format!(
                "receiver {:?} has no notifiers",
                config.name
            )));
        }

        let ctx = FactoryContext {
            sender: Arc::clone(&self.sender),
            templates: Arc::clone(&templates),
        };

        let notifiers = config
            .notifiers
            .iter()
            .map(|n| {
                for (key, value) in &n.settings {
                    if let Value::String(text) = value {
                        if text.contains("{{") {
                            templates.check(text).map_err(|e| {
                                AlertmanagerError::invalid_config(format!(
                                    "receiver {:?} setting {key}: {e}",
                                    config.name
                                ))
                            })?;
                        }
                    }
                }
                Ok(ReceiverNotifier {
                    frequency: n.frequency()?,
                    notifier: self.registry.build(n, &ctx)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Receiver {
            name: config.name.clone(),
            notifiers,
        })
    }

    /// Makes `config` the active configuration and returns the snapshot.
    pub fn apply(&self, config: ActiveConfig) -> Arc<ActiveConfig> {
        let config = Arc::new(config);
        *self.active.write() = Some(Arc::clone(&config));
        info!(
            version = config.version,
            receivers = config.receivers.len(),
            inhibit_rules = config.inhibitor.rule_count(),
            "applied alerting configuration"
        );
        config
    }

    /// Returns the active configuration.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::NoConfiguration` if none was applied yet.
    pub fn current(&self) -> Result<Arc<ActiveConfig>> {
        self.active
            .read()
            .clone()
            .ok_or(AlertmanagerError::NoConfiguration)
    }

    /// Returns the latest stored configuration blob.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::NoConfiguration` if nothing was saved, or
    /// `AlertmanagerError::Storage` if the store fails.
    pub fn get_latest(&self) -> Result<StoredConfiguration> {
        self.store.get_latest()
    }

    /// Validates, persists and applies `raw`. On any failure the previous
    /// configuration stays active.
    ///
    /// # Errors
    ///
    /// Returns the load or store error.
    pub fn save_and_apply(&self, raw: &str) -> Result<Arc<ActiveConfig>> {
        let mut config = self.load(raw)?;
        let _writer = self.writer.lock();
        config.version = self.store.save(raw)?;
        Ok(self.apply(config))
    }

    /// Applies the latest stored configuration, saving and applying the
    /// built-in default when nothing was stored yet.
    ///
    /// # Errors
    ///
    /// Returns load or store errors.
    pub fn load_latest_or_default(&self) -> Result<Arc<ActiveConfig>> {
        let _writer = self.writer.lock();
        match self.store.get_latest() {
            Ok(stored) => {
                let mut config = self.load(&stored.raw)?;
                config.version = stored.version;
                Ok(self.apply(config))
            }
            Err(AlertmanagerError::NoConfiguration) => {
                warn!("no alerting configuration stored, using built-in default");
                let raw = UserConfig::builtin_default(&self.settings.default_receiver_name).to_json()?;
                let mut config = self.load(&raw)?;
                config.version = self.store.save(&raw)?;
                Ok(self.apply(config))
            }
            Err(e) => Err(e),
        }
    }

    /// Returns the latest stored configuration with secrets redacted.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::NoConfiguration` if nothing was saved, or
    /// `AlertmanagerError::InvalidConfig` if the stored document is unreadable.
    pub fn gettable(&self) -> Result<GettableUserConfig> {
        let stored = self.store.get_latest()?;
        let config = UserConfig::from_json(&stored.raw)?;
        Ok(GettableUserConfig::from(&config))
    }
}
