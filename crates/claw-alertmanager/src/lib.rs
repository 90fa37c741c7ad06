//! Alert notification routing and dispatch for Clawbernetes.
//!
//! `claw-alertmanager` takes alerts produced by rule evaluation and decides
//! who hears about them. It follows the Prometheus Alertmanager model.
//!
//! # Features
//!
//! - **Silences**: Time-bounded label matchers that mute alerts
//! - **Inhibition**: Firing source alerts suppress matching target alerts
//! - **Routing**: A tree of matchers that assigns alerts to receivers and groups
//! - **Templating**: Sandboxed Go-style templates for titles and messages
//! - **Notifiers**: Webhook, Slack, `PagerDuty`, `DingDing` and log integrations
//! - **Versioned configuration**: JSON documents validated, stored and hot-swapped
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use claw_alertmanager::{
//!     ConfigManager, Dispatcher, EngineSettings, InMemoryConfigStore, ReqwestSender, SilenceStore,
//! };
//!
//! # fn main() -> claw_alertmanager::Result<()> {
//! let sender = Arc::new(ReqwestSender::new(Duration::from_secs(10))?);
//! let manager = Arc::new(ConfigManager::new(
//!     Arc::new(InMemoryConfigStore::new()),
//!     sender,
//!     EngineSettings::default(),
//! ));
//!
//! // Nothing stored yet, so the built-in log receiver is saved and applied.
//! let active = manager.load_latest_or_default()?;
//! assert_eq!(active.receiver_names(), vec!["default"]);
//!
//! let dispatcher = Dispatcher::new(manager, Arc::new(SilenceStore::new()));
//! assert!(dispatcher.silences().is_empty());
//! # Ok(())
//! # }
//! ```
//!
//! # Silencing Alerts
//!
//! ```rust
//! use chrono::{Duration, Utc};
//! use claw_alertmanager::{label_set, parse_matchers, PostableSilence, SilenceStore};
//!
//! let store = SilenceStore::new();
//! let now = Utc::now();
//! let id = store
//!     .create(
//!         PostableSilence::new(
//!             parse_matchers(&[r#"alertname="HighCPU""#]).unwrap(),
//!             now,
//!             now + Duration::hours(4),
//!             "admin",
//!             "Maintenance window",
//!         ),
//!     )
//!     .unwrap();
//!
//! let (silenced, by) = store.is_silenced(&label_set(&[("alertname", "HighCPU")]), now);
//! assert!(silenced);
//! assert_eq!(by, vec![id]);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod dispatch;
pub mod error;
pub mod inhibit;
pub mod matcher;
pub mod notifier;
pub mod route;
pub mod settings;
pub mod silence;
pub mod store;
pub mod template;
pub mod types;

// Re-export main types at crate root
pub use config::{ActiveConfig, AlertingConfig, ConfigManager, GettableUserConfig, ReceiverConfig, UserConfig};
pub use dispatch::{
    AlertFilter, AlertGroup, DispatchOptions, DispatchReport, Dispatcher, GettableAlert, GroupReport,
    NotifierOutcome, NotifyStatus, TestReceiverReport,
};
pub use error::{AlertmanagerError, ErrorKind, Result};
pub use inhibit::{InhibitRuleConfig, Inhibitor};
pub use matcher::{parse_matchers, MatchType, Matcher};
pub use notifier::{
    Notifier, NotifierConfig, NotifierRegistry, NotifyContext, ReqwestSender, WebhookRequest, WebhookSender,
};
pub use route::{Route, RouteConfig};
pub use settings::EngineSettings;
pub use silence::{PostableSilence, Silence, SilenceState, SilenceStore};
pub use store::{ConfigStore, InMemoryConfigStore, JsonFileConfigStore};
pub use template::{TemplateData, TemplateSet};
pub use types::{label_set, Alert, AlertStatus, LabelSet};
