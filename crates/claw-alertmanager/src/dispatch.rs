//! Dispatch: silencing, inhibition, routing, grouping and delivery.
//!
//! A dispatch cycle snapshots the active configuration, marks silenced and
//! inhibited alerts, routes the rest to receivers, and delivers each alert
//! group through the receiver's notifiers. Groups run concurrently; delivery
//! to a single receiver is serialized by a per-receiver async mutex.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ActiveConfig, ConfigManager, ReceiverConfig, ReceiverNotifier};
use crate::error::{AlertmanagerError, Result};
use crate::matcher::{matches_all, parse_matchers};
use crate::notifier::NotifyContext;
use crate::silence::{PostableSilence, Silence, SilenceStore};
use crate::types::{label_set, Alert, LabelSet};

/// Per-call options of a dispatch.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Evaluation time for alert status and silences.
    pub now: DateTime<Utc>,
    /// Timeout per notifier call; the engine setting when unset.
    pub timeout: Option<Duration>,
    /// Cancels in-flight notifier calls.
    pub cancel: CancellationToken,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            now: Utc::now(),
            timeout: None,
            cancel: CancellationToken::new(),
        }
    }
}

impl DispatchOptions {
    /// Evaluates at `now` instead of the current time.
    #[must_use]
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Sets the per-notifier timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// What happened to one notifier of a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum NotifyStatus {
    /// Delivered.
    Sent,
    /// Not attempted.
    Skipped {
        /// Why it was skipped.
        reason: String,
    },
    /// Attempted and failed.
    Failed {
        /// The error.
        error: String,
    },
    /// The dispatch was cancelled before the notifier finished.
    Cancelled,
}

/// Outcome of one notifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotifierOutcome {
    /// Notifier name.
    pub name: String,
    /// Notifier type tag.
    pub kind: String,
    /// What happened.
    #[serde(flatten)]
    pub status: NotifyStatus,
}

/// Outcome of one alert group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupReport {
    /// Receiver name.
    pub receiver: String,
    /// Group key.
    pub group_key: String,
    /// Grouping labels.
    pub group_labels: LabelSet,
    /// Fingerprints of the alerts in the group.
    pub alerts: Vec<String>,
    /// Per-notifier outcomes.
    pub notifiers: Vec<NotifierOutcome>,
}

/// Result of a dispatch cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Version of the configuration the cycle ran under.
    pub config_version: u64,
    /// Delivered groups, ordered by group key.
    pub groups: Vec<GroupReport>,
    /// Fingerprints of silenced alerts.
    pub silenced: Vec<String>,
    /// Fingerprints of inhibited alerts.
    pub inhibited: Vec<String>,
}

impl DispatchReport {
    /// Returns the group with `receiver`, if any.
    #[must_use]
    pub fn group_for(&self, receiver: &str) -> Option<&GroupReport> {
        self.groups.iter().find(|g| g.receiver == receiver)
    }

    /// Number of notifiers that delivered.
    #[must_use]
    pub fn sent(&self) -> usize {
        self.count(|s| matches!(s, NotifyStatus::Sent))
    }

    /// Number of notifiers that failed or were cancelled.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, NotifyStatus::Failed { .. } | NotifyStatus::Cancelled))
    }

    fn count(&self, pred: impl Fn(&NotifyStatus) -> bool) -> usize {
        self.groups
            .iter()
            .flat_map(|g| &g.notifiers)
            .filter(|n| pred(&n.status))
            .count()
    }
}

/// Outcome of a receiver test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestReceiverReport {
    /// Receiver name.
    pub receiver: String,
    /// Per-notifier outcomes.
    pub notifiers: Vec<NotifierOutcome>,
}

// ============ Alert listing ============

/// Suppression state of a listed alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertState {
    /// `active` or `suppressed`.
    pub state: String,
    /// Silences muting the alert.
    pub silenced_by: Vec<String>,
    /// Fingerprints of the alerts inhibiting it.
    pub inhibited_by: Vec<String>,
}

/// An alert as listed to API callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GettableAlert {
    /// The alert.
    #[serde(flatten)]
    pub alert: Alert,
    /// Label-set fingerprint.
    pub fingerprint: String,
    /// Receivers the alert routes to.
    pub receivers: Vec<String>,
    /// Suppression state.
    pub status: AlertState,
    /// When the alert was last dispatched.
    pub updated_at: DateTime<Utc>,
}

/// Alerts sharing a receiver and grouping labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertGroup {
    /// Grouping labels.
    pub labels: LabelSet,
    /// Receiver name.
    pub receiver: String,
    /// The alerts.
    pub alerts: Vec<GettableAlert>,
}

/// Filters for [`Dispatcher::get_alerts`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertFilter {
    /// Include alerts that are neither silenced nor inhibited.
    pub active: bool,
    /// Include silenced alerts.
    pub silenced: bool,
    /// Include inhibited alerts.
    pub inhibited: bool,
    /// Label matchers in filter syntax.
    pub matchers: Vec<String>,
    /// Regex the receiver name must fully match.
    pub receiver: Option<String>,
}

impl Default for AlertFilter {
    fn default() -> Self {
        Self {
            active: true,
            silenced: true,
            inhibited: true,
            matchers: Vec::new(),
            receiver: None,
        }
    }
}

#[derive(Debug, Clone)]
struct AlertEntry {
    alert: Alert,
    routes: Vec<(String, LabelSet)>,
    silenced_by: Vec<String>,
    inhibited_by: Vec<String>,
    updated_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl AlertEntry {
    fn to_gettable(&self) -> GettableAlert {
        let suppressed = !self.silenced_by.is_empty() || !self.inhibited_by.is_empty();
        let mut receivers: Vec<String> = self.routes.iter().map(|(r, _)| r.clone()).collect();
        receivers.dedup();
        GettableAlert {
            fingerprint: self.alert.fingerprint(),
            alert: self.alert.clone(),
            receivers,
            status: AlertState {
                state: if suppressed { "suppressed" } else { "active" }.to_string(),
                silenced_by: self.silenced_by.clone(),
                inhibited_by: self.inhibited_by.clone(),
            },
            updated_at: self.updated_at,
        }
    }
}

struct PendingGroup {
    receiver: String,
    group_key: String,
    group_labels: LabelSet,
    alerts: Vec<Alert>,
}

#[derive(Clone, Copy)]
struct CallOptions<'a> {
    now: DateTime<Utc>,
    timeout: Duration,
    cancel: &'a CancellationToken,
    throttle: bool,
}

// ============ Dispatcher ============

/// Runs dispatch cycles against the active configuration.
pub struct Dispatcher {
    config: Arc<ConfigManager>,
    silences: Arc<SilenceStore>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    alerts: RwLock<HashMap<String, AlertEntry>>,
    notification_log: Mutex<HashMap<(String, String, String), LogEntry>>,
}

/// Last successful send of a throttled notifier.
#[derive(Debug, Clone, Copy)]
struct LogEntry {
    digest: blake3::Hash,
    sent_at: DateTime<Utc>,
    frequency: Duration,
}

impl LogEntry {
    fn expires_at(&self) -> DateTime<Utc> {
        ChronoDuration::from_std(self.frequency)
            .ok()
            .and_then(|f| self.sent_at.checked_add_signed(f))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("silences", &self.silences.len())
            .field("alerts", &self.alerts.read().len())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(config: Arc<ConfigManager>, silences: Arc<SilenceStore>) -> Self {
        Self {
            config,
            silences,
            locks: Mutex::new(HashMap::new()),
            alerts: RwLock::new(HashMap::new()),
            notification_log: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the configuration manager.
    #[must_use]
    pub fn config(&self) -> &Arc<ConfigManager> {
        &self.config
    }

    /// Returns the silence store.
    #[must_use]
    pub fn silences(&self) -> &Arc<SilenceStore> {
        &self.silences
    }

    /// Dispatches a batch of alerts at the current time.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::NoConfiguration` if no configuration is
    /// active. Delivery failures are reported per notifier, not as errors.
    pub async fn dispatch(&self, alerts: Vec<Alert>) -> Result<DispatchReport> {
        self.dispatch_with(alerts, DispatchOptions::default()).await
    }

    /// Dispatches a batch of alerts with explicit options.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::NoConfiguration` if no configuration is active.
    pub async fn dispatch_with(&self, alerts: Vec<Alert>, options: DispatchOptions) -> Result<DispatchReport> {
        let config = self.config.current()?;
        let now = options.now;

        let mut unique: BTreeMap<String, Alert> = BTreeMap::new();
        for alert in alerts {
            unique.insert(alert.fingerprint(), alert);
        }

        self.prune(now);

        // Alerts still firing from earlier batches inhibit this one too.
        let carried: Vec<Alert> = self
            .alerts
            .read()
            .iter()
            .filter(|(fp, e)| !unique.contains_key(*fp) && !e.alert.is_resolved_at(now))
            .map(|(_, e)| e.alert.clone())
            .collect();
        let firing: Vec<&Alert> = unique
            .values()
            .filter(|a| !a.is_resolved_at(now))
            .chain(&carried)
            .collect();
        let resolve_timeout = self.config.settings().resolve_timeout();

        let mut report = DispatchReport {
            config_version: config.version(),
            ..Default::default()
        };
        let mut entries = Vec::with_capacity(unique.len());
        let mut groups: BTreeMap<String, PendingGroup> = BTreeMap::new();

        for (fingerprint, alert) in &unique {
            let (_, silenced_by) = self.silences.is_silenced(&alert.labels, now);
            let inhibited_by = config.inhibitor().inhibited_by(alert, &firing);

            let placements: Vec<(String, LabelSet, String)> = config
                .route()
                .route(&alert.labels)
                .into_iter()
                .map(|r| {
                    let group_labels = r.group_labels(&alert.labels);
                    let group_key = r.group_key(&group_labels);
                    (r.receiver().to_string(), group_labels, group_key)
                })
                .collect();

            if !silenced_by.is_empty() {
                debug!(fingerprint = %fingerprint, silences = ?silenced_by, "alert silenced");
                report.silenced.push(fingerprint.clone());
            }
            if !inhibited_by.is_empty() {
                debug!(fingerprint = %fingerprint, sources = ?inhibited_by, "alert inhibited");
                report.inhibited.push(fingerprint.clone());
            }

            if silenced_by.is_empty() && inhibited_by.is_empty() {
                for (receiver, group_labels, group_key) in &placements {
                    let group = groups.entry(group_key.clone()).or_insert_with(|| PendingGroup {
                        receiver: receiver.clone(),
                        group_key: group_key.clone(),
                        group_labels: group_labels.clone(),
                        alerts: Vec::new(),
                    });
                    if !group.alerts.iter().any(|a| a.labels == alert.labels) {
                        group.alerts.push(alert.clone());
                    }
                }
            }

            entries.push(AlertEntry {
                alert: alert.clone(),
                routes: placements.into_iter().map(|(r, labels, _)| (r, labels)).collect(),
                silenced_by,
                inhibited_by,
                updated_at: now,
                expires_at: alert
                    .ends_at
                    .or_else(|| now.checked_add_signed(resolve_timeout))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
            });
        }

        self.record(entries, now);

        let call = CallOptions {
            now,
            timeout: options
                .timeout
                .unwrap_or_else(|| self.config.settings().notify_timeout()),
            cancel: &options.cancel,
            throttle: true,
        };

        for group in groups.values() {
            debug!(
                receiver = %group.receiver,
                group = %group.group_key,
                alerts = group.alerts.len(),
                "routed alert group"
            );
        }

        report.groups = join_all(
            groups
                .into_values()
                .map(|group| self.deliver(&config, group, call)),
        )
        .await;

        info!(
            version = report.config_version,
            alerts = unique.len(),
            groups = report.groups.len(),
            silenced = report.silenced.len(),
            inhibited = report.inhibited.len(),
            failed = report.failed(),
            "dispatch cycle complete"
        );
        Ok(report)
    }

    fn record(&self, entries: Vec<AlertEntry>, now: DateTime<Utc>) {
        let mut alerts = self.alerts.write();
        for entry in entries {
            let fingerprint = entry.alert.fingerprint();
            if entry.alert.is_resolved_at(now) {
                alerts.remove(&fingerprint);
            } else {
                alerts.insert(fingerprint, entry);
            }
        }
    }

    /// Drops listed alerts whose resolve timeout or end time has passed and
    /// notification log entries whose frequency window closed. Returns the
    /// number of listed alerts removed.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let removed = {
            let mut alerts = self.alerts.write();
            let before = alerts.len();
            alerts.retain(|_, e| e.expires_at > now);
            before - alerts.len()
        };
        self.notification_log.lock().retain(|_, e| e.expires_at() > now);
        if removed > 0 {
            debug!(removed, "pruned stale alerts");
        }
        removed
    }

    fn receiver_lock(&self, receiver: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(receiver.to_string()).or_default())
    }

    async fn deliver(&self, config: &ActiveConfig, group: PendingGroup, call: CallOptions<'_>) -> GroupReport {
        let mut report = GroupReport {
            receiver: group.receiver.clone(),
            group_key: group.group_key.clone(),
            group_labels: group.group_labels.clone(),
            alerts: group.alerts.iter().map(Alert::fingerprint).collect(),
            notifiers: Vec::new(),
        };

        let receiver = match config.receiver(&group.receiver) {
            Ok(r) => r,
            Err(e) => {
                warn!(receiver = %group.receiver, error = %e, "dropping alert group");
                return report;
            }
        };

        let lock = self.receiver_lock(&group.receiver);
        let _guard = tokio::select! {
            guard = lock.lock() => guard,
            () = call.cancel.cancelled() => {
                report.notifiers = receiver
                    .notifiers()
                    .iter()
                    .map(|rn| NotifierOutcome {
                        name: rn.notifier.name().to_string(),
                        kind: rn.notifier.kind().to_string(),
                        status: NotifyStatus::Cancelled,
                    })
                    .collect();
                return report;
            }
        };

        let ctx = NotifyContext::new(&group.receiver, &group.group_key, config.templates())
            .with_group_labels(group.group_labels.clone())
            .with_external_url(&self.config.settings().external_url)
            .at(call.now);

        for rn in receiver.notifiers() {
            let status = self.notify_one(rn, &ctx, &group.alerts, call).await;
            report.notifiers.push(NotifierOutcome {
                name: rn.notifier.name().to_string(),
                kind: rn.notifier.kind().to_string(),
                status,
            });
        }
        report
    }

    async fn notify_one(
        &self,
        rn: &ReceiverNotifier,
        ctx: &NotifyContext,
        alerts: &[Alert],
        call: CallOptions<'_>,
    ) -> NotifyStatus {
        let notifier = &rn.notifier;

        let alerts: Vec<Alert> = if notifier.send_resolved() {
            alerts.to_vec()
        } else {
            alerts
                .iter()
                .filter(|a| !a.is_resolved_at(call.now))
                .cloned()
                .collect()
        };
        if alerts.is_empty() {
            return NotifyStatus::Skipped {
                reason: "resolved notifications disabled".to_string(),
            };
        }

        let log_key = (
            ctx.receiver.clone(),
            ctx.group_key.clone(),
            notifier.name().to_string(),
        );
        let digest = alert_set_digest(&alerts, call.now);
        if let (true, Some(frequency)) = (call.throttle, rn.frequency) {
            if let Some(last) = self.notification_log.lock().get(&log_key) {
                let elapsed = (call.now - last.sent_at).to_std().unwrap_or_default();
                if last.digest == digest && elapsed < frequency {
                    debug!(notifier = %notifier.name(), "identical notification within frequency, skipping");
                    return NotifyStatus::Skipped {
                        reason: "throttled".to_string(),
                    };
                }
            }
        }

        if call.cancel.is_cancelled() {
            return NotifyStatus::Cancelled;
        }

        let result = tokio::select! {
            biased;
            () = call.cancel.cancelled() => Err(AlertmanagerError::Cancelled),
            r = tokio::time::timeout(call.timeout, notifier.notify(ctx, &alerts)) => {
                r.unwrap_or(Err(AlertmanagerError::Timeout { after: call.timeout }))
            }
        };

        match result {
            Ok(true) => {
                if let (true, Some(frequency)) = (call.throttle, rn.frequency) {
                    self.notification_log.lock().insert(
                        log_key,
                        LogEntry {
                            digest,
                            sent_at: call.now,
                            frequency,
                        },
                    );
                }
                NotifyStatus::Sent
            }
            Ok(false) => NotifyStatus::Skipped {
                reason: "notifier declined".to_string(),
            },
            Err(AlertmanagerError::Cancelled) => {
                warn!(notifier = %notifier.name(), receiver = %ctx.receiver, "notification cancelled");
                NotifyStatus::Cancelled
            }
            Err(e) => {
                warn!(
                    notifier = %notifier.name(),
                    receiver = %ctx.receiver,
                    error = %e,
                    "notification failed"
                );
                NotifyStatus::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Sends a synthetic `TestAlert` through an unsaved receiver definition.
    ///
    /// Templates come from the active configuration if there is one.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::InvalidConfig` or
    /// `AlertmanagerError::Validation` if the receiver can't be built.
    pub async fn test_receiver(&self, receiver: &ReceiverConfig, options: DispatchOptions) -> Result<TestReceiverReport> {
        let templates = match self.config.current() {
            Ok(active) => active.templates(),
            Err(_) => Arc::new(
                crate::template::TemplateSet::defaults()
                    .with_max_output_bytes(self.config.settings().max_template_output_bytes),
            ),
        };
        let built = self.config.build_receiver(receiver, Arc::clone(&templates))?;

        let alert = Alert::new(label_set(&[("alertname", "TestAlert"), ("instance", "Grafana")]))
            .with_annotation("summary", "Notification test")
            .starting_at(options.now);
        let alerts = vec![alert];

        let group_labels = label_set(&[("alertname", "TestAlert")]);
        let group_key = format!("{}:{{alertname=\"TestAlert\"}}", receiver.name);
        let ctx = NotifyContext::new(&receiver.name, group_key, templates)
            .with_group_labels(group_labels)
            .with_external_url(&self.config.settings().external_url)
            .at(options.now);

        let call = CallOptions {
            now: options.now,
            timeout: options
                .timeout
                .unwrap_or_else(|| self.config.settings().notify_timeout()),
            cancel: &options.cancel,
            throttle: false,
        };

        let mut notifiers = Vec::new();
        for rn in built.notifiers() {
            let status = self.notify_one(rn, &ctx, &alerts, call).await;
            notifiers.push(NotifierOutcome {
                name: rn.notifier.name().to_string(),
                kind: rn.notifier.kind().to_string(),
                status,
            });
        }

        info!(receiver = %receiver.name, "tested receiver");
        Ok(TestReceiverReport {
            receiver: receiver.name.clone(),
            notifiers,
        })
    }

    // ============ Listing ============

    /// Lists alerts from the most recent dispatches.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::InvalidPayload` for malformed matchers or
    /// receiver regex.
    pub fn get_alerts(&self, filter: &AlertFilter) -> Result<Vec<GettableAlert>> {
        let matchers = parse_matchers(&filter.matchers)?;
        let receiver_re = compile_receiver_filter(filter.receiver.as_deref())?;

        let alerts = self.alerts.read();
        let mut out: Vec<GettableAlert> = alerts
            .values()
            .filter(|e| state_selected(filter, e))
            .filter(|e| matches_all(&matchers, &e.alert.labels))
            .filter(|e| {
                receiver_re
                    .as_ref()
                    .is_none_or(|re| e.routes.iter().any(|(r, _)| re.is_match(r)))
            })
            .map(AlertEntry::to_gettable)
            .collect();
        out.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        Ok(out)
    }

    /// Lists alerts grouped by receiver and grouping labels.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::InvalidPayload` for malformed filters.
    pub fn get_alert_groups(&self, filter: &AlertFilter) -> Result<Vec<AlertGroup>> {
        let matchers = parse_matchers(&filter.matchers)?;
        let receiver_re = compile_receiver_filter(filter.receiver.as_deref())?;

        let alerts = self.alerts.read();
        let mut groups: BTreeMap<(String, Vec<(String, String)>), AlertGroup> = BTreeMap::new();

        for entry in alerts.values() {
            if !state_selected(filter, entry) || !matches_all(&matchers, &entry.alert.labels) {
                continue;
            }
            for (receiver, labels) in &entry.routes {
                if receiver_re.as_ref().is_some_and(|re| !re.is_match(receiver)) {
                    continue;
                }
                let key = (
                    receiver.clone(),
                    labels.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                );
                groups
                    .entry(key)
                    .or_insert_with(|| AlertGroup {
                        labels: labels.clone(),
                        receiver: receiver.clone(),
                        alerts: Vec::new(),
                    })
                    .alerts
                    .push(entry.to_gettable());
            }
        }

        Ok(groups
            .into_values()
            .map(|mut g| {
                g.alerts.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
                g
            })
            .collect())
    }

    // ============ Silences ============

    /// Creates a silence.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::InvalidPayload` for invalid silences.
    pub fn create_silence(&self, silence: PostableSilence) -> Result<String> {
        self.silences.create(silence)
    }

    /// Returns a silence.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::SilenceNotFound` for unknown ids.
    pub fn get_silence(&self, id: &str) -> Result<Silence> {
        self.silences.get(id)
    }

    /// Expires a silence.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::SilenceNotFound` for unknown ids.
    pub fn delete_silence(&self, id: &str) -> Result<()> {
        self.silences.delete(id)
    }

    /// Lists silences matching the filter strings.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::InvalidPayload` for malformed filters.
    pub fn list_silences<S: AsRef<str>>(&self, filters: &[S]) -> Result<Vec<Silence>> {
        self.silences.list_filtered(filters)
    }

    /// Removes silences expired longer than the retention window.
    pub fn gc_silences(&self, now: DateTime<Utc>) -> usize {
        self.silences
            .gc(now, self.config.settings().silence_retention())
    }
}

fn state_selected(filter: &AlertFilter, entry: &AlertEntry) -> bool {
    let silenced = !entry.silenced_by.is_empty();
    let inhibited = !entry.inhibited_by.is_empty();
    if !silenced && !inhibited {
        return filter.active;
    }
    (!silenced || filter.silenced) && (!inhibited || filter.inhibited)
}

fn compile_receiver_filter(pattern: Option<&str>) -> Result<Option<Regex>> {
    pattern
        .map(|p| {
            Regex::new(&format!("^(?:{p})$")).map_err(|e| {
                AlertmanagerError::invalid_payload(format!("invalid receiver regex: {e}"))
            })
        })
        .transpose()
}

fn alert_set_digest(alerts: &[Alert], now: DateTime<Utc>) -> blake3::Hash {
    let mut keys: Vec<(String, &'static str)> = alerts
        .iter()
        .map(|a| (a.fingerprint(), a.status_at(now).as_str()))
        .collect();
    keys.sort_unstable();
    let mut hasher = blake3::Hasher::new();
    for (fingerprint, status) in &keys {
        hasher.update(fingerprint.as_bytes());
        hasher.update(status.as_bytes());
        hasher.update(b"\n");
    }
    hasher.finalize()
}
