//! End-to-end dispatch behaviour through the public API.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use claw_alertmanager::notifier::{FactoryContext, NotifyFuture};
use claw_alertmanager::{
    label_set, parse_matchers, Alert, AlertmanagerError, ConfigManager, DispatchOptions, Dispatcher, EngineSettings,
    InMemoryConfigStore, Notifier, NotifierRegistry, NotifyContext, NotifyStatus, PostableSilence, SilenceStore,
    WebhookRequest, WebhookSender,
};
use claw_alertmanager::notifier::http::SendFuture;
use claw_alertmanager::notifier::WebhookResponse;
use parking_lot::Mutex;
use serde_json::json;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct FakeSender {
    requests: Mutex<Vec<WebhookRequest>>,
}

impl WebhookSender for FakeSender {
    fn send<'a>(&'a self, request: WebhookRequest) -> SendFuture<'a> {
        Box::pin(async move {
            self.requests.lock().push(request);
            Ok(WebhookResponse {
                status: 200,
                body: String::new(),
            })
        })
    }
}

/// Tracks concurrent notifier calls per receiver and overall.
#[derive(Debug, Default)]
struct CallTracker {
    in_flight: Mutex<HashMap<String, usize>>,
    max_per_receiver: Mutex<usize>,
    total: Mutex<usize>,
    max_total: Mutex<usize>,
    calls: Mutex<usize>,
}

impl CallTracker {
    fn enter(&self, receiver: &str) {
        let mut in_flight = self.in_flight.lock();
        let n = in_flight.entry(receiver.to_string()).or_default();
        *n += 1;
        let mut max = self.max_per_receiver.lock();
        *max = (*max).max(*n);

        let mut total = self.total.lock();
        *total += 1;
        let mut max_total = self.max_total.lock();
        *max_total = (*max_total).max(*total);
        *self.calls.lock() += 1;
    }

    fn leave(&self, receiver: &str) {
        if let Some(n) = self.in_flight.lock().get_mut(receiver) {
            *n -= 1;
        }
        *self.total.lock() -= 1;
    }
}

#[derive(Debug)]
struct SlowNotifier {
    name: String,
    delay: Duration,
    tracker: Arc<CallTracker>,
}

impl Notifier for SlowNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        "slow"
    }

    fn notify<'a>(&'a self, ctx: &'a NotifyContext, _alerts: &'a [Alert]) -> NotifyFuture<'a> {
        Box::pin(async move {
            self.tracker.enter(&ctx.receiver);
            tokio::time::sleep(self.delay).await;
            self.tracker.leave(&ctx.receiver);
            Ok(true)
        })
    }

    fn send_resolved(&self) -> bool {
        true
    }
}

fn slow_registry(tracker: &Arc<CallTracker>, delay: Duration) -> NotifierRegistry {
    let tracker = Arc::clone(tracker);
    NotifierRegistry::builder()
        .with_defaults()
        .register("slow", move |cfg, _ctx: &FactoryContext| {
            Ok(Arc::new(SlowNotifier {
                name: cfg.name.clone(),
                delay,
                tracker: Arc::clone(&tracker),
            }) as Arc<dyn Notifier>)
        })
        .build()
}

fn manager(registry: Option<NotifierRegistry>) -> (Arc<ConfigManager>, Arc<FakeSender>) {
    let sender = Arc::new(FakeSender::default());
    let mut manager = ConfigManager::new(
        Arc::new(InMemoryConfigStore::new()),
        Arc::clone(&sender) as Arc<dyn WebhookSender>,
        EngineSettings::default(),
    );
    if let Some(registry) = registry {
        manager = manager.with_registry(registry);
    }
    (Arc::new(manager), sender)
}

fn slow_config() -> String {
    json!({
        "alertmanager_config": {
            "route": {
                "receiver": "ops",
                "group_by": ["alertname"],
                "routes": [{"receiver": "db", "matchers": ["team=\"db\""]}]
            },
            "receivers": [
                {"name": "ops", "grafana_managed_receiver_configs": [{"name": "ops-slow", "type": "slow"}]},
                {"name": "db", "grafana_managed_receiver_configs": [{"name": "db-slow", "type": "slow"}]}
            ]
        }
    })
    .to_string()
}

fn webhook_config(url: &str) -> String {
    json!({
        "alertmanager_config": {
            "route": {"receiver": "ops", "group_by": ["alertname"]},
            "receivers": [{
                "name": "ops",
                "grafana_managed_receiver_configs": [
                    {"name": "hook", "type": "webhook", "settings": {"url": url}}
                ]
            }]
        }
    })
    .to_string()
}

fn alert(pairs: &[(&str, &str)]) -> Alert {
    Alert::new(label_set(pairs))
}

#[tokio::test]
async fn deliveries_to_one_receiver_never_overlap() {
    let tracker = Arc::new(CallTracker::default());
    let (manager, _) = manager(Some(slow_registry(&tracker, Duration::from_millis(50))));
    manager.save_and_apply(&slow_config()).unwrap();
    let dispatcher = Dispatcher::new(manager, Arc::new(SilenceStore::new()));

    let (a, b) = tokio::join!(
        dispatcher.dispatch(vec![alert(&[("alertname", "A")])]),
        dispatcher.dispatch(vec![alert(&[("alertname", "B")])]),
    );
    assert_eq!(a.unwrap().sent(), 1);
    assert_eq!(b.unwrap().sent(), 1);

    assert_eq!(*tracker.calls.lock(), 2);
    assert_eq!(*tracker.max_per_receiver.lock(), 1);
}

#[tokio::test]
async fn different_receivers_deliver_concurrently() {
    let tracker = Arc::new(CallTracker::default());
    let (manager, _) = manager(Some(slow_registry(&tracker, Duration::from_millis(50))));
    manager.save_and_apply(&slow_config()).unwrap();
    let dispatcher = Dispatcher::new(manager, Arc::new(SilenceStore::new()));

    let report = dispatcher
        .dispatch(vec![
            alert(&[("alertname", "A")]),
            alert(&[("alertname", "B"), ("team", "db")]),
        ])
        .await
        .unwrap();

    assert_eq!(report.groups.len(), 2);
    assert_eq!(*tracker.max_total.lock(), 2);
    assert_eq!(*tracker.max_per_receiver.lock(), 1);
}

#[tokio::test]
async fn in_flight_dispatch_keeps_its_configuration() {
    let tracker = Arc::new(CallTracker::default());
    let (manager, _) = manager(Some(slow_registry(&tracker, Duration::from_millis(100))));
    manager.save_and_apply(&slow_config()).unwrap();
    let dispatcher = Dispatcher::new(Arc::clone(&manager), Arc::new(SilenceStore::new()));

    let swap = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.save_and_apply(&webhook_config("http://new")).unwrap()
    };
    let (report, swapped) = tokio::join!(dispatcher.dispatch(vec![alert(&[("alertname", "A")])]), swap);

    let report = report.unwrap();
    assert_eq!(report.config_version, 1);
    assert_eq!(report.groups[0].notifiers[0].kind, "slow");
    assert_eq!(swapped.version(), 2);

    let next = dispatcher.dispatch(vec![alert(&[("alertname", "A")])]).await.unwrap();
    assert_eq!(next.config_version, 2);
    assert_eq!(next.groups[0].notifiers[0].kind, "webhook");
}

#[tokio::test]
async fn slow_notifier_times_out() {
    let tracker = Arc::new(CallTracker::default());
    let (manager, _) = manager(Some(slow_registry(&tracker, Duration::from_secs(5))));
    manager.save_and_apply(&slow_config()).unwrap();
    let dispatcher = Dispatcher::new(manager, Arc::new(SilenceStore::new()));

    let report = dispatcher
        .dispatch_with(
            vec![alert(&[("alertname", "A")])],
            DispatchOptions::default().with_timeout(Duration::from_millis(20)),
        )
        .await
        .unwrap();

    match &report.groups[0].notifiers[0].status {
        NotifyStatus::Failed { error } => assert!(error.contains("timed out"), "{error}"),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn cancelling_aborts_in_flight_notification() {
    let tracker = Arc::new(CallTracker::default());
    let (manager, _) = manager(Some(slow_registry(&tracker, Duration::from_secs(5))));
    manager.save_and_apply(&slow_config()).unwrap();
    let dispatcher = Dispatcher::new(manager, Arc::new(SilenceStore::new()));

    let cancel = CancellationToken::new();
    let trigger = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    };
    let started = std::time::Instant::now();
    let (report, ()) = tokio::join!(
        dispatcher.dispatch_with(
            vec![alert(&[("alertname", "A")])],
            DispatchOptions::default().with_cancel(cancel.clone()),
        ),
        trigger,
    );
    let report = report.unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(report.groups[0].notifiers[0].status, NotifyStatus::Cancelled);
    assert_eq!(report.sent(), 0);
    assert_eq!(report.failed(), 1);
    // The notifier started but never reached the end of its send.
    assert_eq!(*tracker.calls.lock(), 1);
    assert_eq!(*tracker.total.lock(), 1);
}

#[tokio::test]
async fn silence_window_governs_delivery() {
    let (manager, sender) = manager(None);
    manager.save_and_apply(&webhook_config("http://ops")).unwrap();
    let dispatcher = Dispatcher::new(manager, Arc::new(SilenceStore::new()));

    let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    dispatcher
        .create_silence(PostableSilence::new(
            parse_matchers(&[r#"alertname="DiskFull""#]).unwrap(),
            t0,
            t0 + ChronoDuration::hours(1),
            "oncall",
            "disk replacement",
        ))
        .unwrap();

    let disk = alert(&[("alertname", "DiskFull"), ("instance", "node-1")]).starting_at(t0);

    let during = dispatcher
        .dispatch_with(
            vec![disk.clone()],
            DispatchOptions::default().at(t0 + ChronoDuration::minutes(30)),
        )
        .await
        .unwrap();
    assert!(during.groups.is_empty());
    assert_eq!(during.silenced, vec![disk.fingerprint()]);
    assert!(sender.requests.lock().is_empty());

    let after = dispatcher
        .dispatch_with(vec![disk], DispatchOptions::default().at(t0 + ChronoDuration::hours(2)))
        .await
        .unwrap();
    assert!(after.silenced.is_empty());
    assert_eq!(after.sent(), 1);
    assert_eq!(sender.requests.lock()[0].url, "http://ops");
}

#[tokio::test]
async fn webhook_without_url_is_rejected_and_previous_config_stays() {
    let (manager, _) = manager(None);
    manager.save_and_apply(&webhook_config("http://ops")).unwrap();

    let broken = json!({
        "alertmanager_config": {
            "route": {"receiver": "ops"},
            "receivers": [{
                "name": "ops",
                "grafana_managed_receiver_configs": [{"name": "hook", "type": "webhook", "settings": {}}]
            }]
        }
    })
    .to_string();

    match manager.save_and_apply(&broken) {
        Err(AlertmanagerError::Validation { reason }) => {
            assert!(reason.contains("could not find url property in settings"), "{reason}");
        }
        other => panic!("expected validation error, got {other:?}"),
    }
    assert_eq!(manager.current().unwrap().version(), 1);
    assert_eq!(manager.get_latest().unwrap().version, 1);
}

#[tokio::test]
async fn builtin_default_receives_everything() {
    let (manager, _) = manager(None);
    manager.load_latest_or_default().unwrap();
    let dispatcher = Dispatcher::new(manager, Arc::new(SilenceStore::new()));

    let report = dispatcher
        .dispatch(vec![alert(&[("alertname", "Anything"), ("team", "x")])])
        .await
        .unwrap();
    assert_eq!(report.groups.len(), 1);
    assert_eq!(report.groups[0].receiver, "default");
    assert_eq!(report.groups[0].notifiers[0].kind, "log");
    assert_eq!(report.sent(), 1);
}
