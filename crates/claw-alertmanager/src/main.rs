//! claw-alertmanager - alert routing and notification tool
//!
//! Validates alerting configurations, previews rendered notifications and
//! dispatches alert batches from the command line.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use claw_alertmanager::template::{DEFAULT_MESSAGE, DEFAULT_TITLE};
use claw_alertmanager::{
    Alert, ConfigManager, DispatchOptions, Dispatcher, EngineSettings, InMemoryConfigStore, JsonFileConfigStore,
    LabelSet, ReqwestSender, SilenceStore, TemplateData,
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "claw-alertmanager")]
#[command(about = "Clawbernetes alert routing and notification")]
#[command(version)]
struct Cli {
    /// Engine settings file (TOML)
    #[arg(long, global = true, env = "CLAW_ALERTMANAGER_SETTINGS")]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate an alerting configuration and print its routing tree
    CheckConfig {
        /// Configuration document (JSON)
        file: PathBuf,
    },

    /// Render notifications for a batch of alerts without sending them
    Render {
        /// Configuration document (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Alerts (JSON array)
        #[arg(short, long)]
        alerts: PathBuf,

        /// Render this named template instead of the default title and message
        #[arg(short, long)]
        template: Option<String>,
    },

    /// Route and deliver a batch of alerts
    Dispatch {
        /// Configuration document (JSON); the stored one when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Alerts (JSON array)
        #[arg(short, long)]
        alerts: PathBuf,

        /// Where the configuration is persisted
        #[arg(long, default_value = "/var/lib/claw-alertmanager/config.json")]
        store: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("claw_alertmanager=info".parse()?))
        .init();

    let cli = Cli::parse();
    let settings = match &cli.settings {
        Some(path) => EngineSettings::from_file(path)?,
        None => EngineSettings::default(),
    };

    match cli.command {
        Commands::CheckConfig { file } => check_config(&file, settings),
        Commands::Render {
            config,
            alerts,
            template,
        } => render(&config, &alerts, template.as_deref(), settings),
        Commands::Dispatch {
            config,
            alerts,
            store,
        } => dispatch(config.as_deref(), &alerts, store, settings).await,
    }
}

fn manager(settings: EngineSettings) -> anyhow::Result<ConfigManager> {
    let sender = Arc::new(ReqwestSender::new(settings.notify_timeout())?);
    Ok(ConfigManager::new(
        Arc::new(InMemoryConfigStore::new()),
        sender,
        settings,
    ))
}

fn read(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn read_alerts(path: &Path) -> anyhow::Result<Vec<Alert>> {
    serde_json::from_str(&read(path)?).with_context(|| format!("invalid alerts in {}", path.display()))
}

fn check_config(file: &Path, settings: EngineSettings) -> anyhow::Result<()> {
    let config = manager(settings)?.load(&read(file)?)?;

    println!("Configuration OK");
    println!();
    println!("Receivers:");
    for name in config.receiver_names() {
        let receiver = config.receiver(name)?;
        let kinds: Vec<&str> = receiver.notifiers().iter().map(|n| n.notifier.kind()).collect();
        println!("  {name}: {}", kinds.join(", "));
    }
    println!();
    println!("Routes:");
    for line in config.route().describe() {
        println!("  {line}");
    }
    println!();
    println!("Inhibit rules: {}", config.inhibitor().rule_count());
    Ok(())
}

fn render(config: &Path, alerts: &Path, template: Option<&str>, settings: EngineSettings) -> anyhow::Result<()> {
    let external_url = settings.external_url.clone();
    let config = manager(settings)?.load(&read(config)?)?;
    let alerts = read_alerts(alerts)?;
    let now = Utc::now();

    let mut groups: BTreeMap<String, (String, LabelSet, Vec<Alert>)> = BTreeMap::new();
    for alert in alerts {
        for route in config.route().route(&alert.labels) {
            let group_labels = route.group_labels(&alert.labels);
            let key = route.group_key(&group_labels);
            groups
                .entry(key)
                .or_insert_with(|| (route.receiver().to_string(), group_labels, Vec::new()))
                .2
                .push(alert.clone());
        }
    }

    let templates = config.templates();
    for (key, (receiver, group_labels, alerts)) in groups {
        let data = TemplateData::new(&receiver, &group_labels, &alerts, &external_url, now);
        println!("=== {key}");
        match template {
            Some(name) => println!("{}", templates.render(name, &data).into_result()?),
            None => {
                println!("{}", templates.render(DEFAULT_TITLE, &data).into_result()?);
                println!();
                println!("{}", templates.render(DEFAULT_MESSAGE, &data).into_result()?);
            }
        }
    }
    Ok(())
}

async fn dispatch(
    config: Option<&Path>,
    alerts: &Path,
    store: PathBuf,
    settings: EngineSettings,
) -> anyhow::Result<()> {
    let sender = Arc::new(ReqwestSender::new(settings.notify_timeout())?);
    let manager = Arc::new(ConfigManager::new(
        Arc::new(JsonFileConfigStore::new(store)),
        sender,
        settings,
    ));

    match config {
        Some(path) => {
            let active = manager.save_and_apply(&read(path)?)?;
            info!(version = active.version(), "configuration saved");
        }
        None => {
            manager.load_latest_or_default()?;
        }
    }

    let dispatcher = Dispatcher::new(manager, Arc::new(SilenceStore::new()));
    let alerts = read_alerts(alerts)?;

    let cancel = tokio_util::sync::CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let report = dispatcher
        .dispatch_with(alerts, DispatchOptions::default().with_cancel(cancel))
        .await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.failed() > 0 {
        anyhow::bail!("{} notification(s) failed", report.failed());
    }
    Ok(())
}
