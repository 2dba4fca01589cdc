use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    HomeMonitor, HttpTextGenerator, MissingTextGenerator, MonitorEvent, RestFeed, TextGenerator,
};
use serde_json::json;
use shared::{
    domain::{Alert, LightStatus},
    protocol::PathLayout,
};
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, Settings};

#[derive(Parser, Debug)]
#[command(name = "home-monitor", about = "Live sensor state, alerts and device control")]
struct Cli {
    /// Settings file (defaults to ./home-monitor.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Overrides the configured path layout.
    #[arg(long, global = true)]
    layout: Option<PathLayout>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print state and alerts as they change until Ctrl-C.
    Watch {
        /// Ask the summary endpoint for alert text.
        #[arg(long)]
        augment: bool,
    },
    SetLight {
        light: String,
        status: LightStatus,
    },
    SetIntensity {
        intensity: f64,
    },
    /// Print the current state and alerts once as JSON.
    Snapshot {
        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = load_settings(cli.config.as_deref())?;
    if let Some(layout) = cli.layout {
        settings.layout = layout;
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_filter))
        .context("invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let monitor = build_monitor(&settings)?;
    match cli.command {
        Command::Watch { augment } => watch(&monitor, augment).await?,
        Command::SetLight { light, status } => {
            monitor.set_light_status(&light, status).await?;
            println!("{light} -> {status}");
        }
        Command::SetIntensity { intensity } => {
            monitor.set_ldr_intensity(intensity).await?;
            println!("ldrIntensity -> {intensity}");
        }
        Command::Snapshot { timeout_secs } => {
            monitor.start().await?;
            let state = monitor
                .wait_until_ready(Duration::from_secs(timeout_secs))
                .await?;
            let alerts = monitor.get_alerts().await;
            monitor.stop().await;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({ "state": state, "alerts": alerts }))?
            );
        }
    }

    Ok(())
}

fn build_monitor(settings: &Settings) -> Result<Arc<HomeMonitor>> {
    let feed = RestFeed::new(&settings.database_url)?
        .with_auth_token(settings.auth_token.clone())
        .with_poll_interval(settings.poll_interval());
    let generator: Arc<dyn TextGenerator> = match &settings.summary_endpoint {
        Some(endpoint) => Arc::new(HttpTextGenerator::new(endpoint)?),
        None => Arc::new(MissingTextGenerator),
    };
    Ok(HomeMonitor::new_with_dependencies(
        Arc::new(feed),
        settings.feed_paths(),
        generator,
        settings.summary_timeout(),
    ))
}

async fn watch(monitor: &Arc<HomeMonitor>, augment: bool) -> Result<()> {
    let mut events = BroadcastStream::new(monitor.subscribe_events());
    monitor.start().await?;
    info!(paths = ?monitor.paths(), "watching; press Ctrl-C to stop");

    let mut augmented_ids: Vec<String> = Vec::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.next() => {
                let Some(event) = event else { break };
                match event {
                    Ok(MonitorEvent::StateChanged { loading: false, .. }) => {
                        let state = monitor.get_state();
                        let sensors = state.app_data.sensors;
                        println!(
                            "temp {:.1}C  humidity {:.0}%  soil {:.0}%  water {:.0}%  \
                             lights online {}/3{}",
                            sensors.temperature,
                            sensors.humidity,
                            sensors.soil_moisture,
                            sensors.water_level,
                            monitor.online_devices(),
                            if state.error.is_some() { "  (stale)" } else { "" },
                        );
                    }
                    Ok(MonitorEvent::StateChanged { loading: true, .. }) => {}
                    Ok(MonitorEvent::AlertsChanged { alerts }) => {
                        print_alerts(&alerts);
                        let ids: Vec<String> =
                            alerts.iter().map(|alert| alert.id.clone()).collect();
                        if augment && !alerts.is_empty() && ids != augmented_ids {
                            augmented_ids = ids;
                            drop(monitor.augment_alerts().await);
                        }
                    }
                    Ok(MonitorEvent::SummaryApplied { alert_id }) => {
                        info!(%alert_id, "summary applied");
                    }
                    Ok(MonitorEvent::Error(message)) => eprintln!("feed error: {message}"),
                    Err(err) => warn!(error = %err, "event stream lagged"),
                }
            }
        }
    }

    monitor.stop().await;
    Ok(())
}

fn print_alerts(alerts: &[Alert]) {
    if alerts.is_empty() {
        println!("no active alerts");
        return;
    }
    for alert in alerts {
        println!("[{}] {}: {}", alert.severity, alert.title, alert.message);
    }
}
