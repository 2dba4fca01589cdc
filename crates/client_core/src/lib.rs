use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::{future::join_all, StreamExt};
use serde::Serialize;
use shared::{
    domain::{Alert, AppData, HistoricalSensorData, LightStatus, PredictedIssue},
    protocol::FeedPaths,
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

pub mod alerts;
pub mod commands;
pub mod error;
pub mod feed;
pub mod memory_feed;
pub mod reconciler;
pub mod rest_feed;
pub mod summary;

pub use alerts::{derive_alerts, derive_alerts_at};
pub use commands::CommandIssuer;
pub use error::{CommandError, FeedError, RemoteWriteError, SummaryError};
pub use feed::{FeedSubscription, FeedUpdate, MissingRemoteFeed, RemoteFeed};
pub use memory_feed::MemoryFeed;
pub use reconciler::{FeedBranch, ReconcilerState, StateReconciler};
pub use rest_feed::RestFeed;
pub use summary::{
    HttpTextGenerator, MissingTextGenerator, SummaryAugmenter, TextGenerator,
    DEFAULT_SUMMARY_TIMEOUT,
};

/// What the presentation layer reads.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorState {
    pub app_data: AppData,
    #[serde(skip_serializing)]
    pub historical_data: Option<Arc<HistoricalSensorData>>,
    pub loading: bool,
    pub error: Option<FeedError>,
    pub generation: u64,
}

impl From<ReconcilerState> for MonitorState {
    fn from(state: ReconcilerState) -> Self {
        Self {
            app_data: *state.app_data,
            loading: !state.ready(),
            historical_data: state.historical_data,
            error: state.error,
            generation: state.generation,
        }
    }
}

#[derive(Debug, Clone)]
pub enum MonitorEvent {
    StateChanged { generation: u64, loading: bool },
    AlertsChanged { alerts: Vec<Alert> },
    SummaryApplied { alert_id: String },
    Error(String),
}

#[async_trait]
pub trait MonitorHandle: Send + Sync {
    fn get_state(&self) -> MonitorState;
    async fn get_alerts(&self) -> Vec<Alert>;
    async fn set_light_status(&self, light_id: &str, status: LightStatus)
        -> Result<(), CommandError>;
    async fn set_ldr_intensity(&self, intensity: f64) -> Result<(), CommandError>;
    fn subscribe_events(&self) -> broadcast::Receiver<MonitorEvent>;
}

/// Tracks which alert set summaries belong to. `generation` moves whenever
/// the set of alert ids changes, which invalidates every pending summary.
#[derive(Default)]
struct AlertBook {
    generation: u64,
    ids: Vec<String>,
    summaries: HashMap<String, String>,
    last_emitted: Vec<String>,
}

impl AlertBook {
    fn sync(&mut self, alerts: &[Alert]) {
        let ids: Vec<String> = alerts.iter().map(|alert| alert.id.clone()).collect();
        if ids != self.ids {
            self.ids = ids;
            self.generation += 1;
            self.summaries.clear();
        }
    }

    fn apply(&self, alerts: &mut [Alert]) {
        for alert in alerts {
            if let Some(summary) = self.summaries.get(&alert.id) {
                alert.message = summary.clone();
            }
        }
    }

    /// True when the rendered alert content differs from the last emission.
    fn take_change(&mut self, alerts: &[Alert]) -> bool {
        let rendered: Vec<String> = alerts
            .iter()
            .map(|alert| format!("{}|{}", alert.id, alert.message))
            .collect();
        if rendered == self.last_emitted {
            return false;
        }
        self.last_emitted = rendered;
        true
    }
}

/// Empty until both current snapshots arrived. Read only while holding the
/// alert book lock, so successive syncs see non-decreasing state.
fn current_alerts(state: &ReconcilerState) -> Vec<Alert> {
    if state.ready() {
        derive_alerts(&state.app_data)
    } else {
        Vec::new()
    }
}

pub struct HomeMonitor {
    feed: Arc<dyn RemoteFeed>,
    paths: FeedPaths,
    reconciler: StateReconciler,
    commands: CommandIssuer,
    augmenter: SummaryAugmenter,
    alert_book: Mutex<AlertBook>,
    pumps: Mutex<Vec<JoinHandle<()>>>,
    events: broadcast::Sender<MonitorEvent>,
}

impl HomeMonitor {
    pub fn new(feed: Arc<dyn RemoteFeed>, paths: FeedPaths) -> Arc<Self> {
        Self::new_with_dependencies(
            feed,
            paths,
            Arc::new(MissingTextGenerator),
            DEFAULT_SUMMARY_TIMEOUT,
        )
    }

    pub fn new_with_dependencies(
        feed: Arc<dyn RemoteFeed>,
        paths: FeedPaths,
        text_generator: Arc<dyn TextGenerator>,
        summary_timeout: Duration,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            commands: CommandIssuer::new(Arc::clone(&feed), paths.clone()),
            augmenter: SummaryAugmenter::new(text_generator, summary_timeout),
            feed,
            paths,
            reconciler: StateReconciler::new(),
            alert_book: Mutex::new(AlertBook::default()),
            pumps: Mutex::new(Vec::new()),
            events,
        })
    }

    pub fn paths(&self) -> &FeedPaths {
        &self.paths
    }

    /// Subscribes the sensors, devices and historical paths. Nothing is kept
    /// if any subscription fails.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut pumps = self.pumps.lock().await;
        if !pumps.is_empty() {
            return Err(anyhow!("home monitor is already running"));
        }

        let branches = [
            (FeedBranch::Sensors, self.paths.sensors.as_str()),
            (FeedBranch::Devices, self.paths.devices.as_str()),
            (FeedBranch::Historical, self.paths.historical.as_str()),
        ];
        let mut subscriptions = Vec::with_capacity(branches.len());
        for (branch, path) in branches {
            match self.feed.subscribe(path).await {
                Ok(subscription) => subscriptions.push((branch, subscription)),
                Err(err) => {
                    error!(path, error = %err, "monitor: subscribe failed");
                    self.reconciler.on_feed_error(branch, path, &err.to_string());
                    return Err(err).with_context(|| format!("failed to subscribe to '{path}'"));
                }
            }
        }

        for (branch, subscription) in subscriptions {
            pumps.push(self.spawn_pump(branch, subscription));
        }
        info!(
            sensors = %self.paths.sensors,
            devices = %self.paths.devices,
            historical = %self.paths.historical,
            "monitor: started"
        );
        Ok(())
    }

    /// Cancels every subscription. Safe to call more than once.
    pub async fn stop(&self) {
        let mut pumps = self.pumps.lock().await;
        if pumps.is_empty() {
            return;
        }
        for pump in pumps.drain(..) {
            pump.abort();
        }
        info!("monitor: stopped");
    }

    pub async fn is_running(&self) -> bool {
        !self.pumps.lock().await.is_empty()
    }

    fn spawn_pump(
        self: &Arc<Self>,
        branch: FeedBranch,
        mut subscription: FeedSubscription,
    ) -> JoinHandle<()> {
        let monitor = Arc::downgrade(self);
        tokio::spawn(async move {
            let path = subscription.path().to_string();
            loop {
                let Some(update) = subscription.next().await else {
                    if let Some(active) = monitor.upgrade() {
                        warn!(%path, "monitor: feed closed the subscription");
                        active
                            .reconciler
                            .on_unavailable(&format!("subscription to '{path}' closed"));
                        active.after_state_change().await;
                    }
                    break;
                };
                let Some(active) = monitor.upgrade() else {
                    break;
                };
                match update {
                    FeedUpdate::Value(value) => {
                        active.reconciler.on_snapshot(branch, &path, value.as_ref());
                        active.after_state_change().await;
                    }
                    FeedUpdate::Error(message) => {
                        active.reconciler.on_feed_error(branch, &path, &message);
                        let _ = active.events.send(MonitorEvent::Error(format!(
                            "feed read failed for '{path}': {message}"
                        )));
                    }
                }
            }
            debug!(%path, "monitor: pump finished");
        })
    }

    async fn after_state_change(&self) {
        let state = self.reconciler.current_state();
        let _ = self.events.send(MonitorEvent::StateChanged {
            generation: state.generation,
            loading: !state.ready(),
        });
        self.emit_alerts_if_changed().await;
    }

    async fn emit_alerts_if_changed(&self) {
        let mut book = self.alert_book.lock().await;
        let mut alerts = current_alerts(&self.reconciler.current_state());
        book.sync(&alerts);
        book.apply(&mut alerts);
        if book.take_change(&alerts) {
            let _ = self.events.send(MonitorEvent::AlertsChanged { alerts });
        }
    }

    pub fn get_state(&self) -> MonitorState {
        self.reconciler.current_state().into()
    }

    /// Resolves once both the sensors and devices snapshots have arrived.
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<MonitorState> {
        let mut receiver = self.reconciler.watch();
        tokio::time::timeout(timeout, receiver.wait_for(ReconcilerState::ready))
            .await
            .context("timed out waiting for the first sensors and devices snapshots")?
            .context("state channel closed")?;
        Ok(self.get_state())
    }

    /// Alerts for the current state, carrying any summary that still matches it.
    /// Empty until both the sensors and devices snapshots have arrived.
    pub async fn get_alerts(&self) -> Vec<Alert> {
        let mut book = self.alert_book.lock().await;
        let mut alerts = current_alerts(&self.reconciler.current_state());
        book.sync(&alerts);
        book.apply(&mut alerts);
        alerts
    }

    /// Starts one summary per current alert, in parallel. The handle resolves
    /// to the number of summaries that were still current when they finished.
    pub async fn augment_alerts(self: &Arc<Self>) -> JoinHandle<usize> {
        let (state, alerts, generation) = {
            let mut book = self.alert_book.lock().await;
            let state = self.reconciler.current_state();
            let alerts = current_alerts(&state);
            book.sync(&alerts);
            (state, alerts, book.generation)
        };

        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let historical = state.historical_data.as_deref();
            let summaries = join_all(alerts.iter().map(|alert| async {
                let summary = monitor.augmenter.summarize(alert, historical).await;
                (alert.id.as_str(), summary)
            }))
            .await;

            let mut applied = 0;
            for (alert_id, summary) in summaries {
                if monitor.apply_summary(generation, alert_id, summary).await {
                    applied += 1;
                }
            }
            applied
        })
    }

    async fn apply_summary(&self, generation: u64, alert_id: &str, summary: String) -> bool {
        {
            let mut book = self.alert_book.lock().await;
            book.sync(&current_alerts(&self.reconciler.current_state()));
            if book.generation != generation || !book.ids.iter().any(|id| id == alert_id) {
                debug!(
                    alert_id,
                    started_at = generation,
                    current = book.generation,
                    "monitor: discarding stale summary"
                );
                return false;
            }
            book.summaries.insert(alert_id.to_string(), summary);
        }
        let _ = self.events.send(MonitorEvent::SummaryApplied {
            alert_id: alert_id.to_string(),
        });
        self.emit_alerts_if_changed().await;
        true
    }

    pub async fn predict_issues(&self) -> Vec<PredictedIssue> {
        match self.reconciler.current_state().historical_data {
            Some(historical) => self.augmenter.predict_issues(&historical).await,
            None => Vec::new(),
        }
    }

    pub fn online_devices(&self) -> usize {
        self.reconciler.current_state().app_data.devices.online_lights()
    }

    pub async fn set_light_status(
        &self,
        light_id: &str,
        status: LightStatus,
    ) -> Result<(), CommandError> {
        self.commands.set_light_status(light_id, status).await
    }

    pub async fn set_ldr_intensity(&self, intensity: f64) -> Result<(), CommandError> {
        self.commands.set_ldr_intensity(intensity).await
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }
}

impl Drop for HomeMonitor {
    fn drop(&mut self) {
        for pump in self.pumps.get_mut().drain(..) {
            pump.abort();
        }
    }
}

#[async_trait]
impl MonitorHandle for Arc<HomeMonitor> {
    fn get_state(&self) -> MonitorState {
        HomeMonitor::get_state(self)
    }

    async fn get_alerts(&self) -> Vec<Alert> {
        HomeMonitor::get_alerts(self).await
    }

    async fn set_light_status(
        &self,
        light_id: &str,
        status: LightStatus,
    ) -> Result<(), CommandError> {
        HomeMonitor::set_light_status(self, light_id, status).await
    }

    async fn set_ldr_intensity(&self, intensity: f64) -> Result<(), CommandError> {
        HomeMonitor::set_ldr_intensity(self, intensity).await
    }

    fn subscribe_events(&self) -> broadcast::Receiver<MonitorEvent> {
        HomeMonitor::subscribe_events(self)
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
