//! Merges independently delivered subtree snapshots into one `AppData`.

use std::sync::Arc;

use serde_json::Value;
use shared::{
    domain::{AppData, DeviceControls, HistoricalSensorData},
    protocol::{historical_from_value, DevicesSnapshot, SensorsSnapshot},
};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::FeedError;

/// Which subtree a snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedBranch {
    Sensors,
    Devices,
    Historical,
}

#[derive(Debug, Clone, Default)]
pub struct ReconcilerState {
    pub app_data: Arc<AppData>,
    pub historical_data: Option<Arc<HistoricalSensorData>>,
    /// Bumped every time `app_data` is replaced.
    pub generation: u64,
    pub error: Option<FeedError>,
    sensors_received: bool,
    devices_received: bool,
}

impl ReconcilerState {
    /// True once both a sensors and a devices snapshot have arrived.
    pub fn ready(&self) -> bool {
        self.sensors_received && self.devices_received
    }
}

/// Single writer of the application state. Every merge replaces the whole
/// `AppData` under the watch channel's lock; readers only see complete values.
pub struct StateReconciler {
    state: watch::Sender<ReconcilerState>,
}

impl Default for StateReconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl StateReconciler {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ReconcilerState::default());
        Self { state }
    }

    pub fn current_state(&self) -> ReconcilerState {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ReconcilerState> {
        self.state.subscribe()
    }

    /// `None` or a non-object snapshot keeps every previous sensor value.
    pub fn on_sensors_snapshot(&self, path: &str, snapshot: Option<&Value>) {
        let partial = snapshot.map(SensorsSnapshot::from_value).unwrap_or_default();
        if !partial.rejected.is_empty() {
            warn!(path, rejected = ?partial.rejected, "reconciler: ignoring invalid sensor fields");
        }
        self.state.send_modify(|state| {
            let sensors = partial.merge_into(&state.app_data.sensors);
            state.app_data = Arc::new(AppData {
                sensors,
                devices: state.app_data.devices,
                reported: state.app_data.reported.union(partial.reported()),
            });
            state.sensors_received = true;
            clear_error_for(state, path);
            state.generation += 1;
            debug!(generation = state.generation, "reconciler: merged sensors snapshot");
        });
    }

    /// Keys missing from the first devices snapshot take the static defaults;
    /// afterwards they keep their previous value.
    pub fn on_devices_snapshot(&self, path: &str, snapshot: Option<&Value>) {
        let partial = snapshot.map(DevicesSnapshot::from_value).unwrap_or_default();
        if !partial.rejected.is_empty() {
            warn!(path, rejected = ?partial.rejected, "reconciler: ignoring invalid device fields");
        }
        self.state.send_modify(|state| {
            let base = if state.devices_received {
                state.app_data.devices
            } else {
                DeviceControls::default()
            };
            state.app_data = Arc::new(AppData {
                sensors: state.app_data.sensors,
                devices: partial.merge_into(&base),
                reported: state.app_data.reported,
            });
            state.devices_received = true;
            clear_error_for(state, path);
            state.generation += 1;
            debug!(generation = state.generation, "reconciler: merged devices snapshot");
        });
    }

    /// Replaces the historical cache wholesale. An empty delivery keeps the
    /// previous cache.
    pub fn on_historical_snapshot(&self, snapshot: Option<&Value>) {
        let Some(data) = snapshot.and_then(historical_from_value) else {
            debug!("reconciler: historical snapshot carried no series");
            return;
        };
        self.state.send_modify(|state| {
            state.historical_data = Some(Arc::new(data));
        });
    }

    pub fn on_snapshot(&self, branch: FeedBranch, path: &str, snapshot: Option<&Value>) {
        match branch {
            FeedBranch::Sensors => self.on_sensors_snapshot(path, snapshot),
            FeedBranch::Devices => self.on_devices_snapshot(path, snapshot),
            FeedBranch::Historical => self.on_historical_snapshot(snapshot),
        }
    }

    /// Records a read failure. The last known `AppData` stays available.
    pub fn on_feed_error(&self, branch: FeedBranch, path: &str, message: &str) {
        warn!(path, error = message, "reconciler: feed read error");
        if branch == FeedBranch::Historical {
            return;
        }
        let error = FeedError::Subscription {
            path: path.to_string(),
            message: message.to_string(),
        };
        self.state.send_modify(|state| {
            state.error = Some(error);
        });
    }

    pub fn on_unavailable(&self, message: &str) {
        let error = FeedError::Unavailable(message.to_string());
        self.state.send_modify(|state| {
            state.error = Some(error);
        });
    }
}

fn clear_error_for(state: &mut ReconcilerState, path: &str) {
    if state
        .error
        .as_ref()
        .and_then(FeedError::path)
        .is_some_and(|failed| failed == path)
    {
        state.error = None;
    }
}

#[cfg(test)]
#[path = "tests/reconciler_tests.rs"]
mod tests;
