use std::{collections::HashMap, sync::Arc};

use serde_json::{json, Value};
use shared::{
    domain::{DeviceKey, LightStatus},
    error::ValidationError,
    protocol::FeedPaths,
};
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::{
    error::{CommandError, RemoteWriteError},
    feed::RemoteFeed,
};

/// Validates device commands and forwards them to the feed. Never touches the
/// local `AppData`; the new value comes back through the subscription.
pub struct CommandIssuer {
    feed: Arc<dyn RemoteFeed>,
    paths: FeedPaths,
    // tokio's mutex is FIFO, so writes to one key leave in call order.
    key_locks: HashMap<DeviceKey, Arc<Mutex<()>>>,
}

impl CommandIssuer {
    pub fn new(feed: Arc<dyn RemoteFeed>, paths: FeedPaths) -> Self {
        let key_locks = DeviceKey::ALL
            .into_iter()
            .map(|key| (key, Arc::new(Mutex::new(()))))
            .collect();
        Self {
            feed,
            paths,
            key_locks,
        }
    }

    pub async fn set_light_status(
        &self,
        light_id: &str,
        status: LightStatus,
    ) -> Result<(), CommandError> {
        let key = light_id.parse::<DeviceKey>()?;
        if !key.is_light() {
            return Err(ValidationError::NotALight(light_id.to_string()).into());
        }
        self.write_key(key, json!(status.as_str())).await
    }

    pub async fn set_ldr_intensity(&self, intensity: f64) -> Result<(), CommandError> {
        if !intensity.is_finite() || !(0.0..=100.0).contains(&intensity) {
            return Err(ValidationError::IntensityOutOfRange(intensity).into());
        }
        self.write_key(DeviceKey::LdrIntensity, intensity_value(intensity))
            .await
    }

    async fn write_key(&self, key: DeviceKey, value: Value) -> Result<(), CommandError> {
        let path = self.paths.device_path(key);
        let lock = self.key_locks.get(&key).cloned();
        let _guard = match &lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        match self.feed.write(&path, value.clone()).await {
            Ok(()) => {
                info!(%path, %value, "command: device write accepted");
                Ok(())
            }
            Err(source) => {
                error!(%path, error = %source, "command: device write failed");
                Err(RemoteWriteError { path, source }.into())
            }
        }
    }
}

/// Whole percentages are written as integers, matching what the controller
/// firmware writes.
fn intensity_value(intensity: f64) -> Value {
    if intensity.fract() == 0.0 {
        json!(intensity as i64)
    } else {
        json!(intensity)
    }
}

#[cfg(test)]
#[path = "tests/commands_tests.rs"]
mod tests;
