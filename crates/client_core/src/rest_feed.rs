//! Feed over a JSON REST datastore (`GET`/`PUT {base}/{path}.json`).

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokio::{sync::mpsc, time::MissedTickBehavior};
use tracing::{debug, warn};
use url::Url;

use crate::feed::{path_segments, FeedSubscription, FeedUpdate, RemoteFeed};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

#[derive(Clone)]
pub struct RestFeed {
    http: Client,
    base_url: Url,
    auth_token: Option<String>,
    poll_interval: Duration,
}

impl RestFeed {
    pub fn new(base_url: &str) -> Result<Self> {
        let mut base_url =
            Url::parse(base_url).with_context(|| format!("invalid datastore url: {base_url}"))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(anyhow!("datastore url must start with http:// or https://"));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            http: Client::new(),
            base_url,
            auth_token: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token.filter(|token| !token.is_empty());
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(50));
        self
    }

    pub fn path_url(&self, path: &str) -> Result<Url> {
        let segments = path_segments(path);
        if segments.is_empty() {
            return Err(anyhow!("feed path must not be empty"));
        }
        let mut url = self
            .base_url
            .join(&format!("{}.json", segments.join("/")))
            .with_context(|| format!("invalid feed path: {path}"))?;
        if let Some(token) = &self.auth_token {
            url.query_pairs_mut().append_pair("auth", token);
        }
        Ok(url)
    }

    async fn fetch(&self, url: &Url) -> Result<Option<Value>> {
        let value: Value = self
            .http
            .get(url.clone())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok((!value.is_null()).then_some(value))
    }
}

#[async_trait]
impl RemoteFeed for RestFeed {
    async fn subscribe(&self, path: &str) -> Result<FeedSubscription> {
        let url = self.path_url(path)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let feed = self.clone();
        let log_path = path.to_string();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(feed.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last_value: Option<Option<Value>> = None;
            let mut failing = false;
            loop {
                ticker.tick().await;
                let update = match feed.fetch(&url).await {
                    Ok(value) => {
                        // A recovered poll re-delivers so readers can clear the error.
                        let recovered = std::mem::replace(&mut failing, false);
                        if !recovered && last_value.as_ref() == Some(&value) {
                            continue;
                        }
                        last_value = Some(value.clone());
                        FeedUpdate::Value(value)
                    }
                    Err(err) => {
                        // Report once per failure streak.
                        if failing {
                            continue;
                        }
                        failing = true;
                        warn!(path = %log_path, error = %err, "rest feed: poll failed");
                        FeedUpdate::Error(err.to_string())
                    }
                };
                if tx.send(update).is_err() {
                    debug!(path = %log_path, "rest feed: subscriber gone, stopping poll");
                    break;
                }
            }
        });

        Ok(FeedSubscription::new(path, rx, move || task.abort()))
    }

    async fn write(&self, path: &str, value: Value) -> Result<()> {
        let url = self.path_url(path)?;
        self.http
            .put(url)
            .json(&value)
            .send()
            .await
            .with_context(|| format!("failed to reach datastore for '{path}'"))?
            .error_for_status()
            .with_context(|| format!("datastore rejected write to '{path}'"))?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/rest_feed_tests.rs"]
mod tests;
