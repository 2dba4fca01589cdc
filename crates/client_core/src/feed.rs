use std::{
    fmt,
    pin::Pin,
    task::{Context, Poll},
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;
use tokio::sync::mpsc;

/// One delivery from a subscribed path: the whole subtree, or a read failure.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedUpdate {
    /// `None` when nothing is stored at the path.
    Value(Option<Value>),
    Error(String),
}

type CancelFn = Box<dyn FnOnce() + Send + 'static>;

/// Live subscription to one path. Dropping it unsubscribes.
pub struct FeedSubscription {
    path: String,
    updates: mpsc::UnboundedReceiver<FeedUpdate>,
    cancel: Option<CancelFn>,
}

impl FeedSubscription {
    pub fn new(
        path: impl Into<String>,
        updates: mpsc::UnboundedReceiver<FeedUpdate>,
        cancel: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            path: path.into(),
            updates,
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Waits for the next delivery. `None` once the feed side has closed.
    pub async fn next_update(&mut self) -> Option<FeedUpdate> {
        self.updates.recv().await
    }

    pub fn cancel(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
        self.updates.close();
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for FeedSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedSubscription")
            .field("path", &self.path)
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

impl Stream for FeedSubscription {
    type Item = FeedUpdate;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().updates.poll_recv(cx)
    }
}

/// Key-path addressable push store.
#[async_trait]
pub trait RemoteFeed: Send + Sync {
    async fn subscribe(&self, path: &str) -> Result<FeedSubscription>;
    async fn write(&self, path: &str, value: Value) -> Result<()>;
}

pub struct MissingRemoteFeed;

#[async_trait]
impl RemoteFeed for MissingRemoteFeed {
    async fn subscribe(&self, path: &str) -> Result<FeedSubscription> {
        Err(anyhow!("remote feed is unavailable; cannot subscribe to '{path}'"))
    }

    async fn write(&self, path: &str, _value: Value) -> Result<()> {
        Err(anyhow!("remote feed is unavailable; cannot write '{path}'"))
    }
}

/// Splits a slash separated path into its non-empty segments.
pub(crate) fn path_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|segment| !segment.is_empty()).collect()
}
