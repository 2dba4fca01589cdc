//! In-process feed backed by a single JSON tree.
//!
//! Behaves like the hosted datastore from a subscriber's point of view: every
//! write delivers the full subtree to each subscription whose path overlaps the
//! written path, and a new subscription immediately receives the current value.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::debug;

use crate::feed::{path_segments, FeedSubscription, FeedUpdate, RemoteFeed};

#[derive(Clone, Default)]
pub struct MemoryFeed {
    inner: Arc<Mutex<MemoryFeedState>>,
}

#[derive(Default)]
struct MemoryFeedState {
    root: Value,
    next_subscriber_id: u64,
    subscribers: HashMap<u64, Subscriber>,
    fail_writes_with: Option<String>,
    writes: Vec<(String, Value)>,
}

struct Subscriber {
    path: Vec<String>,
    tx: mpsc::UnboundedSender<FeedUpdate>,
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: Value) -> Self {
        let feed = Self::default();
        feed.lock().root = root;
        feed
    }

    /// Stores `value` and notifies overlapping subscribers, bypassing write
    /// failure injection. `Value::Null` removes the node.
    pub fn set(&self, path: &str, value: Value) {
        let mut state = self.lock();
        state.store(path, value);
    }

    /// Delivers a read failure to every subscriber of exactly `path`.
    pub fn push_error(&self, path: &str, message: impl Into<String>) {
        let message = message.into();
        let target = owned_segments(path);
        let state = self.lock();
        for subscriber in state.subscribers.values() {
            if subscriber.path == target {
                let _ = subscriber.tx.send(FeedUpdate::Error(message.clone()));
            }
        }
    }

    pub fn fail_writes(&self, reason: Option<&str>) {
        self.lock().fail_writes_with = reason.map(str::to_string);
    }

    pub fn value_at(&self, path: &str) -> Option<Value> {
        let state = self.lock();
        lookup(&state.root, &owned_segments(path)).cloned()
    }

    /// Successful writes made through [`RemoteFeed::write`], in order.
    pub fn writes(&self) -> Vec<(String, Value)> {
        self.lock().writes.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryFeedState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MemoryFeedState {
    fn store(&mut self, path: &str, value: Value) {
        let segments = owned_segments(path);
        if value.is_null() {
            remove(&mut self.root, &segments);
        } else {
            insert(&mut self.root, &segments, value);
        }
        self.notify(&segments);
    }

    fn notify(&mut self, written: &[String]) {
        let root = &self.root;
        self.subscribers.retain(|id, subscriber| {
            if !overlaps(&subscriber.path, written) {
                return true;
            }
            let snapshot = lookup(root, &subscriber.path).cloned();
            let delivered = subscriber.tx.send(FeedUpdate::Value(snapshot)).is_ok();
            if !delivered {
                debug!(subscriber_id = *id, "memory feed: dropping closed subscriber");
            }
            delivered
        });
    }
}

#[async_trait]
impl RemoteFeed for MemoryFeed {
    async fn subscribe(&self, path: &str) -> Result<FeedSubscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let segments = owned_segments(path);
        let id = {
            let mut state = self.lock();
            let id = state.next_subscriber_id;
            state.next_subscriber_id += 1;
            let initial = lookup(&state.root, &segments).cloned();
            let _ = tx.send(FeedUpdate::Value(initial));
            state.subscribers.insert(id, Subscriber { path: segments, tx });
            id
        };

        let inner = Arc::downgrade(&self.inner);
        Ok(FeedSubscription::new(path, rx, move || {
            if let Some(inner) = inner.upgrade() {
                let mut state = inner.lock().unwrap_or_else(PoisonError::into_inner);
                state.subscribers.remove(&id);
            }
        }))
    }

    async fn write(&self, path: &str, value: Value) -> Result<()> {
        let mut state = self.lock();
        if let Some(reason) = &state.fail_writes_with {
            return Err(anyhow!("write to '{path}' rejected: {reason}"));
        }
        state.writes.push((path.to_string(), value.clone()));
        state.store(path, value);
        Ok(())
    }
}

fn owned_segments(path: &str) -> Vec<String> {
    path_segments(path).into_iter().map(str::to_string).collect()
}

fn overlaps(subscribed: &[String], written: &[String]) -> bool {
    subscribed
        .iter()
        .zip(written.iter())
        .all(|(left, right)| left == right)
}

fn lookup<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    let mut node = root;
    for segment in segments {
        node = node.as_object()?.get(segment)?;
    }
    if node.is_null() {
        None
    } else {
        Some(node)
    }
}

fn insert(root: &mut Value, segments: &[String], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        *root = value;
        return;
    };
    let mut node = root;
    for segment in parents {
        node = object_mut(node)
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    object_mut(node).insert(last.clone(), value);
}

fn remove(root: &mut Value, segments: &[String]) {
    let Some((last, parents)) = segments.split_last() else {
        *root = Value::Null;
        return;
    };
    let mut node = root;
    for segment in parents {
        match node.as_object_mut().and_then(|map| map.get_mut(segment)) {
            Some(child) => node = child,
            None => return,
        }
    }
    if let Some(map) = node.as_object_mut() {
        map.remove(last);
    }
}

/// Coerces `node` into an object, replacing any scalar stored there.
fn object_mut(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just replaced with an object"),
    }
}

#[cfg(test)]
#[path = "tests/memory_feed_tests.rs"]
mod tests;
