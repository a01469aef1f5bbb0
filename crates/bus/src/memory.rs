//! In-process bus with the same group semantics as the real broker.
//!
//! Meant for tests: no persistence, no backpressure, and only the most recent
//! [`HISTORY_LIMIT`] payloads per topic are kept for inspection. Within a group,
//! messages go to the live members round-robin; every group gets its own copy.

use crate::transport::{BusConnector, BusTransport, Subscription};
use async_trait::async_trait;
use flotilla_core::{Error, Result};
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;

/// Payloads remembered per topic by [`MemoryBus::published`].
pub const HISTORY_LIMIT: usize = 1024;

#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    topics: HashMap<String, BTreeMap<String, Group>>,
    history: HashMap<String, VecDeque<Vec<u8>>>,
    failing_connects: u32,
    failing_publishes: bool,
    connects: u32,
    flushes: u32,
    next_member_id: u64,
}

#[derive(Default)]
struct Group {
    members: Vec<Member>,
    cursor: usize,
}

struct Member {
    id: u64,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next `n` connection attempts fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.lock().failing_connects = n;
    }

    pub fn set_publish_failures(&self, failing: bool) {
        self.lock().failing_publishes = failing;
    }

    /// Successful connections handed out so far.
    pub fn connect_count(&self) -> u32 {
        self.lock().connects
    }

    pub fn flush_count(&self) -> u32 {
        self.lock().flushes
    }

    /// Drop every subscription, as a broker restart would.
    pub fn disconnect_subscribers(&self) {
        self.lock().topics.clear();
    }

    pub fn member_count(&self, topic: &str, group: &str) -> usize {
        self.lock()
            .topics
            .get(topic)
            .and_then(|groups| groups.get(group))
            .map(|g| g.members.iter().filter(|m| !m.tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// The last [`HISTORY_LIMIT`] payloads published on `topic`, oldest first,
    /// whether or not anyone was subscribed.
    pub fn published(&self, topic: &str) -> Vec<Vec<u8>> {
        self.lock()
            .history
            .get(topic)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Published payloads on `topic` that decode as `T`.
    pub fn published_as<T: DeserializeOwned>(&self, topic: &str) -> Vec<T> {
        self.published(topic)
            .iter()
            .filter_map(|bytes| serde_json::from_slice(bytes).ok())
            .collect()
    }

    fn remove_member(&self, topic: &str, group: &str, id: u64) {
        let mut inner = self.lock();
        if let Some(groups) = inner.topics.get_mut(topic) {
            if let Some(g) = groups.get_mut(group) {
                g.members.retain(|m| m.id != id);
            }
        }
    }
}

#[async_trait]
impl BusConnector for MemoryBus {
    fn endpoint(&self) -> String {
        "memory://local".to_string()
    }

    async fn connect(&self) -> Result<Arc<dyn BusTransport>> {
        let mut inner = self.lock();
        if inner.failing_connects > 0 {
            inner.failing_connects -= 1;
            return Err(Error::Bus("memory bus refused connection".to_string()));
        }
        inner.connects += 1;
        drop(inner);
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl BusTransport for MemoryBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let mut inner = self.lock();
        if inner.failing_publishes {
            return Err(Error::Bus("memory bus rejected publish".to_string()));
        }

        if let Some(groups) = inner.topics.get_mut(topic) {
            for group in groups.values_mut() {
                group.members.retain(|m| !m.tx.is_closed());
                if group.members.is_empty() {
                    continue;
                }
                let idx = group.cursor % group.members.len();
                group.cursor = group.cursor.wrapping_add(1);
                let member = &group.members[idx];
                if member.tx.send(payload.clone()).is_err() {
                    debug!(topic, member = member.id, "Member went away mid-publish, payload dropped");
                }
            }
        }

        let history = inner.history.entry(topic.to_string()).or_default();
        if history.len() == HISTORY_LIMIT {
            history.pop_front();
        }
        history.push_back(payload);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.lock().flushes += 1;
        Ok(())
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn Subscription>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        inner.next_member_id += 1;
        let id = inner.next_member_id;
        inner
            .topics
            .entry(topic.to_string())
            .or_default()
            .entry(group.to_string())
            .or_default()
            .members
            .push(Member { id, tx });
        drop(inner);

        Ok(Box::new(MemorySubscription {
            bus: self.clone(),
            topic: topic.to_string(),
            group: group.to_string(),
            id,
            rx,
        }))
    }
}

struct MemorySubscription {
    bus: MemoryBus,
    topic: String,
    group: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next_payload(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    async fn unsubscribe(self: Box<Self>) -> Result<()> {
        self.bus.remove_member(&self.topic, &self.group, self.id);
        Ok(())
    }
}
