use crate::transport::{BusTransport, Subscription};
use flotilla_core::{Error, Result, TaskMessage};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of one bounded poll.
#[derive(Debug)]
pub enum Polled {
    Task(TaskMessage),
    /// Nothing arrived within the timeout.
    Idle,
    /// A payload arrived but was not a task. Already consumed.
    Malformed(String),
}

/// Subscription to the task topic under one consumer group.
pub struct Consumer {
    topic: String,
    group: String,
    subscription: Box<dyn Subscription>,
    // Keeps the connection alive for as long as the subscription is.
    _transport: Arc<dyn BusTransport>,
}

impl Consumer {
    pub async fn subscribe(transport: Arc<dyn BusTransport>, topic: &str, group: &str) -> Result<Self> {
        let subscription = transport.subscribe(topic, group).await?;
        debug!(topic, group, "Subscribed to task topic");
        Ok(Self {
            topic: topic.to_string(),
            group: group.to_string(),
            subscription,
            _transport: transport,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Wait at most `timeout` for the next message.
    ///
    /// `Err` means the subscription itself is broken and should be replaced.
    pub async fn poll(&mut self, timeout: Duration) -> Result<Polled> {
        match tokio::time::timeout(timeout, self.subscription.next_payload()).await {
            Err(_) => Ok(Polled::Idle),
            Ok(None) => Err(Error::Bus(format!(
                "Subscription to {} ({}) closed",
                self.topic, self.group
            ))),
            Ok(Some(bytes)) => match serde_json::from_slice::<TaskMessage>(&bytes) {
                Ok(task) => Ok(Polled::Task(task)),
                Err(e) => Ok(Polled::Malformed(e.to_string())),
            },
        }
    }

    /// Best-effort unsubscribe.
    pub async fn close(self) {
        if let Err(e) = self.subscription.unsubscribe().await {
            warn!(error = %e, topic = %self.topic, "Failed to unsubscribe cleanly");
        }
    }
}
