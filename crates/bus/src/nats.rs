//! NATS transport. Queue groups provide the consumer-group semantics.

use crate::transport::{BusConnector, BusTransport, Subscription};
use async_trait::async_trait;
use flotilla_core::{Error, Result};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct NatsConnector {
    url: String,
    connect_timeout: Duration,
    client_name: Option<String>,
}

impl NatsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(5),
            client_name: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Name shown by the server's monitoring endpoints.
    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }
}

#[async_trait]
impl BusConnector for NatsConnector {
    fn endpoint(&self) -> String {
        self.url.clone()
    }

    async fn connect(&self) -> Result<Arc<dyn BusTransport>> {
        let mut options = async_nats::ConnectOptions::new().connection_timeout(self.connect_timeout);
        if let Some(name) = &self.client_name {
            options = options.name(name);
        }

        let client = options
            .connect(self.url.as_str())
            .await
            .map_err(|e| Error::Bus(format!("Failed to connect to {}: {}", self.url, e)))?;

        debug!(url = %self.url, "Connected to NATS");
        Ok(Arc::new(NatsTransport { client }))
    }
}

pub struct NatsTransport {
    client: async_nats::Client,
}

#[async_trait]
impl BusTransport for NatsTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .publish(topic.to_string(), payload.into())
            .await
            .map_err(|e| Error::Bus(format!("Publish to {} failed: {}", topic, e)))
    }

    async fn flush(&self) -> Result<()> {
        self.client
            .flush()
            .await
            .map_err(|e| Error::Bus(format!("Flush failed: {}", e)))
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn Subscription>> {
        let subscriber = self
            .client
            .queue_subscribe(topic.to_string(), group.to_string())
            .await
            .map_err(|e| Error::Bus(format!("Subscribe to {} as {} failed: {}", topic, group, e)))?;
        Ok(Box::new(NatsSubscription { subscriber }))
    }
}

struct NatsSubscription {
    subscriber: async_nats::Subscriber,
}

#[async_trait]
impl Subscription for NatsSubscription {
    async fn next_payload(&mut self) -> Option<Vec<u8>> {
        self.subscriber
            .next()
            .await
            .map(|message| message.payload.to_vec())
    }

    async fn unsubscribe(self: Box<Self>) -> Result<()> {
        let mut subscriber = self.subscriber;
        subscriber
            .unsubscribe()
            .await
            .map_err(|e| Error::Bus(format!("Unsubscribe failed: {}", e)))
    }
}
