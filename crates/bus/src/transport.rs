use async_trait::async_trait;
use flotilla_core::Result;
use std::sync::Arc;

/// Opens connections to a message bus.
#[async_trait]
pub trait BusConnector: Send + Sync {
    /// Human-readable address, for logs.
    fn endpoint(&self) -> String;

    async fn connect(&self) -> Result<Arc<dyn BusTransport>>;
}

/// A live bus connection. Shared between loops, so every method takes `&self`.
#[async_trait]
pub trait BusTransport: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Wait until everything published so far has left the process.
    async fn flush(&self) -> Result<()>;

    /// Join `group` on `topic`. Members of one group share the topic's messages;
    /// every group sees every message.
    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn Subscription>>;
}

#[async_trait]
pub trait Subscription: Send {
    /// Next raw payload, or `None` once the subscription is gone.
    ///
    /// Must be cancel-safe: callers race it against timeouts and shutdown.
    async fn next_payload(&mut self) -> Option<Vec<u8>>;

    async fn unsubscribe(self: Box<Self>) -> Result<()>;
}
