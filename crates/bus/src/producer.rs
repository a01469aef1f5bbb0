use crate::transport::{BusConnector, BusTransport};
use flotilla_core::{LogEvent, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Best-effort telemetry sink for the log topic.
///
/// Shared by every loop in the process. `publish` never fails: availability of
/// the caller wins over delivery of the log line.
pub struct Producer {
    topic: String,
    transport: RwLock<Option<Arc<dyn BusTransport>>>,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl Producer {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            transport: RwLock::new(None),
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// One connection attempt. Retrying is the caller's job.
    pub async fn connect(&self, connector: &dyn BusConnector) -> Result<()> {
        let transport = connector.connect().await?;
        *self.transport.write().await = Some(transport);
        info!(endpoint = %connector.endpoint(), topic = %self.topic, "Log producer connected");
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.transport.read().await.is_some()
    }

    pub async fn publish(&self, event: &LogEvent) {
        let transport = self.transport.read().await.clone();
        let Some(transport) = transport else {
            warn!(message = %event.message, "Log producer not connected, dropping event");
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let payload = match serde_json::to_vec(event) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Failed to serialize log event, dropping");
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        match transport.publish(&self.topic, payload).await {
            Ok(()) => {
                self.published.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!(error = %e, topic = %self.topic, "Failed to publish log event, dropping");
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Flush pending sends and release the connection.
    ///
    /// Returns whether the flush completed. Errors are logged, never returned.
    pub async fn close(&self) -> bool {
        let Some(transport) = self.transport.write().await.take() else {
            debug!("Log producer was never connected, nothing to close");
            return false;
        };

        match transport.flush().await {
            Ok(()) => {
                info!(
                    published = self.published_count(),
                    dropped = self.dropped_count(),
                    "Log producer flushed and closed"
                );
                true
            }
            Err(e) => {
                warn!(error = %e, "Log producer flush failed during close");
                false
            }
        }
    }

    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBus;
    use flotilla_core::LogLevel;

    #[tokio::test]
    async fn test_publish_before_connect_is_a_noop() {
        let producer = Producer::new("agent-logs");
        producer
            .publish(&LogEvent::new(LogLevel::Info, "agent-a", "hello"))
            .await;
        assert_eq!(producer.dropped_count(), 1);
        assert!(!producer.close().await);
    }

    #[tokio::test]
    async fn test_publish_reaches_log_topic() {
        let bus = MemoryBus::new();
        let producer = Producer::new("agent-logs");
        producer.connect(&bus).await.unwrap();
        producer
            .publish(&LogEvent::new(LogLevel::Error, "agent-a", "boom").with_task("t1"))
            .await;

        let events: Vec<LogEvent> = bus.published_as("agent-logs");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].level, LogLevel::Error);
        assert_eq!(events[0].task_id.as_deref(), Some("t1"));
        assert_eq!(producer.published_count(), 1);
    }

    #[tokio::test]
    async fn test_publish_failure_is_swallowed() {
        let bus = MemoryBus::new();
        let producer = Producer::new("agent-logs");
        producer.connect(&bus).await.unwrap();
        bus.set_publish_failures(true);
        producer
            .publish(&LogEvent::new(LogLevel::Info, "agent-a", "lost"))
            .await;
        assert_eq!(producer.dropped_count(), 1);
        assert!(bus.published("agent-logs").is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_publishers() {
        let bus = MemoryBus::new();
        let producer = Arc::new(Producer::new("agent-logs"));
        producer.connect(&bus).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..3 {
            let producer = producer.clone();
            handles.push(tokio::spawn(async move {
                for j in 0..50 {
                    let msg = format!("loop {} event {}", i, j);
                    producer
                        .publish(&LogEvent::new(LogLevel::Debug, "agent-a", msg))
                        .await;
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let events: Vec<LogEvent> = bus.published_as("agent-logs");
        assert_eq!(events.len(), 150);
        assert_eq!(producer.published_count(), 150);
    }

    #[tokio::test]
    async fn test_close_flushes_once() {
        let bus = MemoryBus::new();
        let producer = Producer::new("agent-logs");
        producer.connect(&bus).await.unwrap();
        assert!(producer.close().await);
        assert!(!producer.close().await);
        assert_eq!(bus.flush_count(), 1);
        assert!(!producer.is_connected().await);
    }
}
