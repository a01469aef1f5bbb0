use crate::run_state::RunState;
use flotilla_bus::Producer;
use flotilla_core::{AgentIdentity, LogEvent, LogLevel};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What an agent's code gets to see of the runtime.
///
/// Cloned into every loop. Publishing is best-effort and never fails the caller.
#[derive(Clone)]
pub struct AgentContext {
    identity: Arc<AgentIdentity>,
    producer: Arc<Producer>,
    run_state: RunState,
}

impl AgentContext {
    pub fn new(identity: Arc<AgentIdentity>, producer: Arc<Producer>, run_state: RunState) -> Self {
        Self {
            identity,
            producer,
            run_state,
        }
    }

    pub fn name(&self) -> &str {
        self.identity.name()
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    pub fn run_state(&self) -> &RunState {
        &self.run_state
    }

    pub fn is_running(&self) -> bool {
        self.run_state.is_running()
    }

    pub async fn cancelled(&self) {
        self.run_state.cancelled().await
    }

    /// Sleep for `duration` unless shutdown comes first.
    ///
    /// Returns `false` when woken by shutdown.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.run_state.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    pub async fn log(&self, level: LogLevel, message: impl Into<String>) {
        let event = LogEvent::new(level, self.name(), message);
        self.publish(event).await;
    }

    pub async fn log_task(&self, level: LogLevel, message: impl Into<String>, task_id: &str) {
        let event = LogEvent::new(level, self.name(), message).with_task(task_id);
        self.publish(event).await;
    }

    /// Mirror the event to local tracing, then send it to the log topic.
    pub async fn publish(&self, event: LogEvent) {
        let task_id = event.task_id.as_deref().unwrap_or("");
        match event.level {
            LogLevel::Error => error!(agent = %event.source, task_id, "{}", event.message),
            LogLevel::Warning => warn!(agent = %event.source, task_id, "{}", event.message),
            LogLevel::Info => info!(agent = %event.source, task_id, "{}", event.message),
            LogLevel::Debug => debug!(agent = %event.source, task_id, "{}", event.message),
        }
        self.producer.publish(&event).await;
    }
}
