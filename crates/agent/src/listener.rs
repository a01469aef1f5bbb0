//! Consumer loop: poll the task topic, route, dispatch to the agent.

use crate::activity::ActivityTracker;
use crate::agent::Agent;
use crate::context::AgentContext;
use crate::health::HealthMonitor;
use crate::retry::retry_until_ok;
use crate::router::{Route, TaskRouter};
use crate::supervisor::panic_message;
use flotilla_bus::{BusConnector, Consumer, Polled};
use flotilla_core::backoff::jittered;
use flotilla_core::{Backoff, Error, LogLevel, Result, TaskMessage};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct TaskListener {
    agent: Arc<dyn Agent>,
    connector: Arc<dyn BusConnector>,
    router: TaskRouter,
    activity: ActivityTracker,
    health: HealthMonitor,
    topic: String,
    poll_timeout: Duration,
    resubscribe_delay: Duration,
    retry_delay: Duration,
    max_retry_delay: Duration,
}

enum Exit {
    Shutdown,
    SubscriptionLost,
}

impl TaskListener {
    pub fn new(
        agent: Arc<dyn Agent>,
        connector: Arc<dyn BusConnector>,
        topic: impl Into<String>,
        activity: ActivityTracker,
        health: HealthMonitor,
    ) -> Self {
        let router = TaskRouter::new(agent.identity().name());
        Self {
            agent,
            connector,
            router,
            activity,
            health,
            topic: topic.into(),
            poll_timeout: Duration::from_secs(1),
            resubscribe_delay: Duration::from_secs(1),
            retry_delay: Duration::from_secs(5),
            max_retry_delay: Duration::from_secs(60),
        }
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, delay: Duration, ceiling: Duration) -> Self {
        self.retry_delay = delay;
        self.max_retry_delay = ceiling;
        self
    }

    /// Runs until shutdown. Bus trouble is logged and healed, never returned.
    pub async fn run(self, ctx: AgentContext) {
        info!(agent = %ctx.name(), topic = %self.topic, "Task listener started");

        while ctx.is_running() {
            let consumer = match self.subscribe(&ctx).await {
                Ok(consumer) => consumer,
                Err(Error::Cancelled) => break,
                Err(e) => {
                    // retry_until_ok only gives up on cancellation
                    warn!(error = %e, "Task subscription gave up");
                    break;
                }
            };
            self.health.set_bus_connected(true);

            match self.consume(consumer, &ctx).await {
                Exit::Shutdown => break,
                Exit::SubscriptionLost => {
                    self.health.set_bus_connected(false);
                    let delay = jittered(self.resubscribe_delay, 0.5);
                    debug!(delay_ms = delay.as_millis() as u64, "Re-subscribing after delay");
                    if !ctx.sleep(delay).await {
                        break;
                    }
                }
            }
        }

        info!(agent = %ctx.name(), "Task listener stopped");
    }

    async fn subscribe(&self, ctx: &AgentContext) -> Result<Consumer> {
        let backoff = Backoff::new(self.retry_delay, self.max_retry_delay);
        let group = ctx.name();
        let consumer = retry_until_ok(
            "subscribe",
            backoff,
            ctx.run_state().token(),
            &self.health,
            move || async move {
                let transport = self.connector.connect().await?;
                Consumer::subscribe(transport, &self.topic, group).await
            },
        )
        .await?;
        info!(topic = %self.topic, group, "Listening for tasks");
        Ok(consumer)
    }

    async fn consume(&self, mut consumer: Consumer, ctx: &AgentContext) -> Exit {
        loop {
            if !ctx.is_running() {
                consumer.close().await;
                return Exit::Shutdown;
            }

            let polled = tokio::select! {
                _ = ctx.cancelled() => {
                    consumer.close().await;
                    return Exit::Shutdown;
                }
                polled = consumer.poll(self.poll_timeout) => polled,
            };

            match polled {
                Ok(Polled::Idle) => {}
                Ok(Polled::Task(task)) => self.dispatch(task, ctx).await,
                Ok(Polled::Malformed(reason)) => {
                    self.health.malformed_message();
                    ctx.log(
                        LogLevel::Warning,
                        format!("Skipping malformed task message: {}", reason),
                    )
                    .await;
                }
                Err(e) => {
                    ctx.log(
                        LogLevel::Warning,
                        format!("Task subscription lost: {}", e),
                    )
                    .await;
                    consumer.close().await;
                    return Exit::SubscriptionLost;
                }
            }
        }
    }

    async fn dispatch(&self, task: TaskMessage, ctx: &AgentContext) {
        if self.router.route(&task) == Route::Skip {
            self.health.task_skipped();
            debug!(
                task_id = %task.id,
                target = task.target_agent.as_deref().unwrap_or(""),
                "Task addressed to another agent, skipping"
            );
            return;
        }

        let task_id = task.id.clone();
        self.health.task_delivered();
        self.activity.queue(&task_id).await;
        let age = task
            .queue_age_secs()
            .map(|s| format!(" after {:.1}s in queue", s))
            .unwrap_or_default();
        ctx.log_task(LogLevel::Info, format!("Received task {}{}", task_id, age), &task_id)
            .await;

        self.activity.set_running(&task_id).await;
        let outcome = AssertUnwindSafe(self.agent.on_task(task, ctx))
            .catch_unwind()
            .await;
        self.activity.finish(&task_id).await;

        match outcome {
            Ok(Ok(())) => {
                ctx.log_task(LogLevel::Info, format!("Task {} completed", task_id), &task_id)
                    .await;
            }
            Ok(Err(e)) => {
                self.health.task_failed();
                ctx.log_task(LogLevel::Error, format!("Task {} failed: {}", task_id, e), &task_id)
                    .await;
            }
            Err(panic) => {
                self.health.task_failed();
                ctx.log_task(
                    LogLevel::Error,
                    format!("Task {} panicked: {}", task_id, panic_message(panic.as_ref())),
                    &task_id,
                )
                .await;
            }
        }
    }
}
