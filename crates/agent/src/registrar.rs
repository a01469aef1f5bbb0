//! Registration and heartbeat against the control plane.

use crate::activity::ActivityTracker;
use crate::context::AgentContext;
use crate::control_plane::ControlPlane;
use crate::health::HealthMonitor;
use crate::retry::retry_until_ok;
use flotilla_core::{AgentIdentity, Backoff, Error, LogLevel, RegistrationRecord, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct Registrar {
    identity: Arc<AgentIdentity>,
    control_plane: Arc<dyn ControlPlane>,
    activity: ActivityTracker,
    health: HealthMonitor,
    retry_delay: Duration,
    max_retry_delay: Duration,
    heartbeat_interval: Duration,
}

impl Registrar {
    pub fn new(
        identity: Arc<AgentIdentity>,
        control_plane: Arc<dyn ControlPlane>,
        activity: ActivityTracker,
        health: HealthMonitor,
    ) -> Self {
        Self {
            identity,
            control_plane,
            activity,
            health,
            retry_delay: Duration::from_secs(5),
            max_retry_delay: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(30),
        }
    }

    pub fn with_retry(mut self, delay: Duration, ceiling: Duration) -> Self {
        self.retry_delay = delay;
        self.max_retry_delay = ceiling;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    async fn record(&self) -> RegistrationRecord {
        self.identity.to_record(self.activity.snapshot().await)
    }

    /// Register, retrying until the control plane accepts or `cancel` fires.
    pub async fn register(&self, cancel: &CancellationToken) -> Result<RegistrationRecord> {
        let backoff = Backoff::new(self.retry_delay, self.max_retry_delay);
        let record = retry_until_ok("register", backoff, cancel, &self.health, move || async move {
            let record = self.record().await;
            self.control_plane.register(&record).await?;
            Ok(record)
        })
        .await?;

        self.health.set_registered();
        info!(
            agent = %self.identity.name(),
            deployment = %self.identity.deployment_name(),
            "Registered with control plane"
        );
        Ok(record)
    }

    /// One heartbeat. Errors are for the caller to log; nothing is retried.
    pub async fn heartbeat(&self) -> Result<()> {
        let record = self.record().await;
        self.control_plane.heartbeat(&record).await
    }

    /// Heartbeat every interval until shutdown.
    ///
    /// Each heartbeat is awaited before the next tick is taken, so they never
    /// overlap. A slow control plane delays the next one instead.
    pub async fn run_heartbeat_loop(self: Arc<Self>, ctx: AgentContext) {
        info!(
            agent = %ctx.name(),
            interval_secs = self.heartbeat_interval.as_secs(),
            "Heartbeat loop started"
        );

        let mut ticker = tokio::time::interval_at(
            Instant::now() + self.heartbeat_interval,
            self.heartbeat_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if !ctx.is_running() {
                break;
            }

            let outcome = tokio::select! {
                _ = ctx.cancelled() => break,
                outcome = self.heartbeat() => outcome,
            };

            match outcome {
                Ok(()) => {
                    self.health.heartbeat_ok();
                    debug!(agent = %ctx.name(), "Heartbeat sent");
                }
                Err(Error::HttpStatus { status: 404, .. }) => {
                    self.health.heartbeat_failed();
                    warn!(agent = %ctx.name(), "Control plane does not know this agent (404)");
                    ctx.log(
                        LogLevel::Warning,
                        "Heartbeat rejected: agent unknown to control plane",
                    )
                    .await;
                }
                Err(e) => {
                    self.health.heartbeat_failed();
                    ctx.log(LogLevel::Debug, format!("Heartbeat failed: {}", e)).await;
                }
            }
        }

        info!(agent = %ctx.name(), "Heartbeat loop stopped");
    }
}
