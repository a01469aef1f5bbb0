//! Lifecycle controller: connect, register, run, shut down.
//!
//! ```text
//! INIT -> CONNECTING_BUS -> REGISTERING -> RUNNING -> STOPPING -> STOPPED
//! ```
//!
//! Shutdown can be requested at any point; whatever was started is torn down
//! in reverse order and `run` returns once the producer has been flushed.

use crate::activity::ActivityTracker;
use crate::agent::Agent;
use crate::context::AgentContext;
use crate::control_plane::{ControlPlane, HttpControlPlane};
use crate::health::{self, HealthMonitor, LifecyclePhase};
use crate::listener::TaskListener;
use crate::registrar::Registrar;
use crate::retry::retry_until_ok;
use crate::run_state::RunState;
use crate::supervisor::{join_with_deadline, panic_message, spawn_supervised};
use flotilla_bus::{BusConnector, NatsConnector, Producer};
use flotilla_core::{AgentIdentity, Backoff, Config, Error, LogLevel, Result};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

type Background = Vec<(&'static str, JoinHandle<()>)>;

pub struct AgentRuntime {
    config: Config,
    agent: Arc<dyn Agent>,
    identity: Arc<AgentIdentity>,
    control_plane: Arc<dyn ControlPlane>,
    connector: Arc<dyn BusConnector>,
    producer: Arc<Producer>,
    run_state: RunState,
    health: HealthMonitor,
    activity: ActivityTracker,
    handle_signals: bool,
}

impl AgentRuntime {
    pub fn new(
        config: Config,
        agent: Arc<dyn Agent>,
        control_plane: Arc<dyn ControlPlane>,
        connector: Arc<dyn BusConnector>,
    ) -> Self {
        let identity = Arc::new(agent.identity().clone());
        let health = HealthMonitor::new(identity.name());
        let producer = Arc::new(Producer::new(config.log_topic.clone()));
        Self {
            config,
            agent,
            identity,
            control_plane,
            connector,
            producer,
            run_state: RunState::new(),
            health,
            activity: ActivityTracker::new(),
            handle_signals: true,
        }
    }

    /// HTTP control plane and NATS bus, both taken from `config`.
    pub fn from_config(config: Config, agent: Arc<dyn Agent>) -> Result<Self> {
        let control_plane = Arc::new(HttpControlPlane::from_config(&config)?);
        let connector =
            Arc::new(NatsConnector::new(config.bus_url.clone()).with_client_name(agent.identity().name()));
        Ok(Self::new(config, agent, control_plane, connector))
    }

    /// Leave Ctrl-C and SIGTERM to the caller.
    pub fn without_signal_handling(mut self) -> Self {
        self.handle_signals = false;
        self
    }

    pub fn run_state(&self) -> RunState {
        self.run_state.clone()
    }

    pub fn health(&self) -> HealthMonitor {
        self.health.clone()
    }

    pub fn producer(&self) -> Arc<Producer> {
        self.producer.clone()
    }

    fn context(&self) -> AgentContext {
        AgentContext::new(self.identity.clone(), self.producer.clone(), self.run_state.clone())
    }

    /// Drive the agent through its whole lifecycle.
    ///
    /// Returns `Ok` after a requested shutdown, or the main loop's error once
    /// everything has been cleaned up.
    pub async fn run(self) -> Result<()> {
        info!(
            agent = %self.identity.name(),
            api_url = %self.config.api_url,
            bus = %self.connector.endpoint(),
            "Starting agent runtime"
        );

        let mut background: Background = Vec::new();
        if self.handle_signals {
            let state = self.run_state.clone();
            background.push(("signals", tokio::spawn(watch_signals(state))));
        }
        if let Some(addr) = self.config.health_addr.clone() {
            let monitor = self.health.clone();
            let token = self.run_state.token().clone();
            background.push((
                "health",
                tokio::spawn(async move {
                    if let Err(e) = health::serve(&addr, monitor, token).await {
                        warn!(addr = %addr, error = %e, "Health endpoint unavailable");
                    }
                }),
            ));
        }

        let outcome = self.start_and_run(&mut background).await;
        self.stop(background).await;

        match outcome {
            Err(Error::Cancelled) => Ok(()),
            other => other,
        }
    }

    async fn start_and_run(&self, background: &mut Background) -> Result<()> {
        let token = self.run_state.token();

        self.health.set_phase(LifecyclePhase::ConnectingBus);
        let backoff = Backoff::new(self.config.retry_delay(), self.config.max_retry_delay());
        let connector = self.connector.as_ref();
        let producer = self.producer.as_ref();
        retry_until_ok("connect_bus", backoff, token, &self.health, move || {
            producer.connect(connector)
        })
        .await?;
        self.health.set_bus_connected(true);

        self.health.set_phase(LifecyclePhase::Registering);
        let registrar = Arc::new(
            Registrar::new(
                self.identity.clone(),
                self.control_plane.clone(),
                self.activity.clone(),
                self.health.clone(),
            )
            .with_retry(self.config.retry_delay(), self.config.max_retry_delay())
            .with_heartbeat_interval(self.config.heartbeat_interval()),
        );
        registrar.register(token).await?;

        if !self.run_state.mark_running() {
            return Err(Error::Cancelled);
        }
        self.health.set_phase(LifecyclePhase::Running);

        let ctx = self.context();
        background.push((
            "heartbeat",
            spawn_supervised(
                "heartbeat",
                self.run_state.clone(),
                registrar.run_heartbeat_loop(ctx.clone()),
            ),
        ));

        let listener = TaskListener::new(
            self.agent.clone(),
            self.connector.clone(),
            self.config.task_topic.clone(),
            self.activity.clone(),
            self.health.clone(),
        )
        .with_poll_timeout(self.config.poll_timeout())
        .with_retry(self.config.retry_delay(), self.config.max_retry_delay());
        background.push((
            "listener",
            spawn_supervised("listener", self.run_state.clone(), listener.run(ctx.clone())),
        ));

        ctx.log(LogLevel::Info, format!("Agent {} is running", ctx.name()))
            .await;
        self.run_main_loop(ctx).await
    }

    /// The agent's own loop. After shutdown is requested it gets the shutdown
    /// timeout to return before being dropped.
    async fn run_main_loop(&self, ctx: AgentContext) -> Result<()> {
        let main = AssertUnwindSafe(self.agent.run(ctx)).catch_unwind();
        tokio::pin!(main);

        let outcome = tokio::select! {
            outcome = &mut main => outcome,
            _ = self.run_state.cancelled() => {
                match tokio::time::timeout(self.config.shutdown_timeout(), &mut main).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        warn!("Main loop ignored shutdown, dropping it");
                        Ok(Ok(()))
                    }
                }
            }
        };

        match outcome {
            Ok(Ok(())) => {
                info!(agent = %self.identity.name(), "Main loop finished");
                Ok(())
            }
            Ok(Err(e)) => {
                error!(agent = %self.identity.name(), error = %e, "Main loop failed");
                Err(e)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(agent = %self.identity.name(), panic = %message, "Main loop panicked");
                Err(Error::Other(format!("main loop panicked: {}", message)))
            }
        }
    }

    async fn stop(&self, background: Background) {
        let was_running = self.health.snapshot().is_ready();
        self.health.set_phase(LifecyclePhase::Stopping);
        self.run_state.request_shutdown();

        if was_running {
            self.context()
                .log(LogLevel::Info, format!("Agent {} is stopping", self.identity.name()))
                .await;
        }

        join_with_deadline(background, self.config.shutdown_timeout()).await;

        self.producer.close().await;
        self.health.set_bus_connected(false);
        self.health.set_phase(LifecyclePhase::Stopped);
        info!(agent = %self.identity.name(), "Agent stopped");
    }
}

async fn watch_signals(run_state: RunState) {
    tokio::select! {
        _ = run_state.cancelled() => {}
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
            run_state.request_shutdown();
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
