//! Scripted control plane and recording agent for runtime tests.

use crate::agent::Agent;
use crate::context::AgentContext;
use crate::control_plane::{ControlPlane, HEARTBEAT_PATH, REGISTER_PATH};
use crate::run_state::RunState;
use async_trait::async_trait;
use flotilla_core::{AgentIdentity, Error, RegistrationRecord, Result, TaskMessage};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Default)]
pub struct FakeControlPlane {
    register_script: Mutex<VecDeque<u16>>,
    register_calls: Mutex<Vec<Instant>>,
    running_at_register: Mutex<Vec<bool>>,
    observed: Mutex<Option<RunState>>,
    heartbeat_status: AtomicU16,
    heartbeat_delay: Mutex<Duration>,
    heartbeats: Mutex<Vec<(Instant, RegistrationRecord)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeControlPlane {
    pub fn new() -> Self {
        let fake = Self::default();
        fake.heartbeat_status.store(200, Ordering::SeqCst);
        fake
    }

    /// Status codes for successive register calls; 200 once exhausted.
    pub fn with_register_statuses(self, statuses: &[u16]) -> Self {
        *self.register_script.lock().unwrap() = statuses.iter().copied().collect();
        self
    }

    pub fn with_heartbeat_status(self, status: u16) -> Self {
        self.heartbeat_status.store(status, Ordering::SeqCst);
        self
    }

    pub fn with_heartbeat_delay(self, delay: Duration) -> Self {
        *self.heartbeat_delay.lock().unwrap() = delay;
        self
    }

    /// Record `state.is_running()` at every register call.
    pub fn observe(&self, state: RunState) {
        *self.observed.lock().unwrap() = Some(state);
    }

    pub fn register_calls(&self) -> Vec<Instant> {
        self.register_calls.lock().unwrap().clone()
    }

    pub fn running_at_register(&self) -> Vec<bool> {
        self.running_at_register.lock().unwrap().clone()
    }

    pub fn heartbeats(&self) -> Vec<(Instant, RegistrationRecord)> {
        self.heartbeats.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

fn status_result(status: u16, endpoint: &str) -> Result<()> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(Error::HttpStatus {
            status,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn register(&self, _record: &RegistrationRecord) -> Result<()> {
        self.register_calls.lock().unwrap().push(Instant::now());
        let running = self
            .observed
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.is_running())
            .unwrap_or(false);
        self.running_at_register.lock().unwrap().push(running);
        let status = self.register_script.lock().unwrap().pop_front().unwrap_or(200);
        status_result(status, REGISTER_PATH)
    }

    async fn heartbeat(&self, record: &RegistrationRecord) -> Result<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.heartbeats.lock().unwrap().push((Instant::now(), record.clone()));

        let delay = *self.heartbeat_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        status_result(self.heartbeat_status.load(Ordering::SeqCst), HEARTBEAT_PATH)
    }

    async fn status(&self) -> Result<Vec<RegistrationRecord>> {
        Ok(self.heartbeats().into_iter().map(|(_, r)| r).collect())
    }
}

/// How a [`RecordingAgent`] main loop ends.
#[derive(Debug, Clone)]
pub enum MainLoop {
    UntilShutdown,
    ReturnAfter(Duration),
    FailAfter(Duration, String),
}

/// Records every task it sees. Task ids starting with `fail` return an error,
/// ids starting with `panic` panic.
pub struct RecordingAgent {
    identity: AgentIdentity,
    main_loop: MainLoop,
    seen: Mutex<Vec<String>>,
}

impl RecordingAgent {
    pub fn new(name: &str) -> Self {
        Self {
            identity: AgentIdentity::new(name),
            main_loop: MainLoop::UntilShutdown,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn with_main_loop(mut self, main_loop: MainLoop) -> Self {
        self.main_loop = main_loop;
        self
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Agent for RecordingAgent {
    fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    async fn run(&self, ctx: AgentContext) -> Result<()> {
        match &self.main_loop {
            MainLoop::UntilShutdown => {
                ctx.cancelled().await;
                Ok(())
            }
            MainLoop::ReturnAfter(after) => {
                ctx.sleep(*after).await;
                Ok(())
            }
            MainLoop::FailAfter(after, reason) => {
                ctx.sleep(*after).await;
                Err(Error::Other(reason.clone()))
            }
        }
    }

    async fn on_task(&self, task: TaskMessage, _ctx: &AgentContext) -> Result<()> {
        self.seen.lock().unwrap().push(task.id.clone());
        if task.id.starts_with("fail") {
            return Err(Error::Handler(format!("cannot handle {}", task.id)));
        }
        if task.id.starts_with("panic") {
            panic!("handler blew up on {}", task.id);
        }
        Ok(())
    }
}
