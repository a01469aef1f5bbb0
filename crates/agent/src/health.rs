//! Readiness and liveness signal for external supervisors.
//!
//! The runtime never gives up on the control plane or the bus, so "not ready"
//! alone says little. The report carries the retry counters that let a
//! supervisor tell "still retrying" apart from "stuck".

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use flotilla_core::{Error, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    Init,
    ConnectingBus,
    Registering,
    Running,
    Stopping,
    Stopped,
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LifecyclePhase::Init => "init",
            LifecyclePhase::ConnectingBus => "connecting_bus",
            LifecyclePhase::Registering => "registering",
            LifecyclePhase::Running => "running",
            LifecyclePhase::Stopping => "stopping",
            LifecyclePhase::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RetryStatus {
    pub operation: String,
    pub attempts: u32,
    pub last_error: String,
    pub since: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub agent: String,
    pub phase: LifecyclePhase,
    pub bus_connected: bool,
    pub registered: bool,
    pub retry: Option<RetryStatus>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub consecutive_heartbeat_failures: u32,
    pub tasks_delivered: u64,
    pub tasks_skipped: u64,
    pub tasks_failed: u64,
    pub malformed_messages: u64,
    pub updated_at: DateTime<Utc>,
}

impl HealthReport {
    fn new(agent: &str) -> Self {
        Self {
            agent: agent.to_string(),
            phase: LifecyclePhase::Init,
            bus_connected: false,
            registered: false,
            retry: None,
            last_heartbeat_at: None,
            consecutive_heartbeat_failures: 0,
            tasks_delivered: 0,
            tasks_skipped: 0,
            tasks_failed: 0,
            malformed_messages: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.phase == LifecyclePhase::Running
    }

    /// Still retrying after `threshold` attempts of the same operation.
    pub fn is_stuck(&self, threshold: u32) -> bool {
        self.retry
            .as_ref()
            .map(|r| r.attempts >= threshold)
            .unwrap_or(false)
    }
}

/// Cheap to clone; every clone feeds the same report.
#[derive(Clone)]
pub struct HealthMonitor {
    tx: Arc<watch::Sender<HealthReport>>,
}

impl HealthMonitor {
    pub fn new(agent: &str) -> Self {
        let (tx, _) = watch::channel(HealthReport::new(agent));
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<HealthReport> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> HealthReport {
        self.tx.borrow().clone()
    }

    fn update<F: FnOnce(&mut HealthReport)>(&self, f: F) {
        self.tx.send_modify(|report| {
            f(report);
            report.updated_at = Utc::now();
        });
    }

    pub fn set_phase(&self, phase: LifecyclePhase) {
        self.update(|r| r.phase = phase);
    }

    pub fn set_bus_connected(&self, connected: bool) {
        self.update(|r| r.bus_connected = connected);
    }

    pub fn set_registered(&self) {
        self.update(|r| r.registered = true);
    }

    pub fn retrying(&self, operation: &str, attempts: u32, error: &Error) {
        self.update(|r| {
            let since = match &r.retry {
                Some(prev) if prev.operation == operation => prev.since,
                _ => Utc::now(),
            };
            r.retry = Some(RetryStatus {
                operation: operation.to_string(),
                attempts,
                last_error: error.to_string(),
                since,
            });
        });
    }

    pub fn retry_cleared(&self) {
        self.update(|r| r.retry = None);
    }

    pub fn heartbeat_ok(&self) {
        self.update(|r| {
            r.last_heartbeat_at = Some(Utc::now());
            r.consecutive_heartbeat_failures = 0;
        });
    }

    pub fn heartbeat_failed(&self) {
        self.update(|r| r.consecutive_heartbeat_failures += 1);
    }

    pub fn task_delivered(&self) {
        self.update(|r| r.tasks_delivered += 1);
    }

    pub fn task_skipped(&self) {
        self.update(|r| r.tasks_skipped += 1);
    }

    pub fn task_failed(&self) {
        self.update(|r| r.tasks_failed += 1);
    }

    pub fn malformed_message(&self) {
        self.update(|r| r.malformed_messages += 1);
    }
}

/// Serve `/healthz` and `/readyz` on `addr` until `shutdown` fires.
pub async fn serve(addr: &str, monitor: HealthMonitor, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_on(listener, monitor, shutdown).await
}

/// Like [`serve`], on an already bound listener.
pub async fn serve_on(
    listener: tokio::net::TcpListener,
    monitor: HealthMonitor,
    shutdown: CancellationToken,
) -> Result<()> {
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(monitor);

    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "Health endpoint listening");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| {
            warn!(error = %e, "Health endpoint stopped with error");
            Error::Io(e)
        })
}

async fn healthz(State(monitor): State<HealthMonitor>) -> Json<HealthReport> {
    Json(monitor.snapshot())
}

async fn readyz(State(monitor): State<HealthMonitor>) -> (StatusCode, Json<HealthReport>) {
    let report = monitor.snapshot();
    let status = if report.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_report_is_not_ready() {
        let monitor = HealthMonitor::new("agent-a");
        let report = monitor.snapshot();
        assert_eq!(report.phase, LifecyclePhase::Init);
        assert!(!report.is_ready());
        assert!(!report.is_stuck(1));
    }

    #[test]
    fn test_retry_status_tracks_attempts_and_clears() {
        let monitor = HealthMonitor::new("agent-a");
        let err = Error::HttpStatus {
            status: 500,
            endpoint: "/agents/register".to_string(),
        };
        monitor.retrying("register", 1, &err);
        let first_since = monitor.snapshot().retry.unwrap().since;
        monitor.retrying("register", 4, &err);

        let report = monitor.snapshot();
        let retry = report.retry.as_ref().unwrap();
        assert_eq!(retry.attempts, 4);
        assert_eq!(retry.since, first_since);
        assert!(retry.last_error.contains("500"));
        assert!(report.is_stuck(3));
        assert!(!report.is_stuck(5));

        monitor.retry_cleared();
        assert!(monitor.snapshot().retry.is_none());
    }

    #[test]
    fn test_heartbeat_failures_reset_on_success() {
        let monitor = HealthMonitor::new("agent-a");
        monitor.heartbeat_failed();
        monitor.heartbeat_failed();
        assert_eq!(monitor.snapshot().consecutive_heartbeat_failures, 2);
        monitor.heartbeat_ok();
        let report = monitor.snapshot();
        assert_eq!(report.consecutive_heartbeat_failures, 0);
        assert!(report.last_heartbeat_at.is_some());
    }

    #[tokio::test]
    async fn test_readyz_follows_phase() {
        let monitor = HealthMonitor::new("agent-a");
        let (status, _) = readyz(State(monitor.clone())).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        monitor.set_phase(LifecyclePhase::Running);
        let (status, Json(report)) = readyz(State(monitor.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report.agent, "agent-a");

        monitor.set_phase(LifecyclePhase::Stopping);
        let (status, _) = readyz(State(monitor)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_subscribers_see_phase_changes() {
        let monitor = HealthMonitor::new("agent-a");
        let mut rx = monitor.subscribe();
        monitor.set_phase(LifecyclePhase::Registering);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().phase, LifecyclePhase::Registering);
    }

    #[tokio::test]
    async fn test_endpoint_serves_readiness_over_http() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let monitor = HealthMonitor::new("agent-a");
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(serve_on(listener, monitor.clone(), shutdown.clone()));
        let client = reqwest::Client::new();

        let resp = client.get(format!("{}/readyz", base)).send().await.unwrap();
        assert_eq!(resp.status().as_u16(), 503);

        monitor.set_phase(LifecyclePhase::Running);
        let resp = client.get(format!("{}/readyz", base)).send().await.unwrap();
        assert_eq!(resp.status().as_u16(), 200);

        let resp = client.get(format!("{}/healthz", base)).send().await.unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["agent"], "agent-a");
        assert_eq!(body["phase"], "running");

        shutdown.cancel();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_serve_reports_bind_failure() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();
        let result = serve(&addr, HealthMonitor::new("agent-a"), CancellationToken::new()).await;
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
