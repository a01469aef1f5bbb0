pub mod activity;
pub mod agent;
pub mod context;
pub mod control_plane;
pub mod health;
pub mod listener;
pub mod registrar;
pub mod retry;
pub mod router;
pub mod run_state;
pub mod runtime;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

pub use activity::ActivityTracker;
pub use agent::Agent;
pub use context::AgentContext;
pub use control_plane::{ControlPlane, HttpControlPlane};
pub use health::{HealthMonitor, HealthReport, LifecyclePhase, RetryStatus};
pub use listener::TaskListener;
pub use registrar::Registrar;
pub use router::{Route, TaskRouter};
pub use run_state::RunState;
pub use runtime::AgentRuntime;
