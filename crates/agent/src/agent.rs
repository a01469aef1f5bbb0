use crate::context::AgentContext;
use async_trait::async_trait;
use flotilla_core::{AgentIdentity, LogLevel, Result, TaskMessage};

/// The agent-specific part of a process. Everything else is the runtime's.
#[async_trait]
pub trait Agent: Send + Sync + 'static {
    fn identity(&self) -> &AgentIdentity;

    /// Main work loop, started once the agent is registered.
    ///
    /// Should return promptly after `ctx.cancelled()` resolves. An `Err` stops
    /// the process with that error after cleanup. The default just idles.
    async fn run(&self, ctx: AgentContext) -> Result<()> {
        ctx.cancelled().await;
        Ok(())
    }

    /// Called for each task routed to this agent.
    async fn on_task(&self, task: TaskMessage, ctx: &AgentContext) -> Result<()> {
        ctx.log_task(LogLevel::Info, format!("Task {} has no handler, acknowledged", task.id), &task.id)
            .await;
        Ok(())
    }
}
