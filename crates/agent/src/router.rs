use flotilla_core::TaskMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Deliver,
    Skip,
}

/// Decides whether a task on the shared topic is meant for this agent.
#[derive(Debug, Clone)]
pub struct TaskRouter {
    agent_name: String,
}

impl TaskRouter {
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    /// Untargeted tasks are for everyone; a target must match the name exactly.
    pub fn route(&self, task: &TaskMessage) -> Route {
        match task.target_agent.as_deref() {
            None => Route::Deliver,
            Some(target) if target == self.agent_name => Route::Deliver,
            Some(_) => Route::Skip,
        }
    }
}
