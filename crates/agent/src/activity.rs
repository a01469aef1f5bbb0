use chrono::Utc;
use flotilla_core::{ActiveTask, ActiveTaskStatus, AgentActivity};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// In-flight tasks, reported to the control plane on every heartbeat.
#[derive(Clone, Default)]
pub struct ActivityTracker {
    tasks: Arc<Mutex<HashMap<String, ActiveTask>>>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn queue(&self, task_id: &str) {
        let mut tasks = self.tasks.lock().await;
        tasks.insert(
            task_id.to_string(),
            ActiveTask {
                id: task_id.to_string(),
                status: ActiveTaskStatus::Queued,
                started_on: Utc::now(),
                waiting_since_mins: 0.0,
            },
        );
    }

    pub async fn set_running(&self, task_id: &str) {
        let mut tasks = self.tasks.lock().await;
        if let Some(task) = tasks.get_mut(task_id) {
            task.status = ActiveTaskStatus::Running;
        }
    }

    pub async fn finish(&self, task_id: &str) {
        self.tasks.lock().await.remove(task_id);
    }

    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Oldest first, with `waiting_since_mins` computed against now.
    pub async fn snapshot(&self) -> AgentActivity {
        let now = Utc::now();
        let tasks = self.tasks.lock().await;
        let mut active: Vec<ActiveTask> = tasks
            .values()
            .cloned()
            .map(|mut t| {
                t.waiting_since_mins = (now - t.started_on).num_seconds().max(0) as f64 / 60.0;
                t
            })
            .collect();
        active.sort_by(|a, b| a.started_on.cmp(&b.started_on));
        AgentActivity {
            active_task_ids: active,
        }
    }
}
