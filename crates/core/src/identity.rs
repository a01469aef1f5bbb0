use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who an agent is. Fixed for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    name: String,
    deployment_name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    models: Vec<String>,
}

impl AgentIdentity {
    /// `deployment_name` defaults to `<name>-deployment`.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            deployment_name: format!("{}-deployment", name),
            name,
            description: String::new(),
            models: Vec::new(),
        }
    }

    pub fn with_deployment_name(mut self, deployment_name: impl Into<String>) -> Self {
        self.deployment_name = deployment_name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models = models.into_iter().map(Into::into).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn deployment_name(&self) -> &str {
        &self.deployment_name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    /// Snapshot this identity for the control plane, stamped with the current time.
    pub fn to_record(&self, activity: AgentActivity) -> RegistrationRecord {
        RegistrationRecord {
            identity: self.clone(),
            updated_at: Utc::now(),
            activity,
        }
    }
}

/// Body of `/agents/register` and `/agents/heartbeat`, and the element type of
/// `/agents/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationRecord {
    #[serde(flatten)]
    pub identity: AgentIdentity,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub activity: AgentActivity,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentActivity {
    #[serde(default)]
    pub active_task_ids: Vec<ActiveTask>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveTaskStatus {
    Queued,
    Running,
}

impl std::fmt::Display for ActiveTaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActiveTaskStatus::Queued => write!(f, "queued"),
            ActiveTaskStatus::Running => write!(f, "running"),
        }
    }
}

/// One in-flight task as reported to the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveTask {
    pub id: String,
    pub status: ActiveTaskStatus,
    pub started_on: DateTime<Utc>,
    #[serde(default)]
    pub waiting_since_mins: f64,
}
