pub mod backoff;
pub mod config;
pub mod error;
pub mod identity;
pub mod message;

pub use backoff::Backoff;
pub use config::Config;
pub use error::{Error, Result};
pub use identity::{ActiveTask, ActiveTaskStatus, AgentActivity, AgentIdentity, RegistrationRecord};
pub use message::{LogEvent, LogLevel, TaskMessage};
