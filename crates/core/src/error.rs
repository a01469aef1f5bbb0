use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Control plane error: {0}")]
    ControlPlane(String),

    #[error("Control plane returned HTTP {status} for {endpoint}")]
    HttpStatus { status: u16, endpoint: String },

    #[error("Bus error: {0}")]
    Bus(String),

    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Task handler error: {0}")]
    Handler(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Shutdown requested")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
