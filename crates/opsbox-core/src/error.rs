// crates/opsbox-core/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OpsError {
    #[error("`{0}` is not installed or not in PATH")]
    ToolMissing(String),

    #[error("Docker is not running or the current user lacks permission: {0}")]
    DockerUnavailable(String),

    #[error("Container '{0}' is not running")]
    ContainerNotRunning(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("`{command}` exited with status {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Config file error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Broker error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Remote API rejected the request: {0}")]
    Remote(String),

    #[error("Operation cancelled by user")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, OpsError>;
