use miette::Diagnostic;
use thiserror::Error;

use crate::policy::errors::PolicyError;

#[derive(Debug, Error, Diagnostic)]
pub enum PermError {
    #[error("I/O error: {0}")]
    #[diagnostic(code(contextperm::io))]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    #[diagnostic(code(contextperm::config))]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(contextperm::serde))]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Policy(#[from] PolicyError),

    #[error("Server is not running")]
    #[diagnostic(
        code(contextperm::not_running),
        help("The host server is stopped; start it before accessing server state")
    )]
    NotRunning,

    #[error("Scheduler error: {0}")]
    #[diagnostic(code(contextperm::scheduler))]
    Scheduler(String),

    #[error("{0}")]
    #[diagnostic(code(contextperm::other))]
    Other(String),
}

impl From<tokio_cron_scheduler::JobSchedulerError> for PermError {
    fn from(value: tokio_cron_scheduler::JobSchedulerError) -> Self {
        PermError::Scheduler(value.to_string())
    }
}
