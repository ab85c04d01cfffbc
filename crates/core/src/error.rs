use thiserror::Error;

pub type MessagingResult<T> = Result<T, MessagingError>;

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Action definition error: {0}")]
    Definition(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for MessagingError {
    fn from(err: config::ConfigError) -> Self {
        MessagingError::Config(err.to_string())
    }
}
