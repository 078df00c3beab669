use checkup_core::models::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("cannot set up logging: {0}")]
    Logging(String),

    #[error("cannot listen on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl DaemonError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

pub type DaemonResult<T> = Result<T, DaemonError>;
