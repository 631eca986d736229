use finsight_core::{FederationError, ValidationError};
use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("command error: {0}")]
    Command(String),

    #[error("config error in {path}: {message}")]
    Config { path: String, message: String },

    #[error(transparent)]
    Federation(#[from] FederationError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) => 2,
            Self::Command(_) => 2,
            Self::Config { .. } => 2,
            Self::Federation(FederationError::InvalidRequest(_)) => 2,
            Self::Federation(FederationError::AllSourcesFailed { .. }) => 3,
            Self::Serialization(_) => 4,
            Self::Io(_) => 10,
        }
    }
}
