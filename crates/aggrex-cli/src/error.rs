use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] aggrex_core::ValidationError),

    #[error(transparent)]
    Fetch(#[from] aggrex_core::FetchError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<aggrex_core::CoreError> for CliError {
    fn from(error: aggrex_core::CoreError) -> Self {
        match error {
            aggrex_core::CoreError::Validation(error) => Self::Validation(error),
            aggrex_core::CoreError::Serialization(error) => Self::Serialization(error),
            aggrex_core::CoreError::Io(error) => Self::Io(error),
        }
    }
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) => 2,
            Self::Fetch(_) => 3,
            Self::Serialization(_) => 4,
            Self::Io(_) => 10,
        }
    }
}
