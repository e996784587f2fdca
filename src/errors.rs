use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Secret access error: {0}")]
    SecretAccess(String),

    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("Subprocess failure [{program}]: {detail}")]
    Subprocess { program: String, detail: String },

    #[error("Database connection error: {0}")]
    Connection(#[from] sqlx::Error),

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("Remote command error: {0}")]
    Dispatch(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
