/// Shared error type used across all Brewva crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("budget: {0}")]
    Budget(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("integrity: {0}")]
    Integrity(String),

    #[error("gateway: {0}")]
    Gateway(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("skill not found: {0}")]
    SkillNotFound(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
