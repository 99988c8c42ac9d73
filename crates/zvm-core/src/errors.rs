use std::path::PathBuf;

/// Core error type for process-level failures (config, startup, adapters).
///
/// Adapter crates should map their specific errors into this type so the
/// binaries can report failures consistently.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid path: {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Outcome taxonomy of the account operation contract.
///
/// Everything except `Persist` is an expected, non-fatal result that callers
/// show to the user. `Unauthorized` and `Transport` never originate in the
/// store; they come from the access gate and the HTTP client respectively.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AccountError {
    #[error("invalid username (use 3-32 chars: a-zA-Z0-9_)")]
    InvalidUsername,

    #[error("days must be 1..3650")]
    InvalidDays,

    #[error("user already exists: {0}")]
    AlreadyExists(String),

    #[error("user not found: {0}")]
    NotFound(String),

    #[error("failed to persist users db: {0}")]
    Persist(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("api unavailable: {0}")]
    Transport(String),
}

impl AccountError {
    /// Stable machine-readable tag used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidUsername => "invalid_username",
            Self::InvalidDays => "invalid_days",
            Self::AlreadyExists(_) => "already_exists",
            Self::NotFound(_) => "not_found",
            Self::Persist(_) => "persist_failure",
            Self::Unauthorized => "unauthorized",
            Self::Transport(_) => "transport",
        }
    }

    pub fn persist(e: impl std::fmt::Display) -> Self {
        Self::Persist(e.to_string())
    }
}

pub type AccountResult<T> = std::result::Result<T, AccountError>;
