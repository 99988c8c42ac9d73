//! JSON bodies shared by the server and [`crate::client::ApiClient`].

use serde::{Deserialize, Serialize};

use zvm_core::AccountError;

/// Body of every `/api/user/*` call.
///
/// Older clients send the username as `password`; both keys are accepted.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AccountRequest {
    #[serde(alias = "password")]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

impl AccountRequest {
    pub fn named(username: &str) -> Self {
        Self {
            username: username.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deleted {
    pub deleted: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purged {
    pub removed: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

impl From<&AccountError> for ErrorBody {
    fn from(e: &AccountError) -> Self {
        Self {
            error: e.to_string(),
            code: e.code().to_string(),
        }
    }
}

impl ErrorBody {
    /// Rebuild the account error a server reported.
    pub fn into_account_error(self) -> AccountError {
        match self.code.as_str() {
            "invalid_username" => AccountError::InvalidUsername,
            "invalid_days" => AccountError::InvalidDays,
            "already_exists" => AccountError::AlreadyExists(trailing_name(&self.error)),
            "not_found" => AccountError::NotFound(trailing_name(&self.error)),
            "unauthorized" => AccountError::Unauthorized,
            "persist_failure" => AccountError::Persist(
                self.error
                    .strip_prefix("failed to persist users db: ")
                    .unwrap_or(&self.error)
                    .to_string(),
            ),
            _ => AccountError::Transport(self.error),
        }
    }
}

// "user not found: alice" -> "alice"
fn trailing_name(msg: &str) -> String {
    msg.rsplit_once(": ")
        .map(|(_, name)| name)
        .unwrap_or(msg)
        .to_string()
}
