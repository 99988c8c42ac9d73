use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub i64);

/// Telegram chat id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

/// Telegram message id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(pub i32);

/// A stable reference to a sent chat message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

/// Read-time classification of an account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Expired,
}

impl AccountStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A VPN account as returned by the operation contract.
///
/// `status` is always computed against the current civil date when the
/// account is handed out; it is never trusted from storage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    pub secret: String,
    pub created_on: NaiveDate,
    pub expires_on: NaiveDate,
    pub status: AccountStatus,
}

impl Account {
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    /// Whole days left until expiry, counting today. Zero once expired.
    pub fn days_left(&self, today: NaiveDate) -> i64 {
        (self.expires_on - today).num_days().max(-1) + 1
    }
}

/// Result of a sweep pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Accounts inspected.
    pub checked: usize,
    /// Accounts currently active.
    pub active: usize,
    /// Accounts currently expired (including previously reported ones).
    pub expired: usize,
    /// Accounts that flipped from active to expired since the previous sweep.
    pub newly_expired: Vec<String>,
}

impl SweepReport {
    pub fn count(&self) -> usize {
        self.newly_expired.len()
    }
}
