//! Input rules checked by the store before any mutation.

use std::sync::OnceLock;

use regex::Regex;

use crate::{AccountError, AccountResult};

pub const MIN_DAYS: i64 = 1;
pub const MAX_DAYS: i64 = 3650;

static USERNAME_RE: OnceLock<Regex> = OnceLock::new();

/// True iff `s` is 3..=32 ASCII letters, digits or underscores.
pub fn valid_username(s: &str) -> bool {
    USERNAME_RE
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_]{3,32}$").expect("valid regex"))
        .is_match(s)
}

/// True iff `1 <= n <= 3650`.
pub fn valid_days(n: i64) -> bool {
    (MIN_DAYS..=MAX_DAYS).contains(&n)
}

pub fn check_username(s: &str) -> AccountResult<()> {
    if valid_username(s) {
        Ok(())
    } else {
        Err(AccountError::InvalidUsername)
    }
}

pub fn check_days(n: i64) -> AccountResult<()> {
    if valid_days(n) {
        Ok(())
    } else {
        Err(AccountError::InvalidDays)
    }
}
