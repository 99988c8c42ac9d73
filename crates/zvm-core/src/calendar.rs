//! Civil-date policy: one source of "today" in a fixed reference zone.
//!
//! Expiry is evaluated on dates only. The host's configured time zone is
//! never consulted, so a server in UTC and one in Asia/Jakarta agree.

use std::sync::Mutex;

use chrono::{Days, FixedOffset, NaiveDate, Offset, Utc};

use crate::{domain::AccountStatus, errors::Error, Result};

/// Asia/Jakarta (WIB), the reference deployment's zone. No DST.
pub const DEFAULT_OFFSET_SECS: i32 = 7 * 3600;

/// Wire/storage date format.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Supplies the current civil date.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Wall clock read in a fixed UTC offset.
#[derive(Clone, Copy, Debug)]
pub struct ZonedClock {
    offset: FixedOffset,
}

impl ZonedClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }
}

impl Default for ZonedClock {
    fn default() -> Self {
        Self::new(FixedOffset::east_opt(DEFAULT_OFFSET_SECS).unwrap_or_else(|| Utc.fix()))
    }
}

impl Clock for ZonedClock {
    fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.offset).date_naive()
    }
}

/// Manually driven clock for tests and scripted scenarios.
#[derive(Debug)]
pub struct FixedClock {
    today: Mutex<NaiveDate>,
}

impl FixedClock {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            today: Mutex::new(today),
        }
    }

    pub fn set(&self, today: NaiveDate) {
        if let Ok(mut guard) = self.today.lock() {
            *guard = today;
        }
    }

    pub fn advance(&self, days: u64) {
        if let Ok(mut guard) = self.today.lock() {
            *guard = *guard + Days::new(days);
        }
    }
}

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        match self.today.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// `active` while `today <= expires_on`.
pub fn status(expires_on: NaiveDate, today: NaiveDate) -> AccountStatus {
    if today <= expires_on {
        AccountStatus::Active
    } else {
        AccountStatus::Expired
    }
}

/// `date + days`, or `None` when the result leaves chrono's range.
pub fn add_days(date: NaiveDate, days: i64) -> Option<NaiveDate> {
    let days = u64::try_from(days).ok()?;
    date.checked_add_days(Days::new(days))
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok()
}

/// Parse a UTC offset like `+07:00`, `-0330`, `+7` or `UTC+7`.
pub fn parse_offset(raw: &str) -> Result<FixedOffset> {
    let s = raw.trim();
    let s = s
        .strip_prefix("UTC")
        .or_else(|| s.strip_prefix("utc"))
        .or_else(|| s.strip_prefix("GMT"))
        .unwrap_or(s);
    if s.is_empty() || s.eq_ignore_ascii_case("z") {
        return Ok(Utc.fix());
    }

    let bad = || Error::Config(format!("invalid time zone offset: {raw}"));

    let (sign, rest) = match s.as_bytes()[0] {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => (1, s),
    };

    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None if rest.len() == 4 => rest.split_at(2),
        None => (rest, "0"),
    };
    let hours: i32 = hours.parse().map_err(|_| bad())?;
    let minutes: i32 = minutes.parse().map_err(|_| bad())?;
    if !(0..=14).contains(&hours) || !(0..60).contains(&minutes) {
        return Err(bad());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(bad)
}
