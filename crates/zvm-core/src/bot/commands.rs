//! Slash-command parsing.

use crate::{
    domain::{ChatId, UserId},
    messaging::types::{Command, IncomingUpdate, TextMessage},
    AccountError, AccountResult,
};

/// Split `/cmd@botname arg1 ...` into a lowercase command name and the rest.
pub fn parse_command(text: &str) -> (String, String) {
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

/// Turn a plain chat message into an update: commands start with `/`.
pub fn classify(chat_id: ChatId, user_id: Option<UserId>, text: &str) -> IncomingUpdate {
    if text.trim_start().starts_with('/') {
        let (name, args) = parse_command(text);
        return IncomingUpdate::Command(Command {
            chat_id,
            user_id,
            name,
            args,
        });
    }
    IncomingUpdate::Text(TextMessage {
        chat_id,
        user_id,
        text: text.to_string(),
    })
}

/// Day count typed as a command argument.
pub fn parse_days(raw: &str) -> AccountResult<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| AccountError::InvalidDays)
}
