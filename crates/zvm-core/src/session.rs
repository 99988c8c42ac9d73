//! Per-chat conversational state for the menu-driven flows.
//!
//! A flow collects a username (and, for create/renew, a day count) over
//! several messages and then yields exactly one [`Request`]. Entries idle for
//! longer than the configured threshold are dropped the next time the table
//! is touched. The account store never sees this table.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use crate::domain::ChatId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Create,
    Renew,
    Delete,
    Info,
}

impl Flow {
    fn needs_days(self) -> bool {
        matches!(self, Self::Create | Self::Renew)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Step {
    Username,
    Days,
}

#[derive(Clone, Debug)]
struct Entry {
    flow: Flow,
    step: Step,
    username: Option<String>,
    last_activity: Instant,
}

/// A completed flow, ready to be issued against the account service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    Create { username: String, days: i64 },
    Renew { username: String, days: i64 },
    Delete { username: String },
    Info { username: String },
}

/// What a message did to the chat's flow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Turn {
    /// No flow in progress; the message is not ours.
    Idle,
    /// Blank message inside a flow; nothing to do.
    Empty,
    Cancelled,
    /// Username stored, waiting for the day count.
    AskDays(Flow),
    /// Day count was not a positive integer; still waiting.
    BadDays,
    Ready(Request),
}

#[derive(Debug)]
pub struct SessionTable {
    idle_timeout: Duration,
    entries: HashMap<ChatId, Entry>,
}

impl SessionTable {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            entries: HashMap::new(),
        }
    }

    pub fn begin(&mut self, chat: ChatId, flow: Flow) {
        self.begin_at(chat, flow, Instant::now())
    }

    /// Start (or restart) a flow for `chat`.
    pub fn begin_at(&mut self, chat: ChatId, flow: Flow, now: Instant) {
        self.evict_idle_at(now);
        self.entries.insert(
            chat,
            Entry {
                flow,
                step: Step::Username,
                username: None,
                last_activity: now,
            },
        );
    }

    /// Drop any flow for `chat`. Returns whether one was in progress.
    pub fn cancel(&mut self, chat: ChatId) -> bool {
        self.entries.remove(&chat).is_some()
    }

    pub fn feed(&mut self, chat: ChatId, text: &str) -> Turn {
        self.feed_at(chat, text, Instant::now())
    }

    /// Advance the chat's flow with one incoming message.
    pub fn feed_at(&mut self, chat: ChatId, text: &str, now: Instant) -> Turn {
        let text = text.trim();
        let Some(entry) = self.live_entry(chat, now) else {
            return Turn::Idle;
        };
        if text.is_empty() {
            return Turn::Empty;
        }
        entry.last_activity = now;

        if text.eq_ignore_ascii_case("cancel") || text.eq_ignore_ascii_case("/cancel") {
            self.entries.remove(&chat);
            return Turn::Cancelled;
        }

        let step = entry.step;
        match step {
            Step::Username => {
                let flow = entry.flow;
                if flow.needs_days() {
                    entry.username = Some(text.to_string());
                    entry.step = Step::Days;
                    return Turn::AskDays(flow);
                }
                let username = text.to_string();
                self.entries.remove(&chat);
                Turn::Ready(match flow {
                    Flow::Delete => Request::Delete { username },
                    _ => Request::Info { username },
                })
            }
            Step::Days => {
                let days = match text.parse::<i64>() {
                    Ok(d) if d > 0 => d,
                    _ => return Turn::BadDays,
                };
                let flow = entry.flow;
                let username = entry.username.take().unwrap_or_default();
                self.entries.remove(&chat);
                Turn::Ready(match flow {
                    Flow::Renew => Request::Renew { username, days },
                    _ => Request::Create { username, days },
                })
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn live_entry(&mut self, chat: ChatId, now: Instant) -> Option<&mut Entry> {
        let expired = self
            .entries
            .get(&chat)
            .is_some_and(|e| now.saturating_duration_since(e.last_activity) > self.idle_timeout);
        if expired {
            self.entries.remove(&chat);
            return None;
        }
        self.entries.get_mut(&chat)
    }

    fn evict_idle_at(&mut self, now: Instant) {
        let idle = self.idle_timeout;
        self.entries
            .retain(|_, e| now.saturating_duration_since(e.last_activity) <= idle);
    }
}
