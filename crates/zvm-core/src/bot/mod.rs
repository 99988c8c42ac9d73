//! Chat front-end for the account store.
//!
//! [`BotController`] turns incoming updates into account operations and
//! replies through a [`MessagingPort`]. It holds no Telegram types; the
//! adapter crate only converts updates and forwards them here.

pub mod commands;
pub mod notifier;

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{
    calendar::Clock,
    domain::{Account, ChatId, UserId},
    formatting::{account_card, account_list, error_line, escape_html, help_text, sweep_summary},
    messaging::{
        port::MessagingPort,
        types::{CallbackQuery, Command, IncomingUpdate, InlineButton, InlineKeyboard, TextMessage},
    },
    ports::AccountService,
    security::{is_authorized, AccessMode, RateLimiter},
    session::{Flow, Request, SessionTable, Turn},
    AccountResult, Result,
};

const UNAUTHORIZED: &str = "Unauthorized. Contact the bot owner for access.";
const MENU_PREFIX: &str = "menu:";
const MENU_TITLE: &str = "<b>ZiVPN account manager</b>\n\nPick an action:";

/// Who may use the bot and how often.
#[derive(Clone, Debug)]
pub struct AccessPolicy {
    pub mode: AccessMode,
    pub admins: Vec<i64>,
}

pub struct BotController {
    service: Arc<dyn AccountService>,
    messenger: Arc<dyn MessagingPort>,
    clock: Arc<dyn Clock>,
    policy: AccessPolicy,
    sessions: Mutex<SessionTable>,
    rate_limiter: Mutex<RateLimiter>,
}

impl BotController {
    pub fn new(
        service: Arc<dyn AccountService>,
        messenger: Arc<dyn MessagingPort>,
        clock: Arc<dyn Clock>,
        policy: AccessPolicy,
        sessions: SessionTable,
        rate_limiter: RateLimiter,
    ) -> Self {
        Self {
            service,
            messenger,
            clock,
            policy,
            sessions: Mutex::new(sessions),
            rate_limiter: Mutex::new(rate_limiter),
        }
    }

    pub async fn handle(&self, update: IncomingUpdate) -> Result<()> {
        let (chat_id, user_id, callback_id) = match &update {
            IncomingUpdate::Command(c) => (c.chat_id, c.user_id, None),
            IncomingUpdate::Text(t) => (t.chat_id, t.user_id, None),
            IncomingUpdate::Callback(q) => (q.chat_id, q.user_id, Some(q.callback_id.as_str())),
        };

        if !is_authorized(user_id, self.policy.mode, &self.policy.admins) {
            debug!(chat = chat_id.0, user = ?user_id.map(|u| u.0), "rejected unauthorized update");
            return match callback_id {
                Some(id) => self.messenger.answer_callback_query(id, Some("Unauthorized")).await,
                None => self.messenger.send_html(chat_id, UNAUTHORIZED).await.map(|_| ()),
            };
        }

        if let Some(user_id) = user_id {
            if let Some(wait) = self.throttled(user_id).await {
                let text = format!("⏳ Rate limited. Please wait {}s.", wait.max(1));
                return match callback_id {
                    Some(id) => self.messenger.answer_callback_query(id, Some(&text)).await,
                    None => self.messenger.send_html(chat_id, &text).await.map(|_| ()),
                };
            }
        }

        match update {
            IncomingUpdate::Command(c) => self.on_command(c).await,
            IncomingUpdate::Text(t) => self.on_text(t).await,
            IncomingUpdate::Callback(q) => self.on_callback(q).await,
        }
    }

    /// Seconds to wait when the user is over the limit.
    async fn throttled(&self, user_id: UserId) -> Option<u64> {
        let (allowed, retry_after) = self.rate_limiter.lock().await.check(user_id);
        if allowed {
            return None;
        }
        Some(retry_after.map(|d| d.as_secs_f64().ceil() as u64).unwrap_or(1))
    }

    async fn on_command(&self, cmd: Command) -> Result<()> {
        let chat = cmd.chat_id;
        let args: Vec<&str> = cmd.args.split_whitespace().collect();
        info!(chat = chat.0, command = %cmd.name, "command");

        match cmd.name.as_str() {
            "start" | "menu" => {
                self.sessions.lock().await.cancel(chat);
                self.send_menu(chat).await
            }
            "help" => self.say(chat, &help_text()).await,
            "cancel" => self.cancel(chat).await,
            "list" => self.show_list(chat).await,
            "sweep" => self.show_sweep(chat).await,
            "create" => match args.as_slice() {
                [] => self.begin(chat, Flow::Create).await,
                [username, days, rest @ ..] => {
                    let secret = rest.first().copied();
                    let res = match commands::parse_days(days) {
                        Ok(days) => self.service.create(username, days, secret).await,
                        Err(e) => Err(e),
                    };
                    self.reply_account(chat, "✅ Account created", res).await
                }
                [_] => self.say(chat, "Usage: /create &lt;user&gt; &lt;days&gt; [password]").await,
            },
            "renew" => match args.as_slice() {
                [] => self.begin(chat, Flow::Renew).await,
                [username, days, ..] => {
                    let res = match commands::parse_days(days) {
                        Ok(days) => self.service.renew(username, days).await,
                        Err(e) => Err(e),
                    };
                    self.reply_account(chat, "🔄 Account renewed", res).await
                }
                [_] => self.say(chat, "Usage: /renew &lt;user&gt; &lt;days&gt;").await,
            },
            "delete" => match args.first() {
                None => self.begin(chat, Flow::Delete).await,
                Some(username) => {
                    let username = username.to_string();
                    self.run(chat, Request::Delete { username }).await
                }
            },
            "info" => match args.first() {
                None => self.begin(chat, Flow::Info).await,
                Some(username) => {
                    let username = username.to_string();
                    self.run(chat, Request::Info { username }).await
                }
            },
            _ => self.say(chat, "Unknown command. Send /help for the list.").await,
        }
    }

    async fn on_text(&self, msg: TextMessage) -> Result<()> {
        let chat = msg.chat_id;
        let turn = self.sessions.lock().await.feed(chat, &msg.text);
        match turn {
            Turn::Idle => self.say(chat, "Send /menu to manage accounts.").await,
            Turn::Empty => Ok(()),
            Turn::Cancelled => self.say(chat, "Cancelled.").await,
            Turn::AskDays(_) => self.ask(chat, "How many days? (1-3650)").await,
            Turn::BadDays => {
                self.ask(chat, "Days must be a positive number. Try again or send cancel.")
                    .await
            }
            Turn::Ready(req) => self.run(chat, req).await,
        }
    }

    async fn on_callback(&self, q: CallbackQuery) -> Result<()> {
        let chat = q.chat_id;
        let Some(action) = q.data.strip_prefix(MENU_PREFIX) else {
            return self
                .messenger
                .answer_callback_query(&q.callback_id, Some("Unknown action"))
                .await;
        };
        self.messenger.answer_callback_query(&q.callback_id, None).await?;

        match action {
            "create" => self.begin(chat, Flow::Create).await,
            "renew" => self.begin(chat, Flow::Renew).await,
            "delete" => self.begin(chat, Flow::Delete).await,
            "info" => self.begin(chat, Flow::Info).await,
            "list" => self.show_list(chat).await,
            "help" => self.say(chat, &help_text()).await,
            "cancel" => self.cancel(chat).await,
            other => {
                debug!(action = other, "ignoring unknown menu action");
                Ok(())
            }
        }
    }

    async fn begin(&self, chat: ChatId, flow: Flow) -> Result<()> {
        self.sessions.lock().await.begin(chat, flow);
        let title = match flow {
            Flow::Create => "Create account",
            Flow::Renew => "Renew account",
            Flow::Delete => "Delete account",
            Flow::Info => "Account info",
        };
        self.ask(chat, &format!("<b>{title}</b>\n\nSend the username:"))
            .await
    }

    async fn cancel(&self, chat: ChatId) -> Result<()> {
        let had_flow = self.sessions.lock().await.cancel(chat);
        if had_flow {
            self.say(chat, "Cancelled.").await
        } else {
            self.say(chat, "Nothing to cancel.").await
        }
    }

    async fn run(&self, chat: ChatId, req: Request) -> Result<()> {
        info!(chat = chat.0, request = ?req, "running account request");
        match req {
            Request::Create { username, days } => {
                let res = self.service.create(&username, days, None).await;
                self.reply_account(chat, "✅ Account created", res).await
            }
            Request::Renew { username, days } => {
                let res = self.service.renew(&username, days).await;
                self.reply_account(chat, "🔄 Account renewed", res).await
            }
            Request::Info { username } => {
                let res = self.service.get(&username).await;
                self.reply_account(chat, "Account info", res).await
            }
            Request::Delete { username } => match self.service.delete(&username).await {
                Ok(()) => {
                    self.say(
                        chat,
                        &format!("🗑 Deleted <code>{}</code>", escape_html(&username)),
                    )
                    .await
                }
                Err(e) => self.say(chat, &error_line(&e)).await,
            },
        }
    }

    async fn reply_account(
        &self,
        chat: ChatId,
        title: &str,
        res: AccountResult<Account>,
    ) -> Result<()> {
        match res {
            Ok(account) => {
                let html = account_card(title, &account, self.clock.today());
                self.say(chat, &html).await
            }
            Err(e) => self.say(chat, &error_line(&e)).await,
        }
    }

    async fn show_list(&self, chat: ChatId) -> Result<()> {
        match self.service.list().await {
            Ok(accounts) => self.say(chat, &account_list(&accounts)).await,
            Err(e) => self.say(chat, &error_line(&e)).await,
        }
    }

    async fn show_sweep(&self, chat: ChatId) -> Result<()> {
        match self.service.sweep_expired().await {
            Ok(report) => self.say(chat, &sweep_summary(&report, &[])).await,
            Err(e) => self.say(chat, &error_line(&e)).await,
        }
    }

    async fn send_menu(&self, chat: ChatId) -> Result<()> {
        self.messenger
            .send_inline_keyboard(chat, MENU_TITLE, menu_keyboard())
            .await
            .map(|_| ())
    }

    async fn say(&self, chat: ChatId, html: &str) -> Result<()> {
        self.messenger.send_html(chat, html).await.map(|_| ())
    }

    /// Prompt inside a flow, with a Cancel button.
    async fn ask(&self, chat: ChatId, html: &str) -> Result<()> {
        self.messenger
            .send_inline_keyboard(chat, html, cancel_keyboard())
            .await
            .map(|_| ())
    }
}

pub fn menu_keyboard() -> InlineKeyboard {
    InlineKeyboard::grid(
        vec![
            InlineButton::new("➕ Create", "menu:create"),
            InlineButton::new("🔄 Renew", "menu:renew"),
            InlineButton::new("🗑 Delete", "menu:delete"),
            InlineButton::new("🔍 Info", "menu:info"),
            InlineButton::new("📋 List", "menu:list"),
            InlineButton::new("❓ Help", "menu:help"),
        ],
        2,
    )
}

pub fn cancel_keyboard() -> InlineKeyboard {
    InlineKeyboard::new(vec![vec![InlineButton::new("✖ Cancel", "menu:cancel")]])
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, time::Duration};

    use async_trait::async_trait;
    use chrono::NaiveDate;

    use super::*;
    use crate::{
        calendar::FixedClock,
        domain::{MessageId, MessageRef},
        store::AccountStore,
    };

    const ADMIN: i64 = 42;
    const CHAT: ChatId = ChatId(42);

    #[derive(Clone, Debug)]
    struct Sent {
        chat: ChatId,
        html: String,
        keyboard: Option<InlineKeyboard>,
    }

    #[derive(Default)]
    struct FakeMessenger {
        sent: std::sync::Mutex<Vec<Sent>>,
        answered: std::sync::Mutex<Vec<(String, Option<String>)>>,
    }

    impl FakeMessenger {
        fn last(&self) -> Sent {
            self.sent.lock().unwrap().last().cloned().unwrap()
        }

        fn count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl MessagingPort for FakeMessenger {
        async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
            let mut sent = self.sent.lock().unwrap();
            sent.push(Sent {
                chat: chat_id,
                html: html.to_string(),
                keyboard: None,
            });
            Ok(MessageRef {
                chat_id,
                message_id: MessageId(sent.len() as i32),
            })
        }

        async fn send_inline_keyboard(
            &self,
            chat_id: ChatId,
            html: &str,
            keyboard: InlineKeyboard,
        ) -> Result<MessageRef> {
            let mut sent = self.sent.lock().unwrap();
            sent.push(Sent {
                chat: chat_id,
                html: html.to_string(),
                keyboard: Some(keyboard),
            });
            Ok(MessageRef {
                chat_id,
                message_id: MessageId(sent.len() as i32),
            })
        }

        async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
            self.answered
                .lock()
                .unwrap()
                .push((callback_id.to_string(), text.map(str::to_string)));
            Ok(())
        }
    }

    struct Harness {
        bot: BotController,
        messenger: Arc<FakeMessenger>,
        store: Arc<AccountStore>,
        dir: PathBuf,
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    fn harness_with(mode: AccessMode, limiter: RateLimiter) -> Harness {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let dir = PathBuf::from(format!("/tmp/zvm-bot-{}-{ts}", std::process::id()));
        let clock = Arc::new(FixedClock::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        ));
        let store = Arc::new(AccountStore::new(dir.join("users.json"), clock.clone()));
        let messenger = Arc::new(FakeMessenger::default());
        let bot = BotController::new(
            store.clone(),
            messenger.clone(),
            clock,
            AccessPolicy {
                mode,
                admins: vec![ADMIN],
            },
            SessionTable::new(Duration::from_secs(600)),
            limiter,
        );
        Harness {
            bot,
            messenger,
            store,
            dir,
        }
    }

    fn harness() -> Harness {
        harness_with(
            AccessMode::Private,
            RateLimiter::new(false, 0, Duration::from_secs(60)),
        )
    }

    fn text(user: i64, body: &str) -> IncomingUpdate {
        commands::classify(ChatId(user), Some(UserId(user)), body)
    }

    fn tap(user: i64, data: &str) -> IncomingUpdate {
        IncomingUpdate::Callback(CallbackQuery {
            chat_id: ChatId(user),
            user_id: Some(UserId(user)),
            callback_id: format!("cb-{data}"),
            data: data.to_string(),
        })
    }

    #[tokio::test]
    async fn one_shot_create_command() {
        let h = harness();
        h.bot.handle(text(ADMIN, "/create alice 30")).await.unwrap();

        let reply = h.messenger.last();
        assert_eq!(reply.chat, CHAT);
        assert!(reply.html.contains("Account created"));
        assert!(reply.html.contains("Expires: 2024-01-31"));
        assert_eq!(h.store.get("alice").await.unwrap().secret, "alice");
    }

    #[tokio::test]
    async fn create_with_explicit_password() {
        let h = harness();
        h.bot
            .handle(text(ADMIN, "/create alice 30 hunter2"))
            .await
            .unwrap();
        assert_eq!(h.store.get("alice").await.unwrap().secret, "hunter2");
    }

    #[tokio::test]
    async fn command_errors_are_reported_in_chat() {
        let h = harness();
        h.bot.handle(text(ADMIN, "/create al 30")).await.unwrap();
        assert!(h.messenger.last().html.contains("invalid username"));

        h.bot.handle(text(ADMIN, "/create alice many")).await.unwrap();
        assert!(h.messenger.last().html.contains("days must be"));

        h.bot.handle(text(ADMIN, "/renew ghost 5")).await.unwrap();
        assert!(h.messenger.last().html.contains("not found"));

        h.bot.handle(text(ADMIN, "/create alice")).await.unwrap();
        assert!(h.messenger.last().html.starts_with("Usage:"));
    }

    #[tokio::test]
    async fn menu_driven_create_flow() {
        let h = harness();
        h.bot.handle(text(ADMIN, "/menu")).await.unwrap();
        let menu = h.messenger.last().keyboard.unwrap();
        assert!(menu.callbacks().any(|c| c == "menu:create"));

        h.bot.handle(tap(ADMIN, "menu:create")).await.unwrap();
        assert!(h.messenger.last().html.contains("Send the username"));
        assert_eq!(h.messenger.answered.lock().unwrap().len(), 1);

        h.bot.handle(text(ADMIN, "bob")).await.unwrap();
        assert!(h.messenger.last().html.contains("How many days"));

        h.bot.handle(text(ADMIN, "soon")).await.unwrap();
        assert!(h.messenger.last().html.contains("positive number"));

        h.bot.handle(text(ADMIN, "7")).await.unwrap();
        assert!(h.messenger.last().html.contains("Account created"));
        assert_eq!(
            h.store.get("bob").await.unwrap().expires_on,
            NaiveDate::from_ymd_opt(2024, 1, 8).unwrap()
        );

        // Flow is over; plain text no longer feeds it.
        h.bot.handle(text(ADMIN, "9")).await.unwrap();
        assert!(h.messenger.last().html.contains("/menu"));
    }

    #[tokio::test]
    async fn cancel_button_resets_the_flow() {
        let h = harness();
        h.bot.handle(tap(ADMIN, "menu:renew")).await.unwrap();
        h.bot.handle(tap(ADMIN, "menu:cancel")).await.unwrap();
        assert_eq!(h.messenger.last().html, "Cancelled.");

        h.bot.handle(text(ADMIN, "/cancel")).await.unwrap();
        assert_eq!(h.messenger.last().html, "Nothing to cancel.");
    }

    #[tokio::test]
    async fn delete_info_and_list() {
        let h = harness();
        h.store.create("carol", 10, None).await.unwrap();
        h.store.create("dave", 10, None).await.unwrap();

        h.bot.handle(text(ADMIN, "/info carol")).await.unwrap();
        assert!(h.messenger.last().html.contains("<code>carol</code>"));

        h.bot.handle(tap(ADMIN, "menu:delete")).await.unwrap();
        h.bot.handle(text(ADMIN, "carol")).await.unwrap();
        assert!(h.messenger.last().html.contains("Deleted"));
        assert!(h.store.get("carol").await.is_err());

        h.bot.handle(text(ADMIN, "/list")).await.unwrap();
        let list = h.messenger.last().html;
        assert!(list.contains("Accounts (1)"));
        assert!(list.contains("dave"));
    }

    #[tokio::test]
    async fn sweep_command_summarises() {
        let h = harness();
        h.bot.handle(text(ADMIN, "/sweep")).await.unwrap();
        assert!(h.messenger.last().html.contains("Checked: 0"));
    }

    #[tokio::test]
    async fn private_mode_rejects_strangers() {
        let h = harness();
        h.bot.handle(text(7, "/list")).await.unwrap();
        assert_eq!(h.messenger.last().html, UNAUTHORIZED);

        h.bot.handle(tap(7, "menu:create")).await.unwrap();
        let answered = h.messenger.answered.lock().unwrap().clone();
        assert_eq!(answered.last().unwrap().1.as_deref(), Some("Unauthorized"));
        assert!(h.store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn textless_messages_pass_the_access_check_first() {
        let h = harness();
        h.bot.handle(text(7, "")).await.unwrap();
        assert_eq!(h.messenger.last().html, UNAUTHORIZED);

        h.bot.handle(text(ADMIN, "")).await.unwrap();
        assert!(h.messenger.last().html.contains("/menu"));

        // Mid-flow, a sticker is ignored rather than taken as the username.
        h.bot.handle(tap(ADMIN, "menu:info")).await.unwrap();
        let before = h.messenger.count();
        h.bot.handle(text(ADMIN, "")).await.unwrap();
        assert_eq!(h.messenger.count(), before);
    }

    #[tokio::test]
    async fn public_mode_admits_anyone() {
        let h = harness_with(
            AccessMode::Public,
            RateLimiter::new(false, 0, Duration::from_secs(60)),
        );
        h.bot.handle(text(7, "/create erin 3")).await.unwrap();
        assert!(h.store.get("erin").await.is_ok());
    }

    #[tokio::test]
    async fn rate_limited_users_are_told_to_wait() {
        let h = harness_with(
            AccessMode::Private,
            RateLimiter::new(true, 1, Duration::from_secs(60)),
        );
        h.bot.handle(text(ADMIN, "/help")).await.unwrap();
        let before = h.messenger.count();
        h.bot.handle(text(ADMIN, "/create frank 3")).await.unwrap();
        assert_eq!(h.messenger.count(), before + 1);
        assert!(h.messenger.last().html.contains("Rate limited"));
        assert!(h.store.get("frank").await.is_err());
    }
}
