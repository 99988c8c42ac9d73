//! Telegram HTML rendering for accounts, lists and sweep reports.

use chrono::NaiveDate;

use crate::{
    calendar::format_date,
    domain::{Account, SweepReport},
    AccountError,
};

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn status_icon(account: &Account) -> &'static str {
    if account.is_active() {
        "🟢"
    } else {
        "🔴"
    }
}

/// Detail card for a single account.
pub fn account_card(title: &str, account: &Account, today: NaiveDate) -> String {
    let remaining = if account.is_active() {
        format!("{} day(s)", account.days_left(today))
    } else {
        "expired".to_string()
    };
    format!(
        "<b>{}</b>\n\nUser: <code>{}</code>\nPassword: <code>{}</code>\nCreated: {}\nExpires: {}\nRemaining: {}\nStatus: {} {}",
        escape_html(title),
        escape_html(&account.username),
        escape_html(&account.secret),
        format_date(account.created_on),
        format_date(account.expires_on),
        remaining,
        status_icon(account),
        account.status,
    )
}

/// Compact listing, one account per line.
pub fn account_list(accounts: &[Account]) -> String {
    if accounts.is_empty() {
        return "No accounts yet.".to_string();
    }

    let active = accounts.iter().filter(|a| a.is_active()).count();
    let mut lines = vec![format!(
        "<b>Accounts ({})</b> · {} active · {} expired\n",
        accounts.len(),
        active,
        accounts.len() - active
    )];
    for a in accounts {
        lines.push(format!(
            "{} <code>{}</code> · {}",
            status_icon(a),
            escape_html(&a.username),
            format_date(a.expires_on)
        ));
    }
    lines.join("\n")
}

pub fn sweep_summary(report: &SweepReport, purged: &[String]) -> String {
    let mut out = format!(
        "<b>Sweep</b>\n\nChecked: {}\nActive: {}\nExpired: {}",
        report.checked, report.active, report.expired
    );
    if report.newly_expired.is_empty() {
        out.push_str("\nNewly expired: none");
    } else {
        out.push_str(&format!(
            "\nNewly expired ({}): {}",
            report.count(),
            join_codes(&report.newly_expired)
        ));
    }
    if !purged.is_empty() {
        out.push_str(&format!(
            "\nRemoved ({}): {}",
            purged.len(),
            join_codes(purged)
        ));
    }
    out
}

/// Admin notice for accounts that just expired. `None` when nothing flipped.
pub fn expiry_notice(report: &SweepReport) -> Option<String> {
    if report.newly_expired.is_empty() {
        return None;
    }
    Some(format!(
        "⏰ <b>{} account(s) expired</b>\n\n{}",
        report.count(),
        join_codes(&report.newly_expired)
    ))
}

pub fn error_line(err: &AccountError) -> String {
    format!("❌ {}", escape_html(&err.to_string()))
}

pub fn help_text() -> String {
    [
        "<b>ZiVPN account manager</b>",
        "",
        "/menu - open the button menu",
        "/create &lt;user&gt; &lt;days&gt; [password] - new account",
        "/renew &lt;user&gt; &lt;days&gt; - extend an account",
        "/delete &lt;user&gt; - remove an account",
        "/info &lt;user&gt; - show one account",
        "/list - show all accounts",
        "/sweep - report expired accounts",
        "/cancel - abort the current step",
        "",
        "Usernames: 3-32 chars of a-z, A-Z, 0-9, _. Days: 1-3650.",
    ]
    .join("\n")
}

fn join_codes(names: &[String]) -> String {
    names
        .iter()
        .map(|n| format!("<code>{}</code>", escape_html(n)))
        .collect::<Vec<_>>()
        .join(", ")
}
