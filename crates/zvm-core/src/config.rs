use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::FixedOffset;
use serde::Deserialize;
use tracing::warn;

use crate::{
    calendar::{parse_offset, ZonedClock},
    errors::Error,
    security::{AccessMode, PLACEHOLDER_API_KEY},
    Result,
};

const DEFAULT_USERS_DB: &str = "/etc/zivpn/users.json";
const DEFAULT_API_KEY_FILE: &str = "/etc/zivpn/apikey";
const DEFAULT_BOT_CONFIG: &str = "/etc/zivpn/bot-config.json";
const DEFAULT_API_PORT: u16 = 8080;

/// Typed configuration shared by every `zvm` subcommand.
#[derive(Clone, Debug)]
pub struct Config {
    // Store
    pub users_db: PathBuf,
    pub tz_offset: FixedOffset,

    // HTTP API
    pub api_key: String,
    pub api_bind: String,
    pub api_port: u16,
    pub api_url: String,

    // Proxy sync
    pub auth_config: Option<PathBuf>,
    pub auth_reload_command: Vec<String>,

    // Sweeper
    pub sweep_interval: Option<Duration>,
    pub purge_expired: bool,

    // Telegram
    pub telegram_bot_token: String,
    pub admin_ids: Vec<i64>,
    pub bot_mode: AccessMode,
    pub session_idle: Duration,
    pub expiry_notify_interval: Option<Duration>,

    // Rate limiting
    pub rate_limit_enabled: bool,
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,
}

/// Bot settings written by the installer script.
#[derive(Debug, Default, Deserialize)]
struct BotFile {
    #[serde(default)]
    bot_token: String,
    #[serde(default)]
    admin_id: i64,
    #[serde(default)]
    mode: String,
    #[serde(default)]
    api_port: Option<u16>,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Env-less tests go through here.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let vars = Vars(&get);

        let bot_file_path = vars
            .path("ZIVPN_BOT_CONFIG")
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BOT_CONFIG));
        let bot_file = read_bot_file(&bot_file_path)?;

        let users_db = vars
            .path("ZIVPN_USERS_DB")
            .unwrap_or_else(|| PathBuf::from(DEFAULT_USERS_DB));
        let tz_offset = match vars.str("ZIVPN_TZ_OFFSET").and_then(non_empty) {
            Some(raw) => parse_offset(&raw)?,
            None => ZonedClock::default().offset(),
        };

        // API
        let api_key = resolve_api_key(&vars)?;
        let api_bind = vars
            .str("ZIVPN_API_BIND")
            .and_then(non_empty)
            .unwrap_or_else(|| "0.0.0.0".to_string());
        let api_port = match vars.str("ZIVPN_API_PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| Error::Config(format!("ZIVPN_API_PORT is not a port: {raw}")))?,
            None => bot_file.api_port.unwrap_or(DEFAULT_API_PORT),
        };
        let api_url = vars
            .str("ZIVPN_API_URL")
            .and_then(non_empty)
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("http://127.0.0.1:{api_port}/api"));

        // Proxy sync
        let auth_config = vars.path("ZIVPN_AUTH_CONFIG");
        let auth_reload_command = vars
            .str("ZIVPN_AUTH_RELOAD_CMD")
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        // Sweeper
        let sweep_interval = vars.secs("ZIVPN_SWEEP_INTERVAL_SECS");
        let purge_expired = vars.bool("ZIVPN_PURGE_EXPIRED").unwrap_or(false);

        // Telegram (env wins over the installer's JSON)
        let telegram_bot_token = vars
            .str("TELEGRAM_BOT_TOKEN")
            .and_then(non_empty)
            .unwrap_or(bot_file.bot_token);
        let mut admin_ids = parse_csv_i64(vars.str("TELEGRAM_ADMIN_IDS"));
        if admin_ids.is_empty() && bot_file.admin_id != 0 {
            admin_ids.push(bot_file.admin_id);
        }
        let raw_mode = vars.str("BOT_MODE").unwrap_or(bot_file.mode);
        let bot_mode = AccessMode::parse(&raw_mode).ok_or_else(|| {
            Error::Config(format!("BOT_MODE must be private or public: {raw_mode}"))
        })?;
        let session_idle = Duration::from_secs(vars.u64("BOT_SESSION_IDLE_SECS").unwrap_or(600));
        let expiry_notify_interval = vars.secs("BOT_EXPIRY_NOTIFY_SECS");

        // Rate limiting
        let rate_limit_enabled = vars.bool("RATE_LIMIT_ENABLED").unwrap_or(true);
        let rate_limit_requests = vars.u32("RATE_LIMIT_REQUESTS").unwrap_or(20);
        let rate_limit_window = Duration::from_secs(vars.u64("RATE_LIMIT_WINDOW").unwrap_or(60));

        Ok(Self {
            users_db,
            tz_offset,
            api_key,
            api_bind,
            api_port,
            api_url,
            auth_config,
            auth_reload_command,
            sweep_interval,
            purge_expired,
            telegram_bot_token,
            admin_ids,
            bot_mode,
            session_idle,
            expiry_notify_interval,
            rate_limit_enabled,
            rate_limit_requests,
            rate_limit_window,
        })
    }

    /// Check the settings only the chat bot needs.
    ///
    /// `local` is true when the bot opens the users db itself. Over the API,
    /// an expiry notifier next to the API's own sweeper would race it for the
    /// one-time status flip, so that pairing is refused.
    pub fn require_bot(&self, local: bool) -> Result<()> {
        if self.telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }
        if self.bot_mode == AccessMode::Private && self.admin_ids.is_empty() {
            return Err(Error::Config(
                "TELEGRAM_ADMIN_IDS is required in private mode".to_string(),
            ));
        }
        if !local && self.expiry_notify_interval.is_some() && self.sweep_interval.is_some() {
            return Err(Error::Config(
                "BOT_EXPIRY_NOTIFY_SECS and ZIVPN_SWEEP_INTERVAL_SECS both set; \
                 run a single sweeper (unset one, or use the bot with --local)"
                    .to_string(),
            ));
        }
        Ok(())
    }

    pub fn api_listen_addr(&self) -> String {
        format!("{}:{}", self.api_bind, self.api_port)
    }

    pub fn uses_placeholder_key(&self) -> bool {
        self.api_key == PLACEHOLDER_API_KEY
    }
}

struct Vars<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Vars<'_> {
    fn str(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn path(&self, key: &str) -> Option<PathBuf> {
        self.str(key).and_then(non_empty).map(PathBuf::from)
    }

    fn bool(&self, key: &str) -> Option<bool> {
        self.str(key).map(|s| {
            matches!(
                s.trim().to_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
    }

    fn u64(&self, key: &str) -> Option<u64> {
        self.str(key).and_then(|s| s.trim().parse::<u64>().ok())
    }

    fn u32(&self, key: &str) -> Option<u32> {
        self.str(key).and_then(|s| s.trim().parse::<u32>().ok())
    }

    /// Positive number of seconds; zero or unset disables.
    fn secs(&self, key: &str) -> Option<Duration> {
        self.u64(key).filter(|s| *s > 0).map(Duration::from_secs)
    }
}

fn resolve_api_key(vars: &Vars<'_>) -> Result<String> {
    if let Some(key) = vars.str("ZIVPN_API_KEY").and_then(non_empty) {
        return Ok(key.trim().to_string());
    }

    let path = vars
        .path("ZIVPN_API_KEY_FILE")
        .unwrap_or_else(|| PathBuf::from(DEFAULT_API_KEY_FILE));
    match fs::read_to_string(&path) {
        Ok(raw) if !raw.trim().is_empty() => return Ok(raw.trim().to_string()),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(Error::InvalidPath {
                path,
                reason: format!("cannot read api key: {e}"),
            })
        }
    }

    warn!(
        path = %path.display(),
        "no API key configured, falling back to the default key"
    );
    Ok(PLACEHOLDER_API_KEY.to_string())
}

fn read_bot_file(path: &Path) -> Result<BotFile> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BotFile::default()),
        Err(e) => return Err(e.into()),
    };
    if raw.trim().is_empty() {
        return Ok(BotFile::default());
    }
    serde_json::from_str(&raw).map_err(|e| Error::InvalidPath {
        path: path.to_path_buf(),
        reason: format!("invalid bot config: {e}"),
    })
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        env::set_var(key, strip_quotes(v.trim()));
    }
}

fn strip_quotes(val: &str) -> &str {
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return &val[1..val.len() - 1];
    }
    val
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
