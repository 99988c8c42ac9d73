use std::{sync::Arc, time::Duration};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use zvm_api::{ApiClient, AppState};
use zvm_core::{
    bot::{notifier::AdminNotifier, AccessPolicy, BotController},
    calendar::{Clock, ZonedClock},
    config::Config,
    messaging::port::MessagingPort,
    ports::AccountService,
    security::RateLimiter,
    session::SessionTable,
    store::AccountStore,
    sweeper::{ExpirySweeper, LogSweepListener},
    sync::AuthSync,
};
use zvm_telegram::{router::run_polling, Bot, TelegramMessenger};

#[derive(Parser, Debug)]
#[command(name = "zvm")]
#[command(about = "ZiVPN account manager: HTTP API, Telegram bot and expiry sweeps")]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Serve the account HTTP API
    Api {
        /// Override ZIVPN_API_PORT
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run the Telegram bot
    Bot {
        /// Use the users db directly instead of going through the API
        #[arg(long)]
        local: bool,
    },
    /// Run one sweep against the users db and exit
    Sweep {
        /// Also delete expired accounts
        #[arg(long)]
        purge: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    zvm_core::logging::init("zvm")?;

    let mut cfg = Config::load()?;
    match cli.command {
        Cmd::Api { port } => {
            if let Some(port) = port {
                cfg.api_port = port;
            }
            run_api(cfg).await
        }
        Cmd::Bot { local } => run_bot(cfg, local).await,
        Cmd::Sweep { purge } => run_sweep(cfg, purge).await,
    }
}

fn clock(cfg: &Config) -> Arc<dyn Clock> {
    Arc::new(ZonedClock::new(cfg.tz_offset))
}

fn open_store(cfg: &Config) -> Arc<AccountStore> {
    let mut store = AccountStore::new(&cfg.users_db, clock(cfg));
    if let Some(path) = &cfg.auth_config {
        store = store.with_auth_sync(
            AuthSync::new(path).with_reload_command(cfg.auth_reload_command.clone()),
        );
    }
    Arc::new(store)
}

async fn run_api(cfg: Config) -> anyhow::Result<()> {
    if cfg.uses_placeholder_key() {
        warn!("API key is the installer default; set ZIVPN_API_KEY or write /etc/zivpn/apikey");
    }
    let store = open_store(&cfg);
    info!(db = %cfg.users_db.display(), tz = %cfg.tz_offset, "users db ready");

    let cancel = CancellationToken::new();
    let sweeper = cfg.sweep_interval.map(|every| {
        ExpirySweeper::new(store.clone(), Arc::new(LogSweepListener), every)
            .with_purge(cfg.purge_expired)
            .spawn(cancel.clone())
    });

    let addr = cfg.api_listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let shutdown = {
        let cancel = cancel.clone();
        async move {
            let _ = tokio::signal::ctrl_c().await;
            cancel.cancel();
        }
    };
    zvm_api::serve(listener, AppState::new(store, cfg.api_key.clone()), shutdown).await?;

    cancel.cancel();
    if let Some(handle) = sweeper {
        let _ = handle.await;
    }
    Ok(())
}

async fn run_bot(cfg: Config, local: bool) -> anyhow::Result<()> {
    cfg.require_bot(local)?;

    let service: Arc<dyn AccountService> = if local {
        info!(db = %cfg.users_db.display(), "bot using the users db directly");
        open_store(&cfg)
    } else {
        info!(api = %cfg.api_url, "bot using the account api");
        Arc::new(ApiClient::new(&cfg.api_url, &cfg.api_key)?)
    };

    let bot = Bot::new(cfg.telegram_bot_token.clone());
    let messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));

    let cancel = CancellationToken::new();
    let notifier = cfg.expiry_notify_interval.map(|every| {
        let listener = Arc::new(AdminNotifier::new(messenger.clone(), cfg.admin_ids.clone()));
        ExpirySweeper::new(service.clone(), listener, every)
            .with_purge(cfg.purge_expired)
            .spawn(cancel.clone())
    });

    let controller = Arc::new(BotController::new(
        service,
        messenger,
        clock(&cfg),
        AccessPolicy {
            mode: cfg.bot_mode,
            admins: cfg.admin_ids.clone(),
        },
        SessionTable::new(cfg.session_idle),
        RateLimiter::new(
            cfg.rate_limit_enabled,
            cfg.rate_limit_requests,
            cfg.rate_limit_window,
        ),
    ));
    info!(mode = ?cfg.bot_mode, admins = cfg.admin_ids.len(), "starting telegram bot");

    let res = run_polling(bot, controller).await;

    cancel.cancel();
    if let Some(handle) = notifier {
        let _ = handle.await;
    }
    res
}

async fn run_sweep(cfg: Config, purge: bool) -> anyhow::Result<()> {
    let store = open_store(&cfg);
    let sweeper = ExpirySweeper::new(
        store,
        Arc::new(LogSweepListener),
        cfg.sweep_interval.unwrap_or(Duration::from_secs(3600)),
    )
    .with_purge(purge);

    let outcome = sweeper.run_once().await?;
    let r = &outcome.report;
    println!(
        "checked {} (active {}, expired {}); newly expired: {}",
        r.checked,
        r.active,
        r.expired,
        if r.newly_expired.is_empty() {
            "none".to_string()
        } else {
            r.newly_expired.join(", ")
        }
    );
    if purge {
        println!("removed: {}", outcome.purged.len());
    }
    Ok(())
}
