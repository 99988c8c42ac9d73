//! Periodic expiry sweep.
//!
//! Runs `sweep_expired` (and optionally `purge_expired`) on a fixed interval
//! until its cancellation token fires. Each pass is handed to a
//! [`SweepListener`]; the API process logs it, the bot tells the admins.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{domain::SweepReport, ports::AccountService, AccountResult};

/// One completed sweep pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub report: SweepReport,
    /// Usernames deleted by the purge step (empty when purging is off).
    pub purged: Vec<String>,
}

#[async_trait]
pub trait SweepListener: Send + Sync {
    async fn on_sweep(&self, outcome: &SweepOutcome);
}

/// Writes each pass to the log.
pub struct LogSweepListener;

#[async_trait]
impl SweepListener for LogSweepListener {
    async fn on_sweep(&self, outcome: &SweepOutcome) {
        let r = &outcome.report;
        if r.newly_expired.is_empty() && outcome.purged.is_empty() {
            info!(checked = r.checked, expired = r.expired, "sweep: nothing new");
            return;
        }
        info!(
            checked = r.checked,
            expired = r.expired,
            newly_expired = ?r.newly_expired,
            purged = ?outcome.purged,
            "sweep finished"
        );
    }
}

#[derive(Clone)]
pub struct ExpirySweeper {
    service: Arc<dyn AccountService>,
    listener: Arc<dyn SweepListener>,
    interval: Duration,
    purge: bool,
}

impl ExpirySweeper {
    pub fn new(
        service: Arc<dyn AccountService>,
        listener: Arc<dyn SweepListener>,
        interval: Duration,
    ) -> Self {
        Self {
            service,
            listener,
            interval,
            purge: false,
        }
    }

    /// Also delete expired accounts after each sweep.
    pub fn with_purge(mut self, purge: bool) -> Self {
        self.purge = purge;
        self
    }

    /// A single pass: sweep, optional purge, notify.
    pub async fn run_once(&self) -> AccountResult<SweepOutcome> {
        let report = self.service.sweep_expired().await?;
        let purged = if self.purge {
            self.service.purge_expired().await?
        } else {
            Vec::new()
        };
        let outcome = SweepOutcome { report, purged };
        self.listener.on_sweep(&outcome).await;
        Ok(outcome)
    }

    /// Spawn the sweep loop. The first pass runs immediately.
    pub fn spawn(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let sweeper = self.clone();
        tokio::spawn(async move { sweeper.run_loop(cancel).await })
    }

    async fn run_loop(&self, cancel: CancellationToken) {
        info!(
            every_secs = self.interval.as_secs(),
            purge = self.purge,
            "expiry sweeper started"
        );
        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
              _ = cancel.cancelled() => break,
              _ = tick.tick() => {
                if let Err(e) = self.run_once().await {
                  warn!(error = %e, "sweep failed");
                }
              }
            }
        }
        info!("expiry sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, sync::Mutex};

    use chrono::NaiveDate;

    use super::*;
    use crate::{calendar::FixedClock, store::AccountStore};

    fn tmp(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let pid = std::process::id();
        PathBuf::from(format!("/tmp/{prefix}-{pid}-{ts}/users.json"))
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<SweepOutcome>>,
    }

    #[async_trait]
    impl SweepListener for Recorder {
        async fn on_sweep(&self, outcome: &SweepOutcome) {
            self.seen.lock().unwrap().push(outcome.clone());
        }
    }

    fn setup() -> (Arc<FixedClock>, Arc<AccountStore>, PathBuf) {
        let clock = Arc::new(FixedClock::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        ));
        let path = tmp("zvm-sweeper");
        let store = Arc::new(AccountStore::new(&path, clock.clone()));
        (clock, store, path)
    }

    #[tokio::test]
    async fn run_once_reports_and_optionally_purges() {
        let (clock, store, path) = setup();
        store.create("alice", 1, None).await.unwrap();
        store.create("bob", 30, None).await.unwrap();
        clock.advance(2);

        let rec = Arc::new(Recorder::default());
        let sweeper = ExpirySweeper::new(store.clone(), rec.clone(), Duration::from_secs(60));
        let out = sweeper.run_once().await.unwrap();
        assert_eq!(out.report.newly_expired, vec!["alice".to_string()]);
        assert!(out.purged.is_empty());
        assert!(store.get("alice").await.is_ok());

        let purging = sweeper.clone().with_purge(true);
        let out = purging.run_once().await.unwrap();
        assert!(out.report.newly_expired.is_empty());
        assert_eq!(out.purged, vec!["alice".to_string()]);
        assert!(store.get("alice").await.is_err());

        assert_eq!(rec.seen.lock().unwrap().len(), 2);
        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[tokio::test]
    async fn loop_runs_until_cancelled() {
        let (_clock, store, path) = setup();
        let rec = Arc::new(Recorder::default());
        let sweeper = ExpirySweeper::new(store, rec.clone(), Duration::from_millis(20));

        let cancel = CancellationToken::new();
        let handle = sweeper.spawn(cancel.clone());
        tokio::time::sleep(Duration::from_millis(70)).await;
        cancel.cancel();
        handle.await.unwrap();

        let passes = rec.seen.lock().unwrap().len();
        assert!(passes >= 1, "expected at least one pass, got {passes}");
        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}
