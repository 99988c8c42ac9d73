//! File-backed account store.
//!
//! The whole record set is the unit of durability: every operation reads the
//! full JSON file, applies at most one change and rewrites the full file. A
//! single async mutex is held across that read-modify-write, so concurrent
//! callers observe a strictly serial history and never a half-written file.

use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    calendar::{self, Clock},
    domain::{Account, AccountStatus, SweepReport},
    sync::{write_atomic, AuthSync},
    validation::{check_days, check_username},
    AccountError, AccountResult,
};

/// One entry of `users.json`, keyed by username.
///
/// Field names match the files written by earlier deployments of the API.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct StoredRecord {
    password: String,
    created: NaiveDate,
    expired: NaiveDate,
    /// Status as of the last write or sweep. Informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<AccountStatus>,
}

type RecordSet = BTreeMap<String, StoredRecord>;

pub struct AccountStore {
    path: PathBuf,
    clock: Arc<dyn Clock>,
    lock: Mutex<()>,
    auth_sync: Option<AuthSync>,
}

impl AccountStore {
    pub fn new(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            clock,
            lock: Mutex::new(()),
            auth_sync: None,
        }
    }

    /// Mirror active secrets into the proxy config after every committed write.
    pub fn with_auth_sync(mut self, sync: AuthSync) -> Self {
        self.auth_sync = Some(sync);
        self
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Create an account valid from today for `days` days.
    ///
    /// Without an explicit secret the username doubles as the password, which
    /// is how the proxy's clients log in.
    pub async fn create(
        &self,
        username: &str,
        days: i64,
        secret: Option<&str>,
    ) -> AccountResult<Account> {
        let username = username.trim();
        check_username(username)?;
        check_days(days)?;
        let secret = secret
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(username)
            .to_string();

        let _guard = self.lock.lock().await;
        let mut set = self.load().await?;
        if set.contains_key(username) {
            return Err(AccountError::AlreadyExists(username.to_string()));
        }

        let today = self.clock.today();
        let expires_on = calendar::add_days(today, days).ok_or(AccountError::InvalidDays)?;
        let record = StoredRecord {
            password: secret,
            created: today,
            expired: expires_on,
            status: Some(AccountStatus::Active),
        };
        set.insert(username.to_string(), record.clone());
        self.commit(&set, today).await?;

        info!(username, days, expires_on = %expires_on, "account created");
        Ok(to_account(username, &record, today))
    }

    /// Extend an account by `days`.
    ///
    /// Counting starts from the stored expiry while the account is active and
    /// from today once it has lapsed, so expired accounts never resume with
    /// days already burnt.
    pub async fn renew(&self, username: &str, days: i64) -> AccountResult<Account> {
        let username = username.trim();
        check_days(days)?;

        let _guard = self.lock.lock().await;
        let mut set = self.load().await?;
        let today = self.clock.today();
        let Some(record) = set.get_mut(username) else {
            return Err(AccountError::NotFound(username.to_string()));
        };

        let base = record.expired.max(today);
        let expires_on = calendar::add_days(base, days).ok_or(AccountError::InvalidDays)?;
        let previous = record.expired;
        record.expired = expires_on;
        record.status = Some(calendar::status(expires_on, today));
        let renewed = record.clone();
        self.commit(&set, today).await?;

        info!(
            username,
            days,
            previous = %previous,
            expires_on = %expires_on,
            "account renewed"
        );
        Ok(to_account(username, &renewed, today))
    }

    pub async fn delete(&self, username: &str) -> AccountResult<()> {
        let username = username.trim();

        let _guard = self.lock.lock().await;
        let mut set = self.load().await?;
        if set.remove(username).is_none() {
            return Err(AccountError::NotFound(username.to_string()));
        }
        self.commit(&set, self.clock.today()).await?;

        info!(username, "account deleted");
        Ok(())
    }

    pub async fn get(&self, username: &str) -> AccountResult<Account> {
        let username = username.trim();

        let _guard = self.lock.lock().await;
        let set = self.load().await?;
        let today = self.clock.today();
        set.get(username)
            .map(|r| to_account(username, r, today))
            .ok_or_else(|| AccountError::NotFound(username.to_string()))
    }

    /// All accounts, ordered by username.
    pub async fn list(&self) -> AccountResult<Vec<Account>> {
        let _guard = self.lock.lock().await;
        let set = self.load().await?;
        let today = self.clock.today();
        Ok(set
            .iter()
            .map(|(name, r)| to_account(name, r, today))
            .collect())
    }

    /// Report accounts that lapsed since the previous sweep. Never deletes.
    ///
    /// The last reported status lives in the file, so a flip is reported
    /// exactly once even across restarts.
    pub async fn sweep_expired(&self) -> AccountResult<SweepReport> {
        let _guard = self.lock.lock().await;
        let mut set = self.load().await?;
        let today = self.clock.today();

        let mut report = SweepReport {
            checked: set.len(),
            ..SweepReport::default()
        };
        let mut changed = false;
        for (name, record) in set.iter_mut() {
            let now = calendar::status(record.expired, today);
            match now {
                AccountStatus::Active => report.active += 1,
                AccountStatus::Expired => report.expired += 1,
            }
            if now == AccountStatus::Expired && record.status != Some(AccountStatus::Expired) {
                report.newly_expired.push(name.clone());
            }
            if record.status != Some(now) {
                record.status = Some(now);
                changed = true;
            }
        }

        if changed {
            self.commit(&set, today).await?;
        }
        if report.newly_expired.is_empty() {
            debug!(checked = report.checked, "sweep: nothing new expired");
        } else {
            info!(
                checked = report.checked,
                newly_expired = report.count(),
                "sweep: accounts expired"
            );
        }
        Ok(report)
    }

    /// Delete every expired account in one rewrite. Returns the removed names.
    pub async fn purge_expired(&self) -> AccountResult<Vec<String>> {
        let _guard = self.lock.lock().await;
        let mut set = self.load().await?;
        let today = self.clock.today();

        let removed: Vec<String> = set
            .iter()
            .filter(|(_, r)| calendar::status(r.expired, today) == AccountStatus::Expired)
            .map(|(name, _)| name.clone())
            .collect();
        if removed.is_empty() {
            return Ok(removed);
        }

        for name in &removed {
            set.remove(name);
        }
        self.commit(&set, today).await?;

        info!(count = removed.len(), "expired accounts purged");
        Ok(removed)
    }

    async fn load(&self) -> AccountResult<RecordSet> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(txt) if txt.trim().is_empty() => Ok(RecordSet::new()),
            Ok(txt) => serde_json::from_str(&txt).map_err(|e| {
                AccountError::Persist(format!("corrupt {}: {e}", self.path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RecordSet::new()),
            Err(e) => Err(AccountError::Persist(format!(
                "cannot read {}: {e}",
                self.path.display()
            ))),
        }
    }

    /// Rewrite the full set, then mirror it into the proxy config.
    ///
    /// Sync failures are logged only; the store write has already committed.
    async fn commit(&self, set: &RecordSet, today: NaiveDate) -> AccountResult<()> {
        let txt = serde_json::to_string_pretty(set).map_err(AccountError::persist)?;
        write_atomic(&self.path, txt.as_bytes()).await.map_err(|e| {
            warn!(path = %self.path.display(), error = %e, "users db write failed");
            AccountError::Persist(format!("cannot write {}: {e}", self.path.display()))
        })?;

        if let Some(sync) = &self.auth_sync {
            let secrets = active_secrets(set, today);
            if let Err(e) = sync.apply(&secrets).await {
                warn!(
                    path = %sync.config_path().display(),
                    error = %e,
                    "proxy auth sync failed"
                );
            }
        }
        Ok(())
    }
}

fn to_account(username: &str, r: &StoredRecord, today: NaiveDate) -> Account {
    Account {
        username: username.to_string(),
        secret: r.password.clone(),
        created_on: r.created,
        expires_on: r.expired,
        status: calendar::status(r.expired, today),
    }
}

fn active_secrets(set: &RecordSet, today: NaiveDate) -> Vec<String> {
    set.values()
        .filter(|r| calendar::status(r.expired, today) == AccountStatus::Active)
        .map(|r| r.password.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::{parse_date, FixedClock};

    fn tmp(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let pid = std::process::id();
        PathBuf::from(format!("/tmp/{prefix}-{pid}-{ts}"))
    }

    fn d(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    fn store_at(today: &str) -> (AccountStore, Arc<FixedClock>, PathBuf) {
        let dir = tmp("zvm-store");
        let clock = Arc::new(FixedClock::new(d(today)));
        let store = AccountStore::new(dir.join("users.json"), clock.clone());
        (store, clock, dir)
    }

    #[tokio::test]
    async fn create_then_get_spans_requested_days() {
        let (store, _clock, dir) = store_at("2024-03-10");

        let created = store.create("user1", 45, None).await.unwrap();
        let fetched = store.get("user1").await.unwrap();

        assert_eq!(created, fetched);
        assert_eq!(fetched.created_on, d("2024-03-10"));
        assert_eq!(fetched.expires_on, d("2024-04-24"));
        assert_eq!(fetched.status, AccountStatus::Active);
        assert_eq!(fetched.secret, "user1");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected_and_leaves_record_alone() {
        let (store, clock, dir) = store_at("2024-01-01");

        let first = store.create("alice", 30, Some("s3cret")).await.unwrap();
        clock.advance(3);
        let err = store.create("alice", 90, None).await.unwrap_err();
        assert_eq!(err, AccountError::AlreadyExists("alice".to_string()));

        let stored = store.get("alice").await.unwrap();
        assert_eq!(stored.secret, "s3cret");
        assert_eq!(stored.expires_on, first.expires_on);
        assert_eq!(stored.created_on, first.created_on);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn rejected_inputs() {
        let (store, _clock, dir) = store_at("2024-01-01");

        assert_eq!(
            store.create("ab", 10, None).await,
            Err(AccountError::InvalidUsername)
        );
        assert_eq!(
            store.create("user1", 0, None).await,
            Err(AccountError::InvalidDays)
        );
        assert_eq!(
            store.create("user1", 4000, None).await,
            Err(AccountError::InvalidDays)
        );
        assert_eq!(
            store.renew("user1", 0).await,
            Err(AccountError::InvalidDays)
        );
        assert!(store.list().await.unwrap().is_empty());
        assert!(!store.path().exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn renew_active_account_accumulates_remaining_time() {
        let (store, clock, dir) = store_at("2024-01-01");

        let before = store.create("bob", 30, None).await.unwrap();
        clock.advance(10);
        let after = store.renew("bob", 15).await.unwrap();

        assert_eq!(after.expires_on, before.expires_on + chrono::Days::new(15));
        assert_eq!(after.created_on, before.created_on);
        assert_eq!(after.status, AccountStatus::Active);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn renew_on_expiry_day_extends_from_stored_date() {
        let (store, clock, dir) = store_at("2024-01-01");

        store.create("carol", 5, None).await.unwrap();
        clock.set(d("2024-01-06"));
        let renewed = store.renew("carol", 1).await.unwrap();
        assert_eq!(renewed.expires_on, d("2024-01-07"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn alice_scenario() {
        let (store, clock, dir) = store_at("2024-01-01");

        let alice = store.create("alice", 30, None).await.unwrap();
        assert_eq!(alice.created_on, d("2024-01-01"));
        assert_eq!(alice.expires_on, d("2024-01-31"));
        assert_eq!(alice.status, AccountStatus::Active);

        clock.set(d("2024-02-05"));
        assert_eq!(
            store.get("alice").await.unwrap().status,
            AccountStatus::Expired
        );

        let renewed = store.renew("alice", 10).await.unwrap();
        assert_eq!(renewed.expires_on, d("2024-02-15"));
        assert_eq!(renewed.status, AccountStatus::Active);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn renew_and_delete_unknown_user() {
        let (store, _clock, dir) = store_at("2024-01-01");

        assert_eq!(
            store.renew("ghost", 5).await,
            Err(AccountError::NotFound("ghost".to_string()))
        );
        assert_eq!(
            store.delete("ghost").await,
            Err(AccountError::NotFound("ghost".to_string()))
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let (store, _clock, dir) = store_at("2024-01-01");

        store.create("dave", 3, None).await.unwrap();
        store.create("erin", 3, None).await.unwrap();
        store.delete("dave").await.unwrap();

        assert_eq!(
            store.get("dave").await,
            Err(AccountError::NotFound("dave".to_string()))
        );
        assert_eq!(store.list().await.unwrap().len(), 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn list_is_sorted_with_status_from_today() {
        let (store, clock, dir) = store_at("2024-01-01");

        store.create("zed", 10, None).await.unwrap();
        store.create("amy", 2, None).await.unwrap();
        store.create("mia", 5, None).await.unwrap();
        clock.set(d("2024-01-04"));

        let all = store.list().await.unwrap();
        let names: Vec<_> = all.iter().map(|a| a.username.as_str()).collect();
        assert_eq!(names, vec!["amy", "mia", "zed"]);
        for a in &all {
            assert_eq!(a.status, calendar::status(a.expires_on, clock.today()));
        }
        assert_eq!(all[0].status, AccountStatus::Expired);
        assert_eq!(all[1].status, AccountStatus::Active);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_are_all_kept() {
        let (store, _clock, dir) = store_at("2024-01-01");
        let store = Arc::new(store);

        let names = ["user_a", "user_b", "user_c", "user_d", "user_e"];
        let handles: Vec<_> = names
            .iter()
            .map(|name| {
                let store = store.clone();
                let name = name.to_string();
                tokio::spawn(async move { store.create(&name, 7, None).await })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), names.len());
        for name in names {
            assert!(all.iter().any(|a| a.username == name));
        }

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn sweep_reports_each_flip_once_and_keeps_records() {
        let (store, clock, dir) = store_at("2024-01-01");

        store.create("short", 1, None).await.unwrap();
        store.create("long", 30, None).await.unwrap();

        let first = store.sweep_expired().await.unwrap();
        assert_eq!(first.count(), 0);
        assert_eq!(first.active, 2);

        clock.set(d("2024-01-05"));
        let second = store.sweep_expired().await.unwrap();
        assert_eq!(second.newly_expired, vec!["short".to_string()]);
        assert_eq!(second.expired, 1);
        assert_eq!(second.checked, 2);

        let third = store.sweep_expired().await.unwrap();
        assert_eq!(third.count(), 0);
        assert_eq!(third.expired, 1);
        assert_eq!(store.list().await.unwrap().len(), 2);

        // Renewal re-arms the flip.
        store.renew("short", 1).await.unwrap();
        clock.set(d("2024-01-07"));
        let fourth = store.sweep_expired().await.unwrap();
        assert_eq!(fourth.newly_expired, vec!["short".to_string()]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn purge_removes_only_expired() {
        let (store, clock, dir) = store_at("2024-01-01");

        store.create("old_one", 1, None).await.unwrap();
        store.create("old_two", 2, None).await.unwrap();
        store.create("fresh", 30, None).await.unwrap();
        clock.set(d("2024-01-10"));

        let removed = store.purge_expired().await.unwrap();
        assert_eq!(removed, vec!["old_one".to_string(), "old_two".to_string()]);
        let left = store.list().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].username, "fresh");

        assert!(store.purge_expired().await.unwrap().is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn file_layout_is_username_keyed_object() {
        let (store, _clock, dir) = store_at("2024-01-01");

        store.create("alice", 30, Some("pw")).await.unwrap();
        let raw = std::fs::read_to_string(store.path()).unwrap();
        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            v,
            serde_json::json!({
                "alice": {
                    "password": "pw",
                    "created": "2024-01-01",
                    "expired": "2024-01-31",
                    "status": "active"
                }
            })
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn reads_legacy_records_without_status() {
        let (store, _clock, dir) = store_at("2024-01-10");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            store.path(),
            r#"{"legacy":{"password":"legacy","created":"2024-01-01","expired":"2024-01-05"}}"#,
        )
        .unwrap();

        let a = store.get("legacy").await.unwrap();
        assert_eq!(a.status, AccountStatus::Expired);
        assert_eq!(store.sweep_expired().await.unwrap().count(), 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn corrupt_file_fails_without_being_overwritten() {
        let (store, _clock, dir) = store_at("2024-01-01");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(store.path(), "{not json").unwrap();

        assert!(matches!(
            store.create("alice", 1, None).await,
            Err(AccountError::Persist(_))
        ));
        assert!(matches!(store.list().await, Err(AccountError::Persist(_))));
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), "{not json");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn failed_write_keeps_last_good_file() {
        let (store, _clock, dir) = store_at("2024-01-01");
        store.create("alice", 30, None).await.unwrap();
        let before = std::fs::read(store.path()).unwrap();

        // A directory in the temp file's place makes the write itself fail.
        std::fs::create_dir_all(dir.join("users.json.tmp")).unwrap();

        assert!(matches!(
            store.create("bob", 30, None).await,
            Err(AccountError::Persist(_))
        ));
        assert_eq!(std::fs::read(store.path()).unwrap(), before);
        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].username, "alice");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn commits_mirror_active_secrets_into_proxy_config() {
        let (store, clock, dir) = store_at("2024-01-01");
        std::fs::create_dir_all(&dir).unwrap();
        let proxy = dir.join("config.json");
        std::fs::write(&proxy, r#"{"auth":{"mode":"passwords","config":[]}}"#).unwrap();
        let store = store.with_auth_sync(AuthSync::new(&proxy));

        store.create("alice", 1, Some("a-pass")).await.unwrap();
        store.create("bob", 30, None).await.unwrap();
        let read = || -> serde_json::Value {
            serde_json::from_str(&std::fs::read_to_string(&proxy).unwrap()).unwrap()
        };
        assert_eq!(read()["auth"]["config"], serde_json::json!(["a-pass", "bob"]));

        clock.set(d("2024-01-03"));
        store.sweep_expired().await.unwrap();
        assert_eq!(read()["auth"]["config"], serde_json::json!(["bob"]));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
