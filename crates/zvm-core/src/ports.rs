use async_trait::async_trait;

use crate::{
    domain::{Account, SweepReport},
    store::AccountStore,
    AccountResult,
};

/// Operation contract of the account store.
///
/// Implemented by the local [`AccountStore`] and by the HTTP API client, so
/// the chat bot and the sweeper do not care which side of the wire they are on.
#[async_trait]
pub trait AccountService: Send + Sync {
    async fn create(&self, username: &str, days: i64, secret: Option<&str>)
        -> AccountResult<Account>;
    async fn renew(&self, username: &str, days: i64) -> AccountResult<Account>;
    async fn delete(&self, username: &str) -> AccountResult<()>;
    async fn get(&self, username: &str) -> AccountResult<Account>;
    async fn list(&self) -> AccountResult<Vec<Account>>;
    async fn sweep_expired(&self) -> AccountResult<SweepReport>;
    async fn purge_expired(&self) -> AccountResult<Vec<String>>;
}

#[async_trait]
impl AccountService for AccountStore {
    async fn create(
        &self,
        username: &str,
        days: i64,
        secret: Option<&str>,
    ) -> AccountResult<Account> {
        AccountStore::create(self, username, days, secret).await
    }

    async fn renew(&self, username: &str, days: i64) -> AccountResult<Account> {
        AccountStore::renew(self, username, days).await
    }

    async fn delete(&self, username: &str) -> AccountResult<()> {
        AccountStore::delete(self, username).await
    }

    async fn get(&self, username: &str) -> AccountResult<Account> {
        AccountStore::get(self, username).await
    }

    async fn list(&self) -> AccountResult<Vec<Account>> {
        AccountStore::list(self).await
    }

    async fn sweep_expired(&self) -> AccountResult<SweepReport> {
        AccountStore::sweep_expired(self).await
    }

    async fn purge_expired(&self) -> AccountResult<Vec<String>> {
        AccountStore::purge_expired(self).await
    }
}
