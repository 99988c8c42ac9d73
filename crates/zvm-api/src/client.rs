use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;

use zvm_core::{
    domain::{Account, SweepReport},
    ports::AccountService,
    AccountError, AccountResult,
};

use crate::{
    gate::API_KEY_HEADER,
    wire::{AccountRequest, Deleted, ErrorBody, Purged},
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// [`AccountService`] over the HTTP API, used by the bot when it runs next
/// to (not inside) the API process.
#[derive(Clone, Debug)]
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
    api_key: String,
}

impl ApiClient {
    /// `base` is the API root, e.g. `http://127.0.0.1:8080/api`.
    pub fn new(base: impl Into<String>, api_key: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base: base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&AccountRequest>,
    ) -> AccountResult<T> {
        let url = format!("{}{path}", self.base);
        let mut req = self
            .http
            .request(method, &url)
            .header(API_KEY_HEADER, &self.api_key);
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| AccountError::Transport(format!("{url}: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<T>()
                .await
                .map_err(|e| AccountError::Transport(format!("bad response from {url}: {e}")));
        }

        let text = resp.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => Err(body.into_account_error()),
            Err(_) if status == StatusCode::UNAUTHORIZED => Err(AccountError::Unauthorized),
            Err(_) => Err(AccountError::Transport(format!(
                "{url} returned {status}: {}",
                text.trim()
            ))),
        }
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &AccountRequest,
    ) -> AccountResult<T> {
        self.call(Method::POST, path, Some(body)).await
    }
}

#[async_trait]
impl AccountService for ApiClient {
    async fn create(
        &self,
        username: &str,
        days: i64,
        secret: Option<&str>,
    ) -> AccountResult<Account> {
        let body = AccountRequest {
            days: Some(days),
            secret: secret.map(str::to_string),
            ..AccountRequest::named(username)
        };
        self.post("/user/create", &body).await
    }

    async fn renew(&self, username: &str, days: i64) -> AccountResult<Account> {
        let body = AccountRequest {
            days: Some(days),
            ..AccountRequest::named(username)
        };
        self.post("/user/renew", &body).await
    }

    async fn delete(&self, username: &str) -> AccountResult<()> {
        let _: Deleted = self
            .post("/user/delete", &AccountRequest::named(username))
            .await?;
        Ok(())
    }

    async fn get(&self, username: &str) -> AccountResult<Account> {
        self.post("/user/info", &AccountRequest::named(username)).await
    }

    async fn list(&self) -> AccountResult<Vec<Account>> {
        self.call(Method::GET, "/users", None).await
    }

    async fn sweep_expired(&self) -> AccountResult<SweepReport> {
        self.call(Method::POST, "/cron/sweep", None).await
    }

    async fn purge_expired(&self) -> AccountResult<Vec<String>> {
        let purged: Purged = self.call(Method::POST, "/cron/expire", None).await?;
        Ok(purged.removed)
    }
}
