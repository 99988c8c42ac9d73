use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::warn;

use zvm_core::{
    domain::{Account, SweepReport},
    AccountError,
};

use crate::{
    wire::{AccountRequest, Deleted, ErrorBody, Purged},
    AppState,
};

/// Handler error: an account error rendered as `{error, code}`.
pub struct ApiError(AccountError);

impl From<AccountError> for ApiError {
    fn from(e: AccountError) -> Self {
        Self(e)
    }
}

pub fn status_for(e: &AccountError) -> StatusCode {
    match e {
        AccountError::InvalidUsername | AccountError::InvalidDays => StatusCode::BAD_REQUEST,
        AccountError::AlreadyExists(_) => StatusCode::CONFLICT,
        AccountError::NotFound(_) => StatusCode::NOT_FOUND,
        AccountError::Unauthorized => StatusCode::UNAUTHORIZED,
        AccountError::Persist(_) | AccountError::Transport(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            warn!(error = %self.0, "request failed");
        }
        (status, Json(ErrorBody::from(&self.0))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn body(payload: Result<Json<AccountRequest>, JsonRejection>) -> Result<AccountRequest, Response> {
    payload.map(|Json(req)| req).map_err(|rej| {
        let body = ErrorBody {
            error: format!("bad json body: {}", rej.body_text()),
            code: "bad_request".to_string(),
        };
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    })
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AccountRequest>, JsonRejection>,
) -> Response {
    let req = match body(payload) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let res = state
        .service
        .create(
            &req.username,
            req.days.unwrap_or_default(),
            req.secret.as_deref(),
        )
        .await;
    respond(res)
}

pub async fn renew(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AccountRequest>, JsonRejection>,
) -> Response {
    let req = match body(payload) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let res = state
        .service
        .renew(&req.username, req.days.unwrap_or_default())
        .await;
    respond(res)
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AccountRequest>, JsonRejection>,
) -> Response {
    let req = match body(payload) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let username = req.username.trim().to_string();
    let res = state
        .service
        .delete(&username)
        .await
        .map(|()| Deleted { deleted: username });
    respond(res)
}

pub async fn info(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AccountRequest>, JsonRejection>,
) -> Response {
    let req = match body(payload) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    respond(state.service.get(&req.username).await)
}

pub async fn list(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Account>> {
    Ok(Json(state.service.list().await?))
}

pub async fn sweep(State(state): State<Arc<AppState>>) -> ApiResult<SweepReport> {
    Ok(Json(state.service.sweep_expired().await?))
}

pub async fn purge(State(state): State<Arc<AppState>>) -> ApiResult<Purged> {
    let removed = state.service.purge_expired().await?;
    Ok(Json(Purged { removed }))
}

fn respond<T: serde::Serialize>(res: Result<T, AccountError>) -> Response {
    match res {
        Ok(v) => Json(v).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}
