pub mod health;
pub mod transfers;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use confidential_transfer::solana::{
    balance::AccountStateError,
    transfer::{ErrorClass, TransferFailure},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BaseApiResponse<T> {
    pub data: T,
}

impl<T> BaseApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

impl<T> IntoResponse for BaseApiResponse<T>
where
    T: Serialize,
{
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

pub type ApiResponse<T> = BaseApiResponse<T>;

#[derive(Debug, Error)]
#[error("{inner}")]
pub struct AppError {
    inner: anyhow::Error,
    status: StatusCode,
}

impl AppError {
    pub fn new(error: impl Into<anyhow::Error>, status: StatusCode) -> Self {
        Self {
            inner: error.into(),
            status,
        }
    }

    pub fn internal_server_error(error: impl Into<anyhow::Error>) -> Self {
        Self::new(error, StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn bad_request(error: impl Into<anyhow::Error>) -> Self {
        Self::new(error, StatusCode::BAD_REQUEST)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let error_message = self.inner.to_string();

        if error_message.is_empty() {
            (self.status, "server error").into_response()
        } else {
            (self.status, error_message).into_response()
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal_server_error(err)
    }
}

impl From<AccountStateError> for AppError {
    fn from(err: AccountStateError) -> Self {
        if err.is_account_error() {
            AppError::bad_request(err)
        } else {
            AppError::internal_server_error(err)
        }
    }
}

impl From<TransferFailure> for AppError {
    fn from(failure: TransferFailure) -> Self {
        let status = match failure.error.class() {
            ErrorClass::Input => StatusCode::BAD_REQUEST,
            ErrorClass::Oracle => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorClass::Unconfirmed => StatusCode::GATEWAY_TIMEOUT,
            ErrorClass::Encoding | ErrorClass::Ledger | ErrorClass::Cancelled => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let mut message = failure.error.to_string();
        if !failure.completed.is_empty() {
            let confirmed: Vec<String> = failure
                .completed
                .iter()
                .map(|step| format!("{}={}", step.label, step.signature))
                .collect();
            message.push_str(&format!("; confirmed steps: [{}]", confirmed.join(", ")));
        }
        if !failure.stranded_context_accounts.is_empty() {
            let stranded: Vec<String> = failure
                .stranded_context_accounts
                .iter()
                .map(ToString::to_string)
                .collect();
            message.push_str(&format!("; stranded context accounts: [{}]", stranded.join(", ")));
        }
        if !failure.unconfirmed_context_accounts.is_empty() {
            let unconfirmed: Vec<String> = failure
                .unconfirmed_context_accounts
                .iter()
                .map(ToString::to_string)
                .collect();
            message.push_str(&format!(
                "; context accounts possibly created: [{}]",
                unconfirmed.join(", ")
            ));
        }

        AppError::new(anyhow::anyhow!(message), status)
    }
}
