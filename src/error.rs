use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::users::{StoreError, UniqueField};

pub type ApiResult<T> = Result<T, AccountError>;

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("{0}")]
    Validation(&'static str),
    #[error("{0} already taken")]
    Conflict(UniqueField),
    /// Unknown user and wrong password are deliberately the same variant.
    #[error("invalid username or password")]
    Auth,
    #[error("user not found")]
    NotFound,
    #[error("internal error: {0}")]
    Internal(#[source] anyhow::Error),
    #[error("failed to save user: {0}")]
    SaveFailed(#[source] anyhow::Error),
}

impl From<StoreError> for AccountError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(field) => AccountError::Conflict(field),
            StoreError::Database(e) => AccountError::Internal(e.into()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub message: &'static str,
}

impl AccountError {
    pub fn status(&self) -> StatusCode {
        match self {
            AccountError::Validation(_) | AccountError::Conflict(_) => StatusCode::BAD_REQUEST,
            AccountError::Auth => StatusCode::UNAUTHORIZED,
            AccountError::NotFound => StatusCode::NOT_FOUND,
            AccountError::Internal(_) | AccountError::SaveFailed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// User-facing message. Internal variants never expose their source.
    pub fn public_message(&self) -> &'static str {
        match self {
            AccountError::Validation(msg) => *msg,
            AccountError::Conflict(UniqueField::Username) => "Имя пользователя уже занято",
            AccountError::Conflict(UniqueField::Email) => "Email уже зарегистрирован",
            AccountError::Auth => "Неверное имя пользователя или пароль",
            AccountError::NotFound => "Пользователь не найден",
            AccountError::Internal(_) => "Ошибка сервера",
            AccountError::SaveFailed(_) => "Ошибка при сохранении пользователя",
        }
    }
}

impl IntoResponse for AccountError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = ?self, "request failed");
        }
        let body = ErrorBody {
            success: false,
            message: self.public_message(),
        };
        (status, Json(body)).into_response()
    }
}
