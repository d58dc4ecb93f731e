use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    routing::{get, post},
    Json, Router,
};
use time::OffsetDateTime;
use tracing::{instrument, warn};

use crate::{
    auth::{
        dto::{AuthResponse, LoginRequest, RegisterRequest, StatusResponse, UserResponse, UsersResponse},
        services::{self, LOGIN_FIELDS_REQUIRED, REGISTER_FIELDS_REQUIRED},
    },
    error::{AccountError, ApiResult},
    state::AppState,
};

pub fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/api/register", post(register))
        .route("/api/login", post(login))
        .route("/api/user/:id", get(get_user))
        .route("/api/users", get(list_users))
}

pub fn status_routes() -> Router<AppState> {
    Router::new().route("/api/test", get(status))
}

pub async fn status() -> Json<StatusResponse> {
    Json(StatusResponse {
        success: true,
        message: "Сервер работает!",
        timestamp: OffsetDateTime::now_utc(),
    })
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<Json<AuthResponse>> {
    let Json(payload) = payload.map_err(|e| {
        warn!(error = %e, "unreadable register body");
        AccountError::Validation(REGISTER_FIELDS_REQUIRED)
    })?;

    let user_id = services::register(
        &state,
        payload.username.as_deref().unwrap_or_default(),
        payload.email.as_deref().unwrap_or_default(),
        payload.password.as_deref().unwrap_or_default(),
    )
    .await?;

    Ok(Json(AuthResponse {
        success: true,
        message: "Регистрация успешна!",
        user_id,
    }))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<Json<AuthResponse>> {
    let Json(payload) = payload.map_err(|e| {
        warn!(error = %e, "unreadable login body");
        AccountError::Validation(LOGIN_FIELDS_REQUIRED)
    })?;

    let user_id = services::login(
        &state,
        payload.username.as_deref().unwrap_or_default(),
        payload.password.as_deref().unwrap_or_default(),
    )
    .await?;

    Ok(Json(AuthResponse {
        success: true,
        message: "Вход выполнен успешно!",
        user_id,
    }))
}

/// A non-numeric id cannot match any row, so it is reported as not found.
#[instrument(skip(state, id))]
pub async fn get_user(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<UserResponse>> {
    let Path(id) = id.map_err(|_| AccountError::NotFound)?;
    let user = services::get_user(&state, id).await?;
    Ok(Json(UserResponse {
        success: true,
        user,
    }))
}

#[instrument(skip(state))]
pub async fn list_users(State(state): State<AppState>) -> ApiResult<Json<UsersResponse>> {
    let users = services::list_users(&state).await?;
    Ok(Json(UsersResponse {
        success: true,
        users,
    }))
}
