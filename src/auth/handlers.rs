use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    auth::{
        dto::{
            AuthResponse, LoginRequest, ProfileUpdate, PublicUser, RefreshRequest,
            RegisterRequest, ValidateRequest, ValidateResponse,
        },
        errors::AuthError,
        extractors::AuthUser,
    },
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/validate", post(validate))
}

pub fn me_routes() -> Router<AppState> {
    Router::new()
        .route("/me", get(get_me).patch(update_me))
        .route("/users/:id", get(get_user))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<PublicUser>), AuthError> {
    let user = state.auth.register(payload).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
    let result = state.auth.login(payload).await?;
    Ok(Json(result.into()))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
    let result = state.auth.refresh(&payload.refresh_token).await?;
    Ok(Json(result.into()))
}

/// Answers `{valid: false}` for any unusable token instead of an error status.
#[instrument(skip(state, payload))]
pub async fn validate(
    State(state): State<AppState>,
    Json(payload): Json<ValidateRequest>,
) -> Result<Json<ValidateResponse>, AuthError> {
    match state.auth.validate_token(&payload.token).await {
        Ok(user) => Ok(Json(ValidateResponse {
            valid: true,
            user_id: Some(user.id),
            email: Some(user.email),
        })),
        Err(AuthError::InvalidToken) => Ok(Json(ValidateResponse {
            valid: false,
            user_id: None,
            email: None,
        })),
        Err(e) => Err(e),
    }
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn get_me(AuthUser(user): AuthUser) -> Json<PublicUser> {
    Json(user)
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn update_me(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<PublicUser>, AuthError> {
    let user = state.auth.update_profile(user.id, update).await?;
    Ok(Json(user))
}

/// Profile lookup for any authenticated caller.
#[instrument(skip(state, _caller))]
pub async fn get_user(
    State(state): State<AppState>,
    _caller: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<PublicUser>, AuthError> {
    let user = state.auth.get_profile(id).await?;
    Ok(Json(user))
}
