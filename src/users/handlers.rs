use axum::{
    extract::{FromRef, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use lazy_static::lazy_static;
use regex::Regex;
use time::{Duration, OffsetDateTime};
use tracing::{error, info, instrument, warn};

use crate::{
    state::AppState,
    users::{
        dto::{AuthResponse, LoginRequest, RecoveryRequest, RecoveryStatus, ResetPasswordRequest},
        error::UserError,
        jwt::{AuthUser, JwtKeys},
        models::{PasswordRecoveryToken, User},
        services::{
            self, generate_recovery_token, hash_password, verify_password, CreateUserTokenParams,
            EmailParams, TokenParams, UpdateUserPasswordParams,
        },
    },
};

const MIN_PASSWORD_LEN: usize = 8;

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/recovery", post(request_recovery))
        .route(
            "/auth/recovery/:token",
            get(recovery_status).post(reset_password),
        )
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

// Registration is external and may keep mixed case, so only whitespace is stripped.
fn normalize_email(email: &str) -> Result<String, (StatusCode, String)> {
    let email = email.trim().to_string();
    if !is_valid_email(&email) {
        warn!(%email, "invalid email");
        return Err((StatusCode::BAD_REQUEST, "Invalid email".into()));
    }
    Ok(email)
}

fn user_error(e: UserError) -> (StatusCode, String) {
    match e {
        UserError::MissingField(field) => {
            warn!(field, "user module rejected request");
            (StatusCode::BAD_REQUEST, e.to_string())
        }
        UserError::Store(source) => {
            error!(error = %source, "user store failed");
            internal()
        }
    }
}

// Callers log the cause; the body stays generic.
fn internal() -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".into())
}

fn invalid_credentials() -> (StatusCode, String) {
    (StatusCode::UNAUTHORIZED, "Invalid credentials".into())
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, (StatusCode, String)> {
    let email = normalize_email(&payload.email)?;

    let creds = services::get_user_for_auth(
        state.users.as_ref(),
        EmailParams {
            email: Some(email.clone()),
        },
    )
    .await
    .map_err(user_error)?;

    let Some(creds) = creds else {
        warn!(%email, "login unknown email");
        return Err(invalid_credentials());
    };
    let Some(hash) = creds.password.as_deref() else {
        warn!(user_id = %creds.user.id, "login for account without password");
        return Err(invalid_credentials());
    };

    let ok = verify_password(&payload.password, hash).map_err(|e| {
        error!(error = %e, "verify_password failed");
        internal()
    })?;
    if !ok {
        warn!(user_id = %creds.user.id, "login invalid password");
        return Err(invalid_credentials());
    }

    let access_token = JwtKeys::from_ref(&state).sign(&creds.user).map_err(|e| {
        error!(error = %e, "jwt sign failed");
        internal()
    })?;

    info!(user_id = %creds.user.id, "user logged in");
    Ok(Json(AuthResponse {
        access_token,
        user: creds.user,
    }))
}

/// Always answers 202 so callers cannot probe which emails are registered.
#[instrument(skip(state, payload))]
pub async fn request_recovery(
    State(state): State<AppState>,
    Json(payload): Json<RecoveryRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    let email = normalize_email(&payload.email)?;

    let user = services::get_user_by_email(
        state.users.as_ref(),
        EmailParams {
            email: Some(email.clone()),
        },
    )
    .await
    .map_err(user_error)?;
    if user.is_none() {
        warn!(%email, "recovery requested for unknown email");
        return Ok(StatusCode::ACCEPTED);
    }

    let expired_at =
        OffsetDateTime::now_utc() + Duration::minutes(state.config.recovery.ttl_minutes);
    let user = services::create_user_token(
        state.users.as_ref(),
        CreateUserTokenParams {
            email: Some(email),
            token: Some(generate_recovery_token()),
            expired_at: Some(expired_at),
        },
    )
    .await
    .map_err(user_error)?;

    // TODO: mail the recovery link to the user once an SMTP relay is configured.
    info!(user_id = %user.id, %expired_at, "password recovery started");
    Ok(StatusCode::ACCEPTED)
}

async fn load_token(
    state: &AppState,
    token: String,
) -> Result<PasswordRecoveryToken, (StatusCode, String)> {
    services::get_password_recovery_token(state.users.as_ref(), TokenParams { token: Some(token) })
        .await
        .map_err(user_error)?
        .ok_or((StatusCode::NOT_FOUND, "Recovery token not found".into()))
}

#[instrument(skip(state, token))]
pub async fn recovery_status(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<RecoveryStatus>, (StatusCode, String)> {
    let recovery = load_token(&state, token).await?;
    Ok(Json(RecoveryStatus {
        valid: recovery.is_usable_at(OffsetDateTime::now_utc()),
        expired_at: recovery.expired_at,
    }))
}

#[instrument(skip(state, token, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    if payload.password.len() < MIN_PASSWORD_LEN {
        warn!("password too short");
        return Err((StatusCode::BAD_REQUEST, "Password too short".into()));
    }

    let recovery = load_token(&state, token).await?;
    if !recovery.is_usable_at(OffsetDateTime::now_utc()) {
        warn!(user_id = %recovery.user_id, "recovery token used or expired");
        return Err((StatusCode::GONE, "Recovery token expired".into()));
    }

    let encrypted = hash_password(&payload.password).map_err(|e| {
        error!(error = %e, "hash_password failed");
        internal()
    })?;

    let recovered = services::update_user_password(
        state.users.as_ref(),
        UpdateUserPasswordParams {
            token: Some(recovery.token),
            encrypted_password: Some(encrypted),
        },
    )
    .await
    .map_err(user_error)?;

    info!(user_id = %recovered.user_id, "password reset");
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, claims))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<Json<User>, (StatusCode, String)> {
    let user = services::get_user_by_email(
        state.users.as_ref(),
        EmailParams {
            email: Some(claims.email),
        },
    )
    .await
    .map_err(user_error)?;

    user.map(Json).ok_or_else(|| {
        warn!(user_id = %claims.sub, "user not found");
        (StatusCode::UNAUTHORIZED, "User not found".into())
    })
}
