use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::users::models::User;

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Response returned after login.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub user: User,
}

/// Request body to start a password recovery.
#[derive(Debug, Deserialize)]
pub struct RecoveryRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct RecoveryStatus {
    pub valid: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub expired_at: OffsetDateTime,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub password: String,
}
