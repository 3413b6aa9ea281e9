use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

/// Role assigned to an account at registration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Recruiter,
    Candidate,
}

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: Option<String>,
    pub email: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub email_verified: Option<OffsetDateTime>,
    pub image: Option<String>,
    pub role: UserRole,
}

/// User row together with the stored password, only read on login.
#[derive(Debug, Clone, FromRow, PartialEq, Eq)]
pub struct UserCredentials {
    #[sqlx(flatten)]
    pub user: User,
    pub password: Option<String>, // encrypted, never serialized
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PasswordRecoveryToken {
    pub id: String,
    pub token: String,
    pub is_recovered: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expired_at: OffsetDateTime,
    pub user_id: String,
}

impl PasswordRecoveryToken {
    /// Usable for a reset: not consumed yet and not past its expiry.
    pub fn is_usable_at(&self, now: OffsetDateTime) -> bool {
        !self.is_recovered && now < self.expired_at
    }
}
