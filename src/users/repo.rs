use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::users::models::{PasswordRecoveryToken, User, UserCredentials};

/// Persistence operations the user module relies on.
///
/// Finds resolve to `None` when nothing matches; updates keyed by an unknown
/// email or token fail with an error.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;

    /// Same lookup as [`UserStore::find_user_by_email`], also projecting the
    /// encrypted password.
    async fn find_user_for_auth(&self, email: &str) -> anyhow::Result<Option<UserCredentials>>;

    /// Attach a new recovery token to the user owning `email`.
    async fn update_user_token(
        &self,
        email: &str,
        token: &str,
        expired_at: OffsetDateTime,
    ) -> anyhow::Result<User>;

    /// Store the new password on the token's owner and mark the token recovered.
    /// A token that is already recovered is not updated again.
    async fn update_token_password(
        &self,
        token: &str,
        encrypted_password: &str,
    ) -> anyhow::Result<PasswordRecoveryToken>;

    async fn find_token_by_token(&self, token: &str)
        -> anyhow::Result<Option<PasswordRecoveryToken>>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, email_verified, image, role
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find user by email")?;
        Ok(user)
    }

    async fn find_user_for_auth(&self, email: &str) -> anyhow::Result<Option<UserCredentials>> {
        let creds = sqlx::query_as::<_, UserCredentials>(
            r#"
            SELECT id, name, email, email_verified, image, role, password
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find user for auth")?;
        Ok(creds)
    }

    async fn update_user_token(
        &self,
        email: &str,
        token: &str,
        expired_at: OffsetDateTime,
    ) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            WITH inserted AS (
                INSERT INTO password_recovery_tokens (token, expired_at, user_id)
                SELECT $2, $3, id FROM users WHERE email = $1
                RETURNING user_id
            )
            SELECT u.id, u.name, u.email, u.email_verified, u.image, u.role
              FROM users u
              JOIN inserted i ON i.user_id = u.id
            "#,
        )
        .bind(email)
        .bind(token)
        .bind(expired_at)
        .fetch_optional(&self.db)
        .await
        .context("insert recovery token")?;

        user.ok_or_else(|| anyhow::anyhow!("no user to update for email {}", email))
    }

    async fn update_token_password(
        &self,
        token: &str,
        encrypted_password: &str,
    ) -> anyhow::Result<PasswordRecoveryToken> {
        let mut tx = self.db.begin().await.context("begin tx")?;

        let recovery = sqlx::query_as::<_, PasswordRecoveryToken>(
            r#"
            UPDATE password_recovery_tokens
               SET is_recovered = TRUE
             WHERE token = $1 AND is_recovered = FALSE
            RETURNING id, token, is_recovered, created_at, expired_at, user_id
            "#,
        )
        .bind(token)
        .fetch_optional(&mut *tx)
        .await
        .context("mark recovery token recovered")?
        .ok_or_else(|| anyhow::anyhow!("no unused recovery token to update"))?;

        sqlx::query(r#"UPDATE users SET password = $2 WHERE id = $1"#)
            .bind(&recovery.user_id)
            .bind(encrypted_password)
            .execute(&mut *tx)
            .await
            .context("update user password")?;

        tx.commit().await.context("commit tx")?;
        Ok(recovery)
    }

    async fn find_token_by_token(
        &self,
        token: &str,
    ) -> anyhow::Result<Option<PasswordRecoveryToken>> {
        let row = sqlx::query_as::<_, PasswordRecoveryToken>(
            r#"
            SELECT id, token, is_recovered, created_at, expired_at, user_id
              FROM password_recovery_tokens
             WHERE token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.db)
        .await
        .context("find recovery token")?;
        Ok(row)
    }
}
