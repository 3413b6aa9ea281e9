use argon2::{password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::{debug, error, instrument};

use crate::users::error::{require, Result};
use crate::users::models::{PasswordRecoveryToken, User, UserCredentials};
use crate::users::repo::UserStore;

const RECOVERY_TOKEN_LEN: usize = 48;

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateUserTokenParams {
    pub email: Option<String>,
    pub token: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expired_at: Option<OffsetDateTime>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct EmailParams {
    pub email: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateUserPasswordParams {
    pub token: Option<String>,
    pub encrypted_password: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct TokenParams {
    pub token: Option<String>,
}

// An empty string counts as absent.
fn text(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Issue a recovery token for the account owning `email`.
#[instrument(skip(store, params))]
pub async fn create_user_token(
    store: &dyn UserStore,
    params: CreateUserTokenParams,
) -> Result<User> {
    let email = require(text(params.email), "email")?;
    let token = require(text(params.token), "token")?;
    let expired_at = require(params.expired_at, "expiredAt")?;

    let user = store.update_user_token(&email, &token, expired_at).await?;
    debug!(user_id = %user.id, %expired_at, "recovery token issued");
    Ok(user)
}

#[instrument(skip(store, params))]
pub async fn get_user_by_email(store: &dyn UserStore, params: EmailParams) -> Result<Option<User>> {
    let email = require(text(params.email), "email")?;
    Ok(store.find_user_by_email(&email).await?)
}

/// Lookup for login call sites. Unlike [`get_user_by_email`] the result
/// carries the encrypted password.
#[instrument(skip(store, params))]
pub async fn get_user_for_auth(
    store: &dyn UserStore,
    params: EmailParams,
) -> Result<Option<UserCredentials>> {
    let email = require(text(params.email), "email")?;
    Ok(store.find_user_for_auth(&email).await?)
}

/// Consume a recovery token. The password must already be hashed.
#[instrument(skip(store, params))]
pub async fn update_user_password(
    store: &dyn UserStore,
    params: UpdateUserPasswordParams,
) -> Result<PasswordRecoveryToken> {
    let token = require(text(params.token), "token")?;
    let encrypted_password = require(text(params.encrypted_password), "encryptedPassword")?;

    let recovery = store.update_token_password(&token, &encrypted_password).await?;
    debug!(user_id = %recovery.user_id, "password updated from recovery token");
    Ok(recovery)
}

#[instrument(skip(store, params))]
pub async fn get_password_recovery_token(
    store: &dyn UserStore,
    params: TokenParams,
) -> Result<Option<PasswordRecoveryToken>> {
    let token = require(text(params.token), "token")?;
    Ok(store.find_token_by_token(&token).await?)
}

pub fn generate_recovery_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RECOVERY_TOKEN_LEN)
        .map(char::from)
        .collect()
}

pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

pub fn verify_password(plain: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        anyhow::anyhow!(e.to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use time::macros::datetime;

    use super::*;
    use crate::users::error::UserError;
    use crate::users::models::UserRole;

    const ID: &str = "4f1c2a52-8a36-4a55-9a43-0f0c4f3b2e11";

    fn user() -> User {
        User {
            id: ID.into(),
            name: Some("Grace Hopper".into()),
            email: "grace@example.com".into(),
            email_verified: None,
            image: None,
            role: UserRole::Recruiter,
        }
    }

    fn recovery_token() -> PasswordRecoveryToken {
        PasswordRecoveryToken {
            id: ID.into(),
            token: ID.into(),
            is_recovered: true,
            created_at: datetime!(2024-03-01 10:00 UTC),
            expired_at: datetime!(2024-03-01 10:00 UTC),
            user_id: ID.into(),
        }
    }

    /// Resolves every call with a canned record and counts store hits.
    #[derive(Default)]
    struct CannedStore {
        calls: AtomicUsize,
    }

    impl CannedStore {
        fn hit(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl UserStore for CannedStore {
        async fn find_user_by_email(&self, _email: &str) -> anyhow::Result<Option<User>> {
            self.hit();
            Ok(Some(user()))
        }

        async fn find_user_for_auth(&self, _email: &str) -> anyhow::Result<Option<UserCredentials>> {
            self.hit();
            Ok(Some(UserCredentials {
                user: user(),
                password: Some("$argon2id$stub".into()),
            }))
        }

        async fn update_user_token(
            &self,
            _email: &str,
            _token: &str,
            _expired_at: OffsetDateTime,
        ) -> anyhow::Result<User> {
            self.hit();
            Ok(user())
        }

        async fn update_token_password(
            &self,
            _token: &str,
            _encrypted_password: &str,
        ) -> anyhow::Result<PasswordRecoveryToken> {
            self.hit();
            Ok(recovery_token())
        }

        async fn find_token_by_token(
            &self,
            _token: &str,
        ) -> anyhow::Result<Option<PasswordRecoveryToken>> {
            self.hit();
            Ok(Some(recovery_token()))
        }
    }

    struct FailingStore;

    #[async_trait]
    impl UserStore for FailingStore {
        async fn find_user_by_email(&self, _email: &str) -> anyhow::Result<Option<User>> {
            anyhow::bail!("database unavailable")
        }

        async fn find_user_for_auth(&self, _email: &str) -> anyhow::Result<Option<UserCredentials>> {
            anyhow::bail!("database unavailable")
        }

        async fn update_user_token(
            &self,
            _email: &str,
            _token: &str,
            _expired_at: OffsetDateTime,
        ) -> anyhow::Result<User> {
            anyhow::bail!("database unavailable")
        }

        async fn update_token_password(
            &self,
            _token: &str,
            _encrypted_password: &str,
        ) -> anyhow::Result<PasswordRecoveryToken> {
            anyhow::bail!("database unavailable")
        }

        async fn find_token_by_token(
            &self,
            _token: &str,
        ) -> anyhow::Result<Option<PasswordRecoveryToken>> {
            anyhow::bail!("database unavailable")
        }
    }

    fn token_params() -> CreateUserTokenParams {
        CreateUserTokenParams {
            email: Some("grace@example.com".into()),
            token: Some("s3cr3t".into()),
            expired_at: Some(datetime!(2024-03-01 11:00 UTC)),
        }
    }

    #[tokio::test]
    async fn create_user_token_returns_updated_user() {
        let store = CannedStore::default();
        let saved = create_user_token(&store, token_params()).await.unwrap();
        assert_eq!(saved, user());
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test]
    async fn create_user_token_requires_email() {
        let store = CannedStore::default();
        let params = CreateUserTokenParams {
            email: None,
            ..token_params()
        };
        let err = create_user_token(&store, params).await.unwrap_err();
        assert_eq!(err.to_string(), "missing email");
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn create_user_token_requires_token() {
        let store = CannedStore::default();
        let params = CreateUserTokenParams {
            token: None,
            ..token_params()
        };
        let err = create_user_token(&store, params).await.unwrap_err();
        assert_eq!(err.to_string(), "missing token");
    }

    #[tokio::test]
    async fn create_user_token_requires_expired_at() {
        let store = CannedStore::default();
        let params = CreateUserTokenParams {
            expired_at: None,
            ..token_params()
        };
        let err = create_user_token(&store, params).await.unwrap_err();
        assert_eq!(err.to_string(), "missing expiredAt");
    }

    #[tokio::test]
    async fn create_user_token_names_first_missing_field() {
        let store = CannedStore::default();
        let err = create_user_token(&store, CreateUserTokenParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, UserError::MissingField("email")));

        let params = CreateUserTokenParams {
            email: Some("grace@example.com".into()),
            ..Default::default()
        };
        let err = create_user_token(&store, params).await.unwrap_err();
        assert!(matches!(err, UserError::MissingField("token")));
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn empty_email_counts_as_missing() {
        let store = CannedStore::default();
        let params = EmailParams {
            email: Some(String::new()),
        };
        let err = get_user_by_email(&store, params).await.unwrap_err();
        assert_eq!(err.to_string(), "missing email");
    }

    #[tokio::test]
    async fn get_user_by_email_passes_user_through() {
        let store = CannedStore::default();
        let params = EmailParams {
            email: Some("grace@example.com".into()),
        };
        let found = get_user_by_email(&store, params).await.unwrap();
        assert_eq!(found, Some(user()));
    }

    #[tokio::test]
    async fn get_user_by_email_requires_email() {
        let store = CannedStore::default();
        let err = get_user_by_email(&store, EmailParams::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "missing email");
    }

    #[tokio::test]
    async fn get_user_for_auth_passes_credentials_through() {
        let store = CannedStore::default();
        let params = EmailParams {
            email: Some("grace@example.com".into()),
        };
        let creds = get_user_for_auth(&store, params).await.unwrap().unwrap();
        assert_eq!(creds.user, user());
        assert_eq!(creds.password.as_deref(), Some("$argon2id$stub"));
    }

    #[tokio::test]
    async fn get_user_for_auth_requires_email() {
        let store = CannedStore::default();
        let err = get_user_for_auth(&store, EmailParams::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "missing email");
    }

    #[tokio::test]
    async fn update_user_password_returns_token() {
        let store = CannedStore::default();
        let params = UpdateUserPasswordParams {
            token: Some(ID.into()),
            encrypted_password: Some("hash".into()),
        };
        let updated = update_user_password(&store, params).await.unwrap();
        assert_eq!(updated, recovery_token());
    }

    #[tokio::test]
    async fn update_user_password_requires_token() {
        let store = CannedStore::default();
        let params = UpdateUserPasswordParams {
            token: None,
            encrypted_password: Some("hash".into()),
        };
        let err = update_user_password(&store, params).await.unwrap_err();
        assert_eq!(err.to_string(), "missing token");
    }

    #[tokio::test]
    async fn update_user_password_requires_encrypted_password() {
        let store = CannedStore::default();
        let params = UpdateUserPasswordParams {
            token: Some(ID.into()),
            encrypted_password: None,
        };
        let err = update_user_password(&store, params).await.unwrap_err();
        assert_eq!(err.to_string(), "missing encryptedPassword");
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn update_user_password_names_token_before_password() {
        let store = CannedStore::default();
        let err = update_user_password(&store, UpdateUserPasswordParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, UserError::MissingField("token")));
        assert_eq!(err.to_string(), "missing token");
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn get_password_recovery_token_passes_token_through() {
        let store = CannedStore::default();
        let params = TokenParams {
            token: Some(ID.into()),
        };
        let found = get_password_recovery_token(&store, params).await.unwrap();
        assert_eq!(found, Some(recovery_token()));
    }

    #[tokio::test]
    async fn get_password_recovery_token_requires_token() {
        let store = CannedStore::default();
        let err = get_password_recovery_token(&store, TokenParams::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "missing token");
    }

    #[tokio::test]
    async fn store_errors_propagate_unchanged() {
        let err = create_user_token(&FailingStore, token_params())
            .await
            .unwrap_err();
        assert!(matches!(err, UserError::Store(_)));
        assert_eq!(err.to_string(), "database unavailable");
    }

    #[test]
    fn params_deserialize_from_camel_case() {
        let params: UpdateUserPasswordParams =
            serde_json::from_str(r#"{"token":"t","encryptedPassword":"p"}"#).unwrap();
        assert_eq!(params.token.as_deref(), Some("t"));
        assert_eq!(params.encrypted_password.as_deref(), Some("p"));

        let params: CreateUserTokenParams = serde_json::from_str(r#"{"token":"t"}"#).unwrap();
        assert!(params.email.is_none());
        assert!(params.expired_at.is_none());
    }

    #[test]
    fn recovery_tokens_are_random_alphanumeric() {
        let a = generate_recovery_token();
        let b = generate_recovery_token();
        assert_eq!(a.len(), RECOVERY_TOKEN_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn hash_and_verify_roundtrip() {
        let password = "Secur3P@ssw0rd!";
        let hash = hash_password(password).expect("hashing should succeed");
        assert!(verify_password(password, &hash).expect("verify should succeed"));
        assert!(!verify_password("wrong-password", &hash).expect("verify should not error"));
    }

    #[test]
    fn verify_errors_on_malformed_hash() {
        let err = verify_password("anything", "not-a-valid-hash").unwrap_err();
        assert!(!err.to_string().is_empty());
    }
}
