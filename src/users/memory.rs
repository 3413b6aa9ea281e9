use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::users::models::{PasswordRecoveryToken, User, UserCredentials};
use crate::users::repo::UserStore;

#[derive(Default)]
struct Tables {
    // keyed by email
    users: HashMap<String, UserCredentials>,
    // keyed by token value
    tokens: HashMap<String, PasswordRecoveryToken>,
}

/// [`UserStore`] kept in process memory. Used when no database is
/// configured and by tests.
#[derive(Default)]
pub struct MemoryUserStore {
    tables: Mutex<Tables>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> anyhow::Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))
    }
}

// Registration lives outside this service; tests seed and inspect accounts directly.
#[cfg(test)]
impl MemoryUserStore {
    pub fn insert_user(&self, user: User, password: Option<String>) -> anyhow::Result<()> {
        let mut tables = self.tables()?;
        if tables.users.contains_key(&user.email) {
            anyhow::bail!("duplicate email {}", user.email);
        }
        tables
            .users
            .insert(user.email.clone(), UserCredentials { user, password });
        Ok(())
    }

    pub fn password_of(&self, email: &str) -> anyhow::Result<Option<String>> {
        Ok(self
            .tables()?
            .users
            .get(email)
            .and_then(|c| c.password.clone()))
    }

    pub fn token_values(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.tables()?.tokens.keys().cloned().collect())
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        Ok(self.tables()?.users.get(email).map(|c| c.user.clone()))
    }

    async fn find_user_for_auth(&self, email: &str) -> anyhow::Result<Option<UserCredentials>> {
        Ok(self.tables()?.users.get(email).cloned())
    }

    async fn update_user_token(
        &self,
        email: &str,
        token: &str,
        expired_at: OffsetDateTime,
    ) -> anyhow::Result<User> {
        let mut tables = self.tables()?;
        let user = tables
            .users
            .get(email)
            .map(|c| c.user.clone())
            .ok_or_else(|| anyhow::anyhow!("no user to update for email {}", email))?;
        if tables.tokens.contains_key(token) {
            anyhow::bail!("recovery token already exists");
        }
        tables.tokens.insert(
            token.to_string(),
            PasswordRecoveryToken {
                id: Uuid::new_v4().to_string(),
                token: token.to_string(),
                is_recovered: false,
                created_at: OffsetDateTime::now_utc(),
                expired_at,
                user_id: user.id.clone(),
            },
        );
        Ok(user)
    }

    async fn update_token_password(
        &self,
        token: &str,
        encrypted_password: &str,
    ) -> anyhow::Result<PasswordRecoveryToken> {
        let mut tables = self.tables()?;
        let user_id = tables
            .tokens
            .get(token)
            .filter(|t| !t.is_recovered)
            .map(|t| t.user_id.clone())
            .ok_or_else(|| anyhow::anyhow!("no unused recovery token to update"))?;

        let owner = tables
            .users
            .values_mut()
            .find(|c| c.user.id == user_id)
            .ok_or_else(|| anyhow::anyhow!("recovery token owner {} missing", user_id))?;
        owner.password = Some(encrypted_password.to_string());

        let recovery = tables
            .tokens
            .get_mut(token)
            .ok_or_else(|| anyhow::anyhow!("no recovery token to update"))?;
        recovery.is_recovered = true;
        Ok(recovery.clone())
    }

    async fn find_token_by_token(
        &self,
        token: &str,
    ) -> anyhow::Result<Option<PasswordRecoveryToken>> {
        Ok(self.tables()?.tokens.get(token).cloned())
    }
}
