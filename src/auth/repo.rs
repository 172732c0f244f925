use anyhow::Context;
use axum::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::repo_types::{NewLocalUser, User};

const USER_COLUMNS: &str = "id, name, email, password_hash, provider, is_verified, \
                            verification_code, created_at, updated_at";

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;

    /// Creates an unverified password account. `None` when the email is already taken.
    async fn create_local(&self, new: NewLocalUser) -> anyhow::Result<Option<User>>;

    async fn delete(&self, id: Uuid) -> anyhow::Result<()>;

    /// Marks the owner of `code` verified and clears the code in one write.
    /// `None` when no user holds the code.
    async fn consume_verification_code(&self, code: &str) -> anyhow::Result<Option<User>>;

    /// Returns the user with `email`, creating a verified Google account if there is none.
    async fn find_or_create_federated(&self, name: &str, email: &str) -> anyhow::Result<User>;
}

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
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find user by email")?;
        Ok(user)
    }

    async fn create_local(&self, new: NewLocalUser) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, name, email, password_hash, provider, is_verified, verification_code)
            VALUES ($1, $2, $3, $4, 'local', FALSE, $5)
            ON CONFLICT (email) DO NOTHING
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&new.name)
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(&new.verification_code)
        .fetch_optional(&self.db)
        .await
        .context("insert local user")?;
        Ok(user)
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .context("delete user")?;
        Ok(())
    }

    async fn consume_verification_code(&self, code: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
               SET is_verified = TRUE, verification_code = NULL, updated_at = now()
             WHERE verification_code = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(code)
        .fetch_optional(&self.db)
        .await
        .context("consume verification code")?;
        Ok(user)
    }

    async fn find_or_create_federated(&self, name: &str, email: &str) -> anyhow::Result<User> {
        // The no-op update makes RETURNING yield the existing row on conflict.
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, name, email, password_hash, provider, is_verified)
            VALUES ($1, $2, $3, NULL, 'google', TRUE)
            ON CONFLICT (email) DO UPDATE SET email = EXCLUDED.email
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(email)
        .fetch_one(&self.db)
        .await
        .context("find or create federated user")?;
        Ok(user)
    }
}
