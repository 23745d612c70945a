//! Handle database requests.

use async_trait::async_trait;
use sqlx::{Pool, Postgres};

use crate::database::{RepositoryError, RepositoryResult as Result};
use crate::user::{NewUser, User};

const USER_COLUMNS: &str = "u.id, u.name, u.email, u.password, u.role, u.parking_photo_path, \
     u.is_parking_verified, u.mode_compte, u.status, u.created_at";

/// Port for account and session persistence.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a user. Fails with [`RepositoryError::Duplicate`] when the
    /// email is already registered.
    async fn create(&self, user: NewUser) -> Result<User>;

    async fn find_by_id(&self, id: i64) -> Result<Option<User>>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Link a bearer token to a user.
    async fn insert_token(&self, token: &str, user_id: i64) -> Result<()>;

    /// Find the owner of a non-revoked token.
    async fn find_by_token(&self, token: &str) -> Result<Option<User>>;

    async fn revoke_token(&self, token: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct PgUserRepository {
    pool: Pool<Postgres>,
}

impl PgUserRepository {
    /// Create a new [`PgUserRepository`].
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self, user: NewUser) -> Result<User> {
        let query = format!(
            r#"INSERT INTO users AS u (name, email, password, role, parking_photo_path, is_parking_verified, mode_compte, status)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING {USER_COLUMNS}"#
        );

        sqlx::query_as::<_, User>(&query)
            .bind(&user.name)
            .bind(&user.email)
            .bind(&user.password)
            .bind(user.role)
            .bind(&user.parking_photo_path)
            .bind(user.is_parking_verified)
            .bind(user.account_mode)
            .bind(user.status)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| RepositoryError::on_duplicate(err, "email"))
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = $1");

        Ok(sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let query =
            format!("SELECT {USER_COLUMNS} FROM users u WHERE u.email = $1");

        Ok(sqlx::query_as::<_, User>(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn insert_token(&self, token: &str, user_id: i64) -> Result<()> {
        sqlx::query(r#"INSERT INTO tokens (token, user_id) VALUES ($1, $2)"#)
            .bind(token)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<User>> {
        let query = format!(
            r#"SELECT {USER_COLUMNS}
                FROM tokens t
                JOIN users u ON u.id = t.user_id
                WHERE t.token = $1 AND t.revoked_at IS NULL"#
        );

        Ok(sqlx::query_as::<_, User>(&query)
            .bind(token)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn revoke_token(&self, token: &str) -> Result<()> {
        sqlx::query(
            r#"UPDATE tokens SET revoked_at = NOW() WHERE token = $1 AND revoked_at IS NULL"#,
        )
        .bind(token)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
