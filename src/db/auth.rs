use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{
    report::ReportSetting,
    user::{NewUser, User},
    utils::RecordId,
};

/// Account storage: users, their initial report setting, and refresh tokens.
#[async_trait]
pub trait AuthRepository: Send + Sync {
    /// Stores the user and their initial report setting atomically.
    async fn create_user(&self, user: NewUser) -> Result<User, sqlx::Error>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error>;

    async fn find_user_by_id(&self, id: &RecordId) -> Result<Option<User>, sqlx::Error>;

    async fn store_refresh_token(
        &self,
        user_id: &RecordId,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error>;

    /// Removes the token and returns its owner if it had not expired yet.
    async fn consume_refresh_token(&self, token: &str) -> Result<Option<RecordId>, sqlx::Error>;
}

// Database repository
pub struct PgAuthRepository {
    pool: PgPool,
}

impl PgAuthRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const USER_COLUMNS: &str = "id, name, email, password_hash, profile_picture, created_at, updated_at";

#[async_trait]
impl AuthRepository for PgAuthRepository {
    async fn create_user(&self, user: NewUser) -> Result<User, sqlx::Error> {
        let now = Utc::now();
        let id = RecordId::generate();
        let setting = ReportSetting::initial(id.clone(), now);

        let mut tx = self.pool.begin().await?;

        let created = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, name, email, password_hash, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO report_settings (id, user_id, frequency, is_enabled, next_report_date, last_sent_date, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            "#,
        )
        .bind(&setting.id)
        .bind(&setting.user_id)
        .bind(setting.frequency)
        .bind(setting.is_enabled)
        .bind(setting.next_report_date)
        .bind(setting.last_sent_date)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(created)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
    }

    async fn find_user_by_id(&self, id: &RecordId) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn store_refresh_token(
        &self,
        user_id: &RecordId,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (user_id, token, expires_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn consume_refresh_token(&self, token: &str) -> Result<Option<RecordId>, sqlx::Error> {
        sqlx::query_scalar::<_, RecordId>(
            r#"
            DELETE FROM refresh_tokens
            WHERE token = $1 AND expires_at > CURRENT_TIMESTAMP
            RETURNING user_id
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
    }
}
