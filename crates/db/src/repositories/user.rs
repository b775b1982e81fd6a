use chrono::Utc;

use chatpyme_core::domain::user::UserId;

use super::{timestamp, RepositoryError, UserRepository};
use crate::DbPool;

pub struct SqlUserRepository {
    pool: DbPool,
}

impl SqlUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl UserRepository for SqlUserRepository {
    async fn get_or_create(&self, telegram_id: i64) -> Result<UserId, RepositoryError> {
        sqlx::query(
            "INSERT INTO users (telegram_id, created_at) VALUES (?, ?)
             ON CONFLICT(telegram_id) DO NOTHING",
        )
        .bind(telegram_id)
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;

        let id: i64 = sqlx::query_scalar("SELECT id FROM users WHERE telegram_id = ?")
            .bind(telegram_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(UserId(id))
    }
}
