use chrono::{Duration, Utc};
use sqlx::Row;

use chatpyme_core::domain::movement::{
    CategoryTotal, FinancialSummary, Movement, MovementId, MovementKind, NewMovement,
};
use chatpyme_core::domain::user::UserId;
use chatpyme_core::money;

use super::{decode_error, parse_timestamp, timestamp, MovementRepository, RepositoryError};
use crate::DbPool;

pub struct SqlMovementRepository {
    pool: DbPool,
}

impl SqlMovementRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_movement(row: &sqlx::sqlite::SqliteRow) -> Result<Movement, RepositoryError> {
    let id: i64 = row.try_get("id").map_err(decode_error)?;
    let kind: String = row.try_get("kind").map_err(decode_error)?;
    let amount_cents: i64 = row.try_get("amount_cents").map_err(decode_error)?;
    let category: String = row.try_get("category").map_err(decode_error)?;
    let description: String = row.try_get("description").map_err(decode_error)?;
    let occurred_at: String = row.try_get("occurred_at").map_err(decode_error)?;

    Ok(Movement {
        id: MovementId(id),
        kind: kind.parse::<MovementKind>().map_err(|error| RepositoryError::Decode(error.to_string()))?,
        amount: money::from_cents(amount_cents),
        category,
        description,
        occurred_at: parse_timestamp(&occurred_at)?,
    })
}

#[async_trait::async_trait]
impl MovementRepository for SqlMovementRepository {
    async fn add_movement(
        &self,
        user: UserId,
        movement: NewMovement,
    ) -> Result<Movement, RepositoryError> {
        let now = timestamp(Utc::now());
        let row = sqlx::query(
            "INSERT INTO movements (user_id, kind, amount_cents, category, description, occurred_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING id, kind, amount_cents, category, description, occurred_at",
        )
        .bind(user.0)
        .bind(movement.kind().as_str())
        .bind(movement.amount_cents())
        .bind(movement.category())
        .bind(movement.description())
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;

        row_to_movement(&row)
    }

    async fn recent_movements(
        &self,
        user: UserId,
        limit: u32,
    ) -> Result<Vec<Movement>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, kind, amount_cents, category, description, occurred_at
             FROM movements
             WHERE user_id = ?
             ORDER BY occurred_at DESC, id DESC
             LIMIT ?",
        )
        .bind(user.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_movement).collect()
    }

    async fn summary(
        &self,
        user: UserId,
        period_days: u32,
    ) -> Result<FinancialSummary, RepositoryError> {
        let since = timestamp(Utc::now() - Duration::days(i64::from(period_days)));
        let rows = sqlx::query(
            "SELECT kind, category, COALESCE(SUM(amount_cents), 0) AS total_cents, COUNT(*) AS movement_count
             FROM movements
             WHERE user_id = ? AND occurred_at >= ?
             GROUP BY kind, category",
        )
        .bind(user.0)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let mut income = Vec::new();
        let mut expense = Vec::new();
        let mut movement_count = 0u64;
        for row in &rows {
            let kind: String = row.try_get("kind").map_err(decode_error)?;
            let category: String = row.try_get("category").map_err(decode_error)?;
            let total_cents: i64 = row.try_get("total_cents").map_err(decode_error)?;
            let count: i64 = row.try_get("movement_count").map_err(decode_error)?;

            movement_count += u64::try_from(count).unwrap_or_default();
            let entry = CategoryTotal { category, total: money::from_cents(total_cents) };
            match kind.parse::<MovementKind>() {
                Ok(MovementKind::Income) => income.push(entry),
                Ok(MovementKind::Expense) => expense.push(entry),
                Err(error) => return Err(RepositoryError::Decode(error.to_string())),
            }
        }

        Ok(FinancialSummary::from_totals(period_days, income, expense, movement_count))
    }
}
