use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use chatpyme_core::domain::inventory::{InventorySnapshot, NewProduct, Product};
use chatpyme_core::domain::movement::{FinancialSummary, Movement, NewMovement};
use chatpyme_core::domain::user::UserId;

pub mod inventory;
pub mod memory;
pub mod movement;
pub mod user;

pub use inventory::SqlInventoryRepository;
pub use memory::{InMemoryInventoryRepository, InMemoryMovementRepository, InMemoryUserRepository};
pub use movement::SqlMovementRepository;
pub use user::SqlUserRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("not found: {0}")]
    NotFound(String),
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Maps a chat identity to the internal partition key, creating it on first contact.
    async fn get_or_create(&self, telegram_id: i64) -> Result<UserId, RepositoryError>;
}

#[async_trait]
pub trait MovementRepository: Send + Sync {
    async fn add_movement(
        &self,
        user: UserId,
        movement: NewMovement,
    ) -> Result<Movement, RepositoryError>;

    /// Newest first.
    async fn recent_movements(
        &self,
        user: UserId,
        limit: u32,
    ) -> Result<Vec<Movement>, RepositoryError>;

    /// Totals over the trailing `period_days`.
    async fn summary(
        &self,
        user: UserId,
        period_days: u32,
    ) -> Result<FinancialSummary, RepositoryError>;
}

#[async_trait]
pub trait InventoryRepository: Send + Sync {
    async fn inventory(&self, user: UserId) -> Result<InventorySnapshot, RepositoryError>;

    /// Upsert keyed on product name: an existing product keeps its id and gets the new
    /// stock, category and price values.
    async fn add_product(&self, user: UserId, product: NewProduct)
        -> Result<Product, RepositoryError>;

    /// Drops every product of `user` and stores `products` instead. Returns the stored count.
    async fn replace_inventory(
        &self,
        user: UserId,
        products: Vec<NewProduct>,
    ) -> Result<usize, RepositoryError>;
}

pub(crate) fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("invalid timestamp `{value}`: {error}")))
}

pub(crate) fn decode_error(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}
