use std::collections::HashMap;

use chrono::{Duration, Utc};
use tokio::sync::RwLock;

use chatpyme_core::domain::inventory::{InventorySnapshot, NewProduct, Product, ProductId};
use chatpyme_core::domain::movement::{FinancialSummary, Movement, MovementId, NewMovement};
use chatpyme_core::domain::user::UserId;

use super::{InventoryRepository, MovementRepository, RepositoryError, UserRepository};

#[derive(Default)]
pub struct InMemoryUserRepository {
    users: RwLock<HashMap<i64, UserId>>,
}

#[async_trait::async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn get_or_create(&self, telegram_id: i64) -> Result<UserId, RepositoryError> {
        let mut users = self.users.write().await;
        let next = UserId(i64::try_from(users.len()).unwrap_or(i64::MAX - 1) + 1);
        Ok(*users.entry(telegram_id).or_insert(next))
    }
}

#[derive(Default)]
pub struct InMemoryMovementRepository {
    movements: RwLock<Vec<(UserId, Movement)>>,
}

impl InMemoryMovementRepository {
    /// Stores a movement with an explicit timestamp, for window tests.
    pub async fn insert_at(&self, user: UserId, movement: Movement) {
        self.movements.write().await.push((user, movement));
    }
}

#[async_trait::async_trait]
impl MovementRepository for InMemoryMovementRepository {
    async fn add_movement(
        &self,
        user: UserId,
        movement: NewMovement,
    ) -> Result<Movement, RepositoryError> {
        let mut movements = self.movements.write().await;
        let stored = Movement {
            id: MovementId(i64::try_from(movements.len()).unwrap_or(i64::MAX - 1) + 1),
            kind: movement.kind(),
            amount: movement.amount(),
            category: movement.category().to_string(),
            description: movement.description().to_string(),
            occurred_at: Utc::now(),
        };
        movements.push((user, stored.clone()));
        Ok(stored)
    }

    async fn recent_movements(
        &self,
        user: UserId,
        limit: u32,
    ) -> Result<Vec<Movement>, RepositoryError> {
        let movements = self.movements.read().await;
        let mut owned = movements
            .iter()
            .filter(|(owner, _)| *owner == user)
            .map(|(_, movement)| movement.clone())
            .collect::<Vec<_>>();
        owned.sort_by(|left, right| {
            right.occurred_at.cmp(&left.occurred_at).then_with(|| right.id.0.cmp(&left.id.0))
        });
        owned.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(owned)
    }

    async fn summary(
        &self,
        user: UserId,
        period_days: u32,
    ) -> Result<FinancialSummary, RepositoryError> {
        let since = Utc::now() - Duration::days(i64::from(period_days));
        let movements = self.movements.read().await;
        Ok(FinancialSummary::from_movements(
            period_days,
            movements
                .iter()
                .filter(|(owner, movement)| *owner == user && movement.occurred_at >= since)
                .map(|(_, movement)| movement),
        ))
    }
}

#[derive(Default)]
pub struct InMemoryInventoryRepository {
    state: RwLock<InventoryState>,
}

#[derive(Default)]
struct InventoryState {
    next_id: i64,
    products: HashMap<UserId, Vec<Product>>,
}

impl InventoryState {
    fn upsert(&mut self, user: UserId, product: NewProduct) -> Product {
        let items = self.products.entry(user).or_default();
        if let Some(existing) = items.iter_mut().find(|item| item.name == product.name) {
            existing.category = product.category;
            existing.stock_current = product.stock_current;
            existing.stock_minimum = product.stock_minimum;
            if product.stock_maximum.is_some() {
                existing.stock_maximum = product.stock_maximum;
            }
            if product.price > rust_decimal::Decimal::ZERO {
                existing.price = product.price;
            }
            if product.sku.is_some() {
                existing.sku = product.sku;
            }
            existing.days_since_last_movement = Some(0);
            return existing.clone();
        }

        self.next_id += 1;
        let stored = Product {
            id: ProductId(self.next_id),
            name: product.name,
            category: product.category,
            stock_current: product.stock_current,
            stock_minimum: product.stock_minimum,
            stock_maximum: product.stock_maximum,
            price: product.price,
            sku: product.sku,
            days_since_last_movement: Some(0),
        };
        items.push(stored.clone());
        stored
    }
}

#[async_trait::async_trait]
impl InventoryRepository for InMemoryInventoryRepository {
    async fn inventory(&self, user: UserId) -> Result<InventorySnapshot, RepositoryError> {
        let state = self.state.read().await;
        let mut items = state.products.get(&user).cloned().unwrap_or_default();
        items.sort_by(|left, right| {
            left.category.cmp(&right.category).then_with(|| left.name.cmp(&right.name))
        });
        Ok(InventorySnapshot { company_id: user, items })
    }

    async fn add_product(
        &self,
        user: UserId,
        product: NewProduct,
    ) -> Result<Product, RepositoryError> {
        let product =
            product.validate().map_err(|error| RepositoryError::Decode(error.to_string()))?;
        Ok(self.state.write().await.upsert(user, product))
    }

    async fn replace_inventory(
        &self,
        user: UserId,
        products: Vec<NewProduct>,
    ) -> Result<usize, RepositoryError> {
        let products = products
            .into_iter()
            .map(|product| {
                product.validate().map_err(|error| RepositoryError::Decode(error.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut state = self.state.write().await;
        state.products.remove(&user);
        for product in products {
            state.upsert(user, product);
        }
        Ok(state.products.get(&user).map(Vec::len).unwrap_or_default())
    }
}
