use chrono::Utc;
use sqlx::Row;

use chatpyme_core::domain::inventory::{InventorySnapshot, NewProduct, Product, ProductId};
use chatpyme_core::domain::user::UserId;
use chatpyme_core::money;

use super::{decode_error, timestamp, InventoryRepository, RepositoryError};
use crate::DbPool;

const PRODUCT_COLUMNS: &str = "id, name, category, stock_current, stock_minimum, stock_maximum,
     price_cents, sku, days_since_last_movement";

const UPSERT_PRODUCT: &str = "INSERT INTO products (user_id, name, category, stock_current, stock_minimum,
        stock_maximum, price_cents, sku, days_since_last_movement, created_at, updated_at)
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
     ON CONFLICT(user_id, name) DO UPDATE SET
         category = excluded.category,
         stock_current = excluded.stock_current,
         stock_minimum = excluded.stock_minimum,
         stock_maximum = COALESCE(excluded.stock_maximum, products.stock_maximum),
         price_cents = CASE WHEN excluded.price_cents > 0 THEN excluded.price_cents
                            ELSE products.price_cents END,
         sku = COALESCE(excluded.sku, products.sku),
         days_since_last_movement = 0,
         updated_at = excluded.updated_at";

pub struct SqlInventoryRepository {
    pool: DbPool,
}

impl SqlInventoryRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_product(row: &sqlx::sqlite::SqliteRow) -> Result<Product, RepositoryError> {
    let id: i64 = row.try_get("id").map_err(decode_error)?;
    let price_cents: i64 = row.try_get("price_cents").map_err(decode_error)?;

    Ok(Product {
        id: ProductId(id),
        name: row.try_get("name").map_err(decode_error)?,
        category: row.try_get("category").map_err(decode_error)?,
        stock_current: row.try_get("stock_current").map_err(decode_error)?,
        stock_minimum: row.try_get("stock_minimum").map_err(decode_error)?,
        stock_maximum: row.try_get("stock_maximum").map_err(decode_error)?,
        price: money::from_cents(price_cents),
        sku: row.try_get("sku").map_err(decode_error)?,
        days_since_last_movement: row.try_get("days_since_last_movement").map_err(decode_error)?,
    })
}

fn validated(product: NewProduct) -> Result<NewProduct, RepositoryError> {
    product.validate().map_err(|error| RepositoryError::Decode(error.to_string()))
}

fn price_cents(product: &NewProduct) -> Result<i64, RepositoryError> {
    product.price_cents().map_err(|error| RepositoryError::Decode(error.to_string()))
}

#[async_trait::async_trait]
impl InventoryRepository for SqlInventoryRepository {
    async fn inventory(&self, user: UserId) -> Result<InventorySnapshot, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE user_id = ? ORDER BY category, name"
        ))
        .bind(user.0)
        .fetch_all(&self.pool)
        .await?;

        let items = rows.iter().map(row_to_product).collect::<Result<Vec<_>, _>>()?;
        Ok(InventorySnapshot { company_id: user, items })
    }

    async fn add_product(
        &self,
        user: UserId,
        product: NewProduct,
    ) -> Result<Product, RepositoryError> {
        let product = validated(product)?;
        let now = timestamp(Utc::now());

        let row = sqlx::query(&format!("{UPSERT_PRODUCT} RETURNING {PRODUCT_COLUMNS}"))
            .bind(user.0)
            .bind(&product.name)
            .bind(&product.category)
            .bind(product.stock_current)
            .bind(product.stock_minimum)
            .bind(product.stock_maximum)
            .bind(price_cents(&product)?)
            .bind(&product.sku)
            .bind(&now)
            .bind(&now)
            .fetch_one(&self.pool)
            .await?;

        row_to_product(&row)
    }

    async fn replace_inventory(
        &self,
        user: UserId,
        products: Vec<NewProduct>,
    ) -> Result<usize, RepositoryError> {
        let products = products.into_iter().map(validated).collect::<Result<Vec<_>, _>>()?;
        let now = timestamp(Utc::now());
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM products WHERE user_id = ?").bind(user.0).execute(&mut *tx).await?;

        for product in &products {
            sqlx::query(UPSERT_PRODUCT)
                .bind(user.0)
                .bind(&product.name)
                .bind(&product.category)
                .bind(product.stock_current)
                .bind(product.stock_minimum)
                .bind(product.stock_maximum)
                .bind(price_cents(product)?)
                .bind(&product.sku)
                .bind(&now)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
        }

        let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE user_id = ?")
            .bind(user.0)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        usize::try_from(stored).map_err(|error| RepositoryError::Decode(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use chatpyme_core::domain::inventory::NewProduct;

    use super::SqlInventoryRepository;
    use crate::fixtures::demo_inventory;
    use crate::repositories::{InventoryRepository, SqlUserRepository, UserRepository};
    use crate::{connect_with_settings, migrations};

    async fn setup() -> (SqlInventoryRepository, chatpyme_core::UserId) {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let user = SqlUserRepository::new(pool.clone()).get_or_create(42).await.expect("user");
        (SqlInventoryRepository::new(pool), user)
    }

    #[tokio::test]
    async fn add_product_upserts_by_name() {
        let (repo, user) = setup().await;

        let created = repo
            .add_product(user, NewProduct::new("Laptop", "Electrónica").with_stock(5, 2))
            .await
            .expect("create");
        let updated = repo
            .add_product(
                user,
                NewProduct::new("Laptop", "Electrónica")
                    .with_stock(9, 3)
                    .with_price(Decimal::new(99_999, 2)),
            )
            .await
            .expect("update");

        assert_eq!(created.id, updated.id);
        assert_eq!(updated.stock_current, 9);
        assert_eq!(updated.stock_minimum, 3);
        assert_eq!(updated.price, Decimal::new(99_999, 2));
        assert_eq!(repo.inventory(user).await.expect("inventory").items.len(), 1);
    }

    #[tokio::test]
    async fn replace_inventory_is_idempotent() {
        let (repo, user) = setup().await;
        repo.add_product(user, NewProduct::new("Temporal", "General").with_stock(1, 1))
            .await
            .expect("seed extra");

        let first = repo.replace_inventory(user, demo_inventory()).await.expect("first reload");
        let snapshot_after_first = repo.inventory(user).await.expect("inventory");
        let second = repo.replace_inventory(user, demo_inventory()).await.expect("second reload");
        let snapshot_after_second = repo.inventory(user).await.expect("inventory");

        assert_eq!(first, 14);
        assert_eq!(second, 14);
        let names = |snapshot: &chatpyme_core::InventorySnapshot| {
            snapshot.items.iter().map(|item| item.name.clone()).collect::<Vec<_>>()
        };
        assert_eq!(names(&snapshot_after_first), names(&snapshot_after_second));
        assert!(!names(&snapshot_after_second).contains(&"Temporal".to_string()));
    }
}
