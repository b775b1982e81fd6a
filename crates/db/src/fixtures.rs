use rust_decimal::Decimal;
use tracing::info;

use chatpyme_core::domain::inventory::NewProduct;
use chatpyme_core::domain::movement::{MovementKind, NewMovement};
use chatpyme_core::domain::user::UserId;

use crate::repositories::{InventoryRepository, MovementRepository, RepositoryError};

/// Demo catalogue: (name, category, stock, minimum, maximum, price in cents).
const DEMO_PRODUCTS: &[(&str, &str, i64, i64, i64, i64)] = &[
    ("Camiseta Básica", "Ropa", 45, 10, 100, 1_599),
    ("Pantalón Jean", "Ropa", 28, 5, 50, 4_999),
    ("Remera Estampada", "Ropa", 32, 8, 60, 2_299),
    ("Sudadera", "Ropa", 18, 5, 40, 3_999),
    ("Gorra", "Accesorios", 35, 10, 80, 1_899),
    ("Cinturón", "Accesorios", 22, 5, 40, 2_599),
    ("Lentes de Sol", "Accesorios", 42, 15, 100, 1_299),
    ("Zapatillas Deportivas", "Calzado", 19, 5, 35, 8_999),
    ("Botas", "Calzado", 12, 3, 25, 9_999),
    ("Sandalias", "Calzado", 31, 10, 60, 3_599),
    ("Cable USB", "Electrónica", 67, 20, 150, 899),
    ("Auriculares", "Electrónica", 24, 5, 50, 3_499),
    ("Jabón", "Cosméticos", 120, 30, 250, 399),
    ("Champú", "Cosméticos", 36, 10, 80, 999),
];

/// Demo movements: (kind, amount in cents, category, description).
const DEMO_MOVEMENTS: &[(MovementKind, i64, &str, &str)] = &[
    (MovementKind::Income, 45_000, "Ventas", "Venta de camisetas y pantalones"),
    (MovementKind::Income, 32_000, "Ventas", "Venta de accesorios"),
    (MovementKind::Expense, 20_000, "Reabastecimiento", "Compra de productos a proveedor"),
    (MovementKind::Expense, 8_550, "Operación", "Gastos de local"),
    (MovementKind::Income, 27_500, "Ventas", "Venta de calzado"),
    (MovementKind::Expense, 15_000, "Reabastecimiento", "Compra de electrónica"),
];

/// The fixed inventory used by the "reload test data" command and by demo seeding.
pub fn demo_inventory() -> Vec<NewProduct> {
    DEMO_PRODUCTS
        .iter()
        .map(|&(name, category, stock, minimum, maximum, price_cents)| {
            NewProduct::new(name, category)
                .with_stock(stock, minimum)
                .with_maximum(maximum)
                .with_price(Decimal::new(price_cents, 2))
        })
        .collect()
}

pub fn demo_movements() -> Vec<NewMovement> {
    DEMO_MOVEMENTS
        .iter()
        .filter_map(|&(kind, cents, category, description)| {
            NewMovement::new(kind, Decimal::new(cents, 2), category, Some(description.to_string()))
                .ok()
        })
        .collect()
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SeedResult {
    pub products_seeded: usize,
    pub movements_seeded: usize,
    /// The user already had products; nothing was written.
    pub skipped: bool,
}

/// Seeds one user's demo inventory and movements. Users that already own products are left
/// untouched, so repeated calls never duplicate data.
pub async fn seed_user_demo_data(
    inventory: &dyn InventoryRepository,
    movements: &dyn MovementRepository,
    user: UserId,
) -> Result<SeedResult, RepositoryError> {
    if !inventory.inventory(user).await?.is_empty() {
        info!(event_name = "db.seed.skipped", user_id = user.0, "user already has inventory");
        return Ok(SeedResult { skipped: true, ..SeedResult::default() });
    }

    let products_seeded = inventory.replace_inventory(user, demo_inventory()).await?;
    let mut movements_seeded = 0;
    for movement in demo_movements() {
        movements.add_movement(user, movement).await?;
        movements_seeded += 1;
    }

    info!(
        event_name = "db.seed.completed",
        user_id = user.0,
        products_seeded,
        movements_seeded,
        "demo data seeded"
    );
    Ok(SeedResult { products_seeded, movements_seeded, skipped: false })
}
