pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_with_config, connect_with_settings, ping, DbPool};
pub use fixtures::{demo_inventory, demo_movements, seed_user_demo_data, SeedResult};
pub use repositories::{
    InMemoryInventoryRepository, InMemoryMovementRepository, InMemoryUserRepository,
    InventoryRepository, MovementRepository, RepositoryError, SqlInventoryRepository,
    SqlMovementRepository, SqlUserRepository, UserRepository,
};
