pub mod config;
pub mod domain;
pub mod errors;
pub mod money;

pub use domain::inventory::{InventorySnapshot, NewProduct, Product, ProductId};
pub use domain::movement::{
    CategoryTotal, FinancialSummary, Movement, MovementId, MovementKind, NewMovement,
};
pub use domain::user::UserId;
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use money::format_currency;
