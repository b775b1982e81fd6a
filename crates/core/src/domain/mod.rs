pub mod inventory;
pub mod movement;
pub mod user;
