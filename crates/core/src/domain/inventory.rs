use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::user::UserId;
use crate::errors::DomainError;
use crate::money;

pub const DEFAULT_CATEGORY: &str = "General";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductId(pub i64);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub category: String,
    pub stock_current: i64,
    pub stock_minimum: i64,
    pub stock_maximum: Option<i64>,
    pub price: Decimal,
    pub sku: Option<String>,
    pub days_since_last_movement: Option<i64>,
}

impl Product {
    /// At or below the configured minimum.
    pub fn is_critical(&self) -> bool {
        self.stock_current <= self.stock_minimum
    }
}

/// Product data before it has an id. Upserts key on `name` within one user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub category: String,
    pub stock_current: i64,
    pub stock_minimum: i64,
    #[serde(default)]
    pub stock_maximum: Option<i64>,
    #[serde(default)]
    pub price: Decimal,
    #[serde(default)]
    pub sku: Option<String>,
}

impl NewProduct {
    pub fn new(name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            stock_current: 0,
            stock_minimum: 0,
            stock_maximum: None,
            price: Decimal::ZERO,
            sku: None,
        }
    }

    pub fn with_stock(mut self, current: i64, minimum: i64) -> Self {
        self.stock_current = current;
        self.stock_minimum = minimum;
        self
    }

    pub fn with_maximum(mut self, maximum: i64) -> Self {
        self.stock_maximum = Some(maximum);
        self
    }

    pub fn with_price(mut self, price: Decimal) -> Self {
        self.price = price;
        self
    }

    pub fn with_sku(mut self, sku: impl Into<String>) -> Self {
        self.sku = Some(sku.into());
        self
    }

    /// Trims text fields, fills the default category and rejects impossible stock values.
    pub fn validate(mut self) -> Result<Self, DomainError> {
        self.name = self.name.trim().to_string();
        if self.name.is_empty() {
            return Err(DomainError::MissingField("name"));
        }

        self.category = self.category.trim().to_string();
        if self.category.is_empty() {
            self.category = DEFAULT_CATEGORY.to_string();
        }

        if self.stock_current < 0 || self.stock_minimum < 0 {
            return Err(DomainError::InvalidProduct(format!(
                "stock values for `{}` must not be negative",
                self.name
            )));
        }
        if let Some(maximum) = self.stock_maximum {
            if maximum < self.stock_minimum {
                return Err(DomainError::InvalidProduct(format!(
                    "maximum stock for `{}` is below its minimum",
                    self.name
                )));
            }
        }
        if self.price < Decimal::ZERO {
            return Err(DomainError::InvalidProduct(format!(
                "price for `{}` must not be negative",
                self.name
            )));
        }
        self.price_cents()?;

        Ok(self)
    }

    pub fn price_cents(&self) -> Result<i64, DomainError> {
        money::to_cents(self.price).ok_or(DomainError::AmountOutOfRange(self.price))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySnapshot {
    pub company_id: UserId,
    pub items: Vec<Product>,
}

impl InventorySnapshot {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn critical_items(&self) -> impl Iterator<Item = &Product> {
        self.items.iter().filter(|product| product.is_critical())
    }
}
