use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::money;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    Income,
    Expense,
}

impl MovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
        }
    }

    /// Label used in chat confirmations.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Income => "Ingreso",
            Self::Expense => "Gasto",
        }
    }
}

impl fmt::Display for MovementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementKind {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "income" | "ingreso" => Ok(Self::Income),
            "expense" | "gasto" | "egreso" => Ok(Self::Expense),
            other => Err(DomainError::UnknownMovementKind(other.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MovementId(pub i64);

/// A stored monetary movement. Immutable once written.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub id: MovementId,
    pub kind: MovementKind,
    pub amount: Decimal,
    pub category: String,
    pub description: String,
    pub occurred_at: DateTime<Utc>,
}

/// A validated movement that has not been stored yet.
///
/// Fields are private so a value can only exist after passing validation:
/// the amount is strictly positive, fits in `i64` cents and the category is not blank.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewMovement {
    kind: MovementKind,
    amount: Decimal,
    amount_cents: i64,
    category: String,
    description: String,
}

impl NewMovement {
    pub fn new(
        kind: MovementKind,
        amount: Decimal,
        category: impl Into<String>,
        description: Option<String>,
    ) -> Result<Self, DomainError> {
        let amount = amount.round_dp(2);
        if amount <= Decimal::ZERO {
            return Err(DomainError::NonPositiveAmount(amount));
        }
        let amount_cents = money::to_cents(amount).ok_or(DomainError::AmountOutOfRange(amount))?;

        let category = category.into().trim().to_string();
        if category.is_empty() {
            return Err(DomainError::MissingField("category"));
        }

        let description = description.map(|value| value.trim().to_string()).unwrap_or_default();

        Ok(Self { kind, amount, amount_cents, category, description })
    }

    pub fn parse(
        kind: &str,
        amount: Decimal,
        category: impl Into<String>,
        description: Option<String>,
    ) -> Result<Self, DomainError> {
        Self::new(kind.parse()?, amount, category, description)
    }

    pub fn kind(&self) -> MovementKind {
        self.kind
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn amount_cents(&self) -> i64 {
        self.amount_cents
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryTotal {
    pub category: String,
    pub total: Decimal,
}

/// Aggregates over a trailing window of movements.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinancialSummary {
    pub period_days: u32,
    pub income_total: Decimal,
    pub expense_total: Decimal,
    pub balance: Decimal,
    pub income_by_category: Vec<CategoryTotal>,
    pub expense_by_category: Vec<CategoryTotal>,
    pub movement_count: u64,
}

impl FinancialSummary {
    pub fn empty(period_days: u32) -> Self {
        Self {
            period_days,
            income_total: Decimal::ZERO,
            expense_total: Decimal::ZERO,
            balance: Decimal::ZERO,
            income_by_category: Vec::new(),
            expense_by_category: Vec::new(),
            movement_count: 0,
        }
    }

    /// Plain summation over the given movements; callers pick the window.
    pub fn from_movements<'a>(
        period_days: u32,
        movements: impl IntoIterator<Item = &'a Movement>,
    ) -> Self {
        let mut income = BTreeMap::<String, Decimal>::new();
        let mut expense = BTreeMap::<String, Decimal>::new();
        let mut movement_count = 0u64;

        for movement in movements {
            movement_count += 1;
            let bucket = match movement.kind {
                MovementKind::Income => &mut income,
                MovementKind::Expense => &mut expense,
            };
            *bucket.entry(movement.category.clone()).or_insert(Decimal::ZERO) += movement.amount;
        }

        Self::from_totals(period_days, totals(income), totals(expense), movement_count)
    }

    /// Builds a summary from per-category totals that were aggregated elsewhere.
    pub fn from_totals(
        period_days: u32,
        mut income_by_category: Vec<CategoryTotal>,
        mut expense_by_category: Vec<CategoryTotal>,
        movement_count: u64,
    ) -> Self {
        rank(&mut income_by_category);
        rank(&mut expense_by_category);
        let income_total = income_by_category.iter().map(|entry| entry.total).sum::<Decimal>();
        let expense_total = expense_by_category.iter().map(|entry| entry.total).sum::<Decimal>();

        Self {
            period_days,
            income_total,
            expense_total,
            balance: income_total - expense_total,
            income_by_category,
            expense_by_category,
            movement_count,
        }
    }

    pub fn has_income(&self) -> bool {
        self.income_total > Decimal::ZERO
    }

    pub fn has_expenses(&self) -> bool {
        self.expense_total > Decimal::ZERO
    }
}

fn totals(by_category: BTreeMap<String, Decimal>) -> Vec<CategoryTotal> {
    by_category.into_iter().map(|(category, total)| CategoryTotal { category, total }).collect()
}

fn rank(totals: &mut [CategoryTotal]) {
    totals.sort_by(|left, right| {
        right.total.cmp(&left.total).then_with(|| left.category.cmp(&right.category))
    });
}
