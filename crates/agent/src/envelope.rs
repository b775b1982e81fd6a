use serde::{Deserialize, Serialize};

use chatpyme_core::domain::inventory::{InventorySnapshot, Product};
use chatpyme_core::domain::movement::{FinancialSummary, Movement};

use crate::intent::Intent;

/// Structured result attached to an envelope, tagged by `type` on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EnvelopePayload {
    Movement(Movement),
    Summary(FinancialSummary),
    Product(Product),
    InventoryReloaded { count: usize },
    Inventory(InventorySnapshot),
}

/// The one shape every dispatch returns. `message` is never blank.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub kind: Intent,
    pub message: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<EnvelopePayload>,
}

impl ResponseEnvelope {
    pub fn success(kind: Intent, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), success: true, payload: None }
    }

    pub fn failure(kind: Intent, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), success: false, payload: None }
    }

    pub fn with_payload(mut self, payload: EnvelopePayload) -> Self {
        self.payload = Some(payload);
        self
    }
}
