use async_trait::async_trait;
use thiserror::Error;

use chatpyme_core::domain::user::UserId;
use chatpyme_db::RepositoryError;

use crate::envelope::EnvelopePayload;
use crate::gateway::GatewayError;

pub mod conversation;
pub mod financial;
pub mod inventory;
pub mod registration;

pub use conversation::ConversationHandler;
pub use financial::{local_financial_summary, FinancialHandler};
pub use inventory::{parse_product_command, InventoryHandler, ProductParseError};
pub use registration::RegistrationHandler;

pub const REGISTRATION_AGENT: &str = "RegistrationAgent";
pub const FINANCIAL_AGENT: &str = "FinancialAgent";
pub const INVENTORY_AGENT: &str = "InventoryAgent";
pub const CONVERSATION_AGENT: &str = "ConversationAgent";

/// What a handler sees: the user, the raw text and a read-only rendering of the context.
#[derive(Clone, Debug)]
pub struct HandlerRequest {
    pub user: UserId,
    pub text: String,
    pub context: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HandlerReply {
    pub message: String,
    pub success: bool,
    pub payload: Option<EnvelopePayload>,
}

impl HandlerReply {
    pub fn success(message: impl Into<String>) -> Self {
        Self { message: message.into(), success: true, payload: None }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self { message: message.into(), success: false, payload: None }
    }

    pub fn with_payload(mut self, payload: EnvelopePayload) -> Self {
        self.payload = Some(payload);
        self
    }
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[async_trait]
pub trait IntentHandler: Send + Sync {
    /// Label recorded on the agent turns this handler produces.
    fn name(&self) -> &'static str;

    async fn handle(&self, request: &HandlerRequest) -> Result<HandlerReply, HandlerError>;
}
