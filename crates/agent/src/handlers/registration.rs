use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{info, warn};

use chatpyme_core::domain::movement::NewMovement;
use chatpyme_core::money::{format_currency, parse_amount};
use chatpyme_db::MovementRepository;

use super::{HandlerError, HandlerReply, HandlerRequest, IntentHandler, REGISTRATION_AGENT};
use crate::envelope::EnvelopePayload;
use crate::gateway::{CompletionGateway, GatewayError};
use crate::llm::CompletionRequest;
use crate::prompts::REGISTRATION_PROMPT;

pub const SERVICE_MISSING_MESSAGE: &str = "No está configurada la API key del servicio de IA, \
así que no puedo interpretar movimientos todavía. Configúrala e inténtalo de nuevo.";

pub const EXTRACTION_FAILED_MESSAGE: &str = "No pude extraer la información financiera del \
mensaje. Intenta algo como: 'Vendí 2 productos por $500' o 'Gasté $100 en marketing'";

pub const INVALID_MOVEMENT_MESSAGE: &str = "No entendí el movimiento: necesito si fue ingreso o \
gasto, un monto mayor a cero y una categoría. Por ejemplo: 'Compré mercadería por $2,000'";

#[derive(Debug, Deserialize)]
struct ExtractedMovement {
    #[serde(rename = "type", alias = "tipo")]
    kind: String,
    #[serde(alias = "monto")]
    amount: serde_json::Value,
    #[serde(alias = "categoria", alias = "categoría")]
    category: String,
    #[serde(default, alias = "descripcion", alias = "descripción")]
    description: Option<String>,
}

impl ExtractedMovement {
    fn amount(&self) -> Option<Decimal> {
        match &self.amount {
            serde_json::Value::Number(number) => parse_amount(&number.to_string()),
            serde_json::Value::String(text) => parse_amount(text),
            _ => None,
        }
    }
}

/// Turns a sale or expense report into one stored movement.
pub struct RegistrationHandler {
    gateway: CompletionGateway,
    movements: Arc<dyn MovementRepository>,
}

impl RegistrationHandler {
    pub fn new(gateway: CompletionGateway, movements: Arc<dyn MovementRepository>) -> Self {
        Self { gateway, movements }
    }
}

#[async_trait]
impl IntentHandler for RegistrationHandler {
    fn name(&self) -> &'static str {
        REGISTRATION_AGENT
    }

    async fn handle(&self, request: &HandlerRequest) -> Result<HandlerReply, HandlerError> {
        if !self.gateway.is_available() {
            return Ok(HandlerReply::failure(SERVICE_MISSING_MESSAGE));
        }

        let completion = CompletionRequest::new(REGISTRATION_PROMPT, request.text.as_str(), 0.0)
            .with_context(request.context.as_str());
        let extracted = match self.gateway.complete_structured::<ExtractedMovement>(&completion).await
        {
            Ok(extracted) => extracted,
            Err(error @ (GatewayError::Exhausted { .. } | GatewayError::UnusableOutput(_))) => {
                warn!(
                    event_name = "agent.registration.extraction_failed",
                    user_id = request.user.0,
                    error = %error,
                    "movement could not be extracted"
                );
                return Ok(HandlerReply::failure(EXTRACTION_FAILED_MESSAGE));
            }
            Err(error) => return Err(error.into()),
        };

        let Some(amount) = extracted.amount() else {
            return Ok(HandlerReply::failure(INVALID_MOVEMENT_MESSAGE));
        };
        let movement = match NewMovement::parse(
            &extracted.kind,
            amount,
            extracted.category,
            extracted.description,
        ) {
            Ok(movement) => movement,
            Err(error) => {
                warn!(
                    event_name = "agent.registration.invalid_movement",
                    user_id = request.user.0,
                    error = %error,
                    "extracted movement failed validation"
                );
                return Ok(HandlerReply::failure(INVALID_MOVEMENT_MESSAGE));
            }
        };

        let stored = self.movements.add_movement(request.user, movement).await?;
        info!(
            event_name = "agent.registration.stored",
            user_id = request.user.0,
            movement_id = stored.id.0,
            kind = stored.kind.as_str(),
            "movement registered"
        );

        let message = format!(
            "✅ {} de {} registrado en {}.",
            stored.kind.label(),
            format_currency(stored.amount),
            stored.category
        );
        Ok(HandlerReply::success(message).with_payload(EnvelopePayload::Movement(stored)))
    }
}
