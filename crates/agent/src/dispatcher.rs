use std::sync::Arc;

use serde_json::json;
use thiserror::Error;
use tracing::warn;

use chatpyme_core::config::AssistantConfig;
use chatpyme_core::domain::user::UserId;

use crate::envelope::ResponseEnvelope;
use crate::handlers::{HandlerError, HandlerReply, HandlerRequest, IntentHandler};
use crate::history::{ConversationContext, TurnMetadata, DEFAULT_CONTEXT_TURNS};
use crate::intent::Intent;

pub const INVENTORY_RETRY_MESSAGE: &str = "Revisé tu inventario, pero no pude generar el análisis \
en este momento. ¿Quieres que lo intente de nuevo?";

pub const CONVERSATION_APOLOGY: &str =
    "Perdón, no pude responderte en este momento. ¿Puedes intentarlo de nuevo en unos segundos?";

const EMPTY_REPLY_MESSAGE: &str = "No tengo una respuesta para eso todavía. ¿Puedes contarme un \
poco más?";

const DEFAULT_EXCERPT_CHARS: usize = 100;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("conversation handler failed: {0}")]
    Conversation(#[source] HandlerError),
}

impl DispatchError {
    /// Text the chat surface shows instead of the error.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Conversation(_) => CONVERSATION_APOLOGY,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Turns rendered into each handler's context snapshot.
    pub context_turns: usize,
    /// Characters of summary and inventory replies kept in the context.
    pub context_excerpt_chars: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self { context_turns: DEFAULT_CONTEXT_TURNS, context_excerpt_chars: DEFAULT_EXCERPT_CHARS }
    }
}

impl From<&AssistantConfig> for DispatchSettings {
    fn from(config: &AssistantConfig) -> Self {
        Self {
            context_turns: config.context_turns,
            context_excerpt_chars: config.context_excerpt_chars,
        }
    }
}

/// Routes one classified message to its handler and keeps the session context in step:
/// one user turn before the handler runs, one agent turn after.
pub struct ActionDispatcher {
    registration: Arc<dyn IntentHandler>,
    financial: Arc<dyn IntentHandler>,
    inventory: Arc<dyn IntentHandler>,
    conversation: Arc<dyn IntentHandler>,
    settings: DispatchSettings,
}

impl ActionDispatcher {
    pub fn new(
        registration: Arc<dyn IntentHandler>,
        financial: Arc<dyn IntentHandler>,
        inventory: Arc<dyn IntentHandler>,
        conversation: Arc<dyn IntentHandler>,
        settings: DispatchSettings,
    ) -> Self {
        Self { registration, financial, inventory, conversation, settings }
    }

    fn handler_for(&self, intent: Intent) -> &dyn IntentHandler {
        match intent {
            Intent::Registration => self.registration.as_ref(),
            Intent::Summary => self.financial.as_ref(),
            Intent::Inventory => self.inventory.as_ref(),
            Intent::Conversation => self.conversation.as_ref(),
        }
    }

    pub async fn dispatch(
        &self,
        context: &mut ConversationContext,
        user: UserId,
        intent: Intent,
        text: &str,
    ) -> Result<ResponseEnvelope, DispatchError> {
        context.add_user_turn(text, metadata([("intent", json!(intent.as_str()))]));

        let handler = self.handler_for(intent);
        let snapshot = match intent {
            Intent::Conversation => context.format_context(Some(self.settings.context_turns)),
            _ => context.format_for_handler(handler.name(), self.settings.context_turns),
        };
        let request = HandlerRequest { user, text: text.to_string(), context: snapshot };

        let reply = match handler.handle(&request).await {
            Ok(reply) => reply,
            Err(error) if intent == Intent::Conversation => {
                warn!(
                    event_name = "agent.dispatch.conversation_failed",
                    handler = handler.name(),
                    user_id = user.0,
                    error = %error,
                    "conversation handler exhausted its attempts"
                );
                context.add_agent_turn(
                    handler.name(),
                    CONVERSATION_APOLOGY,
                    metadata([("success", json!(false)), ("error", json!(error.to_string()))]),
                );
                return Err(DispatchError::Conversation(error));
            }
            Err(error) => {
                warn!(
                    event_name = "agent.dispatch.handler_failed",
                    handler = handler.name(),
                    intent = intent.as_str(),
                    user_id = user.0,
                    error = %error,
                    "handler failed; returning failure envelope"
                );
                HandlerReply::failure(failure_message(intent))
            }
        };

        let message = non_blank_message(intent, reply.message);
        let recorded = match intent {
            Intent::Summary | Intent::Inventory => {
                excerpt(&message, self.settings.context_excerpt_chars)
            }
            Intent::Registration | Intent::Conversation => message.clone(),
        };
        context.add_agent_turn(
            handler.name(),
            recorded,
            metadata([("success", json!(reply.success))]),
        );

        Ok(ResponseEnvelope {
            kind: intent,
            message,
            success: reply.success,
            payload: reply.payload,
        })
    }
}

fn failure_message(intent: Intent) -> &'static str {
    match intent {
        Intent::Registration => {
            "No pude guardar el movimiento en este momento. Inténtalo de nuevo en unos minutos."
        }
        Intent::Summary => {
            "No pude consultar tus finanzas en este momento. Inténtalo de nuevo en unos minutos."
        }
        Intent::Inventory => {
            "No pude consultar tu inventario en este momento. Inténtalo de nuevo en unos minutos."
        }
        Intent::Conversation => CONVERSATION_APOLOGY,
    }
}

fn non_blank_message(intent: Intent, message: String) -> String {
    if !message.trim().is_empty() {
        return message;
    }
    match intent {
        Intent::Inventory => INVENTORY_RETRY_MESSAGE.to_string(),
        _ => EMPTY_REPLY_MESSAGE.to_string(),
    }
}

/// First `limit` characters, never splitting a code point.
fn excerpt(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

fn metadata<const N: usize>(entries: [(&str, serde_json::Value); N]) -> TurnMetadata {
    entries.into_iter().map(|(key, value)| (key.to_string(), value)).collect()
}
