use async_trait::async_trait;

use super::{HandlerError, HandlerReply, HandlerRequest, IntentHandler, CONVERSATION_AGENT};
use crate::gateway::CompletionGateway;
use crate::llm::CompletionRequest;
use crate::prompts::CONVERSATION_PROMPT;

pub const OFFLINE_GUIDE: &str = "¡Hola! Soy Fina. Puedo ayudarte a registrar ventas y gastos \
(por ejemplo: 'Vendí 2 gorras por $40,000'), revisar cómo van tus finanzas o consultar tu \
inventario. ¿Por dónde empezamos?";

/// Open chat with the assistant persona. The only handler whose gateway failure is returned
/// to the caller.
pub struct ConversationHandler {
    gateway: CompletionGateway,
}

impl ConversationHandler {
    pub fn new(gateway: CompletionGateway) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl IntentHandler for ConversationHandler {
    fn name(&self) -> &'static str {
        CONVERSATION_AGENT
    }

    async fn handle(&self, request: &HandlerRequest) -> Result<HandlerReply, HandlerError> {
        if !self.gateway.is_available() {
            return Ok(HandlerReply::success(OFFLINE_GUIDE));
        }

        let completion = CompletionRequest::new(CONVERSATION_PROMPT, request.text.as_str(), 0.7)
            .with_context(request.context.as_str());
        let reply = self.gateway.complete(&completion).await?;
        Ok(HandlerReply::success(reply))
    }
}
