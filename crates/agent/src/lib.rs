//! Agent runtime: intent routing and orchestration for the chat assistant.
//!
//! Every inbound message goes through the same pipeline:
//! 1. **Classification** (`intent`) - ordered local keyword rules, completion service as a
//!    last resort, `conversation` when nothing else applies.
//! 2. **Dispatch** (`dispatcher`) - records the user turn, runs exactly one handler with a
//!    formatted context snapshot and records exactly one agent turn.
//! 3. **Handlers** (`handlers`) - registration, financial summary, inventory and open
//!    conversation. Each composes the completion gateway with the datastore.
//!
//! The completion service is never trusted: `gateway` gives every call two attempts and a
//! timeout, and the data-bearing handlers compute a local answer when both attempts fail or
//! no credential is configured.

pub mod dispatcher;
pub mod envelope;
pub mod gateway;
pub mod handlers;
pub mod history;
pub mod intent;
pub mod llm;
pub mod prompts;
pub mod runtime;
pub mod session;

pub use dispatcher::{ActionDispatcher, DispatchError, DispatchSettings};
pub use envelope::{EnvelopePayload, ResponseEnvelope};
pub use gateway::{CompletionGateway, GatewayError};
pub use handlers::{HandlerError, HandlerReply, HandlerRequest, IntentHandler};
pub use history::{ContextSummary, ConversationContext, Turn, TurnMetadata, TurnRole};
pub use intent::{Intent, IntentClassifier};
pub use llm::{build_llm_client, CompletionRequest, LlmClient, LlmError, OpenAiChatClient};
pub use runtime::AgentRuntime;
pub use session::{SessionId, SessionRegistry};

#[cfg(test)]
pub(crate) mod test_support;
