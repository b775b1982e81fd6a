use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use chatpyme_agent::{AgentRuntime, SessionId};
use chatpyme_core::domain::user::UserId;
use chatpyme_db::{seed_user_demo_data, InventoryRepository, MovementRepository, UserRepository};
use chatpyme_telegram::events::{EventContext, EventHandlerError};
use chatpyme_telegram::{ChatRef, ConversationService};

/// Connects chat updates to the agent runtime: resolves the chat user, optionally seeds demo
/// data on first contact and keys the conversation by chat.
pub struct AssistantBridge {
    runtime: Arc<AgentRuntime>,
    users: Arc<dyn UserRepository>,
    movements: Arc<dyn MovementRepository>,
    inventory: Arc<dyn InventoryRepository>,
    seed_demo_data: bool,
    seeded: Mutex<HashSet<UserId>>,
}

impl AssistantBridge {
    pub fn new(
        runtime: Arc<AgentRuntime>,
        users: Arc<dyn UserRepository>,
        movements: Arc<dyn MovementRepository>,
        inventory: Arc<dyn InventoryRepository>,
        seed_demo_data: bool,
    ) -> Self {
        Self {
            runtime,
            users,
            movements,
            inventory,
            seed_demo_data,
            seeded: Mutex::new(HashSet::new()),
        }
    }

    async fn resolve_user(&self, chat: ChatRef) -> Result<UserId, EventHandlerError> {
        let user = self
            .users
            .get_or_create(chat.user_id)
            .await
            .map_err(|error| EventHandlerError::Service(error.to_string()))?;

        if self.seed_demo_data {
            self.seed_once(user).await;
        }
        Ok(user)
    }

    /// Seeding problems never block the conversation.
    async fn seed_once(&self, user: UserId) {
        let mut seeded = self.seeded.lock().await;
        if seeded.contains(&user) {
            return;
        }
        match seed_user_demo_data(self.inventory.as_ref(), self.movements.as_ref(), user).await {
            Ok(result) => {
                seeded.insert(user);
                info!(
                    event_name = "system.bridge.demo_seeded",
                    user_id = user.0,
                    skipped = result.skipped,
                    products = result.products_seeded,
                    "demo data checked for chat user"
                );
            }
            Err(error) => warn!(
                event_name = "system.bridge.demo_seed_failed",
                user_id = user.0,
                error = %error,
                "demo data could not be seeded"
            ),
        }
    }
}

#[async_trait]
impl ConversationService for AssistantBridge {
    async fn converse(
        &self,
        chat: ChatRef,
        text: &str,
        ctx: &EventContext,
    ) -> Result<String, EventHandlerError> {
        let user = self.resolve_user(chat).await?;
        info!(
            event_name = "system.bridge.message",
            correlation_id = %ctx.correlation_id,
            chat_id = chat.chat_id,
            user_id = user.0,
            "forwarding chat message to runtime"
        );
        Ok(self.runtime.reply(&SessionId::telegram(chat.chat_id), user, text).await)
    }

    async fn reset(&self, chat: ChatRef, ctx: &EventContext) -> Result<(), EventHandlerError> {
        let existed = self.runtime.reset_session(&SessionId::telegram(chat.chat_id)).await;
        info!(
            event_name = "system.bridge.session_reset",
            correlation_id = %ctx.correlation_id,
            chat_id = chat.chat_id,
            existed,
            "chat session reset"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chatpyme_agent::{AgentRuntime, CompletionGateway, SessionId};
    use chatpyme_core::config::AssistantConfig;
    use chatpyme_core::domain::user::UserId;
    use chatpyme_db::{
        InMemoryInventoryRepository, InMemoryMovementRepository, InMemoryUserRepository,
        InventoryRepository, UserRepository,
    };
    use chatpyme_telegram::events::EventContext;
    use chatpyme_telegram::{ChatRef, ConversationService};

    use super::AssistantBridge;

    struct Fixture {
        bridge: AssistantBridge,
        runtime: Arc<AgentRuntime>,
        users: Arc<InMemoryUserRepository>,
        inventory: Arc<InMemoryInventoryRepository>,
    }

    fn fixture(seed_demo_data: bool) -> Fixture {
        let users = Arc::new(InMemoryUserRepository::default());
        let movements = Arc::new(InMemoryMovementRepository::default());
        let inventory = Arc::new(InMemoryInventoryRepository::default());
        let runtime = Arc::new(AgentRuntime::new(
            CompletionGateway::unavailable(),
            movements.clone(),
            inventory.clone(),
            &AssistantConfig::default(),
        ));
        let bridge = AssistantBridge::new(
            runtime.clone(),
            users.clone(),
            movements,
            inventory.clone(),
            seed_demo_data,
        );
        Fixture { bridge, runtime, users, inventory }
    }

    const CHAT: ChatRef = ChatRef { chat_id: 300, user_id: 42 };

    #[tokio::test]
    async fn converse_routes_through_the_runtime_session_of_the_chat() {
        let fixture = fixture(false);
        let reply = fixture
            .bridge
            .converse(CHAT, "¿cómo voy este mes?", &EventContext::default())
            .await
            .expect("reply");

        assert!(!reply.trim().is_empty());
        let summary = fixture.runtime.session_summary(&SessionId::telegram(300)).await;
        assert_eq!(summary.total_turns, 2);
    }

    #[tokio::test]
    async fn first_message_seeds_demo_inventory_once() {
        let fixture = fixture(true);
        fixture.bridge.converse(CHAT, "hola", &EventContext::default()).await.expect("first");
        fixture.bridge.converse(CHAT, "hola", &EventContext::default()).await.expect("second");

        let user: UserId = fixture.users.get_or_create(42).await.expect("user");
        let snapshot = fixture.inventory.inventory(user).await.expect("inventory");
        assert_eq!(snapshot.items.len(), 14);
    }

    #[tokio::test]
    async fn reset_clears_the_chat_history() {
        let fixture = fixture(false);
        fixture.bridge.converse(CHAT, "hola", &EventContext::default()).await.expect("reply");
        fixture.bridge.reset(CHAT, &EventContext::default()).await.expect("reset");

        assert!(fixture.runtime.session_summary(&SessionId::telegram(300)).await.is_empty);
    }
}
