use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use chatpyme_core::config::{AppConfig, AssistantConfig, MAX_SESSION_IDLE_MINUTES};
use chatpyme_core::domain::user::UserId;
use chatpyme_db::{InventoryRepository, MovementRepository};

use crate::dispatcher::{ActionDispatcher, DispatchError, DispatchSettings};
use crate::envelope::ResponseEnvelope;
use crate::gateway::CompletionGateway;
use crate::handlers::{
    ConversationHandler, FinancialHandler, HandlerError, HandlerReply, HandlerRequest,
    IntentHandler, InventoryHandler, RegistrationHandler,
};
use crate::history::ContextSummary;
use crate::intent::{Intent, IntentClassifier};
use crate::llm::build_llm_client;
use crate::session::{SessionId, SessionRegistry};

/// Entry point for every surface: classify, then dispatch under the session and user locks.
pub struct AgentRuntime {
    gateway: CompletionGateway,
    classifier: IntentClassifier,
    dispatcher: ActionDispatcher,
    financial: Arc<FinancialHandler>,
    sessions: SessionRegistry,
    session_idle: chrono::Duration,
    user_locks: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl AgentRuntime {
    pub fn new(
        gateway: CompletionGateway,
        movements: Arc<dyn MovementRepository>,
        inventory: Arc<dyn InventoryRepository>,
        assistant: &AssistantConfig,
    ) -> Self {
        let financial = Arc::new(FinancialHandler::new(
            gateway.clone(),
            movements.clone(),
            assistant.summary_window_days,
            assistant.recent_movements,
        ));
        let dispatcher = ActionDispatcher::new(
            Arc::new(RegistrationHandler::new(gateway.clone(), movements)),
            financial.clone(),
            Arc::new(InventoryHandler::new(gateway.clone(), inventory)),
            Arc::new(ConversationHandler::new(gateway.clone())),
            DispatchSettings::from(assistant),
        );

        Self {
            classifier: IntentClassifier::new(gateway.clone()),
            gateway,
            dispatcher,
            financial,
            sessions: SessionRegistry::new(assistant.max_turns),
            session_idle: idle_window(assistant.session_idle_minutes),
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Builds the completion client from configuration; a missing credential yields a
    /// runtime that answers from local fallbacks.
    pub fn from_config(
        config: &AppConfig,
        movements: Arc<dyn MovementRepository>,
        inventory: Arc<dyn InventoryRepository>,
    ) -> Self {
        let gateway = CompletionGateway::new(
            build_llm_client(&config.llm),
            Duration::from_secs(config.llm.timeout_secs.max(1)),
        );
        Self::new(gateway, movements, inventory, &config.assistant)
    }

    pub fn gateway_available(&self) -> bool {
        self.gateway.is_available()
    }

    pub async fn classify(&self, text: &str) -> Intent {
        self.classifier.classify(text).await
    }

    pub async fn handle_message(
        &self,
        session: &SessionId,
        user: UserId,
        text: &str,
    ) -> Result<ResponseEnvelope, DispatchError> {
        let correlation_id = Uuid::new_v4().to_string();
        let intent = self.classifier.classify(text).await;
        info!(
            event_name = "agent.intent.classified",
            correlation_id = %correlation_id,
            session_id = %session,
            intent = intent.as_str(),
            chars = text.chars().count(),
            "message classified"
        );

        let context = self.sessions.session(session).await;
        let mut context = context.lock().await;
        let user_lock = self.user_lock(user).await;
        let user_guard = user_lock.lock().await;

        let result = self.dispatcher.dispatch(&mut context, user, intent, text).await;
        drop(user_guard);
        self.release_user_lock(user, user_lock).await;
        info!(
            event_name = "agent.dispatch.completed",
            correlation_id = %correlation_id,
            session_id = %session,
            intent = intent.as_str(),
            success = result.as_ref().map(|envelope| envelope.success).unwrap_or(false),
            turns = context.len(),
            "message dispatched"
        );
        result
    }

    /// Like [`handle_message`](Self::handle_message), flattened to the text a chat user sees.
    pub async fn reply(&self, session: &SessionId, user: UserId, text: &str) -> String {
        match self.handle_message(session, user, text).await {
            Ok(envelope) => envelope.message,
            Err(error) => error.user_message().to_string(),
        }
    }

    /// Runs the financial analysis outside any session, without touching conversation history.
    pub async fn analyze_finances(&self, user: UserId) -> Result<HandlerReply, HandlerError> {
        let request = HandlerRequest {
            user,
            text: "Análisis financiero del período".to_string(),
            context: String::new(),
        };
        self.financial.handle(&request).await
    }

    pub async fn reset_session(&self, session: &SessionId) -> bool {
        self.sessions.reset(session).await
    }

    pub async fn session_summary(&self, session: &SessionId) -> ContextSummary {
        self.sessions.session(session).await.lock().await.summary()
    }

    /// Forgets sessions idle for longer than the configured window.
    pub async fn evict_idle_sessions(&self) -> usize {
        let evicted = self.sessions.evict_idle(self.session_idle, Utc::now()).await;
        if evicted > 0 {
            let remaining = self.sessions.len().await;
            info!(
                event_name = "agent.session.evicted",
                evicted,
                remaining,
                "idle sessions evicted"
            );
        }
        evicted
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.len().await
    }

    async fn user_lock(&self, user: UserId) -> Arc<Mutex<()>> {
        self.user_locks.lock().await.entry(user).or_default().clone()
    }

    /// Drops the user's lock entry once no other dispatch holds a handle to it.
    async fn release_user_lock(&self, user: UserId, handle: Arc<Mutex<()>>) {
        drop(handle);
        let mut locks = self.user_locks.lock().await;
        if locks.get(&user).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&user);
        }
    }

    #[cfg(test)]
    async fn user_lock_count(&self) -> usize {
        self.user_locks.lock().await.len()
    }
}

fn idle_window(minutes: u64) -> chrono::Duration {
    let minutes = minutes.clamp(1, MAX_SESSION_IDLE_MINUTES);
    chrono::Duration::minutes(i64::try_from(minutes).unwrap_or(1))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use rust_decimal::Decimal;

    use chatpyme_core::config::AssistantConfig;
    use chatpyme_core::domain::movement::MovementKind;
    use chatpyme_core::domain::user::UserId;
    use chatpyme_db::{
        InMemoryInventoryRepository, InMemoryMovementRepository, InventoryRepository,
        MovementRepository,
    };

    use super::AgentRuntime;
    use crate::envelope::EnvelopePayload;
    use crate::gateway::CompletionGateway;
    use crate::intent::Intent;
    use crate::session::SessionId;
    use crate::test_support::ScriptedLlmClient;

    struct Harness {
        runtime: AgentRuntime,
        movements: Arc<InMemoryMovementRepository>,
        inventory: Arc<InMemoryInventoryRepository>,
        client: Arc<ScriptedLlmClient>,
    }

    fn harness(script: Vec<&str>) -> Harness {
        let client = Arc::new(ScriptedLlmClient::new(
            script.into_iter().map(|line| Ok(line.to_string())).collect(),
        ));
        let movements = Arc::new(InMemoryMovementRepository::default());
        let inventory = Arc::new(InMemoryInventoryRepository::default());
        let runtime = AgentRuntime::new(
            CompletionGateway::new(Some(client.clone()), Duration::from_millis(200)),
            movements.clone(),
            inventory.clone(),
            &AssistantConfig::default(),
        );
        Harness { runtime, movements, inventory, client }
    }

    #[tokio::test]
    async fn sale_is_registered_end_to_end() {
        let harness =
            harness(vec![r#"{"type": "income", "amount": 40000, "category": "Ventas"}"#]);
        let session = SessionId::telegram(10);

        let envelope = harness
            .runtime
            .handle_message(&session, UserId(1), "Vendí 2 gorras por 40000")
            .await
            .expect("envelope");

        assert_eq!(envelope.kind, Intent::Registration);
        assert!(envelope.message.contains("$40,000.00"));
        assert!(matches!(envelope.payload, Some(EnvelopePayload::Movement(_))));

        let stored = harness.movements.recent_movements(UserId(1), 5).await.expect("recent");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].kind, MovementKind::Income);
        assert_eq!(stored[0].amount, Decimal::from(40000));
        assert_eq!(harness.client.calls(), 1);
    }

    #[tokio::test]
    async fn product_is_added_end_to_end_without_completion_calls() {
        let harness = harness(Vec::new());
        let session = SessionId::telegram(11);

        let envelope = harness
            .runtime
            .handle_message(
                &session,
                UserId(2),
                "Agregar Laptop, categoria Electrónica, stock 5, min 2",
            )
            .await
            .expect("envelope");
        assert_eq!(envelope.kind, Intent::Inventory);

        let snapshot = harness.inventory.inventory(UserId(2)).await.expect("inventory");
        let laptop = &snapshot.items[0];
        assert_eq!(laptop.name, "Laptop");
        assert_eq!(laptop.category, "Electrónica");
        assert_eq!((laptop.stock_current, laptop.stock_minimum), (5, 2));
        assert_eq!(harness.client.calls(), 0);
    }

    #[tokio::test]
    async fn mixed_inventory_and_sale_message_routes_to_inventory() {
        let harness = harness(vec!["Tu inventario luce bien."]);
        let envelope = harness
            .runtime
            .handle_message(&SessionId::cli(1), UserId(3), "Agregué 5 camisetas, vendí 2")
            .await
            .expect("envelope");

        assert_eq!(envelope.kind, Intent::Inventory);
        assert!(harness.movements.recent_movements(UserId(3), 5).await.expect("recent").is_empty());
    }

    #[tokio::test]
    async fn movement_round_trips_into_summary() {
        let harness = harness(vec![r#"{"type": "income", "amount": 500, "category": "Sales"}"#]);
        let session = SessionId::api(4);

        harness
            .runtime
            .handle_message(&session, UserId(4), "vendí 500 en Sales")
            .await
            .expect("sale");

        let recent = harness.movements.recent_movements(UserId(4), 1).await.expect("recent");
        assert_eq!(recent[0].amount, Decimal::from(500));
        assert_eq!(recent[0].category, "Sales");
        let summary = harness.movements.summary(UserId(4), 30).await.expect("summary");
        assert_eq!(summary.income_total, Decimal::from(500));
    }

    #[tokio::test]
    async fn sessions_keep_separate_histories_and_reset() {
        let harness = harness(Vec::new());
        let offline = AgentRuntime::new(
            CompletionGateway::unavailable(),
            harness.movements.clone(),
            harness.inventory.clone(),
            &AssistantConfig::default(),
        );
        let first = SessionId::telegram(1);
        let second = SessionId::telegram(2);

        offline.reply(&first, UserId(1), "hola").await;
        offline.reply(&first, UserId(1), "¿cómo voy?").await;
        offline.reply(&second, UserId(2), "hola").await;

        assert_eq!(offline.session_summary(&first).await.total_turns, 4);
        assert_eq!(offline.session_summary(&second).await.total_turns, 2);

        assert!(offline.reset_session(&first).await);
        assert!(offline.session_summary(&first).await.is_empty);
        assert!(!offline.gateway_available());
    }

    #[tokio::test]
    async fn conversation_failure_flattens_to_apology() {
        let harness = harness(Vec::new());
        let reply = harness.runtime.reply(&SessionId::telegram(5), UserId(5), "hola").await;
        assert_eq!(reply, crate::dispatcher::CONVERSATION_APOLOGY);
    }

    #[tokio::test]
    async fn finance_analysis_falls_back_locally_without_recording_turns() {
        let harness = harness(Vec::new());
        let offline = AgentRuntime::new(
            CompletionGateway::unavailable(),
            harness.movements.clone(),
            harness.inventory.clone(),
            &AssistantConfig::default(),
        );

        let reply = offline.analyze_finances(UserId(9)).await.expect("analysis");
        assert!(reply.success);
        assert!(!reply.message.trim().is_empty());
        assert!(matches!(reply.payload, Some(EnvelopePayload::Summary(_))));
        assert!(offline.session_summary(&SessionId::api(9)).await.is_empty);
    }

    #[tokio::test]
    async fn concurrent_sessions_are_processed_independently() {
        let harness = harness(Vec::new());
        let offline = Arc::new(AgentRuntime::new(
            CompletionGateway::unavailable(),
            harness.movements.clone(),
            harness.inventory.clone(),
            &AssistantConfig::default(),
        ));

        let mut tasks = Vec::new();
        for chat in 0..8 {
            let runtime = offline.clone();
            tasks.push(tokio::spawn(async move {
                let session = SessionId::telegram(chat);
                for _ in 0..5 {
                    runtime.reply(&session, UserId(chat), "hola").await;
                }
                runtime.session_summary(&session).await.total_turns
            }));
        }
        for task in tasks {
            assert_eq!(task.await.expect("task"), 10);
        }
    }

    #[tokio::test]
    async fn user_locks_are_released_and_active_sessions_survive_the_sweep() {
        let harness = harness(Vec::new());
        let offline = AgentRuntime::new(
            CompletionGateway::unavailable(),
            harness.movements.clone(),
            harness.inventory.clone(),
            &AssistantConfig::default(),
        );

        for chat in 0..3 {
            offline.reply(&SessionId::telegram(chat), UserId(chat), "inventario").await;
        }

        assert_eq!(offline.user_lock_count().await, 0);
        assert_eq!(offline.session_count().await, 3);
        assert_eq!(offline.evict_idle_sessions().await, 0);
        assert_eq!(offline.session_count().await, 3);
    }
}
