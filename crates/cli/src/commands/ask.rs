use std::sync::Arc;

use serde_json::json;

use chatpyme_agent::{AgentRuntime, SessionId};
use chatpyme_db::{
    SqlInventoryRepository, SqlMovementRepository, SqlUserRepository, UserRepository,
};

use crate::commands::{
    async_runtime, load_config, open_database, CommandResult, EXIT_CONFIG, EXIT_EXECUTION,
};

/// Sends one message through classification and dispatch, as a chat user would.
pub fn run(telegram_id: i64, text: &str) -> CommandResult {
    if text.trim().is_empty() {
        return CommandResult::failure(
            "ask",
            "invalid_input",
            "message text is empty",
            EXIT_CONFIG,
        );
    }
    let config = match load_config("ask") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match async_runtime("ask") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;
        let users = SqlUserRepository::new(pool.clone());
        let agent = AgentRuntime::from_config(
            &config,
            Arc::new(SqlMovementRepository::new(pool.clone())),
            Arc::new(SqlInventoryRepository::new(pool.clone())),
        );

        let outcome = match users.get_or_create(telegram_id).await {
            Ok(user) => agent
                .handle_message(&SessionId::cli(telegram_id), user, text)
                .await
                .map(|envelope| (envelope, agent.gateway_available()))
                .map_err(|error| ("dispatch", error.user_message().to_string(), EXIT_EXECUTION)),
            Err(error) => Err(("user_lookup", error.to_string(), EXIT_EXECUTION)),
        };

        pool.close().await;
        outcome
    });

    match result {
        Ok((envelope, completion_available)) => CommandResult::success_with_data(
            "ask",
            envelope.message.clone(),
            Some(json!({
                "intent": envelope.kind.as_str(),
                "success": envelope.success,
                "completion_available": completion_available,
                "payload": envelope.payload,
            })),
        ),
        Err(failure) => CommandResult::from_failure("ask", failure),
    }
}
