use std::sync::Arc;

use axum::Router;
use thiserror::Error;
use tracing::info;

use chatpyme_agent::AgentRuntime;
use chatpyme_core::config::{AppConfig, ConfigError, LoadOptions};
use chatpyme_db::{
    connect_with_config, migrations, DbPool, InventoryRepository, MovementRepository,
    SqlInventoryRepository, SqlMovementRepository, SqlUserRepository, UserRepository,
};
use chatpyme_telegram::{
    default_dispatcher, BotApiTransport, BotTransport, NoopBotTransport, PollingRunner,
    ReconnectPolicy, TransportError,
};

use crate::api::{self, ApiState};
use crate::bridge::AssistantBridge;
use crate::health::{self, HealthState};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub runtime: Arc<AgentRuntime>,
    pub api_state: ApiState,
    pub telegram_runner: PollingRunner,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("telegram transport setup failed: {0}")]
    Telegram(#[source] TransportError),
}

impl Application {
    pub fn transport_mode(&self) -> &'static str {
        if self.telegram_runner.is_noop_transport() {
            "noop"
        } else {
            "polling"
        }
    }

    /// Health probe plus the JSON API on one listener.
    pub fn router(&self) -> Router {
        health::router(HealthState {
            db_pool: self.db_pool.clone(),
            completion_available: self.runtime.gateway_available(),
            transport_mode: self.transport_mode(),
        })
        .merge(api::router(self.api_state.clone(), &self.config.server))
    }
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let users: Arc<dyn UserRepository> = Arc::new(SqlUserRepository::new(db_pool.clone()));
    let movements: Arc<dyn MovementRepository> =
        Arc::new(SqlMovementRepository::new(db_pool.clone()));
    let inventory: Arc<dyn InventoryRepository> =
        Arc::new(SqlInventoryRepository::new(db_pool.clone()));

    let runtime = Arc::new(AgentRuntime::from_config(&config, movements.clone(), inventory.clone()));
    info!(
        event_name = "system.bootstrap.runtime_ready",
        correlation_id = "bootstrap",
        completion_available = runtime.gateway_available(),
        provider = config.llm.provider.as_str(),
        "agent runtime initialized"
    );

    let bridge = Arc::new(AssistantBridge::new(
        runtime.clone(),
        users.clone(),
        movements.clone(),
        inventory.clone(),
        config.assistant.seed_demo_data,
    ));
    let transport: Arc<dyn BotTransport> = if config.telegram.bot_token.is_some() {
        Arc::new(BotApiTransport::new(&config.telegram).map_err(BootstrapError::Telegram)?)
    } else {
        Arc::new(NoopBotTransport)
    };
    let telegram_runner =
        PollingRunner::new(transport, default_dispatcher(bridge), ReconnectPolicy::default());

    let api_state = ApiState {
        runtime: runtime.clone(),
        users,
        movements,
        inventory,
        summary_window_days: config.assistant.summary_window_days,
    };

    Ok(Application { config, db_pool, runtime, api_state, telegram_runner })
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use chatpyme_core::config::{ConfigOverrides, LoadOptions};

    use crate::bootstrap::bootstrap;

    fn overrides(database_url: &str, telegram_bot_token: Option<&str>) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                telegram_bot_token: telegram_bot_token.map(str::to_string),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_on_malformed_bot_token() {
        let result = bootstrap(overrides("sqlite::memory:", Some("not-a-token"))).await;

        let message = result.err().expect("error").to_string();
        assert!(message.contains("telegram.bot_token"));
    }

    #[tokio::test]
    async fn bootstrap_migrates_and_serves_health() {
        let app = bootstrap(overrides("sqlite::memory:", None))
            .await
            .expect("bootstrap should succeed with an in-memory database");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('users', 'products', 'movements')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("schema query");
        assert_eq!(table_count, 3);
        assert_eq!(app.transport_mode(), "noop");

        let response = app
            .router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn configured_token_selects_polling_transport() {
        let app = bootstrap(overrides("sqlite::memory:", Some("123456:test-secret")))
            .await
            .expect("bootstrap");

        assert_eq!(app.transport_mode(), "polling");
        app.db_pool.close().await;
    }
}
