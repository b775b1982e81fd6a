use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};
use uuid::Uuid;

use chatpyme_agent::{AgentRuntime, ResponseEnvelope, SessionId};
use chatpyme_core::config::ServerConfig;
use chatpyme_core::domain::inventory::{InventorySnapshot, NewProduct, Product};
use chatpyme_core::domain::movement::{FinancialSummary, Movement, NewMovement};
use chatpyme_core::domain::user::UserId;
use chatpyme_core::errors::{ApplicationError, InterfaceError};
use chatpyme_db::{InventoryRepository, MovementRepository, RepositoryError, UserRepository};

const DEFAULT_MOVEMENT_LIMIT: u32 = 10;
const MAX_MOVEMENT_LIMIT: u32 = 100;

#[derive(Clone)]
pub struct ApiState {
    pub runtime: Arc<AgentRuntime>,
    pub users: Arc<dyn UserRepository>,
    pub movements: Arc<dyn MovementRepository>,
    pub inventory: Arc<dyn InventoryRepository>,
    pub summary_window_days: u32,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: &'static str,
    pub detail: String,
    pub correlation_id: String,
}

/// Interface error rendered as JSON with a status matching its class.
pub struct ApiError(InterfaceError);

impl ApiError {
    fn from_application(error: ApplicationError) -> Self {
        Self(error.into_interface(Uuid::new_v4().to_string()))
    }
}

impl From<RepositoryError> for ApiError {
    fn from(error: RepositoryError) -> Self {
        Self::from_application(ApplicationError::Persistence(error.to_string()))
    }
}

impl From<chatpyme_core::DomainError> for ApiError {
    fn from(error: chatpyme_core::DomainError) -> Self {
        Self::from_application(ApplicationError::Domain(error))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        warn!(
            event_name = "system.api.request_failed",
            correlation_id = %self.0.correlation_id(),
            status = status.as_u16(),
            error = %self.0,
            "api request failed"
        );
        let body = ApiErrorBody {
            error: self.0.user_message(),
            detail: self.0.to_string(),
            correlation_id: self.0.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub telegram_id: i64,
    #[serde(default)]
    pub days: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct CreateMovementBody {
    pub telegram_id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub amount: Decimal,
    pub category: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateProductBody {
    pub telegram_id: i64,
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub stock_current: i64,
    #[serde(default)]
    pub stock_minimum: i64,
    #[serde(default)]
    pub stock_maximum: Option<i64>,
    #[serde(default)]
    pub price: Decimal,
    #[serde(default)]
    pub sku: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub telegram_id: i64,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct AnalysisResponse {
    pub analysis: String,
    pub summary: Option<FinancialSummary>,
}

pub fn router(state: ApiState, server: &ServerConfig) -> Router {
    Router::new()
        .route("/api/finance/summary", get(finance_summary))
        .route("/api/finance/analysis", get(finance_analysis))
        .route("/api/finance/movements", get(list_movements).post(create_movement))
        .route("/api/inventory", get(get_inventory).post(create_product))
        .route("/api/chat", post(chat))
        .with_state(state)
        .layer(cors_layer(&server.cors_allowed_origins))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins = allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect::<Vec<_>>();
    let allow_origin =
        if origins.is_empty() { AllowOrigin::from(Any) } else { AllowOrigin::list(origins) };
    CorsLayer::new().allow_origin(allow_origin).allow_methods(Any).allow_headers(Any)
}

async fn resolve_user(state: &ApiState, telegram_id: i64) -> Result<UserId, ApiError> {
    Ok(state.users.get_or_create(telegram_id).await?)
}

async fn finance_summary(
    State(state): State<ApiState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<FinancialSummary>, ApiError> {
    let user = resolve_user(&state, query.telegram_id).await?;
    let days = query.days.unwrap_or(state.summary_window_days).max(1);
    Ok(Json(state.movements.summary(user, days).await?))
}

async fn finance_analysis(
    State(state): State<ApiState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<AnalysisResponse>, ApiError> {
    let user = resolve_user(&state, query.telegram_id).await?;
    let reply = state.runtime.analyze_finances(user).await.map_err(integration_error)?;

    let summary = match reply.payload {
        Some(chatpyme_agent::EnvelopePayload::Summary(summary)) => Some(summary),
        _ => None,
    };
    Ok(Json(AnalysisResponse { analysis: reply.message, summary }))
}

async fn list_movements(
    State(state): State<ApiState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<Vec<Movement>>, ApiError> {
    let user = resolve_user(&state, query.telegram_id).await?;
    let limit = query.limit.unwrap_or(DEFAULT_MOVEMENT_LIMIT).clamp(1, MAX_MOVEMENT_LIMIT);
    Ok(Json(state.movements.recent_movements(user, limit).await?))
}

async fn create_movement(
    State(state): State<ApiState>,
    Json(body): Json<CreateMovementBody>,
) -> Result<(StatusCode, Json<Movement>), ApiError> {
    let user = resolve_user(&state, body.telegram_id).await?;
    let movement = NewMovement::parse(&body.kind, body.amount, body.category, body.description)?;
    let stored = state.movements.add_movement(user, movement).await?;
    info!(
        event_name = "system.api.movement_created",
        user_id = user.0,
        movement_id = stored.id.0,
        "movement created through api"
    );
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn get_inventory(
    State(state): State<ApiState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<InventorySnapshot>, ApiError> {
    let user = resolve_user(&state, query.telegram_id).await?;
    Ok(Json(state.inventory.inventory(user).await?))
}

async fn create_product(
    State(state): State<ApiState>,
    Json(body): Json<CreateProductBody>,
) -> Result<(StatusCode, Json<Product>), ApiError> {
    let user = resolve_user(&state, body.telegram_id).await?;
    let mut product = NewProduct::new(body.name, body.category)
        .with_stock(body.stock_current, body.stock_minimum)
        .with_price(body.price);
    if let Some(maximum) = body.stock_maximum {
        product = product.with_maximum(maximum);
    }
    if let Some(sku) = body.sku {
        product = product.with_sku(sku);
    }
    let stored = state.inventory.add_product(user, product.validate()?).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn chat(
    State(state): State<ApiState>,
    Json(body): Json<ChatBody>,
) -> Result<Json<ResponseEnvelope>, ApiError> {
    if body.message.trim().is_empty() {
        return Err(ApiError::from(chatpyme_core::DomainError::MissingField("message")));
    }
    let user = resolve_user(&state, body.telegram_id).await?;
    let envelope = state
        .runtime
        .handle_message(&SessionId::api(body.telegram_id), user, &body.message)
        .await
        .map_err(integration_error)?;
    Ok(Json(envelope))
}

fn integration_error(error: impl std::fmt::Display) -> ApiError {
    ApiError::from_application(ApplicationError::Integration(error.to_string()))
}
