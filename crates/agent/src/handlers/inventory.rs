use std::fmt::Write as _;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;
use tracing::{info, warn};

use chatpyme_core::domain::inventory::{InventorySnapshot, NewProduct, DEFAULT_CATEGORY};
use chatpyme_core::errors::DomainError;
use chatpyme_core::money::format_currency;
use chatpyme_db::{demo_inventory, InventoryRepository};

use super::{HandlerError, HandlerReply, HandlerRequest, IntentHandler, INVENTORY_AGENT};
use crate::envelope::EnvelopePayload;
use crate::gateway::{CompletionGateway, GatewayError};
use crate::llm::{CompletionRequest, LlmError};
use crate::prompts::{INVENTORY_DATA_GAP, INVENTORY_PROMPT};

const RELOAD_TERMS: &[&str] = &[
    "rellenar",
    "seed",
    "cargar prueba",
    "cargar datos",
    "cargar test",
    "reload test data",
    "datos de prueba",
];

const ADD_TERMS: &[&str] =
    &["agregar", "añadir", "añade", "crear producto", "insertar", "add product"];

const LOW_STOCK_TERMS: &[&str] = &["stock bajo", "bajo stock", "critico", "crítico", "low stock"];

pub const PRODUCT_FORMAT_HINT: &str = "No pude extraer el nombre del producto. Por favor indica \
así: 'Agregar [nombre], categoria [xxx], stock [xxx], min [xxx]'";

pub const INVALID_PRODUCT_MESSAGE: &str = "Los datos del producto no son válidos: el stock no \
puede ser negativo. Intenta con: 'Agregar [nombre], categoria [cat], stock [num], min [num]'";

pub const EMPTY_RECOVERY_MESSAGE: &str =
    "Puedo ayudarte a revisar el estado de tu inventario. ¿Qué te gustaría analizar?";

#[derive(Debug, Error, PartialEq)]
pub enum ProductParseError {
    #[error("no product name found after the add verb")]
    MissingName,
    #[error(transparent)]
    Invalid(#[from] DomainError),
}

/// Stock commands handled locally plus narrated inventory status.
pub struct InventoryHandler {
    gateway: CompletionGateway,
    inventory: Arc<dyn InventoryRepository>,
}

impl InventoryHandler {
    pub fn new(gateway: CompletionGateway, inventory: Arc<dyn InventoryRepository>) -> Self {
        Self { gateway, inventory }
    }

    async fn reload(&self, request: &HandlerRequest) -> Result<HandlerReply, HandlerError> {
        let count = self.inventory.replace_inventory(request.user, demo_inventory()).await?;
        info!(
            event_name = "agent.inventory.reloaded",
            user_id = request.user.0,
            count,
            "inventory replaced with demo data"
        );
        Ok(HandlerReply::success(format!(
            "Inventario rellenado con datos de prueba ({count} productos)."
        ))
        .with_payload(EnvelopePayload::InventoryReloaded { count }))
    }

    async fn add(&self, request: &HandlerRequest) -> Result<HandlerReply, HandlerError> {
        let product = match parse_product_command(&request.text) {
            Ok(product) => product,
            Err(ProductParseError::MissingName) => {
                return Ok(HandlerReply::failure(PRODUCT_FORMAT_HINT));
            }
            Err(ProductParseError::Invalid(error)) => {
                warn!(
                    event_name = "agent.inventory.invalid_product",
                    user_id = request.user.0,
                    error = %error,
                    "parsed product failed validation"
                );
                return Ok(HandlerReply::failure(INVALID_PRODUCT_MESSAGE));
            }
        };

        let stored = self.inventory.add_product(request.user, product).await?;
        info!(
            event_name = "agent.inventory.product_upserted",
            user_id = request.user.0,
            product_id = stored.id.0,
            "product stored"
        );
        let message = format!(
            "Producto '{}' agregado correctamente.\nCategoría: {}, Stock: {}, Mínimo: {}",
            stored.name, stored.category, stored.stock_current, stored.stock_minimum
        );
        Ok(HandlerReply::success(message).with_payload(EnvelopePayload::Product(stored)))
    }

    async fn status(&self, request: &HandlerRequest) -> Result<HandlerReply, HandlerError> {
        let snapshot = self.inventory.inventory(request.user).await?;

        let message = if self.gateway.is_available() {
            let completion = CompletionRequest::new(
                INVENTORY_PROMPT,
                format!("Solicitud del usuario: {}", request.text),
                0.6,
            )
            .with_system(inventory_block(&snapshot))
            .with_system(INVENTORY_DATA_GAP)
            .with_context(request.context.as_str());

            match self.gateway.complete(&completion).await {
                Ok(narration) => narration,
                Err(GatewayError::Exhausted { second: LlmError::Empty, .. }) => {
                    EMPTY_RECOVERY_MESSAGE.to_string()
                }
                Err(error) => {
                    warn!(
                        event_name = "agent.inventory.local_fallback",
                        user_id = request.user.0,
                        error = %error,
                        "narration failed; answering from local inventory"
                    );
                    local_inventory_status(&snapshot, &request.text)
                }
            }
        } else {
            local_inventory_status(&snapshot, &request.text)
        };

        Ok(HandlerReply::success(message).with_payload(EnvelopePayload::Inventory(snapshot)))
    }
}

#[async_trait]
impl IntentHandler for InventoryHandler {
    fn name(&self) -> &'static str {
        INVENTORY_AGENT
    }

    async fn handle(&self, request: &HandlerRequest) -> Result<HandlerReply, HandlerError> {
        let lowered = request.text.to_lowercase();
        if RELOAD_TERMS.iter().any(|term| lowered.contains(term)) {
            self.reload(request).await
        } else if ADD_TERMS.iter().any(|term| lowered.contains(term)) {
            self.add(request).await
        } else {
            self.status(request).await
        }
    }
}

pub fn local_inventory_status(snapshot: &InventorySnapshot, text: &str) -> String {
    let lowered = text.to_lowercase();
    if LOW_STOCK_TERMS.iter().any(|term| lowered.contains(term)) {
        let critical = snapshot.critical_items().map(|item| item.name.as_str()).collect::<Vec<_>>();
        if critical.is_empty() {
            return "No hay productos en stock crítico.".to_string();
        }
        return format!("Productos en stock crítico: {}", critical.join(", "));
    }

    if snapshot.is_empty() {
        return "Tu inventario está vacío.".to_string();
    }
    format!(
        "Tu inventario tiene {} productos. ¿Quieres revisar stock bajo, movimientos sin \
         registrar, o algo específico?",
        snapshot.items.len()
    )
}

fn inventory_block(snapshot: &InventorySnapshot) -> String {
    if snapshot.is_empty() {
        return "Inventario actual: vacío.".to_string();
    }

    let mut block = format!(
        "Inventario actual ({} productos, {} en stock crítico). Datos reales, no inventar:\n",
        snapshot.items.len(),
        snapshot.critical_items().count()
    );
    for item in &snapshot.items {
        let _ = write!(
            block,
            "- {} [{}]: stock {}, mínimo {}",
            item.name, item.category, item.stock_current, item.stock_minimum
        );
        if let Some(maximum) = item.stock_maximum {
            let _ = write!(block, ", máximo {maximum}");
        }
        if let Some(days) = item.days_since_last_movement {
            let _ = write!(block, ", {days} días sin movimiento");
        }
        let _ = writeln!(block, ", precio {}", format_currency(item.price));
    }
    block
}

/// Reads `Agregar <name>, categoria <cat>, stock <n>, min <m>` style commands.
///
/// `stock` and `min` fall back to the first and second bare numbers in the text.
pub fn parse_product_command(text: &str) -> Result<NewProduct, ProductParseError> {
    let name = capture(name_pattern(), text)
        .map(strip_trailing_number)
        .filter(|name| name.chars().count() >= 2 && !name.chars().all(|c| c.is_ascii_digit()))
        .ok_or(ProductParseError::MissingName)?;

    let category = capture(category_pattern(), text)
        .map(strip_trailing_number)
        .filter(|category| !category.is_empty())
        .map(|category| title_case_if_lowercase(&category))
        .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());

    let numbers = number_pattern()
        .map(|pattern| {
            pattern
                .find_iter(text)
                .filter_map(|found| found.as_str().parse::<i64>().ok())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let stock = capture(stock_pattern(), text)
        .and_then(|raw| raw.parse::<i64>().ok())
        .or_else(|| numbers.first().copied())
        .unwrap_or(0);
    let minimum = capture(minimum_pattern(), text)
        .and_then(|raw| raw.parse::<i64>().ok())
        .or_else(|| numbers.get(1).copied())
        .unwrap_or(0);

    Ok(NewProduct::new(title_case_if_lowercase(&name), category)
        .with_stock(stock, minimum)
        .validate()?)
}

fn capture<'t>(pattern: Option<&Regex>, text: &'t str) -> Option<&'t str> {
    pattern?.captures(text)?.get(1).map(|found| found.as_str())
}

fn strip_trailing_number(raw: &str) -> String {
    let trimmed = raw.trim();
    match trailing_number_pattern() {
        Some(pattern) => pattern.replace(trimmed, "").trim().to_string(),
        None => trimmed.to_string(),
    }
}

fn title_case_if_lowercase(value: &str) -> String {
    if value.chars().any(char::is_uppercase) {
        return value.to_string();
    }
    value
        .split_whitespace()
        .map(|word| {
            let mut characters = word.chars();
            match characters.next() {
                Some(first) => first.to_uppercase().chain(characters).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn compiled(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

fn name_pattern() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(
        &CELL,
        r"(?i)\b(?:agregar|añadir|añade|crear|insertar|add)\s+(?:(?:producto|product)\s+)?(.+?)(?:\s*,|\s+(?:categor|stock|m[ií]n|precio|sku)|$)",
    )
}

fn category_pattern() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(
        &CELL,
        r"(?i)categor(?:ía|ia)[:\s]+([^,\n]+?)(?:\s*,|\s+(?:stock|m[ií]n|precio|sku)|$)",
    )
}

fn stock_pattern() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&CELL, r"(?i)stock[:\s]+(\d+)")
}

fn minimum_pattern() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&CELL, r"(?i)\bm[ií]n(?:imo)?[:\s]+(\d+)")
}

fn number_pattern() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&CELL, r"\b\d+\b")
}

fn trailing_number_pattern() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&CELL, r"\s+\d+\s*$")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chatpyme_core::domain::inventory::NewProduct;
    use chatpyme_core::domain::user::UserId;
    use chatpyme_db::{demo_inventory, InMemoryInventoryRepository, InventoryRepository};

    use super::{
        parse_product_command, InventoryHandler, ProductParseError, EMPTY_RECOVERY_MESSAGE,
        PRODUCT_FORMAT_HINT,
    };
    use crate::envelope::EnvelopePayload;
    use crate::gateway::CompletionGateway;
    use crate::handlers::{HandlerRequest, IntentHandler};
    use crate::llm::LlmError;
    use crate::test_support::ScriptedLlmClient;

    fn request(text: &str) -> HandlerRequest {
        HandlerRequest { user: UserId(7), text: text.to_string(), context: String::new() }
    }

    fn offline(repository: Arc<InMemoryInventoryRepository>) -> InventoryHandler {
        InventoryHandler::new(CompletionGateway::unavailable(), repository)
    }

    #[test]
    fn parses_full_add_command() {
        let product =
            parse_product_command("Agregar Laptop, categoria Electrónica, stock 5, min 2")
                .expect("parsed");
        assert_eq!(product.name, "Laptop");
        assert_eq!(product.category, "Electrónica");
        assert_eq!(product.stock_current, 5);
        assert_eq!(product.stock_minimum, 2);
    }

    #[test]
    fn parses_keywords_without_commas_and_accented_minimum() {
        let product = parse_product_command("añadir producto tinta negra stock: 12 mínimo: 4")
            .expect("parsed");
        assert_eq!(product.name, "Tinta Negra");
        assert_eq!(product.category, "General");
        assert_eq!((product.stock_current, product.stock_minimum), (12, 4));
    }

    #[test]
    fn bare_numbers_fill_stock_then_minimum() {
        let product = parse_product_command("Agregar Gorra Roja, 30 10").expect("parsed");
        assert_eq!(product.name, "Gorra Roja");
        assert_eq!((product.stock_current, product.stock_minimum), (30, 10));
    }

    #[test]
    fn missing_name_is_reported() {
        assert_eq!(parse_product_command("agregar"), Err(ProductParseError::MissingName));
        assert_eq!(parse_product_command("agregar 5, stock 5"), Err(ProductParseError::MissingName));
    }

    #[tokio::test]
    async fn reload_is_idempotent() {
        let repository = Arc::new(InMemoryInventoryRepository::default());
        let handler = offline(repository.clone());

        let first = handler.handle(&request("rellenar inventario")).await.expect("reply");
        let second = handler.handle(&request("cargar datos de prueba")).await.expect("reply");

        let expected = demo_inventory().len();
        assert_eq!(first.payload, Some(EnvelopePayload::InventoryReloaded { count: expected }));
        assert_eq!(first.payload, second.payload);
        assert_eq!(
            first.message,
            format!("Inventario rellenado con datos de prueba ({expected} productos).")
        );
        assert_eq!(repository.inventory(UserId(7)).await.expect("inventory").items.len(), expected);
    }

    #[tokio::test]
    async fn add_command_upserts_without_completion_calls() {
        let repository = Arc::new(InMemoryInventoryRepository::default());
        let client = Arc::new(ScriptedLlmClient::failing());
        let handler = InventoryHandler::new(
            CompletionGateway::new(Some(client.clone()), Duration::from_millis(200)),
            repository.clone(),
        );

        let reply = handler
            .handle(&request("Agregar Laptop, categoria Electrónica, stock 5, min 2"))
            .await
            .expect("reply");
        assert_eq!(
            reply.message,
            "Producto 'Laptop' agregado correctamente.\nCategoría: Electrónica, Stock: 5, Mínimo: 2"
        );

        handler.handle(&request("Agregar Laptop, stock 9, min 2")).await.expect("reply");
        let snapshot = repository.inventory(UserId(7)).await.expect("inventory");
        assert_eq!(snapshot.items.len(), 1);
        assert_eq!(snapshot.items[0].stock_current, 9);
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn unparseable_add_command_returns_format_hint() {
        let handler = offline(Arc::new(InMemoryInventoryRepository::default()));
        let reply = handler.handle(&request("agregar")).await.expect("reply");
        assert!(!reply.success);
        assert_eq!(reply.message, PRODUCT_FORMAT_HINT);
    }

    #[tokio::test]
    async fn offline_status_reports_critical_items_or_count() {
        let repository = Arc::new(InMemoryInventoryRepository::default());
        let handler = offline(repository.clone());

        let empty = handler.handle(&request("¿cómo está mi inventario?")).await.expect("reply");
        assert_eq!(empty.message, "Tu inventario está vacío.");

        repository
            .add_product(UserId(7), NewProduct::new("Botas", "Calzado").with_stock(3, 3))
            .await
            .expect("stored");
        repository
            .add_product(UserId(7), NewProduct::new("Gorra", "Accesorios").with_stock(40, 10))
            .await
            .expect("stored");

        let critical = handler.handle(&request("¿qué tengo en stock bajo?")).await.expect("reply");
        assert_eq!(critical.message, "Productos en stock crítico: Botas");

        let count = handler.handle(&request("revisa el inventario")).await.expect("reply");
        assert!(count.message.starts_with("Tu inventario tiene 2 productos."));
    }

    #[tokio::test]
    async fn blank_recovery_gets_guidance_and_failures_fall_back() {
        let repository = Arc::new(InMemoryInventoryRepository::default());
        let blank = Arc::new(ScriptedLlmClient::new(vec![
            Err(LlmError::Transport("down".to_string())),
            Ok("  ".to_string()),
        ]));
        let handler = InventoryHandler::new(
            CompletionGateway::new(Some(blank), Duration::from_millis(200)),
            repository.clone(),
        );
        let reply = handler.handle(&request("revisa el inventario")).await.expect("reply");
        assert_eq!(reply.message, EMPTY_RECOVERY_MESSAGE);

        let failing = Arc::new(ScriptedLlmClient::failing());
        let handler = InventoryHandler::new(
            CompletionGateway::new(Some(failing.clone()), Duration::from_millis(200)),
            repository,
        );
        let reply = handler.handle(&request("revisa el inventario")).await.expect("reply");
        assert_eq!(reply.message, "Tu inventario está vacío.");
        assert_eq!(failing.calls(), 2);
    }

    #[tokio::test]
    async fn narration_gets_inventory_data() {
        let repository = Arc::new(InMemoryInventoryRepository::default());
        repository
            .add_product(UserId(7), NewProduct::new("Botas", "Calzado").with_stock(3, 5))
            .await
            .expect("stored");
        let client = Arc::new(ScriptedLlmClient::new(vec![Ok("Repón botas pronto.".to_string())]));
        let handler = InventoryHandler::new(
            CompletionGateway::new(Some(client.clone()), Duration::from_millis(200)),
            repository,
        );

        let reply = handler.handle(&request("¿cómo va el inventario?")).await.expect("reply");
        assert_eq!(reply.message, "Repón botas pronto.");
        assert!(matches!(reply.payload, Some(EnvelopePayload::Inventory(_))));

        let sent = &client.requests()[0];
        assert!(sent.system.iter().any(|block| block.contains("- Botas [Calzado]: stock 3, mínimo 5")));
        assert!(sent.system.iter().any(|block| block.contains("1 en stock crítico")));
    }
}
