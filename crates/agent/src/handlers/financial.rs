use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::warn;

use chatpyme_core::domain::movement::{CategoryTotal, FinancialSummary, Movement};
use chatpyme_core::money::format_currency;
use chatpyme_db::MovementRepository;

use super::{HandlerError, HandlerReply, HandlerRequest, IntentHandler, FINANCIAL_AGENT};
use crate::envelope::EnvelopePayload;
use crate::gateway::CompletionGateway;
use crate::llm::CompletionRequest;
use crate::prompts::{FINANCIAL_DATA_GAP, FINANCIAL_PROMPT};

/// Narrates the trailing window of movements, or summarizes it locally when the
/// completion service is missing or fails twice.
pub struct FinancialHandler {
    gateway: CompletionGateway,
    movements: Arc<dyn MovementRepository>,
    window_days: u32,
    recent_limit: u32,
}

impl FinancialHandler {
    pub fn new(
        gateway: CompletionGateway,
        movements: Arc<dyn MovementRepository>,
        window_days: u32,
        recent_limit: u32,
    ) -> Self {
        Self { gateway, movements, window_days, recent_limit }
    }
}

#[async_trait]
impl IntentHandler for FinancialHandler {
    fn name(&self) -> &'static str {
        FINANCIAL_AGENT
    }

    async fn handle(&self, request: &HandlerRequest) -> Result<HandlerReply, HandlerError> {
        let summary = self.movements.summary(request.user, self.window_days).await?;
        let recent = self.movements.recent_movements(request.user, self.recent_limit).await?;

        let message = if self.gateway.is_available() {
            let data = data_block(&summary, &recent);
            let completion = CompletionRequest::new(FINANCIAL_PROMPT, data, 0.6)
                .with_system(FINANCIAL_DATA_GAP)
                .with_context(request.context.as_str());
            match self.gateway.complete(&completion).await {
                Ok(narration) => narration,
                Err(error) => {
                    warn!(
                        event_name = "agent.financial.local_fallback",
                        user_id = request.user.0,
                        error = %error,
                        "narration failed; answering from local aggregates"
                    );
                    local_financial_summary(&summary)
                }
            }
        } else {
            local_financial_summary(&summary)
        };

        Ok(HandlerReply::success(message).with_payload(EnvelopePayload::Summary(summary)))
    }
}

/// Deterministic summary built only from the aggregates.
pub fn local_financial_summary(summary: &FinancialSummary) -> String {
    let days = summary.period_days;
    if !summary.has_income() {
        return "Aún no tienes ingresos registrados. Registra tus primeros movimientos para que \
                te ayude a analizar."
            .to_string();
    }
    if !summary.has_expenses() {
        return format!(
            "En los últimos {days} días facturaste {} sin registrar gastos. ¿Eso es correcto?",
            format_currency(summary.income_total)
        );
    }

    let mut lines = vec![
        format!("En los últimos {days} días:"),
        format!("- Facturaste {}", format_currency(summary.income_total)),
        format!("- Gastaste {}", format_currency(summary.expense_total)),
        format!("- Tu balance es {}", format_currency(summary.balance)),
    ];
    if summary.balance < Decimal::ZERO {
        lines.push("ALERTA: Gastaste más de lo que ganaste este mes.".to_string());
    } else if summary.balance > Decimal::ZERO {
        lines.push(format!("Positivo: Tuviste un superávit de {}", format_currency(summary.balance)));
    }
    lines.push("Registra más movimientos para que te ayude a identificar patrones.".to_string());
    lines.join("\n")
}

fn data_block(summary: &FinancialSummary, recent: &[Movement]) -> String {
    let mut block = format!(
        "Datos de los últimos {} días ({} movimientos):\n\
         Ingresos: {}\nGastos: {}\nBalance: {}\n",
        summary.period_days,
        summary.movement_count,
        format_currency(summary.income_total),
        format_currency(summary.expense_total),
        format_currency(summary.balance),
    );
    push_breakdown(&mut block, "Ingresos por categoría", &summary.income_by_category);
    push_breakdown(&mut block, "Gastos por categoría", &summary.expense_by_category);

    if !recent.is_empty() {
        block.push_str("Movimientos recientes:\n");
        for movement in recent {
            let _ = writeln!(
                block,
                "- {} {} {} ({})",
                movement.occurred_at.format("%Y-%m-%d"),
                movement.kind.label(),
                format_currency(movement.amount),
                movement.category
            );
        }
    }
    block
}

fn push_breakdown(block: &mut String, title: &str, totals: &[CategoryTotal]) {
    if totals.is_empty() {
        return;
    }
    let _ = writeln!(block, "{title}:");
    for total in totals {
        let _ = writeln!(block, "- {}: {}", total.category, format_currency(total.total));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use rust_decimal::Decimal;

    use chatpyme_core::domain::movement::{FinancialSummary, MovementKind, NewMovement};
    use chatpyme_core::domain::user::UserId;
    use chatpyme_db::{InMemoryMovementRepository, MovementRepository};

    use super::{local_financial_summary, FinancialHandler};
    use crate::envelope::EnvelopePayload;
    use crate::gateway::CompletionGateway;
    use crate::handlers::{HandlerRequest, IntentHandler};
    use crate::llm::LlmError;
    use crate::prompts::FINANCIAL_DATA_GAP;
    use crate::test_support::ScriptedLlmClient;

    fn summary(income: i64, expense: i64) -> FinancialSummary {
        let mut summary = FinancialSummary::empty(30);
        summary.income_total = Decimal::from(income);
        summary.expense_total = Decimal::from(expense);
        summary.balance = summary.income_total - summary.expense_total;
        summary
    }

    async fn repository_with(
        movements: &[(MovementKind, i64, &str)],
    ) -> Arc<InMemoryMovementRepository> {
        let repository = Arc::new(InMemoryMovementRepository::default());
        for (kind, amount, category) in movements {
            let movement = NewMovement::new(*kind, Decimal::from(*amount), *category, None)
                .expect("valid movement");
            repository.add_movement(UserId(1), movement).await.expect("stored");
        }
        repository
    }

    fn request() -> HandlerRequest {
        HandlerRequest { user: UserId(1), text: "¿cómo voy?".to_string(), context: String::new() }
    }

    #[test]
    fn zero_income_asks_for_first_movements() {
        let message = local_financial_summary(&summary(0, 300));
        assert!(message.starts_with("Aún no tienes ingresos registrados."));
    }

    #[test]
    fn income_without_expenses_asks_for_confirmation() {
        assert_eq!(
            local_financial_summary(&summary(1500, 0)),
            "En los últimos 30 días facturaste $1,500.00 sin registrar gastos. ¿Eso es correcto?"
        );
    }

    #[test]
    fn negative_balance_adds_alert_line() {
        let message = local_financial_summary(&summary(1000, 1500));
        let lines = message.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "En los últimos 30 días:");
        assert_eq!(lines[1], "- Facturaste $1,000.00");
        assert_eq!(lines[2], "- Gastaste $1,500.00");
        assert_eq!(lines[3], "- Tu balance es -$500.00");
        assert_eq!(lines[4], "ALERTA: Gastaste más de lo que ganaste este mes.");
        assert_eq!(lines.len(), 6);
    }

    #[test]
    fn positive_balance_adds_surplus_line() {
        let message = local_financial_summary(&summary(2000, 500));
        assert!(message.contains("Positivo: Tuviste un superávit de $1,500.00"));
        assert!(message.ends_with("identificar patrones."));
    }

    #[tokio::test]
    async fn unavailable_service_uses_local_summary() {
        let repository = repository_with(&[
            (MovementKind::Income, 500, "Ventas"),
            (MovementKind::Expense, 200, "Renta"),
        ])
        .await;
        let handler = FinancialHandler::new(CompletionGateway::unavailable(), repository, 30, 10);

        let reply = handler.handle(&request()).await.expect("reply");
        assert!(reply.success);
        assert!(reply.message.contains("- Tu balance es $300.00"));
        match reply.payload {
            Some(EnvelopePayload::Summary(summary)) => {
                assert_eq!(summary.income_total, Decimal::from(500));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn narration_receives_aggregates_and_data_gap_instruction() {
        let repository = repository_with(&[(MovementKind::Income, 500, "Sales")]).await;
        let client = Arc::new(ScriptedLlmClient::new(vec![Ok("Vas muy bien.".to_string())]));
        let gateway = CompletionGateway::new(Some(client.clone()), Duration::from_millis(200));
        let handler = FinancialHandler::new(gateway, repository, 30, 10);

        let reply = handler.handle(&request()).await.expect("reply");
        assert_eq!(reply.message, "Vas muy bien.");

        let sent = &client.requests()[0];
        assert!(sent.user_text.contains("Ingresos: $500.00"));
        assert!(sent.user_text.contains("- Sales: $500.00"));
        assert!(sent.system.iter().any(|block| block == FINANCIAL_DATA_GAP));
        assert_eq!(sent.temperature, 0.6);
    }

    #[tokio::test]
    async fn double_failure_falls_back_to_local_summary() {
        let repository = repository_with(&[]).await;
        let client = Arc::new(ScriptedLlmClient::new(vec![
            Err(LlmError::Transport("down".to_string())),
            Err(LlmError::Empty),
        ]));
        let gateway = CompletionGateway::new(Some(client.clone()), Duration::from_millis(200));
        let handler = FinancialHandler::new(gateway, repository, 30, 10);

        let reply = handler.handle(&request()).await.expect("reply");
        assert!(reply.message.starts_with("Aún no tienes ingresos registrados."));
        assert_eq!(client.calls(), 2);
    }
}
