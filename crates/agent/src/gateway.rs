use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use crate::llm::{CompletionRequest, LlmClient, LlmError};
use crate::prompts::RECOVERY_INSTRUCTION;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("completion service is unavailable")]
    Unavailable,
    #[error("completion attempt failed: {0}")]
    Failed(#[source] LlmError),
    #[error("completion failed twice (first: {first}; recovery: {second})")]
    Exhausted { first: LlmError, second: LlmError },
    #[error("completion output could not be used: {0}")]
    UnusableOutput(String),
}

/// Two-attempt policy around a completion client.
///
/// Attempt one sends the request as given. A failure, timeout or blank answer triggers one
/// recovery attempt with [`RECOVERY_INSTRUCTION`] appended to the system blocks. Callers
/// decide what a final failure means for them.
#[derive(Clone)]
pub struct CompletionGateway {
    client: Option<Arc<dyn LlmClient>>,
    timeout: Duration,
}

impl CompletionGateway {
    pub fn new(client: Option<Arc<dyn LlmClient>>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn unavailable() -> Self {
        Self { client: None, timeout: Duration::from_secs(1) }
    }

    pub fn is_available(&self) -> bool {
        self.client.is_some()
    }

    /// Single bounded attempt with no recovery.
    pub async fn complete_once(&self, request: &CompletionRequest) -> Result<String, GatewayError> {
        let client = self.client.as_ref().ok_or(GatewayError::Unavailable)?;
        self.attempt(client.as_ref(), request).await.map_err(GatewayError::Failed)
    }

    pub async fn complete(&self, request: &CompletionRequest) -> Result<String, GatewayError> {
        let client = self.client.as_ref().ok_or(GatewayError::Unavailable)?;

        let first = match self.attempt(client.as_ref(), request).await {
            Ok(text) => return Ok(text),
            Err(error) => error,
        };
        warn!(
            event_name = "agent.gateway.recovery_attempt",
            client = client.name(),
            error = %first,
            "first completion attempt failed; retrying with recovery instruction"
        );

        self.attempt(client.as_ref(), &recovery(request))
            .await
            .map_err(|second| GatewayError::Exhausted { first, second })
    }

    /// Like [`complete`](Self::complete), but output that does not parse as `T` also counts
    /// as a failed attempt.
    pub async fn complete_structured<T: DeserializeOwned>(
        &self,
        request: &CompletionRequest,
    ) -> Result<T, GatewayError> {
        let client = self.client.as_ref().ok_or(GatewayError::Unavailable)?;

        let first = match self.attempt(client.as_ref(), request).await {
            Ok(text) => match parse_json::<T>(&text) {
                Ok(value) => return Ok(value),
                Err(error) => error,
            },
            Err(error) => error,
        };
        warn!(
            event_name = "agent.gateway.recovery_attempt",
            client = client.name(),
            error = %first,
            "structured completion unusable; retrying with recovery instruction"
        );

        let text = self
            .attempt(client.as_ref(), &recovery(request))
            .await
            .map_err(|second| GatewayError::Exhausted { first, second })?;
        parse_json::<T>(&text).map_err(|error| GatewayError::UnusableOutput(error.to_string()))
    }

    async fn attempt(
        &self,
        client: &dyn LlmClient,
        request: &CompletionRequest,
    ) -> Result<String, LlmError> {
        let text = tokio::time::timeout(self.timeout, client.complete(request))
            .await
            .map_err(|_| LlmError::Timeout(self.timeout))??;

        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(LlmError::Empty);
        }
        debug!(event_name = "agent.gateway.completed", chars = trimmed.chars().count());
        Ok(trimmed.to_string())
    }
}

fn recovery(request: &CompletionRequest) -> CompletionRequest {
    request.clone().with_system(RECOVERY_INSTRUCTION)
}

/// Parses model output as JSON, tolerating markdown code fences and prose around the object.
pub fn parse_json<T: DeserializeOwned>(raw: &str) -> Result<T, LlmError> {
    let stripped = strip_code_fences(raw);
    match serde_json::from_str::<T>(stripped) {
        Ok(value) => Ok(value),
        Err(error) => {
            let embedded = stripped
                .find('{')
                .zip(stripped.rfind('}'))
                .filter(|(start, end)| start < end)
                .map(|(start, end)| &stripped[start..=end]);
            match embedded {
                Some(object) if object != stripped => serde_json::from_str::<T>(object)
                    .map_err(|inner| LlmError::Decode(inner.to_string())),
                _ => Err(LlmError::Decode(error.to_string())),
            }
        }
    }
}

pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde::Deserialize;

    use super::{parse_json, strip_code_fences, CompletionGateway, GatewayError};
    use crate::llm::{CompletionRequest, LlmError};
    use crate::prompts::RECOVERY_INSTRUCTION;
    use crate::test_support::ScriptedLlmClient;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Probe {
        intent: String,
    }

    fn gateway(client: &Arc<ScriptedLlmClient>) -> CompletionGateway {
        CompletionGateway::new(Some(client.clone()), Duration::from_millis(200))
    }

    #[tokio::test]
    async fn first_success_skips_recovery() {
        let client = Arc::new(ScriptedLlmClient::new(vec![Ok("  hola  ".to_string())]));
        let text = gateway(&client)
            .complete(&CompletionRequest::new("system", "hola", 0.7))
            .await
            .expect("completion");

        assert_eq!(text, "hola");
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn blank_first_answer_triggers_recovery_with_instruction() {
        let client = Arc::new(ScriptedLlmClient::new(vec![
            Ok("   ".to_string()),
            Ok("seguimos".to_string()),
        ]));
        let text = gateway(&client)
            .complete(&CompletionRequest::new("system", "hola", 0.7))
            .await
            .expect("completion");

        assert_eq!(text, "seguimos");
        let requests = client.requests();
        assert_eq!(requests.len(), 2);
        assert!(!requests[0].system.iter().any(|block| block == RECOVERY_INSTRUCTION));
        assert_eq!(requests[1].system.last().map(String::as_str), Some(RECOVERY_INSTRUCTION));
        assert_eq!(requests[1].user_text, "hola");
    }

    #[tokio::test]
    async fn two_failures_exhaust_the_gateway() {
        let client = Arc::new(ScriptedLlmClient::new(vec![
            Err(LlmError::Transport("down".to_string())),
            Err(LlmError::Status { status: 500, body: "boom".to_string() }),
        ]));
        let result = gateway(&client).complete(&CompletionRequest::new("s", "u", 0.6)).await;

        assert!(matches!(
            result,
            Err(GatewayError::Exhausted { first: LlmError::Transport(_), second: LlmError::Status { status: 500, .. } })
        ));
    }

    #[tokio::test]
    async fn slow_client_counts_as_failed_attempt() {
        let client = Arc::new(
            ScriptedLlmClient::new(vec![Ok("tarde".to_string()), Ok("a tiempo".to_string())])
                .with_delay_on_call(0, Duration::from_millis(500)),
        );
        let text = gateway(&client)
            .complete(&CompletionRequest::new("s", "u", 0.6))
            .await
            .expect("recovered");

        assert_eq!(text, "a tiempo");
    }

    #[tokio::test]
    async fn missing_client_is_unavailable_without_calls() {
        let gateway = CompletionGateway::unavailable();
        assert!(!gateway.is_available());
        assert!(matches!(
            gateway.complete(&CompletionRequest::new("s", "u", 0.6)).await,
            Err(GatewayError::Unavailable)
        ));
    }

    #[tokio::test]
    async fn unparseable_structured_output_is_retried() {
        let client = Arc::new(ScriptedLlmClient::new(vec![
            Ok("no es json".to_string()),
            Ok("```json\n{\"intent\": \"summary\"}\n```".to_string()),
        ]));
        let probe = gateway(&client)
            .complete_structured::<Probe>(&CompletionRequest::new("s", "u", 0.0))
            .await
            .expect("structured");

        assert_eq!(probe, Probe { intent: "summary".to_string() });
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn structured_output_unusable_twice_is_reported() {
        let client = Arc::new(ScriptedLlmClient::new(vec![
            Ok("{}".to_string()),
            Ok("{\"other\": 1}".to_string()),
        ]));
        let result = gateway(&client)
            .complete_structured::<Probe>(&CompletionRequest::new("s", "u", 0.0))
            .await;

        assert!(matches!(result, Err(GatewayError::UnusableOutput(_))));
    }

    #[test]
    fn strips_fences_and_surrounding_prose() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{\"a\":1}```"), "{\"a\":1}");
        assert_eq!(strip_code_fences(" {\"a\":1} "), "{\"a\":1}");

        let probe: Probe =
            parse_json("Claro: {\"intent\": \"inventory\"} listo").expect("embedded object");
        assert_eq!(probe.intent, "inventory");
    }
}
