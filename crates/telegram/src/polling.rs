use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::events::{
    default_dispatcher, EventContext, HandlerResult, NoopConversationService, TelegramEvent,
    TelegramUpdate, UpdateDispatcher,
};
use crate::replies;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport ack failed: {0}")]
    Acknowledge(String),
    #[error("transport send failed: {0}")]
    Send(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[async_trait]
pub trait BotTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    /// Next pending update; `None` once the stream is closed.
    async fn next_update(&self) -> Result<Option<TelegramUpdate>, TransportError>;
    /// Marks `update_id` as handled so it is not delivered again.
    async fn acknowledge(&self, update_id: i64) -> Result<(), TransportError>;
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;

    fn is_noop(&self) -> bool {
        false
    }
}

/// Transport used when no bot token is configured. Yields no updates.
#[derive(Default)]
pub struct NoopBotTransport;

#[async_trait]
impl BotTransport for NoopBotTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_update(&self) -> Result<Option<TelegramUpdate>, TransportError> {
        Ok(None)
    }

    async fn acknowledge(&self, _update_id: i64) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send_message(&self, _chat_id: i64, _text: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn is_noop(&self) -> bool {
        true
    }
}

pub struct PollingRunner {
    transport: Arc<dyn BotTransport>,
    dispatcher: Arc<UpdateDispatcher>,
    reconnect_policy: ReconnectPolicy,
}

impl Default for PollingRunner {
    fn default() -> Self {
        Self {
            transport: Arc::new(NoopBotTransport),
            dispatcher: Arc::new(default_dispatcher(Arc::new(NoopConversationService))),
            reconnect_policy: ReconnectPolicy::default(),
        }
    }
}

impl PollingRunner {
    pub fn new(
        transport: Arc<dyn BotTransport>,
        dispatcher: UpdateDispatcher,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { transport, dispatcher: Arc::new(dispatcher), reconnect_policy }
    }

    pub fn is_noop_transport(&self) -> bool {
        self.transport.is_noop()
    }

    pub async fn start(&self) -> Result<()> {
        for attempt in 0..=self.reconnect_policy.max_retries {
            match self.connect_and_pump(attempt).await {
                Ok(()) => return Ok(()),
                Err(transport_error) => {
                    warn!(
                        event_name = "ingress.telegram.transport_failed",
                        attempt,
                        max_retries = self.reconnect_policy.max_retries,
                        error = %transport_error,
                        "telegram transport failed"
                    );

                    if attempt >= self.reconnect_policy.max_retries {
                        warn!(
                            max_retries = self.reconnect_policy.max_retries,
                            "telegram retries exhausted; continuing process without crash"
                        );
                        return Ok(());
                    }

                    let delay = self.reconnect_policy.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Ok(())
    }

    async fn connect_and_pump(&self, attempt: u32) -> Result<(), TransportError> {
        info!(attempt, "opening telegram transport");
        self.transport.connect().await?;
        info!(attempt, "telegram transport connected");

        // One task per update; ordering within a chat comes from the assistant's session lock.
        let mut in_flight = JoinSet::new();
        loop {
            while let Some(finished) = in_flight.try_join_next() {
                log_task_outcome(finished);
            }

            let update = match self.transport.next_update().await {
                Ok(Some(update)) => update,
                Ok(None) => {
                    info!(attempt, "telegram update stream closed");
                    while let Some(finished) = in_flight.join_next().await {
                        log_task_outcome(finished);
                    }
                    self.transport.disconnect().await?;
                    return Ok(());
                }
                Err(error) => {
                    // Replies still in progress finish on their own.
                    in_flight.detach_all();
                    return Err(error);
                }
            };

            let correlation_id = format!("tg-{}", update.update_id);
            info!(
                event_name = "ingress.telegram.update_received",
                update_id = update.update_id,
                event_kind = ?update.event.kind(),
                correlation_id = %correlation_id,
                chat_id = update.event.chat().map(|chat| chat.chat_id).unwrap_or_default(),
                "received telegram update"
            );

            // Acknowledge first so a crash mid-dispatch never replays the same message.
            if let Err(error) = self.transport.acknowledge(update.update_id).await {
                warn!(
                    event_name = "ingress.telegram.ack_failed",
                    update_id = update.update_id,
                    correlation_id = %correlation_id,
                    error = %error,
                    "failed to acknowledge telegram update"
                );
            } else {
                debug!(
                    event_name = "ingress.telegram.ack_sent",
                    update_id = update.update_id,
                    "acknowledged telegram update"
                );
            }

            let transport = self.transport.clone();
            let dispatcher = self.dispatcher.clone();
            in_flight.spawn(handle_update(transport, dispatcher, update, correlation_id));
        }
    }
}

async fn handle_update(
    transport: Arc<dyn BotTransport>,
    dispatcher: Arc<UpdateDispatcher>,
    update: TelegramUpdate,
    correlation_id: String,
) {
    let update_id = update.update_id;
    let apology = apology_target(&update).map(|chat_id| (chat_id, replies::APOLOGY.to_string()));

    let context = EventContext { correlation_id: correlation_id.clone() };
    let dispatch = tokio::spawn(async move { dispatcher.dispatch(&update, &context).await });
    let outbound = match dispatch.await {
        Ok(Ok(HandlerResult::Reply { chat_id, text })) => Some((chat_id, text)),
        Ok(Ok(HandlerResult::Processed | HandlerResult::Ignored)) => None,
        Ok(Err(error)) => {
            warn!(
                event_name = "ingress.telegram.dispatch_failed",
                update_id,
                correlation_id = %correlation_id,
                error = %error,
                "update dispatch failed; replying with apology and continuing"
            );
            apology
        }
        Err(join_error) => {
            error!(
                event_name = "ingress.telegram.dispatch_panicked",
                update_id,
                correlation_id = %correlation_id,
                error = %join_error,
                "update dispatch aborted; replying with apology and continuing"
            );
            apology
        }
    };

    if let Some((chat_id, text)) = outbound {
        if let Err(error) = transport.send_message(chat_id, &text).await {
            warn!(
                event_name = "egress.telegram.send_failed",
                update_id,
                correlation_id = %correlation_id,
                chat_id,
                error = %error,
                "failed to send telegram reply"
            );
        }
    }
}

fn log_task_outcome(outcome: Result<(), JoinError>) {
    if let Err(error) = outcome {
        error!(
            event_name = "ingress.telegram.update_task_failed",
            error = %error,
            "telegram update task ended abnormally"
        );
    }
}

fn apology_target(update: &TelegramUpdate) -> Option<i64> {
    match &update.event {
        TelegramEvent::Command { chat, .. } | TelegramEvent::Text { chat, .. } => {
            Some(chat.chat_id)
        }
        TelegramEvent::Unsupported { .. } => None,
    }
}
