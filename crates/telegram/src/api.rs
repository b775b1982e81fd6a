use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use chatpyme_core::config::TelegramConfig;

use crate::events::{ChatRef, TelegramEvent, TelegramUpdate};
use crate::polling::{BotTransport, TransportError};

/// Margin on top of the long-poll timeout before the HTTP client gives up.
const HTTP_TIMEOUT_MARGIN_SECS: u64 = 10;

/// Bot API transport over `reqwest` long polling.
pub struct BotApiTransport {
    http: reqwest::Client,
    api_base_url: String,
    token: SecretString,
    poll_timeout_secs: u64,
    offset: Mutex<i64>,
    pending: Mutex<VecDeque<TelegramUpdate>>,
    stopped: AtomicBool,
}

#[derive(Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Deserialize)]
struct BotIdentity {
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawUpdate {
    update_id: i64,
    #[serde(default)]
    message: Option<RawMessage>,
    #[serde(default)]
    edited_message: Option<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    chat: RawChat,
    #[serde(default)]
    from: Option<RawUser>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawChat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    id: i64,
}

#[derive(Serialize)]
struct GetUpdatesBody {
    offset: i64,
    timeout: u64,
    allowed_updates: [&'static str; 1],
}

#[derive(Serialize)]
struct SendMessageBody<'a> {
    chat_id: i64,
    text: &'a str,
}

impl BotApiTransport {
    pub fn new(config: &TelegramConfig) -> Result<Self, TransportError> {
        let token = config
            .bot_token
            .clone()
            .ok_or_else(|| TransportError::Connect("bot token is not configured".to_string()))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.poll_timeout_secs + HTTP_TIMEOUT_MARGIN_SECS))
            .build()
            .map_err(|error| TransportError::Connect(error.without_url().to_string()))?;

        Ok(Self {
            http,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            token,
            poll_timeout_secs: config.poll_timeout_secs,
            offset: Mutex::new(0),
            pending: Mutex::new(VecDeque::new()),
            stopped: AtomicBool::new(false),
        })
    }

    /// Makes the next poll report a closed stream so the runner exits cleanly.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base_url, self.token.expose_secret(), method)
    }

    /// Calls one Bot API method. Errors never carry the URL, which embeds the token.
    async fn call<B, T>(&self, method: &str, body: &B) -> Result<T, String>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .http
            .post(self.method_url(method))
            .json(body)
            .send()
            .await
            .map_err(|error| error.without_url().to_string())?;
        let status = response.status();
        let envelope = response
            .json::<ApiResponse<T>>()
            .await
            .map_err(|error| format!("{method}: {}", error.without_url()))?;
        into_result(method, status.as_u16(), envelope)
    }
}

fn into_result<T>(method: &str, status: u16, envelope: ApiResponse<T>) -> Result<T, String> {
    if !envelope.ok {
        let description = envelope.description.unwrap_or_else(|| "no description".to_string());
        return Err(format!("{method} returned status {status}: {description}"));
    }
    envelope.result.ok_or_else(|| format!("{method} returned no result"))
}

fn convert_update(raw: RawUpdate) -> TelegramUpdate {
    let event = match (raw.message, raw.edited_message) {
        (Some(message), _) => {
            let chat = ChatRef {
                chat_id: message.chat.id,
                user_id: message.from.map(|user| user.id).unwrap_or(message.chat.id),
            };
            match message.text {
                Some(text) => TelegramEvent::from_text(chat, &text),
                None => TelegramEvent::Unsupported {
                    chat: Some(chat),
                    kind: "non_text_message".to_string(),
                },
            }
        }
        (None, Some(edited)) => TelegramEvent::Unsupported {
            chat: Some(ChatRef {
                chat_id: edited.chat.id,
                user_id: edited.from.map(|user| user.id).unwrap_or(edited.chat.id),
            }),
            kind: "edited_message".to_string(),
        },
        (None, None) => TelegramEvent::Unsupported { chat: None, kind: "other".to_string() },
    };
    TelegramUpdate { update_id: raw.update_id, event }
}

fn parse_updates(body: &str) -> Result<Vec<TelegramUpdate>, String> {
    let envelope = serde_json::from_str::<ApiResponse<Vec<RawUpdate>>>(body)
        .map_err(|error| error.to_string())?;
    let raw = into_result("getUpdates", 200, envelope)?;
    Ok(raw.into_iter().map(convert_update).collect())
}

#[async_trait]
impl BotTransport for BotApiTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let identity: BotIdentity =
            self.call("getMe", &serde_json::json!({})).await.map_err(TransportError::Connect)?;
        info!(
            event_name = "ingress.telegram.connected",
            bot_username = identity.username.as_deref().unwrap_or("unknown"),
            "telegram bot identity confirmed"
        );
        Ok(())
    }

    async fn next_update(&self) -> Result<Option<TelegramUpdate>, TransportError> {
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                return Ok(None);
            }
            if let Some(update) = self.pending.lock().await.pop_front() {
                return Ok(Some(update));
            }

            let offset = *self.offset.lock().await;
            let body = GetUpdatesBody {
                offset,
                timeout: self.poll_timeout_secs,
                allowed_updates: ["message"],
            };
            let raw: Vec<RawUpdate> =
                self.call("getUpdates", &body).await.map_err(TransportError::Receive)?;
            debug!(event_name = "ingress.telegram.poll", offset, received = raw.len(), "polled updates");
            self.pending.lock().await.extend(raw.into_iter().map(convert_update));
        }
    }

    async fn acknowledge(&self, update_id: i64) -> Result<(), TransportError> {
        let mut offset = self.offset.lock().await;
        *offset = (*offset).max(update_id + 1);
        Ok(())
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), TransportError> {
        let _: serde_json::Value = self
            .call("sendMessage", &SendMessageBody { chat_id, text })
            .await
            .map_err(TransportError::Send)?;
        debug!(event_name = "egress.telegram.reply_sent", chat_id, chars = text.chars().count(), "reply sent");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.pending.lock().await.clear();
        Ok(())
    }
}
