use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;

use crate::commands::{parse_command, BotCommand, ParsedCommand};
use crate::replies;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TelegramUpdate {
    pub update_id: i64,
    pub event: TelegramEvent,
}

/// Who is talking, and where the reply goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChatRef {
    pub chat_id: i64,
    pub user_id: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TelegramEvent {
    Command { chat: ChatRef, command: ParsedCommand },
    Text { chat: ChatRef, text: String },
    Unsupported { chat: Option<ChatRef>, kind: String },
}

impl TelegramEvent {
    /// Classifies a text message as a command or plain text.
    pub fn from_text(chat: ChatRef, text: &str) -> Self {
        match parse_command(text) {
            Some(command) => Self::Command { chat, command },
            None => Self::Text { chat, text: text.to_string() },
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Command { .. } => EventKind::Command,
            Self::Text { .. } => EventKind::Text,
            Self::Unsupported { .. } => EventKind::Unsupported,
        }
    }

    pub fn chat(&self) -> Option<ChatRef> {
        match self {
            Self::Command { chat, .. } | Self::Text { chat, .. } => Some(*chat),
            Self::Unsupported { chat, .. } => *chat,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Command,
    Text,
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Reply { chat_id: i64, text: String },
    Processed,
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error("conversation service failure: {0}")]
    Service(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

/// What the bot needs from the assistant behind it.
#[async_trait]
pub trait ConversationService: Send + Sync {
    /// Runs one message through the assistant and returns the reply text.
    async fn converse(
        &self,
        chat: ChatRef,
        text: &str,
        ctx: &EventContext,
    ) -> Result<String, EventHandlerError>;

    /// Forgets the chat's conversation context.
    async fn reset(&self, chat: ChatRef, ctx: &EventContext) -> Result<(), EventHandlerError>;
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn kind(&self) -> EventKind;
    async fn handle(
        &self,
        update: &TelegramUpdate,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct UpdateDispatcher {
    handlers: HashMap<EventKind, Arc<dyn EventHandler>>,
}

impl UpdateDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.kind(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        update: &TelegramUpdate,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&update.event.kind()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(update, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

/// Dispatcher with the command and text handlers wired to `service`.
pub fn default_dispatcher<S>(service: Arc<S>) -> UpdateDispatcher
where
    S: ConversationService + 'static,
{
    let mut dispatcher = UpdateDispatcher::new();
    dispatcher.register(CommandHandler::new(service.clone()));
    dispatcher.register(TextMessageHandler::new(service));
    dispatcher
}

pub struct CommandHandler<S> {
    service: Arc<S>,
}

impl<S> CommandHandler<S>
where
    S: ConversationService,
{
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> EventHandler for CommandHandler<S>
where
    S: ConversationService + 'static,
{
    fn kind(&self) -> EventKind {
        EventKind::Command
    }

    async fn handle(
        &self,
        update: &TelegramUpdate,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let TelegramEvent::Command { chat, command } = &update.event else {
            return Ok(HandlerResult::Ignored);
        };

        let text = match &command.command {
            BotCommand::Start => replies::START_GREETING.to_string(),
            BotCommand::Help => replies::HELP_TEXT.to_string(),
            BotCommand::Reset => {
                self.service.reset(*chat, ctx).await?;
                replies::RESET_CONFIRMATION.to_string()
            }
            BotCommand::Registrar if command.args.is_empty() => {
                replies::REGISTRAR_USAGE.to_string()
            }
            BotCommand::Registrar => self.service.converse(*chat, &command.args, ctx).await?,
            BotCommand::Unknown(_) => replies::UNKNOWN_COMMAND.to_string(),
        };

        Ok(HandlerResult::Reply { chat_id: chat.chat_id, text: replies::non_empty(text) })
    }
}

pub struct TextMessageHandler<S> {
    service: Arc<S>,
}

impl<S> TextMessageHandler<S>
where
    S: ConversationService,
{
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> EventHandler for TextMessageHandler<S>
where
    S: ConversationService + 'static,
{
    fn kind(&self) -> EventKind {
        EventKind::Text
    }

    async fn handle(
        &self,
        update: &TelegramUpdate,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let TelegramEvent::Text { chat, text } = &update.event else {
            return Ok(HandlerResult::Ignored);
        };
        if text.trim().is_empty() {
            return Ok(HandlerResult::Processed);
        }

        let reply = self.service.converse(*chat, text, ctx).await?;
        Ok(HandlerResult::Reply { chat_id: chat.chat_id, text: replies::non_empty(reply) })
    }
}

/// Echo service for running the bot without an assistant behind it.
#[derive(Default)]
pub struct NoopConversationService;

#[async_trait]
impl ConversationService for NoopConversationService {
    async fn converse(
        &self,
        _chat: ChatRef,
        text: &str,
        _ctx: &EventContext,
    ) -> Result<String, EventHandlerError> {
        Ok(format!("recibido: {text}"))
    }

    async fn reset(&self, _chat: ChatRef, _ctx: &EventContext) -> Result<(), EventHandlerError> {
        Ok(())
    }
}
