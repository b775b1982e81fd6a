//! Telegram integration - long-polling bot interface
//!
//! This crate provides the chat surface for ChatPyme:
//! - **Polling** (`polling`) - `getUpdates` loop with reconnection logic
//! - **Bot API** (`api`) - `reqwest` transport for `getMe`, `getUpdates` and `sendMessage`
//! - **Commands** (`commands`) - `/start`, `/help`, `/reset`, `/registrar`
//! - **Events** (`events`) - update routing to command and text handlers
//! - **Replies** (`replies`) - fixed reply texts
//!
//! # Architecture
//!
//! ```text
//! Telegram updates → UpdateDispatcher → Handlers → ConversationService → Agent Runtime
//!                         ↓
//!                    sendMessage ← Reply
//! ```
//!
//! Every inbound text gets exactly one non-empty reply; failures become a fixed apology.

pub mod api;
pub mod commands;
pub mod events;
pub mod polling;
pub mod replies;

pub use api::BotApiTransport;
pub use events::{
    default_dispatcher, ChatRef, ConversationService, TelegramEvent, TelegramUpdate,
    UpdateDispatcher,
};
pub use polling::{BotTransport, NoopBotTransport, PollingRunner, ReconnectPolicy, TransportError};
