use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_TURNS: usize = 20;
pub const DEFAULT_CONTEXT_TURNS: usize = 10;
const SYSTEM_CONTEXT_TURNS: usize = 15;

pub const EMPTY_HISTORY: &str = "Sin historial previo.";
pub const EMPTY_HANDLER_HISTORY: &str = "Sin contexto previo para este agente.";

const USER_LABEL: &str = "Usuario";

pub type TurnMetadata = BTreeMap<String, serde_json::Value>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Agent,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
    /// Producing handler, set only on agent turns.
    pub handler: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: TurnMetadata,
}

impl Turn {
    fn speaker(&self) -> &str {
        match self.role {
            TurnRole::User => USER_LABEL,
            TurnRole::Agent => self.handler.as_deref().unwrap_or("Agente"),
        }
    }

    fn render(&self) -> String {
        format!("[{}] {}: {}", self.created_at.format("%H:%M"), self.speaker(), self.content)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ContextSummary {
    pub total_turns: usize,
    pub user_turns: usize,
    pub agent_turns: usize,
    pub handlers_used: Vec<String>,
    pub is_empty: bool,
}

/// Bounded turn log for one session. Inserting past `max_turns` evicts the oldest turn.
#[derive(Clone, Debug)]
pub struct ConversationContext {
    turns: VecDeque<Turn>,
    max_turns: usize,
}

impl Default for ConversationContext {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TURNS)
    }
}

impl ConversationContext {
    pub fn new(max_turns: usize) -> Self {
        let max_turns = max_turns.max(1);
        Self { turns: VecDeque::with_capacity(max_turns), max_turns }
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn add_user_turn(&mut self, text: impl Into<String>, metadata: TurnMetadata) {
        self.push(Turn {
            role: TurnRole::User,
            content: text.into(),
            handler: None,
            created_at: Utc::now(),
            metadata,
        });
    }

    pub fn add_agent_turn(
        &mut self,
        handler: impl Into<String>,
        text: impl Into<String>,
        metadata: TurnMetadata,
    ) {
        self.push(Turn {
            role: TurnRole::Agent,
            content: text.into(),
            handler: Some(handler.into()),
            created_at: Utc::now(),
            metadata,
        });
    }

    fn push(&mut self, turn: Turn) {
        while self.turns.len() >= self.max_turns {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    /// Renders the most recent `last_n` turns (default 10), oldest first.
    pub fn format_context(&self, last_n: Option<usize>) -> String {
        let last_n = last_n.unwrap_or(DEFAULT_CONTEXT_TURNS);
        if self.turns.is_empty() {
            return EMPTY_HISTORY.to_string();
        }
        self.recent(last_n).map(Turn::render).collect::<Vec<_>>().join("\n")
    }

    /// Like [`format_context`](Self::format_context), keeping only user turns and turns
    /// produced by `handler` within the window.
    pub fn format_for_handler(&self, handler: &str, last_n: usize) -> String {
        let lines = self
            .recent(last_n)
            .filter(|turn| turn.role == TurnRole::User || turn.handler.as_deref() == Some(handler))
            .map(Turn::render)
            .collect::<Vec<_>>();

        if lines.is_empty() {
            EMPTY_HANDLER_HISTORY.to_string()
        } else {
            lines.join("\n")
        }
    }

    pub fn system_context(&self) -> String {
        if self.turns.is_empty() {
            return String::new();
        }
        let banner = "=".repeat(50);
        format!(
            "{banner}\nHISTORIAL DE CONVERSACIÓN\n{banner}\n{}\n{banner}",
            self.format_context(Some(SYSTEM_CONTEXT_TURNS))
        )
    }

    pub fn last_user_text(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|turn| turn.role == TurnRole::User)
            .map(|turn| turn.content.as_str())
    }

    pub fn summary(&self) -> ContextSummary {
        let user_turns = self.turns.iter().filter(|turn| turn.role == TurnRole::User).count();
        let handlers_used = self
            .turns
            .iter()
            .filter_map(|turn| turn.handler.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        ContextSummary {
            total_turns: self.turns.len(),
            user_turns,
            agent_turns: self.turns.len() - user_turns,
            handlers_used,
            is_empty: self.turns.is_empty(),
        }
    }

    pub fn reset(&mut self) {
        self.turns.clear();
    }

    /// Time of the newest turn.
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.turns.back().map(|turn| turn.created_at)
    }

    fn recent(&self, last_n: usize) -> impl Iterator<Item = &Turn> {
        self.turns.iter().skip(self.turns.len().saturating_sub(last_n))
    }
}
