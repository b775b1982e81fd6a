use std::fmt;

/// Bot commands the assistant understands. Anything else is `Unknown`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum BotCommand {
    Start,
    Help,
    Reset,
    Registrar,
    Unknown(String),
}

impl BotCommand {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Start => "start",
            Self::Help => "help",
            Self::Reset => "reset",
            Self::Registrar => "registrar",
            Self::Unknown(name) => name,
        }
    }
}

impl fmt::Display for BotCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedCommand {
    pub command: BotCommand,
    /// Text after the command token, trimmed.
    pub args: String,
}

/// Parses `/command@botname args`. Returns `None` for text that is not a command.
pub fn parse_command(text: &str) -> Option<ParsedCommand> {
    let trimmed = text.trim();
    let rest = trimmed.strip_prefix('/')?;
    let (token, args) = match rest.split_once(char::is_whitespace) {
        Some((token, args)) => (token, args.trim()),
        None => (rest, ""),
    };
    let name = token.split('@').next().unwrap_or(token).to_lowercase();
    if name.is_empty() {
        return None;
    }

    let command = match name.as_str() {
        "start" => BotCommand::Start,
        "help" | "ayuda" => BotCommand::Help,
        "reset" | "reiniciar" => BotCommand::Reset,
        "registrar" => BotCommand::Registrar,
        _ => BotCommand::Unknown(name),
    };
    Some(ParsedCommand { command, args: args.to_string() })
}
