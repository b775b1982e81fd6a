pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "chatpyme",
    about = "ChatPyme operator CLI",
    long_about = "Operate the ChatPyme assistant: migrations, demo data, config inspection, readiness checks and one-shot messages.",
    after_help = "Examples:\n  chatpyme doctor --json\n  chatpyme seed --telegram-id 12345\n  chatpyme ask --telegram-id 12345 \"Vendí 2 gorras por 40000\""
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the demo inventory and movements for one chat user")]
    Seed {
        #[arg(long, help = "Telegram user id that owns the demo data")]
        telegram_id: i64,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, bot token, completion service and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Run one message through classification and dispatch")]
    Ask {
        #[arg(long, help = "Telegram user id the message is attributed to")]
        telegram_id: i64,
        #[arg(required = true, num_args = 1.., help = "Message text")]
        text: Vec<String>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed { telegram_id } => commands::seed::run(telegram_id),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Ask { telegram_id, text } => commands::ask::run(telegram_id, &text.join(" ")),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
