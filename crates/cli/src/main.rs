use std::process::ExitCode;

fn main() -> ExitCode {
    chatpyme_cli::run()
}
