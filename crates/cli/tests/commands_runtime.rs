use std::env;
use std::sync::{Mutex, OnceLock};

use chatpyme_cli::commands::{ask, doctor, migrate, seed};
use serde_json::Value;

const MEMORY_DB: (&str, &str) = ("CHATPYME_DATABASE_URL", "sqlite::memory:");

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[MEMORY_DB], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_for_non_sqlite_url() {
    with_env(&[("CHATPYME_DATABASE_URL", "postgres://localhost/chatpyme")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn seed_is_idempotent_across_runs() {
    let directory = tempfile::tempdir().expect("temp dir");
    let url = format!("sqlite://{}", directory.path().join("seed.db").display());

    with_env(&[("CHATPYME_DATABASE_URL", url.as_str())], || {
        let first = seed::run(12345);
        assert_eq!(first.exit_code, 0, "expected first seed invocation success");
        let first_payload = parse_payload(&first.output);
        assert_eq!(first_payload["command"], "seed");
        assert_eq!(first_payload["data"]["products_seeded"], 14);
        assert_eq!(first_payload["data"]["skipped"], false);

        let second = seed::run(12345);
        assert_eq!(second.exit_code, 0, "expected second seed invocation success");
        let second_payload = parse_payload(&second.output);
        assert_eq!(second_payload["data"]["skipped"], true);
        assert_eq!(first_payload["data"]["user_id"], second_payload["data"]["user_id"]);
    });
}

#[test]
fn ask_adds_product_without_completion_service() {
    with_env(&[MEMORY_DB], || {
        let result = ask::run(77, "Agregar Laptop, categoria Electrónica, stock 5, min 2");
        assert_eq!(result.exit_code, 0, "expected ask success: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "ask");
        assert_eq!(payload["data"]["intent"], "inventory");
        assert_eq!(payload["data"]["completion_available"], false);
        assert_eq!(payload["data"]["payload"]["name"], "Laptop");
    });
}

#[test]
fn ask_rejects_blank_text() {
    with_env(&[MEMORY_DB], || {
        let result = ask::run(77, "   ");
        assert_eq!(result.exit_code, 2);
        assert_eq!(parse_payload(&result.output)["error_class"], "invalid_input");
    });
}

#[test]
fn doctor_passes_with_warnings_when_optional_services_are_missing() {
    with_env(&[MEMORY_DB], || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 0, "expected doctor to pass: {}", result.output);

        let report = parse_payload(&result.output);
        assert_eq!(report["overall_status"], "pass");
        let statuses = report["checks"]
            .as_array()
            .expect("checks")
            .iter()
            .map(|check| (check["name"].as_str().unwrap_or(""), check["status"].clone()))
            .collect::<Vec<_>>();
        assert!(statuses.contains(&("completion_service", Value::from("warn"))));
        assert!(statuses.contains(&("database_connectivity", Value::from("pass"))));
    });
}

#[test]
fn doctor_fails_on_invalid_config() {
    with_env(&[("CHATPYME_SERVER_PORT", "not-a-port")], || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 7);
        assert_eq!(parse_payload(&result.output)["overall_status"], "fail");
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "CHATPYME_DATABASE_URL",
        "CHATPYME_DATABASE_MAX_CONNECTIONS",
        "CHATPYME_DATABASE_TIMEOUT_SECS",
        "CHATPYME_TELEGRAM_BOT_TOKEN",
        "TELEGRAM_TOKEN",
        "CHATPYME_LLM_PROVIDER",
        "CHATPYME_LLM_API_KEY",
        "OPENAI_API_KEY",
        "CHATPYME_LLM_BASE_URL",
        "CHATPYME_LLM_MODEL",
        "CHATPYME_LLM_TIMEOUT_SECS",
        "CHATPYME_SERVER_PORT",
        "CHATPYME_SERVER_BIND_ADDRESS",
        "CHATPYME_ASSISTANT_SEED_DEMO_DATA",
        "CHATPYME_ASSISTANT_SESSION_IDLE_MINUTES",
        "CHATPYME_LOGGING_LEVEL",
        "CHATPYME_LOGGING_FORMAT",
        "CHATPYME_LOG_LEVEL",
        "CHATPYME_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
