use std::env;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use bookworm_cli::commands::{doctor, migrate, orders};
use bookworm_core::domain::order::{Address, OrderId, OrderRecord};
use bookworm_db::{connect, OrderRepository, SqlOrderRepository};
use chrono::{Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("BOOKWORM_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_for_invalid_env() {
    with_env(
        &[("BOOKWORM_DATABASE_URL", "sqlite::memory:"), ("BOOKWORM_LLM_PROVIDER", "openai")],
        || {
            let result = migrate::run();
            assert_eq!(result.exit_code, 2, "openai without an api key must fail validation");

            let payload = parse_payload(&result.output);
            assert_eq!(payload["status"], "error");
            assert_eq!(payload["error_class"], "config_validation");
            assert!(payload["message"].as_str().unwrap_or_default().contains("llm.api_key"));
        },
    );
}

#[test]
fn migrate_reports_connectivity_failure() {
    with_env(&[("BOOKWORM_DATABASE_URL", "sqlite:///nonexistent-dir/bookworm.db")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 4, "expected db connectivity failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "db_connectivity");
    });
}

#[test]
fn orders_rejects_blank_user_id() {
    with_env(&[("BOOKWORM_DATABASE_URL", "sqlite::memory:")], || {
        let result = orders::run("   ", None);
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "invalid_argument");
    });
}

#[test]
fn orders_lists_recent_orders_newest_first() {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = file_url(&dir.path().join("orders.db"));

    with_env(&[("BOOKWORM_DATABASE_URL", &url)], || {
        assert_eq!(migrate::run().exit_code, 0, "migrate the temp database first");
        seed_orders(&url);

        let result = orders::run("reader-42", Some(1));
        assert_eq!(result.exit_code, 0, "expected orders listing to succeed: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "orders");
        let data = payload["data"].as_array().expect("orders data array");
        assert_eq!(data.len(), 1, "limit counts orders, not lines");
        assert_eq!(data[0]["order_id"], "ORD-NEWER");
        assert_eq!(data[0]["items"].as_array().map(Vec::len), Some(2));
        assert_eq!(data[0]["status"], "delivered");

        let everything = parse_payload(&orders::run("reader-42", None).output);
        assert_eq!(everything["data"].as_array().map(Vec::len), Some(2));

        let stranger = parse_payload(&orders::run("reader-7", None).output);
        assert_eq!(stranger["data"].as_array().map(Vec::len), Some(0));
    });
}

#[test]
fn doctor_passes_after_migration() {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = file_url(&dir.path().join("doctor.db"));

    with_env(&[("BOOKWORM_DATABASE_URL", &url)], || {
        let before = doctor::run(true);
        assert_eq!(before.exit_code, 1, "schema check fails before migrate");
        let report = parse_payload(&before.output);
        assert_eq!(report["overall_status"], "fail");
        assert_eq!(check_status(&report, "database_connectivity"), "pass");
        assert_eq!(check_status(&report, "database_schema"), "fail");

        assert_eq!(migrate::run().exit_code, 0);

        let after = doctor::run(true);
        assert_eq!(after.exit_code, 0, "doctor output: {}", after.output);
        let report = parse_payload(&after.output);
        assert_eq!(report["overall_status"], "pass");
        assert_eq!(check_status(&report, "completion_delegate"), "pass");
    });
}

#[test]
fn doctor_skips_dependent_checks_when_config_is_invalid() {
    with_env(&[("BOOKWORM_DIALOGUE_MIN_DELEGATE_CONFIDENCE", "1.5")], || {
        let result = doctor::run(false);
        assert_eq!(result.exit_code, 1);
        assert!(result.output.contains("[fail] config_validation"));
        assert!(result.output.contains("[skip] database_schema"));
    });
}

fn seed_orders(url: &str) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("seed runtime");
    runtime.block_on(async {
        let pool = connect(url).await.expect("connect seed pool");
        let repo = SqlOrderRepository::new(pool.clone());
        repo.insert_order(&[record("ORD-OLDER", 1, 0)]).await.expect("insert older order");
        repo.insert_order(&[record("ORD-NEWER", 1, 60), record("ORD-NEWER", 2, 60)])
            .await
            .expect("insert newer order");
        pool.close().await;
    });
}

fn record(order_id: &str, line_number: u32, minutes: i64) -> OrderRecord {
    let purchased_at = Utc
        .with_ymd_and_hms(2024, 3, 1, 9, 0, 0)
        .single()
        .expect("valid timestamp")
        + Duration::minutes(minutes);
    OrderRecord {
        order_id: OrderId(order_id.to_string()),
        line_number,
        user_id: "reader-42".to_string(),
        title: format!("Volume {line_number}"),
        unit_price: Decimal::new(1099, 2),
        quantity: 1,
        shipping_address: Address {
            street: "12 Elm Row".to_string(),
            city: "Portland".to_string(),
            state: "OR".to_string(),
            zip_code: "97201".to_string(),
        },
        masked_card: "****4242".to_string(),
        purchased_at,
        expected_delivery: purchased_at + Duration::days(3),
    }
}

fn check_status(report: &Value, name: &str) -> String {
    report["checks"]
        .as_array()
        .and_then(|checks| checks.iter().find(|check| check["name"] == name))
        .and_then(|check| check["status"].as_str())
        .unwrap_or("missing")
        .to_string()
}

fn file_url(path: &Path) -> String {
    format!("sqlite://{}?mode=rwc", path.display())
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "BOOKWORM_DATABASE_URL",
        "BOOKWORM_DATABASE_MAX_CONNECTIONS",
        "BOOKWORM_DATABASE_TIMEOUT_SECS",
        "BOOKWORM_LLM_PROVIDER",
        "BOOKWORM_LLM_API_KEY",
        "BOOKWORM_LLM_BASE_URL",
        "BOOKWORM_LLM_MODEL",
        "BOOKWORM_LLM_TIMEOUT_SECS",
        "BOOKWORM_LLM_MAX_RETRIES",
        "BOOKWORM_LLM_RETRY_BASE_DELAY_MS",
        "BOOKWORM_CATALOG_BASE_URL",
        "BOOKWORM_CATALOG_API_KEY",
        "BOOKWORM_CATALOG_TIMEOUT_SECS",
        "BOOKWORM_DIALOGUE_GREET_ON_FIRST_TURN",
        "BOOKWORM_DIALOGUE_MIN_DELEGATE_CONFIDENCE",
        "BOOKWORM_DIALOGUE_TURN_TIMEOUT_SECS",
        "BOOKWORM_ORDERS_DELIVERY_LEAD_DAYS",
        "BOOKWORM_ORDERS_HISTORY_LIMIT",
        "BOOKWORM_SERVER_BIND_ADDRESS",
        "BOOKWORM_SERVER_PORT",
        "BOOKWORM_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "BOOKWORM_LOGGING_LEVEL",
        "BOOKWORM_LOGGING_FORMAT",
        "BOOKWORM_LOG_LEVEL",
        "BOOKWORM_LOG_FORMAT",
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
