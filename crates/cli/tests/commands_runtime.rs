use std::env;
use std::sync::{Mutex, OnceLock};

use chrono::NaiveDate;
use phasequote_cli::commands::quotation::{self, RateCardChoice};
use phasequote_cli::commands::{config, doctor, migrate, seed};
use serde_json::Value;
use tempfile::TempDir;

const DEMO_ID: &str = "QT-DEMO-0001";

const MEMORY_DB: &[(&str, &str)] =
    &[("PHASEQUOTE_DATABASE_URL", "sqlite::memory:"), ("PHASEQUOTE_DATABASE_MAX_CONNECTIONS", "1")];

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(MEMORY_DB, || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_for_non_sqlite_url() {
    with_env(&[("PHASEQUOTE_DATABASE_URL", "postgres://localhost/phasequote")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn seed_is_idempotent_across_runs() {
    with_env(MEMORY_DB, || {
        let first = seed::run();
        assert_eq!(first.exit_code, 0, "expected first seed invocation success");
        let first_payload = parse_payload(&first.output);
        assert_eq!(first_payload["status"], "ok");
        assert!(first_payload["message"].as_str().unwrap_or_default().contains(DEMO_ID));

        let second = seed::run();
        assert_eq!(second.exit_code, 0, "expected second seed invocation success");
        assert_eq!(first_payload["message"], parse_payload(&second.output)["message"]);
    });
}

#[test]
fn show_reports_stored_demo_quotation() {
    let dir = TempDir::new().expect("tempdir");
    with_env(&file_db(&dir), || {
        assert_eq!(seed::run().exit_code, 0);

        let result = quotation::show(DEMO_ID);
        assert_eq!(result.exit_code, 0, "{}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "show");
        assert_eq!(payload["data"]["id"], DEMO_ID);
        assert_eq!(payload["data"]["status"], "draft");
        assert_eq!(payload["data"]["phases"].as_array().map(Vec::len), Some(2));
    });
}

#[test]
fn unknown_quotation_is_not_found() {
    let dir = TempDir::new().expect("tempdir");
    with_env(&file_db(&dir), || {
        let result = quotation::show("QT-MISSING");
        assert_eq!(result.exit_code, 6);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "not_found");
        assert!(payload["message"].as_str().unwrap_or_default().contains("correlation_id"));
    });
}

#[test]
fn reprice_switches_rate_card_and_persists() {
    let dir = TempDir::new().expect("tempdir");
    with_env(&file_db(&dir), || {
        assert_eq!(seed::run().exit_code, 0);

        let result = quotation::reprice(DEMO_ID, RateCardChoice::Switch("enterprise".to_string()));
        assert_eq!(result.exit_code, 0, "{}", result.output);
        let payload = parse_payload(&result.output);
        assert_eq!(
            payload["message"],
            "re-priced QT-DEMO-0001: 4 updated, 0 without price, 0 failed"
        );
        assert_eq!(payload["data"]["report"]["rate_card_id"], "enterprise");

        let shown = parse_payload(&quotation::show(DEMO_ID).output);
        assert_eq!(shown["data"]["rate_card_id"], "enterprise");
    });
}

#[test]
fn status_workflow_round_trips_through_storage() {
    let dir = TempDir::new().expect("tempdir");
    with_env(&file_db(&dir), || {
        assert_eq!(seed::run().exit_code, 0);

        let submitted = quotation::submit(DEMO_ID, Some(date(2026, 10, 19)));
        assert_eq!(submitted.exit_code, 0, "{}", submitted.output);
        assert_eq!(parse_payload(&submitted.output)["data"]["status"], "unapproved");

        let blocked_reprice = quotation::reprice(DEMO_ID, RateCardChoice::Keep);
        assert_eq!(blocked_reprice.exit_code, 6);
        assert_eq!(parse_payload(&blocked_reprice.output)["error_class"], "validation");

        let approved = quotation::approve(DEMO_ID);
        assert_eq!(approved.exit_code, 0, "{}", approved.output);
        assert_eq!(parse_payload(&approved.output)["data"]["status"], "approved");

        let approved_again = quotation::approve(DEMO_ID);
        assert_eq!(approved_again.exit_code, 6);
        assert_eq!(parse_payload(&approved_again.output)["error_class"], "bad_request");

        let reverted = quotation::revert(DEMO_ID);
        assert_eq!(reverted.exit_code, 0, "{}", reverted.output);
        assert_eq!(parse_payload(&reverted.output)["data"]["status"], "draft");
    });
}

#[test]
fn submit_with_past_phase_start_is_blocked() {
    let dir = TempDir::new().expect("tempdir");
    with_env(&file_db(&dir), || {
        assert_eq!(seed::run().exit_code, 0);

        // The build phase starts on 2027-01-01.
        let result = quotation::submit(DEMO_ID, Some(date(2027, 6, 1)));
        assert_eq!(result.exit_code, 6);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "bad_request");
        assert!(payload["message"].as_str().unwrap_or_default().starts_with("submission blocked"));

        let shown = parse_payload(&quotation::show(DEMO_ID).output);
        assert_eq!(shown["data"]["status"], "draft");
    });
}

#[test]
fn doctor_passes_against_migrated_memory_database() {
    with_env(MEMORY_DB, || {
        let report: Value =
            serde_json::from_str(&doctor::run(true)).expect("doctor output should be JSON");
        assert_eq!(report["overall_status"], "pass", "{report}");
        assert_eq!(report["checks"].as_array().map(Vec::len), Some(3));
    });
}

#[test]
fn doctor_fails_when_http_source_has_no_base_url() {
    with_env(&[("PHASEQUOTE_PRICING_SOURCE", "http")], || {
        let report: Value =
            serde_json::from_str(&doctor::run(true)).expect("doctor output should be JSON");
        assert_eq!(report["overall_status"], "fail");
        assert_eq!(report["checks"][0]["name"], "config_validation");
        assert_eq!(report["checks"][0]["status"], "fail");
    });
}

#[test]
fn config_output_redacts_token_and_attributes_env() {
    with_env(
        &[
            ("PHASEQUOTE_DATABASE_URL", "sqlite::memory:"),
            ("PHASEQUOTE_PRICING_API_TOKEN", "pq_live_supersecret"),
        ],
        || {
            let output = config::run();
            assert!(output.contains(
                "- pricing.api_token = pq_*** (source: env (PHASEQUOTE_PRICING_API_TOKEN))"
            ));
            assert!(output.contains("- pricing.source = sqlite (source: default)"));
            assert!(!output.contains("supersecret"));
        },
    );
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

fn file_db(dir: &TempDir) -> Vec<(&'static str, String)> {
    vec![(
        "PHASEQUOTE_DATABASE_URL",
        format!("sqlite://{}?mode=rwc", dir.path().join("phasequote.db").display()),
    )]
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env<K, V>(vars: &[(K, V)], test_fn: impl FnOnce())
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    let keys = [
        "PHASEQUOTE_DATABASE_URL",
        "PHASEQUOTE_DATABASE_MAX_CONNECTIONS",
        "PHASEQUOTE_DATABASE_TIMEOUT_SECS",
        "PHASEQUOTE_PRICING_SOURCE",
        "PHASEQUOTE_PRICING_BASE_URL",
        "PHASEQUOTE_PRICING_API_TOKEN",
        "PHASEQUOTE_PRICING_TIMEOUT_SECS",
        "PHASEQUOTE_PRICING_MAX_RETRIES",
        "PHASEQUOTE_PRICING_MAX_CONCURRENT_LOOKUPS",
        "PHASEQUOTE_QUOTATION_DEFAULT_CURRENCY",
        "PHASEQUOTE_QUOTATION_DEFAULT_TENURE_MONTHS",
        "PHASEQUOTE_LOGGING_LEVEL",
        "PHASEQUOTE_LOGGING_FORMAT",
        "PHASEQUOTE_LOG_LEVEL",
        "PHASEQUOTE_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key.as_ref(), value.as_ref());
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
