use std::env;
use std::fs;
use std::sync::{Mutex, OnceLock};

use aisle_cli::commands::{config, doctor, route, route::RouteArgs};
use aisle_core::config::LoadOptions;
use serde_json::Value;

#[test]
fn route_greeting_returns_heuristic_decision() {
    with_env(&[], || {
        let result = route::run(RouteArgs::new("hello"), LoadOptions::default());
        assert_eq!(result.exit_code, 0, "unexpected output: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "route");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["decision"]["classification"]["intent"], "greeting");
        assert_eq!(payload["decision"]["classification"]["tier"], "heuristic");
    });
}

#[test]
fn route_without_search_backend_is_degraded_not_failed() {
    with_env(&[], || {
        let mut args = RouteArgs::new("oat milk");
        args.limit = Some(2);
        let result = route::run(args, LoadOptions::default());
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["decision"]["degraded"], true);
        assert_eq!(payload["decision"]["results"]["origin"], "static_fallback");
        assert_eq!(payload["decision"]["results"]["items"].as_array().map(Vec::len), Some(2));
    });
}

#[test]
fn route_alpha_override_is_reported() {
    with_env(&[], || {
        let mut args = RouteArgs::new("oatly");
        args.alpha = Some(0.75);
        let result = route::run(args, LoadOptions::default());

        let payload = parse_payload(&result.output);
        assert_eq!(payload["decision"]["alpha_source"], "override");
        assert_eq!(payload["decision"]["which_alpha_used"], 0.75);
    });
}

#[test]
fn route_rejects_out_of_range_alpha() {
    with_env(&[], || {
        let mut args = RouteArgs::new("oat milk");
        args.alpha = Some(1.5);
        let result = route::run(args, LoadOptions::default());
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "invalid_argument");
    });
}

#[test]
fn route_reports_config_failure_for_bad_env() {
    with_env(&[("AISLE_SEARCH_FAILURE_THRESHOLD", "several")], || {
        let result = route::run(RouteArgs::new("oat milk"), LoadOptions::default());
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "route");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn route_human_output_lists_intent_and_results() {
    with_env(&[], || {
        let mut args = RouteArgs::new("oat milk");
        args.json = false;
        let result = route::run(args, LoadOptions::default());
        assert_eq!(result.exit_code, 0);
        assert!(result.output.contains("intent: search"), "{}", result.output);
        assert!(result.output.contains("static_fallback"));
        assert!(result.output.contains("correlation id: req_"));
    });
}

#[test]
fn config_attributes_sources_and_redacts_secrets() {
    with_env(
        &[
            ("AISLE_SEARCH_API_KEY", "sk-live-very-secret"),
            ("AISLE_ORCHESTRATOR_DEADLINE_MS", "650"),
            ("AISLE_LOG_LEVEL", "debug"),
        ],
        || {
            let result = config::run(LoadOptions::default());
            assert_eq!(result.exit_code, 0);

            let output = &result.output;
            assert!(!output.contains("sk-live-very-secret"));
            assert!(output
                .contains("- search.api_key = <redacted> (source: env (AISLE_SEARCH_API_KEY))"));
            assert!(output.contains(
                "- orchestrator.deadline_ms = 650 (source: env (AISLE_ORCHESTRATOR_DEADLINE_MS))"
            ));
            assert!(output.contains("- logging.level = debug (source: env (AISLE_LOG_LEVEL))"));
            assert!(output.contains("- router.cache_ttl_secs = 300 (source: default)"));
        },
    );
}

#[test]
fn config_attributes_file_values() {
    with_env(&[], || {
        let dir = env::temp_dir().join(format!("aisle-cli-config-{}", std::process::id()));
        fs::create_dir_all(&dir).expect("temp dir");
        let path = dir.join("aisle.toml");
        fs::write(&path, "[search]\ndefault_limit = 5\n").expect("write config");

        let options = LoadOptions { config_path: Some(path.clone()), ..LoadOptions::default() };
        let result = config::run(options);
        let _ = fs::remove_dir_all(&dir);

        assert_eq!(result.exit_code, 0, "{}", result.output);
        let expected = format!("- search.default_limit = 5 (source: file ({}))", path.display());
        assert!(result.output.contains(&expected), "{}", result.output);
    });
}

#[test]
fn doctor_flags_missing_search_backend() {
    with_env(&[], || {
        let result = doctor::run(true, LoadOptions::default());
        assert_eq!(result.exit_code, 1);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "fail");
        let checks = payload["checks"].as_array().expect("checks array");
        let status_of = |name: &str| {
            checks
                .iter()
                .find(|check| check["name"] == name)
                .map(|check| check["status"].clone())
                .unwrap_or(Value::Null)
        };
        assert_eq!(status_of("config_validation"), "pass");
        assert_eq!(status_of("classifier"), "skipped");
        assert_eq!(status_of("search_backend"), "fail");
        assert_eq!(status_of("local_routing"), "pass");
    });
}

#[test]
fn doctor_skips_checks_when_config_is_invalid() {
    with_env(&[("AISLE_CLASSIFIER_PROVIDER", "ollama")], || {
        let result = doctor::run(false, LoadOptions::default());
        assert_eq!(result.exit_code, 1);
        assert!(result.output.contains("- [fail] config_validation:"), "{}", result.output);
        assert!(result.output.contains("- [skip] search_backend:"));
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    let keys = [
        "AISLE_ROUTER_CACHE_TTL_SECS",
        "AISLE_ROUTER_CLASSIFIER_TIMEOUT_MS",
        "AISLE_CLASSIFIER_PROVIDER",
        "AISLE_CLASSIFIER_BASE_URL",
        "AISLE_CLASSIFIER_API_KEY",
        "AISLE_CLASSIFIER_FALLBACK_PROVIDER",
        "AISLE_CLASSIFIER_FALLBACK_BASE_URL",
        "AISLE_SEARCH_BASE_URL",
        "AISLE_SEARCH_API_KEY",
        "AISLE_SEARCH_FAILURE_THRESHOLD",
        "AISLE_SEARCH_DEFAULT_LIMIT",
        "AISLE_ORCHESTRATOR_DEADLINE_MS",
        "AISLE_ORCHESTRATOR_CLASSIFICATION_BUDGET_MS",
        "AISLE_TELEMETRY_SINK",
        "AISLE_LOGGING_LEVEL",
        "AISLE_LOGGING_FORMAT",
        "AISLE_LOG_LEVEL",
        "AISLE_LOG_FORMAT",
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
