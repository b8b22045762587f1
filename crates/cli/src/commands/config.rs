use std::env;
use std::fs;
use std::path::Path;

use aisle_core::config::{detect_config_path, AppConfig, LoadOptions};
use secrecy::SecretString;
use toml::Value;

use super::{CommandResult, EXIT_CONFIG, EXIT_OK};

struct Field {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

impl Field {
    fn new(key: &'static str, value: impl ToString, env_keys: &'static [&'static str]) -> Self {
        Self { key, value: value.to_string(), env_keys }
    }
}

pub fn run(options: LoadOptions) -> CommandResult {
    let explicit_path = options.config_path.clone();
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure("config", "config_validation", error.to_string(), EXIT_CONFIG)
        }
    };

    let config_file_path = explicit_path.or_else(detect_config_path);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines =
        vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in effective_fields(&config) {
        let source =
            field_source(field.key, field.env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(field.key, &field.value, source));
    }

    CommandResult::text(EXIT_OK, lines.join("\n"))
}

fn effective_fields(config: &AppConfig) -> Vec<Field> {
    let router = &config.router;
    let classifier = &config.classifier;
    let search = &config.search;
    let orchestrator = &config.orchestrator;
    let session = &config.session;

    vec![
        Field::new("router.cache_ttl_secs", router.cache_ttl_secs, &["AISLE_ROUTER_CACHE_TTL_SECS"]),
        Field::new("router.cache_capacity", router.cache_capacity, &["AISLE_ROUTER_CACHE_CAPACITY"]),
        Field::new(
            "router.cache_by_session",
            router.cache_by_session,
            &["AISLE_ROUTER_CACHE_BY_SESSION"],
        ),
        Field::new(
            "router.cache_fallback_results",
            router.cache_fallback_results,
            &["AISLE_ROUTER_CACHE_FALLBACK_RESULTS"],
        ),
        Field::new(
            "router.classifier_timeout_ms",
            router.classifier_timeout_ms,
            &["AISLE_ROUTER_CLASSIFIER_TIMEOUT_MS"],
        ),
        Field::new(
            "router.heuristic_confidence",
            router.heuristic_confidence,
            &["AISLE_ROUTER_HEURISTIC_CONFIDENCE"],
        ),
        Field::new(
            "classifier.provider",
            format!("{:?}", classifier.provider),
            &["AISLE_CLASSIFIER_PROVIDER"],
        ),
        Field::new(
            "classifier.base_url",
            display_url(classifier.base_url.as_deref()),
            &["AISLE_CLASSIFIER_BASE_URL"],
        ),
        Field::new(
            "classifier.api_key",
            redact_secret(classifier.api_key.as_ref()),
            &["AISLE_CLASSIFIER_API_KEY"],
        ),
        Field::new("classifier.model", &classifier.model, &["AISLE_CLASSIFIER_MODEL"]),
        Field::new(
            "classifier.fallback_provider",
            classifier
                .fallback_provider
                .map(|provider| format!("{provider:?}"))
                .unwrap_or_else(|| "<unset>".to_string()),
            &["AISLE_CLASSIFIER_FALLBACK_PROVIDER"],
        ),
        Field::new(
            "classifier.fallback_base_url",
            display_url(classifier.fallback_base_url.as_deref()),
            &["AISLE_CLASSIFIER_FALLBACK_BASE_URL"],
        ),
        Field::new("search.base_url", display_url(search.base_url.as_deref()), &["AISLE_SEARCH_BASE_URL"]),
        Field::new("search.api_key", redact_secret(search.api_key.as_ref()), &["AISLE_SEARCH_API_KEY"]),
        Field::new("search.timeout_ms", search.timeout_ms, &["AISLE_SEARCH_TIMEOUT_MS"]),
        Field::new("search.max_retries", search.max_retries, &["AISLE_SEARCH_MAX_RETRIES"]),
        Field::new(
            "search.failure_threshold",
            search.failure_threshold,
            &["AISLE_SEARCH_FAILURE_THRESHOLD"],
        ),
        Field::new("search.cooldown_ms", search.cooldown_ms, &["AISLE_SEARCH_COOLDOWN_MS"]),
        Field::new("search.cache_ttl_secs", search.cache_ttl_secs, &["AISLE_SEARCH_CACHE_TTL_SECS"]),
        Field::new("search.default_limit", search.default_limit, &["AISLE_SEARCH_DEFAULT_LIMIT"]),
        Field::new(
            "orchestrator.deadline_ms",
            orchestrator.deadline_ms,
            &["AISLE_ORCHESTRATOR_DEADLINE_MS"],
        ),
        Field::new(
            "orchestrator.classification_budget_ms",
            orchestrator.classification_budget_ms,
            &["AISLE_ORCHESTRATOR_CLASSIFICATION_BUDGET_MS"],
        ),
        Field::new(
            "orchestrator.alpha_materiality_threshold",
            orchestrator.alpha_materiality_threshold,
            &["AISLE_ORCHESTRATOR_ALPHA_MATERIALITY_THRESHOLD"],
        ),
        Field::new(
            "orchestrator.min_correction_budget_ms",
            orchestrator.min_correction_budget_ms,
            &["AISLE_ORCHESTRATOR_MIN_CORRECTION_BUDGET_MS"],
        ),
        Field::new("session.idle_ttl_secs", session.idle_ttl_secs, &["AISLE_SESSION_IDLE_TTL_SECS"]),
        Field::new(
            "session.store_timeout_ms",
            session.store_timeout_ms,
            &["AISLE_SESSION_STORE_TIMEOUT_MS"],
        ),
        Field::new("telemetry.sink", format!("{:?}", config.telemetry.sink), &["AISLE_TELEMETRY_SINK"]),
        Field::new(
            "logging.level",
            &config.logging.level,
            &["AISLE_LOGGING_LEVEL", "AISLE_LOG_LEVEL"],
        ),
        Field::new(
            "logging.format",
            format!("{:?}", config.logging.format),
            &["AISLE_LOGGING_FORMAT", "AISLE_LOG_FORMAT"],
        ),
    ]
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: Option<&SecretString>) -> &'static str {
    if secret.is_some() {
        "<redacted>"
    } else {
        "<unset>"
    }
}

/// Drops any `user:password@` segment so credentials embedded in a URL
/// never reach the terminal.
fn display_url(url: Option<&str>) -> String {
    let Some(url) = url else {
        return "<unset>".to_string();
    };
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    match rest[..authority_end].rsplit_once('@') {
        Some((_, host)) => format!("{scheme}://***@{host}{}", &rest[authority_end..]),
        None => url.to_string(),
    }
}
