use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::session::SessionLimits;
use crate::session::SessionStoreSettings;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub router: RouterConfig,
    pub classifier: ClassifierConfig,
    pub search: SearchConfig,
    pub orchestrator: OrchestratorConfig,
    pub session: SessionConfig,
    pub telemetry: TelemetryConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct RouterConfig {
    pub cache_ttl_secs: u64,
    pub cache_capacity: usize,
    pub cache_by_session: bool,
    pub cache_fallback_results: bool,
    pub classifier_timeout_ms: u64,
    pub heuristic_confidence: f64,
}

#[derive(Clone, Debug)]
pub struct ClassifierConfig {
    pub provider: ClassifierProvider,
    pub base_url: Option<String>,
    pub api_key: Option<SecretString>,
    pub model: String,
    pub fallback_provider: Option<ClassifierProvider>,
    pub fallback_base_url: Option<String>,
}

#[derive(Clone, Debug)]
pub struct SearchConfig {
    pub base_url: Option<String>,
    pub api_key: Option<SecretString>,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
    pub cache_ttl_secs: u64,
    pub cache_capacity: usize,
    pub default_limit: usize,
}

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub deadline_ms: u64,
    pub classification_budget_ms: u64,
    pub alpha_materiality_threshold: f64,
    pub min_correction_budget_ms: u64,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub idle_ttl_secs: u64,
    pub max_recent_results: usize,
    pub max_history: usize,
    pub max_preferences: usize,
    pub store_timeout_ms: u64,
}

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    pub sink: TelemetrySinkKind,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierProvider {
    None,
    Http,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetrySinkKind {
    Noop,
    Tracing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub classifier_provider: Option<ClassifierProvider>,
    pub classifier_base_url: Option<String>,
    pub search_base_url: Option<String>,
    pub deadline_ms: Option<u64>,
    pub alpha_materiality_threshold: Option<f64>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            router: RouterConfig {
                cache_ttl_secs: 300,
                cache_capacity: 1024,
                cache_by_session: false,
                cache_fallback_results: true,
                classifier_timeout_ms: 300,
                heuristic_confidence: 0.9,
            },
            classifier: ClassifierConfig {
                provider: ClassifierProvider::None,
                base_url: None,
                api_key: None,
                model: "llama3.1".to_string(),
                fallback_provider: None,
                fallback_base_url: None,
            },
            search: SearchConfig {
                base_url: None,
                api_key: None,
                timeout_ms: 150,
                max_retries: 1,
                retry_base_delay_ms: 25,
                retry_max_delay_ms: 200,
                failure_threshold: 3,
                cooldown_ms: 30_000,
                cache_ttl_secs: 600,
                cache_capacity: 512,
                default_limit: 10,
            },
            orchestrator: OrchestratorConfig {
                deadline_ms: 800,
                classification_budget_ms: 450,
                alpha_materiality_threshold: 0.2,
                min_correction_budget_ms: 100,
            },
            session: SessionConfig {
                idle_ttl_secs: 1_800,
                max_recent_results: 20,
                max_history: 12,
                max_preferences: 16,
                store_timeout_ms: 50,
            },
            telemetry: TelemetryConfig { sink: TelemetrySinkKind::Tracing },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl RouterConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn classifier_timeout(&self) -> Duration {
        Duration::from_millis(self.classifier_timeout_ms)
    }
}

impl SearchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl OrchestratorConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    pub fn classification_budget(&self) -> Duration {
        Duration::from_millis(self.classification_budget_ms)
    }

    pub fn min_correction_budget(&self) -> Duration {
        Duration::from_millis(self.min_correction_budget_ms)
    }
}

impl SessionConfig {
    pub fn store_settings(&self) -> SessionStoreSettings {
        SessionStoreSettings {
            limits: SessionLimits {
                max_recent_results: self.max_recent_results,
                max_history: self.max_history,
                max_preferences: self.max_preferences,
                ..SessionLimits::default()
            },
            idle_ttl: Duration::from_secs(self.idle_ttl_secs),
            op_timeout: Duration::from_millis(self.store_timeout_ms),
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl FromStr for ClassifierProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" | "disabled" | "off" => Ok(Self::None),
            "http" => Ok(Self::Http),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported classifier provider `{other}` (expected none|http|ollama)"
            ))),
        }
    }
}

impl FromStr for TelemetrySinkKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "noop" | "none" => Ok(Self::Noop),
            "tracing" => Ok(Self::Tracing),
            other => Err(ConfigError::Validation(format!(
                "unsupported telemetry sink `{other}` (expected noop|tracing)"
            ))),
        }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("aisle.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(router) = patch.router {
            set(&mut self.router.cache_ttl_secs, router.cache_ttl_secs);
            set(&mut self.router.cache_capacity, router.cache_capacity);
            set(&mut self.router.cache_by_session, router.cache_by_session);
            set(&mut self.router.cache_fallback_results, router.cache_fallback_results);
            set(&mut self.router.classifier_timeout_ms, router.classifier_timeout_ms);
            set(&mut self.router.heuristic_confidence, router.heuristic_confidence);
        }

        if let Some(classifier) = patch.classifier {
            set(&mut self.classifier.provider, classifier.provider);
            if let Some(base_url) = classifier.base_url {
                self.classifier.base_url = Some(base_url);
            }
            if let Some(classifier_api_key_value) = classifier.api_key {
                self.classifier.api_key = Some(secret_value(classifier_api_key_value));
            }
            set(&mut self.classifier.model, classifier.model);
            if let Some(fallback_provider) = classifier.fallback_provider {
                self.classifier.fallback_provider = Some(fallback_provider);
            }
            if let Some(fallback_base_url) = classifier.fallback_base_url {
                self.classifier.fallback_base_url = Some(fallback_base_url);
            }
        }

        if let Some(search) = patch.search {
            if let Some(base_url) = search.base_url {
                self.search.base_url = Some(base_url);
            }
            if let Some(search_api_key_value) = search.api_key {
                self.search.api_key = Some(secret_value(search_api_key_value));
            }
            set(&mut self.search.timeout_ms, search.timeout_ms);
            set(&mut self.search.max_retries, search.max_retries);
            set(&mut self.search.retry_base_delay_ms, search.retry_base_delay_ms);
            set(&mut self.search.retry_max_delay_ms, search.retry_max_delay_ms);
            set(&mut self.search.failure_threshold, search.failure_threshold);
            set(&mut self.search.cooldown_ms, search.cooldown_ms);
            set(&mut self.search.cache_ttl_secs, search.cache_ttl_secs);
            set(&mut self.search.cache_capacity, search.cache_capacity);
            set(&mut self.search.default_limit, search.default_limit);
        }

        if let Some(orchestrator) = patch.orchestrator {
            set(&mut self.orchestrator.deadline_ms, orchestrator.deadline_ms);
            set(&mut self.orchestrator.classification_budget_ms, orchestrator.classification_budget_ms);
            set(
                &mut self.orchestrator.alpha_materiality_threshold,
                orchestrator.alpha_materiality_threshold,
            );
            set(&mut self.orchestrator.min_correction_budget_ms, orchestrator.min_correction_budget_ms);
        }

        if let Some(session) = patch.session {
            set(&mut self.session.idle_ttl_secs, session.idle_ttl_secs);
            set(&mut self.session.max_recent_results, session.max_recent_results);
            set(&mut self.session.max_history, session.max_history);
            set(&mut self.session.max_preferences, session.max_preferences);
            set(&mut self.session.store_timeout_ms, session.store_timeout_ms);
        }

        if let Some(telemetry) = patch.telemetry {
            set(&mut self.telemetry.sink, telemetry.sink);
        }

        if let Some(logging) = patch.logging {
            set(&mut self.logging.level, logging.level);
            set(&mut self.logging.format, logging.format);
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        env_parse("AISLE_ROUTER_CACHE_TTL_SECS", &mut self.router.cache_ttl_secs)?;
        env_parse("AISLE_ROUTER_CACHE_CAPACITY", &mut self.router.cache_capacity)?;
        env_parse("AISLE_ROUTER_CACHE_BY_SESSION", &mut self.router.cache_by_session)?;
        env_parse("AISLE_ROUTER_CACHE_FALLBACK_RESULTS", &mut self.router.cache_fallback_results)?;
        env_parse("AISLE_ROUTER_CLASSIFIER_TIMEOUT_MS", &mut self.router.classifier_timeout_ms)?;
        env_parse("AISLE_ROUTER_HEURISTIC_CONFIDENCE", &mut self.router.heuristic_confidence)?;

        if let Some(value) = read_env("AISLE_CLASSIFIER_PROVIDER") {
            self.classifier.provider = value.parse()?;
        }
        if let Some(value) = read_env("AISLE_CLASSIFIER_BASE_URL") {
            self.classifier.base_url = Some(value);
        }
        if let Some(value) = read_env("AISLE_CLASSIFIER_API_KEY") {
            self.classifier.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("AISLE_CLASSIFIER_MODEL") {
            self.classifier.model = value;
        }
        if let Some(value) = read_env("AISLE_CLASSIFIER_FALLBACK_PROVIDER") {
            self.classifier.fallback_provider = Some(value.parse()?);
        }
        if let Some(value) = read_env("AISLE_CLASSIFIER_FALLBACK_BASE_URL") {
            self.classifier.fallback_base_url = Some(value);
        }

        if let Some(value) = read_env("AISLE_SEARCH_BASE_URL") {
            self.search.base_url = Some(value);
        }
        if let Some(value) = read_env("AISLE_SEARCH_API_KEY") {
            self.search.api_key = Some(secret_value(value));
        }
        env_parse("AISLE_SEARCH_TIMEOUT_MS", &mut self.search.timeout_ms)?;
        env_parse("AISLE_SEARCH_MAX_RETRIES", &mut self.search.max_retries)?;
        env_parse("AISLE_SEARCH_RETRY_BASE_DELAY_MS", &mut self.search.retry_base_delay_ms)?;
        env_parse("AISLE_SEARCH_RETRY_MAX_DELAY_MS", &mut self.search.retry_max_delay_ms)?;
        env_parse("AISLE_SEARCH_FAILURE_THRESHOLD", &mut self.search.failure_threshold)?;
        env_parse("AISLE_SEARCH_COOLDOWN_MS", &mut self.search.cooldown_ms)?;
        env_parse("AISLE_SEARCH_CACHE_TTL_SECS", &mut self.search.cache_ttl_secs)?;
        env_parse("AISLE_SEARCH_CACHE_CAPACITY", &mut self.search.cache_capacity)?;
        env_parse("AISLE_SEARCH_DEFAULT_LIMIT", &mut self.search.default_limit)?;

        env_parse("AISLE_ORCHESTRATOR_DEADLINE_MS", &mut self.orchestrator.deadline_ms)?;
        env_parse(
            "AISLE_ORCHESTRATOR_CLASSIFICATION_BUDGET_MS",
            &mut self.orchestrator.classification_budget_ms,
        )?;
        env_parse(
            "AISLE_ORCHESTRATOR_ALPHA_MATERIALITY_THRESHOLD",
            &mut self.orchestrator.alpha_materiality_threshold,
        )?;
        env_parse(
            "AISLE_ORCHESTRATOR_MIN_CORRECTION_BUDGET_MS",
            &mut self.orchestrator.min_correction_budget_ms,
        )?;

        env_parse("AISLE_SESSION_IDLE_TTL_SECS", &mut self.session.idle_ttl_secs)?;
        env_parse("AISLE_SESSION_MAX_RECENT_RESULTS", &mut self.session.max_recent_results)?;
        env_parse("AISLE_SESSION_MAX_HISTORY", &mut self.session.max_history)?;
        env_parse("AISLE_SESSION_MAX_PREFERENCES", &mut self.session.max_preferences)?;
        env_parse("AISLE_SESSION_STORE_TIMEOUT_MS", &mut self.session.store_timeout_ms)?;

        if let Some(value) = read_env("AISLE_TELEMETRY_SINK") {
            self.telemetry.sink = value.parse()?;
        }

        let log_level = read_env("AISLE_LOGGING_LEVEL").or_else(|| read_env("AISLE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format = read_env("AISLE_LOGGING_FORMAT").or_else(|| read_env("AISLE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(provider) = overrides.classifier_provider {
            self.classifier.provider = provider;
        }
        if let Some(base_url) = overrides.classifier_base_url {
            self.classifier.base_url = Some(base_url);
        }
        if let Some(base_url) = overrides.search_base_url {
            self.search.base_url = Some(base_url);
        }
        if let Some(deadline_ms) = overrides.deadline_ms {
            self.orchestrator.deadline_ms = deadline_ms;
        }
        if let Some(threshold) = overrides.alpha_materiality_threshold {
            self.orchestrator.alpha_materiality_threshold = threshold;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_router(&self.router)?;
        validate_classifier(&self.classifier)?;
        validate_search(&self.search)?;
        validate_orchestrator(&self.orchestrator)?;
        validate_session(&self.session)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn set<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("aisle.toml"), PathBuf::from("config/aisle.toml")]
        .into_iter()
        .find(|path| path.exists())
}

/// Path of the config file `load` would read, if any.
pub fn detect_config_path() -> Option<PathBuf> {
    resolve_config_path(None)
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_timeout(key: &str, value_ms: u64) -> Result<(), ConfigError> {
    if value_ms == 0 || value_ms > 60_000 {
        return Err(ConfigError::Validation(format!("{key} must be in range 1..=60000")));
    }
    Ok(())
}

fn validate_unit_interval(key: &str, value: f64) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::Validation(format!("{key} must be within 0.0..=1.0")));
    }
    Ok(())
}

fn validate_base_url(key: &str, base_url: Option<&str>) -> Result<(), ConfigError> {
    if let Some(base_url) = base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "{key} must start with http:// or https://"
            )));
        }
    }
    Ok(())
}

fn validate_router(router: &RouterConfig) -> Result<(), ConfigError> {
    validate_timeout("router.classifier_timeout_ms", router.classifier_timeout_ms)?;
    validate_unit_interval("router.heuristic_confidence", router.heuristic_confidence)?;
    if router.cache_ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "router.cache_ttl_secs must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_classifier(classifier: &ClassifierConfig) -> Result<(), ConfigError> {
    validate_base_url("classifier.base_url", classifier.base_url.as_deref())?;
    validate_base_url("classifier.fallback_base_url", classifier.fallback_base_url.as_deref())?;

    let needs_url = |provider: ClassifierProvider| provider != ClassifierProvider::None;
    let missing = |url: &Option<String>| url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);

    if needs_url(classifier.provider) && missing(&classifier.base_url) {
        return Err(ConfigError::Validation(
            "classifier.base_url is required for http/ollama providers".to_string(),
        ));
    }
    if let Some(fallback_provider) = classifier.fallback_provider {
        if needs_url(fallback_provider) && missing(&classifier.fallback_base_url) {
            return Err(ConfigError::Validation(
                "classifier.fallback_base_url is required when classifier.fallback_provider is set"
                    .to_string(),
            ));
        }
    }
    if classifier.provider == ClassifierProvider::Ollama && classifier.model.trim().is_empty() {
        return Err(ConfigError::Validation(
            "classifier.model is required for ollama provider".to_string(),
        ));
    }
    Ok(())
}

fn validate_search(search: &SearchConfig) -> Result<(), ConfigError> {
    validate_base_url("search.base_url", search.base_url.as_deref())?;
    validate_timeout("search.timeout_ms", search.timeout_ms)?;
    if search.failure_threshold == 0 {
        return Err(ConfigError::Validation(
            "search.failure_threshold must be greater than zero".to_string(),
        ));
    }
    if search.max_retries > 10 {
        return Err(ConfigError::Validation("search.max_retries must be at most 10".to_string()));
    }
    if search.retry_base_delay_ms > search.retry_max_delay_ms {
        return Err(ConfigError::Validation(
            "search.retry_base_delay_ms must not exceed search.retry_max_delay_ms".to_string(),
        ));
    }
    if search.default_limit == 0 {
        return Err(ConfigError::Validation(
            "search.default_limit must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_orchestrator(orchestrator: &OrchestratorConfig) -> Result<(), ConfigError> {
    validate_timeout("orchestrator.deadline_ms", orchestrator.deadline_ms)?;
    validate_unit_interval(
        "orchestrator.alpha_materiality_threshold",
        orchestrator.alpha_materiality_threshold,
    )?;
    if orchestrator.classification_budget_ms == 0
        || orchestrator.classification_budget_ms > orchestrator.deadline_ms
    {
        return Err(ConfigError::Validation(
            "orchestrator.classification_budget_ms must be in range 1..=orchestrator.deadline_ms"
                .to_string(),
        ));
    }
    if orchestrator.min_correction_budget_ms > orchestrator.deadline_ms {
        return Err(ConfigError::Validation(
            "orchestrator.min_correction_budget_ms must not exceed orchestrator.deadline_ms"
                .to_string(),
        ));
    }
    Ok(())
}

fn validate_session(session: &SessionConfig) -> Result<(), ConfigError> {
    validate_timeout("session.store_timeout_ms", session.store_timeout_ms)?;
    if session.idle_ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "session.idle_ttl_secs must be greater than zero".to_string(),
        ));
    }
    if session.max_recent_results == 0 {
        return Err(ConfigError::Validation(
            "session.max_recent_results must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str, target: &mut T) -> Result<(), ConfigError> {
    if let Some(value) = read_env(key) {
        *target = value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
            key: key.to_string(),
            value: value.clone(),
        })?;
    }
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    router: Option<RouterPatch>,
    classifier: Option<ClassifierPatch>,
    search: Option<SearchPatch>,
    orchestrator: Option<OrchestratorPatch>,
    session: Option<SessionPatch>,
    telemetry: Option<TelemetryPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct RouterPatch {
    cache_ttl_secs: Option<u64>,
    cache_capacity: Option<usize>,
    cache_by_session: Option<bool>,
    cache_fallback_results: Option<bool>,
    classifier_timeout_ms: Option<u64>,
    heuristic_confidence: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct ClassifierPatch {
    provider: Option<ClassifierProvider>,
    base_url: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    fallback_provider: Option<ClassifierProvider>,
    fallback_base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchPatch {
    base_url: Option<String>,
    api_key: Option<String>,
    timeout_ms: Option<u64>,
    max_retries: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    retry_max_delay_ms: Option<u64>,
    failure_threshold: Option<u32>,
    cooldown_ms: Option<u64>,
    cache_ttl_secs: Option<u64>,
    cache_capacity: Option<usize>,
    default_limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct OrchestratorPatch {
    deadline_ms: Option<u64>,
    classification_budget_ms: Option<u64>,
    alpha_materiality_threshold: Option<f64>,
    min_correction_budget_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionPatch {
    idle_ttl_secs: Option<u64>,
    max_recent_results: Option<usize>,
    max_history: Option<usize>,
    max_preferences: Option<usize>,
    store_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TelemetryPatch {
    sink: Option<TelemetrySinkKind>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ClassifierProvider, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_are_valid() -> Result<(), String> {
        let config = AppConfig::default();
        config.validate().map_err(|error| error.to_string())?;
        ensure(config.classifier.provider == ClassifierProvider::None, "classifier off by default")?;
        ensure(config.orchestrator.alpha_materiality_threshold == 0.2, "default materiality 0.2")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_AISLE_CLASSIFIER_URL", "http://classifier.internal:9000");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("aisle.toml");
            fs::write(
                &path,
                r#"
[classifier]
provider = "http"
base_url = "${TEST_AISLE_CLASSIFIER_URL}"
api_key = "file-secret"

[search]
failure_threshold = 5
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.classifier.base_url.as_deref() == Some("http://classifier.internal:9000"),
                "classifier url should be interpolated from environment",
            )?;
            ensure(
                config.classifier.api_key.as_ref().map(|key| key.expose_secret() == "file-secret")
                    == Some(true),
                "api key should load from file",
            )?;
            ensure(config.search.failure_threshold == 5, "file value should override default")?;
            Ok(())
        })();

        clear_vars(&["TEST_AISLE_CLASSIFIER_URL"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("AISLE_LOG_LEVEL", "warn");
        env::set_var("AISLE_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["AISLE_LOG_LEVEL", "AISLE_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("AISLE_ORCHESTRATOR_DEADLINE_MS", "900");
        env::set_var("AISLE_SEARCH_BASE_URL", "http://search-from-env:8080");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("aisle.toml");
            fs::write(
                &path,
                r#"
[orchestrator]
deadline_ms = 700
alpha_materiality_threshold = 0.3

[search]
base_url = "http://search-from-file:8080"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    log_level: Some("debug".to_string()),
                    alpha_materiality_threshold: Some(0.25),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.orchestrator.deadline_ms == 900, "env deadline should win over file")?;
            ensure(
                config.search.base_url.as_deref() == Some("http://search-from-env:8080"),
                "env search url should win over file",
            )?;
            ensure(
                config.orchestrator.alpha_materiality_threshold == 0.25,
                "override threshold should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            Ok(())
        })();

        clear_vars(&["AISLE_ORCHESTRATOR_DEADLINE_MS", "AISLE_SEARCH_BASE_URL"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("AISLE_CLASSIFIER_PROVIDER", "ollama");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("classifier.base_url")
            );
            ensure(has_message, "validation failure should mention classifier.base_url")
        })();

        clear_vars(&["AISLE_CLASSIFIER_PROVIDER"]);
        result
    }

    #[test]
    fn invalid_numeric_env_override_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("AISLE_SEARCH_FAILURE_THRESHOLD", "three");

        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::InvalidEnvOverride { key, .. }) => {
                ensure(key == "AISLE_SEARCH_FAILURE_THRESHOLD", "error should name the variable")
            }
            Err(other) => Err(format!("unexpected error: {other}")),
            Ok(_) => Err("expected invalid override error".to_string()),
        };

        clear_vars(&["AISLE_SEARCH_FAILURE_THRESHOLD"]);
        result
    }

    #[test]
    fn classification_budget_cannot_exceed_deadline() {
        let mut config = AppConfig::default();
        config.orchestrator.classification_budget_ms = config.orchestrator.deadline_ms + 1;
        let error = config.validate().expect_err("budget above deadline should fail");
        assert!(error.to_string().contains("classification_budget_ms"));
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("AISLE_CLASSIFIER_API_KEY", "sk-classifier-secret");
        env::set_var("AISLE_SEARCH_API_KEY", "sk-search-secret");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(
                !debug.contains("sk-classifier-secret"),
                "debug output should not contain classifier key",
            )?;
            ensure(!debug.contains("sk-search-secret"), "debug output should not contain search key")?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&["AISLE_CLASSIFIER_API_KEY", "AISLE_SEARCH_API_KEY"]);
        result
    }
}
