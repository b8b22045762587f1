use std::sync::Arc;
use std::time::Duration;

use aisle_agent::orchestrator::RouteRequest;
use aisle_agent::runtime::AgentRuntime;
use aisle_core::config::{AppConfig, ClassifierProvider, LoadOptions};
use aisle_core::domain::classification::Intent;
use aisle_core::domain::search::SearchQuery;
use aisle_core::domain::utterance::SessionId;
use aisle_core::telemetry::NoopTelemetrySink;
use aisle_search::{HttpSearchBackend, SearchBackend, UnconfiguredSearchBackend};
use serde::Serialize;

use super::{CommandResult, EXIT_OK, EXIT_RUNTIME};

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn new(name: &'static str, status: CheckStatus, details: impl Into<String>) -> Self {
        Self { name, status, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool, options: LoadOptions) -> CommandResult {
    let report = build_report(options);
    let exit_code = if report.overall_status == CheckStatus::Pass { EXIT_OK } else { EXIT_RUNTIME };

    if json_output {
        return CommandResult::json(exit_code, &report);
    }

    CommandResult::text(exit_code, render_human(&report))
}

fn build_report(options: LoadOptions) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(options) {
        Ok(config) => {
            checks.push(DoctorCheck::new(
                "config_validation",
                CheckStatus::Pass,
                "configuration loaded and validated",
            ));
            checks.push(check_classifier(&config));
            match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => {
                    checks.push(runtime.block_on(check_search_backend(&config)));
                    checks.push(runtime.block_on(check_local_routing(&config)));
                }
                Err(error) => {
                    let details = format!("failed to initialize async runtime: {error}");
                    checks.push(DoctorCheck::new("search_backend", CheckStatus::Fail, details.clone()));
                    checks.push(DoctorCheck::new("local_routing", CheckStatus::Fail, details));
                }
            }
        }
        Err(error) => {
            checks.push(DoctorCheck::new("config_validation", CheckStatus::Fail, error.to_string()));
            for name in ["classifier", "search_backend", "local_routing"] {
                checks.push(DoctorCheck::new(
                    name,
                    CheckStatus::Skipped,
                    "skipped because configuration did not load",
                ));
            }
        }
    }

    let any_failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let overall_status = if any_failed { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if any_failed {
        "doctor: one or more readiness checks failed".to_string()
    } else {
        "doctor: all readiness checks passed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_classifier(config: &AppConfig) -> DoctorCheck {
    let classifier = &config.classifier;
    match (classifier.provider, classifier.base_url.as_deref()) {
        (ClassifierProvider::None, _) => DoctorCheck::new(
            "classifier",
            CheckStatus::Skipped,
            "no external classifier configured; cache, heuristics and fallback only",
        ),
        (provider, Some(base_url)) => DoctorCheck::new(
            "classifier",
            CheckStatus::Pass,
            format!("{provider:?} classifier at `{base_url}` (not probed)"),
        ),
        (provider, None) => DoctorCheck::new(
            "classifier",
            CheckStatus::Fail,
            format!("{provider:?} classifier has no base_url"),
        ),
    }
}

async fn check_search_backend(config: &AppConfig) -> DoctorCheck {
    let Some(base_url) = config.search.base_url.as_deref() else {
        return DoctorCheck::new(
            "search_backend",
            CheckStatus::Fail,
            "search.base_url is unset; every search will use static fallback results",
        );
    };

    let backend = HttpSearchBackend::new(base_url, config.search.api_key.clone());
    let probe = SearchQuery { text: "milk".to_string(), alpha: 0.5, limit: 1 };
    match tokio::time::timeout(PROBE_TIMEOUT, backend.search(&probe)).await {
        Ok(Ok(items)) => DoctorCheck::new(
            "search_backend",
            CheckStatus::Pass,
            format!("`{}` answered with {} item(s)", backend.endpoint(), items.len()),
        ),
        Ok(Err(error)) => DoctorCheck::new("search_backend", CheckStatus::Fail, error.to_string()),
        Err(_) => DoctorCheck::new(
            "search_backend",
            CheckStatus::Fail,
            format!("no answer from `{}` within {}ms", backend.endpoint(), PROBE_TIMEOUT.as_millis()),
        ),
    }
}

/// Routes a greeting through the full pipeline with every external
/// dependency disconnected.
async fn check_local_routing(config: &AppConfig) -> DoctorCheck {
    let runtime = AgentRuntime::with_parts(
        config,
        None,
        Arc::new(UnconfiguredSearchBackend),
        Arc::new(NoopTelemetrySink),
    );
    let request = RouteRequest::new("hello", SessionId("doctor".to_string()));

    match runtime.route(request).await {
        Ok(decision) if decision.classification.intent() == Intent::Greeting => DoctorCheck::new(
            "local_routing",
            CheckStatus::Pass,
            format!("heuristic tier answered in {}ms", decision.timings.total_ms),
        ),
        Ok(decision) => DoctorCheck::new(
            "local_routing",
            CheckStatus::Fail,
            format!("expected greeting, got {}", decision.classification.intent()),
        ),
        Err(error) => DoctorCheck::new("local_routing", CheckStatus::Fail, error.to_string()),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}
