use std::time::Duration;

use aisle_agent::orchestrator::{RouteOverrides, RouteRequest, RoutedDecision};
use aisle_agent::runtime::AgentRuntime;
use aisle_core::config::{AppConfig, LoadOptions};
use aisle_core::domain::utterance::{SessionId, UserId};
use aisle_core::errors::RoutingError;
use serde::Serialize;

use super::{CommandResult, EXIT_CONFIG, EXIT_DEADLINE, EXIT_OK, EXIT_RUNTIME};
use crate::logging::init_logging;

const COMMAND: &str = "route";

#[derive(Debug, Clone)]
pub struct RouteArgs {
    pub text: String,
    pub session: String,
    pub user: Option<String>,
    pub alpha: Option<f64>,
    pub limit: Option<usize>,
    pub deadline_ms: Option<u64>,
    pub json: bool,
}

impl RouteArgs {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            session: "cli".to_string(),
            user: None,
            alpha: None,
            limit: None,
            deadline_ms: None,
            json: true,
        }
    }
}

#[derive(Debug, Serialize)]
struct RouteReport<'a> {
    command: &'static str,
    status: &'static str,
    decision: &'a RoutedDecision,
}

pub fn run(args: RouteArgs, options: LoadOptions) -> CommandResult {
    if let Some(alpha) = args.alpha {
        if !(0.0..=1.0).contains(&alpha) {
            return CommandResult::failure(
                COMMAND,
                "invalid_argument",
                format!("--alpha must be within [0, 1], got {alpha}"),
                EXIT_CONFIG,
            );
        }
    }
    if args.deadline_ms == Some(0) {
        return CommandResult::failure(
            COMMAND,
            "invalid_argument",
            "--deadline-ms must be greater than zero",
            EXIT_CONFIG,
        );
    }

    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(COMMAND, "config_validation", error.to_string(), EXIT_CONFIG)
        }
    };
    init_logging(&config.logging);

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                EXIT_RUNTIME,
            )
        }
    };

    let json = args.json;
    let outcome = runtime.block_on(async {
        let agent = AgentRuntime::from_config(&config);
        agent.route(build_request(args)).await
    });

    match outcome {
        Ok(decision) if json => CommandResult::json(
            EXIT_OK,
            &RouteReport { command: COMMAND, status: "ok", decision: &decision },
        ),
        Ok(decision) => CommandResult::text(EXIT_OK, render_human(&decision)),
        Err(error @ RoutingError::OrchestratorDeadlineExceeded { .. }) => CommandResult::failure(
            COMMAND,
            "deadline_exceeded",
            format!("{} ({error}; correlation id {})", error.user_message(), error.correlation_id()),
            EXIT_DEADLINE,
        ),
    }
}

fn build_request(args: RouteArgs) -> RouteRequest {
    let overrides = RouteOverrides {
        alpha: args.alpha,
        limit: args.limit,
        deadline: args.deadline_ms.map(Duration::from_millis),
    };
    RouteRequest::new(args.text, SessionId(args.session))
        .with_user(args.user.map(UserId))
        .with_overrides(overrides)
}

fn render_human(decision: &RoutedDecision) -> String {
    let classification = &decision.classification;
    let mut lines = vec![
        format!(
            "intent: {} (confidence {:.2}, tier {})",
            classification.intent(),
            classification.confidence(),
            classification.tier().as_str()
        ),
        format!(
            "alpha: {:.2} from {}{}",
            decision.which_alpha_used,
            decision.alpha_source.as_str(),
            if decision.corrected { ", corrected" } else { "" }
        ),
        format!(
            "results: {} ({}){}",
            decision.results.len(),
            decision.results.origin.as_str(),
            if decision.degraded { " [degraded]" } else { "" }
        ),
    ];

    for entity in classification.entities() {
        lines.push(format!("  entity {}: {}", entity.kind.as_str(), entity.value));
    }
    for (index, item) in decision.results.items.iter().enumerate() {
        lines.push(format!("  {}. {} [{}]", index + 1, item.name, item.id));
    }
    lines.push(format!(
        "correlation id: {} ({} ms)",
        decision.correlation_id, decision.timings.total_ms
    ));

    lines.join("\n")
}
