//! Subcommand implementations. Results go to stdout, logs to stderr.

use std::io::{self, Write as _};
use std::path::Path;

use anyhow::{Context as _, Result};
use serde_json::to_string_pretty;
use switchboard_routing::{
    EngineConfig, ExecutionResult, ManualOverrides, Orchestrator, Outcome, OutcomeStatus, RecordFilter,
    RequestContext, StrategyKind, UserFeedback,
};
use tracing::warn;
use uuid::Uuid;

use crate::cli::RequestArgs;

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => EngineConfig::load_or_create().context("Failed to load default config")?,
    };
    Ok(config)
}

fn orchestrator(path: Option<&Path>) -> Result<Orchestrator> {
    let config = load_config(path)?;
    Orchestrator::from_config(&config).context("Failed to start the engine")
}

fn context(orchestrator: &Orchestrator, request: &RequestArgs) -> RequestContext {
    orchestrator
        .analyze(&request.text, request.file.as_deref())
        .with_overrides(ManualOverrides {
            mode: request.mode,
            model: request.model.clone(),
        })
}

fn print(text: &str) -> Result<()> {
    writeln!(io::stdout().lock(), "{text}")?;
    Ok(())
}

/// Builds an outcome from feedback flags; `retries` is set when the response was an error.
pub fn outcome(
    quality: f64,
    feedback: Option<UserFeedback>,
    latency_ms: u64,
    tokens: u64,
    retries: Option<u32>,
) -> Outcome {
    let mut outcome = Outcome::new(quality).with_usage(latency_ms, tokens);
    if let Some(feedback) = feedback {
        outcome = outcome.with_feedback(feedback);
    }
    if let Some(retries) = retries {
        outcome = outcome.with_error(retries);
    }
    outcome
}

/// Route a request and print the decision
///
/// # Errors
/// Returns an error if the config or ledger cannot be loaded or no strategy is available
pub async fn handle_route(config_path: Option<&Path>, request: &RequestArgs) -> Result<()> {
    let orchestrator = orchestrator(config_path)?;
    let context = context(&orchestrator, request);
    let routed = orchestrator.route(&context, request.strategy).await?;
    orchestrator.shutdown().await;

    print(&to_string_pretty(&routed)?)
}

/// Route, execute and print the answer with its decision id
///
/// # Errors
/// Returns an error if routing fails or execution produces no usable result
pub async fn handle_run(config_path: Option<&Path>, request: &RequestArgs, json: bool) -> Result<()> {
    let orchestrator = orchestrator(config_path)?;
    let context = context(&orchestrator, request);
    let routed = orchestrator.route(&context, request.strategy).await?;
    for warning in &routed.warnings {
        warn!(?warning, "routing warning");
    }
    let executed = orchestrator.execute(&routed.decision, &context).await;
    orchestrator.shutdown().await;
    let result = executed.with_context(|| format!("Decision {} failed to execute", routed.decision.id))?;

    if json {
        return print(&to_string_pretty(&result)?);
    }
    let model = match &result {
        ExecutionResult::Single(single) => single.completion.model.clone(),
        ExecutionResult::Chain(_) | ExecutionResult::Ensemble(_) => format!("{} workflow", routed.decision.strategy),
    };
    print(&result.text())?;
    print(&format!(
        "\n[decision {} | {} | {} tokens | {}]",
        routed.decision.id,
        model,
        result.tokens_used(),
        routed.decision.reasoning
    ))
}

/// Attach an outcome to an earlier decision
///
/// # Errors
/// Returns an error if the ledger cannot be written
pub async fn handle_feedback(config_path: Option<&Path>, id: Uuid, outcome: Outcome) -> Result<()> {
    let orchestrator = orchestrator(config_path)?;
    let status = orchestrator.report_feedback(id, outcome).await?;
    orchestrator.shutdown().await;

    match status {
        OutcomeStatus::Recorded => print(&format!("Recorded feedback for {id}")),
        OutcomeStatus::NotFound => print(&format!("No decision {id} in the ledger; nothing recorded")),
        OutcomeStatus::AlreadyRecorded => print(&format!("Decision {id} already has feedback; unchanged")),
    }
}

/// Print aggregate performance as JSON
///
/// # Errors
/// Returns an error if the ledger cannot be read
pub async fn handle_stats(
    config_path: Option<&Path>,
    strategy: Option<StrategyKind>,
    model: Option<String>,
) -> Result<()> {
    let orchestrator = orchestrator(config_path)?;
    let filter = match (strategy, model) {
        (Some(strategy), _) => RecordFilter::Strategy(strategy.name().to_owned()),
        (None, Some(model)) => RecordFilter::Model(model),
        (None, None) => RecordFilter::All,
    };
    let summary = orchestrator.ledger().summarize(&filter).await?;
    orchestrator.shutdown().await;

    print(&to_string_pretty(&summary)?)
}

/// Show the config file path or its effective contents
///
/// # Errors
/// Returns an error if the config cannot be loaded or serialized
pub fn handle_config(config_path: Option<&Path>, path_only: bool) -> Result<()> {
    let path = match config_path {
        Some(path) => path.to_path_buf(),
        None => EngineConfig::config_path()?,
    };
    if path_only {
        return print(&path.display().to_string());
    }
    let config = load_config(config_path)?;
    print(&format!("# {}\n{}", path.display(), toml::to_string_pretty(&config)?))
}
