use tradewatch_core::{AnalysisQuery, Orchestrator, OverallStatus};

use crate::cli::AnalyzeArgs;
use crate::error::CliError;

use super::{trade_fields, CommandResult, EXIT_FAILED, EXIT_INVALID_INPUT, EXIT_OK, EXIT_PARTIAL};

pub async fn run(args: &AnalyzeArgs, engine: &Orchestrator) -> Result<CommandResult, CliError> {
    let mut query = AnalysisQuery::new(trade_fields(&args.fields)).with_sources(&args.sources);
    query.deadline_ms = args.deadline_ms;

    let report = engine.analyze(query).await;

    let exit_code = match report.overall_status {
        _ if report.validation.is_some() => EXIT_INVALID_INPUT,
        OverallStatus::Success => EXIT_OK,
        OverallStatus::Partial => EXIT_PARTIAL,
        OverallStatus::Failed => EXIT_FAILED,
    };
    let latency_ms = report.latency_ms;
    let data = serde_json::to_value(&report)?;

    Ok(CommandResult::ok("analyze", data)
        .with_latency(latency_ms)
        .with_exit_code(exit_code))
}
