use serde_json::json;
use tradewatch_core::{EngineConfig, Orchestrator};

use crate::error::CliError;

use super::CommandResult;

pub fn run(engine: &Orchestrator, config: &EngineConfig) -> Result<CommandResult, CliError> {
    let data = json!({
        "sources": engine.system_status(),
        "cache": engine.cache_stats(),
        "registered": engine.registered_sources(),
    });

    let warnings = config
        .missing_credentials()
        .into_iter()
        .map(|source| format!("{source} has no credential configured"));

    Ok(CommandResult::ok("status", data).with_warnings(warnings))
}
