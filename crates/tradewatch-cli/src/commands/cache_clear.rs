use serde_json::json;
use tradewatch_core::Orchestrator;

use crate::error::CliError;

use super::CommandResult;

pub fn run(engine: &Orchestrator) -> Result<CommandResult, CliError> {
    let cleared = engine.clear_cache();
    let data = json!({
        "cleared": cleared,
        "current": engine.cache_stats(),
    });

    Ok(CommandResult::ok("cache-clear", data)
        .with_warning("the cache lives in process memory; a new CLI process starts empty"))
}
