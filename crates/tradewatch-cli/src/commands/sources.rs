use serde::Serialize;
use tradewatch_core::{EngineConfig, HttpSource, OnRateLimit, QueryField, SourceConfig, SourceId};

use crate::error::CliError;

use super::CommandResult;

#[derive(Debug, Serialize)]
struct SourceRow {
    id: SourceId,
    enabled: bool,
    base_url: String,
    requires_credential: bool,
    credential_configured: bool,
    required_fields: Vec<&'static str>,
    rate_limit: u32,
    rate_window_ms: u64,
    on_rate_limit: OnRateLimit,
    cache_ttl_ms: u64,
    max_connections: usize,
}

impl SourceRow {
    fn new(id: SourceId, config: &SourceConfig, engine: &EngineConfig) -> Self {
        let requirements = HttpSource::requirements_for(id);
        Self {
            id,
            enabled: config.enabled,
            base_url: config.base_url.clone(),
            requires_credential: id.requires_credential(),
            credential_configured: config.credential.is_some(),
            required_fields: [
                QueryField::ProductCode,
                QueryField::Country,
                QueryField::Year,
                QueryField::Topic,
            ]
            .into_iter()
            .filter(|field| requirements.requires(*field))
            .map(QueryField::as_str)
            .collect(),
            rate_limit: config.rate_limit.limit,
            rate_window_ms: millis(config.rate_limit.window.as_millis()),
            on_rate_limit: config.rate_limit.on_reject,
            cache_ttl_ms: millis(engine.cache_ttl(id).as_millis()),
            max_connections: config.max_connections,
        }
    }
}

#[derive(Debug, Serialize)]
struct SourcesResponseData {
    sources: Vec<SourceRow>,
}

pub fn run(config: &EngineConfig) -> Result<CommandResult, CliError> {
    let sources = config
        .sources
        .iter()
        .map(|(id, source)| SourceRow::new(*id, source, config))
        .collect();

    let data = serde_json::to_value(SourcesResponseData { sources })?;
    Ok(CommandResult::ok("sources", data))
}

fn millis(value: u128) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}
