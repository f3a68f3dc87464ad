mod analyze;
mod cache_clear;
mod cost;
mod sources;
mod status;
mod validate;

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;
use tradewatch_core::{EngineBuilder, EngineConfig, OfflineHttpClient, Orchestrator, TradeFields};

use crate::cli::{Cli, Command, FieldArgs};
use crate::error::CliError;

/// Exit codes for a completed command.
pub const EXIT_OK: u8 = 0;
pub const EXIT_INVALID_INPUT: u8 = 2;
pub const EXIT_PARTIAL: u8 = 3;
pub const EXIT_FAILED: u8 = 4;

pub struct CommandResult {
    pub command: &'static str,
    pub data: Value,
    pub warnings: Vec<String>,
    pub latency_ms: u64,
    pub exit_code: u8,
}

impl CommandResult {
    pub fn ok(command: &'static str, data: Value) -> Self {
        Self {
            command,
            data,
            warnings: Vec::new(),
            latency_ms: 0,
            exit_code: EXIT_OK,
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_warnings(mut self, warnings: impl IntoIterator<Item = String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_exit_code(mut self, exit_code: u8) -> Self {
        self.exit_code = exit_code;
        self
    }
}

pub async fn run(cli: &Cli) -> Result<CommandResult, CliError> {
    let config = load_config(cli)?;

    match &cli.command {
        Command::Validate(args) => validate::run(args),
        Command::Cost(args) => cost::run(args),
        Command::Sources => sources::run(&config),
        Command::Analyze(args) => {
            let engine = build_engine(cli, config)?;
            let result = analyze::run(args, &engine).await;
            engine.shutdown();
            result
        }
        Command::Status => {
            let engine = build_engine(cli, config.clone())?;
            let result = status::run(&engine, &config);
            engine.shutdown();
            result
        }
        Command::CacheClear => {
            let engine = build_engine(cli, config)?;
            let result = cache_clear::run(&engine);
            engine.shutdown();
            result
        }
    }
}

fn load_config(cli: &Cli) -> Result<EngineConfig, CliError> {
    let config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    let config = config.with_env_credentials();
    debug!(
        path = ?cli.config,
        enabled = config.enabled_sources().count(),
        missing_credentials = config.missing_credentials().len(),
        "configuration loaded"
    );
    Ok(config)
}

fn build_engine(cli: &Cli, config: EngineConfig) -> Result<Orchestrator, CliError> {
    let mut builder = EngineBuilder::new(config).with_default_sources();
    if cli.offline {
        builder = builder.with_transport(Arc::new(OfflineHttpClient));
    }
    builder.build().map_err(CliError::from)
}

fn trade_fields(args: &FieldArgs) -> TradeFields {
    let mut fields = TradeFields::new();
    if let Some(value) = &args.product_code {
        fields = fields.with_product_code(value.as_str());
    }
    if let Some(value) = &args.country {
        fields = fields.with_country(value.as_str());
    }
    if let Some(value) = &args.year {
        fields = fields.with_year(value);
    }
    if let Some(value) = &args.topic {
        fields = fields.with_topic(value.as_str());
    }
    fields
}
