//! CLI argument definitions for tradewatch.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `validate` | Check query fields without any network activity |
//! | `analyze` | Fan a query out to every relevant source |
//! | `status` | Per-source health and cache statistics |
//! | `cache-clear` | Drop cached payloads |
//! | `cost` | Tariff cost arithmetic |
//! | `sources` | List configured sources |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--config` | none | JSON configuration file |
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--offline` | `false` | Answer every source from the offline transport |
//! | `-v` | warn | Log verbosity (repeatable) |
//! | `--log-json` | `false` | Emit logs as JSON on stderr |
//!
//! # Examples
//!
//! ```bash
//! tradewatch validate --product-code 8471.30 --year 2024
//! tradewatch analyze --product-code 847130 --country china --year 2024 --pretty
//! tradewatch analyze --topic "steel tariffs" --source gnews --deadline-ms 5000
//! tradewatch cost --value 100000 --rate 25
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Resilient trade and tariff data aggregation.
///
/// Queries several public trade-data providers in parallel and reports what
/// each one returned, including partial failures.
#[derive(Debug, Parser)]
#[command(
    name = "tradewatch",
    author,
    version,
    about = "Resilient trade and tariff data aggregation",
    long_about = "tradewatch queries trade-data providers (Census, USITC DataWeb, \
Federal Register, BEA, GNews) in parallel and folds their answers into one report.\n\
\n\
Every command prints a single JSON document on stdout. Exit codes: 0 success, \
2 invalid input, 3 partial result, 4 all sources failed."
)]
pub struct Cli {
    /// JSON configuration file. Defaults apply when omitted.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Use the offline transport for every source instead of the network.
    #[arg(long, global = true, default_value_t = false)]
    pub offline: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Emit log events as JSON lines on stderr.
    #[arg(long, global = true, default_value_t = false)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Validate query fields and report every violated rule.
    ///
    /// # Examples
    ///
    ///   tradewatch validate --product-code 12345 --year 1985
    Validate(FieldArgs),

    /// Query every relevant source and print the aggregated report.
    ///
    /// # Examples
    ///
    ///   tradewatch analyze --product-code 847130 --year 2024
    ///   tradewatch analyze --product-code 7208 --source census --source dataweb
    Analyze(AnalyzeArgs),

    /// Show per-source health, circuit state and cache statistics.
    Status,

    /// Drop every cached payload and print the stats from before clearing.
    CacheClear,

    /// Compute tariff cost for an import value and rate.
    ///
    /// # Examples
    ///
    ///   tradewatch cost --value 100000 --rate 25
    Cost(CostArgs),

    /// List configured sources, their quotas and required fields.
    Sources,
}

/// Query fields shared by `validate` and `analyze`.
#[derive(Debug, Clone, Args)]
pub struct FieldArgs {
    /// Harmonized tariff code; dots and spaces are ignored.
    #[arg(long)]
    pub product_code: Option<String>,

    /// Trading partner code, name or alias (e.g. CN, china, mfn).
    #[arg(long)]
    pub country: Option<String>,

    /// Calendar year.
    #[arg(long)]
    pub year: Option<String>,

    /// Free-text topic for news and policy sources.
    #[arg(long)]
    pub topic: Option<String>,
}

/// Arguments for the `analyze` command.
#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    #[command(flatten)]
    pub fields: FieldArgs,

    /// Restrict the query to these sources (repeatable).
    #[arg(long = "source", value_name = "SOURCE")]
    pub sources: Vec<String>,

    /// Overall deadline in milliseconds.
    #[arg(long)]
    pub deadline_ms: Option<u64>,
}

/// Arguments for the `cost` command.
#[derive(Debug, Args)]
pub struct CostArgs {
    /// Import value.
    #[arg(long)]
    pub value: f64,

    /// Tariff rate in percent (0-100).
    #[arg(long)]
    pub rate: f64,

    /// ISO currency code for the formatted amounts.
    #[arg(long, default_value = "USD")]
    pub currency: String,
}
