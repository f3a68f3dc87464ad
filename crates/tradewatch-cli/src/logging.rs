//! Tracing subscriber setup.
//!
//! The filter comes from `TRADEWATCH_LOG`, then `LOG_LEVEL`, then the `-v`
//! count. Events go to stderr so stdout stays one JSON document.

use tracing_subscriber::EnvFilter;

use crate::error::CliError;

const FILTER_ENV_VARS: [&str; 2] = ["TRADEWATCH_LOG", "LOG_LEVEL"];
const LEVELS: [&str; 6] = ["off", "error", "warn", "info", "debug", "trace"];

pub fn init(verbosity: u8, json: bool) -> Result<(), CliError> {
    let directive = filter_directive(verbosity, |name| std::env::var(name).ok());
    let filter = EnvFilter::try_new(&directive)
        .map_err(|error| CliError::Logging(format!("invalid filter '{directive}': {error}")))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let installed = if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
    installed.map_err(|error| CliError::Logging(error.to_string()))
}

fn filter_directive<F>(verbosity: u8, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    FILTER_ENV_VARS
        .iter()
        .find_map(|name| lookup(name).filter(|value| !value.trim().is_empty()))
        .map(|value| normalize_directive(value.trim()))
        .unwrap_or_else(|| level_for(verbosity).to_owned())
}

/// Lower-case a bare level such as `ERROR`. Full directives keep their case,
/// since targets and field filters are case-sensitive.
fn normalize_directive(value: &str) -> String {
    LEVELS
        .iter()
        .find(|level| level.eq_ignore_ascii_case(value))
        .map_or_else(|| value.to_owned(), |level| (*level).to_owned())
}

const fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}
