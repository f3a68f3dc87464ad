use std::io::Write;

use serde::Serialize;
use serde_json::Value;

use crate::commands::CommandResult;
use crate::error::CliError;
use crate::metadata::Metadata;

#[derive(Debug, Serialize)]
struct Document<'a> {
    meta: Metadata,
    data: &'a Value,
}

/// Print one JSON document for `result` on stdout.
pub fn render(result: &CommandResult, pretty: bool) -> Result<(), CliError> {
    let rendered = to_json(result, pretty)?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(rendered.as_bytes())?;
    stdout.write_all(b"\n")?;
    stdout.flush()?;
    Ok(())
}

fn to_json(result: &CommandResult, pretty: bool) -> Result<String, CliError> {
    let mut meta = Metadata::new(result.command, result.latency_ms);
    for warning in &result.warnings {
        meta.push_warning(warning.clone());
    }

    let document = Document {
        meta,
        data: &result.data,
    };
    let rendered = if pretty {
        serde_json::to_string_pretty(&document)?
    } else {
        serde_json::to_string(&document)?
    };
    Ok(rendered)
}
