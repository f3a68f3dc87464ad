use tradewatch_core::validate;

use crate::cli::FieldArgs;
use crate::error::CliError;

use super::{trade_fields, CommandResult, EXIT_INVALID_INPUT, EXIT_OK};

pub fn run(args: &FieldArgs) -> Result<CommandResult, CliError> {
    let report = validate(&trade_fields(args));
    let exit_code = if report.is_valid() {
        EXIT_OK
    } else {
        EXIT_INVALID_INPUT
    };

    let data = serde_json::to_value(&report)?;
    Ok(CommandResult::ok("validate", data).with_exit_code(exit_code))
}
