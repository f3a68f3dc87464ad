use tradewatch_core::{calculate_tariff_cost, format_currency};

use crate::cli::CostArgs;
use crate::error::CliError;

use super::CommandResult;

pub fn run(args: &CostArgs) -> Result<CommandResult, CliError> {
    let mut cost = calculate_tariff_cost(args.value, args.rate)?;

    let currency = args.currency.trim().to_ascii_uppercase();
    if currency != "USD" {
        cost.formatted.import_value = format_currency(cost.import_value, &currency);
        cost.formatted.tariff_cost = format_currency(cost.tariff_cost, &currency);
        cost.formatted.total_cost = format_currency(cost.total_cost, &currency);
    }

    Ok(CommandResult::ok("cost", serde_json::to_value(&cost)?))
}
