use serde::Serialize;

use crate::ValidationError;

/// Landed-cost breakdown for one import at one ad-valorem tariff rate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TariffCost {
    pub import_value: f64,
    pub tariff_rate_percent: f64,
    pub tariff_cost: f64,
    pub total_cost: f64,
    pub cost_increase_percent: f64,
    pub formatted: FormattedCost,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormattedCost {
    pub import_value: String,
    pub tariff_rate: String,
    pub tariff_cost: String,
    pub total_cost: String,
}

/// Compute tariff and total cost. Monetary outputs are rounded to cents.
pub fn calculate_tariff_cost(
    import_value: f64,
    tariff_rate_percent: f64,
) -> Result<TariffCost, ValidationError> {
    if !import_value.is_finite() {
        return Err(ValidationError::NonFiniteValue {
            field: "import_value",
        });
    }
    if !tariff_rate_percent.is_finite() {
        return Err(ValidationError::NonFiniteValue {
            field: "tariff_rate",
        });
    }
    if import_value < 0.0 {
        return Err(ValidationError::NegativeImportValue);
    }
    if !(0.0..=100.0).contains(&tariff_rate_percent) {
        return Err(ValidationError::TariffRateOutOfRange {
            value: tariff_rate_percent,
        });
    }

    let tariff_cost = round_cents(import_value * tariff_rate_percent / 100.0);
    let total_cost = round_cents(import_value + tariff_cost);
    let cost_increase_percent = if import_value > 0.0 {
        round_cents(tariff_cost / import_value * 100.0)
    } else {
        0.0
    };

    Ok(TariffCost {
        import_value,
        tariff_rate_percent,
        tariff_cost,
        total_cost,
        cost_increase_percent,
        formatted: FormattedCost {
            import_value: format_currency(import_value, "USD"),
            tariff_rate: format_percentage(tariff_rate_percent),
            tariff_cost: format_currency(tariff_cost, "USD"),
            total_cost: format_currency(total_cost, "USD"),
        },
    })
}

/// `$1,234.50` for USD, `1,234.50 EUR` for anything else.
pub fn format_currency(amount: f64, currency: &str) -> String {
    let negative = amount < 0.0;
    let cents = (amount.abs() * 100.0).round() as u64;
    let whole = group_thousands(cents / 100);
    let body = format!("{whole}.{:02}", cents % 100);
    let sign = if negative && cents > 0 { "-" } else { "" };

    if currency.eq_ignore_ascii_case("USD") {
        format!("{sign}${body}")
    } else {
        format!("{sign}{body} {}", currency.to_ascii_uppercase())
    }
}

pub fn format_percentage(value: f64) -> String {
    format!("{value:.2}%")
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
