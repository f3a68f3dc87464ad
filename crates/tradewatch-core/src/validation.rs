//! Input normalization and validation.
//!
//! [`validate`] checks every supplied field and reports all violated rules at
//! once. [`normalize_query`] additionally resolves the source list and the
//! deadline override and produces the [`NormalizedQuery`] the orchestrator
//! dispatches.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::{Country, ProductCode, SourceId, TradeYear, ValidationError};

const TOPIC_DISALLOWED: [char; 11] = ['<', '>', '"', '\'', '&', ';', '(', ')', '|', '`', '$'];

/// Query fields a source can depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryField {
    ProductCode,
    Country,
    Year,
    Topic,
}

impl QueryField {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ProductCode => "product_code",
            Self::Country => "country",
            Self::Year => "year",
            Self::Topic => "topic",
        }
    }
}

impl Display for QueryField {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw caller-supplied fields, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "string_or_number"
    )]
    pub year: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

impl TradeFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_product_code(mut self, value: impl Into<String>) -> Self {
        self.product_code = Some(value.into());
        self
    }

    pub fn with_country(mut self, value: impl Into<String>) -> Self {
        self.country = Some(value.into());
        self
    }

    pub fn with_year(mut self, value: impl ToString) -> Self {
        self.year = Some(value.to_string());
        self
    }

    pub fn with_topic(mut self, value: impl Into<String>) -> Self {
        self.topic = Some(value.into());
        self
    }

    fn is_empty(&self) -> bool {
        self.product_code.is_none()
            && self.country.is_none()
            && self.year.is_none()
            && self.topic.is_none()
    }
}

/// A full analysis request: trade fields plus dispatch options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisQuery {
    #[serde(flatten)]
    pub fields: TradeFields,
    /// Explicit source selection. Empty means "every relevant source".
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
}

impl AnalysisQuery {
    pub fn new(fields: TradeFields) -> Self {
        Self {
            fields,
            ..Self::default()
        }
    }

    pub fn with_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sources = sources.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline_ms = Some(u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX));
        self
    }
}

/// Normalized trade parameters shared by every source request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TradeQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_code: Option<ProductCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<Country>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<TradeYear>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

impl TradeQuery {
    pub fn has(&self, field: QueryField) -> bool {
        match field {
            QueryField::ProductCode => self.product_code.is_some(),
            QueryField::Country => self.country.is_some(),
            QueryField::Year => self.year.is_some(),
            QueryField::Topic => self.topic.is_some(),
        }
    }

    /// Canonical string parameters, ordered by key.
    pub fn params(&self) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        if let Some(code) = &self.product_code {
            params.insert(QueryField::ProductCode.to_string(), code.to_string());
        }
        if let Some(country) = self.country {
            params.insert(QueryField::Country.to_string(), country.code().to_owned());
        }
        if let Some(year) = self.year {
            params.insert(QueryField::Year.to_string(), year.to_string());
        }
        if let Some(topic) = &self.topic {
            params.insert(QueryField::Topic.to_string(), topic.clone());
        }
        params
    }
}

/// Outcome of checking one input field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldCheck {
    pub value: String,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Every violated rule for one request, plus per-field status.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub fields: BTreeMap<String, FieldCheck>,
    pub violations: Vec<ValidationError>,
}

impl ValidationReport {
    fn new() -> Self {
        Self {
            valid: true,
            ..Self::default()
        }
    }

    fn accept(&mut self, field: &str, value: &str, normalized: impl ToString) {
        self.fields.insert(
            field.to_owned(),
            FieldCheck {
                value: value.to_owned(),
                valid: true,
                normalized: Some(normalized.to_string()),
                message: None,
            },
        );
    }

    fn reject(&mut self, value: &str, error: ValidationError) {
        self.fields.insert(
            error.field().to_owned(),
            FieldCheck {
                value: value.to_owned(),
                valid: false,
                normalized: None,
                message: Some(error.to_string()),
            },
        );
        self.violation(error);
    }

    fn violation(&mut self, error: ValidationError) {
        self.valid = false;
        self.violations.push(error);
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Whether any violation belongs to `field`.
    pub fn has_violation(&self, field: &str) -> bool {
        self.violations.iter().any(|error| error.field() == field)
    }
}

/// Normalized, dispatch-ready query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedQuery {
    pub trade: TradeQuery,
    /// `None` selects every relevant registered source.
    pub sources: Option<Vec<SourceId>>,
    pub deadline: Option<Duration>,
}

/// Check every supplied field and report all violations together.
pub fn validate(fields: &TradeFields) -> ValidationReport {
    check_fields(fields).0
}

/// Validate and normalize a full analysis query.
pub fn normalize_query(query: &AnalysisQuery) -> Result<NormalizedQuery, ValidationReport> {
    let (mut report, trade) = check_fields(&query.fields);

    let mut sources = Vec::with_capacity(query.sources.len());
    for raw in &query.sources {
        match raw.parse::<SourceId>() {
            Ok(source) if !sources.contains(&source) => sources.push(source),
            Ok(_) => {}
            Err(error) => report.violation(error),
        }
    }

    if query.deadline_ms == Some(0) {
        report.violation(ValidationError::ZeroDeadline);
    }

    if !report.is_valid() {
        return Err(report);
    }

    Ok(NormalizedQuery {
        trade,
        sources: (!sources.is_empty()).then_some(sources),
        deadline: query.deadline_ms.map(Duration::from_millis),
    })
}

/// Remove shell and markup metacharacters and surrounding whitespace.
pub fn sanitize_topic(input: &str) -> String {
    input
        .chars()
        .filter(|ch| !TOPIC_DISALLOWED.contains(ch))
        .collect::<String>()
        .trim()
        .to_owned()
}

fn check_fields(fields: &TradeFields) -> (ValidationReport, TradeQuery) {
    let mut report = ValidationReport::new();
    let mut trade = TradeQuery::default();

    if fields.is_empty() {
        report.violation(ValidationError::EmptyQuery);
        return (report, trade);
    }

    if let Some(raw) = &fields.product_code {
        match ProductCode::parse(raw) {
            Ok(code) => {
                report.accept(QueryField::ProductCode.as_str(), raw, &code);
                trade.product_code = Some(code);
            }
            Err(error) => report.reject(raw, error),
        }
    }

    if let Some(raw) = &fields.country {
        match Country::parse(raw) {
            Ok(country) => {
                report.accept(QueryField::Country.as_str(), raw, country);
                trade.country = Some(country);
            }
            Err(error) => report.reject(raw, error),
        }
    }

    if let Some(raw) = &fields.year {
        match TradeYear::parse(raw) {
            Ok(year) => {
                report.accept(QueryField::Year.as_str(), raw, year);
                trade.year = Some(year);
            }
            Err(error) => report.reject(raw, error),
        }
    }

    if let Some(raw) = &fields.topic {
        let topic = sanitize_topic(raw);
        if topic.is_empty() {
            report.reject(raw, ValidationError::EmptyTopic);
        } else {
            report.accept(QueryField::Topic.as_str(), raw, &topic);
            trade.topic = Some(topic);
        }
    }

    (report, trade)
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(text)) => Some(text),
        Some(other) => Some(other.to_string()),
    })
}
