//! Per-source results and the aggregated analysis report.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::{AnalysisQuery, Payload, SourceError, SourceId, TradeQuery, UtcDateTime, ValidationReport};

/// Outcome of one source within one analysis call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Success,
    Timeout,
    RateLimited,
    Invalid,
    Fatal,
    /// Retries exhausted without a timeout, or the circuit is open.
    Degraded,
}

impl SourceStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::Invalid => "invalid",
            Self::Fatal => "fatal",
            Self::Degraded => "degraded",
        }
    }
}

/// Caller-safe error description. Never carries credentials or raw bodies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl From<&SourceError> for ErrorDetail {
    fn from(error: &SourceError) -> Self {
        Self {
            code: error.code().to_owned(),
            message: error.message().to_owned(),
            retryable: error.retryable(),
            retry_after_ms: error.retry_after().map(duration_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceResult {
    pub source: SourceId,
    pub status: SourceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    pub latency_ms: u64,
    /// Source invocations made for this result. Zero for cache hits and local rejections.
    pub attempts: u32,
    pub cache_hit: bool,
}

impl SourceResult {
    pub fn success(source: SourceId, payload: Payload, latency: Duration, attempts: u32) -> Self {
        Self {
            source,
            status: SourceStatus::Success,
            payload: Some(payload),
            error: None,
            latency_ms: duration_ms(latency),
            attempts,
            cache_hit: false,
        }
    }

    pub fn cached(source: SourceId, payload: Payload, latency: Duration) -> Self {
        Self {
            cache_hit: true,
            ..Self::success(source, payload, latency, 0)
        }
    }

    pub fn failure(
        source: SourceId,
        status: SourceStatus,
        error: &SourceError,
        latency: Duration,
        attempts: u32,
    ) -> Self {
        Self {
            source,
            status,
            payload: None,
            error: Some(ErrorDetail::from(error)),
            latency_ms: duration_ms(latency),
            attempts,
            cache_hit: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == SourceStatus::Success
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Success,
    Partial,
    Failed,
}

impl OverallStatus {
    /// `Failed` with zero successes, `Partial` with at least one success and
    /// one failure, `Success` otherwise.
    pub fn from_results<'a, I>(results: I) -> Self
    where
        I: IntoIterator<Item = &'a SourceResult>,
    {
        let (mut succeeded, mut failed) = (0_usize, 0_usize);
        for result in results {
            if result.is_success() {
                succeeded += 1;
            } else {
                failed += 1;
            }
        }

        match (succeeded, failed) {
            (0, _) => Self::Failed,
            (_, 0) => Self::Success,
            _ => Self::Partial,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

/// One aggregated answer to an analysis query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub report_id: Uuid,
    pub query: AnalysisQuery,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized: Option<TradeQuery>,
    /// Every dispatched or explicitly requested source, keyed by id.
    pub results: BTreeMap<SourceId, SourceResult>,
    pub overall_status: OverallStatus,
    /// Present only when validation rejected the query before dispatch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub assembled_at: UtcDateTime,
    pub latency_ms: u64,
}

impl AnalysisReport {
    /// Report for a query that failed validation. Nothing was dispatched.
    pub fn rejected(query: AnalysisQuery, validation: ValidationReport) -> Self {
        Self {
            report_id: Uuid::new_v4(),
            query,
            normalized: None,
            results: BTreeMap::new(),
            overall_status: OverallStatus::Failed,
            validation: Some(validation),
            warnings: Vec::new(),
            assembled_at: UtcDateTime::now(),
            latency_ms: 0,
        }
    }

    pub fn assembled(
        query: AnalysisQuery,
        normalized: TradeQuery,
        results: BTreeMap<SourceId, SourceResult>,
        warnings: Vec<String>,
        latency: Duration,
    ) -> Self {
        Self {
            report_id: Uuid::new_v4(),
            overall_status: OverallStatus::from_results(results.values()),
            query,
            normalized: Some(normalized),
            results,
            validation: None,
            warnings,
            assembled_at: UtcDateTime::now(),
            latency_ms: duration_ms(latency),
        }
    }

    pub fn result(&self, source: SourceId) -> Option<&SourceResult> {
        self.results.get(&source)
    }

    pub fn count(&self, status: SourceStatus) -> usize {
        self.results
            .values()
            .filter(|result| result.status == status)
            .count()
    }
}

pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(source: SourceId, status: SourceStatus) -> SourceResult {
        match status {
            SourceStatus::Success => SourceResult::success(source, json!({}), Duration::ZERO, 1),
            other => SourceResult::failure(
                source,
                other,
                &SourceError::fatal("rejected"),
                Duration::ZERO,
                1,
            ),
        }
    }

    #[test]
    fn overall_status_follows_success_count() {
        let ok = result(SourceId::Census, SourceStatus::Success);
        let fatal = result(SourceId::Bea, SourceStatus::Fatal);
        let timeout = result(SourceId::Gnews, SourceStatus::Timeout);

        assert_eq!(OverallStatus::from_results([&ok]), OverallStatus::Success);
        assert_eq!(
            OverallStatus::from_results([&ok, &fatal]),
            OverallStatus::Partial
        );
        assert_eq!(
            OverallStatus::from_results([&fatal, &timeout]),
            OverallStatus::Failed
        );
        assert_eq!(
            OverallStatus::from_results(std::iter::empty()),
            OverallStatus::Failed
        );
    }

    #[test]
    fn error_detail_carries_code_and_retry_hint() {
        let detail = ErrorDetail::from(&SourceError::rate_limited(
            "rate limit exceeded, retry after 42s",
            Some(Duration::from_secs(42)),
        ));

        assert_eq!(detail.code, "source.rate_limited");
        assert!(detail.retryable);
        assert_eq!(detail.retry_after_ms, Some(42_000));
    }

    #[test]
    fn rejected_report_is_failed_and_empty() {
        let report = AnalysisReport::rejected(AnalysisQuery::default(), ValidationReport::default());
        let value = serde_json::to_value(&report).expect("serializes");

        assert_eq!(report.overall_status, OverallStatus::Failed);
        assert!(report.results.is_empty());
        assert_eq!(value["overall_status"], "failed");
        assert!(value.get("validation").is_some());
    }
}
