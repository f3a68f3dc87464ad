use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::{QueryField, SourceId, TradeQuery};

/// Opaque upstream payload, passed through to the report unchanged.
pub type Payload = serde_json::Value;

/// Boxed future returned by [`SourceClient::execute`].
pub type SourceFuture<'a> = Pin<Box<dyn Future<Output = Result<Payload, SourceError>> + Send + 'a>>;

/// Shared failure vocabulary every source client maps provider errors into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceErrorKind {
    /// Timeouts, connection failures, 5xx. Retried.
    Transient,
    /// Quota exhausted locally or upstream. Retried.
    RateLimited,
    /// Malformed request. Not retried.
    Invalid,
    /// Unrecoverable provider rejection. Not retried.
    Fatal,
}

/// Classified source error. Messages never carry credentials or response bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    kind: SourceErrorKind,
    code: &'static str,
    message: String,
    retry_after: Option<Duration>,
}

impl SourceError {
    fn new(kind: SourceErrorKind, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Transient, "source.transient", message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Transient, "source.timeout", message)
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            retry_after,
            ..Self::new(SourceErrorKind::RateLimited, "source.rate_limited", message)
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Invalid, "source.invalid_request", message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Fatal, "source.fatal", message)
    }

    pub fn not_registered(source: SourceId) -> Self {
        Self::new(
            SourceErrorKind::Fatal,
            "source.not_registered",
            format!("source '{source}' is not registered"),
        )
    }

    pub fn missing_fields(source: SourceId, missing: &[QueryField]) -> Self {
        let names = missing
            .iter()
            .map(|field| field.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        Self::new(
            SourceErrorKind::Invalid,
            "source.missing_fields",
            format!("source '{source}' requires: {names}"),
        )
    }

    pub fn circuit_open(source: SourceId, retry_after: Duration) -> Self {
        Self {
            retry_after: Some(retry_after),
            ..Self::new(
                SourceErrorKind::Transient,
                "source.circuit_open",
                format!(
                    "circuit for '{source}' is open, retry after {}s",
                    ceil_secs(retry_after)
                ),
            )
        }
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub const fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    pub const fn retryable(&self) -> bool {
        matches!(
            self.kind,
            SourceErrorKind::Transient | SourceErrorKind::RateLimited
        )
    }

    pub fn is_timeout(&self) -> bool {
        self.code == "source.timeout"
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for SourceError {}

/// Query fields a source needs before it can be dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Requirements {
    pub product_code: bool,
    pub country: bool,
    pub year: bool,
    pub topic: bool,
}

impl Requirements {
    pub const fn new(product_code: bool, country: bool, year: bool, topic: bool) -> Self {
        Self {
            product_code,
            country,
            year,
            topic,
        }
    }

    pub const fn none() -> Self {
        Self::new(false, false, false, false)
    }

    pub const fn requires(self, field: QueryField) -> bool {
        match field {
            QueryField::ProductCode => self.product_code,
            QueryField::Country => self.country,
            QueryField::Year => self.year,
            QueryField::Topic => self.topic,
        }
    }

    pub fn missing(self, query: &TradeQuery) -> Vec<QueryField> {
        [
            QueryField::ProductCode,
            QueryField::Country,
            QueryField::Year,
            QueryField::Topic,
        ]
        .into_iter()
        .filter(|field| self.requires(*field) && !query.has(*field))
        .collect()
    }

    pub fn satisfied_by(self, query: &TradeQuery) -> bool {
        self.missing(query).is_empty()
    }
}

/// One source's view of an analysis call. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub source: SourceId,
    pub params: BTreeMap<String, String>,
    pub deadline: Instant,
}

impl RequestDescriptor {
    pub fn new(source: SourceId, query: &TradeQuery, deadline: Instant) -> Self {
        Self {
            source,
            params: query.params(),
            deadline,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// SHA-256 over the source id and the canonical JSON of the normalized params.
    pub fn cache_key(&self) -> String {
        let canonical = serde_json::json!({
            "source": self.source.as_str(),
            "params": self.params,
        });
        hex::encode(Sha256::digest(canonical.to_string().as_bytes()))
    }
}

/// Contract implemented by every upstream provider.
pub trait SourceClient: Send + Sync {
    fn id(&self) -> SourceId;

    fn requirements(&self) -> Requirements;

    /// Fetch one payload. Implementations must finish or fail by `request.deadline`.
    fn execute<'a>(&'a self, request: &'a RequestDescriptor) -> SourceFuture<'a>;

    /// Release pooled connections. Further calls fail with a fatal error.
    fn close(&self) {}
}

pub(crate) fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}
