//! # Tradewatch Core
//!
//! Resilient aggregation engine for trade and tariff data.
//!
//! ## Overview
//!
//! This crate fans one analysis query out to several unreliable upstream
//! providers and folds their answers into a single report:
//!
//! - **Validation** of product codes, years, countries and topics before any I/O
//! - **TTL cache** that collapses concurrent misses into one upstream fetch
//! - **Rate-limit gate** with a fixed window per source
//! - **Retry executor** with exponential backoff and jitter
//! - **Circuit breaking** and per-source health records
//! - **Pure tariff arithmetic** helpers
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | TTL cache with stampede de-duplication |
//! | [`config`] | Engine and per-source configuration |
//! | [`context`] | Engine context and builder |
//! | [`domain`] | Validated value types and tariff arithmetic |
//! | [`error`] | Core error types |
//! | [`health`] | Health records and circuit breaker |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`http_source`] | Generic HTTP-backed source client |
//! | [`orchestrator`] | Fan-out, join and report assembly |
//! | [`pool`] | Per-source connection pool |
//! | [`rate_limit`] | Fixed-window rate-limit gate |
//! | [`report`] | Per-source results and the aggregated report |
//! | [`retry`] | Retry policy and executor |
//! | [`source`] | Source identifiers |
//! | [`source_client`] | Source client contract and error vocabulary |
//! | [`validation`] | Query validation and normalization |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tradewatch_core::{AnalysisQuery, EngineBuilder, EngineConfig, TradeFields};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = EngineBuilder::new(EngineConfig::default().with_env_credentials())
//!         .with_default_sources()
//!         .build()?;
//!
//!     let query = AnalysisQuery::new(
//!         TradeFields::new()
//!             .with_product_code("8471.30")
//!             .with_country("China")
//!             .with_year(2024),
//!     );
//!     let report = engine.analyze(query).await;
//!     println!("{}", report.overall_status.as_str());
//!
//!     engine.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  CLI / Caller   │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │  Orchestrator   │────▶│ Validation       │
//! └────────┬────────┘     └──────────────────┘
//!          │ one task per source
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ Cache Store     │────▶│ Circuit / Gate   │
//! └────────┬────────┘     └──────────────────┘
//!          │ miss
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ Retry Executor  │────▶│ Source Client    │
//! └─────────────────┘     │ (HTTP + pool)    │
//!                         └──────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! Only validation stops an analysis. Every other failure is classified and
//! lands in the report as a [`SourceResult`]:
//!
//! ```rust
//! use tradewatch_core::{SourceError, SourceErrorKind};
//!
//! fn handle_error(error: SourceError) {
//!     match error.kind() {
//!         SourceErrorKind::Transient | SourceErrorKind::RateLimited => {
//!             // Retried under the source's policy
//!         }
//!         SourceErrorKind::Invalid | SourceErrorKind::Fatal => {
//!             // Reported without retry
//!         }
//!     }
//! }
//! ```
//!
//! ## Security
//!
//! - API keys are wrapped in [`Credential`] and never logged or serialized
//! - Error details carry coded messages only, never provider bodies or URLs

pub mod cache;
pub mod config;
pub mod context;
pub mod domain;
pub mod error;
pub mod health;
pub mod http_client;
pub mod http_source;
pub mod orchestrator;
pub mod pool;
pub mod rate_limit;
pub mod report;
pub mod retry;
pub mod source;
pub mod source_client;
pub mod validation;

// Re-export commonly used types at crate root for convenience

// Caching
pub use cache::{CacheOrigin, CacheStats, CacheStore, Fetched};

// Configuration
pub use config::{CacheConfig, Credential, EngineConfig, SourceConfig};

// Engine
pub use context::{EngineBuilder, EngineContext};
pub use orchestrator::Orchestrator;

// Domain models
pub use domain::{
    calculate_tariff_cost, format_currency, format_percentage, Country, FormattedCost,
    ProductCode, TariffCost, TradeYear, UtcDateTime, MAX_YEAR, MIN_YEAR,
};

// Error types
pub use error::{CoreError, ValidationError};

// Health
pub use health::{
    CircuitBreakerConfig, CircuitDecision, CircuitState, HealthRecord, HealthTracker, ProbeGuard,
};

// HTTP client types
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpErrorKind, HttpFuture, HttpMethod, HttpRequest,
    HttpResponse, OfflineHttpClient, ReqwestHttpClient,
};
pub use http_source::{classify_response, HttpSource};
pub use pool::{ConnectionPool, PooledConnection};

// Rate limiting
pub use rate_limit::{Admission, OnRateLimit, RateLimitGate, RateLimitQuota};

// Reports
pub use report::{AnalysisReport, ErrorDetail, OverallStatus, SourceResult, SourceStatus};

// Retry logic
pub use retry::{RetryError, RetryExecutor, RetryOutcome, RetryPolicy};

// Source identifiers and contract
pub use source::SourceId;
pub use source_client::{
    Payload, RequestDescriptor, Requirements, SourceClient, SourceError, SourceErrorKind,
    SourceFuture,
};

// Validation
pub use validation::{
    normalize_query, sanitize_topic, validate, AnalysisQuery, FieldCheck, NormalizedQuery,
    QueryField, TradeFields, TradeQuery, ValidationReport,
};
