//! Behavior-driven tests for retry, rate limiting and circuit breaking.
//!
//! These tests verify HOW the engine behaves when sources are flaky, slow,
//! over quota or persistently down.

mod support;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tradewatch_core::{
    CircuitState, OnRateLimit, OverallStatus, RateLimitQuota, SourceError, SourceId,
    SourceStatus,
};

use support::{engine, engine_with, fast_config, query_for_year, steel_query, ScriptedSource};

// =============================================================================
// Resilience: Retry
// =============================================================================

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_until_success() {
    // Given: A source that drops the connection twice
    let census = Arc::new(
        ScriptedSource::new(SourceId::Census)
            .then_fail(SourceError::transient("connection reset"))
            .then_fail(SourceError::transient("503 service unavailable")),
    );
    let engine = engine(&[census.clone()]);
    let started = Instant::now();

    // When: The caller analyzes a query
    let report = engine.analyze(steel_query()).await;

    // Then: The third attempt succeeds after 10ms + 20ms of backoff
    let entry = report.result(SourceId::Census).expect("census entry");
    assert_eq!(entry.status, SourceStatus::Success);
    assert_eq!(entry.attempts, 3);
    assert_eq!(census.calls(), 3);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(30) && elapsed < Duration::from_millis(40));
}

#[tokio::test(start_paused = true)]
async fn persistent_transient_failure_is_degraded_after_three_attempts() {
    // Given: A source that never recovers
    let census = Arc::new(
        ScriptedSource::new(SourceId::Census)
            .always_fail(SourceError::transient("502 bad gateway")),
    );
    let engine = engine(&[census.clone()]);

    // When: The caller analyzes a query
    let report = engine.analyze(steel_query()).await;

    // Then: Exactly three calls were made, never a fourth
    assert_eq!(census.calls(), 3);
    assert_eq!(report.overall_status, OverallStatus::Failed);
    let entry = report.result(SourceId::Census).expect("census entry");
    assert_eq!(entry.status, SourceStatus::Degraded);
    assert_eq!(entry.attempts, 3);
    let detail = entry.error.as_ref().expect("detail");
    assert_eq!(detail.code, "source.transient");
    assert_eq!(detail.message, "502 bad gateway");
    assert!(detail.retryable);
}

#[tokio::test(start_paused = true)]
async fn slow_source_times_out_per_call_and_is_reported_as_timeout() {
    // Given: A 100ms per-call timeout and a source that takes a second
    let census = Arc::new(
        ScriptedSource::new(SourceId::Census).with_latency(Duration::from_secs(1)),
    );
    let mut config = fast_config();
    if let Some(source) = config.sources.get_mut(&SourceId::Census) {
        source.timeout = Duration::from_millis(100);
    }
    let engine = engine_with(config, &[census.clone()]);
    let started = Instant::now();

    // When: The caller analyzes a query
    let report = engine.analyze(steel_query()).await;

    // Then: Each attempt was cut at 100ms and the retries ran out
    assert_eq!(census.calls(), 3);
    let entry = report.result(SourceId::Census).expect("census entry");
    assert_eq!(entry.status, SourceStatus::Timeout);
    assert_eq!(entry.error.as_ref().map(|e| e.code.as_str()), Some("source.timeout"));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(330) && elapsed < Duration::from_millis(400));
}

#[tokio::test(start_paused = true)]
async fn invalid_request_is_not_retried() {
    // Given: A source that rejects the request shape
    let census = Arc::new(
        ScriptedSource::new(SourceId::Census)
            .always_fail(SourceError::invalid("unknown variable GEN_VAL_MO")),
    );
    let engine = engine(&[census.clone()]);

    // When: The caller analyzes a query
    let report = engine.analyze(steel_query()).await;

    // Then: One call, invalid entry
    assert_eq!(census.calls(), 1);
    let entry = report.result(SourceId::Census).expect("census entry");
    assert_eq!(entry.status, SourceStatus::Invalid);
    assert_eq!(entry.attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn upstream_retry_after_is_honoured_between_attempts() {
    // Given: A source that answers 429 with Retry-After: 2 once
    let census = Arc::new(ScriptedSource::new(SourceId::Census).then_fail(
        SourceError::rate_limited("census rate limit exceeded", Some(Duration::from_secs(2))),
    ));
    let engine = engine(&[census.clone()]);
    let started = Instant::now();

    // When: The caller analyzes a query
    let report = engine.analyze(steel_query()).await;

    // Then: The retry waited at least the advertised two seconds
    assert!(started.elapsed() >= Duration::from_secs(2));
    let entry = report.result(SourceId::Census).expect("census entry");
    assert_eq!(entry.status, SourceStatus::Success);
    assert_eq!(entry.attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn persistent_upstream_rate_limit_is_reported_as_rate_limited() {
    // Given: A source that keeps answering 429
    let census = Arc::new(ScriptedSource::new(SourceId::Census).always_fail(
        SourceError::rate_limited("census rate limit exceeded", Some(Duration::from_millis(50))),
    ));
    let engine = engine(&[census.clone()]);

    // When: The caller analyzes a query
    let report = engine.analyze(steel_query()).await;

    // Then: All attempts were spent and the entry says why
    assert_eq!(census.calls(), 3);
    let entry = report.result(SourceId::Census).expect("census entry");
    assert_eq!(entry.status, SourceStatus::RateLimited);
    assert_eq!(entry.error.as_ref().and_then(|e| e.retry_after_ms), Some(50));
}

#[tokio::test(start_paused = true)]
async fn retries_stop_when_the_next_one_would_pass_the_deadline() {
    // Given: A failing source and a 25ms deadline
    let census = Arc::new(
        ScriptedSource::new(SourceId::Census).always_fail(SourceError::transient("reset")),
    );
    let engine = engine(&[census.clone()]);

    // When: The caller analyzes under that deadline
    let report = engine
        .analyze(steel_query().with_deadline(Duration::from_millis(25)))
        .await;

    // Then: Attempts at 0ms and 10ms ran; the one at 30ms did not
    assert_eq!(census.calls(), 2);
    let entry = report.result(SourceId::Census).expect("census entry");
    assert_eq!(entry.status, SourceStatus::Degraded);
    assert_eq!(entry.attempts, 2);
}

// =============================================================================
// Resilience: Rate Limit Gate
// =============================================================================

#[tokio::test(start_paused = true)]
async fn over_quota_call_is_rejected_with_retry_after() {
    // Given: Census allows one call per minute and rejects the rest
    let census = Arc::new(ScriptedSource::new(SourceId::Census));
    let mut config = fast_config();
    if let Some(source) = config.sources.get_mut(&SourceId::Census) {
        source.rate_limit = RateLimitQuota::per_minute(1);
    }
    let engine = engine_with(config, &[census.clone()]);

    // When: Two different queries run back to back
    let first = engine.analyze(query_for_year(2023)).await;
    let second = engine.analyze(query_for_year(2024)).await;

    // Then: The second never reached the source
    assert_eq!(census.calls(), 1);
    assert_eq!(first.overall_status, OverallStatus::Success);
    let entry = second.result(SourceId::Census).expect("census entry");
    assert_eq!(entry.status, SourceStatus::RateLimited);
    assert_eq!(entry.attempts, 0);
    let detail = entry.error.as_ref().expect("detail");
    assert_eq!(detail.code, "source.rate_limited");
    assert_eq!(detail.message, "rate limit exceeded, retry after 60s");
    assert_eq!(detail.retry_after_ms, Some(60_000));
}

#[tokio::test(start_paused = true)]
async fn cache_hits_do_not_consume_quota() {
    // Given: One call per minute
    let census = Arc::new(ScriptedSource::new(SourceId::Census));
    let mut config = fast_config();
    if let Some(source) = config.sources.get_mut(&SourceId::Census) {
        source.rate_limit = RateLimitQuota::per_minute(1);
    }
    let engine = engine_with(config, &[census.clone()]);

    // When: The same query runs three times
    for _ in 0..3 {
        let report = engine.analyze(steel_query()).await;
        // Then: Every run succeeds
        assert_eq!(report.overall_status, OverallStatus::Success);
    }
    assert_eq!(census.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn wait_policy_sleeps_until_the_window_resets() {
    // Given: One call per minute, configured to wait
    let census = Arc::new(ScriptedSource::new(SourceId::Census));
    let mut config = fast_config();
    if let Some(source) = config.sources.get_mut(&SourceId::Census) {
        source.rate_limit = RateLimitQuota::per_minute(1).with_policy(OnRateLimit::Wait);
    }
    let engine = engine_with(config, &[census.clone()]);
    engine.analyze(query_for_year(2023)).await;
    let started = Instant::now();

    // When: A second query runs with a two minute deadline
    let report = engine
        .analyze(query_for_year(2024).with_deadline(Duration::from_secs(120)))
        .await;

    // Then: It waited for the new window and then succeeded
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(60) && elapsed < Duration::from_secs(61));
    assert_eq!(census.calls(), 2);
    assert_eq!(
        report.result(SourceId::Census).map(|r| r.status),
        Some(SourceStatus::Success)
    );
}

#[tokio::test(start_paused = true)]
async fn wait_policy_does_not_wait_past_the_deadline() {
    // Given: One call per minute, configured to wait
    let census = Arc::new(ScriptedSource::new(SourceId::Census));
    let mut config = fast_config();
    if let Some(source) = config.sources.get_mut(&SourceId::Census) {
        source.rate_limit = RateLimitQuota::per_minute(1).with_policy(OnRateLimit::Wait);
    }
    let engine = engine_with(config, &[census.clone()]);
    engine.analyze(query_for_year(2023)).await;
    let started = Instant::now();

    // When: The next query only has ten seconds
    let report = engine
        .analyze(query_for_year(2024).with_deadline(Duration::from_secs(10)))
        .await;

    // Then: It is rate limited right away instead of sleeping
    assert!(started.elapsed() < Duration::from_millis(10));
    assert_eq!(census.calls(), 1);
    assert_eq!(
        report.result(SourceId::Census).map(|r| r.status),
        Some(SourceStatus::RateLimited)
    );
}

// =============================================================================
// Resilience: Circuit Breaker
// =============================================================================

#[tokio::test(start_paused = true)]
async fn circuit_opens_after_consecutive_failures_and_recovers_after_cooldown() {
    // Given: A source that fails three times, then recovers
    let census = Arc::new(
        ScriptedSource::new(SourceId::Census)
            .then_fail(SourceError::fatal("upstream down"))
            .then_fail(SourceError::fatal("upstream down"))
            .then_fail(SourceError::fatal("upstream down")),
    );
    let engine = engine(&[census.clone()]);

    // When: Three analyses fail
    for _ in 0..3 {
        engine.analyze(steel_query()).await;
    }

    // Then: The circuit is open and the next call is skipped
    let record = engine.system_status()[&SourceId::Census].clone();
    assert_eq!(record.circuit_state, CircuitState::Open);
    assert_eq!(record.consecutive_failures, 3);

    let skipped = engine.analyze(steel_query()).await;
    let entry = skipped.result(SourceId::Census).expect("census entry");
    assert_eq!(entry.status, SourceStatus::Degraded);
    assert_eq!(
        entry.error.as_ref().map(|e| e.code.as_str()),
        Some("source.circuit_open")
    );
    assert_eq!(census.calls(), 3, "open circuit makes no call");

    // When: The cooldown passes
    tokio::time::advance(Duration::from_secs(30)).await;
    let probe = engine.analyze(steel_query()).await;

    // Then: The half-open probe succeeds and closes the circuit
    assert_eq!(census.calls(), 4);
    assert_eq!(probe.overall_status, OverallStatus::Success);
    let record = engine.system_status()[&SourceId::Census].clone();
    assert_eq!(record.circuit_state, CircuitState::Closed);
    assert_eq!(record.consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn half_open_circuit_lets_one_concurrent_call_through() {
    // Given: A slow source whose circuit opened after three failures
    let census = Arc::new(
        ScriptedSource::new(SourceId::Census)
            .with_latency(Duration::from_millis(100))
            .then_fail(SourceError::fatal("upstream down"))
            .then_fail(SourceError::fatal("upstream down"))
            .then_fail(SourceError::fatal("upstream down")),
    );
    let engine = engine(&[census.clone()]);
    for _ in 0..3 {
        engine.analyze(steel_query()).await;
    }
    tokio::time::advance(Duration::from_secs(30)).await;

    // When: Two different queries arrive together after the cooldown
    let (first, second) = tokio::join!(
        engine.analyze(query_for_year(2023)),
        engine.analyze(query_for_year(2024)),
    );

    // Then: Only one of them reached the source and the circuit closed
    assert_eq!(census.calls(), 4, "a single probe while half-open");
    let statuses = [first.overall_status, second.overall_status];
    assert!(statuses.contains(&OverallStatus::Success));
    assert!(statuses.contains(&OverallStatus::Failed));
    let skipped = [&first, &second]
        .into_iter()
        .find(|report| report.overall_status == OverallStatus::Failed)
        .and_then(|report| report.result(SourceId::Census))
        .expect("skipped entry");
    assert_eq!(skipped.status, SourceStatus::Degraded);
    assert_eq!(
        skipped.error.as_ref().map(|e| e.code.as_str()),
        Some("source.circuit_open")
    );
    assert_eq!(
        engine.system_status()[&SourceId::Census].circuit_state,
        CircuitState::Closed
    );
}

#[tokio::test(start_paused = true)]
async fn failed_half_open_probe_reopens_the_circuit() {
    // Given: A source that never recovers
    let census = Arc::new(
        ScriptedSource::new(SourceId::Census).always_fail(SourceError::fatal("upstream down")),
    );
    let engine = engine(&[census.clone()]);
    for _ in 0..3 {
        engine.analyze(steel_query()).await;
    }

    // When: The probe after the cooldown fails too
    tokio::time::advance(Duration::from_secs(30)).await;
    engine.analyze(steel_query()).await;

    // Then: The circuit is open again
    assert_eq!(census.calls(), 4);
    assert_eq!(
        engine.system_status()[&SourceId::Census].circuit_state,
        CircuitState::Open
    );
}

#[tokio::test(start_paused = true)]
async fn cached_payload_is_served_while_circuit_is_open() {
    // Given: One cached answer, then a source that goes down
    let census = Arc::new(
        ScriptedSource::new(SourceId::Census)
            .then_succeed(serde_json::json!({"rows": 12}))
            .always_fail(SourceError::fatal("upstream down")),
    );
    let engine = engine(&[census.clone()]);
    engine.analyze(steel_query()).await;
    for year in 2020..2023 {
        engine.analyze(query_for_year(year)).await;
    }
    assert_eq!(
        engine.system_status()[&SourceId::Census].circuit_state,
        CircuitState::Open
    );

    // When: The cached query runs again
    let report = engine.analyze(steel_query()).await;

    // Then: It is answered from cache without touching the source
    assert_eq!(report.overall_status, OverallStatus::Success);
    let entry = report.result(SourceId::Census).expect("census entry");
    assert!(entry.cache_hit);
    assert_eq!(entry.payload, Some(serde_json::json!({"rows": 12})));
    assert_eq!(census.calls(), 4);
}
