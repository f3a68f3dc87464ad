//! Contract tests every built-in source client must satisfy.
//!
//! Each provider is exercised through the same `SourceClient` surface with a
//! recording transport in place of the network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tradewatch_core::{
    AnalysisQuery, Credential, EngineBuilder, EngineConfig, HttpClient, HttpError, HttpFuture,
    HttpRequest, HttpResponse, HttpSource, OverallStatus, RequestDescriptor, SourceClient,
    SourceConfig, SourceErrorKind, SourceId, SourceStatus, TradeFields, TradeQuery,
};

const SECRET: &str = "contract-secret-key";

/// Transport that records requests and answers from a fixed response.
struct RecordingTransport {
    response: Result<HttpResponse, HttpError>,
    latency: Duration,
    seen: Mutex<Vec<HttpRequest>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl RecordingTransport {
    fn answering(response: HttpResponse) -> Arc<Self> {
        Self::build(Ok(response), Duration::ZERO)
    }

    fn failing(error: HttpError) -> Arc<Self> {
        Self::build(Err(error), Duration::ZERO)
    }

    fn slow(latency: Duration) -> Arc<Self> {
        Self::build(Ok(HttpResponse::ok_json("{}")), latency)
    }

    fn build(response: Result<HttpResponse, HttpError>, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            response,
            latency,
            seen: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    fn requests(&self) -> Vec<HttpRequest> {
        self.seen.lock().expect("lock").clone()
    }
}

impl HttpClient for RecordingTransport {
    fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a> {
        Box::pin(async move {
            self.seen.lock().expect("lock").push(request);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.response.clone()
        })
    }
}

fn keyed_config(source: SourceId) -> SourceConfig {
    SourceConfig {
        credential: Some(Credential::new(SECRET)),
        ..SourceConfig::default_for(source)
    }
}

fn full_query() -> TradeQuery {
    let query = AnalysisQuery::new(
        TradeFields::new()
            .with_product_code("7208.10")
            .with_country("mexico")
            .with_year(2024)
            .with_topic("steel safeguard"),
    );
    tradewatch_core::normalize_query(&query)
        .expect("valid query")
        .trade
}

fn descriptor(source: SourceId) -> RequestDescriptor {
    RequestDescriptor::new(source, &full_query(), Instant::now() + Duration::from_secs(5))
}

// =============================================================================
// Contract: Success Path
// =============================================================================

#[tokio::test]
async fn every_source_returns_the_json_payload() {
    for source in SourceId::ALL {
        let transport = RecordingTransport::answering(HttpResponse::ok_json(r#"{"ok":true}"#));
        let client = HttpSource::new(source, &keyed_config(source), transport.clone());

        let payload = client
            .execute(&descriptor(source))
            .await
            .unwrap_or_else(|error| panic!("source '{source}' failed: {error}"));

        assert_eq!(payload, serde_json::json!({"ok": true}), "source '{source}'");
        assert_eq!(transport.requests().len(), 1, "source '{source}'");
        assert_eq!(client.id(), source);
    }
}

#[tokio::test]
async fn every_source_targets_its_configured_base_url() {
    for source in SourceId::ALL {
        let transport = RecordingTransport::answering(HttpResponse::ok_json("{}"));
        let config = SourceConfig {
            base_url: format!("https://mirror.test/{source}/"),
            ..keyed_config(source)
        };
        let client = HttpSource::new(source, &config, transport.clone());

        client.execute(&descriptor(source)).await.expect("success");

        let request = &transport.requests()[0];
        assert!(
            request.url.starts_with(&format!("https://mirror.test/{source}")),
            "source '{source}': {}",
            request.url
        );
        assert!(request.timeout_ms > 0 && request.timeout_ms <= 30_000);
    }
}

#[tokio::test]
async fn requirements_are_satisfied_by_a_full_query() {
    let query = full_query();
    for source in SourceId::ALL {
        let client = HttpSource::new(
            source,
            &keyed_config(source),
            RecordingTransport::answering(HttpResponse::ok_json("{}")),
        );
        assert!(client.requirements().satisfied_by(&query), "source '{source}'");
    }
}

// =============================================================================
// Contract: Error Classification
// =============================================================================

#[tokio::test]
async fn status_codes_map_to_the_shared_vocabulary() {
    let cases = [
        (429, SourceErrorKind::RateLimited),
        (500, SourceErrorKind::Transient),
        (502, SourceErrorKind::Transient),
        (408, SourceErrorKind::Transient),
        (400, SourceErrorKind::Invalid),
        (403, SourceErrorKind::Fatal),
        (404, SourceErrorKind::Fatal),
    ];

    for source in SourceId::ALL {
        for (status, expected) in cases {
            let transport =
                RecordingTransport::answering(HttpResponse::new(status, "upstream said no"));
            let client = HttpSource::new(source, &keyed_config(source), transport);

            let error = client
                .execute(&descriptor(source))
                .await
                .expect_err("must fail");

            assert_eq!(error.kind(), expected, "source '{source}', status {status}");
        }
    }
}

#[tokio::test]
async fn transport_failures_are_transient() {
    for error in [HttpError::timeout("timed out"), HttpError::connect("refused")] {
        let transport = RecordingTransport::failing(error);
        let client = HttpSource::new(SourceId::Bea, &keyed_config(SourceId::Bea), transport);

        let classified = client
            .execute(&descriptor(SourceId::Bea))
            .await
            .expect_err("must fail");

        assert_eq!(classified.kind(), SourceErrorKind::Transient);
        assert!(classified.retryable());
    }
}

#[tokio::test]
async fn error_messages_never_carry_credentials_or_bodies() {
    for source in SourceId::ALL {
        for status in [400, 401, 429, 500] {
            let body = format!("echo {SECRET} stacktrace at line 42");
            let transport = RecordingTransport::answering(HttpResponse::new(status, body));
            let client = HttpSource::new(source, &keyed_config(source), transport);

            let error = client
                .execute(&descriptor(source))
                .await
                .expect_err("must fail");

            assert!(!error.message().contains(SECRET), "source '{source}'");
            assert!(!error.message().contains("stacktrace"), "source '{source}'");
        }
    }
}

// =============================================================================
// Contract: Connection Pool
// =============================================================================

#[tokio::test(start_paused = true)]
async fn pool_size_caps_concurrent_calls() {
    // Given: A pool of two connections and a slow transport
    let transport = RecordingTransport::slow(Duration::from_millis(100));
    let config = SourceConfig {
        max_connections: 2,
        ..keyed_config(SourceId::Census)
    };
    let client = Arc::new(HttpSource::new(SourceId::Census, &config, transport.clone()));

    // When: Six calls run at once
    let mut handles = Vec::new();
    for _ in 0..6 {
        let client = Arc::clone(&client);
        handles.push(tokio::spawn(async move {
            client.execute(&descriptor(SourceId::Census)).await
        }));
    }
    for handle in handles {
        handle.await.expect("task").expect("call succeeds");
    }

    // Then: No more than two were ever in flight and every permit came back
    assert_eq!(transport.peak.load(Ordering::SeqCst), 2);
    assert_eq!(client.pool().available(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancelled_call_releases_its_connection() {
    // Given: A single-connection pool and a transport that never answers in time
    let transport = RecordingTransport::slow(Duration::from_secs(60));
    let config = SourceConfig {
        max_connections: 1,
        ..keyed_config(SourceId::Census)
    };
    let client = HttpSource::new(SourceId::Census, &config, transport);
    let request = descriptor(SourceId::Census);

    // When: The call is dropped mid-flight
    let outcome = tokio::time::timeout(Duration::from_millis(50), client.execute(&request)).await;

    // Then: The permit is back in the pool
    assert!(outcome.is_err(), "call should have been cancelled");
    assert_eq!(client.pool().available(), 1);
}

#[tokio::test(start_paused = true)]
async fn waiting_for_a_connection_respects_the_deadline() {
    // Given: The only connection is held by a slow call
    let transport = RecordingTransport::slow(Duration::from_secs(10));
    let config = SourceConfig {
        max_connections: 1,
        ..keyed_config(SourceId::Census)
    };
    let client = Arc::new(HttpSource::new(SourceId::Census, &config, transport));
    let holder = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.execute(&descriptor(SourceId::Census)).await })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;

    // When: A second call has only 100ms
    let request = RequestDescriptor::new(
        SourceId::Census,
        &full_query(),
        Instant::now() + Duration::from_millis(100),
    );
    let error = client.execute(&request).await.expect_err("no connection");

    // Then: It times out instead of waiting for the holder
    assert!(error.is_timeout());
    holder.abort();
}

// =============================================================================
// Contract: Engine Wiring
// =============================================================================

#[tokio::test]
async fn default_sources_use_the_supplied_transport() {
    // Given: Default sources over a recording transport
    let transport = RecordingTransport::answering(HttpResponse::ok_json(r#"{"rows":[]}"#));
    let config = EngineConfig::default().with_env_lookup(|name| {
        name.ends_with("_API_KEY").then(|| String::from(SECRET))
    });
    let engine = EngineBuilder::new(config)
        .with_default_sources()
        .with_transport(transport.clone())
        .build()
        .expect("engine builds");

    // When: A query every provider can answer runs
    let query = AnalysisQuery::new(
        TradeFields::new()
            .with_product_code("720810")
            .with_year(2024),
    );
    let report = engine.analyze(query).await;

    // Then: Every built-in source was called once through the transport
    assert_eq!(report.overall_status, OverallStatus::Success);
    assert_eq!(report.results.len(), SourceId::ALL.len());
    assert_eq!(transport.requests().len(), SourceId::ALL.len());
    assert_eq!(report.count(SourceStatus::Success), SourceId::ALL.len());
    engine.shutdown();
}

#[tokio::test]
async fn disabled_sources_are_not_registered() {
    let mut config = EngineConfig::default();
    if let Some(source) = config.sources.get_mut(&SourceId::Gnews) {
        source.enabled = false;
    }
    let engine = EngineBuilder::new(config)
        .with_default_sources()
        .with_transport(RecordingTransport::answering(HttpResponse::ok_json("{}")))
        .build()
        .expect("engine builds");

    assert!(!engine.registered_sources().contains(&SourceId::Gnews));
    assert_eq!(engine.registered_sources().len(), SourceId::ALL.len() - 1);
}
