//! Parallel fan-out of one analysis query across every relevant source.
//!
//! Each source runs in its own task: cache lookup (with stampede
//! de-duplication), circuit check, rate-limit gate, then the source client
//! under the retry executor. Branches are joined under one deadline; whatever
//! has not finished by then is aborted and reported as a timeout. A failing
//! source is data in the report, never an error for the caller.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::report::duration_ms;
use crate::source_client::ceil_secs;
use crate::{
    normalize_query, validate, AnalysisQuery, AnalysisReport, CacheOrigin, CacheStats,
    CircuitDecision, EngineContext, HealthRecord, NormalizedQuery, OnRateLimit, Payload,
    RequestDescriptor, RetryError, RetryOutcome, SourceClient, SourceConfig, SourceError,
    SourceErrorKind, SourceId, SourceResult, SourceStatus, TradeFields, TradeQuery,
    ValidationReport,
};

/// What the planner decided for one source.
enum Plan {
    Dispatch(Arc<dyn SourceClient>),
    /// Answered without dispatch: unregistered source or missing fields.
    Settled(SourceResult),
}

/// Entry point for every engine operation. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    ctx: Arc<EngineContext>,
}

impl Orchestrator {
    pub(crate) fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// Check caller input without touching the network or the cache.
    pub fn validate_inputs(&self, fields: &TradeFields) -> ValidationReport {
        validate(fields)
    }

    /// Validate, fan out, join under the deadline and assemble one report.
    pub async fn analyze(&self, query: AnalysisQuery) -> AnalysisReport {
        let started = Instant::now();

        let normalized = match normalize_query(&query) {
            Ok(normalized) => normalized,
            Err(validation) => {
                info!(
                    violations = validation.violations.len(),
                    "analysis rejected by validation"
                );
                return AnalysisReport::rejected(query, validation);
            }
        };

        let budget = normalized
            .deadline
            .unwrap_or(self.ctx.config.default_deadline);
        let deadline = started + budget;

        let mut warnings = Vec::new();
        let plan = self.plan(&normalized, &mut warnings);
        if !plan
            .values()
            .any(|entry| matches!(entry, Plan::Dispatch(_)))
        {
            warnings.push("no registered source can answer this query".to_owned());
        }

        let results = self
            .dispatch(plan, &normalized.trade, started, deadline)
            .await;
        for result in results.values() {
            self.ctx.health.record(result);
        }

        let report = AnalysisReport::assembled(
            query,
            normalized.trade,
            results,
            warnings,
            started.elapsed(),
        );
        info!(
            report_id = %report.report_id,
            status = report.overall_status.as_str(),
            sources = report.results.len(),
            latency_ms = report.latency_ms,
            "analysis report assembled"
        );
        report
    }

    pub fn system_status(&self) -> BTreeMap<SourceId, HealthRecord> {
        self.ctx.health.snapshot()
    }

    /// Drop every cached payload. Returns the stats as they were before clearing.
    pub fn clear_cache(&self) -> CacheStats {
        let stats = self.ctx.cache.clear();
        info!(entries = stats.size, "cache cleared");
        stats
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.ctx.cache.stats()
    }

    pub fn registered_sources(&self) -> Vec<SourceId> {
        self.ctx.source_ids().collect()
    }

    /// Close every source's connection pool. Later dispatches fail as fatal.
    pub fn shutdown(&self) {
        for client in self.ctx.sources.values() {
            client.close();
        }
        info!(sources = self.ctx.sources.len(), "engine shut down");
    }

    fn plan(
        &self,
        normalized: &NormalizedQuery,
        warnings: &mut Vec<String>,
    ) -> BTreeMap<SourceId, Plan> {
        let trade = &normalized.trade;
        let mut plan = BTreeMap::new();

        match &normalized.sources {
            Some(requested) => {
                for source in requested {
                    let entry = match self.ctx.source(*source) {
                        None => Plan::Settled(SourceResult::failure(
                            *source,
                            SourceStatus::Fatal,
                            &SourceError::not_registered(*source),
                            Duration::ZERO,
                            0,
                        )),
                        Some(client) => {
                            let missing = client.requirements().missing(trade);
                            if missing.is_empty() {
                                Plan::Dispatch(Arc::clone(client))
                            } else {
                                Plan::Settled(SourceResult::failure(
                                    *source,
                                    SourceStatus::Invalid,
                                    &SourceError::missing_fields(*source, &missing),
                                    Duration::ZERO,
                                    0,
                                ))
                            }
                        }
                    };
                    plan.insert(*source, entry);
                }
            }
            None => {
                for (source, client) in &self.ctx.sources {
                    let missing = client.requirements().missing(trade);
                    if missing.is_empty() {
                        plan.insert(*source, Plan::Dispatch(Arc::clone(client)));
                    } else {
                        let fields = missing
                            .iter()
                            .map(|field| field.as_str())
                            .collect::<Vec<_>>()
                            .join(", ");
                        debug!(source = source.as_str(), missing = %fields, "source skipped");
                        warnings.push(format!("skipped {source}: requires {fields}"));
                    }
                }
            }
        }

        plan
    }

    async fn dispatch(
        &self,
        plan: BTreeMap<SourceId, Plan>,
        trade: &TradeQuery,
        started: Instant,
        deadline: Instant,
    ) -> BTreeMap<SourceId, SourceResult> {
        let mut results = BTreeMap::new();
        let mut pending = BTreeMap::new();
        let mut branches = JoinSet::new();

        for (source, entry) in plan {
            match entry {
                Plan::Settled(result) => {
                    results.insert(source, result);
                }
                Plan::Dispatch(client) => {
                    let attempts = Arc::new(AtomicU32::new(0));
                    pending.insert(source, Arc::clone(&attempts));
                    let descriptor = RequestDescriptor::new(source, trade, deadline);
                    let ctx = Arc::clone(&self.ctx);
                    branches.spawn(async move {
                        let result = run_branch(&ctx, client, descriptor, attempts).await;
                        (source, result)
                    });
                }
            }
        }

        let mut timed_out = false;
        loop {
            match tokio::time::timeout_at(deadline, branches.join_next()).await {
                Ok(Some(Ok((source, result)))) => {
                    pending.remove(&source);
                    results.insert(source, result);
                }
                Ok(Some(Err(error))) => {
                    warn!(%error, "source branch did not complete");
                }
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    branches.abort_all();
                    break;
                }
            }
        }

        for (source, attempts) in pending {
            let attempts = attempts.load(Ordering::Relaxed);
            let result = if timed_out {
                let waited = deadline.saturating_duration_since(started);
                warn!(
                    source = source.as_str(),
                    attempts,
                    deadline_ms = duration_ms(waited),
                    "source cancelled at deadline"
                );
                SourceResult::failure(
                    source,
                    SourceStatus::Timeout,
                    &SourceError::timeout(format!(
                        "{source} did not answer within the {}ms deadline",
                        duration_ms(waited)
                    )),
                    waited,
                    attempts,
                )
            } else {
                SourceResult::failure(
                    source,
                    SourceStatus::Fatal,
                    &SourceError::fatal(format!("{source} request failed unexpectedly")),
                    started.elapsed(),
                    attempts,
                )
            };
            results.insert(source, result);
        }

        results
    }
}

async fn run_branch(
    ctx: &EngineContext,
    client: Arc<dyn SourceClient>,
    descriptor: RequestDescriptor,
    attempts: Arc<AtomicU32>,
) -> SourceResult {
    let started = Instant::now();
    let source = descriptor.source;
    let key = descriptor.cache_key();
    let ttl = ctx.config.cache_ttl(source);
    let leader = AtomicBool::new(false);

    let fetched = ctx
        .cache
        .get_or_fetch(&key, ttl, || {
            leader.store(true, Ordering::Relaxed);
            fetch(ctx, client.as_ref(), &descriptor, &attempts)
        })
        .await;

    match fetched {
        Ok(fetched) if fetched.origin == CacheOrigin::Upstream => SourceResult::success(
            source,
            fetched.value,
            started.elapsed(),
            attempts.load(Ordering::Relaxed),
        ),
        Ok(fetched) => {
            debug!(source = source.as_str(), origin = ?fetched.origin, "served from cache");
            SourceResult::cached(source, fetched.value, started.elapsed())
        }
        Err(mut result) => {
            if !leader.load(Ordering::Relaxed) {
                // Coalesced failure: this branch made no calls of its own.
                result.attempts = 0;
                result.latency_ms = duration_ms(started.elapsed());
            }
            result
        }
    }
}

/// Circuit, gate and retried source call for one cache miss.
async fn fetch(
    ctx: &EngineContext,
    client: &dyn SourceClient,
    descriptor: &RequestDescriptor,
    attempts: &AtomicU32,
) -> Result<Payload, SourceResult> {
    let started = Instant::now();
    let source = descriptor.source;

    let probe = match ctx.health.admit(source) {
        CircuitDecision::Allow => None,
        CircuitDecision::Probe => Some(ctx.health.probe(source)),
        CircuitDecision::Reject { retry_after } => {
            debug!(source = source.as_str(), "circuit open, skipping dispatch");
            let error = SourceError::circuit_open(source, retry_after);
            return Err(SourceResult::failure(
                source,
                SourceStatus::Degraded,
                &error,
                started.elapsed(),
                0,
            ));
        }
    };

    let outcome = call_upstream(ctx, client, descriptor, attempts, started).await;
    if let Some(probe) = probe {
        probe.settle(outcome.as_ref().map(|_| ()));
    }
    outcome
}

async fn call_upstream(
    ctx: &EngineContext,
    client: &dyn SourceClient,
    descriptor: &RequestDescriptor,
    attempts: &AtomicU32,
    started: Instant,
) -> Result<Payload, SourceResult> {
    let source = descriptor.source;

    if let Err(error) = admit(ctx, descriptor).await {
        return Err(SourceResult::failure(
            source,
            SourceStatus::RateLimited,
            &error,
            started.elapsed(),
            0,
        ));
    }

    let (policy, call_timeout) = match ctx.config.source(source) {
        Some(config) => (config.retry, config.timeout),
        None => {
            let config = SourceConfig::default_for(source);
            (config.retry, config.timeout)
        }
    };

    let outcome = ctx
        .retry
        .execute(&policy, Some(descriptor.deadline), |attempt| {
            attempts.store(attempt, Ordering::Relaxed);
            call(client, descriptor, call_timeout)
        })
        .await;

    match outcome {
        Ok(RetryOutcome { value, .. }) => Ok(value),
        Err(error) => {
            let status = match &error {
                RetryError::Exhausted { last, .. } if last.is_timeout() => SourceStatus::Timeout,
                RetryError::Exhausted { last, .. }
                    if last.kind() == SourceErrorKind::RateLimited =>
                {
                    SourceStatus::RateLimited
                }
                RetryError::Exhausted { .. } => SourceStatus::Degraded,
                RetryError::Rejected { error, .. } if error.kind() == SourceErrorKind::Invalid => {
                    SourceStatus::Invalid
                }
                RetryError::Rejected { .. } => SourceStatus::Fatal,
            };
            Err(SourceResult::failure(
                source,
                status,
                error.error(),
                started.elapsed(),
                error.attempts(),
            ))
        }
    }
}

/// One source invocation, bounded by the per-call timeout and the deadline.
async fn call(
    client: &dyn SourceClient,
    descriptor: &RequestDescriptor,
    call_timeout: Duration,
) -> Result<Payload, SourceError> {
    let budget = call_timeout.min(descriptor.remaining());
    match tokio::time::timeout(budget, client.execute(descriptor)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(SourceError::timeout(format!(
            "{} did not respond within {}ms",
            descriptor.source,
            duration_ms(budget)
        ))),
    }
}

/// Pass the rate-limit gate, waiting once when the source is configured to.
async fn admit(ctx: &EngineContext, descriptor: &RequestDescriptor) -> Result<(), SourceError> {
    let source = descriptor.source;
    let Some(retry_after) = rejected_for(ctx, source) else {
        return Ok(());
    };

    if ctx.gate.policy(source) == OnRateLimit::Wait && retry_after <= descriptor.remaining() {
        debug!(
            source = source.as_str(),
            delay_ms = duration_ms(retry_after),
            "rate limited, waiting for window reset"
        );
        tokio::time::sleep(retry_after).await;
        match rejected_for(ctx, source) {
            None => return Ok(()),
            Some(retry_after) => return Err(rate_limit_error(retry_after)),
        }
    }

    Err(rate_limit_error(retry_after))
}

fn rejected_for(ctx: &EngineContext, source: SourceId) -> Option<Duration> {
    let admission = ctx.gate.try_acquire(source);
    if admission.allowed {
        None
    } else {
        Some(admission.retry_after.unwrap_or_default())
    }
}

fn rate_limit_error(retry_after: Duration) -> SourceError {
    SourceError::rate_limited(
        format!(
            "rate limit exceeded, retry after {}s",
            ceil_secs(retry_after)
        ),
        Some(retry_after),
    )
}
