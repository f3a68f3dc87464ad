//! Per-source health records and circuit breaking.
//!
//! Every [`SourceResult`] is recorded after an analysis call. A run of
//! `failure_threshold` consecutive failures opens the source's circuit; while
//! open, dispatch is skipped until `open_timeout` elapses, after which the
//! circuit half-opens and exactly one call probes the source while the rest
//! are rejected. A failed probe reopens it, a successful one closes it.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::duration_ms;
use crate::{SourceId, SourceResult, SourceStatus, UtcDateTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit breaker thresholds and timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    #[serde(rename = "open_timeout_ms", with = "duration_ms")]
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            open_timeout: Duration::from_secs(30),
        }
    }
}

/// Diagnostic snapshot of one source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthRecord {
    pub source: SourceId,
    pub last_success_at: Option<UtcDateTime>,
    pub last_failure_at: Option<UtcDateTime>,
    pub consecutive_failures: u32,
    pub circuit_state: CircuitState,
    pub last_status: Option<SourceStatus>,
    pub total_calls: u64,
}

impl HealthRecord {
    fn new(source: SourceId) -> Self {
        Self {
            source,
            last_success_at: None,
            last_failure_at: None,
            consecutive_failures: 0,
            circuit_state: CircuitState::Closed,
            last_status: None,
            total_calls: 0,
        }
    }
}

/// Circuit check before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitDecision {
    Allow,
    /// The caller holds the single half-open probe and must report it through
    /// [`HealthTracker::probe`].
    Probe,
    Reject { retry_after: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
    /// Says nothing about the upstream: cache hits, local rejections, bad input,
    /// deadlines that expired before the source was called.
    Neutral,
}

impl Outcome {
    fn of(result: &SourceResult) -> Self {
        let reached_upstream = result.attempts > 0;
        match result.status {
            SourceStatus::Success if reached_upstream => Self::Success,
            SourceStatus::Timeout | SourceStatus::Fatal | SourceStatus::Degraded
                if reached_upstream =>
            {
                Self::Failure
            }
            _ => Self::Neutral,
        }
    }
}

#[derive(Debug)]
struct Circuit {
    record: HealthRecord,
    opened_at: Option<Instant>,
    probing: bool,
}

/// Health records for a fixed set of sources, one lock per source.
#[derive(Debug)]
pub struct HealthTracker {
    config: CircuitBreakerConfig,
    circuits: HashMap<SourceId, Mutex<Circuit>>,
}

impl HealthTracker {
    pub fn new<I>(config: CircuitBreakerConfig, sources: I) -> Self
    where
        I: IntoIterator<Item = SourceId>,
    {
        let circuits = sources
            .into_iter()
            .map(|source| {
                let circuit = Circuit {
                    record: HealthRecord::new(source),
                    opened_at: None,
                    probing: false,
                };
                (source, Mutex::new(circuit))
            })
            .collect();
        Self { config, circuits }
    }

    /// Whether `source` may be called now. Moves an expired Open circuit to
    /// HalfOpen and hands out one probe; callers arriving while the probe is
    /// out are rejected.
    pub fn admit(&self, source: SourceId) -> CircuitDecision {
        let Some(circuit) = self.circuits.get(&source) else {
            return CircuitDecision::Allow;
        };
        let mut circuit = lock_circuit(circuit);

        match circuit.record.circuit_state {
            CircuitState::Closed => return CircuitDecision::Allow,
            CircuitState::HalfOpen if circuit.probing => {
                return CircuitDecision::Reject {
                    retry_after: self.config.open_timeout,
                };
            }
            CircuitState::HalfOpen => {
                circuit.probing = true;
                return CircuitDecision::Probe;
            }
            CircuitState::Open => {}
        }

        let elapsed = circuit
            .opened_at
            .map(|opened_at| opened_at.elapsed())
            .unwrap_or(self.config.open_timeout);
        if elapsed >= self.config.open_timeout {
            info!(source = source.as_str(), "circuit half-open, probing source");
            circuit.record.circuit_state = CircuitState::HalfOpen;
            circuit.opened_at = None;
            circuit.probing = true;
            return CircuitDecision::Probe;
        }

        CircuitDecision::Reject {
            retry_after: self.config.open_timeout - elapsed,
        }
    }

    /// Guard for a probe handed out by [`admit`](Self::admit). Dropping it
    /// without [`ProbeGuard::settle`] frees the probe for the next caller.
    pub fn probe(&self, source: SourceId) -> ProbeGuard<'_> {
        ProbeGuard {
            tracker: self,
            source,
        }
    }

    /// Move the circuit as soon as the probe answers, ahead of [`record`](Self::record).
    fn settle_probe(&self, source: SourceId, outcome: Outcome) {
        let Some(circuit) = self.circuits.get(&source) else {
            return;
        };
        let mut circuit = lock_circuit(circuit);
        if circuit.record.circuit_state != CircuitState::HalfOpen {
            return;
        }
        match outcome {
            Outcome::Success => {
                info!(source = source.as_str(), "probe succeeded, circuit closed");
                circuit.record.circuit_state = CircuitState::Closed;
            }
            Outcome::Failure => {
                warn!(source = source.as_str(), "probe failed, circuit reopened");
                circuit.record.circuit_state = CircuitState::Open;
                circuit.opened_at = Some(Instant::now());
            }
            Outcome::Neutral => {}
        }
    }

    fn release_probe(&self, source: SourceId) {
        if let Some(circuit) = self.circuits.get(&source) {
            lock_circuit(circuit).probing = false;
        }
    }

    pub fn record(&self, result: &SourceResult) {
        let Some(circuit) = self.circuits.get(&result.source) else {
            return;
        };
        let mut circuit = lock_circuit(circuit);
        circuit.record.total_calls += 1;
        circuit.record.last_status = Some(result.status);

        match Outcome::of(result) {
            Outcome::Success => {
                if circuit.record.circuit_state != CircuitState::Closed {
                    info!(source = result.source.as_str(), "circuit closed");
                }
                circuit.record.last_success_at = Some(UtcDateTime::now());
                circuit.record.consecutive_failures = 0;
                circuit.record.circuit_state = CircuitState::Closed;
                circuit.opened_at = None;
            }
            Outcome::Failure => {
                circuit.record.last_failure_at = Some(UtcDateTime::now());
                circuit.record.consecutive_failures =
                    circuit.record.consecutive_failures.saturating_add(1);

                let trip = match circuit.record.circuit_state {
                    CircuitState::HalfOpen => true,
                    CircuitState::Closed => {
                        circuit.record.consecutive_failures >= self.config.failure_threshold
                    }
                    CircuitState::Open => false,
                };
                if trip {
                    warn!(
                        source = result.source.as_str(),
                        consecutive_failures = circuit.record.consecutive_failures,
                        status = result.status.as_str(),
                        "circuit opened"
                    );
                    circuit.record.circuit_state = CircuitState::Open;
                    circuit.opened_at = Some(Instant::now());
                }
            }
            Outcome::Neutral => {}
        }
    }

    pub fn get(&self, source: SourceId) -> Option<HealthRecord> {
        self.circuits
            .get(&source)
            .map(|circuit| lock_circuit(circuit).record.clone())
    }

    pub fn snapshot(&self) -> BTreeMap<SourceId, HealthRecord> {
        self.circuits
            .iter()
            .map(|(source, circuit)| (*source, lock_circuit(circuit).record.clone()))
            .collect()
    }
}

/// Outstanding half-open probe for one source.
#[derive(Debug)]
pub struct ProbeGuard<'a> {
    tracker: &'a HealthTracker,
    source: SourceId,
}

impl ProbeGuard<'_> {
    /// Report how the probe went. Outcomes that never reached the upstream
    /// leave the circuit half-open for another probe.
    pub fn settle(self, outcome: Result<(), &SourceResult>) {
        let outcome = match outcome {
            Ok(()) => Outcome::Success,
            Err(result) => Outcome::of(result),
        };
        self.tracker.settle_probe(self.source, outcome);
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        self.tracker.release_probe(self.source);
    }
}

fn lock_circuit(circuit: &Mutex<Circuit>) -> MutexGuard<'_, Circuit> {
    circuit.lock().unwrap_or_else(|poisoned| {
        warn!("health tracker lock was poisoned, recovering");
        poisoned.into_inner()
    })
}
