//! Shared fakes for the behaviour tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tradewatch_core::{
    AnalysisQuery, EngineBuilder, EngineConfig, Orchestrator, RequestDescriptor, Requirements,
    RetryPolicy, SourceClient, SourceError, SourceFuture, SourceId, TradeFields,
};

/// One scripted answer.
#[derive(Debug, Clone)]
pub enum Step {
    Succeed(Value),
    Fail(SourceError),
}

/// Source client with programmable outcomes and latency that counts its calls.
pub struct ScriptedSource {
    id: SourceId,
    requirements: Requirements,
    latency: Duration,
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: AtomicU32,
    closed: AtomicBool,
}

impl ScriptedSource {
    /// Always succeeds with `{"source": <id>}`, needs no fields.
    pub fn new(id: SourceId) -> Self {
        Self {
            id,
            requirements: Requirements::none(),
            latency: Duration::ZERO,
            script: Mutex::new(VecDeque::new()),
            fallback: Step::Succeed(json!({ "source": id.as_str() })),
            calls: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn requiring(mut self, requirements: Requirements) -> Self {
        self.requirements = requirements;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Answer with `error` once, before falling back.
    pub fn then_fail(self, error: SourceError) -> Self {
        self.push(Step::Fail(error));
        self
    }

    pub fn then_succeed(self, payload: Value) -> Self {
        self.push(Step::Succeed(payload));
        self
    }

    /// Answer with `error` once the script runs out.
    pub fn always_fail(mut self, error: SourceError) -> Self {
        self.fallback = Step::Fail(error);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn push(&self, step: Step) {
        self.script
            .lock()
            .expect("script lock")
            .push_back(step);
    }

    fn next_step(&self) -> Step {
        self.script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

impl SourceClient for ScriptedSource {
    fn id(&self) -> SourceId {
        self.id
    }

    fn requirements(&self) -> Requirements {
        self.requirements
    }

    fn execute<'a>(&'a self, _request: &'a RequestDescriptor) -> SourceFuture<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.is_closed() {
                return Err(SourceError::fatal("source closed"));
            }
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            match self.next_step() {
                Step::Succeed(payload) => Ok(payload),
                Step::Fail(error) => Err(error),
            }
        })
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Defaults with short, jitter-free backoff so paused-time tests stay exact.
pub fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    for source in config.sources.values_mut() {
        source.retry = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            jitter_ratio: 0.0,
        };
    }
    config
}

pub fn engine_with(config: EngineConfig, sources: &[Arc<ScriptedSource>]) -> Orchestrator {
    sources
        .iter()
        .fold(EngineBuilder::new(config), |builder, source| {
            builder.with_source(Arc::clone(source) as Arc<dyn SourceClient>)
        })
        .build()
        .expect("engine builds")
}

pub fn engine(sources: &[Arc<ScriptedSource>]) -> Orchestrator {
    engine_with(fast_config(), sources)
}

pub fn steel_query() -> AnalysisQuery {
    AnalysisQuery::new(
        TradeFields::new()
            .with_product_code("7208.10")
            .with_country("China")
            .with_year(2024),
    )
}

pub fn query_for_year(year: u16) -> AnalysisQuery {
    AnalysisQuery::new(
        TradeFields::new()
            .with_product_code("720810")
            .with_year(year),
    )
}
