use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{error, info, warn};

use crate::data::storage::ResultStore;
use crate::engine::optimizer::WalkForwardOptimizer;
use crate::engine::strategy::Strategy;
use crate::errors::{AppError, ErrorResponse};
use crate::models::config::{
    InstrumentConfig, Interval, OptimizerConfig, OrchestratorConfig, WalkForwardConfig,
};
use crate::models::kline::{detect_step, Kline};
use crate::models::params::ParameterSet;
use crate::models::result::{
    ContextReport, ContextStatus, OptimizationOutcome, Period, PersistedRecord,
};

/// Market data provider. Called once per context, before any optimization starts.
pub trait KlineSource: Send + Sync {
    fn fetch_klines(&self, symbol: &str, interval: Interval) -> anyhow::Result<Vec<Kline>>;
}

/// One (strategy, symbol, interval) combination to optimize.
#[derive(Clone)]
pub struct OptimizationContext {
    pub strategy: Arc<dyn Strategy>,
    pub symbol: String,
    pub interval: Interval,
    pub instrument: InstrumentConfig,
    /// Parameters held constant during the search.
    pub fixed: ParameterSet,
}

impl OptimizationContext {
    pub fn new(strategy: Arc<dyn Strategy>, symbol: &str, interval: Interval) -> Self {
        Self {
            strategy,
            symbol: symbol.to_string(),
            interval,
            instrument: InstrumentConfig::default(),
            fixed: ParameterSet::new(),
        }
    }

    pub fn with_instrument(mut self, instrument: InstrumentConfig) -> Self {
        self.instrument = instrument;
        self
    }

    pub fn with_fixed(mut self, fixed: ParameterSet) -> Self {
        self.fixed = fixed;
        self
    }

    /// Key under which results are persisted: `strategy:symbol:interval`.
    pub fn context_id(&self) -> String {
        format!("{}:{}:{}", self.strategy.name(), self.symbol, self.interval)
    }
}

/// Runs one optimizer per context on a bounded worker pool and persists the results.
pub struct Orchestrator<'a> {
    source: &'a dyn KlineSource,
    store: &'a dyn ResultStore,
    optimizer: OptimizerConfig,
    walk_forward: WalkForwardConfig,
    config: OrchestratorConfig,
    cancel_flag: Arc<AtomicBool>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(source: &'a dyn KlineSource, store: &'a dyn ResultStore) -> Self {
        Self {
            source,
            store,
            optimizer: OptimizerConfig::default(),
            walk_forward: WalkForwardConfig::default(),
            config: OrchestratorConfig::default(),
            cancel_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_optimizer(mut self, optimizer: OptimizerConfig) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn with_walk_forward(mut self, walk_forward: WalkForwardConfig) -> Self {
        self.walk_forward = walk_forward;
        self
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Flag checked before each context starts and before its results are persisted.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel_flag)
    }

    /// Optimize every context and report each one in input order.
    /// Invalid shared configuration is rejected up front; anything else is
    /// recorded on the failing context only.
    pub fn run(&self, contexts: &[OptimizationContext]) -> Result<Vec<ContextReport>, AppError> {
        self.optimizer.validate()?;
        self.walk_forward.validate()?;

        let workers = self.config.worker_count();
        info!(
            "Orchestrating {} contexts on {} workers",
            contexts.len(),
            workers
        );
        let start = Instant::now();

        // Fetch failures keep their message and surface when the context runs.
        let series: Vec<Result<Vec<Kline>, String>> = contexts
            .iter()
            .map(|ctx| {
                self.source
                    .fetch_klines(&ctx.symbol, ctx.interval)
                    .map_err(|e| format!("{}: {:#}", ctx.context_id(), e))
            })
            .collect();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| AppError::OptimizationError(format!("worker pool: {}", e)))?;

        let results: Vec<Result<Vec<OptimizationOutcome>, AppError>> = pool.install(|| {
            contexts
                .par_iter()
                .zip(series.par_iter())
                .map(|(ctx, klines)| self.run_context(ctx, klines))
                .collect()
        });

        let reports: Vec<ContextReport> = contexts
            .iter()
            .zip(&series)
            .zip(results)
            .map(|((ctx, klines), result)| self.finish_context(ctx, klines, result))
            .collect();

        info!(
            "Orchestration finished in {:.1}s",
            start.elapsed().as_secs_f64()
        );
        Ok(reports)
    }

    fn run_context(
        &self,
        ctx: &OptimizationContext,
        klines: &Result<Vec<Kline>, String>,
    ) -> Result<Vec<OptimizationOutcome>, AppError> {
        if self.cancel_flag.load(Ordering::Relaxed) {
            return Err(AppError::OptimizationCancelled);
        }
        let klines = match klines {
            Ok(klines) => klines,
            Err(message) => return Err(AppError::DataSource(message.clone())),
        };

        let context_id = ctx.context_id();
        info!("Optimizing {} over {} bars", context_id, klines.len());
        if let Some(step) = detect_step(klines).filter(|&s| s != ctx.interval.millis()) {
            warn!(
                "{}: bars are {}ms apart, expected {}ms for {}",
                context_id,
                step,
                ctx.interval.millis(),
                ctx.interval
            );
        }

        catch_unwind(AssertUnwindSafe(|| {
            WalkForwardOptimizer::new(
                ctx.strategy.as_ref(),
                ctx.instrument,
                self.optimizer.clone(),
                self.walk_forward.clone(),
            )?
            .with_fixed(&ctx.fixed)?
            .optimize(klines)
        }))
        .unwrap_or_else(|panic| {
            Err(AppError::WorkerFailure {
                context: context_id,
                message: panic_message(panic.as_ref()),
            })
        })
    }

    fn finish_context(
        &self,
        ctx: &OptimizationContext,
        klines: &Result<Vec<Kline>, String>,
        result: Result<Vec<OptimizationOutcome>, AppError>,
    ) -> ContextReport {
        let context_id = ctx.context_id();
        let outcomes = match result {
            Ok(outcomes) => outcomes,
            Err(e) => return failed(context_id, &e),
        };
        if outcomes.is_empty() {
            warn!("{}: no finite candidate, nothing persisted", context_id);
            return ContextReport {
                context_id,
                status: ContextStatus::Empty,
                outcomes,
            };
        }
        if self.cancel_flag.load(Ordering::Relaxed) {
            return failed(context_id, &AppError::OptimizationCancelled);
        }

        let period = match klines {
            Ok(k) => match (k.first(), k.last()) {
                (Some(first), Some(last)) => Period {
                    start: first.time,
                    end: last.time,
                },
                _ => return failed(context_id, &AppError::EmptyKlines),
            },
            Err(message) => return failed(context_id, &AppError::DataSource(message.clone())),
        };
        let records: Vec<PersistedRecord> = outcomes
            .iter()
            .map(|o| PersistedRecord {
                period,
                params: o.params.clone(),
            })
            .collect();

        if let Err(e) = self.store.append(&context_id, &records) {
            return failed(context_id, &e);
        }
        info!("{}: persisted {} results", context_id, records.len());
        ContextReport {
            context_id,
            status: ContextStatus::Completed {
                persisted: records.len(),
            },
            outcomes,
        }
    }
}

fn failed(context_id: String, err: &AppError) -> ContextReport {
    error!("{} failed: {}", context_id, err);
    let response = ErrorResponse::from(err);
    ContextReport {
        context_id,
        status: ContextStatus::Failed {
            code: response.code,
            message: response.message,
        },
        outcomes: Vec::new(),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}
