use tracing::debug;

use crate::errors::AppError;
use crate::models::config::InstrumentConfig;
use crate::models::kline::Kline;
use crate::models::params::ParameterSet;

use super::executor::{resolve_params, simulate, SimulationOutput};
use super::strategy::Strategy;

/// Reduces one simulation run to a scalar score.
pub struct FitnessEvaluator<'a> {
    strategy: &'a dyn Strategy,
    instrument: InstrumentConfig,
    min_deals: usize,
}

impl<'a> FitnessEvaluator<'a> {
    pub fn new(strategy: &'a dyn Strategy, instrument: InstrumentConfig) -> Self {
        Self {
            strategy,
            instrument,
            min_deals: 1,
        }
    }

    /// Ledgers with fewer completed deals than `min_deals` score `-inf`.
    /// Values below 1 are treated as 1: an empty ledger never scores.
    pub fn with_min_deals(mut self, min_deals: usize) -> Self {
        self.min_deals = min_deals.max(1);
        self
    }

    pub fn strategy(&self) -> &dyn Strategy {
        self.strategy
    }

    /// Compute indicators, simulate and run the full pipeline.
    pub fn run(
        &self,
        params: &ParameterSet,
        klines: &[Kline],
    ) -> Result<SimulationOutput, AppError> {
        let params = resolve_params(self.strategy, params)?;
        let indicators = self.strategy.compute_indicators(klines, &params)?;
        simulate(self.strategy, klines, &indicators, &params, &self.instrument)
    }

    /// Sum of realized PnL, or `-inf` when the run failed, produced too few
    /// deals or a non-finite total.
    pub fn evaluate(&self, params: &ParameterSet, klines: &[Kline]) -> f64 {
        let output = match self.run(params, klines) {
            Ok(output) => output,
            Err(e) => {
                debug!("Evaluation of {} failed: {}", self.strategy.name(), e);
                return f64::NEG_INFINITY;
            }
        };
        if output.completed.len() < self.min_deals {
            return f64::NEG_INFINITY;
        }
        let total = output.total_pnl();
        if total.is_finite() {
            total
        } else {
            f64::NEG_INFINITY
        }
    }
}
