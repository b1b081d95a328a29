use serde::{Deserialize, Serialize};

use super::params::ParameterSet;

/// Summary statistics over a completed-deal ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerMetrics {
    pub total_deals: usize,
    pub winning_deals: usize,
    pub losing_deals: usize,
    pub win_rate_pct: f64,

    pub gross_profit: f64,
    pub gross_loss: f64,
    pub net_profit: f64,
    pub total_commission: f64,
    pub profit_factor: f64,
    pub avg_deal: f64,
    pub largest_win: f64,
    pub largest_loss: f64,

    /// Largest peak-to-trough decline of the cumulative PnL curve, in currency.
    pub max_drawdown: f64,
    pub max_consecutive_wins: usize,
    pub max_consecutive_losses: usize,
    /// Mean over standard deviation of per-deal percentage returns.
    pub sharpe_ratio: f64,
}

/// Best parameters found by one optimizer run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationOutcome {
    pub params: ParameterSet,
    pub fitness: f64,
    pub stability_score: f64,
}

impl OptimizationOutcome {
    /// Ranking key across runs.
    pub fn rank_score(&self) -> f64 {
        self.fitness + self.stability_score
    }
}

/// Time span (ms epoch, inclusive) of the data a result was optimized on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub start: i64,
    pub end: i64,
}

/// One persisted optimizer result. Records are appended per context, never replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub period: Period,
    pub params: ParameterSet,
}

/// Final state of one orchestrated context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ContextStatus {
    /// Results were produced and persisted.
    Completed { persisted: usize },
    /// Every run ended without a finite candidate.
    Empty,
    /// The context failed; siblings are unaffected.
    Failed { code: String, message: String },
}

/// Per-context outcome collected by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextReport {
    pub context_id: String,
    pub status: ContextStatus,
    #[serde(default)]
    pub outcomes: Vec<OptimizationOutcome>,
}
