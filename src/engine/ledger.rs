use crate::models::deal::{CompletedDeal, DealType, Signal};

use super::orders::{calculate_close, round2, CloseAmounts};

/// Everything needed to book one close.
#[derive(Debug, Clone, Copy)]
pub struct CloseRequest {
    pub deal_type: DealType,
    pub entry_signal: Signal,
    pub exit_signal: Signal,
    pub entry_time: i64,
    pub exit_time: i64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub size: f64,
}

/// Append-only record of completed deals with running cumulative PnL.
#[derive(Debug, Clone)]
pub struct DealLedger {
    deals: Vec<CompletedDeal>,
    initial_capital: f64,
    commission_rate: f64,
}

impl DealLedger {
    pub fn new(initial_capital: f64, commission_rate: f64) -> Self {
        Self {
            deals: Vec::new(),
            initial_capital,
            commission_rate,
        }
    }

    pub fn deals(&self) -> &[CompletedDeal] {
        &self.deals
    }

    pub fn into_deals(self) -> Vec<CompletedDeal> {
        self.deals
    }

    pub fn cum_pnl(&self) -> f64 {
        self.deals.last().map(|d| d.cum_pnl).unwrap_or(0.0)
    }

    /// Book a close. Zero-size requests leave the ledger untouched and return zero amounts.
    pub fn close(&mut self, req: CloseRequest) -> CloseAmounts {
        if req.size == 0.0 {
            return CloseAmounts::ZERO;
        }
        let amounts = calculate_close(
            req.deal_type,
            req.entry_price,
            req.exit_price,
            req.size,
            self.commission_rate,
        );
        // pnl is already rounded; the running sum is rounded again so the
        // cumulative column never drifts from the per-row values.
        let cum_pnl = round2(self.cum_pnl() + amounts.pnl);
        let cum_pnl_pct = if self.initial_capital > 0.0 {
            round2(cum_pnl / self.initial_capital * 100.0)
        } else {
            0.0
        };

        self.deals.push(CompletedDeal {
            deal_type: req.deal_type,
            entry_signal: req.entry_signal,
            exit_signal: req.exit_signal,
            entry_time: req.entry_time,
            exit_time: req.exit_time,
            entry_price: req.entry_price,
            exit_price: req.exit_price,
            size: req.size,
            pnl: amounts.pnl,
            pnl_pct: amounts.pnl_pct,
            cum_pnl,
            cum_pnl_pct,
            commission: amounts.commission,
        });
        amounts
    }
}
