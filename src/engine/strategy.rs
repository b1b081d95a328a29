use std::collections::HashMap;

use crate::errors::AppError;
use crate::models::deal::DealType;
use crate::models::kline::Kline;
use crate::models::params::{ParameterSchema, ParameterSet};

/// Precomputed indicator series, keyed by name. Each series is expected to be
/// as long as the kline series; NaN marks "no value" (warm-up or bad input).
pub type IndicatorFeed = HashMap<String, Vec<f64>>;

/// Read-only view of the bar being simulated.
#[derive(Debug, Clone, Copy)]
pub struct BarView<'a> {
    pub index: usize,
    pub klines: &'a [Kline],
    pub indicators: &'a IndicatorFeed,
}

impl<'a> BarView<'a> {
    pub fn kline(&self) -> &'a Kline {
        &self.klines[self.index]
    }

    pub fn close(&self) -> f64 {
        self.klines[self.index].close
    }

    /// Indicator value `offset` bars back. NaN if the name is unknown or out of range.
    pub fn value_at(&self, name: &str, offset: usize) -> f64 {
        if offset > self.index {
            return f64::NAN;
        }
        self.indicators
            .get(name)
            .and_then(|series| series.get(self.index - offset))
            .copied()
            .unwrap_or(f64::NAN)
    }

    pub fn value(&self, name: &str) -> f64 {
        self.value_at(name, 0)
    }

    /// `a` crossed above `b` on this bar. Any NaN input means no cross.
    pub fn crossed_above(&self, a: &str, b: &str) -> bool {
        let (a0, b0, a1, b1) = (
            self.value(a),
            self.value(b),
            self.value_at(a, 1),
            self.value_at(b, 1),
        );
        if a0.is_nan() || b0.is_nan() || a1.is_nan() || b1.is_nan() {
            return false;
        }
        a1 <= b1 && a0 > b0
    }

    /// `a` crossed below `b` on this bar.
    pub fn crossed_below(&self, a: &str, b: &str) -> bool {
        let (a0, b0, a1, b1) = (
            self.value(a),
            self.value(b),
            self.value_at(a, 1),
            self.value_at(b, 1),
        );
        if a0.is_nan() || b0.is_nan() || a1.is_nan() || b1.is_nan() {
            return false;
        }
        a1 >= b1 && a0 < b0
    }
}

/// One take-profit level: raw price and the percentage of the entry size it closes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TakeTarget {
    pub price: f64,
    pub size_pct: f64,
}

/// Exit levels requested by a strategy at entry time. Prices are raw; the
/// engine snaps them to the instrument's price step.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExitPlan {
    pub stop_price: Option<f64>,
    /// Distance kept between the extreme price and a trailing stop.
    pub trailing_distance: Option<f64>,
    /// Take-profit ladder, nearest level first.
    pub takes: Vec<TakeTarget>,
}

/// Trading rules of one strategy compiled for one parameter set.
pub trait SignalRules: Send + Sync {
    /// Side to open on this bar, if any. Called only while flat.
    fn entry(&self, bar: &BarView) -> Option<DealType>;

    /// Discretionary full exit at the bar close.
    fn exit(&self, bar: &BarView, deal_type: DealType) -> bool;

    /// Stop, trailing and take-profit levels for a fresh entry.
    fn exit_plan(&self, bar: &BarView, deal_type: DealType, entry_price: f64) -> ExitPlan;
}

/// A tradable strategy: its declared parameters, the indicators it needs and
/// a factory for its compiled rules.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    /// Strategy-specific parameters (engine-wide fields are merged in by the engine).
    fn schema(&self) -> ParameterSchema;

    fn compute_indicators(
        &self,
        klines: &[Kline],
        params: &ParameterSet,
    ) -> Result<IndicatorFeed, AppError>;

    fn rules(&self, params: &ParameterSet) -> Result<Box<dyn SignalRules>, AppError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn klines(n: usize) -> Vec<Kline> {
        (0..n)
            .map(|i| Kline::new(i as i64 * 60_000, 1.0, 1.0, 1.0, 1.0, 1.0))
            .collect()
    }

    #[test]
    fn test_bar_view_cross() {
        let k = klines(3);
        let mut feed = IndicatorFeed::new();
        feed.insert("fast".into(), vec![1.0, 1.0, 3.0]);
        feed.insert("slow".into(), vec![2.0, 2.0, 2.0]);
        let bar = BarView {
            index: 2,
            klines: &k,
            indicators: &feed,
        };
        assert!(bar.crossed_above("fast", "slow"));
        assert!(!bar.crossed_below("fast", "slow"));

        let first = BarView { index: 0, ..bar };
        assert!(!first.crossed_above("fast", "slow"));
    }

    #[test]
    fn test_bar_view_missing_is_nan() {
        let k = klines(2);
        let feed = IndicatorFeed::new();
        let bar = BarView {
            index: 1,
            klines: &k,
            indicators: &feed,
        };
        assert!(bar.value("nope").is_nan());
        assert!(bar.value_at("nope", 5).is_nan());
        assert!(!bar.crossed_above("nope", "also_nope"));
    }
}
