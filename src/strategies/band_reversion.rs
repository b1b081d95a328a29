use crate::engine::indicators::{atr, bollinger_bands, rsi, PriceColumns};
use crate::engine::strategy::{
    BarView, ExitPlan, IndicatorFeed, SignalRules, Strategy, TakeTarget,
};
use crate::errors::AppError;
use crate::models::deal::DealType;
use crate::models::kline::Kline;
use crate::models::params::{ParamDomain, ParamValue, ParameterSchema, ParameterSet};

const UPPER: &str = "bb_upper";
const MIDDLE: &str = "bb_middle";
const LOWER: &str = "bb_lower";
const ATR: &str = "atr";
const RSI: &str = "rsi";

/// Mean reversion from outside the Bollinger bands with an ATR stop and a
/// laddered take-profit. Optionally confirmed by RSI extremes.
pub struct BandReversion;

impl BandReversion {
    pub const NAME: &'static str = "band_reversion";
}

struct BandReversionRules {
    stop_atr: f64,
    /// Take distances in ATR multiples, nearest first.
    take_atr: Vec<f64>,
    /// Percent of the entry size closed at each take.
    take_sizes: Vec<f64>,
    rsi_filter: bool,
    rsi_low: f64,
    rsi_high: f64,
    exit_at_middle: bool,
}

/// Split 100% across `n` takes: the declared sizes when they line up, an even split otherwise.
fn ladder_sizes(declared: &[f64], n: usize) -> Vec<f64> {
    if declared.len() == n && declared.iter().all(|s| s.is_finite() && *s >= 0.0) {
        return declared.to_vec();
    }
    vec![100.0 / n.max(1) as f64; n]
}

impl Strategy for BandReversion {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .optimized(
                "bb_period",
                ParamValue::Int(20),
                ParamDomain::int_range(10, 50, 5),
            )
            .optimized(
                "bb_mult",
                ParamValue::Float(2.0),
                ParamDomain::float_range(1.5, 3.0, 0.5),
            )
            .field("atr_period", ParamValue::Int(14))
            .optimized(
                "stop_atr",
                ParamValue::Float(2.0),
                ParamDomain::float_range(1.0, 4.0, 0.5),
            )
            .optimized(
                "take_atr",
                ParamValue::Vector(vec![1.0, 2.0]),
                ParamDomain::vectors(vec![
                    vec![1.0],
                    vec![1.0, 2.0],
                    vec![0.5, 1.0, 1.5],
                    vec![1.0, 2.0, 3.0],
                ]),
            )
            .field("take_sizes", ParamValue::Vector(vec![50.0, 50.0]))
            .optimized("rsi_filter", ParamValue::Bool(false), ParamDomain::Bool)
            .field("rsi_period", ParamValue::Int(14))
            .field("rsi_low", ParamValue::Float(30.0))
            .field("rsi_high", ParamValue::Float(70.0))
            .field("exit_at_middle", ParamValue::Bool(true))
    }

    fn compute_indicators(
        &self,
        klines: &[Kline],
        params: &ParameterSet,
    ) -> Result<IndicatorFeed, AppError> {
        let cols = PriceColumns::from_klines(klines);
        let (upper, middle, lower) = bollinger_bands(
            &cols.close,
            params.get_usize("bb_period")?,
            params.get_float("bb_mult")?,
        );

        let mut feed = IndicatorFeed::new();
        feed.insert(UPPER.into(), upper);
        feed.insert(MIDDLE.into(), middle);
        feed.insert(LOWER.into(), lower);
        feed.insert(
            ATR.into(),
            atr(&cols.high, &cols.low, &cols.close, params.get_usize("atr_period")?),
        );
        if params.get_bool("rsi_filter")? {
            feed.insert(RSI.into(), rsi(&cols.close, params.get_usize("rsi_period")?));
        }
        Ok(feed)
    }

    fn rules(&self, params: &ParameterSet) -> Result<Box<dyn SignalRules>, AppError> {
        let take_atr: Vec<f64> = params
            .get_vector("take_atr")?
            .iter()
            .copied()
            .filter(|m| m.is_finite() && *m > 0.0)
            .collect();
        let take_sizes = ladder_sizes(params.get_vector("take_sizes")?, take_atr.len());
        Ok(Box::new(BandReversionRules {
            stop_atr: params.get_float("stop_atr")?,
            take_atr,
            take_sizes,
            rsi_filter: params.get_bool("rsi_filter")?,
            rsi_low: params.get_float("rsi_low")?,
            rsi_high: params.get_float("rsi_high")?,
            exit_at_middle: params.get_bool("exit_at_middle")?,
        }))
    }
}

impl BandReversionRules {
    fn rsi_allows(&self, bar: &BarView, deal_type: DealType) -> bool {
        if !self.rsi_filter {
            return true;
        }
        let value = bar.value(RSI);
        match deal_type {
            DealType::Long => value < self.rsi_low,
            DealType::Short => value > self.rsi_high,
        }
    }
}

impl SignalRules for BandReversionRules {
    fn entry(&self, bar: &BarView) -> Option<DealType> {
        let close = bar.close();
        let (upper, lower) = (bar.value(UPPER), bar.value(LOWER));
        if close < lower && self.rsi_allows(bar, DealType::Long) {
            Some(DealType::Long)
        } else if close > upper && self.rsi_allows(bar, DealType::Short) {
            Some(DealType::Short)
        } else {
            None
        }
    }

    fn exit(&self, bar: &BarView, deal_type: DealType) -> bool {
        if !self.exit_at_middle {
            return false;
        }
        let middle = bar.value(MIDDLE);
        match deal_type {
            DealType::Long => bar.close() >= middle,
            DealType::Short => bar.close() <= middle,
        }
    }

    fn exit_plan(&self, bar: &BarView, deal_type: DealType, entry_price: f64) -> ExitPlan {
        let atr = bar.value(ATR);
        if !(atr > 0.0) {
            return ExitPlan::default();
        }
        let sign = deal_type.sign();
        ExitPlan {
            stop_price: (self.stop_atr > 0.0).then(|| entry_price - sign * self.stop_atr * atr),
            trailing_distance: None,
            takes: self
                .take_atr
                .iter()
                .zip(&self.take_sizes)
                .map(|(m, size_pct)| TakeTarget {
                    price: entry_price + sign * m * atr,
                    size_pct: *size_pct,
                })
                .collect(),
        }
    }
}
