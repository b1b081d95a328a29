use crate::engine::indicators::{ema, sma};
use crate::engine::strategy::{BarView, ExitPlan, IndicatorFeed, SignalRules, Strategy};
use crate::errors::AppError;
use crate::models::deal::DealType;
use crate::models::kline::Kline;
use crate::models::params::{ParamDomain, ParamValue, ParameterSchema, ParameterSet};

const FAST: &str = "fast_ma";
const SLOW: &str = "slow_ma";

/// Always-in-the-market moving-average cross. A cross in the opposite
/// direction closes the position and reverses it on the same bar.
pub struct MaCross;

impl MaCross {
    pub const NAME: &'static str = "ma_cross";
}

struct MaCrossRules {
    stop_pct: f64,
    trailing_pct: f64,
}

fn moving_average(close: &[f64], period: usize, use_ema: bool) -> Vec<f64> {
    if use_ema {
        ema(close, period)
    } else {
        sma(close, period)
    }
}

fn periods(params: &ParameterSet) -> Result<(usize, usize), AppError> {
    let fast = params.get_usize("fast_period")?;
    let slow = params.get_usize("slow_period")?;
    if fast == 0 || fast >= slow {
        return Err(AppError::ParameterOutOfDomain {
            name: "fast_period".into(),
            value: format!("{} (slow_period {})", fast, slow),
        });
    }
    Ok((fast, slow))
}

impl Strategy for MaCross {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .optimized(
                "fast_period",
                ParamValue::Int(10),
                ParamDomain::int_range(5, 50, 5),
            )
            .optimized(
                "slow_period",
                ParamValue::Int(50),
                ParamDomain::int_range(20, 200, 10),
            )
            .optimized("use_ema", ParamValue::Bool(false), ParamDomain::Bool)
            .optimized(
                "stop_pct",
                ParamValue::Float(2.0),
                ParamDomain::float_range(0.0, 5.0, 0.5),
            )
            .optimized(
                "trailing_pct",
                ParamValue::Float(0.0),
                ParamDomain::float_range(0.0, 3.0, 0.5),
            )
    }

    fn compute_indicators(
        &self,
        klines: &[Kline],
        params: &ParameterSet,
    ) -> Result<IndicatorFeed, AppError> {
        let (fast, slow) = periods(params)?;
        let use_ema = params.get_bool("use_ema")?;
        let close: Vec<f64> = klines.iter().map(|k| k.close).collect();

        let mut feed = IndicatorFeed::new();
        feed.insert(FAST.into(), moving_average(&close, fast, use_ema));
        feed.insert(SLOW.into(), moving_average(&close, slow, use_ema));
        Ok(feed)
    }

    fn rules(&self, params: &ParameterSet) -> Result<Box<dyn SignalRules>, AppError> {
        periods(params)?;
        Ok(Box::new(MaCrossRules {
            stop_pct: params.get_float("stop_pct")?.max(0.0),
            trailing_pct: params.get_float("trailing_pct")?.max(0.0),
        }))
    }
}

impl SignalRules for MaCrossRules {
    fn entry(&self, bar: &BarView) -> Option<DealType> {
        if bar.crossed_above(FAST, SLOW) {
            Some(DealType::Long)
        } else if bar.crossed_below(FAST, SLOW) {
            Some(DealType::Short)
        } else {
            None
        }
    }

    fn exit(&self, bar: &BarView, deal_type: DealType) -> bool {
        match deal_type {
            DealType::Long => bar.crossed_below(FAST, SLOW),
            DealType::Short => bar.crossed_above(FAST, SLOW),
        }
    }

    fn exit_plan(&self, _bar: &BarView, deal_type: DealType, entry_price: f64) -> ExitPlan {
        let stop_price = (self.stop_pct > 0.0)
            .then(|| entry_price * (1.0 - deal_type.sign() * self.stop_pct / 100.0));
        let trailing_distance =
            (self.trailing_pct > 0.0).then(|| entry_price * self.trailing_pct / 100.0);
        ExitPlan {
            stop_price,
            trailing_distance,
            takes: Vec::new(),
        }
    }
}
