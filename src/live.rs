use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::engine::evaluator::FitnessEvaluator;
use crate::engine::executor::resolve_params;
use crate::engine::strategy::Strategy;
use crate::errors::AppError;
use crate::models::config::InstrumentConfig;
use crate::models::deal::{BarLevels, DealType, OpenDeal, Signal};
use crate::models::kline::Kline;
use crate::models::params::ParameterSet;

/// An order the live driver wants placed. Prices are the engine's levels; the
/// client decides how to express them on its venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrderIntent {
    Open {
        deal_type: DealType,
        size: f64,
        stop_price: Option<f64>,
        take_prices: Vec<f64>,
    },
    Close {
        deal_type: DealType,
        size: f64,
        signal: Option<Signal>,
    },
    AdjustStop {
        deal_type: DealType,
        stop_price: Option<f64>,
    },
}

/// Venue adapter. Implementations own authentication and order semantics.
pub trait ExchangeClient: Send + Sync {
    fn submit(&self, symbol: &str, intent: &OrderIntent) -> anyhow::Result<()>;
}

/// Position and levels as of the last acknowledged bar.
#[derive(Debug, Clone, Default, PartialEq)]
struct LiveView {
    open: Option<OpenDeal>,
    levels: BarLevels,
}

fn same_deal(a: &OpenDeal, b: &OpenDeal) -> bool {
    a.deal_type == b.deal_type && a.entry_time == b.entry_time
}

fn open_intent(deal: &OpenDeal, levels: &BarLevels) -> OrderIntent {
    OrderIntent::Open {
        deal_type: deal.deal_type,
        size: deal.remaining_size,
        stop_price: levels.stop_price,
        take_prices: levels.take_prices.clone(),
    }
}

/// Turn the transition between two views into orders.
fn diff_views(prev: &LiveView, next: &LiveView, last_signal: Option<Signal>) -> Vec<OrderIntent> {
    let mut intents = Vec::new();
    match (&prev.open, &next.open) {
        (None, None) => {}
        (None, Some(opened)) => intents.push(open_intent(opened, &next.levels)),
        (Some(closed), None) => intents.push(OrderIntent::Close {
            deal_type: closed.deal_type,
            size: closed.remaining_size,
            signal: last_signal,
        }),
        (Some(old), Some(new)) if !same_deal(old, new) => {
            intents.push(OrderIntent::Close {
                deal_type: old.deal_type,
                size: old.remaining_size,
                signal: None,
            });
            intents.push(open_intent(new, &next.levels));
        }
        (Some(old), Some(new)) => {
            let reduced = old.remaining_size - new.remaining_size;
            if reduced > f64::EPSILON {
                intents.push(OrderIntent::Close {
                    deal_type: new.deal_type,
                    size: reduced,
                    signal: last_signal,
                });
            }
            if prev.levels.stop_price != next.levels.stop_price {
                intents.push(OrderIntent::AdjustStop {
                    deal_type: new.deal_type,
                    stop_price: next.levels.stop_price,
                });
            }
        }
    }
    intents
}

/// Re-simulates the recent tail on every new bar and forwards position
/// changes to an exchange client.
pub struct LiveDriver<'a> {
    evaluator: FitnessEvaluator<'a>,
    params: ParameterSet,
    symbol: String,
    client: &'a dyn ExchangeClient,
    /// Bars re-simulated per update. `None` uses everything passed in.
    lookback: Option<usize>,
    view: Option<LiveView>,
}

impl<'a> LiveDriver<'a> {
    pub fn new(
        strategy: &'a dyn Strategy,
        instrument: InstrumentConfig,
        params: &ParameterSet,
        symbol: &str,
        client: &'a dyn ExchangeClient,
    ) -> Result<Self, AppError> {
        instrument.validate()?;
        let params = resolve_params(strategy, params)?;
        Ok(Self {
            evaluator: FitnessEvaluator::new(strategy, instrument),
            params,
            symbol: symbol.to_string(),
            client,
            lookback: None,
            view: None,
        })
    }

    pub fn with_lookback(mut self, bars: usize) -> Self {
        self.lookback = Some(bars.max(1));
        self
    }

    /// Open position as of the last acknowledged update.
    pub fn position(&self) -> Option<&OpenDeal> {
        self.view.as_ref().and_then(|v| v.open.as_ref())
    }

    /// Process the series up to the latest closed bar. The first call only
    /// records the current state; later calls send the difference.
    /// If the client rejects an order the previous state is kept, so the next
    /// call diffs against what the venue last accepted.
    pub fn on_bar(&mut self, klines: &[Kline]) -> Result<Vec<OrderIntent>, AppError> {
        let tail = match self.lookback {
            Some(n) => &klines[klines.len().saturating_sub(n)..],
            None => klines,
        };
        let output = self.evaluator.run(&self.params, tail)?;
        let next = LiveView {
            open: output.open.first().cloned(),
            levels: output.levels.last().cloned().unwrap_or_default(),
        };

        let Some(prev) = self.view.as_ref() else {
            info!(
                "{} live driver synced on {}: {}",
                self.evaluator.strategy().name(),
                self.symbol,
                if next.open.is_some() { "in position" } else { "flat" }
            );
            self.view = Some(next);
            return Ok(Vec::new());
        };

        let intents = diff_views(prev, &next, output.last_signal);
        for intent in &intents {
            self.client.submit(&self.symbol, intent).map_err(|e| {
                warn!("{}: order rejected: {:#}", self.symbol, e);
                AppError::Exchange(format!("{}: {:#}", self.symbol, e))
            })?;
            info!("{}: submitted {:?}", self.symbol, intent);
        }
        self.view = Some(next);
        Ok(intents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::strategy::{BarView, ExitPlan, IndicatorFeed, SignalRules};
    use crate::models::params::{ParamValue, ParameterSchema};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Long above 105, out below 100, with a fixed stop and optional trail.
    struct Threshold {
        trailing: Option<f64>,
    }

    impl SignalRules for Threshold {
        fn entry(&self, bar: &BarView) -> Option<DealType> {
            (bar.close() >= 105.0).then_some(DealType::Long)
        }

        fn exit(&self, bar: &BarView, _deal_type: DealType) -> bool {
            bar.close() < 100.0
        }

        fn exit_plan(&self, _bar: &BarView, _deal_type: DealType, entry_price: f64) -> ExitPlan {
            ExitPlan {
                stop_price: Some(entry_price - 5.0),
                trailing_distance: self.trailing,
                takes: Vec::new(),
            }
        }
    }

    struct ThresholdStrategy;

    impl Strategy for ThresholdStrategy {
        fn name(&self) -> &str {
            "threshold"
        }

        fn schema(&self) -> ParameterSchema {
            ParameterSchema::new().field("trailing", ParamValue::Float(0.0))
        }

        fn compute_indicators(
            &self,
            _klines: &[Kline],
            _params: &ParameterSet,
        ) -> Result<IndicatorFeed, AppError> {
            Ok(IndicatorFeed::new())
        }

        fn rules(&self, params: &ParameterSet) -> Result<Box<dyn SignalRules>, AppError> {
            let trailing = params.get_float("trailing")?;
            Ok(Box::new(Threshold {
                trailing: (trailing > 0.0).then_some(trailing),
            }))
        }
    }

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<OrderIntent>>,
        reject: AtomicBool,
    }

    impl ExchangeClient for Recorder {
        fn submit(&self, _symbol: &str, intent: &OrderIntent) -> anyhow::Result<()> {
            if self.reject.load(Ordering::Relaxed) {
                anyhow::bail!("insufficient margin");
            }
            self.sent.lock().unwrap().push(intent.clone());
            Ok(())
        }
    }

    fn bars(closes: &[f64]) -> Vec<Kline> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Kline::new(i as i64 * 60_000, c, c + 0.5, c - 0.5, c, 1.0))
            .collect()
    }

    #[test]
    fn test_open_trail_and_close() {
        let client = Recorder::default();
        let params = ParameterSet::new().with("trailing", ParamValue::Float(2.0));
        let mut driver = LiveDriver::new(
            &ThresholdStrategy,
            InstrumentConfig::default(),
            &params,
            "BTCUSDT",
            &client,
        )
        .unwrap();

        let mut closes = vec![100.0, 101.0, 102.0];
        assert!(driver.on_bar(&bars(&closes)).unwrap().is_empty());

        closes.push(106.0);
        let intents = driver.on_bar(&bars(&closes)).unwrap();
        assert_eq!(intents.len(), 1);
        let size = match &intents[0] {
            OrderIntent::Open {
                deal_type,
                size,
                stop_price,
                ..
            } => {
                assert_eq!(*deal_type, DealType::Long);
                assert!((stop_price.unwrap() - 101.0).abs() < 1e-9);
                *size
            }
            other => panic!("Expected Open, got {:?}", other),
        };
        assert!(driver.position().is_some());

        closes.push(108.0);
        let intents = driver.on_bar(&bars(&closes)).unwrap();
        match intents.as_slice() {
            [OrderIntent::AdjustStop { stop_price, .. }] => {
                assert!((stop_price.unwrap() - 106.5).abs() < 1e-9)
            }
            other => panic!("Expected AdjustStop, got {:?}", other),
        }

        closes.push(99.0);
        let intents = driver.on_bar(&bars(&closes)).unwrap();
        assert_eq!(
            intents,
            vec![OrderIntent::Close {
                deal_type: DealType::Long,
                size,
                signal: Some(Signal::TrailingStop),
            }]
        );
        assert!(driver.position().is_none());
        assert_eq!(client.sent.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_quiet_bars_send_nothing() {
        let client = Recorder::default();
        let mut driver = LiveDriver::new(
            &ThresholdStrategy,
            InstrumentConfig::default(),
            &ParameterSet::new(),
            "ETHUSDT",
            &client,
        )
        .unwrap();
        driver.on_bar(&bars(&[100.0, 106.0])).unwrap();
        assert!(driver.position().is_some());
        // Without a trail the stop stays put while the position is held.
        assert!(driver.on_bar(&bars(&[100.0, 106.0, 107.0])).unwrap().is_empty());
        assert!(client.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_rejected_order_keeps_previous_state() {
        let client = Recorder::default();
        let mut driver = LiveDriver::new(
            &ThresholdStrategy,
            InstrumentConfig::default(),
            &ParameterSet::new(),
            "BTCUSDT",
            &client,
        )
        .unwrap();
        driver.on_bar(&bars(&[100.0])).unwrap();

        client.reject.store(true, Ordering::Relaxed);
        assert!(matches!(
            driver.on_bar(&bars(&[100.0, 106.0])),
            Err(AppError::Exchange(_))
        ));
        assert!(driver.position().is_none());

        client.reject.store(false, Ordering::Relaxed);
        let intents = driver.on_bar(&bars(&[100.0, 106.0, 107.0])).unwrap();
        assert!(matches!(intents.as_slice(), [OrderIntent::Open { .. }]));
    }

    #[test]
    fn test_diff_flip_and_partial() {
        let long = OpenDeal {
            deal_type: DealType::Long,
            entry_signal: Signal::LongEntry,
            entry_time: 0,
            entry_price: 100.0,
            remaining_size: 2.0,
        };
        let short = OpenDeal {
            deal_type: DealType::Short,
            entry_signal: Signal::ShortEntry,
            entry_time: 60_000,
            entry_price: 101.0,
            remaining_size: 1.5,
        };
        let view = |open: &OpenDeal| LiveView {
            open: Some(open.clone()),
            levels: BarLevels::default(),
        };

        let flip = diff_views(&view(&long), &view(&short), Some(Signal::ShortEntry));
        assert!(matches!(
            flip.as_slice(),
            [
                OrderIntent::Close { deal_type: DealType::Long, .. },
                OrderIntent::Open { deal_type: DealType::Short, .. }
            ]
        ));

        let half = OpenDeal {
            remaining_size: 1.0,
            ..long.clone()
        };
        let partial = diff_views(&view(&long), &view(&half), Some(Signal::TakeProfit(1)));
        assert_eq!(
            partial,
            vec![OrderIntent::Close {
                deal_type: DealType::Long,
                size: 1.0,
                signal: Some(Signal::TakeProfit(1)),
            }]
        );
    }
}
