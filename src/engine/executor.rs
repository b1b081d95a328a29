use tracing::debug;

use crate::errors::AppError;
use crate::models::config::InstrumentConfig;
use crate::models::deal::{BarLevels, CompletedDeal, DealType, OpenDeal, Signal};
use crate::models::kline::{validate_klines, Kline};
use crate::models::params::{ParamValue, ParameterSchema, ParameterSet};

use super::ledger::{CloseRequest, DealLedger};
use super::orders::{round_to_step, CloseAmounts};
use super::position::{
    build_take_levels, calculate_size, clamp_stop, liquidation_price, OrderSizeMode, Position,
};
use super::strategy::{BarView, IndicatorFeed, SignalRules, Strategy};

/// Which sides the engine may open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeDirection {
    Both,
    Long,
    Short,
}

impl TradeDirection {
    /// Parameter encoding: 0 = both, 1 = long only, 2 = short only.
    pub fn from_code(code: i64) -> Result<Self, AppError> {
        match code {
            0 => Ok(TradeDirection::Both),
            1 => Ok(TradeDirection::Long),
            2 => Ok(TradeDirection::Short),
            other => Err(AppError::ParameterOutOfDomain {
                name: "direction".into(),
                value: other.to_string(),
            }),
        }
    }

    pub fn allows(&self, deal_type: DealType) -> bool {
        match self {
            TradeDirection::Both => true,
            TradeDirection::Long => deal_type == DealType::Long,
            TradeDirection::Short => deal_type == DealType::Short,
        }
    }
}

/// Fields every strategy inherits from the engine.
pub fn engine_schema() -> ParameterSchema {
    ParameterSchema::new()
        .field("leverage", ParamValue::Int(1))
        .field("commission", ParamValue::Float(0.05))
        .field("order_size", ParamValue::Float(100.0))
        .field("order_size_type", ParamValue::Int(0))
        .field("initial_capital", ParamValue::Float(10_000.0))
        .field("direction", ParamValue::Int(0))
}

/// Engine fields merged with the strategy's own declaration.
pub fn full_schema(strategy: &dyn Strategy) -> ParameterSchema {
    engine_schema().merge(&strategy.schema())
}

/// Validate `params` against the strategy's full schema and fill in defaults.
pub fn resolve_params(strategy: &dyn Strategy, params: &ParameterSet) -> Result<ParameterSet, AppError> {
    full_schema(strategy).resolve(params)
}

/// Engine-level settings extracted from a resolved parameter set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    pub leverage: f64,
    /// Percent of notional per side.
    pub commission: f64,
    pub order_size: f64,
    pub order_size_mode: OrderSizeMode,
    pub initial_capital: f64,
    pub direction: TradeDirection,
}

impl EngineSettings {
    pub fn from_params(params: &ParameterSet) -> Result<Self, AppError> {
        let leverage = params.get_int("leverage")?;
        if leverage < 1 {
            return Err(AppError::ParameterOutOfDomain {
                name: "leverage".into(),
                value: leverage.to_string(),
            });
        }
        let commission = params.get_float("commission")?;
        if !(commission >= 0.0) {
            return Err(AppError::ParameterOutOfDomain {
                name: "commission".into(),
                value: commission.to_string(),
            });
        }
        Ok(Self {
            leverage: leverage as f64,
            commission,
            order_size: params.get_float("order_size")?,
            order_size_mode: OrderSizeMode::from_code(params.get_int("order_size_type")?)?,
            initial_capital: params.get_float("initial_capital")?,
            direction: TradeDirection::from_code(params.get_int("direction")?)?,
        })
    }
}

/// Everything that stays fixed for the length of one run.
pub struct SimulationContext<'a> {
    pub klines: &'a [Kline],
    pub indicators: &'a IndicatorFeed,
    pub settings: EngineSettings,
    pub instrument: InstrumentConfig,
    pub rules: &'a dyn SignalRules,
}

impl<'a> SimulationContext<'a> {
    fn bar(&self, index: usize) -> BarView<'a> {
        BarView {
            index,
            klines: self.klines,
            indicators: self.indicators,
        }
    }
}

/// Everything a run mutates.
#[derive(Debug, Clone)]
pub struct SimulationState {
    pub position: Option<Position>,
    pub ledger: DealLedger,
    pub equity: f64,
    pub levels: Vec<BarLevels>,
    pub last_signal: Option<Signal>,
}

impl SimulationState {
    pub fn new(settings: &EngineSettings, bars: usize) -> Self {
        Self {
            position: None,
            ledger: DealLedger::new(settings.initial_capital, settings.commission),
            equity: settings.initial_capital,
            levels: Vec::with_capacity(bars),
            last_signal: None,
        }
    }

    fn current_levels(&self) -> BarLevels {
        self.position
            .as_ref()
            .map(Position::levels)
            .unwrap_or_default()
    }

    /// Book a close of `size` units of the live position at `price`.
    /// Clears the position once nothing remains.
    fn close(
        &mut self,
        size: f64,
        price: f64,
        time: i64,
        signal: Signal,
        qty_step: f64,
    ) -> CloseAmounts {
        let Some(pos) = self.position.as_mut() else {
            return CloseAmounts::ZERO;
        };
        let size = size.min(pos.size);
        let amounts = self.ledger.close(CloseRequest {
            deal_type: pos.deal_type,
            entry_signal: pos.entry_signal,
            exit_signal: signal,
            entry_time: pos.entry_time,
            exit_time: time,
            entry_price: pos.entry_price,
            exit_price: price,
            size,
        });
        pos.size = round_to_step(pos.size - size, qty_step);
        if pos.size <= 0.0 {
            self.position = None;
        }
        self.equity += amounts.pnl;
        self.last_signal = Some(signal);
        amounts
    }

    fn close_all(&mut self, price: f64, time: i64, signal: Signal, qty_step: f64) {
        if let Some(size) = self.position.as_ref().map(|p| p.size) {
            self.close(size, price, time, signal, qty_step);
        }
        self.position = None;
    }
}

/// Result of one simulation run.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationOutput {
    pub completed: Vec<CompletedDeal>,
    /// Zero or one rows: the position still live after the last bar.
    pub open: Vec<OpenDeal>,
    /// Stop, liquidation and take levels after each bar.
    pub levels: Vec<BarLevels>,
    pub final_equity: f64,
    pub last_signal: Option<Signal>,
}

impl SimulationOutput {
    pub fn total_pnl(&self) -> f64 {
        self.completed.iter().map(|d| d.pnl).sum()
    }

    pub fn completed_rows(&self) -> Vec<[f64; CompletedDeal::COLUMNS]> {
        self.completed.iter().map(CompletedDeal::to_row).collect()
    }

    pub fn open_rows(&self) -> Vec<[f64; OpenDeal::COLUMNS]> {
        self.open.iter().map(OpenDeal::to_row).collect()
    }
}

/// Advance the simulation by one bar.
pub fn step(ctx: &SimulationContext, state: &mut SimulationState, i: usize) {
    let kline = &ctx.klines[i];
    let qty_step = ctx.instrument.qty_step;
    let price_step = ctx.instrument.price_step;
    let bar = ctx.bar(i);

    // ── 1. Carry forward levels from the previous bar ──
    let carried = state.current_levels();
    state.levels.push(carried);

    // ── 2. Liquidation ──
    if let Some(pos) = state.position.as_ref() {
        if pos.liquidation_hit(kline) {
            if let Some(liq) = pos.liquidation_price {
                state.close_all(liq, kline.time, Signal::Liquidation, qty_step);
            }
        }
    }

    // ── 3. Exits ──
    if let Some(pos) = state.position.as_ref() {
        if pos.stop_hit(kline) {
            let signal = pos.stop_signal();
            if let Some(stop) = pos.stop_price {
                state.close_all(stop, kline.time, signal, qty_step);
            }
        }
    }

    if let Some(pos) = state.position.as_mut() {
        pos.update_trailing_stop(kline, price_step);
    }

    while let Some(pos) = state.position.as_ref() {
        let Some(level) = pos.takes.first().copied() else {
            break;
        };
        if !pos.take_hit(&level, kline) {
            break;
        }
        let size = if pos.takes.len() == 1 { pos.size } else { level.size };
        if let Some(pos) = state.position.as_mut() {
            pos.takes.remove(0);
        }
        state.close(size, level.price, kline.time, Signal::TakeProfit(level.index), qty_step);
    }

    if let Some(pos) = state.position.as_ref() {
        if ctx.rules.exit(&bar, pos.deal_type) {
            state.close_all(kline.close, kline.time, Signal::ExitRule, qty_step);
        }
    }

    // ── 4. Entry ──
    if state.position.is_none() {
        if let Some(deal_type) = ctx.rules.entry(&bar) {
            if ctx.settings.direction.allows(deal_type) {
                open_position(ctx, state, i, deal_type);
            }
        }
    }

    // Record where the levels ended up after this bar.
    let after = state.current_levels();
    if let Some(last) = state.levels.last_mut() {
        *last = after;
    }
}

fn open_position(
    ctx: &SimulationContext,
    state: &mut SimulationState,
    i: usize,
    deal_type: DealType,
) {
    let kline = &ctx.klines[i];
    let settings = &ctx.settings;
    let price_step = ctx.instrument.price_step;
    let qty_step = ctx.instrument.qty_step;

    let entry_price = round_to_step(kline.close, price_step);
    let size = calculate_size(
        settings.order_size_mode,
        settings.order_size,
        state.equity,
        settings.leverage,
        entry_price,
        qty_step,
    );
    if size <= 0.0 {
        return;
    }

    let liquidation = liquidation_price(deal_type, entry_price, settings.leverage, price_step);
    let plan = ctx.rules.exit_plan(&ctx.bar(i), deal_type, entry_price);
    let stop_price = plan
        .stop_price
        .filter(|s| s.is_finite())
        .map(|s| clamp_stop(deal_type, round_to_step(s, price_step), liquidation));
    let trailing_distance = plan.trailing_distance.filter(|d| d.is_finite() && *d > 0.0);
    let takes = build_take_levels(&plan.takes, size, price_step, qty_step);

    let signal = Signal::entry(deal_type);
    state.position = Some(Position {
        deal_type,
        entry_signal: signal,
        entry_time: kline.time,
        entry_price,
        size,
        liquidation_price: liquidation,
        stop_price,
        trailing_distance,
        trailing_moved: false,
        takes,
        extreme_price: entry_price,
    });
    state.last_signal = Some(signal);
}

/// Run `strategy` over `klines` with a precomputed indicator feed.
pub fn simulate(
    strategy: &dyn Strategy,
    klines: &[Kline],
    indicators: &IndicatorFeed,
    params: &ParameterSet,
    instrument: &InstrumentConfig,
) -> Result<SimulationOutput, AppError> {
    validate_klines(klines)?;
    for (name, series) in indicators {
        if series.len() != klines.len() {
            return Err(AppError::Simulation(format!(
                "indicator '{}' has {} values for {} klines",
                name,
                series.len(),
                klines.len()
            )));
        }
    }

    let resolved = resolve_params(strategy, params)?;
    let settings = EngineSettings::from_params(&resolved)?;
    let rules = strategy.rules(&resolved)?;

    let ctx = SimulationContext {
        klines,
        indicators,
        settings,
        instrument: *instrument,
        rules: rules.as_ref(),
    };
    let mut state = SimulationState::new(&settings, klines.len());
    for i in 0..klines.len() {
        step(&ctx, &mut state, i);
    }

    debug!(
        "Simulation of {} over {} bars: {} deals, equity {:.2}",
        strategy.name(),
        klines.len(),
        state.ledger.deals().len(),
        state.equity
    );

    Ok(SimulationOutput {
        open: state
            .position
            .as_ref()
            .map(|p| vec![p.to_open_deal()])
            .unwrap_or_default(),
        completed: state.ledger.into_deals(),
        levels: state.levels,
        final_equity: state.equity,
        last_signal: state.last_signal,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::strategy::{ExitPlan, TakeTarget};

    /// Rules driven by bar indices instead of indicators.
    #[derive(Clone, Default)]
    struct ScriptedRules {
        entries: Vec<(usize, DealType)>,
        exits: Vec<usize>,
        stop_pct: Option<f64>,
        trailing: Option<f64>,
        /// (distance percent, size percent)
        takes: Vec<(f64, f64)>,
    }

    impl SignalRules for ScriptedRules {
        fn entry(&self, bar: &BarView) -> Option<DealType> {
            self.entries
                .iter()
                .find(|(i, _)| *i == bar.index)
                .map(|(_, d)| *d)
        }

        fn exit(&self, bar: &BarView, _deal_type: DealType) -> bool {
            self.exits.contains(&bar.index)
        }

        fn exit_plan(&self, _bar: &BarView, deal_type: DealType, entry_price: f64) -> ExitPlan {
            let sign = deal_type.sign();
            ExitPlan {
                stop_price: self.stop_pct.map(|p| entry_price * (1.0 - sign * p / 100.0)),
                trailing_distance: self.trailing,
                takes: self
                    .takes
                    .iter()
                    .map(|(dist, size_pct)| TakeTarget {
                        price: entry_price * (1.0 + sign * dist / 100.0),
                        size_pct: *size_pct,
                    })
                    .collect(),
            }
        }
    }

    struct Scripted(ScriptedRules);

    impl Strategy for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn schema(&self) -> ParameterSchema {
            ParameterSchema::new()
        }

        fn compute_indicators(
            &self,
            _klines: &[Kline],
            _params: &ParameterSet,
        ) -> Result<IndicatorFeed, AppError> {
            Ok(IndicatorFeed::new())
        }

        fn rules(&self, _params: &ParameterSet) -> Result<Box<dyn SignalRules>, AppError> {
            Ok(Box::new(self.0.clone()))
        }
    }

    fn bar(i: usize, high: f64, low: f64, close: f64) -> Kline {
        Kline::new(i as i64 * 60_000, close, high, low, close, 1.0)
    }

    fn flat_klines(n: usize, price: f64) -> Vec<Kline> {
        (0..n).map(|i| bar(i, price, price, price)).collect()
    }

    /// One unit per trade: fixed 100 currency at price 100, leverage 1.
    fn unit_params(commission: f64) -> ParameterSet {
        ParameterSet::new()
            .with("order_size_type", ParamValue::Int(1))
            .with("order_size", ParamValue::Float(100.0))
            .with("commission", ParamValue::Float(commission))
    }

    fn run(rules: ScriptedRules, klines: &[Kline], params: &ParameterSet) -> SimulationOutput {
        simulate(
            &Scripted(rules),
            klines,
            &IndicatorFeed::new(),
            params,
            &InstrumentConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_constant_price_no_signals() {
        let klines = flat_klines(100, 100.0);
        let out = run(ScriptedRules::default(), &klines, &ParameterSet::new());
        assert!(out.completed.is_empty());
        assert!(out.open.is_empty());
        assert_eq!(out.levels.len(), 100);
        assert_eq!(out.final_equity, 10_000.0);
        assert_eq!(out.last_signal, None);
    }

    #[test]
    fn test_take_profit_commission_scenario() {
        let klines = vec![bar(0, 100.0, 100.0, 100.0), bar(1, 121.0, 100.0, 110.0)];
        let rules = ScriptedRules {
            entries: vec![(0, DealType::Long)],
            takes: vec![(20.0, 100.0)],
            ..Default::default()
        };
        let out = run(rules, &klines, &unit_params(0.1));
        assert_eq!(out.completed.len(), 1);
        let deal = &out.completed[0];
        assert_eq!(deal.exit_price, 120.0);
        assert_eq!(deal.commission, 0.22);
        assert_eq!(deal.pnl, 19.78);
        assert_eq!(deal.cum_pnl, 19.78);
        assert_eq!(deal.exit_signal, Signal::TakeProfit(1));
        assert!(out.open.is_empty());
        assert!((out.final_equity - 10_019.78).abs() < 1e-9);
    }

    #[test]
    fn test_partial_takes_reduce_open_deal() {
        let klines = vec![
            bar(0, 100.0, 100.0, 100.0),
            bar(1, 115.0, 100.0, 112.0),
            bar(2, 112.0, 108.0, 110.0),
            bar(3, 125.0, 110.0, 121.0),
        ];
        let rules = ScriptedRules {
            entries: vec![(0, DealType::Long)],
            takes: vec![(10.0, 50.0), (20.0, 50.0)],
            ..Default::default()
        };
        let params = unit_params(0.0);
        let strategy = Scripted(rules);
        let feed = IndicatorFeed::new();
        let instrument = InstrumentConfig::default();

        let partial = simulate(&strategy, &klines[..3], &feed, &params, &instrument).unwrap();
        assert_eq!(partial.completed.len(), 1);
        assert_eq!(partial.open.len(), 1);
        assert_eq!(partial.open[0].remaining_size, 0.5);
        assert_eq!(partial.levels[2].take_prices, vec![120.0]);

        let full = simulate(&strategy, &klines, &feed, &params, &instrument).unwrap();
        assert_eq!(full.completed.len(), 2);
        assert!(full.open.is_empty());
        assert_eq!(full.completed[1].exit_signal, Signal::TakeProfit(2));
        assert_eq!(full.completed[1].cum_pnl, 15.0);
        assert_eq!(full.levels[3], BarLevels::default());
    }

    #[test]
    fn test_stop_loss_closes_full_position() {
        let klines = vec![bar(0, 100.0, 100.0, 100.0), bar(1, 101.0, 94.0, 96.0)];
        let rules = ScriptedRules {
            entries: vec![(0, DealType::Long)],
            stop_pct: Some(5.0),
            takes: vec![(10.0, 100.0)],
            ..Default::default()
        };
        let out = run(rules, &klines, &unit_params(0.0));
        assert_eq!(out.completed.len(), 1);
        assert_eq!(out.completed[0].exit_price, 95.0);
        assert_eq!(out.completed[0].exit_signal, Signal::StopLoss);
        assert_eq!(out.completed[0].pnl, -5.0);
        assert_eq!(out.last_signal, Some(Signal::StopLoss));
    }

    #[test]
    fn test_stop_clamped_to_liquidation_and_liquidation_first() {
        let klines = vec![bar(0, 100.0, 100.0, 100.0), bar(1, 100.0, 85.0, 88.0)];
        let rules = ScriptedRules {
            entries: vec![(0, DealType::Long)],
            stop_pct: Some(20.0),
            ..Default::default()
        };
        let params = unit_params(0.0).with("leverage", ParamValue::Int(10));
        let out = run(rules, &klines, &params);
        let levels = &out.levels[0];
        assert_eq!(levels.liquidation_price, Some(90.0));
        assert_eq!(levels.stop_price, Some(90.0));
        assert!(levels.stop_price >= levels.liquidation_price);

        assert_eq!(out.completed.len(), 1);
        assert_eq!(out.completed[0].exit_signal, Signal::Liquidation);
        assert_eq!(out.completed[0].exit_price, 90.0);
    }

    #[test]
    fn test_trailing_stop_clamped_to_liquidation() {
        let klines = vec![
            bar(0, 100.0, 100.0, 100.0),
            bar(1, 100.5, 99.0, 99.5),
            bar(2, 100.0, 99.0, 99.5),
        ];
        let rules = ScriptedRules {
            entries: vec![(0, DealType::Long)],
            trailing: Some(3.0),
            ..Default::default()
        };
        let params = unit_params(0.0).with("leverage", ParamValue::Int(50));
        let out = run(rules, &klines, &params);
        assert_eq!(out.levels.len(), klines.len());
        assert_eq!(out.levels[1].liquidation_price, Some(98.0));
        assert_eq!(out.levels[1].stop_price, Some(98.0));
        for levels in &out.levels {
            if let (Some(stop), Some(liq)) = (levels.stop_price, levels.liquidation_price) {
                assert!(stop >= liq, "stop {} below liquidation {}", stop, liq);
            }
        }
        assert!(out.completed.is_empty());
    }

    #[test]
    fn test_trailing_stop_signal() {
        let klines = vec![
            bar(0, 100.0, 100.0, 100.0),
            bar(1, 110.0, 104.0, 108.0),
            bar(2, 106.0, 103.0, 104.0),
        ];
        let rules = ScriptedRules {
            entries: vec![(0, DealType::Long)],
            trailing: Some(5.0),
            ..Default::default()
        };
        let out = run(rules, &klines, &unit_params(0.0));
        assert_eq!(out.levels[1].stop_price, Some(105.0));
        assert_eq!(out.completed.len(), 1);
        assert_eq!(out.completed[0].exit_signal, Signal::TrailingStop);
        assert_eq!(out.completed[0].exit_price, 105.0);
    }

    #[test]
    fn test_exit_rule_then_flip_on_same_bar() {
        let mut klines = flat_klines(3, 100.0);
        klines[2] = bar(2, 104.0, 100.0, 103.0);
        let rules = ScriptedRules {
            entries: vec![(0, DealType::Long), (2, DealType::Short)],
            exits: vec![2],
            ..Default::default()
        };
        let out = run(rules, &klines, &unit_params(0.0));
        assert_eq!(out.completed.len(), 1);
        assert_eq!(out.completed[0].exit_signal, Signal::ExitRule);
        assert_eq!(out.completed[0].pnl, 3.0);
        assert_eq!(out.open.len(), 1);
        assert_eq!(out.open[0].deal_type, DealType::Short);
        assert_eq!(out.open[0].entry_price, 103.0);
        assert_eq!(out.last_signal, Some(Signal::ShortEntry));
    }

    #[test]
    fn test_direction_filter() {
        let klines = flat_klines(5, 100.0);
        let rules = ScriptedRules {
            entries: vec![(1, DealType::Short)],
            ..Default::default()
        };
        let params = unit_params(0.0).with("direction", ParamValue::Int(1));
        let out = run(rules, &klines, &params);
        assert!(out.open.is_empty());
        assert!(out.completed.is_empty());
    }

    #[test]
    fn test_percent_of_equity_sizing() {
        let klines = flat_klines(2, 50.0);
        let rules = ScriptedRules {
            entries: vec![(0, DealType::Long)],
            ..Default::default()
        };
        let params = ParameterSet::new().with("order_size", ParamValue::Float(10.0));
        let out = run(rules, &klines, &params);
        // 10% of 10_000 at price 50
        assert_eq!(out.open[0].remaining_size, 20.0);
        assert_eq!(out.open_rows()[0].len(), 5);
        assert_eq!(out.completed_rows().len(), out.completed.len());
    }

    #[test]
    fn test_deterministic() {
        let klines: Vec<Kline> = (0..60)
            .map(|i| {
                let p = 100.0 + ((i as f64) * 0.7).sin() * 8.0;
                bar(i, p + 1.5, p - 1.5, p)
            })
            .collect();
        let rules = ScriptedRules {
            entries: (0..60).step_by(7).map(|i| (i, DealType::Long)).collect(),
            exits: (0..60).step_by(5).collect(),
            stop_pct: Some(3.0),
            trailing: Some(2.0),
            takes: vec![(2.0, 40.0), (4.0, 60.0)],
        };
        let a = run(rules.clone(), &klines, &unit_params(0.075));
        let b = run(rules, &klines, &unit_params(0.075));
        assert_eq!(a, b);
        assert!(!a.completed.is_empty());

        let mut prev = 0.0;
        for d in &a.completed {
            assert_eq!(d.cum_pnl, crate::engine::orders::round2(prev + d.pnl));
            prev = d.cum_pnl;
        }
    }

    #[test]
    fn test_data_and_config_errors() {
        let strategy = Scripted(ScriptedRules::default());
        let feed = IndicatorFeed::new();
        let instrument = InstrumentConfig::default();

        let empty = simulate(&strategy, &[], &feed, &ParameterSet::new(), &instrument);
        assert!(matches!(empty, Err(AppError::EmptyKlines)));

        let mut klines = flat_klines(3, 1.0);
        klines[2].time = klines[1].time;
        let bad = simulate(&strategy, &klines, &feed, &ParameterSet::new(), &instrument);
        assert!(matches!(bad, Err(AppError::NonMonotonicTime { index: 2, .. })));

        let unknown = ParameterSet::new().with("nope", ParamValue::Int(1));
        let err = simulate(&strategy, &flat_klines(3, 1.0), &feed, &unknown, &instrument);
        assert!(matches!(err, Err(AppError::UnknownParameter(_))));
    }
}
