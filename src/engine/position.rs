use crate::errors::AppError;
use crate::models::deal::{BarLevels, DealType, OpenDeal, Signal};
use crate::models::kline::Kline;

use super::orders::round_to_step;
use super::strategy::TakeTarget;

/// How `order_size` is interpreted when sizing an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSizeMode {
    /// `order_size` is a percentage of current equity.
    PercentOfEquity,
    /// `order_size` is a fixed amount of quote currency.
    FixedCurrency,
}

impl OrderSizeMode {
    /// Parameter encoding: 0 = percent of equity, 1 = fixed currency.
    pub fn from_code(code: i64) -> Result<Self, AppError> {
        match code {
            0 => Ok(OrderSizeMode::PercentOfEquity),
            1 => Ok(OrderSizeMode::FixedCurrency),
            other => Err(AppError::ParameterOutOfDomain {
                name: "order_size_type".into(),
                value: other.to_string(),
            }),
        }
    }
}

/// A pending take-profit order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TakeLevel {
    /// 1-based position in the ladder.
    pub index: u8,
    pub price: f64,
    pub size: f64,
}

/// The live position tracked by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub deal_type: DealType,
    pub entry_signal: Signal,
    pub entry_time: i64,
    pub entry_price: f64,
    /// Remaining (not yet closed) size. Always > 0 while the position exists.
    pub size: f64,
    pub liquidation_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub trailing_distance: Option<f64>,
    /// Set once the trailing logic has moved the stop.
    pub trailing_moved: bool,
    /// Pending take-profit levels, ladder order.
    pub takes: Vec<TakeLevel>,
    /// Highest high (long) or lowest low (short) since entry.
    pub extreme_price: f64,
}

/// Entry size in base units.
pub fn calculate_size(
    mode: OrderSizeMode,
    order_size: f64,
    equity: f64,
    leverage: f64,
    entry_price: f64,
    qty_step: f64,
) -> f64 {
    if !(entry_price > 0.0) || !(order_size > 0.0) {
        return 0.0;
    }
    let notional = match mode {
        OrderSizeMode::PercentOfEquity => equity.max(0.0) * order_size / 100.0,
        OrderSizeMode::FixedCurrency => order_size,
    };
    round_to_step(notional * leverage / entry_price, qty_step).max(0.0)
}

/// Price at which a leveraged position is force-closed.
pub fn liquidation_price(
    deal_type: DealType,
    entry_price: f64,
    leverage: f64,
    price_step: f64,
) -> Option<f64> {
    if !(leverage > 0.0) {
        return None;
    }
    let raw = match deal_type {
        DealType::Long => entry_price * (1.0 - 1.0 / leverage),
        DealType::Short => entry_price * (1.0 + 1.0 / leverage),
    };
    Some(round_to_step(raw, price_step))
}

/// Keep a stop on the safe side of liquidation so the stop is always
/// reachable before the liquidation price.
pub fn clamp_stop(deal_type: DealType, stop: f64, liquidation: Option<f64>) -> f64 {
    match (deal_type, liquidation) {
        (DealType::Long, Some(liq)) => stop.max(liq),
        (DealType::Short, Some(liq)) => stop.min(liq),
        (_, None) => stop,
    }
}

/// Ladder indices are `u8`; targets past this many are ignored.
pub const MAX_TAKE_LEVELS: usize = u8::MAX as usize;

/// Snap a take-profit ladder and split `size` across it. The last level
/// always carries the remainder so the ladder closes the whole position.
pub fn build_take_levels(
    targets: &[TakeTarget],
    size: f64,
    price_step: f64,
    qty_step: f64,
) -> Vec<TakeLevel> {
    let valid: Vec<&TakeTarget> = targets
        .iter()
        .filter(|t| t.price.is_finite() && t.price > 0.0 && t.size_pct.is_finite())
        .take(MAX_TAKE_LEVELS)
        .collect();

    let mut levels = Vec::with_capacity(valid.len());
    let mut allocated = 0.0;
    for (i, target) in valid.iter().enumerate() {
        let is_last = i + 1 == valid.len();
        let level_size = if is_last {
            round_to_step(size - allocated, qty_step)
        } else {
            round_to_step(size * target.size_pct.max(0.0) / 100.0, qty_step)
                .min(round_to_step(size - allocated, qty_step))
        };
        if level_size <= 0.0 && !is_last {
            continue;
        }
        allocated += level_size;
        levels.push(TakeLevel {
            index: (levels.len() + 1) as u8,
            price: round_to_step(target.price, price_step),
            size: level_size.max(0.0),
        });
    }
    levels
}

impl Position {
    pub fn liquidation_hit(&self, kline: &Kline) -> bool {
        match (self.deal_type, self.liquidation_price) {
            (DealType::Long, Some(liq)) => kline.low <= liq,
            (DealType::Short, Some(liq)) => kline.high >= liq,
            (_, None) => false,
        }
    }

    pub fn stop_hit(&self, kline: &Kline) -> bool {
        match (self.deal_type, self.stop_price) {
            (DealType::Long, Some(stop)) => kline.low <= stop,
            (DealType::Short, Some(stop)) => kline.high >= stop,
            (_, None) => false,
        }
    }

    pub fn take_hit(&self, level: &TakeLevel, kline: &Kline) -> bool {
        match self.deal_type {
            DealType::Long => kline.high >= level.price,
            DealType::Short => kline.low <= level.price,
        }
    }

    /// Move the trailing stop in the favourable direction only. Returns true if it moved.
    pub fn update_trailing_stop(&mut self, kline: &Kline, price_step: f64) -> bool {
        let Some(distance) = self.trailing_distance else {
            return false;
        };
        match self.deal_type {
            DealType::Long => {
                self.extreme_price = self.extreme_price.max(kline.high);
                let candidate = clamp_stop(
                    self.deal_type,
                    round_to_step(self.extreme_price - distance, price_step),
                    self.liquidation_price,
                );
                if self.stop_price.map_or(true, |s| candidate > s) {
                    self.stop_price = Some(candidate);
                    self.trailing_moved = true;
                    return true;
                }
            }
            DealType::Short => {
                self.extreme_price = self.extreme_price.min(kline.low);
                let candidate = clamp_stop(
                    self.deal_type,
                    round_to_step(self.extreme_price + distance, price_step),
                    self.liquidation_price,
                );
                if self.stop_price.map_or(true, |s| candidate < s) {
                    self.stop_price = Some(candidate);
                    self.trailing_moved = true;
                    return true;
                }
            }
        }
        false
    }

    pub fn stop_signal(&self) -> Signal {
        if self.trailing_moved {
            Signal::TrailingStop
        } else {
            Signal::StopLoss
        }
    }

    pub fn levels(&self) -> BarLevels {
        BarLevels {
            stop_price: self.stop_price,
            liquidation_price: self.liquidation_price,
            take_prices: self.takes.iter().map(|t| t.price).collect(),
        }
    }

    pub fn to_open_deal(&self) -> OpenDeal {
        OpenDeal {
            deal_type: self.deal_type,
            entry_signal: self.entry_signal,
            entry_time: self.entry_time,
            entry_price: self.entry_price,
            remaining_size: self.size,
        }
    }
}
