use serde::{Deserialize, Serialize};

/// Side of a deal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DealType {
    Long,
    Short,
}

impl DealType {
    /// Numeric code used in the row layout (0 = long, 1 = short).
    pub fn code(&self) -> f64 {
        match self {
            DealType::Long => 0.0,
            DealType::Short => 1.0,
        }
    }

    /// +1 for long, -1 for short.
    pub fn sign(&self) -> f64 {
        match self {
            DealType::Long => 1.0,
            DealType::Short => -1.0,
        }
    }
}

/// Why a deal was opened or closed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Signal {
    LongEntry,
    ShortEntry,
    StopLoss,
    TrailingStop,
    /// Take-profit level, 1-based.
    TakeProfit(u8),
    /// Strategy-specific discretionary exit at the bar close.
    ExitRule,
    /// Forced close at the liquidation price (the "cancel" alert).
    Liquidation,
}

impl Signal {
    /// Stable numeric code used in the row layout.
    pub fn code(&self) -> f64 {
        match self {
            Signal::LongEntry => 1.0,
            Signal::ShortEntry => 2.0,
            Signal::StopLoss => 3.0,
            Signal::TrailingStop => 4.0,
            Signal::ExitRule => 5.0,
            Signal::Liquidation => 6.0,
            Signal::TakeProfit(n) => 10.0 + *n as f64,
        }
    }

    pub fn entry(deal_type: DealType) -> Signal {
        match deal_type {
            DealType::Long => Signal::LongEntry,
            DealType::Short => Signal::ShortEntry,
        }
    }
}

/// A closed deal, or a closed slice of a partially-exited position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedDeal {
    pub deal_type: DealType,
    pub entry_signal: Signal,
    pub exit_signal: Signal,
    pub entry_time: i64,
    pub exit_time: i64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub size: f64,
    pub pnl: f64,
    pub pnl_pct: f64,
    pub cum_pnl: f64,
    pub cum_pnl_pct: f64,
    pub commission: f64,
}

impl CompletedDeal {
    /// Number of columns in the row layout.
    pub const COLUMNS: usize = 13;

    /// Fixed-order numeric row consumed by reporting layers.
    pub fn to_row(&self) -> [f64; Self::COLUMNS] {
        [
            self.deal_type.code(),
            self.entry_signal.code(),
            self.exit_signal.code(),
            self.entry_time as f64,
            self.exit_time as f64,
            self.entry_price,
            self.exit_price,
            self.size,
            self.pnl,
            self.pnl_pct,
            self.cum_pnl,
            self.cum_pnl_pct,
            self.commission,
        ]
    }
}

/// A still-open position as seen from outside the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenDeal {
    pub deal_type: DealType,
    pub entry_signal: Signal,
    pub entry_time: i64,
    pub entry_price: f64,
    pub remaining_size: f64,
}

impl OpenDeal {
    pub const COLUMNS: usize = 5;

    pub fn to_row(&self) -> [f64; Self::COLUMNS] {
        [
            self.deal_type.code(),
            self.entry_signal.code(),
            self.entry_time as f64,
            self.entry_price,
            self.remaining_size,
        ]
    }
}

/// Exit levels in force at the end of one bar. `None` means no level.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BarLevels {
    pub stop_price: Option<f64>,
    pub liquidation_price: Option<f64>,
    /// Pending take-profit prices, in ladder order.
    pub take_prices: Vec<f64>,
}
