use crate::models::deal::DealType;

/// Round to a fixed number of decimal places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Monetary rounding applied before anything is accumulated.
pub fn round2(value: f64) -> f64 {
    round_to(value, 2)
}

/// Snap a price or quantity to the nearest multiple of `step`, with an
/// 8-decimal guard against float residue. Non-positive steps leave the value as is.
pub fn round_to_step(value: f64, step: f64) -> f64 {
    if !(step > 0.0) || !value.is_finite() {
        return value;
    }
    round_to((value / step).round() * step, 8)
}

/// Realized amounts of one close, already rounded to 2 decimals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CloseAmounts {
    pub pnl: f64,
    pub pnl_pct: f64,
    pub commission: f64,
}

impl CloseAmounts {
    pub const ZERO: CloseAmounts = CloseAmounts {
        pnl: 0.0,
        pnl_pct: 0.0,
        commission: 0.0,
    };
}

/// Commission for both legs: `rate_pct` is a percentage of notional per side.
pub fn calculate_commission(size: f64, entry_price: f64, exit_price: f64, rate_pct: f64) -> f64 {
    size * entry_price * rate_pct / 100.0 + size * exit_price * rate_pct / 100.0
}

/// Net PnL, percentage PnL and commission for closing `size` units.
pub fn calculate_close(
    deal_type: DealType,
    entry_price: f64,
    exit_price: f64,
    size: f64,
    rate_pct: f64,
) -> CloseAmounts {
    if size == 0.0 {
        return CloseAmounts::ZERO;
    }
    let commission = calculate_commission(size, entry_price, exit_price, rate_pct);
    let gross = (exit_price - entry_price) * size * deal_type.sign();
    let pnl = gross - commission;
    let notional = size * entry_price;
    let pnl_pct = if notional != 0.0 {
        ((notional + pnl) / notional - 1.0) * 100.0
    } else {
        0.0
    };
    CloseAmounts {
        pnl: round2(pnl),
        pnl_pct: round2(pnl_pct),
        commission: round2(commission),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to_step() {
        assert_eq!(round_to_step(101.237, 0.01), 101.24);
        assert_eq!(round_to_step(0.30000000000000004, 0.1), 0.3);
        assert_eq!(round_to_step(1.2345, 0.005), 1.235);
        assert_eq!(round_to_step(7.0, 0.0), 7.0);
    }

    #[test]
    fn test_close_long_take_profit() {
        // entry 100, exit 120, size 1, 0.1% per side
        let c = calculate_close(DealType::Long, 100.0, 120.0, 1.0, 0.1);
        assert_eq!(c.commission, 0.22);
        assert_eq!(c.pnl, 19.78);
        assert_eq!(c.pnl_pct, 19.78);
    }

    #[test]
    fn test_close_short() {
        let c = calculate_close(DealType::Short, 100.0, 90.0, 2.0, 0.0);
        assert_eq!(c.pnl, 20.0);
        assert_eq!(c.pnl_pct, 10.0);
        let loss = calculate_close(DealType::Short, 100.0, 110.0, 1.0, 0.0);
        assert_eq!(loss.pnl, -10.0);
    }

    #[test]
    fn test_close_zero_size_is_noop() {
        assert_eq!(
            calculate_close(DealType::Long, 100.0, 50.0, 0.0, 0.1),
            CloseAmounts::ZERO
        );
    }
}
