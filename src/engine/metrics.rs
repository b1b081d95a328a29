use crate::models::deal::CompletedDeal;
use crate::models::result::LedgerMetrics;

use super::orders::round2;

/// Summary statistics over a completed-deal ledger. Deal PnL is already net of commission.
pub fn calculate_ledger_metrics(deals: &[CompletedDeal]) -> LedgerMetrics {
    let total_deals = deals.len();
    if total_deals == 0 {
        return empty_metrics();
    }

    // ── Deal classification ──
    let winning: Vec<&CompletedDeal> = deals.iter().filter(|d| d.pnl > 0.0).collect();
    let losing: Vec<&CompletedDeal> = deals.iter().filter(|d| d.pnl < 0.0).collect();
    let winning_deals = winning.len();
    let losing_deals = losing.len();
    let win_rate_pct = winning_deals as f64 / total_deals as f64 * 100.0;

    // ── P&L ──
    let gross_profit: f64 = winning.iter().map(|d| d.pnl).sum();
    let gross_loss: f64 = losing.iter().map(|d| d.pnl.abs()).sum();
    let net_profit: f64 = deals.iter().map(|d| d.pnl).sum();
    let total_commission: f64 = deals.iter().map(|d| d.commission).sum();
    let profit_factor = if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else if gross_profit > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };
    let largest_win = winning.iter().map(|d| d.pnl).fold(0.0f64, f64::max);
    let largest_loss = losing.iter().map(|d| d.pnl).fold(0.0f64, f64::min);

    let (max_consecutive_wins, max_consecutive_losses) = calculate_consecutive(deals);
    let returns: Vec<f64> = deals.iter().map(|d| d.pnl_pct).collect();

    LedgerMetrics {
        total_deals,
        winning_deals,
        losing_deals,
        win_rate_pct,
        gross_profit: round2(gross_profit),
        gross_loss: round2(gross_loss),
        net_profit: round2(net_profit),
        total_commission: round2(total_commission),
        profit_factor,
        avg_deal: net_profit / total_deals as f64,
        largest_win,
        largest_loss,
        max_drawdown: calculate_max_drawdown(deals),
        max_consecutive_wins,
        max_consecutive_losses,
        sharpe_ratio: calculate_sharpe(&returns),
    }
}

fn empty_metrics() -> LedgerMetrics {
    LedgerMetrics {
        total_deals: 0,
        winning_deals: 0,
        losing_deals: 0,
        win_rate_pct: 0.0,
        gross_profit: 0.0,
        gross_loss: 0.0,
        net_profit: 0.0,
        total_commission: 0.0,
        profit_factor: 0.0,
        avg_deal: 0.0,
        largest_win: 0.0,
        largest_loss: 0.0,
        max_drawdown: 0.0,
        max_consecutive_wins: 0,
        max_consecutive_losses: 0,
        sharpe_ratio: 0.0,
    }
}

/// Largest peak-to-trough drop of the cumulative PnL column, anchored at 0.
fn calculate_max_drawdown(deals: &[CompletedDeal]) -> f64 {
    let mut peak = 0.0f64;
    let mut max_dd = 0.0f64;
    for deal in deals {
        peak = peak.max(deal.cum_pnl);
        max_dd = max_dd.max(peak - deal.cum_pnl);
    }
    round2(max_dd)
}

/// Sample Sharpe of per-deal returns, not annualized.
fn calculate_sharpe(returns: &[f64]) -> f64 {
    let n = returns.len();
    if n < 2 {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / n as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    let std_dev = variance.sqrt();
    if std_dev == 0.0 {
        return 0.0;
    }
    mean / std_dev
}

/// Longest winning and losing streaks. Break-even deals do not interrupt a streak.
fn calculate_consecutive(deals: &[CompletedDeal]) -> (usize, usize) {
    let mut max_wins = 0usize;
    let mut max_losses = 0usize;
    let mut current_wins = 0usize;
    let mut current_losses = 0usize;

    for deal in deals {
        if deal.pnl > 0.0 {
            current_wins += 1;
            current_losses = 0;
        } else if deal.pnl < 0.0 {
            current_losses += 1;
            current_wins = 0;
        }
        max_wins = max_wins.max(current_wins);
        max_losses = max_losses.max(current_losses);
    }
    (max_wins, max_losses)
}
