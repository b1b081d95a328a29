use std::path::Path;

use crate::errors::AppError;
use crate::models::deal::{CompletedDeal, DealType, OpenDeal, Signal};
use crate::models::result::LedgerMetrics;

fn side(deal_type: DealType) -> &'static str {
    match deal_type {
        DealType::Long => "Long",
        DealType::Short => "Short",
    }
}

fn signal_label(signal: Signal) -> String {
    match signal {
        Signal::LongEntry => "Long Entry".into(),
        Signal::ShortEntry => "Short Entry".into(),
        Signal::StopLoss => "Stop Loss".into(),
        Signal::TrailingStop => "Trailing Stop".into(),
        Signal::TakeProfit(n) => format!("Take Profit {}", n),
        Signal::ExitRule => "Exit Rule".into(),
        Signal::Liquidation => "Liquidation".into(),
    }
}

fn timestamp(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn create_writer(path: &Path) -> Result<csv::Writer<std::fs::File>, AppError> {
    csv::Writer::from_path(path)
        .map_err(|e| AppError::FileWrite(format!("Cannot create CSV: {}", e)))
}

/// Write the completed-deal ledger to a CSV file, one row per closed slice.
pub fn write_completed_deals_csv(deals: &[CompletedDeal], path: &Path) -> Result<(), AppError> {
    let mut wtr = create_writer(path)?;

    wtr.write_record([
        "Type",
        "Entry Signal",
        "Exit Signal",
        "Entry Time",
        "Exit Time",
        "Entry Price",
        "Exit Price",
        "Size",
        "P&L",
        "P&L %",
        "Cum P&L",
        "Cum P&L %",
        "Commission",
    ])
    .map_err(|e| AppError::FileWrite(e.to_string()))?;

    for d in deals {
        wtr.write_record([
            side(d.deal_type).to_string(),
            signal_label(d.entry_signal),
            signal_label(d.exit_signal),
            timestamp(d.entry_time),
            timestamp(d.exit_time),
            format!("{:.6}", d.entry_price),
            format!("{:.6}", d.exit_price),
            format!("{:.6}", d.size),
            format!("{:.2}", d.pnl),
            format!("{:.2}", d.pnl_pct),
            format!("{:.2}", d.cum_pnl),
            format!("{:.2}", d.cum_pnl_pct),
            format!("{:.2}", d.commission),
        ])
        .map_err(|e| AppError::FileWrite(e.to_string()))?;
    }

    wtr.flush().map_err(|e| AppError::FileWrite(e.to_string()))?;
    Ok(())
}

/// Write the open-deal view (zero or one rows) to a CSV file.
pub fn write_open_deals_csv(deals: &[OpenDeal], path: &Path) -> Result<(), AppError> {
    let mut wtr = create_writer(path)?;

    wtr.write_record(["Type", "Entry Signal", "Entry Time", "Entry Price", "Remaining Size"])
        .map_err(|e| AppError::FileWrite(e.to_string()))?;

    for d in deals {
        wtr.write_record([
            side(d.deal_type).to_string(),
            signal_label(d.entry_signal),
            timestamp(d.entry_time),
            format!("{:.6}", d.entry_price),
            format!("{:.6}", d.remaining_size),
        ])
        .map_err(|e| AppError::FileWrite(e.to_string()))?;
    }

    wtr.flush().map_err(|e| AppError::FileWrite(e.to_string()))?;
    Ok(())
}

/// Write ledger metrics as a key-value CSV report.
pub fn write_metrics_csv(metrics: &LedgerMetrics, path: &Path) -> Result<(), AppError> {
    let mut wtr = create_writer(path)?;

    wtr.write_record(["Metric", "Value"])
        .map_err(|e| AppError::FileWrite(e.to_string()))?;

    let rows: Vec<(&str, String)> = vec![
        // Deals
        ("Total Deals", metrics.total_deals.to_string()),
        ("Winning Deals", metrics.winning_deals.to_string()),
        ("Losing Deals", metrics.losing_deals.to_string()),
        ("Win Rate %", format!("{:.2}", metrics.win_rate_pct)),
        // P&L
        ("Gross Profit", format!("{:.2}", metrics.gross_profit)),
        ("Gross Loss", format!("{:.2}", metrics.gross_loss)),
        ("Net Profit", format!("{:.2}", metrics.net_profit)),
        ("Total Commission", format!("{:.2}", metrics.total_commission)),
        ("Profit Factor", format!("{:.2}", metrics.profit_factor)),
        ("Avg Deal", format!("{:.2}", metrics.avg_deal)),
        ("Largest Win", format!("{:.2}", metrics.largest_win)),
        ("Largest Loss", format!("{:.2}", metrics.largest_loss)),
        // Risk
        ("Max Drawdown", format!("{:.2}", metrics.max_drawdown)),
        ("Sharpe Ratio", format!("{:.2}", metrics.sharpe_ratio)),
        // Consistency
        ("Max Consecutive Wins", metrics.max_consecutive_wins.to_string()),
        ("Max Consecutive Losses", metrics.max_consecutive_losses.to_string()),
    ];

    for (name, value) in &rows {
        wtr.write_record([*name, value.as_str()])
            .map_err(|e| AppError::FileWrite(e.to_string()))?;
    }

    wtr.flush().map_err(|e| AppError::FileWrite(e.to_string()))?;
    Ok(())
}
