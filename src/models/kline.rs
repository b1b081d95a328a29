use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// A single OHLCV bar. `time` is the bar open time in milliseconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Kline {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Kline {
    pub fn new(time: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Build from a dense `[time_ms, open, high, low, close, volume]` row.
    pub fn from_row(row: [f64; 6]) -> Self {
        Self {
            time: row[0] as i64,
            open: row[1],
            high: row[2],
            low: row[3],
            close: row[4],
            volume: row[5],
        }
    }
}

/// Check the series invariants: non-empty and strictly increasing time.
pub fn validate_klines(klines: &[Kline]) -> Result<(), AppError> {
    if klines.is_empty() {
        return Err(AppError::EmptyKlines);
    }
    for (i, pair) in klines.windows(2).enumerate() {
        if pair[1].time <= pair[0].time {
            return Err(AppError::NonMonotonicTime {
                index: i + 1,
                previous: pair[0].time,
                current: pair[1].time,
            });
        }
    }
    Ok(())
}

/// Most common spacing between consecutive bars, in milliseconds.
pub fn detect_step(klines: &[Kline]) -> Option<i64> {
    let mut counts: std::collections::HashMap<i64, usize> = std::collections::HashMap::new();
    for pair in klines.windows(2) {
        *counts.entry(pair[1].time - pair[0].time).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(step, _)| step)
}
