use serde::{Deserialize, Serialize};

use crate::models::config::WalkForwardConfig;

/// One train/validation split as half-open index ranges into the kline series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub train_start: usize,
    pub train_end: usize,
    pub validation_start: usize,
    pub validation_end: usize,
}

impl Window {
    pub fn train(&self) -> std::ops::Range<usize> {
        self.train_start..self.train_end
    }

    pub fn validation(&self) -> std::ops::Range<usize> {
        self.validation_start..self.validation_end
    }
}

/// Slide `(train, validation)` windows over `total_bars`, starting at 0 and
/// advancing by `step` while the validation range still fits.
///
/// Returns an empty list when any length or the step is zero, or when a
/// single window does not fit.
pub fn build(total_bars: usize, train_len: usize, validation_len: usize, step: usize) -> Vec<Window> {
    if train_len == 0 || validation_len == 0 || step == 0 {
        return Vec::new();
    }
    let span = train_len + validation_len;
    if span > total_bars {
        return Vec::new();
    }

    let mut windows = Vec::with_capacity((total_bars - span) / step + 1);
    let mut start = 0;
    while start + span <= total_bars {
        windows.push(Window {
            train_start: start,
            train_end: start + train_len,
            validation_start: start + train_len,
            validation_end: start + span,
        });
        start += step;
    }
    windows
}

pub fn build_from_config(total_bars: usize, config: &WalkForwardConfig) -> Vec<Window> {
    build(total_bars, config.train_len, config.validation_len, config.step)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_windows() {
        let windows = build(1000, 300, 100, 200);
        assert_eq!(windows.len(), 4);
        assert_eq!(
            windows[0],
            Window {
                train_start: 0,
                train_end: 300,
                validation_start: 300,
                validation_end: 400,
            }
        );
        assert_eq!(windows[3].train_start, 600);
        assert_eq!(windows[3].validation_end, 1000);
        for w in &windows {
            assert_eq!(w.train_end, w.validation_start);
            assert!(w.validation_end <= 1000);
        }
    }

    #[test]
    fn test_exact_fit_single_window() {
        let windows = build(400, 300, 100, 50);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].validation(), 300..400);
    }

    #[test]
    fn test_insufficient_data_is_empty() {
        assert!(build(399, 300, 100, 50).is_empty());
        assert!(build(0, 1, 1, 1).is_empty());
    }

    #[test]
    fn test_zero_lengths_are_empty() {
        assert!(build(1000, 0, 100, 50).is_empty());
        assert!(build(1000, 300, 0, 50).is_empty());
        assert!(build(1000, 300, 100, 0).is_empty());
    }

    #[test]
    fn test_from_config_defaults() {
        let windows = build_from_config(3000, &WalkForwardConfig::default());
        // 1500 + 500 per window, step 500
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[2].train(), 1000..2500);
    }
}
