//! Indicator series used by the built-in strategies. Every function returns a
//! series as long as its input, NaN-padded while the window warms up.

use statrs::statistics::Statistics;

use crate::models::kline::Kline;

/// Column views of a kline series.
pub struct PriceColumns {
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
}

impl PriceColumns {
    pub fn from_klines(klines: &[Kline]) -> Self {
        Self {
            high: klines.iter().map(|k| k.high).collect(),
            low: klines.iter().map(|k| k.low).collect(),
            close: klines.iter().map(|k| k.close).collect(),
        }
    }
}

/// Output buffer for a `period`-bar indicator over `len` inputs, or `None`
/// when the window can never fill.
fn warmup(len: usize, period: usize) -> Option<Vec<f64>> {
    (period > 0 && len >= period).then(|| vec![f64::NAN; len])
}

/// Simple moving average. The first `period - 1` values are NaN.
pub fn sma(data: &[f64], period: usize) -> Vec<f64> {
    let Some(mut out) = warmup(data.len(), period) else {
        return vec![f64::NAN; data.len()];
    };
    let n = period as f64;
    let mut window_sum: f64 = data.iter().take(period).sum();
    out[period - 1] = window_sum / n;
    for (i, (incoming, outgoing)) in data.iter().skip(period).zip(data).enumerate() {
        window_sum += incoming - outgoing;
        out[i + period] = window_sum / n;
    }
    out
}

/// Exponential moving average seeded with the SMA of the first `period` values.
pub fn ema(data: &[f64], period: usize) -> Vec<f64> {
    let Some(mut out) = warmup(data.len(), period) else {
        return vec![f64::NAN; data.len()];
    };
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut prev = data.iter().take(period).sum::<f64>() / period as f64;
    out[period - 1] = prev;
    for (slot, value) in out.iter_mut().zip(data).skip(period) {
        prev += alpha * (value - prev);
        *slot = prev;
    }
    out
}

/// Wilder smoothing. The plain average of `values[first..first + period]`
/// lands at `first + period - 1`; later points use `(prev * (period - 1) + x) / period`.
fn wilder(values: &[f64], first: usize, period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if period == 0 || values.len() < first + period {
        return out;
    }
    let n = period as f64;
    let seed_at = first + period - 1;
    let mut avg = values[first..=seed_at].iter().sum::<f64>() / n;
    out[seed_at] = avg;
    for i in seed_at + 1..values.len() {
        avg = (avg * (n - 1.0) + values[i]) / n;
        out[i] = avg;
    }
    out
}

/// Relative strength index with Wilder smoothing. The first `period` values
/// are NaN; a series with no movement reads 50.
pub fn rsi(close: &[f64], period: usize) -> Vec<f64> {
    let mut ups = vec![0.0; close.len()];
    let mut downs = vec![0.0; close.len()];
    for (i, pair) in close.windows(2).enumerate() {
        let delta = pair[1] - pair[0];
        ups[i + 1] = delta.max(0.0);
        downs[i + 1] = (-delta).max(0.0);
    }
    let avg_up = wilder(&ups, 1, period);
    let avg_down = wilder(&downs, 1, period);
    avg_up
        .iter()
        .zip(&avg_down)
        .map(|(&up, &down)| match (up, down) {
            _ if up.is_nan() || down.is_nan() => f64::NAN,
            (u, d) if d == 0.0 => {
                if u == 0.0 {
                    50.0
                } else {
                    100.0
                }
            }
            (u, d) => 100.0 - 100.0 / (1.0 + u / d),
        })
        .collect()
}

/// Population standard deviation over a rolling window.
pub fn rolling_std(data: &[f64], period: usize) -> Vec<f64> {
    let Some(mut out) = warmup(data.len(), period) else {
        return vec![f64::NAN; data.len()];
    };
    for (i, window) in data.windows(period).enumerate() {
        out[i + period - 1] = window.iter().population_std_dev();
    }
    out
}

/// Bollinger bands as `(upper, middle, lower)`: SMA plus/minus `mult` rolling deviations.
pub fn bollinger_bands(close: &[f64], period: usize, mult: f64) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let middle = sma(close, period);
    let deviation = rolling_std(close, period);
    let (upper, lower) = middle
        .iter()
        .zip(&deviation)
        .map(|(m, d)| (m + mult * d, m - mult * d))
        .unzip();
    (upper, middle, lower)
}

/// Average true range with Wilder smoothing, seeded on the first bar's range.
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<f64> {
    let true_range: Vec<f64> = (0..high.len())
        .map(|i| {
            let range = high[i] - low[i];
            match i.checked_sub(1).map(|p| close[p]) {
                Some(prev) => range.max((high[i] - prev).abs()).max((low[i] - prev).abs()),
                None => range,
            }
        })
        .collect();
    wilder(&true_range, 0, period)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        if a.is_nan() && b.is_nan() {
            return true;
        }
        (a - b).abs() < epsilon
    }

    fn assert_approx(actual: f64, expected: f64, epsilon: f64, msg: &str) {
        assert!(
            approx_eq(actual, expected, epsilon),
            "{}: expected {}, got {}",
            msg,
            expected,
            actual
        );
    }

    #[test]
    fn test_sma_basic() {
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
        let result = sma(&data, 3);
        assert!(result[0].is_nan());
        assert!(result[1].is_nan());
        assert_approx(result[2], 2.0, 1e-10, "SMA[2]");
        assert_approx(result[9], 9.0, 1e-10, "SMA[9]");
    }

    #[test]
    fn test_ema_basic() {
        let data = vec![22.27, 22.19, 22.08, 22.17, 22.18, 22.13, 22.23, 22.43, 22.24, 22.29];
        let result = ema(&data, 5);
        assert!(result[3].is_nan());
        let seed = (22.27 + 22.19 + 22.08 + 22.17 + 22.18) / 5.0;
        assert_approx(result[4], seed, 1e-10, "EMA seed");
        assert_approx(result[5], (22.13 - seed) / 3.0 + seed, 1e-10, "EMA[5]");
    }

    #[test]
    fn test_short_input_is_all_nan() {
        let data = vec![1.0, 2.0];
        assert!(sma(&data, 5).iter().all(|v| v.is_nan()));
        assert!(ema(&data, 0).iter().all(|v| v.is_nan()));
        assert!(atr(&data, &data, &data, 3).iter().all(|v| v.is_nan()));
        assert!(rolling_std(&[], 3).is_empty());
    }

    #[test]
    fn test_rsi_flat_and_rising() {
        let flat = vec![10.0; 20];
        assert_approx(rsi(&flat, 14)[19], 50.0, 1e-10, "flat RSI");
        let rising: Vec<f64> = (0..20).map(|i| i as f64).collect();
        assert_approx(rsi(&rising, 14)[19], 100.0, 1e-10, "rising RSI");
    }

    #[test]
    fn test_bollinger_bands_basic() {
        let data = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let (upper, middle, lower) = bollinger_bands(&data, 8, 2.0);
        // mean 5, population std 2
        assert_approx(middle[7], 5.0, 1e-10, "middle");
        assert_approx(upper[7], 9.0, 1e-10, "upper");
        assert_approx(lower[7], 1.0, 1e-10, "lower");
        assert!(upper[6].is_nan());
    }

    #[test]
    fn test_rsi_known_value() {
        // One up move of 2 and one down move of 1 over period 2.
        let out = rsi(&[10.0, 12.0, 11.0], 2);
        assert!(out[1].is_nan());
        assert_approx(out[2], 100.0 - 100.0 / 3.0, 1e-10, "RSI[2]");
    }

    #[test]
    fn test_atr_basic() {
        let high = vec![48.70, 48.72, 48.90, 48.87, 48.82];
        let low = vec![47.79, 48.14, 48.39, 48.37, 48.24];
        let close = vec![48.16, 48.61, 48.75, 48.63, 48.74];
        let result = atr(&high, &low, &close, 3);
        assert!(result[1].is_nan());
        let seed = ((48.70 - 47.79) + (48.72 - 48.14) + (48.90 - 48.39)) / 3.0;
        assert_approx(result[2], seed, 1e-10, "ATR seed");
        let tr3 = (48.87f64 - 48.37).max((48.87f64 - 48.75).abs());
        assert_approx(result[3], (seed * 2.0 + tr3) / 3.0, 1e-10, "ATR[3]");
    }
}
