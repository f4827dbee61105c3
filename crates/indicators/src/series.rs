//! Full-series indicator math. Every function returns a vector aligned to
//! the *end* of its input: the last element always corresponds to the last
//! input bar, and the warm-up window is consumed from the front.

/// Simple moving average. Output length: `values.len() - period + 1`.
pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(values.len() - period + 1);
    let mut sum: f64 = values[..period].iter().sum();
    out.push(sum / period as f64);
    for i in period..values.len() {
        sum += values[i] - values[i - period];
        out.push(sum / period as f64);
    }
    out
}

/// Exponential moving average, seeded with the SMA of the first `period`
/// values. Output length: `values.len() - period + 1`.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let seed: f64 = values[..period].iter().sum::<f64>() / period as f64;

    let mut out = Vec::with_capacity(values.len() - period + 1);
    out.push(seed);
    let mut prev = seed;
    for &v in &values[period..] {
        prev = (v - prev) * alpha + prev;
        out.push(prev);
    }
    out
}

/// Relative Strength Index with Wilder's smoothing.
///
/// Average gain/loss are seeded with the SMA of the first `period` deltas
/// and then smoothed as `(prev * (period - 1) + current) / period`.
/// Output length: `closes.len() - period`.
///
/// A flat market (no gains, no losses) reads 50; an all-gain market reads
/// 100 and an all-loss market reads 0.
pub fn rsi(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period + 1 {
        return Vec::new();
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let period_f = period as f64;

    let (sum_gain, sum_loss) = deltas[..period]
        .iter()
        .fold((0.0_f64, 0.0_f64), |(g, l), &d| {
            if d > 0.0 { (g + d, l) } else { (g, l - d) }
        });
    let mut avg_gain = sum_gain / period_f;
    let mut avg_loss = sum_loss / period_f;

    let mut out = Vec::with_capacity(deltas.len() - period + 1);
    out.push(rsi_value(avg_gain, avg_loss));

    for &d in &deltas[period..] {
        let gain = d.max(0.0);
        let loss = (-d).max(0.0);
        avg_gain = (avg_gain * (period_f - 1.0) + gain) / period_f;
        avg_loss = (avg_loss * (period_f - 1.0) + loss) / period_f;
        out.push(rsi_value(avg_gain, avg_loss));
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_gain == 0.0 && avg_loss == 0.0 {
        // No movement at all: neutral.
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

/// Money Flow Index: volume-weighted RSI over the typical price, with the
/// same Wilder smoothing of positive/negative money flow.
/// Output length: `len - period` (one typical-price delta consumed).
pub fn mfi(highs: &[f64], lows: &[f64], closes: &[f64], volumes: &[f64], period: usize) -> Vec<f64> {
    let len = closes.len();
    if period == 0 || len < period + 1 || highs.len() != len || lows.len() != len || volumes.len() != len {
        return Vec::new();
    }

    let tp: Vec<f64> = (0..len).map(|i| (highs[i] + lows[i] + closes[i]) / 3.0).collect();

    // Signed raw money flow per bar transition.
    let flows: Vec<(f64, f64)> = tp
        .windows(2)
        .enumerate()
        .map(|(i, w)| {
            let raw = w[1] * volumes[i + 1];
            if w[1] > w[0] {
                (raw, 0.0)
            } else if w[1] < w[0] {
                (0.0, raw)
            } else {
                (0.0, 0.0)
            }
        })
        .collect();

    let period_f = period as f64;
    let (sum_pos, sum_neg) = flows[..period]
        .iter()
        .fold((0.0_f64, 0.0_f64), |(p, n), &(fp, fnn)| (p + fp, n + fnn));
    let mut avg_pos = sum_pos / period_f;
    let mut avg_neg = sum_neg / period_f;

    let mut out = Vec::with_capacity(flows.len() - period + 1);
    out.push(rsi_value(avg_pos, avg_neg));

    for &(fp, fnn) in &flows[period..] {
        avg_pos = (avg_pos * (period_f - 1.0) + fp) / period_f;
        avg_neg = (avg_neg * (period_f - 1.0) + fnn) / period_f;
        out.push(rsi_value(avg_pos, avg_neg));
    }
    out
}

/// Commodity Channel Index over the typical price:
/// `(tp - sma(tp)) / (0.015 * mean_deviation)`.
/// A flat window (zero deviation) reads 0. Output length: `len - period + 1`.
pub fn cci(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Vec<f64> {
    let len = closes.len();
    if period == 0 || len < period || highs.len() != len || lows.len() != len {
        return Vec::new();
    }

    let tp: Vec<f64> = (0..len).map(|i| (highs[i] + lows[i] + closes[i]) / 3.0).collect();

    let mut out = Vec::with_capacity(len - period + 1);
    for window in tp.windows(period) {
        let mean = window.iter().sum::<f64>() / period as f64;
        let mad = window.iter().map(|v| (v - mean).abs()).sum::<f64>() / period as f64;
        let last = window[period - 1];
        if mad == 0.0 {
            out.push(0.0);
        } else {
            out.push((last - mean) / (0.015 * mad));
        }
    }
    out
}

/// Average True Range with Wilder's smoothing, seeded with the SMA of the
/// first `period` true ranges. Output length: `len - period`.
///
/// A constant series has zero range and therefore zero ATR.
pub fn atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Vec<f64> {
    let len = closes.len();
    if period == 0 || len < period + 1 || highs.len() != len || lows.len() != len {
        return Vec::new();
    }

    // True range needs the previous close, so the series starts at bar 1.
    let tr: Vec<f64> = (1..len)
        .map(|i| {
            let hl = highs[i] - lows[i];
            let hc = (highs[i] - closes[i - 1]).abs();
            let lc = (lows[i] - closes[i - 1]).abs();
            hl.max(hc).max(lc)
        })
        .collect();

    let period_f = period as f64;
    let mut prev = tr[..period].iter().sum::<f64>() / period_f;

    let mut out = Vec::with_capacity(tr.len() - period + 1);
    out.push(prev);
    for &t in &tr[period..] {
        prev = (prev * (period_f - 1.0) + t) / period_f;
        out.push(prev);
    }
    out
}

/// The three MACD component series, each aligned to the end of the input.
pub struct MacdSeries {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

/// MACD: `ema(fast) - ema(slow)`, its signal EMA, and their difference.
///
/// All three series are end-aligned; `macd` is longer than `signal` and
/// `histogram` by the signal warm-up.
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal_period: usize) -> MacdSeries {
    let fast_ema = ema(closes, fast);
    let slow_ema = ema(closes, slow);
    if fast_ema.is_empty() || slow_ema.is_empty() {
        return MacdSeries { macd: Vec::new(), signal: Vec::new(), histogram: Vec::new() };
    }

    // End-align the two EMAs and subtract.
    let n = fast_ema.len().min(slow_ema.len());
    let fa = &fast_ema[fast_ema.len() - n..];
    let sl = &slow_ema[slow_ema.len() - n..];
    let macd_line: Vec<f64> = fa.iter().zip(sl).map(|(f, s)| f - s).collect();

    let signal_line = ema(&macd_line, signal_period);
    let m = signal_line.len();
    let histogram: Vec<f64> = macd_line[macd_line.len() - m..]
        .iter()
        .zip(&signal_line)
        .map(|(mac, sig)| mac - sig)
        .collect();

    MacdSeries { macd: macd_line, signal: signal_line, histogram }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(n: usize) -> Vec<f64> {
        vec![100.0; n]
    }

    #[test]
    fn sma_basics() {
        let out = sma(&[1.0, 2.0, 3.0, 4.0, 5.0], 3);
        assert_eq!(out, vec![2.0, 3.0, 4.0]);
        assert!(sma(&[1.0, 2.0], 3).is_empty());
    }

    #[test]
    fn ema_seeds_with_sma_and_converges() {
        let out = ema(&[2.0, 4.0, 6.0, 6.0, 6.0, 6.0, 6.0, 6.0], 3);
        assert!((out[0] - 4.0).abs() < 1e-12);
        // With a constant tail the EMA converges toward the input value.
        assert!((out.last().unwrap() - 6.0).abs() < 0.2);
    }

    #[test]
    fn rsi_is_50_on_a_flat_series() {
        let out = rsi(&flat(40), 14);
        assert!(!out.is_empty());
        for v in out {
            assert!((v - 50.0).abs() < 1e-12);
        }
    }

    #[test]
    fn rsi_extremes() {
        let up: Vec<f64> = (1..=40).map(|x| x as f64).collect();
        for v in rsi(&up, 14) {
            assert!((v - 100.0).abs() < 1e-9);
        }
        let down: Vec<f64> = (1..=40).rev().map(|x| x as f64).collect();
        for v in rsi(&down, 14) {
            assert!(v.abs() < 1e-9);
        }
    }

    #[test]
    fn rsi_warm_up_consumes_period_bars() {
        assert!(rsi(&flat(14), 14).is_empty());
        assert_eq!(rsi(&flat(15), 14).len(), 1);
        assert_eq!(rsi(&flat(20), 14).len(), 6);
    }

    #[test]
    fn atr_is_zero_on_a_constant_series() {
        let n = 30;
        let out = atr(&flat(n), &flat(n), &flat(n), 14);
        assert!(!out.is_empty());
        for v in out {
            assert!(v.abs() < 1e-12);
        }
    }

    #[test]
    fn atr_tracks_bar_range() {
        // Constant 2-point range, no gaps: ATR must be exactly 2.
        let n = 30;
        let highs = vec![101.0; n];
        let lows = vec![99.0; n];
        let closes = vec![100.0; n];
        for v in atr(&highs, &lows, &closes, 14) {
            assert!((v - 2.0).abs() < 1e-12);
        }
    }

    #[test]
    fn cci_is_zero_on_a_flat_window() {
        let n = 30;
        let out = cci(&flat(n), &flat(n), &flat(n), 20);
        for v in out {
            assert_eq!(v, 0.0);
        }
    }

    #[test]
    fn mfi_is_bounded_and_neutral_when_flat() {
        let n = 30;
        let vols = vec![1000.0; n];
        let out = mfi(&flat(n), &flat(n), &flat(n), &vols, 14);
        assert!(!out.is_empty());
        for v in out {
            assert!((v - 50.0).abs() < 1e-12);
        }
    }

    #[test]
    fn mfi_is_100_when_rising() {
        let n = 40;
        let closes: Vec<f64> = (1..=n).map(|x| x as f64).collect();
        let vols = vec![500.0; n];
        let out = mfi(&closes, &closes, &closes, &vols, 14);
        for v in out {
            assert!((v - 100.0).abs() < 1e-9);
        }
    }

    #[test]
    fn macd_components_are_end_aligned() {
        let closes: Vec<f64> = (0..120).map(|i| 100.0 + (i as f64 * 0.3).sin() * 5.0).collect();
        let out = macd(&closes, 12, 26, 9);
        assert!(!out.macd.is_empty());
        assert!(!out.signal.is_empty());
        assert_eq!(out.signal.len(), out.histogram.len());
        // Tail relation: histogram = macd - signal at the last bar.
        let h = *out.histogram.last().unwrap();
        let m = *out.macd.last().unwrap();
        let s = *out.signal.last().unwrap();
        assert!((h - (m - s)).abs() < 1e-12);
    }
}
