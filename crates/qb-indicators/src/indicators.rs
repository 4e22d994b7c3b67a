const NAN: f64 = f64::NAN;

/// MACD output: DIF, DEA and the histogram `(DIF - DEA) * 2`.
#[derive(Clone, Debug, PartialEq)]
pub struct MacdResult {
    pub dif: Vec<f64>,
    pub dea: Vec<f64>,
    pub macd: Vec<f64>,
}

/// KDJ output.
#[derive(Clone, Debug, PartialEq)]
pub struct KdjResult {
    pub k: Vec<f64>,
    pub d: Vec<f64>,
    pub j: Vec<f64>,
}

/// Bollinger band output.
#[derive(Clone, Debug, PartialEq)]
pub struct BollResult {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
}

/// DMI output: +DI, -DI and ADX.
#[derive(Clone, Debug, PartialEq)]
pub struct DmiResult {
    pub plus_di: Vec<f64>,
    pub minus_di: Vec<f64>,
    pub adx: Vec<f64>,
}

fn mean(window: &[f64]) -> f64 {
    if window.is_empty() {
        return NAN;
    }
    window.iter().sum::<f64>() / window.len() as f64
}

/// Sample standard deviation (ddof = 1). NaN for windows shorter than 2.
fn sample_std(window: &[f64]) -> f64 {
    if window.len() < 2 {
        return NAN;
    }
    let m = mean(window);
    let var = window.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / (window.len() - 1) as f64;
    var.sqrt()
}

/// Simple moving average.
pub fn ma(close: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![NAN; close.len()];
    if period == 0 {
        return out;
    }
    for i in (period - 1)..close.len() {
        out[i] = mean(&close[i + 1 - period..=i]);
    }
    out
}

/// Exponential moving average. Seeded with the simple mean of the first
/// `period` values; smoothing factor `min(2 / period, 1)`.
pub fn ema(close: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![NAN; close.len()];
    if period == 0 || close.len() < period {
        return out;
    }
    let alpha = (2.0 / period as f64).min(1.0);
    out[period - 1] = mean(&close[..period]);
    for i in period..close.len() {
        out[i] = close[i] * alpha + out[i - 1] * (1.0 - alpha);
    }
    out
}

/// Linearly weighted moving average (weights 1..=period).
pub fn wma(close: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![NAN; close.len()];
    if period == 0 {
        return out;
    }
    let weight_sum = (period * (period + 1)) as f64 / 2.0;
    for i in (period - 1)..close.len() {
        let window = &close[i + 1 - period..=i];
        let weighted: f64 = window
            .iter()
            .enumerate()
            .map(|(k, x)| x * (k + 1) as f64)
            .sum();
        out[i] = weighted / weight_sum;
    }
    out
}

/// MACD. DEA is seeded from the mean of the first `signal_period` defined
/// DIF values, then smoothed with `alpha = 2 / (signal_period + 1)`.
pub fn macd(close: &[f64], fast_period: usize, slow_period: usize, signal_period: usize) -> MacdResult {
    let len = close.len();
    let ema_fast = ema(close, fast_period);
    let ema_slow = ema(close, slow_period);

    let dif: Vec<f64> = ema_fast
        .iter()
        .zip(ema_slow.iter())
        .map(|(f, s)| f - s)
        .collect();

    let mut dea = vec![NAN; len];
    if signal_period > 0 && slow_period > 0 && slow_period <= len {
        let alpha = 2.0 / (signal_period as f64 + 1.0);
        let first_valid = slow_period - 1;
        let seed_window: Vec<f64> = dif
            .iter()
            .skip(first_valid)
            .take(signal_period)
            .copied()
            .filter(|v| !v.is_nan())
            .collect();
        if seed_window.len() >= signal_period {
            let seed_at = first_valid + signal_period - 1;
            dea[seed_at] = mean(&seed_window);
            for i in (seed_at + 1)..len {
                if !dif[i].is_nan() && !dea[i - 1].is_nan() {
                    dea[i] = dif[i] * alpha + dea[i - 1] * (1.0 - alpha);
                }
            }
        }
    }

    let histogram: Vec<f64> = dif.iter().zip(dea.iter()).map(|(a, b)| (a - b) * 2.0).collect();

    MacdResult {
        dif,
        dea,
        macd: histogram,
    }
}

/// KDJ stochastic. K/D series start at 50 ahead of the first RSV; the first
/// defined K and D equal the first RSV; J = 3K - 2D.
pub fn kdj(high: &[f64], low: &[f64], close: &[f64], n: usize, m1: usize, m2: usize) -> KdjResult {
    let len = close.len().min(high.len()).min(low.len());
    let mut k = vec![50.0; len];
    let mut d = vec![50.0; len];
    let mut j = vec![NAN; len];
    if n == 0 || m1 == 0 || m2 == 0 || len < n {
        return KdjResult { k, d, j };
    }

    for i in (n - 1)..len {
        let window_high = high[i + 1 - n..=i].iter().cloned().fold(f64::MIN, f64::max);
        let window_low = low[i + 1 - n..=i].iter().cloned().fold(f64::MAX, f64::min);

        let rsv = if window_high != window_low {
            (close[i] - window_low) / (window_high - window_low) * 100.0
        } else {
            50.0
        };

        if i == n - 1 {
            k[i] = rsv;
            d[i] = k[i];
        } else {
            k[i] = k[i - 1] * (m1 as f64 - 1.0) / m1 as f64 + rsv / m1 as f64;
            d[i] = d[i - 1] * (m2 as f64 - 1.0) / m2 as f64 + k[i] / m2 as f64;
        }

        j[i] = 3.0 * k[i] - 2.0 * d[i];
    }

    KdjResult { k, d, j }
}

/// RSI with simple-average smoothing. 100 where the average loss is zero.
pub fn rsi(close: &[f64], period: usize) -> Vec<f64> {
    let len = close.len();
    let mut out = vec![NAN; len];
    if period == 0 || len < 2 {
        return out;
    }

    let mut gains = vec![0.0; len - 1];
    let mut losses = vec![0.0; len - 1];
    for i in 1..len {
        let delta = close[i] - close[i - 1];
        if delta > 0.0 {
            gains[i - 1] = delta;
        } else if delta < 0.0 {
            losses[i - 1] = -delta;
        }
    }

    for i in period..len {
        let avg_gain = mean(&gains[i - period..i]);
        let avg_loss = mean(&losses[i - period..i]);
        out[i] = if avg_loss == 0.0 {
            100.0
        } else {
            let rs = avg_gain / avg_loss;
            100.0 - 100.0 / (1.0 + rs)
        };
    }
    out
}

/// RSI with Wilder-style exponential smoothing (`alpha = 1 / period`).
pub fn rsi_ema(close: &[f64], period: usize) -> Vec<f64> {
    let len = close.len();
    let mut out = vec![NAN; len];
    if period == 0 || len <= period {
        return out;
    }

    let mut gains = vec![0.0; len - 1];
    let mut losses = vec![0.0; len - 1];
    for i in 1..len {
        let delta = close[i] - close[i - 1];
        if delta > 0.0 {
            gains[i - 1] = delta;
        } else if delta < 0.0 {
            losses[i - 1] = -delta;
        }
    }

    let alpha = 1.0 / period as f64;
    let mut avg_gain = mean(&gains[..period]);
    let mut avg_loss = mean(&losses[..period]);

    for i in period..len {
        avg_gain = gains[i - 1] * alpha + avg_gain * (1.0 - alpha);
        avg_loss = losses[i - 1] * alpha + avg_loss * (1.0 - alpha);
        out[i] = if avg_loss == 0.0 {
            100.0
        } else {
            let rs = avg_gain / avg_loss;
            100.0 - 100.0 / (1.0 + rs)
        };
    }
    out
}

/// Bollinger bands: middle = MA(period), bands at `k` sample standard
/// deviations.
pub fn boll(close: &[f64], period: usize, k: f64) -> BollResult {
    let len = close.len();
    let middle = ma(close, period);
    let mut upper = vec![NAN; len];
    let mut lower = vec![NAN; len];
    if period == 0 {
        return BollResult {
            upper,
            middle,
            lower,
        };
    }
    for i in (period - 1)..len {
        let std = sample_std(&close[i + 1 - period..=i]);
        upper[i] = middle[i] + k * std;
        lower[i] = middle[i] - k * std;
    }
    BollResult {
        upper,
        middle,
        lower,
    }
}

fn true_range(high: &[f64], low: &[f64], close: &[f64], len: usize) -> Vec<f64> {
    let mut tr = vec![NAN; len];
    if len == 0 {
        return tr;
    }
    tr[0] = high[0] - low[0];
    for i in 1..len {
        tr[i] = (high[i] - low[i])
            .max((high[i] - close[i - 1]).abs())
            .max((low[i] - close[i - 1]).abs());
    }
    tr
}

/// Average true range, Wilder smoothing (`alpha = 1 / period`).
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<f64> {
    let len = close.len().min(high.len()).min(low.len());
    let mut out = vec![NAN; len];
    if period == 0 || len < period {
        return out;
    }
    let tr = true_range(high, low, close, len);
    out[period - 1] = mean(&tr[..period]);
    let alpha = 1.0 / period as f64;
    for i in period..len {
        out[i] = tr[i] * alpha + out[i - 1] * (1.0 - alpha);
    }
    out
}

/// Commodity channel index over the typical price `(H + L + C) / 3`.
pub fn cci(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<f64> {
    let len = close.len().min(high.len()).min(low.len());
    let mut out = vec![NAN; len];
    if period == 0 || len < period {
        return out;
    }
    let tp: Vec<f64> = (0..len).map(|i| (high[i] + low[i] + close[i]) / 3.0).collect();
    for i in (period - 1)..len {
        let window = &tp[i + 1 - period..=i];
        let m = mean(window);
        let md = window.iter().map(|x| (x - m).abs()).sum::<f64>() / period as f64;
        out[i] = if md != 0.0 { (tp[i] - m) / (0.015 * md) } else { 0.0 };
    }
    out
}

/// On-balance volume.
pub fn obv(close: &[f64], volume: &[f64]) -> Vec<f64> {
    let len = close.len().min(volume.len());
    let mut out = vec![0.0; len];
    if len == 0 {
        return out;
    }
    out[0] = volume[0];
    for i in 1..len {
        out[i] = if close[i] > close[i - 1] {
            out[i - 1] + volume[i]
        } else if close[i] < close[i - 1] {
            out[i - 1] - volume[i]
        } else {
            out[i - 1]
        };
    }
    out
}

/// Session-cumulative volume-weighted average of the typical price.
pub fn vwap(high: &[f64], low: &[f64], close: &[f64], volume: &[f64]) -> Vec<f64> {
    let len = close.len().min(high.len()).min(low.len()).min(volume.len());
    let mut out = vec![NAN; len];
    let mut cum_tp_vol = 0.0;
    let mut cum_vol = 0.0;
    for i in 0..len {
        let tp = (high[i] + low[i] + close[i]) / 3.0;
        cum_tp_vol += tp * volume[i];
        cum_vol += volume[i];
        out[i] = cum_tp_vol / cum_vol;
    }
    out
}

/// Wilder running-sum smoothing used by DMI.
fn wilder_smooth(data: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![NAN; data.len()];
    if period == 0 || data.len() < period {
        return out;
    }
    out[period - 1] = data[..period].iter().sum();
    for i in period..data.len() {
        out[i] = out[i - 1] - out[i - 1] / period as f64 + data[i];
    }
    out
}

/// Directional movement: +DI, -DI and ADX (ADX is the MA of DX).
pub fn dmi(high: &[f64], low: &[f64], close: &[f64], period: usize) -> DmiResult {
    let len = close.len().min(high.len()).min(low.len());
    let mut plus_di = vec![NAN; len];
    let mut minus_di = vec![NAN; len];
    if period == 0 || len == 0 {
        return DmiResult {
            plus_di,
            minus_di,
            adx: vec![NAN; len],
        };
    }

    let mut plus_dm = vec![0.0; len];
    let mut minus_dm = vec![0.0; len];
    for i in 1..len {
        let up_move = high[i] - high[i - 1];
        let down_move = low[i - 1] - low[i];
        if up_move > down_move && up_move > 0.0 {
            plus_dm[i] = up_move;
        }
        if down_move > up_move && down_move > 0.0 {
            minus_dm[i] = down_move;
        }
    }

    let tr = true_range(high, low, close, len);
    let smoothed_tr = wilder_smooth(&tr, period);
    let smoothed_plus = wilder_smooth(&plus_dm, period);
    let smoothed_minus = wilder_smooth(&minus_dm, period);

    let mut dx = vec![NAN; len];
    for i in period.saturating_sub(1)..len {
        if !smoothed_tr[i].is_nan() && smoothed_tr[i] != 0.0 {
            plus_di[i] = 100.0 * smoothed_plus[i] / smoothed_tr[i];
            minus_di[i] = 100.0 * smoothed_minus[i] / smoothed_tr[i];
        }
        if !plus_di[i].is_nan() && !minus_di[i].is_nan() && plus_di[i] + minus_di[i] != 0.0 {
            dx[i] = 100.0 * (plus_di[i] - minus_di[i]).abs() / (plus_di[i] + minus_di[i]);
        }
    }

    let adx = ma(&dx, period);

    DmiResult {
        plus_di,
        minus_di,
        adx,
    }
}

/// `true` where `a` strictly crossed above `b` in the last step.
pub fn cross_over(a: &[f64], b: &[f64]) -> Vec<bool> {
    let len = a.len().min(b.len());
    let mut out = vec![false; len];
    for i in 1..len {
        if a[i].is_nan() || b[i].is_nan() || a[i - 1].is_nan() || b[i - 1].is_nan() {
            continue;
        }
        if a[i - 1] <= b[i - 1] && a[i] > b[i] {
            out[i] = true;
        }
    }
    out
}

/// `true` where `a` crossed below `b` in the last step while falling.
pub fn cross_under(a: &[f64], b: &[f64]) -> Vec<bool> {
    let len = a.len().min(b.len());
    let mut out = vec![false; len];
    for i in 1..len {
        if a[i].is_nan() || b[i].is_nan() || a[i - 1].is_nan() || b[i - 1].is_nan() {
            continue;
        }
        if a[i - 1] >= b[i - 1] && a[i] <= b[i] && a[i] < a[i - 1] {
            out[i] = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn ma_basic_window() {
        let out = ma(&[1.0, 2.0, 3.0, 4.0, 5.0], 3);
        assert!(out[0].is_nan());
        assert!(out[1].is_nan());
        assert!(approx(out[2], 2.0));
        assert!(approx(out[3], 3.0));
        assert!(approx(out[4], 4.0));
    }

    #[test]
    fn ma_short_input_is_all_nan() {
        let out = ma(&[1.0, 2.0], 5);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn ema_seeds_with_simple_mean() {
        let out = ema(&[1.0, 2.0, 3.0, 4.0], 2);
        assert!(out[0].is_nan());
        assert!(approx(out[1], 1.5));
        // alpha = 1.0 for period 2 (min(2/2, 1)), so EMA tracks the input.
        assert!(approx(out[2], 3.0));
        assert!(approx(out[3], 4.0));
    }

    #[test]
    fn wma_weights_recent_values_heavier() {
        let out = wma(&[1.0, 2.0, 3.0], 3);
        // (1*1 + 2*2 + 3*3) / 6
        assert!(approx(out[2], 14.0 / 6.0));
    }

    #[test]
    fn macd_histogram_is_twice_the_spread() {
        let close: Vec<f64> = (1..=60).map(|i| 10.0 + i as f64 * 0.1).collect();
        let out = macd(&close, 12, 26, 9);
        let last = close.len() - 1;
        assert!(!out.dif[last].is_nan());
        assert!(!out.dea[last].is_nan());
        assert!(approx(out.macd[last], (out.dif[last] - out.dea[last]) * 2.0));
        // Leading positions undefined.
        assert!(out.dif[0].is_nan());
        assert!(out.dea[26 + 9 - 3].is_nan());
    }

    #[test]
    fn kdj_flat_window_pins_rsv_at_50() {
        let high = vec![10.0; 12];
        let low = vec![10.0; 12];
        let close = vec![10.0; 12];
        let out = kdj(&high, &low, &close, 9, 3, 3);
        assert!(approx(out.k[8], 50.0));
        assert!(approx(out.d[8], 50.0));
        assert!(approx(out.j[8], 50.0));
    }

    #[test]
    fn kdj_first_defined_value_equals_rsv() {
        let high = vec![11.0, 12.0, 13.0];
        let low = vec![9.0, 10.0, 11.0];
        let close = vec![10.0, 11.0, 12.5];
        let out = kdj(&high, &low, &close, 3, 3, 3);
        // RSV = (12.5 - 9) / (13 - 9) * 100 = 87.5
        assert!(approx(out.k[2], 87.5));
        assert!(approx(out.d[2], 87.5));
        assert!(approx(out.j[2], 87.5));
    }

    #[test]
    fn rsi_is_100_without_losses() {
        let close: Vec<f64> = (0..20).map(|i| 10.0 + i as f64).collect();
        let out = rsi(&close, 14);
        assert!(approx(out[14], 100.0));
        assert!(out[13].is_nan());
    }

    #[test]
    fn rsi_balanced_moves_near_50() {
        let close = vec![10.0, 11.0, 10.0, 11.0, 10.0, 11.0, 10.0];
        let out = rsi(&close, 4);
        // Two gains of 1 and two losses of 1 in each window.
        assert!(approx(out[4], 50.0));
    }

    #[test]
    fn rsi_ema_short_input_all_nan() {
        let out = rsi_ema(&[1.0, 2.0, 3.0], 14);
        assert!(out.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn boll_bands_bracket_the_middle() {
        let close: Vec<f64> = (0..25).map(|i| 10.0 + (i % 5) as f64 * 0.2).collect();
        let out = boll(&close, 20, 2.0);
        let last = close.len() - 1;
        assert!(out.upper[last] > out.middle[last]);
        assert!(out.lower[last] < out.middle[last]);
        assert!(out.upper[18].is_nan());
    }

    #[test]
    fn atr_flat_series_is_zero() {
        let n = 20;
        let high = vec![10.0; n];
        let low = vec![10.0; n];
        let close = vec![10.0; n];
        let out = atr(&high, &low, &close, 14);
        assert!(approx(out[14], 0.0));
    }

    #[test]
    fn atr_seeds_with_tr_mean() {
        let high = vec![11.0, 12.0, 13.0];
        let low = vec![9.0, 10.0, 11.0];
        let close = vec![10.0, 11.0, 12.0];
        let out = atr(&high, &low, &close, 2);
        // TR = [2, 2, 2] -> ATR[1] = 2, ATR[2] = 2.
        assert!(approx(out[1], 2.0));
        assert!(approx(out[2], 2.0));
    }

    #[test]
    fn cci_zero_when_deviation_zero() {
        let n = 25;
        let high = vec![10.0; n];
        let low = vec![10.0; n];
        let close = vec![10.0; n];
        let out = cci(&high, &low, &close, 20);
        assert!(approx(out[n - 1], 0.0));
    }

    #[test]
    fn obv_accumulates_signed_volume() {
        let close = vec![10.0, 11.0, 10.5, 10.5];
        let volume = vec![100.0, 200.0, 50.0, 30.0];
        let out = obv(&close, &volume);
        assert!(approx(out[0], 100.0));
        assert!(approx(out[1], 300.0));
        assert!(approx(out[2], 250.0));
        assert!(approx(out[3], 250.0));
    }

    #[test]
    fn vwap_single_bar_equals_typical_price() {
        let out = vwap(&[12.0], &[8.0], &[10.0], &[500.0]);
        assert!(approx(out[0], 10.0));
    }

    #[test]
    fn dmi_trending_market_has_positive_plus_di() {
        let n = 40;
        let high: Vec<f64> = (0..n).map(|i| 10.5 + i as f64 * 0.3).collect();
        let low: Vec<f64> = (0..n).map(|i| 9.5 + i as f64 * 0.3).collect();
        let close: Vec<f64> = (0..n).map(|i| 10.0 + i as f64 * 0.3).collect();
        let out = dmi(&high, &low, &close, 14);
        let last = n - 1;
        assert!(out.plus_di[last] > out.minus_di[last]);
        assert!(!out.adx[last].is_nan());
    }

    #[test]
    fn cross_over_fires_only_on_the_step() {
        let a = vec![1.0, 2.0, 3.0, 4.0];
        let b = vec![2.5, 2.5, 2.5, 2.5];
        let out = cross_over(&a, &b);
        assert_eq!(out, vec![false, false, true, false]);
    }

    #[test]
    fn cross_over_ignores_undefined_values() {
        let a = vec![NAN, 2.0, 3.0];
        let b = vec![2.5, 2.5, 2.5];
        let out = cross_over(&a, &b);
        assert_eq!(out, vec![false, false, true]);
    }

    #[test]
    fn cross_under_requires_a_falling() {
        let a = vec![3.0, 2.0, 2.0];
        let b = vec![2.5, 2.5, 2.5];
        let out = cross_under(&a, &b);
        // Step 1: a falls through b. Step 2: a stays below but is not falling.
        assert_eq!(out, vec![false, true, false]);
    }

    #[test]
    fn empty_inputs_do_not_panic() {
        assert!(ma(&[], 5).is_empty());
        assert!(ema(&[], 5).is_empty());
        assert!(rsi(&[], 14).is_empty());
        assert!(obv(&[], &[]).is_empty());
        let out = macd(&[], 12, 26, 9);
        assert!(out.dif.is_empty());
    }
}
