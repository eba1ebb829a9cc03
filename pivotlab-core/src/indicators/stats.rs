//! Rolling and windowed statistics as pure functions over price slices.

/// Guard added to the standard deviation before dividing.
const STD_FLOOR: f64 = 1e-8;

/// Arithmetic mean. 0.0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1 denominator). 0.0 for fewer than 2 values.
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

/// Deviation of `value` from the mean of the `window` entries of `history`
/// strictly before `index`, in units of their standard deviation.
///
/// Uses whatever trailing history exists when fewer than `window` entries
/// precede `index`; returns 0.0 with fewer than 2.
pub fn trailing_z_score(history: &[f64], index: usize, window: usize, value: f64) -> f64 {
    let end = index.min(history.len());
    let start = end.saturating_sub(window);
    let trailing = &history[start..end];
    if trailing.len() < 2 {
        return 0.0;
    }
    (value - mean(trailing)) / (sample_std(trailing) + STD_FLOOR)
}

/// Simple period returns: (p[t] - p[t-1]) / p[t-1].
pub fn simple_returns(prices: &[f64]) -> Vec<f64> {
    prices
        .windows(2)
        .map(|w| if w[0] > 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect()
}

/// Log returns: ln(p[t] / p[t-1]). Non-positive prices contribute 0.0.
pub fn log_returns(prices: &[f64]) -> Vec<f64> {
    prices
        .windows(2)
        .map(|w| {
            if w[0] > 0.0 && w[1] > 0.0 {
                (w[1] / w[0]).ln()
            } else {
                0.0
            }
        })
        .collect()
}

/// Annualized volatility: sample std of returns scaled by sqrt(periods per year).
pub fn annualized_volatility(returns: &[f64], periods_per_year: f64) -> f64 {
    sample_std(returns) * periods_per_year.sqrt()
}

/// Compound annual return implied by a price path.
///
/// The path is treated as spanning `prices.len() / periods_per_year` years.
/// Returns 0.0 for fewer than 2 prices or a non-positive endpoint.
pub fn annualized_return(prices: &[f64], periods_per_year: f64) -> f64 {
    if prices.len() < 2 {
        return 0.0;
    }
    let first = prices[0];
    let last = prices[prices.len() - 1];
    if first <= 0.0 || last <= 0.0 {
        return 0.0;
    }
    let years = prices.len() as f64 / periods_per_year;
    if years <= 0.0 {
        return 0.0;
    }
    (last / first).powf(1.0 / years) - 1.0
}

/// Sharpe ratio: (annual return - risk free) / annual volatility.
///
/// Returns 0.0 if volatility is zero.
pub fn sharpe_ratio(annual_return: f64, volatility: f64, risk_free_rate: f64) -> f64 {
    if volatility < 1e-15 {
        return 0.0;
    }
    (annual_return - risk_free_rate) / volatility
}

/// Median of a slice, ignoring NaN. None if nothing is left.
pub fn median(values: &[f64]) -> Option<f64> {
    let mut v: Vec<f64> = values.iter().copied().filter(|x| !x.is_nan()).collect();
    if v.is_empty() {
        return None;
    }
    v.sort_by(|a, b| a.total_cmp(b));
    let mid = v.len() / 2;
    if v.len() % 2 == 0 {
        Some((v[mid - 1] + v[mid]) / 2.0)
    } else {
        Some(v[mid])
    }
}
