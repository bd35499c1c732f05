//! Pure, dependency-free numerical functions over aligned real vectors.
//!
//! Every function here is deterministic and allocates only scratch buffers
//! sized to the input; none of them suspend or perform I/O. Typical inputs
//! are 3-32 samples (one value per correlation ring).

fn mean(v: &[f64]) -> f64 {
    v.iter().sum::<f64>() / v.len() as f64
}

fn variance(v: &[f64], m: f64) -> f64 {
    v.iter().map(|x| (x - m) * (x - m)).sum::<f64>()
}

/// Standard sample Pearson correlation. Zero if lengths differ, `n < 2`,
/// or either series has zero variance.
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    if x.len() != y.len() || x.len() < 2 {
        return 0.0;
    }
    let mx = mean(x);
    let my = mean(y);
    let vx = variance(x, mx);
    let vy = variance(y, my);
    if vx == 0.0 || vy == 0.0 {
        return 0.0;
    }
    let cov: f64 = x.iter().zip(y).map(|(xi, yi)| (xi - mx) * (yi - my)).sum();
    cov / (vx.sqrt() * vy.sqrt())
}

/// 1-based dense ranks; ties are resolved by input order (a stable sort),
/// not the mean-rank tie correction of textbook Spearman. See
/// `DESIGN.md` "Tie handling in Spearman" for why this is preserved as-is
/// rather than "fixed".
pub fn rank(a: &[f64]) -> Vec<f64> {
    let mut idx: Vec<usize> = (0..a.len()).collect();
    idx.sort_by(|&i, &j| {
        a[i].partial_cmp(&a[j])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(i.cmp(&j))
    });
    let mut ranks = vec![0.0; a.len()];
    for (pos, &original_index) in idx.iter().enumerate() {
        ranks[original_index] = (pos + 1) as f64;
    }
    ranks
}

/// Spearman rank correlation: Pearson correlation of the input-order ranks.
pub fn spearman(x: &[f64], y: &[f64]) -> f64 {
    if x.len() != y.len() || x.len() < 2 {
        return 0.0;
    }
    pearson(&rank(x), &rank(y))
}

/// Scans lags in `[-maxLag, +maxLag]`, returning the `(bestLag, bestCorr)`
/// pair maximizing the normalized cross-correlation over the overlapping
/// window. `bestLag > 0` means `x` leads `y` by that many samples.
pub fn cross_correlation_scan(x: &[f64], y: &[f64], max_lag: usize) -> (i64, f64) {
    if x.len() != y.len() || x.is_empty() {
        return (0, 0.0);
    }
    let mx = mean(x);
    let my = mean(y);
    if variance(x, mx) == 0.0 || variance(y, my) == 0.0 {
        return (0, 0.0);
    }

    let n = x.len() as i64;
    let max_lag = max_lag.min(x.len().saturating_sub(1)) as i64;

    let mut best_lag = 0i64;
    let mut best_corr = f64::MIN;

    for lag in -max_lag..=max_lag {
        let (xs, ys) = overlap_at_lag(x, y, lag);
        if xs.len() < 2 {
            continue;
        }
        let corr = pearson(&xs, &ys);
        if corr > best_corr {
            best_corr = corr;
            best_lag = lag;
        }
    }

    if best_corr == f64::MIN {
        return (0, 0.0);
    }
    let _ = n;
    (best_lag, best_corr)
}

fn overlap_at_lag(x: &[f64], y: &[f64], lag: i64) -> (Vec<f64>, Vec<f64>) {
    let n = x.len() as i64;
    if lag >= 0 {
        let count = (n - lag).max(0) as usize;
        let xs = x[0..count].to_vec();
        let ys = y[(lag as usize)..(lag as usize + count)].to_vec();
        (xs, ys)
    } else {
        let k = (-lag) as usize;
        let count = (n - k as i64).max(0) as usize;
        let xs = x[k..(k + count)].to_vec();
        let ys = y[0..count].to_vec();
        (xs, ys)
    }
}

/// Closed-form partial correlation of `x` and `y` controlling for `z`.
/// Zero if `n < 3`, lengths mismatch, or the denominator degenerates.
pub fn partial_correlation(x: &[f64], y: &[f64], z: &[f64]) -> f64 {
    if x.len() != y.len() || y.len() != z.len() || x.len() < 3 {
        return 0.0;
    }
    let r_xy = pearson(x, y);
    let r_xz = pearson(x, z);
    let r_yz = pearson(y, z);

    let denom = ((1.0 - r_xz * r_xz) * (1.0 - r_yz * r_yz)).sqrt();
    if !denom.is_finite() || denom.abs() < 1e-12 {
        return 0.0;
    }
    (r_xy - r_xz * r_yz) / denom
}

/// Size factor applied to the base suspicion score: rewards larger sample
/// counts since short ring series are noisier.
fn size_factor(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 0.5,
        3 | 4 => 0.75,
        _ => 1.0,
    }
}

/// Deterministic weighted combination of the stats tuple into a `[0,1]`
/// suspicion score. See `spec.md` §4.1 for the exact formula; this is a
/// direct transcription.
#[allow(clippy::too_many_arguments)]
pub fn compute_suspicion_score(
    pearson: f64,
    spearman: f64,
    cross_max: f64,
    cross_lag: i64,
    n: usize,
    min_correlation: f64,
    partial: f64,
    anomaly_density: f64,
) -> f64 {
    let base = 0.5 * pearson.abs() + 0.3 * spearman.abs() + 0.2 * cross_max.max(0.0);
    let mut score = base * size_factor(n);

    if cross_lag > 0 {
        score += 0.12;
    }

    if pearson.abs() > 0.0 {
        let ratio = partial.abs() / pearson.abs();
        if ratio < 0.5 {
            score *= 1.0 - 0.3 * (1.0 - ratio / 0.5);
        }
    }

    score += 0.12 * anomaly_density;
    score = score.clamp(0.0, 1.0);

    if pearson.abs() < min_correlation && spearman.abs() < min_correlation {
        score /= 2.0;
    }

    score
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pearson_self_and_negation() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let neg: Vec<f64> = x.iter().map(|v| -v).collect();
        assert!((pearson(&x, &x) - 1.0).abs() < 1e-9);
        assert!((pearson(&x, &neg) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn pearson_zero_on_degenerate_input() {
        assert_eq!(pearson(&[1.0], &[1.0]), 0.0);
        assert_eq!(pearson(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn pearson_bounded() {
        let x = [3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0];
        let y = [2.0, 7.0, 1.0, 8.0, 2.0, 8.0, 1.0, 8.0];
        assert!(pearson(&x, &y).abs() <= 1.0 + 1e-9);
    }

    #[test]
    fn rank_breaks_ties_by_input_order() {
        let r = rank(&[5.0, 1.0, 1.0, 3.0]);
        // 1.0 at index 1 sorts before the 1.0 at index 2 (stable tie break)
        assert_eq!(r, vec![4.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn spearman_is_pearson_of_ranks() {
        let x = [10.0, 20.0, 15.0, 30.0];
        let y = [1.0, 2.0, 1.5, 3.0];
        assert_eq!(spearman(&x, &y), pearson(&rank(&x), &rank(&y)));
    }

    #[test]
    fn cross_correlation_detects_unit_lag() {
        let x: Vec<f64> = (0..8).map(|i| i as f64).collect();
        let mut y = vec![x[0]];
        y.extend_from_slice(&x[0..7]);
        let (lag, corr) = cross_correlation_scan(&x, &y, 3);
        assert_eq!(lag, 1);
        assert!(corr > 0.9, "corr = {corr}");
    }

    #[test]
    fn cross_correlation_lag_within_bounds() {
        let x = [1.0, 5.0, 2.0, 8.0, 3.0, 9.0];
        let y = [4.0, 1.0, 7.0, 2.0, 6.0, 3.0];
        let (lag, _) = cross_correlation_scan(&x, &y, 4);
        assert!((-4..=4).contains(&lag));
    }

    #[test]
    fn partial_correlation_near_zero_for_common_confound() {
        // x and y both derive from z plus small independent noise
        let z = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let noise_x = [0.01, -0.02, 0.01, 0.0, -0.01, 0.02, -0.01, 0.01];
        let noise_y = [-0.01, 0.01, -0.02, 0.01, 0.0, -0.01, 0.02, -0.01];
        let x: Vec<f64> = z.iter().zip(&noise_x).map(|(a, b)| a + b).collect();
        let y: Vec<f64> = z.iter().zip(&noise_y).map(|(a, b)| a + b).collect();
        let p = partial_correlation(&x, &y, &z);
        assert!(p.abs() < 0.2, "partial = {p}");
    }

    #[test]
    fn partial_correlation_degenerate_cases() {
        assert_eq!(partial_correlation(&[1.0, 2.0], &[1.0, 2.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn suspicion_score_monotone_in_pearson() {
        let low = compute_suspicion_score(0.2, 0.2, 0.0, 0, 8, 0.1, 0.2, 0.0);
        let high = compute_suspicion_score(0.8, 0.2, 0.0, 0, 8, 0.1, 0.8, 0.0);
        assert!(high >= low);
    }

    #[test]
    fn suspicion_score_lag_bonus_and_clamp() {
        let s = compute_suspicion_score(1.0, 1.0, 1.0, 1, 10, 0.0, 1.0, 1.0);
        assert!(s <= 1.0);
    }

    #[test]
    fn suspicion_score_halved_below_min_correlation() {
        let above = compute_suspicion_score(0.05, 0.05, 0.0, 0, 10, 0.01, 0.05, 0.0);
        let below = compute_suspicion_score(0.05, 0.05, 0.0, 0, 10, 0.5, 0.05, 0.0);
        assert!(below <= above / 2.0 + 1e-9);
    }
}
