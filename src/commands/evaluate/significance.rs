use serde::Serialize;

/// Corpus-level significance of a set of per-paper deltas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DeltaSignificance {
    pub papers: usize,
    pub mean: f64,
    pub sign_test_p_value: Option<f64>,
    pub ci95_low: Option<f64>,
    pub ci95_high: Option<f64>,
}

impl DeltaSignificance {
    pub fn from_deltas(deltas: &[f64], iterations: usize, seed: u64) -> Self {
        let mean = if deltas.is_empty() {
            0.0
        } else {
            deltas.iter().sum::<f64>() / deltas.len() as f64
        };
        let (ci95_low, ci95_high) =
            bootstrap_confidence_interval_95(deltas, iterations, seed).unwrap_or((None, None));

        Self {
            papers: deltas.len(),
            mean,
            sign_test_p_value: sign_test_two_sided_p_value(deltas),
            ci95_low,
            ci95_high,
        }
    }
}

pub fn sign_test_two_sided_p_value(deltas: &[f64]) -> Option<f64> {
    let wins = deltas.iter().filter(|delta| **delta > 0.0).count();
    let losses = deltas.iter().filter(|delta| **delta < 0.0).count();
    let n = wins + losses;
    if n == 0 {
        return None;
    }

    let tail = (0..=wins.min(losses))
        .map(|k| binomial_pmf_half(n, k))
        .sum::<f64>();
    Some((2.0 * tail).min(1.0))
}

/// `C(n, k) / 2^n`, evaluated in log space so large corpora neither overflow
/// the coefficient nor underflow the power of two.
fn binomial_pmf_half(n: usize, k: usize) -> f64 {
    if k > n {
        return 0.0;
    }

    let ln_coefficient = (0..k.min(n - k))
        .map(|i| ((n - i) as f64).ln() - ((i + 1) as f64).ln())
        .sum::<f64>();
    (ln_coefficient - n as f64 * std::f64::consts::LN_2).exp()
}

/// Percentile bootstrap of the mean with xorshift resampling; the same seed
/// always yields the same interval.
pub fn bootstrap_confidence_interval_95(
    deltas: &[f64],
    iterations: usize,
    seed: u64,
) -> Option<(Option<f64>, Option<f64>)> {
    if deltas.is_empty() || iterations == 0 {
        return None;
    }

    // xorshift never leaves the all-zero state.
    let mut rng = if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed };
    let mut means = Vec::<f64>::with_capacity(iterations);
    for _ in 0..iterations {
        let mut total = 0.0_f64;
        for _ in 0..deltas.len() {
            rng ^= rng << 13;
            rng ^= rng >> 7;
            rng ^= rng << 17;
            total += deltas[(rng % deltas.len() as u64) as usize];
        }
        means.push(total / deltas.len() as f64);
    }

    means.sort_by(|left, right| left.total_cmp(right));
    let last = iterations - 1;
    let low_index = ((iterations as f64) * 0.025).floor() as usize;
    let high_index = ((iterations as f64) * 0.975).ceil() as usize;
    Some((
        means.get(low_index.min(last)).copied(),
        means.get(high_index.saturating_sub(1).min(last)).copied(),
    ))
}
