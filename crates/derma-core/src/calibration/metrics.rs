//! Calibration quality metrics over a labelled validation set.

use crate::math;

/// Mean negative log-likelihood of `labels` under `softmax(logits / t)`.
///
/// Callers guarantee rows are non-empty and labels are in range.
pub fn negative_log_likelihood(logits: &[Vec<f64>], labels: &[usize], t: f64) -> f64 {
    if logits.is_empty() {
        return 0.0;
    }
    let mut scaled = Vec::new();
    let total: f64 = logits
        .iter()
        .zip(labels)
        .map(|(row, &label)| {
            scaled.clear();
            scaled.extend(row.iter().map(|z| z / t));
            math::log_sum_exp(&scaled) - scaled[label]
        })
        .sum();
    total / logits.len() as f64
}

/// Expected calibration error of top-1 confidence against correctness.
///
/// Equal-width bins over `[0, 1]`; the last bin is closed. Returns `0.0` for
/// empty input.
pub fn expected_calibration_error(confidences: &[f64], correct: &[bool], num_bins: usize) -> f64 {
    let n = confidences.len().min(correct.len());
    if n == 0 || num_bins == 0 {
        return 0.0;
    }

    let mut bin_conf = vec![0.0_f64; num_bins];
    let mut bin_hits = vec![0.0_f64; num_bins];
    let mut bin_counts = vec![0_usize; num_bins];

    for (&c, &ok) in confidences.iter().zip(correct).take(n) {
        let c = c.clamp(0.0, 1.0);
        let bin = ((c * num_bins as f64) as usize).min(num_bins - 1);
        bin_conf[bin] += c;
        if ok {
            bin_hits[bin] += 1.0;
        }
        bin_counts[bin] += 1;
    }

    (0..num_bins)
        .filter(|&b| bin_counts[b] > 0)
        .map(|b| {
            let count = bin_counts[b] as f64;
            (count / n as f64) * (bin_conf[b] / count - bin_hits[b] / count).abs()
        })
        .sum()
}

/// Top-1 confidence and correctness for each row at temperature `t`.
pub fn top1_outcomes(logits: &[Vec<f64>], labels: &[usize], t: f64) -> (Vec<f64>, Vec<bool>) {
    logits
        .iter()
        .zip(labels)
        .map(|(row, &label)| {
            let scaled: Vec<f64> = row.iter().map(|z| z / t).collect();
            let probs = math::softmax(&scaled);
            let idx = math::argmax(&probs).unwrap_or(0);
            (probs[idx], idx == label)
        })
        .unzip()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nll_uniform_logits() {
        let logits = vec![vec![0.0; 4], vec![0.0; 4]];
        let nll = negative_log_likelihood(&logits, &[0, 3], 1.0);
        assert!((nll - 4.0_f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_nll_prefers_correct_confident_predictions() {
        let logits = vec![vec![5.0, 0.0], vec![0.0, 5.0]];
        let good = negative_log_likelihood(&logits, &[0, 1], 1.0);
        let bad = negative_log_likelihood(&logits, &[1, 0], 1.0);
        assert!(good < bad);
    }

    #[test]
    fn test_ece_perfectly_calibrated_bin() {
        // Four predictions at 0.75 confidence, three correct.
        let ece = expected_calibration_error(&[0.75; 4], &[true, true, true, false], 10);
        assert!(ece.abs() < 1e-12);
    }

    #[test]
    fn test_ece_overconfident() {
        let ece = expected_calibration_error(&[0.95; 2], &[true, false], 10);
        assert!((ece - 0.45).abs() < 1e-12);
    }

    #[test]
    fn test_ece_empty_is_zero() {
        assert_eq!(expected_calibration_error(&[], &[], 10), 0.0);
    }

    #[test]
    fn test_top1_outcomes() {
        let (conf, correct) = top1_outcomes(&[vec![2.0, 0.0], vec![0.0, 0.0]], &[0, 1], 1.0);
        assert!(conf[0] > 0.8);
        assert!((conf[1] - 0.5).abs() < 1e-12);
        // Tie resolves to index 0, which is wrong for label 1.
        assert_eq!(correct, vec![true, false]);
    }
}
