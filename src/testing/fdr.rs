//! False discovery rate control

/// Adjust p-values with the Benjamini-Hochberg procedure.
/// R equivalent: p.adjust(p, method="BH") in stats
///
/// NaN p-values (genes whose statistics could not be computed) are left
/// as NaN and do not count toward the number of tests. Adjusted values
/// are clamped to [0, 1] and made monotone by a cumulative minimum from
/// the largest p-value downward.
pub fn benjamini_hochberg(pvalues: &[f64]) -> Vec<f64> {
    let n = pvalues.len();
    let mut adjusted = vec![f64::NAN; n];

    let mut valid: Vec<usize> = (0..n).filter(|&i| pvalues[i].is_finite()).collect();
    let m = valid.len();
    if m == 0 {
        return adjusted;
    }

    valid.sort_by(|&a, &b| {
        pvalues[a]
            .partial_cmp(&pvalues[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    // Walk from the largest p-value down, carrying the running minimum
    let mut running_min = 1.0f64;
    for rank in (0..m).rev() {
        let i = valid[rank];
        let raw = pvalues[i] * m as f64 / (rank + 1) as f64;
        running_min = running_min.min(raw).clamp(0.0, 1.0);
        adjusted[i] = running_min;
    }

    adjusted
}
