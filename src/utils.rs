//! Numeric helpers shared by the modeler and the analytics layer.

/// Round to two decimal places
#[must_use]
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `part / whole * 100`, rounded to two decimals; 0 when `whole` is 0
#[must_use]
pub fn percentage(part: i64, whole: i64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round2(part as f64 / whole as f64 * 100.0)
}

/// Mean of a slice of integers, rounded to two decimals; 0 for an empty slice
#[must_use]
pub fn mean_rounded(values: &[i64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let sum: i128 = values.iter().map(|v| i128::from(*v)).sum();
    round2(sum as f64 / values.len() as f64)
}
