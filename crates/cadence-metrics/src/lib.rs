//! Metric aggregation.
//!
//! Sprint- and developer-grain rollups over the normalized work records,
//! competitive-title assignment, dashboard reads with a live-recompute
//! staleness override, and the per-day operator audit row.

pub mod daily;
pub mod dashboard;
pub mod developer;
pub mod sprint;

pub use cadence_core::{CoreError, Result};

/// Average of an iterator of f64 values; None when empty.
pub(crate) fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let mut sum = 0.0;
    let mut n = 0usize;
    for v in values {
        sum += v;
        n += 1;
    }
    if n == 0 {
        None
    } else {
        Some(sum / n as f64)
    }
}

/// Round to one decimal place (the dashboard's display precision).
pub(crate) fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// Round to two decimal places (rates).
pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_handles_empty_and_values() {
        assert_eq!(mean([]), None);
        assert_eq!(mean([2.0, 4.0]), Some(3.0));
    }

    #[test]
    fn rounding_precision() {
        assert_eq!(round1(3.04), 3.0);
        assert_eq!(round1(3.05), 3.1);
        assert_eq!(round2(66.666), 66.67);
    }
}
