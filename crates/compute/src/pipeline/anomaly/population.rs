//! Population-level statistics for anomaly scoring.
//!
//! Median and MAD back the robust residual scorer; mean and standard
//! deviation back feature standardization in the linear regressor.

/// Arithmetic mean, `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population mean and standard deviation. The deviation is floored at
/// EPSILON so callers can divide by it.
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    let Some(m) = mean(values) else {
        return (0.0, f64::EPSILON);
    };
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    (m, var.sqrt().max(f64::EPSILON))
}

/// Median of the finite values; the average of the two middle values for
/// an even count.
pub fn median(values: &[f64]) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Median absolute deviation around `center`.
pub fn mad(values: &[f64], center: f64) -> Option<f64> {
    let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    median(&deviations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_odd_and_even() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn median_ignores_nan() {
        assert_eq!(median(&[f64::NAN, 5.0, 1.0]), Some(3.0));
    }

    #[test]
    fn mad_basic() {
        let v = [0.0, 1.0, 1.0, 2.0, 50.0];
        let m = median(&v).unwrap();
        assert_eq!(m, 1.0);
        assert_eq!(mad(&v, m), Some(1.0));
    }

    #[test]
    fn mean_std_floors_deviation() {
        let (m, s) = mean_std(&[2.0, 2.0]);
        assert_eq!(m, 2.0);
        assert_eq!(s, f64::EPSILON);

        let (m, s) = mean_std(&[1.0, 3.0]);
        assert_eq!(m, 2.0);
        assert!((s - 1.0).abs() < 1e-12);
    }
}
