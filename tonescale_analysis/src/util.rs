/// Index of the first maximum. Ties resolve to the lowest index, an empty slice gives 0.
pub fn arg_max(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

/// Folds a possibly negative bin offset into `[0, period)`.
pub fn wrap_index(idx: isize, period: usize) -> usize {
    idx.rem_euclid(period as isize) as usize
}

/// Distance between two bins on a circle of `period` bins.
pub fn circular_distance(a: usize, b: usize, period: usize) -> usize {
    let d = a.abs_diff(b) % period;
    d.min(period - d)
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub fn standard_deviation(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = mean(values);
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

#[cfg(test)]
pub(crate) fn assert_close(a: f64, b: f64, eps: f64) {
    assert!((a - b).abs() <= eps, "{a} != {b} (eps {eps})");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arg_max_prefers_first() {
        assert_eq!(arg_max(&[1.0, 3.0, 3.0, 2.0]), 1);
        assert_eq!(arg_max(&[]), 0);
    }

    #[test]
    fn test_circular_distance() {
        assert_eq!(circular_distance(1, 199, 200), 2);
        assert_eq!(circular_distance(10, 20, 200), 10);
        assert_eq!(circular_distance(0, 100, 200), 100);
        assert_eq!(wrap_index(-1, 200), 199);
        assert_eq!(wrap_index(401, 200), 1);
    }

    #[test]
    fn test_moments() {
        assert_close(mean(&[1.0, 2.0, 3.0]), 2.0, 1e-12);
        assert_close(standard_deviation(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]), 2.0, 1e-12);
        assert_eq!(standard_deviation(&[]), 0.0);
    }
}
