//! Small numeric helpers for price series

/// Ordinary least squares fit of `y = slope * x + intercept`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    /// Coefficient of determination, 0 when `y` has no variance
    pub r_squared: f64,
}

impl LinearFit {
    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1); 0 for fewer than two values
pub fn sample_std_dev(values: &[f64]) -> f64 {
    let Some(avg) = mean(values) else {
        return 0.0;
    };
    if values.len() < 2 {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

/// Fit a line through `points`; `None` for fewer than two points or a constant `x`
pub fn linear_regression(points: &[(f64, f64)]) -> Option<LinearFit> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;

    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for (x, y) in points {
        let dx = x - mean_x;
        let dy = y - mean_y;
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }

    if sxx.abs() < f64::EPSILON {
        return None;
    }

    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;
    let r_squared = if syy.abs() < f64::EPSILON {
        // A flat series is perfectly explained by a flat line
        if slope.abs() < f64::EPSILON { 1.0 } else { 0.0 }
    } else {
        (sxy * sxy / (sxx * syy)).clamp(0.0, 1.0)
    };

    Some(LinearFit {
        slope,
        intercept,
        r_squared,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn exact_line_has_unit_r_squared() {
        let fit = linear_regression(&[(0.0, 100.0), (1.0, 110.0), (2.0, 120.0)]).unwrap();
        assert!((fit.slope - 10.0).abs() < 1e-9);
        assert!((fit.intercept - 100.0).abs() < 1e-9);
        assert!((fit.r_squared - 1.0).abs() < 1e-9);
        assert!((fit.predict(5.0) - 150.0).abs() < 1e-9);
    }

    #[test]
    fn degenerate_inputs() {
        assert_eq!(linear_regression(&[(1.0, 5.0)]), None);
        assert_eq!(linear_regression(&[(1.0, 5.0), (1.0, 7.0)]), None);
        assert_eq!(sample_std_dev(&[3.0]), 0.0);
        assert_eq!(mean(&[]), None);
    }

    #[test]
    fn std_dev_uses_sample_denominator() {
        let sd = sample_std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((sd - 2.138_089_935).abs() < 1e-6);
    }

    proptest! {
        #[test]
        fn r_squared_stays_in_unit_interval(ys in prop::collection::vec(0.0f64..1_000_000.0, 2..40)) {
            let points: Vec<(f64, f64)> = ys.iter().enumerate().map(|(i, y)| (i as f64, *y)).collect();
            let fit = linear_regression(&points).unwrap();
            prop_assert!((0.0..=1.0).contains(&fit.r_squared));
        }
    }
}
