//! Inference helpers for regression output.

use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

/// Two-sided p-value of a t statistic with `df` degrees of freedom.
///
/// Falls back to the standard normal when `df` is not positive, and
/// returns NaN for a non-finite statistic.
pub fn two_sided_p_value(t: f64, df: f64) -> f64 {
    if !t.is_finite() {
        return f64::NAN;
    }
    let tail = if df > 0.0 {
        match StudentsT::new(0.0, 1.0, df) {
            Ok(dist) => 1.0 - dist.cdf(t.abs()),
            Err(_) => return f64::NAN,
        }
    } else {
        match Normal::new(0.0, 1.0) {
            Ok(dist) => 1.0 - dist.cdf(t.abs()),
            Err(_) => return f64::NAN,
        }
    };
    (2.0 * tail).clamp(0.0, 1.0)
}

/// Significance stars: `***` p < 0.01, `**` p < 0.05, `*` p < 0.1.
pub fn stars(p_value: f64) -> &'static str {
    if p_value < 0.01 {
        "***"
    } else if p_value < 0.05 {
        "**"
    } else if p_value < 0.1 {
        "*"
    } else {
        ""
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_t_quantiles() {
        // t(10) two-sided 5% critical value is 2.228
        assert!((two_sided_p_value(2.228_138_85, 10.0) - 0.05).abs() < 1e-6);
        assert!((two_sided_p_value(-2.228_138_85, 10.0) - 0.05).abs() < 1e-6);
        assert_eq!(two_sided_p_value(0.0, 5.0), 1.0);
    }

    #[test]
    fn test_normal_fallback_and_nan() {
        assert!((two_sided_p_value(1.959_963_98, 0.0) - 0.05).abs() < 1e-6);
        assert!(two_sided_p_value(f64::NAN, 10.0).is_nan());
    }

    #[test]
    fn test_star_thresholds() {
        assert_eq!(stars(0.009), "***");
        assert_eq!(stars(0.01), "**");
        assert_eq!(stars(0.049), "**");
        assert_eq!(stars(0.05), "*");
        assert_eq!(stars(0.099), "*");
        assert_eq!(stars(0.1), "");
        assert_eq!(stars(f64::NAN), "");
    }
}
