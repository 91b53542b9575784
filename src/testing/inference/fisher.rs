//! Fisher-z tests on correlation coefficients.
//!
//! A correlation `r` from `n` samples is transformed with `atanh`, which is approximately normal
//! with standard error `1/sqrt(n-3)`. Rank correlations get that error inflated by `sqrt(1.5)`.

use statrs::function::erf::erfc;
use std::f64::consts::SQRT_2;

use crate::correlation::CorrelationKind;
use crate::testing::Alternative;

/// Correlations are clamped to this bound before the single-cohort test.
pub const CORRELATION_BOUND: f64 = 0.99;

/// Standard normal cumulative distribution function.
#[inline]
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / SQRT_2)
}

/// p-value of a standardized normal statistic under `alternative`.
#[inline]
pub fn normal_p_value(z: f64, alternative: Alternative) -> f64 {
    match alternative {
        Alternative::TwoSided => (2.0 * normal_cdf(-z.abs())).min(1.0),
        Alternative::Less => normal_cdf(z),
        Alternative::Greater => 1.0 - normal_cdf(z),
    }
}

/// Standard error of `atanh(r)` for a cohort of `n` samples.
///
/// Only finite for `n > 3`; callers go through [`correlation_p_value`] or
/// [`correlation_difference_test`], which return `None` below that.
#[inline]
pub fn fisher_standard_error(n: usize, kind: CorrelationKind) -> f64 {
    kind.standard_error_inflation() / (n as f64 - 3.0).sqrt()
}

fn checked_standard_error(n: usize, kind: CorrelationKind) -> Option<f64> {
    (n > 3).then(|| fisher_standard_error(n, kind))
}

/// Test one cohort's correlation against zero.
///
/// The coefficient is clamped to ±[`CORRELATION_BOUND`] so perfect correlations still get a
/// finite statistic.
///
/// # Arguments
///
/// * `r` - Correlation coefficient, `None` for a degenerate pair
/// * `n` - Number of samples in the cohort
/// * `kind` - Correlation kind, selects the standard error inflation
/// * `alternative` - Direction of the test
///
/// # Returns
///
/// The p-value, or `None` if `r` is missing or `n <= 3`.
///
/// # Example
///
/// ```
/// use single_diffcorr::correlation::CorrelationKind;
/// use single_diffcorr::testing::Alternative;
/// use single_diffcorr::testing::inference::fisher::correlation_p_value;
///
/// let p = correlation_p_value(Some(0.8), 20, CorrelationKind::Pearson, Alternative::TwoSided);
/// assert!(p.unwrap() < 0.001);
/// assert!(correlation_p_value(Some(0.8), 3, CorrelationKind::Pearson, Alternative::TwoSided).is_none());
/// ```
pub fn correlation_p_value(
    r: Option<f64>,
    n: usize,
    kind: CorrelationKind,
    alternative: Alternative,
) -> Option<f64> {
    let r = r?.clamp(-CORRELATION_BOUND, CORRELATION_BOUND);
    let z = r.atanh() / checked_standard_error(n, kind)?;
    Some(normal_p_value(z, alternative))
}

/// `atanh(r1) - atanh(r2)`, or `None` if either side is missing or on the ±1 boundary.
#[inline]
pub fn fisher_difference(r1: Option<f64>, r2: Option<f64>) -> Option<f64> {
    let (r1, r2) = (r1?, r2?);
    if r1.abs() >= 1.0 || r2.abs() >= 1.0 {
        return None;
    }
    let stat = r1.atanh() - r2.atanh();
    stat.is_finite().then_some(stat)
}

/// Two-cohort z-test for equal correlations.
///
/// # Arguments
///
/// * `r1`, `n1` - Reference correlation and cohort size
/// * `r2`, `n2` - Experimental correlation and cohort size
/// * `kind` - Correlation kind the coefficients were computed with
/// * `alternative` - Direction of the test
///
/// # Returns
///
/// `(statistic, p_value)`, where the statistic is the unscaled `atanh` difference and the
/// p-value uses the combined standard error `sqrt(se1² + se2²)`. `None` if either coefficient
/// is missing or on the ±1 boundary, or either cohort has 3 samples or fewer.
///
/// # Example
///
/// ```
/// use single_diffcorr::correlation::CorrelationKind;
/// use single_diffcorr::testing::Alternative;
/// use single_diffcorr::testing::inference::fisher::correlation_difference_test;
///
/// let (stat, p) = correlation_difference_test(
///     Some(0.6), 50, Some(0.2), 50, CorrelationKind::Pearson, Alternative::TwoSided,
/// )
/// .unwrap();
/// assert!(stat > 0.0);
/// assert!(p < 0.05);
/// ```
pub fn correlation_difference_test(
    r1: Option<f64>,
    n1: usize,
    r2: Option<f64>,
    n2: usize,
    kind: CorrelationKind,
    alternative: Alternative,
) -> Option<(f64, f64)> {
    let stat = fisher_difference(r1, r2)?;
    let se1 = checked_standard_error(n1, kind)?;
    let se2 = checked_standard_error(n2, kind)?;
    let se = (se1 * se1 + se2 * se2).sqrt();
    Some((stat, normal_p_value(stat / se, alternative)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_normal_cdf_reference_points() {
        assert_relative_eq!(normal_cdf(0.0), 0.5, epsilon = 1e-15);
        assert_relative_eq!(normal_cdf(1.959963984540054), 0.975, epsilon = 1e-9);
        assert_relative_eq!(normal_cdf(-1.0), 0.15865525393145707, epsilon = 1e-9);
    }

    #[test]
    fn test_pearson_difference_closed_form() {
        let (stat, p) = correlation_difference_test(
            Some(0.6),
            50,
            Some(0.2),
            50,
            CorrelationKind::Pearson,
            Alternative::TwoSided,
        )
        .unwrap();

        let expected_stat = 0.6_f64.atanh() - 0.2_f64.atanh();
        assert_relative_eq!(stat, expected_stat, epsilon = 1e-12);
        assert_relative_eq!(stat, 0.4904146, epsilon = 1e-6);

        let se = (2.0 / 47.0_f64).sqrt();
        assert_relative_eq!(p, 2.0 * normal_cdf(-expected_stat / se), epsilon = 1e-12);
        assert_relative_eq!(p, 0.0174364, epsilon = 1e-6);
    }

    #[test]
    fn test_one_sided_alternatives_are_complementary() {
        let less = correlation_difference_test(
            Some(0.1), 30, Some(0.5), 40, CorrelationKind::Pearson, Alternative::Less,
        )
        .unwrap();
        let greater = correlation_difference_test(
            Some(0.1), 30, Some(0.5), 40, CorrelationKind::Pearson, Alternative::Greater,
        )
        .unwrap();
        assert!(less.0 < 0.0);
        assert!(less.1 < 0.5);
        assert_relative_eq!(less.1 + greater.1, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_spearman_inflates_standard_error() {
        let pearson = fisher_standard_error(28, CorrelationKind::Pearson);
        let spearman = fisher_standard_error(28, CorrelationKind::Spearman);
        assert_relative_eq!(pearson, 0.2, epsilon = 1e-12);
        assert_relative_eq!(spearman, 0.2 * 1.5_f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(
            fisher_standard_error(28, CorrelationKind::SpearmanRanked),
            spearman,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_boundary_and_missing_yield_none() {
        let kind = CorrelationKind::Pearson;
        let alt = Alternative::TwoSided;
        assert!(correlation_difference_test(Some(1.0), 50, Some(0.2), 50, kind, alt).is_none());
        assert!(correlation_difference_test(Some(0.3), 50, Some(-1.0), 50, kind, alt).is_none());
        assert!(correlation_difference_test(None, 50, Some(0.2), 50, kind, alt).is_none());
    }

    #[test]
    fn test_single_cohort_test_clamps_perfect_correlation() {
        let p = correlation_p_value(Some(1.0), 20, CorrelationKind::Pearson, Alternative::TwoSided)
            .unwrap();
        let clamped = correlation_p_value(
            Some(CORRELATION_BOUND),
            20,
            CorrelationKind::Pearson,
            Alternative::TwoSided,
        )
        .unwrap();
        assert_eq!(p, clamped);
        assert!(p < 1e-6);
        assert!(correlation_p_value(None, 20, CorrelationKind::Pearson, Alternative::Less).is_none());
    }

    #[test]
    fn test_tiny_cohorts_yield_none() {
        let kind = CorrelationKind::Spearman;
        let alt = Alternative::TwoSided;
        for n in [0, 2, 3] {
            assert!(correlation_p_value(Some(0.5), n, kind, alt).is_none());
            assert!(correlation_difference_test(Some(0.5), n, Some(0.1), 20, kind, alt).is_none());
            assert!(correlation_difference_test(Some(0.5), 20, Some(0.1), n, kind, alt).is_none());
        }
        assert!(correlation_p_value(Some(0.5), 4, kind, alt).is_some());
    }
}
