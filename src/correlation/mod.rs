//! Pairwise correlation over cohort columns.
//!
//! Each molecule row is transformed once per cohort (ranked for the Spearman kinds), centred and
//! scaled to unit norm. The correlation of a pair is then a single dot product, which keeps the
//! per-pair cost at `O(samples)` with no allocation.
//!
//! Rows with zero variance (or non-finite values) are flagged instead of failing; every pair that
//! touches them gets a missing coefficient but still occupies its index.

use anyhow::{Result, anyhow};
use ndarray::Array2;
use single_utilities::traits::FloatOpsTS;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::matrix::{Cohorts, ExpressionMatrix};
use crate::pairs::{PairSpace, WorkerPool};
use crate::testing::Alternative;
use crate::testing::inference::fisher::correlation_p_value;

pub mod rank;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CorrelationKind {
    /// Product-moment correlation of the raw values.
    #[default]
    Pearson,
    /// Rank correlation, tied values share their average rank.
    Spearman,
    /// Rank-transform mode: every row is ranked with ordinal tie-breaking, then correlated
    /// with the Pearson kernel.
    SpearmanRanked,
}

impl CorrelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrelationKind::Pearson => "pearson",
            CorrelationKind::Spearman => "spearman",
            CorrelationKind::SpearmanRanked => "spearman-ranked",
        }
    }

    pub fn is_rank_based(&self) -> bool {
        !matches!(self, CorrelationKind::Pearson)
    }

    /// Factor applied to the Fisher-z standard error.
    pub fn standard_error_inflation(&self) -> f64 {
        match self {
            CorrelationKind::Pearson => 1.0,
            CorrelationKind::Spearman | CorrelationKind::SpearmanRanked => 1.5_f64.sqrt(),
        }
    }

    fn transform(&self, values: Vec<f64>) -> Vec<f64> {
        match self {
            CorrelationKind::Pearson => values,
            CorrelationKind::Spearman => rank::average_ranks(&values),
            CorrelationKind::SpearmanRanked => rank::ordinal_ranks(&values),
        }
    }
}

impl fmt::Display for CorrelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CorrelationKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "pearson" => Ok(CorrelationKind::Pearson),
            "spearman" => Ok(CorrelationKind::Spearman),
            "spearman-ranked" | "spearman-test" => Ok(CorrelationKind::SpearmanRanked),
            other => Err(anyhow!(
                "Unknown correlation '{}', expected pearson, spearman or spearman-ranked",
                other
            )),
        }
    }
}

/// Centre and scale a row to unit norm, `None` for constant or non-finite rows.
fn standardize(values: &[f64]) -> Option<Vec<f64>> {
    if values.len() < 2 || values.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let first = values[0];
    if values.iter().all(|&v| v == first) {
        return None;
    }

    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let centred: Vec<f64> = values.iter().map(|v| v - mean).collect();
    let norm = centred.iter().map(|d| d * d).sum::<f64>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return None;
    }
    Some(centred.into_iter().map(|d| d / norm).collect())
}

/// Rank (if needed) and standardize one raw row. Any non-finite raw value makes the row
/// degenerate under every kind.
fn profile_row(kind: CorrelationKind, values: Vec<f64>) -> Option<Vec<f64>> {
    if values.iter().any(|v| !v.is_finite()) {
        return None;
    }
    standardize(&kind.transform(values))
}

/// Standardized rows of one cohort, ready for dot-product correlation.
#[derive(Debug, Clone)]
pub struct CohortProfile {
    rows: Array2<f64>,
    valid: Vec<bool>,
}

impl CohortProfile {
    pub fn build<T>(
        matrix: &ExpressionMatrix<T>,
        columns: &[usize],
        kind: CorrelationKind,
        pool: &WorkerPool,
    ) -> Result<Self>
    where
        T: FloatOpsTS,
    {
        if columns.len() < 2 {
            return Err(anyhow!(
                "A cohort needs at least 2 samples to correlate, got {}",
                columns.len()
            ));
        }
        if let Some(&bad) = columns.iter().find(|&&c| c >= matrix.n_samples()) {
            return Err(anyhow!(
                "Sample column {} out of range for {} samples",
                bad,
                matrix.n_samples()
            ));
        }

        let width = columns.len();
        let rows: Vec<Option<Vec<f64>>> = pool.map_ranges(matrix.n_molecules(), |range| {
            Ok(range
                .map(|row| profile_row(kind, matrix.row_values(row, columns)))
                .collect())
        })?;

        let valid: Vec<bool> = rows.iter().map(Option::is_some).collect();
        let mut flat = Vec::with_capacity(rows.len() * width);
        for row in rows {
            match row {
                Some(values) => flat.extend(values),
                None => flat.extend(std::iter::repeat_n(0.0, width)),
            }
        }
        let rows = Array2::from_shape_vec((valid.len(), width), flat)?;

        let degenerate = valid.iter().filter(|v| !**v).count();
        if degenerate > 0 {
            debug!(degenerate, kind = %kind, "rows without variance in cohort");
        }

        Ok(CohortProfile { rows, valid })
    }

    /// Correlation of two rows, `None` if either row is degenerate.
    #[inline]
    pub fn correlation(&self, a: usize, b: usize) -> Option<f64> {
        if !(self.valid[a] && self.valid[b]) {
            return None;
        }
        let r = self.rows.row(a).dot(&self.rows.row(b));
        Some(r.clamp(-1.0, 1.0))
    }
}

/// Correlations of one cohort over a pair space.
#[derive(Debug, Clone)]
pub struct CorrelationResults {
    pub coefficients: Vec<Option<f64>>,
    /// Present when a significance alternative was requested.
    pub p_values: Option<Vec<Option<f64>>>,
}

/// Correlate every pair of `pairs` over the given sample columns.
///
/// The pair space is split into contiguous chunks across the pool; output is in pair-index
/// order whatever the worker count. Requesting p-values needs a cohort of at least
/// [`Cohorts::MIN_SIZE`] samples.
pub fn correlate<T>(
    matrix: &ExpressionMatrix<T>,
    columns: &[usize],
    pairs: &PairSpace,
    kind: CorrelationKind,
    alternative: Option<Alternative>,
    pool: &WorkerPool,
) -> Result<CorrelationResults>
where
    T: FloatOpsTS,
{
    if pairs.molecules() != matrix.n_molecules() {
        return Err(anyhow!(
            "Pair space covers {} molecules but the matrix has {}",
            pairs.molecules(),
            matrix.n_molecules()
        ));
    }
    if alternative.is_some() && columns.len() < Cohorts::MIN_SIZE {
        return Err(anyhow!(
            "Correlation p-values need at least {} samples, got {}",
            Cohorts::MIN_SIZE,
            columns.len()
        ));
    }
    let profile = CohortProfile::build(matrix, columns, kind, pool)?;
    let coefficients = pool.map_ranges(pairs.len(), |range| {
        Ok(pairs
            .pairs_in(range)
            .map(|(s, t)| profile.correlation(s, t))
            .collect())
    })?;

    let p_values = alternative.map(|alt| {
        coefficients
            .iter()
            .map(|&r| correlation_p_value(r, columns.len(), kind, alt))
            .collect()
    });

    Ok(CorrelationResults {
        coefficients,
        p_values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn matrix(data: Array2<f64>) -> ExpressionMatrix<f64> {
        let molecules = (0..data.nrows()).map(|i| format!("m{}", i)).collect();
        let samples = (0..data.ncols()).map(|i| format!("s{}", i)).collect();
        ExpressionMatrix::new(data, molecules, samples).unwrap()
    }

    fn naive_pearson(x: &[f64], y: &[f64]) -> f64 {
        let n = x.len() as f64;
        let mx = x.iter().sum::<f64>() / n;
        let my = y.iter().sum::<f64>() / n;
        let cov: f64 = x.iter().zip(y).map(|(a, b)| (a - mx) * (b - my)).sum();
        let vx: f64 = x.iter().map(|a| (a - mx).powi(2)).sum();
        let vy: f64 = y.iter().map(|b| (b - my).powi(2)).sum();
        cov / (vx * vy).sqrt()
    }

    #[test]
    fn test_pearson_matches_naive_formula() {
        let data = array![
            [1.0, 2.0, 3.0, 4.0, 5.5],
            [2.0, 1.5, 3.5, 3.0, 6.0],
            [9.0, 7.0, 4.0, 3.0, 1.0]
        ];
        let m = matrix(data.clone());
        let pool = WorkerPool::new(Some(2)).unwrap();
        let space = PairSpace::exhaustive(3).unwrap();
        let cols: Vec<usize> = (0..5).collect();
        let result = correlate(&m, &cols, &space, CorrelationKind::Pearson, None, &pool).unwrap();

        let rows: Vec<Vec<f64>> = data.rows().into_iter().map(|r| r.to_vec()).collect();
        let expected = [
            naive_pearson(&rows[0], &rows[1]),
            naive_pearson(&rows[0], &rows[2]),
            naive_pearson(&rows[1], &rows[2]),
        ];
        for (got, want) in result.coefficients.iter().zip(expected) {
            assert_relative_eq!(got.unwrap(), want, epsilon = 1e-12);
        }
        assert!(result.p_values.is_none());
    }

    #[test]
    fn test_spearman_kinds_and_ties() {
        let data = array![[1.0, 2.0, 2.0, 4.0], [10.0, 20.0, 30.0, 40.0]];
        let m = matrix(data);
        let pool = WorkerPool::new(Some(1)).unwrap();
        let space = PairSpace::exhaustive(2).unwrap();
        let cols = [0, 1, 2, 3];

        let ranked =
            correlate(&m, &cols, &space, CorrelationKind::SpearmanRanked, None, &pool).unwrap();
        // Ordinal ranks turn the tied row into 1,2,3,4.
        assert_relative_eq!(ranked.coefficients[0].unwrap(), 1.0, epsilon = 1e-12);

        let averaged = correlate(&m, &cols, &space, CorrelationKind::Spearman, None, &pool).unwrap();
        let r = averaged.coefficients[0].unwrap();
        assert!(r < 1.0 && r > 0.9);
    }

    #[test]
    fn test_constant_row_is_missing_but_aligned() {
        let data = array![[1.0, 2.0, 3.0, 4.0], [5.0, 5.0, 5.0, 5.0], [4.0, 3.0, 2.0, 1.0]];
        let m = matrix(data);
        let pool = WorkerPool::new(Some(3)).unwrap();
        let space = PairSpace::exhaustive(3).unwrap();
        let result = correlate(
            &m,
            &[0, 1, 2, 3],
            &space,
            CorrelationKind::Pearson,
            Some(Alternative::TwoSided),
            &pool,
        )
        .unwrap();

        assert_eq!(result.coefficients.len(), 3);
        assert_eq!(result.coefficients[0], None);
        assert_relative_eq!(result.coefficients[1].unwrap(), -1.0, epsilon = 1e-12);
        assert_eq!(result.coefficients[2], None);

        let p = result.p_values.unwrap();
        assert_eq!(p[0], None);
        assert!(p[1].is_some());
    }

    #[test]
    fn test_column_subset_only_uses_cohort() {
        let data = array![[1.0, 2.0, 3.0, 100.0], [1.0, 2.0, 3.0, -100.0]];
        let m = matrix(data);
        let pool = WorkerPool::new(Some(1)).unwrap();
        let space = PairSpace::exhaustive(2).unwrap();
        let result =
            correlate(&m, &[0, 1, 2], &space, CorrelationKind::Pearson, None, &pool).unwrap();
        assert_relative_eq!(result.coefficients[0].unwrap(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_non_finite_row_is_missing_for_every_kind() {
        let data = array![[1.0, f64::NAN, 3.0, 4.0, 5.0], [2.0, 1.0, 4.0, 3.0, 5.0]];
        let m = matrix(data);
        let pool = WorkerPool::new(Some(1)).unwrap();
        let space = PairSpace::exhaustive(2).unwrap();
        let cols: Vec<usize> = (0..5).collect();
        for kind in [
            CorrelationKind::Pearson,
            CorrelationKind::Spearman,
            CorrelationKind::SpearmanRanked,
        ] {
            let result =
                correlate(&m, &cols, &space, kind, Some(Alternative::TwoSided), &pool).unwrap();
            assert_eq!(result.coefficients, vec![None], "{}", kind);
            assert_eq!(result.p_values.unwrap(), vec![None], "{}", kind);
        }
    }

    #[test]
    fn test_small_cohort_rejects_p_values() {
        let data = array![[1.0, 2.0, 3.0, 4.0], [2.0, 1.0, 4.0, 3.0]];
        let m = matrix(data);
        let pool = WorkerPool::new(Some(1)).unwrap();
        let space = PairSpace::exhaustive(2).unwrap();
        let alt = Some(Alternative::TwoSided);
        for cols in [&[0, 1][..], &[0, 1, 2][..]] {
            assert!(correlate(&m, cols, &space, CorrelationKind::Pearson, alt, &pool).is_err());
            let plain = correlate(&m, cols, &space, CorrelationKind::Pearson, None, &pool).unwrap();
            assert!(plain.coefficients[0].is_some());
        }
        let four = correlate(&m, &[0, 1, 2, 3], &space, CorrelationKind::Pearson, alt, &pool).unwrap();
        assert!(four.p_values.unwrap()[0].is_some());
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("Spearman".parse::<CorrelationKind>().unwrap(), CorrelationKind::Spearman);
        assert_eq!(
            "spearman_ranked".parse::<CorrelationKind>().unwrap(),
            CorrelationKind::SpearmanRanked
        );
        assert!("kendall".parse::<CorrelationKind>().is_err());
    }
}
