use single_utilities::traits::FloatOpsTS;

use crate::correlation::{CorrelationKind, CorrelationResults, correlate};
use crate::matrix::{Cohorts, ExpressionMatrix};
use crate::pairs::{PairSpace, WorkerPool};
use crate::testing::{Alternative, ZScoreResults, ZTestResults};

pub mod fisher;

pub mod ztest;

pub mod zscore;

pub use zscore::{Aggregator, ScoreAggregator, ZScoreOptions};
pub use ztest::ZTestOptions;

/// Differential correlation tests over the rows of an expression matrix.
pub trait MatrixDiffCorrTests<T>
where
    T: FloatOpsTS,
{
    fn correlations(
        &self,
        columns: &[usize],
        pairs: &PairSpace,
        kind: CorrelationKind,
        alternative: Option<Alternative>,
        pool: &WorkerPool,
    ) -> anyhow::Result<CorrelationResults>;

    fn ztest(
        &self,
        cohorts: &Cohorts,
        pairs: &PairSpace,
        options: &ZTestOptions,
        pool: &WorkerPool,
    ) -> anyhow::Result<ZTestResults>;

    fn zscore(
        &self,
        cohorts: &Cohorts,
        pairs: &PairSpace,
        options: &ZScoreOptions,
        pool: &WorkerPool,
    ) -> anyhow::Result<ZScoreResults>;
}

impl<T> MatrixDiffCorrTests<T> for ExpressionMatrix<T>
where
    T: FloatOpsTS,
{
    fn correlations(
        &self,
        columns: &[usize],
        pairs: &PairSpace,
        kind: CorrelationKind,
        alternative: Option<Alternative>,
        pool: &WorkerPool,
    ) -> anyhow::Result<CorrelationResults> {
        correlate(self, columns, pairs, kind, alternative, pool)
    }

    fn ztest(
        &self,
        cohorts: &Cohorts,
        pairs: &PairSpace,
        options: &ZTestOptions,
        pool: &WorkerPool,
    ) -> anyhow::Result<ZTestResults> {
        ztest::differential_ztest(self, cohorts, pairs, options, pool)
    }

    fn zscore(
        &self,
        cohorts: &Cohorts,
        pairs: &PairSpace,
        options: &ZScoreOptions,
        pool: &WorkerPool,
    ) -> anyhow::Result<ZScoreResults> {
        zscore::differential_zscore(self, cohorts, pairs, options, pool)
    }
}
