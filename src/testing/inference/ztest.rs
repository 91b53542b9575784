//! Pairwise differential correlation z-test with optional label-permutation p-values.

use anyhow::{Result, anyhow};
use single_utilities::traits::FloatOpsTS;
use tracing::{debug, info};

use crate::correlation::{CohortProfile, CorrelationKind, correlate};
use crate::matrix::{Cohorts, ExpressionMatrix};
use crate::pairs::{PairSpace, WorkerPool};
use crate::testing::correction::FdrMethod;
use crate::testing::inference::fisher::{correlation_difference_test, fisher_difference};
use crate::testing::permutation::{CohortPermuter, DEFAULT_SEED};
use crate::testing::utils::{Tally, report_order};
use crate::testing::{Alternative, PairTest, ZTestResults};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZTestOptions {
    pub kind: CorrelationKind,
    pub alternative: Alternative,
    /// Alternative of the per-cohort test against zero correlation.
    pub correlation_alternative: Alternative,
    /// Label permutations; 0 disables the resampling stage.
    pub repeats: usize,
    pub seed: u64,
    pub fdr_method: FdrMethod,
}

impl Default for ZTestOptions {
    fn default() -> Self {
        ZTestOptions {
            kind: CorrelationKind::Pearson,
            alternative: Alternative::TwoSided,
            correlation_alternative: Alternative::TwoSided,
            repeats: 0,
            seed: DEFAULT_SEED,
            fdr_method: FdrMethod::RankScaled,
        }
    }
}

impl ZTestOptions {
    pub fn new(kind: CorrelationKind, alternative: Alternative) -> Self {
        ZTestOptions {
            kind,
            alternative,
            ..Default::default()
        }
    }

    pub fn with_correlation_alternative(mut self, alternative: Alternative) -> Self {
        self.correlation_alternative = alternative;
        self
    }

    pub fn with_repeats(mut self, repeats: usize) -> Self {
        self.repeats = repeats;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_fdr_method(mut self, method: FdrMethod) -> Self {
        self.fdr_method = method;
        self
    }
}

/// Combine per-cohort correlations into per-pair differential tests.
///
/// The two arrays must describe the same pairs; a length mismatch is an error rather than a
/// truncated result.
pub fn ztest_from_correlations(
    reference: &[Option<f64>],
    reference_size: usize,
    experimental: &[Option<f64>],
    experimental_size: usize,
    kind: CorrelationKind,
    alternative: Alternative,
) -> Result<Vec<(Option<f64>, Option<f64>)>> {
    if reference.len() != experimental.len() {
        return Err(anyhow!(
            "Reference and experimental correlation arrays differ in length ({} vs {})",
            reference.len(),
            experimental.len()
        ));
    }
    Ok(reference
        .iter()
        .zip(experimental)
        .map(|(&r1, &r2)| {
            match correlation_difference_test(
                r1,
                reference_size,
                r2,
                experimental_size,
                kind,
                alternative,
            ) {
                Some((stat, p)) => (Some(stat), Some(p)),
                None => (None, None),
            }
        })
        .collect())
}

/// Standardized profiles of both cohorts.
pub(crate) fn cohort_profiles<T>(
    matrix: &ExpressionMatrix<T>,
    cohorts: &Cohorts,
    kind: CorrelationKind,
    pool: &WorkerPool,
) -> Result<(CohortProfile, CohortProfile)>
where
    T: FloatOpsTS,
{
    let reference = CohortProfile::build(matrix, &cohorts.reference, kind, pool)?;
    let experimental = CohortProfile::build(matrix, &cohorts.experimental, kind, pool)?;
    Ok((reference, experimental))
}

/// `atanh(r_ref) - atanh(r_exp)` for every pair of the space, in index order.
pub(crate) fn pair_statistics(
    reference: &CohortProfile,
    experimental: &CohortProfile,
    pairs: &PairSpace,
    pool: &WorkerPool,
) -> Result<Vec<Option<f64>>> {
    pool.map_ranges(pairs.len(), |range| {
        Ok(pairs
            .pairs_in(range)
            .map(|(s, t)| {
                fisher_difference(reference.correlation(s, t), experimental.correlation(s, t))
            })
            .collect())
    })
}

/// Run the differential z-test over `pairs`.
pub fn differential_ztest<T>(
    matrix: &ExpressionMatrix<T>,
    cohorts: &Cohorts,
    pairs: &PairSpace,
    options: &ZTestOptions,
    pool: &WorkerPool,
) -> Result<ZTestResults>
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
    info!(
        pairs = pairs.len(),
        reference = cohorts.reference.len(),
        experimental = cohorts.experimental.len(),
        kind = %options.kind,
        repeats = options.repeats,
        "differential z-test"
    );

    let corr_alt = Some(options.correlation_alternative);
    let reference = correlate(matrix, &cohorts.reference, pairs, options.kind, corr_alt, pool)?;
    let experimental =
        correlate(matrix, &cohorts.experimental, pairs, options.kind, corr_alt, pool)?;

    let differences = ztest_from_correlations(
        &reference.coefficients,
        cohorts.reference.len(),
        &experimental.coefficients,
        cohorts.experimental.len(),
        options.kind,
        options.alternative,
    )?;

    let ref_p = reference.p_values.unwrap_or_default();
    let exp_p = experimental.p_values.unwrap_or_default();
    let tests: Vec<PairTest> = differences
        .into_iter()
        .enumerate()
        .map(|(i, (statistic, p_value))| PairTest {
            ref_corr: reference.coefficients[i],
            ref_pvalue: ref_p.get(i).copied().flatten(),
            exp_corr: experimental.coefficients[i],
            exp_pvalue: exp_p.get(i).copied().flatten(),
            statistic,
            p_value,
        })
        .collect();

    let missing = tests.iter().filter(|t| t.statistic.is_none()).count();
    if missing > 0 {
        debug!(missing, "pairs without a defined z statistic");
    }

    let permutation_p_values = if options.repeats > 0 {
        let observed: Vec<Option<f64>> = tests.iter().map(|t| t.statistic).collect();
        Some(permutation_p_values(
            matrix, cohorts, pairs, &observed, options, pool,
        )?)
    } else {
        None
    };

    let p_values: Vec<Option<f64>> = tests.iter().map(|t| t.p_value).collect();
    let adjusted_p_values = options.fdr_method.adjust_optional(&p_values)?;
    let order = report_order(&adjusted_p_values, &p_values);

    Ok(ZTestResults {
        tests,
        adjusted_p_values,
        permutation_p_values,
        order,
    })
}

/// Empirical p-values from relabelled cohorts.
///
/// Each repeat rebuilds both cohort profiles from a fresh split and every chunk updates the
/// tallies of its own pair window. Draws where the permuted statistic is undefined are not
/// counted.
fn permutation_p_values<T>(
    matrix: &ExpressionMatrix<T>,
    cohorts: &Cohorts,
    pairs: &PairSpace,
    observed: &[Option<f64>],
    options: &ZTestOptions,
    pool: &WorkerPool,
) -> Result<Vec<Option<f64>>>
where
    T: FloatOpsTS,
{
    let mut permuter = CohortPermuter::new(cohorts, options.seed);
    let mut tallies = vec![Tally::default(); pairs.len()];
    let milestone = (options.repeats / 10).max(1);

    for repeat in 0..options.repeats {
        let split = permuter.next_split();
        let (reference, experimental) = cohort_profiles(matrix, &split, options.kind, pool)?;

        pool.fill_ranges(&mut tallies, |range, window| {
            let observed = &observed[range.clone()];
            for (((s, t), tally), obs) in pairs.pairs_in(range).zip(window).zip(observed) {
                let Some(obs) = *obs else { continue };
                let resampled =
                    fisher_difference(reference.correlation(s, t), experimental.correlation(s, t));
                if let Some(resampled) = resampled {
                    tally.record(options.alternative.is_as_extreme(obs, resampled));
                }
            }
            Ok(())
        })?;

        if (repeat + 1) % milestone == 0 {
            debug!(done = repeat + 1, total = options.repeats, "z-test permutations");
        }
    }

    Ok(tallies.iter().map(Tally::p_value).collect())
}
