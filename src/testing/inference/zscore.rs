//! Per-molecule aggregate differential scores.
//!
//! A molecule's score summarizes the z statistics of the pairs it belongs to. Significance comes
//! from the same label permutation as the pairwise test: every repeat recomputes all pair
//! statistics, re-aggregates them and compares each permuted score with the observed one.

use anyhow::{Result, anyhow};
use single_utilities::traits::FloatOpsTS;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

use crate::correlation::CorrelationKind;
use crate::matrix::{Cohorts, ExpressionMatrix};
use crate::pairs::{PairCodec, PairSpace, WorkerPool};
use crate::testing::correction::FdrMethod;
use crate::testing::inference::ztest::{cohort_profiles, pair_statistics};
use crate::testing::permutation::{CohortPermuter, DEFAULT_SEED};
use crate::testing::utils::{Tally, report_order};
use crate::testing::{Alternative, ZScoreResults};

/// Reduces the statistics of one molecule's pairs to a single score.
pub trait ScoreAggregator: Sync {
    /// `values` holds only defined statistics and may be reordered. `None` if it is empty.
    fn aggregate(&self, values: &mut [f64]) -> Option<f64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Aggregator {
    #[default]
    Mean,
    Median,
}

impl Aggregator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregator::Mean => "mean",
            Aggregator::Median => "median",
        }
    }
}

impl ScoreAggregator for Aggregator {
    fn aggregate(&self, values: &mut [f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        match self {
            Aggregator::Mean => Some(values.iter().sum::<f64>() / values.len() as f64),
            Aggregator::Median => {
                values.sort_unstable_by(f64::total_cmp);
                let mid = values.len() / 2;
                if values.len() % 2 == 0 {
                    Some((values[mid - 1] + values[mid]) / 2.0)
                } else {
                    Some(values[mid])
                }
            }
        }
    }
}

impl fmt::Display for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Aggregator {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" => Ok(Aggregator::Mean),
            "median" => Ok(Aggregator::Median),
            other => Err(anyhow!(
                "Unknown aggregator '{}', expected mean or median",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZScoreOptions {
    pub kind: CorrelationKind,
    pub alternative: Alternative,
    pub aggregator: Aggregator,
    pub repeats: usize,
    pub seed: u64,
    pub fdr_method: FdrMethod,
}

impl Default for ZScoreOptions {
    fn default() -> Self {
        ZScoreOptions {
            kind: CorrelationKind::Pearson,
            alternative: Alternative::TwoSided,
            aggregator: Aggregator::Mean,
            repeats: 0,
            seed: DEFAULT_SEED,
            fdr_method: FdrMethod::RankScaled,
        }
    }
}

impl ZScoreOptions {
    pub fn new(kind: CorrelationKind, alternative: Alternative, aggregator: Aggregator) -> Self {
        ZScoreOptions {
            kind,
            alternative,
            aggregator,
            ..Default::default()
        }
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

/// Which pair indices feed each scored molecule.
#[derive(Debug, Clone)]
pub struct MoleculeGroups {
    molecules: Vec<usize>,
    members: Members,
}

#[derive(Debug, Clone)]
enum Members {
    /// Every pair touching the molecule.
    Partners(PairCodec),
    /// Pair indices sorted by source; group `g` is `order[starts[g]..starts[g + 1]]`.
    BySource { order: Vec<usize>, starts: Vec<usize> },
}

impl MoleculeGroups {
    pub fn new(pairs: &PairSpace) -> Self {
        match pairs {
            PairSpace::Exhaustive(codec) => MoleculeGroups {
                molecules: (0..codec.molecules()).collect(),
                members: Members::Partners(*codec),
            },
            PairSpace::Explicit { sources, .. } => {
                let mut order: Vec<usize> = (0..sources.len()).collect();
                order.sort_by_key(|&i| sources[i]);

                let mut molecules = Vec::new();
                let mut starts = Vec::new();
                for (position, &i) in order.iter().enumerate() {
                    if molecules.last() != Some(&sources[i]) {
                        molecules.push(sources[i]);
                        starts.push(position);
                    }
                }
                starts.push(order.len());
                MoleculeGroups {
                    molecules,
                    members: Members::BySource { order, starts },
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.molecules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.molecules.is_empty()
    }

    pub fn molecules(&self) -> &[usize] {
        &self.molecules
    }

    /// Aggregate the defined statistics of group `g`, using `buf` as scratch space.
    fn score(
        &self,
        g: usize,
        statistics: &[Option<f64>],
        absolute: bool,
        aggregator: &dyn ScoreAggregator,
        buf: &mut Vec<f64>,
    ) -> Option<f64> {
        buf.clear();
        let value = |i: usize| statistics[i].map(|s| if absolute { s.abs() } else { s });
        match &self.members {
            Members::Partners(codec) => {
                buf.extend(codec.partners(self.molecules[g]).filter_map(value));
            }
            Members::BySource { order, starts } => {
                buf.extend(order[starts[g]..starts[g + 1]].iter().filter_map(|&i| value(i)));
            }
        }
        aggregator.aggregate(buf)
    }

    fn scores(
        &self,
        statistics: &[Option<f64>],
        alternative: Alternative,
        aggregator: &dyn ScoreAggregator,
        pool: &WorkerPool,
    ) -> Result<Vec<Option<f64>>> {
        let absolute = alternative == Alternative::TwoSided;
        pool.map_ranges(self.len(), |range| {
            let mut buf = Vec::new();
            Ok(range
                .map(|g| self.score(g, statistics, absolute, aggregator, &mut buf))
                .collect())
        })
    }
}

/// Score every molecule with the configured [`Aggregator`].
pub fn differential_zscore<T>(
    matrix: &ExpressionMatrix<T>,
    cohorts: &Cohorts,
    pairs: &PairSpace,
    options: &ZScoreOptions,
    pool: &WorkerPool,
) -> Result<ZScoreResults>
where
    T: FloatOpsTS,
{
    zscore_with(matrix, cohorts, pairs, options, &options.aggregator, pool)
}

/// Score every molecule with a caller-supplied aggregator.
///
/// Two-sided runs aggregate absolute statistics, one-sided runs keep the sign. Exhaustive spaces
/// score each molecule over all of its partners, explicit spaces over the pairs it is the source
/// of.
pub fn zscore_with<T>(
    matrix: &ExpressionMatrix<T>,
    cohorts: &Cohorts,
    pairs: &PairSpace,
    options: &ZScoreOptions,
    aggregator: &dyn ScoreAggregator,
    pool: &WorkerPool,
) -> Result<ZScoreResults>
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
    let groups = MoleculeGroups::new(pairs);
    info!(
        molecules = groups.len(),
        pairs = pairs.len(),
        kind = %options.kind,
        repeats = options.repeats,
        "differential z-score"
    );

    let (reference, experimental) = cohort_profiles(matrix, cohorts, options.kind, pool)?;
    let observed_statistics = pair_statistics(&reference, &experimental, pairs, pool)?;
    let scores = groups.scores(&observed_statistics, options.alternative, aggregator, pool)?;
    drop(observed_statistics);

    let mut tallies = vec![Tally::default(); groups.len()];
    let mut permuter = CohortPermuter::new(cohorts, options.seed);
    let milestone = (options.repeats / 10).max(1);

    for repeat in 0..options.repeats {
        let split = permuter.next_split();
        let (reference, experimental) = cohort_profiles(matrix, &split, options.kind, pool)?;
        let statistics = pair_statistics(&reference, &experimental, pairs, pool)?;
        let permuted = groups.scores(&statistics, options.alternative, aggregator, pool)?;

        for ((tally, observed), resampled) in tallies.iter_mut().zip(&scores).zip(&permuted) {
            if let (Some(observed), Some(resampled)) = (observed, resampled) {
                tally.record(options.alternative.is_as_extreme(*observed, *resampled));
            }
        }

        if (repeat + 1) % milestone == 0 {
            debug!(done = repeat + 1, total = options.repeats, "z-score permutations");
        }
    }

    let p_values: Vec<Option<f64>> = tallies.iter().map(Tally::p_value).collect();
    let adjusted_p_values = options.fdr_method.adjust_optional(&p_values)?;
    let order = report_order(&adjusted_p_values, &p_values);

    Ok(ZScoreResults {
        molecules: groups.molecules,
        scores,
        p_values,
        adjusted_p_values,
        order,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    struct MaxAbs;

    impl ScoreAggregator for MaxAbs {
        fn aggregate(&self, values: &mut [f64]) -> Option<f64> {
            values.iter().map(|v| v.abs()).reduce(f64::max)
        }
    }

    fn hub_matrix() -> (ExpressionMatrix<f64>, Cohorts) {
        // Molecule 0 tracks 1 and 2 in the reference cohort only.
        let n_samples = 20;
        let mut data = Array2::<f64>::zeros((5, n_samples));
        for s in 0..n_samples {
            let x = s as f64;
            let noise = ((s * 13) % 7) as f64 * 0.3;
            data[[0, s]] = x;
            data[[1, s]] = if s < 10 { x + noise } else { ((s * 11) % 9) as f64 };
            data[[2, s]] = if s < 10 { 2.0 * x - noise } else { ((s * 5) % 8) as f64 };
            data[[3, s]] = ((s * 3) % 7) as f64 + noise;
            data[[4, s]] = ((s * 17) % 10) as f64;
        }
        let molecules = (0..5).map(|i| format!("m{}", i)).collect();
        let samples = (0..n_samples).map(|i| format!("s{}", i)).collect();
        let matrix = ExpressionMatrix::new(data, molecules, samples).unwrap();
        let cohorts = Cohorts::new((0..10).collect(), (10..20).collect()).unwrap();
        (matrix, cohorts)
    }

    #[test]
    fn test_aggregators() {
        let mut values = vec![3.0, -1.0, 2.0, 10.0];
        assert_relative_eq!(Aggregator::Mean.aggregate(&mut values).unwrap(), 3.5);
        assert_relative_eq!(Aggregator::Median.aggregate(&mut values).unwrap(), 2.5);
        assert_eq!(Aggregator::Median.aggregate(&mut [5.0, 1.0, 3.0]), Some(3.0));
        let mut empty: Vec<f64> = Vec::new();
        assert_eq!(Aggregator::Mean.aggregate(&mut empty), None);
        assert_eq!("Median".parse::<Aggregator>().unwrap(), Aggregator::Median);
        assert!("mode".parse::<Aggregator>().is_err());
    }

    #[test]
    fn test_groups_by_source_for_explicit_pairs() {
        let space = PairSpace::explicit(4, vec![2, 0, 2, 1], vec![0, 3, 3, 2]).unwrap();
        let groups = MoleculeGroups::new(&space);
        assert_eq!(groups.molecules(), &[0, 1, 2]);

        let stats = vec![Some(1.0), Some(-4.0), Some(3.0), None];
        let mut buf = Vec::new();
        assert_eq!(groups.score(0, &stats, false, &Aggregator::Mean, &mut buf), Some(-4.0));
        assert_eq!(groups.score(1, &stats, false, &Aggregator::Mean, &mut buf), None);
        assert_eq!(groups.score(2, &stats, false, &Aggregator::Mean, &mut buf), Some(2.0));
        assert_eq!(groups.score(0, &stats, true, &Aggregator::Mean, &mut buf), Some(4.0));
    }

    #[test]
    fn test_exhaustive_groups_cover_all_partners() {
        let space = PairSpace::exhaustive(4).unwrap();
        let groups = MoleculeGroups::new(&space);
        assert_eq!(groups.len(), 4);
        // Pair statistic = pair index, so molecule 3 sees pairs 2, 4, 5.
        let stats: Vec<Option<f64>> = (0..6).map(|i| Some(i as f64)).collect();
        let mut buf = Vec::new();
        let score = groups.score(3, &stats, false, &Aggregator::Mean, &mut buf);
        assert_relative_eq!(score.unwrap(), 11.0 / 3.0);
    }

    #[test]
    fn test_hub_scores_highest_and_is_reproducible() {
        let (matrix, cohorts) = hub_matrix();
        let pairs = PairSpace::exhaustive(5).unwrap();
        let options = ZScoreOptions::default().with_repeats(30).with_seed(5);

        let a = differential_zscore(
            &matrix,
            &cohorts,
            &pairs,
            &options,
            &WorkerPool::new(Some(1)).unwrap(),
        )
        .unwrap();
        let b = differential_zscore(
            &matrix,
            &cohorts,
            &pairs,
            &options,
            &WorkerPool::new(Some(3)).unwrap(),
        )
        .unwrap();

        assert_eq!(a.len(), 5);
        assert_eq!(a.scores, b.scores);
        assert_eq!(a.p_values, b.p_values);
        assert!(a.p_values.iter().all(|p| p.is_some()));

        let best = a
            .scores
            .iter()
            .enumerate()
            .max_by(|x, y| x.1.unwrap().total_cmp(&y.1.unwrap()))
            .unwrap()
            .0;
        assert!([0, 1, 2].contains(&best));
    }

    #[test]
    fn test_zero_repeats_leave_p_values_missing() {
        let (matrix, cohorts) = hub_matrix();
        let pairs = PairSpace::exhaustive(5).unwrap();
        let pool = WorkerPool::new(Some(2)).unwrap();
        let results = zscore_with(
            &matrix,
            &cohorts,
            &pairs,
            &ZScoreOptions::default(),
            &MaxAbs,
            &pool,
        )
        .unwrap();
        assert!(results.scores.iter().all(|s| s.is_some_and(|s| s >= 0.0)));
        assert!(results.p_values.iter().all(Option::is_none));
        assert_eq!(results.order, vec![0, 1, 2, 3, 4]);
    }
}
