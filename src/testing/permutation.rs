//! Cohort label permutation.
//!
//! Resampling keeps the cohort sizes and the pooled sample set fixed and only reassigns which
//! samples are called "reference" and which "experimental". That is the null hypothesis of no
//! group effect on the correlation structure.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::matrix::Cohorts;

pub const DEFAULT_SEED: u64 = 733;

/// Draws relabelled cohort splits from a seeded generator.
pub struct CohortPermuter {
    pooled: Vec<usize>,
    reference_size: usize,
    rng: StdRng,
}

impl CohortPermuter {
    pub fn new(cohorts: &Cohorts, seed: u64) -> Self {
        CohortPermuter {
            pooled: cohorts.pooled(),
            reference_size: cohorts.reference.len(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Next `(reference, experimental)` column split.
    pub fn next_split(&mut self) -> Cohorts {
        self.pooled.shuffle(&mut self.rng);
        let (reference, experimental) = self.pooled.split_at(self.reference_size);
        Cohorts {
            reference: reference.to_vec(),
            experimental: experimental.to_vec(),
        }
    }
}
