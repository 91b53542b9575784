use anyhow::{Result, anyhow};
use std::fmt;
use std::str::FromStr;

pub mod correction;
pub mod inference;
pub mod permutation;

pub mod utils;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Alternative {
    #[default]
    TwoSided,
    Less,
    Greater,
}

impl Alternative {
    pub fn as_str(&self) -> &'static str {
        match self {
            Alternative::TwoSided => "two-sided",
            Alternative::Less => "less",
            Alternative::Greater => "greater",
        }
    }

    /// Whether a resampled statistic is at least as extreme as the observed one.
    #[inline]
    pub fn is_as_extreme(&self, observed: f64, resampled: f64) -> bool {
        match self {
            Alternative::TwoSided => resampled.abs() >= observed.abs(),
            Alternative::Less => resampled <= observed,
            Alternative::Greater => resampled >= observed,
        }
    }
}

impl fmt::Display for Alternative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Alternative {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "two-sided" => Ok(Alternative::TwoSided),
            "less" => Ok(Alternative::Less),
            "greater" => Ok(Alternative::Greater),
            other => Err(anyhow!(
                "Unknown alternative '{}', expected two-sided, less or greater",
                other
            )),
        }
    }
}

/// Outcome of comparing one pair's correlation between cohorts.
///
/// Every field is `None` when the value is undefined, for example when a cohort row has zero
/// variance or a correlation sits on the ±1 boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PairTest {
    pub ref_corr: Option<f64>,
    pub ref_pvalue: Option<f64>,
    pub exp_corr: Option<f64>,
    pub exp_pvalue: Option<f64>,
    pub statistic: Option<f64>,
    pub p_value: Option<f64>,
}

/// Per-pair differential correlation results, aligned with a [`crate::pairs::PairSpace`].
#[derive(Debug, Clone)]
pub struct ZTestResults {
    pub tests: Vec<PairTest>,
    pub adjusted_p_values: Vec<Option<f64>>,
    /// `None` when no resampling was requested.
    pub permutation_p_values: Option<Vec<Option<f64>>>,
    /// Row order for reporting: ascending by (adjusted p-value, p-value).
    pub order: Vec<usize>,
}

impl ZTestResults {
    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Indices of pairs with an adjusted p-value below `alpha`.
    pub fn significant_indices(&self, alpha: f64) -> Vec<usize> {
        self.adjusted_p_values
            .iter()
            .enumerate()
            .filter_map(|(i, p)| match p {
                Some(p) if *p < alpha => Some(i),
                _ => None,
            })
            .collect()
    }

    /// Number of pairs with an adjusted p-value below `alpha`.
    pub fn num_significant(&self, alpha: f64) -> usize {
        self.significant_indices(alpha).len()
    }
}

/// Per-molecule aggregate differential scores.
#[derive(Debug, Clone)]
pub struct ZScoreResults {
    /// Matrix row position of each scored molecule.
    pub molecules: Vec<usize>,
    pub scores: Vec<Option<f64>>,
    pub p_values: Vec<Option<f64>>,
    pub adjusted_p_values: Vec<Option<f64>>,
    pub order: Vec<usize>,
}

impl ZScoreResults {
    pub fn len(&self) -> usize {
        self.molecules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.molecules.is_empty()
    }
}
