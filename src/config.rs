use anyhow::{Result, bail};
use std::path::{Path, PathBuf};

use crate::correlation::CorrelationKind;
use crate::report::{DEFAULT_CHUNK_ROWS, check_output_dir};
use crate::testing::Alternative;
use crate::testing::correction::FdrMethod;
use crate::testing::inference::Aggregator;
use crate::testing::permutation::DEFAULT_SEED;

pub const DEFAULT_FDR: f64 = 0.05;

/// Settings of one differential correlation run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub matrix_path: PathBuf,
    pub grouping_path: PathBuf,
    pub candidates_path: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub reference_group: String,
    pub experimental_group: String,
    pub kind: CorrelationKind,
    pub alternative: Alternative,
    pub correlation_alternative: Alternative,
    pub aggregator: Aggregator,
    /// `None` picks a repeat count from the run size.
    pub repeats: Option<usize>,
    /// `None` uses every available core.
    pub workers: Option<usize>,
    pub fdr: f64,
    pub fdr_method: FdrMethod,
    /// Count enrichment occurrences only on the source side of an edge.
    pub oriented: bool,
    pub seed: u64,
    pub chunk_rows: usize,
}

impl RunConfig {
    pub fn new(
        matrix_path: impl Into<PathBuf>,
        grouping_path: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        reference_group: impl Into<String>,
        experimental_group: impl Into<String>,
    ) -> Self {
        RunConfig {
            matrix_path: matrix_path.into(),
            grouping_path: grouping_path.into(),
            candidates_path: None,
            output_dir: output_dir.into(),
            reference_group: reference_group.into(),
            experimental_group: experimental_group.into(),
            kind: CorrelationKind::default(),
            alternative: Alternative::default(),
            correlation_alternative: Alternative::TwoSided,
            aggregator: Aggregator::default(),
            repeats: None,
            workers: None,
            fdr: DEFAULT_FDR,
            fdr_method: FdrMethod::default(),
            oriented: true,
            seed: DEFAULT_SEED,
            chunk_rows: DEFAULT_CHUNK_ROWS,
        }
    }

    pub fn with_candidates(mut self, path: impl Into<PathBuf>) -> Self {
        self.candidates_path = Some(path.into());
        self
    }

    pub fn with_kind(mut self, kind: CorrelationKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_alternative(mut self, alternative: Alternative) -> Self {
        self.alternative = alternative;
        self
    }

    pub fn with_correlation_alternative(mut self, alternative: Alternative) -> Self {
        self.correlation_alternative = alternative;
        self
    }

    pub fn with_aggregator(mut self, aggregator: Aggregator) -> Self {
        self.aggregator = aggregator;
        self
    }

    pub fn with_repeats(mut self, repeats: usize) -> Self {
        self.repeats = Some(repeats);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn with_fdr(mut self, fdr: f64) -> Self {
        self.fdr = fdr;
        self
    }

    pub fn with_fdr_method(mut self, method: FdrMethod) -> Self {
        self.fdr_method = method;
        self
    }

    pub fn with_oriented(mut self, oriented: bool) -> Self {
        self.oriented = oriented;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_chunk_rows(mut self, chunk_rows: usize) -> Self {
        self.chunk_rows = chunk_rows;
        self
    }

    /// Checks that need no data: numeric ranges, labels and paths.
    pub fn validate_settings(&self) -> Result<()> {
        if !(self.fdr > 0.0 && self.fdr < 1.0) {
            bail!("FDR threshold must lie in (0, 1), got {}", self.fdr);
        }
        if self.workers == Some(0) {
            bail!("Worker count must be at least 1");
        }
        if self.chunk_rows == 0 {
            bail!("Report batch length must be at least 1");
        }
        if self.reference_group == self.experimental_group {
            bail!(
                "Reference and experimental groups are both '{}'",
                self.reference_group
            );
        }
        Ok(())
    }

    /// Every check that can run before any computation starts.
    pub fn validate(&self) -> Result<()> {
        self.validate_settings()?;
        ensure_file(&self.matrix_path, "Expression matrix")?;
        ensure_file(&self.grouping_path, "Sample grouping")?;
        if let Some(path) = &self.candidates_path {
            ensure_file(path, "Candidate pair list")?;
        }
        check_output_dir(&self.output_dir)
    }

    /// Label permutations for the pairwise test.
    ///
    /// Exhaustive runs skip resampling unless asked; candidate runs default to enough repeats
    /// for the smallest empirical p-value to clear the FDR threshold.
    pub fn ztest_repeats(&self, pairs: usize, exhaustive: bool) -> usize {
        match self.repeats {
            Some(r) => r,
            None if exhaustive => 0,
            None => scaled_repeats(pairs, self.fdr),
        }
    }

    /// Label permutations for the per-molecule score test.
    pub fn zscore_repeats(&self, pairs: usize, molecules: usize, exhaustive: bool) -> usize {
        match self.repeats {
            Some(r) => r,
            None if exhaustive => scaled_repeats(molecules, self.fdr),
            None => scaled_repeats(pairs, self.fdr),
        }
    }
}

fn scaled_repeats(count: usize, fdr: f64) -> usize {
    (count as f64 / fdr).ceil() as usize
}

fn ensure_file(path: &Path, what: &str) -> Result<()> {
    if !path.is_file() {
        bail!("{} {} does not exist or is not a file", what, path.display());
    }
    Ok(())
}
