//! One-shot runs of the three tools over in-memory inputs.

use anyhow::Result;
use single_utilities::traits::FloatOpsTS;
use std::path::PathBuf;
use tracing::info;

use crate::config::RunConfig;
use crate::enrichment::{EnrichmentResults, hypergeometric_enrichment, significant_edges};
use crate::matrix::{Cohorts, ExpressionMatrix, SampleGrouping, resolve_candidates};
use crate::pairs::{PairSpace, WorkerPool};
use crate::report::{
    HypergeomTable, ZScoreTable, ZTestTable, check_output_dir, hypergeom_file_name,
    write_report, zscore_file_name, ztest_file_name,
};
use crate::testing::inference::{MatrixDiffCorrTests, ZScoreOptions, ZTestOptions};
use crate::testing::{ZScoreResults, ZTestResults};

/// A validated run: the retained matrix, its pair space, both cohorts and a worker pool.
pub struct DiffCorrAnalysis<T> {
    matrix: ExpressionMatrix<T>,
    pairs: PairSpace,
    cohorts: Cohorts,
    config: RunConfig,
    pool: WorkerPool,
}

impl<T> DiffCorrAnalysis<T>
where
    T: FloatOpsTS,
{
    /// Resolve cohorts and pairs and check the output directory before anything is computed.
    ///
    /// Without `candidates` every unordered pair of the matrix rows is analysed.
    pub fn new(
        matrix: ExpressionMatrix<T>,
        grouping: &SampleGrouping,
        candidates: Option<&[(String, String)]>,
        config: RunConfig,
    ) -> Result<Self> {
        config.validate_settings()?;
        check_output_dir(&config.output_dir)?;

        let cohorts = Cohorts::from_grouping(
            matrix.samples(),
            grouping,
            &config.reference_group,
            &config.experimental_group,
        )?;
        let (matrix, pairs) = match candidates {
            Some(candidates) => resolve_candidates(&matrix, candidates)?,
            None => {
                let pairs = PairSpace::exhaustive(matrix.n_molecules())?;
                (matrix, pairs)
            }
        };
        let pool = WorkerPool::new(config.workers)?;

        info!(
            molecules = matrix.n_molecules(),
            pairs = pairs.len(),
            exhaustive = pairs.is_exhaustive(),
            workers = pool.workers(),
            "differential correlation run prepared"
        );

        Ok(DiffCorrAnalysis {
            matrix,
            pairs,
            cohorts,
            config,
            pool,
        })
    }

    pub fn matrix(&self) -> &ExpressionMatrix<T> {
        &self.matrix
    }

    pub fn pairs(&self) -> &PairSpace {
        &self.pairs
    }

    pub fn cohorts(&self) -> &Cohorts {
        &self.cohorts
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn ztest_options(&self) -> ZTestOptions {
        ZTestOptions::new(self.config.kind, self.config.alternative)
            .with_correlation_alternative(self.config.correlation_alternative)
            .with_repeats(
                self.config
                    .ztest_repeats(self.pairs.len(), self.pairs.is_exhaustive()),
            )
            .with_seed(self.config.seed)
            .with_fdr_method(self.config.fdr_method)
    }

    pub fn zscore_options(&self) -> ZScoreOptions {
        ZScoreOptions::new(
            self.config.kind,
            self.config.alternative,
            self.config.aggregator,
        )
        .with_repeats(self.config.zscore_repeats(
            self.pairs.len(),
            self.pairs.molecules(),
            self.pairs.is_exhaustive(),
        ))
        .with_seed(self.config.seed)
        .with_fdr_method(self.config.fdr_method)
    }

    pub fn ztest(&self) -> Result<ZTestResults> {
        self.matrix
            .ztest(&self.cohorts, &self.pairs, &self.ztest_options(), &self.pool)
    }

    pub fn zscore(&self) -> Result<ZScoreResults> {
        self.matrix
            .zscore(&self.cohorts, &self.pairs, &self.zscore_options(), &self.pool)
    }

    /// Enrichment of the edges of `ztest` that pass the configured FDR threshold.
    pub fn hypergeom(&self, ztest: &ZTestResults) -> Result<EnrichmentResults> {
        let significant = significant_edges(ztest, self.config.fdr, self.config.alternative);
        info!(
            significant = significant.len(),
            fdr = self.config.fdr,
            "differential edges selected for enrichment"
        );
        hypergeometric_enrichment(
            &self.pairs,
            &significant,
            self.config.oriented,
            self.config.fdr_method,
        )
    }

    pub fn write_ztest(&self, results: &ZTestResults) -> Result<PathBuf> {
        let path = self
            .config
            .output_dir
            .join(ztest_file_name(self.config.kind, self.config.alternative));
        let table = ZTestTable::new(results, &self.pairs, self.matrix.molecules())?;
        write_report(&table, &path, self.config.chunk_rows)?;
        Ok(path)
    }

    pub fn write_zscore(&self, results: &ZScoreResults) -> Result<PathBuf> {
        let path = self.config.output_dir.join(zscore_file_name(
            self.config.kind,
            self.config.aggregator,
            self.config.alternative,
        ));
        let table = ZScoreTable::new(results, self.matrix.molecules())?;
        write_report(&table, &path, self.config.chunk_rows)?;
        Ok(path)
    }

    pub fn write_hypergeom(&self, results: &EnrichmentResults) -> Result<PathBuf> {
        let path = self
            .config
            .output_dir
            .join(hypergeom_file_name(self.config.alternative));
        let table = HypergeomTable::new(results, self.matrix.molecules())?;
        write_report(&table, &path, self.config.chunk_rows)?;
        Ok(path)
    }

    /// Pairwise test followed by its report.
    pub fn run_ztest(&self) -> Result<(ZTestResults, PathBuf)> {
        let results = self.ztest()?;
        let path = self.write_ztest(&results)?;
        Ok((results, path))
    }

    /// Score test followed by its report.
    pub fn run_zscore(&self) -> Result<(ZScoreResults, PathBuf)> {
        let results = self.zscore()?;
        let path = self.write_zscore(&results)?;
        Ok((results, path))
    }

    /// Pairwise test, enrichment of its significant edges, and both reports.
    pub fn run_hypergeom(&self) -> Result<(EnrichmentResults, PathBuf)> {
        let (ztest, _) = self.run_ztest()?;
        let results = self.hypergeom(&ztest)?;
        let path = self.write_hypergeom(&results)?;
        Ok((results, path))
    }
}
