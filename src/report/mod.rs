//! Sorted CSV reports written in bounded row batches.
//!
//! A report is only started once every result array it reads from is complete. Rows are rendered
//! batch by batch in report order, so at most one batch of formatted strings is alive at a time.
//! Batches go to a hidden sibling file that replaces the target only after the last batch.

use anyhow::{Context, Result, anyhow, bail};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::correlation::CorrelationKind;
use crate::enrichment::EnrichmentResults;
use crate::pairs::PairSpace;
use crate::testing::inference::Aggregator;
use crate::testing::{Alternative, ZScoreResults, ZTestResults};

pub const DEFAULT_CHUNK_ROWS: usize = 100_000;

/// A result set that can be rendered as CSV rows.
pub trait ReportTable: Sync {
    fn header(&self) -> Vec<&'static str>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Result indices in the order rows are written.
    fn order(&self) -> &[usize];

    fn row(&self, index: usize) -> Vec<String>;
}

/// Missing values render as empty cells.
fn cell(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

pub fn ztest_file_name(kind: CorrelationKind, alternative: Alternative) -> String {
    format!("{}_{}_ztest.csv", kind, alternative)
}

pub fn zscore_file_name(
    kind: CorrelationKind,
    aggregator: Aggregator,
    alternative: Alternative,
) -> String {
    format!("{}_{}_{}_zscore.csv", kind, aggregator, alternative)
}

pub fn hypergeom_file_name(alternative: Alternative) -> String {
    format!("{}_hypergeom.csv", alternative)
}

/// Fail unless `dir` is an existing, writable directory.
pub fn check_output_dir(dir: &Path) -> Result<()> {
    let meta = fs::metadata(dir)
        .with_context(|| format!("Output directory {} is not accessible", dir.display()))?;
    if !meta.is_dir() {
        bail!("Output path {} is not a directory", dir.display());
    }
    if meta.permissions().readonly() {
        bail!("Output directory {} is read-only", dir.display());
    }
    Ok(())
}

fn partial_path(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| anyhow!("Report path {} has no file name", path.display()))?;
    Ok(path.with_file_name(format!(".{}.partial", name.to_string_lossy())))
}

/// Write `table` to `path` in batches of `chunk_rows`, returning the number of data rows.
pub fn write_report<R: ReportTable>(table: &R, path: &Path, chunk_rows: usize) -> Result<usize> {
    if chunk_rows == 0 {
        bail!("Report batch length must be at least 1");
    }
    if table.order().len() != table.len() {
        bail!(
            "Report order covers {} rows but the table has {}",
            table.order().len(),
            table.len()
        );
    }

    let partial = partial_path(path)?;
    match write_batches(table, &partial, chunk_rows) {
        Ok(rows) => {
            fs::rename(&partial, path).with_context(|| {
                format!("Failed to move finished report into {}", path.display())
            })?;
            info!(rows, path = %path.display(), "report written");
            Ok(rows)
        }
        Err(e) => {
            let _ = fs::remove_file(&partial);
            Err(e)
        }
    }
}

fn write_batches<R: ReportTable>(table: &R, partial: &Path, chunk_rows: usize) -> Result<usize> {
    let mut writer = csv::Writer::from_path(partial)
        .with_context(|| format!("Failed to create {}", partial.display()))?;
    writer.write_record(table.header())?;

    let mut written = 0;
    for (batch, indices) in table.order().chunks(chunk_rows).enumerate() {
        let rows: Vec<Vec<String>> = indices.par_iter().map(|&i| table.row(i)).collect();
        for row in &rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        written += rows.len();
        debug!(batch, rows = written, "report batch flushed");
    }
    writer.flush()?;
    Ok(written)
}

/// Pairwise z-test rows: `Source, Target, RefCorr, RefPvalue, ExpCorr, ExpPvalue, Statistic,
/// Pvalue, AdjPvalue[, PermutePvalue]`.
pub struct ZTestTable<'a> {
    results: &'a ZTestResults,
    pairs: &'a PairSpace,
    molecules: &'a [String],
}

impl<'a> ZTestTable<'a> {
    pub fn new(
        results: &'a ZTestResults,
        pairs: &'a PairSpace,
        molecules: &'a [String],
    ) -> Result<Self> {
        if results.len() != pairs.len() {
            bail!(
                "Z-test results cover {} pairs but the pair space has {}",
                results.len(),
                pairs.len()
            );
        }
        if results.adjusted_p_values.len() != results.len() {
            bail!(
                "Adjusted p-values cover {} pairs, expected {}",
                results.adjusted_p_values.len(),
                results.len()
            );
        }
        if let Some(permuted) = &results.permutation_p_values {
            if permuted.len() != results.len() {
                bail!(
                    "Permutation p-values cover {} pairs, expected {}",
                    permuted.len(),
                    results.len()
                );
            }
        }
        if pairs.molecules() != molecules.len() {
            bail!(
                "Pair space covers {} molecules but {} labels were given",
                pairs.molecules(),
                molecules.len()
            );
        }
        Ok(ZTestTable {
            results,
            pairs,
            molecules,
        })
    }
}

impl ReportTable for ZTestTable<'_> {
    fn header(&self) -> Vec<&'static str> {
        let mut header = vec![
            "Source",
            "Target",
            "RefCorr",
            "RefPvalue",
            "ExpCorr",
            "ExpPvalue",
            "Statistic",
            "Pvalue",
            "AdjPvalue",
        ];
        if self.results.permutation_p_values.is_some() {
            header.push("PermutePvalue");
        }
        header
    }

    fn len(&self) -> usize {
        self.results.len()
    }

    fn order(&self) -> &[usize] {
        &self.results.order
    }

    fn row(&self, index: usize) -> Vec<String> {
        let (source, target) = self.pairs.pair(index);
        let test = &self.results.tests[index];
        let mut row = vec![
            self.molecules[source].clone(),
            self.molecules[target].clone(),
            cell(test.ref_corr),
            cell(test.ref_pvalue),
            cell(test.exp_corr),
            cell(test.exp_pvalue),
            cell(test.statistic),
            cell(test.p_value),
            cell(self.results.adjusted_p_values[index]),
        ];
        if let Some(permuted) = &self.results.permutation_p_values {
            row.push(cell(permuted[index]));
        }
        row
    }
}

/// Per-molecule score rows: `Source, Score, Pvalue, AdjPvalue`.
pub struct ZScoreTable<'a> {
    results: &'a ZScoreResults,
    molecules: &'a [String],
}

impl<'a> ZScoreTable<'a> {
    pub fn new(results: &'a ZScoreResults, molecules: &'a [String]) -> Result<Self> {
        let n = results.len();
        if results.scores.len() != n
            || results.p_values.len() != n
            || results.adjusted_p_values.len() != n
        {
            bail!("Z-score result arrays differ in length");
        }
        if let Some(&bad) = results.molecules.iter().find(|&&m| m >= molecules.len()) {
            bail!("Scored molecule {} has no label", bad);
        }
        Ok(ZScoreTable { results, molecules })
    }
}

impl ReportTable for ZScoreTable<'_> {
    fn header(&self) -> Vec<&'static str> {
        vec!["Source", "Score", "Pvalue", "AdjPvalue"]
    }

    fn len(&self) -> usize {
        self.results.len()
    }

    fn order(&self) -> &[usize] {
        &self.results.order
    }

    fn row(&self, index: usize) -> Vec<String> {
        vec![
            self.molecules[self.results.molecules[index]].clone(),
            cell(self.results.scores[index]),
            cell(self.results.p_values[index]),
            cell(self.results.adjusted_p_values[index]),
        ]
    }
}

/// Enrichment rows: `Molecule, Diff, Total, Proportion, Pvalue, AdjPvalue`.
pub struct HypergeomTable<'a> {
    results: &'a EnrichmentResults,
    molecules: &'a [String],
}

impl<'a> HypergeomTable<'a> {
    pub fn new(results: &'a EnrichmentResults, molecules: &'a [String]) -> Result<Self> {
        let n = results.len();
        if [
            results.diff.len(),
            results.total.len(),
            results.proportion.len(),
            results.p_values.len(),
            results.adjusted_p_values.len(),
        ]
        .iter()
        .any(|&len| len != n)
        {
            bail!("Enrichment result arrays differ in length");
        }
        if let Some(&bad) = results.molecules.iter().find(|&&m| m >= molecules.len()) {
            bail!("Enriched molecule {} has no label", bad);
        }
        Ok(HypergeomTable { results, molecules })
    }
}

impl ReportTable for HypergeomTable<'_> {
    fn header(&self) -> Vec<&'static str> {
        vec!["Molecule", "Diff", "Total", "Proportion", "Pvalue", "AdjPvalue"]
    }

    fn len(&self) -> usize {
        self.results.len()
    }

    fn order(&self) -> &[usize] {
        &self.results.order
    }

    fn row(&self, index: usize) -> Vec<String> {
        vec![
            self.molecules[self.results.molecules[index]].clone(),
            self.results.diff[index].to_string(),
            self.results.total[index].to_string(),
            self.results.proportion[index].to_string(),
            self.results.p_values[index].to_string(),
            self.results.adjusted_p_values[index].to_string(),
        ]
    }
}
