//! Expression matrices, sample groupings and candidate pair resolution.
//!
//! Everything here is plain in-memory data. Reading delimited files is left to the caller, which
//! hands over labelled arrays and identifier pairs.

use anyhow::{Result, anyhow, bail};
use ndarray::{Array2, Axis};
use single_utilities::traits::FloatOpsTS;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::pairs::PairSpace;

/// Molecules (rows) × samples (columns) with unique labels on both axes.
#[derive(Debug, Clone)]
pub struct ExpressionMatrix<T> {
    data: Array2<T>,
    molecules: Vec<String>,
    samples: Vec<String>,
}

impl<T> ExpressionMatrix<T>
where
    T: FloatOpsTS,
{
    pub fn new(data: Array2<T>, molecules: Vec<String>, samples: Vec<String>) -> Result<Self> {
        if data.nrows() != molecules.len() {
            bail!(
                "Matrix has {} rows but {} molecule labels",
                data.nrows(),
                molecules.len()
            );
        }
        if data.ncols() != samples.len() {
            bail!(
                "Matrix has {} columns but {} sample labels",
                data.ncols(),
                samples.len()
            );
        }
        ensure_unique(&molecules, "molecule")?;
        ensure_unique(&samples, "sample")?;
        Ok(ExpressionMatrix {
            data,
            molecules,
            samples,
        })
    }

    pub fn data(&self) -> &Array2<T> {
        &self.data
    }

    pub fn molecules(&self) -> &[String] {
        &self.molecules
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    pub fn n_molecules(&self) -> usize {
        self.molecules.len()
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    /// Values of `row` at the given sample columns, widened to `f64`.
    pub fn row_values(&self, row: usize, columns: &[usize]) -> Vec<f64> {
        let row = self.data.row(row);
        columns
            .iter()
            .map(|&c| num_traits::cast::<T, f64>(row[c]).unwrap_or(f64::NAN))
            .collect()
    }

    /// Keep only the listed rows, in the given order.
    pub fn select_molecules(&self, rows: &[usize]) -> Self {
        ExpressionMatrix {
            data: self.data.select(Axis(0), rows),
            molecules: rows.iter().map(|&r| self.molecules[r].clone()).collect(),
            samples: self.samples.clone(),
        }
    }

    /// O(1) label → row position lookup.
    pub fn molecule_positions(&self) -> HashMap<&str, usize> {
        self.molecules
            .iter()
            .enumerate()
            .map(|(i, m)| (m.as_str(), i))
            .collect()
    }
}

fn ensure_unique(labels: &[String], what: &str) -> Result<()> {
    let mut seen = HashSet::with_capacity(labels.len());
    for label in labels {
        if !seen.insert(label.as_str()) {
            bail!("Duplicate {} label '{}'", what, label);
        }
    }
    Ok(())
}

/// Sample identifier → group label assignment.
#[derive(Debug, Clone, Default)]
pub struct SampleGrouping {
    assignments: Vec<(String, String)>,
}

impl SampleGrouping {
    pub fn new(assignments: Vec<(String, String)>) -> Self {
        SampleGrouping { assignments }
    }

    pub fn from_pairs<S, G>(pairs: impl IntoIterator<Item = (S, G)>) -> Self
    where
        S: Into<String>,
        G: Into<String>,
    {
        SampleGrouping {
            assignments: pairs
                .into_iter()
                .map(|(s, g)| (s.into(), g.into()))
                .collect(),
        }
    }

    /// Column positions of the samples labelled `group`, in grouping order.
    ///
    /// Samples absent from the matrix are skipped; a group with no matching column is an error.
    pub fn column_indices(&self, samples: &[String], group: &str) -> Result<Vec<usize>> {
        let positions: HashMap<&str, usize> = samples
            .iter()
            .enumerate()
            .map(|(i, s)| (s.as_str(), i))
            .collect();

        let mut unknown = 0usize;
        let mut columns = Vec::new();
        for (sample, label) in &self.assignments {
            if label != group {
                continue;
            }
            match positions.get(sample.as_str()) {
                Some(&col) => columns.push(col),
                None => unknown += 1,
            }
        }

        if unknown > 0 {
            warn!(group, unknown, "grouping lists samples missing from the matrix");
        }
        if columns.is_empty() {
            return Err(anyhow!("Group '{}' has no matching samples", group));
        }
        Ok(columns)
    }
}

/// Reference and experimental column sets of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cohorts {
    pub reference: Vec<usize>,
    pub experimental: Vec<usize>,
}

impl Cohorts {
    /// Smallest cohort for which the Fisher-z standard error `1/sqrt(n-3)` is defined.
    pub const MIN_SIZE: usize = 4;

    pub fn new(reference: Vec<usize>, experimental: Vec<usize>) -> Result<Self> {
        for (name, cohort) in [("Reference", &reference), ("Experimental", &experimental)] {
            if cohort.len() < Self::MIN_SIZE {
                bail!(
                    "{} cohort has {} samples, at least {} are required",
                    name,
                    cohort.len(),
                    Self::MIN_SIZE
                );
            }
        }
        if reference.iter().any(|c| experimental.contains(c)) {
            bail!("Reference and experimental cohorts share samples");
        }
        Ok(Cohorts {
            reference,
            experimental,
        })
    }

    pub fn from_grouping(
        samples: &[String],
        grouping: &SampleGrouping,
        reference_group: &str,
        experimental_group: &str,
    ) -> Result<Self> {
        let reference = grouping.column_indices(samples, reference_group)?;
        let experimental = grouping.column_indices(samples, experimental_group)?;
        Cohorts::new(reference, experimental)
    }

    /// Reference columns followed by experimental columns.
    pub fn pooled(&self) -> Vec<usize> {
        self.reference
            .iter()
            .chain(self.experimental.iter())
            .copied()
            .collect()
    }
}

/// All unordered pairs of a molecule list, as candidate `(source, target)` identifiers.
pub fn pairs_from_molecules<S: AsRef<str>>(molecules: &[S]) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(molecules.len() * molecules.len().saturating_sub(1) / 2);
    for (i, a) in molecules.iter().enumerate() {
        for b in &molecules[i + 1..] {
            pairs.push((a.as_ref().to_string(), b.as_ref().to_string()));
        }
    }
    pairs
}

/// Restrict a matrix to the molecules a candidate list can reach and map the pairs to positions.
///
/// Pairs naming an unknown molecule are dropped. The returned matrix keeps the original row
/// order of the surviving molecules.
pub fn resolve_candidates<T>(
    matrix: &ExpressionMatrix<T>,
    candidates: &[(String, String)],
) -> Result<(ExpressionMatrix<T>, PairSpace)>
where
    T: FloatOpsTS,
{
    let positions = matrix.molecule_positions();

    let mapped: Vec<(usize, usize)> = candidates
        .iter()
        .filter_map(|(s, t)| Some((*positions.get(s.as_str())?, *positions.get(t.as_str())?)))
        .collect();

    let dropped = candidates.len() - mapped.len();
    if dropped > 0 {
        warn!(
            dropped,
            kept = mapped.len(),
            "candidate pairs reference molecules absent from the matrix"
        );
    }
    if mapped.is_empty() {
        bail!("No candidate pair has both molecules present in the matrix");
    }

    let mut reachable = vec![false; matrix.n_molecules()];
    for &(s, t) in &mapped {
        reachable[s] = true;
        reachable[t] = true;
    }
    let kept_rows: Vec<usize> = (0..matrix.n_molecules()).filter(|&r| reachable[r]).collect();

    let mut remap = vec![usize::MAX; matrix.n_molecules()];
    for (new, &old) in kept_rows.iter().enumerate() {
        remap[old] = new;
    }
    let (sources, targets): (Vec<usize>, Vec<usize>) =
        mapped.iter().map(|&(s, t)| (remap[s], remap[t])).unzip();

    debug!(
        molecules = kept_rows.len(),
        pairs = sources.len(),
        "resolved candidate pairs"
    );

    let filtered = matrix.select_molecules(&kept_rows);
    let space = PairSpace::explicit(kept_rows.len(), sources, targets)?;
    Ok((filtered, space))
}
