use anyhow::{Result, anyhow};
use rayon::prelude::*;
use statrs::distribution::{DiscreteCDF, Hypergeometric};
use std::cmp::Ordering;
use tracing::{debug, warn};

use crate::pairs::PairSpace;
use crate::testing::correction::FdrMethod;
use crate::testing::{Alternative, ZTestResults};

/// Upper tail `P(X >= diff)` of a hypergeometric draw.
///
/// `population` background occurrences, `successes` of them differential, `draws` background
/// occurrences of the molecule under test.
pub fn hypergeometric_upper_tail(
    diff: u64,
    population: u64,
    successes: u64,
    draws: u64,
) -> Result<f64> {
    let dist = Hypergeometric::new(population, successes, draws)
        .map_err(|e| anyhow!("Invalid hypergeometric parameters: {e:?}"))?;
    if diff == 0 {
        return Ok(1.0);
    }
    Ok(dist.sf(diff - 1).clamp(0.0, 1.0))
}

/// Indices of differential edges: adjusted p-value below `alpha`, and for a one-sided
/// alternative a statistic of the matching sign.
pub fn significant_edges(results: &ZTestResults, alpha: f64, alternative: Alternative) -> Vec<usize> {
    results
        .significant_indices(alpha)
        .into_iter()
        .filter(|&i| match (alternative, results.tests[i].statistic) {
            (Alternative::TwoSided, _) => true,
            (Alternative::Less, Some(stat)) => stat < 0.0,
            (Alternative::Greater, Some(stat)) => stat > 0.0,
            (_, None) => false,
        })
        .collect()
}

/// Per-molecule over-representation among differential edges.
#[derive(Debug, Clone, Default)]
pub struct EnrichmentResults {
    /// Matrix row positions; only molecules with at least one differential edge.
    pub molecules: Vec<usize>,
    pub diff: Vec<u64>,
    pub total: Vec<u64>,
    pub proportion: Vec<f64>,
    pub p_values: Vec<f64>,
    pub adjusted_p_values: Vec<f64>,
    pub order: Vec<usize>,
}

impl EnrichmentResults {
    pub fn len(&self) -> usize {
        self.molecules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.molecules.is_empty()
    }
}

/// Background occurrence counts per molecule and their sum.
fn background_counts(pairs: &PairSpace, oriented: bool) -> (Vec<u64>, u64) {
    match pairs {
        PairSpace::Exhaustive(codec) => {
            let n = codec.molecules() as u64;
            if oriented {
                // In the triangle a molecule is the source of every pair with a later partner.
                let totals = (0..n).map(|i| n - 1 - i).collect();
                (totals, codec.len() as u64)
            } else {
                (vec![n - 1; n as usize], n * (n - 1))
            }
        }
        PairSpace::Explicit {
            molecules,
            sources,
            targets,
        } => {
            let mut totals = vec![0u64; *molecules];
            for &s in sources {
                totals[s] += 1;
            }
            if !oriented {
                for &t in targets {
                    totals[t] += 1;
                }
            }
            let sum = totals.iter().sum();
            (totals, sum)
        }
    }
}

/// Hypergeometric test of every molecule touched by the `significant` pair indices.
///
/// Oriented counting credits only the source of an edge, unoriented counting credits both
/// endpoints. Rows are ordered by adjusted p-value, then p-value, then descending proportion.
pub fn hypergeometric_enrichment(
    pairs: &PairSpace,
    significant: &[usize],
    oriented: bool,
    fdr_method: FdrMethod,
) -> Result<EnrichmentResults> {
    if let Some(&bad) = significant.iter().find(|&&i| i >= pairs.len()) {
        return Err(anyhow!(
            "Significant edge index {} out of range for {} pairs",
            bad,
            pairs.len()
        ));
    }
    if significant.is_empty() {
        warn!("no differential edges to test for enrichment");
        return Ok(EnrichmentResults::default());
    }

    let (totals, population) = background_counts(pairs, oriented);
    let mut diff = vec![0u64; pairs.molecules()];
    for &i in significant {
        let (s, t) = pairs.pair(i);
        diff[s] += 1;
        if !oriented {
            diff[t] += 1;
        }
    }
    let successes: u64 = diff.iter().sum();

    let molecules: Vec<usize> = (0..diff.len()).filter(|&m| diff[m] > 0).collect();
    debug!(
        molecules = molecules.len(),
        population, successes, oriented, "hypergeometric enrichment"
    );

    let p_values = molecules
        .par_iter()
        .map(|&m| hypergeometric_upper_tail(diff[m], population, successes, totals[m]))
        .collect::<Result<Vec<_>>>()?;
    let adjusted_p_values = fdr_method.adjust(&p_values)?;

    let diff: Vec<u64> = molecules.iter().map(|&m| diff[m]).collect();
    let total: Vec<u64> = molecules.iter().map(|&m| totals[m]).collect();
    let proportion: Vec<f64> = diff
        .iter()
        .zip(&total)
        .map(|(&d, &t)| d as f64 / t as f64)
        .collect();

    let mut order: Vec<usize> = (0..molecules.len()).collect();
    order.par_sort_by(|&a, &b| {
        adjusted_p_values[a]
            .total_cmp(&adjusted_p_values[b])
            .then_with(|| p_values[a].total_cmp(&p_values[b]))
            .then_with(|| proportion[b].partial_cmp(&proportion[a]).unwrap_or(Ordering::Equal))
    });

    Ok(EnrichmentResults {
        molecules,
        diff,
        total,
        proportion,
        p_values,
        adjusted_p_values,
        order,
    })
}
