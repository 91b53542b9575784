use anyhow::{Result, anyhow};
use rayon::prelude::*;
use std::fmt;
use std::str::FromStr;

pub use crate::correlation::rank::average_ranks;

/// Multiple testing correction applied to pair and molecule p-values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FdrMethod {
    /// `min(1, p * m / rank)` without the step-up minimum.
    #[default]
    RankScaled,
    /// Classic monotone Benjamini-Hochberg step-up adjustment.
    BenjaminiHochberg,
}

impl FdrMethod {
    /// Adjust a complete set of p-values with this method.
    ///
    /// # Arguments
    ///
    /// * `p_values` - Raw p-values, each in `[0, 1]`
    ///
    /// # Returns
    ///
    /// Adjusted p-values in input order, or an error for an empty or invalid input.
    ///
    /// # Example
    ///
    /// ```
    /// use single_diffcorr::testing::correction::FdrMethod;
    ///
    /// let adjusted = FdrMethod::BenjaminiHochberg.adjust(&[0.01, 0.04, 0.03]).unwrap();
    /// assert_eq!(adjusted.len(), 3);
    /// ```
    pub fn adjust(&self, p_values: &[f64]) -> Result<Vec<f64>> {
        match self {
            FdrMethod::RankScaled => rank_scaled_correction(p_values),
            FdrMethod::BenjaminiHochberg => benjamini_hochberg_correction(p_values),
        }
    }

    /// Adjust the present p-values; missing entries stay missing and do not count towards `m`.
    ///
    /// # Example
    ///
    /// ```
    /// use single_diffcorr::testing::correction::FdrMethod;
    ///
    /// let adjusted = FdrMethod::RankScaled.adjust_optional(&[Some(0.01), None]).unwrap();
    /// assert_eq!(adjusted, vec![Some(0.01), None]);
    /// ```
    pub fn adjust_optional(&self, p_values: &[Option<f64>]) -> Result<Vec<Option<f64>>> {
        let present: Vec<f64> = p_values.iter().filter_map(|p| *p).collect();
        if present.is_empty() {
            return Ok(vec![None; p_values.len()]);
        }
        let adjusted = self.adjust(&present)?;

        let mut next = adjusted.into_iter();
        Ok(p_values
            .iter()
            .map(|p| p.and_then(|_| next.next()))
            .collect())
    }
}

impl fmt::Display for FdrMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FdrMethod::RankScaled => f.write_str("rank-scaled"),
            FdrMethod::BenjaminiHochberg => f.write_str("bh"),
        }
    }
}

impl FromStr for FdrMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rank-scaled" | "rank_scaled" => Ok(FdrMethod::RankScaled),
            "bh" | "benjamini-hochberg" => Ok(FdrMethod::BenjaminiHochberg),
            other => Err(anyhow!("Unknown FDR method '{}'", other)),
        }
    }
}

fn validate_p_values(p_values: &[f64]) -> Result<()> {
    if p_values.is_empty() {
        return Err(anyhow!("Empty p-value array"));
    }
    for (i, &p) in p_values.iter().enumerate() {
        if !(0.0..=1.0).contains(&p) {
            return Err(anyhow!("Invalid p-value at index {}: {}", i, p));
        }
    }
    Ok(())
}

/// Indices of `p_values` in ascending order. Stable, so equal p-values keep input order.
fn ascending_order(p_values: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..p_values.len()).collect();
    order.par_sort_by(|&a, &b| p_values[a].total_cmp(&p_values[b]));
    order
}

/// Scale each p-value by `m / rank`, capped at 1.
///
/// Unlike Benjamini-Hochberg, no running minimum is taken, so adjusted values are not
/// guaranteed to be monotone in the raw p-values. Tied p-values share their average rank.
///
/// # Arguments
///
/// * `p_values` - Raw p-values, each in `[0, 1]`
///
/// # Returns
///
/// Adjusted p-values in input order
///
/// # Example
/// ```
/// use single_diffcorr::testing::correction::rank_scaled_correction;
///
/// let adjusted = rank_scaled_correction(&[0.01, 0.02, 0.03, 0.04, 0.20]).unwrap();
/// assert!((adjusted[0] - 0.05).abs() < 1e-12);
/// ```
pub fn rank_scaled_correction(p_values: &[f64]) -> Result<Vec<f64>> {
    validate_p_values(p_values)?;
    let m = p_values.len() as f64;
    let ranks = average_ranks(p_values);

    Ok(p_values
        .par_iter()
        .zip(ranks.par_iter())
        .map(|(&p, &rank)| (p * m / rank).min(1.0))
        .collect())
}

/// Apply Benjamini-Hochberg (BH) procedure for controlling false discovery rate
///
/// Adjusted values are made monotone by carrying the running minimum from the largest
/// p-value down to the smallest.
///
/// # Arguments
///
/// * `p_values` - Raw p-values, each in `[0, 1]`
///
/// # Returns
///
/// Adjusted p-values in input order
///
/// # Example
/// ```
/// use single_diffcorr::testing::correction::benjamini_hochberg_correction;
///
/// let adjusted = benjamini_hochberg_correction(&[0.01, 0.03, 0.05]).unwrap();
/// assert!((adjusted[2] - 0.05).abs() < 1e-12);
/// ```
pub fn benjamini_hochberg_correction(p_values: &[f64]) -> Result<Vec<f64>> {
    validate_p_values(p_values)?;
    let n = p_values.len();
    let order = ascending_order(p_values);

    let mut adjusted_p_values = vec![0.0; n];
    let mut current_min = 1.0_f64;

    for i in (0..n).rev() {
        let orig_idx = order[i];
        let rank = i + 1;

        let adjustment = (p_values[orig_idx] * n as f64 / rank as f64).min(1.0);
        current_min = adjustment.min(current_min);
        adjusted_p_values[orig_idx] = current_min;
    }

    Ok(adjusted_p_values)
}
