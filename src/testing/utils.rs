use rayon::prelude::*;
use std::cmp::Ordering;

/// Ascending comparison that places missing values after every present value.
#[inline]
pub fn cmp_missing_last(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Report order: ascending by adjusted p-value, then raw p-value, ties kept in index order.
pub fn report_order(adjusted: &[Option<f64>], p_values: &[Option<f64>]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..adjusted.len()).collect();
    order.par_sort_by(|&a, &b| {
        cmp_missing_last(adjusted[a], adjusted[b])
            .then_with(|| cmp_missing_last(p_values[a], p_values[b]))
    });
    order
}

/// Empirical tail counter for permutation p-values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub hits: u32,
    pub draws: u32,
}

impl Tally {
    #[inline]
    pub fn record(&mut self, as_extreme: bool) {
        self.draws += 1;
        if as_extreme {
            self.hits += 1;
        }
    }

    /// Fraction of draws at least as extreme as the observation.
    pub fn p_value(&self) -> Option<f64> {
        if self.draws == 0 {
            None
        } else {
            Some(self.hits as f64 / self.draws as f64)
        }
    }
}
