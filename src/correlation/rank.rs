//! Row ranking for the Spearman kinds.
//!
//! Ranks are computed once per molecule row and cohort, never per pair, so every pair that
//! shares a row sees the same tie resolution.

/// 1-based ranks with tied values sharing the average of their positions.
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let order = ascending_order(values);
    let mut ranks = vec![0.0; values.len()];

    let mut i = 0;
    while i < order.len() {
        let mut j = i + 1;
        while j < order.len() && values[order[j]] == values[order[i]] {
            j += 1;
        }
        let rank = (i + 1 + j) as f64 / 2.0;
        for &idx in &order[i..j] {
            ranks[idx] = rank;
        }
        i = j;
    }
    ranks
}

/// 1-based ranks where ties are broken by sample order.
pub fn ordinal_ranks(values: &[f64]) -> Vec<f64> {
    let order = ascending_order(values);
    let mut ranks = vec![0.0; values.len()];
    for (position, &idx) in order.iter().enumerate() {
        ranks[idx] = (position + 1) as f64;
    }
    ranks
}

fn ascending_order(values: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    // Stable: equal values keep sample order.
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_ranks_with_ties() {
        assert_eq!(average_ranks(&[10.0, 20.0, 10.0, 5.0]), vec![2.5, 4.0, 2.5, 1.0]);
    }

    #[test]
    fn test_ordinal_ranks_break_ties_by_position() {
        assert_eq!(ordinal_ranks(&[10.0, 20.0, 10.0, 5.0]), vec![2.0, 4.0, 3.0, 1.0]);
    }

    #[test]
    fn test_empty() {
        assert!(average_ranks(&[]).is_empty());
        assert!(ordinal_ranks(&[]).is_empty());
    }
}
