use approx::assert_relative_eq;
use ndarray::Array2;
use proptest::prelude::*;
use single_diffcorr::correlation::{CorrelationKind, correlate};
use single_diffcorr::enrichment::hypergeometric_upper_tail;
use single_diffcorr::matrix::ExpressionMatrix;
use single_diffcorr::pairs::{PairCodec, PairSpace, WorkerPool, index_of, pair_of};
use single_diffcorr::testing::Alternative;
use single_diffcorr::testing::correction::{FdrMethod, average_ranks, rank_scaled_correction};
use single_diffcorr::testing::inference::fisher::{correlation_difference_test, normal_cdf};

fn wavy_matrix(n_molecules: usize, n_samples: usize) -> ExpressionMatrix<f64> {
    let data = Array2::from_shape_fn((n_molecules, n_samples), |(m, s)| {
        ((m + 1) as f64 * 0.37 * s as f64).sin() + ((m * 7 + s * 3) % 11) as f64 * 0.1
    });
    let molecules = (0..n_molecules).map(|i| format!("gene{}", i)).collect();
    let samples = (0..n_samples).map(|i| format!("sample{}", i)).collect();
    ExpressionMatrix::new(data, molecules, samples).unwrap()
}

proptest! {
    #[test]
    fn codec_round_trip(n in 2usize..3000, a in 0usize..3000, b in 0usize..3000) {
        let (row, col) = (a % n, b % n);
        prop_assume!(row != col);
        let (row, col) = (row.min(col), row.max(col));

        let index = index_of(row, col, n).unwrap();
        prop_assert!(index < n * (n - 1) / 2);
        prop_assert_eq!(pair_of(index, n).unwrap(), (row, col));
        prop_assert_eq!(index_of(col, row, n).unwrap(), index);
    }

    #[test]
    fn codec_walk_matches_decode(n in 2usize..200, start in 0usize..20000, len in 0usize..500) {
        let codec = PairCodec::new(n).unwrap();
        let start = start % codec.len();
        let end = (start + len).min(codec.len());
        let walked: Vec<_> = codec.pairs_in(start..end).collect();
        let decoded: Vec<_> = (start..end).map(|i| codec.pair(i)).collect();
        prop_assert_eq!(walked, decoded);
    }
}

#[cfg(test)]
mod quick_test {
    use super::*;

    #[test]
    fn check_codec_is_injective_and_ordered() {
        let n = 37;
        let mut expected = 0;
        for row in 0..n {
            for col in row + 1..n {
                assert_eq!(index_of(row, col, n).unwrap(), expected);
                expected += 1;
            }
        }
        assert_eq!(expected, n * (n - 1) / 2);
    }

    #[test]
    fn check_codec_faults() {
        assert!(PairCodec::new(1).is_err());
        assert!(PairCodec::new(0).is_err());
        assert!(pair_of(10, 5).is_err());
        assert!(index_of(2, 2, 5).is_err());
        assert!(index_of(1, 5, 5).is_err());
    }

    #[test]
    fn check_explicit_all_pairs_matches_exhaustive() {
        // An explicit list holding every pair must reproduce exhaustive mode elementwise.
        let matrix = wavy_matrix(23, 12);
        let pool = WorkerPool::new(Some(3)).unwrap();
        let columns: Vec<usize> = (0..12).collect();

        let exhaustive = PairSpace::exhaustive(23).unwrap();
        let (sources, targets): (Vec<_>, Vec<_>) = exhaustive.pairs_in(0..exhaustive.len()).unzip();
        let explicit = PairSpace::explicit(23, sources, targets).unwrap();

        for kind in [
            CorrelationKind::Pearson,
            CorrelationKind::Spearman,
            CorrelationKind::SpearmanRanked,
        ] {
            let alt = Some(Alternative::TwoSided);
            let a = correlate(&matrix, &columns, &exhaustive, kind, alt, &pool).unwrap();
            let b = correlate(&matrix, &columns, &explicit, kind, alt, &pool).unwrap();
            assert_eq!(a.coefficients, b.coefficients);
            assert_eq!(a.p_values, b.p_values);
            assert!(a.coefficients.iter().all(|r| r.is_some_and(|r| (-1.0..=1.0).contains(&r))));
        }
    }

    #[test]
    fn check_fdr_reference_example() {
        let p = [0.01, 0.02, 0.03, 0.04, 0.20];
        assert_eq!(average_ranks(&p), vec![1.0, 2.0, 3.0, 4.0, 5.0]);

        let adjusted = rank_scaled_correction(&p).unwrap();
        for (got, want) in adjusted.iter().zip([0.05, 0.05, 0.05, 0.05, 0.20]) {
            assert_relative_eq!(*got, want, epsilon = 1e-12);
        }

        let optional = FdrMethod::RankScaled
            .adjust_optional(&[Some(0.01), None, Some(0.02)])
            .unwrap();
        assert_relative_eq!(optional[0].unwrap(), 0.02, epsilon = 1e-12);
        assert_eq!(optional[1], None);
        assert_relative_eq!(optional[2].unwrap(), 0.02, epsilon = 1e-12);
    }

    #[test]
    fn check_differential_test_closed_form() {
        let (stat, p) = correlation_difference_test(
            Some(0.6),
            50,
            Some(0.2),
            50,
            CorrelationKind::Pearson,
            Alternative::TwoSided,
        )
        .unwrap();
        let z = (0.6_f64.atanh() - 0.2_f64.atanh()) / (1.0 / 47.0 + 1.0 / 47.0_f64).sqrt();
        assert_relative_eq!(stat, 0.6_f64.atanh() - 0.2_f64.atanh(), epsilon = 1e-12);
        assert_relative_eq!(p, 2.0 * normal_cdf(-z), epsilon = 1e-12);

        // A perfect correlation yields a missing result, not a NaN.
        assert!(
            correlation_difference_test(
                Some(1.0),
                50,
                Some(0.2),
                50,
                CorrelationKind::Pearson,
                Alternative::TwoSided,
            )
            .is_none()
        );
    }

    #[test]
    fn check_enrichment_reference_value() {
        // M=100 background edges, 10 differential, molecule in 5 edges, all 5 differential.
        let p = hypergeometric_upper_tail(5, 100, 10, 5).unwrap();
        assert_relative_eq!(p, 3.347168295621904e-06, epsilon = 1e-12);

        // Tail probabilities shrink as the observed count grows.
        let tails: Vec<f64> = (0..=5)
            .map(|d| hypergeometric_upper_tail(d, 100, 10, 5).unwrap())
            .collect();
        assert_eq!(tails[0], 1.0);
        assert!(tails.windows(2).all(|w| w[0] >= w[1]));
    }
}
