//! Property-based tests over the stats kernel and the UQL optimizer,
//! using `proptest` exactly as the stats kernel's worst-case inputs (3-32
//! ring samples) demand: random small vectors rather than hand-picked
//! fixtures.

use proptest::prelude::*;
use unified_query_engine::stats::{compute_suspicion_score, cross_correlation_scan, pearson, rank, spearman};
use unified_query_engine::uql::{parse, Optimizer};

fn finite_vec(len: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-1000.0f64..1000.0, len)
}

proptest! {
    #[test]
    fn pearson_self_correlation_is_one_when_variance_nonzero(
        v in finite_vec(6).prop_filter("needs nonzero variance", |v| {
            v.iter().any(|x| (x - v[0]).abs() > 1e-6)
        })
    ) {
        let p = pearson(&v, &v);
        prop_assert!((p - 1.0).abs() < 1e-6, "pearson(v, v) = {p}");
    }

    #[test]
    fn pearson_negation_is_minus_one_when_variance_nonzero(
        v in finite_vec(6).prop_filter("needs nonzero variance", |v| {
            v.iter().any(|x| (x - v[0]).abs() > 1e-6)
        })
    ) {
        let neg: Vec<f64> = v.iter().map(|x| -x).collect();
        let p = pearson(&v, &neg);
        prop_assert!((p + 1.0).abs() < 1e-6, "pearson(v, -v) = {p}");
    }

    #[test]
    fn pearson_is_bounded(x in finite_vec(8), y in finite_vec(8)) {
        let p = pearson(&x, &y);
        prop_assert!(p.abs() <= 1.0 + 1e-9, "|pearson| = {}", p.abs());
    }

    #[test]
    fn spearman_equals_pearson_of_ranks(x in finite_vec(8), y in finite_vec(8)) {
        prop_assert_eq!(spearman(&x, &y), pearson(&rank(&x), &rank(&y)));
    }

    #[test]
    fn cross_correlation_lag_stays_within_bounds(
        x in finite_vec(10), y in finite_vec(10), max_lag in 0usize..5usize
    ) {
        let (lag, _) = cross_correlation_scan(&x, &y, max_lag);
        prop_assert!(lag >= -(max_lag as i64) && lag <= max_lag as i64);
    }

    #[test]
    fn suspicion_score_is_monotone_in_pearson_magnitude(
        low_p in 0.0f64..0.4, high_delta in 0.0f64..0.6
    ) {
        let high_p = low_p + high_delta;
        let low = compute_suspicion_score(low_p, 0.1, 0.0, 0, 8, 0.0, low_p, 0.0);
        let high = compute_suspicion_score(high_p, 0.1, 0.0, 0, 8, 0.0, high_p, 0.0);
        prop_assert!(high >= low - 1e-9);
    }

    #[test]
    fn suspicion_score_stays_in_unit_interval(
        p in -1.0f64..1.0, s in -1.0f64..1.0, c in -1.0f64..1.0,
        lag in -5i64..5, n in 0usize..32, partial in -1.0f64..1.0, density in 0.0f64..1.0
    ) {
        let score = compute_suspicion_score(p, s, c, lag, n, 0.2, partial, density);
        prop_assert!((0.0..=1.0).contains(&score), "score = {score}");
    }
}

/// `optimize(optimize(a)) ≡ optimize(a)`: a second optimizer pass over an
/// already-optimized AST never produces further structural changes (spec
/// §8 "Round-trips / idempotence").
proptest! {
    #[test]
    fn optimizer_is_idempotent_over_select_queries(
        field_count in 1usize..4, limit in 1u64..500
    ) {
        let fields: Vec<String> = (0..field_count).map(|i| format!("field_{i}")).collect();
        let raw = format!(
            "SELECT {} FROM logs:error WHERE level='error' LIMIT {}",
            fields.join(", "),
            limit
        );
        let ast = parse(&raw).unwrap();
        let optimizer = Optimizer::new();
        let once = optimizer.optimize(&ast);
        let twice = optimizer.optimize(&once);
        prop_assert_eq!(once, twice);
    }
}
