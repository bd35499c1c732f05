//! End-to-end UQL pipeline scenarios: parse -> optimize -> translate,
//! covering the five worked examples from `spec.md` §8.

use unified_query_engine::model::ast::{CorrelationOperator, UqlQuery};
use unified_query_engine::uql::{parse, Optimizer, TranslatorRegistry};

fn compile(raw: &str) -> (UqlQuery, unified_query_engine::model::query::TranslatedQuery) {
    let ast = parse(raw).unwrap();
    let optimizer = Optimizer::new();
    let optimized = optimizer.optimize(&ast);
    let translators = TranslatorRegistry::new();
    let translated = translators.translate(&optimized).unwrap();
    (optimized, translated)
}

#[test]
fn select_round_trip_translates_to_logs() {
    let (ast, translated) = compile("SELECT service, level FROM logs:error WHERE level='error'");
    assert!(matches!(ast, UqlQuery::Select(_)));
    assert_eq!(translated.engine, "logs");
    assert_eq!(translated.query, "error | level:\"error\"");
}

#[test]
fn correlation_round_trip_preserves_within_operator_and_window() {
    let raw = "logs:error WITHIN 5m OF metrics:cpu_usage > 80";
    let (ast, translated) = compile(raw);
    match &ast {
        UqlQuery::Correlation(q) => {
            assert_eq!(q.operator, CorrelationOperator::Within);
            assert_eq!(q.envelope.time_window, Some(chrono::Duration::minutes(5)));
        }
        other => panic!("expected Correlation, got {other:?}"),
    }
    assert_eq!(translated.engine, "correlation");
    assert_eq!(translated.query, raw);
}

#[test]
fn count_aggregation_translates_to_logs_count() {
    let (ast, translated) = compile("COUNT(*) FROM logs:error");
    match &ast {
        UqlQuery::Aggregation(q) => {
            assert_eq!(q.field, "*");
        }
        other => panic!("expected Aggregation, got {other:?}"),
    }
    assert_eq!(translated.engine, "logs");
    assert_eq!(translated.query, "error | count(*)");
}

#[test]
fn metrics_select_produces_label_selector_braces() {
    let (_, translated) = compile("SELECT * FROM metrics:up WHERE job='api' AND instance='a'");
    assert_eq!(translated.engine, "metrics");
    assert!(translated.query.starts_with("up{"));
    assert!(translated.query.contains("job=\"api\""));
}

#[test]
fn traces_select_produces_tag_selector() {
    let (_, translated) = compile("SELECT x FROM traces:checkout WHERE operation='charge'");
    assert_eq!(translated.engine, "traces");
    assert_eq!(translated.query, "{service.name=\"checkout\"} && operation=\"charge\"");
}

#[test]
fn optimizer_deduplicates_fields_and_sorts_order_by() {
    let ast = parse("SELECT b, a, b FROM logs:error ORDER BY b ASC, a DESC").unwrap();
    let optimizer = Optimizer::new();
    let optimized = optimizer.optimize(&ast);
    match optimized {
        UqlQuery::Select(q) => {
            let names: Vec<&str> = q.fields.iter().map(|f| f.name.as_str()).collect();
            assert_eq!(names, vec!["b", "a"]);
            let order_fields: Vec<&str> = q.envelope.order_by.iter().map(|(f, _)| f.as_str()).collect();
            assert_eq!(order_fields, vec!["a", "b"]);
        }
        other => panic!("expected Select, got {other:?}"),
    }
}

#[test]
fn optimizer_snaps_time_windows_near_canonical_sizes() {
    let ast = parse("logs:error WITHIN 4m45s OF metrics:cpu_usage > 80").unwrap();
    let optimizer = Optimizer::new();
    let optimized = optimizer.optimize(&ast);
    assert_eq!(optimized.envelope().time_window, Some(chrono::Duration::minutes(5)));
}

#[test]
fn malformed_queries_are_rejected_with_parse_errors() {
    let bad_inputs = [
        "",
        "   ",
        "SELECT x WHERE level='error'",
        "SELECT x FROM :error",
        "SELECT x FROM nosuchengine:error",
        "SELECT x FROM logs:error WHERE",
        "SELECT x FROM logs:error GROUP BY",
        "SELECT x FROM logs:error ORDER BY",
        "SELECT x FROM logs:error LIMIT",
        "COUNT() FROM logs:error",
        "BOGUSFN(x) FROM logs:error",
    ];
    for input in bad_inputs {
        assert!(parse(input).is_err(), "expected parse error for {input:?}");
    }
}
