//! Metrics translator: emits a PromQL-like string from `Select`/`Aggregation` ASTs.

use tracing::warn;

use crate::error::Result;
use crate::model::ast::*;
use crate::model::query::TranslatedQuery;

use super::Translator;

pub struct MetricsTranslator;

impl Translator for MetricsTranslator {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn supported_engines(&self) -> &'static [&'static str] {
        &["metrics"]
    }

    fn can_translate(&self, ast: &UqlQuery) -> bool {
        match ast {
            UqlQuery::Select(q) => q.data_source.engine == "metrics",
            UqlQuery::Aggregation(q) => q.data_source.engine == "metrics",
            _ => false,
        }
    }

    fn translate(&self, ast: &UqlQuery) -> Result<TranslatedQuery> {
        match ast {
            UqlQuery::Select(q) => {
                let metric = q.data_source.query.clone();
                let base = if q.fields.len() == 1 && q.fields[0].name == "*" {
                    metric.clone()
                } else if let Some(f) = q.fields.iter().find_map(|f| f.function.clone()) {
                    format!("{}({})", promql_function_name(&f), metric)
                } else {
                    metric.clone()
                };
                let labels = q.where_clause.as_ref().map(label_selector).unwrap_or_default();
                let query = if labels.is_empty() {
                    base
                } else {
                    format!("{base}{{{labels}}}")
                };
                Ok(TranslatedQuery {
                    engine: "metrics".into(),
                    query,
                    parameters: None,
                    start_time: None,
                    end_time: None,
                    time_window: q.envelope.time_window,
                    limit: q.envelope.limit,
                    order_by: Some(q.envelope.order_by.clone()),
                    group_by: Some(q.group_by.clone()),
                    aggregation: None,
                })
            }
            UqlQuery::Aggregation(q) => {
                let metric = q.data_source.query.clone();
                let labels = q.where_clause.as_ref().map(label_selector).unwrap_or_default();
                let selected = if labels.is_empty() {
                    metric
                } else {
                    format!("{metric}{{{labels}}}")
                };
                let query = format!("{}({})", promql_function_name_agg(q.function), selected);
                Ok(TranslatedQuery {
                    engine: "metrics".into(),
                    query,
                    parameters: None,
                    start_time: None,
                    end_time: None,
                    time_window: q.envelope.time_window,
                    limit: None,
                    order_by: None,
                    group_by: Some(q.group_by.clone()),
                    aggregation: Some(q.function.as_str().to_string()),
                })
            }
            _ => unreachable!("can_translate guards this"),
        }
    }
}

fn promql_function_name(name: &str) -> String {
    name.to_string()
}

fn promql_function_name_agg(f: AggregationFunction) -> &'static str {
    match f {
        AggregationFunction::Count => "count",
        AggregationFunction::Sum => "sum",
        AggregationFunction::Avg => "avg",
        AggregationFunction::Min => "min",
        AggregationFunction::Max => "max",
        AggregationFunction::Rate => "rate",
        AggregationFunction::Increase => "increase",
        AggregationFunction::Percentile => "quantile",
        AggregationFunction::Histogram => "histogram_quantile",
    }
}

/// Builds a brace-enclosed comma-separated label selector list from a
/// `WHERE` condition. `OR` is not representable in a PromQL label matcher
/// set and is dropped (only the left branch survives) with a warning.
fn label_selector(cond: &Condition) -> String {
    let mut leaves = Vec::new();
    collect_label_leaves(cond, &mut leaves);
    leaves
        .into_iter()
        .filter_map(|(field, op, value)| label_matcher(&field, op, &value))
        .collect::<Vec<_>>()
        .join(",")
}

fn collect_label_leaves<'a>(cond: &'a Condition, out: &mut Vec<(String, ComparisonOperator, &'a Literal)>) {
    match cond {
        Condition::Leaf { field, operator, value } => out.push((field.clone(), *operator, value)),
        Condition::And(l, r) => {
            collect_label_leaves(l, out);
            collect_label_leaves(r, out);
        }
        Condition::Or(l, _r) => {
            warn!("OR inside a metrics label selector is not supported; dropping the right-hand branch");
            collect_label_leaves(l, out);
        }
    }
}

fn label_matcher(field: &str, op: ComparisonOperator, value: &Literal) -> Option<String> {
    let v = value.as_display();
    match op {
        ComparisonOperator::Eq => Some(format!("{field}=\"{v}\"")),
        ComparisonOperator::Ne => Some(format!("{field}!=\"{v}\"")),
        ComparisonOperator::Like => {
            let regex = v.replace('%', ".*");
            Some(format!("{field}=~\"{regex}\""))
        }
        ComparisonOperator::Match => Some(format!("{field}=~\"{v}\"")),
        other => {
            warn!(operator = ?other, "operator not representable as a PromQL label matcher; dropping");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uql::parser::parse;

    #[test]
    fn select_star_emits_bare_metric() {
        let ast = parse("SELECT * FROM metrics:up WHERE job='api'").unwrap();
        let t = MetricsTranslator;
        let out = t.translate(&ast).unwrap();
        assert_eq!(out.query, "up{job=\"api\"}");
    }

    #[test]
    fn aggregation_wraps_metric_in_function() {
        let ast = parse("RATE(value) FROM metrics:http_requests_total WHERE status='500'").unwrap();
        let t = MetricsTranslator;
        let out = t.translate(&ast).unwrap();
        assert_eq!(out.query, "rate(http_requests_total{status=\"500\"})");
    }

    #[test]
    fn like_operator_maps_to_regex_matcher() {
        let ast = parse("SELECT * FROM metrics:up WHERE job LIKE 'api%'").unwrap();
        let t = MetricsTranslator;
        let out = t.translate(&ast).unwrap();
        assert_eq!(out.query, "up{job=~\"api.*\"}");
    }
}
