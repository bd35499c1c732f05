//! Logs translator: emits `<data_source_query> | <filter_pipeline>` strings.

use crate::error::Result;
use crate::model::ast::*;
use crate::model::query::TranslatedQuery;

use super::Translator;

pub struct LogsTranslator;

impl Translator for LogsTranslator {
    fn name(&self) -> &'static str {
        "logs"
    }

    fn supported_engines(&self) -> &'static [&'static str] {
        &["logs"]
    }

    fn can_translate(&self, ast: &UqlQuery) -> bool {
        match ast {
            UqlQuery::Select(q) => q.data_source.engine == "logs",
            UqlQuery::Aggregation(q) => q.data_source.engine == "logs",
            _ => false,
        }
    }

    fn translate(&self, ast: &UqlQuery) -> Result<TranslatedQuery> {
        match ast {
            UqlQuery::Select(q) => {
                let mut query = q.data_source.query.clone();
                if let Some(cond) = &q.where_clause {
                    let filters = render_condition(cond);
                    if !filters.is_empty() {
                        query = format!("{query} | {filters}");
                    }
                }
                Ok(TranslatedQuery {
                    engine: "logs".into(),
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
                let mut query = q.data_source.query.clone();
                if let Some(cond) = &q.where_clause {
                    let filters = render_condition(cond);
                    if !filters.is_empty() {
                        query = format!("{query} | {filters}");
                    }
                }
                query = format!("{query} | {}({})", q.function.as_str(), q.field);
                Ok(TranslatedQuery {
                    engine: "logs".into(),
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

fn render_condition(cond: &Condition) -> String {
    match cond {
        Condition::Leaf { field, operator, value } => render_atom(field, *operator, value),
        Condition::And(l, r) => format!("{} AND {}", render_condition(l), render_condition(r)),
        Condition::Or(l, r) => format!("({} OR {})", render_condition(l), render_condition(r)),
    }
}

fn render_atom(field: &str, op: ComparisonOperator, value: &Literal) -> String {
    let v = value.as_display();
    match op {
        ComparisonOperator::Eq => format!("{field}:\"{v}\""),
        ComparisonOperator::Ne => format!("{field}!:\"{v}\""),
        ComparisonOperator::Like | ComparisonOperator::Match => format!("{field}:~\"{v}\""),
        ComparisonOperator::Lt => format!("{field} < {v}"),
        ComparisonOperator::Le => format!("{field} <= {v}"),
        ComparisonOperator::Gt => format!("{field} > {v}"),
        ComparisonOperator::Ge => format!("{field} >= {v}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uql::parser::parse;

    #[test]
    fn select_round_trips_to_logs_filter_pipeline() {
        let ast = parse("SELECT service, level FROM logs:error WHERE level='error'").unwrap();
        let t = LogsTranslator;
        let out = t.translate(&ast).unwrap();
        assert_eq!(out.query, "error | level:\"error\"");
        assert_eq!(out.engine, "logs");
    }

    #[test]
    fn count_aggregation_appends_function() {
        let ast = parse("COUNT(*) FROM logs:error").unwrap();
        let t = LogsTranslator;
        let out = t.translate(&ast).unwrap();
        assert_eq!(out.query, "error | count(*)");
    }

    #[test]
    fn or_groups_in_parentheses() {
        let ast = parse("SELECT x FROM logs:error WHERE level='error' OR level='warn'").unwrap();
        let t = LogsTranslator;
        let out = t.translate(&ast).unwrap();
        assert_eq!(out.query, "error | (level:\"error\" OR level:\"warn\")");
    }
}
