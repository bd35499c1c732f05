//! Traces translator: emits a brace-enclosed tag selector plus `&&`-joined
//! tag filters.

use tracing::warn;

use crate::error::Result;
use crate::model::ast::*;
use crate::model::query::TranslatedQuery;

use super::Translator;

pub struct TracesTranslator;

impl Translator for TracesTranslator {
    fn name(&self) -> &'static str {
        "traces"
    }

    fn supported_engines(&self) -> &'static [&'static str] {
        &["traces"]
    }

    fn can_translate(&self, ast: &UqlQuery) -> bool {
        match ast {
            UqlQuery::Select(q) => q.data_source.engine == "traces",
            UqlQuery::Aggregation(q) => q.data_source.engine == "traces",
            _ => false,
        }
    }

    fn translate(&self, ast: &UqlQuery) -> Result<TranslatedQuery> {
        let (data_source, where_clause, envelope, group_by) = match ast {
            UqlQuery::Select(q) => (&q.data_source, &q.where_clause, &q.envelope, &q.group_by),
            UqlQuery::Aggregation(q) => (&q.data_source, &q.where_clause, &q.envelope, &q.group_by),
            _ => unreachable!("can_translate guards this"),
        };

        let mut query = format!("{{service.name=\"{}\"}}", data_source.query);
        if let Some(cond) = where_clause {
            let mut filters = Vec::new();
            collect_tag_filters(cond, &mut filters);
            for f in filters {
                query = format!("{query} && {f}");
            }
        }

        Ok(TranslatedQuery {
            engine: "traces".into(),
            query,
            parameters: None,
            start_time: None,
            end_time: None,
            time_window: envelope.time_window,
            limit: envelope.limit,
            order_by: Some(envelope.order_by.clone()),
            group_by: Some(group_by.clone()),
            aggregation: None,
        })
    }
}

fn collect_tag_filters(cond: &Condition, out: &mut Vec<String>) {
    match cond {
        Condition::Leaf { field, operator, value } => {
            if let Some(rendered) = tag_filter(field, *operator, value) {
                out.push(rendered);
            }
        }
        Condition::And(l, r) => {
            collect_tag_filters(l, out);
            collect_tag_filters(r, out);
        }
        Condition::Or(l, _r) => {
            warn!("OR inside a traces tag selector is not supported; dropping the right-hand branch");
            collect_tag_filters(l, out);
        }
    }
}

fn tag_filter(field: &str, op: ComparisonOperator, value: &Literal) -> Option<String> {
    let v = value.as_display();
    match op {
        ComparisonOperator::Eq => Some(format!("{field}=\"{v}\"")),
        ComparisonOperator::Ne => Some(format!("{field}!=\"{v}\"")),
        ComparisonOperator::Like | ComparisonOperator::Match => Some(format!("{field}=~\"{v}\"")),
        other => {
            warn!(operator = ?other, "operator not representable as a trace tag filter; dropping");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uql::parser::parse;

    #[test]
    fn select_emits_service_tag_selector() {
        let ast = parse("SELECT x FROM traces:checkout WHERE operation='charge'").unwrap();
        let t = TracesTranslator;
        let out = t.translate(&ast).unwrap();
        assert_eq!(out.query, "{service.name=\"checkout\"} && operation=\"charge\"");
    }
}
