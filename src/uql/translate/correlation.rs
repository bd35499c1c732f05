//! Correlation translator: re-emits the raw query unchanged, tagged with
//! the `correlation` engine. The correlation engine parses `left`/`right`
//! expressions itself; the translator's job is only to route the whole
//! query there and forward the time window verbatim.

use crate::error::Result;
use crate::model::ast::UqlQuery;
use crate::model::query::TranslatedQuery;

use super::Translator;

pub struct CorrelationTranslator;

impl Translator for CorrelationTranslator {
    fn name(&self) -> &'static str {
        "correlation"
    }

    fn supported_engines(&self) -> &'static [&'static str] {
        &["correlation"]
    }

    fn can_translate(&self, ast: &UqlQuery) -> bool {
        matches!(ast, UqlQuery::Correlation(_))
    }

    fn translate(&self, ast: &UqlQuery) -> Result<TranslatedQuery> {
        let q = match ast {
            UqlQuery::Correlation(q) => q,
            _ => unreachable!("can_translate guards this"),
        };
        Ok(TranslatedQuery {
            engine: "correlation".into(),
            query: q.envelope.raw_query.clone(),
            parameters: None,
            start_time: None,
            end_time: None,
            time_window: q.envelope.time_window,
            limit: None,
            order_by: None,
            group_by: None,
            aggregation: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uql::parser::parse;

    #[test]
    fn correlation_query_emits_raw_query_tagged_correlation() {
        let raw = "logs:error WITHIN 5m OF metrics:cpu_usage > 80";
        let ast = parse(raw).unwrap();
        let t = CorrelationTranslator;
        let out = t.translate(&ast).unwrap();
        assert_eq!(out.engine, "correlation");
        assert_eq!(out.query, raw);
        assert_eq!(out.time_window, Some(chrono::Duration::minutes(5)));
    }

    #[test]
    fn translation_is_idempotent() {
        let raw = "logs:error AND metrics:high_latency";
        let ast = parse(raw).unwrap();
        let t = CorrelationTranslator;
        let once = t.translate(&ast).unwrap();
        let twice = t.translate(&ast).unwrap();
        assert_eq!(once.query, twice.query);
    }
}
