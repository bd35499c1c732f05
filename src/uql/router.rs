//! Heuristic query router: assigns an engine tag to a raw query string when
//! the caller hasn't set one explicitly. Purely lexical, deterministic, and
//! independent of any external state (spec §4.2).

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{EngineError, Result};
use crate::model::ast::Engine;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    pub routed_type: Engine,
    pub reason: &'static str,
}

static UQL_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*SELECT\b|\b(FROM|WHERE|GROUP\s+BY|ORDER\s+BY|LIMIT|HAVING)\b").unwrap()
});

static METRIC_VOCAB: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\brate\s*\(|\bincrease\s*\(|\bhistogram\b|\bsum\s*\(|\bavg\s*\(|\bquantile\b|\bup\b|\bcpu\b|\bhttp_",
    )
    .unwrap()
});

static TRACE_VOCAB: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\bservice:|\boperation:|\bspan\b|\btrace\b|\bduration:|\btags:|http\.status_code",
    )
    .unwrap()
});

static LOG_VOCAB: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\berror\b|\bwarn\b|\binfo\b|\bdebug\b|\blevel:|\bhost:|\bpod\b|\bnamespace\b")
        .unwrap()
});

static COLON_FIELD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\w+:\S").unwrap());

static EXPLICIT_BOOLEAN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(AND|OR)\b").unwrap());

/// Counts how many distinct engine vocabularies (metric/trace/log) a raw
/// query mentions. Used by the engine's parallelizability check, which
/// treats a query that touches two or more backend vocabularies as a
/// fan-out candidate even without an explicit `AND`.
pub fn distinct_engine_vocab_hits(raw: &str) -> usize {
    [&*METRIC_VOCAB, &*TRACE_VOCAB, &*LOG_VOCAB]
        .iter()
        .filter(|re| re.is_match(raw))
        .count()
}

/// Classifies a raw query string into the engine that should handle it,
/// honoring an already-set type rather than re-deriving it.
pub fn classify_query(raw: &str, explicit: Option<Engine>) -> Result<RouteDecision> {
    if raw.trim().is_empty() {
        return Err(EngineError::InvalidQuery("empty query".into()));
    }

    if let Some(engine) = explicit {
        return Ok(RouteDecision {
            routed_type: engine,
            reason: "explicit type",
        });
    }

    if UQL_KEYWORDS.is_match(raw) {
        return Ok(RouteDecision {
            routed_type: Engine::Metrics,
            reason: "uql keywords",
        });
    }

    if METRIC_VOCAB.is_match(raw) {
        return Ok(RouteDecision {
            routed_type: Engine::Metrics,
            reason: "metric vocabulary",
        });
    }

    if TRACE_VOCAB.is_match(raw) {
        return Ok(RouteDecision {
            routed_type: Engine::Traces,
            reason: "trace vocabulary",
        });
    }

    let log_hits = LOG_VOCAB.find_iter(raw).count();
    if log_hits >= 2 || COLON_FIELD.is_match(raw) || EXPLICIT_BOOLEAN.is_match(raw) {
        return Ok(RouteDecision {
            routed_type: Engine::Logs,
            reason: "log vocabulary / boolean search",
        });
    }

    Ok(RouteDecision {
        routed_type: Engine::Logs,
        reason: "default",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_is_invalid() {
        assert!(classify_query("   ", None).is_err());
    }

    #[test]
    fn explicit_type_is_honored() {
        let d = classify_query("anything at all", Some(Engine::Traces)).unwrap();
        assert_eq!(d.routed_type, Engine::Traces);
    }

    #[test]
    fn select_routes_as_uql_metrics() {
        let d = classify_query("SELECT x FROM logs:error", None).unwrap();
        assert_eq!(d.routed_type, Engine::Metrics);
    }

    #[test]
    fn metric_function_routes_to_metrics() {
        let d = classify_query("rate(http_requests_total[5m])", None).unwrap();
        assert_eq!(d.routed_type, Engine::Metrics);
    }

    #[test]
    fn trace_vocabulary_routes_to_traces() {
        let d = classify_query("service:checkout operation:charge", None).unwrap();
        assert_eq!(d.routed_type, Engine::Traces);
    }

    #[test]
    fn log_vocabulary_routes_to_logs() {
        let d = classify_query("level:error host:api-1", None).unwrap();
        assert_eq!(d.routed_type, Engine::Logs);
    }

    #[test]
    fn counts_distinct_engine_vocabularies() {
        assert_eq!(distinct_engine_vocab_hits("rate(http_requests_total[5m])"), 1);
        assert_eq!(
            distinct_engine_vocab_hits("rate(http_requests_total[5m]) service:checkout"),
            2
        );
    }

    #[test]
    fn plain_text_defaults_to_logs() {
        let d = classify_query("something happened", None).unwrap();
        assert_eq!(d.routed_type, Engine::Logs);
        assert_eq!(d.reason, "default");
    }
}
