//! KPI registry adapter.
//!
//! A `KPIDefinition` describes a signal the correlation engine can probe:
//! either an "impact" KPI (what we care about) or a "cause" KPI (what may
//! drive it). Definitions are immutable for the duration of a correlation
//! run; the registry is kept as a constructor-injected trait rather than a
//! process-wide global so tests can wire in fakes without touching shared
//! state (see `DESIGN.md`, "registry/engine coupling").

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Impact,
    Cause,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    Metrics,
    Traces,
    Logs,
    Business,
    Synthetic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

/// Canonical spelling for the metrics-like query language. Both `promql`
/// and `metricsql` are accepted on input (case-insensitive) and normalized
/// to this one spelling everywhere downstream depends on it.
pub const CANONICAL_METRICS_QUERY_TYPE: &str = "promql";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KPIDefinition {
    pub id: String,
    pub name: String,
    pub layer: Layer,
    pub signal_type: SignalType,
    pub datastore: Option<String>,
    pub query_type: Option<String>,
    pub formula: Option<String>,
    pub query: Option<HashMap<String, String>>,
    pub classifier: Option<String>,
    pub domain: Option<String>,
    pub component_type: Option<String>,
    pub business_impact: Option<String>,
    pub definition: Option<String>,
    pub sentiment: Option<Sentiment>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl KPIDefinition {
    /// Normalizes `query_type` for the metrics-like datastore and validates
    /// the structural invariants from the data model.
    pub fn validate(&self) -> Result<()> {
        match self.layer {
            Layer::Impact => {
                if self.business_impact.is_none() && self.definition.is_none() {
                    return Err(EngineError::InvalidQuery(format!(
                        "impact KPI {} must carry businessImpact or definition",
                        self.id
                    )));
                }
            }
            Layer::Cause => {
                if self.classifier.as_deref().unwrap_or("").is_empty() {
                    return Err(EngineError::InvalidQuery(format!(
                        "cause KPI {} must carry a non-empty classifier",
                        self.id
                    )));
                }
            }
        }

        // Spec: "non-impact KPIs must carry either formula or query" — this
        // invariant binds cause KPIs only; an impact KPI may be defined
        // purely by businessImpact/definition with no probe expression.
        if self.layer != Layer::Impact && self.formula.is_none() && self.query.is_none() {
            return Err(EngineError::InvalidQuery(format!(
                "KPI {} must carry either a formula or a query",
                self.id
            )));
        }

        if self.query_type.is_some() && self.datastore.is_none() {
            return Err(EngineError::InvalidQuery(format!(
                "KPI {} has a queryType but no datastore",
                self.id
            )));
        }

        Ok(())
    }

    /// Returns the query-type string normalized to the canonical spelling
    /// when this KPI targets the metrics-like datastore.
    pub fn normalized_query_type(&self) -> Option<String> {
        self.query_type.as_ref().map(|qt| {
            let lower = qt.to_ascii_lowercase();
            if lower == "promql" || lower == "metricsql" {
                CANONICAL_METRICS_QUERY_TYPE.to_string()
            } else {
                lower
            }
        })
    }

    /// The probe expression to run against the metrics adapter: the
    /// formula if present, else the first value of the query map.
    pub fn probe_expression(&self) -> Option<&str> {
        self.formula
            .as_deref()
            .or_else(|| self.query.as_ref().and_then(|q| q.values().next().map(|s| s.as_str())))
    }
}

#[derive(Debug, Clone, Default)]
pub struct KpiFilter {
    pub layer: Option<Layer>,
    pub signal_type: Option<SignalType>,
    pub domain: Option<String>,
}

#[async_trait]
pub trait KpiRegistry: Send + Sync {
    async fn get_kpi(&self, id: &str) -> Result<KPIDefinition>;
    async fn list_kpis(&self, filter: &KpiFilter) -> Result<Vec<KPIDefinition>>;
}

/// Read-only, test/demo-friendly registry over a fixed set of definitions.
/// Production deployments supply their own `KpiRegistry` (backed by the
/// KPI validator/seeder out-of-scope component); this implementation only
/// needs to satisfy the trait so the engines can be exercised end to end.
pub struct InMemoryKpiRegistry {
    definitions: Vec<KPIDefinition>,
}

impl InMemoryKpiRegistry {
    pub fn new(definitions: Vec<KPIDefinition>) -> Self {
        Self { definitions }
    }
}

#[async_trait]
impl KpiRegistry for InMemoryKpiRegistry {
    async fn get_kpi(&self, id: &str) -> Result<KPIDefinition> {
        self.definitions
            .iter()
            .find(|k| k.id == id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("KPI {id} not found")))
    }

    async fn list_kpis(&self, filter: &KpiFilter) -> Result<Vec<KPIDefinition>> {
        Ok(self
            .definitions
            .iter()
            .filter(|k| filter.layer.map(|l| l == k.layer).unwrap_or(true))
            .filter(|k| filter.signal_type.map(|s| s == k.signal_type).unwrap_or(true))
            .filter(|k| {
                filter
                    .domain
                    .as_ref()
                    .map(|d| k.domain.as_deref() == Some(d.as_str()))
                    .unwrap_or(true)
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn impact_kpi() -> KPIDefinition {
        KPIDefinition {
            id: "impact_kpi".into(),
            name: "Impact KPI".into(),
            layer: Layer::Impact,
            signal_type: SignalType::Metrics,
            datastore: Some("victoriametrics".into()),
            query_type: Some("PromQL".into()),
            formula: Some("up".into()),
            query: None,
            classifier: None,
            domain: None,
            component_type: None,
            business_impact: Some("checkout latency".into()),
            definition: None,
            sentiment: None,
            tags: HashMap::new(),
        }
    }

    #[test]
    fn impact_requires_business_impact_or_definition() {
        let mut kpi = impact_kpi();
        kpi.business_impact = None;
        kpi.definition = None;
        assert!(kpi.validate().is_err());
    }

    #[test]
    fn cause_requires_classifier() {
        let mut kpi = impact_kpi();
        kpi.layer = Layer::Cause;
        kpi.classifier = None;
        assert!(kpi.validate().is_err());
        kpi.classifier = Some("infrastructure".into());
        assert!(kpi.validate().is_ok());
    }

    #[test]
    fn query_type_requires_datastore() {
        let mut kpi = impact_kpi();
        kpi.datastore = None;
        assert!(kpi.validate().is_err());
    }

    #[test]
    fn metricsql_and_promql_normalize_to_one_spelling() {
        let mut kpi = impact_kpi();
        kpi.query_type = Some("MetricsQL".into());
        assert_eq!(kpi.normalized_query_type().unwrap(), CANONICAL_METRICS_QUERY_TYPE);
        kpi.query_type = Some("promql".into());
        assert_eq!(kpi.normalized_query_type().unwrap(), CANONICAL_METRICS_QUERY_TYPE);
    }
}
