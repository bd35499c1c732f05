//! Correlation engine: given an impact KPI observed over a time range,
//! discovers candidate causal KPIs, samples aligned per-ring series from
//! the metrics adapter, and scores each candidate with the stats kernel.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use tracing::{info, warn};

use crate::adapters::{MetricsAdapter, MetricsQueryRequest, MetricsRangeRequest};
use crate::error::{EngineError, Result};
use crate::kpi::{KPIDefinition, KpiFilter, KpiRegistry, Layer};
use crate::model::ast::CorrelationQuery;
use crate::model::correlation::{
    BucketConfig, CandidateStats, CauseCandidate, CorrelationResult, EngineConfig, TimeRange,
};
use crate::stats;

/// Total wall-clock budget for one `correlate` run. Per spec §5 this is
/// divided by the expected sub-query count to get a per-query timeout;
/// exceeding the total budget aborts the run with `DeadlineExceeded`.
const DEFAULT_CORRELATION_DEADLINE: StdDuration = StdDuration::from_secs(30);

/// The UQL-style correlation result: the statistical result plus the
/// engines the two correlated expressions targeted, so a caller can tell
/// which backends were actually consulted.
#[derive(Debug, Clone)]
pub struct UnifiedCorrelationResult {
    pub left_engine: String,
    pub right_engine: String,
    pub result: CorrelationResult,
}

pub struct CorrelationEngine {
    metrics: Arc<dyn MetricsAdapter>,
    kpi_registry: Arc<dyn KpiRegistry>,
    config: EngineConfig,
}

impl CorrelationEngine {
    pub fn new(metrics: Arc<dyn MetricsAdapter>, kpi_registry: Arc<dyn KpiRegistry>, config: EngineConfig) -> Self {
        Self { metrics, kpi_registry, config }
    }

    pub fn validate_correlation_query(&self, q: &CorrelationQuery) -> Result<()> {
        if q.left_expr.data_source.query.trim().is_empty() || q.right_expr.data_source.query.trim().is_empty() {
            return Err(EngineError::InvalidQuery(
                "correlation query requires two non-empty expressions".into(),
            ));
        }
        Ok(())
    }

    /// A fixed, deterministic set of example queries this engine can
    /// handle, surfaced to callers (e.g. for API documentation or UI
    /// autocomplete).
    pub fn get_correlation_examples(&self) -> Vec<String> {
        vec![
            "logs:error AND metrics:high_latency".to_string(),
            "logs:service:checkout AND traces:service:checkout".to_string(),
            "metrics:cpu_usage WITHIN 5m OF logs:error".to_string(),
        ]
    }

    /// The UQL-style multi-engine path: resolves a `CorrelationQuery`'s
    /// time window into a range and delegates to `correlate`.
    pub async fn execute_correlation(&self, q: &CorrelationQuery) -> Result<UnifiedCorrelationResult> {
        self.validate_correlation_query(q)?;
        let window = q.envelope.time_window.unwrap_or_else(|| Duration::minutes(15));
        let end = chrono::Utc::now();
        let start = end - window;
        let range = TimeRange::new(start, end)?;
        let result = self.correlate(range).await?;
        Ok(UnifiedCorrelationResult {
            left_engine: q.left_expr.data_source.engine.clone(),
            right_engine: q.right_expr.data_source.engine.clone(),
            result,
        })
    }

    /// Ring-bucketed correlation analysis over `time_range`, per the
    /// seven-step pipeline: ring layout, impact/cause discovery, per-ring
    /// scoring, reason tagging, suspicion filtering, and assembly.
    pub async fn correlate(&self, time_range: TimeRange) -> Result<CorrelationResult> {
        let buckets = self.config.buckets.unwrap_or(BucketConfig {
            core_window_size: time_range.end - time_range.start,
            pre_rings: 4,
            post_rings: 4,
            ring_step: (time_range.end - time_range.start).max(Duration::minutes(1)),
        });
        let rings = buckets.layout(&time_range);
        let n = rings.len();
        let max_lag = (n.saturating_sub(1)).min(buckets.pre_rings as usize);

        let impacts = self.discover(Layer::Impact).await;
        if impacts.is_empty() {
            return Ok(CorrelationResult::default());
        }

        let causes = self.discover(Layer::Cause).await;

        // Total deadline budget, divided by the number of sub-queries the
        // scoring loop below is expected to issue (two per ring per
        // candidate pair: impact + cause), per spec §5.
        let expected_subqueries = (impacts.len() * causes.len() * n * 2).max(1);
        let per_query_budget = DEFAULT_CORRELATION_DEADLINE / expected_subqueries as u32;
        let deadline = std::time::Instant::now() + DEFAULT_CORRELATION_DEADLINE;

        let mut affected_services = HashSet::new();
        let mut all_candidates = Vec::new();

        for impact in &impacts {
            affected_services.insert(impact.name.clone());
            for cause in &causes {
                if std::time::Instant::now() >= deadline {
                    return Err(EngineError::DeadlineExceeded);
                }
                let candidate = self
                    .score_pair(impact, cause, &rings, max_lag, deadline, per_query_budget)
                    .await;
                all_candidates.push(candidate);
            }
        }

        let mut retained: Vec<CauseCandidate> = all_candidates
            .into_iter()
            .filter(|c| c.suspicion_score >= self.config.min_anomaly_score)
            .collect();

        retained.sort_by(|a, b| {
            b.suspicion_score
                .partial_cmp(&a.suspicion_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.stats
                        .pearson
                        .abs()
                        .partial_cmp(&a.stats.pearson.abs())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.kpi_id.cmp(&b.kpi_id))
        });

        let confidence = retained.first().map(|c| c.suspicion_score).unwrap_or(0.0);

        Ok(CorrelationResult {
            causes: retained,
            affected_services: affected_services.into_iter().collect(),
            confidence,
        })
    }

    /// Lists KPIs at `layer` and retains only those whose discovery probe
    /// against the metrics adapter returns a non-empty result. A probe
    /// failure is retried once with a fixed backoff before the KPI is
    /// skipped, per §4.7 failure handling.
    async fn discover(&self, layer: Layer) -> Vec<KPIDefinition> {
        let filter = KpiFilter { layer: Some(layer), signal_type: None, domain: None };
        let kpis = match self.kpi_registry.list_kpis(&filter).await {
            Ok(kpis) => kpis,
            Err(e) => {
                warn!(error = %e, ?layer, "KPI registry listing failed");
                return Vec::new();
            }
        };

        let mut kept = Vec::new();
        for kpi in kpis {
            let Some(expr) = kpi.probe_expression() else {
                continue;
            };
            match self.probe_once(expr).await {
                Ok(true) => kept.push(kpi),
                Ok(false) => {}
                Err(_) => {
                    tokio::time::sleep(StdDuration::from_millis(50)).await;
                    match self.probe_once(expr).await {
                        Ok(true) => kept.push(kpi),
                        Ok(false) => {}
                        Err(e) => {
                            warn!(kpi = %kpi.id, error = %e, "discovery probe failed after retry, skipping");
                        }
                    }
                }
            }
        }
        kept
    }

    async fn probe_once(&self, expr: &str) -> Result<bool> {
        let resp = self
            .metrics
            .execute_query(MetricsQueryRequest { query: expr.to_string(), tenant_id: None, timeout: None })
            .await?;
        Ok(!resp.data.is_empty())
    }

    /// Scores one (impact, cause) pair across all rings. A query failure
    /// for any ring downgrades the whole candidate to zeroed stats rather
    /// than aborting the run.
    async fn score_pair(
        &self,
        impact: &KPIDefinition,
        cause: &KPIDefinition,
        rings: &[TimeRange],
        max_lag: usize,
        deadline: std::time::Instant,
        per_query_budget: StdDuration,
    ) -> CauseCandidate {
        match self.sample_pair(impact, cause, rings, deadline, per_query_budget).await {
            Ok((impact_series, cause_series)) => {
                let n = rings.len();
                let pearson = stats::pearson(&cause_series, &impact_series);
                let spearman = stats::spearman(&cause_series, &impact_series);
                let (cross_lag, cross_max) = stats::cross_correlation_scan(&cause_series, &impact_series, max_lag);
                let trend: Vec<f64> = (0..n).map(|i| i as f64).collect();
                let partial = stats::partial_correlation(&cause_series, &impact_series, &trend);

                let mut reasons = Vec::new();
                if pearson.abs() >= 0.7 {
                    reasons.push("strong_pearson".to_string());
                }
                if spearman.abs() >= 0.7 {
                    reasons.push("strong_spearman".to_string());
                }
                if cross_lag > 0 && cross_max >= 0.5 {
                    reasons.push("lagged_cause_precedes_impact".to_string());
                }
                if partial.abs() >= pearson.abs() {
                    reasons.push("partial_supports".to_string());
                } else {
                    reasons.push("partial_weakens".to_string());
                }

                let suspicion_score = stats::compute_suspicion_score(
                    pearson,
                    spearman,
                    cross_max,
                    cross_lag,
                    n,
                    self.config.min_correlation,
                    partial,
                    0.0,
                );

                CauseCandidate {
                    kpi_id: cause.id.clone(),
                    kpi_name: cause.name.clone(),
                    suspicion_score,
                    reasons,
                    stats: CandidateStats {
                        pearson,
                        spearman,
                        cross_corr_max: cross_max,
                        cross_corr_lag: cross_lag,
                        partial,
                        sample_size: n,
                        confidence: suspicion_score,
                    },
                }
            }
            Err(e) => {
                info!(impact = %impact.id, cause = %cause.id, error = %e, "per-candidate probe failed");
                CauseCandidate {
                    kpi_id: cause.id.clone(),
                    kpi_name: cause.name.clone(),
                    suspicion_score: 0.0,
                    reasons: vec!["probe_failed".to_string()],
                    stats: CandidateStats::default(),
                }
            }
        }
    }

    async fn sample_pair(
        &self,
        impact: &KPIDefinition,
        cause: &KPIDefinition,
        rings: &[TimeRange],
        deadline: std::time::Instant,
        per_query_budget: StdDuration,
    ) -> Result<(Vec<f64>, Vec<f64>)> {
        let impact_expr = impact
            .probe_expression()
            .ok_or_else(|| EngineError::InvalidQuery(format!("impact KPI {} has no probe expression", impact.id)))?;
        let cause_expr = cause
            .probe_expression()
            .ok_or_else(|| EngineError::InvalidQuery(format!("cause KPI {} has no probe expression", cause.id)))?;

        let mut impact_series = Vec::with_capacity(rings.len());
        let mut cause_series = Vec::with_capacity(rings.len());
        for ring in rings {
            // Checked between ring iterations per spec §5's cancellation
            // boundary, independent of the per-query budget below.
            if std::time::Instant::now() >= deadline {
                return Err(EngineError::DeadlineExceeded);
            }
            impact_series.push(self.sample_ring(impact_expr, ring, per_query_budget).await?);
            cause_series.push(self.sample_ring(cause_expr, ring, per_query_budget).await?);
        }
        Ok((impact_series, cause_series))
    }

    async fn sample_ring(&self, expr: &str, ring: &TimeRange, budget: StdDuration) -> Result<f64> {
        let step = (ring.end - ring.start).to_std().unwrap_or(StdDuration::from_secs(60));
        let query = self.metrics.execute_range_query(MetricsRangeRequest {
            query: expr.to_string(),
            start: ring.start,
            end: ring.end,
            step,
            tenant_id: None,
        });
        let resp = match tokio::time::timeout(budget, query).await {
            Ok(Ok(r)) => r,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(EngineError::DeadlineExceeded),
        };
        Ok(resp.data.last_scalar().unwrap_or(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::InMemoryMetricsAdapter;
    use crate::kpi::{InMemoryKpiRegistry, SignalType};
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;

    fn kpi(id: &str, layer: Layer, formula: &str) -> KPIDefinition {
        KPIDefinition {
            id: id.to_string(),
            name: format!("{id} name"),
            layer,
            signal_type: SignalType::Metrics,
            datastore: Some("victoriametrics".into()),
            query_type: Some("promql".into()),
            formula: Some(formula.to_string()),
            query: None,
            classifier: if layer == Layer::Cause { Some("infrastructure".into()) } else { None },
            domain: None,
            component_type: None,
            business_impact: if layer == Layer::Impact { Some("checkout latency".into()) } else { None },
            definition: None,
            sentiment: None,
            tags: HashMap::new(),
        }
    }

    fn cfg() -> EngineConfig {
        EngineConfig {
            min_anomaly_score: 0.0,
            min_correlation: 0.1,
            buckets: Some(BucketConfig {
                core_window_size: Duration::minutes(1),
                pre_rings: 3,
                post_rings: 3,
                ring_step: Duration::minutes(1),
            }),
            default_query_limit: 1000,
            probes: Vec::new(),
            service_candidates: Vec::new(),
        }
    }

    fn scalar_sequence(values: &[f64]) -> Vec<crate::adapters::MetricsQueryResponse> {
        values.iter().map(|v| InMemoryMetricsAdapter::scalar("_", *v).1).collect()
    }

    #[tokio::test]
    async fn strong_cause_outranks_weak_cause() {
        let impact = kpi("checkout_latency", Layer::Impact, "checkout_latency_formula");
        let strong = kpi("db_saturation", Layer::Cause, "db_saturation_formula");
        let weak = kpi("cache_hitrate", Layer::Cause, "cache_hitrate_formula");

        let impact_values = vec![1.0, 1.0, 1.0, 10.0, 10.0, 10.0, 10.0];
        let strong_values = impact_values.clone();
        let weak_values = vec![5.0, 3.0, 7.0, 2.0, 6.0, 4.0, 1.0];

        let metrics = InMemoryMetricsAdapter::new()
            .with_instant_result("checkout_latency_formula", InMemoryMetricsAdapter::scalar("_", 10.0).1)
            .with_instant_result("db_saturation_formula", InMemoryMetricsAdapter::scalar("_", 10.0).1)
            .with_instant_result("cache_hitrate_formula", InMemoryMetricsAdapter::scalar("_", 5.0).1)
            // impact and the strong cause are sampled twice per ring (once
            // for each candidate pair they appear in)
            .with_range_sequence(
                "checkout_latency_formula",
                scalar_sequence(&impact_values)
                    .into_iter()
                    .chain(scalar_sequence(&impact_values))
                    .collect(),
            )
            .with_range_sequence("db_saturation_formula", scalar_sequence(&strong_values))
            .with_range_sequence("cache_hitrate_formula", scalar_sequence(&weak_values));

        let registry = InMemoryKpiRegistry::new(vec![impact, strong, weak]);
        let engine = CorrelationEngine::new(Arc::new(metrics), Arc::new(registry), cfg());

        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let range = TimeRange::new(start, start + Duration::minutes(1)).unwrap();
        let result = engine.correlate(range).await.unwrap();

        assert!(!result.causes.is_empty());
        assert_eq!(result.causes[0].kpi_id, "db_saturation");
        assert!(result.causes[0].suspicion_score >= result.causes.last().unwrap().suspicion_score);
    }

    #[tokio::test]
    async fn empty_impact_set_returns_zero_confidence() {
        let registry = InMemoryKpiRegistry::new(vec![]);
        let metrics = InMemoryMetricsAdapter::new();
        let engine = CorrelationEngine::new(Arc::new(metrics), Arc::new(registry), cfg());
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let range = TimeRange::new(start, start + Duration::minutes(1)).unwrap();
        let result = engine.correlate(range).await.unwrap();
        assert!(result.causes.is_empty());
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn examples_include_required_strings() {
        let registry = InMemoryKpiRegistry::new(vec![]);
        let metrics = InMemoryMetricsAdapter::new();
        let engine = CorrelationEngine::new(Arc::new(metrics), Arc::new(registry), cfg());
        let examples = engine.get_correlation_examples();
        assert!(examples.contains(&"logs:error AND metrics:high_latency".to_string()));
        assert!(examples.contains(&"logs:service:checkout AND traces:service:checkout".to_string()));
    }
}
