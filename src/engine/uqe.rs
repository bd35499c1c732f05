//! Unified Query Engine: the single entry point that routes a client
//! query, optionally compiles it through the UQL pipeline, consults the
//! cache, dispatches to a backend adapter (or fans sub-queries out in
//! parallel and merges them), and writes the result back to cache with
//! pattern-index bookkeeping (spec §4.6).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use md5::{Digest, Md5};
use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{
    Cache, LogsAdapter, LogsQueryRequest, MetricsAdapter, MetricsQueryRequest, MetricsRangeRequest,
    TracesAdapter, TracesSearchRequest,
};
use crate::error::{EngineError, Result};
use crate::model::ast::Engine as UqlEngine;
use crate::model::correlation::{CorrelationResult, TimeRange};
use crate::model::query::{
    CacheOptions, EngineResultMeta, QueryStatus, QueryType, ResultMetadata, UnifiedQuery,
    UnifiedResult,
};
use crate::uql::{parse, router, Optimizer, TranslatorRegistry};

use super::ce::CorrelationEngine;

const DEFAULT_CACHE_TTL: StdDuration = StdDuration::from_secs(300);
const MAX_CACHE_TTL: StdDuration = StdDuration::from_secs(3600);
const DEFAULT_TIMEOUT: StdDuration = StdDuration::from_secs(30);
const PATTERN_DELETE_BATCH: usize = 100;

/// The overall health verdict returned by `health_check`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallHealth {
    Healthy,
    Partial,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineHealth {
    Healthy,
    Unhealthy,
    NotConfigured,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HealthReport {
    pub overall_health: OverallHealth,
    pub engine_health: HashMap<String, EngineHealth>,
    pub last_checked: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct QueryMetadataCapabilities {
    pub supported_engines: Vec<String>,
    pub query_capabilities: Vec<String>,
    pub cache_capabilities: Vec<String>,
}

/// Computes the deterministic cache key for a query: `unified_query:<md5
/// hex of keyData>`, where `keyData` concatenates type, query, tenant,
/// sorted parameters, and ISO-8601 start/end when present (spec §3, and
/// §9 "cache key stability": parameters are sorted before concatenation
/// so a non-deterministic map iteration order never causes a silent
/// cache miss).
pub fn cache_key(q: &UnifiedQuery) -> String {
    let mut key_data = String::new();
    key_data.push_str(q.query_type.map(|t| t.as_str()).unwrap_or(""));
    key_data.push(':');
    key_data.push_str(&q.query);
    key_data.push(':');
    key_data.push_str(q.tenant_id.as_deref().unwrap_or(""));
    key_data.push(':');
    if let Some(params) = &q.parameters {
        let mut pairs: Vec<(&String, &String)> = params.iter().collect();
        pairs.sort_by(|a, b| a.0.cmp(b.0));
        for (k, v) in pairs {
            key_data.push_str(k);
            key_data.push('=');
            key_data.push_str(v);
            key_data.push(';');
        }
    }
    if let Some(start) = q.start_time {
        key_data.push_str(&start.to_rfc3339());
    }
    if let Some(end) = q.end_time {
        key_data.push_str(&end.to_rfc3339());
    }
    let digest = Md5::digest(key_data.as_bytes());
    format!("unified_query:{digest:x}")
}

/// Pattern-index set keys a cached result should be added to, derived
/// from the result's type and whether it carries correlations (spec
/// §4.6 step 6). Set keys are `pattern_index:<pattern>` per spec §3/§6.
fn write_pattern_indexes(query_type: QueryType, has_correlations: bool) -> Vec<String> {
    let mut patterns = vec![
        "pattern_index:query_cache:*".to_string(),
        format!("pattern_index:query_cache:{}:*", query_type.as_str()),
    ];
    if has_correlations {
        patterns.push("pattern_index:query_cache:correlation:*".to_string());
    }
    patterns
}

/// Target *glob* patterns an invalidation call should sweep, derived from
/// the invalidation pattern string itself (spec §4.6 step 7). These are
/// not literal set names — `write_pattern_indexes` never embeds the
/// caller's pattern into the key it writes — they are `*`-wildcard globs
/// resolved against the set of currently-existing pattern-index keys via
/// `Cache::find_pattern_index_sets`, the same way a Redis `SCAN ... MATCH`
/// would resolve them against the keyspace.
fn invalidation_target_patterns(pattern: &str) -> Vec<String> {
    let mut targets = vec![format!("pattern_index:query_cache:*{pattern}*")];
    for engine in ["metrics", "logs", "traces", "uql", "correlation"] {
        targets.push(format!("pattern_index:query_cache:{engine}:*{pattern}*"));
    }
    let lower = pattern.to_ascii_lowercase();
    if lower.contains("correlation") || lower.contains("causal") {
        targets.push("pattern_index:query_cache:correlation:*".to_string());
    }
    targets
}

fn is_parallelizable(raw: &str) -> bool {
    let lower = raw.to_ascii_lowercase();
    lower.contains("parallel")
        || lower.contains("concurrent")
        || raw.contains(" AND ")
        || raw.contains(" WITHIN ")
        || router::distinct_engine_vocab_hits(raw) >= 2
}

/// Constructor-injected adapter set. Kept as a struct of `Arc<dyn Trait>`
/// ports rather than a generic-over-traits engine so the engine type
/// itself stays simple to name and construct (mirrors the teacher's
/// `Arc<Database>` + config constructor pattern in `analytics::*`).
pub struct UnifiedQueryEngine {
    metrics: Arc<dyn MetricsAdapter>,
    logs: Arc<dyn LogsAdapter>,
    traces: Arc<dyn TracesAdapter>,
    cache: Arc<dyn Cache>,
    correlation: Arc<CorrelationEngine>,
    optimizer: Optimizer,
    translators: TranslatorRegistry,
    default_query_limit: u64,
    uql_recursion_guard: AtomicU64,
}

impl UnifiedQueryEngine {
    pub fn new(
        metrics: Arc<dyn MetricsAdapter>,
        logs: Arc<dyn LogsAdapter>,
        traces: Arc<dyn TracesAdapter>,
        cache: Arc<dyn Cache>,
        correlation: Arc<CorrelationEngine>,
    ) -> Self {
        Self {
            metrics,
            logs,
            traces,
            cache,
            correlation,
            optimizer: Optimizer::new(),
            translators: TranslatorRegistry::new(),
            default_query_limit: 1000,
            uql_recursion_guard: AtomicU64::new(0),
        }
    }

    /// `executeQuery(ctx, q)`: route, optionally compile, check cache,
    /// dispatch, write cache (spec §4.6 steps 1-6).
    #[instrument(skip(self, q), fields(query_id = %q.id, cached))]
    pub async fn execute_query(&self, q: &UnifiedQuery) -> Result<UnifiedResult> {
        if q.query.trim().is_empty() {
            return Err(EngineError::InvalidQuery("query text is empty".into()));
        }

        let explicit = q.query_type.and_then(query_type_to_uql_engine);
        let decision = router::classify_query(&q.query, explicit)?;
        debug!(routed_type = decision.routed_type.as_str(), reason = decision.reason, "routed query");

        let is_uql = q.query_type != Some(QueryType::Correlation)
            && explicit.is_none()
            && router::classify_query(&q.query, None)
                .map(|d| d.reason == "uql keywords")
                .unwrap_or(false);

        if is_uql && self.uql_recursion_guard.load(Ordering::SeqCst) == 0 {
            return self.execute_uql(q).await;
        }

        if q.query_type == Some(QueryType::Correlation) {
            return self.execute_correlation(q).await;
        }

        let cache_opts = q.cache_options.clone().unwrap_or_default();
        if cache_opts.enabled && !cache_opts.bypass {
            if let Some(hit) = self.try_cache_get(q).await {
                tracing::Span::current().record("cached", true);
                return Ok(hit);
            }
        }

        let result = if is_parallelizable(&q.query) {
            self.execute_parallel(q, decision.routed_type).await?
        } else {
            self.execute_single(q, decision.routed_type).await?
        };

        if cache_opts.enabled && result.status != QueryStatus::Error {
            self.write_cache(q, &result, cache_opts.ttl).await;
        }

        Ok(result)
    }

    /// `executeUQLQuery`: parse, optimize, translate, resubmit with the
    /// translated string under the mapped engine (spec §4.6 step 3). Sets
    /// a recursion guard so the synthetic re-entrant call never takes the
    /// UQL branch a second time.
    #[instrument(skip(self, q), fields(query_id = %q.id))]
    pub async fn execute_uql(&self, q: &UnifiedQuery) -> Result<UnifiedResult> {
        let ast = parse(&q.query)?;
        crate::uql::parser::validate(&ast)?;
        let optimized = self.optimizer.optimize(&ast);
        let translated = self.translators.translate(&optimized)?;

        let mut synthetic = q.clone();
        synthetic.query = translated.query.clone();
        synthetic.query_type = uql_query_type_for_engine(&translated.engine);
        if synthetic.start_time.is_none() {
            synthetic.start_time = translated.start_time;
        }
        if synthetic.end_time.is_none() {
            synthetic.end_time = translated.end_time;
        }

        self.uql_recursion_guard.fetch_add(1, Ordering::SeqCst);
        let result = self.execute_query(&synthetic).await;
        self.uql_recursion_guard.fetch_sub(1, Ordering::SeqCst);
        result
    }

    /// `executeCorrelationQuery`: delegates straight to the correlation
    /// engine using the query's start/end as the time range.
    #[instrument(skip(self, q), fields(query_id = %q.id))]
    pub async fn execute_correlation(&self, q: &UnifiedQuery) -> Result<UnifiedResult> {
        let start = q
            .start_time
            .ok_or_else(|| EngineError::InvalidQuery("correlation query requires startTime".into()))?;
        let end = q
            .end_time
            .ok_or_else(|| EngineError::InvalidQuery("correlation query requires endTime".into()))?;
        let range = TimeRange::new(start, end)?;

        let started = std::time::Instant::now();
        let correlation_result = self.correlation.correlate(range).await?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        Ok(self.assemble_correlation_result(q, correlation_result, elapsed_ms))
    }

    async fn try_cache_get(&self, q: &UnifiedQuery) -> Option<UnifiedResult> {
        let key = cache_key(q);
        match self.cache.get(&key).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<UnifiedResult>(&bytes) {
                Ok(mut result) => {
                    result.cached = true;
                    Some(result)
                }
                Err(e) => {
                    warn!(error = %e, "cached payload failed to deserialize, treating as cold");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "cache read failed, proceeding as cold");
                None
            }
        }
    }

    async fn write_cache(&self, q: &UnifiedQuery, result: &UnifiedResult, ttl: Option<StdDuration>) {
        let key = cache_key(q);
        let ttl = ttl.unwrap_or(DEFAULT_CACHE_TTL).min(MAX_CACHE_TTL);
        let bytes = match serde_json::to_vec(result) {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "failed to serialize result for caching");
                return;
            }
        };
        if let Err(e) = self.cache.set(&key, bytes, ttl).await {
            warn!(error = %e, "cache write failed, result not cached");
            return;
        }
        for pattern in write_pattern_indexes(result.query_type, result.correlations.is_some()) {
            if let Err(e) = self.cache.add_to_pattern_index(&pattern, &key).await {
                warn!(error = %e, pattern, "pattern-index write failed");
            }
        }
    }

    /// `invalidateCache(pattern)`: sweeps every target pattern-index set,
    /// multi-deletes its members in batches, then drops the index itself
    /// (spec §4.6 step 7; runs asynchronously w.r.t. the caller, so this
    /// method spawns the sweep and returns immediately).
    pub fn invalidate_cache(&self, pattern: String) {
        if pattern.is_empty() {
            return;
        }
        let cache = self.cache.clone();
        tokio::spawn(async move {
            let mut swept = std::collections::HashSet::new();
            for target in invalidation_target_patterns(&pattern) {
                let set_names = match cache.find_pattern_index_sets(&target).await {
                    Ok(names) => names,
                    Err(e) => {
                        warn!(error = %e, target, "failed to resolve pattern index sets during invalidation");
                        continue;
                    }
                };
                for set_name in set_names {
                    if !swept.insert(set_name.clone()) {
                        continue;
                    }
                    let keys = match cache.get_pattern_index_keys(&set_name).await {
                        Ok(k) => k,
                        Err(e) => {
                            warn!(error = %e, set_name, "failed to read pattern index during invalidation");
                            continue;
                        }
                    };
                    for batch in keys.chunks(PATTERN_DELETE_BATCH) {
                        if let Err(e) = cache.delete_multiple(batch).await {
                            warn!(error = %e, set_name, "batch delete failed during invalidation, continuing");
                        }
                    }
                    if let Err(e) = cache.delete_pattern_index(&set_name).await {
                        warn!(error = %e, set_name, "failed to drop pattern index");
                    }
                }
            }
        });
    }

    async fn execute_single(&self, q: &UnifiedQuery, engine: UqlEngine) -> Result<UnifiedResult> {
        let started = std::time::Instant::now();
        let timeout = q.timeout.unwrap_or(DEFAULT_TIMEOUT);

        let dispatch = self.dispatch(q, engine);
        let (data, record_count) = match tokio::time::timeout(timeout, dispatch).await {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(EngineError::DeadlineExceeded),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let mut engine_results = HashMap::new();
        engine_results.insert(
            engine.as_str().to_string(),
            EngineResultMeta {
                status: QueryStatus::Success,
                record_count,
                execution_time_ms: elapsed_ms,
                data_source: q.query.clone(),
            },
        );

        Ok(UnifiedResult {
            query_id: q.id.clone(),
            query_type: engine_to_query_type(engine),
            status: QueryStatus::Success,
            data,
            correlations: None,
            execution_time_ms: elapsed_ms,
            cached: false,
            metadata: ResultMetadata {
                engine_results,
                total_records: record_count,
                data_sources: vec![engine.as_str().to_string()],
            },
        })
    }

    async fn dispatch(&self, q: &UnifiedQuery, engine: UqlEngine) -> Result<(Value, usize)> {
        match engine {
            UqlEngine::Metrics => {
                let resp = if let (Some(start), Some(end)) = (q.start_time, q.end_time) {
                    self.metrics
                        .execute_range_query(MetricsRangeRequest {
                            query: q.query.clone(),
                            start,
                            end,
                            step: StdDuration::from_secs(60),
                            tenant_id: q.tenant_id.clone(),
                        })
                        .await?
                } else {
                    self.metrics
                        .execute_query(MetricsQueryRequest {
                            query: q.query.clone(),
                            tenant_id: q.tenant_id.clone(),
                            timeout: q.timeout,
                        })
                        .await?
                };
                let count = match &resp.data {
                    crate::adapters::MetricsData::Vector(v) => v.len(),
                    crate::adapters::MetricsData::Matrix(m) => m.len(),
                };
                Ok((serde_json::to_value(&resp.data)?, count))
            }
            UqlEngine::Logs => {
                let resp = self
                    .logs
                    .execute_query(LogsQueryRequest {
                        query: q.query.clone(),
                        start: q.start_time,
                        end: q.end_time,
                        limit: Some(self.default_query_limit),
                        tenant_id: q.tenant_id.clone(),
                    })
                    .await?;
                let count = resp.logs.len();
                Ok((serde_json::to_value(resp.logs)?, count))
            }
            UqlEngine::Traces => {
                let service = q.query.split(':').nth(1).unwrap_or(&q.query).to_string();
                let resp = self
                    .traces
                    .search_traces(TracesSearchRequest {
                        service,
                        operation: None,
                        tags: HashMap::new(),
                        start: q.start_time,
                        end: q.end_time,
                        limit: Some(self.default_query_limit),
                        tenant_id: q.tenant_id.clone(),
                    })
                    .await?;
                let count = resp.traces.len();
                Ok((serde_json::to_value(resp.traces)?, count))
            }
            UqlEngine::Correlation => {
                let result = self.execute_correlation(q).await?;
                Ok((result.data, result.metadata.total_records))
            }
        }
    }

    /// Splits the raw query on ` AND `, routes each fragment independently,
    /// launches concurrent sub-queries, and merges by engine bucket (spec
    /// §4.6 step 5 "Parallel").
    async fn execute_parallel(&self, q: &UnifiedQuery, _primary: UqlEngine) -> Result<UnifiedResult> {
        let started = std::time::Instant::now();
        let fragments: Vec<String> = q
            .query
            .split(" AND ")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let fragments = if fragments.len() < 2 { vec![q.query.clone()] } else { fragments };

        let mut join_set = JoinSet::new();
        for (idx, fragment) in fragments.iter().cloned().enumerate() {
            let engine_decision = router::classify_query(&fragment, None)?;
            let routed = engine_decision.routed_type;
            let mut sub = q.clone();
            sub.id = format!("{}-sub{idx}", q.id);
            sub.query = fragment;
            sub.query_type = uql_engine_to_query_type(routed);

            let metrics = self.metrics.clone();
            let logs = self.logs.clone();
            let traces = self.traces.clone();
            let correlation = self.correlation.clone();

            join_set.spawn(async move {
                let sub_engine = UnifiedQueryEngineSubDispatcher { metrics, logs, traces, correlation };
                let out = sub_engine.dispatch(&sub, routed).await;
                (routed, out)
            });
        }

        let mut succeeded: Vec<(UqlEngine, Value, usize)> = Vec::new();
        let mut failures: Vec<(String, EngineError)> = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((engine, Ok((data, count)))) => succeeded.push((engine, data, count)),
                Ok((engine, Err(e))) => failures.push((engine.as_str().to_string(), e)),
                Err(join_err) => error!(error = %join_err, "sub-query task panicked"),
            }
        }

        if succeeded.is_empty() {
            if let Some((_, e)) = failures.into_iter().next() {
                return Err(e);
            }
            return Err(EngineError::BackendError("all sub-queries failed".into()));
        }

        let merged = merge_sub_results(&succeeded);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let mut engine_results = HashMap::new();
        let mut data_sources = Vec::new();
        let mut total_records = 0;
        for (engine, _, count) in &succeeded {
            total_records += count;
            let name = engine.as_str().to_string();
            if !data_sources.contains(&name) {
                data_sources.push(name.clone());
            }
            engine_results.insert(
                name,
                EngineResultMeta {
                    status: QueryStatus::Success,
                    record_count: *count,
                    execution_time_ms: elapsed_ms,
                    data_source: q.query.clone(),
                },
            );
        }
        for (engine, _) in &failures {
            engine_results.insert(
                engine.clone(),
                EngineResultMeta {
                    status: QueryStatus::Error,
                    record_count: 0,
                    execution_time_ms: elapsed_ms,
                    data_source: q.query.clone(),
                },
            );
        }

        let status = if failures.is_empty() { QueryStatus::Success } else { QueryStatus::PartialSuccess };

        Ok(UnifiedResult {
            query_id: q.id.clone(),
            query_type: q.query_type.unwrap_or(QueryType::Logs),
            status,
            data: merged,
            correlations: None,
            execution_time_ms: elapsed_ms,
            cached: false,
            metadata: ResultMetadata { engine_results, total_records, data_sources },
        })
    }

    fn assemble_correlation_result(
        &self,
        q: &UnifiedQuery,
        correlation_result: CorrelationResult,
        elapsed_ms: u64,
    ) -> UnifiedResult {
        let record_count = correlation_result.causes.len();
        let mut engine_results = HashMap::new();
        engine_results.insert(
            "correlation".to_string(),
            EngineResultMeta {
                status: QueryStatus::Success,
                record_count,
                execution_time_ms: elapsed_ms,
                data_source: q.query.clone(),
            },
        );

        let data = serde_json::to_value(&correlation_result).unwrap_or(Value::Null);

        UnifiedResult {
            query_id: q.id.clone(),
            query_type: QueryType::Correlation,
            status: QueryStatus::Success,
            data,
            correlations: Some(correlation_result),
            execution_time_ms: elapsed_ms,
            cached: false,
            metadata: ResultMetadata { engine_results, total_records: record_count, data_sources: vec!["correlation".into()] },
        }
    }

    /// `getQueryMetadata()`: the static capability matrix (spec §4.6).
    pub fn get_query_metadata(&self) -> QueryMetadataCapabilities {
        QueryMetadataCapabilities {
            supported_engines: vec!["metrics".into(), "logs".into(), "traces".into(), "correlation".into(), "uql".into()],
            query_capabilities: vec![
                "select".into(),
                "aggregation".into(),
                "correlation".into(),
                "join".into(),
                "parallel_fan_out".into(),
            ],
            cache_capabilities: vec!["ttl".into(), "pattern_invalidation".into(), "bypass".into()],
        }
    }

    /// `healthCheck()`: probes each adapter independently (spec §4.6).
    pub async fn health_check(&self) -> HealthReport {
        let mut engine_health = HashMap::new();
        engine_health.insert("metrics".to_string(), probe_health(self.metrics.health_check().await));
        engine_health.insert("logs".to_string(), probe_health(self.logs.health_check().await));
        engine_health.insert("traces".to_string(), probe_health(self.traces.health_check().await));

        let any_unhealthy = engine_health.values().any(|h| *h == EngineHealth::Unhealthy);
        let any_not_configured = engine_health.values().any(|h| *h == EngineHealth::NotConfigured);
        let overall_health = if any_unhealthy {
            OverallHealth::Unhealthy
        } else if any_not_configured {
            OverallHealth::Partial
        } else {
            OverallHealth::Healthy
        };

        info!(?overall_health, "health check completed");

        HealthReport { overall_health, engine_health, last_checked: Utc::now() }
    }
}

fn probe_health(result: Result<()>) -> EngineHealth {
    match result {
        Ok(()) => EngineHealth::Healthy,
        Err(EngineError::InvalidQuery(_)) => EngineHealth::NotConfigured,
        Err(_) => EngineHealth::Unhealthy,
    }
}

/// A minimal adapter bundle usable from a spawned sub-query task without
/// cloning the whole engine (avoids requiring `UnifiedQueryEngine: Clone`
/// just to fan work out across tasks).
struct UnifiedQueryEngineSubDispatcher {
    metrics: Arc<dyn MetricsAdapter>,
    logs: Arc<dyn LogsAdapter>,
    traces: Arc<dyn TracesAdapter>,
    correlation: Arc<CorrelationEngine>,
}

impl UnifiedQueryEngineSubDispatcher {
    async fn dispatch(&self, q: &UnifiedQuery, engine: UqlEngine) -> Result<(Value, usize)> {
        match engine {
            UqlEngine::Metrics => {
                let resp = if let (Some(start), Some(end)) = (q.start_time, q.end_time) {
                    self.metrics
                        .execute_range_query(MetricsRangeRequest {
                            query: q.query.clone(),
                            start,
                            end,
                            step: StdDuration::from_secs(60),
                            tenant_id: q.tenant_id.clone(),
                        })
                        .await?
                } else {
                    self.metrics
                        .execute_query(MetricsQueryRequest {
                            query: q.query.clone(),
                            tenant_id: q.tenant_id.clone(),
                            timeout: q.timeout,
                        })
                        .await?
                };
                let count = match &resp.data {
                    crate::adapters::MetricsData::Vector(v) => v.len(),
                    crate::adapters::MetricsData::Matrix(m) => m.len(),
                };
                Ok((serde_json::to_value(&resp.data)?, count))
            }
            UqlEngine::Logs => {
                let resp = self
                    .logs
                    .execute_query(LogsQueryRequest {
                        query: q.query.clone(),
                        start: q.start_time,
                        end: q.end_time,
                        limit: None,
                        tenant_id: q.tenant_id.clone(),
                    })
                    .await?;
                let count = resp.logs.len();
                Ok((serde_json::to_value(resp.logs)?, count))
            }
            UqlEngine::Traces => {
                let service = q.query.split(':').nth(1).unwrap_or(&q.query).to_string();
                let resp = self
                    .traces
                    .search_traces(TracesSearchRequest {
                        service,
                        operation: None,
                        tags: HashMap::new(),
                        start: q.start_time,
                        end: q.end_time,
                        limit: None,
                        tenant_id: q.tenant_id.clone(),
                    })
                    .await?;
                let count = resp.traces.len();
                Ok((serde_json::to_value(resp.traces)?, count))
            }
            UqlEngine::Correlation => {
                let start = q.start_time.unwrap_or_else(Utc::now);
                let end = q.end_time.unwrap_or_else(Utc::now);
                let range = TimeRange::new(start, end)?;
                let result = self.correlation.correlate(range).await?;
                let count = result.causes.len();
                Ok((serde_json::to_value(&result)?, count))
            }
        }
    }
}

/// Merges sub-query results by engine bucket: metrics data is
/// concatenated as-is, logs/traces are flattened into one sequence, and
/// (per spec, handled at the UQE-level correlation path rather than here)
/// correlation causes would be concatenated — this helper covers the
/// metrics/logs/traces fan-out case used by `execute_parallel`.
fn merge_sub_results(succeeded: &[(UqlEngine, Value, usize)]) -> Value {
    let mut metrics_bucket = Vec::new();
    let mut flattened = Vec::new();
    let mut correlation_causes: Vec<Value> = Vec::new();

    for (engine, data, _) in succeeded {
        match engine {
            UqlEngine::Metrics => metrics_bucket.push(data.clone()),
            UqlEngine::Logs | UqlEngine::Traces => {
                if let Value::Array(items) = data {
                    flattened.extend(items.clone());
                } else {
                    flattened.push(data.clone());
                }
            }
            UqlEngine::Correlation => {
                if let Some(causes) = data.get("causes").and_then(|c| c.as_array()) {
                    correlation_causes.extend(causes.clone());
                }
            }
        }
    }

    let mut out = serde_json::Map::new();
    if !metrics_bucket.is_empty() {
        out.insert("metrics".to_string(), Value::Array(metrics_bucket));
    }
    if !flattened.is_empty() {
        out.insert("records".to_string(), Value::Array(flattened));
    }
    if !correlation_causes.is_empty() {
        out.insert("causes".to_string(), Value::Array(correlation_causes));
    }
    Value::Object(out)
}

fn engine_to_query_type(engine: UqlEngine) -> QueryType {
    match engine {
        UqlEngine::Metrics => QueryType::Metrics,
        UqlEngine::Logs => QueryType::Logs,
        UqlEngine::Traces => QueryType::Traces,
        UqlEngine::Correlation => QueryType::Correlation,
    }
}

fn query_type_to_uql_engine(t: QueryType) -> Option<UqlEngine> {
    match t {
        QueryType::Metrics => Some(UqlEngine::Metrics),
        QueryType::Logs => Some(UqlEngine::Logs),
        QueryType::Traces => Some(UqlEngine::Traces),
        QueryType::Correlation => Some(UqlEngine::Correlation),
        QueryType::Uql => None,
    }
}

fn uql_engine_to_query_type(e: UqlEngine) -> Option<QueryType> {
    Some(engine_to_query_type(e))
}

fn uql_query_type_for_engine(engine: &str) -> Option<QueryType> {
    match engine {
        "metrics" => Some(QueryType::Metrics),
        "logs" => Some(QueryType::Logs),
        "traces" => Some(QueryType::Traces),
        "correlation" => Some(QueryType::Correlation),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::cache::InMemoryCache;
    use crate::adapters::mock::{InMemoryLogsAdapter, InMemoryMetricsAdapter, InMemoryTracesAdapter};
    use crate::kpi::InMemoryKpiRegistry;
    use crate::model::correlation::EngineConfig;
    use uuid::Uuid;

    fn engine() -> UnifiedQueryEngine {
        let metrics: Arc<dyn MetricsAdapter> = Arc::new(InMemoryMetricsAdapter::new());
        let logs: Arc<dyn LogsAdapter> = Arc::new(InMemoryLogsAdapter::new());
        let traces: Arc<dyn TracesAdapter> = Arc::new(InMemoryTracesAdapter::new());
        let cache: Arc<dyn Cache> = Arc::new(InMemoryCache::new());
        let registry = Arc::new(InMemoryKpiRegistry::new(vec![]));
        let ce = Arc::new(CorrelationEngine::new(metrics.clone(), registry, EngineConfig::default()));
        UnifiedQueryEngine::new(metrics, logs, traces, cache, ce)
    }

    fn query(raw: &str) -> UnifiedQuery {
        UnifiedQuery::new(Uuid::new_v4().to_string(), raw)
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let engine = engine();
        let err = engine.execute_query(&query("   ")).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn single_engine_logs_query_succeeds() {
        let engine = engine();
        let result = engine.execute_query(&query("level:error host:api-1")).await.unwrap();
        assert_eq!(result.query_type, QueryType::Logs);
        assert!(result.metadata.engine_results.contains_key("logs"));
    }

    #[tokio::test]
    async fn cache_hit_marks_result_cached_and_is_idempotent() {
        let engine = engine();
        let mut q = query("level:error host:api-1");
        q.cache_options = Some(CacheOptions { enabled: true, ttl: None, bypass: false });

        let first = engine.execute_query(&q).await.unwrap();
        assert!(!first.cached);

        let second = engine.execute_query(&q).await.unwrap();
        assert!(second.cached);
        assert_eq!(first.query_type, second.query_type);
    }

    #[tokio::test]
    async fn parallel_fan_out_reports_all_succeeded_engines() {
        let engine = engine();
        let result = engine
            .execute_query(&query("service:checkout operation:charge AND level:error host:api-1"))
            .await
            .unwrap();
        assert!(result.metadata.engine_results.contains_key("traces"));
        assert!(result.metadata.engine_results.contains_key("logs"));
    }

    #[tokio::test]
    async fn uql_select_query_compiles_and_dispatches_to_logs() {
        let engine = engine();
        let result = engine
            .execute_query(&query("SELECT service, level FROM logs:error WHERE level='error'"))
            .await
            .unwrap();
        assert_eq!(result.query_type, QueryType::Logs);
    }

    #[tokio::test]
    async fn invalidate_cache_empty_pattern_is_noop() {
        let engine = engine();
        engine.invalidate_cache(String::new());
    }

    #[tokio::test]
    async fn invalidate_cache_sweeps_matching_pattern_index_and_its_members() {
        let metrics: Arc<dyn MetricsAdapter> = Arc::new(InMemoryMetricsAdapter::new());
        let logs: Arc<dyn LogsAdapter> = Arc::new(InMemoryLogsAdapter::new());
        let traces: Arc<dyn TracesAdapter> = Arc::new(InMemoryTracesAdapter::new());
        let cache: Arc<dyn Cache> = Arc::new(InMemoryCache::new());
        let registry = Arc::new(InMemoryKpiRegistry::new(vec![]));
        let ce = Arc::new(CorrelationEngine::new(metrics.clone(), registry, EngineConfig::default()));
        let engine = UnifiedQueryEngine::new(metrics, logs, traces, cache.clone(), ce);

        let mut q1 = query("level:error host:api-1");
        q1.cache_options = Some(CacheOptions { enabled: true, ttl: None, bypass: false });
        let mut q2 = query("level:error host:api-2");
        q2.cache_options = Some(CacheOptions { enabled: true, ttl: None, bypass: false });

        engine.execute_query(&q1).await.unwrap();
        engine.execute_query(&q2).await.unwrap();

        let k1 = cache_key(&q1);
        let k2 = cache_key(&q2);
        assert!(cache.get(&k1).await.unwrap().is_some());
        assert!(cache.get(&k2).await.unwrap().is_some());

        engine.invalidate_cache("logs:".to_string());
        for _ in 0..100 {
            tokio::task::yield_now().await;
        }

        assert!(cache.get(&k1).await.unwrap().is_none());
        assert!(cache.get(&k2).await.unwrap().is_none());
        assert!(cache
            .find_pattern_index_sets("pattern_index:query_cache:logs:*")
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn cache_key_is_stable_under_parameter_order() {
        let mut q1 = query("x");
        let mut params1 = HashMap::new();
        params1.insert("b".to_string(), "2".to_string());
        params1.insert("a".to_string(), "1".to_string());
        q1.parameters = Some(params1);

        let mut q2 = query("x");
        q2.id = q1.id.clone();
        let mut params2 = HashMap::new();
        params2.insert("a".to_string(), "1".to_string());
        params2.insert("b".to_string(), "2".to_string());
        q2.parameters = Some(params2);

        assert_eq!(cache_key(&q1), cache_key(&q2));
    }

    #[test]
    fn cache_key_differs_on_tenant() {
        let mut q1 = query("x");
        q1.tenant_id = Some("tenant-a".into());
        let mut q2 = q1.clone();
        q2.tenant_id = Some("tenant-b".into());
        assert_ne!(cache_key(&q1), cache_key(&q2));
    }
}
