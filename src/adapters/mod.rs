//! External backend ports. These are the interfaces `spec.md` §6 treats as
//! out-of-scope collaborators: the engines in this crate depend only on
//! these traits, never on a concrete backend client, so the real
//! metrics/logs/traces stores and the real cache (Redis) can be swapped
//! in without touching the core.

pub mod cache;
pub mod mock;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A faithful port of the Prometheus-shape response envelope: a tagged
/// sum type rather than a loosely typed tree of maps, per `DESIGN.md`
/// "dynamic/untyped envelopes -> tagged variants".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MetricsData {
    Vector(Vec<VectorSample>),
    Matrix(Vec<MatrixSeries>),
}

impl MetricsData {
    pub fn is_empty(&self) -> bool {
        match self {
            MetricsData::Vector(v) => v.is_empty(),
            MetricsData::Matrix(m) => m.is_empty(),
        }
    }

    /// The last sample value across the first series, as a scalar. Used
    /// by the correlation engine to reduce a probe result to one number
    /// per ring (spec §4.7 step 4: "when a range is returned, use the
    /// last point of the first series").
    pub fn last_scalar(&self) -> Option<f64> {
        match self {
            MetricsData::Vector(v) => v.first().and_then(|s| s.value.parse().ok()),
            MetricsData::Matrix(m) => m
                .first()
                .and_then(|series| series.values.last())
                .and_then(|(_, v)| v.parse().ok()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorSample {
    pub metric: HashMap<String, String>,
    pub timestamp: f64,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixSeries {
    pub metric: HashMap<String, String>,
    pub values: Vec<(f64, String)>,
}

#[derive(Debug, Clone)]
pub struct MetricsQueryRequest {
    pub query: String,
    pub tenant_id: Option<String>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct MetricsRangeRequest {
    pub query: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub step: Duration,
    pub tenant_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MetricsQueryResponse {
    pub status: String,
    pub data: MetricsData,
    pub series_count: usize,
    pub data_point_count: usize,
}

#[async_trait]
pub trait MetricsAdapter: Send + Sync {
    async fn execute_query(&self, req: MetricsQueryRequest) -> Result<MetricsQueryResponse>;
    async fn execute_range_query(&self, req: MetricsRangeRequest) -> Result<MetricsQueryResponse>;
    async fn health_check(&self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub fields: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct LogsQueryRequest {
    pub query: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<u64>,
    pub tenant_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LogsQueryResponse {
    pub logs: Vec<LogEntry>,
}

#[async_trait]
pub trait LogsAdapter: Send + Sync {
    async fn execute_query(&self, req: LogsQueryRequest) -> Result<LogsQueryResponse>;
    async fn health_check(&self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct Span {
    pub span_id: String,
    pub operation: String,
    pub duration_ms: f64,
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct Trace {
    pub trace_id: String,
    pub spans: Vec<Span>,
}

#[derive(Debug, Clone)]
pub struct TracesSearchRequest {
    pub service: String,
    pub operation: Option<String>,
    pub tags: HashMap<String, String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<u64>,
    pub tenant_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TracesSearchResponse {
    pub traces: Vec<Trace>,
    pub processes: HashMap<String, String>,
}

#[async_trait]
pub trait TracesAdapter: Send + Sync {
    async fn get_operations(&self, service: &str, tenant_id: Option<&str>) -> Result<Vec<String>>;
    async fn search_traces(&self, req: TracesSearchRequest) -> Result<TracesSearchResponse>;
    async fn health_check(&self) -> Result<()>;
}

/// Key/value cache with TTL plus the pattern-index primitives used to
/// implement pattern-based invalidation (spec §3 "pattern-index sets").
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn delete_multiple(&self, keys: &[String]) -> Result<()>;
    async fn add_to_pattern_index(&self, set_key: &str, member: &str) -> Result<()>;
    async fn get_pattern_index_keys(&self, set_key: &str) -> Result<Vec<String>>;
    async fn delete_pattern_index(&self, set_key: &str) -> Result<()>;

    /// Names of existing pattern-index sets whose key matches `glob` (a
    /// `*`-wildcard pattern, the same shape Redis `SCAN ... MATCH` takes).
    /// Invalidation computes candidate patterns before it knows which sets
    /// actually exist, so this is how it resolves "target pattern" down to
    /// "the set keys I actually need to sweep".
    async fn find_pattern_index_sets(&self, glob: &str) -> Result<Vec<String>>;
}
