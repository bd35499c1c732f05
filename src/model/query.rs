//! Client-facing request/response model for the unified query engine.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ast::OrderDirection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Metrics,
    Logs,
    Traces,
    Uql,
    Correlation,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Metrics => "metrics",
            QueryType::Logs => "logs",
            QueryType::Traces => "traces",
            QueryType::Uql => "uql",
            QueryType::Correlation => "correlation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Success,
    PartialSuccess,
    Error,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheOptions {
    pub enabled: bool,
    pub ttl: Option<std::time::Duration>,
    pub bypass: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorrelationOptions {
    pub min_correlation: Option<f64>,
    pub min_anomaly_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedQuery {
    pub id: String,
    #[serde(rename = "type")]
    pub query_type: Option<QueryType>,
    pub query: String,
    pub tenant_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub parameters: Option<HashMap<String, String>>,
    pub timeout: Option<std::time::Duration>,
    pub cache_options: Option<CacheOptions>,
    pub correlation_options: Option<CorrelationOptions>,
}

impl UnifiedQuery {
    pub fn new(id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            query_type: None,
            query: query.into(),
            tenant_id: None,
            start_time: None,
            end_time: None,
            parameters: None,
            timeout: None,
            cache_options: None,
            correlation_options: None,
        }
    }
}

/// A compiled query ready for dispatch to a backend adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslatedQuery {
    pub engine: String,
    pub query: String,
    pub parameters: Option<HashMap<String, String>>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub time_window: Option<chrono::Duration>,
    pub limit: Option<u64>,
    pub order_by: Option<Vec<(String, OrderDirection)>>,
    pub group_by: Option<Vec<String>>,
    pub aggregation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineResultMeta {
    pub status: QueryStatus,
    pub record_count: usize,
    pub execution_time_ms: u64,
    pub data_source: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub engine_results: HashMap<String, EngineResultMeta>,
    pub total_records: usize,
    pub data_sources: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedResult {
    pub query_id: String,
    #[serde(rename = "type")]
    pub query_type: QueryType,
    pub status: QueryStatus,
    pub data: Value,
    pub correlations: Option<super::correlation::CorrelationResult>,
    pub execution_time_ms: u64,
    pub cached: bool,
    pub metadata: ResultMetadata,
}
