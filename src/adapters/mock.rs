//! Deterministic in-memory fakes for the adapter traits, used by this
//! crate's own tests and importable by downstream integration suites that
//! need to script backend responses without a live cluster.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

use super::{
    LogEntry, LogsAdapter, LogsQueryRequest, LogsQueryResponse, MatrixSeries, MetricsAdapter,
    MetricsData, MetricsQueryRequest, MetricsQueryResponse, MetricsRangeRequest, Span, Trace,
    TracesAdapter, TracesSearchRequest, TracesSearchResponse, VectorSample,
};

/// Scripted metrics backend: queries are matched verbatim against a
/// pre-loaded table, falling back to an empty vector for unknown queries.
/// Range queries additionally support a per-query sequence of responses,
/// consumed one per call, so a test can drive a distinct value for each
/// ring the correlation engine samples.
#[derive(Default)]
pub struct InMemoryMetricsAdapter {
    instant: Mutex<HashMap<String, MetricsQueryResponse>>,
    range: Mutex<HashMap<String, MetricsQueryResponse>>,
    range_sequence: Mutex<HashMap<String, VecDeque<MetricsQueryResponse>>>,
}

impl InMemoryMetricsAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instant_result(self, query: impl Into<String>, response: MetricsQueryResponse) -> Self {
        self.instant.lock().unwrap().insert(query.into(), response);
        self
    }

    pub fn with_range_result(self, query: impl Into<String>, response: MetricsQueryResponse) -> Self {
        self.range.lock().unwrap().insert(query.into(), response);
        self
    }

    /// Queues a sequence of range-query responses for `query`, popped in
    /// order on each successive call; once exhausted, falls back to the
    /// single `with_range_result` entry (if any) or an empty series.
    pub fn with_range_sequence(self, query: impl Into<String>, responses: Vec<MetricsQueryResponse>) -> Self {
        self.range_sequence.lock().unwrap().insert(query.into(), responses.into());
        self
    }

    /// Convenience constructor for a single scalar sample, the common case
    /// in correlation-engine probe tests.
    pub fn scalar(query: impl Into<String>, value: f64) -> (String, MetricsQueryResponse) {
        let query = query.into();
        let response = MetricsQueryResponse {
            status: "success".into(),
            data: MetricsData::Vector(vec![VectorSample {
                metric: HashMap::new(),
                timestamp: 0.0,
                value: value.to_string(),
            }]),
            series_count: 1,
            data_point_count: 1,
        };
        (query, response)
    }

    /// Convenience constructor for a range series, used when a test wants
    /// to drive the "last point of the first series" reduction rule.
    pub fn series(query: impl Into<String>, values: Vec<(f64, f64)>) -> (String, MetricsQueryResponse) {
        let query = query.into();
        let points = values.len();
        let response = MetricsQueryResponse {
            status: "success".into(),
            data: MetricsData::Matrix(vec![MatrixSeries {
                metric: HashMap::new(),
                values: values.into_iter().map(|(t, v)| (t, v.to_string())).collect(),
            }]),
            series_count: 1,
            data_point_count: points,
        };
        (query, response)
    }
}

#[async_trait]
impl MetricsAdapter for InMemoryMetricsAdapter {
    async fn execute_query(&self, req: MetricsQueryRequest) -> Result<MetricsQueryResponse> {
        Ok(self
            .instant
            .lock()
            .unwrap()
            .get(&req.query)
            .cloned()
            .unwrap_or(MetricsQueryResponse {
                status: "success".into(),
                data: MetricsData::Vector(Vec::new()),
                series_count: 0,
                data_point_count: 0,
            }))
    }

    async fn execute_range_query(&self, req: MetricsRangeRequest) -> Result<MetricsQueryResponse> {
        if let Some(queue) = self.range_sequence.lock().unwrap().get_mut(&req.query) {
            if let Some(next) = queue.pop_front() {
                return Ok(next);
            }
        }
        Ok(self
            .range
            .lock()
            .unwrap()
            .get(&req.query)
            .cloned()
            .unwrap_or(MetricsQueryResponse {
                status: "success".into(),
                data: MetricsData::Matrix(Vec::new()),
                series_count: 0,
                data_point_count: 0,
            }))
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Scripted logs backend returning a fixed log set regardless of query
/// text, optionally filtered by the request's time window.
#[derive(Default)]
pub struct InMemoryLogsAdapter {
    logs: Mutex<Vec<LogEntry>>,
}

impl InMemoryLogsAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_logs(self, logs: Vec<LogEntry>) -> Self {
        *self.logs.lock().unwrap() = logs;
        self
    }
}

#[async_trait]
impl LogsAdapter for InMemoryLogsAdapter {
    async fn execute_query(&self, req: LogsQueryRequest) -> Result<LogsQueryResponse> {
        let logs = self.logs.lock().unwrap();
        let filtered: Vec<LogEntry> = logs
            .iter()
            .filter(|l| matches_window(l.timestamp, req.start, req.end))
            .cloned()
            .collect();
        Ok(LogsQueryResponse { logs: filtered })
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

fn matches_window(ts: DateTime<Utc>, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> bool {
    if let Some(s) = start {
        if ts < s {
            return false;
        }
    }
    if let Some(e) = end {
        if ts > e {
            return false;
        }
    }
    true
}

/// Scripted traces backend returning a fixed trace set for any search.
#[derive(Default)]
pub struct InMemoryTracesAdapter {
    traces: Mutex<Vec<Trace>>,
    operations: Mutex<HashMap<String, Vec<String>>>,
}

impl InMemoryTracesAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_traces(self, traces: Vec<Trace>) -> Self {
        *self.traces.lock().unwrap() = traces;
        self
    }

    pub fn with_operations(self, service: impl Into<String>, ops: Vec<String>) -> Self {
        self.operations.lock().unwrap().insert(service.into(), ops);
        self
    }
}

#[async_trait]
impl TracesAdapter for InMemoryTracesAdapter {
    async fn get_operations(&self, service: &str, _tenant_id: Option<&str>) -> Result<Vec<String>> {
        Ok(self.operations.lock().unwrap().get(service).cloned().unwrap_or_default())
    }

    async fn search_traces(&self, _req: TracesSearchRequest) -> Result<TracesSearchResponse> {
        Ok(TracesSearchResponse {
            traces: self.traces.lock().unwrap().clone(),
            processes: HashMap::new(),
        })
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn metrics_adapter_returns_scripted_scalar() {
        let (query, response) = InMemoryMetricsAdapter::scalar("up", 1.0);
        let adapter = InMemoryMetricsAdapter::new().with_instant_result(query.clone(), response);
        let out = adapter
            .execute_query(MetricsQueryRequest {
                query,
                tenant_id: None,
                timeout: None,
            })
            .await
            .unwrap();
        assert_eq!(out.data.last_scalar(), Some(1.0));
    }

    #[tokio::test]
    async fn metrics_adapter_unknown_query_returns_empty() {
        let adapter = InMemoryMetricsAdapter::new();
        let out = adapter
            .execute_query(MetricsQueryRequest {
                query: "nonexistent".into(),
                tenant_id: None,
                timeout: None,
            })
            .await
            .unwrap();
        assert!(out.data.is_empty());
    }

    #[tokio::test]
    async fn logs_adapter_filters_by_time_window() {
        use chrono::Duration;
        let now = Utc::now();
        let adapter = InMemoryLogsAdapter::new().with_logs(vec![
            LogEntry { timestamp: now - Duration::hours(2), message: "old".into(), fields: HashMap::new() },
            LogEntry { timestamp: now, message: "recent".into(), fields: HashMap::new() },
        ]);
        let out = adapter
            .execute_query(LogsQueryRequest {
                query: "*".into(),
                start: Some(now - Duration::minutes(5)),
                end: None,
                limit: None,
                tenant_id: None,
            })
            .await
            .unwrap();
        assert_eq!(out.logs.len(), 1);
        assert_eq!(out.logs[0].message, "recent");
    }
}
