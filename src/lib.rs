//! Unified observability query and correlation engine.
//!
//! Three tightly-coupled subsystems:
//!
//! - **Unified Query Engine** (`engine::uqe`) — routes a client query
//!   across metrics/logs/traces backends, compiles UQL when needed,
//!   caches results with pattern-based invalidation, and merges
//!   parallel sub-query fan-out.
//! - **UQL pipeline** (`uql`) — a recursive-descent parser, a
//!   rule-based optimizer, and four backend translators that compile a
//!   SQL-like query language and a correlation mini-language into
//!   backend-native query strings.
//! - **Correlation Engine** (`engine::ce`) — a ring-bucketed statistical
//!   analyzer that discovers candidate causal KPIs for an impact KPI and
//!   scores them with the `stats` kernel.
//!
//! The engines depend only on the adapter traits in `adapters` and the
//! KPI registry trait in `kpi`; no concrete backend client or HTTP
//! surface lives in this crate (see `DESIGN.md`).
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use unified_query_engine::adapters::cache::InMemoryCache;
//! use unified_query_engine::adapters::mock::{
//!     InMemoryLogsAdapter, InMemoryMetricsAdapter, InMemoryTracesAdapter,
//! };
//! use unified_query_engine::engine::{CorrelationEngine, UnifiedQueryEngine};
//! use unified_query_engine::kpi::InMemoryKpiRegistry;
//! use unified_query_engine::model::correlation::EngineConfig;
//! use unified_query_engine::model::query::UnifiedQuery;
//!
//! # async fn run() -> unified_query_engine::error::Result<()> {
//! let metrics = Arc::new(InMemoryMetricsAdapter::new());
//! let logs = Arc::new(InMemoryLogsAdapter::new());
//! let traces = Arc::new(InMemoryTracesAdapter::new());
//! let cache = Arc::new(InMemoryCache::new());
//! let registry = Arc::new(InMemoryKpiRegistry::new(vec![]));
//! let ce = Arc::new(CorrelationEngine::new(metrics.clone(), registry, EngineConfig::default()));
//! let uqe = UnifiedQueryEngine::new(metrics, logs, traces, cache, ce);
//!
//! let query = UnifiedQuery::new("req-1", "level:error host:api-1");
//! let result = uqe.execute_query(&query).await?;
//! assert_eq!(result.query_id, "req-1");
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod config;
pub mod engine;
pub mod error;
pub mod kpi;
pub mod model;
pub mod stats;
pub mod uql;

pub use engine::{CorrelationEngine, UnifiedQueryEngine};
pub use error::{EngineError, Result};
pub use kpi::{KPIDefinition, KpiRegistry};
pub use model::correlation::{BucketConfig, CorrelationResult, EngineConfig, TimeRange};
pub use model::query::{UnifiedQuery, UnifiedResult};
pub use uql::{parse, Optimizer, TranslatorRegistry};

/// Crate version, re-exported for diagnostics and `getQueryMetadata`-style
/// capability reporting.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_not_empty() {
        assert!(!VERSION.is_empty());
    }
}
