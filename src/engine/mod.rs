//! The two orchestrators built on top of the UQL pipeline, the adapter
//! ports, and the stats kernel: the unified query engine and the
//! correlation engine.

pub mod ce;
pub mod uqe;

pub use ce::CorrelationEngine;
pub use uqe::UnifiedQueryEngine;
