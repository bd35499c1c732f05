//! Data model shared by the UQL pipeline and the unified query engine.

pub mod ast;
pub mod correlation;
pub mod plan;
pub mod query;

pub use ast::*;
pub use correlation::*;
pub use plan::*;
pub use query::*;
