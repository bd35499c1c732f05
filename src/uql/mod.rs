//! The UQL pipeline: parser, optimizer, translators, and the query router.

pub mod optimizer;
pub mod parser;
pub mod router;
pub mod translate;

pub use optimizer::Optimizer;
pub use parser::parse;
pub use router::{classify_query, RouteDecision};
pub use translate::TranslatorRegistry;
