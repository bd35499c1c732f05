//! Translator registry: four sibling code generators that turn a UQL AST
//! into a backend-native `TranslatedQuery`. The registry picks the first
//! translator whose `can_translate` predicate matches.

pub mod correlation;
pub mod logs;
pub mod metrics;
pub mod traces;

use crate::error::{EngineError, Result};
use crate::model::ast::UqlQuery;
use crate::model::query::TranslatedQuery;

pub trait Translator: Send + Sync {
    fn name(&self) -> &'static str;
    fn supported_engines(&self) -> &'static [&'static str];
    fn can_translate(&self, ast: &UqlQuery) -> bool;
    fn translate(&self, ast: &UqlQuery) -> Result<TranslatedQuery>;
}

pub struct TranslatorRegistry {
    translators: Vec<Box<dyn Translator>>,
}

impl Default for TranslatorRegistry {
    fn default() -> Self {
        Self {
            translators: vec![
                Box::new(metrics::MetricsTranslator),
                Box::new(logs::LogsTranslator),
                Box::new(traces::TracesTranslator),
                Box::new(correlation::CorrelationTranslator),
            ],
        }
    }
}

impl TranslatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn translate(&self, ast: &UqlQuery) -> Result<TranslatedQuery> {
        for t in &self.translators {
            if t.can_translate(ast) {
                return t.translate(ast);
            }
        }
        Err(EngineError::TranslationError(
            "no translator matches this query".into(),
        ))
    }
}
