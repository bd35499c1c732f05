//! Query plan model produced by the optimizer's `generate_query_plan`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub operation: String,
    pub description: String,
    pub cost: f64,
    pub rows: f64,
    pub data_source: Option<String>,
    pub children: Vec<String>,
    pub properties: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryPlan {
    pub steps: Vec<PlanStep>,
    pub data_sources: Vec<String>,
    pub optimizations_applied: Vec<String>,
    pub estimated_total_cost: f64,
    pub estimated_total_rows: f64,
}
