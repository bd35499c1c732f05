//! Rule-based, no-cost-model AST optimizer.
//!
//! Deep-copies the input AST (ASTs are plain owned data here, so a
//! `.clone()` suffices) and runs a fixed ordered pipeline of passes. Each
//! pass is individually correct, side-effect-free on its input, and a
//! no-op on AST shapes it doesn't apply to. A pass that panics is not
//! caught here (panics indicate a bug, not a recoverable optimizer
//! failure) but a pass returning an error is logged and skipped, per
//! spec §4.4 ("the optimizer never aborts compilation due to an
//! optimization error").

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Duration;
use tracing::warn;

use crate::error::Result;
use crate::model::ast::*;
use crate::model::plan::{PlanStep, QueryPlan};

const CANONICAL_WINDOWS_SECS: &[i64] = &[60, 300, 900, 1800, 3600, 21600, 43200, 86400];

/// Static selectivity ordering used by the logs predicate-pushdown pass.
const LOG_SELECTIVITY_ORDER: &[&str] = &["level", "service", "host", "timestamp"];

#[derive(Debug, Default)]
pub struct OptimizerStats {
    pub query_rewrites: AtomicU64,
    pub predicate_pushdown: AtomicU64,
    pub time_window_opt: AtomicU64,
    pub join_optimizations: AtomicU64,
    pub index_selections: AtomicU64,
    pub cost_based_optimizations: AtomicU64,
    pub query_plan_caching: AtomicU64,
}

impl OptimizerStats {
    pub fn snapshot(&self) -> [(&'static str, u64); 7] {
        [
            ("query_rewrites", self.query_rewrites.load(Ordering::Relaxed)),
            ("predicate_pushdown", self.predicate_pushdown.load(Ordering::Relaxed)),
            ("time_window_opt", self.time_window_opt.load(Ordering::Relaxed)),
            ("join_optimizations", self.join_optimizations.load(Ordering::Relaxed)),
            ("index_selections", self.index_selections.load(Ordering::Relaxed)),
            ("cost_based_optimizations", self.cost_based_optimizations.load(Ordering::Relaxed)),
            ("query_plan_caching", self.query_plan_caching.load(Ordering::Relaxed)),
        ]
    }
}

#[derive(Default)]
pub struct Optimizer {
    pub stats: OptimizerStats,
}

impl Optimizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the fixed ordered pass pipeline and returns the rewritten AST.
    pub fn optimize(&self, ast: &UqlQuery) -> UqlQuery {
        let mut out = ast.clone();

        for pass in [
            Self::pass_constant_folding,
            Self::pass_predicate_pushdown,
            Self::pass_query_rewrite,
            Self::pass_time_window_rounding,
            Self::pass_field_pruning,
            Self::pass_join_optimization,
        ] {
            match pass(self, &out) {
                Ok(rewritten) => out = rewritten,
                Err(e) => warn!(error = %e, "optimizer pass failed, skipping"),
            }
        }

        for hook in [
            Self::hook_index_selection,
            Self::hook_cost_based_optimization,
            Self::hook_query_plan_caching,
            Self::hook_subquery_rewrite,
            Self::hook_materialized_view_check,
        ] {
            hook(self, &out);
        }

        out
    }

    /// Named hook, invoked after the rewrite passes. First-cut
    /// implementation emits only a trace; no index catalog exists yet to
    /// select against.
    fn hook_index_selection(&self, ast: &UqlQuery) {
        tracing::trace!(query = %ast.raw_query(), "index selection hook (no-op)");
    }

    /// Named hook; no cost model exists yet beyond the static unit costs
    /// used by `generate_query_plan`.
    fn hook_cost_based_optimization(&self, ast: &UqlQuery) {
        tracing::trace!(query = %ast.raw_query(), "cost-based optimization hook (no-op)");
    }

    /// Named hook; the plan cache lives in `engine::uqe`, not here — this
    /// hook is the attachment point for an optimizer-level plan cache.
    fn hook_query_plan_caching(&self, ast: &UqlQuery) {
        tracing::trace!(query = %ast.raw_query(), "query plan caching hook (no-op)");
    }

    /// Named hook; the current grammar has no subquery production.
    fn hook_subquery_rewrite(&self, ast: &UqlQuery) {
        tracing::trace!(query = %ast.raw_query(), "subquery rewrite hook (no-op)");
    }

    /// Named hook; no materialized-view catalog exists yet.
    fn hook_materialized_view_check(&self, ast: &UqlQuery) {
        tracing::trace!(query = %ast.raw_query(), "materialized view check hook (no-op)");
    }

    /// Placeholder pass; no constant expressions exist in the current AST
    /// shapes to fold. Kept as a named hook for future work.
    fn pass_constant_folding(&self, ast: &UqlQuery) -> Result<UqlQuery> {
        Ok(ast.clone())
    }

    fn pass_predicate_pushdown(&self, ast: &UqlQuery) -> Result<UqlQuery> {
        let mut out = ast.clone();
        let mut rewrote = false;

        match &mut out {
            UqlQuery::Select(q) if q.data_source.engine == "metrics" => {
                if let Some(cond) = &mut q.where_clause {
                    if regroup_label_selectors(cond) {
                        rewrote = true;
                    }
                }
            }
            UqlQuery::Aggregation(q) if q.data_source.engine == "metrics" => {
                if let Some(cond) = &mut q.where_clause {
                    if regroup_label_selectors(cond) {
                        rewrote = true;
                    }
                }
            }
            UqlQuery::Select(q) if q.data_source.engine == "logs" => {
                if let Some(cond) = &mut q.where_clause {
                    if reorder_by_selectivity(cond) {
                        rewrote = true;
                    }
                }
            }
            _ => {}
        }

        if rewrote {
            self.stats.predicate_pushdown.fetch_add(1, Ordering::Relaxed);
        }
        Ok(out)
    }

    fn pass_query_rewrite(&self, ast: &UqlQuery) -> Result<UqlQuery> {
        let mut out = ast.clone();
        let mut rewrote = false;

        if let UqlQuery::Select(q) = &mut out {
            let before = q.fields.len();
            let mut seen = HashSet::new();
            q.fields.retain(|f| seen.insert((f.name.clone(), f.function.clone())));
            if q.fields.len() != before {
                rewrote = true;
            }
        }

        {
            let env = out.envelope_mut();
            let before = env.order_by.clone();
            env.order_by.sort_by(|a, b| a.0.cmp(&b.0));
            if env.order_by != before {
                rewrote = true;
            }
        }

        if let UqlQuery::Correlation(q) = &mut out {
            if q.operator == CorrelationOperator::Near {
                if let Some(tw) = q.envelope.time_window {
                    if tw < Duration::minutes(5) {
                        q.operator = CorrelationOperator::Within;
                        rewrote = true;
                    }
                }
            }
        }

        if rewrote {
            self.stats.query_rewrites.fetch_add(1, Ordering::Relaxed);
        }
        Ok(out)
    }

    fn pass_time_window_rounding(&self, ast: &UqlQuery) -> Result<UqlQuery> {
        let mut out = ast.clone();
        let mut rewrote = false;

        if let Some(tw) = out.envelope().time_window {
            if let Some(snapped) = snap_to_canonical(tw) {
                if snapped != tw {
                    out.envelope_mut().time_window = Some(snapped);
                    rewrote = true;
                }
            }
        }

        if rewrote {
            self.stats.time_window_opt.fetch_add(1, Ordering::Relaxed);
        }
        Ok(out)
    }

    fn pass_field_pruning(&self, ast: &UqlQuery) -> Result<UqlQuery> {
        let mut out = ast.clone();
        let mut rewrote = false;

        if let UqlQuery::Select(q) = &mut out {
            let mut referenced: HashSet<String> = HashSet::new();
            if let Some(c) = &q.where_clause {
                collect_fields(c, &mut referenced);
            }
            if let Some(c) = &q.having {
                collect_fields(c, &mut referenced);
            }
            referenced.extend(q.group_by.iter().cloned());
            referenced.extend(q.envelope.order_by.iter().map(|(f, _)| f.clone()));

            let before = q.fields.len();
            q.fields.retain(|f| f.name == "*" || f.function.is_some() || referenced.contains(&f.name));
            if q.fields.is_empty() {
                // never prune down to nothing; keep at least the original set
                q.fields = ast
                    .clone()
                    .into_select()
                    .map(|s| s.fields)
                    .unwrap_or_default();
            } else if q.fields.len() != before {
                rewrote = true;
            }
        }

        let _ = rewrote;
        Ok(out)
    }

    fn pass_join_optimization(&self, ast: &UqlQuery) -> Result<UqlQuery> {
        let mut out = ast.clone();
        let mut rewrote = false;

        if let UqlQuery::Join(q) = &mut out {
            if q.join_type != JoinType::Time {
                q.join_type = JoinType::Time;
                rewrote = true;
            }
        }

        if rewrote {
            self.stats.join_optimizations.fetch_add(1, Ordering::Relaxed);
        }
        Ok(out)
    }

    /// Produces a static-cost query plan for the (already optimized) AST.
    pub fn generate_query_plan(&self, ast: &UqlQuery) -> QueryPlan {
        let mut steps = Vec::new();
        let mut data_sources = Vec::new();
        let mut optimizations = Vec::new();
        let mut next_id = 0usize;
        let mut alloc_id = || {
            next_id += 1;
            format!("step{next_id}")
        };

        let base_rows = 10_000f64;

        match ast {
            UqlQuery::Select(q) => {
                data_sources.push(format!("{}:{}", q.data_source.engine, q.data_source.query));
                let scan_id = alloc_id();
                steps.push(PlanStep {
                    id: scan_id.clone(),
                    operation: "scan".into(),
                    description: format!("scan {}", q.data_source.engine),
                    cost: 10.0,
                    rows: base_rows,
                    data_source: Some(q.data_source.engine.clone()),
                    children: vec![],
                    properties: Default::default(),
                });
                let mut last = scan_id;
                if q.where_clause.is_some() {
                    let id = alloc_id();
                    steps.push(PlanStep {
                        id: id.clone(),
                        operation: "filter".into(),
                        description: "apply WHERE".into(),
                        cost: 5.0,
                        rows: base_rows * 0.1,
                        data_source: None,
                        children: vec![last.clone()],
                        properties: Default::default(),
                    });
                    last = id;
                }
                if !q.group_by.is_empty() {
                    let id = alloc_id();
                    steps.push(PlanStep {
                        id: id.clone(),
                        operation: "group_by".into(),
                        description: "apply GROUP BY".into(),
                        cost: 15.0,
                        rows: base_rows * 0.1,
                        data_source: None,
                        children: vec![last.clone()],
                        properties: Default::default(),
                    });
                    last = id;
                }
                let id = alloc_id();
                steps.push(PlanStep {
                    id: id.clone(),
                    operation: "projection".into(),
                    description: "project fields".into(),
                    cost: 2.0,
                    rows: base_rows * 0.1,
                    data_source: None,
                    children: vec![last.clone()],
                    properties: Default::default(),
                });
                last = id;
                if !q.envelope.order_by.is_empty() {
                    let id = alloc_id();
                    steps.push(PlanStep {
                        id: id.clone(),
                        operation: "sort".into(),
                        description: "apply ORDER BY".into(),
                        cost: 20.0,
                        rows: base_rows * 0.1,
                        data_source: None,
                        children: vec![last.clone()],
                        properties: Default::default(),
                    });
                    last = id;
                }
                if let Some(limit) = q.envelope.limit {
                    let id = alloc_id();
                    steps.push(PlanStep {
                        id,
                        operation: "limit".into(),
                        description: format!("LIMIT {limit}"),
                        cost: 1.0,
                        rows: limit as f64,
                        data_source: None,
                        children: vec![last],
                        properties: Default::default(),
                    });
                }
            }
            UqlQuery::Aggregation(q) => {
                data_sources.push(format!("{}:{}", q.data_source.engine, q.data_source.query));
                let scan_id = alloc_id();
                steps.push(PlanStep {
                    id: scan_id.clone(),
                    operation: "scan".into(),
                    description: format!("scan {}", q.data_source.engine),
                    cost: 10.0,
                    rows: base_rows,
                    data_source: Some(q.data_source.engine.clone()),
                    children: vec![],
                    properties: Default::default(),
                });
                let id = alloc_id();
                steps.push(PlanStep {
                    id,
                    operation: "aggregation".into(),
                    description: format!("apply {}", q.function.as_str()),
                    cost: 25.0,
                    rows: base_rows * 0.1,
                    data_source: None,
                    children: vec![scan_id],
                    properties: Default::default(),
                });
            }
            UqlQuery::Correlation(q) => {
                data_sources.push(format!(
                    "{}:{}",
                    q.left_expr.data_source.engine, q.left_expr.data_source.query
                ));
                data_sources.push(format!(
                    "{}:{}",
                    q.right_expr.data_source.engine, q.right_expr.data_source.query
                ));
                let left_id = alloc_id();
                steps.push(PlanStep {
                    id: left_id.clone(),
                    operation: "scan".into(),
                    description: "scan left expression".into(),
                    cost: 10.0,
                    rows: base_rows,
                    data_source: Some(q.left_expr.data_source.engine.clone()),
                    children: vec![],
                    properties: Default::default(),
                });
                let right_id = alloc_id();
                steps.push(PlanStep {
                    id: right_id.clone(),
                    operation: "scan".into(),
                    description: "scan right expression".into(),
                    cost: 10.0,
                    rows: base_rows,
                    data_source: Some(q.right_expr.data_source.engine.clone()),
                    children: vec![],
                    properties: Default::default(),
                });
                let id = alloc_id();
                steps.push(PlanStep {
                    id,
                    operation: "correlation".into(),
                    description: "correlate left and right".into(),
                    cost: 30.0,
                    rows: base_rows * base_rows * 0.05,
                    data_source: None,
                    children: vec![left_id, right_id],
                    properties: Default::default(),
                });
            }
            UqlQuery::Join(q) => {
                data_sources.push(format!("{}:{}", q.left.engine, q.left.query));
                data_sources.push(format!("{}:{}", q.right.engine, q.right.query));
                let left_id = alloc_id();
                steps.push(PlanStep {
                    id: left_id.clone(),
                    operation: "scan".into(),
                    description: "scan left".into(),
                    cost: 10.0,
                    rows: base_rows,
                    data_source: Some(q.left.engine.clone()),
                    children: vec![],
                    properties: Default::default(),
                });
                let right_id = alloc_id();
                steps.push(PlanStep {
                    id: right_id.clone(),
                    operation: "scan".into(),
                    description: "scan right".into(),
                    cost: 10.0,
                    rows: base_rows,
                    data_source: Some(q.right.engine.clone()),
                    children: vec![],
                    properties: Default::default(),
                });
                let id = alloc_id();
                steps.push(PlanStep {
                    id,
                    operation: "join".into(),
                    description: format!("{:?} join", q.join_type),
                    cost: 50.0,
                    rows: base_rows * base_rows * 0.01,
                    data_source: None,
                    children: vec![left_id, right_id],
                    properties: Default::default(),
                });
                optimizations.push("join_optimization".to_string());
            }
        }

        let estimated_total_cost = steps.iter().map(|s| s.cost).sum();
        let estimated_total_rows = steps.last().map(|s| s.rows).unwrap_or(0.0);

        QueryPlan {
            steps,
            data_sources,
            optimizations_applied: optimizations,
            estimated_total_cost,
            estimated_total_rows,
        }
    }

    /// Human-readable explanation of the plan, used for debugging/`EXPLAIN`.
    pub fn explain_query(&self, ast: &UqlQuery) -> String {
        let plan = self.generate_query_plan(ast);
        let mut out = String::new();
        for step in &plan.steps {
            out.push_str(&format!(
                "{}: {} (cost={:.1}, rows={:.0})\n",
                step.id, step.description, step.cost, step.rows
            ));
        }
        out.push_str(&format!(
            "total cost={:.1}, total rows={:.0}\n",
            plan.estimated_total_cost, plan.estimated_total_rows
        ));
        out
    }
}

impl UqlQuery {
    fn into_select(self) -> Option<SelectQuery> {
        match self {
            UqlQuery::Select(q) => Some(q),
            _ => None,
        }
    }
}

fn snap_to_canonical(d: Duration) -> Option<Duration> {
    let secs = d.num_seconds();
    if secs <= 0 {
        return None;
    }
    for &canon in CANONICAL_WINDOWS_SECS {
        let delta = (secs - canon).abs();
        if (delta as f64) <= 0.10 * canon as f64 {
            return Some(Duration::seconds(canon));
        }
    }
    None
}

fn collect_fields(cond: &Condition, out: &mut HashSet<String>) {
    match cond {
        Condition::Leaf { field, .. } => {
            out.insert(field.clone());
        }
        Condition::And(l, r) | Condition::Or(l, r) => {
            collect_fields(l, out);
            collect_fields(r, out);
        }
    }
}

/// Regroups adjacent equality leaves under the same field so label
/// matchers for the same metric label sit together; this is a best-effort
/// stable sort by field name among top-level AND-joined leaves.
fn regroup_label_selectors(cond: &mut Condition) -> bool {
    let Some(leaves) = cond.flatten_and() else {
        return false;
    };
    if leaves.len() < 2 {
        return false;
    }
    let mut cloned: Vec<Condition> = leaves.into_iter().cloned().collect();
    let before = cloned.clone();
    cloned.sort_by(|a, b| leaf_field(a).cmp(leaf_field(b)));
    if cloned == before {
        return false;
    }
    let mut iter = cloned.into_iter();
    let first = iter.next().unwrap();
    let rebuilt = iter.fold(first, |acc, next| Condition::And(Box::new(acc), Box::new(next)));
    *cond = rebuilt;
    true
}

fn leaf_field(c: &Condition) -> &str {
    match c {
        Condition::Leaf { field, .. } => field.as_str(),
        _ => "",
    }
}

/// Reorders a top-level AND chain of leaves by the static logs
/// selectivity table; non-leaf/non-AND shapes and unknown fields are left
/// in their original relative order (stable sort). Returns whether the
/// order actually changed, mirroring `regroup_label_selectors` so the
/// caller only counts a rewrite when one happened.
fn reorder_by_selectivity(cond: &mut Condition) -> bool {
    let Some(leaves) = cond.flatten_and() else {
        return false;
    };
    if leaves.len() < 2 {
        return false;
    }
    let mut cloned: Vec<Condition> = leaves.into_iter().cloned().collect();
    let before = cloned.clone();
    cloned.sort_by_key(|c| {
        LOG_SELECTIVITY_ORDER
            .iter()
            .position(|f| *f == leaf_field(c))
            .unwrap_or(LOG_SELECTIVITY_ORDER.len())
    });
    if cloned == before {
        return false;
    }
    let mut iter = cloned.into_iter();
    let first = iter.next().unwrap();
    let rebuilt = iter.fold(first, |acc, next| Condition::And(Box::new(acc), Box::new(next)));
    *cond = rebuilt;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uql::parser::parse;

    #[test]
    fn optimize_is_idempotent() {
        let opt = Optimizer::new();
        let ast = parse("SELECT a, a, b FROM logs:error WHERE level='error' ORDER BY b, a").unwrap();
        let once = opt.optimize(&ast);
        let twice = opt.optimize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn query_rewrite_deduplicates_fields_and_sorts_order_by() {
        let opt = Optimizer::new();
        let ast = parse("SELECT a, a, b FROM logs:error ORDER BY b, a").unwrap();
        let out = opt.optimize(&ast);
        if let UqlQuery::Select(q) = out {
            assert_eq!(q.fields.len(), 2);
            assert_eq!(q.envelope.order_by[0].0, "a");
        } else {
            panic!("expected Select");
        }
    }

    #[test]
    fn single_leaf_predicate_does_not_count_as_rewritten() {
        let opt = Optimizer::new();
        let ast = parse("SELECT a FROM logs:error WHERE level='error'").unwrap();
        opt.optimize(&ast);
        assert_eq!(opt.stats.predicate_pushdown.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn already_ordered_predicate_chain_does_not_count_as_rewritten() {
        let opt = Optimizer::new();
        let ast = parse("SELECT a FROM logs:error WHERE level='error' AND service='api'").unwrap();
        opt.optimize(&ast);
        assert_eq!(opt.stats.predicate_pushdown.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn out_of_order_predicate_chain_counts_as_rewritten() {
        let opt = Optimizer::new();
        let ast = parse("SELECT a FROM logs:error WHERE service='api' AND level='error'").unwrap();
        opt.optimize(&ast);
        assert_eq!(opt.stats.predicate_pushdown.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn time_window_snaps_to_canonical_size() {
        let opt = Optimizer::new();
        let mut ast = parse("logs:error WITHIN 5m OF metrics:cpu_usage").unwrap();
        if let UqlQuery::Correlation(q) = &mut ast {
            q.envelope.time_window = Some(Duration::seconds(290));
        }
        let out = opt.optimize(&ast);
        assert_eq!(out.envelope().time_window, Some(Duration::minutes(5)));
    }

    #[test]
    fn join_defaults_to_time_join() {
        let opt = Optimizer::new();
        let ast = UqlQuery::Join(JoinQuery {
            envelope: Envelope::default(),
            left: DataSource { engine: "metrics".into(), query: "a".into() },
            right: DataSource { engine: "logs".into(), query: "b".into() },
            join_type: JoinType::Hash,
            condition: Condition::Leaf {
                field: "trace_id".into(),
                operator: ComparisonOperator::Eq,
                value: Literal::String("x".into()),
            },
        });
        let out = opt.optimize(&ast);
        if let UqlQuery::Join(q) = out {
            assert_eq!(q.join_type, JoinType::Time);
        } else {
            panic!("expected Join");
        }
    }

    #[test]
    fn query_plan_orders_children_by_id() {
        let opt = Optimizer::new();
        let ast = parse("SELECT a FROM logs:error WHERE level='error' LIMIT 10").unwrap();
        let plan = opt.generate_query_plan(&ast);
        assert!(plan.steps.iter().any(|s| s.operation == "limit"));
        assert!(plan.estimated_total_cost > 0.0);
    }
}
