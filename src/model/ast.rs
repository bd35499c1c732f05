//! The UQL abstract syntax tree.
//!
//! `UqlQuery` is a tagged variant over the four query shapes the language
//! supports. Every variant shares an envelope of raw-query text, an
//! optional time window, an optional result limit, and an ordering list.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Metrics,
    Logs,
    Traces,
    Correlation,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Metrics => "metrics",
            Engine::Logs => "logs",
            Engine::Traces => "traces",
            Engine::Correlation => "correlation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub function: Option<String>,
}

impl Field {
    pub fn plain(name: impl Into<String>) -> Self {
        Self { name: name.into(), function: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub engine: String,
    pub query: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    Match,
}

impl ComparisonOperator {
    pub fn from_token(tok: &str) -> Option<Self> {
        match tok.to_ascii_uppercase().as_str() {
            "=" => Some(Self::Eq),
            "!=" => Some(Self::Ne),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Ge),
            "LIKE" => Some(Self::Like),
            "MATCH" => Some(Self::Match),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    String(String),
    Number(f64),
    Bool(bool),
}

impl Literal {
    pub fn as_display(&self) -> String {
        match self {
            Literal::String(s) => s.clone(),
            Literal::Number(n) => {
                if n.fract() == 0.0 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            Literal::Bool(b) => b.to_string(),
        }
    }
}

/// A binary tree of leaf comparisons joined by `and`/`or`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    Leaf { field: String, operator: ComparisonOperator, value: Literal },
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
}

impl Condition {
    /// Flattens a left-leaning chain of `And`/`Or` nodes of the same kind
    /// into a list of leaves, used by passes that need to reorder atoms.
    pub fn flatten_and(&self) -> Option<Vec<&Condition>> {
        fn walk<'a>(c: &'a Condition, out: &mut Vec<&'a Condition>) -> bool {
            match c {
                Condition::And(l, r) => walk(l, out) && walk(r, out),
                Condition::Leaf { .. } => {
                    out.push(c);
                    true
                }
                Condition::Or(_, _) => false,
            }
        }
        let mut out = Vec::new();
        if walk(self, &mut out) {
            Some(out)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Rate,
    Increase,
    Percentile,
    Histogram,
}

impl AggregationFunction {
    pub fn from_token(tok: &str) -> Option<Self> {
        match tok.to_ascii_uppercase().as_str() {
            "COUNT" => Some(Self::Count),
            "SUM" => Some(Self::Sum),
            "AVG" => Some(Self::Avg),
            "MIN" => Some(Self::Min),
            "MAX" => Some(Self::Max),
            "RATE" => Some(Self::Rate),
            "INCREASE" => Some(Self::Increase),
            "PERCENTILE" | "QUANTILE" => Some(Self::Percentile),
            "HISTOGRAM" | "HISTOGRAM_QUANTILE" => Some(Self::Histogram),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
            Self::Rate => "rate",
            Self::Increase => "increase",
            Self::Percentile => "percentile",
            Self::Histogram => "histogram",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationOperator {
    And,
    Or,
    Within,
    Near,
    Before,
    After,
}

impl CorrelationOperator {
    pub fn from_token(tok: &str) -> Option<Self> {
        match tok.to_ascii_uppercase().as_str() {
            "AND" => Some(Self::And),
            "OR" => Some(Self::Or),
            "WITHIN" => Some(Self::Within),
            "NEAR" => Some(Self::Near),
            "BEFORE" => Some(Self::Before),
            "AFTER" => Some(Self::After),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JoinType {
    Hash,
    Merge,
    NestedLoop,
    Time,
}

/// An expression on one side of a correlation query: just a data source
/// for now (`engine:query`), which is all the grammar in §4.3 allows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expression {
    pub data_source: DataSource,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub raw_query: String,
    pub time_window: Option<chrono::Duration>,
    pub limit: Option<u64>,
    pub order_by: Vec<(String, OrderDirection)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectQuery {
    pub envelope: Envelope,
    pub fields: Vec<Field>,
    pub data_source: DataSource,
    pub where_clause: Option<Condition>,
    pub group_by: Vec<String>,
    pub having: Option<Condition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationQuery {
    pub envelope: Envelope,
    pub function: AggregationFunction,
    pub field: String,
    pub data_source: DataSource,
    pub where_clause: Option<Condition>,
    pub group_by: Vec<String>,
    pub arguments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationQuery {
    pub envelope: Envelope,
    pub left_expr: Expression,
    pub right_expr: Expression,
    pub operator: CorrelationOperator,
    pub join_condition: Option<Condition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinQuery {
    pub envelope: Envelope,
    pub left: DataSource,
    pub right: DataSource,
    pub join_type: JoinType,
    pub condition: Condition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UqlQuery {
    Select(SelectQuery),
    Aggregation(AggregationQuery),
    Correlation(CorrelationQuery),
    Join(JoinQuery),
}

impl UqlQuery {
    pub fn envelope(&self) -> &Envelope {
        match self {
            UqlQuery::Select(q) => &q.envelope,
            UqlQuery::Aggregation(q) => &q.envelope,
            UqlQuery::Correlation(q) => &q.envelope,
            UqlQuery::Join(q) => &q.envelope,
        }
    }

    pub fn envelope_mut(&mut self) -> &mut Envelope {
        match self {
            UqlQuery::Select(q) => &mut q.envelope,
            UqlQuery::Aggregation(q) => &mut q.envelope,
            UqlQuery::Correlation(q) => &mut q.envelope,
            UqlQuery::Join(q) => &mut q.envelope,
        }
    }

    pub fn raw_query(&self) -> &str {
        &self.envelope().raw_query
    }
}
