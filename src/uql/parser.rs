//! Recursive-descent UQL parser. There is no separate lexer module: the
//! scanning helpers below (`skip_ws`, `scan_ident`, `scan_until_keyword`,
//! ...) are inlined into the parser's recursive-descent routines, per the
//! "lex-free" requirement in spec §4.3.
//!
//! Grammar (informal, see `spec.md` §4.3):
//! ```text
//! Query      := SelectQ | AggQ | CorrelationQ
//! SelectQ    := 'SELECT' FieldList 'FROM' DataSource ('WHERE' Cond)?
//!               ('GROUP BY' IdentList)? ('HAVING' Cond)?
//!               ('ORDER BY' OrderList)? ('LIMIT' Int)?
//! AggQ       := Func '(' (Field | '*') ')' 'FROM' DataSource ('WHERE' Cond)? ('GROUP BY' IdentList)?
//! CorrelationQ := Expr Op Expr | Expr 'WITHIN' Duration 'OF' Expr
//! DataSource := Engine ':' QueryText
//! ```

use chrono::Duration;

use crate::error::{EngineError, Result};
use crate::model::ast::*;

const BOUNDARY_KEYWORDS: &[&str] = &[
    "WHERE", "GROUP BY", "HAVING", "ORDER BY", "LIMIT", "AND", "OR", "WITHIN", "NEAR", "BEFORE",
    "AFTER", "OF",
];

const KNOWN_ENGINES: &[&str] = &["logs", "metrics", "traces"];

pub fn parse(raw: &str) -> Result<UqlQuery> {
    if raw.trim().is_empty() {
        return Err(EngineError::ParseError {
            token: "<eof>".into(),
            position: 0,
        });
    }
    let mut p = Parser { src: raw, pos: 0 };
    p.skip_ws();
    let query = if p.peek_keyword("SELECT") {
        UqlQuery::Select(p.parse_select(raw)?)
    } else if let Some(func) = p.peek_agg_function() {
        UqlQuery::Aggregation(p.parse_aggregation(raw, func)?)
    } else {
        UqlQuery::Correlation(p.parse_correlation(raw)?)
    };
    Ok(query)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.rest().chars().next() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn err_here(&self, what: &str) -> EngineError {
        let token = self.rest().split_whitespace().next().unwrap_or("<eof>").to_string();
        EngineError::ParseError {
            token: format!("{what} (found `{token}`)"),
            position: self.pos,
        }
    }

    /// Case-insensitive match of a (possibly multi-word, whitespace
    /// normalized) keyword at the current position, not consuming input.
    fn peek_keyword(&self, kw: &str) -> bool {
        self.match_keyword_at(self.pos, kw).is_some()
    }

    fn match_keyword_at(&self, pos: usize, kw: &str) -> Option<usize> {
        let hay = &self.src[pos..];
        let mut hay_chars = hay.char_indices();
        let mut kw_parts = kw.split_whitespace();
        let mut cur = kw_parts.next()?;
        let mut consumed = 0usize;
        loop {
            // skip whitespace in haystack between keyword words
            let mut rest = &hay[consumed..];
            let ws_len: usize = rest.chars().take_while(|c| c.is_whitespace()).map(|c| c.len_utf8()).sum();
            consumed += ws_len;
            rest = &hay[consumed..];

            let word_len: usize = rest
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_')
                .map(|c| c.len_utf8())
                .sum();
            if word_len == 0 || !rest[..word_len].eq_ignore_ascii_case(cur) {
                return None;
            }
            consumed += word_len;
            match kw_parts.next() {
                Some(next) => cur = next,
                None => break,
            }
        }
        let _ = hay_chars.next();
        Some(pos + consumed)
    }

    fn consume_keyword(&mut self, kw: &str) -> Result<()> {
        self.skip_ws();
        match self.match_keyword_at(self.pos, kw) {
            Some(new_pos) => {
                self.pos = new_pos;
                Ok(())
            }
            None => Err(self.err_here(&format!("expected `{kw}`"))),
        }
    }

    fn try_consume_keyword(&mut self, kw: &str) -> bool {
        self.skip_ws();
        match self.match_keyword_at(self.pos, kw) {
            Some(new_pos) => {
                self.pos = new_pos;
                true
            }
            None => false,
        }
    }

    fn scan_ident(&mut self) -> Result<String> {
        self.skip_ws();
        if self.rest().starts_with('`') {
            let rest = &self.rest()[1..];
            let end = rest.find('`').ok_or_else(|| self.err_here("unterminated quoted identifier"))?;
            let ident = rest[..end].to_string();
            self.pos += 1 + end + 1;
            return Ok(ident);
        }
        let len: usize = self
            .rest()
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '.' || *c == '-')
            .map(|c| c.len_utf8())
            .sum();
        if len == 0 {
            return Err(self.err_here("expected identifier"));
        }
        let ident = self.rest()[..len].to_string();
        self.pos += len;
        Ok(ident)
    }

    fn scan_number(&mut self) -> Result<f64> {
        self.skip_ws();
        let len: usize = self
            .rest()
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
            .map(|c| c.len_utf8())
            .sum();
        if len == 0 {
            return Err(self.err_here("expected number"));
        }
        let text = &self.rest()[..len];
        let n: f64 = text.parse().map_err(|_| self.err_here("invalid number"))?;
        self.pos += len;
        Ok(n)
    }

    fn scan_literal(&mut self) -> Result<Literal> {
        self.skip_ws();
        if self.rest().starts_with('\'') || self.rest().starts_with('"') {
            let quote = self.rest().chars().next().unwrap();
            let rest = &self.rest()[quote.len_utf8()..];
            let end = rest
                .find(quote)
                .ok_or_else(|| self.err_here("unterminated string literal"))?;
            let s = rest[..end].to_string();
            self.pos += quote.len_utf8() + end + quote.len_utf8();
            return Ok(Literal::String(s));
        }
        if self.peek_keyword("true") {
            self.consume_keyword("true")?;
            return Ok(Literal::Bool(true));
        }
        if self.peek_keyword("false") {
            self.consume_keyword("false")?;
            return Ok(Literal::Bool(false));
        }
        let n = self.scan_number()?;
        Ok(Literal::Number(n))
    }

    fn scan_comparison_op(&mut self) -> Result<ComparisonOperator> {
        self.skip_ws();
        for tok in ["!=", "<=", ">=", "=", "<", ">"] {
            if self.rest().starts_with(tok) {
                self.pos += tok.len();
                return Ok(ComparisonOperator::from_token(tok).unwrap());
            }
        }
        if self.peek_keyword("LIKE") {
            self.consume_keyword("LIKE")?;
            return Ok(ComparisonOperator::Like);
        }
        if self.peek_keyword("MATCH") {
            self.consume_keyword("MATCH")?;
            return Ok(ComparisonOperator::Match);
        }
        Err(self.err_here("expected comparison operator"))
    }

    /// Scans raw text up to (but not including) the next top-level
    /// occurrence of one of `boundaries`, tracking bracket/paren/brace
    /// nesting and quote state so embedded backend syntax (e.g. PromQL
    /// label selectors) is never split mid-token.
    fn scan_until_keyword(&mut self, boundaries: &[&str]) -> String {
        let start = self.pos;
        let mut depth: i32 = 0;
        let mut in_quote: Option<char> = None;

        loop {
            if self.pos >= self.src.len() {
                break;
            }
            if in_quote.is_none() && depth == 0 {
                let hit = boundaries.iter().any(|b| self.match_keyword_at(self.pos, b).is_some());
                if hit {
                    break;
                }
            }
            let c = self.src[self.pos..].chars().next().unwrap();
            match c {
                '\'' | '"' | '`' => {
                    in_quote = match in_quote {
                        Some(q) if q == c => None,
                        Some(q) => Some(q),
                        None => Some(c),
                    };
                }
                '(' | '{' | '[' if in_quote.is_none() => depth += 1,
                ')' | '}' | ']' if in_quote.is_none() => depth -= 1,
                _ => {}
            }
            self.pos += c.len_utf8();
        }

        self.src[start..self.pos].trim().to_string()
    }

    fn parse_data_source(&mut self, boundaries: &[&str]) -> Result<DataSource> {
        self.skip_ws();
        let engine = self.scan_ident()?;
        if engine.is_empty() {
            return Err(self.err_here("empty engine in data source"));
        }
        if !KNOWN_ENGINES.contains(&engine.to_ascii_lowercase().as_str()) {
            return Err(self.err_here(&format!("unknown engine `{engine}`")));
        }
        self.skip_ws();
        if !self.rest().starts_with(':') {
            return Err(self.err_here("expected `:` after engine"));
        }
        self.pos += 1;
        let query = self.scan_until_keyword(boundaries);
        if query.trim().is_empty() {
            return Err(self.err_here("empty query in data source"));
        }
        Ok(DataSource {
            engine: engine.to_ascii_lowercase(),
            query,
        })
    }

    fn parse_condition(&mut self) -> Result<Condition> {
        let mut left = self.parse_condition_atom()?;
        loop {
            self.skip_ws();
            if self.try_consume_keyword("AND") {
                let right = self.parse_condition_atom()?;
                left = Condition::And(Box::new(left), Box::new(right));
            } else if self.try_consume_keyword("OR") {
                let right = self.parse_condition_atom()?;
                left = Condition::Or(Box::new(left), Box::new(right));
            } else {
                break;
            }
        }
        Ok(left)
    }

    fn parse_condition_atom(&mut self) -> Result<Condition> {
        self.skip_ws();
        if self.rest().starts_with('(') {
            self.pos += 1;
            let inner = self.parse_condition()?;
            self.skip_ws();
            if !self.rest().starts_with(')') {
                return Err(self.err_here("unbalanced parentheses in condition"));
            }
            self.pos += 1;
            return Ok(inner);
        }
        let field = self.scan_ident()?;
        let operator = self.scan_comparison_op()?;
        let value = self.scan_literal()?;
        Ok(Condition::Leaf { field, operator, value })
    }

    fn parse_field_list(&mut self) -> Result<Vec<Field>> {
        let mut fields = Vec::new();
        loop {
            self.skip_ws();
            if self.rest().starts_with('*') {
                self.pos += 1;
                fields.push(Field::plain("*"));
            } else {
                let name = self.scan_ident()?;
                fields.push(Field::plain(name));
            }
            self.skip_ws();
            if self.rest().starts_with(',') {
                self.pos += 1;
                continue;
            }
            break;
        }
        Ok(fields)
    }

    fn parse_ident_list(&mut self) -> Result<Vec<String>> {
        let mut idents = Vec::new();
        loop {
            idents.push(self.scan_ident()?);
            self.skip_ws();
            if self.rest().starts_with(',') {
                self.pos += 1;
                continue;
            }
            break;
        }
        Ok(idents)
    }

    fn parse_order_list(&mut self) -> Result<Vec<(String, OrderDirection)>> {
        let mut out = Vec::new();
        loop {
            let field = self.scan_ident()?;
            let dir = if self.try_consume_keyword("DESC") {
                OrderDirection::Desc
            } else {
                self.try_consume_keyword("ASC");
                OrderDirection::Asc
            };
            out.push((field, dir));
            self.skip_ws();
            if self.rest().starts_with(',') {
                self.pos += 1;
                continue;
            }
            break;
        }
        Ok(out)
    }

    fn peek_agg_function(&self) -> Option<AggregationFunction> {
        for name in ["COUNT", "SUM", "AVG", "MIN", "MAX", "RATE", "INCREASE", "PERCENTILE", "QUANTILE", "HISTOGRAM", "HISTOGRAM_QUANTILE"] {
            if let Some(end) = self.match_keyword_at(self.pos, name) {
                let rest = self.src[end..].trim_start();
                if rest.starts_with('(') {
                    return AggregationFunction::from_token(name);
                }
            }
        }
        None
    }

    fn parse_select(&mut self, raw: &str) -> Result<SelectQuery> {
        self.consume_keyword("SELECT")?;
        let fields = self.parse_field_list()?;
        self.consume_keyword("FROM")?;
        let data_source = self.parse_data_source(BOUNDARY_KEYWORDS)?;

        let mut where_clause = None;
        let mut group_by = Vec::new();
        let mut having = None;
        let mut order_by = Vec::new();
        let mut limit = None;

        if self.try_consume_keyword("WHERE") {
            where_clause = Some(self.parse_condition()?);
        }
        if self.try_consume_keyword("GROUP BY") {
            group_by = self.parse_ident_list()?;
        }
        if self.try_consume_keyword("HAVING") {
            having = Some(self.parse_condition()?);
        }
        if self.try_consume_keyword("ORDER BY") {
            order_by = self.parse_order_list()?;
        }
        if self.try_consume_keyword("LIMIT") {
            let n = self.scan_number()?;
            if n < 0.0 {
                return Err(self.err_here("LIMIT must be non-negative"));
            }
            limit = Some(n as u64);
        }

        Ok(SelectQuery {
            envelope: Envelope {
                raw_query: raw.to_string(),
                time_window: None,
                limit,
                order_by,
            },
            fields,
            data_source,
            where_clause,
            group_by,
            having,
        })
    }

    fn parse_aggregation(&mut self, raw: &str, function: AggregationFunction) -> Result<AggregationQuery> {
        // consume the function name
        for name in ["HISTOGRAM_QUANTILE", "HISTOGRAM", "PERCENTILE", "QUANTILE", "INCREASE", "COUNT", "SUM", "AVG", "MIN", "MAX", "RATE"] {
            if self.try_consume_keyword(name) {
                break;
            }
        }
        self.skip_ws();
        if !self.rest().starts_with('(') {
            return Err(self.err_here("expected `(` after aggregation function"));
        }
        self.pos += 1;
        self.skip_ws();
        let mut arguments = Vec::new();
        let field = if self.rest().starts_with('*') {
            self.pos += 1;
            "*".to_string()
        } else {
            let f = self.scan_ident()?;
            if f.is_empty() {
                return Err(self.err_here("empty aggregation argument"));
            }
            f
        };
        self.skip_ws();
        while self.rest().starts_with(',') {
            self.pos += 1;
            self.skip_ws();
            arguments.push(self.scan_ident()?);
            self.skip_ws();
        }
        self.skip_ws();
        if !self.rest().starts_with(')') {
            return Err(self.err_here("expected `)` closing aggregation arguments"));
        }
        self.pos += 1;

        if field == "*" && function != AggregationFunction::Count {
            return Err(self.err_here("wildcard `*` is only legal for COUNT"));
        }

        self.consume_keyword("FROM")?;
        let data_source = self.parse_data_source(BOUNDARY_KEYWORDS)?;

        let mut where_clause = None;
        let mut group_by = Vec::new();
        if self.try_consume_keyword("WHERE") {
            where_clause = Some(self.parse_condition()?);
        }
        if self.try_consume_keyword("GROUP BY") {
            group_by = self.parse_ident_list()?;
        }

        Ok(AggregationQuery {
            envelope: Envelope {
                raw_query: raw.to_string(),
                time_window: None,
                limit: None,
                order_by: Vec::new(),
            },
            function,
            field,
            data_source,
            where_clause,
            group_by,
            arguments,
        })
    }

    /// Parses a duration, accumulating adjacent digit+unit segments with no
    /// intervening whitespace (e.g. `4m45s`) into a single total.
    fn parse_duration(&mut self) -> Result<Duration> {
        self.skip_ws();
        let mut total = Duration::zero();
        let mut parsed_any = false;
        loop {
            let len: usize = self
                .rest()
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .map(|c| c.len_utf8())
                .sum();
            if len == 0 {
                break;
            }
            let n: i64 = self.rest()[..len].parse().unwrap();
            self.pos += len;
            let unit = self.rest().chars().next().ok_or_else(|| self.err_here("expected duration unit"))?;
            self.pos += unit.len_utf8();
            let segment = match unit {
                's' => Duration::seconds(n),
                'm' => Duration::minutes(n),
                'h' => Duration::hours(n),
                'd' => Duration::days(n),
                _ => return Err(self.err_here("unknown duration unit")),
            };
            total = total + segment;
            parsed_any = true;
            if !self.rest().chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
                break;
            }
        }
        if !parsed_any {
            return Err(self.err_here("expected duration"));
        }
        Ok(total)
    }

    fn parse_expression(&mut self, boundaries: &[&str]) -> Result<Expression> {
        let data_source = self.parse_data_source(boundaries)?;
        Ok(Expression { data_source })
    }

    fn parse_correlation(&mut self, raw: &str) -> Result<CorrelationQuery> {
        let left_expr = self.parse_expression(BOUNDARY_KEYWORDS)?;

        let op_boundaries = ["AND", "OR", "WITHIN", "NEAR", "BEFORE", "AFTER"];
        self.skip_ws();
        let operator = {
            let mut found = None;
            for tok in op_boundaries {
                if self.try_consume_keyword(tok) {
                    found = Some(CorrelationOperator::from_token(tok).unwrap());
                    break;
                }
            }
            found.ok_or_else(|| self.err_here("expected correlation operator"))?
        };

        let time_window = if operator == CorrelationOperator::Within {
            let d = self.parse_duration()?;
            self.consume_keyword("OF")?;
            Some(d)
        } else {
            None
        };

        let right_expr = self.parse_expression(&["WHERE"])?;

        let join_condition = if self.try_consume_keyword("WHERE") {
            Some(self.parse_condition()?)
        } else {
            None
        };

        Ok(CorrelationQuery {
            envelope: Envelope {
                raw_query: raw.to_string(),
                time_window,
                limit: None,
                order_by: Vec::new(),
            },
            left_expr,
            right_expr,
            operator,
            join_condition,
        })
    }
}

/// Structural validation pass over an already-parsed AST (spec §3 / §4.3:
/// "the parser does not perform semantic validation of fields against
/// backend schemas" — this only checks the AST-level invariants).
pub fn validate(ast: &UqlQuery) -> Result<()> {
    match ast {
        UqlQuery::Select(q) => {
            if q.fields.is_empty() {
                return Err(EngineError::InvalidQuery("SELECT requires at least one field".into()));
            }
            if q.data_source.engine.is_empty() || q.data_source.query.is_empty() {
                return Err(EngineError::InvalidQuery("data source requires engine and query".into()));
            }
        }
        UqlQuery::Aggregation(q) => {
            if q.field.is_empty() {
                return Err(EngineError::InvalidQuery("aggregation requires a field".into()));
            }
            if q.field == "*" && q.function != AggregationFunction::Count {
                return Err(EngineError::InvalidQuery("wildcard is only legal for COUNT".into()));
            }
        }
        UqlQuery::Correlation(q) => {
            if q.left_expr.data_source.query.is_empty() || q.right_expr.data_source.query.is_empty() {
                return Err(EngineError::InvalidQuery("correlation requires two complete expressions".into()));
            }
        }
        UqlQuery::Join(q) => {
            if q.left.engine.is_empty() || q.right.engine.is_empty() {
                return Err(EngineError::InvalidQuery("join requires two complete data sources".into()));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_select_with_where() {
        let ast = parse("SELECT service, level FROM logs:error WHERE level='error'").unwrap();
        match ast {
            UqlQuery::Select(q) => {
                assert_eq!(q.fields.len(), 2);
                assert_eq!(q.data_source.engine, "logs");
                assert_eq!(q.data_source.query, "error");
                assert!(matches!(q.where_clause, Some(Condition::Leaf { .. })));
            }
            _ => panic!("expected Select"),
        }
    }

    #[test]
    fn parses_count_aggregation_wildcard() {
        let ast = parse("COUNT(*) FROM logs:error").unwrap();
        match ast {
            UqlQuery::Aggregation(q) => {
                assert_eq!(q.function, AggregationFunction::Count);
                assert_eq!(q.field, "*");
            }
            _ => panic!("expected Aggregation"),
        }
    }

    #[test]
    fn wildcard_rejected_for_non_count() {
        let err = parse("SUM(*) FROM metrics:cpu");
        assert!(err.is_err());
    }

    #[test]
    fn parses_correlation_within() {
        let ast = parse("logs:error WITHIN 5m OF metrics:cpu_usage > 80").unwrap();
        match ast {
            UqlQuery::Correlation(q) => {
                assert_eq!(q.operator, CorrelationOperator::Within);
                assert_eq!(q.envelope.time_window, Some(Duration::minutes(5)));
                assert_eq!(q.left_expr.data_source.engine, "logs");
                assert_eq!(q.right_expr.data_source.engine, "metrics");
            }
            _ => panic!("expected Correlation"),
        }
    }

    #[test]
    fn parses_compound_duration() {
        let ast = parse("logs:error WITHIN 4m45s OF metrics:cpu_usage > 80").unwrap();
        match ast {
            UqlQuery::Correlation(q) => {
                assert_eq!(q.envelope.time_window, Some(Duration::minutes(4) + Duration::seconds(45)));
            }
            _ => panic!("expected Correlation"),
        }
    }

    #[test]
    fn missing_from_is_parse_error() {
        assert!(parse("SELECT x").is_err());
    }

    #[test]
    fn unknown_engine_is_parse_error() {
        assert!(parse("SELECT x FROM bogus:thing").is_err());
    }

    #[test]
    fn empty_query_part_is_parse_error() {
        assert!(parse("SELECT x FROM logs:").is_err());
    }

    #[test]
    fn whitespace_only_is_parse_error() {
        assert!(parse("   ").is_err());
    }

    #[test]
    fn quoted_identifier_allows_special_characters() {
        let ast = parse("SELECT `foo-bar` FROM logs:error").unwrap();
        match ast {
            UqlQuery::Select(q) => assert_eq!(q.fields[0].name, "foo-bar"),
            _ => panic!("expected Select"),
        }
    }

    #[test]
    fn validate_rejects_empty_select_fields() {
        let mut ast = parse("SELECT x FROM logs:error").unwrap();
        if let UqlQuery::Select(q) = &mut ast {
            q.fields.clear();
        }
        assert!(validate(&ast).is_err());
    }
}
