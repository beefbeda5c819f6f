//! Recursive descent parser for rule expressions
//!
//! Grammar (EBNF):
//!
//! ```text
//! expression      = orExpr ;
//! orExpr          = andExpr , { ("||" | "OR") , andExpr } ;
//! andExpr         = condition , { ("&&" | "AND") , condition } ;
//! condition       = aggCondition | simpleCondition | "(" , expression , ")" ;
//! aggCondition    = aggType , "(" , ident , "," , timeWindow , ")" , op , threshold ;
//! simpleCondition = ident , op , threshold ;
//! aggType         = "avg" | "sum" | "max" | "min" (case-insensitive) ;
//! timeWindow      = NUMBER , ("s" | "m" | "h") (unit case-insensitive) ;
//! op              = ">" | ">=" | "<" | "<=" | "==" | "!=" ;
//! threshold       = arith ;
//! arith           = mulDiv , { ("+" | "-") , mulDiv } ;
//! mulDiv          = primary , { ("*" | "/") , primary } ;
//! primary         = NUMBER | ident | "(" , arith , ")" ;
//! ```
//!
//! A threshold that reduces to a single number is stored as a literal;
//! anything else stays an arithmetic tree resolved at evaluation time.

use crate::error::{ParseError, ParseResult};
use crate::lexer::{Lexer, SpannedToken, Token};
use chrono::Duration;
use perkons_core::{AggKind, ArithExpr, ArithOp, CmpOp, Condition, Expr, LogicalOp, Threshold};

/// Parse a rule expression into an `Expr` tree
pub fn parse(source: &str) -> ParseResult<Expr> {
    let mut parser = Parser::new(source);
    let expr = parser.parse_expression()?;
    parser.expect_eof()?;
    Ok(expr)
}

/// Parser state
pub struct Parser<'source> {
    lexer: Lexer<'source>,
    current: SpannedToken,
    previous: SpannedToken,
}

impl<'source> Parser<'source> {
    pub fn new(source: &'source str) -> Self {
        let mut lexer = Lexer::new(source);
        let current = lexer.next().unwrap_or(SpannedToken {
            token: Token::Eof,
            start: 0,
            end: 0,
        });
        Self {
            lexer,
            current: current.clone(),
            previous: current,
        }
    }

    fn advance(&mut self) {
        self.previous = self.current.clone();
        self.current = self.lexer.next().unwrap_or(SpannedToken {
            token: Token::Eof,
            start: self.previous.end,
            end: self.previous.end,
        });
    }

    fn check(&self, token: &Token) -> bool {
        std::mem::discriminant(&self.current.token) == std::mem::discriminant(token)
    }

    fn match_token(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, expected: &Token, msg: &str) -> ParseResult<SpannedToken> {
        if self.check(expected) {
            let tok = self.current.clone();
            self.advance();
            Ok(tok)
        } else {
            Err(self.unexpected(msg))
        }
    }

    /// Error for the current token, mapped to the most specific variant.
    fn unexpected(&self, expected: &str) -> ParseError {
        match &self.current.token {
            Token::Eof => ParseError::UnexpectedEof {
                expected: expected.to_string(),
            },
            Token::Error(lexeme) => ParseError::InvalidToken {
                position: self.current.start,
                lexeme: lexeme.clone(),
            },
            found => ParseError::UnexpectedToken {
                position: self.current.start,
                expected: expected.to_string(),
                found: found.to_string(),
            },
        }
    }

    fn expect_eof(&mut self) -> ParseResult<()> {
        if matches!(self.current.token, Token::Eof) {
            Ok(())
        } else {
            Err(self.unexpected("end of input"))
        }
    }

    // ========================================================================
    // Boolean expression levels
    // ========================================================================

    fn parse_expression(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_and()?;
        while self.match_token(&Token::OrOr) || self.match_token(&Token::Or) {
            let right = self.parse_and()?;
            left = Expr::binary(LogicalOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_condition()?;
        while self.match_token(&Token::AndAnd) || self.match_token(&Token::And) {
            let right = self.parse_condition()?;
            left = Expr::binary(LogicalOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_condition(&mut self) -> ParseResult<Expr> {
        if self.match_token(&Token::LParen) {
            let expr = self.parse_expression()?;
            self.consume(&Token::RParen, ")")?;
            return Ok(expr);
        }

        let ident = self.parse_identifier("metric name or aggregation")?;

        if self.check(&Token::LParen) {
            let kind =
                AggKind::parse(&ident.name).ok_or_else(|| ParseError::UnknownAggregation {
                    position: ident.position,
                    name: ident.name.clone(),
                })?;
            self.advance(); // consume '('
            let metric = self.parse_identifier("metric name")?;
            self.consume(&Token::Comma, ",")?;
            let window = self.parse_time_window()?;
            self.consume(&Token::RParen, ")")?;
            let op = self.parse_cmp_op()?;
            let threshold = self.parse_threshold()?;
            return Ok(Expr::Condition(Condition::aggregate(
                kind,
                metric.name,
                window,
                op,
                threshold,
            )));
        }

        let op = self.parse_cmp_op()?;
        let threshold = self.parse_threshold()?;
        Ok(Expr::Condition(Condition::simple(ident.name, op, threshold)))
    }

    fn parse_cmp_op(&mut self) -> ParseResult<CmpOp> {
        let op = match self.current.token {
            Token::Gt => CmpOp::Gt,
            Token::Ge => CmpOp::Ge,
            Token::Lt => CmpOp::Lt,
            Token::Le => CmpOp::Le,
            Token::EqEq => CmpOp::Eq,
            Token::NotEq => CmpOp::Ne,
            _ => return Err(self.unexpected("comparison operator")),
        };
        self.advance();
        Ok(op)
    }

    fn parse_time_window(&mut self) -> ParseResult<Duration> {
        let length = match self.current.token {
            Token::Number(n) => n,
            _ => return Err(self.unexpected("window length")),
        };
        self.advance();

        let unit = self.parse_identifier("time unit")?;
        let unit_ms = match unit.name.to_ascii_lowercase().as_str() {
            "s" => 1_000.0,
            "m" => 60_000.0,
            "h" => 3_600_000.0,
            _ => {
                return Err(ParseError::InvalidTimeUnit {
                    position: unit.position,
                    unit: unit.name,
                })
            }
        };
        Ok(Duration::milliseconds((length * unit_ms).round() as i64))
    }

    // ========================================================================
    // Arithmetic thresholds
    // ========================================================================

    fn parse_threshold(&mut self) -> ParseResult<Threshold> {
        let expr = self.parse_arith()?;
        Ok(match expr {
            ArithExpr::Const(value) => Threshold::Literal(value),
            expr => Threshold::Expr(expr),
        })
    }

    fn parse_arith(&mut self) -> ParseResult<ArithExpr> {
        let mut left = self.parse_mul_div()?;
        loop {
            let op = if self.match_token(&Token::Plus) {
                ArithOp::Add
            } else if self.match_token(&Token::Minus) {
                ArithOp::Sub
            } else {
                break;
            };
            let right = self.parse_mul_div()?;
            left = ArithExpr::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_mul_div(&mut self) -> ParseResult<ArithExpr> {
        let mut left = self.parse_primary()?;
        loop {
            let op = if self.match_token(&Token::Star) {
                ArithOp::Mul
            } else if self.match_token(&Token::Slash) {
                ArithOp::Div
            } else {
                break;
            };
            let right = self.parse_primary()?;
            left = ArithExpr::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> ParseResult<ArithExpr> {
        match self.current.token.clone() {
            Token::Number(n) => {
                self.advance();
                Ok(ArithExpr::Const(n))
            }
            Token::Ident(name) => {
                self.advance();
                Ok(ArithExpr::Var(name))
            }
            Token::LParen => {
                self.advance();
                let expr = self.parse_arith()?;
                self.consume(&Token::RParen, ")")?;
                Ok(expr)
            }
            _ => Err(self.unexpected("number, variable, or '('")),
        }
    }

    // ========================================================================
    // Terminals
    // ========================================================================

    fn parse_identifier(&mut self, expected: &str) -> ParseResult<SpannedIdent> {
        match self.current.token.clone() {
            Token::Ident(name) => {
                let position = self.current.start;
                self.advance();
                Ok(SpannedIdent { name, position })
            }
            _ => Err(self.unexpected(expected)),
        }
    }
}

struct SpannedIdent {
    name: String,
    position: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use perkons_core::analysis::MetricCollector;

    fn condition(expr: &Expr) -> &Condition {
        match expr {
            Expr::Condition(c) => c,
            other => panic!("expected condition, got {:?}", other),
        }
    }

    #[test]
    fn test_simple_condition() {
        let expr = parse("cpu > 70").unwrap();
        let c = condition(&expr);
        assert_eq!(c.metric, "cpu");
        assert_eq!(c.op, CmpOp::Gt);
        assert_eq!(c.threshold, Threshold::Literal(70.0));
        assert!(c.agg.is_none());
    }

    #[test]
    fn test_aggregation_condition() {
        let expr = parse("avg(cpu, 1m) > 70").unwrap();
        let c = condition(&expr);
        assert_eq!(c.metric, "cpu");
        let spec = c.agg.as_ref().unwrap();
        assert_eq!(spec.kind, AggKind::Avg);
        assert_eq!(spec.window, Duration::minutes(1));
    }

    #[test]
    fn test_aggregation_case_insensitive() {
        for text in ["AVG(cpu, 30s) > 1", "Avg(cpu, 30S) > 1", "avg(cpu, 30s) > 1"] {
            let expr = parse(text).unwrap();
            let c = condition(&expr);
            assert_eq!(c.agg.as_ref().unwrap().kind, AggKind::Avg);
            assert_eq!(c.agg.as_ref().unwrap().window, Duration::seconds(30));
        }
    }

    #[test]
    fn test_time_units() {
        let secs = parse("sum(m, 45s) > 0").unwrap();
        assert_eq!(
            condition(&secs).agg.as_ref().unwrap().window,
            Duration::seconds(45)
        );
        let hours = parse("sum(m, 2h) > 0").unwrap();
        assert_eq!(
            condition(&hours).agg.as_ref().unwrap().window,
            Duration::hours(2)
        );
        let fractional = parse("sum(m, 1.5m) > 0").unwrap();
        assert_eq!(
            condition(&fractional).agg.as_ref().unwrap().window,
            Duration::seconds(90)
        );
    }

    #[test]
    fn test_or_of_two_aggregations() {
        let expr = parse("avg(cpu, 1m) > 70 || avg(mem, 1m) > 80").unwrap();
        match &expr {
            Expr::Binary {
                op, left, right, ..
            } => {
                assert_eq!(*op, LogicalOp::Or);
                assert_eq!(condition(left).metric, "cpu");
                assert_eq!(condition(right).metric, "mem");
            }
            other => panic!("expected binary node, got {:?}", other),
        }
    }

    #[test]
    fn test_word_operators_uppercase_only() {
        assert!(parse("cpu > 1 AND mem > 2").is_ok());
        assert!(parse("cpu > 1 OR mem > 2").is_ok());
        // lowercase word forms are plain identifiers and do not chain
        assert!(parse("cpu > 1 and mem > 2").is_err());
        assert!(parse("cpu > 1 or mem > 2").is_err());
    }

    #[test]
    fn test_precedence_and_binds_tighter_than_or() {
        let expr = parse("a > 1 || b > 2 && c > 3").unwrap();
        match &expr {
            Expr::Binary { op, right, .. } => {
                assert_eq!(*op, LogicalOp::Or);
                match right.as_ref() {
                    Expr::Binary { op, .. } => assert_eq!(*op, LogicalOp::And),
                    other => panic!("expected AND on the right, got {:?}", other),
                }
            }
            other => panic!("expected OR at the root, got {:?}", other),
        }
    }

    #[test]
    fn test_parenthesized_expression() {
        let expr = parse("(a > 1 || b > 2) && c > 3").unwrap();
        match &expr {
            Expr::Binary { op, left, .. } => {
                assert_eq!(*op, LogicalOp::And);
                match left.as_ref() {
                    Expr::Binary { op, .. } => assert_eq!(*op, LogicalOp::Or),
                    other => panic!("expected OR on the left, got {:?}", other),
                }
            }
            other => panic!("expected AND at the root, got {:?}", other),
        }
    }

    #[test]
    fn test_variable_threshold() {
        let expr = parse("cpu > k * 2").unwrap();
        let c = condition(&expr);
        assert_eq!(
            c.threshold,
            Threshold::Expr(ArithExpr::binary(
                ArithOp::Mul,
                ArithExpr::Var("k".to_string()),
                ArithExpr::Const(2.0),
            ))
        );
    }

    #[test]
    fn test_arith_precedence() {
        // a + b * c parses the multiplication first
        let expr = parse("cpu > a + b * c").unwrap();
        let c = condition(&expr);
        match &c.threshold {
            Threshold::Expr(ArithExpr::Binary { op, right, .. }) => {
                assert_eq!(*op, ArithOp::Add);
                assert!(matches!(
                    right.as_ref(),
                    ArithExpr::Binary {
                        op: ArithOp::Mul,
                        ..
                    }
                ));
            }
            other => panic!("expected additive root, got {:?}", other),
        }
    }

    #[test]
    fn test_parenthesized_arith_collapses_to_literal() {
        let expr = parse("cpu > (70)").unwrap();
        assert_eq!(condition(&expr).threshold, Threshold::Literal(70.0));
    }

    #[test]
    fn test_grammar_edge_four_leaves() {
        let text = "(avg(cpu, 30s) > 80 && avg(memory, 1m) > 85) || \
                    (max(disk, 5m) > 95 && min(network, 10s) < 5)";
        let expr = parse(text).unwrap();
        let metrics = MetricCollector::collect(&expr);
        assert_eq!(metrics.len(), 4);
    }

    #[test]
    fn test_unknown_aggregation_function() {
        let err = parse("median(cpu, 1m) > 5").unwrap_err();
        assert_eq!(
            err,
            ParseError::UnknownAggregation {
                position: 0,
                name: "median".to_string()
            }
        );
    }

    #[test]
    fn test_invalid_time_unit() {
        let err = parse("avg(cpu, 5d) > 1").unwrap_err();
        assert!(matches!(err, ParseError::InvalidTimeUnit { unit, .. } if unit == "d"));
    }

    #[test]
    fn test_missing_comparison_operator() {
        let err = parse("cpu 70").unwrap_err();
        assert!(matches!(
            err,
            ParseError::UnexpectedToken { expected, .. } if expected == "comparison operator"
        ));
    }

    #[test]
    fn test_trailing_input_rejected() {
        let err = parse("cpu > 70 mem").unwrap_err();
        assert!(matches!(
            err,
            ParseError::UnexpectedToken { expected, .. } if expected == "end of input"
        ));
    }

    #[test]
    fn test_truncated_input() {
        assert!(matches!(
            parse("cpu >").unwrap_err(),
            ParseError::UnexpectedEof { .. }
        ));
        assert!(matches!(
            parse("avg(cpu").unwrap_err(),
            ParseError::UnexpectedEof { .. }
        ));
    }

    #[test]
    fn test_invalid_token_position() {
        let err = parse("cpu @ 5").unwrap_err();
        assert_eq!(
            err,
            ParseError::InvalidToken {
                position: 4,
                lexeme: "@".to_string()
            }
        );
    }

    #[test]
    fn test_aggregation_name_as_plain_metric() {
        // Without a following '(', an aggregation name is an ordinary metric
        let expr = parse("avg > 5").unwrap();
        assert_eq!(condition(&expr).metric, "avg");
    }

    #[test]
    fn test_canonical_round_trip() {
        let texts = [
            "cpu > 70",
            "avg(cpu, 3s) > 70 || avg(mem, 3s) > 80",
            "(avg(cpu, 30s) > 80 && avg(memory, 1m) > 85) || (max(disk, 5m) > 95 && min(network, 10s) < 5)",
            "cpu > k * 2 + 1",
            "mem <= (base + margin) / 2",
        ];
        for text in texts {
            let expr = parse(text).unwrap();
            let printed = expr.to_string();
            let reparsed = parse(&printed)
                .unwrap_or_else(|e| panic!("canonical form '{}' failed to parse: {}", printed, e));
            assert_eq!(expr, reparsed, "round trip mismatch for '{}'", text);
        }
    }
}
