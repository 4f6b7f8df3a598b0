//! Boolean condition expressions over record fields.
//!
//! Conditions are parsed once, at configuration load, into an [`Expr`] tree
//! and evaluated against each record by a recursive interpreter. Evaluation
//! uses three-valued logic: a reference to an absent field is *unknown*,
//! unknown propagates through comparisons and connectives (Kleene tables),
//! and an unknown result counts as `false`. Only `IS [NOT] MISSING` observes
//! absence directly.
//!
//! ```text
//! CURRENCY == 'JPY' AND PRODUCT_TYPE IN ['D', 'G']
//! NOT (FACE_VALUE < 0) OR VALUE_DATE >= DATE '2024-01-01'
//! STATUS ~= 'active' AND NOTE IS NOT MISSING
//! ```

use std::{cmp::Ordering, fmt};

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::{
    data::{DEFAULT_DATE_FORMATS, Record, Value, parse_boolean, parse_decimal, parse_naive_date},
    error::ExpressionError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    /// Case-insensitive equality.
    EqIgnoreCase,
}

impl CompareOp {
    fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::NotEq => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::EqIgnoreCase => "~=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Field(String),
    Literal(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    InList {
        operand: Operand,
        items: Vec<Value>,
        negated: bool,
    },
    IsNull {
        operand: Operand,
        negated: bool,
    },
    IsMissing {
        field: String,
        negated: bool,
    },
    Truthy(Operand),
}

/// A parsed condition and the text it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            source,
            tokens,
            pos: 0,
        };
        let expr = parser.parse_or()?;
        if let Some((_, offset)) = parser.peek_with_offset() {
            return Err(parser.error_at(offset, "unexpected trailing input"));
        }
        Ok(Condition {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn evaluate(&self, record: &Record) -> bool {
        eval(&self.expr, record) == Truth::True
    }

    /// Field names the condition reads, in first-seen order.
    pub fn references(&self) -> Vec<&str> {
        let mut names = Vec::new();
        collect_references(&self.expr, &mut names);
        names
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

pub fn evaluate(condition: &Condition, record: &Record) -> bool {
    condition.evaluate(record)
}

fn collect_references<'a>(expr: &'a Expr, names: &mut Vec<&'a str>) {
    match expr {
        Expr::Or(l, r) | Expr::And(l, r) => {
            collect_references(l, names);
            collect_references(r, names);
        }
        Expr::Not(inner) => collect_references(inner, names),
        Expr::Compare { left, right, .. } => {
            push_field(left, names);
            push_field(right, names);
        }
        Expr::InList { operand, .. } | Expr::IsNull { operand, .. } | Expr::Truthy(operand) => {
            push_field(operand, names)
        }
        Expr::IsMissing { field, .. } => push_name(field, names),
    }
}

fn push_field<'a>(operand: &'a Operand, names: &mut Vec<&'a str>) {
    if let Operand::Field(name) = operand {
        push_name(name, names);
    }
}

fn push_name<'a>(name: &'a str, names: &mut Vec<&'a str>) {
    if !names.contains(&name) {
        names.push(name);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Truth {
    True,
    False,
    Unknown,
}

impl From<bool> for Truth {
    fn from(value: bool) -> Self {
        if value { Truth::True } else { Truth::False }
    }
}

impl Truth {
    fn and(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::False, _) | (_, Truth::False) => Truth::False,
            (Truth::True, Truth::True) => Truth::True,
            _ => Truth::Unknown,
        }
    }

    fn or(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::True, _) | (_, Truth::True) => Truth::True,
            (Truth::False, Truth::False) => Truth::False,
            _ => Truth::Unknown,
        }
    }

    fn not(self) -> Truth {
        match self {
            Truth::True => Truth::False,
            Truth::False => Truth::True,
            Truth::Unknown => Truth::Unknown,
        }
    }
}

fn eval(expr: &Expr, record: &Record) -> Truth {
    match expr {
        Expr::Or(l, r) => {
            let left = eval(l, record);
            if left == Truth::True {
                return Truth::True;
            }
            left.or(eval(r, record))
        }
        Expr::And(l, r) => {
            let left = eval(l, record);
            if left == Truth::False {
                return Truth::False;
            }
            left.and(eval(r, record))
        }
        Expr::Not(inner) => eval(inner, record).not(),
        Expr::Compare { left, op, right } => {
            match (resolve(left, record), resolve(right, record)) {
                (Some(l), Some(r)) => compare(l, *op, r).into(),
                _ => Truth::Unknown,
            }
        }
        Expr::InList {
            operand,
            items,
            negated,
        } => match resolve(operand, record) {
            Some(value) => {
                let found = items.iter().any(|item| compare(value, CompareOp::Eq, item));
                (found != *negated).into()
            }
            None => Truth::Unknown,
        },
        Expr::IsNull { operand, negated } => match resolve(operand, record) {
            Some(value) => (value.is_blank() != *negated).into(),
            None => Truth::Unknown,
        },
        Expr::IsMissing { field, negated } => (record.contains(field) == *negated).into(),
        Expr::Truthy(operand) => match resolve(operand, record) {
            Some(value) => is_truthy(value).into(),
            None => Truth::Unknown,
        },
    }
}

fn resolve<'a>(operand: &'a Operand, record: &'a Record) -> Option<&'a Value> {
    match operand {
        Operand::Field(name) => record.get(name),
        Operand::Literal(value) => Some(value),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Boolean(b) => *b,
        Value::String(s) => !s.is_empty() && parse_boolean(s) != Some(false),
        other if other.is_numeric() => other.to_decimal().is_some_and(|d| !d.is_zero()),
        _ => true,
    }
}

/// Typed comparison. Incomparable operands compare false for every operator.
fn compare(left: &Value, op: CompareOp, right: &Value) -> bool {
    if left.is_null() || right.is_null() {
        let both = left.is_null() && right.is_null();
        return match op {
            CompareOp::Eq | CompareOp::EqIgnoreCase => both,
            CompareOp::NotEq => !both,
            _ => false,
        };
    }
    if op == CompareOp::EqIgnoreCase
        && let (Value::String(l), Value::String(r)) = (left, right)
    {
        return l.to_lowercase() == r.to_lowercase();
    }
    match order(left, right) {
        Some(ordering) => match op {
            CompareOp::Eq | CompareOp::EqIgnoreCase => ordering == Ordering::Equal,
            CompareOp::NotEq => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
        },
        None => false,
    }
}

fn order(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        (Value::Boolean(l), Value::Boolean(r)) => Some(l.cmp(r)),
        (Value::Boolean(l), Value::String(r)) => parse_boolean(r).map(|r| l.cmp(&r)),
        (Value::String(l), Value::Boolean(r)) => parse_boolean(l).map(|l| l.cmp(r)),
        (Value::Date(l), Value::Date(r)) => Some(l.cmp(r)),
        (Value::Date(l), Value::String(r)) => as_date(r).map(|r| l.cmp(&r)),
        (Value::String(l), Value::Date(r)) => as_date(l).map(|l| l.cmp(r)),
        (Value::Float(l), Value::Float(r)) => l.partial_cmp(r),
        (l, r) if l.is_numeric() || r.is_numeric() => {
            let l = numeric_operand(l)?;
            let r = numeric_operand(r)?;
            Some(l.cmp(&r))
        }
        _ => None,
    }
}

fn numeric_operand(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => parse_decimal(s),
        other if other.is_numeric() => other.to_decimal(),
        _ => None,
    }
}

fn as_date(value: &str) -> Option<NaiveDate> {
    parse_naive_date(value, DEFAULT_DATE_FORMATS)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Number(Decimal),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Cmp(CompareOp),
    And,
    Or,
    Not,
    In,
    Is,
    Null,
    Missing,
    True,
    False,
    Date,
}

fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, ExpressionError> {
    let error = |offset: usize, message: &str| ExpressionError {
        expression: source.to_string(),
        offset,
        message: message.to_string(),
    };
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let (offset, ch) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);
        match ch {
            c if c.is_whitespace() => {
                i += 1;
            }
            '(' | ')' | '[' | ']' | ',' => {
                let token = match ch {
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '[' => Token::LBracket,
                    ']' => Token::RBracket,
                    _ => Token::Comma,
                };
                tokens.push((token, offset));
                i += 1;
            }
            '=' | '!' | '<' | '>' | '~' | '&' | '|' => {
                let (token, width) = match (ch, next) {
                    ('=', Some('=')) => (Token::Cmp(CompareOp::Eq), 2),
                    ('=', _) => (Token::Cmp(CompareOp::Eq), 1),
                    ('!', Some('=')) => (Token::Cmp(CompareOp::NotEq), 2),
                    ('!', _) => (Token::Not, 1),
                    ('<', Some('=')) => (Token::Cmp(CompareOp::Le), 2),
                    ('<', Some('>')) => (Token::Cmp(CompareOp::NotEq), 2),
                    ('<', _) => (Token::Cmp(CompareOp::Lt), 1),
                    ('>', Some('=')) => (Token::Cmp(CompareOp::Ge), 2),
                    ('>', _) => (Token::Cmp(CompareOp::Gt), 1),
                    ('~', Some('=')) => (Token::Cmp(CompareOp::EqIgnoreCase), 2),
                    ('&', Some('&')) => (Token::And, 2),
                    ('|', Some('|')) => (Token::Or, 2),
                    _ => return Err(error(offset, &format!("unexpected character '{ch}'"))),
                };
                tokens.push((token, offset));
                i += width;
            }
            '\'' | '"' | '`' => {
                let quote = ch;
                let mut text = String::new();
                let mut j = i + 1;
                let mut closed = false;
                while j < chars.len() {
                    let c = chars[j].1;
                    if c == '\\' && j + 1 < chars.len() {
                        text.push(chars[j + 1].1);
                        j += 2;
                        continue;
                    }
                    if c == quote {
                        if chars.get(j + 1).map(|(_, c)| *c) == Some(quote) {
                            text.push(quote);
                            j += 2;
                            continue;
                        }
                        closed = true;
                        break;
                    }
                    text.push(c);
                    j += 1;
                }
                if !closed {
                    return Err(error(offset, "unterminated quoted text"));
                }
                let token = if quote == '`' {
                    Token::Ident(text)
                } else {
                    Token::Str(text)
                };
                tokens.push((token, offset));
                i = j + 1;
            }
            c if c.is_ascii_digit()
                || (c == '-' && next.is_some_and(|n| n.is_ascii_digit() || n == '.'))
                || (c == '.' && next.is_some_and(|n| n.is_ascii_digit())) =>
            {
                let mut j = i + 1;
                while j < chars.len() && (chars[j].1.is_ascii_digit() || chars[j].1 == '.') {
                    j += 1;
                }
                let end = chars.get(j).map(|(o, _)| *o).unwrap_or(source.len());
                let text = &source[offset..end];
                let number = parse_decimal(text)
                    .ok_or_else(|| error(offset, &format!("invalid number '{text}'")))?;
                tokens.push((Token::Number(number), offset));
                i = j;
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut j = i + 1;
                while j < chars.len() && (chars[j].1.is_alphanumeric() || matches!(chars[j].1, '_' | '.')) {
                    j += 1;
                }
                let end = chars.get(j).map(|(o, _)| *o).unwrap_or(source.len());
                let word = &source[offset..end];
                let token = match word.to_ascii_uppercase().as_str() {
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    "NOT" => Token::Not,
                    "IN" => Token::In,
                    "IS" => Token::Is,
                    "NULL" => Token::Null,
                    "MISSING" => Token::Missing,
                    "TRUE" => Token::True,
                    "FALSE" => Token::False,
                    "DATE" => Token::Date,
                    _ => Token::Ident(word.to_string()),
                };
                tokens.push((token, offset));
                i = j;
            }
            _ => return Err(error(offset, &format!("unexpected character '{ch}'"))),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(token, _)| token)
    }

    fn peek_with_offset(&self) -> Option<(&Token, usize)> {
        self.tokens.get(self.pos).map(|(token, offset)| (token, *offset))
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(_, offset)| *offset)
            .unwrap_or(self.source.len())
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(token, _)| token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<(), ExpressionError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error_at(self.offset(), &format!("expected {what}")))
        }
    }

    fn error_at(&self, offset: usize, message: &str) -> ExpressionError {
        ExpressionError {
            expression: self.source.to_string(),
            offset,
            message: message.to_string(),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_unary()?;
        while self.eat(&Token::And) {
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.eat(&Token::Not) {
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        if self.eat(&Token::LParen) {
            let inner = self.parse_or()?;
            self.expect(&Token::RParen, "')'")?;
            return Ok(inner);
        }
        self.parse_predicate()
    }

    fn parse_predicate(&mut self) -> Result<Expr, ExpressionError> {
        let start = self.offset();
        let operand = self.parse_operand()?;
        match self.peek().cloned() {
            Some(Token::Cmp(op)) => {
                self.pos += 1;
                let right = self.parse_operand()?;
                Ok(Expr::Compare {
                    left: operand,
                    op,
                    right,
                })
            }
            Some(Token::In) => {
                self.pos += 1;
                self.parse_in_list(operand, false)
            }
            Some(Token::Not) if self.tokens.get(self.pos + 1).map(|(t, _)| t) == Some(&Token::In) => {
                self.pos += 2;
                self.parse_in_list(operand, true)
            }
            Some(Token::Is) => {
                self.pos += 1;
                let negated = self.eat(&Token::Not);
                match self.advance() {
                    Some(Token::Null) => Ok(Expr::IsNull { operand, negated }),
                    Some(Token::Missing) => match operand {
                        Operand::Field(field) => Ok(Expr::IsMissing { field, negated }),
                        Operand::Literal(_) => {
                            Err(self.error_at(start, "IS MISSING requires a field reference"))
                        }
                    },
                    _ => Err(self.error_at(self.offset(), "expected NULL or MISSING after IS")),
                }
            }
            _ => Ok(Expr::Truthy(operand)),
        }
    }

    fn parse_in_list(&mut self, operand: Operand, negated: bool) -> Result<Expr, ExpressionError> {
        let close = if self.eat(&Token::LBracket) {
            Token::RBracket
        } else if self.eat(&Token::LParen) {
            Token::RParen
        } else {
            return Err(self.error_at(self.offset(), "expected '[' after IN"));
        };
        let mut items = Vec::new();
        loop {
            match self.parse_operand()? {
                Operand::Literal(value) => items.push(value),
                Operand::Field(_) => {
                    return Err(self.error_at(self.offset(), "IN lists may only contain literals"));
                }
            }
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(&close, "closing bracket")?;
            break;
        }
        Ok(Expr::InList {
            operand,
            items,
            negated,
        })
    }

    fn parse_operand(&mut self) -> Result<Operand, ExpressionError> {
        let offset = self.offset();
        match self.advance() {
            Some(Token::Ident(name)) => Ok(Operand::Field(name)),
            Some(Token::Str(text)) => Ok(Operand::Literal(Value::String(text))),
            Some(Token::Number(n)) => Ok(Operand::Literal(Value::Decimal(n))),
            Some(Token::True) => Ok(Operand::Literal(Value::Boolean(true))),
            Some(Token::False) => Ok(Operand::Literal(Value::Boolean(false))),
            Some(Token::Null) => Ok(Operand::Literal(Value::Null)),
            Some(Token::Date) => match self.advance() {
                Some(Token::Str(text)) => as_date(&text)
                    .map(|date| Operand::Literal(Value::Date(date)))
                    .ok_or_else(|| self.error_at(offset, &format!("invalid date literal '{text}'"))),
                _ => Err(self.error_at(offset, "DATE must be followed by a quoted date")),
            },
            Some(other) => Err(self.error_at(offset, &format!("unexpected {}", describe(&other)))),
            None => Err(self.error_at(offset, "unexpected end of expression")),
        }
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Cmp(op) => format!("operator '{}'", op.symbol()),
        Token::RParen => "')'".to_string(),
        Token::RBracket => "']'".to_string(),
        Token::LBracket => "'['".to_string(),
        Token::LParen => "'('".to_string(),
        Token::Comma => "','".to_string(),
        other => format!("{other:?}").to_ascii_uppercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs.iter().cloned().collect()
    }

    fn eval_str(expr: &str, record: &Record) -> bool {
        Condition::parse(expr).expect("expression parses").evaluate(record)
    }

    #[test]
    fn membership_and_equality() {
        let rec = record(&[
            ("CURRENCY", Value::from("JPY")),
            ("PRODUCT_TYPE", Value::from("D")),
        ]);
        assert!(eval_str("CURRENCY == 'JPY' AND PRODUCT_TYPE IN ['D', 'G']", &rec));
        assert!(!eval_str("CURRENCY == 'JPY' AND PRODUCT_TYPE NOT IN ['D', 'G']", &rec));
        assert!(eval_str("CURRENCY != 'USD' && !(PRODUCT_TYPE = 'G')", &rec));
    }

    #[test]
    fn numbers_compare_numerically() {
        let rec = record(&[("FACE_VALUE", Value::from("100000")), ("N", Value::Integer(9))]);
        assert!(eval_str("FACE_VALUE >= 0", &rec));
        assert!(eval_str("N < 10", &rec));
        assert!(!eval_str("N > 10", &rec));
        assert!(eval_str("N == 9.0", &rec));
    }

    #[test]
    fn dates_compare_as_dates() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let rec = record(&[("VALUE_DATE", Value::Date(date))]);
        assert!(eval_str("VALUE_DATE > DATE '2023-12-31'", &rec));
        assert!(eval_str("VALUE_DATE == '15/01/2024'", &rec));
    }

    #[test]
    fn strings_are_case_sensitive_unless_opted_out() {
        let rec = record(&[("STATUS", Value::from("Active"))]);
        assert!(!eval_str("STATUS == 'active'", &rec));
        assert!(eval_str("STATUS ~= 'active'", &rec));
    }

    #[test]
    fn absent_fields_evaluate_false_without_raising() {
        let rec = record(&[("A", Value::from("x"))]);
        assert!(!eval_str("B == 'x'", &rec));
        assert!(!eval_str("NOT (B == 'x')", &rec));
        assert!(!eval_str("B != 'x'", &rec));
        assert!(eval_str("A == 'x' OR B == 'y'", &rec));
        assert!(!eval_str("A == 'x' AND B == 'y'", &rec));
    }

    #[test]
    fn explicit_absence_tests() {
        let rec = record(&[("A", Value::Null)]);
        assert!(eval_str("B IS MISSING", &rec));
        assert!(eval_str("A IS NOT MISSING AND A IS NULL", &rec));
        assert!(!eval_str("A == 'x'", &rec));
        assert!(eval_str("A != 'x'", &rec));
    }

    #[test]
    fn references_are_collected_once() {
        let condition = Condition::parse("A == 1 OR (A > B AND C IS MISSING)").unwrap();
        assert_eq!(condition.references(), vec!["A", "B", "C"]);
    }

    #[test]
    fn malformed_expressions_report_offsets() {
        let err = Condition::parse("A == ").unwrap_err();
        assert_eq!(err.offset, 5);
        assert!(err.message.contains("end of expression"));

        assert!(Condition::parse("A IN ['x'").is_err());
        assert!(Condition::parse("'x' IS MISSING").is_err());
        assert!(Condition::parse("A == 'open").is_err());
        assert!(Condition::parse("A == 1 B").is_err());
        assert!(Condition::parse("A # 1").is_err());
    }

    #[test]
    fn quoted_identifiers_and_keywords() {
        let rec = record(&[("Order ID", Value::from("7")), ("flag", Value::from("yes"))]);
        assert!(eval_str("`Order ID` = 7 and flag", &rec));
        assert!(eval_str("flag == TRUE", &rec));
    }
}
