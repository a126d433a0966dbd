//! The computed-metric expression language.
//!
//! A deliberately tiny, pure language: literals, references to other metric
//! names, arithmetic, comparisons, boolean operators, a ternary, and a small
//! function table. Expressions are parsed once at template save time and
//! evaluated against a `name -> value` environment at read time.
//!
//! Null propagation: a missing reference evaluates to null, and any
//! arithmetic or comparison over null is null. Type errors (multiplying a
//! string, calling an unknown function) are evaluation errors reported per
//! metric, not nulls.

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;

/// Expression parse or evaluation failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExprError {
    /// The expression text is malformed
    #[error("parse error: {0}")]
    Parse(String),
    /// The expression failed against the current environment
    #[error("evaluation error: {0}")]
    Eval(String),
}

/// Binary operators, loosest to tightest binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    /// Reference to another metric by name
    Ref(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

impl Expr {
    /// Parse an expression from source text.
    ///
    /// # Errors
    /// Returns `Parse` if the text is malformed.
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        let tokens = lex(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.expression()?;
        if parser.pos != parser.tokens.len() {
            return Err(ExprError::Parse(format!(
                "unexpected trailing input at token {}",
                parser.pos
            )));
        }
        Ok(expr)
    }

    /// Every metric name this expression references.
    #[must_use]
    pub fn references(&self) -> BTreeSet<String> {
        let mut refs = BTreeSet::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references(&self, refs: &mut BTreeSet<String>) {
        match self {
            Self::Ref(name) => {
                refs.insert(name.clone());
            }
            Self::Unary(_, inner) => inner.collect_references(refs),
            Self::Binary(_, lhs, rhs) => {
                lhs.collect_references(refs);
                rhs.collect_references(refs);
            }
            Self::Ternary(cond, then, otherwise) => {
                cond.collect_references(refs);
                then.collect_references(refs);
                otherwise.collect_references(refs);
            }
            Self::Call(_, args) => {
                for arg in args {
                    arg.collect_references(refs);
                }
            }
            Self::Number(_) | Self::Str(_) | Self::Bool(_) | Self::Null => {}
        }
    }

    /// Evaluate against the environment. Missing references are null.
    ///
    /// # Errors
    /// Returns `Eval` on type errors, division by zero, or unknown functions.
    pub fn eval(&self, env: &HashMap<String, Value>) -> Result<Value, ExprError> {
        match self {
            Self::Number(n) => Ok(number(*n)),
            Self::Str(s) => Ok(Value::String(s.clone())),
            Self::Bool(b) => Ok(Value::Bool(*b)),
            Self::Null => Ok(Value::Null),
            Self::Ref(name) => Ok(env.get(name).cloned().unwrap_or(Value::Null)),
            Self::Unary(op, inner) => {
                let value = inner.eval(env)?;
                match (op, value) {
                    (_, Value::Null) => Ok(Value::Null),
                    (UnaryOp::Neg, value) => {
                        let n = as_number(&value, "negation")?;
                        Ok(number(-n))
                    }
                    (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                    (UnaryOp::Not, other) => {
                        Err(ExprError::Eval(format!("cannot apply ! to {}", kind(&other))))
                    }
                }
            }
            Self::Binary(op, lhs, rhs) => eval_binary(*op, lhs, rhs, env),
            Self::Ternary(cond, then, otherwise) => match cond.eval(env)? {
                Value::Null => Ok(Value::Null),
                Value::Bool(true) => then.eval(env),
                Value::Bool(false) => otherwise.eval(env),
                other => Err(ExprError::Eval(format!(
                    "ternary condition must be boolean, got {}",
                    kind(&other)
                ))),
            },
            Self::Call(name, args) => eval_call(name, args, env),
        }
    }
}

fn eval_binary(
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    env: &HashMap<String, Value>,
) -> Result<Value, ExprError> {
    let left = lhs.eval(env)?;

    // Short-circuit boolean operators before evaluating the right side.
    match op {
        BinaryOp::And => {
            return match left {
                Value::Null => Ok(Value::Null),
                Value::Bool(false) => Ok(Value::Bool(false)),
                Value::Bool(true) => rhs.eval(env),
                other => Err(ExprError::Eval(format!("cannot && {}", kind(&other)))),
            };
        }
        BinaryOp::Or => {
            return match left {
                Value::Null => Ok(Value::Null),
                Value::Bool(true) => Ok(Value::Bool(true)),
                Value::Bool(false) => rhs.eval(env),
                other => Err(ExprError::Eval(format!("cannot || {}", kind(&other)))),
            };
        }
        _ => {}
    }

    let right = rhs.eval(env)?;

    match op {
        BinaryOp::Eq => Ok(Value::Bool(left == right)),
        BinaryOp::Ne => Ok(Value::Bool(left != right)),
        _ => {
            if left.is_null() || right.is_null() {
                return Ok(Value::Null);
            }
            let a = as_number(&left, "arithmetic")?;
            let b = as_number(&right, "arithmetic")?;
            match op {
                BinaryOp::Add => Ok(number(a + b)),
                BinaryOp::Sub => Ok(number(a - b)),
                BinaryOp::Mul => Ok(number(a * b)),
                BinaryOp::Div => {
                    if b == 0.0 {
                        Err(ExprError::Eval("division by zero".into()))
                    } else {
                        Ok(number(a / b))
                    }
                }
                BinaryOp::Rem => {
                    if b == 0.0 {
                        Err(ExprError::Eval("division by zero".into()))
                    } else {
                        Ok(number(a % b))
                    }
                }
                BinaryOp::Lt => Ok(Value::Bool(a < b)),
                BinaryOp::Le => Ok(Value::Bool(a <= b)),
                BinaryOp::Gt => Ok(Value::Bool(a > b)),
                BinaryOp::Ge => Ok(Value::Bool(a >= b)),
                BinaryOp::And | BinaryOp::Or | BinaryOp::Eq | BinaryOp::Ne => unreachable!(),
            }
        }
    }
}

fn eval_call(name: &str, args: &[Expr], env: &HashMap<String, Value>) -> Result<Value, ExprError> {
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        values.push(arg.eval(env)?);
    }

    match name {
        "min" | "max" => {
            if values.len() < 2 {
                return Err(ExprError::Eval(format!("{name} needs at least 2 arguments")));
            }
            if values.iter().any(Value::is_null) {
                return Ok(Value::Null);
            }
            let mut best = as_number(&values[0], name)?;
            for value in &values[1..] {
                let n = as_number(value, name)?;
                best = if name == "min" { best.min(n) } else { best.max(n) };
            }
            Ok(number(best))
        }
        "abs" | "round" => {
            let [value] = values.as_slice() else {
                return Err(ExprError::Eval(format!("{name} takes exactly 1 argument")));
            };
            if value.is_null() {
                return Ok(Value::Null);
            }
            let n = as_number(value, name)?;
            Ok(number(if name == "abs" { n.abs() } else { n.round() }))
        }
        "parseTime" => {
            let [value] = values.as_slice() else {
                return Err(ExprError::Eval("parseTime takes exactly 1 argument".into()));
            };
            match value {
                Value::Null => Ok(Value::Null),
                Value::String(s) => Ok(waypoint_core::parse_time(s)
                    .map_or(Value::Null, |minutes| number(minutes as f64))),
                other => Err(ExprError::Eval(format!(
                    "parseTime expects a time string, got {}",
                    kind(other)
                ))),
            }
        }
        other => Err(ExprError::Eval(format!("unknown function {other}"))),
    }
}

fn number(n: f64) -> Value {
    serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
}

fn as_number(value: &Value, context: &str) -> Result<f64, ExprError> {
    value
        .as_f64()
        .ok_or_else(|| ExprError::Eval(format!("{context} expects a number, got {}", kind(value))))
}

const fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    Question,
    Colon,
    Comma,
    LParen,
    RParen,
}

fn lex(source: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '?' => {
                tokens.push(Token::Question);
                i += 1;
            }
            ':' => {
                tokens.push(Token::Colon);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::EqEq);
                    i += 2;
                } else {
                    return Err(ExprError::Parse("single = is not assignment here".into()));
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::NotEq);
                    i += 2;
                } else {
                    tokens.push(Token::Bang);
                    i += 1;
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push(Token::AndAnd);
                    i += 2;
                } else {
                    return Err(ExprError::Parse("expected &&".into()));
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    tokens.push(Token::OrOr);
                    i += 2;
                } else {
                    return Err(ExprError::Parse("expected ||".into()));
                }
            }
            '"' | '\'' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(ExprError::Parse("unterminated string".into())),
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n: f64 = text
                    .parse()
                    .map_err(|_| ExprError::Parse(format!("bad number literal {text}")))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(Token::Ident(text));
            }
            other => return Err(ExprError::Parse(format!("unexpected character {other}"))),
        }
    }

    Ok(tokens)
}

// ============================================================================
// Parser (precedence climbing)
// ============================================================================

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<(), ExprError> {
        if self.peek() == Some(token) {
            self.pos += 1;
            Ok(())
        } else {
            Err(ExprError::Parse(format!("expected {what}")))
        }
    }

    /// expression := or_expr ('?' expression ':' expression)?
    fn expression(&mut self) -> Result<Expr, ExprError> {
        let condition = self.binary(0)?;
        if self.peek() == Some(&Token::Question) {
            self.pos += 1;
            let then = self.expression()?;
            self.expect(&Token::Colon, ": in ternary")?;
            let otherwise = self.expression()?;
            return Ok(Expr::Ternary(
                Box::new(condition),
                Box::new(then),
                Box::new(otherwise),
            ));
        }
        Ok(condition)
    }

    fn binary(&mut self, min_level: u8) -> Result<Expr, ExprError> {
        let mut lhs = self.unary()?;

        while let Some(token) = self.peek() {
            let Some((op, level)) = binary_op(token) else {
                break;
            };
            if level < min_level {
                break;
            }
            self.pos += 1;
            let rhs = self.binary(level + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }

        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.unary()?)))
            }
            Some(Token::Bang) => {
                self.pos += 1;
                Ok(Expr::Unary(UnaryOp::Not, Box::new(self.unary()?)))
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        match self.bump() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::LParen) => {
                let inner = self.expression()?;
                self.expect(&Token::RParen, "closing parenthesis")?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                "null" => Ok(Expr::Null),
                _ => {
                    if self.peek() == Some(&Token::LParen) {
                        self.pos += 1;
                        let mut args = Vec::new();
                        if self.peek() != Some(&Token::RParen) {
                            loop {
                                args.push(self.expression()?);
                                if self.peek() == Some(&Token::Comma) {
                                    self.pos += 1;
                                } else {
                                    break;
                                }
                            }
                        }
                        self.expect(&Token::RParen, "closing parenthesis")?;
                        Ok(Expr::Call(name, args))
                    } else {
                        Ok(Expr::Ref(name))
                    }
                }
            },
            other => Err(ExprError::Parse(format!("unexpected token {other:?}"))),
        }
    }
}

const fn binary_op(token: &Token) -> Option<(BinaryOp, u8)> {
    match token {
        Token::OrOr => Some((BinaryOp::Or, 1)),
        Token::AndAnd => Some((BinaryOp::And, 2)),
        Token::EqEq => Some((BinaryOp::Eq, 3)),
        Token::NotEq => Some((BinaryOp::Ne, 3)),
        Token::Lt => Some((BinaryOp::Lt, 4)),
        Token::Le => Some((BinaryOp::Le, 4)),
        Token::Gt => Some((BinaryOp::Gt, 4)),
        Token::Ge => Some((BinaryOp::Ge, 4)),
        Token::Plus => Some((BinaryOp::Add, 5)),
        Token::Minus => Some((BinaryOp::Sub, 5)),
        Token::Star => Some((BinaryOp::Mul, 6)),
        Token::Slash => Some((BinaryOp::Div, 6)),
        Token::Percent => Some((BinaryOp::Rem, 6)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(source: &str, env: &[(&str, Value)]) -> Result<Value, ExprError> {
        let env: HashMap<String, Value> = env
            .iter()
            .map(|(name, value)| ((*name).to_string(), value.clone()))
            .collect();
        Expr::parse(source)?.eval(&env)
    }

    #[test]
    fn test_arithmetic_precedence() {
        assert_eq!(eval("1 + 2 * 3", &[]).expect("eval"), json!(7.0));
        assert_eq!(eval("(1 + 2) * 3", &[]).expect("eval"), json!(9.0));
        assert_eq!(eval("10 % 3", &[]).expect("eval"), json!(1.0));
        assert_eq!(eval("-2 + 5", &[]).expect("eval"), json!(3.0));
    }

    #[test]
    fn test_references() {
        let result = eval("sleep / 60", &[("sleep", json!(450))]).expect("eval");
        assert_eq!(result, json!(7.5));
    }

    #[test]
    fn test_missing_reference_is_null_and_propagates() {
        assert_eq!(eval("sleep / 60", &[]).expect("eval"), Value::Null);
        assert_eq!(eval("1 + nothing", &[]).expect("eval"), Value::Null);
        assert_eq!(eval("nothing > 3", &[]).expect("eval"), Value::Null);
        assert_eq!(eval("min(1, nothing)", &[]).expect("eval"), Value::Null);
    }

    #[test]
    fn test_comparisons_and_logic() {
        assert_eq!(eval("3 > 2 && 1 <= 1", &[]).expect("eval"), json!(true));
        assert_eq!(eval("3 == 4 || false", &[]).expect("eval"), json!(false));
        assert_eq!(eval("!(2 < 1)", &[]).expect("eval"), json!(true));
        assert_eq!(
            eval("mood == 'good'", &[("mood", json!("good"))]).expect("eval"),
            json!(true)
        );
    }

    #[test]
    fn test_ternary() {
        let env = [("steps", json!(12000))];
        assert_eq!(
            eval("steps >= 10000 ? 1 : 0", &env).expect("eval"),
            json!(1.0)
        );
        assert_eq!(eval("steps >= 10000 ? 1 : 0", &[]).expect("eval"), Value::Null);
    }

    #[test]
    fn test_functions() {
        assert_eq!(eval("min(3, 1, 2)", &[]).expect("eval"), json!(1.0));
        assert_eq!(eval("max(3, 1, 2)", &[]).expect("eval"), json!(3.0));
        assert_eq!(eval("abs(0 - 4)", &[]).expect("eval"), json!(4.0));
        assert_eq!(eval("round(2.4)", &[]).expect("eval"), json!(2.0));
        assert_eq!(
            eval("parseTime(sleep) / 60", &[("sleep", json!("07:30"))]).expect("eval"),
            json!(7.5)
        );
        assert_eq!(
            eval("parseTime('garbage')", &[]).expect("eval"),
            Value::Null
        );
    }

    #[test]
    fn test_division_by_zero_is_error() {
        assert!(matches!(eval("1 / 0", &[]), Err(ExprError::Eval(_))));
    }

    #[test]
    fn test_type_errors() {
        assert!(matches!(
            eval("'a' * 2", &[]),
            Err(ExprError::Eval(_))
        ));
        assert!(matches!(eval("unknownFn(1)", &[]), Err(ExprError::Eval(_))));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(Expr::parse("1 +"), Err(ExprError::Parse(_))));
        assert!(matches!(Expr::parse("(1 + 2"), Err(ExprError::Parse(_))));
        assert!(matches!(Expr::parse("a = 2"), Err(ExprError::Parse(_))));
        assert!(matches!(Expr::parse("'open"), Err(ExprError::Parse(_))));
    }

    #[test]
    fn test_references_collection() {
        let expr = Expr::parse("parseTime(sleep) / 60 + min(mood, energy)").expect("parse");
        let refs = expr.references();
        assert_eq!(
            refs.into_iter().collect::<Vec<_>>(),
            vec!["energy", "mood", "sleep"]
        );
    }
}
