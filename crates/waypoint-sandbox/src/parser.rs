//! Recursive-descent parser for the curated script subset.
//!
//! Statements: `let`, assignment, `if`/`else`, `for (x of list)`,
//! `return`, and bare expressions. Semicolons are optional separators.
//! There are no user-defined functions and no `while`, so every script
//! terminates structurally; the interpreter's deadline is a backstop.

use crate::ast::{BinaryOp, Expr, Script, Stmt, UnaryOp};
use crate::lexer::{tokenize, Tok, Token};
use crate::outcome::SandboxFailure;

/// Parse script source into an AST.
///
/// # Errors
/// Returns `Compile` with a line-tagged message.
pub fn parse(source: &str) -> Result<Script, SandboxFailure> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let mut body = Vec::new();
    while !parser.at_end() {
        body.push(parser.statement()?);
        parser.skip_semicolons();
    }
    Ok(Script { body })
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|t| &t.tok)
    }

    fn peek_ahead(&self, n: usize) -> Option<&Tok> {
        self.tokens.get(self.pos + n).map(|t| &t.tok)
    }

    fn line(&self) -> u32 {
        self.tokens
            .get(self.pos.min(self.tokens.len().saturating_sub(1)))
            .map_or(0, |t| t.line)
    }

    fn bump(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).map(|t| t.tok.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Tok, what: &str) -> Result<(), SandboxFailure> {
        if self.eat(tok) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {what}")))
        }
    }

    fn error(&self, message: &str) -> SandboxFailure {
        SandboxFailure::Compile(format!("{message} on line {}", self.line()))
    }

    fn skip_semicolons(&mut self) {
        while self.eat(&Tok::Semicolon) {}
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn statement(&mut self) -> Result<Stmt, SandboxFailure> {
        let line = self.line();
        match self.peek() {
            Some(Tok::Let) => {
                self.pos += 1;
                let name = self.ident("variable name")?;
                self.expect(&Tok::Assign, "= after variable name")?;
                let value = self.expression()?;
                Ok(Stmt::Let { name, value, line })
            }
            Some(Tok::If) => self.if_statement(),
            Some(Tok::For) => self.for_statement(),
            Some(Tok::Return) => {
                self.pos += 1;
                let value = if self.at_end()
                    || matches!(self.peek(), Some(Tok::Semicolon | Tok::RBrace))
                {
                    None
                } else {
                    Some(self.expression()?)
                };
                Ok(Stmt::Return { value, line })
            }
            // `name = expr` only when the next two tokens say so; anything
            // else is an expression statement.
            Some(Tok::Ident(_)) if self.peek_ahead(1) == Some(&Tok::Assign) => {
                let name = self.ident("variable name")?;
                self.pos += 1; // '='
                let value = self.expression()?;
                Ok(Stmt::Assign { name, value, line })
            }
            Some(_) => {
                let expr = self.expression()?;
                Ok(Stmt::Expr { expr, line })
            }
            None => Err(self.error("unexpected end of script")),
        }
    }

    fn if_statement(&mut self) -> Result<Stmt, SandboxFailure> {
        let line = self.line();
        self.expect(&Tok::If, "if")?;
        self.expect(&Tok::LParen, "( after if")?;
        let condition = self.expression()?;
        self.expect(&Tok::RParen, ") after condition")?;
        let then_branch = self.block()?;
        let else_branch = if self.eat(&Tok::Else) {
            if self.peek() == Some(&Tok::If) {
                Some(vec![self.if_statement()?])
            } else {
                Some(self.block()?)
            }
        } else {
            None
        };
        Ok(Stmt::If {
            condition,
            then_branch,
            else_branch,
            line,
        })
    }

    fn for_statement(&mut self) -> Result<Stmt, SandboxFailure> {
        let line = self.line();
        self.expect(&Tok::For, "for")?;
        self.expect(&Tok::LParen, "( after for")?;
        let _ = self.eat(&Tok::Let);
        let binding = self.ident("loop variable")?;
        if !self.eat(&Tok::Of) && !self.eat(&Tok::In) {
            return Err(self.error("expected of in for loop"));
        }
        let iterable = self.expression()?;
        self.expect(&Tok::RParen, ") after loop iterable")?;
        let body = self.block()?;
        Ok(Stmt::ForOf {
            binding,
            iterable,
            body,
            line,
        })
    }

    fn block(&mut self) -> Result<Vec<Stmt>, SandboxFailure> {
        self.expect(&Tok::LBrace, "{ to open a block")?;
        let mut body = Vec::new();
        loop {
            self.skip_semicolons();
            if self.eat(&Tok::RBrace) {
                return Ok(body);
            }
            if self.at_end() {
                return Err(self.error("unclosed block"));
            }
            body.push(self.statement()?);
        }
    }

    fn ident(&mut self, what: &str) -> Result<String, SandboxFailure> {
        match self.bump() {
            Some(Tok::Ident(name)) => Ok(name),
            _ => Err(self.error(&format!("expected {what}"))),
        }
    }

    // ------------------------------------------------------------------
    // Expressions (precedence climbing)
    // ------------------------------------------------------------------

    fn expression(&mut self) -> Result<Expr, SandboxFailure> {
        let condition = self.binary(0)?;
        if self.eat(&Tok::Question) {
            let then = self.expression()?;
            self.expect(&Tok::Colon, ": in ternary")?;
            let otherwise = self.expression()?;
            return Ok(Expr::Ternary {
                condition: Box::new(condition),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(condition)
    }

    fn binary(&mut self, min_level: u8) -> Result<Expr, SandboxFailure> {
        let mut lhs = self.unary()?;
        while let Some(tok) = self.peek() {
            let Some((op, level)) = binary_op(tok) else {
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

    fn unary(&mut self) -> Result<Expr, SandboxFailure> {
        match self.peek() {
            Some(Tok::Minus) => {
                self.pos += 1;
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.unary()?)))
            }
            Some(Tok::Bang) => {
                self.pos += 1;
                Ok(Expr::Unary(UnaryOp::Not, Box::new(self.unary()?)))
            }
            Some(Tok::Await) => {
                self.pos += 1;
                Ok(Expr::Await(Box::new(self.unary()?)))
            }
            _ => self.postfix(),
        }
    }

    /// Member access, indexing, and calls bind tightest.
    fn postfix(&mut self) -> Result<Expr, SandboxFailure> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&Tok::Dot) {
                let property = self.ident("property name")?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                };
            } else if self.eat(&Tok::LBracket) {
                let index = self.expression()?;
                self.expect(&Tok::RBracket, "] after index")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.peek() == Some(&Tok::LParen) {
                self.pos += 1;
                let mut args = Vec::new();
                if self.peek() != Some(&Tok::RParen) {
                    loop {
                        args.push(self.expression()?);
                        if !self.eat(&Tok::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&Tok::RParen, ") after arguments")?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, SandboxFailure> {
        match self.bump() {
            Some(Tok::Number(n)) => Ok(Expr::Number(n)),
            Some(Tok::Str(s)) => Ok(Expr::Str(s)),
            Some(Tok::True) => Ok(Expr::Bool(true)),
            Some(Tok::False) => Ok(Expr::Bool(false)),
            Some(Tok::Null) => Ok(Expr::Null),
            Some(Tok::Ident(name)) => Ok(Expr::Ident(name)),
            Some(Tok::LParen) => {
                let inner = self.expression()?;
                self.expect(&Tok::RParen, "closing parenthesis")?;
                Ok(inner)
            }
            Some(Tok::LBracket) => {
                let mut items = Vec::new();
                if self.peek() != Some(&Tok::RBracket) {
                    loop {
                        items.push(self.expression()?);
                        if !self.eat(&Tok::Comma) {
                            break;
                        }
                        // Trailing comma
                        if self.peek() == Some(&Tok::RBracket) {
                            break;
                        }
                    }
                }
                self.expect(&Tok::RBracket, "] to close list")?;
                Ok(Expr::List(items))
            }
            Some(Tok::LBrace) => {
                let mut entries = Vec::new();
                if self.peek() != Some(&Tok::RBrace) {
                    loop {
                        let key = match self.bump() {
                            Some(Tok::Ident(name)) => name,
                            Some(Tok::Str(s)) => s,
                            _ => return Err(self.error("expected map key")),
                        };
                        self.expect(&Tok::Colon, ": after map key")?;
                        let value = self.expression()?;
                        entries.push((key, value));
                        if !self.eat(&Tok::Comma) {
                            break;
                        }
                        if self.peek() == Some(&Tok::RBrace) {
                            break;
                        }
                    }
                }
                self.expect(&Tok::RBrace, "} to close map")?;
                Ok(Expr::Map(entries))
            }
            other => Err(self.error(&format!("unexpected token {other:?}"))),
        }
    }
}

const fn binary_op(tok: &Tok) -> Option<(BinaryOp, u8)> {
    match tok {
        Tok::OrOr => Some((BinaryOp::Or, 1)),
        Tok::AndAnd => Some((BinaryOp::And, 2)),
        Tok::EqEq => Some((BinaryOp::Eq, 3)),
        Tok::NotEq => Some((BinaryOp::Ne, 3)),
        Tok::Lt => Some((BinaryOp::Lt, 4)),
        Tok::Le => Some((BinaryOp::Le, 4)),
        Tok::Gt => Some((BinaryOp::Gt, 4)),
        Tok::Ge => Some((BinaryOp::Ge, 4)),
        Tok::Plus => Some((BinaryOp::Add, 5)),
        Tok::Minus => Some((BinaryOp::Sub, 5)),
        Tok::Star => Some((BinaryOp::Mul, 6)),
        Tok::Slash => Some((BinaryOp::Div, 6)),
        Tok::Percent => Some((BinaryOp::Rem, 6)),
        _ => None,
    }
}
