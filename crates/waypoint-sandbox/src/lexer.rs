//! Script tokenizer.
//!
//! Line and block comments are skipped; positions are tracked per token so
//! compile errors can point at a line.

use crate::outcome::SandboxFailure;

/// Token kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Number(f64),
    Str(String),
    Ident(String),

    // Keywords
    Let,
    If,
    Else,
    For,
    Of,
    In,
    Return,
    True,
    False,
    Null,
    Await,

    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Semicolon,
    Colon,
    Question,

    // Operators
    Assign,
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
}

/// A token with its source line (1-based).
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: u32,
}

/// Tokenize script source.
///
/// # Errors
/// Returns `Compile` on unterminated strings, bad escapes, or stray
/// characters.
pub fn tokenize(source: &str) -> Result<Vec<Token>, SandboxFailure> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut line: u32 = 1;

    macro_rules! push {
        ($tok:expr) => {
            tokens.push(Token { tok: $tok, line })
        };
    }

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\n' => {
                line += 1;
                i += 1;
            }
            ' ' | '\t' | '\r' => i += 1,
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                loop {
                    match (chars.get(i), chars.get(i + 1)) {
                        (Some('*'), Some('/')) => {
                            i += 2;
                            break;
                        }
                        (Some('\n'), _) => {
                            line += 1;
                            i += 1;
                        }
                        (Some(_), _) => i += 1,
                        (None, _) => {
                            return Err(SandboxFailure::Compile(format!(
                                "unterminated block comment starting before line {line}"
                            )))
                        }
                    }
                }
            }
            '(' => {
                push!(Tok::LParen);
                i += 1;
            }
            ')' => {
                push!(Tok::RParen);
                i += 1;
            }
            '{' => {
                push!(Tok::LBrace);
                i += 1;
            }
            '}' => {
                push!(Tok::RBrace);
                i += 1;
            }
            '[' => {
                push!(Tok::LBracket);
                i += 1;
            }
            ']' => {
                push!(Tok::RBracket);
                i += 1;
            }
            ',' => {
                push!(Tok::Comma);
                i += 1;
            }
            '.' => {
                push!(Tok::Dot);
                i += 1;
            }
            ';' => {
                push!(Tok::Semicolon);
                i += 1;
            }
            ':' => {
                push!(Tok::Colon);
                i += 1;
            }
            '?' => {
                push!(Tok::Question);
                i += 1;
            }
            '+' => {
                push!(Tok::Plus);
                i += 1;
            }
            '-' => {
                push!(Tok::Minus);
                i += 1;
            }
            '*' => {
                push!(Tok::Star);
                i += 1;
            }
            '/' => {
                push!(Tok::Slash);
                i += 1;
            }
            '%' => {
                push!(Tok::Percent);
                i += 1;
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    push!(Tok::EqEq);
                    i += 2;
                } else {
                    push!(Tok::Assign);
                    i += 1;
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    push!(Tok::NotEq);
                    i += 2;
                } else {
                    push!(Tok::Bang);
                    i += 1;
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    push!(Tok::Le);
                    i += 2;
                } else {
                    push!(Tok::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    push!(Tok::Ge);
                    i += 2;
                } else {
                    push!(Tok::Gt);
                    i += 1;
                }
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                push!(Tok::AndAnd);
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                push!(Tok::OrOr);
                i += 2;
            }
            '"' | '\'' => {
                let quote = c;
                let start_line = line;
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(SandboxFailure::Compile(format!(
                                "unterminated string on line {start_line}"
                            )))
                        }
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            let escaped = chars.get(i + 1).copied();
                            let replacement = match escaped {
                                Some('n') => '\n',
                                Some('t') => '\t',
                                Some('r') => '\r',
                                Some('\\') => '\\',
                                Some('\'') => '\'',
                                Some('"') => '"',
                                _ => {
                                    return Err(SandboxFailure::Compile(format!(
                                        "bad escape in string on line {start_line}"
                                    )))
                                }
                            };
                            s.push(replacement);
                            i += 2;
                        }
                        Some('\n') => {
                            return Err(SandboxFailure::Compile(format!(
                                "unterminated string on line {start_line}"
                            )))
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                        }
                    }
                }
                push!(Tok::Str(s));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                if chars.get(i) == Some(&'.') && chars.get(i + 1).is_some_and(char::is_ascii_digit)
                {
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let n: f64 = text.parse().map_err(|_| {
                    SandboxFailure::Compile(format!("bad number literal {text} on line {line}"))
                })?;
                push!(Tok::Number(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '$')
                {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let tok = match text.as_str() {
                    "let" | "const" | "var" => Tok::Let,
                    "if" => Tok::If,
                    "else" => Tok::Else,
                    "for" => Tok::For,
                    "of" => Tok::Of,
                    "in" => Tok::In,
                    "return" => Tok::Return,
                    "true" => Tok::True,
                    "false" => Tok::False,
                    "null" | "undefined" => Tok::Null,
                    "await" => Tok::Await,
                    _ => Tok::Ident(text),
                };
                push!(tok);
            }
            other => {
                return Err(SandboxFailure::Compile(format!(
                    "unexpected character {other:?} on line {line}"
                )))
            }
        }
    }

    Ok(tokens)
}
