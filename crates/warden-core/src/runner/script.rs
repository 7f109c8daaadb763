//! The tool-script language.
//!
//! The model emits snippets in a deliberately small, deterministic language:
//! `let` bindings, JSON literals with embedded variable references, tool
//! calls on the `tools.*` surface, `join(...)` for concurrent calls, and
//! `return`. Nothing else parses, which is most of the sandbox: no loops,
//! no functions, no ambient authority.
//!
//! ```text
//! let booked = tools.calendar.update({ "title": "Dinner", "start": "..." });
//! return { "id": booked.event_id };
//! ```

use serde_json::Value;
use thiserror::Error;

const MAX_STATEMENTS: usize = 256;
const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Let { name: String, expr: Expr },
    Expr(Expr),
    Return(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A scalar JSON literal (string, number, bool, null).
    Literal(Value),
    /// Object literal; values may be arbitrary expressions.
    Object(Vec<(String, Expr)>),
    Array(Vec<Expr>),
    /// Variable reference with an optional field path: `x`, `x.field.sub`.
    Ref { name: String, path: Vec<String> },
    /// Tool invocation: `tools.calendar.update({...})`.
    Call { tool_path: String, arg: Box<Expr> },
    /// Concurrent evaluation: `join(expr, expr, ...)`.
    Join(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parse error at line {line}, column {column}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

pub fn parse(source: &str) -> Result<Program, ParseError> {
    let tokens = lex(source)?;
    Parser { tokens, pos: 0 }.program()
}

// ── Lexer ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    Str(String),
    Num(serde_json::Number),
    Punct(char),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    line: usize,
    column: usize,
}

fn lex(source: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;
    let mut line = 1;
    let mut column = 1;

    let error = |line: usize, column: usize, message: String| ParseError {
        line,
        column,
        message,
    };

    while i < chars.len() {
        let c = chars[i];

        if c == '\n' {
            i += 1;
            line += 1;
            column = 1;
            continue;
        }
        if c.is_whitespace() {
            i += 1;
            column += 1;
            continue;
        }
        // Line comments.
        if c == '/' && chars.get(i + 1) == Some(&'/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        let token_line = line;
        let token_column = column;

        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
                column += 1;
            }
            let ident: String = chars[start..i].iter().collect();
            tokens.push(Token {
                kind: TokenKind::Ident(ident),
                line: token_line,
                column: token_column,
            });
            continue;
        }

        if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit()))
        {
            let start = i;
            if chars[i] == '-' {
                i += 1;
                column += 1;
            }
            while i < chars.len()
                && (chars[i].is_ascii_digit()
                    || chars[i] == '.'
                    || chars[i] == 'e'
                    || chars[i] == 'E'
                    || chars[i] == '+'
                    || (chars[i] == '-' && matches!(chars[i - 1], 'e' | 'E')))
            {
                i += 1;
                column += 1;
            }
            let raw: String = chars[start..i].iter().collect();
            let number: serde_json::Number = serde_json::from_str(&raw).map_err(|_| {
                error(token_line, token_column, format!("invalid number '{}'", raw))
            })?;
            tokens.push(Token {
                kind: TokenKind::Num(number),
                line: token_line,
                column: token_column,
            });
            continue;
        }

        if c == '"' {
            i += 1;
            column += 1;
            let mut text = String::new();
            loop {
                let Some(&c) = chars.get(i) else {
                    return Err(error(token_line, token_column, "unterminated string".into()));
                };
                i += 1;
                column += 1;
                match c {
                    '"' => break,
                    '\\' => {
                        let Some(&escaped) = chars.get(i) else {
                            return Err(error(
                                token_line,
                                token_column,
                                "unterminated escape".into(),
                            ));
                        };
                        i += 1;
                        column += 1;
                        match escaped {
                            '"' => text.push('"'),
                            '\\' => text.push('\\'),
                            '/' => text.push('/'),
                            'n' => text.push('\n'),
                            't' => text.push('\t'),
                            'r' => text.push('\r'),
                            'u' => {
                                let hex: String = chars.get(i..i + 4).map(|s| s.iter().collect()).unwrap_or_default();
                                let code = u32::from_str_radix(&hex, 16).map_err(|_| {
                                    error(line, column, format!("invalid \\u escape '{}'", hex))
                                })?;
                                let ch = char::from_u32(code).ok_or_else(|| {
                                    error(line, column, format!("invalid codepoint {:x}", code))
                                })?;
                                text.push(ch);
                                i += 4;
                                column += 4;
                            }
                            other => {
                                return Err(error(
                                    line,
                                    column,
                                    format!("unsupported escape '\\{}'", other),
                                ));
                            }
                        }
                    }
                    '\n' => {
                        return Err(error(token_line, token_column, "unterminated string".into()));
                    }
                    other => text.push(other),
                }
            }
            tokens.push(Token {
                kind: TokenKind::Str(text),
                line: token_line,
                column: token_column,
            });
            continue;
        }

        if "{}[](),:;.=".contains(c) {
            tokens.push(Token {
                kind: TokenKind::Punct(c),
                line: token_line,
                column: token_column,
            });
            i += 1;
            column += 1;
            continue;
        }

        return Err(error(
            token_line,
            token_column,
            format!("unexpected character '{}'", c),
        ));
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        line,
        column,
    });
    Ok(tokens)
}

// ── Parser ─────────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn program(mut self) -> Result<Program, ParseError> {
        let mut stmts = Vec::new();
        while !self.at_eof() {
            if stmts.len() >= MAX_STATEMENTS {
                return Err(self.error("too many statements"));
            }
            stmts.push(self.statement()?);
        }
        Ok(Program { stmts })
    }

    fn statement(&mut self) -> Result<Stmt, ParseError> {
        if self.eat_keyword("let") {
            let name = self.expect_ident()?;
            if matches!(name.as_str(), "tools" | "join" | "let" | "return") {
                return Err(self.error(&format!("'{}' is reserved", name)));
            }
            self.expect_punct('=')?;
            let expr = self.expression(0)?;
            self.expect_punct(';')?;
            return Ok(Stmt::Let { name, expr });
        }
        if self.eat_keyword("return") {
            let expr = self.expression(0)?;
            self.expect_punct(';')?;
            return Ok(Stmt::Return(expr));
        }
        let expr = self.expression(0)?;
        self.expect_punct(';')?;
        Ok(Stmt::Expr(expr))
    }

    fn expression(&mut self, depth: usize) -> Result<Expr, ParseError> {
        if depth > MAX_DEPTH {
            return Err(self.error("expression nesting too deep"));
        }

        match self.peek_kind().clone() {
            TokenKind::Punct('{') => self.object(depth),
            TokenKind::Punct('[') => self.array(depth),
            TokenKind::Str(text) => {
                self.advance();
                Ok(Expr::Literal(Value::String(text)))
            }
            TokenKind::Num(number) => {
                self.advance();
                Ok(Expr::Literal(Value::Number(number)))
            }
            TokenKind::Ident(ident) => match ident.as_str() {
                "true" => {
                    self.advance();
                    Ok(Expr::Literal(Value::Bool(true)))
                }
                "false" => {
                    self.advance();
                    Ok(Expr::Literal(Value::Bool(false)))
                }
                "null" => {
                    self.advance();
                    Ok(Expr::Literal(Value::Null))
                }
                "tools" => self.tool_call(depth),
                "join" => self.join(depth),
                _ => {
                    self.advance();
                    let mut path = Vec::new();
                    while self.eat_punct('.') {
                        path.push(self.expect_ident()?);
                    }
                    Ok(Expr::Ref { name: ident, path })
                }
            },
            other => Err(self.error(&format!("unexpected token {:?}", other))),
        }
    }

    fn tool_call(&mut self, depth: usize) -> Result<Expr, ParseError> {
        self.advance(); // `tools`
        let mut segments = Vec::new();
        while self.eat_punct('.') {
            segments.push(self.expect_ident()?);
        }
        if segments.is_empty() {
            return Err(self.error("expected tool path after 'tools'"));
        }
        self.expect_punct('(')?;
        let arg = if self.check_punct(')') {
            Expr::Literal(Value::Null)
        } else {
            self.expression(depth + 1)?
        };
        self.expect_punct(')')?;
        Ok(Expr::Call {
            tool_path: segments.join("."),
            arg: Box::new(arg),
        })
    }

    fn join(&mut self, depth: usize) -> Result<Expr, ParseError> {
        self.advance(); // `join`
        self.expect_punct('(')?;
        let mut parts = Vec::new();
        if !self.check_punct(')') {
            loop {
                parts.push(self.expression(depth + 1)?);
                if !self.eat_punct(',') {
                    break;
                }
            }
        }
        self.expect_punct(')')?;
        if parts.is_empty() {
            return Err(self.error("join requires at least one expression"));
        }
        Ok(Expr::Join(parts))
    }

    fn object(&mut self, depth: usize) -> Result<Expr, ParseError> {
        self.expect_punct('{')?;
        let mut fields = Vec::new();
        if !self.check_punct('}') {
            loop {
                // JSON-style quoted keys and JS-style bare keys both parse.
                let key = match self.peek_kind().clone() {
                    TokenKind::Str(text) => {
                        self.advance();
                        text
                    }
                    TokenKind::Ident(ident) => {
                        self.advance();
                        ident
                    }
                    other => {
                        return Err(self.error(&format!("expected object key, got {:?}", other)));
                    }
                };
                self.expect_punct(':')?;
                let value = self.expression(depth + 1)?;
                fields.push((key, value));
                if !self.eat_punct(',') {
                    break;
                }
                // Trailing comma.
                if self.check_punct('}') {
                    break;
                }
            }
        }
        self.expect_punct('}')?;
        Ok(Expr::Object(fields))
    }

    fn array(&mut self, depth: usize) -> Result<Expr, ParseError> {
        self.expect_punct('[')?;
        let mut items = Vec::new();
        if !self.check_punct(']') {
            loop {
                items.push(self.expression(depth + 1)?);
                if !self.eat_punct(',') {
                    break;
                }
                if self.check_punct(']') {
                    break;
                }
            }
        }
        self.expect_punct(']')?;
        Ok(Expr::Array(items))
    }

    // ── Token helpers ──────────────────────────────────────────────

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek_kind(), TokenKind::Ident(ident) if ident == keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_punct(&mut self, punct: char) -> bool {
        if self.check_punct(punct) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn check_punct(&self, punct: char) -> bool {
        matches!(self.peek_kind(), TokenKind::Punct(c) if *c == punct)
    }

    fn expect_punct(&mut self, punct: char) -> Result<(), ParseError> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", punct)))
        }
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        match self.peek_kind().clone() {
            TokenKind::Ident(ident) => {
                self.advance();
                Ok(ident)
            }
            other => Err(self.error(&format!("expected identifier, got {:?}", other))),
        }
    }

    fn error(&self, message: &str) -> ParseError {
        let token = self.peek();
        ParseError {
            line: token.line,
            column: token.column,
            message: message.to_string(),
        }
    }
}
