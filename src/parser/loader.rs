//! Data chunk parser
//!
//! A data chunk is a sequence of global assignments whose right-hand sides
//! are literals:
//!
//! ```text
//! chunk      := { assignment [';'] }
//! assignment := Name '=' literal
//! literal    := nil | true | false | ['-'] Number | String | table
//! table      := '{' [ field { (',' | ';') field } [',' | ';'] ] '}'
//! field      := '[' literal ']' '=' literal | Name '=' literal | literal
//! ```
//!
//! The whole chunk is parsed before anything is assigned, so a chunk with a
//! syntax error leaves the globals untouched.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::LoadError;
use crate::runtime::Table;
use crate::value::Value;

use super::lexer::{Lexer, Token};

/// Maximum nesting of table constructors
const MAX_DEPTH: usize = 200;

/// Data chunk parser
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    /// Line of the current token
    line: usize,
    chunk: &'a str,
    depth: usize,
}

impl<'a> Parser<'a> {
    /// Create a parser for `source`, reporting errors against `chunk`
    pub fn new(chunk: &'a str, source: &'a str) -> Self {
        let mut lexer = Lexer::new(skip_prelude(source));
        let current = lexer.next_token();
        let line = lexer.line();
        Parser {
            lexer,
            current,
            line,
            chunk,
            depth: 0,
        }
    }

    /// Parse the whole chunk into (global name, value) assignments in order
    pub fn parse(mut self) -> Result<Vec<(String, Value)>, LoadError> {
        let mut assignments = Vec::new();
        loop {
            match self.bump() {
                Token::Eof => return Ok(assignments),
                Token::Semicolon => {}
                Token::Ident(name) => {
                    self.expect(Token::Eq, "'='")?;
                    let value = self.literal()?;
                    assignments.push((name, value));
                }
                Token::Error(msg) => return Err(self.syntax_error(msg)),
                other => {
                    let msg = format!("unexpected symbol near {}", describe(&other));
                    return Err(self.syntax_error(msg));
                }
            }
        }
    }

    /// Take the current token and read the next one
    fn bump(&mut self) -> Token {
        let next = self.lexer.next_token();
        self.line = self.lexer.line();
        std::mem::replace(&mut self.current, next)
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<(), LoadError> {
        if self.current == token {
            self.bump();
            Ok(())
        } else {
            let msg = format!("{} expected near {}", what, describe(&self.current));
            Err(self.syntax_error(msg))
        }
    }

    fn syntax_error(&self, message: String) -> LoadError {
        LoadError::Syntax {
            chunk: self.chunk.to_string(),
            line: self.line,
            message,
        }
    }

    fn literal(&mut self) -> Result<Value, LoadError> {
        match self.bump() {
            Token::Nil => Ok(Value::Nil),
            Token::True => Ok(Value::Boolean(true)),
            Token::False => Ok(Value::Boolean(false)),
            Token::Integer(i) => Ok(Value::Integer(i)),
            Token::Float(n) => Ok(Value::Number(n)),
            Token::String(s) => Ok(Value::string(&s)),
            Token::Minus => match self.bump() {
                Token::Integer(i) => Ok(Value::Integer(i.wrapping_neg())),
                Token::Float(n) => Ok(Value::Number(-n)),
                other => {
                    let msg = format!("number expected after '-' near {}", describe(&other));
                    Err(self.syntax_error(msg))
                }
            },
            Token::LBrace => self.table(),
            Token::Ident(name) => {
                let msg = format!("variable '{}' cannot be used in a data chunk", name);
                Err(self.syntax_error(msg))
            }
            Token::Error(msg) => Err(self.syntax_error(msg)),
            other => {
                let msg = format!("unexpected symbol near {}", describe(&other));
                Err(self.syntax_error(msg))
            }
        }
    }

    /// Parse a table constructor; the opening brace is already consumed
    fn table(&mut self) -> Result<Value, LoadError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.syntax_error("chunk has too many syntax levels".to_string()));
        }
        let open_line = self.line;
        let mut table = Table::new();
        let mut positional = 0i64;

        while self.current != Token::RBrace {
            match self.current.clone() {
                Token::LBracket => {
                    self.bump();
                    let key = self.literal()?;
                    self.expect(Token::RBracket, "']'")?;
                    self.expect(Token::Eq, "'='")?;
                    let value = self.literal()?;
                    self.set(&mut table, key, value)?;
                }
                Token::Ident(name) => {
                    self.bump();
                    self.expect(Token::Eq, "'='")?;
                    let value = self.literal()?;
                    self.set(&mut table, Value::string(&name), value)?;
                }
                _ => {
                    let value = self.literal()?;
                    positional += 1;
                    table.set_int(positional, value);
                }
            }

            match self.current {
                Token::Comma | Token::Semicolon => {
                    self.bump();
                }
                Token::RBrace => {}
                _ => {
                    let msg = format!(
                        "'}}' expected (to close '{{' at line {}) near {}",
                        open_line,
                        describe(&self.current)
                    );
                    return Err(self.syntax_error(msg));
                }
            }
        }
        self.bump();
        self.depth -= 1;

        Ok(Value::Table(Rc::new(RefCell::new(table))))
    }

    fn set(&self, table: &mut Table, key: Value, value: Value) -> Result<(), LoadError> {
        table.set(key, value).map_err(|source| LoadError::Runtime {
            chunk: self.chunk.to_string(),
            source,
        })
    }
}

/// Parse a data chunk into its assignments
pub fn parse_chunk(chunk: &str, source: &str) -> Result<Vec<(String, Value)>, LoadError> {
    Parser::new(chunk, source).parse()
}

/// Skip a byte order mark and a leading `#` line, keeping its newline
fn skip_prelude(source: &str) -> &str {
    let source = source.strip_prefix('\u{feff}').unwrap_or(source);
    if source.starts_with('#') {
        source.find('\n').map_or("", |i| &source[i..])
    } else {
        source
    }
}

/// Token as shown in error messages
fn describe(token: &Token) -> String {
    match token {
        Token::Eof => "<eof>".to_string(),
        Token::Integer(i) => format!("'{}'", i),
        Token::Float(n) => format!("'{}'", n),
        Token::String(s) => format!("'{}'", s),
        Token::Ident(s) | Token::Reserved(s) => format!("'{}'", s),
        Token::Nil => "'nil'".to_string(),
        Token::True => "'true'".to_string(),
        Token::False => "'false'".to_string(),
        Token::Minus => "'-'".to_string(),
        Token::Eq => "'='".to_string(),
        Token::Semicolon => "';'".to_string(),
        Token::Comma => "','".to_string(),
        Token::LBracket => "'['".to_string(),
        Token::RBracket => "']'".to_string(),
        Token::LBrace => "'{'".to_string(),
        Token::RBrace => "'}'".to_string(),
        Token::Error(msg) => msg.clone(),
    }
}
