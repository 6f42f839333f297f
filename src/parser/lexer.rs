//! Data chunk lexer
//!
//! Converts chunk text into a stream of tokens. Only the lexical subset
//! needed for literal assignments is recognized; reserved words of the
//! full language are reported as such so the parser can reject them.

use crate::value::{str_to_number, Value};

/// Token types
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Integer(i64),
    Float(f64),
    String(String),
    Ident(String),

    // Keywords
    Nil,
    True,
    False,
    /// Reserved word with no meaning in a data chunk
    Reserved(String),

    // Punctuation
    Minus,     // -
    Eq,        // =
    Semicolon, // ;
    Comma,     // ,
    LBracket,  // [
    RBracket,  // ]
    LBrace,    // {
    RBrace,    // }

    // Special
    Eof,
    Error(String),
}

/// Words reserved by the full language
const RESERVED: &[&str] = &[
    "and", "break", "do", "else", "elseif", "end", "for", "function", "goto", "if", "in",
    "local", "not", "or", "repeat", "return", "then", "until", "while",
];

/// Lexer for data chunks
pub struct Lexer<'a> {
    source: &'a [u8],
    pos: usize,
    line: usize,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer for the given source
    pub fn new(source: &'a str) -> Self {
        Lexer {
            source: source.as_bytes(),
            pos: 0,
            line: 1,
        }
    }

    /// Current line (1-based)
    #[inline]
    pub fn line(&self) -> usize {
        self.line
    }

    /// Peek at the current byte without consuming it
    fn peek(&self) -> Option<u8> {
        self.source.get(self.pos).copied()
    }

    /// Peek at the next byte
    fn peek_next(&self) -> Option<u8> {
        self.source.get(self.pos + 1).copied()
    }

    /// Consume the current byte
    fn advance(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
        }
        Some(c)
    }

    /// Skip whitespace and comments
    fn skip_whitespace(&mut self) -> Result<(), String> {
        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\r' | b'\n' | b'\x0b' | b'\x0c') => {
                    self.advance();
                }
                Some(b'-') if self.peek_next() == Some(b'-') => {
                    self.advance();
                    self.advance();
                    if let Some(level) = self.long_bracket_level() {
                        self.read_long_bracket(level)
                            .map_err(|_| "unfinished long comment".to_string())?;
                    } else {
                        // Line comment
                        while let Some(c) = self.advance() {
                            if c == b'\n' {
                                break;
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Level of a long bracket opening at the current position (`[[` is 0,
    /// `[==[` is 2), without consuming anything
    fn long_bracket_level(&self) -> Option<usize> {
        if self.peek() != Some(b'[') {
            return None;
        }
        let mut i = self.pos + 1;
        while self.source.get(i) == Some(&b'=') {
            i += 1;
        }
        (self.source.get(i) == Some(&b'[')).then(|| i - self.pos - 1)
    }

    /// Consume a long bracket of the given level and return its contents
    fn read_long_bracket(&mut self, level: usize) -> Result<Vec<u8>, ()> {
        // Opening bracket
        for _ in 0..level + 2 {
            self.advance();
        }
        // A newline right after the opening bracket is skipped
        if self.peek() == Some(b'\r') {
            self.advance();
        }
        if self.peek() == Some(b'\n') {
            self.advance();
        }

        let mut contents = Vec::new();
        loop {
            match self.advance() {
                None => return Err(()),
                Some(b']') => {
                    let mut i = self.pos;
                    while self.source.get(i) == Some(&b'=') {
                        i += 1;
                    }
                    if i - self.pos == level && self.source.get(i) == Some(&b']') {
                        for _ in 0..=level {
                            self.advance();
                        }
                        return Ok(contents);
                    }
                    contents.push(b']');
                }
                Some(c) => contents.push(c),
            }
        }
    }

    /// Read the next token
    pub fn next_token(&mut self) -> Token {
        if let Err(msg) = self.skip_whitespace() {
            return Token::Error(msg);
        }

        let Some(c) = self.peek() else {
            return Token::Eof;
        };

        // Identifiers and keywords
        if c.is_ascii_alphabetic() || c == b'_' {
            return self.read_identifier();
        }

        // Numbers
        if c.is_ascii_digit() || (c == b'.' && self.peek_next().is_some_and(|n| n.is_ascii_digit())) {
            return self.read_number();
        }

        // Strings
        if c == b'"' || c == b'\'' {
            return self.read_string();
        }
        if let Some(level) = self.long_bracket_level() {
            return match self.read_long_bracket(level) {
                Ok(bytes) => Token::String(String::from_utf8_lossy(&bytes).into_owned()),
                Err(()) => Token::Error("unfinished long string".to_string()),
            };
        }

        // Punctuation
        self.advance();
        match c {
            b'-' => Token::Minus,
            b'=' => Token::Eq,
            b';' => Token::Semicolon,
            b',' => Token::Comma,
            b'[' => Token::LBracket,
            b']' => Token::RBracket,
            b'{' => Token::LBrace,
            b'}' => Token::RBrace,
            _ => Token::Error(format!("unexpected symbol near '{}'", c as char)),
        }
    }

    /// Read an identifier or keyword
    fn read_identifier(&mut self) -> Token {
        let start = self.pos;

        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'_' {
                self.advance();
            } else {
                break;
            }
        }

        let ident = String::from_utf8_lossy(&self.source[start..self.pos]).into_owned();

        match ident.as_str() {
            "nil" => Token::Nil,
            "true" => Token::True,
            "false" => Token::False,
            word if RESERVED.contains(&word) => Token::Reserved(ident),
            _ => Token::Ident(ident),
        }
    }

    /// Read a number literal
    fn read_number(&mut self) -> Token {
        let start = self.pos;
        let hex = self.peek() == Some(b'0') && matches!(self.peek_next(), Some(b'x' | b'X'));
        if hex {
            self.advance();
            self.advance();
        }

        // Digits, decimal point and exponent, checked as a whole below
        while let Some(c) = self.peek() {
            let exponent = if hex { b"pP" } else { b"eE" };
            if exponent.contains(&c) {
                self.advance();
                if matches!(self.peek(), Some(b'+' | b'-')) {
                    self.advance();
                }
            } else if c.is_ascii_alphanumeric() || c == b'.' || c == b'_' {
                self.advance();
            } else {
                break;
            }
        }

        let text = String::from_utf8_lossy(&self.source[start..self.pos]);
        match str_to_number(&text) {
            Some(Value::Integer(i)) => Token::Integer(i),
            Some(Value::Number(n)) => Token::Float(n),
            _ => Token::Error(format!("malformed number near '{}'", text)),
        }
    }

    /// Read a quoted string literal
    fn read_string(&mut self) -> Token {
        let Some(quote) = self.advance() else {
            return Token::Eof;
        };
        let mut bytes = Vec::new();

        loop {
            match self.peek() {
                None | Some(b'\n') => return Token::Error("unfinished string".to_string()),
                Some(c) if c == quote => {
                    self.advance();
                    break;
                }
                Some(b'\\') => {
                    self.advance();
                    if let Err(msg) = self.read_escape(&mut bytes) {
                        return Token::Error(msg);
                    }
                }
                Some(c) => {
                    self.advance();
                    bytes.push(c);
                }
            }
        }

        Token::String(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Decode one escape sequence (the backslash is already consumed)
    fn read_escape(&mut self, out: &mut Vec<u8>) -> Result<(), String> {
        let Some(c) = self.advance() else {
            return Err("unfinished string".to_string());
        };
        match c {
            b'n' => out.push(b'\n'),
            b't' => out.push(b'\t'),
            b'r' => out.push(b'\r'),
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'v' => out.push(0x0b),
            b'\\' | b'"' | b'\'' | b'\n' => out.push(c),
            b'x' => {
                let mut value = 0u8;
                for _ in 0..2 {
                    let digit = self
                        .advance()
                        .and_then(|d| (d as char).to_digit(16))
                        .ok_or_else(|| "hexadecimal digit expected".to_string())?;
                    value = value * 16 + digit as u8;
                }
                out.push(value);
            }
            b'z' => {
                while self.peek().is_some_and(|w| w.is_ascii_whitespace()) {
                    self.advance();
                }
            }
            b'0'..=b'9' => {
                let mut value = (c - b'0') as u32;
                for _ in 0..2 {
                    match self.peek() {
                        Some(d @ b'0'..=b'9') => {
                            self.advance();
                            value = value * 10 + (d - b'0') as u32;
                        }
                        _ => break,
                    }
                }
                let byte = u8::try_from(value).map_err(|_| "decimal escape too large".to_string())?;
                out.push(byte);
            }
            other => return Err(format!("invalid escape sequence '\\{}'", other as char)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(source);
        let mut out = Vec::new();
        loop {
            match lexer.next_token() {
                Token::Eof => return out,
                token => out.push(token),
            }
        }
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            tokens("42 3.5 1e2 0xff .5"),
            vec![
                Token::Integer(42),
                Token::Float(3.5),
                Token::Float(100.0),
                Token::Integer(255),
                Token::Float(0.5),
            ]
        );
        assert!(matches!(tokens("3x")[0], Token::Error(_)));
    }

    #[test]
    fn test_strings() {
        assert_eq!(
            tokens(r#""hello" 'world' "a\tb\65\x42""#),
            vec![
                Token::String("hello".to_string()),
                Token::String("world".to_string()),
                Token::String("a\tbAB".to_string()),
            ]
        );
        assert!(matches!(tokens("\"open")[0], Token::Error(_)));
        assert!(matches!(tokens(r#""\q""#)[0], Token::Error(_)));
    }

    #[test]
    fn test_long_strings() {
        assert_eq!(
            tokens("[[\nline one\nline two]] [==[a]]b]==]"),
            vec![
                Token::String("line one\nline two".to_string()),
                Token::String("a]]b".to_string()),
            ]
        );
    }

    #[test]
    fn test_identifiers_and_keywords() {
        assert_eq!(
            tokens("foo nil true false local"),
            vec![
                Token::Ident("foo".to_string()),
                Token::Nil,
                Token::True,
                Token::False,
                Token::Reserved("local".to_string()),
            ]
        );
    }

    #[test]
    fn test_comments() {
        let mut lexer = Lexer::new("1 -- comment\n2 --[[ block\n ]] 3");

        assert_eq!(lexer.next_token(), Token::Integer(1));
        assert_eq!(lexer.next_token(), Token::Integer(2));
        assert_eq!(lexer.line(), 2);
        assert_eq!(lexer.next_token(), Token::Integer(3));
        assert_eq!(lexer.line(), 3);
        assert_eq!(lexer.next_token(), Token::Eof);
    }

    #[test]
    fn test_punctuation() {
        assert_eq!(
            tokens("{ [1] = -2, x = 3; }"),
            vec![
                Token::LBrace,
                Token::LBracket,
                Token::Integer(1),
                Token::RBracket,
                Token::Eq,
                Token::Minus,
                Token::Integer(2),
                Token::Comma,
                Token::Ident("x".to_string()),
                Token::Eq,
                Token::Integer(3),
                Token::Semicolon,
                Token::RBrace,
            ]
        );
    }
}
