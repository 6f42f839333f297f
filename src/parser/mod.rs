//! Data chunk loading
//!
//! Lexer and parser for declarative data chunks: global assignments of
//! literal values and table constructors.

pub mod lexer;
pub mod loader;

// Re-exports
pub use lexer::{Lexer, Token};
pub use loader::{parse_chunk, Parser};
