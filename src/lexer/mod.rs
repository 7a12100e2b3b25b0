//! Lexical analysis for Tomb
//!
//! Converts source text into a finite ordered sequence of tokens. Tokens are
//! immutable after lexing; each carries its kind, lexeme, and 1-based source
//! position.

mod scanner;
mod token;

pub use scanner::Scanner;
pub use token::{Token, TokenKind, KEYWORDS};
