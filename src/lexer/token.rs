use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved words of the language
///
/// Keyword lexemes keep the `Identifier` kind; the parser dispatches on the
/// lexeme itself, so adding a keyword never changes the token stream shape.
pub const KEYWORDS: &[&str] = &[
    "contract",
    "script",
    "description",
    "struct",
    "const",
    "global",
    "import",
    "event",
    "constructor",
    "public",
    "private",
    "task",
    "trigger",
    "code",
    "emit",
    "return",
    "throw",
    "local",
    "if",
    "else",
    "while",
    "do",
    "asm",
];

/// A single token from the source code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// The type of token
    pub kind: TokenKind,
    /// Text of the token, without the enclosing quotes or leading sigil
    /// (`@`, `#`, `0x`, `$`) for literal kinds
    pub lexeme: String,
    /// Line number where the token starts (1-indexed)
    pub line: usize,
    /// Column number where the token starts (1-indexed)
    pub column: usize,
}

impl Token {
    /// Creates a new token with the given properties
    pub fn new(kind: TokenKind, lexeme: impl Into<String>, line: usize, column: usize) -> Self {
        Token {
            kind,
            lexeme: lexeme.into(),
            line,
            column,
        }
    }

    /// True if this token is a reserved keyword lexeme
    pub fn is_keyword(&self, word: &str) -> bool {
        self.kind == TokenKind::Identifier && self.lexeme == word
    }

    /// True if this token is a separator with the given text
    pub fn is_separator(&self, text: &str) -> bool {
        self.kind == TokenKind::Separator && self.lexeme == text
    }

    /// True if this token is an operator with the given text
    pub fn is_operator(&self, text: &str) -> bool {
        self.kind == TokenKind::Operator && self.lexeme == text
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            TokenKind::String => write!(f, "\"{}\"", self.lexeme),
            TokenKind::Address => write!(f, "@{}", self.lexeme),
            TokenKind::Hash => write!(f, "#{}", self.lexeme),
            TokenKind::Bytes => write!(f, "0x{}", self.lexeme),
            TokenKind::Macro => write!(f, "${}", self.lexeme),
            TokenKind::Asm => write!(f, "<asm block>"),
            _ => write!(f, "{}", self.lexeme),
        }
    }
}

/// All possible token kinds in Tomb
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    /// Identifier or reserved keyword
    Identifier,
    /// Integer literal, optional leading minus
    Number,
    /// String literal (lexeme omits the quotes)
    String,
    /// Boolean literal `true` or `false`
    Bool,
    /// Address literal `@...` in base58
    Address,
    /// Hash literal `#...` in hex
    Hash,
    /// Byte-array literal `0x...` in hex
    Bytes,
    /// Macro token `$NAME`
    Macro,
    /// Built-in type name such as `number` or `storage_map`
    Type,
    /// Operator, longest-match (`:=`, `==`, `+`, `<<=`, ...)
    Operator,
    /// Single-character punctuation `( ) { } [ ] , ;` plus bare `:` and `=`
    Separator,
    /// Member-access dot
    Selector,
    /// Verbatim body of an `asm { ... }` block
    Asm,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            TokenKind::Identifier => "identifier",
            TokenKind::Number => "number literal",
            TokenKind::String => "string literal",
            TokenKind::Bool => "bool literal",
            TokenKind::Address => "address literal",
            TokenKind::Hash => "hash literal",
            TokenKind::Bytes => "bytes literal",
            TokenKind::Macro => "macro",
            TokenKind::Type => "type name",
            TokenKind::Operator => "operator",
            TokenKind::Separator => "separator",
            TokenKind::Selector => "selector",
            TokenKind::Asm => "asm block",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_lexemes_stay_identifiers() {
        let token = Token::new(TokenKind::Identifier, "contract", 1, 1);
        assert!(token.is_keyword("contract"));
        assert!(!token.is_keyword("script"));
        assert!(KEYWORDS.contains(&"contract"));
    }

    #[test]
    fn test_display_restores_sigils() {
        let addr = Token::new(TokenKind::Address, "P2K9zY", 1, 1);
        assert_eq!(addr.to_string(), "@P2K9zY");
        let bytes = Token::new(TokenKind::Bytes, "c0ffee", 1, 1);
        assert_eq!(bytes.to_string(), "0xc0ffee");
    }
}
