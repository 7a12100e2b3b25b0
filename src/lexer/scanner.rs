use super::token::{Token, TokenKind};
use crate::error::{Error, Result};
use crate::types::VarKind;

/// Scanner for Tomb source text
///
/// Produces the finite ordered token sequence the parser consumes. First
/// match wins: comments and whitespace are skipped, `asm { ... }` bodies are
/// captured verbatim as a single token, and operators are matched longest
/// first.
pub struct Scanner {
    /// Source code as character vector
    source: Vec<char>,
    /// Accumulated tokens
    tokens: Vec<Token>,
    /// Current position in source
    current: usize,
    /// Current line number (1-indexed)
    line: usize,
    /// Current column number (1-indexed)
    column: usize,
    /// Position of the token being scanned
    token_line: usize,
    token_column: usize,
}

impl Scanner {
    /// Creates a new scanner from source code
    pub fn new(source: &str) -> Self {
        Scanner {
            source: source.chars().collect(),
            tokens: Vec::new(),
            current: 0,
            line: 1,
            column: 1,
            token_line: 1,
            token_column: 1,
        }
    }

    /// Scans all tokens from source code and returns them as a vector
    pub fn scan_tokens(&mut self) -> Result<Vec<Token>> {
        while !self.is_at_end() {
            self.token_line = self.line;
            self.token_column = self.column;
            self.scan_token()?;
        }
        Ok(std::mem::take(&mut self.tokens))
    }

    fn scan_token(&mut self) -> Result<()> {
        let c = self.advance();

        match c {
            ' ' | '\r' | '\t' | '\n' => {}

            '/' => {
                if self.match_char('/') {
                    self.skip_line_comment();
                } else if self.match_char('*') {
                    self.skip_block_comment()?;
                } else if self.match_char('=') {
                    self.add_token(TokenKind::Operator, "/=");
                } else {
                    self.add_token(TokenKind::Operator, "/");
                }
            }

            '(' | ')' | '{' | '}' | '[' | ']' | ',' | ';' => {
                self.add_token(TokenKind::Separator, c.to_string());
                // An `asm` keyword followed by `{` switches to verbatim
                // capture until the closing brace.
                if c == '{' && self.brace_follows_asm() {
                    self.capture_asm_body()?;
                }
            }

            '.' => self.add_token(TokenKind::Selector, "."),

            ':' => {
                if self.match_char('=') {
                    self.add_token(TokenKind::Operator, ":=");
                } else {
                    self.add_token(TokenKind::Separator, ":");
                }
            }

            '=' => {
                if self.match_char('=') {
                    self.add_token(TokenKind::Operator, "==");
                } else {
                    self.add_token(TokenKind::Separator, "=");
                }
            }

            '!' => {
                if self.match_char('=') {
                    self.add_token(TokenKind::Operator, "!=");
                } else {
                    return Err(self.lex_error("unexpected character '!'"));
                }
            }

            '<' => {
                if self.match_char('<') {
                    if self.match_char('=') {
                        self.add_token(TokenKind::Operator, "<<=");
                    } else {
                        self.add_token(TokenKind::Operator, "<<");
                    }
                } else if self.match_char('=') {
                    self.add_token(TokenKind::Operator, "<=");
                } else {
                    self.add_token(TokenKind::Operator, "<");
                }
            }

            '>' => {
                if self.match_char('>') {
                    if self.match_char('=') {
                        self.add_token(TokenKind::Operator, ">>=");
                    } else {
                        self.add_token(TokenKind::Operator, ">>");
                    }
                } else if self.match_char('=') {
                    self.add_token(TokenKind::Operator, ">=");
                } else {
                    self.add_token(TokenKind::Operator, ">");
                }
            }

            '-' => {
                if self.peek().is_ascii_digit() {
                    self.scan_number(true)?;
                } else if self.match_char('=') {
                    self.add_token(TokenKind::Operator, "-=");
                } else {
                    self.add_token(TokenKind::Operator, "-");
                }
            }

            '+' | '*' | '%' | '&' | '|' | '^' => {
                if self.match_char('=') {
                    self.add_token(TokenKind::Operator, format!("{}=", c));
                } else {
                    self.add_token(TokenKind::Operator, c.to_string());
                }
            }

            '"' => self.scan_string()?,

            '@' => self.scan_address()?,

            '#' => self.scan_hash()?,

            '$' => self.scan_macro()?,

            c if c.is_ascii_digit() => {
                self.rewind_char();
                self.scan_number(false)?;
            }

            c if c.is_ascii_alphabetic() || c == '_' => {
                self.rewind_char();
                self.scan_identifier();
            }

            _ => {
                return Err(self.lex_error(format!("unexpected character '{}'", c)));
            }
        }

        Ok(())
    }

    fn skip_line_comment(&mut self) {
        while !self.is_at_end() && self.peek() != '\n' {
            self.advance();
        }
    }

    fn skip_block_comment(&mut self) -> Result<()> {
        // Not nested: the first `*/` ends the comment.
        while !self.is_at_end() {
            if self.peek() == '*' && self.peek_next() == '/' {
                self.advance();
                self.advance();
                return Ok(());
            }
            self.advance();
        }
        Err(self.lex_error("unterminated block comment"))
    }

    fn brace_follows_asm(&self) -> bool {
        self.tokens.len() >= 2 && self.tokens[self.tokens.len() - 2].is_keyword("asm")
    }

    fn capture_asm_body(&mut self) -> Result<()> {
        let mut body = String::new();
        while !self.is_at_end() && self.peek() != '}' {
            let c = self.advance();
            if c != '\r' {
                body.push(c);
            }
        }
        if self.is_at_end() {
            return Err(self.lex_error("unterminated asm block"));
        }
        // The closing brace stays in the stream as its own separator.
        self.add_token(TokenKind::Asm, body);
        Ok(())
    }

    fn scan_string(&mut self) -> Result<()> {
        let mut value = String::new();
        while !self.is_at_end() && self.peek() != '"' {
            let c = self.advance();
            if c == '\\' && self.peek() == '\n' {
                // Line continuation: backslash-newline is elided.
                self.advance();
                continue;
            }
            value.push(c);
        }
        if self.is_at_end() {
            return Err(self.lex_error("unterminated string"));
        }
        self.advance();
        self.add_token(TokenKind::String, value);
        Ok(())
    }

    fn scan_number(&mut self, negative: bool) -> Result<()> {
        // `0x` introduces a bytes literal, not a number.
        if !negative && self.peek() == '0' && self.peek_next() == 'x' {
            self.advance();
            self.advance();
            return self.scan_bytes();
        }
        let mut text = String::new();
        if negative {
            text.push('-');
        }
        while self.peek().is_ascii_digit() {
            text.push(self.advance());
        }
        self.add_token(TokenKind::Number, text);
        Ok(())
    }

    fn scan_bytes(&mut self) -> Result<()> {
        let mut text = String::new();
        while self.peek().is_ascii_hexdigit() {
            text.push(self.advance());
        }
        if text.is_empty() {
            return Err(self.lex_error("expected hex digits after '0x'"));
        }
        if text.len() % 2 != 0 {
            return Err(self.lex_error("bytes literal requires an even number of hex digits"));
        }
        self.add_token(TokenKind::Bytes, text);
        Ok(())
    }

    fn scan_address(&mut self) -> Result<()> {
        let mut text = String::new();
        while self.peek().is_ascii_alphanumeric() {
            text.push(self.advance());
        }
        if text.is_empty() {
            return Err(self.lex_error("expected address literal after '@'"));
        }
        if bs58::decode(&text).into_vec().is_err() {
            return Err(self.lex_error(format!("invalid base58 address '@{}'", text)));
        }
        self.add_token(TokenKind::Address, text);
        Ok(())
    }

    fn scan_hash(&mut self) -> Result<()> {
        let mut text = String::new();
        while self.peek().is_ascii_hexdigit() {
            text.push(self.advance());
        }
        if text.is_empty() {
            return Err(self.lex_error("expected hex digits after '#'"));
        }
        self.add_token(TokenKind::Hash, text);
        Ok(())
    }

    fn scan_macro(&mut self) -> Result<()> {
        let mut text = String::new();
        while self.peek().is_ascii_alphanumeric() || self.peek() == '_' {
            text.push(self.advance());
        }
        if text.is_empty() {
            return Err(self.lex_error("expected macro name after '$'"));
        }
        self.add_token(TokenKind::Macro, text);
        Ok(())
    }

    fn scan_identifier(&mut self) {
        let mut text = String::new();
        while self.peek().is_ascii_alphanumeric() || self.peek() == '_' {
            text.push(self.advance());
        }
        let kind = if text == "true" || text == "false" {
            TokenKind::Bool
        } else if VarKind::from_type_name(&text).is_some() {
            TokenKind::Type
        } else {
            TokenKind::Identifier
        };
        self.add_token(kind, text);
    }

    fn add_token(&mut self, kind: TokenKind, lexeme: impl Into<String>) {
        self.tokens.push(Token::new(
            kind,
            lexeme,
            self.token_line,
            self.token_column,
        ));
    }

    fn lex_error(&self, message: impl Into<String>) -> Error {
        Error::lex(self.token_line, self.token_column, message)
    }

    fn advance(&mut self) -> char {
        let c = self.source[self.current];
        self.current += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        c
    }

    /// Steps back over the character just consumed; only valid when that
    /// character was not a newline.
    fn rewind_char(&mut self) {
        self.current -= 1;
        self.column -= 1;
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.is_at_end() || self.source[self.current] != expected {
            return false;
        }
        self.advance();
        true
    }

    fn peek(&self) -> char {
        if self.is_at_end() {
            '\0'
        } else {
            self.source[self.current]
        }
    }

    fn peek_next(&self) -> char {
        if self.current + 1 >= self.source.len() {
            '\0'
        } else {
            self.source[self.current + 1]
        }
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(source: &str) -> Vec<Token> {
        Scanner::new(source).scan_tokens().expect("scan failed")
    }

    #[test]
    fn test_scans_contract_header() {
        let tokens = scan("contract Hello {");
        assert_eq!(tokens.len(), 3);
        assert!(tokens[0].is_keyword("contract"));
        assert_eq!(tokens[1].kind, TokenKind::Identifier);
        assert_eq!(tokens[1].lexeme, "Hello");
        assert!(tokens[2].is_separator("{"));
    }

    #[test]
    fn test_type_names_become_type_tokens() {
        let tokens = scan("number bool storage_map Storage_Map myThing");
        assert_eq!(tokens[0].kind, TokenKind::Type);
        assert_eq!(tokens[1].kind, TokenKind::Type);
        assert_eq!(tokens[2].kind, TokenKind::Type);
        // Case-insensitive per the language rules.
        assert_eq!(tokens[3].kind, TokenKind::Type);
        assert_eq!(tokens[4].kind, TokenKind::Identifier);
    }

    #[test]
    fn test_operators_longest_match() {
        let tokens = scan("<<= << <= < := = ==");
        let lexemes: Vec<&str> = tokens.iter().map(|t| t.lexeme.as_str()).collect();
        assert_eq!(lexemes, vec!["<<=", "<<", "<=", "<", ":=", "=", "=="]);
        assert_eq!(tokens[5].kind, TokenKind::Separator);
        assert_eq!(tokens[6].kind, TokenKind::Operator);
    }

    #[test]
    fn test_negative_number_and_minus_operator() {
        let tokens = scan("x := -5 - 3");
        assert_eq!(tokens[2].kind, TokenKind::Number);
        assert_eq!(tokens[2].lexeme, "-5");
        assert!(tokens[3].is_operator("-"));
        assert_eq!(tokens[4].lexeme, "3");
    }

    #[test]
    fn test_literals_with_sigils() {
        let tokens = scan("@P5x 0xc0ffee #deadbeef $THIS_ADDRESS");
        assert_eq!(tokens[0].kind, TokenKind::Address);
        assert_eq!(tokens[0].lexeme, "P5x");
        assert_eq!(tokens[1].kind, TokenKind::Bytes);
        assert_eq!(tokens[1].lexeme, "c0ffee");
        assert_eq!(tokens[2].kind, TokenKind::Hash);
        assert_eq!(tokens[2].lexeme, "deadbeef");
        assert_eq!(tokens[3].kind, TokenKind::Macro);
        assert_eq!(tokens[3].lexeme, "THIS_ADDRESS");
    }

    #[test]
    fn test_asm_block_captured_verbatim() {
        let tokens = scan("asm {\n  LOAD r1 1\n  RET\n}");
        assert!(tokens[0].is_keyword("asm"));
        assert!(tokens[1].is_separator("{"));
        assert_eq!(tokens[2].kind, TokenKind::Asm);
        assert!(tokens[2].lexeme.contains("LOAD r1 1"));
        assert!(tokens[2].lexeme.contains("RET"));
        assert!(tokens[3].is_separator("}"));
    }

    #[test]
    fn test_comments_are_skipped() {
        let tokens = scan("a // trailing\n/* block\ncomment */ b");
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].lexeme, "a");
        assert_eq!(tokens[1].lexeme, "b");
        assert_eq!(tokens[1].line, 3);
    }

    #[test]
    fn test_unterminated_string_is_lex_error() {
        let err = Scanner::new("\"oops").scan_tokens().unwrap_err();
        assert!(matches!(err, Error::Lex { .. }));
        assert!(err.to_string().contains("unterminated string"));
    }

    #[test]
    fn test_unterminated_asm_is_lex_error() {
        let err = Scanner::new("asm { LOAD r1 1").scan_tokens().unwrap_err();
        assert!(matches!(err, Error::Lex { .. }));
    }

    #[test]
    fn test_line_and_column_are_one_based() {
        let tokens = scan("a\n  b");
        assert_eq!((tokens[0].line, tokens[0].column), (1, 1));
        assert_eq!((tokens[1].line, tokens[1].column), (2, 3));
    }

    #[test]
    fn test_string_line_continuation() {
        let tokens = scan("\"split \\\nvalue\"");
        assert_eq!(tokens[0].kind, TokenKind::String);
        assert_eq!(tokens[0].lexeme, "split value");
    }
}
