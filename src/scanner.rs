// A lexeme is the raw sequence of characters in the source code that represents a meaningful unit.
// A token is a categorized representation of a lexeme, pairing it with its type.

use tracing::trace;

use crate::error::{Diagnostics, SourceError};
use crate::token::{Token, TokenType, KEYWORDS};

pub struct Scanner {
    source: Vec<char>,
    tokens: Vec<Token>,
    diagnostics: Diagnostics,
    start: usize,
    current: usize,
    line: u32,
}

impl Scanner {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.chars().collect(),
            tokens: Vec::new(),
            diagnostics: Diagnostics::default(),
            start: 0,
            current: 0,
            line: 1,
        }
    }

    /// Scans the whole source in one pass, accumulating every lex error it
    /// finds rather than stopping at the first one. Returns the token
    /// stream iff no diagnostics were produced.
    pub fn scan_tokens(mut self) -> Result<Vec<Token>, Diagnostics> {
        while !self.is_at_end() {
            self.start = self.current;
            self.scan_token();
        }

        self.tokens.push(Token::new(TokenType::Eof, "", self.line));

        if self.diagnostics.is_empty() {
            Ok(self.tokens)
        } else {
            Err(self.diagnostics)
        }
    }

    fn scan_token(&mut self) {
        let c = self.advance();
        match c {
            // single char
            '(' => self.add_token(TokenType::LeftParen),
            ')' => self.add_token(TokenType::RightParen),
            '{' => self.add_token(TokenType::LeftBrace),
            '}' => self.add_token(TokenType::RightBrace),
            ',' => self.add_token(TokenType::Comma),
            '.' => self.add_token(TokenType::Dot),
            '-' => self.add_token(TokenType::Minus),
            '+' => self.add_token(TokenType::Plus),
            ';' => self.add_token(TokenType::Semicolon),
            '*' => self.add_token(TokenType::Star),

            // can be double char
            '!' => {
                let kind = if self.matches('=') { TokenType::BangEqual } else { TokenType::Bang };
                self.add_token(kind);
            }
            '=' => {
                let kind = if self.matches('=') { TokenType::EqualEqual } else { TokenType::Equal };
                self.add_token(kind);
            }
            '<' => {
                let kind = if self.matches('=') { TokenType::LessEqual } else { TokenType::Less };
                self.add_token(kind);
            }
            '>' => {
                let kind = if self.matches('=') { TokenType::GreaterEqual } else { TokenType::Greater };
                self.add_token(kind);
            }

            // can be comment
            '/' => {
                if self.matches('/') {
                    while self.peek() != '\n' && !self.is_at_end() {
                        self.advance();
                    }
                } else {
                    self.add_token(TokenType::Slash);
                }
            }

            // ignore whitespace
            ' ' | '\t' | '\r' => (),

            // handle new line
            '\n' => self.line += 1,

            '"' => self.string(),

            c if c.is_ascii_digit() => self.number(),
            c if c.is_alphabetic() || c == '_' => self.identifier(),

            _ => self.error("Unexpected character."),
        }
    }

    // consume characters until we reach the closing "
    fn string(&mut self) {
        while self.peek() != '"' && !self.is_at_end() {
            if self.peek() == '\n' {
                self.line += 1;
            }
            self.advance();
        }

        if self.is_at_end() {
            self.error("Unterminated string.");
            return;
        }

        // the closing "
        self.advance();

        // trim the surrounding quotes
        let literal: String = self.source[self.start + 1..self.current - 1].iter().collect();
        self.add_token(TokenType::String { literal });
    }

    fn number(&mut self) {
        while self.peek().is_ascii_digit() {
            self.advance();
        }

        // a fractional part needs a digit after the dot, or the dot isn't
        // part of this number at all (e.g. `123.` is `123` then `.`)
        if self.peek() == '.' && self.peek_next().is_ascii_digit() {
            self.advance();
            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }

        let text: String = self.source[self.start..self.current].iter().collect();
        let literal: f64 = text.parse().expect("scanned number lexeme is valid f64");
        self.add_token(TokenType::Number { literal });
    }

    fn identifier(&mut self) {
        while self.peek().is_alphanumeric() || self.peek() == '_' {
            self.advance();
        }

        let text: String = self.source[self.start..self.current].iter().collect();
        let kind = KEYWORDS.get(text.as_str()).cloned().unwrap_or(TokenType::Identifier);
        self.add_token(kind);
    }

    fn advance(&mut self) -> char {
        let c = self.source[self.current];
        self.current += 1;
        c
    }

    // it's like advance but doesn't consume the next character
    fn peek(&self) -> char {
        self.source.get(self.current).copied().unwrap_or('\0')
    }

    fn peek_next(&self) -> char {
        self.source.get(self.current + 1).copied().unwrap_or('\0')
    }

    fn add_token(&mut self, token_type: TokenType) {
        let text: String = self.source[self.start..self.current].iter().collect();
        self.tokens.push(Token::new(token_type, &text, self.line));
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    // we only consume the current character if that is what we are looking for
    fn matches(&mut self, expected: char) -> bool {
        if self.is_at_end() || self.source[self.current] != expected {
            return false;
        }
        self.current += 1;
        true
    }

    fn error(&mut self, message: &str) {
        trace!(line = self.line, message, "lex error");
        self.diagnostics.push(SourceError::lex(self.line, message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenType> {
        Scanner::new(source)
            .scan_tokens()
            .unwrap()
            .into_iter()
            .map(|t| t.token_type)
            .collect()
    }

    #[test]
    fn single_and_double_char_tokens() {
        assert_eq!(
            kinds("!= == <= >= < >"),
            vec![
                TokenType::BangEqual,
                TokenType::EqualEqual,
                TokenType::LessEqual,
                TokenType::GreaterEqual,
                TokenType::Less,
                TokenType::Greater,
                TokenType::Eof,
            ]
        );
    }

    #[test]
    fn number_with_trailing_dot_is_two_tokens() {
        let tokens = Scanner::new("123.").scan_tokens().unwrap();
        assert!(matches!(&tokens[0].token_type, TokenType::Number { literal } if *literal == 123.0));
        assert_eq!(tokens[1].token_type, TokenType::Dot);
    }

    #[test]
    fn number_with_fraction() {
        let tokens = Scanner::new("123.456").scan_tokens().unwrap();
        assert!(matches!(&tokens[0].token_type, TokenType::Number { literal } if *literal == 123.456));
        assert_eq!(tokens.len(), 2); // number + EOF
    }

    #[test]
    fn string_spanning_lines_updates_line_counter() {
        let tokens = Scanner::new("\"a\nb\" 1").scan_tokens().unwrap();
        match &tokens[0].token_type {
            TokenType::String { literal } => assert_eq!(literal, "a\nb"),
            other => panic!("expected string token, got {other:?}"),
        }
        assert_eq!(tokens[1].line, 2);
    }

    #[test]
    fn unterminated_string_is_a_diagnostic() {
        let err = Scanner::new("\"unterminated").scan_tokens().unwrap_err();
        assert_eq!(err.0.len(), 1);
        assert_eq!(err.0[0].to_string(), "[line 1] Error: Unterminated string.");
    }

    #[test]
    fn unexpected_character_reports_and_continues() {
        let err = Scanner::new("@ #").scan_tokens().unwrap_err();
        assert_eq!(err.0.len(), 2);
    }

    #[test]
    fn keywords_are_promoted() {
        assert_eq!(
            kinds("and class fun"),
            vec![TokenType::And, TokenType::Class, TokenType::Fun, TokenType::Eof]
        );
    }

    #[test]
    fn line_comment_consumed_without_eating_newline() {
        let tokens = Scanner::new("// hi\n1").scan_tokens().unwrap();
        assert_eq!(tokens[0].line, 2);
    }
}
