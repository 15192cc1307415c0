//! Lexer for the Peis language
//!
//! Whitespace (newlines included) only separates tokens; `#` starts a comment
//! that runs to the end of the line.

use crate::token::{Token, TokenKind};
use peis_error::{
    span::{Position, Span},
    Diagnostic, Diagnostics, ErrorCode,
};
use unicode_xid::UnicodeXID;

/// The Peis language lexer
pub struct Lexer<'src> {
    source: &'src str,
    chars: Vec<char>,
    /// Index in `chars`
    pos: usize,
    line: u32,
    column: u32,
    /// Byte offset
    offset: usize,
    file_id: u32,
    diagnostics: Diagnostics,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str, file_id: u32) -> Self {
        Self {
            source,
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            offset: 0,
            file_id,
            diagnostics: Diagnostics::new(),
        }
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Consumes and returns the diagnostics
    pub fn take_diagnostics(&mut self) -> Diagnostics {
        std::mem::take(&mut self.diagnostics)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        self.offset += ch.len_utf8();

        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }

        Some(ch)
    }

    fn current_position(&self) -> Position {
        Position::new(self.line, self.column, self.offset)
    }

    fn make_span(&self, start: Position) -> Span {
        Span::new(start, self.current_position(), self.file_id)
    }

    /// Skips whitespace and `#` comments
    fn skip_trivia(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else if ch == '#' {
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.advance();
                }
            } else {
                break;
            }
        }
    }

    /// Reads an integer or real literal
    fn read_number(&mut self) -> Token {
        let start = self.current_position();
        let begin = self.offset;

        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.advance();
        }

        let is_real = self.peek() == Some('.') && matches!(self.peek_next(), Some(c) if c.is_ascii_digit());
        if is_real {
            self.advance();
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.advance();
            }
        }

        let text = &self.source[begin..self.offset];
        let span = self.make_span(start);
        let kind = if is_real {
            text.parse::<f64>().map(TokenKind::RealLit).ok()
        } else {
            text.parse::<i64>().map(TokenKind::IntLit).ok()
        };

        match kind {
            Some(kind) => Token::new(kind, span),
            None => {
                self.diagnostics.push(
                    Diagnostic::error(format!("invalid number literal `{}`", text))
                        .with_code(ErrorCode::INVALID_NUMBER)
                        .with_label(span, "does not fit in 64 bits"),
                );
                Token::new(TokenKind::Error, span)
            }
        }
    }

    fn read_identifier(&mut self) -> Token {
        let start = self.current_position();
        let begin = self.offset;

        while matches!(self.peek(), Some(c) if c == '_' || c.is_xid_continue()) {
            self.advance();
        }

        let text = &self.source[begin..self.offset];
        let kind = TokenKind::keyword(text).unwrap_or_else(|| TokenKind::Ident(text.to_string()));
        Token::new(kind, self.make_span(start))
    }

    /// Consumes `second` if it follows, choosing between a one- and two-char token
    fn one_or_two(&mut self, second: char, single: TokenKind, double: TokenKind) -> TokenKind {
        if self.peek() == Some(second) {
            self.advance();
            double
        } else {
            single
        }
    }

    /// Produces the next token
    pub fn next_token(&mut self) -> Token {
        self.skip_trivia();
        let start = self.current_position();

        let Some(ch) = self.peek() else {
            return Token::new(TokenKind::Eof, self.make_span(start));
        };

        if ch.is_ascii_digit() {
            return self.read_number();
        }
        if ch == '_' || ch.is_xid_start() {
            return self.read_identifier();
        }

        self.advance();
        let kind = match ch {
            ':' if self.peek() == Some('=') => {
                self.advance();
                TokenKind::Assign
            }
            '=' => self.one_or_two('=', TokenKind::Eq, TokenKind::EqEq),
            '!' if self.peek() == Some('=') => {
                self.advance();
                TokenKind::NotEq
            }
            '<' => self.one_or_two('=', TokenKind::Lt, TokenKind::LtEq),
            '>' => self.one_or_two('=', TokenKind::Gt, TokenKind::GtEq),
            '/' => self.one_or_two('/', TokenKind::Slash, TokenKind::SlashSlash),
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '%' => TokenKind::Percent,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Dot,
            ';' => TokenKind::Semicolon,
            other => {
                let span = self.make_span(start);
                self.diagnostics.push(
                    Diagnostic::error(format!("unexpected character `{}`", other))
                        .with_code(ErrorCode::UNEXPECTED_CHAR)
                        .with_label(span, "not valid here"),
                );
                TokenKind::Error
            }
        };

        Token::new(kind, self.make_span(start))
    }

    /// Tokenizes the whole source; the result always ends with `Eof`
    pub fn tokenize(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }
        tokens
    }
}

/// Convenience: tokenizes and returns tokens + diagnostics
pub fn tokenize(source: &str, file_id: u32) -> (Vec<Token>, Diagnostics) {
    let mut lexer = Lexer::new(source, file_id);
    let tokens = lexer.tokenize();
    (tokens, lexer.take_diagnostics())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lex(source: &str) -> Vec<TokenKind> {
        let (tokens, diags) = tokenize(source, 0);
        assert!(!diags.has_errors(), "unexpected lexer errors: {:?}", diags);
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_statement_tokens() {
        assert_eq!(
            lex("local := 2; return local"),
            vec![
                TokenKind::Ident("local".into()),
                TokenKind::Assign,
                TokenKind::IntLit(2),
                TokenKind::Semicolon,
                TokenKind::Return,
                TokenKind::Ident("local".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            lex("100 2.5 7."),
            vec![
                TokenKind::IntLit(100),
                TokenKind::RealLit(2.5),
                TokenKind::IntLit(7),
                TokenKind::Dot,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            lex("// / == != <= >= < > = %"),
            vec![
                TokenKind::SlashSlash,
                TokenKind::Slash,
                TokenKind::EqEq,
                TokenKind::NotEq,
                TokenKind::LtEq,
                TokenKind::GtEq,
                TokenKind::Lt,
                TokenKind::Gt,
                TokenKind::Eq,
                TokenKind::Percent,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_qualified_name_and_comment() {
        assert_eq!(
            lex("math.pow(1, 2) # squared\nEND"),
            vec![
                TokenKind::Ident("math".into()),
                TokenKind::Dot,
                TokenKind::Ident("pow".into()),
                TokenKind::LParen,
                TokenKind::IntLit(1),
                TokenKind::Comma,
                TokenKind::IntLit(2),
                TokenKind::RParen,
                TokenKind::End,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_spans_track_lines() {
        let (tokens, _) = tokenize("begin\n  end", 0);
        assert_eq!(tokens[1].span.start.line, 2);
        assert_eq!(tokens[1].span.start.column, 3);
    }

    #[test]
    fn test_unexpected_char_is_reported() {
        let (tokens, diags) = tokenize("x := $", 0);
        assert!(diags.contains(ErrorCode::UNEXPECTED_CHAR));
        assert_eq!(tokens[2].kind, TokenKind::Error);
    }

    #[test]
    fn test_integer_overflow_is_reported() {
        let (_, diags) = tokenize("99999999999999999999", 0);
        assert!(diags.contains(ErrorCode::INVALID_NUMBER));
    }
}
