//! Tokens of the Peis language

use peis_error::span::Span;
use std::fmt;

/// All token types the lexer can produce
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // =========================================
    // Keywords - Declarations
    // =========================================
    /// `module` - module header
    Module,
    /// `import` - module dependency
    Import,
    /// `public` - visibility modifier
    Public,
    /// `const` - constant declaration
    Const,

    // =========================================
    // Keywords - Statements
    // =========================================
    Begin,
    End,
    If,
    Else,
    While,
    Return,

    // =========================================
    // Keywords - Word operators
    // =========================================
    And,
    Or,
    Xor,
    Not,

    // =========================================
    // Primitive types
    // =========================================
    VoidType,
    BoolType,
    IntType,
    RealType,

    // =========================================
    // Literals
    // =========================================
    IntLit(i64),
    RealLit(f64),
    True,
    False,
    /// Identifier (original spelling; lookups are case-folded later)
    Ident(String),

    // =========================================
    // Punctuation and operators
    // =========================================
    /// `:=`
    Assign,
    /// `=` (constant initializer)
    Eq,
    /// `==`
    EqEq,
    /// `!=`
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Star,
    /// `/`
    Slash,
    /// `//`
    SlashSlash,
    Percent,
    LParen,
    RParen,
    Comma,
    Dot,
    Semicolon,

    // =========================================
    // Special
    // =========================================
    Eof,
    /// Unrecognized character (already reported)
    Error,
}

impl TokenKind {
    /// Keyword for an identifier spelling, if any. Keywords are case-insensitive.
    pub fn keyword(ident: &str) -> Option<TokenKind> {
        let kind = match ident.to_ascii_lowercase().as_str() {
            "module" => TokenKind::Module,
            "import" => TokenKind::Import,
            "public" => TokenKind::Public,
            "const" => TokenKind::Const,
            "begin" => TokenKind::Begin,
            "end" => TokenKind::End,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "return" => TokenKind::Return,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "xor" => TokenKind::Xor,
            "not" => TokenKind::Not,
            "void" => TokenKind::VoidType,
            "bool" => TokenKind::BoolType,
            "int" => TokenKind::IntType,
            "real" => TokenKind::RealType,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            _ => return None,
        };
        Some(kind)
    }

    pub fn is_type(&self) -> bool {
        matches!(
            self,
            TokenKind::VoidType | TokenKind::BoolType | TokenKind::IntType | TokenKind::RealType
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TokenKind::Module => "module",
            TokenKind::Import => "import",
            TokenKind::Public => "public",
            TokenKind::Const => "const",
            TokenKind::Begin => "begin",
            TokenKind::End => "end",
            TokenKind::If => "if",
            TokenKind::Else => "else",
            TokenKind::While => "while",
            TokenKind::Return => "return",
            TokenKind::And => "and",
            TokenKind::Or => "or",
            TokenKind::Xor => "xor",
            TokenKind::Not => "not",
            TokenKind::VoidType => "void",
            TokenKind::BoolType => "bool",
            TokenKind::IntType => "int",
            TokenKind::RealType => "real",
            TokenKind::IntLit(v) => return write!(f, "{}", v),
            TokenKind::RealLit(v) => return write!(f, "{:?}", v),
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::Ident(name) => return write!(f, "{}", name),
            TokenKind::Assign => ":=",
            TokenKind::Eq => "=",
            TokenKind::EqEq => "==",
            TokenKind::NotEq => "!=",
            TokenKind::Lt => "<",
            TokenKind::LtEq => "<=",
            TokenKind::Gt => ">",
            TokenKind::GtEq => ">=",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::SlashSlash => "//",
            TokenKind::Percent => "%",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::Comma => ",",
            TokenKind::Dot => ".",
            TokenKind::Semicolon => ";",
            TokenKind::Eof => "end of file",
            TokenKind::Error => "<error>",
        };
        write!(f, "{}", text)
    }
}

/// A token with its location
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_are_case_insensitive() {
        assert_eq!(TokenKind::keyword("BEGIN"), Some(TokenKind::Begin));
        assert_eq!(TokenKind::keyword("Return"), Some(TokenKind::Return));
        assert_eq!(TokenKind::keyword("main"), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(TokenKind::SlashSlash.to_string(), "//");
        assert_eq!(TokenKind::RealLit(2.0).to_string(), "2.0");
        assert_eq!(TokenKind::Ident("Foo".into()).to_string(), "Foo");
    }
}
