//! peis-lexer - Tokenizer for the Peis language
//!
//! Converts source text into a flat token stream for the parser.
//!
//! # Example
//!
//! ```rust
//! use peis_lexer::{Lexer, TokenKind};
//!
//! let source = "int main() begin return 100 end";
//!
//! let mut lexer = Lexer::new(source, 0);
//! let tokens = lexer.tokenize();
//!
//! assert_eq!(tokens[0].kind, TokenKind::IntType);
//! assert_eq!(tokens.last().map(|t| &t.kind), Some(&TokenKind::Eof));
//! ```

pub mod lexer;
pub mod token;

pub use lexer::{tokenize, Lexer};
pub use token::{Token, TokenKind};
