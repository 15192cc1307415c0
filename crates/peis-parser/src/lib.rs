//! peis-parser - Parser for the Peis language
//!
//! Converts a token stream into the syntax tree consumed by the compiler core.
//!
//! # Example
//!
//! ```rust
//! use peis_lexer::Lexer;
//! use peis_parser::parse;
//!
//! let source = "int main() begin return 100 end";
//! let mut lexer = Lexer::new(source, 0);
//! let tokens = lexer.tokenize();
//!
//! let (module, diagnostics) = parse(tokens);
//! assert!(!diagnostics.has_errors());
//! assert_eq!(module.functions[0].name, "main");
//! ```

pub mod ast;
pub mod parser;

pub use ast::*;
pub use parser::{parse, Parser};
