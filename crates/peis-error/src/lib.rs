//! peis-error - Diagnostics for the Peis compiler
//!
//! Every stage of the pipeline reports problems as [`Diagnostic`]s. Fatal ones
//! travel as the `Err` side of [`Result`] and abort the compilation of the whole
//! program; warnings are pushed into a [`Diagnostics`] collector and survive.
//!
//! # Example
//!
//! ```rust
//! use peis_error::{Diagnostic, ErrorCode, SourceCache, DiagnosticRenderer};
//! use peis_error::span::{Span, Position};
//!
//! let mut cache = SourceCache::new();
//! let file_id = cache.add("example.peis", "x := y");
//!
//! let span = Span::new(Position::new(1, 6, 5), Position::new(1, 7, 6), file_id);
//!
//! let diagnostic = Diagnostic::error("name `y` not found")
//!     .with_code(ErrorCode::NAME_NOT_FOUND)
//!     .with_label(span, "not a local, constant or function");
//!
//! let renderer = DiagnosticRenderer::new(&cache);
//! println!("{}", renderer.render(&diagnostic));
//! ```

pub mod diagnostic;
pub mod span;

pub use diagnostic::{
    Diagnostic, DiagnosticRenderer, ErrorCode, Label, Level, SourceCache, SourceFile,
};
pub use span::{Position, Span, Spanned};

/// Result of an operation that may fail with a fatal diagnostic
pub type Result<T> = std::result::Result<T, Diagnostic>;

/// Diagnostics accumulated during compilation
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.items.push(diagnostic);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.items.extend(other.items);
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(Diagnostic::is_error)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    /// Number of diagnostics carrying `code`
    pub fn count(&self, code: ErrorCode) -> usize {
        self.items.iter().filter(|d| d.is(code)).count()
    }

    pub fn contains(&self, code: ErrorCode) -> bool {
        self.count(code) > 0
    }

    /// Renders all diagnostics
    pub fn render(&self, cache: &SourceCache) -> String {
        let renderer = DiagnosticRenderer::new(cache);
        self.items
            .iter()
            .map(|d| renderer.render(d))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}
