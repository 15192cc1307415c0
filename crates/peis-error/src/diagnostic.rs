//! Diagnostic - compiler error and warning messages
//!
//! A diagnostic has:
//! - a severity [`Level`]
//! - an [`ErrorCode`] (`ET001`, `EN003`, ...)
//! - labels pointing into the source
//! - notes and help text

use crate::span::Span;
use std::fmt::{self, Write};

/// Diagnostic severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Fatal error - aborts the compilation of the whole program
    Error,
    /// Warning - purely informative
    Warning,
    /// Note - additional information
    Note,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Error => "error",
            Level::Warning => "warning",
            Level::Note => "note",
        }
    }

    /// ANSI color escape for terminals
    pub fn color_code(&self) -> &'static str {
        match self {
            Level::Error => "\x1b[1;31m",   // Bold Red
            Level::Warning => "\x1b[1;33m", // Bold Yellow
            Level::Note => "\x1b[1;36m",    // Bold Cyan
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A label pointing to a region of the code
#[derive(Debug, Clone)]
pub struct Label {
    pub span: Span,
    pub message: String,
    /// Primary labels are underlined with `^`, secondary ones with `-`
    pub primary: bool,
}

impl Label {
    pub fn primary(span: Span, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
            primary: true,
        }
    }

    pub fn secondary(span: Span, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
            primary: false,
        }
    }
}

/// Structured error code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    /// Category (L = Lexer, P = Parser, T = Type, N = Name, F = Flow, B = Backend)
    pub category: char,
    pub number: u16,
}

impl ErrorCode {
    pub const fn new(category: char, number: u16) -> Self {
        Self { category, number }
    }

    // Lexer errors
    pub const UNEXPECTED_CHAR: Self = Self::new('L', 1);
    pub const INVALID_NUMBER: Self = Self::new('L', 2);

    // Parser errors
    pub const UNEXPECTED_TOKEN: Self = Self::new('P', 1);
    pub const EXPECTED_EXPRESSION: Self = Self::new('P', 2);
    pub const EXPECTED_TYPE: Self = Self::new('P', 3);

    // Type errors
    pub const WRONG_TYPE: Self = Self::new('T', 1);
    pub const PARAMS_MUST_BE_SAME_TYPE: Self = Self::new('T', 2);
    pub const NOT_ENOUGH_PARAMETERS: Self = Self::new('T', 3);
    pub const TOO_MANY_PARAMETERS: Self = Self::new('T', 4);

    // Name resolution errors
    pub const NAME_NOT_FOUND: Self = Self::new('N', 1);
    pub const NAME_ALREADY_DEFINED: Self = Self::new('N', 2);
    pub const MAY_NOT_ASSIGN_TO_CONST: Self = Self::new('N', 3);
    pub const UNKNOWN_MODULE: Self = Self::new('N', 4);
    pub const NO_MAIN_FUNCTION: Self = Self::new('N', 5);

    // Control flow
    pub const RETURN_NOT_GUARANTEED: Self = Self::new('F', 1);
    pub const UNREACHABLE_CODE: Self = Self::new('F', 2);

    // Backend
    pub const NOT_IMPLEMENTED: Self = Self::new('B', 1);
    pub const INTERNAL: Self = Self::new('B', 2);
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}{:03}", self.category, self.number)
    }
}

/// A complete diagnostic
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub level: Level,
    pub code: Option<ErrorCode>,
    pub message: String,
    pub labels: Vec<Label>,
    pub notes: Vec<String>,
    pub help: Vec<String>,
}

impl Diagnostic {
    fn with_level(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            code: None,
            message: message.into(),
            labels: Vec::new(),
            notes: Vec::new(),
            help: Vec::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::with_level(Level::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::with_level(Level::Warning, message)
    }

    pub fn with_code(mut self, code: ErrorCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Adds a primary label
    pub fn with_label(mut self, span: Span, message: impl Into<String>) -> Self {
        self.labels.push(Label::primary(span, message));
        self
    }

    pub fn with_secondary_label(mut self, span: Span, message: impl Into<String>) -> Self {
        self.labels.push(Label::secondary(span, message));
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help.push(help.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == Level::Error
    }

    /// Whether this diagnostic carries `code`
    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == Some(code)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.level)?;
        if let Some(code) = self.code {
            write!(f, "[{}]", code)?;
        }
        write!(f, ": {}", self.message)
    }
}

impl std::error::Error for Diagnostic {}

/// Source files known to the renderer
#[derive(Debug, Default)]
pub struct SourceCache {
    files: Vec<SourceFile>,
}

#[derive(Debug)]
pub struct SourceFile {
    pub name: String,
    pub source: String,
    line_starts: Vec<usize>,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        let source = source.into();
        let line_starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();

        Self {
            name: name.into(),
            source,
            line_starts,
        }
    }

    /// Text of a 1-indexed line, without its terminator
    pub fn get_line(&self, line: u32) -> Option<&str> {
        let line_idx = line.checked_sub(1)? as usize;
        let start = *self.line_starts.get(line_idx)?;
        let end = self
            .line_starts
            .get(line_idx + 1)
            .map(|&e| e.saturating_sub(1))
            .unwrap_or(self.source.len());

        self.source.get(start..end).map(|l| l.trim_end_matches('\r'))
    }
}

impl SourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file and returns its ID
    pub fn add(&mut self, name: impl Into<String>, source: impl Into<String>) -> u32 {
        let id = self.files.len() as u32;
        self.files.push(SourceFile::new(name, source));
        id
    }

    pub fn get(&self, id: u32) -> Option<&SourceFile> {
        self.files.get(id as usize)
    }
}

/// Renders diagnostics in the rustc style
pub struct DiagnosticRenderer<'a> {
    cache: &'a SourceCache,
    use_colors: bool,
}

impl<'a> DiagnosticRenderer<'a> {
    pub fn new(cache: &'a SourceCache) -> Self {
        Self {
            cache,
            use_colors: true,
        }
    }

    pub fn without_colors(mut self) -> Self {
        self.use_colors = false;
        self
    }

    fn paint(&self, code: &'static str) -> &'static str {
        if self.use_colors {
            code
        } else {
            ""
        }
    }

    pub fn render(&self, diagnostic: &Diagnostic) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail
        let _ = self.write_diagnostic(&mut out, diagnostic);
        out
    }

    fn write_diagnostic(&self, out: &mut String, diagnostic: &Diagnostic) -> fmt::Result {
        let reset = self.paint("\x1b[0m");
        let bold = self.paint("\x1b[1m");
        let color = self.paint(diagnostic.level.color_code());

        // error[ET001]: message
        write!(out, "{}{}", color, diagnostic.level)?;
        if let Some(code) = diagnostic.code {
            write!(out, "[{}]", code)?;
        }
        writeln!(out, "{}{}: {}{}", reset, bold, diagnostic.message, reset)?;

        for label in &diagnostic.labels {
            self.write_label(out, label, color)?;
        }
        for note in &diagnostic.notes {
            writeln!(out, "   = {}note{}: {}", bold, reset, note)?;
        }
        for help in &diagnostic.help {
            writeln!(out, "   = {}help{}: {}", self.paint("\x1b[1;32m"), reset, help)?;
        }
        Ok(())
    }

    /// ` --> file:line:col`, the source line and an underline
    fn write_label(&self, out: &mut String, label: &Label, color: &str) -> fmt::Result {
        let reset = self.paint("\x1b[0m");
        let blue = self.paint("\x1b[1;34m");
        let start = label.span.start;
        let Some(file) = self.cache.get(label.span.file_id) else {
            return Ok(());
        };
        writeln!(out, " {}-->{} {}:{}:{}", blue, reset, file.name, start.line, start.column)?;

        let Some(text) = file.get_line(start.line) else {
            return Ok(());
        };
        let gutter = " ".repeat(start.line.to_string().len());
        let indent = (start.column as usize).saturating_sub(1);
        let width = if label.span.end.line == start.line {
            label.span.end.column.saturating_sub(start.column) as usize
        } else {
            text.len().saturating_sub(indent)
        };
        let (marker, marker_color) = if label.primary { ('^', color) } else { ('-', blue) };
        let underline: String = std::iter::repeat(marker).take(width.max(1)).collect();

        writeln!(out, " {} {}|{}", gutter, blue, reset)?;
        writeln!(out, " {}{}{} | {}", blue, start.line, reset, text)?;
        writeln!(
            out,
            " {} {}|{} {:indent$}{}{}{} {}",
            gutter,
            blue,
            reset,
            "",
            marker_color,
            underline,
            reset,
            label.message,
            indent = indent
        )
    }
}
