//! Code generation errors
//!
//! Backends fail with [`CodegenError`]; the driver turns it into a
//! [`Diagnostic`] so it reaches the user like any other compile error.

use peis_error::{Diagnostic, ErrorCode};
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodegenError {
    /// The construct has no lowering for this target yet
    #[error("not implemented for {target}: {feature}")]
    NotImplemented { target: &'static str, feature: String },

    #[error("operand {value} does not fit in a 16-bit instruction operand ({what})")]
    OperandOverflow { what: &'static str, value: i64 },

    #[error("stack displacement {displacement} does not fit in a signed byte")]
    DisplacementOutOfRange { displacement: i64 },

    #[error("function {index} was never generated")]
    MissingFunction { index: usize },

    #[error("internal code generation error: {reason}")]
    Internal { reason: String },

    #[error("malformed program image: {reason}")]
    Malformed { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type CodegenResult<T> = Result<T, CodegenError>;

impl CodegenError {
    pub fn not_implemented(target: &'static str, feature: impl Into<String>) -> Self {
        CodegenError::NotImplemented {
            target,
            feature: feature.into(),
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        CodegenError::Internal { reason: reason.into() }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        CodegenError::Malformed { reason: reason.into() }
    }
}

impl From<CodegenError> for Diagnostic {
    fn from(err: CodegenError) -> Self {
        let code = match err {
            CodegenError::NotImplemented { .. } | CodegenError::DisplacementOutOfRange { .. } => {
                ErrorCode::NOT_IMPLEMENTED
            }
            _ => ErrorCode::INTERNAL,
        };
        Diagnostic::error(err.to_string()).with_code(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_displacement_maps_to_not_implemented() {
        let diagnostic: Diagnostic = CodegenError::DisplacementOutOfRange { displacement: 200 }.into();
        assert!(diagnostic.is(ErrorCode::NOT_IMPLEMENTED));
        assert!(diagnostic.message.contains("200"));
    }

    #[test]
    fn test_io_maps_to_internal() {
        let err: CodegenError = io::Error::new(io::ErrorKind::UnexpectedEof, "eof").into();
        let diagnostic: Diagnostic = err.into();
        assert!(diagnostic.is(ErrorCode::INTERNAL));
    }
}
