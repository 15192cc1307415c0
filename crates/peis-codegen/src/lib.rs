//! peis-codegen - Code generation for the Peis language
//!
//! Two targets share the IR passes from `peis-ir`:
//! - **Bytecode**: stack-machine code for the Peis virtual machine, written
//!   as a `PEIS` image
//! - **x64**: native machine code in a PE32+ executable
//!
//! # Example
//!
//! ```rust,ignore
//! use peis_codegen::{BytecodeGenerator, CodeGenerator};
//!
//! let mut generator = BytecodeGenerator::new();
//! for function in &mut functions {
//!     generator.generate_function(function)?;
//! }
//! let program = generator.finish(main)?;
//! program.write_to(&mut file)?;
//! ```

pub mod bytecode;
pub mod error;
pub mod x64;

pub use bytecode::{BytecodeGenerator, BytecodeOp, CompiledProgram, Opcode, FORMAT_VERSION, MAGIC};
pub use error::{CodegenError, CodegenResult};
pub use x64::{NativeImage, X64Generator};

use peis_ir::{Function, FunctionId};
use std::fmt;
use std::str::FromStr;

/// Trait for code generation backends
pub trait CodeGenerator {
    /// Backend output type
    type Output;

    fn target(&self) -> Target;

    /// Allocates and emits one function. Functions may arrive in any order.
    fn generate_function(&mut self, function: &mut Function) -> CodegenResult<()>;

    /// Completes the program once every function has been generated
    fn finish(self, main: FunctionId) -> CodegenResult<Self::Output>
    where
        Self: Sized;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Target {
    #[default]
    Bytecode,
    X64,
}

impl Target {
    /// Default extension of the output file
    pub fn extension(self) -> &'static str {
        match self {
            Target::Bytecode => "peis",
            Target::X64 => "exe",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Bytecode => write!(f, "bytecode"),
            Target::X64 => write!(f, "x64"),
        }
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bytecode" | "vm" => Ok(Target::Bytecode),
            "x64" | "x86_64" | "native" => Ok(Target::X64),
            other => Err(format!("unknown target `{}` (expected bytecode or x64)", other)),
        }
    }
}

/// Compilation options
#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub target: Target,
    /// Run constant folding
    pub optimize: bool,
    /// Module whose `main` is the entry point; the first module when unset
    pub entry_module: Option<String>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            target: Target::Bytecode,
            optimize: true,
            entry_module: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_parsing() {
        assert_eq!("x64".parse::<Target>(), Ok(Target::X64));
        assert_eq!("Bytecode".parse::<Target>(), Ok(Target::Bytecode));
        assert!("arm64".parse::<Target>().is_err());
        assert_eq!(Target::X64.extension(), "exe");
    }

    #[test]
    fn test_default_options() {
        let options = CompileOptions::default();
        assert_eq!(options.target, Target::Bytecode);
        assert!(options.optimize);
        assert!(options.entry_module.is_none());
    }
}
