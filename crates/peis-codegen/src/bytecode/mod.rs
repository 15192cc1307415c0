//! Stack-machine target
//!
//! Produces a [`CompiledProgram`] for the Peis virtual machine and reads and
//! writes its `PEIS` image format.

pub mod backend;
pub mod generator;
pub mod opcode;
pub mod program;

pub use backend::BytecodeBackend;
pub use generator::BytecodeGenerator;
pub use opcode::{BytecodeOp, Opcode};
pub use program::{CompiledFunction, CompiledLocal, CompiledProgram, PooledConstant, FORMAT_VERSION, MAGIC};
