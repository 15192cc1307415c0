//! Native x86-64 target
//!
//! Supports the straight-line subset: constants, locals, parameters, `return`
//! and Int/Real arithmetic. The output is wrapped in a PE32+ executable.

pub mod encoder;
pub mod generator;
pub mod pe;
pub mod prepare;
pub mod registers;

pub use encoder::X64Encoder;
pub use generator::{NativeImage, X64Generator};
pub use pe::write_pe;
pub use prepare::prepare_function;
pub use registers::X64Backend;
