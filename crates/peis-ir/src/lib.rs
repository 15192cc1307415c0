//! peis-ir - Intermediate representation of the Peis language
//!
//! Each function body becomes a single expression tree. Assignment is a
//! `store` target on a value-producing node; statements are `Void`
//! expressions. The passes here are shared by every target:
//!
//! ```text
//! AST modules (peis-parser)
//!         ↓
//!   [ProgramSymbols]   every module, constant and signature
//!         ↓
//!     [Lowering]       names, types, return guarantee
//!         ↓
//!   Function trees
//!         ↓
//!   [Constant folding] optional
//!         ↓
//!   [Single-use fold → liveness → linear scan]   per backend
//!         ↓
//!   peis-codegen
//! ```

pub mod expression;
pub mod fold;
pub mod function;
pub mod intrinsics;
pub mod liveness;
pub mod local;
pub mod lower;
pub mod regalloc;
pub mod scope;
pub mod single_use;
pub mod symbols;
pub mod types;

pub use expression::{ExprKind, Expression, TreeDisplay};
pub use fold::{fold_function, FoldContext};
pub use function::{Function, Purity};
pub use intrinsics::{Intrinsic, IntrinsicOp, IntrinsicTable};
pub use liveness::compute_intervals;
pub use local::{LiveInterval, LocalId, LocalVariable, Storage};
pub use lower::{lower_function, lower_program};
pub use regalloc::{assign_registers, AllocationResult, RegisterBackend};
pub use single_use::fold_single_use_locals;
pub use symbols::{FunctionId, FunctionSignature, ProgramSymbols};
pub use types::{PrimitiveType, Value};
