//! Functions in IR form

use crate::expression::{Expression, TreeDisplay};
use crate::local::{LocalId, LocalVariable};
use crate::symbols::FunctionId;
use crate::types::PrimitiveType;
use std::fmt;

/// Side-effect classification. Nothing computes it yet; it is carried so
/// later passes have a place to record it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Purity {
    #[default]
    Unknown,
    SideEffecting,
    Pure,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub id: FunctionId,
    /// `module.name`, case-folded
    pub full_name: String,
    /// Slot 0 is `$result` (typed with the return type), then the parameters
    pub locals: Vec<LocalVariable>,
    pub param_count: usize,
    pub body: Expression,
    pub purity: Purity,
}

impl Function {
    pub fn return_type(&self) -> PrimitiveType {
        self.locals[LocalId::RESULT.index()].ty
    }

    pub fn params(&self) -> &[LocalVariable] {
        &self.locals[1..=self.param_count]
    }

    pub fn param_types(&self) -> Vec<PrimitiveType> {
        self.params().iter().map(|p| p.ty).collect()
    }

    pub fn local(&self, id: LocalId) -> &LocalVariable {
        &self.locals[id.index()]
    }

    pub fn local_mut(&mut self, id: LocalId) -> &mut LocalVariable {
        &mut self.locals[id.index()]
    }

    pub fn add_local(&mut self, local: LocalVariable) -> LocalId {
        let id = LocalId(self.locals.len() as u32);
        self.locals.push(local);
        id
    }

    /// Clears intervals and locations ahead of a fresh allocation
    pub fn reset_allocation(&mut self) {
        for local in &mut self.locals {
            local.reset_allocation();
        }
    }

    /// Moves the body out, leaving an empty sequence behind
    pub fn take_body(&mut self) -> Expression {
        std::mem::replace(&mut self.body, Expression::sequence(Vec::new()))
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}(", self.return_type(), self.full_name)?;
        for (i, param) in self.params().iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} %{}", param.ty, i + 1)?;
        }
        writeln!(f, ")")?;

        for (index, local) in self.locals.iter().enumerate().skip(self.param_count + 1) {
            writeln!(
                f,
                "  ; %{} {} {} (assigned {}, used {})",
                index, local.ty, local.name, local.assignment_count, local.use_count
            )?;
        }

        write!(f, "{}", TreeDisplay(&self.body, 0))
    }
}
