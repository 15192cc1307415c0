//! Expression trees
//!
//! A function body is a single owned tree. Statements are expressions of type
//! `Void`; any value-producing node may carry a `store` target, which is how
//! assignment is represented. Passes consume a tree and build a new one.

use crate::intrinsics::IntrinsicOp;
use crate::local::{LocalId, LocalVariable};
use crate::symbols::FunctionId;
use crate::types::{PrimitiveType, Value};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub kind: ExprKind,
    pub ty: PrimitiveType,
    /// Local receiving the value, if any
    pub store: Option<LocalId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Constant(Value),
    LocalLoad(LocalId),
    FunctionCall {
        function: FunctionId,
        args: Vec<Expression>,
    },
    Binary {
        op: IntrinsicOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Unary {
        op: IntrinsicOp,
        operand: Box<Expression>,
    },
    If {
        condition: Box<Expression>,
        then_branch: Box<Expression>,
        else_branch: Option<Box<Expression>>,
    },
    While {
        condition: Box<Expression>,
        body: Box<Expression>,
    },
    Return(Option<Box<Expression>>),
    Sequence(Vec<Expression>),
    Print(Vec<Expression>),
    FailFast,
    /// Int to Real, inserted for native targets
    RealConversion(Box<Expression>),
}

impl Expression {
    pub fn new(kind: ExprKind, ty: PrimitiveType) -> Self {
        Self { kind, ty, store: None }
    }

    pub fn constant(value: Value) -> Self {
        Self::new(ExprKind::Constant(value), value.ty())
    }

    /// Load of `id`. The caller accounts for the use.
    pub fn load(id: LocalId, ty: PrimitiveType) -> Self {
        Self::new(ExprKind::LocalLoad(id), ty)
    }

    pub fn sequence(statements: Vec<Expression>) -> Self {
        Self::new(ExprKind::Sequence(statements), PrimitiveType::Void)
    }

    /// Retargets the store, keeping assignment counts in step
    pub fn set_store(&mut self, store: Option<LocalId>, locals: &mut [LocalVariable]) {
        if let Some(old) = self.store {
            let local = &mut locals[old.index()];
            local.assignment_count = local.assignment_count.saturating_sub(1);
        }
        if let Some(new) = store {
            locals[new.index()].assignment_count += 1;
        }
        self.store = store;
    }

    pub fn with_store(mut self, store: LocalId, locals: &mut [LocalVariable]) -> Self {
        self.set_store(Some(store), locals);
        self
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, ExprKind::Constant(_) | ExprKind::LocalLoad(_))
    }

    /// Leaves a value behind that nobody consumes
    pub fn leaves_unused_value(&self) -> bool {
        self.store.is_none() && !matches!(self.ty, PrimitiveType::Void | PrimitiveType::NoType)
    }

    pub fn as_constant(&self) -> Option<Value> {
        match self.kind {
            ExprKind::Constant(value) => Some(value),
            _ => None,
        }
    }

    fn write_tree(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let pad = "  ".repeat(indent);
        match &self.kind {
            ExprKind::If { condition, then_branch, else_branch } => {
                writeln!(f, "{}if {}", pad, condition)?;
                then_branch.write_tree(f, indent + 1)?;
                if let Some(else_branch) = else_branch {
                    writeln!(f, "{}else", pad)?;
                    else_branch.write_tree(f, indent + 1)?;
                }
                Ok(())
            }
            ExprKind::While { condition, body } => {
                writeln!(f, "{}while {}", pad, condition)?;
                body.write_tree(f, indent + 1)
            }
            ExprKind::Sequence(statements) => {
                writeln!(f, "{}begin", pad)?;
                for statement in statements {
                    statement.write_tree(f, indent + 1)?;
                }
                writeln!(f, "{}end", pad)
            }
            _ => writeln!(f, "{}{}", pad, self),
        }
    }
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[Expression]) -> fmt::Result {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", arg)?;
    }
    Ok(())
}

/// Single-line rendering; `Function`'s `Display` prints whole bodies
impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(store) = self.store {
            write!(f, "{} := ", store)?;
        }
        match &self.kind {
            ExprKind::Constant(value) => write!(f, "{}", value),
            ExprKind::LocalLoad(id) => write!(f, "{}", id),
            ExprKind::FunctionCall { function, args } => {
                write!(f, "call {}(", function)?;
                write_args(f, args)?;
                write!(f, ")")
            }
            ExprKind::Binary { op, left, right } => write!(f, "({} {} {})", left, op.name(), right),
            ExprKind::Unary { op, operand } => write!(f, "{}({})", op.name(), operand),
            ExprKind::If { condition, .. } => write!(f, "if {} ...", condition),
            ExprKind::While { condition, .. } => write!(f, "while {} ...", condition),
            ExprKind::Return(None) => write!(f, "return"),
            ExprKind::Return(Some(value)) => write!(f, "return {}", value),
            ExprKind::Sequence(statements) => write!(f, "begin ({} statements) end", statements.len()),
            ExprKind::Print(args) => {
                write!(f, "print(")?;
                write_args(f, args)?;
                write!(f, ")")
            }
            ExprKind::FailFast => write!(f, "failfast()"),
            ExprKind::RealConversion(inner) => write!(f, "real({})", inner),
        }
    }
}

/// Multi-line rendering of a statement tree
pub struct TreeDisplay<'a>(pub &'a Expression, pub usize);

impl fmt::Display for TreeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.write_tree(f, self.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_store_tracks_counts() {
        let mut locals = vec![
            LocalVariable::new("$result", PrimitiveType::Int, false),
            LocalVariable::new("a", PrimitiveType::Int, false),
            LocalVariable::new("b", PrimitiveType::Int, false),
        ];
        let mut expr = Expression::constant(Value::Int(2)).with_store(LocalId(1), &mut locals);
        assert_eq!(locals[1].assignment_count, 1);

        expr.set_store(Some(LocalId(2)), &mut locals);
        assert_eq!(locals[1].assignment_count, 0);
        assert_eq!(locals[2].assignment_count, 1);

        expr.set_store(None, &mut locals);
        assert_eq!(locals[2].assignment_count, 0);
        assert_eq!(expr.store, None);
    }

    #[test]
    fn test_display() {
        let sum = Expression::new(
            ExprKind::Binary {
                op: IntrinsicOp::Add,
                left: Box::new(Expression::load(LocalId(1), PrimitiveType::Int)),
                right: Box::new(Expression::constant(Value::Int(3))),
            },
            PrimitiveType::Int,
        );
        let ret = Expression::new(ExprKind::Return(Some(Box::new(sum))), PrimitiveType::Void);
        assert_eq!(ret.to_string(), "return (%1 + 3)");

        let tree = Expression::sequence(vec![ret]);
        assert_eq!(TreeDisplay(&tree, 0).to_string(), "begin\n  return (%1 + 3)\nend\n");
    }

    #[test]
    fn test_unused_value() {
        assert!(Expression::constant(Value::Int(1)).leaves_unused_value());
        assert!(!Expression::sequence(vec![]).leaves_unused_value());
    }
}
