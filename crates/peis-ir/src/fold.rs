//! Constant folding
//!
//! Bottom-up rewrite of an expression tree. Operator nodes whose operands
//! fold to constants become constants themselves; every other node is
//! rebuilt around its folded children. Store targets always survive.

use crate::expression::{ExprKind, Expression};
use crate::function::Function;
use crate::intrinsics::IntrinsicOp;
use crate::types::Value;
use tracing::debug;

/// Bookkeeping for one folding run
#[derive(Debug, Default)]
pub struct FoldContext {
    /// Operator nodes replaced by constants
    pub folded: usize,
}

impl FoldContext {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Folds a function body in place
pub fn fold_function(function: &mut Function) -> usize {
    let mut ctx = FoldContext::new();
    let body = function.take_body();
    function.body = body.fold(&mut ctx);
    debug!(function = %function.full_name, folded = ctx.folded, "constant folding");
    ctx.folded
}

fn fold_box(expr: Box<Expression>, ctx: &mut FoldContext) -> Box<Expression> {
    Box::new(expr.fold(ctx))
}

fn fold_all(exprs: Vec<Expression>, ctx: &mut FoldContext) -> Vec<Expression> {
    exprs.into_iter().map(|e| e.fold(ctx)).collect()
}

impl Expression {
    /// Consumes the tree and returns its folded form
    pub fn fold(self, ctx: &mut FoldContext) -> Expression {
        let Expression { kind, ty, store } = self;

        let kind = match kind {
            ExprKind::Binary { op, left, right } => {
                let left = left.fold(ctx);
                let right = right.fold(ctx);
                if let (Some(a), Some(b)) = (left.as_constant(), right.as_constant()) {
                    if let Some(value) = fold_binary(op, a, b) {
                        ctx.folded += 1;
                        return Expression { kind: ExprKind::Constant(value), ty: value.ty(), store };
                    }
                }
                ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                }
            }

            ExprKind::Unary { op, operand } => {
                let operand = operand.fold(ctx);
                if let Some(value) = operand.as_constant().and_then(|v| fold_unary(op, v)) {
                    ctx.folded += 1;
                    return Expression { kind: ExprKind::Constant(value), ty: value.ty(), store };
                }
                ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                }
            }

            ExprKind::FunctionCall { function, args } => ExprKind::FunctionCall {
                function,
                args: fold_all(args, ctx),
            },

            // Conditions are not evaluated; only the subtrees fold
            ExprKind::If { condition, then_branch, else_branch } => ExprKind::If {
                condition: fold_box(condition, ctx),
                then_branch: fold_box(then_branch, ctx),
                else_branch: else_branch.map(|e| fold_box(e, ctx)),
            },

            ExprKind::While { condition, body } => ExprKind::While {
                condition: fold_box(condition, ctx),
                body: fold_box(body, ctx),
            },

            ExprKind::Return(value) => ExprKind::Return(value.map(|v| fold_box(v, ctx))),
            ExprKind::Sequence(statements) => ExprKind::Sequence(fold_all(statements, ctx)),
            ExprKind::Print(args) => ExprKind::Print(fold_all(args, ctx)),
            ExprKind::RealConversion(inner) => ExprKind::RealConversion(fold_box(inner, ctx)),

            leaf @ (ExprKind::Constant(_) | ExprKind::LocalLoad(_) | ExprKind::FailFast) => leaf,
        };

        Expression { kind, ty, store }
    }
}

/// `None` when no rule applies or the divisor is zero
pub fn fold_binary(op: IntrinsicOp, a: Value, b: Value) -> Option<Value> {
    use IntrinsicOp::*;

    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(match op {
            Add => Value::Int(x.wrapping_add(y)),
            Sub => Value::Int(x.wrapping_sub(y)),
            Mul => Value::Int(x.wrapping_mul(y)),
            Div if y != 0 => Value::Real(x as f64 / y as f64),
            IntDiv if y != 0 => Value::Int(x.wrapping_div(y)),
            Mod if y != 0 => {
                // Sign follows the divisor's magnitude: never negative
                let r = x.wrapping_rem(y);
                Value::Int(if r < 0 { r.wrapping_add(y.wrapping_abs()) } else { r })
            }
            And => Value::Int(x & y),
            Or => Value::Int(x | y),
            Xor => Value::Int(x ^ y),
            Eq => Value::Bool(x == y),
            Ne => Value::Bool(x != y),
            Lt => Value::Bool(x < y),
            Le => Value::Bool(x <= y),
            Gt => Value::Bool(x > y),
            Ge => Value::Bool(x >= y),
            _ => return None,
        }),

        (Value::Bool(x), Value::Bool(y)) => Some(match op {
            And => Value::Bool(x && y),
            Or => Value::Bool(x || y),
            Xor => Value::Bool(x ^ y),
            Eq => Value::Bool(x == y),
            Ne => Value::Bool(x != y),
            _ => return None,
        }),

        _ => {
            let x = a.as_real()?;
            let y = b.as_real()?;
            Some(match op {
                Add => Value::Real(x + y),
                Sub => Value::Real(x - y),
                Mul => Value::Real(x * y),
                Div if y != 0.0 => Value::Real(x / y),
                Eq => Value::Bool(x == y),
                Ne => Value::Bool(x != y),
                Lt => Value::Bool(x < y),
                Le => Value::Bool(x <= y),
                Gt => Value::Bool(x > y),
                Ge => Value::Bool(x >= y),
                _ => return None,
            })
        }
    }
}

pub fn fold_unary(op: IntrinsicOp, value: Value) -> Option<Value> {
    match (op, value) {
        (IntrinsicOp::Neg, Value::Int(x)) => Some(Value::Int(x.wrapping_neg())),
        (IntrinsicOp::Neg, Value::Real(x)) => Some(Value::Real(-x)),
        (IntrinsicOp::Not, Value::Bool(x)) => Some(Value::Bool(!x)),
        (IntrinsicOp::Not, Value::Int(x)) => Some(Value::Int(!x)),
        _ => None,
    }
}
