//! Tree rewrite run before native allocation
//!
//! The x64 generator works in place: every operand has to sit in a
//! location of its own when the parent consumes it. This pass gives each
//! operand without a store a fresh temporary (`$t<n>`), and converts Int
//! operands of Real arithmetic so both sides live in SSE registers.

use peis_ir::{ExprKind, Expression, Function, LocalId, LocalVariable, PrimitiveType};
use tracing::trace;

/// Returns the number of temporaries introduced
pub fn prepare_function(function: &mut Function) -> usize {
    let body = function.take_body();
    let mut preparer = Preparer {
        locals: &mut function.locals,
        temporaries: 0,
    };
    let body = preparer.statement(body);
    let temporaries = preparer.temporaries;
    function.body = body;
    trace!(function = %function.full_name, temporaries, "prepared for x64");
    temporaries
}

struct Preparer<'a> {
    locals: &'a mut Vec<LocalVariable>,
    temporaries: usize,
}

fn to_real(expr: Expression) -> Expression {
    if expr.ty == PrimitiveType::Int {
        Expression::new(ExprKind::RealConversion(Box::new(expr)), PrimitiveType::Real)
    } else {
        expr
    }
}

impl Preparer<'_> {
    fn boxed(&mut self, expr: Box<Expression>) -> Box<Expression> {
        Box::new(self.statement(*expr))
    }

    fn operand(&mut self, expr: Expression) -> Expression {
        let mut expr = self.statement(expr);
        if expr.store.is_none() {
            let id = LocalId(self.locals.len() as u32);
            let mut temporary = LocalVariable::new(format!("$t{}", self.temporaries), expr.ty, false);
            temporary.use_count = 1;
            self.locals.push(temporary);
            self.temporaries += 1;
            expr.set_store(Some(id), &mut self.locals[..]);
        }
        expr
    }

    fn operands(&mut self, exprs: Vec<Expression>) -> Vec<Expression> {
        exprs.into_iter().map(|e| self.operand(e)).collect()
    }

    fn statement(&mut self, expr: Expression) -> Expression {
        let Expression { kind, ty, store } = expr;
        let kind = match kind {
            ExprKind::Binary { op, left, right } => {
                let (left, right) = if ty == PrimitiveType::Real {
                    (to_real(*left), to_real(*right))
                } else {
                    (*left, *right)
                };
                ExprKind::Binary {
                    op,
                    left: Box::new(self.operand(left)),
                    right: Box::new(self.operand(right)),
                }
            }
            ExprKind::Unary { op, operand } => ExprKind::Unary {
                op,
                operand: Box::new(self.operand(*operand)),
            },
            ExprKind::RealConversion(inner) => ExprKind::RealConversion(Box::new(self.operand(*inner))),
            ExprKind::FunctionCall { function, args } => ExprKind::FunctionCall {
                function,
                args: self.operands(args),
            },
            ExprKind::Print(args) => ExprKind::Print(self.operands(args)),
            ExprKind::Return(value) => ExprKind::Return(value.map(|v| self.boxed(v))),
            ExprKind::Sequence(statements) => {
                ExprKind::Sequence(statements.into_iter().map(|s| self.statement(s)).collect())
            }
            ExprKind::If { condition, then_branch, else_branch } => ExprKind::If {
                condition: self.boxed(condition),
                then_branch: self.boxed(then_branch),
                else_branch: else_branch.map(|e| self.boxed(e)),
            },
            ExprKind::While { condition, body } => ExprKind::While {
                condition: self.boxed(condition),
                body: self.boxed(body),
            },
            leaf @ (ExprKind::Constant(_) | ExprKind::LocalLoad(_) | ExprKind::FailFast) => leaf,
        };
        Expression { kind, ty, store }
    }
}
