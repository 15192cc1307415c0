//! Single-use local elimination
//!
//! `t := e; ... t ...` where `t` is assigned once, read once, and the read is
//! the first thing the next statement evaluates, becomes `... e ...`. The
//! local is left behind with zero counts and never gets a location.

use crate::expression::{ExprKind, Expression};
use crate::function::Function;
use crate::local::{LocalId, LocalVariable};
use tracing::{debug, trace};

/// Runs over every sequence of the body; returns the number of locals removed
pub fn fold_single_use_locals(function: &mut Function) -> usize {
    let mut removed = 0;
    let body = function.take_body();
    function.body = rewrite(body, &mut function.locals, &mut removed);
    if removed > 0 {
        debug!(function = %function.full_name, removed, "single-use locals folded");
    }
    removed
}

fn rewrite_box(expr: Box<Expression>, locals: &mut [LocalVariable], removed: &mut usize) -> Box<Expression> {
    Box::new(rewrite(*expr, locals, removed))
}

fn rewrite(expr: Expression, locals: &mut [LocalVariable], removed: &mut usize) -> Expression {
    let Expression { kind, ty, store } = expr;
    let kind = match kind {
        ExprKind::Sequence(statements) => ExprKind::Sequence(rewrite_sequence(statements, locals, removed)),
        ExprKind::If { condition, then_branch, else_branch } => ExprKind::If {
            condition,
            then_branch: rewrite_box(then_branch, locals, removed),
            else_branch: else_branch.map(|e| rewrite_box(e, locals, removed)),
        },
        ExprKind::While { condition, body } => ExprKind::While {
            condition,
            body: rewrite_box(body, locals, removed),
        },
        other => other,
    };
    Expression { kind, ty, store }
}

fn rewrite_sequence(
    statements: Vec<Expression>,
    locals: &mut [LocalVariable],
    removed: &mut usize,
) -> Vec<Expression> {
    let mut out: Vec<Expression> = Vec::with_capacity(statements.len());

    for statement in statements {
        let mut statement = rewrite(statement, locals, removed);

        // Inlining may expose another candidate in the statement before
        while let Some(local) = out.last().and_then(|prev| single_use_target(prev, locals)) {
            if first_evaluated_load(&statement) != Some(local) {
                break;
            }
            let Some(mut prev) = out.pop() else { break };
            prev.set_store(None, locals);
            statement = substitute_first_load(statement, prev, locals);
            *removed += 1;
            trace!(local = %local, name = %locals[local.index()].name, "inlined single-use local");
        }

        out.push(statement);
    }

    out
}

/// The local `expr` stores into, if it qualifies for inlining
fn single_use_target(expr: &Expression, locals: &[LocalVariable]) -> Option<LocalId> {
    let id = expr.store?;
    let local = &locals[id.index()];
    (!local.is_parameter && local.assignment_count == 1 && local.use_count == 1).then_some(id)
}

/// Local read by the first leaf a statement evaluates. Loop bodies and
/// conditions run repeatedly and are never searched.
fn first_evaluated_load(expr: &Expression) -> Option<LocalId> {
    match &expr.kind {
        ExprKind::LocalLoad(id) => Some(*id),
        ExprKind::Constant(_) | ExprKind::FailFast | ExprKind::While { .. } => None,
        ExprKind::Binary { left, .. } => first_evaluated_load(left),
        ExprKind::Unary { operand, .. } => first_evaluated_load(operand),
        ExprKind::RealConversion(inner) => first_evaluated_load(inner),
        ExprKind::FunctionCall { args, .. } | ExprKind::Print(args) => args.first().and_then(first_evaluated_load),
        ExprKind::Return(value) => value.as_deref().and_then(first_evaluated_load),
        ExprKind::If { condition, .. } => first_evaluated_load(condition),
        ExprKind::Sequence(statements) => statements.first().and_then(first_evaluated_load),
    }
}

/// Replaces the first evaluated leaf (a load checked by the caller) with
/// `value`. The replacement inherits the load's store.
fn substitute_first_load(expr: Expression, value: Expression, locals: &mut [LocalVariable]) -> Expression {
    let Expression { kind, ty, store } = expr;
    let kind = match kind {
        ExprKind::LocalLoad(id) => {
            let local = &mut locals[id.index()];
            local.use_count = local.use_count.saturating_sub(1);
            // Store moves over without changing any count
            return Expression { store, ..value };
        }
        ExprKind::Binary { op, left, right } => ExprKind::Binary {
            op,
            left: Box::new(substitute_first_load(*left, value, locals)),
            right,
        },
        ExprKind::Unary { op, operand } => ExprKind::Unary {
            op,
            operand: Box::new(substitute_first_load(*operand, value, locals)),
        },
        ExprKind::RealConversion(inner) => {
            ExprKind::RealConversion(Box::new(substitute_first_load(*inner, value, locals)))
        }
        ExprKind::FunctionCall { function, args } => ExprKind::FunctionCall {
            function,
            args: substitute_in_first(args, value, locals),
        },
        ExprKind::Print(args) => ExprKind::Print(substitute_in_first(args, value, locals)),
        ExprKind::Return(Some(inner)) => {
            ExprKind::Return(Some(Box::new(substitute_first_load(*inner, value, locals))))
        }
        ExprKind::If { condition, then_branch, else_branch } => ExprKind::If {
            condition: Box::new(substitute_first_load(*condition, value, locals)),
            then_branch,
            else_branch,
        },
        ExprKind::Sequence(statements) => ExprKind::Sequence(substitute_in_first(statements, value, locals)),
        other => other,
    };
    Expression { kind, ty, store }
}

fn substitute_in_first(
    mut exprs: Vec<Expression>,
    value: Expression,
    locals: &mut [LocalVariable],
) -> Vec<Expression> {
    if !exprs.is_empty() {
        let first = exprs.remove(0);
        exprs.insert(0, substitute_first_load(first, value, locals));
    }
    exprs
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use crate::function::Purity;
    use crate::intrinsics::IntrinsicOp;
    use crate::symbols::FunctionId;
    use crate::types::{PrimitiveType, Value};

    fn function(locals: Vec<LocalVariable>, body: Vec<Expression>) -> Function {
        Function {
            id: FunctionId(0),
            full_name: "main.f".into(),
            locals,
            param_count: 0,
            body: Expression::sequence(body),
            purity: Purity::Unknown,
        }
    }

    fn locals(names: &[&str]) -> Vec<LocalVariable> {
        std::iter::once("$result")
            .chain(names.iter().copied())
            .map(|n| LocalVariable::new(n, PrimitiveType::Int, false))
            .collect()
    }

    fn load(id: u32, locals: &mut [LocalVariable]) -> Expression {
        locals[id as usize].use_count += 1;
        Expression::load(LocalId(id), PrimitiveType::Int)
    }

    fn ret(value: Expression) -> Expression {
        Expression::new(ExprKind::Return(Some(Box::new(value))), PrimitiveType::Void)
    }

    fn add(left: Expression, right: Expression) -> Expression {
        Expression::new(
            ExprKind::Binary {
                op: IntrinsicOp::Add,
                left: Box::new(left),
                right: Box::new(right),
            },
            PrimitiveType::Int,
        )
    }

    fn statements(f: &Function) -> &[Expression] {
        match &f.body.kind {
            ExprKind::Sequence(s) => s,
            _ => panic!("body is not a sequence"),
        }
    }

    #[test]
    fn test_adjacent_use_is_inlined() {
        // local := 2; return local
        let mut l = locals(&["local"]);
        let store = Expression::constant(Value::Int(2)).with_store(LocalId(1), &mut l);
        let use_ = ret(load(1, &mut l));
        let mut f = function(l, vec![store, use_]);

        assert_eq!(fold_single_use_locals(&mut f), 1);
        assert_eq!(statements(&f).len(), 1);
        assert_eq!(statements(&f)[0].to_string(), "return 2");
        assert!(f.local(LocalId(1)).is_dead());
    }

    #[test]
    fn test_chain_collapses() {
        // t1 := 5; t2 := t1 + 1; return t2
        let mut l = locals(&["t1", "t2"]);
        let s1 = Expression::constant(Value::Int(5)).with_store(LocalId(1), &mut l);
        let sum = add(load(1, &mut l), Expression::constant(Value::Int(1)));
        let s2 = sum.with_store(LocalId(2), &mut l);
        let s3 = ret(load(2, &mut l));
        let mut f = function(l, vec![s1, s2, s3]);

        assert_eq!(fold_single_use_locals(&mut f), 2);
        assert_eq!(statements(&f)[0].to_string(), "return (5 + 1)");
    }

    #[test]
    fn test_local_used_twice_stays() {
        // a := 2; return a + a
        let mut l = locals(&["a"]);
        let s1 = Expression::constant(Value::Int(2)).with_store(LocalId(1), &mut l);
        let sum = add(load(1, &mut l), load(1, &mut l));
        let mut f = function(l, vec![s1, ret(sum)]);

        assert_eq!(fold_single_use_locals(&mut f), 0);
        assert_eq!(statements(&f).len(), 2);
    }

    #[test]
    fn test_non_first_use_stays() {
        // a := 2; b := 3; return a + b
        let mut l = locals(&["a", "b"]);
        let s1 = Expression::constant(Value::Int(2)).with_store(LocalId(1), &mut l);
        let s2 = Expression::constant(Value::Int(3)).with_store(LocalId(2), &mut l);
        let sum = add(load(1, &mut l), load(2, &mut l));
        let mut f = function(l, vec![s1, s2, ret(sum)]);

        assert_eq!(fold_single_use_locals(&mut f), 0);
        assert_eq!(statements(&f).len(), 3);
    }

    #[test]
    fn test_copy_keeps_destination_store() {
        // t := 4; x := t
        let mut l = locals(&["t", "x"]);
        let s1 = Expression::constant(Value::Int(4)).with_store(LocalId(1), &mut l);
        let s2 = load(1, &mut l).with_store(LocalId(2), &mut l);
        let mut f = function(l, vec![s1, s2]);

        assert_eq!(fold_single_use_locals(&mut f), 1);
        assert_eq!(statements(&f)[0].to_string(), "%2 := 4");
        assert_eq!(f.local(LocalId(2)).assignment_count, 1);
    }

    #[test]
    fn test_parameters_are_never_inlined() {
        let mut l = locals(&["p"]);
        l[1].is_parameter = true;
        let s1 = Expression::constant(Value::Int(4)).with_store(LocalId(1), &mut l);
        let s2 = ret(load(1, &mut l));
        let mut f = function(l, vec![s1, s2]);

        assert_eq!(fold_single_use_locals(&mut f), 0);
    }
}
