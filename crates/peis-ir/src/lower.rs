//! Lowering AST → IR
//!
//! Builds one [`Function`] per declaration, checking names, types and
//! control flow as it goes. The first fatal problem aborts the whole
//! compilation; warnings are pushed to the diagnostics collector.

use crate::expression::{ExprKind, Expression};
use crate::function::{Function, Purity};
use crate::intrinsics::{Intrinsic, IntrinsicError, IntrinsicOp, IntrinsicTable};
use crate::local::{LocalId, LocalVariable};
use crate::scope::LocalVariableContext;
use crate::symbols::{fold_name, full_name, ProgramSymbols};
use crate::types::{PrimitiveType, Value};
use peis_error::{Diagnostic, Diagnostics, ErrorCode, Result, Span, Spanned};
use peis_parser::{Block, Expr, FnDecl, Module, Stmt};
use tracing::debug;

/// State while lowering one function body
pub struct LoweringContext<'a> {
    symbols: &'a ProgramSymbols,
    intrinsics: &'a IntrinsicTable,
    /// Folded name of the module being lowered
    module: String,
    locals: Vec<LocalVariable>,
    scope: LocalVariableContext,
    diagnostics: &'a mut Diagnostics,
}

/// Lowers every function of every module, in declaration order
pub fn lower_program(
    modules: &[Module],
    symbols: &ProgramSymbols,
    intrinsics: &IntrinsicTable,
    diagnostics: &mut Diagnostics,
) -> Result<Vec<Function>> {
    let mut functions = Vec::new();
    for module in modules {
        for decl in &module.functions {
            functions.push(lower_function(symbols, intrinsics, &module.name, decl, diagnostics)?);
        }
    }
    Ok(functions)
}

pub fn lower_function(
    symbols: &ProgramSymbols,
    intrinsics: &IntrinsicTable,
    module: &str,
    decl: &FnDecl,
    diagnostics: &mut Diagnostics,
) -> Result<Function> {
    let name = full_name(module, &decl.name);
    let signature = symbols.function_by_full_name(&name).ok_or_else(|| {
        Diagnostic::error(format!("function `{}` was not collected", name))
            .with_code(ErrorCode::INTERNAL)
            .with_label(decl.span, "here")
    })?;
    let id = signature.id;
    let return_type = signature.return_type;

    let mut ctx = LoweringContext {
        symbols,
        intrinsics,
        module: fold_name(module),
        locals: vec![LocalVariable::new("$result", return_type, false)],
        scope: LocalVariableContext::new(),
        diagnostics,
    };

    for param in &decl.params {
        ctx.declare_parameter(&param.name, PrimitiveType::from_ast(param.ty), param.span)?;
    }

    let (mut body, guaranteed) = ctx.lower_block(&decl.body)?;
    if !guaranteed {
        if return_type != PrimitiveType::Void {
            return Err(Diagnostic::error(format!("function `{}` may end without returning a value", decl.name))
                .with_code(ErrorCode::RETURN_NOT_GUARANTEED)
                .with_label(decl.body.span, "not every path reaches a `return`")
                .with_help(format!("add a `return` of type {} at the end", return_type)));
        }
        if let ExprKind::Sequence(statements) = &mut body.kind {
            statements.push(Expression::new(ExprKind::Return(None), PrimitiveType::Void));
        }
    }

    debug!(function = %name, locals = ctx.locals.len(), "lowered function");

    Ok(Function {
        id,
        full_name: name,
        locals: ctx.locals,
        param_count: decl.params.len(),
        body,
        purity: Purity::Unknown,
    })
}

impl<'a> LoweringContext<'a> {
    fn declare_parameter(&mut self, name: &str, ty: PrimitiveType, span: Span) -> Result<()> {
        let folded = fold_name(name);
        if self.symbols.resolve_constant(&self.module, &folded).is_some() {
            return Err(Diagnostic::error(format!("parameter `{}` shadows a constant", name))
                .with_code(ErrorCode::NAME_ALREADY_DEFINED)
                .with_label(span, "constant with this name is visible here"));
        }
        let id = LocalId(self.locals.len() as u32);
        if !self.scope.declare(&folded, id) {
            return Err(Diagnostic::error(format!("parameter `{}` is declared twice", name))
                .with_code(ErrorCode::NAME_ALREADY_DEFINED)
                .with_label(span, "duplicate parameter"));
        }
        self.locals.push(LocalVariable::new(name, ty, true));
        Ok(())
    }

    fn declare_local(&mut self, name: &str, folded: &str, ty: PrimitiveType) -> LocalId {
        let id = LocalId(self.locals.len() as u32);
        self.locals.push(LocalVariable::new(name, PrimitiveType::NoType, false));
        self.scope.declare(folded, id);
        // First assignment fixes the type
        self.locals[id.index()].ty = ty;
        id
    }

    fn load(&mut self, id: LocalId) -> Expression {
        let local = &mut self.locals[id.index()];
        local.use_count += 1;
        Expression::load(id, local.ty)
    }

    fn result_type(&self) -> PrimitiveType {
        self.locals[LocalId::RESULT.index()].ty
    }

    /// Returns the sequence and whether it always returns
    fn lower_block(&mut self, block: &Block) -> Result<(Expression, bool)> {
        self.scope.push_scope();
        let result = self.lower_statements(&block.statements);
        self.scope.pop_scope();
        result
    }

    fn lower_statements(&mut self, statements: &[Stmt]) -> Result<(Expression, bool)> {
        let mut lowered = Vec::with_capacity(statements.len());
        let mut guaranteed = false;
        let mut warned = false;

        for stmt in statements {
            if guaranteed && !warned {
                self.diagnostics.push(
                    Diagnostic::warning("unreachable code")
                        .with_code(ErrorCode::UNREACHABLE_CODE)
                        .with_label(stmt.span(), "this statement is never executed"),
                );
                warned = true;
            }
            let (expr, returns) = self.lower_statement(stmt)?;
            guaranteed |= returns;
            lowered.push(expr);
        }

        Ok((Expression::sequence(lowered), guaranteed))
    }

    /// Branches and loop bodies get their own scope even without `begin`
    fn lower_nested(&mut self, stmt: &Stmt) -> Result<(Expression, bool)> {
        self.scope.push_scope();
        let result = self.lower_statement(stmt);
        self.scope.pop_scope();
        result
    }

    fn lower_statement(&mut self, stmt: &Stmt) -> Result<(Expression, bool)> {
        match stmt {
            Stmt::Block(block) => self.lower_block(block),

            Stmt::Assign { target, value, span } => {
                let expr = self.lower_assignment(target, value, *span)?;
                Ok((expr, false))
            }

            Stmt::If { condition, then_branch, else_branch, .. } => {
                let condition = self.lower_condition(condition)?;
                let (then_expr, then_returns) = self.lower_nested(then_branch)?;
                let (else_expr, else_returns) = match else_branch {
                    Some(branch) => {
                        let (expr, returns) = self.lower_nested(branch)?;
                        (Some(Box::new(expr)), returns)
                    }
                    None => (None, false),
                };
                let expr = Expression::new(
                    ExprKind::If {
                        condition: Box::new(condition),
                        then_branch: Box::new(then_expr),
                        else_branch: else_expr,
                    },
                    PrimitiveType::Void,
                );
                Ok((expr, then_returns && else_returns))
            }

            Stmt::While { condition, body, .. } => {
                let condition = self.lower_condition(condition)?;
                let (body, _) = self.lower_nested(body)?;
                let expr = Expression::new(
                    ExprKind::While {
                        condition: Box::new(condition),
                        body: Box::new(body),
                    },
                    PrimitiveType::Void,
                );
                Ok((expr, false))
            }

            Stmt::Return { value, span } => {
                let expected = self.result_type();
                let value = match value {
                    Some(value) => {
                        let expr = self.lower_expr(value)?;
                        if expected == PrimitiveType::Void {
                            return Err(Diagnostic::error("a Void function cannot return a value")
                                .with_code(ErrorCode::WRONG_TYPE)
                                .with_label(value.span(), "remove this value"));
                        }
                        if expr.ty != expected {
                            return Err(wrong_type(value.span(), expected, expr.ty));
                        }
                        Some(Box::new(expr))
                    }
                    None => {
                        if expected != PrimitiveType::Void {
                            return Err(Diagnostic::error(format!("missing return value of type {}", expected))
                                .with_code(ErrorCode::WRONG_TYPE)
                                .with_label(*span, "returns nothing"));
                        }
                        None
                    }
                };
                Ok((Expression::new(ExprKind::Return(value), PrimitiveType::Void), true))
            }

            Stmt::Expr(expr) => Ok((self.lower_expr(expr)?, false)),
        }
    }

    fn lower_assignment(&mut self, target: &str, value: &Expr, span: Span) -> Result<Expression> {
        let folded = fold_name(target);
        if self.symbols.resolve_constant(&self.module, &folded).is_some() {
            return Err(Diagnostic::error(format!("cannot assign to constant `{}`", target))
                .with_code(ErrorCode::MAY_NOT_ASSIGN_TO_CONST)
                .with_label(span, "constants are read-only"));
        }
        if folded.contains('.') {
            return Err(name_not_found(target, span));
        }

        let mut expr = self.lower_expr(value)?;
        if matches!(expr.ty, PrimitiveType::Void | PrimitiveType::NoType) {
            return Err(Diagnostic::error(format!("cannot assign a {} value to `{}`", expr.ty, target))
                .with_code(ErrorCode::WRONG_TYPE)
                .with_label(value.span(), "this produces no value"));
        }

        let id = match self.scope.lookup(&folded) {
            Some(id) => {
                let expected = self.locals[id.index()].ty;
                if expected != expr.ty {
                    return Err(wrong_type(value.span(), expected, expr.ty)
                        .with_note(format!("`{}` was first assigned a {}", target, expected)));
                }
                id
            }
            None => self.declare_local(target, &folded, expr.ty),
        };

        expr.set_store(Some(id), &mut self.locals);
        Ok(expr)
    }

    fn lower_condition(&mut self, condition: &Expr) -> Result<Expression> {
        let expr = self.lower_expr(condition)?;
        if expr.ty != PrimitiveType::Bool {
            return Err(wrong_type(condition.span(), PrimitiveType::Bool, expr.ty));
        }
        Ok(expr)
    }

    fn lower_expr(&mut self, expr: &Expr) -> Result<Expression> {
        match expr {
            Expr::Literal { value, .. } => Ok(Expression::constant(Value::from_literal(*value))),

            Expr::Name { name, span } => self.lower_name(name, *span),

            Expr::Call { callee, args, span } => self.lower_call(callee, args, *span),

            Expr::Binary { op, left, right, span } => {
                let intrinsic = self.operator(op.intrinsic_name(), *span)?;
                let operands = [left.as_ref(), right.as_ref()];
                self.lower_intrinsic(intrinsic, &operands, *span)
            }

            Expr::Unary { op, operand, span } => {
                let intrinsic = self.operator(op.intrinsic_name(), *span)?;
                self.lower_intrinsic(intrinsic, &[operand.as_ref()], *span)
            }
        }
    }

    fn operator(&self, name: &str, span: Span) -> Result<&'a Intrinsic> {
        let intrinsics = self.intrinsics;
        intrinsics.lookup(name).ok_or_else(|| {
            Diagnostic::error(format!("operator `{}` has no intrinsic", name))
                .with_code(ErrorCode::INTERNAL)
                .with_label(span, "here")
        })
    }

    /// Constants take priority over locals
    fn lower_name(&mut self, name: &str, span: Span) -> Result<Expression> {
        let folded = fold_name(name);

        if let Some(constant) = self.symbols.resolve_constant(&self.module, &folded) {
            return Ok(Expression::constant(constant.value));
        }
        if !folded.contains('.') {
            if let Some(id) = self.scope.lookup(&folded) {
                return Ok(self.load(id));
            }
        }
        if self.symbols.resolve_function(&self.module, &folded).is_some() || self.intrinsics.lookup(&folded).is_some() {
            return Err(Diagnostic::error(format!("function `{}` used as a value", name))
                .with_code(ErrorCode::WRONG_TYPE)
                .with_label(span, "functions are not values")
                .with_help(format!("call it: `{}(...)`", name)));
        }
        Err(name_not_found(name, span))
    }

    /// Intrinsics win over user functions of the same name
    fn lower_call(&mut self, callee: &str, args: &[Expr], span: Span) -> Result<Expression> {
        let folded = fold_name(callee);

        let intrinsics = self.intrinsics;
        if let Some(intrinsic) = intrinsics.lookup(&folded) {
            let operands: Vec<&Expr> = args.iter().collect();
            return self.lower_intrinsic(intrinsic, &operands, span);
        }

        let Some(signature) = self.symbols.resolve_function(&self.module, &folded) else {
            return Err(name_not_found(callee, span));
        };
        let (function, return_type, params) = (signature.id, signature.return_type, signature.params.clone());

        if args.len() < params.len() {
            return Err(Diagnostic::error(format!(
                "`{}` expects {} arguments, found {}",
                callee,
                params.len(),
                args.len()
            ))
            .with_code(ErrorCode::NOT_ENOUGH_PARAMETERS)
            .with_label(span, "missing arguments"));
        }
        if args.len() > params.len() {
            return Err(Diagnostic::error(format!(
                "`{}` expects {} arguments, found {}",
                callee,
                params.len(),
                args.len()
            ))
            .with_code(ErrorCode::TOO_MANY_PARAMETERS)
            .with_label(args[params.len()].span(), "unexpected argument"));
        }

        let mut lowered = Vec::with_capacity(args.len());
        for (arg, &expected) in args.iter().zip(&params) {
            let expr = self.lower_expr(arg)?;
            if expr.ty != expected {
                return Err(wrong_type(arg.span(), expected, expr.ty));
            }
            lowered.push(expr);
        }

        Ok(Expression::new(ExprKind::FunctionCall { function, args: lowered }, return_type))
    }

    fn lower_intrinsic(&mut self, intrinsic: &Intrinsic, operands: &[&Expr], span: Span) -> Result<Expression> {
        let mut args = Vec::with_capacity(operands.len());
        for operand in operands {
            args.push(self.lower_expr(operand)?);
        }
        let types: Vec<PrimitiveType> = args.iter().map(|a| a.ty).collect();

        let ty = intrinsic
            .check(&types)
            .map_err(|err| intrinsic_error(intrinsic, err, operands, span))?;

        let op = intrinsic.op;
        let kind = match op {
            IntrinsicOp::Print => ExprKind::Print(args),
            IntrinsicOp::FailFast => ExprKind::FailFast,
            _ => {
                let mut args = args.into_iter();
                match (args.next(), args.next()) {
                    (Some(left), Some(right)) => ExprKind::Binary {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                    (Some(operand), None) => ExprKind::Unary {
                        op,
                        operand: Box::new(operand),
                    },
                    _ => {
                        return Err(Diagnostic::error(format!("intrinsic `{}` has no operands", op.name()))
                            .with_code(ErrorCode::INTERNAL)
                            .with_label(span, "here"))
                    }
                }
            }
        };

        Ok(Expression::new(kind, ty))
    }
}

fn wrong_type(span: Span, expected: PrimitiveType, found: PrimitiveType) -> Diagnostic {
    Diagnostic::error(format!("expected {}, found {}", expected, found))
        .with_code(ErrorCode::WRONG_TYPE)
        .with_label(span, format!("this is {}", found))
}

fn name_not_found(name: &str, span: Span) -> Diagnostic {
    Diagnostic::error(format!("name `{}` not found", name))
        .with_code(ErrorCode::NAME_NOT_FOUND)
        .with_label(span, "not a local, constant or function in scope")
}

fn intrinsic_error(intrinsic: &Intrinsic, err: IntrinsicError, operands: &[&Expr], span: Span) -> Diagnostic {
    let name = intrinsic.name();
    match err {
        IntrinsicError::NotEnoughParameters { expected, found } => {
            Diagnostic::error(format!("`{}` expects at least {} arguments, found {}", name, expected, found))
                .with_code(ErrorCode::NOT_ENOUGH_PARAMETERS)
                .with_label(span, "missing arguments")
        }
        IntrinsicError::TooManyParameters { expected, found } => {
            Diagnostic::error(format!("`{}` expects at most {} arguments, found {}", name, expected, found))
                .with_code(ErrorCode::TOO_MANY_PARAMETERS)
                .with_label(span, "too many arguments")
        }
        IntrinsicError::WrongType { index, found, expected } => {
            let at = operands.get(index).map(|e| e.span()).unwrap_or(span);
            Diagnostic::error(format!("`{}` expects {}, found {}", name, expected, found))
                .with_code(ErrorCode::WRONG_TYPE)
                .with_label(at, format!("this is {}", found))
        }
        IntrinsicError::ParamsMustBeSameType { first, other } => {
            Diagnostic::error(format!("operands of `{}` must have the same type", name))
                .with_code(ErrorCode::PARAMS_MUST_BE_SAME_TYPE)
                .with_label(span, format!("found {} and {}", first, other))
        }
    }
}
