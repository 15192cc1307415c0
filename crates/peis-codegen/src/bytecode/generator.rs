//! Expression trees to stack-machine code
//!
//! Every value-producing node leaves exactly one value on the operand
//! stack. A store pops it into the local's slot; statements whose value
//! nobody consumes are followed by `PopDiscard`.

use crate::bytecode::backend::BytecodeBackend;
use crate::bytecode::opcode::{BytecodeOp, Opcode};
use crate::bytecode::program::{CompiledFunction, CompiledLocal, CompiledProgram, PooledConstant};
use crate::error::{CodegenError, CodegenResult};
use crate::{CodeGenerator, Target};
use peis_ir::{
    assign_registers, compute_intervals, fold_single_use_locals, ExprKind, Expression, Function, FunctionId,
    IntrinsicOp, LocalId, LocalVariable, Storage, Value,
};
use std::collections::HashMap;
use tracing::debug;

fn operand(what: &'static str, value: usize) -> CodegenResult<i16> {
    i16::try_from(value).map_err(|_| CodegenError::OperandOverflow {
        what,
        value: value as i64,
    })
}

/// Program-wide constant pool, deduplicated by canonical name
#[derive(Debug, Default)]
struct ConstantPool {
    entries: Vec<PooledConstant>,
    index: HashMap<String, i16>,
}

impl ConstantPool {
    fn intern(&mut self, value: Value) -> CodegenResult<i16> {
        let name = value.canonical_name();
        if let Some(&index) = self.index.get(&name) {
            return Ok(index);
        }
        let index = operand("constant index", self.entries.len())?;
        self.index.insert(name.clone(), index);
        self.entries.push(PooledConstant { name, value });
        Ok(index)
    }
}

#[derive(Debug, Default)]
pub struct BytecodeGenerator {
    constants: ConstantPool,
    /// Indexed by function id
    functions: Vec<Option<CompiledFunction>>,
}

impl BytecodeGenerator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CodeGenerator for BytecodeGenerator {
    type Output = CompiledProgram;

    fn target(&self) -> Target {
        Target::Bytecode
    }

    fn generate_function(&mut self, function: &mut Function) -> CodegenResult<()> {
        fold_single_use_locals(function);
        compute_intervals(function);
        let mut backend = BytecodeBackend::new();
        assign_registers(function, &mut backend);

        let mut emitter = FunctionEmitter {
            code: Vec::new(),
            locals: &function.locals,
            constants: &mut self.constants,
        };
        emitter.statement(&function.body)?;
        let code = emitter.code;

        let names = backend.slot_names(&function.locals);
        let locals = backend
            .slot_types()
            .iter()
            .zip(names)
            .map(|(&ty, name)| CompiledLocal { name, ty })
            .collect();

        debug!(
            function = %function.full_name,
            instructions = code.len(),
            slots = backend.slot_count(),
            "bytecode generated"
        );

        let index = function.id.index();
        if self.functions.len() <= index {
            self.functions.resize(index + 1, None);
        }
        self.functions[index] = Some(CompiledFunction {
            name: function.full_name.clone(),
            return_type: function.return_type(),
            param_count: function.param_count,
            locals,
            code,
        });
        Ok(())
    }

    fn finish(self, main: FunctionId) -> CodegenResult<CompiledProgram> {
        let functions = self
            .functions
            .into_iter()
            .enumerate()
            .map(|(index, f)| f.ok_or(CodegenError::MissingFunction { index }))
            .collect::<CodegenResult<Vec<_>>>()?;
        if main.index() >= functions.len() {
            return Err(CodegenError::MissingFunction { index: main.index() });
        }
        Ok(CompiledProgram {
            constants: self.constants.entries,
            functions,
            main_function: main.0,
        })
    }
}

struct FunctionEmitter<'a> {
    code: Vec<BytecodeOp>,
    locals: &'a [LocalVariable],
    constants: &'a mut ConstantPool,
}

impl FunctionEmitter<'_> {
    fn push(&mut self, opcode: Opcode, operand: i16) -> usize {
        self.code.push(BytecodeOp::new(opcode, operand));
        self.code.len() - 1
    }

    fn slot(&self, id: LocalId) -> CodegenResult<Option<i16>> {
        match self.locals[id.index()].storage {
            Storage::Stack(slot) => Ok(Some(operand("local slot", slot as usize)?)),
            Storage::Unassigned => Ok(None),
            Storage::Register(_) => Err(CodegenError::internal(format!(
                "local {} was given a register by the stack machine",
                self.locals[id.index()].name
            ))),
        }
    }

    /// Points the jump at `jump` to the next instruction emitted
    fn patch_to_here(&mut self, jump: usize) -> CodegenResult<()> {
        let target = self.code.len();
        self.patch(jump, target)
    }

    /// Offsets are relative to the instruction after the jump
    fn patch(&mut self, jump: usize, target: usize) -> CodegenResult<()> {
        let offset = target as i64 - (jump as i64 + 1);
        self.code[jump].operand = i16::try_from(offset).map_err(|_| CodegenError::OperandOverflow {
            what: "jump offset",
            value: offset,
        })?;
        Ok(())
    }

    fn intrinsic(&mut self, op: IntrinsicOp, argc: usize) -> CodegenResult<()> {
        let opcode = Opcode::call_intrinsic(argc)
            .ok_or_else(|| CodegenError::internal(format!("{} called with {} arguments", op.name(), argc)))?;
        self.push(opcode, op.id() as i16);
        Ok(())
    }

    /// Statement position: nothing may be left on the operand stack
    fn statement(&mut self, expr: &Expression) -> CodegenResult<()> {
        self.node(expr)?;
        match expr.store {
            Some(id) => match self.slot(id)? {
                Some(slot) => {
                    self.push(Opcode::PopLocal, slot);
                }
                None => {
                    self.push(Opcode::PopDiscard, 0);
                }
            },
            None if expr.leaves_unused_value() => {
                self.push(Opcode::PopDiscard, 0);
            }
            None => {}
        }
        Ok(())
    }

    /// Operand position: exactly one value stays on the operand stack
    fn value(&mut self, expr: &Expression) -> CodegenResult<()> {
        self.node(expr)?;
        if let Some(id) = expr.store {
            if let Some(slot) = self.slot(id)? {
                self.push(Opcode::PopLocal, slot);
                self.push(Opcode::PushLocal, slot);
            }
        }
        Ok(())
    }

    fn node(&mut self, expr: &Expression) -> CodegenResult<()> {
        match &expr.kind {
            ExprKind::Constant(value) => {
                let index = self.constants.intern(*value)?;
                self.push(Opcode::PushConst, index);
            }

            ExprKind::LocalLoad(id) => {
                let slot = self.slot(*id)?.ok_or_else(|| {
                    CodegenError::internal(format!("load of unallocated local {}", self.locals[id.index()].name))
                })?;
                self.push(Opcode::PushLocal, slot);
            }

            ExprKind::Binary { op, left, right } => {
                self.value(left)?;
                self.value(right)?;
                self.intrinsic(*op, 2)?;
            }

            ExprKind::Unary { op, operand } => {
                self.value(operand)?;
                self.intrinsic(*op, 1)?;
            }

            ExprKind::RealConversion(inner) => {
                self.value(inner)?;
                self.intrinsic(IntrinsicOp::ToReal, 1)?;
            }

            ExprKind::FunctionCall { function, args } => {
                for arg in args {
                    self.value(arg)?;
                }
                self.push(Opcode::Call, operand("function index", function.index())?);
            }

            ExprKind::Print(args) => {
                for arg in args {
                    self.value(arg)?;
                }
                self.intrinsic(IntrinsicOp::Print, args.len())?;
            }

            ExprKind::FailFast => self.intrinsic(IntrinsicOp::FailFast, 0)?,

            ExprKind::Return(value) => {
                if let Some(value) = value {
                    self.value(value)?;
                }
                self.push(Opcode::Return, 0);
            }

            ExprKind::Sequence(statements) => {
                for statement in statements {
                    self.statement(statement)?;
                }
            }

            ExprKind::If { condition, then_branch, else_branch } => {
                self.value(condition)?;
                let skip_then = self.push(Opcode::JumpFalse, 0);
                self.statement(then_branch)?;
                match else_branch {
                    Some(else_branch) => {
                        let skip_else = self.push(Opcode::Jump, 0);
                        self.patch_to_here(skip_then)?;
                        self.statement(else_branch)?;
                        self.patch_to_here(skip_else)?;
                    }
                    None => self.patch_to_here(skip_then)?,
                }
            }

            ExprKind::While { condition, body } => {
                let start = self.code.len();
                self.value(condition)?;
                let exit = self.push(Opcode::JumpFalse, 0);
                self.statement(body)?;
                let back = self.push(Opcode::Jump, 0);
                self.patch(back, start)?;
                self.patch_to_here(exit)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peis_ir::{LocalVariable, PrimitiveType, Purity};
    use pretty_assertions::assert_eq;

    fn function(locals: Vec<LocalVariable>, param_count: usize, body: Vec<Expression>) -> Function {
        Function {
            id: FunctionId(0),
            full_name: "main.main".into(),
            locals,
            param_count,
            body: Expression::sequence(body),
            purity: Purity::Unknown,
        }
    }

    fn ret(value: Expression) -> Expression {
        Expression::new(ExprKind::Return(Some(Box::new(value))), PrimitiveType::Void)
    }

    fn ops(program: &CompiledProgram) -> Vec<(Opcode, i16)> {
        program.functions[0].code.iter().map(|op| (op.opcode, op.operand)).collect()
    }

    fn compile(mut f: Function) -> CompiledProgram {
        let mut generator = BytecodeGenerator::new();
        generator.generate_function(&mut f).unwrap();
        generator.finish(FunctionId(0)).unwrap()
    }

    #[test]
    fn test_return_constant() {
        let locals = vec![LocalVariable::new("$result", PrimitiveType::Int, false)];
        let program = compile(function(locals, 0, vec![ret(Expression::constant(Value::Int(100)))]));

        assert_eq!(ops(&program), vec![(Opcode::PushConst, 0), (Opcode::Return, 0)]);
        assert_eq!(program.constants[0].name, "$literal_100");
        assert!(program.functions[0].locals.is_empty());
    }

    #[test]
    fn test_unused_value_is_discarded() {
        let locals = vec![LocalVariable::new("$result", PrimitiveType::Void, false)];
        let body = vec![
            Expression::constant(Value::Int(7)),
            Expression::new(ExprKind::Return(None), PrimitiveType::Void),
        ];
        let program = compile(function(locals, 0, body));

        assert_eq!(
            ops(&program),
            vec![(Opcode::PushConst, 0), (Opcode::PopDiscard, 0), (Opcode::Return, 0)]
        );
    }

    #[test]
    fn test_constants_are_shared() {
        let locals = vec![LocalVariable::new("$result", PrimitiveType::Int, false)];
        let sum = Expression::new(
            ExprKind::Binary {
                op: IntrinsicOp::Add,
                left: Box::new(Expression::constant(Value::Int(3))),
                right: Box::new(Expression::constant(Value::Int(3))),
            },
            PrimitiveType::Int,
        );
        let program = compile(function(locals, 0, vec![ret(sum)]));

        assert_eq!(program.constants.len(), 1);
        assert_eq!(
            ops(&program),
            vec![
                (Opcode::PushConst, 0),
                (Opcode::PushConst, 0),
                (Opcode::CallI2, IntrinsicOp::Add.id() as i16),
                (Opcode::Return, 0),
            ]
        );
    }

    #[test]
    fn test_if_else_jumps() {
        // if p print(1) else print(2); return
        let mut locals = vec![
            LocalVariable::new("$result", PrimitiveType::Void, false),
            LocalVariable::new("p", PrimitiveType::Bool, true),
        ];
        locals[1].use_count = 1;
        let print = |v| Expression::new(ExprKind::Print(vec![Expression::constant(Value::Int(v))]), PrimitiveType::Void);
        let branch = Expression::new(
            ExprKind::If {
                condition: Box::new(Expression::load(LocalId(1), PrimitiveType::Bool)),
                then_branch: Box::new(Expression::sequence(vec![print(1)])),
                else_branch: Some(Box::new(Expression::sequence(vec![print(2)]))),
            },
            PrimitiveType::Void,
        );
        let body = vec![branch, Expression::new(ExprKind::Return(None), PrimitiveType::Void)];
        let program = compile(function(locals, 1, body));

        let print_op = IntrinsicOp::Print.id() as i16;
        assert_eq!(
            ops(&program),
            vec![
                (Opcode::PushLocal, 0),
                (Opcode::JumpFalse, 3),
                (Opcode::PushConst, 0),
                (Opcode::CallI1, print_op),
                (Opcode::Jump, 2),
                (Opcode::PushConst, 1),
                (Opcode::CallI1, print_op),
                (Opcode::Return, 0),
            ]
        );
        assert_eq!(program.functions[0].locals[0].name, "p");
    }

    #[test]
    fn test_missing_function_is_reported() {
        let generator = BytecodeGenerator::new();
        assert!(matches!(
            generator.finish(FunctionId(0)),
            Err(CodegenError::MissingFunction { index: 0 })
        ));
    }
}
