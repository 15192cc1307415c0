//! Expression trees to x86-64 machine code
//!
//! Functions are laid out back to back, each aligned to 16 bytes. Values are
//! computed in scratch registers (R10/R11, XMM4/XMM5) and moved to the
//! location the allocator gave the node's store. Integer and boolean
//! results return in RAX, reals in XMM0.

use super::encoder::{GprOp, SseOp, X64Encoder};
use super::pe::write_pe;
use super::prepare::prepare_function;
use super::registers::{
    is_xmm, uses_xmm, X64Backend, GPR_ARGUMENTS, R10, R11, RAX, SLOT_SIZE, XMM0, XMM4, XMM5,
};
use crate::error::{CodegenError, CodegenResult};
use crate::{CodeGenerator, Target};
use peis_ir::{
    assign_registers, compute_intervals, ExprKind, Expression, Function, FunctionId, IntrinsicOp, LocalId,
    LocalVariable, PrimitiveType, Storage, Value,
};
use tracing::debug;

const TARGET: &str = "x64";

/// Machine code for every function plus the entry point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeImage {
    pub code: Vec<u8>,
    /// Offset of `main` within `code`
    pub entry: usize,
    /// Start offset of each function, by id
    pub functions: Vec<(String, usize)>,
}

impl NativeImage {
    pub fn to_pe(&self) -> Vec<u8> {
        write_pe(&self.code, self.entry)
    }
}

#[derive(Debug, Default)]
pub struct X64Generator {
    encoder: X64Encoder,
    functions: Vec<Option<(String, usize)>>,
}

impl X64Generator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CodeGenerator for X64Generator {
    type Output = NativeImage;

    fn target(&self) -> Target {
        Target::X64
    }

    fn generate_function(&mut self, function: &mut Function) -> CodegenResult<()> {
        if function.param_count > GPR_ARGUMENTS.len() {
            return Err(CodegenError::not_implemented(
                TARGET,
                format!("{} parameters in {}", function.param_count, function.full_name),
            ));
        }

        prepare_function(function);
        compute_intervals(function);
        let mut backend = X64Backend::new(&function.param_types());
        let allocation = assign_registers(function, &mut backend);
        let frame = allocation.stack_slots * SLOT_SIZE;

        self.encoder.align(16);
        let start = self.encoder.offset();
        if frame > 0 {
            self.encoder.reserve_stack(frame)?;
        }

        let mut emitter = FunctionEmitter {
            encoder: &mut self.encoder,
            locals: &function.locals,
            frame,
        };
        emitter.emit(&function.body)?;
        emitter.epilogue()?;

        debug!(
            function = %function.full_name,
            offset = start,
            bytes = self.encoder.offset() - start,
            frame,
            spilled = allocation.spilled,
            "x64 generated"
        );

        let index = function.id.index();
        if self.functions.len() <= index {
            self.functions.resize(index + 1, None);
        }
        self.functions[index] = Some((function.full_name.clone(), start));
        Ok(())
    }

    fn finish(self, main: FunctionId) -> CodegenResult<NativeImage> {
        let functions = self
            .functions
            .into_iter()
            .enumerate()
            .map(|(index, f)| f.ok_or(CodegenError::MissingFunction { index }))
            .collect::<CodegenResult<Vec<_>>>()?;
        let entry = functions
            .get(main.index())
            .map(|(_, offset)| *offset)
            .ok_or(CodegenError::MissingFunction { index: main.index() })?;
        Ok(NativeImage {
            code: self.encoder.finish(),
            entry,
            functions,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Location {
    Register(u8),
    /// `[rsp + disp]`
    Stack(i8),
}

struct FunctionEmitter<'a> {
    encoder: &'a mut X64Encoder,
    locals: &'a [LocalVariable],
    frame: u32,
}

impl FunctionEmitter<'_> {
    fn location(&self, storage: Storage) -> CodegenResult<Option<Location>> {
        match storage {
            Storage::Unassigned => Ok(None),
            Storage::Register(register) => Ok(Some(Location::Register(register))),
            Storage::Stack(slot) => {
                let displacement = i64::from(slot) * i64::from(SLOT_SIZE);
                let displacement =
                    i8::try_from(displacement).map_err(|_| CodegenError::DisplacementOutOfRange { displacement })?;
                Ok(Some(Location::Stack(displacement)))
            }
        }
    }

    fn local_location(&self, id: LocalId) -> CodegenResult<Location> {
        let local = &self.locals[id.index()];
        self.location(local.storage)?
            .ok_or_else(|| CodegenError::internal(format!("{} has no location", local.name)))
    }

    /// Where the node's store lives, if it has a live one
    fn store_location(&self, expr: &Expression) -> CodegenResult<Option<Location>> {
        match expr.store {
            Some(id) => self.location(self.locals[id.index()].storage),
            None => Ok(None),
        }
    }

    fn move_value(&mut self, dst: Location, src: Location) -> CodegenResult<()> {
        let enc = &mut *self.encoder;
        match (dst, src) {
            (Location::Register(d), Location::Register(s)) if d == s => Ok(()),
            (Location::Register(d), Location::Register(s)) => match (is_xmm(d), is_xmm(s)) {
                (false, false) => enc.mov_reg_reg(d, s),
                (true, true) => enc.movsd_xmm_xmm(d, s),
                (true, false) => enc.movq_xmm_reg(d, s),
                (false, true) => enc.movq_reg_xmm(d, s),
            },
            (Location::Register(d), Location::Stack(disp)) if is_xmm(d) => enc.movsd_xmm_stack(d, disp),
            (Location::Register(d), Location::Stack(disp)) => enc.mov_reg_stack(d, disp),
            (Location::Stack(disp), Location::Register(s)) if is_xmm(s) => enc.movsd_stack_xmm(disp, s),
            (Location::Stack(disp), Location::Register(s)) => enc.mov_stack_reg(disp, s),
            (Location::Stack(d), Location::Stack(s)) if d == s => Ok(()),
            (Location::Stack(d), Location::Stack(s)) => {
                enc.mov_reg_stack(R11, s)?;
                enc.mov_stack_reg(d, R11)
            }
        }
    }

    /// There is no immediate form for SSE registers: doubles go through R11
    fn load_immediate(&mut self, dst: Location, value: Value) -> CodegenResult<()> {
        let bits = value.to_bits() as i64;
        match dst {
            Location::Register(register) if is_xmm(register) => {
                self.encoder.mov_reg_imm(R11, bits)?;
                self.encoder.movq_xmm_reg(register, R11)
            }
            Location::Register(register) => self.encoder.mov_reg_imm(register, bits),
            Location::Stack(displacement) => {
                self.encoder.mov_reg_imm(R11, bits)?;
                self.encoder.mov_stack_reg(displacement, R11)
            }
        }
    }

    /// Location of an operand after it has been emitted
    fn operand(&mut self, expr: &Expression) -> CodegenResult<Location> {
        self.emit(expr)?;
        self.store_location(expr)?
            .ok_or_else(|| CodegenError::internal(format!("operand `{}` has no location", expr)))
    }

    fn epilogue(&mut self) -> CodegenResult<()> {
        if self.frame > 0 {
            self.encoder.release_stack(self.frame)?;
        }
        self.encoder.ret();
        Ok(())
    }

    fn emit_return(&mut self, value: Option<&Expression>) -> CodegenResult<()> {
        if let Some(value) = value {
            let target = Location::Register(if uses_xmm(value.ty) { XMM0 } else { RAX });
            match (&value.kind, value.store) {
                (ExprKind::Constant(constant), None) => self.load_immediate(target, *constant)?,
                (ExprKind::LocalLoad(id), None) => {
                    let source = self.local_location(*id)?;
                    self.move_value(target, source)?;
                }
                _ => {
                    let source = match self.emit(value)? {
                        Some(source) => source,
                        None => return Err(CodegenError::internal(format!("`{}` produced no value", value))),
                    };
                    self.move_value(target, source)?;
                }
            }
        }
        self.epilogue()
    }

    fn emit_binary(&mut self, op: IntrinsicOp, left: &Expression, right: &Expression, ty: PrimitiveType) -> CodegenResult<Location> {
        let lhs = self.operand(left)?;
        let rhs = self.operand(right)?;

        if ty == PrimitiveType::Real && left.ty == PrimitiveType::Real && right.ty == PrimitiveType::Real {
            let sse = match op {
                IntrinsicOp::Add => SseOp::Add,
                IntrinsicOp::Sub => SseOp::Sub,
                IntrinsicOp::Mul => SseOp::Mul,
                IntrinsicOp::Div => SseOp::Div,
                _ => return Err(CodegenError::not_implemented(TARGET, format!("Real `{}`", op.name()))),
            };
            self.move_value(Location::Register(XMM4), lhs)?;
            self.move_value(Location::Register(XMM5), rhs)?;
            self.encoder.sse_op(sse, XMM4, XMM5)?;
            return Ok(Location::Register(XMM4));
        }

        if ty == PrimitiveType::Int {
            let gpr = match op {
                IntrinsicOp::Add => GprOp::Add,
                IntrinsicOp::Sub => GprOp::Sub,
                IntrinsicOp::Mul => GprOp::Imul,
                _ => return Err(CodegenError::not_implemented(TARGET, format!("Int `{}`", op.name()))),
            };
            self.move_value(Location::Register(R11), lhs)?;
            self.move_value(Location::Register(R10), rhs)?;
            self.encoder.gpr_op(gpr, R11, R10)?;
            return Ok(Location::Register(R11));
        }

        Err(CodegenError::not_implemented(TARGET, format!("{} `{}`", ty, op.name())))
    }

    /// Emits `expr` and returns where its value ended up
    fn emit(&mut self, expr: &Expression) -> CodegenResult<Option<Location>> {
        let store = self.store_location(expr)?;
        let computed = match &expr.kind {
            ExprKind::Constant(value) => {
                if let Some(dst) = store {
                    self.load_immediate(dst, *value)?;
                }
                return Ok(store);
            }
            ExprKind::LocalLoad(id) => {
                let source = self.local_location(*id)?;
                match store {
                    Some(dst) => {
                        self.move_value(dst, source)?;
                        return Ok(Some(dst));
                    }
                    None => return Ok(Some(source)),
                }
            }
            ExprKind::Binary { op, left, right } => self.emit_binary(*op, left, right, expr.ty)?,
            ExprKind::RealConversion(inner) => {
                let source = self.operand(inner)?;
                self.move_value(Location::Register(R11), source)?;
                self.encoder.cvtsi2sd(XMM4, R11)?;
                Location::Register(XMM4)
            }
            ExprKind::Return(value) => {
                self.emit_return(value.as_deref())?;
                return Ok(None);
            }
            ExprKind::Sequence(statements) => {
                for statement in statements {
                    self.emit(statement)?;
                }
                return Ok(None);
            }
            ExprKind::Unary { op, .. } => {
                return Err(CodegenError::not_implemented(TARGET, format!("unary `{}`", op.name())))
            }
            ExprKind::FunctionCall { .. } => return Err(CodegenError::not_implemented(TARGET, "function calls")),
            ExprKind::If { .. } => return Err(CodegenError::not_implemented(TARGET, "if statements")),
            ExprKind::While { .. } => return Err(CodegenError::not_implemented(TARGET, "while loops")),
            ExprKind::Print(_) => return Err(CodegenError::not_implemented(TARGET, "print")),
            ExprKind::FailFast => return Err(CodegenError::not_implemented(TARGET, "failfast")),
        };

        match store {
            Some(dst) => {
                self.move_value(dst, computed)?;
                Ok(Some(dst))
            }
            None => Ok(Some(computed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iced_x86::{Decoder, DecoderOptions, Instruction, Mnemonic, Register};
    use peis_ir::Purity;
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

    fn binary(op: IntrinsicOp, left: Expression, right: Expression, ty: PrimitiveType) -> Expression {
        Expression::new(
            ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            ty,
        )
    }

    fn generate(mut f: Function) -> CodegenResult<NativeImage> {
        let mut generator = X64Generator::new();
        generator.generate_function(&mut f)?;
        generator.finish(FunctionId(0))
    }

    fn decode(image: &NativeImage) -> Vec<Instruction> {
        let mut decoder = Decoder::new(64, &image.code[image.entry..], DecoderOptions::NONE);
        decoder.iter().collect()
    }

    fn mnemonics(instructions: &[Instruction]) -> Vec<Mnemonic> {
        instructions.iter().map(|i| i.mnemonic()).collect()
    }

    #[test]
    fn test_return_constant() {
        let locals = vec![LocalVariable::new("$result", PrimitiveType::Int, false)];
        let image = generate(function(locals, 0, vec![ret(Expression::constant(Value::Int(100)))])).unwrap();
        let code = decode(&image);

        assert_eq!(image.entry, 0);
        assert_eq!(mnemonics(&code[..2]), vec![Mnemonic::Mov, Mnemonic::Ret]);
        assert_eq!(code[0].op0_register(), Register::RAX);
        assert_eq!(code[0].immediate(1), 100);
    }

    #[test]
    fn test_real_constant_goes_through_gpr() {
        let locals = vec![LocalVariable::new("$result", PrimitiveType::Real, false)];
        let image = generate(function(locals, 0, vec![ret(Expression::constant(Value::Real(2.5)))])).unwrap();
        let code = decode(&image);

        assert_eq!(mnemonics(&code[..3]), vec![Mnemonic::Mov, Mnemonic::Movq, Mnemonic::Ret]);
        assert_eq!(code[0].op0_register(), Register::R11);
        assert_eq!(code[0].immediate(1), 2.5f64.to_bits());
        assert_eq!(code[1].op0_register(), Register::XMM0);
    }

    #[test]
    fn test_integer_arithmetic() {
        // return p * 3
        let mut p = LocalVariable::new("p", PrimitiveType::Int, true);
        p.use_count = 1;
        let locals = vec![LocalVariable::new("$result", PrimitiveType::Int, false), p];
        let product = binary(
            IntrinsicOp::Mul,
            Expression::load(LocalId(1), PrimitiveType::Int),
            Expression::constant(Value::Int(3)),
            PrimitiveType::Int,
        );
        let image = generate(function(locals, 1, vec![ret(product)])).unwrap();
        let code = decode(&image);

        let imul = code.iter().position(|i| i.mnemonic() == Mnemonic::Imul).unwrap();
        assert_eq!(code[imul].op0_register(), Register::R11);
        assert_eq!(code[imul + 1].mnemonic(), Mnemonic::Mov);
        assert_eq!(code[imul + 1].op0_register(), Register::RAX);
        assert_eq!(code[imul + 1].op1_register(), Register::R11);
        assert_eq!(code[imul + 2].mnemonic(), Mnemonic::Ret);
        // The parameter is read from its argument register
        assert!(code[..imul].iter().any(|i| i.op1_register() == Register::RCX));
    }

    #[test]
    fn test_mixed_arithmetic_converts() {
        // return 1.5 + i
        let mut i = LocalVariable::new("i", PrimitiveType::Int, true);
        i.use_count = 1;
        let locals = vec![LocalVariable::new("$result", PrimitiveType::Real, false), i];
        let sum = binary(
            IntrinsicOp::Add,
            Expression::constant(Value::Real(1.5)),
            Expression::load(LocalId(1), PrimitiveType::Int),
            PrimitiveType::Real,
        );
        let image = generate(function(locals, 1, vec![ret(sum)])).unwrap();
        let code = decode(&image);

        let found = mnemonics(&code);
        assert!(found.contains(&Mnemonic::Cvtsi2sd));
        let add = found.iter().position(|&m| m == Mnemonic::Addsd).unwrap();
        assert_eq!(code[add + 1].op0_register(), Register::XMM0);
        assert_eq!(code[add + 1].op1_register(), Register::XMM4);
    }

    #[test]
    fn test_spilled_locals_use_the_frame() {
        // Five overlapping Int locals exhaust the four pool registers
        let mut locals = vec![LocalVariable::new("$result", PrimitiveType::Int, false)];
        for n in 1..=5 {
            locals.push(LocalVariable::new(format!("v{}", n), PrimitiveType::Int, false));
        }
        let mut body = Vec::new();
        for n in 1..=5u32 {
            body.push(Expression::constant(Value::Int(i64::from(n))).with_store(LocalId(n), &mut locals));
        }
        let mut total = Expression::load(LocalId(1), PrimitiveType::Int);
        locals[1].use_count += 1;
        for n in 2..=5u32 {
            locals[n as usize].use_count += 1;
            total = binary(IntrinsicOp::Add, total, Expression::load(LocalId(n), PrimitiveType::Int), PrimitiveType::Int);
        }
        body.push(ret(total));
        let image = generate(function(locals, 0, body)).unwrap();
        let code = decode(&image);

        assert_eq!(code[0].mnemonic(), Mnemonic::Sub);
        assert_eq!(code[0].op0_register(), Register::RSP);
        let frame = code[0].immediate(1);
        assert!(frame >= 8 && frame % 8 == 0);
        let ret = code.iter().position(|i| i.mnemonic() == Mnemonic::Ret).unwrap();
        assert_eq!(code[ret - 1].mnemonic(), Mnemonic::Add);
        assert_eq!(code[ret - 1].immediate(1), frame);
    }

    #[test]
    fn test_unsupported_constructs_fail() {
        let locals = vec![LocalVariable::new("$result", PrimitiveType::Void, false)];
        let print = Expression::new(ExprKind::Print(Vec::new()), PrimitiveType::Void);
        let err = generate(function(locals, 0, vec![print])).unwrap_err();
        assert!(matches!(err, CodegenError::NotImplemented { target: "x64", .. }));
    }

    #[test]
    fn test_too_many_parameters() {
        let mut locals = vec![LocalVariable::new("$result", PrimitiveType::Void, false)];
        for n in 0..5 {
            locals.push(LocalVariable::new(format!("p{}", n), PrimitiveType::Int, true));
        }
        let body = vec![Expression::new(ExprKind::Return(None), PrimitiveType::Void)];
        assert!(generate(function(locals, 5, body)).is_err());
    }

    #[test]
    fn test_functions_are_aligned() {
        let mut generator = X64Generator::new();
        for id in 0..2 {
            let locals = vec![LocalVariable::new("$result", PrimitiveType::Int, false)];
            let mut f = function(locals, 0, vec![ret(Expression::constant(Value::Int(1)))]);
            f.id = FunctionId(id);
            generator.generate_function(&mut f).unwrap();
        }
        let image = generator.finish(FunctionId(1)).unwrap();
        assert_eq!(image.entry, 16);
        // mov rax, 1; ret; ret
        assert!(image.code[9..16].iter().all(|&b| b == 0xCC));
    }
}
