//! Hand-encoded x86-64 instructions
//!
//! Only the forms the generator needs. Registers use the numbering of
//! [`registers`](super::registers); stack operands are always
//! `[rsp + disp8]`.

use super::registers::{encoding, is_xmm, name, RSP};
use crate::error::{CodegenError, CodegenResult};

const REX: u8 = 0x40;
const REX_W: u8 = 0x48;

/// SSE scalar-double arithmetic opcodes (`F2 0F xx`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseOp {
    Add = 0x58,
    Mul = 0x59,
    Sub = 0x5C,
    Div = 0x5E,
}

/// Integer register-register arithmetic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GprOp {
    Add,
    Sub,
    Imul,
}

fn modrm(mode: u8, reg: u8, rm: u8) -> u8 {
    (mode << 6) | ((reg & 7) << 3) | (rm & 7)
}

/// REX byte for `reg`/`rm` encodings, or `None` when the plain form works
fn rex(wide: bool, reg: u8, rm: u8) -> Option<u8> {
    let byte = (if wide { REX_W } else { REX }) | ((reg >> 3) & 1) << 2 | ((rm >> 3) & 1);
    (byte != REX).then_some(byte)
}

fn gpr(register: u8) -> CodegenResult<u8> {
    if is_xmm(register) {
        return Err(CodegenError::internal(format!("{} used as a general purpose register", name(register))));
    }
    Ok(register)
}

fn xmm(register: u8) -> CodegenResult<u8> {
    if !is_xmm(register) {
        return Err(CodegenError::internal(format!("{} used as an SSE register", name(register))));
    }
    Ok(encoding(register))
}

#[derive(Debug, Default)]
pub struct X64Encoder {
    code: Vec<u8>,
}

impl X64Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offset(&self) -> usize {
        self.code.len()
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn finish(self) -> Vec<u8> {
        self.code
    }

    fn emit(&mut self, bytes: &[u8]) {
        self.code.extend_from_slice(bytes);
    }

    fn emit_rex(&mut self, wide: bool, reg: u8, rm: u8) {
        if let Some(byte) = rex(wide, reg, rm) {
            self.code.push(byte);
        }
    }

    /// ModRM + SIB + disp8 for `[rsp + displacement]`
    fn emit_stack_operand(&mut self, reg: u8, displacement: i8) {
        self.emit(&[modrm(1, reg, RSP), 0x24, displacement as u8]);
    }

    /// Pads with `int3` up to the next multiple of `alignment`
    pub fn align(&mut self, alignment: usize) {
        while self.code.len() % alignment != 0 {
            self.code.push(0xCC);
        }
    }

    /// `mov r64, imm`: sign-extended imm32 when it fits, imm64 otherwise
    pub fn mov_reg_imm(&mut self, dst: u8, value: i64) -> CodegenResult<()> {
        let dst = gpr(dst)?;
        match i32::try_from(value) {
            Ok(imm) => {
                self.emit_rex(true, 0, dst);
                self.emit(&[0xC7, modrm(3, 0, dst)]);
                self.emit(&imm.to_le_bytes());
            }
            Err(_) => {
                self.emit_rex(true, 0, dst);
                self.code.push(0xB8 + (dst & 7));
                self.emit(&value.to_le_bytes());
            }
        }
        Ok(())
    }

    /// `mov dst, src`
    pub fn mov_reg_reg(&mut self, dst: u8, src: u8) -> CodegenResult<()> {
        let (dst, src) = (gpr(dst)?, gpr(src)?);
        self.emit_rex(true, src, dst);
        self.emit(&[0x89, modrm(3, src, dst)]);
        Ok(())
    }

    /// `mov dst, [rsp + displacement]`
    pub fn mov_reg_stack(&mut self, dst: u8, displacement: i8) -> CodegenResult<()> {
        let dst = gpr(dst)?;
        self.emit_rex(true, dst, RSP);
        self.code.push(0x8B);
        self.emit_stack_operand(dst, displacement);
        Ok(())
    }

    /// `mov [rsp + displacement], src`
    pub fn mov_stack_reg(&mut self, displacement: i8, src: u8) -> CodegenResult<()> {
        let src = gpr(src)?;
        self.emit_rex(true, src, RSP);
        self.code.push(0x89);
        self.emit_stack_operand(src, displacement);
        Ok(())
    }

    /// `movq xmm, r64`
    pub fn movq_xmm_reg(&mut self, dst: u8, src: u8) -> CodegenResult<()> {
        let (dst, src) = (xmm(dst)?, gpr(src)?);
        self.code.push(0x66);
        self.emit_rex(true, dst, src);
        self.emit(&[0x0F, 0x6E, modrm(3, dst, src)]);
        Ok(())
    }

    /// `movq r64, xmm`
    pub fn movq_reg_xmm(&mut self, dst: u8, src: u8) -> CodegenResult<()> {
        let (dst, src) = (gpr(dst)?, xmm(src)?);
        self.code.push(0x66);
        self.emit_rex(true, src, dst);
        self.emit(&[0x0F, 0x7E, modrm(3, src, dst)]);
        Ok(())
    }

    /// `movsd dst, src`
    pub fn movsd_xmm_xmm(&mut self, dst: u8, src: u8) -> CodegenResult<()> {
        let (dst, src) = (xmm(dst)?, xmm(src)?);
        self.code.push(0xF2);
        self.emit_rex(false, dst, src);
        self.emit(&[0x0F, 0x10, modrm(3, dst, src)]);
        Ok(())
    }

    /// `movsd xmm, [rsp + displacement]`
    pub fn movsd_xmm_stack(&mut self, dst: u8, displacement: i8) -> CodegenResult<()> {
        let dst = xmm(dst)?;
        self.code.push(0xF2);
        self.emit_rex(false, dst, RSP);
        self.emit(&[0x0F, 0x10]);
        self.emit_stack_operand(dst, displacement);
        Ok(())
    }

    /// `movsd [rsp + displacement], xmm`
    pub fn movsd_stack_xmm(&mut self, displacement: i8, src: u8) -> CodegenResult<()> {
        let src = xmm(src)?;
        self.code.push(0xF2);
        self.emit_rex(false, src, RSP);
        self.emit(&[0x0F, 0x11]);
        self.emit_stack_operand(src, displacement);
        Ok(())
    }

    /// `add`/`sub`/`imul dst, src`
    pub fn gpr_op(&mut self, op: GprOp, dst: u8, src: u8) -> CodegenResult<()> {
        let (dst, src) = (gpr(dst)?, gpr(src)?);
        match op {
            GprOp::Add | GprOp::Sub => {
                self.emit_rex(true, src, dst);
                let opcode = if op == GprOp::Add { 0x01 } else { 0x29 };
                self.emit(&[opcode, modrm(3, src, dst)]);
            }
            GprOp::Imul => {
                self.emit_rex(true, dst, src);
                self.emit(&[0x0F, 0xAF, modrm(3, dst, src)]);
            }
        }
        Ok(())
    }

    /// `addsd`/`subsd`/`mulsd`/`divsd dst, src`
    pub fn sse_op(&mut self, op: SseOp, dst: u8, src: u8) -> CodegenResult<()> {
        let (dst, src) = (xmm(dst)?, xmm(src)?);
        self.code.push(0xF2);
        self.emit_rex(false, dst, src);
        self.emit(&[0x0F, op as u8, modrm(3, dst, src)]);
        Ok(())
    }

    /// `cvtsi2sd xmm, r64`
    pub fn cvtsi2sd(&mut self, dst: u8, src: u8) -> CodegenResult<()> {
        let (dst, src) = (xmm(dst)?, gpr(src)?);
        self.code.push(0xF2);
        self.emit_rex(true, dst, src);
        self.emit(&[0x0F, 0x2A, modrm(3, dst, src)]);
        Ok(())
    }

    /// `sub rsp, size`
    pub fn reserve_stack(&mut self, size: u32) -> CodegenResult<()> {
        self.adjust_rsp(5, size)
    }

    /// `add rsp, size`
    pub fn release_stack(&mut self, size: u32) -> CodegenResult<()> {
        self.adjust_rsp(0, size)
    }

    fn adjust_rsp(&mut self, extension: u8, size: u32) -> CodegenResult<()> {
        if let Ok(imm) = i8::try_from(size) {
            self.emit(&[REX_W, 0x83, modrm(3, extension, RSP), imm as u8]);
        } else {
            let imm = i32::try_from(size).map_err(|_| CodegenError::OperandOverflow {
                what: "stack frame size",
                value: i64::from(size),
            })?;
            self.emit(&[REX_W, 0x81, modrm(3, extension, RSP)]);
            self.emit(&imm.to_le_bytes());
        }
        Ok(())
    }

    pub fn ret(&mut self) {
        self.code.push(0xC3);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x64::registers::{R10, R11, R8, RAX, RCX, XMM0, XMM4, XMM5, XMM_BASE};
    use iced_x86::{Decoder, DecoderOptions, Instruction, Mnemonic, OpKind, Register};

    fn decode(code: &[u8]) -> Vec<Instruction> {
        let mut decoder = Decoder::new(64, code, DecoderOptions::NONE);
        let instructions: Vec<Instruction> = decoder.iter().collect();
        assert!(instructions.iter().all(|i| !i.is_invalid()), "invalid encoding in {:02X?}", code);
        assert_eq!(instructions.iter().map(|i| i.len()).sum::<usize>(), code.len());
        instructions
    }

    #[test]
    fn test_mov_immediate_forms() {
        let mut enc = X64Encoder::new();
        enc.mov_reg_imm(RAX, 100).unwrap();
        enc.mov_reg_imm(R11, -1).unwrap();
        enc.mov_reg_imm(RCX, 0x1_0000_0000).unwrap();
        assert_eq!(&enc.code()[..7], &[0x48, 0xC7, 0xC0, 100, 0, 0, 0]);

        let decoded = decode(enc.code());
        assert_eq!(decoded[0].op0_register(), Register::RAX);
        assert_eq!(decoded[0].immediate(1) as i64, 100);
        assert_eq!(decoded[1].op0_register(), Register::R11);
        assert_eq!(decoded[1].immediate(1) as i64, -1);
        assert_eq!(decoded[2].op0_register(), Register::RCX);
        assert_eq!(decoded[2].immediate(1), 0x1_0000_0000);
    }

    #[test]
    fn test_register_and_stack_moves() {
        let mut enc = X64Encoder::new();
        enc.mov_reg_reg(R8, RCX).unwrap();
        enc.mov_reg_stack(R11, 8).unwrap();
        enc.mov_stack_reg(16, R10).unwrap();

        let decoded = decode(enc.code());
        assert!(decoded.iter().all(|i| i.mnemonic() == Mnemonic::Mov));
        assert_eq!((decoded[0].op0_register(), decoded[0].op1_register()), (Register::R8, Register::RCX));

        assert_eq!(decoded[1].op0_register(), Register::R11);
        assert_eq!(decoded[1].op1_kind(), OpKind::Memory);
        assert_eq!(decoded[1].memory_base(), Register::RSP);
        assert_eq!(decoded[1].memory_displacement64(), 8);

        assert_eq!(decoded[2].op0_kind(), OpKind::Memory);
        assert_eq!(decoded[2].memory_displacement64(), 16);
        assert_eq!(decoded[2].op1_register(), Register::R10);
    }

    #[test]
    fn test_sse_moves() {
        let mut enc = X64Encoder::new();
        enc.movq_xmm_reg(XMM4, R11).unwrap();
        enc.movq_reg_xmm(RAX, XMM5).unwrap();
        enc.movsd_xmm_xmm(XMM0, XMM_BASE + 9).unwrap();
        enc.movsd_xmm_stack(XMM5, 24).unwrap();
        enc.movsd_stack_xmm(0, XMM4).unwrap();

        let decoded = decode(enc.code());
        assert_eq!(decoded[0].mnemonic(), Mnemonic::Movq);
        assert_eq!((decoded[0].op0_register(), decoded[0].op1_register()), (Register::XMM4, Register::R11));
        assert_eq!((decoded[1].op0_register(), decoded[1].op1_register()), (Register::RAX, Register::XMM5));
        assert_eq!(decoded[2].mnemonic(), Mnemonic::Movsd);
        assert_eq!((decoded[2].op0_register(), decoded[2].op1_register()), (Register::XMM0, Register::XMM9));
        assert_eq!(decoded[3].memory_displacement64(), 24);
        assert_eq!(decoded[4].op1_register(), Register::XMM4);
        assert_eq!(decoded[4].memory_base(), Register::RSP);
    }

    #[test]
    fn test_arithmetic() {
        let mut enc = X64Encoder::new();
        enc.gpr_op(GprOp::Add, R11, R10).unwrap();
        enc.gpr_op(GprOp::Sub, R11, R10).unwrap();
        enc.gpr_op(GprOp::Imul, R11, R10).unwrap();
        enc.sse_op(SseOp::Div, XMM4, XMM5).unwrap();
        enc.cvtsi2sd(XMM4, R11).unwrap();

        let decoded = decode(enc.code());
        let mnemonics: Vec<Mnemonic> = decoded.iter().map(|i| i.mnemonic()).collect();
        assert_eq!(
            mnemonics,
            vec![Mnemonic::Add, Mnemonic::Sub, Mnemonic::Imul, Mnemonic::Divsd, Mnemonic::Cvtsi2sd]
        );
        for instruction in &decoded[..3] {
            assert_eq!(instruction.op0_register(), Register::R11);
            assert_eq!(instruction.op1_register(), Register::R10);
        }
        assert_eq!(decoded[4].op1_register(), Register::R11);
    }

    #[test]
    fn test_frame_and_alignment() {
        let mut enc = X64Encoder::new();
        enc.ret();
        enc.align(16);
        assert_eq!(enc.offset(), 16);
        assert!(enc.code()[1..].iter().all(|&b| b == 0xCC));

        enc.reserve_stack(16).unwrap();
        enc.release_stack(256).unwrap();
        let decoded = decode(&enc.code()[16..]);
        assert_eq!(decoded[0].mnemonic(), Mnemonic::Sub);
        assert_eq!(decoded[0].immediate(1), 16);
        assert_eq!(decoded[1].mnemonic(), Mnemonic::Add);
        assert_eq!(decoded[1].immediate(1), 256);
    }

    #[test]
    fn test_register_class_is_checked() {
        let mut enc = X64Encoder::new();
        assert!(enc.mov_reg_reg(XMM4, RAX).is_err());
        assert!(enc.sse_op(SseOp::Add, RAX, XMM4).is_err());
    }
}
