//! Compiled bytecode programs and their binary format
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! "PEIS" | version u32 | main index u32
//! constant count u32 | { type u16 | name [u8; 6] | value u64 }*
//! function count u32 | { return type u16 | params u16 | locals u16
//!                      | local type u16 * locals | pad u16 if locals is odd
//!                      | op count u32 | { opcode u16 | operand i16 }* }*
//! ```

use crate::bytecode::opcode::{BytecodeOp, Opcode};
use crate::error::{CodegenError, CodegenResult};
use peis_ir::{IntrinsicOp, PrimitiveType, Value};
use std::fmt::Write as _;
use std::io::{self, Read, Write};

pub const MAGIC: &[u8; 4] = b"PEIS";
pub const FORMAT_VERSION: u32 = 6;

/// Bytes of a constant's name kept in the image (debug only)
const CONSTANT_NAME_BYTES: usize = 6;

#[derive(Debug, Clone, PartialEq)]
pub struct PooledConstant {
    /// Canonical name, `$literal_<value>`
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledLocal {
    pub name: String,
    pub ty: PrimitiveType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFunction {
    pub name: String,
    pub return_type: PrimitiveType,
    /// Parameters occupy the first slots of `locals`
    pub param_count: usize,
    pub locals: Vec<CompiledLocal>,
    pub code: Vec<BytecodeOp>,
}

impl CompiledFunction {
    pub fn param_types(&self) -> impl Iterator<Item = PrimitiveType> + '_ {
        self.locals.iter().take(self.param_count).map(|l| l.ty)
    }

    /// `Int main.main() [0 locals]`
    pub fn header(&self) -> String {
        let params: Vec<String> = self.param_types().map(|t| t.to_string()).collect();
        format!(
            "{} {}({}) [{} locals]",
            self.return_type,
            self.name,
            params.join(", "),
            self.locals.len()
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledProgram {
    pub constants: Vec<PooledConstant>,
    pub functions: Vec<CompiledFunction>,
    pub main_function: u32,
}

fn wr_u16le<W: Write>(w: &mut W, v: u16) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}
fn wr_u32le<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}
fn wr_u64le<W: Write>(w: &mut W, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn rd_u16le<R: Read>(r: &mut R) -> io::Result<u16> {
    let mut b = [0u8; 2];
    r.read_exact(&mut b)?;
    Ok(u16::from_le_bytes(b))
}
fn rd_u32le<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}
fn rd_u64le<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(u64::from_le_bytes(b))
}

fn narrow<T: TryFrom<usize>>(value: usize, what: &str) -> io::Result<T> {
    T::try_from(value).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} {} does not fit the program format", what, value),
        )
    })
}

fn read_type<R: Read>(r: &mut R) -> CodegenResult<PrimitiveType> {
    let code = rd_u16le(r)?;
    PrimitiveType::from_code(code).ok_or_else(|| CodegenError::malformed(format!("unknown type code {}", code)))
}

impl CompiledProgram {
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(MAGIC)?;
        wr_u32le(w, FORMAT_VERSION)?;
        wr_u32le(w, self.main_function)?;

        wr_u32le(w, narrow(self.constants.len(), "constant count")?)?;
        for constant in &self.constants {
            wr_u16le(w, constant.value.ty().code())?;
            let mut name = [0u8; CONSTANT_NAME_BYTES];
            let bytes = constant.name.as_bytes();
            let len = bytes.len().min(CONSTANT_NAME_BYTES);
            name[..len].copy_from_slice(&bytes[..len]);
            w.write_all(&name)?;
            wr_u64le(w, constant.value.to_bits())?;
        }

        wr_u32le(w, narrow(self.functions.len(), "function count")?)?;
        for function in &self.functions {
            wr_u16le(w, function.return_type.code())?;
            wr_u16le(w, narrow(function.param_count, "parameter count")?)?;
            wr_u16le(w, narrow(function.locals.len(), "local count")?)?;
            for local in &function.locals {
                wr_u16le(w, local.ty.code())?;
            }
            if function.locals.len() % 2 == 1 {
                wr_u16le(w, 0)?;
            }
            wr_u32le(w, narrow(function.code.len(), "instruction count")?)?;
            for op in &function.code {
                wr_u16le(w, op.opcode as u16)?;
                w.write_all(&op.operand.to_le_bytes())?;
            }
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.write_to(&mut bytes)?;
        Ok(bytes)
    }

    /// Reads a program back. Names are not stored in full: constants keep
    /// their truncated prefix, functions and locals get placeholders.
    pub fn read_from<R: Read>(r: &mut R) -> CodegenResult<CompiledProgram> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(CodegenError::malformed("bad magic"));
        }
        let version = rd_u32le(r)?;
        if version != FORMAT_VERSION {
            return Err(CodegenError::malformed(format!(
                "format version {} (expected {})",
                version, FORMAT_VERSION
            )));
        }
        let main_function = rd_u32le(r)?;

        let constant_count = rd_u32le(r)?;
        let mut constants = Vec::new();
        for _ in 0..constant_count {
            let ty = read_type(r)?;
            let mut name = [0u8; CONSTANT_NAME_BYTES];
            r.read_exact(&mut name)?;
            let end = name.iter().position(|&b| b == 0).unwrap_or(CONSTANT_NAME_BYTES);
            let bits = rd_u64le(r)?;
            let value = Value::from_bits(ty, bits)
                .ok_or_else(|| CodegenError::malformed(format!("constant of type {}", ty)))?;
            constants.push(PooledConstant {
                name: String::from_utf8_lossy(&name[..end]).into_owned(),
                value,
            });
        }

        let function_count = rd_u32le(r)?;
        let mut functions = Vec::new();
        for index in 0..function_count {
            let return_type = read_type(r)?;
            let param_count = usize::from(rd_u16le(r)?);
            let local_count = usize::from(rd_u16le(r)?);
            if param_count > local_count {
                return Err(CodegenError::malformed(format!(
                    "function {} has {} parameters but {} locals",
                    index, param_count, local_count
                )));
            }
            let mut locals = Vec::with_capacity(local_count);
            for slot in 0..local_count {
                locals.push(CompiledLocal {
                    name: format!("${}", slot),
                    ty: read_type(r)?,
                });
            }
            if local_count % 2 == 1 {
                rd_u16le(r)?;
            }
            let op_count = rd_u32le(r)?;
            let mut code = Vec::new();
            for _ in 0..op_count {
                let raw = rd_u16le(r)?;
                let opcode =
                    Opcode::from_u16(raw).ok_or_else(|| CodegenError::malformed(format!("unknown opcode {}", raw)))?;
                let operand = rd_u16le(r)? as i16;
                code.push(BytecodeOp::new(opcode, operand));
            }
            functions.push(CompiledFunction {
                name: format!("function{}", index),
                return_type,
                param_count,
                locals,
                code,
            });
        }

        Ok(CompiledProgram {
            constants,
            functions,
            main_function,
        })
    }

    fn render_operand(&self, function: &CompiledFunction, op: &BytecodeOp) -> String {
        let index = usize::try_from(op.operand).ok();
        let lookup = |name: Option<&str>| name.map(str::to_string).unwrap_or_else(|| format!("#{}", op.operand));
        match op.opcode {
            Opcode::PushConst => lookup(index.and_then(|i| self.constants.get(i)).map(|c| c.name.as_str())),
            Opcode::PushLocal | Opcode::PopLocal => {
                lookup(index.and_then(|i| function.locals.get(i)).map(|l| l.name.as_str()))
            }
            Opcode::Call => lookup(index.and_then(|i| self.functions.get(i)).map(|f| f.name.as_str())),
            Opcode::Jump | Opcode::JumpFalse => format!("{:+}", op.operand),
            opcode if opcode.intrinsic_arity().is_some() => {
                lookup(u16::try_from(op.operand).ok().and_then(IntrinsicOp::from_id).map(IntrinsicOp::name))
            }
            _ => String::new(),
        }
    }

    /// Header line followed by one line per instruction
    pub fn disassemble_function(&self, index: usize) -> Option<String> {
        let function = self.functions.get(index)?;
        let mut out = function.header();
        out.push('\n');
        for op in &function.code {
            let line = format!("{:<12}{}", op.opcode.name(), self.render_operand(function, op));
            let _ = writeln!(out, "{}", line.trim_end());
        }
        Some(out)
    }

    pub fn disassemble(&self) -> String {
        (0..self.functions.len())
            .filter_map(|i| self.disassemble_function(i))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
