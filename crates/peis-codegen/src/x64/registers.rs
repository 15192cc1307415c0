//! x86-64 register file and location assignment
//!
//! `Storage::Register` numbers 0-15 are the general purpose registers in
//! encoding order, `16 + n` is `xmm<n>`. Only volatile registers are handed
//! out, so generated functions never save anything. R10/R11 and XMM4/XMM5
//! are kept back as scratch registers for the generator.

use peis_ir::{PrimitiveType, RegisterBackend, Storage};
use tracing::trace;

pub const RAX: u8 = 0;
pub const RCX: u8 = 1;
pub const RDX: u8 = 2;
pub const RSP: u8 = 4;
pub const R8: u8 = 8;
pub const R9: u8 = 9;
pub const R10: u8 = 10;
pub const R11: u8 = 11;

pub const XMM_BASE: u8 = 16;
pub const XMM0: u8 = XMM_BASE;
pub const XMM4: u8 = XMM_BASE + 4;
pub const XMM5: u8 = XMM_BASE + 5;

/// Windows x64 integer argument registers, by position
pub const GPR_ARGUMENTS: [u8; 4] = [RCX, RDX, R8, R9];

/// Allocatable registers, in the order they are handed out
const GPR_POOL: [u8; 4] = [RCX, RDX, R8, R9];
const XMM_POOL: [u8; 3] = [XMM_BASE + 1, XMM_BASE + 2, XMM_BASE + 3];

/// Bytes per stack slot
pub const SLOT_SIZE: u32 = 8;

pub fn is_xmm(register: u8) -> bool {
    register >= XMM_BASE
}

/// Encoding number within the register's own class
pub fn encoding(register: u8) -> u8 {
    if is_xmm(register) {
        register - XMM_BASE
    } else {
        register
    }
}

pub fn name(register: u8) -> String {
    const GPR_NAMES: [&str; 16] = [
        "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12", "r13", "r14", "r15",
    ];
    if is_xmm(register) {
        format!("xmm{}", register - XMM_BASE)
    } else {
        GPR_NAMES
            .get(register as usize)
            .map_or_else(|| format!("r?{}", register), |n| n.to_string())
    }
}

/// Reals live in SSE registers, everything else in general purpose ones
pub fn uses_xmm(ty: PrimitiveType) -> bool {
    ty == PrimitiveType::Real
}

/// Argument register of parameter `position`
pub fn parameter_register(position: usize, ty: PrimitiveType) -> Option<u8> {
    if position >= GPR_ARGUMENTS.len() {
        return None;
    }
    Some(if uses_xmm(ty) {
        XMM_BASE + position as u8
    } else {
        GPR_ARGUMENTS[position]
    })
}

#[derive(Debug)]
pub struct X64Backend {
    free_gpr: Vec<u8>,
    free_xmm: Vec<u8>,
    parameters: Vec<PrimitiveType>,
    next_parameter: usize,
    next_slot: u32,
}

impl X64Backend {
    /// Argument registers taken by `parameters` are withheld from the pools
    /// until the parameter's interval ends.
    pub fn new(parameters: &[PrimitiveType]) -> Self {
        let taken: Vec<u8> = parameters
            .iter()
            .enumerate()
            .filter_map(|(i, &ty)| parameter_register(i, ty))
            .collect();
        let pool = |registers: &[u8]| -> Vec<u8> {
            registers.iter().rev().copied().filter(|r| !taken.contains(r)).collect()
        };
        Self {
            free_gpr: pool(&GPR_POOL),
            free_xmm: pool(&XMM_POOL),
            parameters: parameters.to_vec(),
            next_parameter: 0,
            next_slot: 0,
        }
    }

    pub fn stack_slots(&self) -> u32 {
        self.next_slot
    }

    fn stack_slot(&mut self) -> Storage {
        self.next_slot += 1;
        Storage::Stack(self.next_slot - 1)
    }
}

impl RegisterBackend for X64Backend {
    fn get_location(&mut self, ty: PrimitiveType, is_parameter: bool) -> Storage {
        let location = if is_parameter {
            let position = self.next_parameter;
            self.next_parameter += 1;
            let ty = self.parameters.get(position).copied().unwrap_or(ty);
            match parameter_register(position, ty) {
                Some(register) => Storage::Register(register),
                None => self.stack_slot(),
            }
        } else {
            let pool = if uses_xmm(ty) {
                &mut self.free_xmm
            } else {
                &mut self.free_gpr
            };
            match pool.pop() {
                Some(register) => Storage::Register(register),
                None => self.stack_slot(),
            }
        };
        trace!(%ty, is_parameter, ?location, "x64 location");
        location
    }

    fn return_location(&mut self, location: Storage) {
        // Stack slots are never reused
        if let Storage::Register(register) = location {
            if GPR_POOL.contains(&register) {
                self.free_gpr.push(register);
            } else if XMM_POOL.contains(&register) {
                self.free_xmm.push(register);
            }
        }
    }
}
