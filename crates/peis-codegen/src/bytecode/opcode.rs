//! Bytecode instruction set
//!
//! The numbering is shared with the virtual machine. Changing it requires a
//! new format version.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    Invalid = 0,
    PushConst = 1,
    PushLocal = 2,
    PopLocal = 3,
    PopDiscard = 4,
    Call = 5,
    Return = 6,
    Jump = 7,
    JumpFalse = 8,
    CallI0 = 9,
    CallI1 = 10,
    CallI2 = 11,
    CallI3 = 12,
    CallI4 = 13,
    CallI5 = 14,
    CallI6 = 15,
    CallI7 = 16,
}

impl Opcode {
    const ALL: [Opcode; 17] = [
        Opcode::Invalid,
        Opcode::PushConst,
        Opcode::PushLocal,
        Opcode::PopLocal,
        Opcode::PopDiscard,
        Opcode::Call,
        Opcode::Return,
        Opcode::Jump,
        Opcode::JumpFalse,
        Opcode::CallI0,
        Opcode::CallI1,
        Opcode::CallI2,
        Opcode::CallI3,
        Opcode::CallI4,
        Opcode::CallI5,
        Opcode::CallI6,
        Opcode::CallI7,
    ];

    pub fn from_u16(code: u16) -> Option<Self> {
        Self::ALL.get(usize::from(code)).copied()
    }

    /// `CallI<argc>`
    pub fn call_intrinsic(argc: usize) -> Option<Self> {
        if argc > 7 {
            return None;
        }
        Self::from_u16(Opcode::CallI0 as u16 + argc as u16)
    }

    /// Argument count of a `CallI<n>`
    pub fn intrinsic_arity(self) -> Option<usize> {
        let code = self as u16;
        (Opcode::CallI0 as u16..=Opcode::CallI7 as u16)
            .contains(&code)
            .then(|| usize::from(code - Opcode::CallI0 as u16))
    }

    pub fn is_jump(self) -> bool {
        matches!(self, Opcode::Jump | Opcode::JumpFalse)
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::Invalid => "Invalid",
            Opcode::PushConst => "PushConst",
            Opcode::PushLocal => "PushLocal",
            Opcode::PopLocal => "PopLocal",
            Opcode::PopDiscard => "PopDiscard",
            Opcode::Call => "Call",
            Opcode::Return => "Return",
            Opcode::Jump => "Jump",
            Opcode::JumpFalse => "JumpFalse",
            Opcode::CallI0 => "CallI0",
            Opcode::CallI1 => "CallI1",
            Opcode::CallI2 => "CallI2",
            Opcode::CallI3 => "CallI3",
            Opcode::CallI4 => "CallI4",
            Opcode::CallI5 => "CallI5",
            Opcode::CallI6 => "CallI6",
            Opcode::CallI7 => "CallI7",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One instruction: opcode plus a signed 16-bit operand whose meaning
/// depends on the opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BytecodeOp {
    pub opcode: Opcode,
    pub operand: i16,
}

impl BytecodeOp {
    pub fn new(opcode: Opcode, operand: i16) -> Self {
        Self { opcode, operand }
    }

    pub fn bare(opcode: Opcode) -> Self {
        Self { opcode, operand: 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbering_is_stable() {
        assert_eq!(Opcode::PushConst as u16, 1);
        assert_eq!(Opcode::JumpFalse as u16, 8);
        assert_eq!(Opcode::CallI7 as u16, 16);
        assert_eq!(Opcode::from_u16(17), None);
        for code in 0..=16u16 {
            assert_eq!(Opcode::from_u16(code).map(|op| op as u16), Some(code));
        }
    }

    #[test]
    fn test_intrinsic_calls() {
        assert_eq!(Opcode::call_intrinsic(2), Some(Opcode::CallI2));
        assert_eq!(Opcode::call_intrinsic(8), None);
        assert_eq!(Opcode::CallI5.intrinsic_arity(), Some(5));
        assert_eq!(Opcode::Call.intrinsic_arity(), None);
    }
}
