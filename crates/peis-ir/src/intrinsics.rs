//! Built-in operations
//!
//! Operators and the handful of built-in functions all resolve to an
//! [`Intrinsic`]. The table is immutable; the driver builds it once and hands
//! out references.

use crate::types::PrimitiveType;
use std::collections::HashMap;

/// Identity of an intrinsic. The discriminant is the id the bytecode
/// `CallI<n>` instructions carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum IntrinsicOp {
    Add = 0,
    Sub = 1,
    Mul = 2,
    Div = 3,
    IntDiv = 4,
    Mod = 5,
    Eq = 6,
    Ne = 7,
    Lt = 8,
    Le = 9,
    Gt = 10,
    Ge = 11,
    And = 12,
    Or = 13,
    Xor = 14,
    Not = 15,
    Neg = 16,
    Pow = 17,
    Sqrt = 18,
    Abs = 19,
    Min = 20,
    Max = 21,
    ToReal = 22,
    Trunc = 23,
    Print = 24,
    FailFast = 25,
}

impl IntrinsicOp {
    pub const ALL: [IntrinsicOp; 26] = [
        IntrinsicOp::Add,
        IntrinsicOp::Sub,
        IntrinsicOp::Mul,
        IntrinsicOp::Div,
        IntrinsicOp::IntDiv,
        IntrinsicOp::Mod,
        IntrinsicOp::Eq,
        IntrinsicOp::Ne,
        IntrinsicOp::Lt,
        IntrinsicOp::Le,
        IntrinsicOp::Gt,
        IntrinsicOp::Ge,
        IntrinsicOp::And,
        IntrinsicOp::Or,
        IntrinsicOp::Xor,
        IntrinsicOp::Not,
        IntrinsicOp::Neg,
        IntrinsicOp::Pow,
        IntrinsicOp::Sqrt,
        IntrinsicOp::Abs,
        IntrinsicOp::Min,
        IntrinsicOp::Max,
        IntrinsicOp::ToReal,
        IntrinsicOp::Trunc,
        IntrinsicOp::Print,
        IntrinsicOp::FailFast,
    ];

    pub fn id(self) -> u16 {
        self as u16
    }

    pub fn from_id(id: u16) -> Option<Self> {
        Self::ALL.get(usize::from(id)).copied()
    }

    /// Source-level name (also used by the disassembler)
    pub fn name(self) -> &'static str {
        match self {
            IntrinsicOp::Add => "+",
            IntrinsicOp::Sub => "-",
            IntrinsicOp::Mul => "*",
            IntrinsicOp::Div => "/",
            IntrinsicOp::IntDiv => "//",
            IntrinsicOp::Mod => "%",
            IntrinsicOp::Eq => "==",
            IntrinsicOp::Ne => "!=",
            IntrinsicOp::Lt => "<",
            IntrinsicOp::Le => "<=",
            IntrinsicOp::Gt => ">",
            IntrinsicOp::Ge => ">=",
            IntrinsicOp::And => "and",
            IntrinsicOp::Or => "or",
            IntrinsicOp::Xor => "xor",
            IntrinsicOp::Not => "not",
            IntrinsicOp::Neg => "neg",
            IntrinsicOp::Pow => "math.pow",
            IntrinsicOp::Sqrt => "math.sqrt",
            IntrinsicOp::Abs => "abs",
            IntrinsicOp::Min => "min",
            IntrinsicOp::Max => "max",
            IntrinsicOp::ToReal => "toreal",
            IntrinsicOp::Trunc => "trunc",
            IntrinsicOp::Print => "print",
            IntrinsicOp::FailFast => "failfast",
        }
    }
}

/// What an intrinsic accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamConstraint {
    /// Anything but `Void`
    None,
    AnyNumericType,
    /// All operands share one type
    SameType,
    /// All operands share one type, `Bool` or `Int`
    BoolOrInt,
    Int,
}

/// How the result type is derived from the operands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnRule {
    Fixed(PrimitiveType),
    /// Type of the first operand
    SameAsParameter,
    /// `Real` if any operand is `Real`, `Int` otherwise
    RealOrInt,
}

/// Why an intrinsic rejected its operands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntrinsicError {
    NotEnoughParameters { expected: usize, found: usize },
    TooManyParameters { expected: usize, found: usize },
    WrongType { index: usize, found: PrimitiveType, expected: &'static str },
    ParamsMustBeSameType { first: PrimitiveType, other: PrimitiveType },
}

#[derive(Debug, Clone)]
pub struct Intrinsic {
    pub op: IntrinsicOp,
    pub min_params: usize,
    pub max_params: usize,
    pub constraint: ParamConstraint,
    pub returns: ReturnRule,
}

impl Intrinsic {
    pub fn name(&self) -> &'static str {
        self.op.name()
    }

    /// Checks operand types and returns the result type
    pub fn check(&self, operands: &[PrimitiveType]) -> Result<PrimitiveType, IntrinsicError> {
        if operands.len() < self.min_params {
            return Err(IntrinsicError::NotEnoughParameters {
                expected: self.min_params,
                found: operands.len(),
            });
        }
        if operands.len() > self.max_params {
            return Err(IntrinsicError::TooManyParameters {
                expected: self.max_params,
                found: operands.len(),
            });
        }

        for (index, &ty) in operands.iter().enumerate() {
            let ok = match self.constraint {
                ParamConstraint::None | ParamConstraint::SameType => {
                    !matches!(ty, PrimitiveType::Void | PrimitiveType::NoType)
                }
                ParamConstraint::AnyNumericType => ty.is_numeric(),
                ParamConstraint::BoolOrInt => matches!(ty, PrimitiveType::Bool | PrimitiveType::Int),
                ParamConstraint::Int => ty == PrimitiveType::Int,
            };
            if !ok {
                return Err(IntrinsicError::WrongType {
                    index,
                    found: ty,
                    expected: self.constraint_description(),
                });
            }
        }

        if matches!(self.constraint, ParamConstraint::SameType | ParamConstraint::BoolOrInt) {
            if let Some((&first, rest)) = operands.split_first() {
                if let Some(&other) = rest.iter().find(|&&ty| ty != first) {
                    return Err(IntrinsicError::ParamsMustBeSameType { first, other });
                }
            }
        }

        Ok(match self.returns {
            ReturnRule::Fixed(ty) => ty,
            ReturnRule::SameAsParameter => operands.first().copied().unwrap_or(PrimitiveType::Void),
            ReturnRule::RealOrInt => {
                if operands.contains(&PrimitiveType::Real) {
                    PrimitiveType::Real
                } else {
                    PrimitiveType::Int
                }
            }
        })
    }

    fn constraint_description(&self) -> &'static str {
        match self.constraint {
            ParamConstraint::None | ParamConstraint::SameType => "a value",
            ParamConstraint::AnyNumericType => "Int or Real",
            ParamConstraint::BoolOrInt => "Bool or Int",
            ParamConstraint::Int => "Int",
        }
    }
}

/// Read-only registry of every intrinsic, indexed by id and by name
#[derive(Debug, Clone)]
pub struct IntrinsicTable {
    entries: Vec<Intrinsic>,
    by_name: HashMap<&'static str, IntrinsicOp>,
}

impl IntrinsicTable {
    pub fn new() -> Self {
        use ParamConstraint as C;
        use PrimitiveType as T;
        use ReturnRule as R;

        let entries: Vec<Intrinsic> = IntrinsicOp::ALL
            .iter()
            .map(|&op| {
                let (min_params, max_params, constraint, returns) = match op {
                    IntrinsicOp::Add | IntrinsicOp::Sub | IntrinsicOp::Mul => {
                        (2, 2, C::AnyNumericType, R::RealOrInt)
                    }
                    IntrinsicOp::Div => (2, 2, C::AnyNumericType, R::Fixed(T::Real)),
                    IntrinsicOp::IntDiv | IntrinsicOp::Mod => (2, 2, C::Int, R::Fixed(T::Int)),
                    IntrinsicOp::Eq | IntrinsicOp::Ne => (2, 2, C::None, R::Fixed(T::Bool)),
                    IntrinsicOp::Lt | IntrinsicOp::Le | IntrinsicOp::Gt | IntrinsicOp::Ge => {
                        (2, 2, C::AnyNumericType, R::Fixed(T::Bool))
                    }
                    IntrinsicOp::And | IntrinsicOp::Or | IntrinsicOp::Xor => {
                        (2, 2, C::BoolOrInt, R::SameAsParameter)
                    }
                    IntrinsicOp::Not => (1, 1, C::BoolOrInt, R::SameAsParameter),
                    IntrinsicOp::Neg | IntrinsicOp::Abs => (1, 1, C::AnyNumericType, R::SameAsParameter),
                    IntrinsicOp::Pow => (2, 2, C::AnyNumericType, R::Fixed(T::Real)),
                    IntrinsicOp::Sqrt | IntrinsicOp::ToReal => (1, 1, C::AnyNumericType, R::Fixed(T::Real)),
                    IntrinsicOp::Min | IntrinsicOp::Max => (2, 2, C::AnyNumericType, R::RealOrInt),
                    IntrinsicOp::Trunc => (1, 1, C::AnyNumericType, R::Fixed(T::Int)),
                    IntrinsicOp::Print => (0, 7, C::None, R::Fixed(T::Void)),
                    IntrinsicOp::FailFast => (0, 0, C::None, R::Fixed(T::Void)),
                };
                Intrinsic { op, min_params, max_params, constraint, returns }
            })
            .collect();

        let by_name = IntrinsicOp::ALL.iter().map(|&op| (op.name(), op)).collect();

        Self { entries, by_name }
    }

    /// Looks up a (case-folded) name
    pub fn lookup(&self, name: &str) -> Option<&Intrinsic> {
        self.by_name.get(name).map(|&op| self.get(op))
    }

    pub fn get(&self, op: IntrinsicOp) -> &Intrinsic {
        &self.entries[usize::from(op.id())]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Intrinsic> {
        self.entries.iter()
    }
}

impl Default for IntrinsicTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PrimitiveType::*;

    #[test]
    fn test_ids_are_dense() {
        let table = IntrinsicTable::new();
        for (index, intrinsic) in table.iter().enumerate() {
            assert_eq!(usize::from(intrinsic.op.id()), index);
            assert_eq!(IntrinsicOp::from_id(intrinsic.op.id()), Some(intrinsic.op));
        }
        assert_eq!(IntrinsicOp::from_id(26), None);
    }

    #[test]
    fn test_lookup_by_name() {
        let table = IntrinsicTable::new();
        assert_eq!(table.lookup("math.pow").map(|i| i.op), Some(IntrinsicOp::Pow));
        assert_eq!(table.lookup("//").map(|i| i.op), Some(IntrinsicOp::IntDiv));
        assert!(table.lookup("main").is_none());
    }

    #[test]
    fn test_return_rules() {
        let table = IntrinsicTable::new();
        let add = table.get(IntrinsicOp::Add);
        assert_eq!(add.check(&[Int, Int]), Ok(Int));
        assert_eq!(add.check(&[Int, Real]), Ok(Real));
        assert_eq!(table.get(IntrinsicOp::Div).check(&[Int, Int]), Ok(Real));
        assert_eq!(table.get(IntrinsicOp::Lt).check(&[Real, Int]), Ok(Bool));
        assert_eq!(table.get(IntrinsicOp::Not).check(&[Int]), Ok(Int));
        assert_eq!(table.get(IntrinsicOp::Print).check(&[]), Ok(Void));
    }

    #[test]
    fn test_constraint_violations() {
        let table = IntrinsicTable::new();
        assert!(matches!(
            table.get(IntrinsicOp::Add).check(&[Int, Bool]),
            Err(IntrinsicError::WrongType { index: 1, found: Bool, .. })
        ));
        assert!(matches!(
            table.get(IntrinsicOp::And).check(&[Bool, Int]),
            Err(IntrinsicError::ParamsMustBeSameType { first: Bool, other: Int })
        ));
        assert!(matches!(
            table.get(IntrinsicOp::Mod).check(&[Int, Real]),
            Err(IntrinsicError::WrongType { index: 1, .. })
        ));
        assert!(matches!(
            table.get(IntrinsicOp::Eq).check(&[Void, Int]),
            Err(IntrinsicError::WrongType { index: 0, .. })
        ));
        assert!(matches!(
            table.get(IntrinsicOp::Neg).check(&[]),
            Err(IntrinsicError::NotEnoughParameters { expected: 1, found: 0 })
        ));
        assert!(matches!(
            table.get(IntrinsicOp::Print).check(&[Int; 8]),
            Err(IntrinsicError::TooManyParameters { expected: 7, found: 8 })
        ));
    }
}
