//! IR type system
//!
//! Four primitive types plus the `NoType` sentinel that a freshly declared
//! local carries until its first assignment fixes its type.

use std::fmt;

/// Primitive value types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Void,
    Bool,
    Int,
    Real,
    /// Type not inferred yet. Never the type of a real value.
    NoType,
}

impl PrimitiveType {
    /// Type code used by the serialized program format
    pub fn code(self) -> u16 {
        match self {
            PrimitiveType::Void => 0,
            PrimitiveType::Bool => 1,
            PrimitiveType::Int => 2,
            PrimitiveType::Real => 3,
            PrimitiveType::NoType => 0xFFFF,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(PrimitiveType::Void),
            1 => Some(PrimitiveType::Bool),
            2 => Some(PrimitiveType::Int),
            3 => Some(PrimitiveType::Real),
            _ => None,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, PrimitiveType::Int | PrimitiveType::Real)
    }

    pub fn from_ast(ty: peis_parser::Type) -> Self {
        match ty {
            peis_parser::Type::Void => PrimitiveType::Void,
            peis_parser::Type::Bool => PrimitiveType::Bool,
            peis_parser::Type::Int => PrimitiveType::Int,
            peis_parser::Type::Real => PrimitiveType::Real,
        }
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PrimitiveType::Void => "Void",
            PrimitiveType::Bool => "Bool",
            PrimitiveType::Int => "Int",
            PrimitiveType::Real => "Real",
            PrimitiveType::NoType => "NoType",
        };
        write!(f, "{}", name)
    }
}

/// A compile-time constant value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Int(i64),
    Real(f64),
    Bool(bool),
}

impl Value {
    pub fn ty(&self) -> PrimitiveType {
        match self {
            Value::Int(_) => PrimitiveType::Int,
            Value::Real(_) => PrimitiveType::Real,
            Value::Bool(_) => PrimitiveType::Bool,
        }
    }

    /// Dedup key of a pooled literal: `$literal_<value>`, `r`-suffixed for reals
    pub fn canonical_name(&self) -> String {
        match self {
            Value::Int(v) => format!("$literal_{}", v),
            Value::Real(v) => format!("$literal_{}r", v),
            Value::Bool(v) => format!("$literal_{}", v),
        }
    }

    /// Raw 64-bit payload: int64, float64 bits, or 1/0
    pub fn to_bits(&self) -> u64 {
        match self {
            Value::Int(v) => *v as u64,
            Value::Real(v) => v.to_bits(),
            Value::Bool(v) => u64::from(*v),
        }
    }

    pub fn from_bits(ty: PrimitiveType, bits: u64) -> Option<Value> {
        match ty {
            PrimitiveType::Int => Some(Value::Int(bits as i64)),
            PrimitiveType::Real => Some(Value::Real(f64::from_bits(bits))),
            PrimitiveType::Bool => Some(Value::Bool(bits != 0)),
            PrimitiveType::Void | PrimitiveType::NoType => None,
        }
    }

    /// Numeric value promoted to a float
    pub fn as_real(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Real(v) => Some(*v),
            Value::Bool(_) => None,
        }
    }

    pub fn from_literal(literal: peis_parser::Literal) -> Self {
        match literal {
            peis_parser::Literal::Int(v) => Value::Int(v),
            peis_parser::Literal::Real(v) => Value::Real(v),
            peis_parser::Literal::Bool(v) => Value::Bool(v),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Real(v) => write!(f, "{:?}", v),
            Value::Bool(v) => write!(f, "{}", v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_names() {
        assert_eq!(Value::Int(100).canonical_name(), "$literal_100");
        assert_eq!(Value::Int(-3).canonical_name(), "$literal_-3");
        assert_eq!(Value::Real(1.5).canonical_name(), "$literal_1.5r");
        assert_eq!(Value::Real(3.0).canonical_name(), "$literal_3r");
        assert_eq!(Value::Bool(true).canonical_name(), "$literal_true");
    }

    #[test]
    fn test_bits() {
        assert_eq!(Value::Int(-1).to_bits(), u64::MAX);
        assert_eq!(Value::Bool(true).to_bits(), 1);
        assert_eq!(Value::from_bits(PrimitiveType::Real, 2.5f64.to_bits()), Some(Value::Real(2.5)));
        assert_eq!(Value::from_bits(PrimitiveType::Void, 0), None);
    }

    #[test]
    fn test_type_codes() {
        for ty in [PrimitiveType::Void, PrimitiveType::Bool, PrimitiveType::Int, PrimitiveType::Real] {
            assert_eq!(PrimitiveType::from_code(ty.code()), Some(ty));
        }
        assert_eq!(PrimitiveType::from_code(PrimitiveType::NoType.code()), None);
    }
}
