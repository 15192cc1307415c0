//! AST - Syntax tree of a Peis module
//!
//! This is the contract between the parser and the compiler core: one
//! [`Module`] per source file, carrying its dependency set, constants and
//! functions.

use peis_error::{Span, Spanned};
use std::fmt;

/// One source file
#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    pub imports: Vec<Import>,
    pub constants: Vec<ConstDecl>,
    pub functions: Vec<FnDecl>,
    pub span: Span,
}

/// `import name`
#[derive(Debug, Clone)]
pub struct Import {
    pub module: String,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Private,
    Public,
}

/// Type as written in the source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    Void,
    Bool,
    Int,
    Real,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Bool => write!(f, "bool"),
            Type::Int => write!(f, "int"),
            Type::Real => write!(f, "real"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    Int(i64),
    Real(f64),
    Bool(bool),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(v) => write!(f, "{}", v),
            Literal::Real(v) => write!(f, "{:?}", v),
            Literal::Bool(v) => write!(f, "{}", v),
        }
    }
}

/// `[public] const <type> <name> = <literal>`
#[derive(Debug, Clone)]
pub struct ConstDecl {
    pub name: String,
    pub visibility: Visibility,
    pub ty: Type,
    pub value: Literal,
    pub span: Span,
}

/// Function parameter: `<type> <name>`
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    pub span: Span,
}

/// `[public] <type> <name>(<params>) begin ... end`
#[derive(Debug, Clone)]
pub struct FnDecl {
    pub name: String,
    pub visibility: Visibility,
    pub return_type: Type,
    pub params: Vec<Param>,
    pub body: Block,
    pub span: Span,
}

/// `begin ... end`
#[derive(Debug, Clone)]
pub struct Block {
    pub statements: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Block(Block),

    /// `name := value`
    Assign {
        target: String,
        value: Expr,
        span: Span,
    },

    /// `if cond stmt [else stmt]`
    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
        span: Span,
    },

    /// `while cond stmt`
    While {
        condition: Expr,
        body: Box<Stmt>,
        span: Span,
    },

    /// `return [value]`
    Return { value: Option<Expr>, span: Span },

    /// Expression evaluated for its effect (calls)
    Expr(Expr),
}

impl Spanned for Stmt {
    fn span(&self) -> Span {
        match self {
            Stmt::Block(b) => b.span,
            Stmt::Assign { span, .. }
            | Stmt::If { span, .. }
            | Stmt::While { span, .. }
            | Stmt::Return { span, .. } => *span,
            Stmt::Expr(e) => e.span(),
        }
    }
}

/// Infix operators. Each one names an intrinsic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    IntDiv,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Xor,
}

impl BinaryOp {
    /// Name of the intrinsic implementing this operator
    pub fn intrinsic_name(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::IntDiv => "//",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Xor => "xor",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

impl UnaryOp {
    pub fn intrinsic_name(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Not => "not",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal {
        value: Literal,
        span: Span,
    },

    /// Possibly qualified name: `x`, `util.limit`
    Name { name: String, span: Span },

    /// `callee(args...)` - intrinsic or user function
    Call {
        callee: String,
        args: Vec<Expr>,
        span: Span,
    },

    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
        span: Span,
    },

    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },
}

impl Spanned for Expr {
    fn span(&self) -> Span {
        match self {
            Expr::Literal { span, .. }
            | Expr::Name { span, .. }
            | Expr::Call { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Unary { span, .. } => *span,
        }
    }
}
