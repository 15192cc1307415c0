//! Program-wide symbol table
//!
//! Built before any function body is lowered so that bodies can reference
//! functions and constants declared later or in other modules. All names
//! are case-folded; full names are `module.name`.

use crate::types::{PrimitiveType, Value};
use peis_error::{Diagnostic, ErrorCode, Result, Span};
use peis_parser::{ConstDecl, FnDecl, Module, Visibility};
use std::collections::HashMap;
use std::fmt;

/// Index of a function in program order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub u32);

impl FunctionId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Names are case-insensitive
pub fn fold_name(name: &str) -> String {
    name.to_lowercase()
}

pub fn full_name(module: &str, name: &str) -> String {
    format!("{}.{}", fold_name(module), fold_name(name))
}

#[derive(Debug, Clone)]
pub struct FunctionSignature {
    pub id: FunctionId,
    pub full_name: String,
    pub module: String,
    pub visibility: Visibility,
    pub return_type: PrimitiveType,
    pub params: Vec<PrimitiveType>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct ConstantSymbol {
    pub full_name: String,
    pub visibility: Visibility,
    pub value: Value,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct ModuleSymbols {
    pub name: String,
    pub imports: Vec<String>,
    pub span: Span,
}

#[derive(Debug, Default)]
pub struct ProgramSymbols {
    modules: Vec<ModuleSymbols>,
    functions: Vec<FunctionSignature>,
    function_index: HashMap<String, FunctionId>,
    constants: HashMap<String, ConstantSymbol>,
}

impl ProgramSymbols {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares every module, constant and function. Fails on the first
    /// duplicate, ill-typed constant or unknown import.
    pub fn collect(modules: &[Module]) -> Result<Self> {
        let mut symbols = Self::new();
        for module in modules {
            symbols.add_module(module)?;
        }
        for module in modules {
            for constant in &module.constants {
                symbols.declare_constant(&module.name, constant)?;
            }
        }
        for module in modules {
            for function in &module.functions {
                symbols.declare_function(&module.name, function)?;
            }
        }
        symbols.validate_imports(modules)?;
        Ok(symbols)
    }

    pub fn add_module(&mut self, module: &Module) -> Result<()> {
        let name = fold_name(&module.name);
        if let Some(existing) = self.module(&name) {
            return Err(Diagnostic::error(format!("module `{}` is defined twice", module.name))
                .with_code(ErrorCode::NAME_ALREADY_DEFINED)
                .with_label(module.span, "second definition")
                .with_secondary_label(existing.span, "first defined here"));
        }
        self.modules.push(ModuleSymbols {
            name,
            imports: module.imports.iter().map(|i| fold_name(&i.module)).collect(),
            span: module.span,
        });
        Ok(())
    }

    fn check_free(&self, full: &str, display: &str, span: Span) -> Result<()> {
        let previous = self
            .constants
            .get(full)
            .map(|c| c.span)
            .or_else(|| self.function_index.get(full).map(|id| self.function(*id).span));
        match previous {
            Some(previous) => Err(Diagnostic::error(format!("`{}` is already defined", display))
                .with_code(ErrorCode::NAME_ALREADY_DEFINED)
                .with_label(span, "redefined here")
                .with_secondary_label(previous, "first defined here")),
            None => Ok(()),
        }
    }

    pub fn declare_constant(&mut self, module: &str, decl: &ConstDecl) -> Result<()> {
        let full = full_name(module, &decl.name);
        self.check_free(&full, &decl.name, decl.span)?;

        let value = Value::from_literal(decl.value);
        let declared = PrimitiveType::from_ast(decl.ty);
        if value.ty() != declared {
            return Err(Diagnostic::error(format!(
                "constant `{}` is declared {} but initialized with {}",
                decl.name,
                declared,
                value.ty()
            ))
            .with_code(ErrorCode::WRONG_TYPE)
            .with_label(decl.span, format!("expected a {} literal", declared)));
        }

        self.constants.insert(
            full.clone(),
            ConstantSymbol {
                full_name: full,
                visibility: decl.visibility,
                value,
                span: decl.span,
            },
        );
        Ok(())
    }

    pub fn declare_function(&mut self, module: &str, decl: &FnDecl) -> Result<FunctionId> {
        let full = full_name(module, &decl.name);
        self.check_free(&full, &decl.name, decl.span)?;

        let id = FunctionId(self.functions.len() as u32);
        self.functions.push(FunctionSignature {
            id,
            full_name: full.clone(),
            module: fold_name(module),
            visibility: decl.visibility,
            return_type: PrimitiveType::from_ast(decl.return_type),
            params: decl.params.iter().map(|p| PrimitiveType::from_ast(p.ty)).collect(),
            span: decl.span,
        });
        self.function_index.insert(full, id);
        Ok(id)
    }

    pub fn validate_imports(&self, modules: &[Module]) -> Result<()> {
        for module in modules {
            for import in &module.imports {
                if self.module(&fold_name(&import.module)).is_none() {
                    return Err(Diagnostic::error(format!("unknown module `{}`", import.module))
                        .with_code(ErrorCode::UNKNOWN_MODULE)
                        .with_label(import.span, "no source file declares this module"));
                }
            }
        }
        Ok(())
    }

    pub fn module(&self, name: &str) -> Option<&ModuleSymbols> {
        self.modules.iter().find(|m| m.name == name)
    }

    pub fn modules(&self) -> &[ModuleSymbols] {
        &self.modules
    }

    pub fn function(&self, id: FunctionId) -> &FunctionSignature {
        &self.functions[id.index()]
    }

    pub fn functions(&self) -> &[FunctionSignature] {
        &self.functions
    }

    pub fn function_by_full_name(&self, full: &str) -> Option<&FunctionSignature> {
        self.function_index.get(full).map(|id| self.function(*id))
    }

    /// Resolves a folded, possibly qualified name as seen from `from_module`.
    /// Unqualified names search the module itself, then its imports (public
    /// symbols only). Qualified names must name the module itself or an import.
    fn resolve<'a, T>(
        &'a self,
        from_module: &str,
        name: &str,
        find: impl Fn(&str) -> Option<&'a T>,
        visibility: impl Fn(&T) -> Visibility,
    ) -> Option<&'a T> {
        let Some(current) = self.module(from_module) else {
            return None;
        };

        if let Some((qualifier, simple)) = name.rsplit_once('.') {
            if qualifier == from_module {
                return find(&format!("{}.{}", qualifier, simple));
            }
            if !current.imports.iter().any(|i| i == qualifier) {
                return None;
            }
            return find(&format!("{}.{}", qualifier, simple))
                .filter(|symbol| visibility(symbol) == Visibility::Public);
        }

        find(&format!("{}.{}", from_module, name)).or_else(|| {
            current.imports.iter().find_map(|import| {
                find(&format!("{}.{}", import, name)).filter(|symbol| visibility(symbol) == Visibility::Public)
            })
        })
    }

    pub fn resolve_constant(&self, from_module: &str, name: &str) -> Option<&ConstantSymbol> {
        self.resolve(from_module, name, |full| self.constants.get(full), |c| c.visibility)
    }

    pub fn resolve_function(&self, from_module: &str, name: &str) -> Option<&FunctionSignature> {
        self.resolve(
            from_module,
            name,
            |full| self.function_by_full_name(full),
            |f| f.visibility,
        )
    }
}
