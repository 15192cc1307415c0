//! peis-driver - Runs the Peis compilation pipeline
//!
//! ```text
//! source ─► tokens ─► Module ─┐
//! source ─► tokens ─► Module ─┼─► symbols ─► IR ─► fold ─► main ─► generator
//!                             ┘
//! ```
//!
//! A fatal diagnostic from any stage aborts the whole program: the
//! [`Compilation`] then has no artifact, and the diagnostic is the last one
//! collected.

use peis_codegen::{
    CodeGenerator, CodegenResult, CompileOptions, CompiledProgram, NativeImage, Target, BytecodeGenerator,
    X64Generator,
};
use peis_error::{Diagnostic, Diagnostics, ErrorCode, Result, SourceCache};
use peis_ir::symbols::full_name;
use peis_ir::{fold_function, lower_program, Function, FunctionId, IntrinsicTable, ProgramSymbols};
use peis_parser::Module;
use tracing::{debug, info};

/// Output of a successful compilation
#[derive(Debug, Clone)]
pub enum Artifact {
    Bytecode(CompiledProgram),
    Native(NativeImage),
}

impl Artifact {
    /// Bytes of the output file: a `PEIS` image or a PE executable
    pub fn to_bytes(&self) -> std::io::Result<Vec<u8>> {
        match self {
            Artifact::Bytecode(program) => program.to_bytes(),
            Artifact::Native(image) => Ok(image.to_pe()),
        }
    }

    pub fn as_bytecode(&self) -> Option<&CompiledProgram> {
        match self {
            Artifact::Bytecode(program) => Some(program),
            Artifact::Native(_) => None,
        }
    }

    pub fn as_native(&self) -> Option<&NativeImage> {
        match self {
            Artifact::Native(image) => Some(image),
            Artifact::Bytecode(_) => None,
        }
    }
}

#[derive(Debug)]
pub struct Compilation {
    pub artifact: Option<Artifact>,
    pub diagnostics: Diagnostics,
}

impl Compilation {
    pub fn succeeded(&self) -> bool {
        self.artifact.is_some()
    }
}

/// Tokenizes and parses one source file. `None` when it has syntax errors.
pub fn parse_source(cache: &mut SourceCache, name: &str, source: &str) -> (Option<Module>, Diagnostics) {
    let file_id = cache.add(name, source);
    let (tokens, mut diagnostics) = peis_lexer::tokenize(source, file_id);
    if diagnostics.has_errors() {
        return (None, diagnostics);
    }
    let (module, parse_diagnostics) = peis_parser::parse(tokens);
    let failed = parse_diagnostics.has_errors();
    diagnostics.extend(parse_diagnostics);
    debug!(file = name, module = %module.name, functions = module.functions.len(), "parsed");
    (if failed { None } else { Some(module) }, diagnostics)
}

/// Front end results kept for inspection (`peis ir`)
#[derive(Debug)]
pub struct ProgramIr {
    pub symbols: ProgramSymbols,
    /// Indexed by function id
    pub functions: Vec<Function>,
}

pub struct Driver {
    options: CompileOptions,
    intrinsics: IntrinsicTable,
}

impl Driver {
    pub fn new(options: CompileOptions) -> Self {
        Self {
            options,
            intrinsics: IntrinsicTable::new(),
        }
    }

    /// Unoptimized driver: same checks and IR, no constant folding
    pub fn unoptimized(target: Target) -> Self {
        Self::new(CompileOptions {
            target,
            optimize: false,
            entry_module: None,
        })
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn compile(&self, modules: &[Module]) -> Compilation {
        let mut diagnostics = Diagnostics::new();
        let artifact = match self.run(modules, &mut diagnostics) {
            Ok(artifact) => Some(artifact),
            Err(fatal) => {
                diagnostics.push(fatal);
                None
            }
        };
        Compilation { artifact, diagnostics }
    }

    /// Symbols, IR and (when optimizing) folding
    pub fn build_ir(&self, modules: &[Module], diagnostics: &mut Diagnostics) -> Result<ProgramIr> {
        let symbols = ProgramSymbols::collect(modules)?;
        let mut functions = lower_program(modules, &symbols, &self.intrinsics, diagnostics)?;
        debug!(
            modules = modules.len(),
            functions = functions.len(),
            "IR built"
        );

        if self.options.optimize {
            let folded: usize = functions.iter_mut().map(fold_function).sum();
            debug!(folded, "constant folding done");
        }
        Ok(ProgramIr { symbols, functions })
    }

    /// The parameterless `main` of the entry module
    pub fn find_main(&self, modules: &[Module], symbols: &ProgramSymbols) -> Result<FunctionId> {
        let entry = self
            .options
            .entry_module
            .clone()
            .or_else(|| modules.first().map(|m| m.name.clone()));
        let no_main = |message: String| {
            let diagnostic = Diagnostic::error(message).with_code(ErrorCode::NO_MAIN_FUNCTION);
            match modules.first() {
                Some(module) => diagnostic.with_label(module.span, "entry module"),
                None => diagnostic,
            }
        };

        let Some(entry) = entry else {
            return Err(no_main("nothing to compile".to_string()));
        };
        let name = full_name(&entry, "main");
        match symbols.function_by_full_name(&name) {
            Some(main) if main.params.is_empty() => Ok(main.id),
            Some(main) => Err(no_main(format!("`{}` must not take parameters", name))
                .with_secondary_label(main.span, "declared here")),
            None => Err(no_main(format!("no function `main` in module `{}`", entry))
                .with_help("declare `int main()` as the program entry point")),
        }
    }

    fn run(&self, modules: &[Module], diagnostics: &mut Diagnostics) -> Result<Artifact> {
        let ProgramIr { symbols, mut functions } = self.build_ir(modules, diagnostics)?;
        let main = self.find_main(modules, &symbols)?;

        let artifact = match self.options.target {
            Target::Bytecode => Artifact::Bytecode(generate(BytecodeGenerator::new(), &mut functions, main)?),
            Target::X64 => Artifact::Native(generate(X64Generator::new(), &mut functions, main)?),
        };
        info!(target_kind = %self.options.target, functions = functions.len(), "compilation finished");
        Ok(artifact)
    }
}

impl Default for Driver {
    fn default() -> Self {
        Self::new(CompileOptions::default())
    }
}

fn generate<G: CodeGenerator>(mut generator: G, functions: &mut [Function], main: FunctionId) -> CodegenResult<G::Output> {
    debug!(target_kind = %generator.target(), "generating");
    for function in functions.iter_mut() {
        generator.generate_function(function)?;
    }
    generator.finish(main)
}
