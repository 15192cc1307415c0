//! Peis compiler CLI

use clap::{Parser, Subcommand, ValueEnum};
use peis_codegen::{CompileOptions, CompiledProgram, Target};
use peis_driver::{parse_source, Artifact, Driver};
use peis_error::{Diagnostics, SourceCache};
use peis_lexer::{tokenize, TokenKind};
use peis_parser::Module;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use tracing::Level;

/// Output target
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum TargetArg {
    /// Bytecode for the Peis virtual machine (default)
    #[default]
    Bytecode,
    /// Native x86-64 Windows executable
    X64,
}

impl From<TargetArg> for Target {
    fn from(arg: TargetArg) -> Self {
        match arg {
            TargetArg::Bytecode => Target::Bytecode,
            TargetArg::X64 => Target::X64,
        }
    }
}

#[derive(Parser)]
#[command(name = "peis")]
#[command(author = "Guilherme Mendes")]
#[command(version = "0.1.0")]
#[command(about = "Peis language compiler", long_about = None)]
struct Cli {
    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compiles one or more modules into a program
    Build {
        /// Source files, one module each
        #[arg(value_name = "FILE", required = true)]
        inputs: Vec<PathBuf>,

        /// Output file (default: first input with .peis or .exe)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Output target
        #[arg(short, long, default_value = "bytecode")]
        target: TargetArg,

        /// Skip constant folding
        #[arg(long)]
        no_opt: bool,

        /// Module holding `main` (default: the first input's module)
        #[arg(long, value_name = "MODULE")]
        entry: Option<String>,
    },

    /// Checks for errors without writing output
    Check {
        #[arg(value_name = "FILE", required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Shows file tokens (debug)
    Lex {
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },

    /// Shows file AST (debug)
    Parse {
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },

    /// Shows the IR of every function (debug)
    Ir {
        #[arg(value_name = "FILE", required = true)]
        inputs: Vec<PathBuf>,

        /// Skip constant folding
        #[arg(long)]
        no_opt: bool,
    },

    /// Disassembles a compiled .peis file, or compiles sources and disassembles them
    Disasm {
        #[arg(value_name = "FILE", required = true)]
        inputs: Vec<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Build { inputs, output, target, no_opt, entry } => {
            println!("Compiling: {}", display_inputs(&inputs));

            let mut cache = SourceCache::new();
            let modules = load_modules(&mut cache, &inputs);
            println!("  [ok] Parser: {} modules", modules.len());

            let options = CompileOptions {
                target: target.into(),
                optimize: !no_opt,
                entry_module: entry,
            };
            let extension = options.target.extension();
            let compilation = Driver::new(options).compile(&modules);
            report(&cache, &compilation.diagnostics);

            let Some(artifact) = compilation.artifact else {
                eprintln!("\nCompilation failed");
                process::exit(1);
            };

            let output = output.unwrap_or_else(|| inputs[0].with_extension(extension));
            let bytes = match artifact.to_bytes() {
                Ok(bytes) => bytes,
                Err(e) => {
                    eprintln!("Error encoding output: {}", e);
                    process::exit(1);
                }
            };
            if let Err(e) = fs::write(&output, &bytes) {
                eprintln!("Error writing {}: {}", output.display(), e);
                process::exit(1);
            }

            match &artifact {
                Artifact::Bytecode(program) => println!(
                    "  [ok] Bytecode: {} functions, {} constants",
                    program.functions.len(),
                    program.constants.len()
                ),
                Artifact::Native(image) => println!("  [ok] x64: {} bytes of code", image.code.len()),
            }
            println!("\nWrote {} ({} bytes)", output.display(), bytes.len());
        }

        Commands::Check { inputs } => {
            println!("Checking: {}\n", display_inputs(&inputs));

            let mut cache = SourceCache::new();
            let modules = load_modules(&mut cache, &inputs);
            let compilation = Driver::default().compile(&modules);
            report(&cache, &compilation.diagnostics);

            if compilation.succeeded() {
                println!("No errors found");
            } else {
                eprintln!("\nCheck failed");
                process::exit(1);
            }
        }

        Commands::Lex { input } => {
            let source = read_source(&input);
            let mut cache = SourceCache::new();
            let file_id = cache.add(input.display().to_string(), &source);
            let (tokens, diagnostics) = tokenize(&source, file_id);

            for token in &tokens {
                if token.kind == TokenKind::Eof {
                    break;
                }
                println!("{:>4}:{:<4} {:?}", token.span.start.line, token.span.start.column, token.kind);
            }
            report(&cache, &diagnostics);
        }

        Commands::Parse { input } => {
            let mut cache = SourceCache::new();
            let modules = load_modules(&mut cache, std::slice::from_ref(&input));
            for module in &modules {
                println!("{:#?}", module);
            }
        }

        Commands::Ir { inputs, no_opt } => {
            let mut cache = SourceCache::new();
            let modules = load_modules(&mut cache, &inputs);
            let driver = if no_opt {
                Driver::unoptimized(Target::Bytecode)
            } else {
                Driver::default()
            };

            let mut diagnostics = Diagnostics::new();
            match driver.build_ir(&modules, &mut diagnostics) {
                Ok(ir) => {
                    report(&cache, &diagnostics);
                    for function in &ir.functions {
                        println!("{}", function);
                    }
                }
                Err(fatal) => {
                    diagnostics.push(fatal);
                    report(&cache, &diagnostics);
                    process::exit(1);
                }
            }
        }

        Commands::Disasm { inputs } => {
            let program = if inputs.len() == 1 && inputs[0].extension().is_some_and(|e| e == "peis") {
                read_program(&inputs[0])
            } else {
                let mut cache = SourceCache::new();
                let modules = load_modules(&mut cache, &inputs);
                let compilation = Driver::default().compile(&modules);
                report(&cache, &compilation.diagnostics);
                match compilation.artifact {
                    Some(Artifact::Bytecode(program)) => program,
                    _ => process::exit(1),
                }
            };
            println!("{}", program.disassemble());
        }
    }
}

fn display_inputs(inputs: &[PathBuf]) -> String {
    inputs.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ")
}

fn read_source(path: &Path) -> String {
    match fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error reading {}: {}", path.display(), e);
            process::exit(1);
        }
    }
}

fn read_program(path: &Path) -> CompiledProgram {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Error reading {}: {}", path.display(), e);
            process::exit(1);
        }
    };
    match CompiledProgram::read_from(&mut bytes.as_slice()) {
        Ok(program) => program,
        Err(e) => {
            eprintln!("{}: {}", path.display(), e);
            process::exit(1);
        }
    }
}

/// Parses every input; exits on the first file with syntax errors
fn load_modules(cache: &mut SourceCache, inputs: &[PathBuf]) -> Vec<Module> {
    let mut modules = Vec::new();
    for input in inputs {
        let source = read_source(input);
        let (module, diagnostics) = parse_source(cache, &input.display().to_string(), &source);
        match module {
            Some(module) => modules.push(module),
            None => {
                eprintln!("Syntax errors in {}:\n", input.display());
                report(cache, &diagnostics);
                process::exit(1);
            }
        }
    }
    modules
}

fn report(cache: &SourceCache, diagnostics: &Diagnostics) {
    if !diagnostics.is_empty() {
        eprintln!("{}", diagnostics.render(cache));
    }
}
