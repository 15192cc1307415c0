//! Integration tests for the Peis compiler
//!
//! This crate drives the complete pipeline from source text:
//! Source → Lexer → Parser → Symbols → IR → Fold → Codegen

use peis_codegen::{CompileOptions, CompiledProgram};
use peis_driver::{parse_source, Compilation, Driver};
use peis_error::{Diagnostics, ErrorCode, SourceCache};
use peis_ir::Function;
use peis_parser::Module;

/// Parses every source as its own module. Syntax errors end up in the
/// returned diagnostics and the module is skipped.
pub fn parse_modules(sources: &[&str]) -> (Vec<Module>, Diagnostics) {
    let mut cache = SourceCache::new();
    let mut modules = Vec::new();
    let mut diagnostics = Diagnostics::new();
    for (i, source) in sources.iter().enumerate() {
        let (module, diags) = parse_source(&mut cache, &format!("test{}.peis", i), source);
        diagnostics.extend(diags);
        modules.extend(module);
    }
    (modules, diagnostics)
}

/// Compiles several modules with explicit options
pub fn compile_with(sources: &[&str], options: CompileOptions) -> Compilation {
    let (modules, diagnostics) = parse_modules(sources);
    if diagnostics.has_errors() {
        return Compilation {
            artifact: None,
            diagnostics,
        };
    }
    let mut compilation = Driver::new(options).compile(&modules);
    let mut all = diagnostics;
    all.extend(compilation.diagnostics);
    compilation.diagnostics = all;
    compilation
}

/// Compiles one module to bytecode with default options
pub fn compile(source: &str) -> Compilation {
    compile_with(&[source], CompileOptions::default())
}

/// Asserts that source code compiles and returns the bytecode program
pub fn assert_compiles(source: &str) -> CompiledProgram {
    let compilation = compile(source);
    match compilation.artifact.as_ref().and_then(|a| a.as_bytecode()) {
        Some(program) => program.clone(),
        None => panic!(
            "Expected source to compile, but got errors:\n{:?}",
            compilation.diagnostics
        ),
    }
}

/// Asserts that compilation fails and reports `code`
pub fn assert_compile_fails_with(source: &str, code: ErrorCode) -> Diagnostics {
    let compilation = compile(source);
    if compilation.succeeded() {
        panic!("Expected source to fail compilation, but it succeeded");
    }
    if !compilation.diagnostics.contains(code) {
        panic!(
            "Expected error {}, but got:\n{:?}",
            code, compilation.diagnostics
        );
    }
    compilation.diagnostics
}

/// Disassembly of the compiled program
pub fn disassemble(source: &str) -> String {
    assert_compiles(source).disassemble()
}

/// IR of every function, folded or not
pub fn lower(source: &str, optimize: bool) -> Vec<Function> {
    let (modules, diagnostics) = parse_modules(&[source]);
    assert!(!diagnostics.has_errors(), "{:?}", diagnostics);
    let options = CompileOptions {
        optimize,
        ..CompileOptions::default()
    };
    let mut diagnostics = Diagnostics::new();
    match Driver::new(options).build_ir(&modules, &mut diagnostics) {
        Ok(ir) => ir.functions,
        Err(fatal) => panic!("Expected IR, but got:\n{:?}", fatal),
    }
}

/// Rendering of the statement at `index` in a function body
pub fn statement(function: &Function, index: usize) -> String {
    match &function.body.kind {
        peis_ir::ExprKind::Sequence(statements) => statements[index].to_string(),
        other => panic!("function body is not a sequence: {:?}", other),
    }
}

#[cfg(test)]
mod pipeline_tests {
    use super::*;
    use peis_codegen::{BytecodeOp, Opcode};
    use peis_ir::Value;
    use pretty_assertions::assert_eq;

    fn ops(program: &CompiledProgram, function: usize) -> Vec<(Opcode, i16)> {
        program.functions[function]
            .code
            .iter()
            .map(|op| (op.opcode, op.operand))
            .collect()
    }

    // =========================================
    // End to end
    // =========================================

    #[test]
    fn test_return_literal() {
        let program = assert_compiles("int main() begin return 100 end");

        assert_eq!(program.constants.len(), 1);
        assert_eq!(program.constants[0].name, "$literal_100");
        assert_eq!(program.constants[0].value, Value::Int(100));
        assert_eq!(
            program.functions[0].code,
            vec![BytecodeOp::new(Opcode::PushConst, 0), BytecodeOp::bare(Opcode::Return)]
        );
        assert_eq!(program.main_function, 0);
    }

    #[test]
    fn test_if_else_both_return() {
        let compilation = compile("int main() begin if true return 1 else return 2 end");
        assert!(compilation.succeeded());
        assert_eq!(compilation.diagnostics.count(ErrorCode::RETURN_NOT_GUARANTEED), 0);
    }

    #[test]
    fn test_if_without_else_reports_once() {
        let diagnostics = assert_compile_fails_with(
            "int main() begin if true return 1 end",
            ErrorCode::RETURN_NOT_GUARANTEED,
        );
        assert_eq!(diagnostics.count(ErrorCode::RETURN_NOT_GUARANTEED), 1);
    }

    #[test]
    fn test_trailing_return_after_if() {
        assert_compiles("int main() begin if true return 1; return 2 end");
    }

    #[test]
    fn test_infinite_loop_keeps_bytecode() {
        let program = assert_compiles("bool main() begin while true begin end return true end");
        assert_eq!(program.constants.len(), 1);
        assert_eq!(
            ops(&program, 0),
            vec![
                (Opcode::PushConst, 0),
                (Opcode::JumpFalse, 1),
                (Opcode::Jump, -3),
                (Opcode::PushConst, 0),
                (Opcode::Return, 0),
            ]
        );
    }

    #[test]
    fn test_loop_disassembly() {
        let text = disassemble("bool main() begin while true begin end return true end");
        assert_eq!(
            text,
            "Bool main.main() [0 locals]\n\
             PushConst   $literal_true\n\
             JumpFalse   +1\n\
             Jump        -3\n\
             PushConst   $literal_true\n\
             Return\n"
        );
    }

    #[test]
    fn test_constants_are_shared_across_functions() {
        let program = assert_compiles(
            "int helper() begin return 7 end\n\
             int main() begin return helper() + 7 end",
        );
        let sevens = program
            .constants
            .iter()
            .filter(|c| c.value == Value::Int(7))
            .count();
        assert_eq!(sevens, 1);
        assert_eq!(program.main_function, 1);
        assert!(ops(&program, 1).contains(&(Opcode::Call, 0)));
    }

    #[test]
    fn test_parameters_take_first_slots() {
        let program = assert_compiles(
            "int add(int a, int b) begin return a + b end\n\
             int main() begin return add(1, 2) end",
        );
        let add = &program.functions[0];
        assert_eq!(add.param_count, 2);
        assert_eq!(add.header(), "Int main.add(Int, Int) [2 locals]");
        assert_eq!(
            ops(&program, 0),
            vec![
                (Opcode::PushLocal, 0),
                (Opcode::PushLocal, 1),
                (Opcode::CallI2, peis_ir::IntrinsicOp::Add.id() as i16),
                (Opcode::Return, 0),
            ]
        );
    }

    #[test]
    fn test_print_and_void_main() {
        let program = assert_compiles("void main() begin print(1, 2.5, true) end");
        let code = ops(&program, 0);
        assert_eq!(code[3], (Opcode::CallI3, peis_ir::IntrinsicOp::Print.id() as i16));
        assert_eq!(code.last(), Some(&(Opcode::Return, 0)));
    }

    #[test]
    fn test_modules_and_imports() {
        let compilation = compile_with(
            &[
                "module app\nimport geometry\nreal main() begin return geometry.area(2.0) end",
                "module geometry\npublic const real pi = 3.5\npublic real area(real r) begin return pi * r * r end",
            ],
            CompileOptions::default(),
        );
        let program = compilation
            .artifact
            .as_ref()
            .and_then(|a| a.as_bytecode())
            .unwrap();
        assert_eq!(program.functions[0].name, "app.main");
        assert_eq!(program.functions[1].name, "geometry.area");
        assert_eq!(program.main_function, 0);
    }

    // =========================================
    // Semantic errors
    // =========================================

    #[test]
    fn test_missing_main() {
        assert_compile_fails_with("int helper() begin return 1 end", ErrorCode::NO_MAIN_FUNCTION);
    }

    #[test]
    fn test_unknown_module() {
        assert_compile_fails_with(
            "import nowhere\nint main() begin return 1 end",
            ErrorCode::UNKNOWN_MODULE,
        );
    }

    #[test]
    fn test_duplicate_function() {
        assert_compile_fails_with(
            "int main() begin return 1 end\nint main() begin return 2 end",
            ErrorCode::NAME_ALREADY_DEFINED,
        );
    }

    #[test]
    fn test_constant_literal_type() {
        assert_compile_fails_with(
            "const int k = 1.5\nint main() begin return k end",
            ErrorCode::WRONG_TYPE,
        );
    }

    #[test]
    fn test_assign_to_constant() {
        assert_compile_fails_with(
            "const int k = 1\nint main() begin k := 2; return k end",
            ErrorCode::MAY_NOT_ASSIGN_TO_CONST,
        );
    }

    #[test]
    fn test_wrong_argument_count() {
        let program = "int add(int a, int b) begin return a + b end\n";
        assert_compile_fails_with(
            &format!("{}int main() begin return add(1) end", program),
            ErrorCode::NOT_ENOUGH_PARAMETERS,
        );
        assert_compile_fails_with(
            &format!("{}int main() begin return add(1, 2, 3) end", program),
            ErrorCode::TOO_MANY_PARAMETERS,
        );
    }

    #[test]
    fn test_undefined_variable() {
        assert_compile_fails_with("int main() begin return y end", ErrorCode::NAME_NOT_FOUND);
    }

    #[test]
    fn test_syntax_error_never_reaches_the_core() {
        let compilation = compile("int main() begin return ) end");
        assert!(!compilation.succeeded());
        assert!(compilation.diagnostics.has_errors());
        assert!(!compilation.diagnostics.contains(ErrorCode::NO_MAIN_FUNCTION));
    }

    #[test]
    fn test_unreachable_code_is_a_warning() {
        let compilation = compile("int main() begin return 1; print(2) end");
        assert!(compilation.succeeded());
        assert_eq!(compilation.diagnostics.count(ErrorCode::UNREACHABLE_CODE), 1);
    }
}

#[cfg(test)]
mod optimization_tests {
    use super::*;
    use peis_ir::{compute_intervals, fold_single_use_locals, IntrinsicOp, LocalId};
    use pretty_assertions::assert_eq;

    fn folded_return(expr: &str) -> String {
        let functions = lower(&format!("int main() begin return {} end", expr), true);
        statement(&functions[0], 0)
    }

    #[test]
    fn test_modulo_is_floored() {
        assert_eq!(folded_return("7 % 3"), "return 1");
        assert_eq!(folded_return("7 % -3"), "return 1");
        assert_eq!(folded_return("-7 % 3"), "return 2");
    }

    #[test]
    fn test_integer_division_truncates() {
        assert_eq!(folded_return("-4 // 3"), "return -1");
    }

    #[test]
    fn test_real_division() {
        let functions = lower("real main() begin return 4 / 3 end", true);
        let text = statement(&functions[0], 0);
        assert!(text.starts_with("return 1.333"), "{}", text);
    }

    #[test]
    fn test_division_by_zero_is_not_folded() {
        let functions = lower(
            "int main() begin print(1 / 0, 1 // 0, 1 % 0); return 0 end",
            true,
        );
        assert_eq!(statement(&functions[0], 0), "print((1 / 0), (1 // 0), (1 % 0))");
    }

    #[test]
    fn test_fold_recurses_into_unfoldable_call() {
        let functions = lower("real main() begin return math.pow(1 + 2, 3 + 4) end", true);
        assert_eq!(statement(&functions[0], 0), "return (3 math.pow 7)");
    }

    #[test]
    fn test_fold_keeps_store() {
        let functions = lower("int main() begin x := 4 * 5; return x end", true);
        assert_eq!(statement(&functions[0], 0), "%1 := 20");
    }

    #[test]
    fn test_unary_folds() {
        let functions = lower("bool main() begin return not false end", true);
        assert_eq!(statement(&functions[0], 0), "return true");
    }

    #[test]
    fn test_constant_conditions_stay() {
        let functions = lower(
            "int main() begin if 1 < 2 return 1 else return 2 end",
            true,
        );
        assert_eq!(statement(&functions[0], 0), "if true ...");
    }

    #[test]
    fn test_single_use_local_is_inlined() {
        let mut functions = lower("int main() begin a := 2 + 3; return a end", false);
        let main = &mut functions[0];
        assert_eq!(fold_single_use_locals(main), 1);
        assert_eq!(statement(main, 0), "return (2 + 3)");
        assert!(main.local(LocalId(1)).is_dead());
    }

    #[test]
    fn test_reused_local_is_kept() {
        let mut functions = lower("int main() begin a := 2 + 3; return a * a end", false);
        assert_eq!(fold_single_use_locals(&mut functions[0]), 0);
        assert_eq!(statement(&functions[0], 0), "%1 := (2 + 3)");
    }

    #[test]
    fn test_non_adjacent_use_is_kept() {
        let mut functions = lower("int main() begin a := 2; print(1); return a end", false);
        assert_eq!(fold_single_use_locals(&mut functions[0]), 0);
    }

    #[test]
    fn test_intervals_from_source() {
        let mut functions = lower("int main() begin a := 2; b := 3; return a + b end", false);
        let main = &mut functions[0];
        compute_intervals(main);
        let span = |id: u32| main.local(LocalId(id)).interval.map(|i| (i.start, i.end));
        assert_eq!(span(1), Some((0, 2)));
        assert_eq!(span(2), Some((1, 3)));
    }

    #[test]
    fn test_parameters_start_before_the_body() {
        let mut functions = lower("int f(int p) begin return p end\nint main() begin return f(1) end", false);
        compute_intervals(&mut functions[0]);
        let interval = functions[0].local(LocalId(1)).interval.map(|i| i.start);
        assert_eq!(interval, Some(-1));
    }

    #[test]
    fn test_folding_shrinks_bytecode() {
        let source = "int main() begin return (1 + 2) * (3 + 4) end";
        let optimized = assert_compiles(source);
        let unoptimized = compile_with(
            &[source],
            CompileOptions {
                optimize: false,
                ..CompileOptions::default()
            },
        );
        let unoptimized = unoptimized
            .artifact
            .as_ref()
            .and_then(|a| a.as_bytecode())
            .unwrap()
            .clone();
        assert_eq!(optimized.functions[0].code.len(), 2);
        assert!(unoptimized.functions[0].code.len() > 2);
        let mul = IntrinsicOp::Mul.id() as i16;
        assert!(unoptimized.functions[0]
            .code
            .iter()
            .any(|op| op.opcode == peis_codegen::Opcode::CallI2 && op.operand == mul));
    }
}


#[cfg(test)]
mod native_tests {
    use super::*;
    use iced_x86::{Decoder, DecoderOptions, Instruction, Mnemonic, OpKind, Register};
    use object::read::pe::PeFile64;
    use object::{LittleEndian as LE, Object, ObjectSection};
    use peis_codegen::{NativeImage, Target};

    fn native(source: &str, optimize: bool) -> NativeImage {
        let compilation = compile_with(
            &[source],
            CompileOptions {
                target: Target::X64,
                optimize,
                entry_module: None,
            },
        );
        match compilation.artifact.as_ref().and_then(|a| a.as_native()) {
            Some(image) => image.clone(),
            None => panic!("Expected native code, but got:\n{:?}", compilation.diagnostics),
        }
    }

    fn decode(code: &[u8]) -> Vec<Instruction> {
        Decoder::new(64, code, DecoderOptions::NONE).iter().collect()
    }

    #[test]
    fn test_return_constant() {
        let image = native("int main() begin return 2 * 21 end", true);
        let instructions = decode(&image.code[image.entry..]);

        let mov = &instructions[0];
        assert_eq!(mov.mnemonic(), Mnemonic::Mov);
        assert_eq!(mov.op0_register(), Register::RAX);
        assert_eq!(mov.op1_kind(), OpKind::Immediate32to64);
        assert_eq!(mov.immediate32to64(), 42);
        assert_eq!(instructions[1].mnemonic(), Mnemonic::Ret);
    }

    #[test]
    fn test_unoptimized_multiplies() {
        let image = native("int main() begin return 2 * 21 end", false);
        let mnemonics: Vec<Mnemonic> = decode(&image.code[image.entry..]).iter().map(|i| i.mnemonic()).collect();
        assert!(mnemonics.contains(&Mnemonic::Imul));
        assert!(mnemonics.contains(&Mnemonic::Ret));
        assert!(!mnemonics.contains(&Mnemonic::INVALID));
    }

    #[test]
    fn test_real_parameters_use_sse() {
        let image = native(
            "real scale(real a, int b) begin return a * b end\nint main() begin return 0 end",
            true,
        );
        let start = image.functions[0].1;
        let mnemonics: Vec<Mnemonic> = decode(&image.code[start..image.functions[1].1])
            .iter()
            .map(|i| i.mnemonic())
            .collect();
        assert!(mnemonics.contains(&Mnemonic::Cvtsi2sd));
        assert!(mnemonics.contains(&Mnemonic::Mulsd));
    }

    #[test]
    fn test_entry_is_main() {
        let image = native(
            "int helper() begin return 1 end\nint main() begin return 2 end",
            true,
        );
        assert_eq!(image.functions.len(), 2);
        assert_eq!(image.functions[1].0, "main.main");
        assert_eq!(image.entry, image.functions[1].1);
        assert_eq!(image.entry % 16, 0);
    }

    #[test]
    fn test_executable_image() {
        let image = native("int main() begin return 7 end", true);
        let bytes = image.to_pe();
        let file = PeFile64::parse(&*bytes).unwrap();

        let optional = &file.nt_headers().optional_header;
        assert_eq!(
            optional.address_of_entry_point.get(LE),
            peis_codegen::x64::pe::TEXT_START + image.entry as u32
        );
        assert_eq!(file.nt_headers().file_header.machine.get(LE), object::pe::IMAGE_FILE_MACHINE_AMD64);
        let text = file.section_by_name(".text").unwrap();
        assert!(text.data().unwrap().starts_with(&image.code));
    }

    #[test]
    fn test_unsupported_constructs() {
        for source in [
            "int main() begin i := 0; while i < 3 i := i + 1; return i end",
            "int f() begin return 1 end\nint main() begin return f() end",
            "int main() begin print(1); return 0 end",
        ] {
            let compilation = compile_with(
                &[source],
                CompileOptions {
                    target: Target::X64,
                    ..CompileOptions::default()
                },
            );
            assert!(!compilation.succeeded(), "{}", source);
            assert!(compilation.diagnostics.contains(ErrorCode::NOT_IMPLEMENTED), "{}", source);
        }
    }
}
