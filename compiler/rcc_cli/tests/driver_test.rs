//! Driver-level tests: file in, assembly file out.

use rcc_cli::{compile, compile_to_string, dump_ast, Target};
use std::fs;

#[test]
fn compiles_a_source_file_to_assembly() {
    let dir = tempfile::tempdir().expect("tempdir");
    let src_path = dir.path().join("prog.c");
    let out_path = dir.path().join("prog.s");
    fs::write(&src_path, "int main(void) { return 0; }").unwrap();

    let source = fs::read_to_string(&src_path).unwrap();
    let target = Target::parse("x86_64-linux").unwrap();
    let mut out = fs::File::create(&out_path).unwrap();
    compile(&source, "prog.c", target, &mut out).expect("compile");

    let asm = fs::read_to_string(&out_path).unwrap();
    assert!(asm.contains("main:"));
    assert!(asm.contains("\tret"));
}

#[test]
fn all_targets_accept_the_same_program() {
    let src = "int g = 1;\n\
               int add(int a, int b) { return a + b; }\n\
               int main(void) { return add(g, 2); }";
    for target in ["x86_64-linux", "x86_64-macos", "aarch64-linux", "aarch64-macos"] {
        let target = Target::parse(target).unwrap();
        let asm = compile_to_string(src, "t.c", target).expect("compile");
        assert!(!asm.is_empty());
    }
}

#[test]
fn unknown_target_is_rejected() {
    assert!(Target::parse("riscv64-linux").is_none());
}

#[test]
fn diagnostics_carry_location_and_caret() {
    let err = compile_to_string(
        "int main(void) { return x; }",
        "bad.c",
        Target::parse("x86_64-linux").unwrap(),
    )
    .expect_err("undefined variable");
    let rendered = rcc_common::render(&err);
    assert!(rendered.starts_with("bad.c:1:"), "{}", rendered);
    assert!(rendered.contains("error: undefined variable: 'x'"));
    assert!(rendered.contains('^'));
}

#[test]
fn failed_compilation_produces_no_output() {
    let result = compile_to_string(
        "int f(void) { return 1 +; }",
        "bad.c",
        Target::parse("x86_64-linux").unwrap(),
    );
    assert!(result.is_err());
}

#[test]
fn dump_ast_produces_json() {
    let json = dump_ast("int x = 1;", "t.c").expect("dump");
    assert!(json.contains("VarDecl"));
}
