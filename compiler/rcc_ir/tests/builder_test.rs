//! IR construction tests

use rcc_ir::{build_program, FuncIr, IrOp};

fn build(src: &str) -> Vec<FuncIr> {
    let (program, ctx) = rcc_parser::parse(src, "test.c").expect("parse");
    build_program(&program, &ctx).expect("ir")
}

fn ops_of(func: &FuncIr) -> Vec<&IrOp> {
    func.bbs.iter().flat_map(|bb| bb.ops.iter()).collect()
}

#[test]
fn straight_line_function_is_few_blocks() {
    let funcs = build("int f(void) { return 1; }");
    assert_eq!(funcs.len(), 1);
    // Entry, the dead block after return, and the exit block.
    assert!(funcs[0].bbs.len() <= 3);
    let ops = ops_of(&funcs[0]);
    assert!(ops.iter().any(|op| matches!(op, IrOp::Imm { value: 1, .. })));
    assert!(ops.iter().any(|op| matches!(op, IrOp::Result { src: Some(_) })));
}

#[test]
fn if_produces_branches() {
    let funcs = build("int f(int x) { if (x) return 1; return 2; }");
    let ops = ops_of(&funcs[0]);
    assert!(ops.iter().any(|op| matches!(op, IrOp::JmpIf { .. })));
    assert!(funcs[0].bbs.len() >= 3);
}

#[test]
fn short_circuit_and_branches() {
    let funcs = build("int f(int a, int b) { return a && b; }");
    let ops = ops_of(&funcs[0]);
    let jumps = ops
        .iter()
        .filter(|op| matches!(op, IrOp::JmpIf { .. }))
        .count();
    assert!(jumps >= 2, "both operands must be tested");
}

#[test]
fn pointer_arithmetic_scales_by_element_size() {
    let funcs = build("int f(int *p) { return *(p + 2); }");
    let ops = ops_of(&funcs[0]);
    // The index 2 is multiplied by sizeof(int).
    assert!(ops.iter().any(|op| matches!(op, IrOp::Imm { value: 4, .. })));
    assert!(ops
        .iter()
        .any(|op| matches!(op, IrOp::Bin { op: rcc_ir::IrBinOp::Mul, .. })));
}

#[test]
fn while_loop_has_back_edge() {
    let funcs = build("int f(int n) { int i; i = 0; while (i < n) i = i + 1; return i; }");
    let func = &funcs[0];
    // Some block jumps to an earlier block.
    let mut back_edge = false;
    for (b, _) in func.bbs.iter().enumerate() {
        for s in func.succs(b) {
            if s <= b {
                back_edge = true;
            }
        }
    }
    assert!(back_edge);
}

#[test]
fn call_records_argument_vregs() {
    let funcs = build(
        "int add(int a, int b) { return a + b; }\n\
         int f(void) { return add(1, 2); }",
    );
    let f = funcs.iter().find(|f| f.bbs.len() > 0 && f.params.is_empty()).unwrap();
    let ops = ops_of(f);
    let call = ops.iter().find_map(|op| match op {
        IrOp::Call { args, .. } => Some(args.len()),
        _ => None,
    });
    assert_eq!(call, Some(2));
}

#[test]
fn struct_assignment_lowers_to_memcpy() {
    let funcs = build(
        "struct S { int a; int b; };\n\
         void f(struct S *d, struct S *s) { *d = *s; }",
    );
    let ops = ops_of(&funcs[0]);
    assert!(ops.iter().any(|op| matches!(op, IrOp::Memcpy { size: 8, .. })));
}

#[test]
fn local_aggregate_initializer_zero_fills_first() {
    let funcs = build("int f(void) { int a[4] = {1, 2}; return a[0]; }");
    let ops = ops_of(&funcs[0]);
    assert!(ops.iter().any(|op| matches!(op, IrOp::Clear { size: 16, .. })));
}

#[test]
fn static_local_reference_goes_through_global_label() {
    let funcs = build("int get(void) { static int c = 1; return c; }");
    let ops = ops_of(&funcs[0]);
    assert!(ops.iter().any(|op| matches!(op, IrOp::Iofs { mangle: false, .. })));
    // The static does not occupy a frame slot.
    assert!(funcs[0].slots.is_empty());
}

#[test]
fn undefined_goto_label_is_an_error() {
    let (program, ctx) =
        rcc_parser::parse("int f(void) { goto nowhere; return 0; }", "test.c").expect("parse");
    let err = build_program(&program, &ctx).expect_err("undefined label");
    assert!(err.message().contains("undeclared label"));
}

#[test]
fn vararg_call_counts_float_register_args() {
    let funcs = build(
        "int printf(const char *fmt, ...);\n\
         int f(double d) { return printf(\"%f\", d); }",
    );
    let ops = ops_of(&funcs[0]);
    let n = ops.iter().find_map(|op| match op {
        IrOp::Call { vararg_floats, .. } => *vararg_floats,
        _ => None,
    });
    assert_eq!(n, Some(1));
}
