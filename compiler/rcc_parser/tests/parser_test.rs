//! Parser + sema integration tests

use rcc_parser::{
    parse, BinOp, Declaration, Expr, ExprKind, Function, Initializer, Program, Stmt, VarPlace,
};
use rcc_types::{FixnumKind, TypeKind};

fn parse_ok(src: &str) -> (Program, rcc_parser::Context) {
    parse(src, "test.c").expect("parse")
}

fn parse_err(src: &str) -> rcc_common::CcError {
    parse(src, "test.c").expect_err("expected an error")
}

fn first_fn(program: &Program) -> &Function {
    program
        .decls
        .iter()
        .find_map(|d| match d {
            Declaration::Defun(f) => Some(f),
            _ => None,
        })
        .expect("function")
}

/// The expression of the first `return` statement, searched recursively.
fn first_return(stmts: &[Stmt]) -> Option<&Expr> {
    for stmt in stmts {
        match stmt {
            Stmt::Return { value: Some(e), .. } => return Some(e),
            Stmt::Block { stmts, .. } => {
                if let Some(e) = first_return(stmts) {
                    return Some(e);
                }
            }
            _ => {}
        }
    }
    None
}

#[test]
fn constant_folding_collapses_to_one_literal() {
    let (program, _) = parse_ok("int f(void) { return 1 + 2 * 3; }");
    let expr = first_return(&first_fn(&program).body).unwrap();
    assert!(matches!(expr.kind, ExprKind::Fixnum(7)), "got {:?}", expr.kind);
}

#[test]
fn folding_handles_casts_and_unary() {
    let (program, _) = parse_ok("int f(void) { return -(char)300 + sizeof(long) * 0; }");
    let expr = first_return(&first_fn(&program).body).unwrap();
    // (char)300 wraps to 44; negation and the sizeof product fold away.
    assert!(matches!(expr.kind, ExprKind::Fixnum(-44)), "got {:?}", expr.kind);
}

#[test]
fn pointer_addition_becomes_ptradd() {
    let (program, _) = parse_ok("long f(int *p) { return *(p + 2); }");
    let expr = first_return(&first_fn(&program).body).unwrap();
    // return (long)(*(PTRADD(p, 2)))  -- the cast comes from the return type.
    let inner = match &expr.kind {
        ExprKind::Cast(sub) => sub,
        _ => panic!("expected return-type cast, got {:?}", expr.kind),
    };
    let ExprKind::Deref(sum) = &inner.kind else {
        panic!("expected deref, got {:?}", inner.kind);
    };
    let ExprKind::Bin { op, lhs, rhs } = &sum.kind else {
        panic!("expected binary node, got {:?}", sum.kind);
    };
    assert_eq!(*op, BinOp::PtrAdd);
    assert!(matches!(lhs.kind, ExprKind::Var { .. }));
    assert!(matches!(rhs.kind, ExprKind::Fixnum(2)));
    assert!(sum.ty.is_ptr());
}

#[test]
fn implicit_casts_are_inserted() {
    let (program, _) = parse_ok("long f(int a) { return a; }");
    let expr = first_return(&first_fn(&program).body).unwrap();
    let ExprKind::Cast(sub) = &expr.kind else {
        panic!("expected implicit widening cast, got {:?}", expr.kind);
    };
    assert!(matches!(
        expr.ty.kind,
        TypeKind::Fixnum { kind: FixnumKind::Long, .. }
    ));
    assert!(matches!(sub.kind, ExprKind::Var { .. }));
}

#[test]
fn char_literals_have_type_int() {
    let (program, _) = parse_ok("int f(void) { return sizeof('a'); }");
    let expr = first_return(&first_fn(&program).body).unwrap();
    // sizeof('a') is sizeof(int), folded and cast back to int.
    assert!(matches!(expr.kind, ExprKind::Fixnum(4)), "got {:?}", expr.kind);
}

#[test]
fn enum_members_fold_to_literals() {
    let (program, _) = parse_ok("enum E { A, B = 10, C }; int f(void) { return C; }");
    let expr = first_return(&first_fn(&program).body).unwrap();
    // C = 11, cast from enum to int folds away.
    assert!(matches!(expr.kind, ExprKind::Fixnum(11)), "got {:?}", expr.kind);
}

#[test]
fn string_literals_are_pooled() {
    let (program, ctx) = parse_ok("const char *s = \"hi\";");
    assert_eq!(program.strings.entries.len(), 1);
    let lit = &program.strings.entries[0];
    assert_eq!(lit.bytes, b"hi");
    assert!(ctx.interner.resolve(lit.label).starts_with(".L.str."));
}

#[test]
fn array_size_inferred_from_initializer() {
    let (program, ctx) = parse_ok("int a[] = {1, 2, 3};");
    let name = program
        .decls
        .iter()
        .find_map(|d| match d {
            Declaration::VarDecl { names } => names.first().copied(),
            _ => None,
        })
        .unwrap();
    let var = program.scopes.find_in(rcc_parser::Scopes::GLOBAL, name).unwrap();
    assert_eq!(ctx.types.type_size(&var.ty), Some(12));
}

#[test]
fn designated_initializers_normalize() {
    let (program, _) = parse_ok("int a[4] = {[2] = 7, 8};");
    let name = program
        .decls
        .iter()
        .find_map(|d| match d {
            Declaration::VarDecl { names } => names.first().copied(),
            _ => None,
        })
        .unwrap();
    let var = program.scopes.find_in(rcc_parser::Scopes::GLOBAL, name).unwrap();
    let VarPlace::Global { init: Some(Initializer::Multi(elems)) } = &var.place else {
        panic!("expected a normalized multi initializer");
    };
    assert_eq!(elems.len(), 4);
    assert!(elems[0].is_none());
    assert!(elems[1].is_none());
    assert!(matches!(
        elems[2],
        Some(Initializer::Single(Expr { kind: ExprKind::Fixnum(7), .. }))
    ));
    assert!(matches!(
        elems[3],
        Some(Initializer::Single(Expr { kind: ExprKind::Fixnum(8), .. }))
    ));
}

#[test]
fn static_local_becomes_synthesized_global() {
    let (program, ctx) = parse_ok("int get(void) { static int c = 1; return c; }");
    assert_eq!(program.static_globals.len(), 1);
    let gvar = program.static_globals[0];
    assert_eq!(ctx.interner.resolve(gvar), "c.0");
    let var = program.scopes.find_in(rcc_parser::Scopes::GLOBAL, gvar).unwrap();
    assert!(var.storage.is_static);
}

#[test]
fn struct_member_access_resolves_index() {
    let (program, _) =
        parse_ok("struct P { int x; int y; }; int f(struct P *p) { return p->y; }");
    let expr = first_return(&first_fn(&program).body).unwrap();
    let ExprKind::Member { index, target, .. } = &expr.kind else {
        panic!("expected member access, got {:?}", expr.kind);
    };
    assert_eq!(*index, 1);
    assert!(matches!(target.kind, ExprKind::Deref(_)));
}

#[test]
fn hidden_return_parameter_for_struct_return() {
    let (program, ctx) = parse_ok(
        "struct P { long a; long b; }; struct P make(void) { struct P p; return p; }",
    );
    let func = first_fn(&program);
    assert!(func.ret_hidden);
    assert_eq!(func.param_count, 1);
    assert_eq!(ctx.interner.resolve(func.locals[0].name), ".ret");
    assert!(func.locals[0].ty.is_ptr());
}

#[test]
fn typedef_declares_a_type() {
    let (program, _) = parse_ok("typedef long word; word f(word w) { return w; }");
    let func = first_fn(&program);
    assert!(matches!(
        func.locals[0].ty.kind,
        TypeKind::Fixnum { kind: FixnumKind::Long, .. }
    ));
}

#[test]
fn undefined_variable_is_an_error() {
    let err = parse_err("int f(void) { return x; }");
    assert!(err.message().contains("undefined variable"));
    assert!(err.loc().is_some());
}

#[test]
fn type_mismatch_is_an_error() {
    let err = parse_err("int f(int *p) { int x; x = p; }");
    assert!(err.message().contains("cannot convert"));
}

#[test]
fn assignment_to_non_lvalue_is_an_error() {
    let err = parse_err("void f(void) { 1 = 2; }");
    assert!(err.message().contains("lvalue"));
}

#[test]
fn sizing_an_incomplete_struct_is_an_error() {
    let err = parse_err("struct S; int n = sizeof(struct S);");
    assert!(err.message().contains("incomplete"));
}

#[test]
fn duplicate_case_is_an_error() {
    let err = parse_err("int f(int x) { switch (x) { case 1: case 1: return 0; } return 1; }");
    assert!(err.message().contains("duplicate case"));
}

#[test]
fn bool_is_rejected_explicitly() {
    let err = parse_err("_Bool b;");
    assert!(err.message().contains("not supported"));
}

#[test]
fn long_double_is_rejected_explicitly() {
    let err = parse_err("long double d;");
    assert!(err.message().contains("not supported"));
}

#[test]
fn variadic_prototype_parses() {
    let (program, _) = parse_ok(
        "int printf(const char *fmt, ...); int f(void) { return printf(\"%d\", 1); }",
    );
    let func = first_fn(&program);
    assert_eq!(func.param_count, 0);
}

#[test]
fn function_pointer_declarator() {
    let (program, _) = parse_ok("int (*op)(int, int);");
    let Declaration::VarDecl { names } = &program.decls[0] else {
        panic!("expected a variable declaration");
    };
    let var = program.scopes.find_in(rcc_parser::Scopes::GLOBAL, names[0]).unwrap();
    let TypeKind::Ptr { base } = &var.ty.kind else {
        panic!("expected pointer type, got {:?}", var.ty.kind);
    };
    assert!(base.is_func());
}
