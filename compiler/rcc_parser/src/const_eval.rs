//! Constant-expression support
//!
//! The parser folds literal arithmetic eagerly, so by the time a constant is
//! required (case labels, array bounds, enum values) the expression is either
//! a literal or it is not constant. Global initializers additionally admit
//! the address-of-global pattern, checked here and evaluated again at
//! emission.

use crate::ast::{BinOp, Expr, ExprKind};
use crate::scope::{Scopes, VarPlace};

/// May `expr` appear in a global initializer?
pub fn is_const_expr(scopes: &Scopes, expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Fixnum(_) | ExprKind::Flonum(_) | ExprKind::Str { .. } => true,
        // A global array or function decays to a constant address.
        ExprKind::Var { .. } => {
            (expr.ty.is_array() || expr.ty.is_func()) && is_global_var(scopes, expr)
        }
        ExprKind::Ref(sub) => is_const_address(scopes, sub),
        ExprKind::Cast(sub) => is_const_expr(scopes, sub),
        ExprKind::Bin { op, lhs, rhs } => matches!(
            op,
            BinOp::Add | BinOp::Sub | BinOp::PtrAdd | BinOp::PtrSub
        ) && is_const_expr(scopes, lhs)
            && is_const_expr(scopes, rhs),
        _ => false,
    }
}

/// Is `expr` an addressable location with a link-time constant address?
fn is_const_address(scopes: &Scopes, expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Var { .. } => is_global_var(scopes, expr),
        ExprKind::Member { target, .. } => is_const_address(scopes, target),
        ExprKind::Deref(sub) => is_const_expr(scopes, sub),
        ExprKind::Str { .. } => true,
        _ => false,
    }
}

fn is_global_var(scopes: &Scopes, expr: &Expr) -> bool {
    let ExprKind::Var { name, scope } = &expr.kind else {
        return false;
    };
    match scopes.find(*scope, *name) {
        Some((_, var)) => matches!(
            var.place,
            VarPlace::Global { .. } | VarPlace::StaticLocal { .. }
        ),
        None => false,
    }
}
