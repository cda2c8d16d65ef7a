//! Expression parsing and typing
//!
//! Precedence-ladder recursive descent. Each builder computes the node type,
//! inserts implicit casts, rewrites pointer arithmetic into the dedicated
//! PTRADD/PTRSUB/PTRDIFF forms, and folds literal operands on the spot.

use crate::ast::*;
use crate::parser::Parser;
use rcc_common::{CcResult, Loc};
use rcc_lexer::TokenKind;
use rcc_types::{ptrof, FixnumKind, FlonumKind, Qualifiers, Type, TypeKind};

fn wrap_fixnum(value: i64, kind: FixnumKind, unsigned: bool) -> i64 {
    let size = kind.size();
    if size >= 8 {
        return value;
    }
    let bits = (size * 8) as u32;
    let masked = value & ((1i64 << bits) - 1);
    if unsigned {
        masked
    } else {
        let sign = 1i64 << (bits - 1);
        if masked & sign != 0 {
            masked - (1i64 << bits)
        } else {
            masked
        }
    }
}

impl Parser<'_> {
    // ---- entry points ---------------------------------------------------

    pub(crate) fn parse_expr(&mut self) -> CcResult<Expr> {
        let mut expr = self.parse_assign()?;
        while let Some(tok) = self.consume(&TokenKind::Comma)? {
            let rhs = self.parse_assign()?;
            let ty = rhs.ty.clone();
            expr = Expr::new(
                ExprKind::Comma { lhs: Box::new(expr), rhs: Box::new(rhs) },
                ty,
                tok.loc,
            );
        }
        Ok(expr)
    }

    pub(crate) fn parse_assign(&mut self) -> CcResult<Expr> {
        let lhs = self.parse_ternary()?;
        let tok = self.next()?;
        let loc = tok.loc;
        let op = match tok.kind {
            TokenKind::Assign => {
                let rhs = self.parse_assign()?;
                return self.build_assign(lhs, rhs, loc);
            }
            TokenKind::AddAssign => BinOp::Add,
            TokenKind::SubAssign => BinOp::Sub,
            TokenKind::MulAssign => BinOp::Mul,
            TokenKind::DivAssign => BinOp::Div,
            TokenKind::ModAssign => BinOp::Mod,
            TokenKind::AndAssign => BinOp::BitAnd,
            TokenKind::OrAssign => BinOp::BitOr,
            TokenKind::XorAssign => BinOp::BitXor,
            TokenKind::LShiftAssign => BinOp::LShift,
            TokenKind::RShiftAssign => BinOp::RShift,
            _ => {
                self.unread(tok);
                return Ok(lhs);
            }
        };
        let rhs = self.parse_assign()?;
        self.build_assign_with(op, lhs, rhs, loc)
    }

    fn parse_ternary(&mut self) -> CcResult<Expr> {
        let cond = self.parse_logor()?;
        let Some(tok) = self.consume(&TokenKind::Question)? else {
            return Ok(cond);
        };
        self.check_scalar(&cond)?;
        let then_expr = self.parse_expr()?;
        self.expect(&TokenKind::Colon, "':'")?;
        let else_expr = self.parse_ternary()?;
        let (then_expr, else_expr, ty) = self.ternary_unify(then_expr, else_expr, tok.loc)?;
        Ok(Expr::new(
            ExprKind::Ternary {
                cond: Box::new(cond),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
            },
            ty,
            tok.loc,
        ))
    }

    fn ternary_unify(&self, t: Expr, e: Expr, loc: Loc) -> CcResult<(Expr, Expr, Type)> {
        if t.ty.is_number() && e.ty.is_number() {
            let (t, e) = self.arith_convert(t, e)?;
            let ty = t.ty.clone();
            return Ok((t, e, ty));
        }
        if self.types.same_type(&t.ty, &e.ty) {
            let ty = t.ty.clone();
            return Ok((t, e, ty));
        }
        if t.ty.is_void() && e.ty.is_void() {
            return Ok((t, e, Type::void()));
        }
        if t.ty.is_ptr_or_array() && (e.is_zero() || e.ty.is_ptr_or_array()) {
            let ty = rcc_types::array_to_ptr(&t.ty);
            let e = self.make_cast(e, &ty, false)?;
            return Ok((t, e, ty));
        }
        if e.ty.is_ptr_or_array() && t.is_zero() {
            let ty = rcc_types::array_to_ptr(&e.ty);
            let t = self.make_cast(t, &ty, false)?;
            return Ok((t, e, ty));
        }
        Err(self.serr(loc, "incompatible operand types in conditional expression"))
    }

    fn parse_logor(&mut self) -> CcResult<Expr> {
        let mut lhs = self.parse_logand()?;
        while let Some(tok) = self.consume(&TokenKind::LogOr)? {
            let rhs = self.parse_logand()?;
            self.check_scalar(&lhs)?;
            self.check_scalar(&rhs)?;
            lhs = Expr::new(
                ExprKind::Bin { op: BinOp::LogOr, lhs: Box::new(lhs), rhs: Box::new(rhs) },
                Type::int(),
                tok.loc,
            );
        }
        Ok(lhs)
    }

    fn parse_logand(&mut self) -> CcResult<Expr> {
        let mut lhs = self.parse_bitor()?;
        while let Some(tok) = self.consume(&TokenKind::LogAnd)? {
            let rhs = self.parse_bitor()?;
            self.check_scalar(&lhs)?;
            self.check_scalar(&rhs)?;
            lhs = Expr::new(
                ExprKind::Bin { op: BinOp::LogAnd, lhs: Box::new(lhs), rhs: Box::new(rhs) },
                Type::int(),
                tok.loc,
            );
        }
        Ok(lhs)
    }

    fn parse_bitor(&mut self) -> CcResult<Expr> {
        let mut lhs = self.parse_bitxor()?;
        while let Some(tok) = self.consume(&TokenKind::Pipe)? {
            let rhs = self.parse_bitxor()?;
            lhs = self.build_int_bin(BinOp::BitOr, lhs, rhs, tok.loc)?;
        }
        Ok(lhs)
    }

    fn parse_bitxor(&mut self) -> CcResult<Expr> {
        let mut lhs = self.parse_bitand()?;
        while let Some(tok) = self.consume(&TokenKind::Caret)? {
            let rhs = self.parse_bitand()?;
            lhs = self.build_int_bin(BinOp::BitXor, lhs, rhs, tok.loc)?;
        }
        Ok(lhs)
    }

    fn parse_bitand(&mut self) -> CcResult<Expr> {
        let mut lhs = self.parse_equality()?;
        while let Some(tok) = self.consume(&TokenKind::Amp)? {
            let rhs = self.parse_equality()?;
            lhs = self.build_int_bin(BinOp::BitAnd, lhs, rhs, tok.loc)?;
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> CcResult<Expr> {
        let mut lhs = self.parse_relational()?;
        loop {
            let op = if self.consume(&TokenKind::Eq)?.is_some() {
                BinOp::Eq
            } else if self.consume(&TokenKind::Ne)?.is_some() {
                BinOp::Ne
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_relational()?;
            let loc = lhs.loc;
            lhs = self.build_cmp(op, lhs, rhs, loc)?;
        }
    }

    fn parse_relational(&mut self) -> CcResult<Expr> {
        let mut lhs = self.parse_shift()?;
        loop {
            let op = if self.consume(&TokenKind::Lt)?.is_some() {
                BinOp::Lt
            } else if self.consume(&TokenKind::Le)?.is_some() {
                BinOp::Le
            } else if self.consume(&TokenKind::Gt)?.is_some() {
                BinOp::Gt
            } else if self.consume(&TokenKind::Ge)?.is_some() {
                BinOp::Ge
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_shift()?;
            let loc = lhs.loc;
            lhs = self.build_cmp(op, lhs, rhs, loc)?;
        }
    }

    fn parse_shift(&mut self) -> CcResult<Expr> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = if self.consume(&TokenKind::LShift)?.is_some() {
                BinOp::LShift
            } else if self.consume(&TokenKind::RShift)?.is_some() {
                BinOp::RShift
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_additive()?;
            let loc = lhs.loc;
            self.check_fixnum(&lhs)?;
            self.check_fixnum(&rhs)?;
            let lhs2 = self.promote(lhs)?;
            let rhs2 = self.make_cast(rhs, &Type::int(), false)?;
            let ty = lhs2.ty.clone();
            if let Some(kind) = self.try_fold_bin(op, &lhs2, &rhs2, &ty, loc)? {
                lhs = Expr::new(kind, ty, loc);
            } else {
                lhs = Expr::new(
                    ExprKind::Bin { op, lhs: Box::new(lhs2), rhs: Box::new(rhs2) },
                    ty,
                    loc,
                );
            }
        }
    }

    fn parse_additive(&mut self) -> CcResult<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            if let Some(tok) = self.consume(&TokenKind::Add)? {
                let rhs = self.parse_multiplicative()?;
                lhs = self.build_add(lhs, rhs, tok.loc)?;
            } else if let Some(tok) = self.consume(&TokenKind::Sub)? {
                let rhs = self.parse_multiplicative()?;
                lhs = self.build_sub(lhs, rhs, tok.loc)?;
            } else {
                return Ok(lhs);
            }
        }
    }

    fn parse_multiplicative(&mut self) -> CcResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = if self.consume(&TokenKind::Mul)?.is_some() {
                BinOp::Mul
            } else if self.consume(&TokenKind::Div)?.is_some() {
                BinOp::Div
            } else if self.consume(&TokenKind::Mod)?.is_some() {
                BinOp::Mod
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_unary()?;
            let loc = lhs.loc;
            if op == BinOp::Mod {
                lhs = self.build_int_bin(op, lhs, rhs, loc)?;
            } else {
                self.check_number(&lhs)?;
                self.check_number(&rhs)?;
                let (l, r) = self.arith_convert(lhs, rhs)?;
                let ty = l.ty.clone();
                if let Some(kind) = self.try_fold_bin(op, &l, &r, &ty, loc)? {
                    lhs = Expr::new(kind, ty, loc);
                } else {
                    lhs = Expr::new(
                        ExprKind::Bin { op, lhs: Box::new(l), rhs: Box::new(r) },
                        ty,
                        loc,
                    );
                }
            }
        }
    }

    // ---- unary / postfix / primary --------------------------------------

    fn parse_unary(&mut self) -> CcResult<Expr> {
        let tok = self.next()?;
        let loc = tok.loc;
        match tok.kind {
            TokenKind::Add => {
                let sub = self.parse_unary()?;
                self.check_number(&sub)?;
                self.promote(sub)
            }
            TokenKind::Sub => {
                let sub = self.parse_unary()?;
                self.check_number(&sub)?;
                let sub = self.promote(sub)?;
                let ty = sub.ty.clone();
                match sub.kind {
                    ExprKind::Fixnum(v) => {
                        let TypeKind::Fixnum { kind, unsigned } = ty.kind else { unreachable!() };
                        Ok(Expr::new(
                            ExprKind::Fixnum(wrap_fixnum(v.wrapping_neg(), kind, unsigned)),
                            ty,
                            loc,
                        ))
                    }
                    ExprKind::Flonum(f) => Ok(Expr::new(ExprKind::Flonum(-f), ty, loc)),
                    _ => Ok(Expr::new(
                        ExprKind::Unary { op: UnaryOp::Neg, sub: Box::new(sub) },
                        ty,
                        loc,
                    )),
                }
            }
            TokenKind::Not => {
                let sub = self.parse_unary()?;
                self.check_scalar(&sub)?;
                match sub.as_fixnum() {
                    Some(v) => Ok(Expr::new(ExprKind::Fixnum((v == 0) as i64), Type::int(), loc)),
                    None => Ok(Expr::new(
                        ExprKind::Unary { op: UnaryOp::Not, sub: Box::new(sub) },
                        Type::int(),
                        loc,
                    )),
                }
            }
            TokenKind::Tilde => {
                let sub = self.parse_unary()?;
                self.check_fixnum(&sub)?;
                let sub = self.promote(sub)?;
                let ty = sub.ty.clone();
                match sub.as_fixnum() {
                    Some(v) => {
                        let TypeKind::Fixnum { kind, unsigned } = ty.kind else { unreachable!() };
                        Ok(Expr::new(ExprKind::Fixnum(wrap_fixnum(!v, kind, unsigned)), ty, loc))
                    }
                    None => Ok(Expr::new(
                        ExprKind::Unary { op: UnaryOp::BitNot, sub: Box::new(sub) },
                        ty,
                        loc,
                    )),
                }
            }
            TokenKind::Amp => {
                let sub = self.parse_unary()?;
                let ty = ptrof(&sub.ty);
                if !sub.ty.is_func() {
                    self.check_lvalue(&sub, false)?;
                }
                Ok(Expr::new(ExprKind::Ref(Box::new(sub)), ty, loc))
            }
            TokenKind::Mul => {
                let sub = self.parse_unary()?;
                self.build_deref(sub, loc)
            }
            TokenKind::Inc => {
                let sub = self.parse_unary()?;
                self.build_incdec(UnaryOp::PreInc, sub, loc)
            }
            TokenKind::Dec => {
                let sub = self.parse_unary()?;
                self.build_incdec(UnaryOp::PreDec, sub, loc)
            }
            TokenKind::KwSizeof => {
                let ty = if let Some(lp) = self.consume(&TokenKind::LParen)? {
                    if self.starts_type()? {
                        let ty = self.parse_type_name(loc)?;
                        self.expect(&TokenKind::RParen, "')'")?;
                        ty
                    } else {
                        self.unread(lp);
                        self.parse_unary()?.ty
                    }
                } else {
                    self.parse_unary()?.ty
                };
                let size = self
                    .types
                    .type_size(&ty)
                    .ok_or_else(|| self.serr(loc, "sizeof applied to an incomplete type"))?;
                Ok(Expr::new(
                    ExprKind::Fixnum(size as i64),
                    Type::new(TypeKind::Fixnum { kind: FixnumKind::Long, unsigned: true }),
                    loc,
                ))
            }
            TokenKind::LParen => {
                if self.starts_type()? {
                    let ty = self.parse_type_name(loc)?;
                    self.expect(&TokenKind::RParen, "')'")?;
                    let sub = self.parse_unary()?;
                    self.make_cast(sub, &ty, true)
                } else {
                    self.unread(tok);
                    self.parse_postfix()
                }
            }
            _ => {
                self.unread(tok);
                self.parse_postfix()
            }
        }
    }

    fn parse_postfix(&mut self) -> CcResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if let Some(tok) = self.consume(&TokenKind::LBracket)? {
                let index = self.parse_expr()?;
                self.expect(&TokenKind::RBracket, "']'")?;
                let sum = self.build_add(expr, index, tok.loc)?;
                expr = self.build_deref(sum, tok.loc)?;
            } else if let Some(tok) = self.consume(&TokenKind::LParen)? {
                let mut args = Vec::new();
                if self.consume(&TokenKind::RParen)?.is_none() {
                    loop {
                        args.push(self.parse_assign()?);
                        if self.consume(&TokenKind::Comma)?.is_none() {
                            self.expect(&TokenKind::RParen, "')'")?;
                            break;
                        }
                    }
                }
                expr = self.build_funcall(expr, args, tok.loc)?;
            } else if let Some(tok) = self.consume(&TokenKind::Dot)? {
                let name = self.expect_ident("member name")?;
                expr = self.build_member(expr, name, tok.loc)?;
            } else if let Some(tok) = self.consume(&TokenKind::Arrow)? {
                let name = self.expect_ident("member name")?;
                let target = self.build_deref(expr, tok.loc)?;
                expr = self.build_member(target, name, tok.loc)?;
            } else if let Some(tok) = self.consume(&TokenKind::Inc)? {
                expr = self.build_incdec(UnaryOp::PostInc, expr, tok.loc)?;
            } else if let Some(tok) = self.consume(&TokenKind::Dec)? {
                expr = self.build_incdec(UnaryOp::PostDec, expr, tok.loc)?;
            } else {
                return Ok(expr);
            }
        }
    }

    fn expect_ident(&mut self, what: &str) -> CcResult<rcc_common::Name> {
        let tok = self.next()?;
        match tok.kind {
            TokenKind::Ident(name) => Ok(name),
            _ => Err(self.perr(tok.loc, format!("{} expected", what))),
        }
    }

    fn parse_primary(&mut self) -> CcResult<Expr> {
        let tok = self.next()?;
        let loc = tok.loc;
        match tok.kind {
            TokenKind::IntLit { value, unsigned, long } => {
                let kind = match long {
                    0 => {
                        if value > i32::MAX as i64 || value < i32::MIN as i64 {
                            FixnumKind::Long
                        } else {
                            FixnumKind::Int
                        }
                    }
                    1 => FixnumKind::Long,
                    _ => FixnumKind::LLong,
                };
                Ok(Expr::new(
                    ExprKind::Fixnum(value),
                    Type::new(TypeKind::Fixnum { kind, unsigned }),
                    loc,
                ))
            }
            TokenKind::CharLit(value) => {
                // Character literals have type int in C.
                Ok(Expr::new(ExprKind::Fixnum(value), Type::int(), loc))
            }
            TokenKind::FloatLit { value, single } => {
                let kind = if single { FlonumKind::Float } else { FlonumKind::Double };
                Ok(Expr::new(ExprKind::Flonum(value), Type::flonum(kind), loc))
            }
            TokenKind::StrLit(bytes) => {
                let label = self.new_str_label();
                let len = bytes.len() + 1;
                self.strings.entries.push(StringLit { label, bytes });
                let ty = Type::with_qual(
                    TypeKind::Array { base: Box::new(Type::char_()), length: Some(len) },
                    Qualifiers::const_(),
                );
                Ok(Expr::new(ExprKind::Str { label }, ty, loc))
            }
            TokenKind::Ident(name) => {
                let found = self
                    .scopes
                    .find(self.cur_scope, name)
                    .map(|(_, var)| (var.ty.clone(), var.storage));
                if let Some((ty, storage)) = found {
                    if storage.is_typedef {
                        return Err(self.serr(loc, "unexpected type name in expression"));
                    }
                    return Ok(Expr::new(
                        ExprKind::Var { name, scope: self.cur_scope },
                        ty,
                        loc,
                    ));
                }
                if let Some(value) = self.types.find_enum_value(name) {
                    return Ok(Expr::new(ExprKind::Fixnum(value), Type::enum_(), loc));
                }
                Err(self.serr(loc, format!("undefined variable: '{}'", self.resolve(name))))
            }
            TokenKind::LParen => {
                let expr = self.parse_expr()?;
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(expr)
            }
            _ => Err(self.perr(loc, format!("unexpected token: '{}'", tok.kind))),
        }
    }

    // ---- node builders --------------------------------------------------

    pub(crate) fn build_deref(&self, sub: Expr, loc: Loc) -> CcResult<Expr> {
        let Some(pointee) = sub.ty.pointee().cloned() else {
            return Err(self.serr(loc, "cannot dereference a non-pointer"));
        };
        Ok(Expr::new(ExprKind::Deref(Box::new(sub)), pointee, loc))
    }

    fn build_member(&self, target: Expr, name: rcc_common::Name, loc: Loc) -> CcResult<Expr> {
        if !target.ty.is_struct() {
            return Err(self.serr(loc, "member access on a non-struct value"));
        }
        let Some(id) = self.types.resolve_struct(&target.ty) else {
            return Err(self.serr(loc, "member access on an incomplete struct"));
        };
        let sinfo = self.types.struct_info(id);
        let Some(index) = sinfo.find_member(name) else {
            return Err(self.serr(loc, format!("no member named '{}'", self.resolve(name))));
        };
        let ty = sinfo.members[index].ty.clone();
        Ok(Expr::new(ExprKind::Member { target: Box::new(target), name, index }, ty, loc))
    }

    fn build_incdec(&self, op: UnaryOp, sub: Expr, loc: Loc) -> CcResult<Expr> {
        self.check_lvalue(&sub, true)?;
        if !(sub.ty.is_number() || sub.ty.is_ptr()) {
            return Err(self.serr(loc, "invalid operand for increment/decrement"));
        }
        let ty = sub.ty.clone();
        Ok(Expr::new(ExprKind::Unary { op, sub: Box::new(sub) }, ty, loc))
    }

    fn build_assign(&self, lhs: Expr, rhs: Expr, loc: Loc) -> CcResult<Expr> {
        self.check_lvalue(&lhs, true)?;
        let ty = lhs.ty.clone();
        let rhs = if ty.is_struct() {
            if !self.types.same_type(&rhs.ty, &ty) {
                return Err(self.serr(loc, "incompatible types in assignment"));
            }
            rhs
        } else {
            self.make_cast(rhs, &ty, false)?
        };
        Ok(Expr::new(ExprKind::Assign { lhs: Box::new(lhs), rhs: Box::new(rhs) }, ty, loc))
    }

    fn build_assign_with(&self, op: BinOp, lhs: Expr, rhs: Expr, loc: Loc) -> CcResult<Expr> {
        self.check_lvalue(&lhs, true)?;
        let ty = lhs.ty.clone();
        let (op, rhs) = match op {
            BinOp::Add | BinOp::Sub if ty.is_ptr() => {
                self.check_fixnum(&rhs)?;
                let rhs = self.promote(rhs)?;
                (if op == BinOp::Add { BinOp::PtrAdd } else { BinOp::PtrSub }, rhs)
            }
            BinOp::LShift | BinOp::RShift => {
                self.check_fixnum(&lhs)?;
                self.check_fixnum(&rhs)?;
                (op, self.make_cast(rhs, &Type::int(), false)?)
            }
            BinOp::Mod | BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => {
                self.check_fixnum(&lhs)?;
                self.check_fixnum(&rhs)?;
                (op, self.make_cast(rhs, &ty, false)?)
            }
            _ => {
                self.check_number(&lhs)?;
                self.check_number(&rhs)?;
                (op, self.make_cast(rhs, &ty, false)?)
            }
        };
        Ok(Expr::new(
            ExprKind::AssignWith { op, lhs: Box::new(lhs), rhs: Box::new(rhs) },
            ty,
            loc,
        ))
    }

    pub(crate) fn build_add(&self, lhs: Expr, rhs: Expr, loc: Loc) -> CcResult<Expr> {
        if lhs.ty.is_number() && rhs.ty.is_number() {
            let (l, r) = self.arith_convert(lhs, rhs)?;
            let ty = l.ty.clone();
            if let Some(kind) = self.try_fold_bin(BinOp::Add, &l, &r, &ty, loc)? {
                return Ok(Expr::new(kind, ty, loc));
            }
            return Ok(Expr::new(
                ExprKind::Bin { op: BinOp::Add, lhs: Box::new(l), rhs: Box::new(r) },
                ty,
                loc,
            ));
        }
        if lhs.ty.is_ptr_or_array() && rhs.ty.is_fixnum() {
            let ty = rcc_types::array_to_ptr(&lhs.ty);
            let rhs = self.promote(rhs)?;
            return Ok(Expr::new(
                ExprKind::Bin { op: BinOp::PtrAdd, lhs: Box::new(lhs), rhs: Box::new(rhs) },
                ty,
                loc,
            ));
        }
        if lhs.ty.is_fixnum() && rhs.ty.is_ptr_or_array() {
            let ty = rcc_types::array_to_ptr(&rhs.ty);
            let lhs = self.promote(lhs)?;
            return Ok(Expr::new(
                ExprKind::Bin { op: BinOp::PtrAdd, lhs: Box::new(rhs), rhs: Box::new(lhs) },
                ty,
                loc,
            ));
        }
        Err(self.serr(loc, "invalid operands for '+'"))
    }

    fn build_sub(&self, lhs: Expr, rhs: Expr, loc: Loc) -> CcResult<Expr> {
        if lhs.ty.is_number() && rhs.ty.is_number() {
            let (l, r) = self.arith_convert(lhs, rhs)?;
            let ty = l.ty.clone();
            if let Some(kind) = self.try_fold_bin(BinOp::Sub, &l, &r, &ty, loc)? {
                return Ok(Expr::new(kind, ty, loc));
            }
            return Ok(Expr::new(
                ExprKind::Bin { op: BinOp::Sub, lhs: Box::new(l), rhs: Box::new(r) },
                ty,
                loc,
            ));
        }
        if lhs.ty.is_ptr_or_array() && rhs.ty.is_fixnum() {
            let ty = rcc_types::array_to_ptr(&lhs.ty);
            let rhs = self.promote(rhs)?;
            return Ok(Expr::new(
                ExprKind::Bin { op: BinOp::PtrSub, lhs: Box::new(lhs), rhs: Box::new(rhs) },
                ty,
                loc,
            ));
        }
        if lhs.ty.is_ptr_or_array() && rhs.ty.is_ptr_or_array() {
            let lp = lhs.ty.pointee().unwrap();
            let rp = rhs.ty.pointee().unwrap();
            if !self.types.same_type(lp, rp) {
                return Err(self.serr(loc, "pointer subtraction with incompatible types"));
            }
            return Ok(Expr::new(
                ExprKind::Bin { op: BinOp::PtrDiff, lhs: Box::new(lhs), rhs: Box::new(rhs) },
                Type::long(),
                loc,
            ));
        }
        Err(self.serr(loc, "invalid operands for '-'"))
    }

    fn build_int_bin(&self, op: BinOp, lhs: Expr, rhs: Expr, loc: Loc) -> CcResult<Expr> {
        self.check_fixnum(&lhs)?;
        self.check_fixnum(&rhs)?;
        let (l, r) = self.arith_convert(lhs, rhs)?;
        let ty = l.ty.clone();
        if let Some(kind) = self.try_fold_bin(op, &l, &r, &ty, loc)? {
            return Ok(Expr::new(kind, ty, loc));
        }
        Ok(Expr::new(ExprKind::Bin { op, lhs: Box::new(l), rhs: Box::new(r) }, ty, loc))
    }

    fn build_cmp(&self, op: BinOp, lhs: Expr, rhs: Expr, loc: Loc) -> CcResult<Expr> {
        if lhs.ty.is_number() && rhs.ty.is_number() {
            let (l, r) = self.arith_convert(lhs, rhs)?;
            let ty = l.ty.clone();
            if let Some(kind) = self.try_fold_bin(op, &l, &r, &ty, loc)? {
                return Ok(Expr::new(kind, Type::int(), loc));
            }
            return Ok(Expr::new(
                ExprKind::Bin { op, lhs: Box::new(l), rhs: Box::new(r) },
                Type::int(),
                loc,
            ));
        }
        if lhs.ty.is_ptr_or_array() || rhs.ty.is_ptr_or_array() {
            let (lhs, rhs) = if lhs.ty.is_ptr_or_array() && rhs.is_zero() {
                let pty = rcc_types::array_to_ptr(&lhs.ty);
                let rhs = self.make_cast(rhs, &pty, false)?;
                (lhs, rhs)
            } else if rhs.ty.is_ptr_or_array() && lhs.is_zero() {
                let pty = rcc_types::array_to_ptr(&rhs.ty);
                let lhs = self.make_cast(lhs, &pty, false)?;
                (lhs, rhs)
            } else if lhs.ty.is_ptr_or_array() && rhs.ty.is_ptr_or_array() {
                let lp = lhs.ty.pointee().unwrap();
                let rp = rhs.ty.pointee().unwrap();
                if !(self.types.same_type(lp, rp) || lp.is_void() || rp.is_void()) {
                    return Err(self.serr(loc, "comparison of incompatible pointers"));
                }
                (lhs, rhs)
            } else {
                return Err(self.serr(loc, "invalid comparison operands"));
            };
            return Ok(Expr::new(
                ExprKind::Bin { op, lhs: Box::new(lhs), rhs: Box::new(rhs) },
                Type::int(),
                loc,
            ));
        }
        Err(self.serr(loc, "invalid comparison operands"))
    }

    fn build_funcall(&mut self, func: Expr, args: Vec<Expr>, loc: Loc) -> CcResult<Expr> {
        let (func, fty) = if func.ty.is_func() {
            let fty = func.ty.clone();
            (func, fty)
        } else if matches!(&func.ty.kind, TypeKind::Ptr { base } if base.is_func()) {
            let fty = func.ty.pointee().unwrap().clone();
            let deref = Expr::new(ExprKind::Deref(Box::new(func)), fty.clone(), loc);
            (deref, fty)
        } else {
            return Err(self.serr(loc, "cannot call a non-function"));
        };
        let TypeKind::Func { ret, params, vaargs } = &fty.kind else {
            unreachable!("function type expected");
        };
        let ret = (**ret).clone();
        let params = params.clone();
        let vaargs = *vaargs;

        let mut out = Vec::with_capacity(args.len());
        for (i, arg) in args.into_iter().enumerate() {
            let arg = match &params {
                Some(ps) if i < ps.len() => self.make_cast(arg, &ps[i].ty, false)?,
                Some(_) if !vaargs => {
                    return Err(self.serr(loc, "too many arguments to function"));
                }
                _ => self.default_promote(arg)?,
            };
            out.push(arg);
        }
        if let Some(ps) = &params {
            if out.len() < ps.len() {
                return Err(self.serr(loc, "too few arguments to function"));
            }
        }
        Ok(Expr::new(ExprKind::Funcall { func: Box::new(func), args: out }, ret, loc))
    }

    /// Default argument promotion for variadic and unprototyped calls.
    fn default_promote(&self, arg: Expr) -> CcResult<Expr> {
        match &arg.ty.kind {
            TypeKind::Flonum { kind: FlonumKind::Float } => {
                self.make_cast(arg, &Type::double(), false)
            }
            TypeKind::Fixnum { kind, .. } if kind.rank() < FixnumKind::Int.rank() => {
                self.promote(arg)
            }
            _ => Ok(arg),
        }
    }

    // ---- conversions ----------------------------------------------------

    pub(crate) fn promote(&self, expr: Expr) -> CcResult<Expr> {
        if let TypeKind::Fixnum { kind, .. } = &expr.ty.kind {
            if kind.rank() < FixnumKind::Int.rank() {
                return self.make_cast(expr, &Type::int(), false);
            }
        }
        Ok(expr)
    }

    pub(crate) fn make_cast(&self, expr: Expr, to: &Type, is_explicit: bool) -> CcResult<Expr> {
        if self.types.same_type(&expr.ty, to) {
            return Ok(expr);
        }
        let zero = expr.is_zero();
        if !self.types.can_cast(&expr.ty, to, zero, is_explicit) {
            let msg = format!(
                "cannot convert '{}' to '{}'",
                self.type_str(&expr.ty),
                self.type_str(to)
            );
            return Err(self.serr(expr.loc, msg));
        }
        let loc = expr.loc;
        let folded = match (&expr.kind, &to.kind) {
            (ExprKind::Fixnum(v), TypeKind::Fixnum { kind, unsigned }) => {
                Some(ExprKind::Fixnum(wrap_fixnum(*v, *kind, *unsigned)))
            }
            (ExprKind::Fixnum(v), TypeKind::Flonum { .. }) => {
                Some(ExprKind::Flonum(*v as f64))
            }
            (ExprKind::Flonum(f), TypeKind::Fixnum { kind, unsigned }) => {
                Some(ExprKind::Fixnum(wrap_fixnum(*f as i64, *kind, *unsigned)))
            }
            (ExprKind::Flonum(f), TypeKind::Flonum { kind }) => Some(ExprKind::Flonum(
                if *kind == FlonumKind::Float { *f as f32 as f64 } else { *f },
            )),
            _ => None,
        };
        match folded {
            Some(kind) => Ok(Expr::new(kind, to.clone(), loc)),
            None => Ok(Expr::new(ExprKind::Cast(Box::new(expr)), to.clone(), loc)),
        }
    }

    fn arith_convert(&self, lhs: Expr, rhs: Expr) -> CcResult<(Expr, Expr)> {
        let common = self.common_arith_type(&lhs.ty, &rhs.ty);
        let lhs = self.make_cast(lhs, &common, false)?;
        let rhs = self.make_cast(rhs, &common, false)?;
        Ok((lhs, rhs))
    }

    /// Usual arithmetic conversions; both sides must already be numbers.
    fn common_arith_type(&self, a: &Type, b: &Type) -> Type {
        fn flonum_kind(ty: &Type) -> Option<FlonumKind> {
            match &ty.kind {
                TypeKind::Flonum { kind } => Some(*kind),
                _ => None,
            }
        }
        let fa = flonum_kind(a);
        let fb = flonum_kind(b);
        if fa.is_some() || fb.is_some() {
            let kind = if fa == Some(FlonumKind::Double) || fb == Some(FlonumKind::Double) {
                FlonumKind::Double
            } else {
                FlonumKind::Float
            };
            return Type::flonum(kind);
        }
        let (ka, ua) = match &a.kind {
            TypeKind::Fixnum { kind, unsigned } => (*kind, *unsigned),
            _ => (FixnumKind::Int, false),
        };
        let (kb, ub) = match &b.kind {
            TypeKind::Fixnum { kind, unsigned } => (*kind, *unsigned),
            _ => (FixnumKind::Int, false),
        };
        // Promote below int; enum ranks as int.
        let norm = |k: FixnumKind| {
            if k.rank() <= FixnumKind::Int.rank() {
                FixnumKind::Int
            } else {
                k
            }
        };
        let (ka, kb) = (norm(ka), norm(kb));
        let (kind, unsigned) = if ka.rank() == kb.rank() {
            (ka, ua || ub)
        } else if ka.rank() > kb.rank() {
            (ka, ua || (ub && kb.size() == ka.size()))
        } else {
            (kb, ub || (ua && ka.size() == kb.size()))
        };
        Type::new(TypeKind::Fixnum { kind, unsigned })
    }

    fn try_fold_bin(
        &self,
        op: BinOp,
        l: &Expr,
        r: &Expr,
        ty: &Type,
        loc: Loc,
    ) -> CcResult<Option<ExprKind>> {
        if let (Some(a), Some(b)) = (l.as_fixnum(), r.as_fixnum()) {
            let unsigned = ty.is_unsigned();
            let value = match op {
                BinOp::Add => a.wrapping_add(b),
                BinOp::Sub => a.wrapping_sub(b),
                BinOp::Mul => a.wrapping_mul(b),
                BinOp::Div | BinOp::Mod => {
                    if b == 0 {
                        return Err(self.cerr(loc, "division by zero in constant expression"));
                    }
                    match (op, unsigned) {
                        (BinOp::Div, false) => a.wrapping_div(b),
                        (BinOp::Div, true) => ((a as u64) / (b as u64)) as i64,
                        (BinOp::Mod, false) => a.wrapping_rem(b),
                        (BinOp::Mod, true) => ((a as u64) % (b as u64)) as i64,
                        _ => unreachable!(),
                    }
                }
                BinOp::BitAnd => a & b,
                BinOp::BitOr => a | b,
                BinOp::BitXor => a ^ b,
                BinOp::LShift => a.wrapping_shl(b as u32 & 63),
                BinOp::RShift => {
                    if unsigned {
                        ((a as u64) >> (b as u32 & 63)) as i64
                    } else {
                        a.wrapping_shr(b as u32 & 63)
                    }
                }
                BinOp::Eq => return Ok(Some(ExprKind::Fixnum((a == b) as i64))),
                BinOp::Ne => return Ok(Some(ExprKind::Fixnum((a != b) as i64))),
                BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                    let result = if unsigned {
                        let (a, b) = (a as u64, b as u64);
                        match op {
                            BinOp::Lt => a < b,
                            BinOp::Le => a <= b,
                            BinOp::Gt => a > b,
                            _ => a >= b,
                        }
                    } else {
                        match op {
                            BinOp::Lt => a < b,
                            BinOp::Le => a <= b,
                            BinOp::Gt => a > b,
                            _ => a >= b,
                        }
                    };
                    return Ok(Some(ExprKind::Fixnum(result as i64)));
                }
                _ => return Ok(None),
            };
            let TypeKind::Fixnum { kind, unsigned } = &ty.kind else {
                return Ok(None);
            };
            return Ok(Some(ExprKind::Fixnum(wrap_fixnum(value, *kind, *unsigned))));
        }
        if let (ExprKind::Flonum(a), ExprKind::Flonum(b)) = (&l.kind, &r.kind) {
            let value = match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => a / b,
                BinOp::Eq => return Ok(Some(ExprKind::Fixnum((a == b) as i64))),
                BinOp::Ne => return Ok(Some(ExprKind::Fixnum((a != b) as i64))),
                BinOp::Lt => return Ok(Some(ExprKind::Fixnum((a < b) as i64))),
                BinOp::Le => return Ok(Some(ExprKind::Fixnum((a <= b) as i64))),
                BinOp::Gt => return Ok(Some(ExprKind::Fixnum((a > b) as i64))),
                BinOp::Ge => return Ok(Some(ExprKind::Fixnum((a >= b) as i64))),
                _ => return Ok(None),
            };
            return Ok(Some(ExprKind::Flonum(value)));
        }
        Ok(None)
    }

    // ---- checks ---------------------------------------------------------

    pub(crate) fn check_lvalue(&self, expr: &Expr, for_write: bool) -> CcResult<()> {
        let ok = matches!(
            expr.kind,
            ExprKind::Var { .. } | ExprKind::Deref(_) | ExprKind::Member { .. } | ExprKind::Str { .. }
        );
        if !ok {
            return Err(self.serr(expr.loc, "not an lvalue"));
        }
        if for_write {
            if expr.ty.is_array() {
                return Err(self.serr(expr.loc, "array is not assignable"));
            }
            if expr.ty.is_func() {
                return Err(self.serr(expr.loc, "function is not assignable"));
            }
            if expr.ty.qual.is_const {
                return Err(self.serr(expr.loc, "assignment of read-only location"));
            }
        }
        Ok(())
    }

    fn check_number(&self, expr: &Expr) -> CcResult<()> {
        if expr.ty.is_number() {
            Ok(())
        } else {
            Err(self.serr(expr.loc, "numeric operand required"))
        }
    }

    fn check_fixnum(&self, expr: &Expr) -> CcResult<()> {
        if expr.ty.is_fixnum() {
            Ok(())
        } else {
            Err(self.serr(expr.loc, "integer operand required"))
        }
    }

    pub(crate) fn type_str(&self, ty: &Type) -> String {
        match &ty.kind {
            TypeKind::Void => "void".to_string(),
            TypeKind::Fixnum { kind, unsigned } => {
                let name = match kind {
                    FixnumKind::Char => "char",
                    FixnumKind::Short => "short",
                    FixnumKind::Int => "int",
                    FixnumKind::Long => "long",
                    FixnumKind::LLong => "long long",
                    FixnumKind::Enum => "enum",
                };
                if *unsigned {
                    format!("unsigned {}", name)
                } else {
                    name.to_string()
                }
            }
            TypeKind::Flonum { kind } => match kind {
                FlonumKind::Float => "float".to_string(),
                FlonumKind::Double => "double".to_string(),
            },
            TypeKind::Ptr { base } => format!("{}*", self.type_str(base)),
            TypeKind::Array { base, length } => match length {
                Some(n) => format!("{}[{}]", self.type_str(base), n),
                None => format!("{}[]", self.type_str(base)),
            },
            TypeKind::Func { .. } => "function".to_string(),
            TypeKind::Struct { name, is_union, .. } => {
                let tag = match name {
                    Some(n) => self.resolve(*n),
                    None => "<anonymous>",
                };
                format!("{} {}", if *is_union { "union" } else { "struct" }, tag)
            }
        }
    }
}
