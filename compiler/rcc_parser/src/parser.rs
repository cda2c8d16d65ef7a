//! Recursive-descent parser for the C subset
//!
//! Parsing, name resolution and type checking are interleaved: every
//! expression node is typed as it is built, implicit conversions become
//! `Cast` nodes, and literal arithmetic folds on the spot. The first error
//! aborts the translation unit.

use crate::ast::*;
use crate::const_eval;
use crate::scope::{ScopeId, Scopes, Storage, VarInfo, VarPlace};
use crate::Context;
use rcc_common::{CcError, CcResult, Loc, Name, SourceLoc};
use rcc_lexer::{Lexer, Token, TokenKind};
use rcc_types::{
    arrayof, new_func_type, ptrof, FixnumKind, ParamInfo, Qualifiers, Type, TypeKind, TypeTable,
};
use smallvec::SmallVec;
use std::collections::HashSet;

pub(crate) struct FuncState {
    pub ret_ty: Type,
    pub ret_hidden: bool,
    pub locals: Vec<LocalVar>,
}

struct SwitchCtx {
    cases: Vec<i64>,
    has_default: bool,
}

#[derive(Clone)]
pub(crate) struct DeclSpec {
    pub(crate) ty: Type,
    pub(crate) storage: Storage,
}

enum DeclSuffix {
    Array(Option<usize>),
    Func { params: Option<Vec<ParamInfo>>, vaargs: bool },
}

/// Placeholder for the nested-declarator hole. An anonymous forward struct
/// cannot occur otherwise (anonymous bodies are always complete).
fn hole() -> Type {
    Type::new(TypeKind::Struct { name: None, info: None, is_union: false })
}

fn is_hole(ty: &Type) -> bool {
    matches!(&ty.kind, TypeKind::Struct { name: None, info: None, is_union: false })
}

fn subst_hole(ty: Type, repl: &Type) -> Type {
    if is_hole(&ty) {
        return repl.clone();
    }
    let qual = ty.qual;
    let kind = match ty.kind {
        TypeKind::Ptr { base } => TypeKind::Ptr { base: Box::new(subst_hole(*base, repl)) },
        TypeKind::Array { base, length } => {
            TypeKind::Array { base: Box::new(subst_hole(*base, repl)), length }
        }
        TypeKind::Func { ret, params, vaargs } => {
            TypeKind::Func { ret: Box::new(subst_hole(*ret, repl)), params, vaargs }
        }
        other => other,
    };
    Type::with_qual(kind, qual)
}

pub struct Parser<'a> {
    pub(crate) lexer: Lexer<'a>,
    pending: Vec<Token>,
    pub(crate) types: TypeTable,
    pub(crate) scopes: Scopes,
    pub(crate) cur_scope: ScopeId,
    pub(crate) strings: StringPool,
    decls: Vec<Declaration>,
    static_globals: Vec<Name>,
    pub(crate) func: Option<FuncState>,
    switches: Vec<SwitchCtx>,
    loop_depth: u32,
    defined_funcs: HashSet<Name>,
    str_count: u32,
    static_count: u32,
}

impl<'a> Parser<'a> {
    pub fn new(lexer: Lexer<'a>) -> Self {
        Self {
            lexer,
            pending: Vec::new(),
            types: TypeTable::new(),
            scopes: Scopes::new(),
            cur_scope: Scopes::GLOBAL,
            strings: StringPool::default(),
            decls: Vec::new(),
            static_globals: Vec::new(),
            func: None,
            switches: Vec::new(),
            loop_depth: 0,
            defined_funcs: HashSet::new(),
            str_count: 0,
            static_count: 0,
        }
    }

    pub fn finish(self) -> (Program, Context) {
        let (interner, lines) = self.lexer.finish();
        (
            Program {
                decls: self.decls,
                scopes: self.scopes,
                strings: self.strings,
                static_globals: self.static_globals,
            },
            Context { interner, lines, types: self.types },
        )
    }

    // ---- token plumbing -------------------------------------------------

    pub(crate) fn next(&mut self) -> CcResult<Token> {
        match self.pending.pop() {
            Some(tok) => Ok(tok),
            None => self.lexer.fetch_token(),
        }
    }

    pub(crate) fn unread(&mut self, tok: Token) {
        self.pending.push(tok);
    }

    pub(crate) fn consume(&mut self, kind: &TokenKind) -> CcResult<Option<Token>> {
        let tok = self.next()?;
        if tok.is(kind) {
            Ok(Some(tok))
        } else {
            self.unread(tok);
            Ok(None)
        }
    }

    pub(crate) fn expect(&mut self, kind: &TokenKind, what: &str) -> CcResult<Token> {
        let tok = self.next()?;
        if tok.is(kind) {
            Ok(tok)
        } else {
            Err(self.perr(tok.loc, format!("expected {}, but got '{}'", what, tok.kind)))
        }
    }

    pub(crate) fn src_loc(&self, loc: Loc) -> SourceLoc {
        self.lexer.source_loc(loc)
    }

    pub(crate) fn perr(&self, loc: Loc, message: impl Into<String>) -> CcError {
        CcError::parse_error(message, Some(self.src_loc(loc)))
    }

    pub(crate) fn serr(&self, loc: Loc, message: impl Into<String>) -> CcError {
        CcError::sema_error(message, Some(self.src_loc(loc)))
    }

    pub(crate) fn cerr(&self, loc: Loc, message: impl Into<String>) -> CcError {
        CcError::const_error(message, Some(self.src_loc(loc)))
    }

    pub(crate) fn intern(&mut self, text: &str) -> Name {
        self.lexer.interner_mut().intern(text)
    }

    pub(crate) fn resolve(&self, name: Name) -> &str {
        self.lexer.interner().resolve(name)
    }

    // ---- translation unit ----------------------------------------------

    pub fn parse_program(&mut self) -> CcResult<()> {
        loop {
            let tok = self.next()?;
            if matches!(tok.kind, TokenKind::Eof) {
                return Ok(());
            }
            self.unread(tok);
            self.parse_toplevel()?;
        }
    }

    fn parse_toplevel(&mut self) -> CcResult<()> {
        let head = self.next()?;
        let loc = head.loc;
        self.unread(head);

        let Some(spec) = self.parse_declspec_opt()? else {
            let tok = self.next()?;
            return Err(self.perr(tok.loc, format!("unexpected token: '{}'", tok.kind)));
        };
        // Tag or specifier-only declaration (e.g. a struct definition).
        if self.consume(&TokenKind::Semicolon)?.is_some() {
            return Ok(());
        }

        let (ty, name) = self.parse_declarator(spec.ty.clone())?;
        if ty.is_func() && name.is_some() && !spec.storage.is_typedef {
            if self.consume(&TokenKind::LBrace)?.is_some() {
                return self.parse_defun(ty, name.unwrap(), spec.storage, loc);
            }
        }

        let mut names = Vec::new();
        let mut cur = (ty, name);
        loop {
            let (ty, name) = cur;
            let Some(name) = name else {
                return Err(self.perr(loc, "declarator name expected"));
            };
            self.declare_global(ty, name, spec.storage, &mut names, loc)?;
            if self.consume(&TokenKind::Comma)?.is_some() {
                cur = self.parse_declarator(spec.ty.clone())?;
            } else {
                self.expect(&TokenKind::Semicolon, "';'")?;
                break;
            }
        }
        if !names.is_empty() {
            self.decls.push(Declaration::VarDecl { names });
        }
        Ok(())
    }

    fn declare_global(
        &mut self,
        mut ty: Type,
        name: Name,
        storage: Storage,
        names: &mut Vec<Name>,
        loc: Loc,
    ) -> CcResult<()> {
        if storage.is_typedef {
            self.types.add_typedef(name, ty);
            return Ok(());
        }
        if ty.is_func() {
            self.register_func(name, ty, storage, loc)?;
            return Ok(());
        }

        let mut storage = storage;
        let mut init = None;
        if self.consume(&TokenKind::Assign)?.is_some() {
            // `extern int x = 1;` is a definition.
            storage.is_extern = false;
            let raw = self.parse_initializer()?;
            let flat = self.flatten_initializer(&mut ty, raw, loc)?;
            self.check_const_init(&flat, loc)?;
            init = Some(flat);
        }
        if !storage.is_extern && self.types.type_size(&ty).is_none() {
            return Err(self.serr(
                loc,
                format!("variable '{}' has incomplete type", self.resolve(name)),
            ));
        }

        if let Some(existing) = self.scopes.find_in(Scopes::GLOBAL, name) {
            if !self.types.same_type(&existing.ty, &ty) {
                return Err(self.serr(
                    loc,
                    format!("conflicting types for '{}'", self.resolve(name)),
                ));
            }
            let had_init =
                matches!(&existing.place, VarPlace::Global { init: Some(_) });
            if had_init && init.is_some() {
                return Err(self.serr(
                    loc,
                    format!("redefinition of '{}'", self.resolve(name)),
                ));
            }
            // A previously extern-only name becomes a definition here; a
            // tentative definition already owns an emission slot.
            let was_extern = existing.storage.is_extern;
            if init.is_some() || !storage.is_extern {
                let var = self.scopes.find_mut(Scopes::GLOBAL, name).unwrap();
                if init.is_some() {
                    var.place = VarPlace::Global { init };
                }
                var.storage.is_extern = false;
                if was_extern {
                    names.push(name);
                }
            }
            return Ok(());
        }

        self.scopes.add(
            Scopes::GLOBAL,
            VarInfo { name, ty, storage, place: VarPlace::Global { init } },
        );
        if !storage.is_extern {
            names.push(name);
        }
        Ok(())
    }

    fn register_func(&mut self, name: Name, ty: Type, storage: Storage, loc: Loc) -> CcResult<()> {
        if let Some(existing) = self.scopes.find_in(Scopes::GLOBAL, name) {
            if !self.types.same_type(&existing.ty, &ty) {
                return Err(self.serr(
                    loc,
                    format!("conflicting types for '{}'", self.resolve(name)),
                ));
            }
            if storage.is_static {
                let var = self.scopes.find_mut(Scopes::GLOBAL, name).unwrap();
                var.storage.is_static = true;
            }
            return Ok(());
        }
        self.scopes.add(
            Scopes::GLOBAL,
            VarInfo { name, ty, storage, place: VarPlace::Global { init: None } },
        );
        Ok(())
    }

    fn parse_defun(
        &mut self,
        ty: Type,
        name: Name,
        storage: Storage,
        loc: Loc,
    ) -> CcResult<()> {
        self.register_func(name, ty.clone(), storage, loc)?;
        if !self.defined_funcs.insert(name) {
            return Err(self.serr(loc, format!("redefinition of '{}'", self.resolve(name))));
        }

        let TypeKind::Func { ret, params, vaargs } = &ty.kind else {
            unreachable!("parse_defun requires a function type");
        };
        let ret_ty = (**ret).clone();
        let params: Vec<ParamInfo> = params.clone().unwrap_or_default();
        let vaargs = *vaargs;
        let ret_hidden = ret_ty.is_struct();

        self.func = Some(FuncState { ret_ty: ret_ty.clone(), ret_hidden, locals: Vec::new() });
        let top = self.scopes.push(Scopes::GLOBAL);
        self.cur_scope = top;

        if ret_hidden {
            let hidden = self.intern(".ret");
            self.add_local(top, hidden, ptrof(&ret_ty), Storage { is_param: true, ..Storage::default() }, loc)?;
        }
        for p in &params {
            let Some(pname) = p.name else {
                return Err(self.serr(loc, "parameter name omitted"));
            };
            self.add_local(
                top,
                pname,
                p.ty.clone(),
                Storage { is_param: true, ..Storage::default() },
                loc,
            )?;
        }
        let param_count = self.func.as_ref().unwrap().locals.len();

        let mut body = Vec::new();
        loop {
            if self.consume(&TokenKind::RBrace)?.is_some() {
                break;
            }
            let tok = self.next()?;
            if matches!(tok.kind, TokenKind::Eof) {
                return Err(self.perr(tok.loc, "unexpected end of file in function body"));
            }
            self.unread(tok);
            body.push(self.parse_stmt()?);
        }

        let fs = self.func.take().unwrap();
        self.cur_scope = Scopes::GLOBAL;
        self.decls.push(Declaration::Defun(Function {
            name,
            ty,
            param_count,
            ret_hidden,
            vaargs,
            is_static: storage.is_static,
            top_scope: top,
            locals: fs.locals,
            body,
        }));
        Ok(())
    }

    fn add_local(
        &mut self,
        scope: ScopeId,
        name: Name,
        ty: Type,
        storage: Storage,
        loc: Loc,
    ) -> CcResult<usize> {
        if self.scopes.find_in(scope, name).is_some() {
            return Err(self.serr(loc, format!("redefinition of '{}'", self.resolve(name))));
        }
        let fs = self.func.as_mut().expect("local outside a function");
        let index = fs.locals.len();
        fs.locals.push(LocalVar { name, ty: ty.clone() });
        self.scopes.add(scope, VarInfo { name, ty, storage, place: VarPlace::Local { index } });
        Ok(index)
    }

    // ---- declaration specifiers -----------------------------------------

    /// Returns None (consuming nothing) when the next tokens do not start a
    /// declaration.
    pub(crate) fn parse_declspec_opt(&mut self) -> CcResult<Option<DeclSpec>> {
        let mut storage = Storage::default();
        let mut qual = Qualifiers::NONE;
        let mut base: Option<TypeKind> = None;
        let mut shorts = 0u32;
        let mut longs = 0u32;
        let mut signedness: Option<bool> = None;
        let mut any = false;
        let mut loc = None;

        loop {
            let tok = self.next()?;
            let tloc = tok.loc;
            match tok.kind {
                TokenKind::KwStatic => storage.is_static = true,
                TokenKind::KwExtern => storage.is_extern = true,
                TokenKind::KwTypedef => storage.is_typedef = true,
                TokenKind::KwConst => qual.is_const = true,
                TokenKind::KwVolatile => qual.is_volatile = true,
                TokenKind::KwVoid => self.set_base(&mut base, TypeKind::Void, tloc)?,
                TokenKind::KwChar => self.set_base(
                    &mut base,
                    TypeKind::Fixnum { kind: FixnumKind::Char, unsigned: false },
                    tloc,
                )?,
                TokenKind::KwInt => self.set_base(
                    &mut base,
                    TypeKind::Fixnum { kind: FixnumKind::Int, unsigned: false },
                    tloc,
                )?,
                TokenKind::KwFloat => self.set_base(
                    &mut base,
                    TypeKind::Flonum { kind: rcc_types::FlonumKind::Float },
                    tloc,
                )?,
                TokenKind::KwDouble => self.set_base(
                    &mut base,
                    TypeKind::Flonum { kind: rcc_types::FlonumKind::Double },
                    tloc,
                )?,
                TokenKind::KwShort => shorts += 1,
                TokenKind::KwLong => longs += 1,
                TokenKind::KwSigned => signedness = Some(true),
                TokenKind::KwUnsigned => signedness = Some(false),
                TokenKind::KwStruct => {
                    let ty = self.parse_struct_decl(false)?;
                    self.set_base(&mut base, ty.kind, tloc)?;
                }
                TokenKind::KwUnion => {
                    let ty = self.parse_struct_decl(true)?;
                    self.set_base(&mut base, ty.kind, tloc)?;
                }
                TokenKind::KwEnum => {
                    let ty = self.parse_enum_decl(tloc)?;
                    self.set_base(&mut base, ty.kind, tloc)?;
                }
                TokenKind::Ident(name) => {
                    let text = self.resolve(name);
                    if matches!(text, "_Bool" | "_Complex" | "_Imaginary") {
                        let text = text.to_string();
                        return Err(self.serr(tloc, format!("'{}' is not supported", text)));
                    }
                    let usable = base.is_none()
                        && shorts == 0
                        && longs == 0
                        && signedness.is_none()
                        && self.types.find_typedef(name).is_some()
                        && self.scopes.find(self.cur_scope, name).is_none();
                    if !usable {
                        self.unread(tok);
                        break;
                    }
                    let ty = self.types.find_typedef(name).unwrap().clone();
                    self.set_base(&mut base, ty.kind, tloc)?;
                }
                _ => {
                    self.unread(tok);
                    break;
                }
            }
            any = true;
            loc.get_or_insert(tloc);
        }

        if !any {
            return Ok(None);
        }
        let loc = loc.unwrap();

        if shorts > 1 || longs > 2 || (shorts > 0 && longs > 0) {
            return Err(self.perr(loc, "invalid type specifier combination"));
        }
        let mut kind = match base {
            Some(kind) => kind,
            None => TypeKind::Fixnum { kind: FixnumKind::Int, unsigned: false },
        };
        if shorts > 0 || longs > 0 || signedness.is_some() {
            match kind {
                TypeKind::Fixnum { kind: fk, .. } => {
                    let fk = match (fk, shorts, longs) {
                        (k, 0, 0) => k,
                        (FixnumKind::Int | FixnumKind::Char, 1, 0) => FixnumKind::Short,
                        (FixnumKind::Int, 0, 1) => FixnumKind::Long,
                        (FixnumKind::Int, 0, 2) => FixnumKind::LLong,
                        _ => return Err(self.perr(loc, "invalid type specifier combination")),
                    };
                    kind = TypeKind::Fixnum { kind: fk, unsigned: signedness == Some(false) };
                }
                TypeKind::Flonum { .. } if longs > 0 => {
                    return Err(self.serr(loc, "'long double' is not supported"));
                }
                _ => return Err(self.perr(loc, "invalid type specifier combination")),
            }
        }
        Ok(Some(DeclSpec { ty: Type::with_qual(kind, qual), storage }))
    }

    fn set_base(&self, base: &mut Option<TypeKind>, kind: TypeKind, loc: Loc) -> CcResult<()> {
        if base.is_some() {
            return Err(self.perr(loc, "more than one type specifier"));
        }
        *base = Some(kind);
        Ok(())
    }

    /// Peek whether the next token can start a type name.
    pub(crate) fn starts_type(&mut self) -> CcResult<bool> {
        let tok = self.next()?;
        let result = match &tok.kind {
            TokenKind::KwVoid
            | TokenKind::KwChar
            | TokenKind::KwShort
            | TokenKind::KwInt
            | TokenKind::KwLong
            | TokenKind::KwFloat
            | TokenKind::KwDouble
            | TokenKind::KwSigned
            | TokenKind::KwUnsigned
            | TokenKind::KwConst
            | TokenKind::KwVolatile
            | TokenKind::KwStruct
            | TokenKind::KwUnion
            | TokenKind::KwEnum => true,
            TokenKind::Ident(name) => {
                self.types.find_typedef(*name).is_some()
                    && self.scopes.find(self.cur_scope, *name).is_none()
            }
            _ => false,
        };
        self.unread(tok);
        Ok(result)
    }

    /// Parse a type-name (declaration specifiers + abstract declarator), as
    /// used by casts and `sizeof`.
    pub(crate) fn parse_type_name(&mut self, loc: Loc) -> CcResult<Type> {
        let Some(spec) = self.parse_declspec_opt()? else {
            return Err(self.perr(loc, "type name expected"));
        };
        let (ty, name) = self.parse_declarator(spec.ty)?;
        if name.is_some() {
            return Err(self.perr(loc, "unexpected identifier in type name"));
        }
        Ok(ty)
    }

    fn parse_struct_decl(&mut self, is_union: bool) -> CcResult<Type> {
        let tag_tok = self.next()?;
        let (tag, loc) = match tag_tok.kind {
            TokenKind::Ident(name) => (Some(name), tag_tok.loc),
            _ => {
                let loc = tag_tok.loc;
                self.unread(tag_tok);
                (None, loc)
            }
        };

        if self.consume(&TokenKind::LBrace)?.is_some() {
            let mut members: Vec<(Name, Type)> = Vec::new();
            loop {
                if self.consume(&TokenKind::RBrace)?.is_some() {
                    break;
                }
                let Some(spec) = self.parse_declspec_opt()? else {
                    let tok = self.next()?;
                    return Err(self.perr(tok.loc, "member type expected"));
                };
                loop {
                    let (mty, mname) = self.parse_declarator(spec.ty.clone())?;
                    if self.consume(&TokenKind::Colon)?.is_some() {
                        return Err(self.serr(loc, "bit-fields are not supported"));
                    }
                    let Some(mname) = mname else {
                        return Err(self.perr(loc, "member name expected"));
                    };
                    if matches!(&mty.kind, TypeKind::Array { length: None, .. }) {
                        return Err(self.serr(loc, "flexible array members are not supported"));
                    }
                    if members.iter().any(|(n, _)| *n == mname) {
                        return Err(self.serr(
                            loc,
                            format!("duplicate member '{}'", self.resolve(mname)),
                        ));
                    }
                    members.push((mname, mty));
                    if self.consume(&TokenKind::Comma)?.is_none() {
                        break;
                    }
                }
                self.expect(&TokenKind::Semicolon, "';'")?;
            }
            if let Some(tag) = tag {
                if self.types.find_struct(tag).is_some() {
                    return Err(self.serr(
                        loc,
                        format!(
                            "redefinition of {} '{}'",
                            if is_union { "union" } else { "struct" },
                            self.resolve(tag)
                        ),
                    ));
                }
            }
            let info = self
                .types
                .calc_struct_layout(members, is_union)
                .ok_or_else(|| self.serr(loc, "member has incomplete type"))?;
            let id = self.types.add_struct(tag, info);
            Ok(Type::new(TypeKind::Struct { name: tag, info: Some(id), is_union }))
        } else {
            let Some(tag) = tag else {
                return Err(self.perr(loc, "struct tag or body expected"));
            };
            let info = self.types.find_struct(tag);
            Ok(Type::new(TypeKind::Struct { name: Some(tag), info, is_union }))
        }
    }

    fn parse_enum_decl(&mut self, loc: Loc) -> CcResult<Type> {
        let tag = match self.next()? {
            Token { kind: TokenKind::Ident(name), .. } => Some(name),
            tok => {
                self.unread(tok);
                None
            }
        };

        if self.consume(&TokenKind::LBrace)?.is_some() {
            let ty = self.types.define_enum(tag);
            let mut value: i64 = 0;
            loop {
                if self.consume(&TokenKind::RBrace)?.is_some() {
                    break;
                }
                let tok = self.next()?;
                let TokenKind::Ident(name) = tok.kind else {
                    return Err(self.perr(tok.loc, "enum member name expected"));
                };
                if self.consume(&TokenKind::Assign)?.is_some() {
                    let expr = self.parse_assign()?;
                    value = expr
                        .as_fixnum()
                        .ok_or_else(|| self.cerr(tok.loc, "enum value must be constant"))?;
                }
                if !self.types.add_enum_member(name, value) {
                    return Err(self.serr(
                        tok.loc,
                        format!("redefinition of enumerator '{}'", self.resolve(name)),
                    ));
                }
                value += 1;
                if self.consume(&TokenKind::Comma)?.is_none() {
                    self.expect(&TokenKind::RBrace, "'}'")?;
                    break;
                }
            }
            Ok(ty)
        } else {
            let Some(tag) = tag else {
                return Err(self.perr(loc, "enum tag or body expected"));
            };
            match self.types.find_enum(tag) {
                Some(ty) => Ok(ty.clone()),
                None => Err(self.serr(
                    loc,
                    format!("unknown enum type 'enum {}'", self.resolve(tag)),
                )),
            }
        }
    }

    // ---- declarators ----------------------------------------------------

    pub(crate) fn parse_declarator(&mut self, mut base: Type) -> CcResult<(Type, Option<Name>)> {
        while self.consume(&TokenKind::Mul)?.is_some() {
            base = ptrof(&base);
            loop {
                if self.consume(&TokenKind::KwConst)?.is_some() {
                    base.qual.is_const = true;
                } else if self.consume(&TokenKind::KwVolatile)?.is_some() {
                    base.qual.is_volatile = true;
                } else {
                    break;
                }
            }
        }

        let tok = self.next()?;
        match tok.kind {
            TokenKind::Ident(name) => {
                let ty = self.parse_decl_suffixes(base, None, tok.loc)?;
                Ok((ty, Some(name)))
            }
            TokenKind::LParen => {
                if self.starts_nested_declarator()? {
                    let (inner, name) = self.parse_declarator(hole())?;
                    self.expect(&TokenKind::RParen, "')'")?;
                    let outer = self.parse_decl_suffixes(base, None, tok.loc)?;
                    Ok((subst_hole(inner, &outer), name))
                } else {
                    // Abstract function declarator: the '(' opens a
                    // parameter list directly.
                    let (params, vaargs) = self.parse_param_list()?;
                    let ty = self.parse_decl_suffixes(
                        base,
                        Some(DeclSuffix::Func { params, vaargs }),
                        tok.loc,
                    )?;
                    Ok((ty, None))
                }
            }
            _ => {
                let loc = tok.loc;
                self.unread(tok);
                let ty = self.parse_decl_suffixes(base, None, loc)?;
                Ok((ty, None))
            }
        }
    }

    fn starts_nested_declarator(&mut self) -> CcResult<bool> {
        let tok = self.next()?;
        let nested = match &tok.kind {
            TokenKind::Mul | TokenKind::LParen => true,
            TokenKind::Ident(name) => self.types.find_typedef(*name).is_none(),
            _ => false,
        };
        self.unread(tok);
        Ok(nested)
    }

    fn parse_decl_suffixes(
        &mut self,
        base: Type,
        initial: Option<DeclSuffix>,
        loc: Loc,
    ) -> CcResult<Type> {
        let mut suffixes: SmallVec<[DeclSuffix; 4]> = SmallVec::new();
        if let Some(s) = initial {
            suffixes.push(s);
        }
        loop {
            if self.consume(&TokenKind::LBracket)?.is_some() {
                let length = if self.consume(&TokenKind::RBracket)?.is_some() {
                    None
                } else {
                    let expr = self.parse_assign()?;
                    let value = expr
                        .as_fixnum()
                        .ok_or_else(|| self.cerr(loc, "array size must be constant"))?;
                    if value < 0 {
                        return Err(self.serr(loc, "negative array size"));
                    }
                    self.expect(&TokenKind::RBracket, "']'")?;
                    Some(value as usize)
                };
                suffixes.push(DeclSuffix::Array(length));
            } else if self.consume(&TokenKind::LParen)?.is_some() {
                let (params, vaargs) = self.parse_param_list()?;
                suffixes.push(DeclSuffix::Func { params, vaargs });
            } else {
                break;
            }
        }

        let mut ty = base;
        for suffix in suffixes.into_iter().rev() {
            match suffix {
                DeclSuffix::Array(length) => {
                    if ty.is_func() {
                        return Err(self.serr(loc, "array of functions"));
                    }
                    ty = arrayof(&ty, length);
                }
                DeclSuffix::Func { params, vaargs } => {
                    if ty.is_array() {
                        return Err(self.serr(loc, "function returning an array"));
                    }
                    if ty.is_func() {
                        return Err(self.serr(loc, "function returning a function"));
                    }
                    ty = new_func_type(ty, params, vaargs);
                }
            }
        }
        Ok(ty)
    }

    /// Parse a parameter list; the opening '(' is already consumed, the
    /// closing ')' is consumed here.
    fn parse_param_list(&mut self) -> CcResult<(Option<Vec<ParamInfo>>, bool)> {
        if self.consume(&TokenKind::RParen)?.is_some() {
            return Ok((None, false));
        }
        // `(void)` is an explicit empty list.
        if let Some(tok) = self.consume(&TokenKind::KwVoid)? {
            if self.consume(&TokenKind::RParen)?.is_some() {
                return Ok((Some(Vec::new()), false));
            }
            self.unread(tok);
        }

        let mut params = Vec::new();
        let mut vaargs = false;
        loop {
            if self.consume(&TokenKind::Ellipsis)?.is_some() {
                vaargs = true;
                self.expect(&TokenKind::RParen, "')'")?;
                break;
            }
            let tok = self.next()?;
            let loc = tok.loc;
            self.unread(tok);
            let Some(spec) = self.parse_declspec_opt()? else {
                return Err(self.perr(loc, "parameter type expected"));
            };
            let (ty, name) = self.parse_declarator(spec.ty)?;
            // Parameters decay.
            let ty = match &ty.kind {
                TypeKind::Array { base, .. } => ptrof(base),
                TypeKind::Func { .. } => ptrof(&ty),
                TypeKind::Void => return Err(self.serr(loc, "parameter has void type")),
                _ => ty,
            };
            params.push(ParamInfo { name, ty });
            if self.consume(&TokenKind::Comma)?.is_none() {
                self.expect(&TokenKind::RParen, "')'")?;
                break;
            }
        }
        Ok((Some(params), vaargs))
    }

    // ---- statements -----------------------------------------------------

    fn parse_block(&mut self) -> CcResult<Stmt> {
        let scope = self.scopes.push(self.cur_scope);
        let prev = std::mem::replace(&mut self.cur_scope, scope);
        let mut stmts = Vec::new();
        let result = loop {
            match self.consume(&TokenKind::RBrace) {
                Ok(Some(_)) => break Ok(()),
                Ok(None) => {}
                Err(e) => break Err(e),
            }
            let tok = match self.next() {
                Ok(tok) => tok,
                Err(e) => break Err(e),
            };
            if matches!(tok.kind, TokenKind::Eof) {
                break Err(self.perr(tok.loc, "unexpected end of file in block"));
            }
            self.unread(tok);
            match self.parse_stmt() {
                Ok(stmt) => stmts.push(stmt),
                Err(e) => break Err(e),
            }
        };
        self.cur_scope = prev;
        result?;
        Ok(Stmt::Block { scope, stmts })
    }

    pub(crate) fn parse_stmt(&mut self) -> CcResult<Stmt> {
        let tok = self.next()?;
        let loc = tok.loc;

        // Labels need two tokens of lookahead.
        if let TokenKind::Ident(name) = tok.kind {
            let tok2 = self.next()?;
            if matches!(tok2.kind, TokenKind::Colon) {
                let inner = self.parse_stmt()?;
                return Ok(Stmt::Label { name, stmt: Box::new(inner) });
            }
            self.unread(tok2);
        }

        match tok.kind {
            TokenKind::Semicolon => Ok(Stmt::Empty),
            TokenKind::LBrace => self.parse_block(),
            TokenKind::KwIf => {
                self.expect(&TokenKind::LParen, "'('")?;
                let cond = self.parse_expr()?;
                self.check_scalar(&cond)?;
                self.expect(&TokenKind::RParen, "')'")?;
                let then_stmt = Box::new(self.parse_stmt()?);
                let else_stmt = if self.consume(&TokenKind::KwElse)?.is_some() {
                    Some(Box::new(self.parse_stmt()?))
                } else {
                    None
                };
                Ok(Stmt::If { cond, then_stmt, else_stmt })
            }
            TokenKind::KwSwitch => {
                self.expect(&TokenKind::LParen, "'('")?;
                let value = self.parse_expr()?;
                if !value.ty.is_fixnum() {
                    return Err(self.serr(loc, "switch value must be an integer"));
                }
                let value = self.promote(value)?;
                self.expect(&TokenKind::RParen, "')'")?;
                self.switches.push(SwitchCtx { cases: Vec::new(), has_default: false });
                let body = self.parse_stmt();
                let ctx = self.switches.pop().unwrap();
                let body = Box::new(body?);
                Ok(Stmt::Switch {
                    value,
                    body,
                    cases: ctx.cases,
                    has_default: ctx.has_default,
                })
            }
            TokenKind::KwCase => {
                let expr = self.parse_assign()?;
                let value = expr
                    .as_fixnum()
                    .ok_or_else(|| self.cerr(loc, "case label must be constant"))?;
                self.expect(&TokenKind::Colon, "':'")?;
                let Some(ctx) = self.switches.last_mut() else {
                    return Err(self.serr(loc, "'case' outside of switch"));
                };
                if ctx.cases.contains(&value) {
                    return Err(self.serr(loc, format!("duplicate case value: {}", value)));
                }
                ctx.cases.push(value);
                Ok(Stmt::Case { value })
            }
            TokenKind::KwDefault => {
                self.expect(&TokenKind::Colon, "':'")?;
                let Some(ctx) = self.switches.last_mut() else {
                    return Err(self.serr(loc, "'default' outside of switch"));
                };
                if ctx.has_default {
                    return Err(self.serr(loc, "multiple 'default' labels"));
                }
                ctx.has_default = true;
                Ok(Stmt::Default)
            }
            TokenKind::KwWhile => {
                self.expect(&TokenKind::LParen, "'('")?;
                let cond = self.parse_expr()?;
                self.check_scalar(&cond)?;
                self.expect(&TokenKind::RParen, "')'")?;
                self.loop_depth += 1;
                let body = self.parse_stmt();
                self.loop_depth -= 1;
                Ok(Stmt::While { cond, body: Box::new(body?) })
            }
            TokenKind::KwDo => {
                self.loop_depth += 1;
                let body = self.parse_stmt();
                self.loop_depth -= 1;
                let body = Box::new(body?);
                self.expect(&TokenKind::KwWhile, "'while'")?;
                self.expect(&TokenKind::LParen, "'('")?;
                let cond = self.parse_expr()?;
                self.check_scalar(&cond)?;
                self.expect(&TokenKind::RParen, "')'")?;
                self.expect(&TokenKind::Semicolon, "';'")?;
                Ok(Stmt::DoWhile { body, cond })
            }
            TokenKind::KwFor => {
                self.expect(&TokenKind::LParen, "'('")?;
                let pre = if self.consume(&TokenKind::Semicolon)?.is_some() {
                    None
                } else {
                    let e = self.parse_expr()?;
                    self.expect(&TokenKind::Semicolon, "';'")?;
                    Some(e)
                };
                let cond = if self.consume(&TokenKind::Semicolon)?.is_some() {
                    None
                } else {
                    let e = self.parse_expr()?;
                    self.check_scalar(&e)?;
                    self.expect(&TokenKind::Semicolon, "';'")?;
                    Some(e)
                };
                let post = if self.consume(&TokenKind::RParen)?.is_some() {
                    None
                } else {
                    let e = self.parse_expr()?;
                    self.expect(&TokenKind::RParen, "')'")?;
                    Some(e)
                };
                self.loop_depth += 1;
                let body = self.parse_stmt();
                self.loop_depth -= 1;
                Ok(Stmt::For { pre, cond, post, body: Box::new(body?) })
            }
            TokenKind::KwBreak => {
                self.expect(&TokenKind::Semicolon, "';'")?;
                if self.loop_depth == 0 && self.switches.is_empty() {
                    return Err(self.serr(loc, "'break' outside of loop or switch"));
                }
                Ok(Stmt::Break)
            }
            TokenKind::KwContinue => {
                self.expect(&TokenKind::Semicolon, "';'")?;
                if self.loop_depth == 0 {
                    return Err(self.serr(loc, "'continue' outside of loop"));
                }
                Ok(Stmt::Continue)
            }
            TokenKind::KwReturn => {
                let ret_ty = self.func.as_ref().expect("return outside function").ret_ty.clone();
                if self.consume(&TokenKind::Semicolon)?.is_some() {
                    if !ret_ty.is_void() {
                        return Err(self.serr(loc, "'return' without a value"));
                    }
                    return Ok(Stmt::Return { value: None, loc });
                }
                let value = self.parse_expr()?;
                self.expect(&TokenKind::Semicolon, "';'")?;
                if ret_ty.is_void() {
                    return Err(self.serr(loc, "void function returns a value"));
                }
                let value = if ret_ty.is_struct() {
                    if !self.types.same_type(&value.ty, &ret_ty) {
                        return Err(self.serr(loc, "incompatible return type"));
                    }
                    value
                } else {
                    self.make_cast(value, &ret_ty, false)?
                };
                Ok(Stmt::Return { value: Some(value), loc })
            }
            TokenKind::KwGoto => {
                let tok = self.next()?;
                let TokenKind::Ident(label) = tok.kind else {
                    return Err(self.perr(tok.loc, "label name expected after 'goto'"));
                };
                self.expect(&TokenKind::Semicolon, "';'")?;
                Ok(Stmt::Goto { label, loc })
            }
            TokenKind::KwAsm => {
                self.expect(&TokenKind::LParen, "'('")?;
                let tok = self.next()?;
                let TokenKind::StrLit(bytes) = tok.kind else {
                    return Err(self.perr(tok.loc, "string literal expected in asm statement"));
                };
                self.expect(&TokenKind::RParen, "')'")?;
                self.expect(&TokenKind::Semicolon, "';'")?;
                Ok(Stmt::Asm { text: String::from_utf8_lossy(&bytes).into_owned() })
            }
            _ => {
                self.unread(tok);
                if let Some(spec) = self.parse_declspec_opt()? {
                    return self.parse_local_decl(spec, loc);
                }
                let expr = self.parse_expr()?;
                self.expect(&TokenKind::Semicolon, "';'")?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn parse_local_decl(&mut self, spec: DeclSpec, loc: Loc) -> CcResult<Stmt> {
        if self.consume(&TokenKind::Semicolon)?.is_some() {
            // Tag-only declaration inside a block.
            return Ok(Stmt::Empty);
        }
        let mut inits = Vec::new();
        loop {
            let (mut ty, name) = self.parse_declarator(spec.ty.clone())?;
            let Some(name) = name else {
                return Err(self.perr(loc, "declarator name expected"));
            };

            if spec.storage.is_typedef {
                self.types.add_typedef(name, ty);
            } else if ty.is_func() {
                self.register_func(name, ty, spec.storage, loc)?;
            } else if spec.storage.is_extern {
                let mut names = Vec::new();
                self.declare_global(ty, name, spec.storage, &mut names, loc)?;
            } else if spec.storage.is_static {
                let mut init = None;
                if self.consume(&TokenKind::Assign)?.is_some() {
                    let raw = self.parse_initializer()?;
                    let flat = self.flatten_initializer(&mut ty, raw, loc)?;
                    self.check_const_init(&flat, loc)?;
                    init = Some(flat);
                }
                if self.types.type_size(&ty).is_none() {
                    return Err(self.serr(
                        loc,
                        format!("variable '{}' has incomplete type", self.resolve(name)),
                    ));
                }
                let gvar = {
                    let text = format!("{}.{}", self.resolve(name), self.static_count);
                    self.static_count += 1;
                    self.intern(&text)
                };
                self.scopes.add(
                    Scopes::GLOBAL,
                    VarInfo {
                        name: gvar,
                        ty: ty.clone(),
                        storage: Storage { is_static: true, ..Storage::default() },
                        place: VarPlace::Global { init },
                    },
                );
                self.static_globals.push(gvar);
                if self.scopes.find_in(self.cur_scope, name).is_some() {
                    return Err(self.serr(
                        loc,
                        format!("redefinition of '{}'", self.resolve(name)),
                    ));
                }
                self.scopes.add(
                    self.cur_scope,
                    VarInfo {
                        name,
                        ty,
                        storage: Storage { is_static: true, ..Storage::default() },
                        place: VarPlace::StaticLocal { gvar },
                    },
                );
            } else {
                let mut init = None;
                if self.consume(&TokenKind::Assign)?.is_some() {
                    let raw = self.parse_initializer()?;
                    init = Some(self.flatten_initializer(&mut ty, raw, loc)?);
                }
                if self.types.type_size(&ty).is_none() {
                    return Err(self.serr(
                        loc,
                        format!("variable '{}' has incomplete type", self.resolve(name)),
                    ));
                }
                self.add_local(self.cur_scope, name, ty, Storage::default(), loc)?;
                inits.push(LocalInit { name, scope: self.cur_scope, init, loc });
            }

            if self.consume(&TokenKind::Comma)?.is_none() {
                self.expect(&TokenKind::Semicolon, "';'")?;
                break;
            }
        }
        Ok(Stmt::VarDecl { inits })
    }

    pub(crate) fn check_scalar(&self, expr: &Expr) -> CcResult<()> {
        if expr.ty.is_number() || expr.ty.is_ptr_or_array() {
            Ok(())
        } else {
            Err(self.serr(expr.loc, "scalar value required"))
        }
    }

    // ---- initializers ---------------------------------------------------

    fn parse_initializer(&mut self) -> CcResult<Initializer> {
        if self.consume(&TokenKind::LBrace)?.is_some() {
            let mut elems = Vec::new();
            if self.consume(&TokenKind::RBrace)?.is_some() {
                return Ok(Initializer::Multi(elems));
            }
            loop {
                let elem = if self.consume(&TokenKind::Dot)?.is_some() {
                    let tok = self.next()?;
                    let TokenKind::Ident(name) = tok.kind else {
                        return Err(self.perr(tok.loc, "member name expected after '.'"));
                    };
                    self.expect(&TokenKind::Assign, "'='")?;
                    Initializer::Dot { name, value: Box::new(self.parse_initializer()?) }
                } else if self.consume(&TokenKind::LBracket)?.is_some() {
                    let tok = self.next()?;
                    let loc = tok.loc;
                    self.unread(tok);
                    let expr = self.parse_assign()?;
                    let index = expr
                        .as_fixnum()
                        .ok_or_else(|| self.cerr(loc, "array designator must be constant"))?;
                    self.expect(&TokenKind::RBracket, "']'")?;
                    self.expect(&TokenKind::Assign, "'='")?;
                    Initializer::Arr { index, value: Box::new(self.parse_initializer()?) }
                } else {
                    self.parse_initializer()?
                };
                elems.push(Some(elem));
                if self.consume(&TokenKind::Comma)?.is_some() {
                    if self.consume(&TokenKind::RBrace)?.is_some() {
                        break;
                    }
                } else {
                    self.expect(&TokenKind::RBrace, "'}'")?;
                    break;
                }
            }
            Ok(Initializer::Multi(elems))
        } else {
            Ok(Initializer::Single(self.parse_assign()?))
        }
    }

    /// Resolve designators against the declared layout and produce dense
    /// positional entries; also infers unspecified array lengths.
    pub(crate) fn flatten_initializer(
        &mut self,
        ty: &mut Type,
        init: Initializer,
        loc: Loc,
    ) -> CcResult<Initializer> {
        match &mut ty.kind {
            TypeKind::Array { base, length } => {
                let elem_ty = (**base).clone();
                match init {
                    Initializer::Single(expr) => {
                        // String literal initializing a char array.
                        let is_str = matches!(expr.kind, ExprKind::Str { .. });
                        if !(is_str && elem_ty.is_char()) {
                            return Err(self.serr(loc, "illegal array initializer"));
                        }
                        let str_size = self.types.type_size(&expr.ty).unwrap_or(1);
                        if length.is_none() {
                            *length = Some(str_size);
                        }
                        Ok(Initializer::Single(expr))
                    }
                    Initializer::Multi(elems) => {
                        let mut out: Vec<Option<Initializer>> = Vec::new();
                        let mut index = 0usize;
                        for elem in elems.into_iter().flatten() {
                            let value = match elem {
                                Initializer::Arr { index: designated, value } => {
                                    if designated < 0 {
                                        return Err(
                                            self.serr(loc, "negative array designator")
                                        );
                                    }
                                    index = designated as usize;
                                    *value
                                }
                                other => other,
                            };
                            let mut elem_ty = elem_ty.clone();
                            let flat = self.flatten_initializer(&mut elem_ty, value, loc)?;
                            if out.len() <= index {
                                out.resize(index + 1, None);
                            }
                            out[index] = Some(flat);
                            index += 1;
                        }
                        match length {
                            None => *length = Some(out.len()),
                            Some(n) => {
                                if out.len() > *n {
                                    return Err(
                                        self.serr(loc, "too many initializer elements")
                                    );
                                }
                            }
                        }
                        Ok(Initializer::Multi(out))
                    }
                    _ => Err(self.serr(loc, "illegal array initializer")),
                }
            }
            TypeKind::Struct { .. } => {
                let Some(id) = self.types.resolve_struct(ty) else {
                    return Err(self.serr(loc, "initializer for incomplete type"));
                };
                let sinfo = self.types.struct_info(id).clone();
                match init {
                    Initializer::Single(expr) => {
                        // Struct copy (locals); constness is checked by the
                        // caller for globals.
                        if !self.types.same_type(&expr.ty, ty) {
                            return Err(self.serr(loc, "incompatible struct initializer"));
                        }
                        Ok(Initializer::Single(expr))
                    }
                    Initializer::Multi(elems) => {
                        let mut out: Vec<Option<Initializer>> = vec![None; sinfo.members.len()];
                        let mut index = 0usize;
                        for elem in elems.into_iter().flatten() {
                            let value = match elem {
                                Initializer::Dot { name, value } => {
                                    index = sinfo.find_member(name).ok_or_else(|| {
                                        self.serr(
                                            loc,
                                            format!(
                                                "no member named '{}'",
                                                self.resolve(name)
                                            ),
                                        )
                                    })?;
                                    *value
                                }
                                other => other,
                            };
                            if index >= sinfo.members.len() {
                                return Err(self.serr(loc, "too many initializer elements"));
                            }
                            let mut member_ty = sinfo.members[index].ty.clone();
                            let flat = self.flatten_initializer(&mut member_ty, value, loc)?;
                            out[index] = Some(flat);
                            index += 1;
                        }
                        if sinfo.is_union && out.iter().filter(|e| e.is_some()).count() > 1 {
                            return Err(
                                self.serr(loc, "too many initializers for a union")
                            );
                        }
                        Ok(Initializer::Multi(out))
                    }
                    _ => Err(self.serr(loc, "illegal struct initializer")),
                }
            }
            _ => {
                // Scalar; `int x = {1}` unwraps.
                let single = match init {
                    Initializer::Single(expr) => expr,
                    Initializer::Multi(mut elems) => {
                        if elems.len() != 1 {
                            return Err(self.serr(loc, "illegal scalar initializer"));
                        }
                        match elems.pop().unwrap() {
                            Some(Initializer::Single(expr)) => expr,
                            _ => return Err(self.serr(loc, "illegal scalar initializer")),
                        }
                    }
                    _ => return Err(self.serr(loc, "illegal scalar initializer")),
                };
                let cast = self.make_cast(single, ty, false)?;
                Ok(Initializer::Single(cast))
            }
        }
    }

    fn check_const_init(&self, init: &Initializer, loc: Loc) -> CcResult<()> {
        let ok = match init {
            Initializer::Single(expr) => const_eval::is_const_expr(&self.scopes, expr),
            Initializer::Multi(elems) => {
                for elem in elems.iter().flatten() {
                    self.check_const_init(elem, loc)?;
                }
                true
            }
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(self.cerr(loc, "initializer is not constant"))
        }
    }

    pub(crate) fn new_str_label(&mut self) -> Name {
        let text = format!(".L.str.{}", self.str_count);
        self.str_count += 1;
        self.intern(&text)
    }
}

/// Parse one translation unit.
pub fn parse(src: &str, filename: &str) -> CcResult<(Program, Context)> {
    log::debug!("parsing {}", filename);
    let mut parser = Parser::new(Lexer::new(src, filename));
    parser.parse_program()?;
    let (program, ctx) = parser.finish();
    log::debug!(
        "parsed {} declarations, {} pooled strings",
        program.decls.len(),
        program.strings.entries.len()
    );
    Ok((program, ctx))
}
