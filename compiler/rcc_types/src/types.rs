//! Type definitions for the C subset

use rcc_common::Name;
use serde::{Deserialize, Serialize};

/// Integer kinds, ordered by rank for the usual arithmetic conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FixnumKind {
    Char,
    Short,
    Int,
    Long,
    LLong,
    Enum,
}

impl FixnumKind {
    /// LP64 sizes.
    pub fn size(self) -> usize {
        match self {
            FixnumKind::Char => 1,
            FixnumKind::Short => 2,
            FixnumKind::Int | FixnumKind::Enum => 4,
            FixnumKind::Long | FixnumKind::LLong => 8,
        }
    }

    /// Rank used by integer promotion; enum ranks as int.
    pub fn rank(self) -> u32 {
        match self {
            FixnumKind::Char => 0,
            FixnumKind::Short => 1,
            FixnumKind::Int | FixnumKind::Enum => 2,
            FixnumKind::Long => 3,
            FixnumKind::LLong => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlonumKind {
    Float,
    Double,
}

impl FlonumKind {
    pub fn size(self) -> usize {
        match self {
            FlonumKind::Float => 4,
            FlonumKind::Double => 8,
        }
    }
}

/// Type qualifiers. Only `const` affects code generation (section choice);
/// `volatile` is accepted and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Qualifiers {
    pub is_const: bool,
    pub is_volatile: bool,
}

impl Qualifiers {
    pub const NONE: Qualifiers = Qualifiers { is_const: false, is_volatile: false };

    pub fn const_() -> Self {
        Qualifiers { is_const: true, is_volatile: false }
    }
}

/// Index of a completed struct/union body in the `TypeTable`.
/// Two struct types are the same type iff their ids are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StructId(pub u32);

/// A function parameter as it appears in a function type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamInfo {
    pub name: Option<Name>,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeKind {
    Void,
    Fixnum { kind: FixnumKind, unsigned: bool },
    Flonum { kind: FlonumKind },
    Ptr { base: Box<Type> },
    /// `length: None` is the unspecified `[]`, legal only where the size can
    /// be inferred from an initializer or an outer declarator.
    Array { base: Box<Type>, length: Option<usize> },
    /// `params: None` is an unspecified parameter list `()`, distinct from
    /// the explicit `(void)` which is `Some(vec![])`.
    Func { ret: Box<Type>, params: Option<Vec<ParamInfo>>, vaargs: bool },
    /// `info: None` is a forward reference, resolved through the tag map.
    Struct { name: Option<Name>, info: Option<StructId>, is_union: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Type {
    pub kind: TypeKind,
    pub qual: Qualifiers,
}

impl Type {
    pub fn new(kind: TypeKind) -> Self {
        Self { kind, qual: Qualifiers::NONE }
    }

    pub fn with_qual(kind: TypeKind, qual: Qualifiers) -> Self {
        Self { kind, qual }
    }

    pub fn void() -> Self {
        Self::new(TypeKind::Void)
    }

    pub fn fixnum(kind: FixnumKind) -> Self {
        Self::new(TypeKind::Fixnum { kind, unsigned: false })
    }

    pub fn char_() -> Self {
        Self::fixnum(FixnumKind::Char)
    }

    pub fn int() -> Self {
        Self::fixnum(FixnumKind::Int)
    }

    pub fn long() -> Self {
        Self::fixnum(FixnumKind::Long)
    }

    pub fn enum_() -> Self {
        Self::fixnum(FixnumKind::Enum)
    }

    pub fn flonum(kind: FlonumKind) -> Self {
        Self::new(TypeKind::Flonum { kind })
    }

    pub fn double() -> Self {
        Self::flonum(FlonumKind::Double)
    }

    pub fn is_void(&self) -> bool {
        matches!(self.kind, TypeKind::Void)
    }

    pub fn is_fixnum(&self) -> bool {
        matches!(self.kind, TypeKind::Fixnum { .. })
    }

    pub fn is_unsigned(&self) -> bool {
        matches!(self.kind, TypeKind::Fixnum { unsigned: true, .. })
    }

    pub fn is_flonum(&self) -> bool {
        matches!(self.kind, TypeKind::Flonum { .. })
    }

    pub fn is_number(&self) -> bool {
        self.is_fixnum() || self.is_flonum()
    }

    pub fn is_char(&self) -> bool {
        matches!(self.kind, TypeKind::Fixnum { kind: FixnumKind::Char, .. })
    }

    pub fn is_ptr(&self) -> bool {
        matches!(self.kind, TypeKind::Ptr { .. })
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, TypeKind::Array { .. })
    }

    pub fn is_ptr_or_array(&self) -> bool {
        self.is_ptr() || self.is_array()
    }

    pub fn is_func(&self) -> bool {
        matches!(self.kind, TypeKind::Func { .. })
    }

    pub fn is_struct(&self) -> bool {
        matches!(self.kind, TypeKind::Struct { .. })
    }

    pub fn is_void_ptr(&self) -> bool {
        match &self.kind {
            TypeKind::Ptr { base } => base.is_void(),
            _ => false,
        }
    }

    /// Pointee of a pointer or element of an array.
    pub fn pointee(&self) -> Option<&Type> {
        match &self.kind {
            TypeKind::Ptr { base } | TypeKind::Array { base, .. } => Some(base),
            _ => None,
        }
    }

    pub fn func_ret(&self) -> Option<&Type> {
        match &self.kind {
            TypeKind::Func { ret, .. } => Some(ret),
            _ => None,
        }
    }
}

/// `T` → `T*`
pub fn ptrof(ty: &Type) -> Type {
    Type::new(TypeKind::Ptr { base: Box::new(ty.clone()) })
}

/// `T` → `T[n]`; `length: None` is `[]`.
pub fn arrayof(ty: &Type, length: Option<usize>) -> Type {
    Type::new(TypeKind::Array { base: Box::new(ty.clone()), length })
}

pub fn new_func_type(ret: Type, params: Option<Vec<ParamInfo>>, vaargs: bool) -> Type {
    Type::new(TypeKind::Func { ret: Box::new(ret), params, vaargs })
}

/// Array-to-pointer decay; other types pass through.
pub fn array_to_ptr(ty: &Type) -> Type {
    match &ty.kind {
        TypeKind::Array { base, .. } => ptrof(base),
        _ => ty.clone(),
    }
}
