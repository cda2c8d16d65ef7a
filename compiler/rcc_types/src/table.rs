//! Struct/enum/typedef tables and type queries
//!
//! The original design keeps these as process globals; here they are owned by
//! a `TypeTable` threaded explicitly through the pipeline.

use crate::types::*;
use hashbrown::HashMap;
use rcc_common::Name;
use serde::{Deserialize, Serialize};

pub const WORD_SIZE: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub name: Name,
    pub ty: Type,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructInfo {
    pub members: Vec<MemberInfo>,
    pub size: usize,
    pub align: usize,
    pub is_union: bool,
}

impl StructInfo {
    pub fn find_member(&self, name: Name) -> Option<usize> {
        self.members.iter().position(|m| m.name == name)
    }
}

/// Tag, enum and typedef namespaces for one translation unit.
#[derive(Debug, Default)]
pub struct TypeTable {
    structs: Vec<StructInfo>,
    struct_map: HashMap<Name, StructId>,
    enum_map: HashMap<Name, Type>,
    enum_value_map: HashMap<Name, i64>,
    typedef_map: HashMap<Name, Type>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a completed struct/union body. Anonymous bodies get an id but
    /// no tag entry.
    pub fn add_struct(&mut self, tag: Option<Name>, info: StructInfo) -> StructId {
        let id = StructId(self.structs.len() as u32);
        self.structs.push(info);
        if let Some(tag) = tag {
            self.struct_map.insert(tag, id);
        }
        id
    }

    pub fn find_struct(&self, tag: Name) -> Option<StructId> {
        self.struct_map.get(&tag).copied()
    }

    pub fn struct_info(&self, id: StructId) -> &StructInfo {
        &self.structs[id.0 as usize]
    }

    /// Resolve a struct type's body, following the tag map for forward
    /// references that have since been completed.
    pub fn resolve_struct(&self, ty: &Type) -> Option<StructId> {
        match &ty.kind {
            TypeKind::Struct { info: Some(id), .. } => Some(*id),
            TypeKind::Struct { info: None, name: Some(tag), .. } => self.find_struct(*tag),
            _ => None,
        }
    }

    pub fn define_enum(&mut self, tag: Option<Name>) -> Type {
        let ty = Type::enum_();
        if let Some(tag) = tag {
            self.enum_map.insert(tag, ty.clone());
        }
        ty
    }

    pub fn find_enum(&self, tag: Name) -> Option<&Type> {
        self.enum_map.get(&tag)
    }

    /// Returns false if the member name is already taken.
    pub fn add_enum_member(&mut self, name: Name, value: i64) -> bool {
        if self.enum_value_map.contains_key(&name) {
            return false;
        }
        self.enum_value_map.insert(name, value);
        true
    }

    pub fn find_enum_value(&self, name: Name) -> Option<i64> {
        self.enum_value_map.get(&name).copied()
    }

    pub fn add_typedef(&mut self, name: Name, ty: Type) {
        self.typedef_map.insert(name, ty);
    }

    pub fn find_typedef(&self, name: Name) -> Option<&Type> {
        self.typedef_map.get(&name)
    }

    /// Size in bytes, or None for types that cannot be sized (unresolved
    /// struct, unsized array, function).
    pub fn type_size(&self, ty: &Type) -> Option<usize> {
        match &ty.kind {
            TypeKind::Void => Some(1),
            TypeKind::Fixnum { kind, .. } => Some(kind.size()),
            TypeKind::Flonum { kind } => Some(kind.size()),
            TypeKind::Ptr { .. } => Some(WORD_SIZE),
            TypeKind::Array { base, length } => {
                let length = (*length)?;
                Some(self.type_size(base)? * length)
            }
            TypeKind::Func { .. } => None,
            TypeKind::Struct { .. } => {
                let id = self.resolve_struct(ty)?;
                Some(self.struct_info(id).size)
            }
        }
    }

    pub fn align_size(&self, ty: &Type) -> Option<usize> {
        match &ty.kind {
            TypeKind::Void => Some(1),
            TypeKind::Fixnum { kind, .. } => Some(kind.size()),
            TypeKind::Flonum { kind } => Some(kind.size()),
            TypeKind::Ptr { .. } => Some(WORD_SIZE),
            TypeKind::Array { base, .. } => self.align_size(base),
            TypeKind::Func { .. } => None,
            TypeKind::Struct { .. } => {
                let id = self.resolve_struct(ty)?;
                Some(self.struct_info(id).align)
            }
        }
    }

    /// Structural equality, except structs which compare by body identity
    /// (with a by-tag fallback while one side is still a forward reference).
    pub fn same_type(&self, a: &Type, b: &Type) -> bool {
        match (&a.kind, &b.kind) {
            (TypeKind::Void, TypeKind::Void) => true,
            (
                TypeKind::Fixnum { kind: k1, unsigned: u1 },
                TypeKind::Fixnum { kind: k2, unsigned: u2 },
            ) => k1 == k2 && u1 == u2,
            (TypeKind::Flonum { kind: k1 }, TypeKind::Flonum { kind: k2 }) => k1 == k2,
            (TypeKind::Ptr { base: b1 }, TypeKind::Ptr { base: b2 }) => self.same_type(b1, b2),
            (
                TypeKind::Array { base: b1, length: l1 },
                TypeKind::Array { base: b2, length: l2 },
            ) => l1 == l2 && self.same_type(b1, b2),
            (
                TypeKind::Func { ret: r1, params: p1, vaargs: v1 },
                TypeKind::Func { ret: r2, params: p2, vaargs: v2 },
            ) => {
                if v1 != v2 || !self.same_type(r1, r2) {
                    return false;
                }
                match (p1, p2) {
                    (None, None) => true,
                    (Some(p1), Some(p2)) => {
                        p1.len() == p2.len()
                            && p1.iter().zip(p2).all(|(a, b)| self.same_type(&a.ty, &b.ty))
                    }
                    _ => false,
                }
            }
            (TypeKind::Struct { .. }, TypeKind::Struct { .. }) => {
                match (self.resolve_struct(a), self.resolve_struct(b)) {
                    (Some(i1), Some(i2)) => i1 == i2,
                    // Both unresolved: same tag means same (future) type.
                    (None, None) => match (&a.kind, &b.kind) {
                        (
                            TypeKind::Struct { name: Some(n1), .. },
                            TypeKind::Struct { name: Some(n2), .. },
                        ) => n1 == n2,
                        _ => false,
                    },
                    _ => false,
                }
            }
            _ => false,
        }
    }

    /// C conversion legality. `zero` marks a null-pointer-constant rhs.
    pub fn can_cast(&self, from: &Type, to: &Type, zero: bool, is_explicit: bool) -> bool {
        if self.same_type(from, to) {
            return true;
        }
        if to.is_void() {
            return is_explicit;
        }
        match &from.kind {
            TypeKind::Fixnum { .. } => match &to.kind {
                TypeKind::Fixnum { .. } | TypeKind::Flonum { .. } => true,
                TypeKind::Ptr { .. } => is_explicit || zero,
                _ => false,
            },
            TypeKind::Flonum { .. } => to.is_number(),
            TypeKind::Ptr { base } => match &to.kind {
                TypeKind::Fixnum { .. } => is_explicit,
                TypeKind::Ptr { base: to_base } => {
                    is_explicit
                        || base.is_void()
                        || to_base.is_void()
                        || self.same_type(base, to_base)
                }
                _ => false,
            },
            TypeKind::Array { base, .. } => match &to.kind {
                // Array decays to a pointer, then the pointer rules apply.
                TypeKind::Ptr { .. } => self.can_cast(&ptrof(base), to, zero, is_explicit),
                TypeKind::Fixnum { .. } => is_explicit,
                _ => false,
            },
            TypeKind::Func { .. } => match &to.kind {
                TypeKind::Ptr { base } => base.is_func() && self.same_type(from, base),
                _ => false,
            },
            _ => false,
        }
    }

    /// Compute member offsets and the total size/alignment of a struct or
    /// union body. Fails (None) if any member cannot be sized.
    pub fn calc_struct_layout(
        &self,
        members: Vec<(Name, Type)>,
        is_union: bool,
    ) -> Option<StructInfo> {
        let mut laid = Vec::with_capacity(members.len());
        let mut size = 0usize;
        let mut align = 1usize;
        for (name, ty) in members {
            let member_size = self.type_size(&ty)?;
            let member_align = self.align_size(&ty)?;
            align = align.max(member_align);
            let offset = if is_union {
                size = size.max(member_size);
                0
            } else {
                let offset = round_up(size, member_align);
                size = offset + member_size;
                offset
            };
            laid.push(MemberInfo { name, ty, offset });
        }
        Some(StructInfo { members: laid, size: round_up(size, align), align, is_union })
    }
}

pub fn round_up(value: usize, align: usize) -> usize {
    debug_assert!(align > 0);
    (value + align - 1) / align * align
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn table_with_struct(is_union: bool) -> (TypeTable, Type) {
        let mut table = TypeTable::new();
        let mut interner = rcc_common::Interner::new();
        let a = interner.intern("a");
        let b = interner.intern("b");
        let info = table
            .calc_struct_layout(vec![(a, Type::char_()), (b, Type::int())], is_union)
            .unwrap();
        let id = table.add_struct(None, info);
        let ty = Type::new(TypeKind::Struct { name: None, info: Some(id), is_union });
        (table, ty)
    }

    #[test]
    fn pointer_and_array_identity() {
        let table = TypeTable::new();
        let int = Type::int();
        assert!(table.same_type(&ptrof(&int), &ptrof(&int)));
        assert!(table.same_type(&arrayof(&int, Some(3)), &arrayof(&int, Some(3))));
        assert!(!table.same_type(&arrayof(&int, Some(3)), &ptrof(&int)));
        assert!(!table.same_type(&arrayof(&int, Some(3)), &arrayof(&int, Some(4))));
    }

    #[test]
    fn void_param_list_is_distinct_from_unspecified() {
        let table = TypeTable::new();
        let f_void = new_func_type(Type::int(), Some(vec![]), false);
        let f_unspec = new_func_type(Type::int(), None, false);
        assert!(!table.same_type(&f_void, &f_unspec));
        assert!(table.same_type(&f_void, &f_void.clone()));
    }

    #[test]
    fn struct_layout_char_int() {
        let (table, ty) = table_with_struct(false);
        assert_eq!(table.type_size(&ty), Some(8));
        assert_eq!(table.align_size(&ty), Some(4));
    }

    #[test]
    fn union_layout_char_int() {
        let (table, ty) = table_with_struct(true);
        assert_eq!(table.type_size(&ty), Some(4));
        assert_eq!(table.align_size(&ty), Some(4));
    }

    #[test]
    fn unresolved_struct_cannot_be_sized() {
        let table = TypeTable::new();
        let mut interner = rcc_common::Interner::new();
        let tag = interner.intern("node");
        let fwd = Type::new(TypeKind::Struct { name: Some(tag), info: None, is_union: false });
        assert_eq!(table.type_size(&fwd), None);
        // A pointer to it is still a word.
        assert_eq!(table.type_size(&ptrof(&fwd)), Some(8));
    }

    #[test]
    fn cast_rules() {
        let table = TypeTable::new();
        let int = Type::int();
        let void_ptr = ptrof(&Type::void());
        let int_ptr = ptrof(&int);
        let char_ptr = ptrof(&Type::char_());

        assert!(table.can_cast(&int, &Type::long(), false, false));
        assert!(table.can_cast(&int, &Type::double(), false, false));
        // int -> pointer requires an explicit cast or a null constant.
        assert!(!table.can_cast(&int, &int_ptr, false, false));
        assert!(table.can_cast(&int, &int_ptr, true, false));
        assert!(table.can_cast(&int, &int_ptr, false, true));
        // void* converts both ways implicitly.
        assert!(table.can_cast(&int_ptr, &void_ptr, false, false));
        assert!(table.can_cast(&void_ptr, &int_ptr, false, false));
        // Incompatible pointee needs an explicit cast.
        assert!(!table.can_cast(&int_ptr, &char_ptr, false, false));
        assert!(table.can_cast(&int_ptr, &char_ptr, false, true));
        // Array decays.
        assert!(table.can_cast(&arrayof(&int, Some(4)), &int_ptr, false, false));
    }
}
