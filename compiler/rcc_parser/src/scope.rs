//! Scopes and variable records
//!
//! Scopes form a tree referenced by index; AST nodes point back into it with
//! `ScopeId`, which keeps the AST free of reference cycles.

use crate::ast::Initializer;
use rcc_common::Name;
use rcc_types::Type;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeId(pub u32);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Storage {
    pub is_extern: bool,
    pub is_static: bool,
    pub is_typedef: bool,
    pub is_enum_member: bool,
    pub is_param: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VarPlace {
    Global { init: Option<Initializer> },
    /// Index into the enclosing function's `locals`.
    Local { index: usize },
    /// A function-scope static; `gvar` names the synthesized global.
    StaticLocal { gvar: Name },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarInfo {
    pub name: Name,
    pub ty: Type,
    pub storage: Storage,
    pub place: VarPlace,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    pub vars: Vec<VarInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scopes {
    scopes: Vec<Scope>,
}

impl Scopes {
    pub const GLOBAL: ScopeId = ScopeId(0);

    pub fn new() -> Self {
        Self { scopes: vec![Scope { parent: None, vars: Vec::new() }] }
    }

    pub fn push(&mut self, parent: ScopeId) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope { parent: Some(parent), vars: Vec::new() });
        id
    }

    pub fn get(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0 as usize]
    }

    pub fn add(&mut self, id: ScopeId, var: VarInfo) {
        self.get_mut(id).vars.push(var);
    }

    /// Look up in one scope only.
    pub fn find_in(&self, id: ScopeId, name: Name) -> Option<&VarInfo> {
        self.get(id).vars.iter().find(|v| v.name == name)
    }

    /// Walk the parent chain; returns the scope the name was found in.
    pub fn find(&self, from: ScopeId, name: Name) -> Option<(ScopeId, &VarInfo)> {
        let mut cur = Some(from);
        while let Some(id) = cur {
            if let Some(var) = self.find_in(id, name) {
                return Some((id, var));
            }
            cur = self.get(id).parent;
        }
        None
    }

    pub fn find_mut(&mut self, from: ScopeId, name: Name) -> Option<&mut VarInfo> {
        let mut cur = Some(from);
        while let Some(id) = cur {
            if self.find_in(id, name).is_some() {
                return self.get_mut(id).vars.iter_mut().find(|v| v.name == name);
            }
            cur = self.get(id).parent;
        }
        None
    }

    pub fn is_global(&self, id: ScopeId) -> bool {
        id == Self::GLOBAL
    }
}

impl Default for Scopes {
    fn default() -> Self {
        Self::new()
    }
}
