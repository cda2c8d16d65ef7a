//! Identifier interning

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

/// An interned identifier. Equality and hashing compare the intern index,
/// never the character data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Name(u32);

impl Name {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Owns every identifier string seen by a translation unit and hands out
/// `Name` handles for them.
#[derive(Debug, Default)]
pub struct Interner {
    map: HashMap<String, Name>,
    names: Vec<String>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, text: &str) -> Name {
        if let Some(&name) = self.map.get(text) {
            return name;
        }
        let name = Name(self.names.len() as u32);
        self.names.push(text.to_string());
        self.map.insert(text.to_string(), name);
        name
    }

    pub fn resolve(&self, name: Name) -> &str {
        &self.names[name.index()]
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_is_idempotent() {
        let mut interner = Interner::new();
        let a = interner.intern("foo");
        let b = interner.intern("foo");
        let c = interner.intern("bar");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(interner.resolve(a), "foo");
        assert_eq!(interner.resolve(c), "bar");
    }
}
