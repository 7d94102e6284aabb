//! Macro environments and their fingerprints.
//!
//! A [`MacroEnvironment`] is the set of macro definitions active at some
//! point of preprocessing. Its [`MacroFingerprint`] identifies the
//! environment so that the same header entered under different macros can
//! be told apart.

use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Opaque identity of a macro environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MacroFingerprint(pub u64);

impl fmt::Display for MacroFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A single macro definition
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MacroDef {
    pub name: String,
    /// Parameter names for function-like macros
    pub params: Option<Vec<String>>,
    /// Replacement list, whitespace-trimmed
    pub body: String,
}

impl MacroDef {
    pub fn object(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: None,
            body: body.into().trim().to_string(),
        }
    }

    pub fn function(
        name: impl Into<String>,
        params: Vec<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            params: Some(params),
            body: body.into().trim().to_string(),
        }
    }

    pub fn is_function_like(&self) -> bool {
        self.params.is_some()
    }
}

/// Ordered set of macro definitions keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroEnvironment {
    macros: BTreeMap<String, MacroDef>,
}

impl MacroEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an environment of object-like macros from `(name, body)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut env = Self::new();
        for (name, body) in pairs {
            env.define(MacroDef::object(name, body));
        }
        env
    }

    /// Define or redefine a macro.
    pub fn define(&mut self, def: MacroDef) {
        self.macros.insert(def.name.clone(), def);
    }

    pub fn undefine(&mut self, name: &str) -> Option<MacroDef> {
        self.macros.remove(name)
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.macros.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&MacroDef> {
        self.macros.get(name)
    }

    pub fn len(&self) -> usize {
        self.macros.len()
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MacroDef> {
        self.macros.values()
    }

    /// Deterministic fingerprint of the whole environment.
    ///
    /// Equal environments always have equal fingerprints; the value is
    /// stable across runs and processes.
    pub fn fingerprint(&self) -> MacroFingerprint {
        let mut hasher = FxHasher::default();
        self.macros.len().hash(&mut hasher);
        for def in self.macros.values() {
            def.hash(&mut hasher);
        }
        MacroFingerprint(hasher.finish())
    }
}

impl FromIterator<MacroDef> for MacroEnvironment {
    fn from_iter<T: IntoIterator<Item = MacroDef>>(iter: T) -> Self {
        let mut env = Self::new();
        for def in iter {
            env.define(def);
        }
        env
    }
}
