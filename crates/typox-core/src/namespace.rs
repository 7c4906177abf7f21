//! Namespaces: maps from variables to abstract values.
//!
//! A variable carries a binding kind. Lookup respects the four kinds; the
//! helper kind holds analysis-internal slots (the return slot, constructor
//! markers, module metadata) that never appear in user-facing output.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::value::Value;
use typox_cfg::TempNames;

/// Distinguished helper slot holding a function's return value.
pub const RETURN_SLOT: &str = "@return";
/// Marks a frame as an `__init__` body; holds the constructed instance.
pub const INIT_SLOT: &str = "@init";
/// The function object executing in this frame (super() support).
pub const FUNCTION_SLOT: &str = "@function";
/// The receiver of the executing method (super() support).
pub const SELF_SLOT: &str = "@self";
/// Module metadata bindings.
pub const NAME_SLOT: &str = "@name";
pub const PACKAGE_SLOT: &str = "@package";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VarKind {
    Local,
    Nonlocal,
    Global,
    Helper,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub kind: VarKind,
    pub value: Value,
}

/// A namespace maps variable names to bindings; ⊑ and ⊔ are pointwise.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Namespace {
    bindings: IndexMap<String, Binding>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn kind_of(&self, name: &str) -> Option<VarKind> {
        self.bindings.get(name).map(|b| b.kind)
    }

    pub fn read_value(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name).map(|b| &b.value)
    }

    pub fn write_local(&mut self, name: impl Into<String>, value: Value) {
        self.write_kind(name, VarKind::Local, value);
    }

    pub fn write_helper(&mut self, name: impl Into<String>, value: Value) {
        self.write_kind(name, VarKind::Helper, value);
    }

    pub fn write_kind(&mut self, name: impl Into<String>, kind: VarKind, value: Value) {
        self.bindings.insert(name.into(), Binding { kind, value });
    }

    /// Join `value` into the existing binding (creating a local one).
    /// Reports whether the binding actually grew.
    pub fn join_local(&mut self, name: &str, value: &Value) -> bool {
        match self.bindings.get_mut(name) {
            Some(binding) => {
                if value.le(&binding.value) {
                    false
                } else {
                    binding.value.inject_value(value);
                    true
                }
            }
            None => {
                self.write_local(name, value.clone());
                true
            }
        }
    }

    pub fn join_helper(&mut self, name: &str, value: &Value) -> bool {
        match self.bindings.get_mut(name) {
            Some(binding) => {
                if value.le(&binding.value) {
                    false
                } else {
                    binding.value.inject_value(value);
                    true
                }
            }
            None => {
                self.write_helper(name, value.clone());
                true
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Binding> {
        self.bindings.shift_remove(name)
    }

    /// Pointwise ⊑ over the union of keys.
    pub fn le(&self, other: &Namespace) -> bool {
        self.bindings.iter().all(|(name, binding)| {
            other
                .bindings
                .get(name)
                .is_some_and(|o| binding.value.le(&o.value))
        })
    }

    /// Pointwise join; reports whether any binding grew.
    pub fn join_with(&mut self, other: &Namespace) -> bool {
        let mut changed = false;
        for (name, binding) in &other.bindings {
            match self.bindings.get_mut(name) {
                Some(existing) => {
                    if !binding.value.le(&existing.value) {
                        existing.value.inject_value(&binding.value);
                        changed = true;
                    }
                }
                None => {
                    self.bindings.insert(name.clone(), binding.clone());
                    changed = true;
                }
            }
        }
        changed
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Binding)> {
        self.bindings.iter().map(|(n, b)| (n.as_str(), b))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Local, user-visible bindings (no helpers).
    pub fn extract_locals(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.bindings
            .iter()
            .filter(|(_, b)| matches!(b.kind, VarKind::Local | VarKind::Global))
            .map(|(n, b)| (n.as_str(), &b.value))
    }

    /// Local bindings without lowering temporaries.
    pub fn extract_local_nontemps(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.extract_locals()
            .filter(|(name, _)| !TempNames::is_temp(name))
    }
}

/// Identifier of a namespace in the shared arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NsId(pub u32);

/// Owns every namespace of an analysis. Frames, class objects, modules and
/// heap entries all reference namespaces by id, which is what lets states
/// share everything but their mutable top frame.
///
/// The epoch counts actual lattice growth through shared namespaces; the
/// engine repeats its sweep until an entire pass leaves it untouched, so
/// heap-mediated growth reaches every dependent point.
#[derive(Debug, Default)]
pub struct NamespaceArena {
    spaces: Vec<Namespace>,
    epoch: u64,
}

impl NamespaceArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Record growth that bypassed the namespace join helpers (object
    /// fields such as property accessors or captured defaults).
    pub fn note_shared_change(&mut self) {
        self.epoch += 1;
    }

    /// Join a value into a binding of a shared namespace (heap entries,
    /// class dictionaries, module globals).
    pub fn join_value(&mut self, ns: NsId, name: &str, value: &Value) {
        if self.get_mut(ns).join_local(name, value) {
            self.epoch += 1;
        }
    }

    pub fn alloc(&mut self, ns: Namespace) -> NsId {
        let id = NsId(u32::try_from(self.spaces.len()).unwrap_or(u32::MAX));
        self.spaces.push(ns);
        id
    }

    pub fn fresh(&mut self) -> NsId {
        self.alloc(Namespace::new())
    }

    pub fn get(&self, id: NsId) -> &Namespace {
        &self.spaces[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: NsId) -> &mut Namespace {
        &mut self.spaces[id.0 as usize]
    }

    /// Duplicate a namespace (the hybrid copy of a mutable top frame).
    pub fn duplicate(&mut self, id: NsId) -> NsId {
        let copy = self.get(id).clone();
        self.alloc(copy)
    }

    pub fn join_into(&mut self, target: NsId, source: NsId) {
        if target == source {
            return;
        }
        let source_ns = self.get(source).clone();
        if self.get_mut(target).join_with(&source_ns) {
            self.epoch += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::ObjId;

    #[test]
    fn pointwise_join_over_union_of_keys() {
        let mut a = Namespace::new();
        a.write_local("x", Value::of(ObjId(1)));
        let mut b = Namespace::new();
        b.write_local("y", Value::of(ObjId(2)));
        a.join_with(&b);
        assert!(a.contains("x") && a.contains("y"));
    }

    #[test]
    fn le_is_pointwise() {
        let mut a = Namespace::new();
        a.write_local("x", Value::of(ObjId(1)));
        let mut b = Namespace::new();
        b.write_local("x", Value::of(ObjId(1)));
        b.write_local("y", Value::of(ObjId(2)));
        assert!(a.le(&b));
        assert!(!b.le(&a));
    }

    #[test]
    fn helpers_hidden_from_locals() {
        let mut ns = Namespace::new();
        ns.write_local("x", Value::new());
        ns.write_helper(RETURN_SLOT, Value::new());
        ns.write_local("_var3", Value::new());
        let locals: Vec<&str> = ns.extract_local_nontemps().map(|(n, _)| n).collect();
        assert_eq!(locals, vec!["x"]);
    }
}
