//! The abstract value: the bounded-join-semilattice carrier used throughout
//! the analysis.
//!
//! A value is either the top element `Any` or a finite set of abstract
//! object identifiers. The primitive-tag, function-id and class-map
//! components described by the data model are recovered from the kinds of
//! the referenced objects; identical class identifiers share one namespace
//! in the arena, so the recursive namespace merge on join is the identity.

use std::fmt;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::objects::ObjId;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Value {
    any: bool,
    objs: IndexSet<ObjId>,
}

impl Value {
    pub fn new() -> Self {
        Self::default()
    }

    /// The top element.
    pub fn any() -> Self {
        Self {
            any: true,
            objs: IndexSet::new(),
        }
    }

    pub fn of(obj: ObjId) -> Self {
        let mut value = Self::new();
        value.inject(obj);
        value
    }

    pub fn is_any(&self) -> bool {
        self.any
    }

    pub fn is_empty(&self) -> bool {
        !self.any && self.objs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.objs.len()
    }

    pub fn inject(&mut self, obj: ObjId) {
        if !self.any {
            self.objs.insert(obj);
        }
    }

    /// Component-wise union. Any absorbs everything.
    pub fn inject_value(&mut self, other: &Value) {
        if self.any {
            return;
        }
        if other.any {
            self.any = true;
            self.objs.clear();
            return;
        }
        for obj in &other.objs {
            self.objs.insert(*obj);
        }
    }

    pub fn join(mut self, other: &Value) -> Value {
        self.inject_value(other);
        self
    }

    /// `self ⊑ other`: Any is only below Any.
    pub fn le(&self, other: &Value) -> bool {
        if other.any {
            return true;
        }
        if self.any {
            return false;
        }
        self.objs.is_subset(&other.objs)
    }

    pub fn contains(&self, obj: ObjId) -> bool {
        self.objs.contains(&obj)
    }

    pub fn iter(&self) -> impl Iterator<Item = ObjId> + '_ {
        self.objs.iter().copied()
    }

    /// The single object of a singleton value.
    pub fn single(&self) -> Option<ObjId> {
        if self.any || self.objs.len() != 1 {
            None
        } else {
            self.objs.first().copied()
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.any {
            return write!(f, "Any");
        }
        write!(f, "{{")?;
        for (i, obj) in self.objs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "#{}", obj.0)?;
        }
        write!(f, "}}")
    }
}

impl FromIterator<ObjId> for Value {
    fn from_iter<I: IntoIterator<Item = ObjId>>(iter: I) -> Self {
        let mut value = Value::new();
        for obj in iter {
            value.inject(obj);
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_is_idempotent() {
        let mut v = Value::of(ObjId(3));
        v.inject(ObjId(7));
        let joined = v.clone().join(&v);
        assert_eq!(joined, v);
    }

    #[test]
    fn bottom_is_join_unit() {
        let v = Value::of(ObjId(1));
        assert_eq!(v.clone().join(&Value::new()), v);
        assert_eq!(Value::new().join(&v), v);
    }

    #[test]
    fn any_absorbs() {
        let v = Value::of(ObjId(1));
        assert!(v.clone().join(&Value::any()).is_any());
        assert!(Value::any().join(&v).is_any());
    }

    #[test]
    fn any_only_below_any() {
        let v = Value::of(ObjId(1));
        assert!(v.le(&Value::any()));
        assert!(!Value::any().le(&v));
        assert!(Value::any().le(&Value::any()));
    }
}
