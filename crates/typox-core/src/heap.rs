//! The abstract heap: instance attribute namespaces keyed by allocation
//! site and heap context. Entries only ever grow (monotone insertions and
//! joins, never removals), which is what keeps heap sharing across states
//! sound.

use indexmap::IndexMap;

use crate::namespace::{NamespaceArena, NsId};
use crate::objects::HeapAddress;
use crate::value::Value;

#[derive(Debug, Default)]
pub struct Heap {
    entries: IndexMap<HeapAddress, NsId>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, address: &HeapAddress) -> Option<NsId> {
        self.entries.get(address).copied()
    }

    /// The namespace at an address, created on first touch.
    pub fn ensure(&mut self, address: HeapAddress, spaces: &mut NamespaceArena) -> NsId {
        if let Some(ns) = self.entries.get(&address) {
            return *ns;
        }
        let ns = spaces.fresh();
        self.entries.insert(address, ns);
        ns
    }

    /// Join a field value into the instance namespace at `address`.
    pub fn join_field(
        &mut self,
        address: HeapAddress,
        field: &str,
        value: &Value,
        spaces: &mut NamespaceArena,
    ) {
        let ns = self.ensure(address, spaces);
        spaces.join_value(ns, field, value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HeapAddress, NsId)> {
        self.entries.iter().map(|(a, ns)| (a, *ns))
    }
}
