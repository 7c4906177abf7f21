use std::fmt;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::hir::HirStmt;

/// A unique integer naming a basic block or a distinguished role within a
/// call site. Labels are unique across every CFG produced by one
/// [`LabelGenerator`], so sub-CFGs and imported modules can be merged into a
/// single block map without collision.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Default)]
pub struct LabelGenerator {
    next: u32,
}

impl LabelGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&mut self) -> Label {
        self.next += 1;
        Label(self.next)
    }
}

/// Generator for `_var{N}` temporaries.
#[derive(Debug, Default)]
pub struct TempNames {
    next: u32,
}

impl TempNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&mut self) -> String {
        self.next += 1;
        format!("_var{}", self.next)
    }

    pub fn is_temp(name: &str) -> bool {
        name.strip_prefix("_var")
            .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
    }
}

/// A basic block holding at most one lowered statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicBlock {
    pub id: Label,
    pub stmt: Option<HirStmt>,
    pub prev: Vec<Label>,
    pub next: Vec<Label>,
}

impl BasicBlock {
    pub fn new(id: Label) -> Self {
        Self {
            id,
            stmt: None,
            prev: Vec::new(),
            next: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stmt.is_none()
    }

    pub fn has_next(&self) -> bool {
        !self.next.is_empty()
    }

    pub fn stmt(&self) -> &HirStmt {
        static PASS: HirStmt = HirStmt::Pass;
        self.stmt.as_ref().unwrap_or(&PASS)
    }
}

/// Full constructor-call protocol labels: implicit `__new__`, `__init__`
/// lookup (descriptor-capable), `__init__` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallReturnFlow {
    pub call: Label,
    pub new_return: Label,
    pub new_dummy: Label,
    pub init_lookup: Label,
    pub init_lookup_return: Label,
    pub init_lookup_dummy: Label,
    pub init_call: Label,
    pub init_return: Label,
    pub init_dummy: Label,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClassdefFlow {
    pub call: Label,
    pub ret: Label,
}

/// A (call, return, dummy) triple shared by the getter, setter, magic and
/// special-init families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TripleFlow {
    pub call: Label,
    pub ret: Label,
    pub dummy: Label,
}

/// A control-flow graph of basic blocks with a single entry and a single
/// exit, intra-procedural flows, the inter-procedural edge families, and the
/// nested sub-CFGs keyed by their defining block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cfg {
    pub name: String,
    pub entry: Label,
    pub exit: Label,
    pub blocks: IndexMap<Label, BasicBlock>,
    pub flows: IndexSet<(Label, Label)>,
    pub sub_cfgs: IndexMap<Label, Cfg>,

    pub call_return_flows: IndexSet<CallReturnFlow>,
    pub classdef_flows: IndexSet<ClassdefFlow>,
    pub getter_flows: IndexSet<TripleFlow>,
    pub setter_flows: IndexSet<TripleFlow>,
    pub magic_flows: IndexSet<TripleFlow>,
    pub special_init_flows: IndexSet<TripleFlow>,

    pub call_labels: IndexSet<Label>,
    pub return_labels: IndexSet<Label>,
    pub dummy_labels: IndexSet<Label>,

    pub is_generator: bool,
}

impl Cfg {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn stmt(&self, label: Label) -> Option<&HirStmt> {
        self.blocks.get(&label).and_then(|b| b.stmt.as_ref())
    }

    /// All labels mentioned by any flow or block.
    pub fn labels(&self) -> IndexSet<Label> {
        let mut labels: IndexSet<Label> = self.blocks.keys().copied().collect();
        for (a, b) in &self.flows {
            labels.insert(*a);
            labels.insert(*b);
        }
        labels
    }
}
