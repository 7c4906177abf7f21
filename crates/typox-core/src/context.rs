//! The process-wide analysis context.
//!
//! Four tables have process lifetime: parsed stub modules, interned
//! typeshed objects, parsed user CFGs by file path, and the active search
//! context. They live here, created before any transfer runs and threaded
//! by `&mut` through the engine; entries are only ever appended.

use std::path::PathBuf;

use indexmap::IndexMap;

use indexmap::IndexSet;

use crate::builtins;
use crate::heap::Heap;
use crate::namespace::{NamespaceArena, NsId};
use crate::objects::{CtxTuple, ObjId, ObjectArena};
use crate::typeshed::{SearchContext, TypeshedTables};
use typox_cfg::{
    BasicBlock, CallReturnFlow, Cfg, ClassdefFlow, Label, LabelGenerator, TempNames, TripleFlow,
};

/// Identifiers of the bootstrapped artificial classes, canonical primitive
/// instances and sentinels.
#[derive(Debug, Clone)]
pub struct WellKnown {
    pub any: ObjId,
    pub mro_any: ObjId,
    pub bases_any: ObjId,

    pub type_type: ObjId,
    pub object_type: ObjId,
    pub function_type: ObjId,
    pub method_type: ObjId,
    pub module_type: ObjId,
    pub none_type: ObjId,
    pub bool_type: ObjId,
    pub int_type: ObjId,
    pub float_type: ObjId,
    pub complex_type: ObjId,
    pub str_type: ObjId,
    pub bytes_type: ObjId,
    pub bytearray_type: ObjId,
    pub list_type: ObjId,
    pub tuple_type: ObjId,
    pub set_type: ObjId,
    pub frozenset_type: ObjId,
    pub dict_type: ObjId,
    pub range_type: ObjId,
    pub slice_type: ObjId,
    pub iterator_type: ObjId,
    pub generator_type: ObjId,
    pub ellipsis_type: ObjId,
    pub property_type: ObjId,
    pub classmethod_type: ObjId,
    pub staticmethod_type: ObjId,
    pub super_type: ObjId,

    pub none_instance: ObjId,
    pub bool_instance: ObjId,
    pub int_instance: ObjId,
    pub float_instance: ObjId,
    pub complex_instance: ObjId,
    pub str_instance: ObjId,
    pub bytes_instance: ObjId,
    pub bytearray_instance: ObjId,
    pub ellipsis_instance: ObjId,
    pub slice_instance: ObjId,
    pub range_instance: ObjId,

    pub constructor: ObjId,
    pub object_init: ObjId,

    pub builtins_ns: NsId,
}

/// The two context abstractions. Swapping the strategy replaces exactly the
/// `merge`/`record` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalysisMode {
    /// 1-call-site sensitivity.
    #[default]
    Crude,
    /// Deeper call window with the most recent heap address folded in.
    Refined,
}

impl AnalysisMode {
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "crude" => Some(Self::Crude),
            "refined" => Some(Self::Refined),
            _ => None,
        }
    }

    /// Context for a callee entered from `call_label` under `ctx`.
    pub fn merge(self, call_label: Label, ctx: &CtxTuple) -> CtxTuple {
        let window = match self {
            Self::Crude => 1,
            Self::Refined => 2,
        };
        let mut merged: CtxTuple = ctx
            .iter()
            .copied()
            .skip(ctx.len().saturating_sub(window))
            .collect();
        merged.push(call_label.0);
        merged
    }

    /// Heap context recorded at an allocation site.
    pub fn record(self, site: Label, ctx: &CtxTuple) -> CtxTuple {
        match self {
            Self::Crude => {
                let mut recorded = CtxTuple::new();
                recorded.push(site.0);
                recorded
            }
            Self::Refined => {
                let mut recorded: CtxTuple = ctx
                    .iter()
                    .copied()
                    .skip(ctx.len().saturating_sub(1))
                    .collect();
                recorded.push(site.0);
                recorded
            }
        }
    }
}

/// The merged control-flow universe. Every analyzed module and every
/// sub-CFG opened on the fly lands here, so inter-procedural edges can
/// reach across module boundaries; labels are globally unique.
#[derive(Debug, Default)]
pub struct FlowGraph {
    pub flows: IndexSet<(Label, Label)>,
    pub blocks: IndexMap<Label, BasicBlock>,
    pub sub_cfgs: IndexMap<Label, Cfg>,

    pub call_return_by_call: IndexMap<Label, CallReturnFlow>,
    pub classdef_by_call: IndexMap<Label, ClassdefFlow>,
    pub getter_by_call: IndexMap<Label, TripleFlow>,
    pub setter_by_call: IndexMap<Label, TripleFlow>,
    pub magic_by_call: IndexMap<Label, TripleFlow>,
    pub special_init_by_call: IndexMap<Label, TripleFlow>,

    pub call_labels: IndexSet<Label>,
    pub return_labels: IndexSet<Label>,
    pub dummy_labels: IndexSet<Label>,

    merged: IndexSet<Label>,
}

impl FlowGraph {
    /// Merge a CFG's flows, blocks and edge families; idempotent per entry
    /// label. Returns (entry, exit).
    pub fn merge_cfg(&mut self, cfg: &Cfg) -> (Label, Label) {
        if !self.merged.insert(cfg.entry) {
            return (cfg.entry, cfg.exit);
        }
        self.flows.extend(cfg.flows.iter().copied());
        for (label, block) in &cfg.blocks {
            self.blocks.entry(*label).or_insert_with(|| block.clone());
        }
        for (label, sub) in &cfg.sub_cfgs {
            self.sub_cfgs.entry(*label).or_insert_with(|| sub.clone());
        }
        for flow in &cfg.call_return_flows {
            self.call_return_by_call.insert(flow.call, *flow);
        }
        for flow in &cfg.classdef_flows {
            self.classdef_by_call.insert(flow.call, *flow);
        }
        for flow in &cfg.getter_flows {
            self.getter_by_call.insert(flow.call, *flow);
        }
        for flow in &cfg.setter_flows {
            self.setter_by_call.insert(flow.call, *flow);
        }
        for flow in &cfg.magic_flows {
            self.magic_by_call.insert(flow.call, *flow);
        }
        for flow in &cfg.special_init_flows {
            self.special_init_by_call.insert(flow.call, *flow);
        }
        self.call_labels.extend(cfg.call_labels.iter().copied());
        self.return_labels.extend(cfg.return_labels.iter().copied());
        self.dummy_labels.extend(cfg.dummy_labels.iter().copied());
        (cfg.entry, cfg.exit)
    }

    pub fn stmt(&self, label: Label) -> Option<&typox_cfg::hir::HirStmt> {
        self.blocks.get(&label).and_then(|b| b.stmt.as_ref())
    }
}

/// How a user module resolved on the analysis path.
#[derive(Debug, Clone)]
pub enum ModuleEntry {
    /// Nested fixed point still running (import cycle); the module object
    /// exists but its namespace is still filling in.
    InProgress(ObjId),
    Ready(ObjId),
    Missing,
}

pub struct AnalysisContext {
    pub arena: ObjectArena,
    pub spaces: NamespaceArena,
    pub heap: Heap,
    pub wk: WellKnown,
    pub labels: LabelGenerator,
    pub temps: TempNames,
    pub typeshed: TypeshedTables,
    /// The merged control-flow universe shared by nested analyses.
    pub graph: FlowGraph,
    /// Parsed user CFGs by file path.
    pub cfg_cache: IndexMap<PathBuf, Cfg>,
    /// Analyzed user modules by qualified name.
    pub modules: IndexMap<String, ModuleEntry>,
    /// Source-module discovery roots; the project root is prepended.
    pub analysis_paths: Vec<PathBuf>,
    pub mode: AnalysisMode,
}

impl AnalysisContext {
    pub fn new(search: SearchContext, mode: AnalysisMode) -> Self {
        let mut arena = ObjectArena::new();
        let mut spaces = NamespaceArena::new();
        let wk = builtins::bootstrap(&mut arena, &mut spaces);
        Self {
            arena,
            spaces,
            heap: Heap::new(),
            wk,
            labels: LabelGenerator::new(),
            temps: TempNames::new(),
            typeshed: TypeshedTables::new(search),
            graph: FlowGraph::default(),
            cfg_cache: IndexMap::new(),
            modules: IndexMap::new(),
            analysis_paths: Vec::new(),
            mode,
        }
    }

    pub fn with_project_root(mut self, root: PathBuf) -> Self {
        self.analysis_paths.insert(0, root);
        self
    }
}
