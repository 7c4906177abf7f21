//! The context-sensitive dataflow engine: a worklist fixed point over the
//! map (label × context) → state, growing the inter-procedural edge set on
//! the fly as call targets become known.

mod transfer;

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::context::{AnalysisContext, ModuleEntry};
use crate::error::{AnalysisError, AnalysisResult};
use crate::namespace::{NAME_SLOT, PACKAGE_SLOT};
use crate::objects::{
    AbstractObject, AnalysisModule, CtxTuple, ObjId,
};
use crate::state::State;
use crate::value::Value;
use typox_cfg::hir::{HirExpr, HirStmt};
use typox_cfg::Label;

/// A program point: a label under a calling context.
pub type ProgramPoint = (Label, CtxTuple);

type Edge = (ProgramPoint, ProgramPoint);

/// How a callee frame gets built when control enters it.
#[derive(Debug, Clone)]
pub(crate) enum CallBinding {
    /// An ordinary function or bound-method call.
    Function {
        func: ObjId,
        self_value: Option<Value>,
        is_init: bool,
    },
    /// Class-body evaluation.
    ClassBody,
    /// A reified descriptor invocation with precomputed arguments.
    Descriptor { func: ObjId, args: Vec<Value> },
}

/// What happens at the matching return label when the callee exits.
#[derive(Debug, Clone)]
pub(crate) enum ReturnBinding {
    /// Publish the return slot into the caller's result temporary.
    CallResult {
        temp: Option<String>,
        call: ProgramPoint,
        func: Option<ObjId>,
    },
    /// Assemble an analysis class from the class-body frame.
    ClassAssemble { call: ProgramPoint },
}

pub struct Analysis<'a> {
    pub ctx: &'a mut AnalysisContext,
    pub module: String,
    pub module_path: PathBuf,
    pub entry: Label,
    pub exit: Label,

    /// Λ: the engine-wide lattice.
    pub table: IndexMap<ProgramPoint, State>,
    worklist: VecDeque<Edge>,
    call_edges: IndexMap<Edge, CallBinding>,
    exit_edges: IndexMap<ProgramPoint, Vec<(ProgramPoint, ReturnBinding)>>,

    /// Driver-imposed bound on processed edges; partial results stay sound.
    pub max_steps: usize,
    steps: usize,
}

impl<'a> Analysis<'a> {
    /// Set up the analysis of a main file: lower it (or fetch the cached
    /// CFG), merge it into the flow graph, and seed the extremal state.
    pub fn new(ctx: &'a mut AnalysisContext, path: &Path) -> AnalysisResult<Self> {
        let module = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("main")
            .to_string();
        Self::for_module(ctx, &module, path)
    }

    pub(crate) fn for_module(
        ctx: &'a mut AnalysisContext,
        module: &str,
        path: &Path,
    ) -> AnalysisResult<Self> {
        if !path.exists() {
            return Err(AnalysisError::MainFileMissing {
                path: path.to_path_buf(),
            });
        }
        let path_buf = path.to_path_buf();
        if !ctx.cfg_cache.contains_key(&path_buf) {
            let source = std::fs::read_to_string(path)?;
            let cfg = typox_cfg::lower_source(
                module,
                &source,
                &path.display().to_string(),
                &mut ctx.labels,
                &mut ctx.temps,
            )?;
            ctx.cfg_cache.insert(path_buf.clone(), cfg);
        }
        let cfg = ctx.cfg_cache[&path_buf].clone();
        let (entry, exit) = ctx.graph.merge_cfg(&cfg);

        Ok(Self {
            ctx,
            module: module.to_string(),
            module_path: path_buf,
            entry,
            exit,
            table: IndexMap::new(),
            worklist: VecDeque::new(),
            call_edges: IndexMap::new(),
            exit_edges: IndexMap::new(),
            max_steps: 1_000_000,
            steps: 0,
        })
    }

    /// Seed the extremal program point and the initial worklist, then
    /// iterate to the fixed point.
    ///
    /// Shared structures (the heap, class dictionaries, module globals)
    /// grow outside Λ, so a drained worklist is not yet a fixed point: the
    /// sweep repeats until one full pass leaves the shared epoch untouched.
    pub fn compute_fixed_point(&mut self) -> AnalysisResult<ObjId> {
        let module_obj = self.initialize();
        loop {
            let epoch = self.ctx.spaces.epoch();
            self.iterate();
            if self.ctx.spaces.epoch() == epoch || self.steps >= self.max_steps {
                break;
            }
            self.reseed();
        }
        self.finish_module(module_obj);
        Ok(module_obj)
    }

    /// Re-enqueue every edge derivable from the points reached so far, and
    /// re-expand call points whose targets may have narrowed through
    /// shared namespaces rather than through Λ.
    fn reseed(&mut self) {
        let points: Vec<ProgramPoint> = self.table.keys().cloned().collect();
        for point in &points {
            self.expand(point);
        }
        for point in points {
            for edge in self.delta(&point) {
                self.worklist.push_back(edge);
            }
        }
    }

    fn initialize(&mut self) -> ObjId {
        // one empty frame pointing at module globals and builtins
        let globals = self.ctx.spaces.fresh();
        let builtins_ns = self.ctx.wk.builtins_ns;
        {
            let ns = self.ctx.spaces.get_mut(globals);
            ns.write_helper(NAME_SLOT, Value::of(self.ctx.wk.str_instance));
            ns.write_helper(PACKAGE_SLOT, Value::of(self.ctx.wk.str_instance));
        }
        let module_obj = self
            .ctx
            .arena
            .alloc(AbstractObject::AnalysisModule(AnalysisModule {
                name: self.module.clone(),
                package: String::new(),
                path: self.module_path.clone(),
                globals,
                entry: self.entry,
                exit: self.exit,
            }));
        self.ctx
            .modules
            .insert(self.module.clone(), ModuleEntry::InProgress(module_obj));

        let state = State::initial(&self.module, globals, builtins_ns);
        let extremal: ProgramPoint = (self.entry, CtxTuple::new());
        self.table.insert(extremal, state);

        // the work-list is seeded with every intra-procedural edge, plus
        // the deterministic dummy successors of each call family
        let empty = CtxTuple::new();
        let flows: Vec<(Label, Label)> = self.ctx.graph.flows.iter().copied().collect();
        for (a, b) in flows {
            self.worklist.push_back(((a, empty.clone()), (b, empty.clone())));
        }
        for (call, dummy) in self.family_dummy_pairs() {
            self.worklist
                .push_back(((call, empty.clone()), (dummy, empty.clone())));
        }
        debug!(module = %self.module, seeds = self.worklist.len(), "worklist initialized");
        module_obj
    }

    fn family_dummy_pairs(&self) -> Vec<(Label, Label)> {
        let graph = &self.ctx.graph;
        let mut pairs = Vec::new();
        for flow in graph.getter_by_call.values() {
            pairs.push((flow.call, flow.dummy));
        }
        for flow in graph.setter_by_call.values() {
            pairs.push((flow.call, flow.dummy));
        }
        for flow in graph.magic_by_call.values() {
            pairs.push((flow.call, flow.dummy));
        }
        for flow in graph.special_init_by_call.values() {
            pairs.push((flow.call, flow.dummy));
        }
        for flow in graph.call_return_by_call.values() {
            pairs.push((flow.call, flow.new_dummy));
            pairs.push((flow.call, flow.init_dummy));
        }
        pairs
    }

    fn iterate(&mut self) {
        while let Some((p1, p2)) = self.worklist.pop_front() {
            if self.steps >= self.max_steps {
                warn!(module = %self.module, "iteration bound reached; result is partial");
                break;
            }
            self.steps += 1;

            if !self.table.contains_key(&p1) {
                continue;
            }
            let Some(transferred) = self.transfer_edge(&p1, &p2) else {
                continue;
            };

            let already_covered = self
                .table
                .get(&p2)
                .is_some_and(|old| transferred.le(old, &self.ctx.spaces));
            if already_covered {
                continue;
            }

            match self.table.get_mut(&p2) {
                Some(existing) => existing.join_with(&transferred, &mut self.ctx.spaces),
                None => {
                    self.table.insert(p2.clone(), transferred);
                }
            }

            self.expand(&p2);

            // newly exposed edges run next, for locality
            for edge in self.delta(&p2) {
                self.worklist.push_front(edge);
            }
        }
        info!(module = %self.module, steps = self.steps, points = self.table.len(), "fixed point reached");
    }

    /// Successor point edges of a just-risen point.
    fn delta(&self, point: &ProgramPoint) -> Vec<Edge> {
        let (label, ctx) = point;
        let graph = &self.ctx.graph;
        let mut added = Vec::new();

        for (a, b) in &graph.flows {
            if a == label {
                added.push((point.clone(), (*b, ctx.clone())));
            }
        }
        for (call, dummy) in self.family_dummy_pairs() {
            if call == *label {
                added.push((point.clone(), (dummy, ctx.clone())));
            }
        }
        for (edge, _) in &self.call_edges {
            if edge.0 == *point {
                added.push(edge.clone());
            }
        }
        if let Some(returns) = self.exit_edges.get(point) {
            for (ret, _) in returns {
                added.push((point.clone(), ret.clone()));
            }
        }
        added
    }

    /// On-the-fly inter-procedural expansion: when a call point rises and
    /// its target narrows to concrete callees, merge the callee's flows and
    /// blocks, install call → entry and exit → return edges, and enqueue
    /// the newly exposed edges.
    fn expand(&mut self, point: &ProgramPoint) {
        let (label, _) = point;
        let label = *label;

        if let Some(flow) = self.ctx.graph.classdef_by_call.get(&label).copied() {
            self.expand_classdef(point, flow);
        }
        if let Some(flow) = self.ctx.graph.call_return_by_call.get(&label).copied() {
            self.expand_call(point, flow.call, flow.init_return, false);
        }
        if let Some(flow) = self.ctx.graph.special_init_by_call.get(&label).copied() {
            self.expand_call(point, flow.call, flow.ret, true);
        }
        if let Some(flow) = self.ctx.graph.getter_by_call.get(&label).copied() {
            self.expand_getter(point, flow);
        }
        if let Some(flow) = self.ctx.graph.setter_by_call.get(&label).copied() {
            self.expand_setter(point, flow);
        }
        if let Some(flow) = self.ctx.graph.magic_by_call.get(&label).copied() {
            self.expand_magic(point, flow);
        }
    }

    fn expand_classdef(&mut self, point: &ProgramPoint, flow: typox_cfg::ClassdefFlow) {
        let Some(sub) = self.ctx.graph.sub_cfgs.get(&flow.call).cloned() else {
            return;
        };
        let (entry, exit) = self.ctx.graph.merge_cfg(&sub);
        let ctx = point.1.clone();
        let entry_p = (entry, ctx.clone());
        let exit_p = (exit, ctx.clone());
        let ret_p = (flow.ret, ctx);

        self.install_edge(point.clone(), entry_p, CallBinding::ClassBody);
        self.install_return(exit_p, ret_p, ReturnBinding::ClassAssemble {
            call: point.clone(),
        });
    }

    /// Install the inter-procedural edges for every concrete analysis
    /// function or bound method the callee value has narrowed to.
    fn expand_call(&mut self, point: &ProgramPoint, call: Label, ret: Label, is_init: bool) {
        let callees = self.callee_value(point, call);
        if callees.is_any() {
            return;
        }
        let temp = self.result_temp(ret);
        let objs: Vec<ObjId> = callees.iter().collect();
        for obj in objs {
            match self.ctx.arena.get(obj).clone() {
                AbstractObject::AnalysisFunction(_) => {
                    self.install_function_call(point, obj, None, false, ret, temp.clone());
                }
                AbstractObject::AnalysisMethod(m) => {
                    let receiver = Value::of(m.instance);
                    self.install_function_call(
                        point,
                        m.function,
                        Some(receiver),
                        is_init,
                        ret,
                        temp.clone(),
                    );
                }
                _ => {}
            }
        }
    }

    fn expand_getter(&mut self, point: &ProgramPoint, flow: typox_cfg::TripleFlow) {
        let Some(HirStmt::Expr {
            value: HirExpr::Attribute { value, attr },
        }) = self.ctx.graph.stmt(flow.call).cloned()
        else {
            return;
        };
        let Some(state) = self.table.get(point).cloned() else {
            return;
        };
        let Some(objs) = value.as_name().map(|n| state.read_var(&self.ctx.spaces, n)) else {
            return;
        };
        let objs = objs.unwrap_or_default();
        let (_, descrs) = crate::attr::getattrs(self.ctx, &objs, &attr);
        let temp = self.result_temp(flow.ret);
        self.install_descriptor_calls(point, &descrs, flow.ret, temp);
    }

    fn expand_setter(&mut self, point: &ProgramPoint, flow: typox_cfg::TripleFlow) {
        let Some(HirStmt::Assign { targets, value }) = self.ctx.graph.stmt(flow.call).cloned()
        else {
            return;
        };
        let Some(HirExpr::Attribute {
            value: target_value,
            attr,
        }) = targets.first().cloned()
        else {
            return;
        };
        let Some(state) = self.table.get(point).cloned() else {
            return;
        };
        let objs = target_value
            .as_name()
            .and_then(|n| state.read_var(&self.ctx.spaces, n))
            .unwrap_or_default();
        let assigned = self.eval_simple(&state, &value, point);
        let descrs = crate::attr::setattrs(self.ctx, &objs, &attr, &assigned);
        self.install_descriptor_calls(point, &descrs, flow.ret, None);
    }

    /// Operator forms dispatch to dunder methods of user instances.
    fn expand_magic(&mut self, point: &ProgramPoint, flow: typox_cfg::TripleFlow) {
        let Some(HirStmt::Expr { value }) = self.ctx.graph.stmt(flow.call).cloned() else {
            return;
        };
        let Some(state) = self.table.get(point).cloned() else {
            return;
        };
        let temp = self.result_temp(flow.ret);

        let dispatch = |this: &mut Self, receiver: &HirExpr, method: &str, args: Vec<Value>| {
            let Some(objs) = receiver
                .as_name()
                .and_then(|n| state.read_var(&this.ctx.spaces, n))
            else {
                return;
            };
            let (res, _) = crate::attr::getattrs(this.ctx, &objs, method);
            if res.is_any() {
                return;
            }
            let methods: Vec<ObjId> = res.iter().collect();
            for m in methods {
                if let AbstractObject::AnalysisMethod(bound) = this.ctx.arena.get(m).clone() {
                    let mut full_args = vec![Value::of(bound.instance)];
                    full_args.extend(args.iter().cloned());
                    this.install_edge(
                        point.clone(),
                        (
                            this.function_entry(bound.function),
                            this.ctx.mode.merge(flow.call, &point.1),
                        ),
                        CallBinding::Descriptor {
                            func: bound.function,
                            args: full_args,
                        },
                    );
                    let exit_p = (
                        this.function_exit(bound.function),
                        this.ctx.mode.merge(flow.call, &point.1),
                    );
                    this.merge_function_cfg(bound.function);
                    this.install_return(
                        exit_p,
                        (flow.ret, point.1.clone()),
                        ReturnBinding::CallResult {
                            temp: temp.clone(),
                            call: point.clone(),
                            func: Some(bound.function),
                        },
                    );
                }
            }
        };

        match value {
            HirExpr::BinOp { left, op, right } => {
                let right_value = right
                    .as_name()
                    .and_then(|n| state.read_var(&self.ctx.spaces, n))
                    .unwrap_or_default();
                let left_value = left
                    .as_name()
                    .and_then(|n| state.read_var(&self.ctx.spaces, n))
                    .unwrap_or_default();
                dispatch(self, &left, op.dunder(), vec![right_value]);
                dispatch(self, &right, op.reflected_dunder(), vec![left_value]);
            }
            HirExpr::Subscript { value: base, slice } => {
                let index = slice
                    .as_name()
                    .and_then(|n| state.read_var(&self.ctx.spaces, n))
                    .unwrap_or_default();
                dispatch(self, &base, "__getitem__", vec![index]);
            }
            _ => {}
        }
    }

    fn install_descriptor_calls(
        &mut self,
        point: &ProgramPoint,
        descrs: &Value,
        ret: Label,
        temp: Option<String>,
    ) {
        if descrs.is_any() {
            return;
        }
        let records: Vec<ObjId> = descrs.iter().collect();
        for record in records {
            let call = match self.ctx.arena.get(record) {
                AbstractObject::DescriptorGetter(call)
                | AbstractObject::DescriptorSetter(call) => call.clone(),
                _ => continue,
            };
            self.merge_function_cfg(call.function);
            let new_ctx = self.ctx.mode.merge(point.0, &point.1);
            let entry_p = (self.function_entry(call.function), new_ctx.clone());
            let exit_p = (self.function_exit(call.function), new_ctx);
            self.install_edge(
                point.clone(),
                entry_p,
                CallBinding::Descriptor {
                    func: call.function,
                    args: call.args.clone(),
                },
            );
            self.install_return(
                exit_p,
                (ret, point.1.clone()),
                ReturnBinding::CallResult {
                    temp: temp.clone(),
                    call: point.clone(),
                    func: Some(call.function),
                },
            );
        }
    }

    fn install_function_call(
        &mut self,
        point: &ProgramPoint,
        func: ObjId,
        self_value: Option<Value>,
        is_init: bool,
        ret: Label,
        temp: Option<String>,
    ) {
        self.merge_function_cfg(func);
        let new_ctx = self.ctx.mode.merge(point.0, &point.1);
        let entry_p = (self.function_entry(func), new_ctx.clone());
        let exit_p = (self.function_exit(func), new_ctx);
        self.install_edge(
            point.clone(),
            entry_p,
            CallBinding::Function {
                func,
                self_value,
                is_init,
            },
        );
        self.install_return(
            exit_p,
            (ret, point.1.clone()),
            ReturnBinding::CallResult {
                temp,
                call: point.clone(),
                func: Some(func),
            },
        );
    }

    fn install_edge(&mut self, from: ProgramPoint, to: ProgramPoint, binding: CallBinding) {
        let edge = (from, to);
        let fresh = !self.call_edges.contains_key(&edge);
        self.call_edges.insert(edge.clone(), binding);
        if fresh {
            debug!(from = %edge.0 .0, to = %edge.1 .0, "installed call edge");
        }
        self.worklist.push_front(edge);
    }

    fn install_return(
        &mut self,
        exit_p: ProgramPoint,
        ret_p: ProgramPoint,
        binding: ReturnBinding,
    ) {
        let returns = self.exit_edges.entry(exit_p.clone()).or_default();
        if !returns.iter().any(|(existing, _)| *existing == ret_p) {
            returns.push((ret_p.clone(), binding));
        }
        self.worklist.push_front((exit_p, ret_p));
    }

    fn merge_function_cfg(&mut self, func: ObjId) {
        let AbstractObject::AnalysisFunction(f) = self.ctx.arena.get(func) else {
            return;
        };
        let def_label = f.def_label;
        if let Some(sub) = self.ctx.graph.sub_cfgs.get(&def_label).cloned() {
            self.ctx.graph.merge_cfg(&sub);
        }
    }

    fn function_entry(&self, func: ObjId) -> Label {
        match self.ctx.arena.get(func) {
            AbstractObject::AnalysisFunction(f) => f.entry,
            _ => Label(0),
        }
    }

    fn function_exit(&self, func: ObjId) -> Label {
        match self.ctx.arena.get(func) {
            AbstractObject::AnalysisFunction(f) => f.exit,
            _ => Label(0),
        }
    }

    /// The callee value at a call label: the function expression is always
    /// a name after lowering.
    fn callee_value(&mut self, point: &ProgramPoint, call: Label) -> Value {
        let Some(HirStmt::Expr {
            value: HirExpr::Call { func, .. },
        }) = self.ctx.graph.stmt(call).cloned()
        else {
            return Value::new();
        };
        let Some(state) = self.table.get(point) else {
            return Value::new();
        };
        func.as_name()
            .and_then(|name| state.read_var(&self.ctx.spaces, name))
            .unwrap_or_default()
    }

    /// The result temporary carried by a return or dummy block.
    fn result_temp(&self, label: Label) -> Option<String> {
        match self.ctx.graph.stmt(label) {
            Some(HirStmt::Expr {
                value: HirExpr::Name(name),
            }) => Some(name.clone()),
            _ => None,
        }
    }

    fn finish_module(&mut self, module_obj: ObjId) {
        // the settled module namespace is the exit point's top frame
        let exit_point = (self.exit, CtxTuple::new());
        let globals = self
            .table
            .get(&exit_point)
            .map(|state| state.top().ns);
        if let Some(globals) = globals {
            if let AbstractObject::AnalysisModule(m) = self.ctx.arena.get_mut(module_obj) {
                m.globals = globals;
            }
        }
        self.ctx
            .modules
            .insert(self.module.clone(), ModuleEntry::Ready(module_obj));
    }

    /// Verify the fixed point: for every reachable edge, one more transfer
    /// is covered by the table.
    pub fn verify_fixed_point(&mut self) -> AnalysisResult<()> {
        let points: Vec<ProgramPoint> = self.table.keys().cloned().collect();
        for point in points {
            for (p1, p2) in self.delta(&point) {
                let Some(transferred) = self.transfer_edge(&p1, &p2) else {
                    continue;
                };
                let covered = self
                    .table
                    .get(&p2)
                    .is_some_and(|old| transferred.le(old, &self.ctx.spaces));
                if !covered {
                    return Err(AnalysisError::NonMonotoneTransfer { label: p2.0 .0 });
                }
            }
        }
        Ok(())
    }
}
