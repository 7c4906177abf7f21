//! Transfer functions, dispatched by statement kind and by the label's
//! inter-procedural role. Every transfer works on a hybrid copy of the
//! incoming state: the mutable top frame is duplicated, everything else is
//! shared; heap writes are monotone joins.

use std::path::PathBuf;

use tracing::{debug, warn};

use crate::attr::{class_of, getattrs, instance_dict, setattrs};
use crate::builtins::ELEMS_SLOT;
use crate::context::ModuleEntry;
use crate::engine::{Analysis, CallBinding, ProgramPoint, ReturnBinding};
use crate::mro::c3_linearize;
use crate::namespace::{
    VarKind, FUNCTION_SLOT, INIT_SLOT, RETURN_SLOT, SELF_SLOT,
};
use crate::objects::{
    AbstractObject, AnalysisClass, AnalysisFunction, BuiltinEffect, HeapAddress, ObjId,
    PropertyObject,
};
use crate::state::State;
use crate::typeshed::{parse_typeshed_module, refine_function_call, refine_typeshed,
    resolve_typeshed_value};
use crate::value::Value;
use typox_cfg::hir::{BinOp, HirExpr, HirStmt, Literal, UnaryOpKind};
use typox_cfg::TempNames;

impl Analysis<'_> {
    pub(crate) fn transfer_edge(&mut self, p1: &ProgramPoint, p2: &ProgramPoint) -> Option<State> {
        if let Some(binding) = self.call_edges.get(&(p1.clone(), p2.clone())).cloned() {
            return self.transfer_call_edge(p1, &binding);
        }
        if let Some(returns) = self.exit_edges.get(p1) {
            if let Some((_, binding)) = returns.iter().find(|(ret, _)| ret == p2) {
                let binding = binding.clone();
                return self.transfer_return_edge(p1, &binding);
            }
        }

        let same_ctx = p1.1 == p2.1;
        let l1 = p1.0;
        let l2 = p2.0;
        if same_ctx {
            let graph = &self.ctx.graph;
            if let Some(flow) = graph.getter_by_call.get(&l1).copied() {
                if flow.call == l1 && flow.dummy == l2 {
                    return self.transfer_getter_direct(p1, p2);
                }
            }
            if let Some(flow) = graph.setter_by_call.get(&l1).copied() {
                if flow.call == l1 && flow.dummy == l2 {
                    return self.transfer_setter_direct(p1);
                }
            }
            if let Some(flow) = graph.magic_by_call.get(&l1).copied() {
                if flow.call == l1 && flow.dummy == l2 {
                    return self.transfer_magic_direct(p1, p2);
                }
            }
            if let Some(flow) = graph.special_init_by_call.get(&l1).copied() {
                if flow.call == l1 && flow.dummy == l2 {
                    return self.transfer_special_init_direct(p1, p2);
                }
            }
            if let Some(flow) = graph.call_return_by_call.get(&l1).copied() {
                if flow.new_dummy == l2 {
                    return self.transfer_new_direct(p1, p2);
                }
                if flow.init_dummy == l2 {
                    return self.transfer_call_direct(p1, p2);
                }
            }
        }

        self.transfer_stmt(p1)
    }

    // ------------------------------------------------------------------
    // ordinary statements
    // ------------------------------------------------------------------

    fn transfer_stmt(&mut self, p1: &ProgramPoint) -> Option<State> {
        let stmt = self.ctx.graph.stmt(p1.0).cloned().unwrap_or(HirStmt::Pass);
        let state = self.table.get(p1)?.hybrid_copy(&mut self.ctx.spaces);

        match stmt {
            HirStmt::Assign { targets, value } => self.transfer_assign(p1, state, targets, value),
            HirStmt::FunctionDef { name, params, .. } => {
                self.transfer_function_def(p1, state, &name, &params)
            }
            HirStmt::Return { value } => {
                let returned = value
                    .as_ref()
                    .map_or_else(Value::new, |v| self.eval_simple(&state, v, p1));
                self.ctx
                    .spaces
                    .get_mut(state.top().ns)
                    .join_helper(RETURN_SLOT, &returned);
                Some(state)
            }
            HirStmt::Delete { targets } => {
                for target in &targets {
                    if let HirExpr::Name(name) = target {
                        // only lowering temporaries are removed; real
                        // bindings stay for soundness of the join
                        if TempNames::is_temp(name) {
                            self.ctx.spaces.get_mut(state.top().ns).remove(name);
                        }
                    }
                }
                Some(state)
            }
            HirStmt::Global { names } => {
                for name in &names {
                    state.declare(&mut self.ctx.spaces, name, VarKind::Global);
                }
                Some(state)
            }
            HirStmt::Nonlocal { names } => {
                for name in &names {
                    state.declare(&mut self.ctx.spaces, name, VarKind::Nonlocal);
                }
                Some(state)
            }
            HirStmt::Import { module, asname } => {
                self.transfer_import(p1, state, &module, asname.as_deref())
            }
            HirStmt::ImportFrom {
                module,
                names,
                level,
            } => self.transfer_import_from(p1, state, module.as_deref(), &names, level),
            // control statements carry no effect of their own
            _ => Some(state),
        }
    }

    fn transfer_assign(
        &mut self,
        p1: &ProgramPoint,
        state: State,
        targets: Vec<HirExpr>,
        value: HirExpr,
    ) -> Option<State> {
        // a yield joins the produced value into the return slot; the
        // expression itself evaluates to the unknown sent value
        let evaluated = if let HirExpr::Yield { value: yielded } = &value {
            let yielded = yielded
                .as_ref()
                .map_or_else(Value::new, |v| self.eval_simple(&state, v, p1));
            self.ctx
                .spaces
                .get_mut(state.top().ns)
                .join_helper(RETURN_SLOT, &yielded);
            Value::any()
        } else if let HirExpr::YieldFrom { value: inner } = &value {
            let inner = self.eval_simple(&state, inner, p1);
            let elems = self.elems_of(&inner);
            self.ctx
                .spaces
                .get_mut(state.top().ns)
                .join_helper(RETURN_SLOT, &elems);
            Value::any()
        } else {
            self.eval_simple(&state, &value, p1)
        };

        for target in targets {
            self.bind_target(p1, &state, &target, &evaluated);
        }
        Some(state)
    }

    fn bind_target(
        &mut self,
        p1: &ProgramPoint,
        state: &State,
        target: &HirExpr,
        value: &Value,
    ) {
        match target {
            HirExpr::Name(name) => state.write_var(&mut self.ctx.spaces, name, value.clone()),
            HirExpr::Tuple { elts } | HirExpr::List { elts } => {
                let element = self.elems_of(value);
                for elt in elts {
                    self.bind_target(p1, state, elt, &element);
                }
            }
            HirExpr::Subscript { value: base, slice: _ } => {
                if let Some(base_objs) = base
                    .as_name()
                    .and_then(|n| state.read_var(&self.ctx.spaces, n))
                {
                    self.join_into_elements(&base_objs, value);
                }
            }
            // attribute targets are the setter family's concern
            HirExpr::Attribute { .. } => {}
            _ => {}
        }
    }

    fn transfer_function_def(
        &mut self,
        p1: &ProgramPoint,
        state: State,
        name: &str,
        params: &typox_cfg::hir::Params,
    ) -> Option<State> {
        let def_label = p1.0;
        let sub = self.ctx.graph.sub_cfgs.get(&def_label)?;
        let (entry, exit, is_generator) = (sub.entry, sub.exit, sub.is_generator);

        let mut defaults = indexmap::IndexMap::new();
        for param in params.args.iter().chain(params.kwonlyargs.iter()) {
            if let Some(default) = &param.default {
                defaults.insert(param.name.clone(), self.eval_simple(&state, default, p1));
            }
        }

        let func = match self.ctx.arena.function_at(def_label) {
            Some(func) => {
                let mut grew = false;
                if let AbstractObject::AnalysisFunction(f) = self.ctx.arena.get_mut(func) {
                    for (param, value) in defaults {
                        match f.defaults.get_mut(&param) {
                            Some(existing) => {
                                if !value.le(existing) {
                                    existing.inject_value(&value);
                                    grew = true;
                                }
                            }
                            None => {
                                f.defaults.insert(param, value);
                                grew = true;
                            }
                        }
                    }
                }
                if grew {
                    self.ctx.spaces.note_shared_change();
                }
                func
            }
            None => {
                let func = self
                    .ctx
                    .arena
                    .alloc(AbstractObject::AnalysisFunction(AnalysisFunction {
                        name: name.to_string(),
                        module: state.top().module.clone(),
                        def_label,
                        entry,
                        exit,
                        defaults,
                        is_generator,
                        defining_class: None,
                    }));
                self.ctx.arena.intern_function(def_label, func);
                func
            }
        };

        state.write_var(&mut self.ctx.spaces, name, Value::of(func));
        Some(state)
    }

    // ------------------------------------------------------------------
    // inter-procedural edges
    // ------------------------------------------------------------------

    fn transfer_call_edge(&mut self, p1: &ProgramPoint, binding: &CallBinding) -> Option<State> {
        let caller = self.table.get(p1)?.clone();

        match binding {
            CallBinding::ClassBody => {
                let mut callee = caller;
                callee.push_class_frame(&mut self.ctx.spaces);
                Some(callee)
            }
            CallBinding::Function {
                func,
                self_value,
                is_init,
            } => {
                let f = match self.ctx.arena.get(*func) {
                    AbstractObject::AnalysisFunction(f) => f.clone(),
                    _ => return None,
                };
                let (args, keywords) = self.eval_call_args(&caller, p1);
                let mut positional = Vec::new();
                if let Some(receiver) = self_value {
                    positional.push(Arg::Value(receiver.clone()));
                }
                positional.extend(args);

                let globals = self.resolve_globals(&caller, &f);
                let mut callee = caller;
                callee.push_frame(&mut self.ctx.spaces, &f.module, globals);

                self.bind_parameters(&callee, &f, &positional, &keywords);
                {
                    let ns = self.ctx.spaces.get_mut(callee.top().ns);
                    ns.write_helper(FUNCTION_SLOT, Value::of(*func));
                    if let Some(receiver) = self_value {
                        ns.write_helper(SELF_SLOT, receiver.clone());
                        if *is_init {
                            ns.write_helper(INIT_SLOT, receiver.clone());
                        }
                    }
                }
                Some(callee)
            }
            CallBinding::Descriptor { func, args } => {
                let f = match self.ctx.arena.get(*func) {
                    AbstractObject::AnalysisFunction(f) => f.clone(),
                    _ => return None,
                };
                let globals = self.resolve_globals(&caller, &f);
                let mut callee = caller;
                callee.push_frame(&mut self.ctx.spaces, &f.module, globals);
                let positional: Vec<Arg> = args.iter().cloned().map(Arg::Value).collect();
                self.bind_parameters(&callee, &f, &positional, &[]);
                self.ctx
                    .spaces
                    .get_mut(callee.top().ns)
                    .write_helper(FUNCTION_SLOT, Value::of(*func));
                Some(callee)
            }
        }
    }

    fn transfer_return_edge(
        &mut self,
        exit_p: &ProgramPoint,
        binding: &ReturnBinding,
    ) -> Option<State> {
        match binding {
            ReturnBinding::CallResult { temp, call, func } => {
                let exit_state = self.table.get(exit_p)?;
                let exit_ns = self.ctx.spaces.get(exit_state.top().ns);
                // a constructor frame publishes the constructed instance
                let mut returned = exit_ns
                    .read_value(INIT_SLOT)
                    .or_else(|| exit_ns.read_value(RETURN_SLOT))
                    .cloned()
                    .unwrap_or_else(|| Value::of(self.ctx.wk.none_instance));

                if let Some(func) = func {
                    if let AbstractObject::AnalysisFunction(f) = self.ctx.arena.get(*func) {
                        if f.is_generator {
                            returned = self.generator_instance(call, &returned);
                        }
                    }
                }

                let caller = self.table.get(call)?.hybrid_copy(&mut self.ctx.spaces);
                if let Some(temp) = temp {
                    caller.write_var(&mut self.ctx.spaces, temp, returned);
                }
                Some(caller)
            }
            ReturnBinding::ClassAssemble { call } => self.assemble_class(exit_p, call),
        }
    }

    /// The classdef return label assembles an analysis class from the top
    /// frame's contents and the bases extracted from the statement.
    fn assemble_class(&mut self, exit_p: &ProgramPoint, call: &ProgramPoint) -> Option<State> {
        let exit_state = self.table.get(exit_p)?;
        let body_ns = exit_state.top().ns;

        let caller = self.table.get(call)?.hybrid_copy(&mut self.ctx.spaces);
        let Some(HirStmt::ClassDef { name, bases, .. }) =
            self.ctx.graph.stmt(call.0).cloned()
        else {
            return None;
        };

        // each base expression may denote several classes; take the
        // cartesian product of the choices
        let mut base_lists: Vec<Vec<ObjId>> = vec![Vec::new()];
        let mut any_base = false;
        for base in &bases {
            let base_value = self.eval_simple(&caller, base, call);
            if base_value.is_any() {
                any_base = true;
                break;
            }
            let choices: Vec<ObjId> = base_value.iter().collect();
            if choices.is_empty() {
                any_base = true;
                break;
            }
            let mut extended = Vec::new();
            for prefix in &base_lists {
                for choice in &choices {
                    let mut list = prefix.clone();
                    list.push(*choice);
                    extended.push(list);
                }
            }
            base_lists = extended;
            if base_lists.len() > 16 {
                base_lists.truncate(16);
            }
        }
        if bases.is_empty() {
            base_lists = vec![vec![self.ctx.wk.object_type]];
        } else if any_base {
            base_lists = vec![vec![self.ctx.wk.bases_any]];
        }

        let class = match self.ctx.arena.class_at(call.0) {
            Some(class) => {
                let dict = self.ctx.arena.dict_of(class)?;
                self.ctx.spaces.join_into(dict, body_ns);
                let mut grew = false;
                if let AbstractObject::AnalysisClass(c) = self.ctx.arena.get_mut(class) {
                    if c.bases != base_lists {
                        c.bases = base_lists.clone();
                        grew = true;
                    }
                }
                let mros = c3_linearize(&self.ctx.arena, &self.ctx.wk, class, &base_lists);
                if let AbstractObject::AnalysisClass(c) = self.ctx.arena.get_mut(class) {
                    if c.mros != mros {
                        c.mros = mros;
                        grew = true;
                    }
                }
                if grew {
                    self.ctx.spaces.note_shared_change();
                }
                class
            }
            None => {
                let dict = self.ctx.spaces.duplicate(body_ns);
                let class = self
                    .ctx
                    .arena
                    .alloc(AbstractObject::AnalysisClass(AnalysisClass {
                        name: name.clone(),
                        module: caller.top().module.clone(),
                        def_label: call.0,
                        bases: base_lists.clone(),
                        mros: Vec::new(),
                        dict,
                    }));
                self.ctx.arena.intern_class(call.0, class);
                let mros = c3_linearize(&self.ctx.arena, &self.ctx.wk, class, &base_lists);
                if let AbstractObject::AnalysisClass(c) = self.ctx.arena.get_mut(class) {
                    c.mros = mros;
                }
                class
            }
        };

        // member functions learn their defining class, which super() needs
        let dict = self.ctx.arena.dict_of(class)?;
        let members: Vec<ObjId> = self
            .ctx
            .spaces
            .get(dict)
            .iter()
            .flat_map(|(_, binding)| binding.value.iter().collect::<Vec<ObjId>>())
            .collect();
        for member in members {
            if let AbstractObject::AnalysisFunction(f) = self.ctx.arena.get_mut(member) {
                if f.defining_class != Some(class) {
                    f.defining_class = Some(class);
                    self.ctx.spaces.note_shared_change();
                }
            }
        }

        caller.write_var(&mut self.ctx.spaces, &name, Value::of(class));
        Some(caller)
    }

    // ------------------------------------------------------------------
    // direct effects of the call families
    // ------------------------------------------------------------------

    fn transfer_getter_direct(&mut self, p1: &ProgramPoint, p2: &ProgramPoint) -> Option<State> {
        let Some(HirStmt::Expr {
            value: HirExpr::Attribute { value, attr },
        }) = self.ctx.graph.stmt(p1.0).cloned()
        else {
            return None;
        };
        let state = self.table.get(p1)?.clone();
        let objs = value
            .as_name()
            .and_then(|n| state.read_var(&self.ctx.spaces, n))?;
        let (res, _) = getattrs(self.ctx, &objs, &attr);
        if res.is_empty() {
            // attribute absent: unreachable along this path
            return None;
        }
        let copy = state.hybrid_copy(&mut self.ctx.spaces);
        if let Some(temp) = self.result_temp(p2.0) {
            copy.write_var(&mut self.ctx.spaces, &temp, res);
        }
        Some(copy)
    }

    fn transfer_setter_direct(&mut self, p1: &ProgramPoint) -> Option<State> {
        let Some(HirStmt::Assign { targets, value }) = self.ctx.graph.stmt(p1.0).cloned() else {
            return None;
        };
        let state = self.table.get(p1)?.clone();
        let Some(HirExpr::Attribute {
            value: target_value,
            attr,
        }) = targets.first().cloned()
        else {
            return None;
        };
        let objs = target_value
            .as_name()
            .and_then(|n| state.read_var(&self.ctx.spaces, n))
            .unwrap_or_default();
        let assigned = self.eval_simple(&state, &value, p1);
        setattrs(self.ctx, &objs, &attr, &assigned);
        Some(state.hybrid_copy(&mut self.ctx.spaces))
    }

    fn transfer_magic_direct(&mut self, p1: &ProgramPoint, p2: &ProgramPoint) -> Option<State> {
        let Some(HirStmt::Expr { value }) = self.ctx.graph.stmt(p1.0).cloned() else {
            return None;
        };
        let state = self.table.get(p1)?.clone();

        let read = |this: &Self, expr: &HirExpr| -> Value {
            expr.as_name()
                .and_then(|n| state.read_var(&this.ctx.spaces, n))
                .unwrap_or_default()
        };

        let direct = match &value {
            HirExpr::BinOp { left, op, right } => {
                let lv = read(self, left);
                let rv = read(self, right);
                self.numeric_binop(&lv, &rv, *op)
            }
            HirExpr::UnaryOp { op, operand } => {
                let ov = read(self, operand);
                match op {
                    UnaryOpKind::Not => Value::of(self.ctx.wk.bool_instance),
                    _ => {
                        if ov.is_any() {
                            Value::any()
                        } else {
                            self.numeric_unary(&ov)
                        }
                    }
                }
            }
            HirExpr::Compare { .. } => Value::of(self.ctx.wk.bool_instance),
            HirExpr::Subscript { value: base, .. } => {
                let bv = read(self, base);
                self.subscript_result(&bv)
            }
            _ => Value::any(),
        };

        if direct.is_empty() {
            return None;
        }
        let copy = state.hybrid_copy(&mut self.ctx.spaces);
        if let Some(temp) = self.result_temp(p2.0) {
            copy.write_var(&mut self.ctx.spaces, &temp, direct);
        }
        Some(copy)
    }

    /// `__init__` refined to a no-op: the constructed instance flows to the
    /// dummy label.
    fn transfer_special_init_direct(
        &mut self,
        p1: &ProgramPoint,
        p2: &ProgramPoint,
    ) -> Option<State> {
        let callees = self.callee_value_at(p1);
        let mut result = Value::new();
        if callees.is_any() {
            result = Value::any();
        } else {
            let objs: Vec<ObjId> = callees.iter().collect();
            for obj in objs {
                if let AbstractObject::ArtificialMethod(m) = self.ctx.arena.get(obj) {
                    result.inject(m.instance);
                }
            }
        }
        if result.is_empty() {
            return None;
        }
        let copy = self.table.get(p1)?.hybrid_copy(&mut self.ctx.spaces);
        if let Some(temp) = self.result_temp(p2.0) {
            copy.write_var(&mut self.ctx.spaces, &temp, result);
        }
        Some(copy)
    }

    /// The implicit `__new__`: each concrete analysis class allocates a
    /// fresh instance keyed by the call site and the recorded heap context.
    fn transfer_new_direct(&mut self, p1: &ProgramPoint, p2: &ProgramPoint) -> Option<State> {
        let callees = self.callee_value_at(p1);
        if callees.is_any() {
            return None;
        }
        let mut result = Value::new();
        let objs: Vec<ObjId> = callees.iter().collect();
        for obj in objs {
            if matches!(self.ctx.arena.get(obj), AbstractObject::AnalysisClass(_)) {
                let address = HeapAddress {
                    site: p1.0,
                    context: self.ctx.mode.record(p1.0, &p1.1),
                };
                self.ctx.heap.ensure(address.clone(), &mut self.ctx.spaces);
                let instance = self.ctx.arena.analysis_instance(obj, address);
                result.inject(instance);
            }
        }
        if result.is_empty() {
            return None;
        }
        let copy = self.table.get(p1)?.hybrid_copy(&mut self.ctx.spaces);
        if let Some(temp) = self.result_temp(p2.0) {
            copy.write_var(&mut self.ctx.spaces, &temp, result);
        }
        Some(copy)
    }

    /// Direct full results of a call: artificial and typeshed callables,
    /// class objects of the built-in world, and Any.
    fn transfer_call_direct(&mut self, p1: &ProgramPoint, p2: &ProgramPoint) -> Option<State> {
        let callees = self.callee_value_at(p1);
        let state = self.table.get(p1)?.clone();
        let (args, _keywords) = self.eval_call_args(&state, p1);
        let arg_values: Vec<Value> = args
            .iter()
            .map(|arg| match arg {
                Arg::Value(v) => v.clone(),
                Arg::Spread => Value::any(),
            })
            .collect();

        let mut result = Value::new();
        if callees.is_any() {
            result = Value::any();
        } else {
            let objs: Vec<ObjId> = callees.iter().collect();
            for obj in objs {
                let one = self.call_object_direct(&state, obj, &arg_values, p1);
                result.inject_value(&one);
            }
        }
        if result.is_empty() {
            return None;
        }
        let copy = state.hybrid_copy(&mut self.ctx.spaces);
        if let Some(temp) = self.result_temp(p2.0) {
            copy.write_var(&mut self.ctx.spaces, &temp, result);
        }
        Some(copy)
    }

    fn call_object_direct(
        &mut self,
        state: &State,
        obj: ObjId,
        args: &[Value],
        point: &ProgramPoint,
    ) -> Value {
        match self.ctx.arena.get(obj).clone() {
            AbstractObject::Any => Value::any(),
            AbstractObject::ArtificialFunction(f) => self.run_effect(f.effect, None, args, point),
            AbstractObject::ArtificialMethod(m) => {
                let receiver = Value::of(m.instance);
                match self.ctx.arena.get(m.function).clone() {
                    AbstractObject::ArtificialFunction(f) => {
                        self.run_effect(f.effect, Some(&receiver), args, point)
                    }
                    AbstractObject::Constructor => receiver,
                    _ => Value::new(),
                }
            }
            AbstractObject::TypeshedFunction(_) => refine_function_call(self.ctx, obj),
            AbstractObject::TypeshedClass(_) => {
                Value::of(self.ctx.arena.typeshed_instance(obj))
            }
            AbstractObject::ArtificialClass(_) => self.call_artificial_class(state, obj, args, point),
            AbstractObject::Constructor => args.first().cloned().unwrap_or_default(),
            _ => Value::new(),
        }
    }

    /// type(), the container constructors, property/classmethod/
    /// staticmethod, super, and the generic built-in classes.
    fn call_artificial_class(
        &mut self,
        state: &State,
        class: ObjId,
        args: &[Value],
        point: &ProgramPoint,
    ) -> Value {
        let wk = self.ctx.wk.clone();
        if let Some(instance) = wk.prim_instance_for_class(class) {
            return Value::of(instance);
        }
        if wk.is_container_class(class) {
            let elems = args
                .first()
                .map_or_else(Value::new, |arg| self.elems_of(arg));
            return Value::of(self.container_at(class, point, &elems));
        }
        if class == wk.property_type {
            return self.make_property(args, point);
        }
        if class == wk.classmethod_type {
            let wrapped = args.first().cloned().unwrap_or_default();
            let id = match self.ctx.arena.classmethod_at(point.0) {
                Some(id) => {
                    let mut grew = false;
                    if let AbstractObject::Classmethod(existing) = self.ctx.arena.get_mut(id) {
                        if !wrapped.le(existing) {
                            existing.inject_value(&wrapped);
                            grew = true;
                        }
                    }
                    if grew {
                        self.ctx.spaces.note_shared_change();
                    }
                    id
                }
                None => {
                    let id = self.ctx.arena.alloc(AbstractObject::Classmethod(wrapped));
                    self.ctx.arena.intern_classmethod(point.0, id);
                    id
                }
            };
            return Value::of(id);
        }
        if class == wk.staticmethod_type {
            let wrapped = args.first().cloned().unwrap_or_default();
            let id = match self.ctx.arena.staticmethod_at(point.0) {
                Some(id) => {
                    let mut grew = false;
                    if let AbstractObject::Staticmethod(existing) = self.ctx.arena.get_mut(id) {
                        if !wrapped.le(existing) {
                            existing.inject_value(&wrapped);
                            grew = true;
                        }
                    }
                    if grew {
                        self.ctx.spaces.note_shared_change();
                    }
                    id
                }
                None => {
                    let id = self.ctx.arena.alloc(AbstractObject::Staticmethod(wrapped));
                    self.ctx.arena.intern_staticmethod(point.0, id);
                    id
                }
            };
            return Value::of(id);
        }
        if class == wk.super_type {
            return self.make_super(state, args);
        }
        // a generic built-in class: a site-allocated instance
        let address = HeapAddress {
            site: point.0,
            context: self.ctx.mode.record(point.0, &point.1),
        };
        let dict = self.ctx.spaces.fresh();
        let name = self.ctx.arena.name_of(class);
        Value::of(self.ctx.arena.artificial_instance_at(
            &format!("{name} object"),
            class,
            dict,
            address,
        ))
    }

    fn make_property(&mut self, args: &[Value], point: &ProgramPoint) -> Value {
        let none = self.ctx.wk.none_instance;
        let accessor = |value: Option<&Value>| -> Value {
            let mut out = Value::new();
            if let Some(value) = value {
                for obj in value.iter() {
                    if obj != none {
                        out.inject(obj);
                    }
                }
            }
            out
        };
        let fget = accessor(args.first());
        let fset = accessor(args.get(1));
        let fdel = accessor(args.get(2));

        let id = match self.ctx.arena.property_at(point.0) {
            Some(id) => {
                let mut grew = false;
                if let AbstractObject::Property(p) = self.ctx.arena.get_mut(id) {
                    grew = !fget.le(&p.fget) || !fset.le(&p.fset) || !fdel.le(&p.fdel);
                    p.fget.inject_value(&fget);
                    p.fset.inject_value(&fset);
                    p.fdel.inject_value(&fdel);
                }
                if grew {
                    self.ctx.spaces.note_shared_change();
                }
                id
            }
            None => {
                let id = self
                    .ctx
                    .arena
                    .alloc(AbstractObject::Property(PropertyObject { fget, fset, fdel }));
                self.ctx.arena.intern_property(point.0, id);
                id
            }
        };
        Value::of(id)
    }

    /// super(): the zero-argument form reads the executing function and its
    /// receiver from the frame; the two-argument form is explicit.
    fn make_super(&mut self, state: &State, args: &[Value]) -> Value {
        let (classes, instances) = if args.len() >= 2 {
            (args[0].clone(), args[1].clone())
        } else {
            let ns = self.ctx.spaces.get(state.top().ns);
            let functions = ns.read_value(FUNCTION_SLOT).cloned().unwrap_or_default();
            let receivers = ns.read_value(SELF_SLOT).cloned().unwrap_or_default();
            let mut classes = Value::new();
            for func in functions.iter() {
                if let AbstractObject::AnalysisFunction(f) = self.ctx.arena.get(func) {
                    if let Some(defining) = f.defining_class {
                        classes.inject(defining);
                    }
                }
            }
            (classes, receivers)
        };

        if classes.is_any() || instances.is_any() {
            return Value::any();
        }
        let mut out = Value::new();
        let class_objs: Vec<ObjId> = classes.iter().collect();
        let instance_objs: Vec<ObjId> = instances.iter().collect();
        for class in &class_objs {
            for instance in &instance_objs {
                let proxy = self.ctx.arena.super_proxy(*class, *instance);
                out.inject(proxy);
            }
        }
        if out.is_empty() {
            Value::any()
        } else {
            out
        }
    }

    // ------------------------------------------------------------------
    // built-in effects
    // ------------------------------------------------------------------

    fn run_effect(
        &mut self,
        effect: BuiltinEffect,
        receiver: Option<&Value>,
        args: &[Value],
        point: &ProgramPoint,
    ) -> Value {
        let wk = self.ctx.wk.clone();
        let first = receiver.or(args.first());
        match effect {
            BuiltinEffect::ReturnInt => Value::of(wk.int_instance),
            BuiltinEffect::ReturnFloat => Value::of(wk.float_instance),
            BuiltinEffect::ReturnBool => Value::of(wk.bool_instance),
            BuiltinEffect::ReturnStr => Value::of(wk.str_instance),
            BuiltinEffect::ReturnBytes => Value::of(wk.bytes_instance),
            BuiltinEffect::ReturnNone => Value::of(wk.none_instance),
            BuiltinEffect::ReturnAny => Value::any(),
            BuiltinEffect::ReturnFirstArg => args.first().cloned().unwrap_or_else(Value::any),
            BuiltinEffect::Iter => {
                let objs = args.first().cloned().unwrap_or_default();
                self.iter_effect(&objs, point)
            }
            BuiltinEffect::Next => {
                let objs = args.first().cloned().unwrap_or_default();
                self.next_effect(&objs)
            }
            BuiltinEffect::Type => {
                if args.len() == 1 {
                    let mut out = Value::new();
                    if args[0].is_any() {
                        return Value::any();
                    }
                    for obj in args[0].iter() {
                        out.inject(class_of(self.ctx, obj));
                    }
                    out
                } else {
                    Value::any()
                }
            }
            BuiltinEffect::Dir => {
                let elems = Value::of(wk.str_instance);
                Value::of(self.container_at(wk.list_type, point, &elems))
            }
            BuiltinEffect::Vars => {
                let elems = Value::any();
                Value::of(self.container_at(wk.dict_type, point, &elems))
            }
            BuiltinEffect::ObjectInit => first.cloned().unwrap_or_default(),
            BuiltinEffect::ContainerAdd => {
                if let (Some(receiver), Some(arg)) = (receiver, args.first()) {
                    self.join_into_elements(receiver, arg);
                }
                Value::of(wk.none_instance)
            }
            BuiltinEffect::ContainerExtend => {
                if let (Some(receiver), Some(arg)) = (receiver, args.first()) {
                    let elems = self.elems_of(arg);
                    self.join_into_elements(receiver, &elems);
                }
                Value::of(wk.none_instance)
            }
            BuiltinEffect::ContainerElement => receiver
                .map(|r| self.elems_of(r))
                .unwrap_or_else(Value::any),
            BuiltinEffect::ContainerIter => {
                let elems = receiver.map(|r| self.elems_of(r)).unwrap_or_default();
                Value::of(self.container_at(wk.iterator_type, point, &elems))
            }
        }
    }

    /// iter(objs): a getattr for `__iter__`, binding discovered methods;
    /// containers yield a concrete iterator.
    fn iter_effect(&mut self, objs: &Value, point: &ProgramPoint) -> Value {
        if objs.is_any() {
            return Value::any();
        }
        let mut out = Value::new();
        let targets: Vec<ObjId> = objs.iter().collect();
        for obj in targets {
            match self.ctx.arena.get(obj).clone() {
                AbstractObject::ArtificialInstance(i) => {
                    let class = i.class;
                    if self.ctx.wk.is_container_class(class)
                        || class == self.ctx.wk.range_type
                        || class == self.ctx.wk.generator_type
                    {
                        let elems = self.elems_of(&Value::of(obj));
                        out.inject(self.container_at(self.ctx.wk.iterator_type, point, &elems));
                    } else if class == self.ctx.wk.str_type {
                        let elems = Value::of(self.ctx.wk.str_instance);
                        out.inject(self.container_at(self.ctx.wk.iterator_type, point, &elems));
                    } else {
                        out.inject_value(&Value::any());
                    }
                }
                AbstractObject::AnalysisInstance(_) => {
                    let (res, _) = getattrs(self.ctx, &Value::of(obj), "__iter__");
                    out.inject_value(&res);
                }
                AbstractObject::TypeshedInstance(_) => out.inject_value(&Value::any()),
                _ => out.inject_value(&Value::any()),
            }
        }
        out
    }

    fn next_effect(&mut self, objs: &Value) -> Value {
        if objs.is_any() {
            return Value::any();
        }
        let mut out = Value::new();
        let targets: Vec<ObjId> = objs.iter().collect();
        for obj in targets {
            match self.ctx.arena.get(obj).clone() {
                AbstractObject::ArtificialInstance(_) => {
                    let elems = self.elems_of(&Value::of(obj));
                    out.inject_value(&elems);
                }
                AbstractObject::AnalysisInstance(_) => {
                    let (res, _) = getattrs(self.ctx, &Value::of(obj), "__next__");
                    out.inject_value(&res);
                }
                _ => out.inject_value(&Value::any()),
            }
        }
        out
    }

    // ------------------------------------------------------------------
    // imports
    // ------------------------------------------------------------------

    fn transfer_import(
        &mut self,
        _p1: &ProgramPoint,
        state: State,
        module: &str,
        asname: Option<&str>,
    ) -> Option<State> {
        let (bound_name, target_module) = match asname {
            Some(asname) => (asname.to_string(), module.to_string()),
            None => {
                let top = module.split('.').next().unwrap_or(module).to_string();
                (top.clone(), top)
            }
        };
        let value = self.import_module_value(&target_module);
        state.write_var(&mut self.ctx.spaces, &bound_name, value);
        Some(state)
    }

    fn transfer_import_from(
        &mut self,
        _p1: &ProgramPoint,
        state: State,
        module: Option<&str>,
        names: &[(String, Option<String>)],
        level: u32,
    ) -> Option<State> {
        let resolved = resolve_relative_module(&state.top().module, module, level);
        let Some(source) = resolved else {
            for (name, asname) in names {
                let bound = asname.as_deref().unwrap_or(name);
                state.write_var(&mut self.ctx.spaces, bound, Value::any());
            }
            return Some(state);
        };

        let module_value = self.import_module_value(&source);
        for (name, asname) in names {
            let bound = asname.as_deref().unwrap_or(name);
            let (mut value, _) = getattrs(self.ctx, &module_value, name);
            if value.is_empty() {
                // maybe a submodule rather than an attribute
                value = self.import_module_value(&format!("{source}.{name}"));
            }
            state.write_var(&mut self.ctx.spaces, bound, value);
        }
        Some(state)
    }

    /// Source modules on the analysis path are analyzed to a nested fixed
    /// point; stdlib names fall back to stub ingestion; missing both means
    /// Any plus a warning.
    fn import_module_value(&mut self, module: &str) -> Value {
        if let Some(entry) = self.ctx.modules.get(module) {
            match entry {
                ModuleEntry::Ready(id) | ModuleEntry::InProgress(id) => return Value::of(*id),
                ModuleEntry::Missing => return Value::any(),
            }
        }

        if let Some(path) = self.find_module_file(module) {
            let analyzed = {
                let child = Analysis::for_module(&mut *self.ctx, module, &path);
                match child {
                    Ok(mut child) => child.compute_fixed_point().ok(),
                    Err(err) => {
                        warn!(module, %err, "skipping unanalyzable module");
                        None
                    }
                }
            };
            if let Some(module_obj) = analyzed {
                return Value::of(module_obj);
            }
        }

        match parse_typeshed_module(self.ctx, module) {
            Ok(stub) => {
                let resolved = resolve_typeshed_value(self.ctx, &Value::of(stub));
                let mut out = Value::new();
                if resolved.is_any() {
                    return Value::any();
                }
                let objs: Vec<ObjId> = resolved.iter().collect();
                for obj in objs {
                    let refined = refine_typeshed(self.ctx, obj);
                    out.inject_value(&refined);
                }
                out
            }
            Err(err) => {
                warn!(module, %err, "import degrades to Any");
                self.ctx
                    .modules
                    .insert(module.to_string(), ModuleEntry::Missing);
                Value::any()
            }
        }
    }

    fn find_module_file(&self, module: &str) -> Option<PathBuf> {
        let relative = module.replace('.', "/");
        for root in &self.ctx.analysis_paths {
            let flat = root.join(format!("{relative}.py"));
            if flat.exists() {
                return Some(flat);
            }
            let package = root.join(&relative).join("__init__.py");
            if package.exists() {
                return Some(package);
            }
        }
        None
    }

    // ------------------------------------------------------------------
    // evaluation helpers
    // ------------------------------------------------------------------

    /// Evaluate a decomposed (literal / name / container) expression.
    pub(crate) fn eval_simple(
        &mut self,
        state: &State,
        expr: &HirExpr,
        point: &ProgramPoint,
    ) -> Value {
        let wk = self.ctx.wk.clone();
        match expr {
            HirExpr::Literal(lit) => {
                let obj = match lit {
                    Literal::Int => wk.int_instance,
                    Literal::Float => wk.float_instance,
                    Literal::Complex => wk.complex_instance,
                    Literal::Str(_) => wk.str_instance,
                    Literal::Bytes => wk.bytes_instance,
                    Literal::Bool(_) => wk.bool_instance,
                    Literal::None => wk.none_instance,
                    Literal::Ellipsis => wk.ellipsis_instance,
                };
                Value::of(obj)
            }
            HirExpr::Name(name) => state
                .read_var(&self.ctx.spaces, name)
                .unwrap_or_else(|| {
                    debug!(name, "unbound name evaluates to the empty value");
                    Value::new()
                }),
            HirExpr::List { elts } => self.container_literal(state, wk.list_type, elts, point),
            HirExpr::Tuple { elts } => self.container_literal(state, wk.tuple_type, elts, point),
            HirExpr::Set { elts } => self.container_literal(state, wk.set_type, elts, point),
            HirExpr::Dict { keys, values } => {
                let mut elems = Value::new();
                for key in keys.iter().flatten() {
                    let v = self.eval_simple(state, key, point);
                    elems.inject_value(&v);
                }
                for value in values {
                    let v = self.eval_simple(state, value, point);
                    elems.inject_value(&v);
                }
                Value::of(self.container_at(wk.dict_type, point, &elems))
            }
            HirExpr::JoinedStr { .. } | HirExpr::FormattedValue { .. } => {
                Value::of(wk.str_instance)
            }
            HirExpr::Slice { .. } => Value::of(wk.slice_instance),
            HirExpr::Starred { .. } | HirExpr::Yield { .. } | HirExpr::YieldFrom { .. } => {
                Value::any()
            }
            _ => Value::any(),
        }
    }

    fn container_literal(
        &mut self,
        state: &State,
        class: ObjId,
        elts: &[HirExpr],
        point: &ProgramPoint,
    ) -> Value {
        let mut elems = Value::new();
        for elt in elts {
            let v = self.eval_simple(state, elt, point);
            if matches!(elt, HirExpr::Starred { .. }) {
                elems.inject_value(&Value::any());
            } else {
                elems.inject_value(&v);
            }
        }
        Value::of(self.container_at(class, point, &elems))
    }

    /// A container instance at an allocation site; repeated transfer of the
    /// site joins elements into the same instance.
    fn container_at(&mut self, class: ObjId, point: &ProgramPoint, elems: &Value) -> ObjId {
        let address = HeapAddress {
            site: point.0,
            context: self.ctx.mode.record(point.0, &point.1),
        };
        let dict = self.ctx.spaces.fresh();
        let name = self.ctx.arena.name_of(class);
        let instance = self.ctx.arena.artificial_instance_at(
            &format!("{name} object"),
            class,
            dict,
            address,
        );
        if let Some(dict) = self.ctx.arena.dict_of(instance) {
            self.ctx.spaces.join_value(dict, ELEMS_SLOT, elems);
        }
        instance
    }

    /// The element slot of container values; unknown shapes widen to Any.
    pub(crate) fn elems_of(&mut self, objs: &Value) -> Value {
        if objs.is_any() {
            return Value::any();
        }
        let mut out = Value::new();
        let targets: Vec<ObjId> = objs.iter().collect();
        for obj in targets {
            match self.ctx.arena.get(obj) {
                AbstractObject::ArtificialInstance(_) => {
                    let elems = instance_dict(self.ctx, obj)
                        .and_then(|ns| self.ctx.spaces.get(ns).read_value(ELEMS_SLOT).cloned());
                    match elems {
                        Some(elems) => out.inject_value(&elems),
                        None => out.inject_value(&Value::any()),
                    }
                }
                _ => out.inject_value(&Value::any()),
            }
        }
        out
    }

    fn join_into_elements(&mut self, containers: &Value, value: &Value) {
        if containers.is_any() {
            return;
        }
        let targets: Vec<ObjId> = containers.iter().collect();
        for obj in targets {
            if matches!(self.ctx.arena.get(obj), AbstractObject::ArtificialInstance(_)) {
                if let Some(dict) = self.ctx.arena.dict_of(obj) {
                    self.ctx.spaces.join_value(dict, ELEMS_SLOT, value);
                }
            }
        }
    }

    fn generator_instance(&mut self, call: &ProgramPoint, yielded: &Value) -> Value {
        let class = self.ctx.wk.generator_type;
        Value::of(self.container_at(class, call, yielded))
    }

    fn numeric_unary(&mut self, operand: &Value) -> Value {
        let wk = &self.ctx.wk;
        let mut out = Value::new();
        for obj in operand.iter() {
            if obj == wk.int_instance || obj == wk.bool_instance {
                out.inject(wk.int_instance);
            } else if obj == wk.float_instance {
                out.inject(wk.float_instance);
            } else if obj == wk.complex_instance {
                out.inject(wk.complex_instance);
            }
        }
        if out.is_empty() {
            Value::any()
        } else {
            out
        }
    }

    /// Direct results of operator forms over primitive operands; user
    /// instances dispatch through their dunder methods instead.
    fn numeric_binop(&mut self, lv: &Value, rv: &Value, op: BinOp) -> Value {
        if lv.is_any() || rv.is_any() {
            return Value::any();
        }
        let wk = self.ctx.wk.clone();
        let mut out = Value::new();
        for left in lv.iter() {
            for right in rv.iter() {
                let num_rank = |obj: ObjId| -> Option<u8> {
                    if obj == wk.bool_instance || obj == wk.int_instance {
                        Some(0)
                    } else if obj == wk.float_instance {
                        Some(1)
                    } else if obj == wk.complex_instance {
                        Some(2)
                    } else {
                        None
                    }
                };
                match (num_rank(left), num_rank(right)) {
                    (Some(a), Some(b)) => {
                        let rank = a.max(b);
                        let result = if matches!(op, BinOp::Div) && rank == 0 {
                            wk.float_instance
                        } else {
                            match rank {
                                0 => wk.int_instance,
                                1 => wk.float_instance,
                                _ => wk.complex_instance,
                            }
                        };
                        out.inject(result);
                    }
                    _ => {
                        let str_like = left == wk.str_instance || right == wk.str_instance;
                        let bytes_like =
                            left == wk.bytes_instance || right == wk.bytes_instance;
                        if str_like && matches!(op, BinOp::Add | BinOp::Mod | BinOp::Mult) {
                            out.inject(wk.str_instance);
                        } else if bytes_like && matches!(op, BinOp::Add | BinOp::Mod | BinOp::Mult)
                        {
                            out.inject(wk.bytes_instance);
                        } else if matches!(
                            (self.ctx.arena.get(left), op),
                            (AbstractObject::ArtificialInstance(_), BinOp::Add)
                        ) {
                            // container concatenation keeps the shapes
                            out.inject(left);
                            out.inject(right);
                        }
                    }
                }
            }
        }
        out
    }

    fn subscript_result(&mut self, base: &Value) -> Value {
        if base.is_any() {
            return Value::any();
        }
        let wk = self.ctx.wk.clone();
        let mut out = Value::new();
        let targets: Vec<ObjId> = base.iter().collect();
        for obj in targets {
            match self.ctx.arena.get(obj).clone() {
                AbstractObject::ArtificialInstance(i) => {
                    if i.class == wk.str_type {
                        out.inject(wk.str_instance);
                    } else {
                        let elems = self.elems_of(&Value::of(obj));
                        out.inject_value(&elems);
                    }
                }
                AbstractObject::TypeshedInstance(_) => out.inject_value(&Value::any()),
                AbstractObject::AnalysisInstance(_) => {
                    // __getitem__ dispatch happens inter-procedurally
                }
                _ => out.inject_value(&Value::any()),
            }
        }
        out
    }

    // ------------------------------------------------------------------
    // call plumbing
    // ------------------------------------------------------------------

    fn callee_value_at(&mut self, p1: &ProgramPoint) -> Value {
        let Some(HirStmt::Expr {
            value: HirExpr::Call { func, .. },
        }) = self.ctx.graph.stmt(p1.0).cloned()
        else {
            return Value::new();
        };
        let Some(state) = self.table.get(p1) else {
            return Value::new();
        };
        func.as_name()
            .and_then(|name| state.read_var(&self.ctx.spaces, name))
            .unwrap_or_default()
    }

    fn eval_call_args(
        &mut self,
        state: &State,
        p1: &ProgramPoint,
    ) -> (Vec<Arg>, Vec<(String, Value)>) {
        let Some(HirStmt::Expr {
            value: HirExpr::Call { args, keywords, .. },
        }) = self.ctx.graph.stmt(p1.0).cloned()
        else {
            return (Vec::new(), Vec::new());
        };

        let mut positional = Vec::with_capacity(args.len());
        for arg in &args {
            match arg {
                HirExpr::Starred { .. } => positional.push(Arg::Spread),
                other => positional.push(Arg::Value(self.eval_simple(state, other, p1))),
            }
        }
        let mut named = Vec::with_capacity(keywords.len());
        for (name, value) in &keywords {
            let evaluated = self.eval_simple(state, value, p1);
            match name {
                Some(name) => named.push((name.clone(), evaluated)),
                None => positional.push(Arg::Spread),
            }
        }
        (positional, named)
    }

    /// Bind callee parameters: positionally, then by keyword, then from
    /// captured defaults; a spread argument widens the rest to Any.
    fn bind_parameters(
        &mut self,
        callee: &State,
        f: &AnalysisFunction,
        positional: &[Arg],
        keywords: &[(String, Value)],
    ) {
        let Some(HirStmt::FunctionDef { params, .. }) =
            self.ctx.graph.stmt(f.def_label).cloned()
        else {
            return;
        };

        let mut spread_seen = false;
        for (index, param) in params.args.iter().enumerate() {
            let value = match positional.get(index) {
                Some(Arg::Value(value)) if !spread_seen => Some(value.clone()),
                Some(Arg::Spread) => {
                    spread_seen = true;
                    Some(Value::any())
                }
                _ if spread_seen => Some(Value::any()),
                _ => None,
            };
            let value = value
                .or_else(|| {
                    keywords
                        .iter()
                        .find(|(name, _)| name == &param.name)
                        .map(|(_, v)| v.clone())
                })
                .or_else(|| f.defaults.get(&param.name).cloned())
                .unwrap_or_else(Value::any);
            callee.write_var(&mut self.ctx.spaces, &param.name, value);
        }
        for param in &params.kwonlyargs {
            let value = keywords
                .iter()
                .find(|(name, _)| name == &param.name)
                .map(|(_, v)| v.clone())
                .or_else(|| f.defaults.get(&param.name).cloned())
                .unwrap_or_else(Value::any);
            callee.write_var(&mut self.ctx.spaces, &param.name, value);
        }
        if let Some(vararg) = &params.vararg {
            callee.write_var(&mut self.ctx.spaces, vararg, Value::any());
        }
        if let Some(kwarg) = &params.kwarg {
            callee.write_var(&mut self.ctx.spaces, kwarg, Value::any());
        }
    }

    fn resolve_globals(&self, caller: &State, f: &AnalysisFunction) -> crate::namespace::NsId {
        if f.module == caller.top().module {
            return caller.top().globals;
        }
        match self.ctx.modules.get(&f.module) {
            Some(ModuleEntry::Ready(id) | ModuleEntry::InProgress(id)) => {
                match self.ctx.arena.get(*id) {
                    AbstractObject::AnalysisModule(m) => m.globals,
                    _ => caller.top().globals,
                }
            }
            _ => caller.top().globals,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Arg {
    Value(Value),
    Spread,
}

/// Resolve a possibly-relative import against the importing module.
fn resolve_relative_module(current: &str, module: Option<&str>, level: u32) -> Option<String> {
    if level == 0 {
        return module.map(ToString::to_string);
    }
    let mut components: Vec<&str> = current.split('.').collect();
    let keep = components.len().checked_sub(level as usize)?;
    components.truncate(keep);
    let base = components.join(".");
    match module {
        Some(named) if base.is_empty() => Some(named.to_string()),
        Some(named) => Some(format!("{base}.{named}")),
        None if base.is_empty() => None,
        None => Some(base),
    }
}

