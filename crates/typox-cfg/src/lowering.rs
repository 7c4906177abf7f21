//! Lowering from HIR statements into a CFG of three-address basic blocks.
//!
//! Every compound expression is decomposed into a sequence of statements
//! whose value is a literal, a name, or a single-operator form referring
//! only to names; fresh temporaries are named `_var{N}`. Container literals
//! keep their shape (elements are decomposed, the container is not).

use indexmap::IndexMap;
use tracing::debug;

use crate::cfg::{
    BasicBlock, CallReturnFlow, Cfg, ClassdefFlow, Label, LabelGenerator, TempNames, TripleFlow,
};
use crate::error::{LoweringError, LoweringResult};
use crate::hir::{
    BoolOpKind, Comprehension, HirExpr, HirStmt, Literal, Params, Symbol, UnaryOpKind,
    WithItem,
};

/// Lower a module body into a CFG. `labels` must be shared across every
/// module lowered for one analysis so merged block maps cannot collide.
pub fn lower_module(
    name: &str,
    body: Vec<HirStmt>,
    labels: &mut LabelGenerator,
    temps: &mut TempNames,
) -> LoweringResult<Cfg> {
    let builder = CfgBuilder::new(name, labels, temps);
    builder.build(body)
}

struct CfgBuilder<'g> {
    labels: &'g mut LabelGenerator,
    temps: &'g mut TempNames,
    cfg: Cfg,
    edges: IndexMap<(Label, Label), ()>,
    curr: Label,
    after_loop_stack: Vec<Label>,
    loop_guard_stack: Vec<Label>,
    final_entry_stack: Vec<Label>,
    final_exit_stack: Vec<Label>,
    /// name -> (fget, fset, fdel) collected from decorated definitions
    properties: IndexMap<Symbol, [Option<Symbol>; 3]>,
    is_generator: bool,
}

impl<'g> CfgBuilder<'g> {
    fn new(name: &str, labels: &'g mut LabelGenerator, temps: &'g mut TempNames) -> Self {
        Self {
            labels,
            temps,
            cfg: Cfg::new(name),
            edges: IndexMap::new(),
            curr: Label(0),
            after_loop_stack: Vec::new(),
            loop_guard_stack: Vec::new(),
            final_entry_stack: Vec::new(),
            final_exit_stack: Vec::new(),
            properties: IndexMap::new(),
            is_generator: false,
        }
    }

    fn build(mut self, body: Vec<HirStmt>) -> LoweringResult<Cfg> {
        let start = self.new_block();
        self.set_stmt(start, HirStmt::Pass);
        self.cfg.entry = start;

        let exit = self.new_block();
        self.set_stmt(exit, HirStmt::Pass);
        self.cfg.exit = exit;

        let first = self.new_block();
        self.add_edge(start, first);
        self.curr = first;

        for stmt in body {
            self.lower_stmt(stmt)?;
        }
        self.unify_properties()?;

        self.add_edge(self.curr, exit);

        self.remove_empty_blocks();
        self.refactor_flows_and_labels();
        self.cfg.is_generator = self.is_generator;
        debug!(
            name = %self.cfg.name,
            blocks = self.cfg.blocks.len(),
            flows = self.cfg.flows.len(),
            "lowered module"
        );
        Ok(self.cfg)
    }

    fn new_block(&mut self) -> Label {
        let id = self.labels.fresh();
        self.cfg.blocks.insert(id, BasicBlock::new(id));
        id
    }

    fn set_stmt(&mut self, label: Label, stmt: HirStmt) {
        let block = &mut self.cfg.blocks[&label];
        debug_assert!(block.stmt.is_none(), "block {label} already holds a statement");
        block.stmt = Some(stmt);
    }

    fn add_edge(&mut self, from: Label, to: Label) -> Label {
        let from_block = &mut self.cfg.blocks[&from];
        if !from_block.next.contains(&to) {
            from_block.next.push(to);
        }
        let to_block = &mut self.cfg.blocks[&to];
        if !to_block.prev.contains(&from) {
            to_block.prev.push(from);
        }
        self.edges.insert((from, to), ());
        to
    }

    fn remove_edge(&mut self, from: Label, to: Label) {
        self.edges.shift_remove(&(from, to));
        if let Some(b) = self.cfg.blocks.get_mut(&from) {
            b.next.retain(|l| *l != to);
        }
        if let Some(b) = self.cfg.blocks.get_mut(&to) {
            b.prev.retain(|l| *l != from);
        }
    }

    /// Emit a statement into the current block and open a successor.
    fn emit(&mut self, stmt: HirStmt) {
        self.set_stmt(self.curr, stmt);
        let next = self.new_block();
        self.curr = self.add_edge(self.curr, next);
    }

    fn add_loop_block(&mut self) -> Label {
        let curr = &self.cfg.blocks[&self.curr];
        if curr.is_empty() && !curr.has_next() {
            self.curr
        } else {
            let block = self.new_block();
            self.add_edge(self.curr, block)
        }
    }

    fn populate_body(&mut self, body: Vec<HirStmt>) -> LoweringResult<()> {
        for stmt in body {
            self.lower_stmt(stmt)?;
        }
        Ok(())
    }

    fn populate_body_to(&mut self, body: Vec<HirStmt>, to: Label) -> LoweringResult<()> {
        self.populate_body(body)?;
        if !self.cfg.blocks[&self.curr].has_next() {
            self.add_edge(self.curr, to);
        }
        Ok(())
    }

    fn lower_stmt(&mut self, stmt: HirStmt) -> LoweringResult<()> {
        match stmt {
            HirStmt::FunctionDef {
                name,
                params,
                body,
                decorators,
            } => self.lower_function_def(name, params, body, decorators),
            HirStmt::ClassDef {
                name,
                bases,
                body,
                decorators,
            } => self.lower_class_def(name, bases, body, decorators),
            HirStmt::Return { value } => self.lower_return(value),
            HirStmt::Delete { targets } => self.lower_delete(targets),
            HirStmt::Assign { targets, value } => self.lower_assign(targets, value),
            HirStmt::AugAssign { target, op, value } => self.lower_assign(
                vec![target.clone()],
                HirExpr::BinOp {
                    left: Box::new(target),
                    op,
                    right: Box::new(value),
                },
            ),
            HirStmt::AnnAssign { target, value, .. } => {
                // annotations carry no analysis weight outside stubs
                if let Some(value) = value {
                    self.lower_assign(vec![target], value)?;
                }
                Ok(())
            }
            HirStmt::For {
                target,
                iter,
                body,
                orelse,
            } => self.lower_for(target, iter, body, orelse),
            HirStmt::While { test, body, orelse } => self.lower_while(test, body, orelse),
            HirStmt::If { test, body, orelse } => self.lower_if(test, body, orelse),
            HirStmt::With { items, body } => self.lower_with(items, body),
            HirStmt::Raise { .. } => {
                // routed through finally entry, then to function exit
                if !self.final_entry_stack.is_empty() && !self.final_exit_stack.is_empty() {
                    self.lower_return(None)
                } else {
                    self.lower_stmt(HirStmt::Pass)
                }
            }
            HirStmt::Try {
                body,
                handlers: _,
                orelse,
                finalbody,
            } => self.lower_try(body, orelse, finalbody),
            HirStmt::Assert { test, msg } => self.lower_assert(test, msg),
            HirStmt::Import { .. } | HirStmt::ImportFrom { .. } => {
                self.emit(stmt);
                Ok(())
            }
            HirStmt::Global { names } => {
                for name in names {
                    self.emit(HirStmt::Global { names: vec![name] });
                }
                Ok(())
            }
            HirStmt::Nonlocal { names } => {
                for name in names {
                    self.emit(HirStmt::Nonlocal { names: vec![name] });
                }
                Ok(())
            }
            HirStmt::Expr { value } => {
                let temp = self.temps.fresh();
                self.lower_assign(vec![HirExpr::Name(temp)], value)
            }
            HirStmt::Pass => {
                self.emit(HirStmt::Pass);
                Ok(())
            }
            HirStmt::Break => {
                self.set_stmt(self.curr, HirStmt::Break);
                let after_loop = *self
                    .after_loop_stack
                    .last()
                    .ok_or_else(|| LoweringError::unsupported("break outside loop"))?;
                if !self.final_entry_stack.is_empty() && !self.final_exit_stack.is_empty() {
                    let final_entry = *self.final_entry_stack.last().unwrap_or(&after_loop);
                    let final_exit = *self.final_exit_stack.last().unwrap_or(&after_loop);
                    self.add_edge(self.curr, final_entry);
                    self.add_edge(final_exit, after_loop);
                } else {
                    self.add_edge(self.curr, after_loop);
                }
                self.curr = self.new_block();
                Ok(())
            }
            HirStmt::Continue => {
                self.set_stmt(self.curr, HirStmt::Continue);
                if let Some(final_entry) = self.final_entry_stack.last() {
                    self.add_edge(self.curr, *final_entry);
                } else {
                    let guard = *self
                        .loop_guard_stack
                        .last()
                        .ok_or_else(|| LoweringError::unsupported("continue outside loop"))?;
                    self.add_edge(self.curr, guard);
                }
                self.curr = self.new_block();
                Ok(())
            }
        }
    }

    fn lower_function_def(
        &mut self,
        mut name: Symbol,
        mut params: Params,
        body: Vec<HirStmt>,
        decorators: Vec<HirExpr>,
    ) -> LoweringResult<()> {
        let mut decorators = decorators;
        if let Some(kind) = property_decorator_kind(&decorators) {
            if decorators.len() > 1 {
                return Err(LoweringError::unsupported(
                    "stacked decorators on a property accessor",
                ));
            }
            match kind {
                PropertyKind::Getter => {
                    self.properties.entry(name.clone()).or_default()[0] = Some(name.clone());
                }
                PropertyKind::Setter(owner) => {
                    let temp = self.temps.fresh();
                    name = temp.clone();
                    self.properties.entry(owner).or_default()[1] = Some(temp);
                }
                PropertyKind::Deleter(owner) => {
                    let temp = self.temps.fresh();
                    name = temp.clone();
                    self.properties.entry(owner).or_default()[2] = Some(temp);
                }
            }
            decorators.clear();
        }

        // decompose default expressions ahead of the definition block
        let mut seq = Vec::new();
        for param in params.args.iter_mut().chain(params.kwonlyargs.iter_mut()) {
            if let Some(default) = param.default.take() {
                let (stmts, simplified) = self.decompose_name(*default)?;
                seq.extend(stmts);
                param.default = Some(Box::new(simplified));
            }
        }
        self.populate_body(seq)?;

        let def_label = self.curr;
        let sub_builder = CfgBuilder::new(&name, &mut *self.labels, &mut *self.temps);
        let func_cfg = sub_builder.build(body)?;
        self.cfg.sub_cfgs.insert(def_label, func_cfg);

        self.emit(HirStmt::FunctionDef {
            name: name.clone(),
            params,
            body: Vec::new(),
            decorators: Vec::new(),
        });

        self.lower_decorators(&name, decorators)
    }

    fn lower_class_def(
        &mut self,
        name: Symbol,
        bases: Vec<HirExpr>,
        body: Vec<HirStmt>,
        decorators: Vec<HirExpr>,
    ) -> LoweringResult<()> {
        // bases become plain names so the engine can read them off the block
        let mut base_names = Vec::with_capacity(bases.len());
        let mut seq = Vec::new();
        for base in bases {
            let (stmts, simplified) = self.decompose_name(base)?;
            seq.extend(stmts);
            base_names.push(simplified);
        }
        self.populate_body(seq)?;

        let class_stmt = HirStmt::ClassDef {
            name: name.clone(),
            bases: base_names,
            body: Vec::new(),
            decorators: Vec::new(),
        };

        let call_block = self.curr;
        self.set_stmt(call_block, class_stmt.clone());

        let sub_builder = CfgBuilder::new(&name, &mut *self.labels, &mut *self.temps);
        let class_cfg = sub_builder.build(body)?;
        self.cfg.sub_cfgs.insert(call_block, class_cfg);

        let return_block = self.new_block();
        self.add_edge(call_block, return_block);
        self.set_stmt(return_block, class_stmt);

        self.cfg.classdef_flows.insert(ClassdefFlow {
            call: call_block,
            ret: return_block,
        });
        let next = self.new_block();
        self.curr = self.add_edge(return_block, next);

        self.lower_decorators(&name, decorators)
    }

    fn lower_decorators(
        &mut self,
        name: &str,
        decorators: Vec<HirExpr>,
    ) -> LoweringResult<()> {
        let mut seq = Vec::new();
        for decorator in decorators.into_iter().rev() {
            seq.push(HirStmt::Assign {
                targets: vec![HirExpr::name(name)],
                value: HirExpr::Call {
                    func: Box::new(decorator),
                    args: vec![HirExpr::name(name)],
                    keywords: Vec::new(),
                },
            });
        }
        self.populate_body(seq)
    }

    fn lower_return(&mut self, value: Option<HirExpr>) -> LoweringResult<()> {
        let value = value.unwrap_or(HirExpr::Literal(Literal::None));
        let (seq, simplified) = self.decompose_name(value)?;
        self.populate_body(seq)?;
        self.set_stmt(
            self.curr,
            HirStmt::Return {
                value: Some(simplified),
            },
        );

        if let (Some(final_entry), Some(final_exit)) = (
            self.final_entry_stack.last().copied(),
            self.final_exit_stack.last().copied(),
        ) {
            self.add_edge(self.curr, final_entry);
            self.add_edge(final_exit, self.cfg.exit);
        } else {
            self.add_edge(self.curr, self.cfg.exit);
        }
        self.curr = self.new_block();
        Ok(())
    }

    fn lower_delete(&mut self, targets: Vec<HirExpr>) -> LoweringResult<()> {
        for target in targets {
            let (seq, simplified) = self.decompose_parts(target)?;
            self.populate_body(seq)?;
            self.emit(HirStmt::Delete {
                targets: vec![simplified],
            });
        }
        Ok(())
    }

    fn lower_assign(&mut self, targets: Vec<HirExpr>, value: HirExpr) -> LoweringResult<()> {
        let delete_accumulator = matches!(
            value,
            HirExpr::ListComp { .. } | HirExpr::SetComp { .. } | HirExpr::DictComp { .. }
        );
        let (seq, simplified) = self.decompose_parts(value)?;
        if !seq.is_empty() {
            self.populate_body(seq)?;
            self.lower_assign(targets, simplified.clone())?;
            if delete_accumulator {
                if let HirExpr::Name(acc) = simplified {
                    self.lower_delete(vec![HirExpr::Name(acc)])?;
                }
            }
            return Ok(());
        }

        let result = match simplified {
            HirExpr::Call { .. } => self.lower_call_protocol(simplified)?,
            HirExpr::Attribute { .. } => {
                self.lower_triple(simplified, TripleKind::Getter)?
            }
            HirExpr::BinOp { .. }
            | HirExpr::UnaryOp { .. }
            | HirExpr::Compare { .. }
            | HirExpr::Subscript { .. } => self.lower_triple(simplified, TripleKind::Magic)?,
            other => other,
        };

        for target in targets {
            self.lower_single_target(target, result.clone())?;
        }
        Ok(())
    }

    /// The full constructor-call protocol: implicit `__new__`, a
    /// descriptor-capable `__init__` lookup, and the `__init__` call, each
    /// with a return and a dummy label.
    fn lower_call_protocol(&mut self, call: HirExpr) -> LoweringResult<HirExpr> {
        let HirExpr::Call {
            func,
            args,
            keywords,
        } = call
        else {
            return Err(LoweringError::unsupported("non-call in call protocol"));
        };

        let call_block = self.curr;
        self.set_stmt(
            call_block,
            HirStmt::Expr {
                value: HirExpr::Call {
                    func,
                    args: args.clone(),
                    keywords: keywords.clone(),
                },
            },
        );

        let new_var = self.temps.fresh();
        let new_return = self.new_block();
        self.add_edge(call_block, new_return);
        self.set_stmt(
            new_return,
            HirStmt::Expr {
                value: HirExpr::name(&new_var),
            },
        );

        let new_dummy = self.new_block();
        self.add_edge(new_return, new_dummy);
        self.set_stmt(
            new_dummy,
            HirStmt::Expr {
                value: HirExpr::name(&new_var),
            },
        );
        self.cfg.dummy_labels.insert(new_dummy);

        let init_lookup = self.new_block();
        self.add_edge(new_dummy, init_lookup);
        self.set_stmt(
            init_lookup,
            HirStmt::Expr {
                value: HirExpr::Attribute {
                    value: Box::new(HirExpr::name(&new_var)),
                    attr: "__init__".to_string(),
                },
            },
        );

        let init_var = self.temps.fresh();
        let init_lookup_return = self.new_block();
        self.add_edge(init_lookup, init_lookup_return);
        self.set_stmt(
            init_lookup_return,
            HirStmt::Expr {
                value: HirExpr::name(&init_var),
            },
        );

        let init_lookup_dummy = self.new_block();
        self.add_edge(init_lookup_return, init_lookup_dummy);
        self.set_stmt(
            init_lookup_dummy,
            HirStmt::Expr {
                value: HirExpr::name(&init_var),
            },
        );
        self.cfg.dummy_labels.insert(init_lookup_dummy);

        let init_call = self.new_block();
        self.add_edge(init_lookup_dummy, init_call);
        self.set_stmt(
            init_call,
            HirStmt::Expr {
                value: HirExpr::Call {
                    func: Box::new(HirExpr::name(&init_var)),
                    args,
                    keywords,
                },
            },
        );

        let result_var = self.temps.fresh();
        let init_return = self.new_block();
        self.add_edge(init_call, init_return);
        self.set_stmt(
            init_return,
            HirStmt::Expr {
                value: HirExpr::name(&result_var),
            },
        );

        let init_dummy = self.new_block();
        self.add_edge(init_return, init_dummy);
        self.set_stmt(
            init_dummy,
            HirStmt::Expr {
                value: HirExpr::name(&result_var),
            },
        );
        self.cfg.dummy_labels.insert(init_dummy);

        self.cfg.call_return_flows.insert(CallReturnFlow {
            call: call_block,
            new_return,
            new_dummy,
            init_lookup,
            init_lookup_return,
            init_lookup_dummy,
            init_call,
            init_return,
            init_dummy,
        });
        self.cfg.special_init_flows.insert(TripleFlow {
            call: init_call,
            ret: init_return,
            dummy: init_dummy,
        });
        self.cfg.getter_flows.insert(TripleFlow {
            call: init_lookup,
            ret: init_lookup_return,
            dummy: init_lookup_dummy,
        });

        self.curr = init_dummy;
        let next = self.new_block();
        self.curr = self.add_edge(self.curr, next);
        Ok(HirExpr::name(&result_var))
    }

    /// A (call, return, dummy) triple for attribute reads and operator or
    /// subscript forms that may dispatch to dunder methods.
    fn lower_triple(&mut self, value: HirExpr, kind: TripleKind) -> LoweringResult<HirExpr> {
        let temp = self.temps.fresh();

        let call_block = self.curr;
        self.set_stmt(call_block, HirStmt::Expr { value });

        let return_block = self.new_block();
        self.add_edge(call_block, return_block);
        self.set_stmt(
            return_block,
            HirStmt::Expr {
                value: HirExpr::name(&temp),
            },
        );

        let dummy_block = self.new_block();
        self.add_edge(return_block, dummy_block);
        self.set_stmt(
            dummy_block,
            HirStmt::Expr {
                value: HirExpr::name(&temp),
            },
        );
        self.cfg.dummy_labels.insert(dummy_block);

        let triple = TripleFlow {
            call: call_block,
            ret: return_block,
            dummy: dummy_block,
        };
        match kind {
            TripleKind::Getter => self.cfg.getter_flows.insert(triple),
            TripleKind::Magic => self.cfg.magic_flows.insert(triple),
        };

        self.curr = dummy_block;
        let next = self.new_block();
        self.curr = self.add_edge(self.curr, next);
        Ok(HirExpr::name(&temp))
    }

    fn lower_single_target(&mut self, target: HirExpr, value: HirExpr) -> LoweringResult<()> {
        match target {
            HirExpr::Name(_) => {
                self.emit(HirStmt::Assign {
                    targets: vec![target],
                    value,
                });
                Ok(())
            }
            HirExpr::Attribute { .. } => {
                let assign = HirStmt::Assign {
                    targets: vec![target],
                    value,
                };
                let call_block = self.curr;
                self.set_stmt(call_block, assign.clone());

                let return_block = self.new_block();
                self.add_edge(call_block, return_block);
                self.set_stmt(return_block, assign.clone());

                let dummy_block = self.new_block();
                self.add_edge(return_block, dummy_block);
                self.set_stmt(dummy_block, assign);
                self.cfg.dummy_labels.insert(dummy_block);

                self.cfg.setter_flows.insert(TripleFlow {
                    call: call_block,
                    ret: return_block,
                    dummy: dummy_block,
                });
                self.curr = dummy_block;
                let next = self.new_block();
                self.curr = self.add_edge(self.curr, next);
                Ok(())
            }
            HirExpr::Subscript { value: base, slice } => {
                let (seq, slice) = self.decompose_parts(*slice)?;
                self.populate_body(seq)?;
                self.emit(HirStmt::Assign {
                    targets: vec![HirExpr::Subscript {
                        value: base,
                        slice: Box::new(slice),
                    }],
                    value,
                });
                Ok(())
            }
            HirExpr::List { elts } | HirExpr::Tuple { elts } => {
                // elements inside an unpacking target keep their shape
                let mut seq = Vec::new();
                let mut lowered_elts = Vec::with_capacity(elts.len());
                for elt in elts {
                    match elt {
                        HirExpr::Name(_) => lowered_elts.push(elt),
                        HirExpr::Starred { .. } => {
                            return Err(LoweringError::unsupported("starred assignment target"))
                        }
                        other => {
                            let (stmts, simplified) = self.decompose_parts(other)?;
                            seq.extend(stmts);
                            lowered_elts.push(simplified);
                        }
                    }
                }
                self.populate_body(seq)?;
                self.emit(HirStmt::Assign {
                    targets: vec![HirExpr::Tuple { elts: lowered_elts }],
                    value,
                });
                Ok(())
            }
            HirExpr::Starred { .. } => {
                Err(LoweringError::unsupported("starred assignment target"))
            }
            other => Err(LoweringError::unsupported(format!(
                "assignment target {other:?}"
            ))),
        }
    }

    fn lower_for(
        &mut self,
        target: HirExpr,
        iter: HirExpr,
        body: Vec<HirStmt>,
        orelse: Vec<HirStmt>,
    ) -> LoweringResult<()> {
        let iter_name = self.temps.fresh();
        let iter_call = HirExpr::Call {
            func: Box::new(HirExpr::name("iter")),
            args: vec![iter],
            keywords: Vec::new(),
        };
        let mut seq = vec![HirStmt::Assign {
            targets: vec![HirExpr::name(&iter_name)],
            value: iter_call,
        }];

        let mut while_body = vec![HirStmt::Assign {
            targets: vec![target],
            value: HirExpr::Call {
                func: Box::new(HirExpr::name("next")),
                args: vec![HirExpr::name(&iter_name)],
                keywords: Vec::new(),
            },
        }];
        while_body.extend(body);
        seq.push(HirStmt::While {
            test: HirExpr::name(&iter_name),
            body: while_body,
            orelse,
        });
        seq.push(HirStmt::Delete {
            targets: vec![HirExpr::name(&iter_name)],
        });
        self.populate_body(seq)
    }

    fn lower_while(
        &mut self,
        test: HirExpr,
        body: Vec<HirStmt>,
        orelse: Vec<HirStmt>,
    ) -> LoweringResult<()> {
        let (test_seq, test) = self.decompose_parts(test)?;
        self.populate_body(test_seq)?;

        let loop_guard = self.add_loop_block();
        self.curr = loop_guard;
        self.set_stmt(
            loop_guard,
            HirStmt::While {
                test,
                body: Vec::new(),
                orelse: Vec::new(),
            },
        );
        self.loop_guard_stack.push(loop_guard);

        let after_while = self.new_block();
        self.add_edge(loop_guard, after_while);
        self.after_loop_stack.push(after_while);

        if orelse.is_empty() {
            let body_block = self.new_block();
            self.add_edge(loop_guard, body_block);
            self.curr = body_block;
            self.populate_body_to(body, loop_guard)?;
        } else {
            let orelse_block = self.new_block();
            self.add_edge(loop_guard, orelse_block);
            let body_block = self.new_block();
            self.curr = self.add_edge(loop_guard, body_block);
            self.populate_body_to(body, loop_guard)?;

            self.curr = orelse_block;
            self.populate_body_to(orelse, after_while)?;
        }

        self.curr = after_while;
        self.after_loop_stack.pop();
        self.loop_guard_stack.pop();
        Ok(())
    }

    fn lower_if(
        &mut self,
        test: HirExpr,
        body: Vec<HirStmt>,
        orelse: Vec<HirStmt>,
    ) -> LoweringResult<()> {
        let (test_seq, test) = self.decompose_parts(test)?;
        self.populate_body(test_seq)?;

        self.set_stmt(
            self.curr,
            HirStmt::If {
                test,
                body: Vec::new(),
                orelse: Vec::new(),
            },
        );

        let after_if = self.new_block();
        let if_body = self.new_block();
        let if_body = self.add_edge(self.curr, if_body);

        if orelse.is_empty() {
            self.add_edge(self.curr, after_if);
        } else {
            let else_block = self.new_block();
            self.curr = self.add_edge(self.curr, else_block);
            self.populate_body_to(orelse, after_if)?;
        }

        self.curr = if_body;
        self.populate_body_to(body, after_if)?;

        self.curr = after_if;
        Ok(())
    }

    fn lower_with(&mut self, mut items: Vec<WithItem>, body: Vec<HirStmt>) -> LoweringResult<()> {
        if items.is_empty() {
            return self.populate_body(body);
        }
        if items.len() > 1 {
            // nest the remaining context managers inside the first
            let rest = items.split_off(1);
            return self.lower_with(
                items,
                vec![HirStmt::With {
                    items: rest,
                    body,
                }],
            );
        }

        let item = items.remove(0);
        let manager_var = self.temps.fresh();
        let manager_type_var = self.temps.fresh();
        let enter_var = self.temps.fresh();
        let exit_var = self.temps.fresh();
        let value_var = self.temps.fresh();

        let mut seq = vec![
            HirStmt::Assign {
                targets: vec![HirExpr::name(&manager_var)],
                value: item.context_expr,
            },
            HirStmt::Assign {
                targets: vec![HirExpr::name(&manager_type_var)],
                value: HirExpr::Call {
                    func: Box::new(HirExpr::name("type")),
                    args: vec![HirExpr::name(&manager_var)],
                    keywords: Vec::new(),
                },
            },
            HirStmt::Assign {
                targets: vec![HirExpr::name(&enter_var)],
                value: HirExpr::Attribute {
                    value: Box::new(HirExpr::name(&manager_type_var)),
                    attr: "__enter__".to_string(),
                },
            },
            HirStmt::Assign {
                targets: vec![HirExpr::name(&exit_var)],
                value: HirExpr::Attribute {
                    value: Box::new(HirExpr::name(&manager_type_var)),
                    attr: "__exit__".to_string(),
                },
            },
            HirStmt::Assign {
                targets: vec![HirExpr::name(&value_var)],
                value: HirExpr::Call {
                    func: Box::new(HirExpr::name(&enter_var)),
                    args: vec![HirExpr::name(&manager_var)],
                    keywords: Vec::new(),
                },
            },
        ];
        if let Some(optional_vars) = item.optional_vars {
            seq.push(HirStmt::Assign {
                targets: vec![optional_vars],
                value: HirExpr::name(&value_var),
            });
        }
        seq.extend(body);
        seq.push(HirStmt::Expr {
            value: HirExpr::Call {
                func: Box::new(HirExpr::name(&exit_var)),
                args: vec![
                    HirExpr::name(&manager_var),
                    HirExpr::Literal(Literal::None),
                    HirExpr::Literal(Literal::None),
                    HirExpr::Literal(Literal::None),
                ],
                keywords: Vec::new(),
            },
        });
        self.populate_body(seq)
    }

    fn lower_try(
        &mut self,
        body: Vec<HirStmt>,
        orelse: Vec<HirStmt>,
        finalbody: Vec<HirStmt>,
    ) -> LoweringResult<()> {
        let try_body_entry = self.curr;
        let after_try = self.new_block();

        let final_entry = self.new_block();
        self.set_stmt(final_entry, HirStmt::Pass);
        let final_exit = self.new_block();
        self.set_stmt(final_exit, HirStmt::Pass);
        let final_first = self.new_block();
        self.curr = self.add_edge(final_entry, final_first);
        self.populate_body_to(finalbody, final_exit)?;
        self.add_edge(final_exit, after_try);

        self.final_entry_stack.push(final_entry);
        self.final_exit_stack.push(final_exit);

        let orelse_entry = self.new_block();
        self.set_stmt(orelse_entry, HirStmt::Pass);
        let orelse_exit = self.new_block();
        self.set_stmt(orelse_exit, HirStmt::Pass);
        let orelse_first = self.new_block();
        self.curr = self.add_edge(orelse_entry, orelse_first);
        self.populate_body_to(orelse, orelse_exit)?;
        self.add_edge(orelse_exit, final_entry);

        self.curr = try_body_entry;
        self.populate_body_to(body, orelse_entry)?;

        self.final_entry_stack.pop();
        self.final_exit_stack.pop();

        self.curr = after_try;
        Ok(())
    }

    fn lower_assert(&mut self, test: HirExpr, msg: Option<HirExpr>) -> LoweringResult<()> {
        let exc = match msg {
            None => HirExpr::name("AssertionError"),
            Some(msg) => HirExpr::Call {
                func: Box::new(HirExpr::name("AssertionError")),
                args: vec![msg],
                keywords: Vec::new(),
            },
        };
        self.lower_if(
            HirExpr::UnaryOp {
                op: UnaryOpKind::Not,
                operand: Box::new(test),
            },
            vec![HirStmt::Raise {
                exc: Some(exc),
                cause: None,
            }],
            Vec::new(),
        )
    }

    fn unify_properties(&mut self) -> LoweringResult<()> {
        let properties = std::mem::take(&mut self.properties);
        for (name, accessors) in properties {
            let args = accessors
                .iter()
                .map(|accessor| match accessor {
                    Some(sym) => HirExpr::name(sym),
                    None => HirExpr::Literal(Literal::None),
                })
                .collect();
            self.lower_assign(
                vec![HirExpr::name(&name)],
                HirExpr::Call {
                    func: Box::new(HirExpr::name("property")),
                    args,
                    keywords: Vec::new(),
                },
            )?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // expression decomposition
    // ------------------------------------------------------------------

    /// Decompose an expression into preceding statements plus a simplified
    /// expression (a literal, a name, or a single-operator form over names).
    fn decompose_parts(&mut self, expr: HirExpr) -> LoweringResult<(Vec<HirStmt>, HirExpr)> {
        match expr {
            HirExpr::Literal(_) | HirExpr::Name(_) => Ok((Vec::new(), expr)),
            HirExpr::BoolOp { op, values } => self.decompose_bool_op(op, values),
            HirExpr::BinOp { left, op, right } => {
                let (mut seq, left) = self.decompose_name(*left)?;
                let (right_seq, right) = self.decompose_name(*right)?;
                seq.extend(right_seq);
                Ok((
                    seq,
                    HirExpr::BinOp {
                        left: Box::new(left),
                        op,
                        right: Box::new(right),
                    },
                ))
            }
            HirExpr::UnaryOp { op, operand } => {
                let (seq, operand) = self.decompose_name(*operand)?;
                Ok((
                    seq,
                    HirExpr::UnaryOp {
                        op,
                        operand: Box::new(operand),
                    },
                ))
            }
            HirExpr::Lambda { params, body } => {
                let temp = self.temps.fresh();
                let (mut fn_body, result) = self.decompose_name(*body)?;
                fn_body.push(HirStmt::Return {
                    value: Some(result),
                });
                Ok((
                    vec![HirStmt::FunctionDef {
                        name: temp.clone(),
                        params,
                        body: fn_body,
                        decorators: Vec::new(),
                    }],
                    HirExpr::Name(temp),
                ))
            }
            HirExpr::IfExp { test, body, orelse } => {
                let temp = self.temps.fresh();
                Ok((
                    vec![HirStmt::If {
                        test: *test,
                        body: vec![HirStmt::Assign {
                            targets: vec![HirExpr::name(&temp)],
                            value: *body,
                        }],
                        orelse: vec![HirStmt::Assign {
                            targets: vec![HirExpr::name(&temp)],
                            value: *orelse,
                        }],
                    }],
                    HirExpr::Name(temp),
                ))
            }
            HirExpr::Dict { keys, values } => {
                let mut seq = Vec::new();
                let mut new_keys = Vec::with_capacity(keys.len());
                for key in keys {
                    match key {
                        Some(key) => {
                            let (stmts, simplified) = self.decompose_name(key)?;
                            seq.extend(stmts);
                            new_keys.push(Some(simplified));
                        }
                        None => new_keys.push(None),
                    }
                }
                let mut new_values = Vec::with_capacity(values.len());
                for value in values {
                    let (stmts, simplified) = self.decompose_name(value)?;
                    seq.extend(stmts);
                    new_values.push(simplified);
                }
                Ok((
                    seq,
                    HirExpr::Dict {
                        keys: new_keys,
                        values: new_values,
                    },
                ))
            }
            HirExpr::Set { elts } => {
                let (seq, elts) = self.decompose_elements(elts)?;
                Ok((seq, HirExpr::Set { elts }))
            }
            HirExpr::List { elts } => {
                let (seq, elts) = self.decompose_elements(elts)?;
                Ok((seq, HirExpr::List { elts }))
            }
            HirExpr::Tuple { elts } => {
                let (seq, elts) = self.decompose_elements(elts)?;
                Ok((seq, HirExpr::Tuple { elts }))
            }
            HirExpr::ListComp { elt, generators } => {
                let acc = self.temps.fresh();
                let mut seq = vec![HirStmt::Assign {
                    targets: vec![HirExpr::name(&acc)],
                    value: HirExpr::List { elts: Vec::new() },
                }];
                seq.extend(self.comprehension_loop(&acc, CompKind::List, *elt, None, generators)?);
                Ok((seq, HirExpr::Name(acc)))
            }
            HirExpr::SetComp { elt, generators } => {
                let acc = self.temps.fresh();
                let mut seq = vec![HirStmt::Assign {
                    targets: vec![HirExpr::name(&acc)],
                    value: HirExpr::Call {
                        func: Box::new(HirExpr::name("set")),
                        args: Vec::new(),
                        keywords: Vec::new(),
                    },
                }];
                seq.extend(self.comprehension_loop(&acc, CompKind::Set, *elt, None, generators)?);
                Ok((seq, HirExpr::Name(acc)))
            }
            HirExpr::DictComp {
                key,
                value,
                generators,
            } => {
                let acc = self.temps.fresh();
                let mut seq = vec![HirStmt::Assign {
                    targets: vec![HirExpr::name(&acc)],
                    value: HirExpr::Dict {
                        keys: Vec::new(),
                        values: Vec::new(),
                    },
                }];
                seq.extend(self.comprehension_loop(
                    &acc,
                    CompKind::Dict,
                    *key,
                    Some(*value),
                    generators,
                )?);
                Ok((seq, HirExpr::Name(acc)))
            }
            HirExpr::GeneratorExp { elt, generators } => {
                let temp = self.temps.fresh();
                let body = self.generator_loop(*elt, generators)?;
                Ok((
                    vec![HirStmt::FunctionDef {
                        name: temp.clone(),
                        params: Params::default(),
                        body,
                        decorators: Vec::new(),
                    }],
                    HirExpr::Call {
                        func: Box::new(HirExpr::Name(temp)),
                        args: Vec::new(),
                        keywords: Vec::new(),
                    },
                ))
            }
            HirExpr::Yield { value } => {
                self.is_generator = true;
                match value {
                    None => Ok((
                        Vec::new(),
                        HirExpr::Yield {
                            value: Some(Box::new(HirExpr::Literal(Literal::None))),
                        },
                    )),
                    Some(value) => {
                        let (seq, simplified) = self.decompose_name(*value)?;
                        Ok((
                            seq,
                            HirExpr::Yield {
                                value: Some(Box::new(simplified)),
                            },
                        ))
                    }
                }
            }
            HirExpr::YieldFrom { value } => {
                self.is_generator = true;
                let (seq, simplified) = self.decompose_name(*value)?;
                Ok((
                    seq,
                    HirExpr::YieldFrom {
                        value: Box::new(simplified),
                    },
                ))
            }
            HirExpr::Compare {
                left,
                ops,
                comparators,
            } => {
                let (mut seq, left) = self.decompose_name(*left)?;
                let mut new_comparators = Vec::with_capacity(comparators.len());
                for comparator in comparators {
                    let (stmts, simplified) = self.decompose_name(comparator)?;
                    seq.extend(stmts);
                    new_comparators.push(simplified);
                }
                Ok((
                    seq,
                    HirExpr::Compare {
                        left: Box::new(left),
                        ops,
                        comparators: new_comparators,
                    },
                ))
            }
            HirExpr::Call {
                func,
                args,
                keywords,
            } => {
                if matches!(*func, HirExpr::Lambda { .. }) {
                    return Err(LoweringError::unsupported("lambda as callee"));
                }
                let (mut seq, func) = self.decompose_name(*func)?;
                let mut new_args = Vec::with_capacity(args.len());
                for arg in args {
                    match arg {
                        HirExpr::Starred { value } => {
                            let (stmts, simplified) = self.decompose_name(*value)?;
                            seq.extend(stmts);
                            new_args.push(HirExpr::Starred {
                                value: Box::new(simplified),
                            });
                        }
                        other => {
                            let (stmts, simplified) = self.decompose_name(other)?;
                            seq.extend(stmts);
                            new_args.push(simplified);
                        }
                    }
                }
                let mut new_keywords = Vec::with_capacity(keywords.len());
                for (name, value) in keywords {
                    let (stmts, simplified) = self.decompose_name(value)?;
                    seq.extend(stmts);
                    new_keywords.push((name, simplified));
                }
                Ok((
                    seq,
                    HirExpr::Call {
                        func: Box::new(func),
                        args: new_args,
                        keywords: new_keywords,
                    },
                ))
            }
            HirExpr::FormattedValue { value, format_spec } => {
                let (mut seq, value) = self.decompose_name(*value)?;
                let format_spec = match format_spec {
                    Some(spec) => {
                        let (stmts, simplified) = self.decompose_name(*spec)?;
                        seq.extend(stmts);
                        Some(Box::new(simplified))
                    }
                    None => None,
                };
                Ok((
                    seq,
                    HirExpr::FormattedValue {
                        value: Box::new(value),
                        format_spec,
                    },
                ))
            }
            HirExpr::JoinedStr { values } => {
                let mut seq = Vec::new();
                let mut new_values = Vec::with_capacity(values.len());
                for value in values {
                    let (stmts, simplified) = self.decompose_name(value)?;
                    seq.extend(stmts);
                    new_values.push(simplified);
                }
                Ok((seq, HirExpr::JoinedStr { values: new_values }))
            }
            HirExpr::Attribute { value, attr } => {
                let (seq, value) = self.decompose_name(*value)?;
                Ok((
                    seq,
                    HirExpr::Attribute {
                        value: Box::new(value),
                        attr,
                    },
                ))
            }
            HirExpr::Subscript { value, slice } => {
                let (mut seq, value) = self.decompose_name(*value)?;
                let (slice_seq, slice) = self.decompose_name(*slice)?;
                seq.extend(slice_seq);
                Ok((
                    seq,
                    HirExpr::Subscript {
                        value: Box::new(value),
                        slice: Box::new(slice),
                    },
                ))
            }
            HirExpr::Starred { value } => {
                let (seq, value) = self.decompose_name(*value)?;
                Ok((
                    seq,
                    HirExpr::Starred {
                        value: Box::new(value),
                    },
                ))
            }
            HirExpr::Slice { lower, upper, step } => {
                let mut seq = Vec::new();
                let decompose_opt = |this: &mut Self,
                                     seq: &mut Vec<HirStmt>,
                                     expr: Option<Box<HirExpr>>|
                 -> LoweringResult<Option<Box<HirExpr>>> {
                    match expr {
                        Some(expr) => {
                            let (stmts, simplified) = this.decompose_name(*expr)?;
                            seq.extend(stmts);
                            Ok(Some(Box::new(simplified)))
                        }
                        None => Ok(None),
                    }
                };
                let lower = decompose_opt(self, &mut seq, lower)?;
                let upper = decompose_opt(self, &mut seq, upper)?;
                let step = decompose_opt(self, &mut seq, step)?;
                Ok((seq, HirExpr::Slice { lower, upper, step }))
            }
        }
    }

    /// Decompose an expression all the way to a plain name (wrapping the
    /// simplified expression in a fresh temporary when needed).
    fn decompose_name(&mut self, expr: HirExpr) -> LoweringResult<(Vec<HirStmt>, HirExpr)> {
        let (mut seq, simplified) = self.decompose_parts(expr)?;
        if simplified.is_name() {
            Ok((seq, simplified))
        } else {
            let temp = self.temps.fresh();
            seq.push(HirStmt::Assign {
                targets: vec![HirExpr::name(&temp)],
                value: simplified,
            });
            Ok((seq, HirExpr::Name(temp)))
        }
    }

    fn decompose_elements(
        &mut self,
        elts: Vec<HirExpr>,
    ) -> LoweringResult<(Vec<HirStmt>, Vec<HirExpr>)> {
        let mut seq = Vec::new();
        let mut new_elts = Vec::with_capacity(elts.len());
        for elt in elts {
            let (stmts, simplified) = self.decompose_name(elt)?;
            seq.extend(stmts);
            new_elts.push(simplified);
        }
        Ok((seq, new_elts))
    }

    fn decompose_bool_op(
        &mut self,
        op: BoolOpKind,
        values: Vec<HirExpr>,
    ) -> LoweringResult<(Vec<HirStmt>, HirExpr)> {
        let temp = self.temps.fresh();
        let mut assigns: Vec<(HirExpr, HirStmt)> = values
            .into_iter()
            .map(|value| {
                (
                    value.clone(),
                    HirStmt::Assign {
                        targets: vec![HirExpr::name(&temp)],
                        value,
                    },
                )
            })
            .collect();

        let Some((_, last_assign)) = assigns.pop() else {
            return Ok((Vec::new(), HirExpr::name(&temp)));
        };
        let mut current = vec![last_assign];
        for (value, assign) in assigns.into_iter().rev() {
            let test = match op {
                BoolOpKind::And => value,
                BoolOpKind::Or => HirExpr::UnaryOp {
                    op: UnaryOpKind::Not,
                    operand: Box::new(value),
                },
            };
            let nested_if = HirStmt::If {
                test,
                body: current,
                orelse: Vec::new(),
            };
            current = vec![assign, nested_if];
        }
        Ok((current, HirExpr::Name(temp)))
    }

    fn comprehension_loop(
        &mut self,
        acc: &str,
        kind: CompKind,
        elt: HirExpr,
        value: Option<HirExpr>,
        generators: Vec<Comprehension>,
    ) -> LoweringResult<Vec<HirStmt>> {
        if generators.is_empty() {
            return match kind {
                CompKind::List | CompKind::Set => {
                    let method = if matches!(kind, CompKind::List) {
                        "append"
                    } else {
                        "add"
                    };
                    let (mut seq, name) = self.decompose_name(elt)?;
                    seq.push(HirStmt::Expr {
                        value: HirExpr::Call {
                            func: Box::new(HirExpr::Attribute {
                                value: Box::new(HirExpr::name(acc)),
                                attr: method.to_string(),
                            }),
                            args: vec![name],
                            keywords: Vec::new(),
                        },
                    });
                    Ok(seq)
                }
                CompKind::Dict => {
                    let (mut seq, key_name) = self.decompose_name(elt)?;
                    let value =
                        value.ok_or_else(|| LoweringError::unsupported("dict comp value"))?;
                    let (value_seq, value_name) = self.decompose_name(value)?;
                    seq.extend(value_seq);
                    seq.push(HirStmt::Assign {
                        targets: vec![HirExpr::Subscript {
                            value: Box::new(HirExpr::name(acc)),
                            slice: Box::new(key_name),
                        }],
                        value: value_name,
                    });
                    Ok(seq)
                }
            };
        }

        let mut generators = generators;
        let generator = generators.remove(0);
        let inner = self.comprehension_loop(acc, kind, elt, value, generators)?;
        let body = if generator.ifs.is_empty() {
            inner
        } else {
            vec![HirStmt::If {
                test: combine_conditions(generator.ifs),
                body: inner,
                orelse: Vec::new(),
            }]
        };
        Ok(vec![HirStmt::For {
            target: generator.target,
            iter: generator.iter,
            body,
            orelse: Vec::new(),
        }])
    }

    fn generator_loop(
        &mut self,
        elt: HirExpr,
        generators: Vec<Comprehension>,
    ) -> LoweringResult<Vec<HirStmt>> {
        if generators.is_empty() {
            let (mut seq, name) = self.decompose_name(elt)?;
            seq.push(HirStmt::Expr {
                value: HirExpr::Yield {
                    value: Some(Box::new(name)),
                },
            });
            return Ok(seq);
        }
        let mut generators = generators;
        let generator = generators.remove(0);
        let inner = self.generator_loop(elt, generators)?;
        let body = if generator.ifs.is_empty() {
            inner
        } else {
            vec![HirStmt::If {
                test: combine_conditions(generator.ifs),
                body: inner,
                orelse: Vec::new(),
            }]
        };
        Ok(vec![HirStmt::For {
            target: generator.target,
            iter: generator.iter,
            body,
            orelse: Vec::new(),
        }])
    }

    // ------------------------------------------------------------------
    // normalization
    // ------------------------------------------------------------------

    /// Splice out empty blocks, preserving predecessor/successor structure.
    fn remove_empty_blocks(&mut self) {
        let ids: Vec<Label> = self.cfg.blocks.keys().copied().collect();
        for id in ids {
            if self.cfg.blocks[&id].is_empty() {
                let prevs = self.cfg.blocks[&id].prev.clone();
                let nexts = self.cfg.blocks[&id].next.clone();
                for prev in &prevs {
                    for next in &nexts {
                        if *prev != id && *next != id {
                            self.add_edge(*prev, *next);
                        }
                    }
                }
                for prev in prevs {
                    self.remove_edge(prev, id);
                }
                for next in nexts {
                    self.remove_edge(id, next);
                }
            }
        }
        self.cfg.blocks.retain(|_, block| block.stmt.is_some());
    }

    /// Build the flow set from the surviving edges and carve the
    /// inter-procedural pairs out of it.
    fn refactor_flows_and_labels(&mut self) {
        for (edge, ()) in &self.edges {
            self.cfg.flows.insert(*edge);
        }

        let call_return_flows: Vec<CallReturnFlow> =
            self.cfg.call_return_flows.iter().copied().collect();
        for flow in call_return_flows {
            self.cfg.flows.shift_remove(&(flow.call, flow.new_return));
            self.cfg.flows.shift_remove(&(flow.init_call, flow.init_return));
            self.cfg.call_labels.insert(flow.call);
            self.cfg.call_labels.insert(flow.init_call);
            self.cfg.return_labels.insert(flow.new_return);
            self.cfg.return_labels.insert(flow.init_return);
        }
        let classdef_flows: Vec<ClassdefFlow> = self.cfg.classdef_flows.iter().copied().collect();
        for flow in classdef_flows {
            self.cfg.flows.shift_remove(&(flow.call, flow.ret));
            self.cfg.call_labels.insert(flow.call);
            self.cfg.return_labels.insert(flow.ret);
        }
        for family in [
            self.cfg.getter_flows.clone(),
            self.cfg.setter_flows.clone(),
            self.cfg.magic_flows.clone(),
        ] {
            for flow in family {
                self.cfg.flows.shift_remove(&(flow.call, flow.ret));
                self.cfg.call_labels.insert(flow.call);
                self.cfg.return_labels.insert(flow.ret);
            }
        }
    }
}

enum TripleKind {
    Getter,
    Magic,
}

#[derive(Clone, Copy)]
enum CompKind {
    List,
    Set,
    Dict,
}

enum PropertyKind {
    Getter,
    Setter(Symbol),
    Deleter(Symbol),
}

fn property_decorator_kind(decorators: &[HirExpr]) -> Option<PropertyKind> {
    let first = decorators.first()?;
    match first {
        HirExpr::Name(id) if id == "property" => Some(PropertyKind::Getter),
        HirExpr::Attribute { value, attr } => {
            let owner = value.as_name()?.to_string();
            match attr.as_str() {
                "setter" => Some(PropertyKind::Setter(owner)),
                "deleter" => Some(PropertyKind::Deleter(owner)),
                _ => None,
            }
        }
        _ => None,
    }
}

fn combine_conditions(mut conditions: Vec<HirExpr>) -> HirExpr {
    if conditions.len() == 1 {
        conditions.remove(0)
    } else {
        HirExpr::BoolOp {
            op: BoolOpKind::And,
            values: conditions,
        }
    }
}
