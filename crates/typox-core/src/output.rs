//! Domain-free serialization of analysis results: for every program point,
//! the namespace of local non-temporary variables as a tree of tagged
//! records.

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;

use crate::context::AnalysisContext;
use crate::engine::{Analysis, ProgramPoint};
use crate::objects::{AbstractObject, ObjId};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PrimTag {
    None,
    Bool,
    Num,
    Str,
    Bytes,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind")]
pub enum ValueRepr {
    Any,
    Set { objects: Vec<ObjectRepr> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind")]
pub enum ObjectRepr {
    Prim {
        tag: PrimTag,
    },
    HeapRef {
        site: u32,
        context: Vec<u32>,
        class: String,
    },
    FuncRef {
        label: u32,
    },
    ClassRef {
        id: u32,
        name: String,
        namespace: IndexMap<String, ValueRepr>,
    },
    MethodRef {
        function: u32,
    },
    ModuleRef {
        name: String,
    },
    Opaque {
        name: String,
    },
}

pub type NamespaceRepr = IndexMap<String, ValueRepr>;

/// One program point of the final report.
#[derive(Debug, Clone, Serialize)]
pub struct PointRepr {
    pub label: u32,
    pub context: Vec<u32>,
    pub locals: NamespaceRepr,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub module: String,
    pub points: Vec<PointRepr>,
}

pub fn render_value(ctx: &AnalysisContext, value: &Value) -> ValueRepr {
    let mut visited = IndexSet::new();
    render_value_inner(ctx, value, &mut visited)
}

fn render_value_inner(
    ctx: &AnalysisContext,
    value: &Value,
    visited: &mut IndexSet<ObjId>,
) -> ValueRepr {
    if value.is_any() {
        return ValueRepr::Any;
    }
    let objects = value
        .iter()
        .map(|obj| render_object(ctx, obj, visited))
        .collect();
    ValueRepr::Set { objects }
}

fn render_object(ctx: &AnalysisContext, obj: ObjId, visited: &mut IndexSet<ObjId>) -> ObjectRepr {
    let wk = &ctx.wk;
    if obj == wk.none_instance {
        return ObjectRepr::Prim { tag: PrimTag::None };
    }
    if obj == wk.bool_instance {
        return ObjectRepr::Prim { tag: PrimTag::Bool };
    }
    if obj == wk.int_instance || obj == wk.float_instance || obj == wk.complex_instance {
        return ObjectRepr::Prim { tag: PrimTag::Num };
    }
    if obj == wk.str_instance {
        return ObjectRepr::Prim { tag: PrimTag::Str };
    }
    if obj == wk.bytes_instance || obj == wk.bytearray_instance {
        return ObjectRepr::Prim {
            tag: PrimTag::Bytes,
        };
    }

    match ctx.arena.get(obj) {
        AbstractObject::AnalysisInstance(i) => ObjectRepr::HeapRef {
            site: i.address.site.0,
            context: i.address.context.to_vec(),
            class: ctx.arena.name_of(i.class),
        },
        AbstractObject::ArtificialInstance(i) => match &i.address {
            Some(address) => ObjectRepr::HeapRef {
                site: address.site.0,
                context: address.context.to_vec(),
                class: ctx.arena.name_of(i.class),
            },
            None => ObjectRepr::Opaque {
                name: i.name.clone(),
            },
        },
        AbstractObject::AnalysisFunction(f) => ObjectRepr::FuncRef {
            label: f.def_label.0,
        },
        AbstractObject::AnalysisClass(c) => {
            // class namespaces may reach back to the class itself
            if !visited.insert(obj) {
                return ObjectRepr::ClassRef {
                    id: obj.0,
                    name: c.name.clone(),
                    namespace: IndexMap::new(),
                };
            }
            let mut namespace = IndexMap::new();
            let dict = ctx.spaces.get(c.dict);
            for (name, value) in dict.extract_local_nontemps() {
                namespace.insert(name.to_string(), render_value_inner(ctx, value, visited));
            }
            visited.swap_remove(&obj);
            ObjectRepr::ClassRef {
                id: obj.0,
                name: c.name.clone(),
                namespace,
            }
        }
        AbstractObject::ArtificialClass(c) => ObjectRepr::ClassRef {
            id: obj.0,
            name: c.qualname.clone(),
            namespace: IndexMap::new(),
        },
        AbstractObject::TypeshedClass(c) => ObjectRepr::ClassRef {
            id: obj.0,
            name: c.qualname.clone(),
            namespace: IndexMap::new(),
        },
        AbstractObject::AnalysisMethod(m) => {
            let function = match ctx.arena.get(m.function) {
                AbstractObject::AnalysisFunction(f) => f.def_label.0,
                _ => 0,
            };
            ObjectRepr::MethodRef { function }
        }
        AbstractObject::AnalysisModule(m) => ObjectRepr::ModuleRef {
            name: m.name.clone(),
        },
        AbstractObject::TypeshedModule(m) => ObjectRepr::ModuleRef {
            name: m.qualname.clone(),
        },
        _ => ObjectRepr::Opaque {
            name: ctx.arena.name_of(obj),
        },
    }
}

impl Analysis<'_> {
    /// Iterate over the program points the fixed point reached.
    pub fn program_points(&self) -> impl Iterator<Item = &ProgramPoint> {
        self.table.keys()
    }

    /// The local non-temporary variables at a program point.
    pub fn locals_at(&self, point: &ProgramPoint) -> Option<IndexMap<String, Value>> {
        let state = self.table.get(point)?;
        let ns = self.ctx.spaces.get(state.top().ns);
        Some(
            ns.extract_local_nontemps()
                .map(|(name, value)| (name.to_string(), value.clone()))
                .collect(),
        )
    }

    /// The value of one variable at the module exit (the whole-module
    /// result consumers usually want).
    pub fn variable_at_exit(&self, name: &str) -> Option<Value> {
        let exit_point = (self.exit, Default::default());
        let state = self.table.get(&exit_point)?;
        state.read_var(&self.ctx.spaces, name)
    }

    /// The full serialized report, points sorted for stable output.
    pub fn report(&self) -> AnalysisReport {
        let mut points: Vec<&ProgramPoint> = self.table.keys().collect();
        points.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));

        let rendered = points
            .into_iter()
            .filter_map(|point| {
                let locals = self.locals_at(point)?;
                let locals = locals
                    .iter()
                    .map(|(name, value)| (name.clone(), render_value(self.ctx, value)))
                    .collect();
                Some(PointRepr {
                    label: point.0 .0,
                    context: point.1.to_vec(),
                    locals,
                })
            })
            .collect();

        AnalysisReport {
            module: self.module.clone(),
            points: rendered,
        }
    }
}

/// Outcome of comparing the crude and refined context abstractions.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiffSummary {
    pub differing: usize,
    pub total: usize,
}

/// Compare two reports label by label: for every label both abstractions
/// reached, count the local names whose rendered values differ. Contexts
/// are collapsed per label, since the two modes key their points with
/// different context tuples.
pub fn compare_reports(crude: &AnalysisReport, refined: &AnalysisReport) -> DiffSummary {
    let collapse = |report: &AnalysisReport| -> IndexMap<u32, NamespaceRepr> {
        let mut by_label: IndexMap<u32, NamespaceRepr> = IndexMap::new();
        for point in &report.points {
            let entry = by_label.entry(point.label).or_default();
            for (name, value) in &point.locals {
                entry
                    .entry(name.clone())
                    .and_modify(|existing| {
                        if existing != value {
                            *existing = ValueRepr::Any;
                        }
                    })
                    .or_insert_with(|| value.clone());
            }
        }
        by_label
    };

    let crude_points = collapse(crude);
    let refined_points = collapse(refined);

    let mut summary = DiffSummary::default();
    for (label, crude_locals) in &crude_points {
        let Some(refined_locals) = refined_points.get(label) else {
            summary.total += crude_locals.len();
            summary.differing += crude_locals.len();
            continue;
        };
        let mut names: IndexSet<&String> = crude_locals.keys().collect();
        names.extend(refined_locals.keys());
        for name in names {
            summary.total += 1;
            if crude_locals.get(name) != refined_locals.get(name) {
                summary.differing += 1;
            }
        }
    }
    summary
}
