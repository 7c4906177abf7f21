//! The generic attribute protocol: `getattrs`/`setattrs` over abstract
//! values, with descriptor discovery, method binding, typeshed refinement
//! and super dispatch.
//!
//! Reads return a pair `(res, descr)`: `res` is immediately usable, `descr`
//! enumerates pending descriptor invocations the engine dispatches as
//! ordinary inter-procedural calls.

use tracing::debug;

use crate::context::AnalysisContext;
use crate::mro::mros_of;
use crate::namespace::NsId;
use crate::objects::{AbstractObject, Mros, ObjId};
use crate::typeshed::{refine_typeshed, resolve_typeshed_value};
use crate::value::Value;

/// The class of an abstract object.
pub fn class_of(ctx: &AnalysisContext, obj: ObjId) -> ObjId {
    let wk = &ctx.wk;
    match ctx.arena.get(obj) {
        AbstractObject::AnalysisClass(_)
        | AbstractObject::ArtificialClass(_)
        | AbstractObject::TypeshedClass(_) => wk.type_type,
        AbstractObject::AnalysisInstance(i) => i.class,
        AbstractObject::ArtificialInstance(i) => i.class,
        AbstractObject::TypeshedInstance(i) => i.class,
        AbstractObject::AnalysisFunction(_)
        | AbstractObject::ArtificialFunction(_)
        | AbstractObject::Constructor
        | AbstractObject::TypeshedFunction(_) => wk.function_type,
        AbstractObject::AnalysisMethod(_) | AbstractObject::ArtificialMethod(_) => wk.method_type,
        AbstractObject::AnalysisModule(_) | AbstractObject::TypeshedModule(_) => wk.module_type,
        AbstractObject::Property(_) => wk.property_type,
        AbstractObject::Classmethod(_) => wk.classmethod_type,
        AbstractObject::Staticmethod(_) => wk.staticmethod_type,
        AbstractObject::SuperProxy(_) => wk.super_type,
        _ => wk.any,
    }
}

/// The namespace holding an object's own attributes, when it has one.
pub fn instance_dict(ctx: &AnalysisContext, obj: ObjId) -> Option<NsId> {
    match ctx.arena.get(obj) {
        AbstractObject::AnalysisInstance(i) => ctx.heap.get(&i.address),
        _ => ctx.arena.dict_of(obj),
    }
}

/// Walk a type's MROs looking for `name`, joining the first hit of every
/// path. Walking into `MRO_Any` yields Any.
pub fn pytype_lookup(
    ctx: &AnalysisContext,
    tp: ObjId,
    name: &str,
    mros: Option<&Mros>,
) -> Value {
    let owned;
    let mros = match mros {
        Some(mros) => mros,
        None => {
            owned = mros_of(&ctx.arena, &ctx.wk, tp);
            &owned
        }
    };

    let mut found = Value::new();
    for mro in mros {
        for cls in mro {
            if *cls == ctx.wk.mro_any {
                return Value::any();
            }
            if let Some(dict) = ctx.arena.dict_of(*cls) {
                if let Some(value) = ctx.spaces.get(dict).read_value(name) {
                    found.inject_value(value);
                    break;
                }
            }
        }
    }
    found
}

/// Attribute read over a value. Any in, Any out; otherwise the per-object
/// results and pending descriptor calls are joined.
pub fn getattrs(ctx: &mut AnalysisContext, objs: &Value, name: &str) -> (Value, Value) {
    if objs.is_any() {
        return (Value::any(), Value::any());
    }

    let mut res = Value::new();
    let mut descr = Value::new();
    let targets: Vec<ObjId> = objs.iter().collect();
    for obj in targets {
        let (one_res, one_descr) = getattr_one(ctx, obj, name);
        res.inject_value(&one_res);
        descr.inject_value(&one_descr);
    }
    (res, descr)
}

fn getattr_one(ctx: &mut AnalysisContext, obj: ObjId, name: &str) -> (Value, Value) {
    match ctx.arena.get(obj).clone() {
        AbstractObject::Any => (Value::any(), Value::any()),
        AbstractObject::AnalysisClass(_)
        | AbstractObject::ArtificialClass(_)
        | AbstractObject::TypeshedClass(_) => type_getattro(ctx, obj, name),
        AbstractObject::AnalysisModule(m) => {
            let value = ctx.spaces.get(m.globals).read_value(name).cloned();
            match value {
                Some(value) => (value, Value::new()),
                None => (Value::new(), Value::new()),
            }
        }
        AbstractObject::TypeshedModule(m) => {
            let value = ctx.spaces.get(m.dict).read_value(name).cloned();
            match value {
                Some(value) => {
                    let resolved = resolve_typeshed_value(ctx, &value);
                    let mut res = Value::new();
                    if resolved.is_any() {
                        return (Value::any(), Value::new());
                    }
                    let objs: Vec<ObjId> = resolved.iter().collect();
                    for one in objs {
                        let refined = refine_typeshed(ctx, one);
                        res.inject_value(&refined);
                    }
                    (res, Value::new())
                }
                None => (Value::new(), Value::new()),
            }
        }
        AbstractObject::SuperProxy(proxy) => super_getattr(ctx, proxy.class, proxy.instance, name),
        _ => generic_getattr(ctx, obj, name),
    }
}

/// The instance-level read: descriptors on the type, then the instance
/// namespace, then plain class variables.
fn generic_getattr(ctx: &mut AnalysisContext, obj: ObjId, name: &str) -> (Value, Value) {
    let mut res = Value::new();
    let mut descr = Value::new();

    let tp = class_of(ctx, obj);
    let class_vars = pytype_lookup(ctx, tp, name, None);
    if class_vars.is_any() {
        return (Value::any(), Value::new());
    }

    let cvs: Vec<ObjId> = class_vars.iter().collect();
    for cv in cvs {
        bind_class_variable(ctx, cv, obj, tp, &mut res, &mut descr);
    }

    if let Some(dict) = instance_dict(ctx, obj) {
        if let Some(own) = ctx.spaces.get(dict).read_value(name) {
            res.inject_value(&own.clone());
        }
    }

    (res, descr)
}

fn bind_class_variable(
    ctx: &mut AnalysisContext,
    cv: ObjId,
    receiver: ObjId,
    receiver_type: ObjId,
    res: &mut Value,
    descr: &mut Value,
) {
    match ctx.arena.get(cv).clone() {
        // a function is a non-data descriptor whose __get__ binds
        AbstractObject::AnalysisFunction(_) => {
            let method = ctx.arena.method(cv, receiver);
            res.inject(method);
        }
        AbstractObject::ArtificialFunction(_) | AbstractObject::Constructor => {
            let method = ctx.arena.artificial_method(cv, receiver);
            res.inject(method);
        }
        AbstractObject::TypeshedFunction(_)
        | AbstractObject::TypeshedAssign(_)
        | AbstractObject::TypeshedClass(_)
        | AbstractObject::TypeshedImportedModule(_)
        | AbstractObject::TypeshedImportedName(_) => {
            let refined = refine_typeshed(ctx, cv);
            res.inject_value(&refined);
        }
        AbstractObject::Property(p) => {
            let fgets: Vec<ObjId> = p.fget.iter().collect();
            for fget in fgets {
                let getter = ctx
                    .arena
                    .descriptor_getter(fget, vec![Value::of(receiver)]);
                descr.inject(getter);
            }
        }
        AbstractObject::Classmethod(functions) => {
            let funcs: Vec<ObjId> = functions.iter().collect();
            for func in funcs {
                let method = ctx.arena.method(func, receiver_type);
                res.inject(method);
            }
        }
        AbstractObject::Staticmethod(functions) => {
            res.inject_value(&functions);
        }
        _ => {
            // consult the variable's type for __get__
            let cv_type = class_of(ctx, cv);
            let gets = pytype_lookup(ctx, cv_type, "__get__", None);
            if gets.is_empty() || gets.is_any() {
                // a plain class variable flows through unchanged
                res.inject(cv);
                return;
            }
            let getters: Vec<ObjId> = gets.iter().collect();
            let mut found_getter = false;
            for getter in getters {
                if matches!(ctx.arena.get(getter), AbstractObject::AnalysisFunction(_)) {
                    let record = ctx.arena.descriptor_getter(
                        getter,
                        vec![
                            Value::of(cv),
                            Value::of(receiver),
                            Value::of(receiver_type),
                        ],
                    );
                    descr.inject(record);
                    found_getter = true;
                } else {
                    debug!(getter = %ctx.arena.name_of(getter), "ignoring non-analysis __get__");
                }
            }
            if !found_getter {
                res.inject(cv);
            }
        }
    }
}

/// The class-level read: functions stay unbound, classmethods bind to the
/// class, descriptors still fire with a None receiver.
fn type_getattro(ctx: &mut AnalysisContext, class: ObjId, name: &str) -> (Value, Value) {
    let mut res = Value::new();
    let mut descr = Value::new();

    let class_vars = pytype_lookup(ctx, class, name, None);
    if class_vars.is_any() {
        return (Value::any(), Value::new());
    }

    let cvs: Vec<ObjId> = class_vars.iter().collect();
    for cv in cvs {
        match ctx.arena.get(cv).clone() {
            AbstractObject::AnalysisFunction(_)
            | AbstractObject::ArtificialFunction(_)
            | AbstractObject::Constructor
            | AbstractObject::Property(_) => res.inject(cv),
            AbstractObject::TypeshedFunction(_)
            | AbstractObject::TypeshedAssign(_)
            | AbstractObject::TypeshedClass(_)
            | AbstractObject::TypeshedImportedModule(_)
            | AbstractObject::TypeshedImportedName(_) => {
                let refined = refine_typeshed(ctx, cv);
                res.inject_value(&refined);
            }
            AbstractObject::Classmethod(functions) => {
                let funcs: Vec<ObjId> = functions.iter().collect();
                for func in funcs {
                    let method = ctx.arena.method(func, class);
                    res.inject(method);
                }
            }
            AbstractObject::Staticmethod(functions) => res.inject_value(&functions),
            _ => {
                let cv_type = class_of(ctx, cv);
                let gets = pytype_lookup(ctx, cv_type, "__get__", None);
                if gets.is_empty() || gets.is_any() {
                    res.inject(cv);
                    continue;
                }
                let getters: Vec<ObjId> = gets.iter().collect();
                let mut found_getter = false;
                for getter in getters {
                    if matches!(ctx.arena.get(getter), AbstractObject::AnalysisFunction(_)) {
                        let none = ctx.wk.none_instance;
                        let record = ctx.arena.descriptor_getter(
                            getter,
                            vec![Value::of(cv), Value::of(none), Value::of(class)],
                        );
                        descr.inject(record);
                        found_getter = true;
                    }
                }
                if !found_getter {
                    res.inject(cv);
                }
            }
        }
    }

    (res, descr)
}

/// Attribute reads on a super proxy skip to the MRO slice after the stored
/// class and bind discovered functions to the original instance.
fn super_getattr(
    ctx: &mut AnalysisContext,
    class: ObjId,
    instance: ObjId,
    name: &str,
) -> (Value, Value) {
    let instance_type = class_of(ctx, instance);
    let mros = mros_of(&ctx.arena, &ctx.wk, instance_type);

    let mut sliced: Mros = Vec::new();
    for mro in &mros {
        match mro.iter().position(|c| *c == class) {
            Some(index) => sliced.push(mro[index + 1..].to_vec()),
            None => sliced.push(mro.clone()),
        }
    }

    let found = pytype_lookup(ctx, instance_type, name, Some(&sliced));
    if found.is_any() {
        return (Value::any(), Value::new());
    }
    let mut res = Value::new();
    let mut descr = Value::new();
    let cvs: Vec<ObjId> = found.iter().collect();
    for cv in cvs {
        bind_class_variable(ctx, cv, instance, instance_type, &mut res, &mut descr);
    }
    (res, descr)
}

/// Attribute write over a value: locate `__set__` through the MRO, emit
/// pending setter calls, and in parallel join the value into the target's
/// own namespace.
pub fn setattrs(ctx: &mut AnalysisContext, objs: &Value, name: &str, value: &Value) -> Value {
    if objs.is_any() {
        return Value::any();
    }

    let mut descr = Value::new();
    let targets: Vec<ObjId> = objs.iter().collect();
    for obj in targets {
        let one = generic_setattr(ctx, obj, name, value);
        descr.inject_value(&one);
    }
    descr
}

fn generic_setattr(ctx: &mut AnalysisContext, obj: ObjId, name: &str, value: &Value) -> Value {
    let mut descr = Value::new();

    let tp = class_of(ctx, obj);
    let class_vars = pytype_lookup(ctx, tp, name, None);
    if !class_vars.is_any() {
        let cvs: Vec<ObjId> = class_vars.iter().collect();
        for cv in cvs {
            match ctx.arena.get(cv).clone() {
                AbstractObject::Property(p) => {
                    let fsets: Vec<ObjId> = p.fset.iter().collect();
                    for fset in fsets {
                        let record = ctx
                            .arena
                            .descriptor_setter(fset, vec![Value::of(obj), value.clone()]);
                        descr.inject(record);
                    }
                }
                _ => {
                    let cv_type = class_of(ctx, cv);
                    let sets = pytype_lookup(ctx, cv_type, "__set__", None);
                    if sets.is_any() {
                        continue;
                    }
                    let setters: Vec<ObjId> = sets.iter().collect();
                    for setter in setters {
                        if matches!(ctx.arena.get(setter), AbstractObject::AnalysisFunction(_)) {
                            let record = ctx.arena.descriptor_setter(
                                setter,
                                vec![Value::of(cv), Value::of(obj), value.clone()],
                            );
                            descr.inject(record);
                        }
                    }
                }
            }
        }
    }

    // the plain write happens regardless: join into the object's own dict
    match ctx.arena.get(obj).clone() {
        AbstractObject::AnalysisInstance(i) => {
            ctx.heap
                .join_field(i.address, name, value, &mut ctx.spaces);
        }
        _ => {
            if let Some(dict) = ctx.arena.dict_of(obj) {
                ctx.spaces.join_value(dict, name, value);
            }
        }
    }

    descr
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{AnalysisContext, AnalysisMode};
    use crate::namespace::Namespace;
    use crate::objects::{AnalysisClass, AnalysisFunction, HeapAddress, PropertyObject};
    use crate::typeshed::SearchContext;
    use indexmap::IndexMap;
    use typox_cfg::Label;

    fn ctx() -> AnalysisContext {
        AnalysisContext::new(
            SearchContext::new(std::path::PathBuf::from("/nonexistent"), (3, 9), "linux"),
            AnalysisMode::Crude,
        )
    }

    fn mk_function(ctx: &mut AnalysisContext, name: &str, label: u32) -> ObjId {
        ctx.arena
            .alloc(AbstractObject::AnalysisFunction(AnalysisFunction {
                name: name.to_string(),
                module: "main".to_string(),
                def_label: Label(label),
                entry: Label(label + 1),
                exit: Label(label + 2),
                defaults: IndexMap::new(),
                is_generator: false,
                defining_class: None,
            }))
    }

    fn mk_class(ctx: &mut AnalysisContext, name: &str, dict: Namespace) -> ObjId {
        let dict = ctx.spaces.alloc(dict);
        let object_type = ctx.wk.object_type;
        let id = ctx.arena.alloc(AbstractObject::AnalysisClass(AnalysisClass {
            name: name.to_string(),
            module: "main".to_string(),
            def_label: Label(900),
            bases: vec![vec![object_type]],
            mros: Vec::new(),
            dict,
        }));
        let mros = crate::mro::c3_linearize(
            &ctx.arena,
            &ctx.wk,
            id,
            &vec![vec![object_type]],
        );
        if let AbstractObject::AnalysisClass(c) = ctx.arena.get_mut(id) {
            c.mros = mros;
        }
        id
    }

    #[test]
    fn reading_a_method_binds_the_receiver() {
        let mut ctx = ctx();
        let func = mk_function(&mut ctx, "f", 10);
        let mut dict = Namespace::new();
        dict.write_local("f", Value::of(func));
        let class = mk_class(&mut ctx, "C", dict);

        let address = HeapAddress {
            site: Label(50),
            context: Default::default(),
        };
        ctx.heap.ensure(address.clone(), &mut ctx.spaces);
        let instance = ctx.arena.analysis_instance(class, address);

        let (res, descr) = getattrs(&mut ctx, &Value::of(instance), "f");
        assert!(descr.is_empty());
        let bound = res.iter().next().unwrap();
        assert!(matches!(
            ctx.arena.get(bound),
            AbstractObject::AnalysisMethod(m) if m.instance == instance && m.function == func
        ));
        // binding twice yields the identical method object
        let (res2, _) = getattrs(&mut ctx, &Value::of(instance), "f");
        assert_eq!(res2.iter().next(), Some(bound));
    }

    #[test]
    fn property_read_emits_descriptor_getter() {
        let mut ctx = ctx();
        let fget = mk_function(&mut ctx, "get_v", 20);
        let prop = ctx.arena.alloc(AbstractObject::Property(PropertyObject {
            fget: Value::of(fget),
            fset: Value::new(),
            fdel: Value::new(),
        }));
        let mut dict = Namespace::new();
        dict.write_local("v", Value::of(prop));
        let class = mk_class(&mut ctx, "C", dict);

        let address = HeapAddress {
            site: Label(60),
            context: Default::default(),
        };
        ctx.heap.ensure(address.clone(), &mut ctx.spaces);
        let instance = ctx.arena.analysis_instance(class, address);

        let (res, descr) = getattrs(&mut ctx, &Value::of(instance), "v");
        assert!(res.is_empty(), "property value must come from the getter");
        assert_eq!(descr.len(), 1);
        let record = descr.iter().next().unwrap();
        assert!(matches!(
            ctx.arena.get(record),
            AbstractObject::DescriptorGetter(call) if call.function == fget
        ));
    }

    #[test]
    fn data_descriptor_write_emits_setter_call() {
        let mut ctx = ctx();
        let set_fn = mk_function(&mut ctx, "__set__", 30);
        let mut descr_dict = Namespace::new();
        descr_dict.write_local("__set__", Value::of(set_fn));
        let descr_class = mk_class(&mut ctx, "D", descr_dict);

        let descr_address = HeapAddress {
            site: Label(70),
            context: Default::default(),
        };
        ctx.heap.ensure(descr_address.clone(), &mut ctx.spaces);
        let descr_instance = ctx.arena.analysis_instance(descr_class, descr_address);

        let mut owner_dict = Namespace::new();
        owner_dict.write_local("d", Value::of(descr_instance));
        let owner = mk_class(&mut ctx, "C", owner_dict);

        let address = HeapAddress {
            site: Label(80),
            context: Default::default(),
        };
        ctx.heap.ensure(address.clone(), &mut ctx.spaces);
        let instance = ctx.arena.analysis_instance(owner, address);

        let written = Value::of(ctx.wk.int_instance);
        let descr = setattrs(&mut ctx, &Value::of(instance), "d", &written);
        assert_eq!(descr.len(), 1);
        // the plain write also landed in the instance namespace
        let dict = instance_dict(&ctx, instance).unwrap();
        assert!(ctx.spaces.get(dict).contains("d"));
    }

    #[test]
    fn attribute_absent_yields_empty() {
        let mut ctx = ctx();
        let class = mk_class(&mut ctx, "C", Namespace::new());
        let address = HeapAddress {
            site: Label(90),
            context: Default::default(),
        };
        ctx.heap.ensure(address.clone(), &mut ctx.spaces);
        let instance = ctx.arena.analysis_instance(class, address);
        let (res, descr) = getattrs(&mut ctx, &Value::of(instance), "missing");
        assert!(res.is_empty() && descr.is_empty());
    }

    #[test]
    fn any_propagates() {
        let mut ctx = ctx();
        let (res, descr) = getattrs(&mut ctx, &Value::any(), "x");
        assert!(res.is_any() && descr.is_any());
    }
}
