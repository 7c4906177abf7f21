//! Re-export resolution and declared-type refinement: turning typeshed
//! declaration records into abstract values.

use tracing::debug;

use crate::context::AnalysisContext;
use crate::objects::{AbstractObject, ObjId};
use crate::typeshed::parser::parse_typeshed_module;
use crate::typeshed::TypeExpr;
use crate::value::Value;

const MAX_EVAL_DEPTH: u32 = 8;

/// Resolve every typeshed re-export in `value`, following chains until a
/// primitive record (class, function, assign, module) is reached. Cycles
/// terminate through the visited set; a broken chain degrades to Any.
pub fn resolve_typeshed_value(ctx: &mut AnalysisContext, value: &Value) -> Value {
    if value.is_any() {
        return Value::any();
    }
    let mut out = Value::new();
    let objs: Vec<ObjId> = value.iter().collect();
    for obj in objs {
        let mut seen = Vec::new();
        let resolved = resolve_one(ctx, obj, &mut seen);
        out.inject_value(&resolved);
    }
    out
}

fn resolve_one(ctx: &mut AnalysisContext, obj: ObjId, seen: &mut Vec<ObjId>) -> Value {
    if seen.contains(&obj) {
        return Value::new();
    }
    seen.push(obj);

    match ctx.arena.get(obj).clone() {
        AbstractObject::TypeshedImportedModule(m) => {
            match parse_typeshed_module(ctx, &m.imported_module) {
                Ok(module) => Value::of(module),
                Err(err) => {
                    debug!(%err, "unresolvable stub import");
                    Value::any()
                }
            }
        }
        AbstractObject::TypeshedImportedName(n) => {
            let Ok(module) = parse_typeshed_module(ctx, &n.imported_module) else {
                return Value::any();
            };
            let inner = ctx
                .arena
                .dict_of(module)
                .and_then(|ns| ctx.spaces.get(ns).read_value(&n.imported_name).cloned());
            match inner {
                Some(inner) => {
                    let mut out = Value::new();
                    if inner.is_any() {
                        return Value::any();
                    }
                    let objs: Vec<ObjId> = inner.iter().collect();
                    for inner_obj in objs {
                        let resolved = resolve_one(ctx, inner_obj, seen);
                        out.inject_value(&resolved);
                    }
                    out
                }
                // maybe a submodule rather than a defined name
                None => {
                    let submodule = format!("{}.{}", n.imported_module, n.imported_name);
                    match parse_typeshed_module(ctx, &submodule) {
                        Ok(module) => Value::of(module),
                        Err(_) => Value::any(),
                    }
                }
            }
        }
        _ => Value::of(obj),
    }
}

/// Refine one typeshed record into an immediately-usable abstract value:
/// classes and overloaded functions stand for themselves, property getters
/// and annotated assignments evaluate their declared types.
pub fn refine_typeshed(ctx: &mut AnalysisContext, obj: ObjId) -> Value {
    match ctx.arena.get(obj).clone() {
        AbstractObject::TypeshedModule(_) | AbstractObject::TypeshedClass(_) => Value::of(obj),
        AbstractObject::TypeshedFunction(f) => {
            if !f.returns.is_empty() {
                return Value::of(obj);
            }
            if !f.getters.is_empty() {
                let mut out = Value::new();
                for getter in &f.getters {
                    let evaluated = eval_type_expr(ctx, &f.module, getter, 0);
                    out.inject_value(&evaluated);
                }
                return out;
            }
            if !f.setters.is_empty() || !f.deleters.is_empty() {
                return Value::of(ctx.wk.none_instance);
            }
            Value::of(obj)
        }
        AbstractObject::TypeshedAssign(a) => eval_type_expr(ctx, &a.module, &a.expr, 0),
        AbstractObject::TypeshedImportedModule(_) | AbstractObject::TypeshedImportedName(_) => {
            let resolved = resolve_typeshed_value(ctx, &Value::of(obj));
            if resolved.is_any() {
                return Value::any();
            }
            let mut out = Value::new();
            let objs: Vec<ObjId> = resolved.iter().collect();
            for resolved_obj in objs {
                if resolved_obj == obj {
                    out.inject(obj);
                    continue;
                }
                let refined = refine_typeshed(ctx, resolved_obj);
                out.inject_value(&refined);
            }
            out
        }
        _ => Value::of(obj),
    }
}

/// The return value of calling a typeshed-declared function: the join of
/// its overloads' declared return types.
pub fn refine_function_call(ctx: &mut AnalysisContext, func: ObjId) -> Value {
    let AbstractObject::TypeshedFunction(f) = ctx.arena.get(func).clone() else {
        return Value::any();
    };
    if f.returns.is_empty() {
        return Value::any();
    }
    let mut out = Value::new();
    for ret in &f.returns {
        let evaluated = eval_type_expr(ctx, &f.module, ret, 0);
        out.inject_value(&evaluated);
    }
    out
}

/// Evaluate a declared type expression in the scope of `module`.
pub fn eval_type_expr(
    ctx: &mut AnalysisContext,
    module: &str,
    expr: &TypeExpr,
    depth: u32,
) -> Value {
    if depth > MAX_EVAL_DEPTH {
        return Value::any();
    }
    match expr {
        TypeExpr::Name(name) => eval_type_name(ctx, module, name, depth),
        TypeExpr::Attribute(path) => match path.as_slice() {
            [builtins, name] if builtins == "builtins" => {
                eval_type_name(ctx, "builtins", name, depth)
            }
            _ => Value::any(),
        },
        TypeExpr::Union(parts) => {
            let mut out = Value::new();
            for part in parts {
                let evaluated = eval_type_expr(ctx, module, part, depth + 1);
                out.inject_value(&evaluated);
            }
            out
        }
        TypeExpr::Subscript => Value::any(),
        TypeExpr::NoneLit => Value::of(ctx.wk.none_instance),
        TypeExpr::Ellipsis => Value::of(ctx.wk.ellipsis_instance),
        TypeExpr::Unknown => Value::any(),
    }
}

fn eval_type_name(ctx: &mut AnalysisContext, module: &str, name: &str, depth: u32) -> Value {
    let wk = &ctx.wk;
    match name {
        "bool" => return Value::of(wk.bool_instance),
        "int" => return Value::of(wk.int_instance),
        "float" => return Value::of(wk.float_instance),
        "complex" => return Value::of(wk.complex_instance),
        "str" => return Value::of(wk.str_instance),
        "bytes" => return Value::of(wk.bytes_instance),
        "bytearray" => return Value::of(wk.bytearray_instance),
        "None" => return Value::of(wk.none_instance),
        "Any" | "object" => return Value::any(),
        _ => {}
    }

    // a bare name resolves in the enclosing stub module
    let Ok(module_obj) = parse_typeshed_module(ctx, module) else {
        return Value::any();
    };
    let declared = ctx
        .arena
        .dict_of(module_obj)
        .and_then(|ns| ctx.spaces.get(ns).read_value(name).cloned());
    let Some(declared) = declared else {
        return Value::any();
    };
    let resolved = resolve_typeshed_value(ctx, &declared);
    if resolved.is_any() {
        return Value::any();
    }
    let mut out = Value::new();
    let objs: Vec<ObjId> = resolved.iter().collect();
    for obj in objs {
        match ctx.arena.get(obj).clone() {
            // an annotation naming a class denotes an instance of it
            AbstractObject::TypeshedClass(_) => {
                let instance = ctx.arena.typeshed_instance(obj);
                out.inject(instance);
            }
            AbstractObject::TypeshedAssign(a) => {
                let evaluated = eval_type_expr(ctx, &a.module, &a.expr, depth + 1);
                out.inject_value(&evaluated);
            }
            _ => out.inject(obj),
        }
    }
    out
}
