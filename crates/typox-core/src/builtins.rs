//! Bootstrap of the artificial object world: the built-in classes, the
//! canonical primitive instances, and the builtins namespace with its
//! hand-modeled callables.

use crate::context::WellKnown;
use crate::namespace::NamespaceArena;
use crate::objects::{
    AbstractObject, ArtificialClass, ArtificialFunction, ArtificialInstance, BuiltinEffect,
    ObjId, ObjectArena,
};
use crate::value::Value;

/// Element slot of container instances (lists, sets, tuples, dicts,
/// iterators). Dicts join keys and values into the same slot.
pub const ELEMS_SLOT: &str = "@elems";

pub fn bootstrap(arena: &mut ObjectArena, spaces: &mut NamespaceArena) -> WellKnown {
    let any = arena.alloc(AbstractObject::Any);
    let mro_any = arena.alloc(AbstractObject::MroAny);
    let bases_any = arena.alloc(AbstractObject::BasesAny);

    // object and type reference each other; patch their MROs after both
    // exist
    let object_dict = spaces.fresh();
    let object_type = arena.alloc(AbstractObject::ArtificialClass(ArtificialClass {
        qualname: "builtins.object".to_string(),
        bases: Vec::new(),
        mro: Vec::new(),
        dict: object_dict,
    }));
    if let AbstractObject::ArtificialClass(c) = arena.get_mut(object_type) {
        c.mro = vec![object_type];
    }

    let type_dict = spaces.fresh();
    let type_type = arena.alloc(AbstractObject::ArtificialClass(ArtificialClass {
        qualname: "builtins.type".to_string(),
        bases: vec![object_type],
        mro: Vec::new(),
        dict: type_dict,
    }));
    if let AbstractObject::ArtificialClass(c) = arena.get_mut(type_type) {
        c.mro = vec![type_type, object_type];
    }

    let mk_class = |arena: &mut ObjectArena, spaces: &mut NamespaceArena, name: &str| {
        let dict = spaces.fresh();
        let id = arena.alloc(AbstractObject::ArtificialClass(ArtificialClass {
            qualname: format!("builtins.{name}"),
            bases: vec![object_type],
            mro: Vec::new(),
            dict,
        }));
        if let AbstractObject::ArtificialClass(c) = arena.get_mut(id) {
            c.mro = vec![id, object_type];
        }
        id
    };

    let function_type = mk_class(arena, spaces, "function");
    let method_type = mk_class(arena, spaces, "method");
    let module_type = mk_class(arena, spaces, "module");
    let none_type = mk_class(arena, spaces, "NoneType");
    let bool_type = mk_class(arena, spaces, "bool");
    let int_type = mk_class(arena, spaces, "int");
    let float_type = mk_class(arena, spaces, "float");
    let complex_type = mk_class(arena, spaces, "complex");
    let str_type = mk_class(arena, spaces, "str");
    let bytes_type = mk_class(arena, spaces, "bytes");
    let bytearray_type = mk_class(arena, spaces, "bytearray");
    let list_type = mk_class(arena, spaces, "list");
    let tuple_type = mk_class(arena, spaces, "tuple");
    let set_type = mk_class(arena, spaces, "set");
    let frozenset_type = mk_class(arena, spaces, "frozenset");
    let dict_type = mk_class(arena, spaces, "dict");
    let range_type = mk_class(arena, spaces, "range");
    let slice_type = mk_class(arena, spaces, "slice");
    let iterator_type = mk_class(arena, spaces, "iterator");
    let generator_type = mk_class(arena, spaces, "generator");
    let ellipsis_type = mk_class(arena, spaces, "ellipsis");
    let property_type = mk_class(arena, spaces, "property");
    let classmethod_type = mk_class(arena, spaces, "classmethod");
    let staticmethod_type = mk_class(arena, spaces, "staticmethod");
    let super_type = mk_class(arena, spaces, "super");
    let exception_type = mk_class(arena, spaces, "Exception");

    let mk_instance =
        |arena: &mut ObjectArena, spaces: &mut NamespaceArena, name: &str, class: ObjId| {
            let dict = spaces.fresh();
            arena.alloc(AbstractObject::ArtificialInstance(ArtificialInstance {
                name: name.to_string(),
                class,
                dict,
                address: None,
            }))
        };

    let none_instance = mk_instance(arena, spaces, "None", none_type);
    let bool_instance = mk_instance(arena, spaces, "bool object", bool_type);
    let int_instance = mk_instance(arena, spaces, "int object", int_type);
    let float_instance = mk_instance(arena, spaces, "float object", float_type);
    let complex_instance = mk_instance(arena, spaces, "complex object", complex_type);
    let str_instance = mk_instance(arena, spaces, "str object", str_type);
    let bytes_instance = mk_instance(arena, spaces, "bytes object", bytes_type);
    let bytearray_instance = mk_instance(arena, spaces, "bytearray object", bytearray_type);
    let ellipsis_instance = mk_instance(arena, spaces, "Ellipsis", ellipsis_type);
    let slice_instance = mk_instance(arena, spaces, "slice object", slice_type);
    let range_instance = mk_instance(arena, spaces, "range object", range_type);

    // the implicit __new__ and the identity __init__ live on object
    let constructor = arena.alloc(AbstractObject::Constructor);
    let object_init = arena.alloc(AbstractObject::ArtificialFunction(ArtificialFunction {
        qualname: "builtins.object.__init__".to_string(),
        effect: BuiltinEffect::ObjectInit,
    }));
    spaces
        .get_mut(object_dict)
        .write_local("__new__", Value::of(constructor));
    spaces
        .get_mut(object_dict)
        .write_local("__init__", Value::of(object_init));

    let mk_effect = |arena: &mut ObjectArena, qualname: String, effect: BuiltinEffect| {
        arena.alloc(AbstractObject::ArtificialFunction(ArtificialFunction {
            qualname,
            effect,
        }))
    };

    // container methods dispatch through the attribute protocol like any
    // other class variable
    let container_methods: [(ObjId, &str, BuiltinEffect); 14] = [
        (list_type, "append", BuiltinEffect::ContainerAdd),
        (list_type, "extend", BuiltinEffect::ContainerExtend),
        (list_type, "pop", BuiltinEffect::ContainerElement),
        (list_type, "__iter__", BuiltinEffect::ContainerIter),
        (set_type, "add", BuiltinEffect::ContainerAdd),
        (set_type, "pop", BuiltinEffect::ContainerElement),
        (set_type, "__iter__", BuiltinEffect::ContainerIter),
        (frozenset_type, "__iter__", BuiltinEffect::ContainerIter),
        (tuple_type, "__iter__", BuiltinEffect::ContainerIter),
        (dict_type, "get", BuiltinEffect::ContainerElement),
        (dict_type, "pop", BuiltinEffect::ContainerElement),
        (dict_type, "__iter__", BuiltinEffect::ContainerIter),
        (range_type, "__iter__", BuiltinEffect::ContainerIter),
        (iterator_type, "__next__", BuiltinEffect::ContainerElement),
    ];
    for (class, name, effect) in container_methods {
        let class_name = match arena.get(class) {
            AbstractObject::ArtificialClass(c) => c.qualname.clone(),
            _ => String::new(),
        };
        let func = mk_effect(arena, format!("{class_name}.{name}"), effect);
        if let Some(dict) = arena.dict_of(class) {
            spaces.get_mut(dict).write_local(name, Value::of(func));
        }
    }

    // a handful of str methods keep string pipelines typed
    let str_methods: [(&str, BuiltinEffect); 8] = [
        ("upper", BuiltinEffect::ReturnStr),
        ("lower", BuiltinEffect::ReturnStr),
        ("strip", BuiltinEffect::ReturnStr),
        ("join", BuiltinEffect::ReturnStr),
        ("format", BuiltinEffect::ReturnStr),
        ("encode", BuiltinEffect::ReturnBytes),
        ("startswith", BuiltinEffect::ReturnBool),
        ("endswith", BuiltinEffect::ReturnBool),
    ];
    for (name, effect) in str_methods {
        let func = mk_effect(arena, format!("builtins.str.{name}"), effect);
        if let Some(dict) = arena.dict_of(str_type) {
            spaces.get_mut(dict).write_local(name, Value::of(func));
        }
    }

    // the range element type is statically int
    if let Some(dict) = arena.dict_of(range_instance) {
        spaces
            .get_mut(dict)
            .write_local(ELEMS_SLOT, Value::of(int_instance));
    }

    let builtins_ns = spaces.fresh();
    {
        let classes: [(&str, ObjId); 21] = [
            ("object", object_type),
            ("int", int_type),
            ("float", float_type),
            ("complex", complex_type),
            ("str", str_type),
            ("bytes", bytes_type),
            ("bytearray", bytearray_type),
            ("bool", bool_type),
            ("list", list_type),
            ("tuple", tuple_type),
            ("set", set_type),
            ("frozenset", frozenset_type),
            ("dict", dict_type),
            ("range", range_type),
            ("slice", slice_type),
            ("property", property_type),
            ("classmethod", classmethod_type),
            ("staticmethod", staticmethod_type),
            ("super", super_type),
            ("Exception", exception_type),
            ("BaseException", exception_type),
        ];
        for (name, class) in classes {
            spaces.get_mut(builtins_ns).write_local(name, Value::of(class));
        }
        // common exception names resolve to the shared exception class
        for name in [
            "AssertionError",
            "AttributeError",
            "KeyError",
            "IndexError",
            "NotImplementedError",
            "RuntimeError",
            "StopIteration",
            "TypeError",
            "ValueError",
            "OSError",
        ] {
            spaces
                .get_mut(builtins_ns)
                .write_local(name, Value::of(exception_type));
        }

        let functions: [(&str, BuiltinEffect); 44] = [
            ("abs", BuiltinEffect::ReturnInt),
            ("all", BuiltinEffect::ReturnBool),
            ("any", BuiltinEffect::ReturnBool),
            ("ascii", BuiltinEffect::ReturnStr),
            ("bin", BuiltinEffect::ReturnStr),
            ("callable", BuiltinEffect::ReturnBool),
            ("chr", BuiltinEffect::ReturnStr),
            ("compile", BuiltinEffect::ReturnAny),
            ("delattr", BuiltinEffect::ReturnNone),
            ("dir", BuiltinEffect::Dir),
            ("enumerate", BuiltinEffect::ReturnAny),
            ("eval", BuiltinEffect::ReturnAny),
            ("exec", BuiltinEffect::ReturnAny),
            ("filter", BuiltinEffect::ReturnAny),
            ("format", BuiltinEffect::ReturnStr),
            ("getattr", BuiltinEffect::ReturnAny),
            ("globals", BuiltinEffect::Vars),
            ("hasattr", BuiltinEffect::ReturnBool),
            ("hash", BuiltinEffect::ReturnInt),
            ("hex", BuiltinEffect::ReturnStr),
            ("id", BuiltinEffect::ReturnInt),
            ("input", BuiltinEffect::ReturnStr),
            ("isinstance", BuiltinEffect::ReturnBool),
            ("issubclass", BuiltinEffect::ReturnBool),
            ("iter", BuiltinEffect::Iter),
            ("len", BuiltinEffect::ReturnInt),
            ("locals", BuiltinEffect::Vars),
            ("map", BuiltinEffect::ReturnAny),
            ("max", BuiltinEffect::ReturnInt),
            ("min", BuiltinEffect::ReturnInt),
            ("next", BuiltinEffect::Next),
            ("oct", BuiltinEffect::ReturnStr),
            ("open", BuiltinEffect::ReturnAny),
            ("ord", BuiltinEffect::ReturnInt),
            ("pow", BuiltinEffect::ReturnInt),
            ("print", BuiltinEffect::ReturnNone),
            ("repr", BuiltinEffect::ReturnStr),
            ("reversed", BuiltinEffect::ReturnFirstArg),
            ("round", BuiltinEffect::ReturnInt),
            ("sorted", BuiltinEffect::ReturnFirstArg),
            ("sum", BuiltinEffect::ReturnInt),
            ("type", BuiltinEffect::Type),
            ("vars", BuiltinEffect::Vars),
            ("zip", BuiltinEffect::ReturnAny),
        ];
        for (name, effect) in functions {
            let func = mk_effect(arena, format!("builtins.{name}"), effect);
            spaces.get_mut(builtins_ns).write_local(name, Value::of(func));
        }
        let import_fn = mk_effect(
            arena,
            "builtins.__import__".to_string(),
            BuiltinEffect::ReturnAny,
        );
        spaces
            .get_mut(builtins_ns)
            .write_local("__import__", Value::of(import_fn));
    }

    WellKnown {
        any,
        mro_any,
        bases_any,
        type_type,
        object_type,
        function_type,
        method_type,
        module_type,
        none_type,
        bool_type,
        int_type,
        float_type,
        complex_type,
        str_type,
        bytes_type,
        bytearray_type,
        list_type,
        tuple_type,
        set_type,
        frozenset_type,
        dict_type,
        range_type,
        slice_type,
        iterator_type,
        generator_type,
        ellipsis_type,
        property_type,
        classmethod_type,
        staticmethod_type,
        super_type,
        none_instance,
        bool_instance,
        int_instance,
        float_instance,
        complex_instance,
        str_instance,
        bytes_instance,
        bytearray_instance,
        ellipsis_instance,
        slice_instance,
        range_instance,
        constructor,
        object_init,
        builtins_ns,
    }
}

impl WellKnown {
    /// The canonical instance produced by calling a primitive class, if
    /// `class` is one.
    pub fn prim_instance_for_class(&self, class: ObjId) -> Option<ObjId> {
        let instance = if class == self.int_type {
            self.int_instance
        } else if class == self.float_type {
            self.float_instance
        } else if class == self.complex_type {
            self.complex_instance
        } else if class == self.str_type {
            self.str_instance
        } else if class == self.bytes_type {
            self.bytes_instance
        } else if class == self.bytearray_type {
            self.bytearray_instance
        } else if class == self.bool_type {
            self.bool_instance
        } else if class == self.none_type {
            self.none_instance
        } else if class == self.slice_type {
            self.slice_instance
        } else if class == self.range_type {
            self.range_instance
        } else {
            return None;
        };
        Some(instance)
    }

    /// Whether `class` is one of the container classes whose instances
    /// carry an element slot.
    pub fn is_container_class(&self, class: ObjId) -> bool {
        class == self.list_type
            || class == self.tuple_type
            || class == self.set_type
            || class == self.frozenset_type
            || class == self.dict_type
            || class == self.iterator_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_builds_a_consistent_world() {
        let mut arena = ObjectArena::new();
        let mut spaces = NamespaceArena::new();
        let wk = bootstrap(&mut arena, &mut spaces);

        // object heads its own MRO; type linearizes through object
        match arena.get(wk.object_type) {
            AbstractObject::ArtificialClass(c) => assert_eq!(c.mro, vec![wk.object_type]),
            other => panic!("unexpected object type {other:?}"),
        }
        match arena.get(wk.type_type) {
            AbstractObject::ArtificialClass(c) => {
                assert_eq!(c.mro, vec![wk.type_type, wk.object_type]);
            }
            other => panic!("unexpected type type {other:?}"),
        }

        // the builtins namespace knows the modeled callables
        let ns = spaces.get(wk.builtins_ns);
        for name in ["iter", "next", "len", "isinstance", "hasattr", "sorted"] {
            assert!(ns.contains(name), "builtins missing {name}");
        }

        // object carries the constructor protocol
        let object_dict = arena.dict_of(wk.object_type).unwrap();
        assert!(spaces.get(object_dict).contains("__new__"));
        assert!(spaces.get(object_dict).contains("__init__"));
    }

    #[test]
    fn prim_classes_map_to_canonical_instances() {
        let mut arena = ObjectArena::new();
        let mut spaces = NamespaceArena::new();
        let wk = bootstrap(&mut arena, &mut spaces);
        assert_eq!(wk.prim_instance_for_class(wk.int_type), Some(wk.int_instance));
        assert_eq!(wk.prim_instance_for_class(wk.list_type), None);
    }
}
