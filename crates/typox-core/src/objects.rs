//! The abstract object model: a closed set of variants stored in an arena
//! keyed by stable integer identifiers.
//!
//! Classes reference their MRO, which references them, so cross-references
//! are arena indices rather than owning pointers. Bound methods, instances
//! and descriptor call records are interned so the same (function, receiver)
//! pair always yields the same identifier — value sets stabilize and the
//! fixed point terminates.

use std::fmt;
use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::namespace::NsId;
use crate::typeshed::TypeExpr;
use crate::value::Value;
use typox_cfg::Label;

/// Stable identity of an abstract object.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ObjId(pub u32);

impl fmt::Display for ObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A calling-context tuple: a bounded window of recently-entered call-site
/// labels (plus a heap flavor under the refined strategy).
pub type CtxTuple = SmallVec<[u32; 4]>;

/// Allocation-site fingerprint of an instance: site label plus the heap
/// context recorded at allocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HeapAddress {
    pub site: Label,
    pub context: CtxTuple,
}

pub type Mro = Vec<ObjId>;
pub type Mros = Vec<Mro>;
/// Possible base-lists of a class (one list per combination of base
/// choices, since a base expression may evaluate to several classes).
pub type BaseLists = Vec<Vec<ObjId>>;

#[derive(Debug, Clone)]
pub struct ArtificialClass {
    pub qualname: String,
    pub bases: Vec<ObjId>,
    pub mro: Mro,
    pub dict: NsId,
}

#[derive(Debug, Clone)]
pub struct AnalysisClass {
    pub name: String,
    pub module: String,
    pub def_label: Label,
    pub bases: BaseLists,
    pub mros: Mros,
    pub dict: NsId,
}

#[derive(Debug, Clone)]
pub struct TypeshedClass {
    pub name: String,
    pub module: String,
    pub qualname: String,
    pub dict: NsId,
}

#[derive(Debug, Clone)]
pub struct AnalysisInstance {
    pub class: ObjId,
    pub address: HeapAddress,
}

#[derive(Debug, Clone)]
pub struct ArtificialInstance {
    pub name: String,
    pub class: ObjId,
    pub dict: NsId,
    /// Present for site-allocated instances (containers, iterators);
    /// absent for the canonical primitive singletons.
    pub address: Option<HeapAddress>,
}

#[derive(Debug, Clone)]
pub struct TypeshedInstance {
    pub name: String,
    pub module: String,
    pub qualname: String,
    pub class: ObjId,
}

#[derive(Debug, Clone)]
pub struct AnalysisFunction {
    pub name: String,
    /// Module the function was defined in; callee frames resolve their
    /// globals through it.
    pub module: String,
    pub def_label: Label,
    pub entry: Label,
    pub exit: Label,
    pub defaults: IndexMap<String, Value>,
    pub is_generator: bool,
    /// Set when the surrounding class body completes; super() starts its
    /// MRO walk below this class.
    pub defining_class: Option<ObjId>,
}

/// Native transfer of a host-modeled callable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuiltinEffect {
    ReturnInt,
    ReturnFloat,
    ReturnBool,
    ReturnStr,
    ReturnBytes,
    ReturnNone,
    ReturnAny,
    /// sorted/reversed: the argument flows through.
    ReturnFirstArg,
    /// getattr for `__iter__` on the argument, binding discovered methods.
    Iter,
    /// getattr for `__next__` on the argument.
    Next,
    /// type(x) with one argument is the class of x; with three it is Any.
    Type,
    /// dir(...): a list of strings at the call site.
    Dir,
    /// globals()/locals()/vars(): a str-keyed dict at the call site.
    Vars,
    /// object.__init__: identity on the receiver.
    ObjectInit,
    /// list.append / set.add: join the argument into the receiver's
    /// element slot.
    ContainerAdd,
    /// list.extend: join the argument's elements into the receiver.
    ContainerExtend,
    /// list.pop / dict.get: the element slot flows out.
    ContainerElement,
    /// __iter__ of a container: a fresh iterator over the element slot.
    ContainerIter,
}

#[derive(Debug, Clone)]
pub struct ArtificialFunction {
    pub qualname: String,
    pub effect: BuiltinEffect,
}

#[derive(Debug, Clone, Copy)]
pub struct AnalysisMethod {
    pub function: ObjId,
    pub instance: ObjId,
}

#[derive(Debug, Clone, Copy)]
pub struct ArtificialMethod {
    pub function: ObjId,
    pub instance: ObjId,
}

#[derive(Debug, Clone)]
pub struct AnalysisModule {
    pub name: String,
    pub package: String,
    pub path: PathBuf,
    pub globals: NsId,
    pub entry: Label,
    pub exit: Label,
}

#[derive(Debug, Clone)]
pub struct TypeshedModule {
    pub name: String,
    pub qualname: String,
    pub dict: NsId,
}

#[derive(Debug, Clone, Default)]
pub struct PropertyObject {
    pub fget: Value,
    pub fset: Value,
    pub fdel: Value,
}

#[derive(Debug, Clone)]
pub struct SuperProxy {
    pub class: ObjId,
    pub instance: ObjId,
}

/// A pending descriptor invocation the engine resolves as an ordinary
/// inter-procedural call.
#[derive(Debug, Clone)]
pub struct DescriptorCall {
    pub function: ObjId,
    pub args: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct TypeshedFunction {
    pub name: String,
    pub module: String,
    pub qualname: String,
    /// Return type expressions of the ordinary overloads.
    pub returns: Vec<TypeExpr>,
    pub getters: Vec<TypeExpr>,
    pub setters: Vec<TypeExpr>,
    pub deleters: Vec<TypeExpr>,
}

#[derive(Debug, Clone)]
pub struct TypeshedAssign {
    pub name: String,
    pub module: String,
    pub qualname: String,
    pub expr: TypeExpr,
    pub is_annotated: bool,
}

#[derive(Debug, Clone)]
pub struct TypeshedImportedModule {
    pub name: String,
    pub module: String,
    pub imported_module: String,
}

#[derive(Debug, Clone)]
pub struct TypeshedImportedName {
    pub name: String,
    pub module: String,
    pub imported_module: String,
    pub imported_name: String,
}

#[derive(Debug, Clone)]
pub enum AbstractObject {
    /// The unknown value.
    Any,
    /// Unknown tail of an MRO.
    MroAny,
    /// Unknown bases.
    BasesAny,

    ArtificialClass(ArtificialClass),
    AnalysisClass(AnalysisClass),
    TypeshedClass(TypeshedClass),

    AnalysisInstance(AnalysisInstance),
    ArtificialInstance(ArtificialInstance),
    TypeshedInstance(TypeshedInstance),

    AnalysisFunction(AnalysisFunction),
    ArtificialFunction(ArtificialFunction),
    /// The implicit `__new__` allocator.
    Constructor,

    AnalysisMethod(AnalysisMethod),
    ArtificialMethod(ArtificialMethod),

    AnalysisModule(AnalysisModule),
    TypeshedModule(TypeshedModule),

    Property(PropertyObject),
    Classmethod(Value),
    Staticmethod(Value),
    SuperProxy(SuperProxy),

    DescriptorGetter(DescriptorCall),
    DescriptorSetter(DescriptorCall),

    TypeshedFunction(TypeshedFunction),
    TypeshedAssign(TypeshedAssign),
    TypeshedImportedModule(TypeshedImportedModule),
    TypeshedImportedName(TypeshedImportedName),
}

/// Arena of abstract objects plus the interning tables that keep derived
/// objects (methods, instances, proxies, descriptor records) identity-stable
/// across transfer re-execution.
#[derive(Debug, Default)]
pub struct ObjectArena {
    objects: Vec<AbstractObject>,
    methods: IndexMap<(ObjId, ObjId), ObjId>,
    artificial_methods: IndexMap<(ObjId, ObjId), ObjId>,
    instances: IndexMap<(ObjId, HeapAddress), ObjId>,
    artificial_instances: IndexMap<(ObjId, HeapAddress), ObjId>,
    typeshed_instances: IndexMap<String, ObjId>,
    super_proxies: IndexMap<(ObjId, ObjId), ObjId>,
    descriptor_getters: IndexMap<(ObjId, Vec<u32>), ObjId>,
    descriptor_setters: IndexMap<(ObjId, Vec<u32>), ObjId>,
    functions: IndexMap<Label, ObjId>,
    classes: IndexMap<Label, ObjId>,
    properties: IndexMap<Label, ObjId>,
    classmethods: IndexMap<Label, ObjId>,
    staticmethods: IndexMap<Label, ObjId>,
}

impl ObjectArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, obj: AbstractObject) -> ObjId {
        let id = ObjId(u32::try_from(self.objects.len()).unwrap_or(u32::MAX));
        self.objects.push(obj);
        id
    }

    pub fn get(&self, id: ObjId) -> &AbstractObject {
        &self.objects[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: ObjId) -> &mut AbstractObject {
        &mut self.objects[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn is_class(&self, id: ObjId) -> bool {
        matches!(
            self.get(id),
            AbstractObject::ArtificialClass(_)
                | AbstractObject::AnalysisClass(_)
                | AbstractObject::TypeshedClass(_)
        )
    }

    /// The namespace of an object, when it owns one directly (instances of
    /// user classes keep theirs in the heap).
    pub fn dict_of(&self, id: ObjId) -> Option<NsId> {
        match self.get(id) {
            AbstractObject::ArtificialClass(c) => Some(c.dict),
            AbstractObject::AnalysisClass(c) => Some(c.dict),
            AbstractObject::TypeshedClass(c) => Some(c.dict),
            AbstractObject::ArtificialInstance(i) => Some(i.dict),
            AbstractObject::AnalysisModule(m) => Some(m.globals),
            AbstractObject::TypeshedModule(m) => Some(m.dict),
            _ => None,
        }
    }

    /// Interned bound method.
    pub fn method(&mut self, function: ObjId, instance: ObjId) -> ObjId {
        if let Some(id) = self.methods.get(&(function, instance)) {
            return *id;
        }
        let id = self.alloc(AbstractObject::AnalysisMethod(AnalysisMethod {
            function,
            instance,
        }));
        self.methods.insert((function, instance), id);
        id
    }

    pub fn artificial_method(&mut self, function: ObjId, instance: ObjId) -> ObjId {
        if let Some(id) = self.artificial_methods.get(&(function, instance)) {
            return *id;
        }
        let id = self.alloc(AbstractObject::ArtificialMethod(ArtificialMethod {
            function,
            instance,
        }));
        self.artificial_methods.insert((function, instance), id);
        id
    }

    /// Interned user-class instance at an allocation site.
    pub fn analysis_instance(&mut self, class: ObjId, address: HeapAddress) -> ObjId {
        if let Some(id) = self.instances.get(&(class, address.clone())) {
            return *id;
        }
        let id = self.alloc(AbstractObject::AnalysisInstance(AnalysisInstance {
            class,
            address: address.clone(),
        }));
        self.instances.insert((class, address), id);
        id
    }

    /// Interned built-in-class instance at an allocation site (containers,
    /// iterators, ranges).
    pub fn artificial_instance_at(
        &mut self,
        name: &str,
        class: ObjId,
        dict: NsId,
        address: HeapAddress,
    ) -> ObjId {
        if let Some(id) = self.artificial_instances.get(&(class, address.clone())) {
            return *id;
        }
        let id = self.alloc(AbstractObject::ArtificialInstance(ArtificialInstance {
            name: name.to_string(),
            class,
            dict,
            address: Some(address.clone()),
        }));
        self.artificial_instances.insert((class, address), id);
        id
    }

    pub fn typeshed_instance(&mut self, class: ObjId) -> ObjId {
        let (name, module, qualname) = match self.get(class) {
            AbstractObject::TypeshedClass(c) => (
                c.name.clone(),
                c.module.clone(),
                format!("{}.object", c.qualname),
            ),
            _ => ("object".to_string(), String::new(), "object".to_string()),
        };
        if let Some(id) = self.typeshed_instances.get(&qualname) {
            return *id;
        }
        let id = self.alloc(AbstractObject::TypeshedInstance(TypeshedInstance {
            name,
            module,
            qualname: qualname.clone(),
            class,
        }));
        self.typeshed_instances.insert(qualname, id);
        id
    }

    pub fn super_proxy(&mut self, class: ObjId, instance: ObjId) -> ObjId {
        if let Some(id) = self.super_proxies.get(&(class, instance)) {
            return *id;
        }
        let id = self.alloc(AbstractObject::SuperProxy(SuperProxy { class, instance }));
        self.super_proxies.insert((class, instance), id);
        id
    }

    pub fn descriptor_getter(&mut self, function: ObjId, args: Vec<Value>) -> ObjId {
        let key = (function, descriptor_key(&args));
        if let Some(id) = self.descriptor_getters.get(&key) {
            return *id;
        }
        let id = self.alloc(AbstractObject::DescriptorGetter(DescriptorCall {
            function,
            args,
        }));
        self.descriptor_getters.insert(key, id);
        id
    }

    pub fn descriptor_setter(&mut self, function: ObjId, args: Vec<Value>) -> ObjId {
        let key = (function, descriptor_key(&args));
        if let Some(id) = self.descriptor_setters.get(&key) {
            return *id;
        }
        let id = self.alloc(AbstractObject::DescriptorSetter(DescriptorCall {
            function,
            args,
        }));
        self.descriptor_setters.insert(key, id);
        id
    }

    /// Interned function object for a definition label.
    pub fn function_at(&mut self, def_label: Label) -> Option<ObjId> {
        self.functions.get(&def_label).copied()
    }

    pub fn intern_function(&mut self, def_label: Label, id: ObjId) {
        self.functions.insert(def_label, id);
    }

    pub fn class_at(&mut self, def_label: Label) -> Option<ObjId> {
        self.classes.get(&def_label).copied()
    }

    pub fn intern_class(&mut self, def_label: Label, id: ObjId) {
        self.classes.insert(def_label, id);
    }

    /// Interned `property(...)` object for a call site; repeated transfer
    /// of the site joins accessors into the same object.
    pub fn property_at(&mut self, site: Label) -> Option<ObjId> {
        self.properties.get(&site).copied()
    }

    pub fn intern_property(&mut self, site: Label, id: ObjId) {
        self.properties.insert(site, id);
    }

    pub fn classmethod_at(&mut self, site: Label) -> Option<ObjId> {
        self.classmethods.get(&site).copied()
    }

    pub fn intern_classmethod(&mut self, site: Label, id: ObjId) {
        self.classmethods.insert(site, id);
    }

    pub fn staticmethod_at(&mut self, site: Label) -> Option<ObjId> {
        self.staticmethods.get(&site).copied()
    }

    pub fn intern_staticmethod(&mut self, site: Label, id: ObjId) {
        self.staticmethods.insert(site, id);
    }

    /// Debug-facing name of an object.
    pub fn name_of(&self, id: ObjId) -> String {
        match self.get(id) {
            AbstractObject::Any => "Any".to_string(),
            AbstractObject::MroAny => "MRO_Any".to_string(),
            AbstractObject::BasesAny => "Bases_Any".to_string(),
            AbstractObject::ArtificialClass(c) => c.qualname.clone(),
            AbstractObject::AnalysisClass(c) => c.name.clone(),
            AbstractObject::TypeshedClass(c) => c.qualname.clone(),
            AbstractObject::AnalysisInstance(i) => {
                format!("instance of {}", self.name_of(i.class))
            }
            AbstractObject::ArtificialInstance(i) => i.name.clone(),
            AbstractObject::TypeshedInstance(i) => i.qualname.clone(),
            AbstractObject::AnalysisFunction(f) => f.name.clone(),
            AbstractObject::ArtificialFunction(f) => f.qualname.clone(),
            AbstractObject::Constructor => "<constructor>".to_string(),
            AbstractObject::AnalysisMethod(m) => {
                format!(
                    "{} bound to {}",
                    self.name_of(m.function),
                    self.name_of(m.instance)
                )
            }
            AbstractObject::ArtificialMethod(m) => {
                format!(
                    "{} bound to {}",
                    self.name_of(m.function),
                    self.name_of(m.instance)
                )
            }
            AbstractObject::AnalysisModule(m) => format!("module {}", m.name),
            AbstractObject::TypeshedModule(m) => format!("typeshed module {}", m.qualname),
            AbstractObject::Property(_) => "property".to_string(),
            AbstractObject::Classmethod(_) => "classmethod".to_string(),
            AbstractObject::Staticmethod(_) => "staticmethod".to_string(),
            AbstractObject::SuperProxy(s) => {
                format!("super({}, ...)", self.name_of(s.class))
            }
            AbstractObject::DescriptorGetter(_) => "<descriptor get>".to_string(),
            AbstractObject::DescriptorSetter(_) => "<descriptor set>".to_string(),
            AbstractObject::TypeshedFunction(f) => f.qualname.clone(),
            AbstractObject::TypeshedAssign(a) => a.qualname.clone(),
            AbstractObject::TypeshedImportedModule(m) => m.imported_module.clone(),
            AbstractObject::TypeshedImportedName(n) => {
                format!("{}.{}", n.imported_module, n.imported_name)
            }
        }
    }
}

/// Deterministic interning key for descriptor-call records.
fn descriptor_key(args: &[Value]) -> Vec<u32> {
    let mut key = Vec::new();
    for arg in args {
        if arg.is_any() {
            key.push(u32::MAX);
        } else {
            let mut ids: Vec<u32> = arg.iter().map(|o| o.0).collect();
            ids.sort_unstable();
            key.extend(ids);
        }
        key.push(u32::MAX - 1);
    }
    key
}
