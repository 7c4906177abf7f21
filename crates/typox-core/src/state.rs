//! Frames, stacks and the per-program-point state.
//!
//! A state is exclusively owned by its (label, context) entry in the
//! fixed-point table. Copies made during transfer duplicate the mutable top
//! frame's namespace and share everything else by id: namespaces below the
//! top, module globals and the heap are reached through the shared arenas.

use serde::{Deserialize, Serialize};

use crate::namespace::{Namespace, NamespaceArena, NsId, VarKind};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub ns: NsId,
    pub globals: NsId,
    pub builtins: NsId,
    /// Qualified name of the module this frame executes in; callee frames
    /// resolve their globals through it.
    pub module: String,
}

impl Frame {
    pub fn is_module_frame(&self) -> bool {
        self.ns == self.globals
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub frames: Vec<Frame>,
}

impl State {
    /// The initial state: a single frame whose locals are the module
    /// globals.
    pub fn initial(module: &str, globals: NsId, builtins: NsId) -> Self {
        Self {
            frames: vec![Frame {
                ns: globals,
                globals,
                builtins,
                module: module.to_string(),
            }],
        }
    }

    pub fn top(&self) -> &Frame {
        self.frames.last().expect("state has no frames")
    }

    pub fn top_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("state has no frames")
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Duplicate the mutable top frame, sharing everything else.
    pub fn hybrid_copy(&self, spaces: &mut NamespaceArena) -> State {
        let mut copy = self.clone();
        let top = copy.top_mut();
        let fresh = spaces.duplicate(top.ns);
        if top.is_module_frame() {
            top.globals = fresh;
        }
        top.ns = fresh;
        copy
    }

    /// Push a callee frame executing in `module` with the given globals.
    pub fn push_frame(&mut self, spaces: &mut NamespaceArena, module: &str, globals: NsId) {
        let builtins = self.top().builtins;
        let ns = spaces.fresh();
        self.frames.push(Frame {
            ns,
            globals,
            builtins,
            module: module.to_string(),
        });
    }

    /// Push a class-body frame: fresh locals in the enclosing module scope.
    pub fn push_class_frame(&mut self, spaces: &mut NamespaceArena) {
        let top = self.top().clone();
        let ns = spaces.fresh();
        self.frames.push(Frame {
            ns,
            globals: top.globals,
            builtins: top.builtins,
            module: top.module,
        });
    }

    pub fn pop_frame(&mut self) -> Option<Frame> {
        if self.frames.len() > 1 {
            self.frames.pop()
        } else {
            None
        }
    }

    pub fn top_ns<'a>(&self, spaces: &'a NamespaceArena) -> &'a Namespace {
        spaces.get(self.top().ns)
    }

    /// LEGB read: locals, enclosing frames of the same module, module
    /// globals, builtins. Binding-kind markers redirect.
    pub fn read_var(&self, spaces: &NamespaceArena, name: &str) -> Option<Value> {
        let top = self.top();
        let top_ns = spaces.get(top.ns);
        match top_ns.kind_of(name) {
            Some(VarKind::Global) => {
                if let Some(value) = spaces.get(top.globals).read_value(name) {
                    return Some(value.clone());
                }
            }
            Some(VarKind::Nonlocal) => {
                if let Some(value) = self.read_enclosing(spaces, name) {
                    return Some(value);
                }
            }
            Some(_) => {
                if let Some(value) = top_ns.read_value(name) {
                    return Some(value.clone());
                }
            }
            None => {}
        }

        if let Some(value) = self.read_enclosing(spaces, name) {
            return Some(value);
        }
        if let Some(value) = spaces.get(top.globals).read_value(name) {
            return Some(value.clone());
        }
        if let Some(value) = spaces.get(top.builtins).read_value(name) {
            return Some(value.clone());
        }
        None
    }

    fn read_enclosing(&self, spaces: &NamespaceArena, name: &str) -> Option<Value> {
        let top = self.top();
        for frame in self.frames.iter().rev().skip(1) {
            if frame.globals != top.globals {
                break;
            }
            if frame.is_module_frame() {
                break;
            }
            if let Some(value) = spaces.get(frame.ns).read_value(name) {
                return Some(value.clone());
            }
        }
        None
    }

    /// Write under the binding kind in force for `name`. Local writes are
    /// strong (flow-sensitive); global and nonlocal writes join, since the
    /// target namespaces are shared across states.
    pub fn write_var(&self, spaces: &mut NamespaceArena, name: &str, value: Value) {
        let top = self.top();
        match spaces.get(top.ns).kind_of(name) {
            Some(VarKind::Global) => {
                spaces.join_value(top.globals, name, &value);
            }
            Some(VarKind::Nonlocal) => {
                let target = self
                    .frames
                    .iter()
                    .rev()
                    .skip(1)
                    .take_while(|f| f.globals == top.globals && !f.is_module_frame())
                    .find(|f| spaces.get(f.ns).contains(name))
                    .map(|f| f.ns);
                match target {
                    Some(ns) => spaces.join_value(ns, name, &value),
                    None => spaces.get_mut(top.ns).write_local(name, value),
                }
            }
            _ => spaces.get_mut(top.ns).write_local(name, value),
        }
    }

    /// Record a `global`/`nonlocal` declaration marker in the top frame.
    pub fn declare(&self, spaces: &mut NamespaceArena, name: &str, kind: VarKind) {
        let top_ns = spaces.get_mut(self.top().ns);
        if top_ns.kind_of(name) != Some(kind) {
            top_ns.write_kind(name, kind, Value::new());
        }
    }

    /// ⊑ compares the mutable top frame by content; frames below are
    /// shared, and recursion may reach one point under several depths, so
    /// the stack shape itself does not participate.
    pub fn le(&self, other: &State, spaces: &NamespaceArena) -> bool {
        spaces
            .get(self.top().ns)
            .le(spaces.get(other.top().ns))
    }

    /// Join `other`'s top-frame contents into this state.
    pub fn join_with(&mut self, other: &State, spaces: &mut NamespaceArena) {
        spaces.join_into(self.top().ns, other.top().ns);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::ObjId;

    fn setup() -> (NamespaceArena, State, NsId) {
        let mut spaces = NamespaceArena::new();
        let builtins = spaces.fresh();
        let globals = spaces.fresh();
        let state = State::initial("main", globals, builtins);
        (spaces, state, builtins)
    }

    #[test]
    fn module_frame_reads_and_writes_globals() {
        let (mut spaces, state, _) = setup();
        state.write_var(&mut spaces, "x", Value::of(ObjId(1)));
        assert!(state.read_var(&spaces, "x").is_some());
    }

    #[test]
    fn function_frame_sees_globals_and_builtins() {
        let (mut spaces, mut state, builtins) = setup();
        state.write_var(&mut spaces, "g", Value::of(ObjId(1)));
        spaces
            .get_mut(builtins)
            .write_local("len", Value::of(ObjId(2)));
        let globals = state.top().globals;
        state.push_frame(&mut spaces, "main", globals);
        assert!(state.read_var(&spaces, "g").is_some());
        assert!(state.read_var(&spaces, "len").is_some());
        assert!(state.read_var(&spaces, "missing").is_none());
    }

    #[test]
    fn global_marker_redirects_writes() {
        let (mut spaces, mut state, _) = setup();
        let globals = state.top().globals;
        state.push_frame(&mut spaces, "main", globals);
        state.declare(&mut spaces, "x", VarKind::Global);
        state.write_var(&mut spaces, "x", Value::of(ObjId(5)));
        assert!(spaces.get(globals).contains("x"));
    }

    #[test]
    fn hybrid_copy_isolates_the_top_frame() {
        let (mut spaces, state, _) = setup();
        state.write_var(&mut spaces, "x", Value::of(ObjId(1)));
        let copy = state.hybrid_copy(&mut spaces);
        copy.write_var(&mut spaces, "y", Value::of(ObjId(2)));
        assert!(state.read_var(&spaces, "y").is_none());
        assert!(copy.read_var(&spaces, "x").is_some());
    }

    #[test]
    fn join_is_pointwise_on_the_top_frame() {
        let (mut spaces, state, _) = setup();
        let mut a = state.hybrid_copy(&mut spaces);
        let b = state.hybrid_copy(&mut spaces);
        a.write_var(&mut spaces, "x", Value::of(ObjId(1)));
        b.write_var(&mut spaces, "x", Value::of(ObjId(2)));
        a.join_with(&b, &mut spaces);
        let joined = a.read_var(&spaces, "x").unwrap();
        assert!(joined.contains(ObjId(1)) && joined.contains(ObjId(2)));
        assert!(a.le(&a, &spaces));
    }
}
