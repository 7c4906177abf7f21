//! End-to-end scenarios: module bodies in, values of named variables at
//! module exit out.

use std::path::PathBuf;

use typox_core::context::{AnalysisContext, AnalysisMode};
use typox_core::engine::Analysis;
use typox_core::objects::AbstractObject;
use typox_core::typeshed::SearchContext;
use typox_core::Value;

fn with_analysis(source: &str, check: impl FnOnce(&mut Analysis<'_>)) {
    let dir = tempfile::tempdir().unwrap();
    let main = dir.path().join("main.py");
    std::fs::write(&main, source).unwrap();

    let search = SearchContext::new(PathBuf::from("/nonexistent-stubs"), (3, 9), "linux");
    let mut ctx =
        AnalysisContext::new(search, AnalysisMode::Crude).with_project_root(dir.path().into());
    let mut analysis = Analysis::new(&mut ctx, &main).unwrap();
    analysis.compute_fixed_point().unwrap();
    check(&mut analysis);
}

fn exit_value(analysis: &Analysis<'_>, name: &str) -> Value {
    analysis
        .variable_at_exit(name)
        .unwrap_or_else(|| panic!("{name} unbound at module exit"))
}

#[test]
fn primitive_assignment_flows_through_names() {
    with_analysis("x = 1\ny = x\n", |analysis| {
        let int_instance = analysis.ctx.wk.int_instance;
        assert!(exit_value(analysis, "x").contains(int_instance));
        assert!(exit_value(analysis, "y").contains(int_instance));
    });
}

#[test]
fn class_definition_builds_mro_and_instances() {
    let source = "\
class Base:
    pass

class D(Base):
    pass

d = D()
";
    with_analysis(source, |analysis| {
        let d_class = exit_value(analysis, "D").single().expect("one class for D");
        let base_class = exit_value(analysis, "Base").single().expect("one class");
        let object_type = analysis.ctx.wk.object_type;

        let AbstractObject::AnalysisClass(class) = analysis.ctx.arena.get(d_class) else {
            panic!("D is not an analysis class");
        };
        assert_eq!(class.mros, vec![vec![d_class, base_class, object_type]]);

        let d = exit_value(analysis, "d").single().expect("one instance");
        let AbstractObject::AnalysisInstance(instance) = analysis.ctx.arena.get(d) else {
            panic!("d is not an instance");
        };
        assert_eq!(instance.class, d_class);
    });
}

#[test]
fn function_call_returns_its_value() {
    let source = "\
def f():
    return 1

a = f()
";
    with_analysis(source, |analysis| {
        let int_instance = analysis.ctx.wk.int_instance;
        assert!(exit_value(analysis, "a").contains(int_instance));
    });
}

#[test]
fn descriptor_get_routes_through_the_descriptor_function() {
    let source = "\
class P:
    def __get__(self, i, t):
        return 1

class C:
    p = P()

c = C()
v = c.p
";
    with_analysis(source, |analysis| {
        let int_instance = analysis.ctx.wk.int_instance;
        let v = exit_value(analysis, "v");
        assert!(v.contains(int_instance), "v is {v}");
    });
}

#[test]
fn super_call_dispatches_along_the_mro() {
    let source = "\
class A:
    def f(self):
        return 1

class B(A):
    def f(self):
        return super().f()

r = B().f()
";
    with_analysis(source, |analysis| {
        let int_instance = analysis.ctx.wk.int_instance;
        let r = exit_value(analysis, "r");
        assert!(r.contains(int_instance), "r is {r}");
    });
}

#[test]
fn property_decorator_reads_go_through_the_getter() {
    let source = "\
class C:
    @property
    def v(self):
        return 1

c = C()
x = c.v
";
    with_analysis(source, |analysis| {
        let int_instance = analysis.ctx.wk.int_instance;
        let x = exit_value(analysis, "x");
        assert!(x.contains(int_instance), "x is {x}");
    });
}

#[test]
fn instance_attribute_writes_land_in_the_heap() {
    let source = "\
class C:
    def __init__(self):
        self.x = 1

c = C()
y = c.x
";
    with_analysis(source, |analysis| {
        let int_instance = analysis.ctx.wk.int_instance;
        let y = exit_value(analysis, "y");
        assert!(y.contains(int_instance), "y is {y}");
    });
}

#[test]
fn methods_bind_their_receiver() {
    let source = "\
class C:
    def get(self):
        return self

c = C()
d = c.get()
";
    with_analysis(source, |analysis| {
        let c = exit_value(analysis, "c");
        let d = exit_value(analysis, "d");
        for obj in c.iter() {
            assert!(d.contains(obj), "the receiver flows back out of get()");
        }
    });
}

#[test]
fn for_loop_iterates_container_elements() {
    let source = "\
xs = [1, 2]
total = 0
for x in xs:
    total = total + x
";
    with_analysis(source, |analysis| {
        let int_instance = analysis.ctx.wk.int_instance;
        assert!(exit_value(analysis, "x").contains(int_instance));
        assert!(exit_value(analysis, "total").contains(int_instance));
    });
}

#[test]
fn branches_join_their_environments() {
    let source = "\
if c:
    x = 1
else:
    x = 'a'
";
    with_analysis(source, |analysis| {
        let wk = &analysis.ctx.wk;
        let x = exit_value(analysis, "x");
        assert!(x.contains(wk.int_instance));
        assert!(x.contains(wk.str_instance));
    });
}

#[test]
fn builtin_effects_apply() {
    let source = "\
n = len([1])
s = sorted([1])
b = isinstance(n, int)
";
    with_analysis(source, |analysis| {
        let wk = analysis.ctx.wk.clone();
        assert!(exit_value(analysis, "n").contains(wk.int_instance));
        assert!(exit_value(analysis, "b").contains(wk.bool_instance));
        // sorted flows its argument through
        let s = exit_value(analysis, "s");
        assert!(!s.is_empty());
    });
}

#[test]
fn missing_import_degrades_to_any() {
    with_analysis("import nosuchmodule\nx = nosuchmodule\n", |analysis| {
        assert!(exit_value(analysis, "x").is_any());
    });
}

#[test]
fn recursion_terminates() {
    let source = "\
def f(n):
    return f(n)

a = f(1)
";
    with_analysis(source, |_analysis| {});
}

#[test]
fn fixed_point_holds_after_termination() {
    let source = "\
class A:
    def f(self):
        return 1

a = A()
x = a.f()
y = x + 1
";
    with_analysis(source, |analysis| {
        analysis.verify_fixed_point().unwrap();
    });
}

#[test]
fn classmethod_and_staticmethod_bind_accordingly() {
    let source = "\
class C:
    def f(cls):
        return 1
    g = classmethod(f)

x = C.g()
";
    with_analysis(source, |analysis| {
        let int_instance = analysis.ctx.wk.int_instance;
        let x = exit_value(analysis, "x");
        assert!(x.contains(int_instance), "x is {x}");
    });
}

#[test]
fn mode_comparison_runs() {
    let dir = tempfile::tempdir().unwrap();
    let main = dir.path().join("main.py");
    std::fs::write(&main, "x = 1\ny = x\n").unwrap();
    let search = SearchContext::new(PathBuf::from("/nonexistent-stubs"), (3, 9), "linux");

    let mut reports = Vec::new();
    for mode in [AnalysisMode::Crude, AnalysisMode::Refined] {
        let mut ctx =
            AnalysisContext::new(search.clone(), mode).with_project_root(dir.path().into());
        let mut analysis = Analysis::new(&mut ctx, &main).unwrap();
        analysis.compute_fixed_point().unwrap();
        reports.push(analysis.report());
    }
    let summary = typox_core::output::compare_reports(&reports[0], &reports[1]);
    assert_eq!(summary.differing, 0, "straight-line code cannot disagree");
}
