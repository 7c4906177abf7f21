//! Property tests for the universal lattice invariants: join correctness,
//! idempotence, monotonicity of attribute lookup, and MRO validity.

use proptest::prelude::*;

use typox_core::context::{AnalysisContext, AnalysisMode};
use typox_core::mro::c3_linearize;
use typox_core::namespace::Namespace;
use typox_core::objects::{AbstractObject, AnalysisClass, ObjId};
use typox_core::typeshed::SearchContext;
use typox_core::Value;
use typox_cfg::Label;

fn fresh_ctx() -> AnalysisContext {
    AnalysisContext::new(
        SearchContext::new("/nonexistent".into(), (3, 9), "linux"),
        AnalysisMode::Crude,
    )
}

fn arb_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        1 => Just(Value::any()),
        4 => proptest::collection::vec(0u32..32, 0..6)
            .prop_map(|ids| ids.into_iter().map(ObjId).collect::<Value>()),
    ]
}

proptest! {
    #[test]
    fn join_is_an_upper_bound(a in arb_value(), b in arb_value()) {
        let joined = a.clone().join(&b);
        prop_assert!(a.le(&joined));
        prop_assert!(b.le(&joined));
    }

    #[test]
    fn join_is_idempotent(a in arb_value()) {
        prop_assert_eq!(a.clone().join(&a), a);
    }

    #[test]
    fn bottom_is_a_join_unit(a in arb_value()) {
        prop_assert_eq!(a.clone().join(&Value::new()), a.clone());
        prop_assert_eq!(Value::new().join(&a), a);
    }

    #[test]
    fn any_is_absorbing(a in arb_value()) {
        prop_assert!(a.clone().join(&Value::any()).is_any());
        prop_assert!(Value::any().join(&a).is_any());
    }

    #[test]
    fn le_is_a_partial_order(a in arb_value(), b in arb_value(), c in arb_value()) {
        prop_assert!(a.le(&a));
        if a.le(&b) && b.le(&a) {
            prop_assert_eq!(&a, &b);
        }
        if a.le(&b) && b.le(&c) {
            prop_assert!(a.le(&c));
        }
    }

    #[test]
    fn namespace_join_is_an_upper_bound(
        names_a in proptest::collection::vec("[a-d]", 0..4),
        names_b in proptest::collection::vec("[a-d]", 0..4),
    ) {
        let mut a = Namespace::new();
        for (i, name) in names_a.iter().enumerate() {
            a.write_local(name.clone(), Value::of(ObjId(i as u32)));
        }
        let mut b = Namespace::new();
        for (i, name) in names_b.iter().enumerate() {
            b.write_local(name.clone(), Value::of(ObjId((i + 10) as u32)));
        }
        let mut joined = a.clone();
        joined.join_with(&b);
        prop_assert!(a.le(&joined));
        prop_assert!(b.le(&joined));
    }
}

/// Build a random single-inheritance-with-occasional-diamonds hierarchy and
/// check §MRO validity: the class heads its MRO, every base appears, and
/// the relative order of any two bases is preserved.
proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]
    #[test]
    fn mro_validity(base_picks in proptest::collection::vec(0usize..4, 1..8)) {
        let mut ctx = fresh_ctx();
        let mut classes: Vec<ObjId> = vec![ctx.wk.object_type];

        for (index, pick) in base_picks.iter().enumerate() {
            // choose one or two earlier classes as bases
            let first = classes[pick % classes.len()];
            let second = classes[(pick + 1) % classes.len()];
            let bases: Vec<ObjId> = if first == second {
                vec![first]
            } else {
                vec![first, second]
            };
            let base_lists = vec![bases.clone()];

            let dict = ctx.spaces.alloc(Namespace::new());
            let class = ctx.arena.alloc(AbstractObject::AnalysisClass(AnalysisClass {
                name: format!("C{index}"),
                module: "p".to_string(),
                def_label: Label(1000 + index as u32),
                bases: base_lists.clone(),
                mros: Vec::new(),
                dict,
            }));
            let mros = c3_linearize(&ctx.arena, &ctx.wk, class, &base_lists);
            if let AbstractObject::AnalysisClass(c) = ctx.arena.get_mut(class) {
                c.mros = mros.clone();
            }

            for mro in &mros {
                prop_assert_eq!(mro[0], class, "class heads its own MRO");
                if mro.get(1) == Some(&ctx.wk.mro_any) {
                    continue;
                }
                for base in &bases {
                    prop_assert!(mro.contains(base), "every base appears in the MRO");
                }
                // relative order of the bases is preserved
                let positions: Vec<usize> = bases
                    .iter()
                    .map(|b| mro.iter().position(|c| c == b).unwrap())
                    .collect();
                for pair in positions.windows(2) {
                    prop_assert!(pair[0] < pair[1], "base order preserved in {mro:?}");
                }
            }
            classes.push(class);
        }
    }
}

/// Monotonicity of the attribute read: a bigger receiver set cannot shrink
/// the result.
proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]
    #[test]
    fn getattr_is_monotone(extra in 0u32..3) {
        let mut ctx = fresh_ctx();
        // a small world: two classes with one method each
        let mut receivers = Vec::new();
        for i in 0..3u32 {
            let mut dict = Namespace::new();
            let func = ctx.arena.alloc(AbstractObject::AnalysisFunction(
                typox_core::objects::AnalysisFunction {
                    name: format!("m{i}"),
                    module: "p".to_string(),
                    def_label: Label(2000 + i),
                    entry: Label(2100 + i),
                    exit: Label(2200 + i),
                    defaults: Default::default(),
                    is_generator: false,
                    defining_class: None,
                },
            ));
            dict.write_local("m", Value::of(func));
            let dict = ctx.spaces.alloc(dict);
            let class = ctx.arena.alloc(AbstractObject::AnalysisClass(AnalysisClass {
                name: format!("K{i}"),
                module: "p".to_string(),
                def_label: Label(2300 + i),
                bases: vec![vec![ctx.wk.object_type]],
                mros: Vec::new(),
                dict,
            }));
            let mros = c3_linearize(&ctx.arena, &ctx.wk, class, &vec![vec![ctx.wk.object_type]]);
            if let AbstractObject::AnalysisClass(c) = ctx.arena.get_mut(class) {
                c.mros = mros;
            }
            let address = typox_core::objects::HeapAddress {
                site: Label(2400 + i),
                context: Default::default(),
            };
            ctx.heap.ensure(address.clone(), &mut ctx.spaces);
            receivers.push(ctx.arena.analysis_instance(class, address));
        }

        let small: Value = receivers.iter().take(1).copied().collect();
        let large: Value = receivers
            .iter()
            .take(1 + extra as usize)
            .copied()
            .collect();

        let (small_res, small_descr) = typox_core::attr::getattrs(&mut ctx, &small, "m");
        let (large_res, large_descr) = typox_core::attr::getattrs(&mut ctx, &large, "m");
        prop_assert!(small_res.le(&large_res));
        prop_assert!(small_descr.le(&large_descr));
    }
}
