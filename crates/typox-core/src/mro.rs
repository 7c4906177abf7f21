//! C3 linearization over uncertain base-lists.
//!
//! A class whose base expressions evaluate to several classes carries one
//! base-list per combination, and linearization returns one MRO per
//! resolvable combination. Any `Bases_Any` base, any non-class base, and
//! any failed merge downgrade that combination to `[self, MRO_Any]`;
//! lookups that walk into `MRO_Any` return Any.

use crate::context::WellKnown;
use crate::objects::{AbstractObject, BaseLists, Mro, Mros, ObjId, ObjectArena};

/// Cap on base-choice combinations per class; beyond it the remainder
/// collapses into a single `[self, MRO_Any]`.
const MAX_COMBINATIONS: usize = 64;

pub fn mros_of(arena: &ObjectArena, wk: &WellKnown, class: ObjId) -> Mros {
    match arena.get(class) {
        AbstractObject::ArtificialClass(c) => vec![c.mro.clone()],
        AbstractObject::AnalysisClass(c) => c.mros.clone(),
        AbstractObject::TypeshedClass(_) => vec![vec![class, wk.mro_any]],
        _ => vec![vec![class, wk.mro_any]],
    }
}

/// Linearize `class` for each base-list in `bases`.
pub fn c3_linearize(
    arena: &ObjectArena,
    wk: &WellKnown,
    class: ObjId,
    bases: &BaseLists,
) -> Mros {
    if bases.is_empty() {
        return c3_linearize(arena, wk, class, &vec![vec![wk.object_type]]);
    }

    let mut mros = Mros::new();
    for base_list in bases {
        linearize_one(arena, wk, class, base_list, &mut mros);
    }
    dedup_mros(mros)
}

fn linearize_one(
    arena: &ObjectArena,
    wk: &WellKnown,
    class: ObjId,
    base_list: &[ObjId],
    out: &mut Mros,
) {
    if base_list
        .iter()
        .any(|b| *b == wk.bases_any || !arena.is_class(*b))
    {
        out.push(vec![class, wk.mro_any]);
        return;
    }

    // every base may itself have several MROs; merge one combination at a time
    let base_mros: Vec<Mros> = base_list
        .iter()
        .map(|b| mros_of(arena, wk, *b))
        .collect();

    let mut combinations: Vec<Vec<Mro>> = vec![Vec::new()];
    for choices in &base_mros {
        let mut next = Vec::new();
        for prefix in &combinations {
            for choice in choices {
                let mut extended = prefix.clone();
                extended.push(choice.clone());
                next.push(extended);
            }
            if next.len() > MAX_COMBINATIONS {
                break;
            }
        }
        combinations = next;
        if combinations.len() > MAX_COMBINATIONS {
            combinations.truncate(MAX_COMBINATIONS);
            out.push(vec![class, wk.mro_any]);
        }
    }

    for combination in combinations {
        let mut seqs: Vec<Mro> = combination;
        seqs.push(base_list.to_vec());
        match merge(seqs) {
            Some(tail) => {
                let mut mro = vec![class];
                mro.extend(tail);
                out.push(mro);
            }
            None => out.push(vec![class, wk.mro_any]),
        }
    }
}

/// The C3 merge step. `MRO_Any` participates as an ordinary element and
/// naturally sinks to the end of the linearization.
fn merge(mut seqs: Vec<Mro>) -> Option<Mro> {
    let mut result = Vec::new();
    loop {
        seqs.retain(|s| !s.is_empty());
        if seqs.is_empty() {
            return Some(result);
        }
        let candidate = seqs.iter().find_map(|seq| {
            let head = seq[0];
            let good = seqs.iter().all(|other| !other[1..].contains(&head));
            good.then_some(head)
        })?;
        result.push(candidate);
        for seq in &mut seqs {
            seq.retain(|c| *c != candidate);
        }
    }
}

fn dedup_mros(mros: Mros) -> Mros {
    let mut seen: Vec<Mro> = Vec::new();
    for mro in mros {
        if !seen.contains(&mro) {
            seen.push(mro);
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_linear_chain() {
        let a = ObjId(1);
        let b = ObjId(2);
        let o = ObjId(3);
        // B(A), A(object)
        let merged = merge(vec![vec![a, o], vec![a]]).unwrap();
        assert_eq!(merged, vec![a, o]);
        let merged = merge(vec![vec![b, a, o], vec![b]]).unwrap();
        assert_eq!(merged, vec![b, a, o]);
    }

    #[test]
    fn merge_diamond_keeps_base_order() {
        let a = ObjId(1);
        let b = ObjId(2);
        let c = ObjId(3);
        let o = ObjId(4);
        // D(B, C) with B(A), C(A)
        let merged = merge(vec![vec![b, a, o], vec![c, a, o], vec![b, c]]).unwrap();
        assert_eq!(merged, vec![b, c, a, o]);
    }

    #[test]
    fn merge_rejects_inconsistent_order() {
        let a = ObjId(1);
        let b = ObjId(2);
        // X(A, B) and Y(B, A) have no common linearization with Z(X, Y):
        // feeding contradictory sequences directly must fail
        assert!(merge(vec![vec![a, b], vec![b, a]]).is_none());
    }
}
