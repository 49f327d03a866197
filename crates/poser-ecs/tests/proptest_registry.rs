//! Property tests for registry operations.
//!
//! These tests use `proptest` to generate random sequences of registry
//! operations and check them against a plain model (a map from entity to the
//! set of component kinds it holds).

use std::collections::{BTreeSet, HashMap};

use poser_ecs::prelude::*;
use proptest::prelude::*;

#[derive(Debug, Clone, PartialEq)]
struct A(i32);

#[derive(Debug, Clone, PartialEq)]
struct B(i32);

#[derive(Debug, Clone, PartialEq)]
struct C(i32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Kind {
    A,
    B,
    C,
}

/// Operations we can perform on the registry.
#[derive(Debug, Clone)]
enum Op {
    Create,
    Spawn { a: bool, b: bool, c: bool, v: i32 },
    Destroy(usize),
    DestroyTwice(usize),
    Add(usize, Kind, i32),
    Remove(usize, Kind),
    Clear,
}

fn kind_strategy() -> impl Strategy<Value = Kind> {
    prop_oneof![Just(Kind::A), Just(Kind::B), Just(Kind::C)]
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Create),
        6 => (any::<bool>(), any::<bool>(), any::<bool>(), -1000i32..1000)
            .prop_map(|(a, b, c, v)| Op::Spawn { a, b, c, v }),
        2 => (0..64usize).prop_map(Op::Destroy),
        1 => (0..64usize).prop_map(Op::DestroyTwice),
        6 => (0..64usize, kind_strategy(), -1000i32..1000).prop_map(|(i, k, v)| Op::Add(i, k, v)),
        3 => (0..64usize, kind_strategy()).prop_map(|(i, k)| Op::Remove(i, k)),
        1 => Just(Op::Clear),
    ]
}

/// Every entity ever issued, live or dead, so that stale handles get
/// exercised too.
fn pick(issued: &[Entity], idx: usize) -> Option<Entity> {
    if issued.is_empty() {
        None
    } else {
        Some(issued[idx % issued.len()])
    }
}

fn add(reg: &mut Registry, e: Entity, kind: Kind, v: i32) -> bool {
    match kind {
        Kind::A => reg.add_component(e, A(v)).is_some(),
        Kind::B => reg.add_component(e, B(v)).is_some(),
        Kind::C => reg.add_component(e, C(v)).is_some(),
    }
}

fn remove(reg: &mut Registry, e: Entity, kind: Kind) {
    match kind {
        Kind::A => {
            let _ = reg.remove_component::<A>(e);
        }
        Kind::B => {
            let _ = reg.remove_component::<B>(e);
        }
        Kind::C => {
            let _ = reg.remove_component::<C>(e);
        }
    }
}

fn expected(model: &HashMap<Entity, BTreeSet<Kind>>, kinds: &[Kind]) -> Vec<Entity> {
    let mut out: Vec<Entity> = model
        .iter()
        .filter(|(_, held)| kinds.iter().all(|k| held.contains(k)))
        .map(|(e, _)| *e)
        .collect();
    out.sort_by_key(|e| e.index());
    out
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2_000))]

    #[test]
    fn registry_matches_model(ops in prop::collection::vec(op_strategy(), 1..80)) {
        let mut reg = Registry::new();
        let mut model: HashMap<Entity, BTreeSet<Kind>> = HashMap::new();
        let mut issued: Vec<Entity> = Vec::new();

        // Long-lived queries observe every step.
        let mut q_ab = reg.selection::<(A, B)>();
        let mut q_bc = reg.selection::<(B, C)>();
        let mut q_abc = reg.selection::<(A, B, C)>();

        for op in ops {
            match op {
                Op::Create => {
                    let e = reg.create_entity();
                    prop_assert!(!issued.contains(&e), "entity handle reissued");
                    issued.push(e);
                    model.insert(e, BTreeSet::new());
                }
                Op::Spawn { a, b, c, v } => {
                    let e = match (a, b, c) {
                        (true, true, true) => reg.spawn((A(v), B(v), C(v))),
                        (true, true, false) => reg.spawn((A(v), B(v))),
                        (true, false, true) => reg.spawn((A(v), C(v))),
                        (false, true, true) => reg.spawn((B(v), C(v))),
                        (true, false, false) => reg.spawn((A(v),)),
                        (false, true, false) => reg.spawn((B(v),)),
                        (false, false, true) => reg.spawn((C(v),)),
                        (false, false, false) => reg.spawn(()),
                    };
                    prop_assert!(!issued.contains(&e), "entity handle reissued");
                    issued.push(e);
                    let mut held = BTreeSet::new();
                    if a { held.insert(Kind::A); }
                    if b { held.insert(Kind::B); }
                    if c { held.insert(Kind::C); }
                    model.insert(e, held);
                }
                Op::Destroy(idx) => {
                    if let Some(e) = pick(&issued, idx) {
                        let was_alive = model.remove(&e).is_some();
                        prop_assert_eq!(reg.destroy_entity(e), was_alive);
                    }
                }
                Op::DestroyTwice(idx) => {
                    if let Some(e) = pick(&issued, idx) {
                        model.remove(&e);
                        reg.destroy_entity(e);
                        prop_assert!(!reg.destroy_entity(e));
                    }
                }
                Op::Add(idx, kind, v) => {
                    if let Some(e) = pick(&issued, idx) {
                        let stored = add(&mut reg, e, kind, v);
                        match model.get_mut(&e) {
                            Some(held) => {
                                prop_assert!(stored);
                                held.insert(kind);
                                // add then get returns the value just stored.
                                let read = match kind {
                                    Kind::A => reg.get_component::<A>(e).map(|x| x.0),
                                    Kind::B => reg.get_component::<B>(e).map(|x| x.0),
                                    Kind::C => reg.get_component::<C>(e).map(|x| x.0),
                                };
                                prop_assert_eq!(read, Some(v));
                            }
                            None => prop_assert!(!stored),
                        }
                    }
                }
                Op::Remove(idx, kind) => {
                    if let Some(e) = pick(&issued, idx) {
                        remove(&mut reg, e, kind);
                        if let Some(held) = model.get_mut(&e) {
                            held.remove(&kind);
                        }
                    }
                }
                Op::Clear => {
                    reg.clear();
                    model.clear();
                }
            }

            prop_assert_eq!(reg.entity_count(), model.len());
            prop_assert_eq!(q_ab.entities(&reg).to_vec(), expected(&model, &[Kind::A, Kind::B]));
            prop_assert_eq!(q_bc.entities(&reg).to_vec(), expected(&model, &[Kind::B, Kind::C]));
            prop_assert_eq!(
                q_abc.entities(&reg).to_vec(),
                expected(&model, &[Kind::A, Kind::B, Kind::C])
            );

            for &e in &issued {
                let held = model.get(&e);
                prop_assert_eq!(reg.is_alive(e), held.is_some());
                prop_assert_eq!(
                    reg.has_component::<A>(e),
                    held.is_some_and(|h| h.contains(&Kind::A))
                );
                prop_assert_eq!(
                    reg.has_component::<B>(e),
                    held.is_some_and(|h| h.contains(&Kind::B))
                );
                prop_assert_eq!(
                    reg.has_component::<C>(e),
                    held.is_some_and(|h| h.contains(&Kind::C))
                );
            }
        }
    }

    /// A fresh query built at the end agrees with the long-lived one.
    #[test]
    fn fresh_and_cached_queries_agree(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let mut reg = Registry::new();
        let mut issued: Vec<Entity> = Vec::new();
        let mut cached = reg.selection::<(A, C)>();
        for op in ops {
            match op {
                Op::Create => issued.push(reg.create_entity()),
                Op::Spawn { v, .. } => issued.push(reg.spawn((A(v), C(v)))),
                Op::Destroy(idx) | Op::DestroyTwice(idx) => {
                    if let Some(e) = pick(&issued, idx) {
                        reg.destroy_entity(e);
                    }
                }
                Op::Add(idx, kind, v) => {
                    if let Some(e) = pick(&issued, idx) {
                        add(&mut reg, e, kind, v);
                    }
                }
                Op::Remove(idx, kind) => {
                    if let Some(e) = pick(&issued, idx) {
                        remove(&mut reg, e, kind);
                    }
                }
                Op::Clear => reg.clear(),
            }
            let _ = cached.count(&reg);
        }
        let mut fresh = reg.selection::<(A, C)>();
        prop_assert_eq!(cached.entities(&reg).to_vec(), fresh.entities(&reg).to_vec());
    }
}
