// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use plicsim_core::plic::{ArbitrationController, ControllerConfig, PendingMode, DEFAULT_PRIORITY};
use proptest::prelude::*;

const SOURCES: u32 = 6;
const CONSUMERS: u32 = 3;

#[derive(Debug, Clone)]
enum Op {
    Level(u32, bool),
    Priority(u32, u32),
    Enable(u32, u32, bool),
    Claim(u32),
    CompleteTop(u32),
    Complete(u32, u32),
    Force(Option<u32>),
    Reset,
}

fn mode_strategy() -> impl Strategy<Value = PendingMode> {
    prop_oneof![Just(PendingMode::EdgeCapture), Just(PendingMode::LevelSample)]
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (1..=SOURCES, any::<bool>()).prop_map(|(s, l)| Op::Level(s, l)),
        2 => (1..=SOURCES, 0u32..4).prop_map(|(s, p)| Op::Priority(s, p)),
        4 => (0..CONSUMERS, 1..=SOURCES, any::<bool>()).prop_map(|(c, s, e)| Op::Enable(c, s, e)),
        4 => (0..CONSUMERS).prop_map(Op::Claim),
        3 => (0..CONSUMERS).prop_map(Op::CompleteTop),
        1 => (0..CONSUMERS, 1..=SOURCES).prop_map(|(c, s)| Op::Complete(c, s)),
        1 => prop::option::of(0..CONSUMERS + 1).prop_map(Op::Force),
        1 => Just(Op::Reset),
    ]
}

fn controller(sources: u32, consumers: u32, mode: PendingMode) -> ArbitrationController {
    ArbitrationController::new(ControllerConfig {
        sources,
        consumers,
        mode,
        ..Default::default()
    })
    .unwrap()
}

fn apply(plic: &ArbitrationController, op: &Op) {
    match *op {
        Op::Level(s, l) => plic.set_source_level(s, l),
        Op::Priority(s, p) => plic.set_source_priority(s, p),
        Op::Enable(c, s, e) => plic.enable_source(c, s, e),
        Op::Claim(c) => {
            let before = plic.active_interrupts(c);
            let id = plic.claim(c);
            if id != 0 {
                assert!(!before.contains(&id), "{} delivered twice to {}", id, c);
                let mut expected = before;
                expected.push(id);
                assert_eq!(plic.active_interrupts(c), expected);
            }
        }
        Op::CompleteTop(c) => {
            if let Some(&top) = plic.active_interrupts(c).last() {
                plic.complete(c, top);
            }
        }
        Op::Complete(c, s) => {
            let before = plic.active_interrupts(c);
            plic.complete(c, s);
            if before.last() != Some(&s) {
                assert_eq!(plic.active_interrupts(c), before);
            }
        }
        Op::Force(f) => plic.set_forced_consumer(f),
        Op::Reset => plic.reset(),
    }
}

fn expected_line(plic: &ArbitrationController, consumer: u32) -> bool {
    if plic.forced_consumer().is_some_and(|f| f != consumer) {
        return false;
    }
    let top = plic
        .active_interrupts(consumer)
        .last()
        .map_or(0, |&s| plic.source_priority(s));
    plic.pending_sources(consumer)
        .iter()
        .any(|&s| plic.source_priority(s) > top)
}

fn check_invariants(plic: &ArbitrationController) {
    for c in 0..plic.number_of_consumers() {
        let active = plic.active_interrupts(c);
        let pending = plic.pending_sources(c);
        for (i, id) in active.iter().enumerate() {
            assert!(!active[i + 1..].contains(id), "duplicate {} on stack of {}", id, c);
            assert!(!pending.contains(id), "{} both pending and active on {}", id, c);
        }
        assert_eq!(plic.output_line(c), expected_line(plic, c), "line of consumer {}", c);
        assert_eq!(plic.line(c).unwrap().is_set(), plic.output_line(c));
    }
}

proptest! {
    #[test]
    fn test_claim_picks_highest_priority_lowest_id(
        priorities in prop::collection::vec(0u32..8, 1..16),
        asserted in any::<u16>(),
        mode in mode_strategy(),
    ) {
        let n = priorities.len() as u32;
        let plic = controller(n, 1, mode);
        for (i, &p) in priorities.iter().enumerate() {
            let id = i as u32 + 1;
            plic.set_source_priority(id, p);
            plic.enable_source(0, id, true);
        }
        for id in 1..=n {
            if asserted & (1 << (id - 1)) != 0 {
                plic.set_source_level(id, true);
            }
        }

        let expected = (1..=n)
            .filter(|&id| asserted & (1 << (id - 1)) != 0 && priorities[id as usize - 1] > 0)
            .max_by(|&a, &b| {
                priorities[a as usize - 1]
                    .cmp(&priorities[b as usize - 1])
                    .then(b.cmp(&a))
            })
            .unwrap_or(0);
        prop_assert_eq!(plic.claim(0), expected);
    }

    #[test]
    fn test_random_operations_keep_invariants(
        ops in prop::collection::vec(op_strategy(), 1..80),
        mode in mode_strategy(),
    ) {
        let plic = controller(SOURCES, CONSUMERS, mode);
        for op in &ops {
            apply(&plic, op);
            check_invariants(&plic);
        }
    }

    #[test]
    fn test_forced_consumer_isolates_others(
        ops in prop::collection::vec(op_strategy(), 0..40),
        forced in 0..CONSUMERS + 2,
        mode in mode_strategy(),
    ) {
        let plic = controller(SOURCES, CONSUMERS, mode);
        for op in &ops {
            apply(&plic, op);
        }
        plic.set_forced_consumer(Some(forced));
        for s in 1..=SOURCES {
            plic.set_source_level(s, true);
        }
        for c in (0..CONSUMERS).filter(|&c| c != forced) {
            prop_assert!(!plic.output_line(c));
            prop_assert_eq!(plic.claim(c), 0);
        }
    }

    #[test]
    fn test_reset_is_idempotent(
        ops in prop::collection::vec(op_strategy(), 0..60),
        mode in mode_strategy(),
    ) {
        let plic = controller(SOURCES, CONSUMERS, mode);
        for op in &ops {
            apply(&plic, op);
        }
        plic.reset();
        let once = plic.snapshot();
        plic.reset();
        prop_assert_eq!(&plic.snapshot(), &once);

        for c in 0..CONSUMERS {
            prop_assert!(!plic.output_line(c));
            prop_assert!(plic.active_interrupts(c).is_empty());
            prop_assert!(plic.pending_sources(c).is_empty());
        }
        for s in 1..=SOURCES {
            prop_assert_eq!(plic.source_priority(s), DEFAULT_PRIORITY);
            prop_assert!(!plic.source_level(s));
        }
    }

    #[test]
    fn test_snapshot_restore_reproduces_behaviour(
        ops in prop::collection::vec(op_strategy(), 0..60),
        tail in prop::collection::vec(op_strategy(), 0..20),
        mode in mode_strategy(),
    ) {
        let live = controller(SOURCES, CONSUMERS, mode);
        for op in &ops {
            apply(&live, op);
        }
        let copy = controller(SOURCES, CONSUMERS, mode);
        copy.restore(&live.snapshot()).unwrap();
        prop_assert_eq!(copy.snapshot(), live.snapshot());

        for op in &tail {
            apply(&live, op);
            apply(&copy, op);
        }
        prop_assert_eq!(copy.snapshot(), live.snapshot());
    }
}
