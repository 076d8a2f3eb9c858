//! Explicit distiller (§4.J "Variants: Explicit"): upstream is the strict
//! resource-level dependency closure, with no implicit-deps expansion.

use super::{add_to_distilled_prog, build_graph, finalize, heavy_hitters, DistillInput, MergeState};
use crate::prog::Prog;
use crate::target::Target;

pub fn distill(input: &DistillInput, target: &dyn Target) -> Vec<Prog> {
    let mut graph = build_graph(input);
    let hitters = heavy_hitters(input);
    let mut state = MergeState::new();

    for seed_idx in hitters {
        let seed = &input.seeds.seeds[seed_idx];
        add_to_distilled_prog(input, &graph, &mut state, seed.prog_id, seed.call_idx, None);
    }

    finalize(input, &mut graph, &state, target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memtrack::MemoryTracker;
    use crate::distill::SourceProgram;
    use crate::prog::{Arg, Call};
    use crate::seed::{Seed, Seeds};
    use crate::target::StaticTarget;

    #[test]
    fn emits_one_program_per_disjoint_seed_chain() {
        let mut prog_a = Prog::new();
        prog_a.push(Call::new(
            "open",
            vec![],
            Arg::Result {
                value: 3,
                producer: None,
            },
        ));
        prog_a.push(Call::new(
            "write",
            vec![Arg::Result {
                value: 3,
                producer: Some(0),
            }],
            Arg::Const(8),
        ));

        let mut prog_b = Prog::new();
        prog_b.push(Call::new("socket$unix", vec![], Arg::Const(4)));

        let mut seeds = Seeds::new();
        seeds.seeds.push(Seed {
            prog_id: 0,
            call_idx: 1,
            cover: vec![10, 11],
            depends_on: Default::default(),
        });
        seeds.seeds.push(Seed {
            prog_id: 1,
            call_idx: 0,
            cover: vec![20],
            depends_on: Default::default(),
        });

        let input = DistillInput {
            programs: vec![
                SourceProgram {
                    id: 0,
                    prog: prog_a,
                    memtrack: MemoryTracker::new(),
                },
                SourceProgram {
                    id: 1,
                    prog: prog_b,
                    memtrack: MemoryTracker::new(),
                },
            ],
            seeds,
        };

        let target = StaticTarget::new();
        let out = distill(&input, &target);
        assert_eq!(out.len(), 2);
        let lengths: Vec<usize> = out.iter().map(Prog::len).collect();
        assert!(lengths.contains(&2));
        assert!(lengths.contains(&1));
    }
}
