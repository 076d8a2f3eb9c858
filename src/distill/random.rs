//! Random distiller (§4.J "Variants: Random"): picks `|heavy_hitters|` seeds
//! uniformly at random from the full seed bag, then applies the explicit
//! merge to each.

use super::{add_to_distilled_prog, build_graph, finalize, heavy_hitters, DistillInput, MergeState};
use crate::prog::Prog;
use crate::target::Target;
use rand::seq::SliceRandom;

pub fn distill(input: &DistillInput, target: &dyn Target) -> Vec<Prog> {
    let count = heavy_hitters(input).len();
    let mut graph = build_graph(input);
    let mut state = MergeState::new();

    let mut all_idxs: Vec<usize> = (0..input.seeds.len()).collect();
    all_idxs.shuffle(&mut rand::thread_rng());
    all_idxs.truncate(count);

    for seed_idx in all_idxs {
        let seed = &input.seeds.seeds[seed_idx];
        add_to_distilled_prog(input, &graph, &mut state, seed.prog_id, seed.call_idx, None);
    }

    finalize(input, &mut graph, &state, target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distill::SourceProgram;
    use crate::memtrack::MemoryTracker;
    use crate::prog::{Arg, Call};
    use crate::seed::{Seed, Seeds};
    use crate::target::StaticTarget;

    #[test]
    fn never_picks_more_seeds_than_there_are_heavy_hitters() {
        let mut prog = Prog::new();
        prog.push(Call::new("socket$unix", vec![], Arg::Const(3)));
        prog.push(Call::new("socket$unix", vec![], Arg::Const(4)));

        let mut seeds = Seeds::new();
        // Both seeds cover the same unit, so only one is a heavy hitter.
        seeds.seeds.push(Seed {
            prog_id: 0,
            call_idx: 0,
            cover: vec![1],
            depends_on: Default::default(),
        });
        seeds.seeds.push(Seed {
            prog_id: 0,
            call_idx: 1,
            cover: vec![1],
            depends_on: Default::default(),
        });

        let input = DistillInput {
            programs: vec![SourceProgram {
                id: 0,
                prog,
                memtrack: MemoryTracker::new(),
            }],
            seeds,
        };
        let target = StaticTarget::new();
        let out = distill(&input, &target);
        assert_eq!(out.len(), 1);
    }
}
