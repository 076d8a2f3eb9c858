//! Trace distiller (§4.J "Variants: Trace"): set-cover at whole-trace
//! granularity. Each input program is a single unit; the distiller greedily
//! admits whole programs that contribute coverage not already covered by an
//! admitted program, and performs no argument-level merging between
//! programs. Admitted programs are emitted as-is (minus their memory
//! prelude, which is recomputed exactly as finalisation does for the other
//! variants).

use super::DistillInput;
use crate::prog::Prog;
use crate::target::Target;
use std::collections::{HashMap, HashSet};

/// Total coverage contributed by a whole program: the union of every seed's
/// `cover` for that `prog_id`.
fn program_cover(input: &DistillInput, prog_id: usize) -> HashSet<u64> {
    input
        .seeds
        .for_program(prog_id)
        .flat_map(|s| s.cover.iter().copied())
        .collect()
}

pub fn distill(input: &DistillInput, target: &dyn Target) -> Vec<Prog> {
    let mut covers: Vec<(usize, HashSet<u64>)> = input
        .programs
        .iter()
        .map(|p| (p.id, program_cover(input, p.id)))
        .filter(|(_, cover)| !cover.is_empty())
        .collect();

    // Greedy set cover: repeatedly admit the program with the largest
    // still-uncovered contribution, per §4.J "greedily admits programs that
    // contribute new coverage".
    let mut covered: HashSet<u64> = HashSet::new();
    let mut admitted: Vec<usize> = Vec::new();
    loop {
        let best = covers
            .iter()
            .enumerate()
            .map(|(i, (_, cover))| (i, cover.difference(&covered).count()))
            .filter(|&(_, gain)| gain > 0)
            .max_by_key(|&(_, gain)| gain);

        let pos = match best {
            Some((pos, _)) => pos,
            None => break,
        };
        let (prog_id, cover) = covers.remove(pos);
        covered.extend(cover);
        admitted.push(prog_id);
    }
    admitted.sort_unstable();

    let mut out = Vec::new();
    for prog_id in admitted {
        let source = input.program(prog_id);

        let identity: HashMap<usize, usize> = (0..source.prog.len()).map(|i| (i, i)).collect();
        let mut memtrack = source.memtrack.simplify(&identity);
        let mut prog = source.prog.clone();
        let total = memtrack.total_memory_allocations() + memtrack.total_vma_allocations();
        if memtrack.fill_out_memory(&mut prog).is_err() {
            continue;
        }

        if total > 0 {
            let mut prelude = Prog::new();
            prelude.push(target.make_mmap(0, total));
            prelude.calls.extend(prog.calls);
            out.push(prelude);
        } else {
            out.push(prog);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distill::SourceProgram;
    use crate::memtrack::MemoryTracker;
    use crate::prog::{Arg, Call};
    use crate::seed::{Seed, Seeds};
    use crate::target::StaticTarget;

    fn program(id: usize, value: u64) -> SourceProgram {
        let mut prog = Prog::new();
        prog.push(Call::new("socket$unix", vec![], Arg::Const(value)));
        SourceProgram {
            id,
            prog,
            memtrack: MemoryTracker::new(),
        }
    }

    #[test]
    fn admits_only_programs_with_coverage_not_already_subsumed() {
        let programs = vec![program(0, 3), program(1, 4), program(2, 5)];
        let mut seeds = Seeds::new();
        // Program 0 covers {1,2,3}; program 1 covers {1,2} (fully subsumed);
        // program 2 covers {4}, which program 0 doesn't reach.
        seeds.seeds.push(Seed {
            prog_id: 0,
            call_idx: 0,
            cover: vec![1, 2, 3],
            depends_on: Default::default(),
        });
        seeds.seeds.push(Seed {
            prog_id: 1,
            call_idx: 0,
            cover: vec![1, 2],
            depends_on: Default::default(),
        });
        seeds.seeds.push(Seed {
            prog_id: 2,
            call_idx: 0,
            cover: vec![4],
            depends_on: Default::default(),
        });

        let input = DistillInput { programs, seeds };
        let target = StaticTarget::new();
        let out = distill(&input, &target);
        // Program 0 admitted first (largest cover), then program 2 (still
        // contributes {4}); program 1 contributes nothing new and is skipped.
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn programs_with_no_seed_coverage_are_never_admitted() {
        let programs = vec![program(0, 3)];
        let input = DistillInput {
            programs,
            seeds: Seeds::new(),
        };
        let target = StaticTarget::new();
        let out = distill(&input, &target);
        assert!(out.is_empty());
    }
}
