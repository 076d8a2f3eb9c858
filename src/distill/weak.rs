//! Weak distiller (§4.J "Variants: Weak"): a bounded two-hop expansion
//! around each seed's neighbourhood, rather than a strict resource-level
//! closure.
//!
//! §9 flags the source's neighbour-harvest loop as buggy (two lock-step
//! counters and a pair of "found" flags that never trip on the happy path).
//! Resolution, also recorded in DESIGN.md: two independent bounded scans —
//! one walking left from the seed's call index, one walking right — each
//! stopping at the program edge or once it has collected `RADIUS`
//! seed-neighbours.

use super::{build_graph, finalize, heavy_hitters, merge_calls_into, DistillInput, MergeState};
use crate::depgraph::DependencyGraph;
use crate::prog::Prog;
use crate::seed::Seeds;
use crate::target::Target;
use std::collections::HashSet;

const RADIUS: usize = 2;

/// Seed call indices within `RADIUS` positions before or after `call_idx`
/// in the same program (scanning outward from `call_idx`, not merely the
/// fixed window `[call_idx-RADIUS, call_idx+RADIUS]`, so that non-seed
/// calls in between don't shrink the neighbourhood).
fn seed_neighbours(seeds: &Seeds, prog_id: usize, call_idx: usize, prog_len: usize) -> HashSet<usize> {
    let is_seed: HashSet<usize> = seeds
        .for_program(prog_id)
        .map(|s| s.call_idx)
        .collect();

    let mut neighbours = HashSet::new();

    let mut left = call_idx;
    let mut found = 0;
    while left > 0 && found < RADIUS {
        left -= 1;
        if is_seed.contains(&left) {
            neighbours.insert(left);
            found += 1;
        }
    }

    let mut right = call_idx + 1;
    let mut found = 0;
    while right < prog_len && found < RADIUS {
        if is_seed.contains(&right) {
            neighbours.insert(right);
            found += 1;
        }
        right += 1;
    }

    neighbours
}

/// The weak distiller's upstream set for one seed: downstream of the
/// centroid, then upstream of those, then downstream of the upstreams — a
/// bounded two-hop expansion seeded by the `RADIUS`-bounded neighbourhood.
fn weak_closure(
    graph: &DependencyGraph,
    prog_id: usize,
    centroid: usize,
    neighbours: &HashSet<usize>,
) -> HashSet<usize> {
    let mut closure: HashSet<usize> = neighbours.clone();
    closure.insert(centroid);

    let downstream_of_centroid = graph.get_all_downstream(prog_id, centroid);
    closure.extend(downstream_of_centroid.iter().copied());

    let mut upstream_of_those = HashSet::new();
    for &idx in closure.iter() {
        upstream_of_those.extend(graph.get_all_upstream(prog_id, idx));
    }
    closure.extend(upstream_of_those.iter().copied());

    let mut downstream_of_upstreams = HashSet::new();
    for &idx in upstream_of_those.iter() {
        downstream_of_upstreams.extend(graph.get_all_downstream(prog_id, idx));
    }
    closure.extend(downstream_of_upstreams);

    closure
}

pub fn distill(input: &DistillInput, target: &dyn Target) -> Vec<Prog> {
    let mut graph = build_graph(input);
    let hitters = heavy_hitters(input);
    let mut state = MergeState::new();

    for seed_idx in hitters {
        let seed = &input.seeds.seeds[seed_idx];
        if state
            .distilled_id_of(seed.prog_id, seed.call_idx)
            .is_some()
        {
            continue;
        }
        let prog_len = input.program(seed.prog_id).prog.len();
        let neighbours = seed_neighbours(&input.seeds, seed.prog_id, seed.call_idx, prog_len);
        let closure = weak_closure(&graph, seed.prog_id, seed.call_idx, &neighbours);

        merge_calls_into(&mut state, seed.prog_id, closure);
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
    use std::iter::FromIterator;

    #[test]
    fn neighbour_scan_stops_at_radius_on_each_side() {
        let mut seeds = Seeds::new();
        for idx in [0usize, 1, 2, 5, 6, 7] {
            seeds.seeds.push(Seed {
                prog_id: 0,
                call_idx: idx,
                cover: vec![idx as u64],
                depends_on: Default::default(),
            });
        }
        let neighbours = seed_neighbours(&seeds, 0, 4, 8);
        // left walk from 4: sees seeds at 2 then 1 (radius 2), stops before 0
        // right walk from 4: sees seeds at 5 then 6, stops before 7
        assert_eq!(neighbours, HashSet::from_iter([2, 1, 5, 6]));
    }

    #[test]
    fn neighbour_scan_stops_at_program_edge_before_radius() {
        let mut seeds = Seeds::new();
        seeds.seeds.push(Seed {
            prog_id: 0,
            call_idx: 0,
            cover: vec![1],
            depends_on: Default::default(),
        });
        let neighbours = seed_neighbours(&seeds, 0, 1, 2);
        assert_eq!(neighbours, HashSet::from_iter([0]));
    }

    #[test]
    fn weak_distill_emits_a_program_containing_the_seed() {
        let mut prog = Prog::new();
        prog.push(Call::new(
            "open",
            vec![],
            Arg::Result {
                value: 3,
                producer: None,
            },
        ));
        prog.push(Call::new(
            "write",
            vec![Arg::Result {
                value: 3,
                producer: Some(0),
            }],
            Arg::Const(8),
        ));
        let mut seeds = Seeds::new();
        seeds.seeds.push(Seed {
            prog_id: 0,
            call_idx: 1,
            cover: vec![7],
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
        assert!(out[0].len() >= 1);
    }
}
