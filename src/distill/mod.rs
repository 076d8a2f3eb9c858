//! Distiller (§3 "Distilled program", §4.J): selects seeds, merges upstream
//! closures into distilled programs, finalises memory, emits output
//! programs. Five variants share the preparation, merge-bookkeeping and
//! finalisation logic defined here; each variant module
//! (`explicit`/`implicit`/`weak`/`trace_distill`/`random`) only supplies the
//! seed-selection and upstream-expansion policy that differs between them.

pub mod explicit;
pub mod implicit;
pub mod random;
pub mod trace_distill;
pub mod weak;

use crate::config::split_variant_suffix;
use crate::depgraph::{remap_producers, DependencyGraph};
use crate::memtrack::MemoryTracker;
use crate::prog::Prog;
use crate::seed::Seeds;
use crate::target::Target;
use std::collections::{HashMap, HashSet};

/// One translated per-PID program together with the memory tracker built
/// alongside it, as handed to the distiller by the translation stage.
pub struct SourceProgram {
    pub id: usize,
    pub prog: Prog,
    pub memtrack: MemoryTracker,
}

/// Everything a distiller variant consumes: the full seed bag and the
/// programs those seeds were extracted from.
pub struct DistillInput {
    pub programs: Vec<SourceProgram>,
    pub seeds: Seeds,
}

impl DistillInput {
    fn program(&self, id: usize) -> &SourceProgram {
        self.programs
            .iter()
            .find(|p| p.id == id)
            .expect("seed references an unknown program id")
    }
}

/// Greedy set-cover over the seed bag, sorted descending by coverage size
/// (§4.J "Common preparation" step 3). Returns indices into
/// `input.seeds.seeds`.
pub(crate) fn heavy_hitters(input: &DistillInput) -> Vec<usize> {
    let mut order: Vec<usize> = (0..input.seeds.len()).collect();
    order.sort_by(|&a, &b| {
        input.seeds.seeds[b]
            .cover_len()
            .cmp(&input.seeds.seeds[a].cover_len())
    });

    let mut seen_cover: HashSet<u64> = HashSet::new();
    let mut hitters = Vec::new();
    for idx in order {
        let seed = &input.seeds.seeds[idx];
        if seed.cover.iter().any(|c| !seen_cover.contains(c)) {
            seen_cover.extend(seed.cover.iter().copied());
            hitters.push(idx);
        }
    }
    hitters
}

/// Builds the dependency graph once over every input program (§4.J step 2).
pub(crate) fn build_graph(input: &DistillInput) -> DependencyGraph {
    let mut graph = DependencyGraph::new();
    for program in &input.programs {
        graph.track_dependencies(program.id, &program.prog);
    }
    graph
}

/// Running state for the merge-into-distilled-programs process
/// (`add_to_distilled_prog`, §4.J "Merging"). Assignment is keyed by
/// `(prog_id, call_idx)` per §9's arena-identity shape.
#[derive(Debug, Default)]
pub(crate) struct MergeState {
    assignment: HashMap<(usize, usize), usize>,
    next_id: usize,
}

impl MergeState {
    fn new() -> Self {
        MergeState::default()
    }

    fn distilled_id_of(&self, prog_id: usize, call_idx: usize) -> Option<usize> {
        self.assignment.get(&(prog_id, call_idx)).copied()
    }
}

/// Expands `upstream` (already containing the seed's own call) by the
/// implicit-deps closure, per §4.J: "include any earlier call in the same
/// program whose prefix matches [a configured prerequisite]; then
/// recursively include their upstream closures. Iterate until the dedup'd
/// set stops growing."
fn expand_implicit_deps(
    prog: &Prog,
    graph: &DependencyGraph,
    prog_id: usize,
    upstream: &mut HashSet<usize>,
    deps: &crate::config::ImplicitDeps,
) {
    loop {
        let before = upstream.len();
        let mut additions = Vec::new();
        for &idx in upstream.iter() {
            let name = split_variant_suffix(&prog.calls[idx].meta);
            let prereqs = deps.prereqs_for(name);
            if prereqs.is_empty() {
                continue;
            }
            for earlier_idx in 0..idx {
                let earlier_name = split_variant_suffix(&prog.calls[earlier_idx].meta);
                if prereqs.iter().any(|p| p == earlier_name) {
                    additions.push(earlier_idx);
                }
            }
        }
        for idx in additions {
            if upstream.insert(idx) {
                for u in graph.get_all_upstream(prog_id, idx) {
                    upstream.insert(u);
                }
            }
        }
        if upstream.len() == before {
            break;
        }
    }
}

/// `add_to_distilled_prog(seed)` (§4.J "Merging"): the explicit merge
/// primitive shared by the explicit, implicit and random distillers (they
/// differ only in which seeds get offered to this function, and whether
/// `implicit_deps` is supplied).
pub(crate) fn add_to_distilled_prog(
    input: &DistillInput,
    graph: &DependencyGraph,
    state: &mut MergeState,
    prog_id: usize,
    call_idx: usize,
    implicit_deps: Option<&crate::config::ImplicitDeps>,
) {
    if state.distilled_id_of(prog_id, call_idx).is_some() {
        return;
    }

    let mut upstream = graph.get_all_upstream(prog_id, call_idx);
    upstream.insert(call_idx);

    if let Some(deps) = implicit_deps {
        let prog = &input.program(prog_id).prog;
        expand_implicit_deps(prog, graph, prog_id, &mut upstream, deps);
    }

    merge_calls_into(state, prog_id, upstream);
}

/// Shared tail of the merge: finds every distilled program that already
/// owns one of `calls`, unions their membership into one distilled id
/// (creating a fresh one if none exists yet), and (re-)assigns every call
/// in `calls` to it — overwriting prior assignments, which is the merge.
pub(crate) fn merge_calls_into(state: &mut MergeState, prog_id: usize, calls: HashSet<usize>) {
    let mut existing: HashSet<usize> = calls
        .iter()
        .filter_map(|&idx| state.distilled_id_of(prog_id, idx))
        .collect();

    let target_id = if let Some(&first) = existing.iter().next() {
        existing.remove(&first);
        first
    } else {
        let id = state.next_id;
        state.next_id += 1;
        id
    };

    let mut total_calls = calls;
    if !existing.is_empty() {
        for (&(p, c), &d) in state.assignment.iter() {
            if p == prog_id && existing.contains(&d) {
                total_calls.insert(c);
            }
        }
    }

    for idx in total_calls {
        state.assignment.insert((prog_id, idx), target_id);
    }
}

/// `Finalisation` (§4.J): for each distinct distilled program, recovers its
/// source program and memory tracker, projects the tracker down to the
/// merged call set, lays out memory, and prepends the prelude `mmap` if any
/// allocation was needed. Programs whose memory layout overflows the 16 MiB
/// budget are silently dropped (§4.F cap, §7 "drop the program, continue").
pub(crate) fn finalize(
    input: &DistillInput,
    graph: &mut DependencyGraph,
    state: &MergeState,
    target: &dyn Target,
) -> Vec<Prog> {
    let mut groups: HashMap<usize, Vec<(usize, usize)>> = HashMap::new();
    for (&(prog_id, call_idx), &distilled_id) in &state.assignment {
        groups
            .entry(distilled_id)
            .or_default()
            .push((prog_id, call_idx));
    }

    let mut distilled_ids: Vec<usize> = groups.keys().copied().collect();
    distilled_ids.sort_unstable();

    let mut out = Vec::new();
    for distilled_id in distilled_ids {
        let mut calls = groups.remove(&distilled_id).unwrap();
        calls.sort_by_key(|&(_, idx)| idx);
        calls.dedup();
        if calls.is_empty() {
            continue;
        }
        let prog_id = calls[0].0;
        let source = input.program(prog_id);

        let mut remap = HashMap::new();
        let mut merged = Prog::new();
        for (new_idx, &(_, old_idx)) in calls.iter().enumerate() {
            remap.insert(old_idx, new_idx);
            merged.push(source.prog.calls[old_idx].clone());
        }
        for call in &mut merged.calls {
            remap_producers(call, &remap);
        }

        let mut memtrack = source.memtrack.simplify(&remap);
        let total = memtrack.total_memory_allocations() + memtrack.total_vma_allocations();
        if memtrack.fill_out_memory(&mut merged).is_err() {
            continue;
        }

        graph.build_dependency(distilled_id, &merged);

        if total > 0 {
            let mut prelude = Prog::new();
            prelude.push(target.make_mmap(0, total));
            prelude.calls.extend(merged.calls);
            out.push(prelude);
        } else {
            out.push(merged);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prog::{Arg, Call};
    use crate::seed::Seed;
    use crate::target::StaticTarget;

    fn program_open_write() -> SourceProgram {
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
        SourceProgram {
            id: 0,
            prog,
            memtrack: MemoryTracker::new(),
        }
    }

    #[test]
    fn merge_pulls_in_upstream_and_produces_one_distilled_program() {
        let program = program_open_write();
        let mut seeds = Seeds::new();
        seeds.seeds.push(Seed {
            prog_id: 0,
            call_idx: 1,
            cover: vec![1],
            depends_on: HashSet::from_iter([0]),
        });
        let input = DistillInput {
            programs: vec![program],
            seeds,
        };
        let mut graph = build_graph(&input);
        let mut state = MergeState::new();
        add_to_distilled_prog(&input, &graph, &mut state, 0, 1, None);
        assert_eq!(state.distilled_id_of(0, 0), state.distilled_id_of(0, 1));

        let target = StaticTarget::new();
        let out = finalize(&input, &mut graph, &state, &target);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].len(), 2);
    }

    use std::iter::FromIterator;
}
