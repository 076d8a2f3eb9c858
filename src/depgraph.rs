//! Dependency graph builder (§3 "Dependency graph", §4.I): walks the
//! argument trees of translated programs to compute, for every call, its
//! upstream (resource producers, filename producers) and downstream
//! (consumers) neighbours.
//!
//! Run once, over every translated program, before distillation.

use crate::prog::{Arg, Call, Prog};
use std::collections::{HashMap, HashSet};

/// Syscalls that plausibly create a filename a later call can open/consume.
/// The real target binding would flag this via the `Buffer<Filename>`
/// argument's declared direction; this system only sees the reified
/// `Prog`, so it keys off the resolved call's base name instead.
const PATH_CREATING_CALLS: &[&str] = &["open", "openat", "creat", "mkdir", "mknod", "link", "symlink", "rename"];

/// Per-program adjacency, keyed by call index within that program.
#[derive(Debug, Default)]
struct ProgramGraph {
    /// `consumer_idx -> {producer_idx}`.
    upstream: HashMap<usize, HashSet<usize>>,
    /// `producer_idx -> {consumer_idx}`, restricted to consumers that are
    /// themselves seeds (§4.I: "if the call at index k is itself a seed").
    downstream: HashMap<usize, HashSet<usize>>,
    /// `producer_call_idx -> {consumer_call_idx}`, the side table §9
    /// prescribes in place of embedding mutable back-pointers in the arg
    /// graph. Populated by `build_dependency` at distillation finalisation.
    uses: HashMap<usize, HashSet<usize>>,
}

/// The dependency graph over every translated program, indexed by
/// `prog_id`. Built once via `track_dependencies` before any distiller
/// variant runs.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    graphs: HashMap<usize, ProgramGraph>,
}

fn find_filename_bytes(arg: &Arg) -> Option<&[u8]> {
    match arg {
        Arg::Data { bytes, .. } if !bytes.is_empty() => Some(bytes.as_slice()),
        Arg::Pointer {
            pointee: Some(inner),
            ..
        } => find_filename_bytes(inner),
        Arg::Group(fields) => fields.iter().find_map(find_filename_bytes),
        Arg::Union { inner, .. } => find_filename_bytes(inner),
        _ => None,
    }
}

fn walk_producers(arg: &Arg, out: &mut HashSet<usize>) {
    match arg {
        Arg::Result {
            producer: Some(idx),
            ..
        } => {
            out.insert(*idx);
        }
        Arg::Pointer {
            pointee: Some(inner),
            ..
        } => walk_producers(inner, out),
        Arg::Group(fields) => {
            for f in fields {
                walk_producers(f, out);
            }
        }
        Arg::Union { inner, .. } => walk_producers(inner, out),
        _ => {}
    }
}

impl DependencyGraph {
    pub fn new() -> Self {
        DependencyGraph::default()
    }

    /// `track_dependencies(prog)` (§4.I): for every call in `prog`, records
    /// its resource-level upstream producers (derived from `Arg::Result`
    /// producer back-references already set by the translator) and its
    /// filename-level upstream producers (derived from a path-creator map
    /// built incrementally as calls are walked in order).
    pub fn track_dependencies(&mut self, prog_id: usize, prog: &Prog) {
        let graph = self.graphs.entry(prog_id).or_default();
        let mut file_creators: HashMap<Vec<u8>, Vec<usize>> = HashMap::new();

        for (idx, call) in prog.calls.iter().enumerate() {
            let mut producers = HashSet::new();
            for arg in &call.args {
                walk_producers(arg, &mut producers);
            }

            if let Some(path) = call.args.iter().find_map(find_filename_bytes) {
                if PATH_CREATING_CALLS.contains(&base_name(&call.meta)) {
                    file_creators
                        .entry(path.to_vec())
                        .or_insert_with(Vec::new)
                        .push(idx);
                } else if let Some(creators) = file_creators.get(path) {
                    for &creator_idx in creators {
                        if creator_idx < idx {
                            producers.insert(creator_idx);
                        }
                    }
                }
            }

            if !producers.is_empty() {
                graph.upstream.insert(idx, producers.clone());
                for producer_idx in producers {
                    graph
                        .downstream
                        .entry(producer_idx)
                        .or_insert_with(HashSet::new)
                        .insert(idx);
                }
            }
        }
    }

    /// DFS transitive closure of `track_dependencies`'s upstream relation,
    /// deduplicated, seen-set keyed by call index in `prog_id` (§4.I
    /// `get_all_upstream`).
    pub fn get_all_upstream(&self, prog_id: usize, call_idx: usize) -> HashSet<usize> {
        let mut seen = HashSet::new();
        let mut stack = vec![call_idx];
        if let Some(graph) = self.graphs.get(&prog_id) {
            while let Some(idx) = stack.pop() {
                if let Some(producers) = graph.upstream.get(&idx) {
                    for &p in producers {
                        if seen.insert(p) {
                            stack.push(p);
                        }
                    }
                }
            }
        }
        seen
    }

    /// `get_all_downstream` (§4.I): transitive closure of the downstream
    /// relation.
    pub fn get_all_downstream(&self, prog_id: usize, call_idx: usize) -> HashSet<usize> {
        let mut seen = HashSet::new();
        let mut stack = vec![call_idx];
        if let Some(graph) = self.graphs.get(&prog_id) {
            while let Some(idx) = stack.pop() {
                if let Some(consumers) = graph.downstream.get(&idx) {
                    for &c in consumers {
                        if seen.insert(c) {
                            stack.push(c);
                        }
                    }
                }
            }
        }
        seen
    }

    pub fn direct_upstream(&self, prog_id: usize, call_idx: usize) -> HashSet<usize> {
        self.graphs
            .get(&prog_id)
            .and_then(|g| g.upstream.get(&call_idx))
            .cloned()
            .unwrap_or_default()
    }

    /// `build_dependency(seed, distilled_prog)` (§4.I): records, for the
    /// distilled program a seed ended up in, which calls use which earlier
    /// calls' outputs. Indices here are the *distilled* program's own call
    /// indices (post-merge), not the original program's.
    pub fn build_dependency(&mut self, distilled_id: usize, distilled_prog: &Prog) {
        let graph = self.graphs.entry(distilled_id).or_default();
        graph.uses.clear();
        for (idx, call) in distilled_prog.calls.iter().enumerate() {
            let mut producers = HashSet::new();
            for arg in &call.args {
                walk_producers(arg, &mut producers);
            }
            for producer_idx in producers {
                graph
                    .uses
                    .entry(producer_idx)
                    .or_insert_with(HashSet::new)
                    .insert(idx);
            }
        }
    }

    pub fn uses(&self, distilled_id: usize, producer_idx: usize) -> HashSet<usize> {
        self.graphs
            .get(&distilled_id)
            .and_then(|g| g.uses.get(&producer_idx))
            .cloned()
            .unwrap_or_default()
    }
}

fn base_name(meta: &str) -> &str {
    crate::config::split_variant_suffix(meta)
}

/// Remaps every `Arg::Result` producer index through `remap` in place,
/// dropping the back-reference (but keeping the value) for any producer
/// that didn't survive the merge. Used when a distilled `Prog` is built
/// from a subset of an original program's calls.
pub fn remap_producers(call: &mut Call, remap: &HashMap<usize, usize>) {
    remap_arg(&mut call.ret, remap);
    for arg in &mut call.args {
        remap_arg(arg, remap);
    }
}

fn remap_arg(arg: &mut Arg, remap: &HashMap<usize, usize>) {
    match arg {
        Arg::Result { producer, .. } => {
            *producer = producer.and_then(|old| remap.get(&old).copied());
        }
        Arg::Pointer {
            pointee: Some(inner),
            ..
        } => remap_arg(inner, remap),
        Arg::Group(fields) => {
            for f in fields {
                remap_arg(f, remap);
            }
        }
        Arg::Union { inner, .. } => remap_arg(inner, remap),
        _ => {}
    }
}
