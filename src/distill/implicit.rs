//! Implicit distiller (§4.J "Variants: Implicit"): the explicit merge, plus
//! the implicit-deps table closure — domain-knowledge prerequisite edges
//! that aren't derivable from resource flow (§6 config, GLOSSARY "Implicit
//! dependency").

use super::{add_to_distilled_prog, build_graph, finalize, heavy_hitters, DistillInput, MergeState};
use crate::config::ImplicitDeps;
use crate::prog::Prog;
use crate::target::Target;

pub fn distill(input: &DistillInput, target: &dyn Target, deps: &ImplicitDeps) -> Vec<Prog> {
    let mut graph = build_graph(input);
    let hitters = heavy_hitters(input);
    let mut state = MergeState::new();

    for seed_idx in hitters {
        let seed = &input.seeds.seeds[seed_idx];
        add_to_distilled_prog(
            input,
            &graph,
            &mut state,
            seed.prog_id,
            seed.call_idx,
            Some(deps),
        );
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
    use std::collections::HashMap;

    #[test]
    fn pulls_in_a_configured_prerequisite_with_no_resource_link() {
        // `bind` has no Arg::Result link to `socket$unix` here (a fresh fd
        // value, not a producer chain) but the implicit-deps table still
        // requires socket before bind.
        let mut prog = Prog::new();
        prog.push(Call::new("socket$unix", vec![], Arg::Const(3)));
        prog.push(Call::new("bind", vec![Arg::Const(3)], Arg::Const(0)));

        let mut seeds = Seeds::new();
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

        let mut table = HashMap::new();
        table.insert("bind".to_string(), vec!["socket".to_string()]);
        let deps = ImplicitDeps(table);

        let target = StaticTarget::new();
        let out = distill(&input, &target, &deps);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].len(), 2);
    }
}
