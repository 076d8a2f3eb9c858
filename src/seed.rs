//! Seed extraction (§3 "Seed", §4.H): promotes each translated call to a
//! seed annotated with its coverage footprint and the set of earlier calls
//! (in the same program) it draws resources from.

use crate::translate::TranslateOutput;
use std::collections::HashSet;

/// One translated syscall considered as a candidate for distillation.
/// Identified by `(prog_id, call_idx)` per the arena shape in §9's design
/// notes, rather than by an identity pointer into the source tree.
#[derive(Debug, Clone)]
pub struct Seed {
    pub prog_id: usize,
    pub call_idx: usize,
    pub cover: Vec<u64>,
    /// Earlier call indices in the same program this seed's call consumes
    /// resources from (§3 "Seed" `depends_on`).
    pub depends_on: HashSet<usize>,
}

impl Seed {
    pub fn cover_len(&self) -> usize {
        self.cover.len()
    }
}

/// The global seed multiset, appended to sequentially once per translated
/// trace (§5: "the seed bag is appended to sequentially after each trace is
/// translated").
#[derive(Debug, Default)]
pub struct Seeds {
    pub seeds: Vec<Seed>,
}

impl Seeds {
    pub fn new() -> Self {
        Seeds::default()
    }

    /// Promotes every call of one translated program into a seed.
    pub fn extract_from(&mut self, prog_id: usize, output: &TranslateOutput) {
        for call_idx in 0..output.prog.len() {
            let cover = output
                .call_to_cover
                .get(&call_idx)
                .cloned()
                .unwrap_or_default();
            let depends_on = output
                .depends_on
                .get(&call_idx)
                .cloned()
                .unwrap_or_default();
            self.seeds.push(Seed {
                prog_id,
                call_idx,
                cover,
                depends_on,
            });
        }
    }

    pub fn len(&self) -> usize {
        self.seeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }

    pub fn for_program(&self, prog_id: usize) -> impl Iterator<Item = &Seed> {
        self.seeds.iter().filter(move |s| s.prog_id == prog_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memtrack::MemoryTracker;
    use crate::prog::{Arg, Call, Prog};
    use std::collections::HashMap;

    fn output_with_two_calls() -> TranslateOutput {
        let mut prog = Prog::new();
        prog.push(Call::new("open", vec![], Arg::Const(3)));
        prog.push(Call::new("write", vec![], Arg::Const(8)));
        let mut call_to_cover = HashMap::new();
        call_to_cover.insert(0, vec![1, 2, 3]);
        call_to_cover.insert(1, vec![4]);
        let mut depends_on = HashMap::new();
        let mut producers = HashSet::new();
        producers.insert(0usize);
        depends_on.insert(1, producers);
        TranslateOutput {
            prog,
            call_to_cover,
            depends_on,
            memtrack: MemoryTracker::new(),
        }
    }

    #[test]
    fn extracts_one_seed_per_call_with_its_cover_and_deps() {
        let mut seeds = Seeds::new();
        seeds.extract_from(0, &output_with_two_calls());
        assert_eq!(seeds.len(), 2);
        assert_eq!(seeds.seeds[0].cover, vec![1, 2, 3]);
        assert!(seeds.seeds[0].depends_on.is_empty());
        assert_eq!(seeds.seeds[1].depends_on, HashSet::from_iter([0]));
    }

    use std::iter::FromIterator;
}
