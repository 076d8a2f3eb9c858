//! Memory tracker (§3 "Memory tracker state", §4.F): allocates a flat
//! address space for pointer arguments and VMA mappings, and produces the
//! numbers the caller needs to prepend a prelude `mmap`.

use crate::error::{DropKind, Result};
use crate::prog::{Arg, Prog};

const MEMORY_BUDGET: u64 = 16 * 1024 * 1024;

/// Where to find one argument within a call: the top-level arg slot, then a
/// path of `Group`/`Union`/`Pointer` steps down into it. Kept as a location
/// rather than a borrowed reference so it can be registered before the
/// call's argument tree is done being built.
#[derive(Debug, Clone, Copy)]
pub enum CallSlot {
    Arg(usize),
    Ret,
}

#[derive(Debug, Clone, Copy)]
pub enum PathStep {
    /// Descend into a `Group`'s nth field.
    Field(usize),
    /// Descend into a `Union`'s chosen inner value, or a `Pointer`'s
    /// pointee.
    Inner,
}

#[derive(Debug, Clone)]
pub struct ArgLoc {
    pub call_idx: usize,
    pub slot: CallSlot,
    pub path: Vec<PathStep>,
}

impl ArgLoc {
    pub fn top(call_idx: usize, slot: CallSlot) -> Self {
        ArgLoc {
            call_idx,
            slot,
            path: Vec::new(),
        }
    }

    pub fn descend(&self, step: PathStep) -> Self {
        let mut path = self.path.clone();
        path.push(step);
        ArgLoc {
            call_idx: self.call_idx,
            slot: self.slot,
            path,
        }
    }

    fn resolve<'a>(&self, prog: &'a mut Prog) -> &'a mut Arg {
        let call = &mut prog.calls[self.call_idx];
        let mut cur = match self.slot {
            CallSlot::Arg(i) => &mut call.args[i],
            CallSlot::Ret => &mut call.ret,
        };
        for step in &self.path {
            cur = match (step, cur) {
                (PathStep::Field(i), Arg::Group(fields)) => &mut fields[*i],
                (PathStep::Inner, Arg::Union { inner, .. }) => inner.as_mut(),
                (PathStep::Inner, Arg::Pointer { pointee, .. }) => {
                    pointee.as_mut().expect("pointee not yet populated").as_mut()
                }
                _ => panic!("ArgLoc path step did not match the arg shape"),
            };
        }
        cur
    }
}

fn set_address(arg: &mut Arg, addr: u64) {
    match arg {
        Arg::Pointer { address, .. } | Arg::VmaPointer { address, .. } => *address = addr,
        Arg::Result { value, producer } => {
            *value = addr;
            *producer = None;
        }
        other => panic!("set_address called on non-pointer arg: {:?}", other),
    }
}

#[derive(Debug, Clone)]
struct Allocation {
    loc: ArgLoc,
    size: u64,
}

#[derive(Debug, Clone)]
struct VmaUse {
    loc: ArgLoc,
    start: u64,
    end: u64,
}

#[derive(Debug, Clone)]
pub struct Vma {
    pub created_by_call: usize,
    pub start: u64,
    pub end: u64,
    used_by: Vec<VmaUse>,
}

#[derive(Debug, Clone, Copy)]
pub struct ShmRequest {
    pub shmid: u64,
    pub size: u64,
    pub call_idx: usize,
}

#[derive(Debug, Default)]
pub struct MemoryTracker {
    allocations: Vec<Allocation>,
    mappings: Vec<Vma>,
    shm_requests: Vec<ShmRequest>,
}

impl MemoryTracker {
    pub fn new() -> Self {
        MemoryTracker::default()
    }

    /// Records a pointer that needs a concrete address (§4.F.1).
    pub fn add_allocation(&mut self, loc: ArgLoc, size: u64) {
        self.allocations.push(Allocation { loc, size });
    }

    /// Called from the VMA-producing syscall handlers; returns the new
    /// mapping's index.
    pub fn create_mapping(&mut self, created_by_call: usize, start: u64, end: u64) -> usize {
        self.mappings.push(Vma {
            created_by_call,
            start,
            end,
            used_by: Vec::new(),
        });
        self.mappings.len() - 1
    }

    /// Looks up the latest (last-wins, linear scan) mapping overlapping
    /// `[start, start+length)` and attaches `loc` as a dependent of it.
    /// Returns the producing call index so the translator context can
    /// register the current call's dependency on it.
    pub fn add_dependency(&mut self, start: u64, length: u64, loc: ArgLoc) -> Option<usize> {
        let end = start + length;
        let idx = self
            .mappings
            .iter()
            .enumerate()
            .rev()
            .find(|(_, vma)| vma.start <= start && end <= vma.end)
            .map(|(i, _)| i)?;
        self.mappings[idx].used_by.push(VmaUse { loc, start, end });
        Some(self.mappings[idx].created_by_call)
    }

    pub fn record_shm_request(&mut self, shmid: u64, size: u64, call_idx: usize) {
        self.shm_requests.push(ShmRequest {
            shmid,
            size,
            call_idx,
        });
    }

    pub fn shm_request(&self, shmid: u64) -> Option<ShmRequest> {
        self.shm_requests.iter().rev().find(|r| r.shmid == shmid).copied()
    }

    /// Phase 1 + phase 2 layout, per §4.F. Mutates every registered pointer
    /// and VMA-dependent arg in place.
    pub fn fill_out_memory(&mut self, prog: &mut Prog) -> Result<()> {
        let page_size = 4096u64;
        let mut offset = 0u64;

        for alloc in &self.allocations {
            set_address(alloc.loc.resolve(prog), offset);
            offset += alloc.size;
        }
        if offset % page_size != 0 {
            offset += page_size - (offset % page_size);
        }

        for vma in &self.mappings {
            for dep in &vma.used_by {
                let addr = offset + (dep.start - vma.start);
                set_address(dep.loc.resolve(prog), addr);
            }
            offset += vma.end - vma.start;
        }

        if offset >= MEMORY_BUDGET {
            return Err(DropKind::MemoryBudgetExceeded {
                needed: offset,
                limit: MEMORY_BUDGET,
            }
            .into());
        }
        Ok(())
    }

    /// Sum of pointer-allocation bytes, page-rounded — the size the
    /// prelude `mmap` must request to cover phase 1.
    pub fn total_memory_allocations(&self) -> u64 {
        let page_size = 4096u64;
        let raw: u64 = self.allocations.iter().map(|a| a.size).sum();
        if raw == 0 {
            0
        } else if raw % page_size == 0 {
            raw
        } else {
            raw + (page_size - raw % page_size)
        }
    }

    /// Sum of VMA sizes for mappings created by calls in `prog` (i.e. all
    /// mappings this tracker still owns, after any `simplify` projection).
    pub fn total_vma_allocations(&self) -> u64 {
        self.mappings.iter().map(|v| v.end - v.start).sum()
    }

    pub fn has_allocations(&self) -> bool {
        !self.allocations.is_empty() || !self.mappings.is_empty()
    }

    /// Projects this tracker down to only the calls that survived
    /// distillation, remapping call indices via `remap` (old index ->
    /// new index in the distilled program). Allocations/mappings whose
    /// owning call didn't survive are dropped. Used by the explicit
    /// distiller's `simplify` step (§4.J Finalisation).
    pub fn simplify(&self, remap: &std::collections::HashMap<usize, usize>) -> MemoryTracker {
        let mut out = MemoryTracker::new();
        for alloc in &self.allocations {
            if let Some(&new_idx) = remap.get(&alloc.loc.call_idx) {
                let mut loc = alloc.loc.clone();
                loc.call_idx = new_idx;
                out.allocations.push(Allocation {
                    loc,
                    size: alloc.size,
                });
            }
        }
        for vma in &self.mappings {
            if let Some(&new_created_by) = remap.get(&vma.created_by_call) {
                let mut new_vma = Vma {
                    created_by_call: new_created_by,
                    start: vma.start,
                    end: vma.end,
                    used_by: Vec::new(),
                };
                for dep in &vma.used_by {
                    if let Some(&new_idx) = remap.get(&dep.loc.call_idx) {
                        let mut loc = dep.loc.clone();
                        loc.call_idx = new_idx;
                        new_vma.used_by.push(VmaUse {
                            loc,
                            start: dep.start,
                            end: dep.end,
                        });
                    }
                }
                out.mappings.push(new_vma);
            }
        }
        out.shm_requests = self.shm_requests.clone();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prog::Call;

    fn dummy_prog_with_pointers(n: usize) -> Prog {
        let mut prog = Prog::new();
        for _ in 0..n {
            prog.push(Call::new(
                "stub",
                vec![Arg::Pointer {
                    address: 0,
                    pointee: None,
                }],
                Arg::Const(0),
            ));
        }
        prog
    }

    #[test]
    fn pointer_allocations_are_disjoint_and_in_budget() {
        let mut prog = dummy_prog_with_pointers(3);
        let mut tracker = MemoryTracker::new();
        for i in 0..3 {
            tracker.add_allocation(ArgLoc::top(i, CallSlot::Arg(0)), 16);
        }
        tracker.fill_out_memory(&mut prog).unwrap();

        let mut ranges = Vec::new();
        for call in &prog.calls {
            if let Arg::Pointer { address, .. } = &call.args[0] {
                ranges.push((*address, *address + 16));
            }
        }
        ranges.sort();
        for w in ranges.windows(2) {
            assert!(w[0].1 <= w[1].0, "allocations overlap: {:?}", ranges);
        }
        for (_, end) in &ranges {
            assert!(*end < 16 * 1024 * 1024);
        }
    }

    #[test]
    fn over_budget_layout_is_an_error() {
        let mut prog = dummy_prog_with_pointers(1);
        let mut tracker = MemoryTracker::new();
        tracker.add_allocation(ArgLoc::top(0, CallSlot::Arg(0)), 32 * 1024 * 1024);
        assert!(tracker.fill_out_memory(&mut prog).is_err());
    }

    #[test]
    fn vma_dependents_land_inside_the_final_mapping_window() {
        let mut prog = Prog::new();
        prog.push(Call::new(
            "mmap",
            vec![],
            Arg::VmaPointer {
                address: 0,
                num_pages: 1,
            },
        ));
        prog.push(Call::new(
            "munmap",
            vec![Arg::VmaPointer {
                address: 0,
                num_pages: 1,
            }],
            Arg::Const(0),
        ));
        let mut tracker = MemoryTracker::new();
        let mapping_start = 0x1000;
        let mapping_end = 0x2000;
        tracker.create_mapping(0, mapping_start, mapping_end);
        let loc = ArgLoc::top(1, CallSlot::Arg(0));
        let producer = tracker.add_dependency(mapping_start, mapping_end - mapping_start, loc);
        assert_eq!(producer, Some(0));

        tracker.fill_out_memory(&mut prog).unwrap();
        if let Arg::VmaPointer { address, .. } = &prog.calls[1].args[0] {
            assert!(*address < 16 * 1024 * 1024);
        } else {
            panic!("expected a VmaPointer");
        }
    }

    #[test]
    fn total_allocations_are_page_rounded() {
        let mut tracker = MemoryTracker::new();
        tracker.add_allocation(ArgLoc::top(0, CallSlot::Arg(0)), 10);
        assert_eq!(tracker.total_memory_allocations(), 4096);
    }
}
