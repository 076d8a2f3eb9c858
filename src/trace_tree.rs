//! Trace tree (§3 "Trace tree", §4.B): groups calls by PID and reconstructs
//! parent->child hierarchy from `clone` returns, re-joining
//! `<unfinished>`/`<resumed>` pairs as they arrive.

use crate::ir::{Pid, TracedCall};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct TraceTree {
    pub root_pid: Option<Pid>,
    pub per_pid_trace: HashMap<Pid, Vec<TracedCall>>,
    pub children: HashMap<Pid, Vec<Pid>>,
}

impl TraceTree {
    pub fn new() -> Self {
        TraceTree::default()
    }

    /// Implements the `add` rules of §4.B. Returns a reference to the call
    /// as stored in the tree (the merged call, if this was a resume).
    pub fn add(&mut self, mut call: TracedCall) -> &TracedCall {
        if self.root_pid.is_none() {
            self.root_pid = Some(call.pid);
        }

        if call.resumed {
            let bucket = self
                .per_pid_trace
                .get_mut(&call.pid)
                .expect("resumed call for a pid with no prior paused call");
            let last = bucket
                .last_mut()
                .expect("resumed call for a pid with no prior paused call");
            last.args.append(&mut call.args);
            last.paused = false;
            last.ret = call.ret;
            last.cover.extend(call.cover);
            return last;
        }

        let pid = call.pid;
        let is_clone = call.call_name == "clone" && !call.paused;
        let clone_child = if is_clone { Some(call.ret) } else { None };

        let bucket = self.per_pid_trace.entry(pid).or_insert_with(Vec::new);
        self.children.entry(pid).or_insert_with(Vec::new);
        bucket.push(call);

        if let Some(child_pid) = clone_child {
            self.children.get_mut(&pid).unwrap().push(child_pid);
        }

        self.per_pid_trace.get(&pid).unwrap().last().unwrap()
    }

    pub fn calls_for(&self, pid: Pid) -> &[TracedCall] {
        self.per_pid_trace
            .get(&pid)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn children_of(&self, pid: Pid) -> &[Pid] {
        self.children
            .get(&pid)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// §3 invariant: every pid in `children`'s values appears as a key in
    /// `per_pid_trace`.
    pub fn check_invariants(&self) -> bool {
        self.children
            .values()
            .flatten()
            .all(|pid| self.per_pid_trace.contains_key(pid))
            && self
                .per_pid_trace
                .values()
                .flatten()
                .all(|c| !c.paused)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::RawArg;

    fn call(pid: Pid, name: &str, ret: i64) -> TracedCall {
        TracedCall::new(pid, name, vec![RawArg::Null], ret)
    }

    #[test]
    fn first_add_fixes_root_pid() {
        let mut tree = TraceTree::new();
        tree.add(call(42, "open", 3));
        assert_eq!(tree.root_pid, Some(42));
    }

    #[test]
    fn clone_return_registers_child() {
        let mut tree = TraceTree::new();
        tree.add(call(1, "clone", 2));
        assert_eq!(tree.children_of(1), &[2]);
    }

    #[test]
    fn paused_then_resumed_reassembles_into_one_call() {
        let mut tree = TraceTree::new();
        let mut paused = call(1, "read", -1);
        paused.paused = true;
        paused.args = vec![RawArg::Expression(crate::ir::Expression::IntLiteral(3))];
        tree.add(paused);

        let mut resumed = call(1, "read", 8);
        resumed.resumed = true;
        resumed.args = vec![RawArg::Buffer(vec![1, 2, 3])];
        tree.add(resumed);

        let calls = tree.calls_for(1);
        assert_eq!(calls.len(), 1);
        assert!(!calls[0].paused);
        assert_eq!(calls[0].ret, 8);
        assert_eq!(calls[0].args.len(), 2);
    }

    #[test]
    fn no_call_is_paused_after_rejoin_invariant_holds() {
        let mut tree = TraceTree::new();
        let mut paused = call(1, "read", -1);
        paused.paused = true;
        tree.add(paused);
        let mut resumed = call(1, "read", 8);
        resumed.resumed = true;
        tree.add(resumed);
        assert!(tree.check_invariants());
    }
}
