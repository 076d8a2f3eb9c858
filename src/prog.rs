//! Target-IR types (§3 "Target IR call"): the strongly typed program
//! representation the translator builds and the distiller operates on.

use std::fmt;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Direction {
    In,
    Out,
    InOut,
}

/// One fully reified syscall argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Const(u64),
    /// A resource-typed value. `producer` is the index (within the same
    /// `Prog`) of the call whose return produced it, if known.
    Result { value: u64, producer: Option<usize> },
    Pointer {
        address: u64,
        pointee: Option<Box<Arg>>,
    },
    /// A pointer into a VMA-backed mapping rather than a plain heap
    /// allocation; carries the page count the mapping needs.
    VmaPointer { address: u64, num_pages: u64 },
    Group(Vec<Arg>),
    Union { option: usize, inner: Box<Arg> },
    Data { bytes: Vec<u8>, direction: Direction },
}

impl Arg {
    pub fn is_out_only(direction: Direction) -> bool {
        direction == Direction::Out
    }

    /// Size in bytes this argument occupies, used for pointer-allocation
    /// bookkeeping (§4.F `add_allocation`).
    pub fn size(&self) -> u64 {
        match self {
            Arg::Const(_) | Arg::Result { .. } => 8,
            Arg::Pointer { .. } | Arg::VmaPointer { .. } => 8,
            Arg::Group(fields) => fields.iter().map(Arg::size).sum(),
            Arg::Union { inner, .. } => inner.size(),
            Arg::Data { bytes, .. } => bytes.len() as u64,
        }
    }

    pub fn as_result_mut(&mut self) -> Option<(&mut u64, &mut Option<usize>)> {
        match self {
            Arg::Result { value, producer } => Some((value, producer)),
            _ => None,
        }
    }
}

/// One translated syscall: `{meta, args, ret}`.
#[derive(Debug, Clone)]
pub struct Call {
    /// The resolved (possibly variant-suffixed) syscall name, e.g.
    /// `socket$inet_tcp`.
    pub meta: String,
    pub args: Vec<Arg>,
    pub ret: Arg,
}

impl Call {
    pub fn new(meta: impl Into<String>, args: Vec<Arg>, ret: Arg) -> Self {
        Call {
            meta: meta.into(),
            args,
            ret,
        }
    }
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(...)", self.meta)
    }
}

/// An ordered sequence of calls, the unit the distiller and memory tracker
/// both operate on.
#[derive(Debug, Clone, Default)]
pub struct Prog {
    pub calls: Vec<Call>,
}

impl Prog {
    pub fn new() -> Self {
        Prog { calls: Vec::new() }
    }

    pub fn push(&mut self, call: Call) -> usize {
        self.calls.push(call);
        self.calls.len() - 1
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}
