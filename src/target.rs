//! The target binding (§4.C): read-only access to "the external
//! syscall-description library". Expressed as an object-safe `Target`
//! trait plus `StaticTarget`, a concrete implementation built from small
//! in-crate tables — the same `lazy_static!`-held one-time-table pattern
//! `flags.rs` uses for `static ref FLAGS: Flags`.

use crate::prog::{Arg, Call, Direction};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum BufferKind {
    Filename,
    Fixed(usize),
    Range(usize, usize),
    Varlen,
}

#[derive(Debug, Clone)]
pub struct FieldDecl {
    pub name: String,
    pub decl: ArgDecl,
    /// Declared padding fields are skipped when pairing raw struct fields
    /// against declared ones (§4.G.1 Struct rule).
    pub padding: bool,
}

impl FieldDecl {
    pub fn new(name: impl Into<String>, decl: ArgDecl) -> Self {
        FieldDecl {
            name: name.into(),
            decl,
            padding: false,
        }
    }

    pub fn pad(decl: ArgDecl) -> Self {
        FieldDecl {
            name: String::new(),
            decl,
            padding: true,
        }
    }
}

/// The declared shape of one argument slot on a syscall, as the external
/// type library would hand it to us.
#[derive(Debug, Clone)]
pub enum ArgDecl {
    Int { direction: Direction },
    Const { val: u64 },
    Flags { direction: Direction },
    Csum,
    Length,
    Proc { values_per_proc: u64 },
    Resource { kind: String, direction: Direction },
    Pointer { pointee: Box<ArgDecl> },
    Buffer { kind: BufferKind, direction: Direction },
    Struct { name: String, fields: Vec<FieldDecl> },
    Array { elem: Box<ArgDecl>, direction: Direction },
    Union { name: String, options: Vec<FieldDecl> },
    Vma { range_pages: Option<u64> },
}

impl ArgDecl {
    pub fn direction(&self) -> Direction {
        match self {
            ArgDecl::Int { direction }
            | ArgDecl::Flags { direction }
            | ArgDecl::Resource { direction, .. }
            | ArgDecl::Buffer { direction, .. }
            | ArgDecl::Array { direction, .. } => *direction,
            _ => Direction::In,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyscallDesc {
    pub name: String,
    pub args: Vec<ArgDecl>,
    pub ret: Option<ArgDecl>,
}

impl SyscallDesc {
    pub fn new(name: impl Into<String>, args: Vec<ArgDecl>, ret: Option<ArgDecl>) -> Self {
        SyscallDesc {
            name: name.into(),
            args,
            ret,
        }
    }
}

/// The read-only interface the core consumes from "the external
/// syscall-description library" (§4.C).
pub trait Target {
    fn syscall_by_name(&self, name: &str) -> Option<&SyscallDesc>;
    fn syscall_map(&self) -> &[SyscallDesc];
    fn const_by_name(&self, name: &str) -> Option<u64>;
    fn default_arg(&self, decl: &ArgDecl) -> Arg;
    fn make_mmap(&self, addr: u64, size: u64) -> Call;
    /// Backfills length-typed arguments from their referents.
    fn assign_sizes(&self, call: &mut Call);
    /// Rewrites arguments into the target's canonical form (e.g. ORing in
    /// required flags).
    fn sanitize(&self, call: &mut Call);
    fn page_size(&self) -> u64;
    fn num_pages(&self) -> u64;
    /// Resource-kind hierarchy, most specific first, used by the variant
    /// resolver's connection-oriented lookup (§4.D).
    fn resource_subkinds(&self, kind: &str) -> Vec<String>;
    fn validate(&self, prog: &crate::prog::Prog) -> Result<(), String>;
}

/// A minimal, self-contained `Target` sufficient to run the §8 scenarios
/// end to end. A real integration swaps this for a binding generated from
/// the external syscall-description library; nothing else in the core
/// depends on that substitution.
pub struct StaticTarget {
    descs: Vec<SyscallDesc>,
    consts: HashMap<&'static str, u64>,
    resource_hierarchy: HashMap<&'static str, Vec<&'static str>>,
}

const PAGE_SIZE: u64 = 4096;
const NUM_PAGES: u64 = 4096; // 16 MiB / page size

impl StaticTarget {
    pub fn new() -> Self {
        let mut consts = HashMap::new();
        for (name, val) in &[
            ("AF_UNIX", libc::AF_UNIX as u64),
            ("AF_INET", libc::AF_INET as u64),
            ("AF_INET6", libc::AF_INET6 as u64),
            ("AF_NETLINK", libc::AF_NETLINK as u64),
            ("AF_PACKET", libc::AF_PACKET as u64),
            ("SOCK_STREAM", libc::SOCK_STREAM as u64),
            ("SOCK_DGRAM", libc::SOCK_DGRAM as u64),
            ("SOCK_RAW", libc::SOCK_RAW as u64),
            ("SOCK_CLOEXEC", libc::SOCK_CLOEXEC as u64),
            ("SOCK_NONBLOCK", libc::SOCK_NONBLOCK as u64),
            ("IPPROTO_IP", 0),
            ("IPPROTO_TCP", libc::IPPROTO_TCP as u64),
            ("O_CREAT", libc::O_CREAT as u64),
            ("O_RDWR", libc::O_RDWR as u64),
            ("O_RDONLY", libc::O_RDONLY as u64),
            ("PROT_READ", libc::PROT_READ as u64),
            ("PROT_WRITE", libc::PROT_WRITE as u64),
            ("MAP_PRIVATE", libc::MAP_PRIVATE as u64),
            ("MAP_ANONYMOUS", libc::MAP_ANONYMOUS as u64),
            ("MAP_FIXED", libc::MAP_FIXED as u64),
            ("SIOCGIFHWADDR", 0x8927),
            ("AT_FDCWD", (libc::AT_FDCWD) as u64),
        ] {
            consts.insert(*name, *val);
        }

        let mut resource_hierarchy = HashMap::new();
        resource_hierarchy.insert("sock_unix", vec!["sock_unix", "sock", "fd"]);
        resource_hierarchy.insert("sock_in", vec!["sock_in", "sock", "fd"]);
        resource_hierarchy.insert("sock_in6", vec!["sock_in6", "sock_in", "sock", "fd"]);
        resource_hierarchy.insert("sock_packet", vec!["sock_packet", "sock", "fd"]);
        resource_hierarchy.insert("sock_netlink", vec!["sock_netlink", "sock", "fd"]);
        resource_hierarchy.insert("sock", vec!["sock", "fd"]);
        resource_hierarchy.insert("fd", vec!["fd"]);

        StaticTarget {
            descs: builtin_syscalls(),
            consts,
            resource_hierarchy,
        }
    }
}

impl Default for StaticTarget {
    fn default() -> Self {
        StaticTarget::new()
    }
}

impl Target for StaticTarget {
    fn syscall_by_name(&self, name: &str) -> Option<&SyscallDesc> {
        self.descs.iter().find(|d| d.name == name)
    }

    fn syscall_map(&self) -> &[SyscallDesc] {
        &self.descs
    }

    fn const_by_name(&self, name: &str) -> Option<u64> {
        self.consts.get(name).copied()
    }

    fn default_arg(&self, decl: &ArgDecl) -> Arg {
        match decl {
            ArgDecl::Int { .. } | ArgDecl::Const { .. } | ArgDecl::Flags { .. } | ArgDecl::Csum => {
                Arg::Const(0)
            }
            ArgDecl::Length => Arg::Const(0),
            ArgDecl::Proc { .. } => Arg::Const(0),
            ArgDecl::Resource { .. } => Arg::Result {
                value: 0,
                producer: None,
            },
            ArgDecl::Pointer { .. } => Arg::Pointer {
                address: 0,
                pointee: None,
            },
            ArgDecl::Buffer { .. } => Arg::Data {
                bytes: Vec::new(),
                direction: Direction::Out,
            },
            ArgDecl::Struct { fields, .. } => {
                Arg::Group(fields.iter().map(|f| self.default_arg(&f.decl)).collect())
            }
            ArgDecl::Array { .. } => Arg::Group(Vec::new()),
            ArgDecl::Union { options, .. } => Arg::Union {
                option: 0,
                inner: Box::new(self.default_arg(&options[0].decl)),
            },
            ArgDecl::Vma { range_pages } => Arg::VmaPointer {
                address: 0,
                num_pages: range_pages.unwrap_or(1),
            },
        }
    }

    fn make_mmap(&self, addr: u64, size: u64) -> Call {
        let num_pages = (size + self.page_size() - 1) / self.page_size();
        Call::new(
            "mmap",
            vec![
                Arg::VmaPointer {
                    address: addr,
                    num_pages,
                },
                Arg::Const(size),
                Arg::Const((libc::PROT_READ | libc::PROT_WRITE) as u64),
                Arg::Const((libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_FIXED) as u64),
                Arg::Result {
                    value: u64::MAX,
                    producer: None,
                },
                Arg::Const(0),
            ],
            Arg::Result {
                value: addr,
                producer: None,
            },
        )
    }

    fn assign_sizes(&self, call: &mut Call) {
        if let Some(desc) = self.syscall_by_name(&call.meta) {
            for (decl, arg) in desc.args.iter().zip(call.args.iter_mut()) {
                if matches!(decl, ArgDecl::Length) {
                    *arg = Arg::Const(8);
                }
            }
        }
    }

    fn sanitize(&self, call: &mut Call) {
        if call.meta == "mmap" {
            if let Some(Arg::Const(flags)) = call.args.get_mut(3) {
                *flags |= libc::MAP_FIXED as u64;
            }
        } else if call.meta == "mremap" {
            if let Some(Arg::Const(flags)) = call.args.get_mut(3) {
                *flags |= libc::MREMAP_FIXED as u64;
            }
        }
    }

    fn page_size(&self) -> u64 {
        PAGE_SIZE
    }

    fn num_pages(&self) -> u64 {
        NUM_PAGES
    }

    fn resource_subkinds(&self, kind: &str) -> Vec<String> {
        self.resource_hierarchy
            .get(kind)
            .map(|chain| chain.iter().map(|s| s.to_string()).collect())
            .unwrap_or_else(|| vec![kind.to_string()])
    }

    fn validate(&self, prog: &crate::prog::Prog) -> Result<(), String> {
        for call in &prog.calls {
            if self.syscall_by_name(&call.meta).is_none() && self.syscall_by_name_ignoring_variant(&call.meta).is_none() {
                return Err(format!("unknown call in final program: {}", call.meta));
            }
        }
        Ok(())
    }
}

impl StaticTarget {
    fn syscall_by_name_ignoring_variant(&self, name: &str) -> Option<&SyscallDesc> {
        let base = crate::config::split_variant_suffix(name);
        self.descs.iter().find(|d| d.name == base)
    }
}

fn int_arg(dir: Direction) -> ArgDecl {
    ArgDecl::Int { direction: dir }
}

fn builtin_syscalls() -> Vec<SyscallDesc> {
    use Direction::{In, Out};
    vec![
        SyscallDesc::new(
            "open",
            vec![
                ArgDecl::Buffer {
                    kind: BufferKind::Filename,
                    direction: In,
                },
                ArgDecl::Flags { direction: In },
                ArgDecl::Flags { direction: In },
            ],
            Some(ArgDecl::Resource {
                kind: "fd".to_string(),
                direction: Out,
            }),
        ),
        SyscallDesc::new(
            "write",
            vec![
                ArgDecl::Resource {
                    kind: "fd".to_string(),
                    direction: In,
                },
                ArgDecl::Buffer {
                    kind: BufferKind::Varlen,
                    direction: In,
                },
                ArgDecl::Length,
            ],
            Some(int_arg(Out)),
        ),
        SyscallDesc::new(
            "pipe",
            vec![ArgDecl::Pointer {
                pointee: Box::new(ArgDecl::Array {
                    elem: Box::new(ArgDecl::Resource {
                        kind: "fd".to_string(),
                        direction: Out,
                    }),
                    direction: Out,
                }),
            }],
            Some(int_arg(Out)),
        ),
        SyscallDesc::new(
            "socket",
            vec![
                ArgDecl::Const { val: 0 }, // specialised per-domain at resolve time
                ArgDecl::Flags { direction: In },
                ArgDecl::Flags { direction: In },
            ],
            Some(ArgDecl::Resource {
                kind: "sock".to_string(),
                direction: Out,
            }),
        ),
        SyscallDesc::new(
            "socket$unix",
            vec![
                ArgDecl::Const {
                    val: libc::AF_UNIX as u64,
                },
                ArgDecl::Flags { direction: In },
                ArgDecl::Const { val: 0 },
            ],
            Some(ArgDecl::Resource {
                kind: "sock_unix".to_string(),
                direction: Out,
            }),
        ),
        SyscallDesc::new(
            "socket$inet_tcp",
            vec![
                ArgDecl::Const {
                    val: libc::AF_INET as u64,
                },
                ArgDecl::Const {
                    val: libc::SOCK_STREAM as u64,
                },
                ArgDecl::Const { val: 0 },
            ],
            Some(ArgDecl::Resource {
                kind: "sock_in".to_string(),
                direction: Out,
            }),
        ),
        SyscallDesc::new(
            "socket$packet",
            vec![
                ArgDecl::Const {
                    val: libc::AF_PACKET as u64,
                },
                ArgDecl::Flags { direction: In },
                ArgDecl::Flags { direction: In },
            ],
            Some(ArgDecl::Resource {
                kind: "sock_packet".to_string(),
                direction: Out,
            }),
        ),
        SyscallDesc::new(
            "connect",
            vec![
                ArgDecl::Resource {
                    kind: "sock".to_string(),
                    direction: In,
                },
                ArgDecl::Pointer {
                    pointee: Box::new(sockaddr_storage_decl()),
                },
                ArgDecl::Length,
            ],
            Some(int_arg(Out)),
        ),
        SyscallDesc::new(
            "connect$inet",
            vec![
                ArgDecl::Resource {
                    kind: "sock_in".to_string(),
                    direction: In,
                },
                ArgDecl::Pointer {
                    pointee: Box::new(sockaddr_in_decl()),
                },
                ArgDecl::Length,
            ],
            Some(int_arg(Out)),
        ),
        SyscallDesc::new(
            "bind",
            vec![
                ArgDecl::Resource {
                    kind: "fd".to_string(),
                    direction: In,
                },
                ArgDecl::Pointer {
                    pointee: Box::new(sockaddr_storage_decl()),
                },
                ArgDecl::Length,
            ],
            Some(int_arg(Out)),
        ),
        SyscallDesc::new(
            "ioctl",
            vec![
                ArgDecl::Resource {
                    kind: "fd".to_string(),
                    direction: In,
                },
                ArgDecl::Const { val: 0 },
                ArgDecl::Pointer {
                    pointee: Box::new(ArgDecl::Buffer {
                        kind: BufferKind::Varlen,
                        direction: In,
                    }),
                },
            ],
            Some(int_arg(Out)),
        ),
        SyscallDesc::new(
            "ioctl$SIOCGIFHWADDR",
            vec![
                ArgDecl::Resource {
                    kind: "fd".to_string(),
                    direction: In,
                },
                ArgDecl::Const { val: 0x8927 },
                ArgDecl::Pointer {
                    pointee: Box::new(ifreq_hwaddr_decl()),
                },
            ],
            Some(int_arg(Out)),
        ),
        SyscallDesc::new(
            "mmap",
            vec![
                ArgDecl::Vma { range_pages: None },
                ArgDecl::Length,
                ArgDecl::Flags { direction: In },
                ArgDecl::Flags { direction: In },
                ArgDecl::Resource {
                    kind: "fd".to_string(),
                    direction: In,
                },
                ArgDecl::Int { direction: In },
            ],
            Some(ArgDecl::Vma { range_pages: None }),
        ),
        SyscallDesc::new(
            "mremap",
            vec![
                ArgDecl::Vma { range_pages: None },
                ArgDecl::Length,
                ArgDecl::Length,
                ArgDecl::Flags { direction: In },
                ArgDecl::Vma { range_pages: None },
            ],
            Some(ArgDecl::Vma { range_pages: None }),
        ),
        SyscallDesc::new(
            "msync",
            vec![
                ArgDecl::Vma { range_pages: None },
                ArgDecl::Length,
                ArgDecl::Flags { direction: In },
            ],
            Some(int_arg(Out)),
        ),
        SyscallDesc::new(
            "mprotect",
            vec![
                ArgDecl::Vma { range_pages: None },
                ArgDecl::Length,
                ArgDecl::Flags { direction: In },
            ],
            Some(int_arg(Out)),
        ),
        SyscallDesc::new(
            "munmap",
            vec![ArgDecl::Vma { range_pages: None }, ArgDecl::Length],
            Some(int_arg(Out)),
        ),
        SyscallDesc::new(
            "madvise",
            vec![
                ArgDecl::Vma { range_pages: None },
                ArgDecl::Length,
                ArgDecl::Flags { direction: In },
            ],
            Some(int_arg(Out)),
        ),
        SyscallDesc::new(
            "mlock",
            vec![ArgDecl::Vma { range_pages: None }, ArgDecl::Length],
            Some(int_arg(Out)),
        ),
        SyscallDesc::new(
            "munlock",
            vec![ArgDecl::Vma { range_pages: None }, ArgDecl::Length],
            Some(int_arg(Out)),
        ),
        SyscallDesc::new(
            "shmget",
            vec![
                ArgDecl::Int { direction: In },
                ArgDecl::Length,
                ArgDecl::Flags { direction: In },
            ],
            Some(ArgDecl::Resource {
                kind: "shmid".to_string(),
                direction: Out,
            }),
        ),
        SyscallDesc::new(
            "shmat",
            vec![
                ArgDecl::Resource {
                    kind: "shmid".to_string(),
                    direction: In,
                },
                ArgDecl::Vma { range_pages: None },
                ArgDecl::Flags { direction: In },
            ],
            Some(ArgDecl::Vma { range_pages: None }),
        ),
        SyscallDesc::new(
            "clone",
            vec![
                ArgDecl::Flags { direction: In },
                ArgDecl::Pointer {
                    pointee: Box::new(ArgDecl::Buffer {
                        kind: BufferKind::Varlen,
                        direction: In,
                    }),
                },
            ],
            Some(ArgDecl::Resource {
                kind: "pid".to_string(),
                direction: Out,
            }),
        ),
        SyscallDesc::new(
            "read",
            vec![
                ArgDecl::Resource {
                    kind: "fd".to_string(),
                    direction: In,
                },
                ArgDecl::Buffer {
                    kind: BufferKind::Varlen,
                    direction: Out,
                },
                ArgDecl::Length,
            ],
            Some(int_arg(Out)),
        ),
    ]
}

fn sockaddr_in_decl() -> ArgDecl {
    ArgDecl::Struct {
        name: "sockaddr_in".to_string(),
        fields: vec![
            FieldDecl::new("sa_family", ArgDecl::Const { val: libc::AF_INET as u64 }),
            FieldDecl::new("sin_port", int_arg(Direction::In)),
            FieldDecl::new("sin_addr", int_arg(Direction::In)),
        ],
    }
}

/// `sockaddr_storage` union, dispatched by field name per the resolved open
/// question in §9 (name-based, not hard-coded field index).
fn sockaddr_storage_decl() -> ArgDecl {
    ArgDecl::Union {
        name: "sockaddr_storage".to_string(),
        options: vec![
            FieldDecl::new("in", sockaddr_in_decl()),
            FieldDecl::new(
                "in6",
                ArgDecl::Struct {
                    name: "sockaddr_in6".to_string(),
                    fields: vec![
                        FieldDecl::new("sa_family", ArgDecl::Const { val: libc::AF_INET6 as u64 }),
                        FieldDecl::new("sin6_port", int_arg(Direction::In)),
                        FieldDecl::new("sin6_flowinfo", int_arg(Direction::In)),
                        FieldDecl::new("sin6_addr", int_arg(Direction::In)),
                    ],
                },
            ),
            FieldDecl::new(
                "un",
                ArgDecl::Struct {
                    name: "sockaddr_un".to_string(),
                    fields: vec![
                        FieldDecl::new("sa_family", ArgDecl::Const { val: libc::AF_UNIX as u64 }),
                        FieldDecl::new(
                            "sun_path",
                            ArgDecl::Buffer {
                                kind: BufferKind::Filename,
                                direction: Direction::In,
                            },
                        ),
                    ],
                },
            ),
            FieldDecl::new("nl", sockaddr_nl_decl()),
        ],
    }
}

fn sockaddr_nl_decl() -> ArgDecl {
    ArgDecl::Struct {
        name: "sockaddr_nl".to_string(),
        fields: vec![
            FieldDecl::new("nl_family", ArgDecl::Const { val: libc::AF_NETLINK as u64 }),
            FieldDecl::pad(ArgDecl::Const { val: 0 }),
            FieldDecl::new(
                "nl_pid",
                ArgDecl::Union {
                    name: "sockaddr_nl$pid".to_string(),
                    options: vec![
                        FieldDecl::new("kern", ArgDecl::Const { val: 0 }),
                        FieldDecl::new("proc", int_arg(Direction::In)),
                        FieldDecl::new("unspec", int_arg(Direction::In)),
                    ],
                },
            ),
            FieldDecl::new("nl_groups", int_arg(Direction::In)),
        ],
    }
}

fn ifreq_hwaddr_decl() -> ArgDecl {
    ArgDecl::Struct {
        name: "ifreq".to_string(),
        fields: vec![
            FieldDecl::new(
                "ifr_name",
                ArgDecl::Buffer {
                    kind: BufferKind::Fixed(16),
                    direction: Direction::In,
                },
            ),
            FieldDecl::new(
                "ifr_hwaddr",
                ArgDecl::Buffer {
                    kind: BufferKind::Fixed(16),
                    direction: Direction::In,
                },
            ),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_well_known_consts() {
        let target = StaticTarget::new();
        assert_eq!(target.const_by_name("AF_UNIX"), Some(libc::AF_UNIX as u64));
        assert_eq!(target.const_by_name("MADE_UP"), None);
    }

    #[test]
    fn socket_unix_variant_is_registered() {
        let target = StaticTarget::new();
        assert!(target.syscall_by_name("socket$unix").is_some());
    }

    #[test]
    fn resource_subkinds_walk_most_specific_first() {
        let target = StaticTarget::new();
        let chain = target.resource_subkinds("sock_in6");
        assert_eq!(chain, vec!["sock_in6", "sock_in", "sock", "fd"]);
    }

    #[test]
    fn sanitize_forces_map_fixed() {
        let target = StaticTarget::new();
        let mut call = Call::new(
            "mmap",
            vec![
                Arg::VmaPointer { address: 0, num_pages: 1 },
                Arg::Const(4096),
                Arg::Const(0),
                Arg::Const(0),
                Arg::Result { value: 0, producer: None },
                Arg::Const(0),
            ],
            Arg::Result { value: 0, producer: None },
        );
        target.sanitize(&mut call);
        assert_eq!(call.args[3], Arg::Const(libc::MAP_FIXED as u64));
    }
}
