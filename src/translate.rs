//! Translator (§4.G): drives the intermediate model, trace tree, target
//! binding, variant resolver, return cache and memory tracker to turn a
//! per-PID list of traced calls into one target-IR `Prog`.

use crate::ir::{ConstTable, Expression, RawArg, TracedCall};
use crate::memtrack::{ArgLoc, CallSlot, MemoryTracker, PathStep};
use crate::prog::{Arg, Call, Direction, Prog};
use crate::rescache::{result_arg_from_producer, Producer, ReturnCache};
use crate::target::{ArgDecl, BufferKind, Target};
use crate::variant::VariantResolver;
use crate::error::{FatalKind, Result};
use std::collections::{HashMap, HashSet};

/// Syscalls this system never emits a call for, regardless of what the
/// target knows about them (§4.G step 1).
const BLACKLIST: &[&str] = &["exit", "exit_group", "rt_sigreturn", "rt_sigprocmask"];

const MEMORY_SYSCALLS: &[&str] = &[
    "mmap", "mremap", "msync", "mprotect", "munmap", "madvise", "mlock", "munlock", "shmat",
];

/// Everything that survives translating one per-PID list of traced calls.
pub struct TranslateOutput {
    pub prog: Prog,
    pub call_to_cover: HashMap<usize, Vec<u64>>,
    /// Per-call dependency bookkeeping the translator itself can establish
    /// (VMA producer links discovered live via the memory tracker); the
    /// full resource/filename dependency graph is completed later by
    /// `depgraph::track_dependencies`.
    pub depends_on: HashMap<usize, HashSet<usize>>,
    pub memtrack: MemoryTracker,
}

struct Ctx<'t> {
    target: &'t dyn Target,
    memtrack: MemoryTracker,
    rescache: ReturnCache,
    depends_on: HashMap<usize, HashSet<usize>>,
}

fn eval_expr(e: &Expression, target: &dyn Target) -> Result<u64> {
    let special = HashMap::new();
    let target_fn = |name: &str| target.const_by_name(name);
    let consts = ConstTable {
        target: &target_fn,
        special: &special,
    };
    e.eval(&consts)
}

/// Evaluates anything that can stand in for a plain integer: an
/// `Expression`, the numeric address of a `Pointer`, the sole element of a
/// singleton `Array`, the first field of a `Struct`, or an inner `Call`
/// (§4.G.3).
fn eval_u64(raw: Option<&RawArg>, target: &dyn Target) -> Result<u64> {
    match raw {
        None => Ok(0),
        Some(RawArg::Expression(e)) => eval_expr(e, target),
        Some(RawArg::Pointer { address, .. }) => Ok(*address),
        Some(RawArg::Null) => Ok(0),
        Some(RawArg::Array(items)) if items.len() == 1 => eval_u64(items.get(0), target),
        Some(RawArg::Struct(fields)) => eval_u64(fields.get(0), target),
        Some(RawArg::Field(_, inner)) => eval_u64(Some(inner.as_ref()), target),
        Some(RawArg::Call(name, args)) => eval_inner_call(name, args, target).map(|arg| match arg {
            Arg::Const(v) => v,
            Arg::Result { value, .. } => value,
            _ => 0,
        }),
        Some(_) => Ok(0),
    }
}

pub fn translate_trace(
    calls: &[TracedCall],
    target: &dyn Target,
    resolver: &VariantResolver,
) -> Result<TranslateOutput> {
    let mut ctx = Ctx {
        target,
        memtrack: MemoryTracker::new(),
        rescache: ReturnCache::new(),
        depends_on: HashMap::new(),
    };
    let mut prog = Prog::new();
    let mut call_to_cover = HashMap::new();

    for traced in calls {
        if traced.paused {
            continue;
        }
        if BLACKLIST.contains(&traced.call_name.as_str()) {
            continue;
        }
        if is_trivial_stdio_write(traced) {
            continue;
        }

        let call_idx = prog.len();

        let resolved_name = match preprocess(traced, target, resolver, &mut ctx.memtrack, call_idx) {
            Some(name) => name,
            None => continue,
        };

        let desc = match target.syscall_by_name(&resolved_name) {
            Some(d) => d.clone(),
            None => continue,
        };

        let call = if MEMORY_SYSCALLS.contains(&traced.call_name.as_str()) {
            match handle_memory_syscall(traced, &resolved_name, &desc, call_idx, &mut ctx) {
                Some(c) => c,
                None => continue,
            }
        } else {
            build_regular_call(traced, &resolved_name, &desc, call_idx, &mut ctx)?
        };

        let mut call = call;
        target.assign_sizes(&mut call);
        target.sanitize(&mut call);
        prog.push(call);
        call_to_cover.insert(call_idx, traced.cover.clone());

        if traced.ret > 0 {
            if let Some(ArgDecl::Resource { kind, .. }) = &desc.ret {
                ctx.rescache.cache(
                    kind,
                    &traced.ret.to_string(),
                    Producer {
                        call_idx,
                        value: traced.ret as u64,
                    },
                );
            }
        }
    }

    Ok(TranslateOutput {
        prog,
        call_to_cover,
        depends_on: ctx.depends_on,
        memtrack: ctx.memtrack,
    })
}

fn is_trivial_stdio_write(traced: &TracedCall) -> bool {
    if traced.call_name != "write" {
        return false;
    }
    matches!(
        traced.args.first(),
        Some(RawArg::Expression(Expression::IntLiteral(1)))
            | Some(RawArg::Expression(Expression::IntLiteral(2)))
    )
}

/// §4.D's variant resolution plus the additional per-call preprocess hooks
/// (open/mknod/openat zero-pad, prctl/shmctl/modify_ldt suffixing,
/// shmget's SHM-request bookkeeping). Returns the resolved call name.
fn preprocess(
    traced: &TracedCall,
    target: &dyn Target,
    resolver: &VariantResolver,
    memtrack: &mut MemoryTracker,
    call_idx: usize,
) -> Option<String> {
    let base = traced.call_name.as_str();

    match base {
        "socket" | "socketpair" => {
            let domain = eval_u64(traced.args.get(0), target).unwrap_or(0);
            let typ = eval_u64(traced.args.get(1), target).unwrap_or(0);
            let protocol = eval_u64(traced.args.get(2), target).unwrap_or(0);
            Some(
                resolver
                    .resolve_socket(domain, typ, protocol)
                    .unwrap_or(base)
                    .to_string(),
            )
        }
        "ioctl" | "bpf" | "fcntl" | "prctl" | "shmctl" | "modify_ldt" => {
            let command = eval_u64(traced.args.get(1), target).unwrap_or(0);
            Some(
                resolver
                    .resolve_command(base, command)
                    .unwrap_or(base)
                    .to_string(),
            )
        }
        "getsockopt" | "setsockopt" => {
            let level = eval_u64(traced.args.get(1), target).unwrap_or(0);
            let optname = eval_u64(traced.args.get(2), target).unwrap_or(0);
            Some(
                resolver
                    .resolve_sockopt(base, level, optname)
                    .unwrap_or(base)
                    .to_string(),
            )
        }
        "accept" | "accept4" | "bind" | "connect" | "recvfrom" | "sendto" | "getsockname" => {
            let kind_chain = target.resource_subkinds("sock");
            Some(
                resolver
                    .resolve_by_resource(base, &kind_chain)
                    .unwrap_or(base)
                    .to_string(),
            )
        }
        "open" | "mknod" | "openat" => Some(base.to_string()),
        "shmget" => {
            if traced.ret > 0 {
                let size = eval_u64(traced.args.get(1), target).unwrap_or(4096);
                memtrack.record_shm_request(traced.ret as u64, size, call_idx);
            }
            Some(base.to_string())
        }
        _ => Some(base.to_string()),
    }
}

fn build_regular_call(
    traced: &TracedCall,
    resolved_name: &str,
    desc: &crate::target::SyscallDesc,
    call_idx: usize,
    ctx: &mut Ctx,
) -> Result<Call> {
    let ret = reify_ret(&desc.ret, traced.ret, ctx.target);
    let mut args = Vec::with_capacity(desc.args.len());
    for (i, decl) in desc.args.iter().enumerate() {
        let raw = traced.args.get(i);
        let loc = ArgLoc::top(call_idx, CallSlot::Arg(i));
        args.push(reify_arg(decl, raw, loc, ctx)?);
    }
    Ok(Call::new(resolved_name.to_string(), args, ret))
}

fn reify_ret(decl: &Option<ArgDecl>, traced_ret: i64, target: &dyn Target) -> Arg {
    match decl {
        None => Arg::Const(traced_ret as u64),
        Some(ArgDecl::Resource { .. }) => Arg::Result {
            value: traced_ret as u64,
            producer: None,
        },
        Some(other) => {
            let mut arg = target.default_arg(other);
            if let Arg::Const(v) = &mut arg {
                *v = traced_ret as u64;
            }
            arg
        }
    }
}

fn reify_arg(decl: &ArgDecl, raw: Option<&RawArg>, loc: ArgLoc, ctx: &mut Ctx) -> Result<Arg> {
    match decl {
        ArgDecl::Int { direction } | ArgDecl::Flags { direction } => {
            reify_scalar(*direction, raw, decl, ctx)
        }
        ArgDecl::Const { val } => Ok(Arg::Const(*val)),
        ArgDecl::Csum => reify_scalar(Direction::In, raw, decl, ctx),
        ArgDecl::Length => Ok(ctx.target.default_arg(decl)),
        ArgDecl::Proc { values_per_proc } => {
            let val = eval_u64(raw, ctx.target)?;
            let clamped = if *values_per_proc == 0 {
                val
            } else {
                val % *values_per_proc
            };
            Ok(Arg::Const(clamped))
        }
        ArgDecl::Resource { kind, direction } => reify_resource(kind, *direction, raw, loc, ctx),
        ArgDecl::Pointer { pointee } => reify_pointer(pointee, raw, loc, ctx),
        ArgDecl::Buffer { kind, direction } => Ok(reify_buffer(kind, *direction, raw, ctx)),
        ArgDecl::Struct { name, fields } => reify_struct(name, fields, raw, loc, ctx),
        ArgDecl::Array { elem, .. } => reify_array(elem, raw, loc, ctx),
        ArgDecl::Union { name, options } => reify_union(name, options, raw, loc, ctx),
        ArgDecl::Vma { range_pages } => {
            let num_pages = range_pages.unwrap_or(1);
            ctx.memtrack.add_allocation(loc, num_pages * ctx.target.page_size());
            Ok(Arg::VmaPointer {
                address: 0,
                num_pages,
            })
        }
    }
}

fn reify_scalar(direction: Direction, raw: Option<&RawArg>, decl: &ArgDecl, ctx: &mut Ctx) -> Result<Arg> {
    if direction == Direction::Out {
        return Ok(ctx.target.default_arg(decl));
    }
    match raw {
        None => Ok(ctx.target.default_arg(decl)),
        Some(RawArg::Array(items)) if items.len() == 1 => {
            reify_scalar(direction, items.get(0), decl, ctx)
        }
        Some(RawArg::Array(items)) if items.len() >= 2 => Ok(ctx.target.default_arg(decl)),
        Some(RawArg::Struct(fields)) => reify_scalar(direction, fields.get(0), decl, ctx),
        Some(RawArg::Call(name, call_args)) => eval_inner_call(name, call_args, ctx.target),
        Some(RawArg::Pointer { address, .. }) => Ok(Arg::Const(*address)),
        Some(RawArg::Null) => Ok(Arg::Const(0)),
        Some(RawArg::Expression(e)) => Ok(Arg::Const(eval_expr(e, ctx.target)?)),
        Some(_) => Ok(ctx.target.default_arg(decl)),
    }
}

fn reify_resource(
    kind: &str,
    direction: Direction,
    raw: Option<&RawArg>,
    loc: ArgLoc,
    ctx: &mut Ctx,
) -> Result<Arg> {
    if direction == Direction::Out {
        let value = eval_u64(raw, ctx.target).unwrap_or(0);
        let arg = Arg::Result {
            value,
            producer: None,
        };
        if let Some(r) = raw {
            ctx.rescache.cache(
                kind,
                &r.render(),
                Producer {
                    call_idx: loc.call_idx,
                    value,
                },
            );
        }
        return Ok(arg);
    }
    let value = eval_u64(raw, ctx.target)?;
    let text = raw.map(RawArg::render).unwrap_or_default();
    if let Some(producer) = ctx.rescache.get(kind, &text) {
        ctx.depends_on
            .entry(loc.call_idx)
            .or_insert_with(HashSet::new)
            .insert(producer.call_idx);
        return Ok(result_arg_from_producer(producer));
    }
    Ok(Arg::Result {
        value,
        producer: None,
    })
}

/// §9 open question: always recurse into the pointee, regardless of
/// whether its referent was already produced by an earlier call.
fn reify_pointer(pointee_decl: &ArgDecl, raw: Option<&RawArg>, loc: ArgLoc, ctx: &mut Ctx) -> Result<Arg> {
    match raw {
        None => Ok(Arg::Pointer {
            address: 0,
            pointee: None,
        }),
        Some(r) if r.is_null_pointer() => Ok(Arg::Pointer {
            address: 0,
            pointee: None,
        }),
        Some(RawArg::Pointer { pointee: None, .. }) => {
            let default_pointee = ctx.target.default_arg(pointee_decl);
            let size = default_pointee.size().max(1);
            ctx.memtrack.add_allocation(loc, size);
            Ok(Arg::Pointer {
                address: 0,
                pointee: Some(Box::new(default_pointee)),
            })
        }
        Some(RawArg::Pointer {
            pointee: Some(inner),
            ..
        }) => {
            let inner_loc = loc.descend(PathStep::Inner);
            let reified = reify_arg(pointee_decl, Some(inner.as_ref()), inner_loc, ctx)?;
            let size = reified.size().max(1);
            ctx.memtrack.add_allocation(loc, size);
            Ok(Arg::Pointer {
                address: 0,
                pointee: Some(Box::new(reified)),
            })
        }
        Some(other) => {
            let inner_loc = loc.descend(PathStep::Inner);
            let reified = reify_arg(pointee_decl, Some(other), inner_loc, ctx)?;
            let size = reified.size().max(1);
            ctx.memtrack.add_allocation(loc, size);
            Ok(Arg::Pointer {
                address: 0,
                pointee: Some(Box::new(reified)),
            })
        }
    }
}

fn raw_buffer_len(raw: &RawArg) -> usize {
    match raw {
        RawArg::Buffer(b) => b.len(),
        RawArg::Struct(fields) => fields.len(),
        _ => 0,
    }
}

fn reify_buffer(kind: &BufferKind, direction: Direction, raw: Option<&RawArg>, ctx: &mut Ctx) -> Arg {
    if direction == Direction::Out {
        let size = match kind {
            BufferKind::Fixed(n) => *n,
            BufferKind::Range(lo, hi) => {
                use rand::Rng;
                if lo == hi {
                    *lo
                } else {
                    rand::thread_rng().gen_range(*lo, *hi + 1)
                }
            }
            BufferKind::Varlen | BufferKind::Filename => raw.map(raw_buffer_len).unwrap_or(0),
        };
        return Arg::Data {
            bytes: vec![0u8; size],
            direction: Direction::Out,
        };
    }

    let mut bytes = match raw {
        Some(RawArg::Buffer(b)) => b.clone(),
        Some(RawArg::Expression(e)) => eval_expr(e, ctx.target).unwrap_or(0).to_le_bytes().to_vec(),
        Some(RawArg::Pointer { address, .. }) => address.to_le_bytes().to_vec(),
        Some(RawArg::Ip(text)) => text.as_bytes().to_vec(),
        Some(RawArg::Null) | None => Vec::new(),
        Some(_) => Vec::new(),
    };
    if let BufferKind::Fixed(n) = kind {
        bytes.resize(*n, 0);
    }
    Arg::Data {
        bytes,
        direction: Direction::In,
    }
}

fn reorder_struct_fields<'a>(name: &str, mut fields: Vec<&'a RawArg>) -> Vec<&'a RawArg> {
    if name == "sockaddr_in6" && fields.len() > 3 {
        fields.swap(2, 3);
    }
    fields
}

fn reify_struct(
    name: &str,
    fields_decl: &[crate::target::FieldDecl],
    raw: Option<&RawArg>,
    loc: ArgLoc,
    ctx: &mut Ctx,
) -> Result<Arg> {
    let raw_fields: Vec<&RawArg> = match raw {
        Some(RawArg::Struct(fields)) => fields.iter().collect(),
        _ => Vec::new(),
    };
    let raw_fields = reorder_struct_fields(name, raw_fields);

    let mut out = Vec::with_capacity(fields_decl.len());
    let mut raw_idx = 0usize;
    for (i, fd) in fields_decl.iter().enumerate() {
        let field_loc = loc.descend(PathStep::Field(i));
        if fd.padding {
            out.push(ctx.target.default_arg(&fd.decl));
            continue;
        }
        let raw_field = raw_fields.get(raw_idx);
        raw_idx += 1;
        let raw_value = match raw_field {
            Some(RawArg::Field(fname, fval)) if fname == &fd.name => Some(fval.as_ref()),
            Some(other) => Some(*other),
            None => None,
        };
        out.push(reify_arg(&fd.decl, raw_value, field_loc, ctx)?);
    }
    Ok(Arg::Group(out))
}

fn reify_array(elem: &ArgDecl, raw: Option<&RawArg>, loc: ArgLoc, ctx: &mut Ctx) -> Result<Arg> {
    let items: Vec<&RawArg> = match raw {
        Some(RawArg::Array(items)) => items.iter().collect(),
        Some(other) => vec![other],
        None => Vec::new(),
    };
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        let item_loc = loc.descend(PathStep::Field(i));
        out.push(reify_arg(elem, Some(item), item_loc, ctx)?);
    }
    Ok(Arg::Group(out))
}

fn reify_union(
    name: &str,
    options: &[crate::target::FieldDecl],
    raw: Option<&RawArg>,
    loc: ArgLoc,
    ctx: &mut Ctx,
) -> Result<Arg> {
    let idx = dispatch_union_option(name, options, raw);
    let inner_loc = loc.descend(PathStep::Inner);
    let inner = reify_arg(&options[idx].decl, raw, inner_loc, ctx)?;
    Ok(Arg::Union {
        option: idx,
        inner: Box::new(inner),
    })
}

fn option_index(options: &[crate::target::FieldDecl], name: &str) -> Option<usize> {
    options.iter().position(|o| o.name == name)
}

/// Reads an int literal through a `Field` wrapper, since by the time a raw
/// value reaches a union dispatcher it may still carry the field name it was
/// tagged with in `reify_struct` (when that name didn't match the declared
/// field it was consumed against).
fn raw_int_literal(raw: Option<&RawArg>) -> Option<i64> {
    match raw? {
        RawArg::Expression(Expression::IntLiteral(v)) => Some(*v),
        RawArg::Field(_, inner) => raw_int_literal(Some(inner.as_ref())),
        _ => None,
    }
}

fn dispatch_union_option(name: &str, options: &[crate::target::FieldDecl], raw: Option<&RawArg>) -> usize {
    match name {
        "sockaddr_storage" => {
            if let Some(fields) = raw.and_then(RawArg::struct_fields) {
                let af_token = fields.iter().find_map(|f| match f {
                    RawArg::Field(fname, fval) if fname == "sa_family" => match fval.as_ref() {
                        RawArg::Expression(Expression::Flag(tok)) => Some(tok.clone()),
                        _ => None,
                    },
                    _ => None,
                });
                if let Some(tok) = af_token {
                    let target_field = match tok.as_str() {
                        "AF_INET6" => "in6",
                        "AF_INET" => "in",
                        "AF_UNIX" => "un",
                        "AF_NETLINK" => "nl",
                        _ => "",
                    };
                    if let Some(i) = option_index(options, target_field) {
                        return i;
                    }
                }
            }
            0
        }
        "sockaddr_nl$pid" => {
            let val = raw_int_literal(raw).unwrap_or(0);
            let field = if val > 0 {
                "proc"
            } else if val == 0 {
                "kern"
            } else {
                "unspec"
            };
            option_index(options, field).unwrap_or(0)
        }
        "ifr_ifru" if !options.is_empty() => match raw {
            Some(RawArg::Expression(_)) | Some(RawArg::Field(_, _)) => {
                2.min(options.len().saturating_sub(1))
            }
            _ => 0,
        },
        "ifconf" if !options.is_empty() => match raw {
            Some(RawArg::Struct(_)) => 1.min(options.len().saturating_sub(1)),
            _ => 0,
        },
        "bpf_insn" if !options.is_empty() => 1.min(options.len().saturating_sub(1)),
        _ => 0,
    }
}

/// §4.G.3: `htons`/`htonl`, `inet_addr`, `inet_pton`, `makedev`.
fn eval_inner_call(name: &str, args: &[RawArg], target: &dyn Target) -> Result<Arg> {
    match name {
        "htons" => {
            let v = eval_u64(args.get(0), target)?;
            Ok(Arg::Const((v as u16).to_be() as u64))
        }
        "htonl" => {
            let v = eval_u64(args.get(0), target)?;
            Ok(Arg::Const((v as u32).to_be() as u64))
        }
        "inet_addr" => {
            let text = raw_string(args.get(0))
                .ok_or_else(|| FatalKind::UnknownInnerCall("inet_addr(<non-string arg>)".to_string()))?;
            let addr = parse_ipv4_be(&text)
                .ok_or_else(|| FatalKind::UnknownInnerCall(format!("inet_addr({:?})", text)))?;
            Ok(Arg::Const(addr as u64))
        }
        "inet_pton" => {
            let text = raw_string(args.get(1)).unwrap_or_default();
            let option = match text.as_str() {
                "::" => 0,
                "::1" => 3,
                _ => 0,
            };
            Ok(Arg::Const(option))
        }
        "makedev" => {
            let maj = eval_u64(args.get(0), target)?;
            let min = eval_u64(args.get(1), target)?;
            Ok(Arg::Const(encode_dev_t(maj, min)))
        }
        other => Err(FatalKind::UnknownInnerCall(other.to_string()).into()),
    }
}

fn encode_dev_t(major: u64, minor: u64) -> u64 {
    ((major & 0xfffff000) << 32)
        | ((major & 0xfff) << 8)
        | ((minor & 0xffffff00) << 12)
        | (minor & 0xff)
}

fn raw_string(raw: Option<&RawArg>) -> Option<String> {
    match raw? {
        RawArg::Ip(text) => Some(text.clone()),
        RawArg::Buffer(bytes) => Some(String::from_utf8_lossy(bytes).to_string()),
        RawArg::Expression(Expression::Flag(text)) => Some(text.clone()),
        _ => None,
    }
}

fn parse_ipv4_be(text: &str) -> Option<u32> {
    let parts: Vec<&str> = text.trim_matches('"').split('.').collect();
    if parts.len() != 4 {
        return None;
    }
    let mut addr: u32 = 0;
    for part in parts {
        let octet: u32 = part.parse().ok()?;
        addr = (addr << 8) | (octet & 0xff);
    }
    Some(addr)
}

fn anywhere_address(target: &dyn Target) -> u64 {
    (target.num_pages() - 2) * target.page_size()
}

fn round_up_page(value: u64, page_size: u64) -> u64 {
    if value % page_size == 0 {
        value
    } else {
        value + (page_size - value % page_size)
    }
}

/// §4.G.2: the five memory-syscall handlers.
fn handle_memory_syscall(
    traced: &TracedCall,
    resolved_name: &str,
    desc: &crate::target::SyscallDesc,
    call_idx: usize,
    ctx: &mut Ctx,
) -> Option<Call> {
    match traced.call_name.as_str() {
        "mmap" => {
            let len = eval_u64(traced.args.get(1), ctx.target).ok()?;
            let prot = eval_u64(traced.args.get(2), ctx.target).unwrap_or(0);
            let flags = eval_u64(traced.args.get(3), ctx.target).unwrap_or(0) | libc::MAP_FIXED as u64;
            let page_size = ctx.target.page_size();
            let rounded = round_up_page(len.max(1), page_size);
            let addr = if traced.ret > 0 {
                traced.ret as u64
            } else {
                anywhere_address(ctx.target)
            };
            ctx.memtrack.create_mapping(call_idx, addr, addr + rounded);
            let num_pages = rounded / page_size;
            let fd_loc = ArgLoc::top(call_idx, CallSlot::Arg(4));
            let fd_arg = reify_resource("fd", Direction::In, traced.args.get(4), fd_loc, ctx).ok()?;
            Some(Call::new(
                resolved_name.to_string(),
                vec![
                    Arg::VmaPointer {
                        address: addr,
                        num_pages,
                    },
                    Arg::Const(rounded),
                    Arg::Const(prot),
                    Arg::Const(flags),
                    fd_arg,
                    Arg::Const(eval_u64(traced.args.get(5), ctx.target).unwrap_or(0)),
                ],
                Arg::VmaPointer {
                    address: addr,
                    num_pages,
                },
            ))
        }
        "mremap" => {
            let old_addr = eval_u64(traced.args.get(0), ctx.target).ok()?;
            let old_size = eval_u64(traced.args.get(1), ctx.target).unwrap_or(0);
            let new_size = eval_u64(traced.args.get(2), ctx.target).unwrap_or(old_size);
            let flags =
                eval_u64(traced.args.get(3), ctx.target).unwrap_or(0) | libc::MREMAP_FIXED as u64;
            let page_size = ctx.target.page_size();
            let rounded_new = round_up_page(new_size.max(1), page_size);
            let old_loc = ArgLoc::top(call_idx, CallSlot::Arg(0));
            let producer = ctx.memtrack.add_dependency(old_addr, old_size.max(1), old_loc);
            if let Some(p) = producer {
                ctx.depends_on.entry(call_idx).or_insert_with(HashSet::new).insert(p);
            }
            let new_addr = if traced.ret > 0 {
                traced.ret as u64
            } else {
                anywhere_address(ctx.target)
            };
            ctx.memtrack
                .create_mapping(call_idx, new_addr, new_addr + rounded_new);
            Some(Call::new(
                resolved_name.to_string(),
                vec![
                    Arg::VmaPointer {
                        address: old_addr,
                        num_pages: 1,
                    },
                    Arg::Const(old_size),
                    Arg::Const(new_size),
                    Arg::Const(flags),
                    Arg::VmaPointer {
                        address: new_addr,
                        num_pages: rounded_new / page_size,
                    },
                ],
                Arg::VmaPointer {
                    address: new_addr,
                    num_pages: rounded_new / page_size,
                },
            ))
        }
        "msync" | "mprotect" | "munmap" | "madvise" | "mlock" | "munlock" => {
            let addr = eval_u64(traced.args.get(0), ctx.target).ok()?;
            let len = eval_u64(traced.args.get(1), ctx.target).unwrap_or(0).max(1);
            let loc = ArgLoc::top(call_idx, CallSlot::Arg(0));
            let producer = ctx.memtrack.add_dependency(addr, len, loc);
            if let Some(p) = producer {
                ctx.depends_on.entry(call_idx).or_insert_with(HashSet::new).insert(p);
            }
            let mut args = vec![
                Arg::VmaPointer {
                    address: addr,
                    num_pages: 1,
                },
                Arg::Const(len),
            ];
            for decl in desc.args.iter().skip(2) {
                args.push(ctx.target.default_arg(decl));
            }
            Some(Call::new(resolved_name.to_string(), args, Arg::Const(0)))
        }
        "shmat" => {
            let shmid = eval_u64(traced.args.get(0), ctx.target).ok()?;
            let request = ctx.memtrack.shm_request(shmid);
            let size = request.map(|r| r.size).unwrap_or(4096);
            let addr = if traced.ret > 0 {
                traced.ret as u64
            } else {
                anywhere_address(ctx.target)
            };
            ctx.memtrack.create_mapping(call_idx, addr, addr + size.max(1));
            let shmid_loc = ArgLoc::top(call_idx, CallSlot::Arg(0));
            let shmid_arg = reify_resource("shmid", Direction::In, traced.args.get(0), shmid_loc, ctx)
                .unwrap_or(Arg::Const(shmid));
            let ret_arg = Arg::Result {
                value: traced.ret as u64,
                producer: None,
            };
            let page_size = ctx.target.page_size();
            Some(Call::new(
                resolved_name.to_string(),
                vec![
                    shmid_arg,
                    Arg::VmaPointer {
                        address: addr,
                        num_pages: (size.max(1) + page_size - 1) / page_size,
                    },
                    Arg::Const(eval_u64(traced.args.get(2), ctx.target).unwrap_or(0)),
                ],
                ret_arg,
            ))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Expression, RawArg, TracedCall};
    use crate::target::StaticTarget;
    use crate::variant::{static_selectors, VariantResolver};

    fn target_and_resolver() -> (StaticTarget, VariantResolver) {
        let target = StaticTarget::new();
        let resolver = VariantResolver::build(&target, &static_selectors());
        (target, resolver)
    }

    fn flag(name: &str) -> RawArg {
        RawArg::Expression(Expression::Flag(name.to_string()))
    }

    fn int(v: i64) -> RawArg {
        RawArg::Expression(Expression::IntLiteral(v))
    }

    #[test]
    fn scenario_open_then_write_links_fd_to_producer() {
        let (target, resolver) = target_and_resolver();
        let calls = vec![
            TracedCall {
                pid: 1,
                call_name: "open".to_string(),
                args: vec![
                    RawArg::Buffer(b"file".to_vec()),
                    RawArg::Expression(Expression::FlagSet(vec![flag("O_CREAT"), flag("O_RDWR")])),
                ],
                ret: 3,
                cover: vec![],
                paused: false,
                resumed: false,
            },
            TracedCall {
                pid: 1,
                call_name: "write".to_string(),
                args: vec![int(3), RawArg::Buffer(b"somedata".to_vec()), int(8)],
                ret: 8,
                cover: vec![],
                paused: false,
                resumed: false,
            },
        ];

        let out = translate_trace(&calls, &target, &resolver).unwrap();
        assert_eq!(out.prog.len(), 2);
        match &out.prog.calls[1].args[0] {
            Arg::Result { producer, value } => {
                assert_eq!(*producer, Some(0));
                assert_eq!(*value, 3);
            }
            other => panic!("expected a result arg, got {:?}", other),
        }
    }

    #[test]
    fn scenario_socket_unix_has_no_allocations() {
        let (target, resolver) = target_and_resolver();
        let calls = vec![TracedCall {
            pid: 1,
            call_name: "socket".to_string(),
            args: vec![
                flag("AF_UNIX"),
                RawArg::Expression(Expression::FlagSet(vec![
                    flag("SOCK_STREAM"),
                    flag("SOCK_CLOEXEC"),
                ])),
                int(0),
            ],
            ret: 3,
            cover: vec![],
            paused: false,
            resumed: false,
        }];
        let out = translate_trace(&calls, &target, &resolver).unwrap();
        assert_eq!(out.prog.len(), 1);
        assert_eq!(out.prog.calls[0].meta, "socket$unix");
        assert!(!out.memtrack.has_allocations());
    }

    #[test]
    fn scenario_connect_inet_selects_in_option_with_correct_addr() {
        let (target, resolver) = target_and_resolver();
        let sockaddr = RawArg::Struct(vec![
            RawArg::Field("sa_family".to_string(), Box::new(flag("AF_INET"))),
            RawArg::Field(
                "sin_port".to_string(),
                Box::new(RawArg::Call("htons".to_string(), vec![int(37957)])),
            ),
            RawArg::Field(
                "sin_addr".to_string(),
                Box::new(RawArg::Call(
                    "inet_addr".to_string(),
                    vec![RawArg::Ip("127.0.0.1".to_string())],
                )),
            ),
        ]);
        let calls = vec![
            TracedCall {
                pid: 1,
                call_name: "socket".to_string(),
                args: vec![flag("AF_INET"), flag("SOCK_STREAM"), flag("IPPROTO_IP")],
                ret: 3,
                cover: vec![],
                paused: false,
                resumed: false,
            },
            TracedCall {
                pid: 1,
                call_name: "connect".to_string(),
                args: vec![
                    int(3),
                    RawArg::Pointer {
                        address: 0x1000,
                        pointee: Some(Box::new(sockaddr)),
                    },
                    int(16),
                ],
                ret: 0,
                cover: vec![],
                paused: false,
                resumed: false,
            },
        ];
        let out = translate_trace(&calls, &target, &resolver).unwrap();
        assert_eq!(out.prog.calls[0].meta, "socket$inet_tcp");
        assert_eq!(out.prog.calls[1].meta, "connect$inet");
        let pointee = match &out.prog.calls[1].args[1] {
            Arg::Pointer { pointee: Some(p), .. } => p.as_ref(),
            other => panic!("expected pointer, got {:?}", other),
        };
        let group = match pointee {
            Arg::Group(fields) => fields,
            other => panic!("expected group, got {:?}", other),
        };
        assert_eq!(group[2], Arg::Const(0x7F000001));
    }

    #[test]
    fn scenario_bind_netlink_selects_kern_suboption() {
        let (target, resolver) = target_and_resolver();
        let sockaddr = RawArg::Struct(vec![
            RawArg::Field("sa_family".to_string(), Box::new(flag("AF_NETLINK"))),
            RawArg::Field("nl_pid".to_string(), Box::new(int(0))),
            RawArg::Field("nl_groups".to_string(), Box::new(int(0))),
        ]);
        let calls = vec![TracedCall {
            pid: 1,
            call_name: "bind".to_string(),
            args: vec![
                int(5),
                RawArg::Pointer {
                    address: 0x2000,
                    pointee: Some(Box::new(sockaddr)),
                },
                int(12),
            ],
            ret: -1,
            cover: vec![],
            paused: false,
            resumed: false,
        }];
        let out = translate_trace(&calls, &target, &resolver).unwrap();
        let pointee = match &out.prog.calls[0].args[1] {
            Arg::Pointer { pointee: Some(p), .. } => p.as_ref(),
            other => panic!("expected pointer, got {:?}", other),
        };
        let (option, inner) = match pointee {
            Arg::Union { option, inner } => (*option, inner.as_ref()),
            other => panic!("expected union, got {:?}", other),
        };
        assert_eq!(option, 3); // "nl" is option index 3 in sockaddr_storage_decl
        let nl_fields = match inner {
            Arg::Group(f) => f,
            other => panic!("expected group, got {:?}", other),
        };
        match &nl_fields[2] {
            Arg::Union { option, .. } => assert_eq!(*option, 0), // "kern"
            other => panic!("expected union, got {:?}", other),
        }
    }

    #[test]
    fn scenario_bind_netlink_selects_proc_suboption_for_positive_pid() {
        let (target, resolver) = target_and_resolver();
        let sockaddr = RawArg::Struct(vec![
            RawArg::Field("sa_family".to_string(), Box::new(flag("AF_NETLINK"))),
            RawArg::Field("nl_pid".to_string(), Box::new(int(1234))),
            RawArg::Field("nl_groups".to_string(), Box::new(int(0))),
        ]);
        let calls = vec![TracedCall {
            pid: 1,
            call_name: "bind".to_string(),
            args: vec![
                int(5),
                RawArg::Pointer {
                    address: 0x2000,
                    pointee: Some(Box::new(sockaddr)),
                },
                int(12),
            ],
            ret: -1,
            cover: vec![],
            paused: false,
            resumed: false,
        }];
        let out = translate_trace(&calls, &target, &resolver).unwrap();
        let pointee = match &out.prog.calls[0].args[1] {
            Arg::Pointer { pointee: Some(p), .. } => p.as_ref(),
            other => panic!("expected pointer, got {:?}", other),
        };
        let inner = match pointee {
            Arg::Union { inner, .. } => inner.as_ref(),
            other => panic!("expected union, got {:?}", other),
        };
        let nl_fields = match inner {
            Arg::Group(f) => f,
            other => panic!("expected group, got {:?}", other),
        };
        match &nl_fields[2] {
            Arg::Union { option, .. } => assert_eq!(*option, 1), // "proc"
            other => panic!("expected union, got {:?}", other),
        }
    }

    #[test]
    fn encode_dev_t_matches_glibc_formula() {
        assert_eq!(encode_dev_t(8, 1), (8u64 << 8) | 1);
    }

    #[test]
    fn parse_ipv4_is_big_endian_dotted_quad() {
        assert_eq!(parse_ipv4_be("0.0.0.0"), Some(0));
        assert_eq!(parse_ipv4_be("127.0.0.1"), Some(0x7F000001));
    }
}
