//! Variant resolver (§4.D): maps a generic syscall + argument values to its
//! specialised variant, e.g. `socket` + `AF_UNIX,SOCK_STREAM,0` ->
//! `socket$unix`. Built once per target by walking `target.syscall_map()`.
//!
//! The additional per-call preprocess hooks listed in §4.D (`open`/`mknod`/
//! `openat` zero-padding, `prctl`/`shmctl`/`modify_ldt` suffixing,
//! `shmget`'s SHM-request bookkeeping) live in `translate.rs`, since they
//! need the translator's mutable context (memory tracker, current traced
//! call); this module only builds and answers the lookup tables.

use crate::config::split_variant_suffix;
use crate::target::Target;
use std::collections::HashMap;

/// Domain knowledge a concrete `Target` attaches to one of its variant
/// syscall descriptions, describing which raw argument values select it.
/// In a real integration this would be derived from the external type
/// library's own constant tables; here it's supplied directly.
#[derive(Debug, Clone)]
pub enum VariantSelector {
    Socket {
        domain: u64,
        type_base: u64,
        protocol: Option<u64>,
    },
    Command {
        command: u64,
    },
    SockOpt {
        level: u64,
        optname: u64,
    },
    ResourceKind {
        kind: String,
    },
}

const ALL_ONES: u64 = u64::MAX;
const SOCK_CLOEXEC: u64 = libc::SOCK_CLOEXEC as u64;
const SOCK_NONBLOCK: u64 = libc::SOCK_NONBLOCK as u64;

#[derive(Debug, Default)]
pub struct VariantResolver {
    socket_table: HashMap<(u64, u64, u64), String>,
    command_table: HashMap<(String, u64), String>,
    sockopt_table: HashMap<(String, u64, u64), String>,
    resource_table: HashMap<(String, String), String>,
}

impl VariantResolver {
    pub fn build(target: &dyn Target, selectors: &HashMap<String, VariantSelector>) -> Self {
        let mut resolver = VariantResolver::default();
        for desc in target.syscall_map() {
            let selector = match selectors.get(&desc.name) {
                Some(s) => s,
                None => continue,
            };
            let base = split_variant_suffix(&desc.name).to_string();
            match selector {
                VariantSelector::Socket {
                    domain,
                    type_base,
                    protocol,
                } => {
                    let protocol_key = protocol.unwrap_or(ALL_ONES);
                    for combo in [0u64, SOCK_CLOEXEC, SOCK_NONBLOCK, SOCK_CLOEXEC | SOCK_NONBLOCK]
                    {
                        resolver
                            .socket_table
                            .insert((*domain, type_base | combo, protocol_key), desc.name.clone());
                    }
                }
                VariantSelector::Command { command } => {
                    resolver
                        .command_table
                        .insert((base, *command), desc.name.clone());
                }
                VariantSelector::SockOpt { level, optname } => {
                    resolver
                        .sockopt_table
                        .insert((base, *level, *optname), desc.name.clone());
                }
                VariantSelector::ResourceKind { kind } => {
                    resolver
                        .resource_table
                        .insert((base, kind.clone()), desc.name.clone());
                }
            }
        }
        resolver
    }

    pub fn resolve_socket(&self, domain: u64, typ: u64, protocol: u64) -> Option<&str> {
        self.socket_table
            .get(&(domain, typ, protocol))
            .or_else(|| self.socket_table.get(&(domain, typ, ALL_ONES)))
            .map(String::as_str)
    }

    pub fn resolve_command(&self, base: &str, command: u64) -> Option<&str> {
        self.command_table
            .get(&(base.to_string(), command))
            .map(String::as_str)
    }

    pub fn resolve_sockopt(&self, base: &str, level: u64, optname: u64) -> Option<&str> {
        self.sockopt_table
            .get(&(base.to_string(), level, optname))
            .map(String::as_str)
    }

    /// Walks `kind_chain` (most specific subkind first, per
    /// `Target::resource_subkinds`) and returns the first registered
    /// variant, matching the spec's "most-specific -> least-specific" rule.
    pub fn resolve_by_resource(&self, base: &str, kind_chain: &[String]) -> Option<&str> {
        kind_chain
            .iter()
            .find_map(|kind| self.resource_table.get(&(base.to_string(), kind.clone())))
            .map(String::as_str)
    }
}

/// The selector table for `StaticTarget`'s builtin syscalls (§4.D's own
/// running example families).
pub fn static_selectors() -> HashMap<String, VariantSelector> {
    let mut m = HashMap::new();
    m.insert(
        "socket$unix".to_string(),
        VariantSelector::Socket {
            domain: libc::AF_UNIX as u64,
            type_base: libc::SOCK_STREAM as u64,
            protocol: Some(0),
        },
    );
    m.insert(
        "socket$inet_tcp".to_string(),
        VariantSelector::Socket {
            domain: libc::AF_INET as u64,
            type_base: libc::SOCK_STREAM as u64,
            protocol: Some(0),
        },
    );
    m.insert(
        "socket$packet".to_string(),
        VariantSelector::Socket {
            domain: libc::AF_PACKET as u64,
            type_base: libc::SOCK_RAW as u64,
            protocol: None,
        },
    );
    m.insert(
        "ioctl$SIOCGIFHWADDR".to_string(),
        VariantSelector::Command { command: 0x8927 },
    );
    m.insert(
        "connect$inet".to_string(),
        VariantSelector::ResourceKind {
            kind: "sock_in".to_string(),
        },
    );
    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::StaticTarget;

    #[test]
    fn socket_resolution_is_insensitive_to_cloexec_nonblock() {
        let target = StaticTarget::new();
        let resolver = VariantResolver::build(&target, &static_selectors());
        let base = libc::SOCK_STREAM as u64;
        assert_eq!(
            resolver.resolve_socket(libc::AF_UNIX as u64, base, 0),
            Some("socket$unix")
        );
        assert_eq!(
            resolver.resolve_socket(libc::AF_UNIX as u64, base | SOCK_CLOEXEC, 0),
            Some("socket$unix")
        );
        assert_eq!(
            resolver.resolve_socket(libc::AF_UNIX as u64, base | SOCK_NONBLOCK | SOCK_CLOEXEC, 0),
            Some("socket$unix")
        );
    }

    #[test]
    fn socket_resolution_falls_back_to_all_ones_protocol() {
        let target = StaticTarget::new();
        let resolver = VariantResolver::build(&target, &static_selectors());
        assert_eq!(
            resolver.resolve_socket(libc::AF_PACKET as u64, libc::SOCK_RAW as u64, 768),
            Some("socket$packet")
        );
    }

    #[test]
    fn resource_resolution_prefers_most_specific_kind() {
        let target = StaticTarget::new();
        let resolver = VariantResolver::build(&target, &static_selectors());
        let chain = vec!["sock_in".to_string(), "sock".to_string(), "fd".to_string()];
        assert_eq!(resolver.resolve_by_resource("connect", &chain), Some("connect$inet"));
    }

    #[test]
    fn unknown_command_resolves_to_none() {
        let target = StaticTarget::new();
        let resolver = VariantResolver::build(&target, &static_selectors());
        assert_eq!(resolver.resolve_command("ioctl", 0xdead), None);
    }
}
