//! Distillation configuration (§6, §4.M): `{ "type", "stats", "implicit_dependencies" }`
//! plus the implicit-dependencies JSON table.

use crate::error::{FatalKind, Result};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// §6's JSON shape spells "absent" as `""` rather than omitting the key
/// (`"stats": "<stats-file-path or empty>"`). Collapse that into `None` at
/// deserialization time so the rest of the core only ever sees `Option`.
fn empty_string_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<PathBuf>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.is_empty()).map(PathBuf::from))
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistillKind {
    Weak,
    Explicit,
    Implicit,
    Trace,
    Random,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DistillConfig {
    #[serde(rename = "type")]
    pub kind: DistillKind,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub stats: Option<PathBuf>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub implicit_dependencies: Option<PathBuf>,
}

impl DistillConfig {
    pub fn load(path: &Path) -> Result<DistillConfig> {
        let file = File::open(path).map_err(|source| FatalKind::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_reader(BufReader::new(file)).map_err(|source| {
            FatalKind::ConfigParse {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Ok(config)
    }
}

/// `{ "<syscall-prefix>": ["<prereq-name>", ...], ... }`, keyed on the same
/// prefix-before-`$` normalisation the variant resolver applies to live call
/// names (§9 open question on implicit-deps keying).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImplicitDeps(pub HashMap<String, Vec<String>>);

impl ImplicitDeps {
    pub fn load(path: &Path) -> Result<ImplicitDeps> {
        let file = File::open(path).map_err(|source| FatalKind::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let deps = serde_json::from_reader(BufReader::new(file)).map_err(|source| {
            FatalKind::ConfigParse {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Ok(ImplicitDeps(deps))
    }

    pub fn prereqs_for(&self, call_name: &str) -> &[String] {
        let prefix = split_variant_suffix(call_name);
        self.0
            .get(prefix)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

/// Normalises a call name to the part before its first `$`, e.g.
/// `socket$inet_tcp` -> `socket`. Used identically by the implicit-deps
/// table keys and by the live call names it is matched against.
pub fn split_variant_suffix(name: &str) -> &str {
    match name.find('$') {
        Some(idx) => &name[..idx],
        None => name,
    }
}
