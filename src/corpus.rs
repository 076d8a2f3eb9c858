//! Corpus packer (§4.O): a thin stand-in for the external serialisation
//! library's on-disk database. Content-addresses each accepted program by a
//! SHA-256 hash of its bytes, and appends one length-prefixed entry per
//! program to the database file. The real format (indexing, compaction,
//! dedup by hash) is out of scope; this just gives the CLI shell something
//! real to call.

use crate::error::{FatalKind, Result, TraceError};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::Path;

/// Fixed per §6: the corpus database format version this packer writes.
pub const CORPUS_VERSION: u32 = 3;

/// One packed program: its content hash, the format version it was packed
/// under, and the raw bytes that hash was taken over.
#[derive(Debug, Clone, PartialEq)]
pub struct CorpusEntry {
    pub hash: [u8; 32],
    pub version: u32,
    pub data: Vec<u8>,
}

impl CorpusEntry {
    pub fn new(data: Vec<u8>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(&data);
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&hasher.finalize());
        CorpusEntry {
            hash,
            version: CORPUS_VERSION,
            data,
        }
    }

    /// `hash (32) | version (4, little-endian) | len (8, little-endian) | data`.
    fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_all(&self.hash)?;
        w.write_all(&self.version.to_le_bytes())?;
        w.write_all(&(self.data.len() as u64).to_le_bytes())?;
        w.write_all(&self.data)?;
        Ok(())
    }
}

/// `pack(dir, db_path)` (§4.O): walks `dir`, reads every regular file,
/// content-addresses it, and writes the resulting entries to `db_path` as a
/// flat stream. Returns the number of entries written.
pub fn pack(dir: &Path, db_path: &Path) -> Result<usize> {
    let io_err = |path: &Path, source: std::io::Error| {
        TraceError::Fatal(FatalKind::Io {
            path: path.to_path_buf(),
            source,
        })
    };

    let mut entries = Vec::new();
    let read_dir = fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    for entry in read_dir {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let data = fs::read(&path).map_err(|e| io_err(&path, e))?;
        entries.push(CorpusEntry::new(data));
    }
    // Stable, deterministic ordering regardless of directory-walk order.
    entries.sort_by(|a, b| a.hash.cmp(&b.hash));

    let file = fs::File::create(db_path).map_err(|e| io_err(db_path, e))?;
    let mut writer = std::io::BufWriter::new(file);
    for entry in &entries {
        entry
            .write_to(&mut writer)
            .map_err(|e| io_err(db_path, e))?;
    }
    writer.flush().map_err(|e| io_err(db_path, e))?;
    Ok(entries.len())
}
