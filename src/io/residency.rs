//! Backing memory for a loaded artifact.

use std::fs::{self, File};
use std::path::Path;

use memmap2::{Advice, Mmap, MmapOptions};

use crate::config::LoadPolicy;
use crate::error::Result;

/// Owns the bytes of a loaded artifact, either as a file mapping or as an
/// anonymous in-memory copy. Views borrow from this and never outlive it.
pub(crate) enum Residency {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Residency {
    /// Bring the file at `path` into memory according to `policy`.
    pub fn load(path: &Path, policy: LoadPolicy) -> Result<Self> {
        if policy == LoadPolicy::CopyData {
            return Ok(Residency::Owned(fs::read(path)?));
        }
        let file = File::open(path)?;
        // SAFETY: the artifact contract is a file that is not truncated or
        // rewritten while loaded; queries treat the mapping as immutable.
        let map = unsafe { MmapOptions::new().map(&file)? };
        match policy {
            LoadPolicy::MapFetch => map.advise(Advice::WillNeed)?,
            LoadPolicy::MapOccupy => map.lock()?,
            _ => {}
        }
        Ok(Residency::Mapped(map))
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Residency::Mapped(map) => map,
            Residency::Owned(buf) => buf,
        }
    }
}
