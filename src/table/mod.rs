//! Artifact module — the immutable on-disk set-associative hashtable.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ Header (64 bytes, little-endian)                            │
//! │   Magic: u32 | Kind: u8 | KeyLen: u8 | ValLen: u16          │
//! │   Seed: u64 | Item: u64 | SetCnt: u64 | Reserved (32)       │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Guide (SetCnt × 64 bytes)                                   │
//! │   one descriptor byte per slot:                             │
//! │   0xFF = empty | 0x80 = in-progress (build only)            │
//! │   else = 7-bit mark of the stored key's hash                │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Content (SetCnt × 64 lines of KeyLen+ValLen bytes)          │
//! │   [Key][Value]  (Value = 6-byte offset for KV_SEPARATED)    │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Extend (KV_SEPARATED only)                                  │
//! │   [VarintLen][Bytes] ... addressed by the 6-byte offsets    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A key hashes to a set of 64 slots; probing starts at a hash-derived
//! in-set shift and wraps through the set, spilling into the next set
//! only when the current one has no empty slot. An empty slot terminates
//! a lookup, so probe chains stay short as long as the builder's reserve
//! slots exist.

mod batch;
mod search;
mod view;

use std::path::Path;

use tracing::debug;

use crate::build;
use crate::config::LoadPolicy;
use crate::error::Result;
use crate::io::{DataReader, DataWriter, Residency};

pub(crate) use search::{keys_equal, search_line, separated_value};
pub(crate) use view::{View, ViewMeta};

// =============================================================================
// Shared Constants (format-level, used by search, batch, and build)
// =============================================================================

/// Magic number identifying an artifact file
pub(crate) const MAGIC: u32 = 0x5448_5353;

/// Header size in bytes
pub(crate) const HEADER_SIZE: usize = 64;

/// Slots per set; sets are the unit of probing
pub(crate) const SLOTS_PER_SET: usize = 64;

/// Guide byte of a slot nothing has claimed
pub(crate) const EMPTY_SLOT: u8 = 0xff;

/// Guide byte of a slot claimed but not yet published (build only)
pub(crate) const BUSY_SLOT: u8 = 0x80;

/// Size of the offset field standing in for KV_SEPARATED values
pub(crate) const OFFSET_FIELD_SIZE: usize = 6;

/// Largest offset the 6-byte field can address
pub(crate) const MAX_OFFSET: u64 = (1 << (OFFSET_FIELD_SIZE as u64 * 8)) - 1;

/// Keys are 1..=255 bytes, fixed per artifact
pub const MAX_KEY_LEN: usize = u8::MAX as usize;

/// Inline values are 1..=65535 bytes, fixed per artifact
pub const MAX_INLINE_VALUE_LEN: usize = u16::MAX as usize;

/// Varint-coded value lengths span 35 bits (five 7-bit groups)
pub(crate) const MAX_VALUE_LEN_BITS: u32 = 35;

/// Largest value a KV_SEPARATED artifact can store
pub const MAX_VALUE_LEN: u64 = (1 << MAX_VALUE_LEN_BITS) - 1;

// =============================================================================
// Offset Field Codec
// =============================================================================

/// Decode the 6-byte little-endian offset field (`u32` low, `u16` high).
#[inline]
pub(crate) fn read_offset_field(field: &[u8]) -> u64 {
    let low = u32::from_le_bytes(field[..4].try_into().unwrap()) as u64;
    let high = u16::from_le_bytes(field[4..6].try_into().unwrap()) as u64;
    high << 32 | low
}

/// Encode an offset into the 6-byte field. `offset` must fit 48 bits.
#[inline]
pub(crate) fn write_offset_field(field: &mut [u8], offset: u64) {
    field[..4].copy_from_slice(&(offset as u32).to_le_bytes());
    field[4..6].copy_from_slice(&((offset >> 32) as u16).to_le_bytes());
}

// =============================================================================
// Table Kind
// =============================================================================

/// Shape of a built artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TableKind {
    /// Keys only; a lookup answers membership
    KeySet = 0,
    /// Fixed-length values stored inline next to their keys
    KvInline = 1,
    /// Variable-length values stored in the extend region
    KvSeparated = 2,
}

impl TableKind {
    pub(crate) fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(TableKind::KeySet),
            1 => Some(TableKind::KvInline),
            2 => Some(TableKind::KvSeparated),
            _ => None,
        }
    }
}

// =============================================================================
// Header
// =============================================================================

/// The fixed 64-byte artifact header.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Header {
    pub kind: TableKind,
    pub key_len: u8,
    pub val_len: u16,
    pub seed: u64,
    pub item: u64,
    pub set_cnt: u64,
}

impl Header {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        buf[4] = self.kind as u8;
        buf[5] = self.key_len;
        buf[6..8].copy_from_slice(&self.val_len.to_le_bytes());
        buf[8..16].copy_from_slice(&self.seed.to_le_bytes());
        buf[16..24].copy_from_slice(&self.item.to_le_bytes());
        buf[24..32].copy_from_slice(&self.set_cnt.to_le_bytes());
        buf
    }

    /// Parse a header from the start of `bytes`. `None` when the slice is
    /// short, the magic is wrong, or the kind byte is unknown.
    pub fn decode(bytes: &[u8]) -> Option<Header> {
        if bytes.len() < HEADER_SIZE {
            return None;
        }
        if u32::from_le_bytes(bytes[0..4].try_into().unwrap()) != MAGIC {
            return None;
        }
        Some(Header {
            kind: TableKind::from_raw(bytes[4])?,
            key_len: bytes[5],
            val_len: u16::from_le_bytes(bytes[6..8].try_into().unwrap()),
            seed: u64::from_le_bytes(bytes[8..16].try_into().unwrap()),
            item: u64::from_le_bytes(bytes[16..24].try_into().unwrap()),
            set_cnt: u64::from_le_bytes(bytes[24..32].try_into().unwrap()),
        })
    }
}

// =============================================================================
// Hashtable
// =============================================================================

/// A loaded artifact: read-only, thread-safe, shared by reference.
///
/// Owns its backing memory (a file mapping or an owned buffer); every
/// lookup result borrows from it.
pub struct Hashtable {
    res: Residency,
    meta: ViewMeta,
}

impl Hashtable {
    /// Load an artifact file according to `policy`.
    pub fn open(path: impl AsRef<Path>, policy: LoadPolicy) -> Result<Self> {
        let res = Residency::load(path.as_ref(), policy)?;
        let meta = view::parse(res.as_bytes())?;
        debug!(
            kind = ?meta.kind,
            item = meta.item,
            set_cnt = meta.set_cnt.value(),
            "artifact loaded"
        );
        Ok(Hashtable { res, meta })
    }

    /// Wrap artifact bytes already in memory (e.g. a build into a `Vec`).
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let meta = view::parse(&bytes)?;
        Ok(Hashtable {
            res: Residency::Owned(bytes),
            meta,
        })
    }

    /// Shape of this artifact.
    pub fn kind(&self) -> TableKind {
        self.meta.kind
    }

    /// Fixed key length in bytes.
    pub fn key_len(&self) -> usize {
        self.meta.key_len as usize
    }

    /// Value field length in bytes (0 for key sets, 6 for KV_SEPARATED).
    pub fn val_len(&self) -> usize {
        self.meta.val_len as usize
    }

    /// Number of distinct keys stored.
    pub fn item(&self) -> u64 {
        self.meta.item
    }

    #[inline]
    pub(crate) fn view(&self) -> View<'_> {
        self.meta.view(self.res.as_bytes())
    }

    // -------------------------------------------------------------------------
    // Lookups
    // -------------------------------------------------------------------------

    /// Point lookup. On a hit returns the value bytes: the inline value
    /// field, the resolved extend-region value for KV_SEPARATED, or an
    /// empty slice for a key set.
    pub fn search(&self, key: &[u8]) -> Option<&[u8]> {
        if key.len() != self.key_len() {
            return None;
        }
        let view = self.view();
        let line = search::search_line(&view, key)?;
        let field = &line[view.key_len..];
        match self.meta.kind {
            TableKind::KvSeparated => search::separated_value(view.extend, read_offset_field(field)),
            _ => Some(field),
        }
    }

    /// Batched lookup over `keys`, filling `out[i]` with the value field
    /// of `keys[i]` or `None` on a miss. With a `patch` table of the same
    /// schema, the patch is consulted first and shadows this table.
    ///
    /// Returns the number of hits. KEY_SET and KV_INLINE only.
    pub fn batch_search<'a>(
        &'a self,
        keys: &[&[u8]],
        out: &mut [Option<&'a [u8]>],
        patch: Option<&'a Hashtable>,
    ) -> usize {
        let batch = keys.len().min(out.len());
        let patch = patch.filter(|p| !std::ptr::eq(*p, self));
        let base = self.view();
        let patch_view = patch.map(|p| p.view());
        batch::batch_process(
            batch,
            &base,
            patch_view.as_ref(),
            |i| keys[i],
            |i, val| out[i] = val,
            None,
        )
    }

    /// Batched fetch for KV_INLINE tables. `keys` is `batch` keys laid out
    /// back to back; `data` receives the values at the matching positions.
    /// On a miss the slot is filled from `dft_val` when given, otherwise
    /// left untouched. A `patch` table of the same schema shadows this one.
    ///
    /// Returns the number of hits.
    pub fn batch_fetch<'a>(
        &'a self,
        keys: &[u8],
        data: &mut [u8],
        dft_val: Option<&'a [u8]>,
        patch: Option<&'a Hashtable>,
    ) -> usize {
        if self.meta.kind != TableKind::KvInline {
            return 0;
        }
        let key_len = self.key_len();
        let val_len = self.val_len();
        if let Some(d) = dft_val {
            if d.len() != val_len {
                return 0;
            }
        }
        let batch = (keys.len() / key_len).min(data.len() / val_len);
        let patch = patch.filter(|p| !std::ptr::eq(*p, self));
        let base = self.view();
        let patch_view = patch.map(|p| p.view());
        batch::batch_process(
            batch,
            &base,
            patch_view.as_ref(),
            |i| &keys[i * key_len..(i + 1) * key_len],
            |i, val| {
                if let Some(val) = val {
                    data[i * val_len..(i + 1) * val_len].copy_from_slice(val);
                }
            },
            dft_val,
        )
    }

    // -------------------------------------------------------------------------
    // Derive
    // -------------------------------------------------------------------------

    /// Incremental rebuild: merge this artifact with `inputs` into a new
    /// artifact written to `sink`. Keys in the new inputs shadow entries
    /// of this table; entries not overwritten survive. An empty input
    /// list yields a clean rebuild.
    pub fn derive(
        &self,
        inputs: &mut [Box<dyn DataReader + Send + '_>],
        sink: &mut dyn DataWriter,
    ) -> Result<()> {
        build::derive(self, inputs, sink)
    }
}
