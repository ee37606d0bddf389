//! Artifact validation and the borrowed view.
//!
//! `parse` checks a byte range against the format's size equation and
//! produces a `ViewMeta` of offsets and derived numbers; `ViewMeta::view`
//! reborrows the backing bytes into the region slices every query walks.

use crate::error::{Result, StashError};
use crate::hash::Divisor;

use super::{Header, TableKind, HEADER_SIZE, OFFSET_FIELD_SIZE, SLOTS_PER_SET};

/// Parsed artifact geometry, independent of the backing memory.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ViewMeta {
    pub kind: TableKind,
    pub key_len: u8,
    pub val_len: u16,
    pub line_size: u32,
    pub seed: u64,
    pub item: u64,
    pub set_cnt: Divisor,
    content_off: usize,
    extend_off: usize,
}

/// Borrowed region slices of a loaded artifact.
///
/// For KV_SEPARATED tables `extend` runs to the end of the artifact, so
/// its upper bound is the `space_end` every varint read is checked
/// against; for the other kinds it is empty.
#[derive(Debug, Clone, Copy)]
pub(crate) struct View<'a> {
    pub kind: TableKind,
    pub key_len: usize,
    pub val_len: usize,
    pub line_size: usize,
    pub seed: u64,
    pub item: u64,
    pub set_cnt: Divisor,
    pub guide: &'a [u8],
    pub content: &'a [u8],
    pub extend: &'a [u8],
}

fn corrupt(what: &str) -> StashError {
    StashError::Corrupted(what.into())
}

/// Validate `bytes` as an artifact and derive its geometry.
pub(crate) fn parse(bytes: &[u8]) -> Result<ViewMeta> {
    let header = Header::decode(bytes)
        .ok_or_else(|| corrupt("missing or unrecognized header"))?;
    if header.key_len == 0 {
        return Err(corrupt("zero key length"));
    }
    if header.set_cnt == 0 {
        return Err(corrupt("zero set count"));
    }
    match header.kind {
        TableKind::KeySet if header.val_len != 0 => {
            return Err(corrupt("key set with a value length"));
        }
        TableKind::KvInline if header.val_len == 0 => {
            return Err(corrupt("inline dictionary with zero value length"));
        }
        TableKind::KvSeparated if header.val_len as usize != OFFSET_FIELD_SIZE => {
            return Err(corrupt("separated dictionary with a non-offset value field"));
        }
        _ => {}
    }

    let line_size = header.key_len as u32 + header.val_len as u32;
    let slot = header
        .set_cnt
        .checked_mul(SLOTS_PER_SET as u64)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| corrupt("set count overflows the address space"))?;
    let content_off = HEADER_SIZE
        .checked_add(slot)
        .ok_or_else(|| corrupt("guide size overflow"))?;
    let extend_off = slot
        .checked_mul(line_size as usize)
        .and_then(|n| content_off.checked_add(n))
        .ok_or_else(|| corrupt("content size overflow"))?;
    if bytes.len() < extend_off {
        return Err(corrupt("artifact shorter than its declared regions"));
    }
    // Coarse lower bound on the extend region: at least one guide's worth
    // of varint-prefixed values must follow the content array.
    if header.kind == TableKind::KvSeparated && bytes.len() - extend_off < slot {
        return Err(corrupt("extend region shorter than its lower bound"));
    }

    Ok(ViewMeta {
        kind: header.kind,
        key_len: header.key_len,
        val_len: header.val_len,
        line_size,
        seed: header.seed,
        item: header.item,
        set_cnt: Divisor::new(header.set_cnt),
        content_off,
        extend_off,
    })
}

impl ViewMeta {
    #[inline]
    pub fn view<'a>(&self, bytes: &'a [u8]) -> View<'a> {
        let extend = if self.kind == TableKind::KvSeparated {
            &bytes[self.extend_off..]
        } else {
            &[]
        };
        View {
            kind: self.kind,
            key_len: self.key_len as usize,
            val_len: self.val_len as usize,
            line_size: self.line_size as usize,
            seed: self.seed,
            item: self.item,
            set_cnt: self.set_cnt,
            guide: &bytes[HEADER_SIZE..self.content_off],
            content: &bytes[self.content_off..self.extend_off],
            extend,
        }
    }
}
