//! The concurrent insertion core.
//!
//! During a build the guide is an array of `AtomicU8` slot descriptors and
//! the content array is a shared byte space carved into lines. A worker
//! claims a slot by CAS-ing its descriptor from empty (`0xFF`) to
//! in-progress (`0x80`), writes the line while holding the claim, then
//! publishes the 7-bit mark with a release store. Waiters spin on the
//! in-progress sentinel; a published mark plus a full key compare decides
//! duplicate or probe-on.

use std::cell::UnsafeCell;
use std::sync::atomic::{fence, AtomicU8, Ordering};

use crate::error::{Result, StashError};
use crate::hash::{slot_route, Divisor};
use crate::io::DataReader;
use crate::table::{keys_equal, BUSY_SLOT, EMPTY_SLOT, SLOTS_PER_SET};

/// Table geometry shared by every worker of one build.
pub(crate) struct BuildLayout {
    pub key_len: usize,
    pub val_len: usize,
    pub line_size: usize,
    pub seed: u64,
    pub set_cnt: Divisor,
}

// =============================================================================
// Guide Table
// =============================================================================

/// The guide under construction: one atomic descriptor byte per slot.
pub(crate) struct GuideTable {
    slots: Box<[AtomicU8]>,
}

impl GuideTable {
    /// Allocate `slot_cnt` descriptors, all empty.
    pub fn new(slot_cnt: usize) -> Result<Self> {
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(slot_cnt)
            .map_err(|_| StashError::Alloc(slot_cnt))?;
        slots.resize_with(slot_cnt, || AtomicU8::new(EMPTY_SLOT));
        Ok(GuideTable {
            slots: slots.into_boxed_slice(),
        })
    }

    #[inline]
    pub fn slot(&self, idx: usize) -> &AtomicU8 {
        &self.slots[idx]
    }

    /// The guide as plain bytes, for publication after all workers joined.
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: AtomicU8 has the same size and layout as u8, and callers
        // only take this view once no thread writes the guide anymore.
        unsafe { std::slice::from_raw_parts(self.slots.as_ptr() as *const u8, self.slots.len()) }
    }
}

// =============================================================================
// Line Space
// =============================================================================

/// The content array under construction. Lines are written concurrently,
/// each under its slot's claim, so access goes through `UnsafeCell`.
pub(crate) struct LineSpace {
    bytes: Box<[UnsafeCell<u8>]>,
    line_size: usize,
}

// SAFETY: concurrent access is disjoint per line, serialized by the slot
// claim protocol in `insert_line`.
unsafe impl Sync for LineSpace {}

impl LineSpace {
    /// Allocate `lines × line_size` zeroed bytes.
    pub fn new(lines: usize, line_size: usize) -> Result<Self> {
        let n = lines
            .checked_mul(line_size)
            .ok_or(StashError::Alloc(usize::MAX))?;
        let mut bytes = Vec::new();
        bytes.try_reserve_exact(n).map_err(|_| StashError::Alloc(n))?;
        bytes.resize_with(n, || UnsafeCell::new(0));
        Ok(LineSpace {
            bytes: bytes.into_boxed_slice(),
            line_size,
        })
    }

    /// Exclusive access to line `idx`.
    ///
    /// # Safety
    /// The caller must hold the slot claim for `idx` (the CAS in
    /// `insert_line`), so no other thread touches this line.
    #[inline]
    pub unsafe fn line_mut(&self, idx: usize) -> &mut [u8] {
        let start = idx * self.line_size;
        std::slice::from_raw_parts_mut(self.bytes[start].get(), self.line_size)
    }

    /// Shared access to line `idx`.
    ///
    /// # Safety
    /// The caller must have observed the slot's published mark (with
    /// acquire ordering), so the owner has finished writing the line.
    #[inline]
    pub unsafe fn line_ref(&self, idx: usize) -> &[u8] {
        let start = idx * self.line_size;
        std::slice::from_raw_parts(self.bytes[start].get() as *const u8, self.line_size)
    }

    /// The content as plain bytes, for publication after all workers joined.
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: as for GuideTable::as_bytes.
        unsafe { std::slice::from_raw_parts(self.bytes.as_ptr() as *const u8, self.bytes.len()) }
    }
}

// =============================================================================
// Insertion Protocol
// =============================================================================

/// Insert `key` (filling its line via `fill`) using the claim protocol.
///
/// Returns `Ok(true)` when the key was freshly inserted, `Ok(false)` when
/// an equal key already occupies a slot. Probing follows the exact
/// sequence lookups use: start at the hash shift, wrap through the set,
/// spill into the next set. A full cycle without an empty slot means the
/// inputs outgrew the capacity their `total()` hints promised.
pub(crate) fn insert_line<F>(
    guide: &GuideTable,
    space: &LineSpace,
    layout: &BuildLayout,
    key: &[u8],
    fill: F,
) -> Result<bool>
where
    F: FnOnce(&mut [u8]),
{
    let (mut set, mark, sft) = slot_route(key, layout.seed, &layout.set_cnt);
    let sft = sft as usize;
    let mut sets_left = layout.set_cnt.value();
    loop {
        let base = (set as usize) << 6;
        for j in sft..sft + SLOTS_PER_SET {
            let off = j & 63;
            let slot = guide.slot(base + off);
            let mut m = slot.load(Ordering::Relaxed);
            if m == EMPTY_SLOT
                && slot
                    .compare_exchange(EMPTY_SLOT, BUSY_SLOT, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
            {
                // Claimed. Fill the line, then publish the mark; the release
                // store orders the line bytes before the mark.
                // SAFETY: the claim gives this thread exclusive line access.
                fill(unsafe { space.line_mut(base + off) });
                slot.store(mark, Ordering::Release);
                return Ok(true);
            }
            // Empty-but-lost-the-race or in-progress: the owner publishes
            // its mark shortly.
            while m & 0x80 != 0 {
                std::hint::spin_loop();
                m = slot.load(Ordering::Relaxed);
            }
            if m == mark {
                // Pairs with the owner's release store: the line bytes are
                // visible once the mark is.
                fence(Ordering::Acquire);
                // SAFETY: mark published, owner done writing.
                let line = unsafe { space.line_ref(base + off) };
                if keys_equal(&line[..layout.key_len], key) {
                    return Ok(false);
                }
            }
        }
        set += 1;
        if set >= layout.set_cnt.value() {
            set = 0;
        }
        sets_left -= 1;
        if sets_left == 0 {
            return Err(StashError::BadInput(
                "table capacity exhausted: inputs produced more distinct keys than sized for"
                    .into(),
            ));
        }
    }
}

/// Drain `reader` into the table. Returns the number of records that were
/// fresh inserts (duplicates are read but not counted).
pub(crate) fn insert_stream(
    guide: &GuideTable,
    space: &LineSpace,
    layout: &BuildLayout,
    reader: &mut dyn DataReader,
) -> Result<u64> {
    let total = reader.total();
    let mut cnt = total;
    for _ in 0..total {
        let rec = reader.read(false)?;
        if rec.key.len() != layout.key_len {
            return Err(StashError::BadInput(format!(
                "record key length {} differs from table key length {}",
                rec.key.len(),
                layout.key_len
            )));
        }
        if layout.val_len != 0 && rec.val.len() != layout.val_len {
            return Err(StashError::BadInput(format!(
                "record value length {} differs from table value length {}",
                rec.val.len(),
                layout.val_len
            )));
        }
        let inserted = insert_line(guide, space, layout, rec.key, |line| {
            line[..layout.key_len].copy_from_slice(rec.key);
            if layout.val_len != 0 {
                line[layout.key_len..].copy_from_slice(rec.val);
            }
        })?;
        if !inserted {
            cnt -= 1;
        }
    }
    Ok(cnt)
}
