//! Pipelined batched lookups.
//!
//! A window of up to 16 queries stays in flight; each round advances every
//! query by one pipeline step — guide prefetch, guide scan, line prefetch,
//! key compare — so the memory latency of one query hides behind the work
//! of the others. A completed query's slot is refilled from the input
//! tail, and the window shrinks once the input runs dry.
//!
//! With a patch table, every query starts on the patch and falls back to
//! the base only when the patch turns up empty, which makes patch entries
//! shadow base entries.

use crate::config::{CACHE_BLOCK_SIZE, WINDOW_SIZE};
use crate::hash::slot_route;

use super::search::{calc_hint, keys_equal, line_at};
use super::view::View;
use super::{SLOTS_PER_SET, TableKind};

// =============================================================================
// Prefetch Helpers
// =============================================================================

/// Prefetch for an access expected in the next few steps.
#[inline]
fn prefetch_near(p: *const u8) {
    #[cfg(target_arch = "x86_64")]
    // SAFETY: prefetch is a hint without memory effects; any address is fine.
    unsafe {
        core::arch::x86_64::_mm_prefetch::<{ core::arch::x86_64::_MM_HINT_T0 }>(p as *const i8)
    };
    #[cfg(not(target_arch = "x86_64"))]
    let _ = p;
}

/// Prefetch for an access that may happen later, without displacing hot data.
#[inline]
fn prefetch_far(p: *const u8) {
    #[cfg(target_arch = "x86_64")]
    // SAFETY: as above.
    unsafe {
        core::arch::x86_64::_mm_prefetch::<{ core::arch::x86_64::_MM_HINT_NTA }>(p as *const i8)
    };
    #[cfg(not(target_arch = "x86_64"))]
    let _ = p;
}

/// Prefetch a content line, including the next cache block when the key
/// (near) or the whole line (far) straddles the block boundary.
#[inline]
fn prefetch_line(line: *const u8, key_len: usize, line_size: usize) {
    prefetch_near(line);
    let off = line as usize & (CACHE_BLOCK_SIZE - 1);
    let blk = ((line as usize & !(CACHE_BLOCK_SIZE - 1)) + CACHE_BLOCK_SIZE) as *const u8;
    if off + key_len > CACHE_BLOCK_SIZE {
        prefetch_near(blk);
    } else if off + line_size > CACHE_BLOCK_SIZE {
        prefetch_far(blk);
    }
}

// =============================================================================
// Pipeline State
// =============================================================================

/// One in-flight query.
struct Cursor<'s, 'a> {
    /// Position in the caller's key array
    idx: usize,
    /// In-set shift probing starts at, kept across sets
    sft: usize,
    /// Scan position within the current set, in `sft..sft+64`
    cur: usize,
    mark: u8,
    set: u64,
    /// Sets not yet probed in the current pack; the probe bound
    sets_left: u64,
    /// Candidate line awaiting its key compare
    line: Option<&'a [u8]>,
    /// Pack being probed: the patch first, then the base
    pack: &'s View<'a>,
}

/// What one pipeline step did to a query.
enum Step<'a> {
    /// Still in flight
    Stay,
    /// Key found; the value field
    Hit(&'a [u8]),
    /// Definitive miss
    Miss,
}

/// Point `st` at `pack` and restart its probe for `key`.
fn bind<'s, 'a>(st: &mut Cursor<'s, 'a>, pack: &'s View<'a>, key: &[u8]) {
    let (set, mark, sft) = slot_route(key, pack.seed, &pack.set_cnt);
    st.pack = pack;
    st.set = set;
    st.mark = mark;
    st.sft = sft as usize;
    st.cur = sft as usize;
    st.sets_left = pack.set_cnt.value();
    st.line = None;
    prefetch_near(pack.guide[(set as usize) << 6..].as_ptr());
}

fn fresh<'s, 'a>(pack: &'s View<'a>, idx: usize, key: &[u8]) -> Cursor<'s, 'a> {
    let mut st = Cursor {
        idx,
        sft: 0,
        cur: 0,
        mark: 0,
        set: 0,
        sets_left: 0,
        line: None,
        pack,
    };
    bind(&mut st, pack, key);
    st
}

/// Advance one query by one pipeline step.
fn advance<'s, 'a>(
    st: &mut Cursor<'s, 'a>,
    base: &'s View<'a>,
    patch: Option<&'s View<'a>>,
    key: &[u8],
) -> Step<'a> {
    // Step: the line prefetched last round is ready for its key compare.
    if let Some(line) = st.line {
        if keys_equal(&line[..st.pack.key_len], key) {
            return Step::Hit(&line[st.pack.key_len..]);
        }
        st.line = None;
        return Step::Stay;
    }

    // Step: scan guide bytes until a candidate, an empty slot, or the end
    // of the set.
    let g = &st.pack.guide[(st.set as usize) << 6..][..SLOTS_PER_SET];
    while st.cur < st.sft + SLOTS_PER_SET {
        let mut off = st.cur & 63;
        if st.cur <= st.sft + 56 && off <= 56 {
            let word = u64::from_le_bytes(g[off..off + 8].try_into().unwrap());
            let hint = calc_hint(word, st.mark);
            if hint == 0 {
                st.cur += 8;
                continue;
            }
            let step = ((hint.trailing_zeros() + 1) >> 3) as usize;
            off += step - 1;
            st.cur += step;
        } else {
            st.cur += 1;
        }
        let byte = g[off];
        if byte == st.mark {
            let line = line_at(st.pack, st.set, off);
            st.line = Some(line);
            prefetch_line(line.as_ptr(), st.pack.key_len, st.pack.line_size);
            return Step::Stay;
        }
        if byte & 0x80 != 0 {
            // Empty slot: miss in this pack; fall through to the base when
            // the patch was being probed.
            if let Some(p) = patch {
                if std::ptr::eq(st.pack, p) {
                    bind(st, base, key);
                    return Step::Stay;
                }
            }
            return Step::Miss;
        }
    }

    // Set exhausted without an empty slot: spill into the next set.
    st.cur = st.sft;
    st.set += 1;
    if st.set >= st.pack.set_cnt.value() {
        st.set = 0;
    }
    st.sets_left -= 1;
    if st.sets_left == 0 {
        // Full cycle without an empty slot: corrupt pack, report a miss.
        if let Some(p) = patch {
            if std::ptr::eq(st.pack, p) {
                bind(st, base, key);
                return Step::Stay;
            }
        }
        return Step::Miss;
    }
    prefetch_near(st.pack.guide[(st.set as usize) << 6..].as_ptr());
    Step::Stay
}

// =============================================================================
// Engine
// =============================================================================

/// Run `batch` queries through the pipeline.
///
/// `get_key(i)` yields the i-th key; `fill_val(i, v)` receives the value
/// field on a hit or `dft_val` on a miss. Returns the hit count. Rejects
/// KV_SEPARATED bases and patches whose schema differs from the base.
pub(crate) fn batch_process<'a, 'k, K, F>(
    batch: usize,
    base: &View<'a>,
    patch: Option<&View<'a>>,
    get_key: K,
    mut fill_val: F,
    dft_val: Option<&'a [u8]>,
) -> usize
where
    K: Fn(usize) -> &'k [u8],
    F: FnMut(usize, Option<&'a [u8]>),
{
    if base.kind == TableKind::KvSeparated {
        return 0;
    }
    if let Some(p) = patch {
        if p.kind != base.kind || p.key_len != base.key_len || p.val_len != base.val_len {
            return 0;
        }
    }

    let first = patch.unwrap_or(base);
    let window = batch.min(WINDOW_SIZE);
    let mut states: Vec<Cursor> = (0..window).map(|idx| fresh(first, idx, get_key(idx))).collect();
    let mut next = window;
    let mut hit = 0;

    while !states.is_empty() {
        let mut i = 0;
        while i < states.len() {
            let idx = states[i].idx;
            let key = get_key(idx);
            match advance(&mut states[i], base, patch, key) {
                Step::Stay => {
                    i += 1;
                    continue;
                }
                Step::Hit(val) => {
                    hit += 1;
                    fill_val(idx, Some(val));
                }
                Step::Miss => fill_val(idx, dft_val),
            }
            // Query done: refill this pipeline slot from the input tail,
            // or shrink the window.
            if next < batch {
                let key = get_key(next);
                let st = &mut states[i];
                st.idx = next;
                bind(st, first, key);
                next += 1;
                i += 1;
            } else {
                states.swap_remove(i);
            }
        }
    }
    hit
}
