//! Configuration for StashKV
//!
//! The only runtime knob is how an artifact is brought into memory; the
//! remaining tuning parameters are compiled in and documented here.

/// How an artifact file is brought into memory by [`Hashtable::open`].
///
/// [`Hashtable::open`]: crate::Hashtable::open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadPolicy {
    /// Map the file with demand paging (default).
    #[default]
    MapOnly,

    /// Map the file and advise the kernel to fetch it ahead of use.
    MapFetch,

    /// Map the file and lock it into memory.
    MapOccupy,

    /// Read the file fully into anonymous memory.
    CopyData,
}

// =============================================================================
// Tuning Constants
// =============================================================================

/// One extra slot is reserved per `RESERVE_FACTOR` items so probe chains
/// stay short and every table keeps at least one empty slot.
pub(crate) const RESERVE_FACTOR: u64 = 16;

/// Outstanding queries kept in flight by the batched lookup pipeline.
pub(crate) const WINDOW_SIZE: usize = 16;

/// Cache block size assumed by the line prefetcher. Must be a power of two
/// no smaller than 64.
pub(crate) const CACHE_BLOCK_SIZE: usize = 64;

const _: () = assert!(CACHE_BLOCK_SIZE >= 64 && CACHE_BLOCK_SIZE.is_power_of_two());
