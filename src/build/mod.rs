//! Builders — turn record streams into artifacts.
//!
//! ## Responsibilities
//! - Probe input streams for the artifact's key/value lengths
//! - Size the table (reserve slots, odd set count)
//! - Run the insertion protocol, multi-threaded where the shape allows
//! - Write header, guide, content (and extend values) to the sink
//! - Derive: merge an existing artifact with new inputs
//!
//! Fixed-value builds (key sets and inline dictionaries) run one worker
//! per input stream against a shared guide/content pair, synchronized only
//! by per-slot CAS. Variable-value builds are single-threaded because the
//! extend-region offsets must be assigned in stream order.

mod mapping;
mod fixed;
mod varied;
mod derive;

pub(crate) use self::derive::derive;

use crate::config::RESERVE_FACTOR;
use crate::error::{Result, StashError};
use crate::io::{DataReader, DataWriter};
use crate::table::{Header, TableKind, MAX_INLINE_VALUE_LEN, MAX_KEY_LEN};

// =============================================================================
// Public Entry Points
// =============================================================================

/// Build a key-set artifact from `inputs` into `sink`.
///
/// The key length is taken from the first record of the first stream;
/// every record of every stream must match it.
pub fn build_set(
    inputs: &mut [Box<dyn DataReader + Send + '_>],
    sink: &mut dyn DataWriter,
) -> Result<()> {
    let first = inputs
        .first_mut()
        .ok_or_else(|| StashError::BadInput("no input streams".into()))?;
    let (key_len, _) = probe_lens(first.as_mut(), false)?;
    fixed::build_fixed(TableKind::KeySet, key_len, 0, inputs, sink)
}

/// Build an inline-value dictionary artifact from `inputs` into `sink`.
///
/// Key and value lengths are taken from the first record of the first
/// stream; every record of every stream must match them.
pub fn build_dict(
    inputs: &mut [Box<dyn DataReader + Send + '_>],
    sink: &mut dyn DataWriter,
) -> Result<()> {
    let first = inputs
        .first_mut()
        .ok_or_else(|| StashError::BadInput("no input streams".into()))?;
    let (key_len, val_len) = probe_lens(first.as_mut(), true)?;
    fixed::build_fixed(TableKind::KvInline, key_len, val_len, inputs, sink)
}

/// Build a variable-value dictionary artifact from `inputs` into `sink`.
///
/// Values may be 0 to 2^35−1 bytes each and land in the extend region;
/// duplicate keys are rejected.
pub fn build_dict_varied(
    inputs: &mut [Box<dyn DataReader + Send + '_>],
    sink: &mut dyn DataWriter,
) -> Result<()> {
    varied::build_varied(inputs, sink)
}

// =============================================================================
// Shared Plumbing
// =============================================================================

/// Sets needed for `item` keys plus the reserve, rounded to an odd count.
///
/// An odd set count keeps `hash mod set_cnt` independent from the low hash
/// bits that pick the in-set shift.
pub(crate) fn calc_set_cnt(item: u64) -> u64 {
    let reserved = (item + (RESERVE_FACTOR - 1)) / RESERVE_FACTOR;
    (((item + reserved + 63) / 64) & !1) + 1
}

/// Sum of the streams' record-count hints.
pub(crate) fn sum_input_size(inputs: &[Box<dyn DataReader + Send + '_>]) -> u64 {
    inputs.iter().map(|r| r.total()).sum()
}

/// Read the first record of `reader` to fix the artifact's key length
/// (and value length for inline dictionaries), then rewind.
fn probe_lens(reader: &mut dyn DataReader, want_val: bool) -> Result<(usize, usize)> {
    let rec = reader.read(!want_val)?;
    let key_len = rec.key.len();
    let val_len = rec.val.len();
    if key_len == 0 || key_len > MAX_KEY_LEN {
        return Err(StashError::BadInput(format!(
            "key length {} outside 1..={}",
            key_len, MAX_KEY_LEN
        )));
    }
    if want_val && (val_len == 0 || val_len > MAX_INLINE_VALUE_LEN) {
        return Err(StashError::BadInput(format!(
            "inline value length {} outside 1..={}",
            val_len, MAX_INLINE_VALUE_LEN
        )));
    }
    reader.reset()?;
    Ok((key_len, if want_val { val_len } else { 0 }))
}

/// Any sink failure during publication maps to `FailToOutput`.
pub(crate) fn output_failed(err: StashError) -> StashError {
    StashError::FailToOutput(err.to_string())
}

/// Write the header and the two fixed regions to the sink.
pub(crate) fn write_regions(
    sink: &mut dyn DataWriter,
    header: &Header,
    guide: &[u8],
    content: &[u8],
) -> Result<()> {
    sink.write(&header.encode()).map_err(output_failed)?;
    sink.write(guide).map_err(output_failed)?;
    sink.write(content).map_err(output_failed)?;
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
