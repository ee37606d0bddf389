//! Incremental rebuild: merge an existing artifact with new inputs.
//!
//! The new inputs are inserted first, so a surviving base entry with the
//! same key hits a duplicate match and is skipped — new inputs shadow the
//! base. Sizing subtracts the "dirty" count (records of the new inputs
//! whose keys the base already holds) so the new table is not
//! over-provisioned for shadowed entries.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::error::{Result, StashError};
use crate::hash::Divisor;
use crate::io::{DataReader, DataWriter};
use crate::table::{
    read_offset_field, search_line, separated_value, write_offset_field, Hashtable, Header,
    TableKind, View, MAX_OFFSET, OFFSET_FIELD_SIZE,
};

use super::mapping::{insert_line, insert_stream, BuildLayout, GuideTable, LineSpace};
use super::varied::{dump_value, varint_len, OffsetReader};
use super::{calc_set_cnt, output_failed, sum_input_size, write_regions};

pub(crate) fn derive(
    table: &Hashtable,
    inputs: &mut [Box<dyn DataReader + Send + '_>],
    sink: &mut dyn DataWriter,
) -> Result<()> {
    let base = table.view();
    match base.kind {
        TableKind::KvSeparated => rebuild_varied(&base, inputs, sink),
        _ => rebuild_fixed(&base, inputs, sink),
    }
}

/// Count how many of `reader`'s keys the base already stores, then rewind.
fn count_hit(base: &View<'_>, reader: &mut dyn DataReader) -> Result<u64> {
    let total = reader.total();
    let mut hit = 0;
    for _ in 0..total {
        let rec = reader.read(true)?;
        if rec.key.len() != base.key_len {
            return Err(StashError::BadInput(format!(
                "record key length {} differs from base key length {}",
                rec.key.len(),
                base.key_len
            )));
        }
        if search_line(base, rec.key).is_some() {
            hit += 1;
        }
    }
    reader.reset()?;
    Ok(hit)
}

// =============================================================================
// Fixed-Value Rebuild
// =============================================================================

fn rebuild_fixed(
    base: &View<'_>,
    inputs: &mut [Box<dyn DataReader + Send + '_>],
    sink: &mut dyn DataWriter,
) -> Result<()> {
    // 1. Count records already present in the base, one worker per stream.
    let dirty = AtomicU64::new(0);
    let count_results = crossbeam::thread::scope(|s| {
        let mut handles = Vec::with_capacity(inputs.len());
        for reader in inputs.iter_mut() {
            let dirty = &dirty;
            handles.push(s.spawn(move |_| -> Result<()> {
                reader.reset()?;
                let hit = count_hit(base, reader.as_mut())?;
                dirty.fetch_add(hit, Ordering::Relaxed);
                Ok(())
            }));
        }
        handles
            .into_iter()
            .map(|h| h.join().expect("derive worker panicked"))
            .collect::<Vec<_>>()
    })
    .expect("derive thread pool panicked");
    for result in count_results {
        result?;
    }
    let dirty = dirty.load(Ordering::Relaxed);

    // 2. Size the new table for the merged key population.
    let neo = sum_input_size(inputs);
    let total = base.item + neo - dirty;
    let seed = rand::random::<u64>();
    let set_cnt = calc_set_cnt(total);
    let slot = (set_cnt as usize) << 6;
    let layout = BuildLayout {
        key_len: base.key_len,
        val_len: base.val_len,
        line_size: base.line_size,
        seed,
        set_cnt: Divisor::new(set_cnt),
    };
    let guide = GuideTable::new(slot)?;
    let space = LineSpace::new(slot, base.line_size)?;
    let item = AtomicU64::new(0);

    debug!(dirty, total, set_cnt, "fixed-value derive started");

    // 3. New inputs first; they win every key collision.
    let ingest_results = crossbeam::thread::scope(|s| {
        let mut handles = Vec::with_capacity(inputs.len());
        for reader in inputs.iter_mut() {
            let (guide, space, layout, item) = (&guide, &space, &layout, &item);
            handles.push(s.spawn(move |_| -> Result<()> {
                let cnt = insert_stream(guide, space, layout, reader.as_mut())?;
                item.fetch_add(cnt, Ordering::Relaxed);
                Ok(())
            }));
        }
        handles
            .into_iter()
            .map(|h| h.join().expect("derive worker panicked"))
            .collect::<Vec<_>>()
    })
    .expect("derive thread pool panicked");
    for result in ingest_results {
        result?;
    }

    // 4. Re-insert surviving base lines over a partition of the base guide.
    //    A shadowed key shows up as a duplicate match and is skipped.
    let base_slot = (base.set_cnt.value() as usize) << 6;
    let parts = inputs.len().max(1);
    let piece = base_slot / parts;
    let remain = base_slot % parts;
    let reinsert_results = crossbeam::thread::scope(|s| {
        let mut handles = Vec::with_capacity(parts);
        let mut begin = 0usize;
        for i in 0..parts {
            let end = begin + piece + usize::from(i < remain);
            let (guide, space, layout, item) = (&guide, &space, &layout, &item);
            handles.push(s.spawn(move |_| -> Result<()> {
                let mut cnt = 0u64;
                for idx in begin..end {
                    if base.guide[idx] & 0x80 != 0 {
                        continue;
                    }
                    let line = &base.content[idx * base.line_size..][..base.line_size];
                    let inserted =
                        insert_line(guide, space, layout, &line[..base.key_len], |out| {
                            out.copy_from_slice(line);
                        })?;
                    if inserted {
                        cnt += 1;
                    }
                }
                item.fetch_add(cnt, Ordering::Relaxed);
                Ok(())
            }));
            begin = end;
        }
        handles
            .into_iter()
            .map(|h| h.join().expect("derive worker panicked"))
            .collect::<Vec<_>>()
    })
    .expect("derive thread pool panicked");
    for result in reinsert_results {
        result?;
    }

    // 5. Publish.
    let header = Header {
        kind: base.kind,
        key_len: base.key_len as u8,
        val_len: base.val_len as u16,
        seed,
        item: item.load(Ordering::Relaxed),
        set_cnt,
    };
    write_regions(sink, &header, guide.as_bytes(), space.as_bytes())?;
    sink.flush().map_err(output_failed)?;
    debug!(item = header.item, "fixed-value derive finished");
    Ok(())
}

// =============================================================================
// Variable-Value Rebuild
// =============================================================================

fn rebuild_varied(
    base: &View<'_>,
    inputs: &mut [Box<dyn DataReader + Send + '_>],
    sink: &mut dyn DataWriter,
) -> Result<()> {
    let mut dirty = 0u64;
    for reader in inputs.iter_mut() {
        reader.reset()?;
        dirty += count_hit(base, reader.as_mut())?;
    }

    let neo = sum_input_size(inputs);
    let total = base.item + neo - dirty;
    let seed = rand::random::<u64>();
    let set_cnt = calc_set_cnt(total);
    let slot = (set_cnt as usize) << 6;
    let layout = BuildLayout {
        key_len: base.key_len,
        val_len: OFFSET_FIELD_SIZE,
        line_size: base.line_size,
        seed,
        set_cnt: Divisor::new(set_cnt),
    };
    let guide = GuideTable::new(slot)?;
    let space = LineSpace::new(slot, base.line_size)?;

    debug!(dirty, total, set_cnt, "varied-value derive started");

    // New inputs first, offsets assigned in stream order.
    let mut item = 0u64;
    let mut offset = 0u64;
    for reader in inputs.iter_mut() {
        reader.reset()?;
        let mut wrapped = OffsetReader::new(reader.as_mut(), offset);
        item += insert_stream(&guide, &space, &layout, &mut wrapped)?;
        offset = wrapped.offset();
    }
    if item != neo {
        return Err(StashError::BadInput(
            "duplicate keys are not permitted in a varied-value derive".into(),
        ));
    }

    // Surviving base entries, offsets re-assigned in base slot order; the
    // bitmap remembers the survivors for the value pass.
    let base_slot = (base.set_cnt.value() as usize) << 6;
    let mut bitmap = vec![0u8; (base_slot + 7) / 8];
    for idx in 0..base_slot {
        if base.guide[idx] & 0x80 != 0 {
            continue;
        }
        let line = &base.content[idx * base.line_size..][..base.line_size];
        let val = separated_value(base.extend, read_offset_field(&line[base.key_len..]))
            .ok_or_else(|| StashError::Corrupted("unreadable value in base artifact".into()))?;
        if offset > MAX_OFFSET {
            return Err(StashError::BadInput(
                "extend region offset exceeds 48 bits".into(),
            ));
        }
        let inserted = insert_line(&guide, &space, &layout, &line[..base.key_len], |out| {
            out[..base.key_len].copy_from_slice(&line[..base.key_len]);
            write_offset_field(&mut out[base.key_len..], offset);
        })?;
        if inserted {
            offset += (varint_len(val.len() as u64) + val.len()) as u64;
            item += 1;
            bitmap[idx >> 3] |= 1 << (idx & 7);
        }
    }

    let header = Header {
        kind: TableKind::KvSeparated,
        key_len: base.key_len as u8,
        val_len: OFFSET_FIELD_SIZE as u16,
        seed,
        item,
        set_cnt,
    };
    write_regions(sink, &header, guide.as_bytes(), space.as_bytes())?;
    drop(guide);
    drop(space);

    // Extend region: new values in stream order, then surviving base
    // values in slot order — the same order their offsets were assigned.
    for reader in inputs.iter_mut() {
        reader.reset()?;
        let n = reader.total();
        for _ in 0..n {
            let rec = reader.read(false)?;
            dump_value(sink, rec.val).map_err(output_failed)?;
        }
    }
    for idx in 0..base_slot {
        if bitmap[idx >> 3] & (1 << (idx & 7)) == 0 {
            continue;
        }
        let line = &base.content[idx * base.line_size..][..base.line_size];
        let val = separated_value(base.extend, read_offset_field(&line[base.key_len..]))
            .ok_or_else(|| StashError::Corrupted("unreadable value in base artifact".into()))?;
        dump_value(sink, val).map_err(output_failed)?;
    }
    sink.flush().map_err(output_failed)?;
    debug!(item, extend_size = offset, "varied-value derive finished");
    Ok(())
}
