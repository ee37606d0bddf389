//! Fixed-size value builder (key sets and inline dictionaries).
//!
//! One worker per input stream; the shared guide/content pair is the only
//! point of contact and per-slot CAS is the only synchronization. Workers
//! deduplicate on the fly, so the final item count is the sum of the
//! fresh-insert counts.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::error::{Result, StashError};
use crate::hash::Divisor;
use crate::io::{DataReader, DataWriter};
use crate::table::{Header, TableKind};

use super::mapping::{insert_stream, BuildLayout, GuideTable, LineSpace};
use super::{calc_set_cnt, output_failed, sum_input_size, write_regions};

pub(crate) fn build_fixed(
    kind: TableKind,
    key_len: usize,
    val_len: usize,
    inputs: &mut [Box<dyn DataReader + Send + '_>],
    sink: &mut dyn DataWriter,
) -> Result<()> {
    let total = sum_input_size(inputs);
    if total == 0 {
        return Err(StashError::BadInput("no input records".into()));
    }

    let seed = rand::random::<u64>();
    let set_cnt = calc_set_cnt(total);
    let slot = (set_cnt as usize) << 6;
    let line_size = key_len + val_len;
    let layout = BuildLayout {
        key_len,
        val_len,
        line_size,
        seed,
        set_cnt: Divisor::new(set_cnt),
    };
    let guide = GuideTable::new(slot)?;
    let space = LineSpace::new(slot, line_size)?;
    let item = AtomicU64::new(0);

    debug!(
        ?kind,
        total,
        set_cnt,
        streams = inputs.len(),
        "fixed-value build started"
    );

    let worker_results = crossbeam::thread::scope(|s| {
        let mut handles = Vec::with_capacity(inputs.len());
        for reader in inputs.iter_mut() {
            let (guide, space, layout, item) = (&guide, &space, &layout, &item);
            handles.push(s.spawn(move |_| -> Result<()> {
                reader.reset()?;
                let cnt = insert_stream(guide, space, layout, reader.as_mut())?;
                item.fetch_add(cnt, Ordering::Relaxed);
                Ok(())
            }));
        }
        handles
            .into_iter()
            .map(|h| h.join().expect("build worker panicked"))
            .collect::<Vec<_>>()
    })
    .expect("builder thread pool panicked");
    for result in worker_results {
        result?;
    }

    let header = Header {
        kind,
        key_len: key_len as u8,
        val_len: val_len as u16,
        seed,
        item: item.load(Ordering::Relaxed),
        set_cnt,
    };
    write_regions(sink, &header, guide.as_bytes(), space.as_bytes())?;
    sink.flush().map_err(output_failed)?;
    debug!(item = header.item, "fixed-value build finished");
    Ok(())
}
