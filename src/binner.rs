//! Packing of selected row-id ranges into tablet splits.

use log::debug;

use crate::error::{PlanError, Result};
use crate::types::{ByteRange, TabletSplit};

/// Packs `ranges` into consecutive bins of `ranges_per_bin`, one
/// [`TabletSplit`] per bin. Order is preserved; the last bin may be short.
/// Empty input produces no splits.
pub fn bin_ranges(ranges_per_bin: usize, ranges: Vec<ByteRange>) -> Result<Vec<TabletSplit>> {
    if ranges_per_bin == 0 {
        return Err(PlanError::InvalidConfig(
            "number of ranges per bin must be greater than zero".to_string(),
        ));
    }

    let splits: Vec<TabletSplit> = ranges
        .chunks(ranges_per_bin)
        .map(|chunk| TabletSplit::new(chunk.to_vec()))
        .collect();
    debug!(
        "binned {} ranges into {} splits of up to {} ranges",
        splits.iter().map(TabletSplit::len).sum::<usize>(),
        splits.len(),
        ranges_per_bin
    );
    Ok(splits)
}
