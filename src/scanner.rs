//! Concurrent fan-out scans over the index table.
//!
//! One task per indexed constraint is spawned onto the planner's pool, each
//! gated by the shared concurrency semaphore. Every task opens its own
//! scoped scanner, streams the matching index entries, and keeps the row-ids
//! that fall inside the caller's base-table row-id ranges. Results are
//! consumed in submission order, not completion order, so the seed of the
//! set intersection is deterministic for a fixed input.

use std::collections::BTreeSet;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use futures::StreamExt;
use log::{debug, info};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::connector::{
    index_column_family, Authorizations, BatchScanner, IndexConnector, SCANNER_QUERY_THREADS,
};
use crate::error::{PlanError, Result};
use crate::types::{ByteRange, ColumnConstraint, RowId};

/// Closes the wrapped scanner when dropped, covering every exit path of a
/// scan task including cancellation.
struct ScannerGuard(Box<dyn BatchScanner>);

impl Deref for ScannerGuard {
    type Target = dyn BatchScanner;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl DerefMut for ScannerGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.0
    }
}

impl Drop for ScannerGuard {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Executes multi-range index scans, one parallel task per constraint.
pub struct IndexScanner {
    connector: Arc<dyn IndexConnector>,
    permits: Arc<Semaphore>,
}

impl IndexScanner {
    pub fn new(connector: Arc<dyn IndexConnector>, permits: Arc<Semaphore>) -> Self {
        Self { connector, permits }
    }

    /// Scans `index_table` for every constraint and returns the set of
    /// row-ids each constraint matched, in constraint submission order.
    ///
    /// A constraint with no ranges has an unsatisfiable domain and yields
    /// the empty set without touching the store. Any task failure cancels
    /// the remaining tasks and fails the whole scan; partial results are
    /// never returned.
    pub async fn scan(
        &self,
        index_table: &str,
        constraint_ranges: &[(ColumnConstraint, Vec<ByteRange>)],
        row_id_ranges: &[ByteRange],
        auths: &Authorizations,
    ) -> Result<Vec<(ColumnConstraint, BTreeSet<RowId>)>> {
        let row_id_ranges = Arc::new(row_id_ranges.to_vec());
        let mut handles: Vec<JoinHandle<Result<BTreeSet<RowId>>>> =
            Vec::with_capacity(constraint_ranges.len());

        for (constraint, ranges) in constraint_ranges {
            let connector = Arc::clone(&self.connector);
            let permits = Arc::clone(&self.permits);
            let index_table = index_table.to_string();
            let constraint = constraint.clone();
            let ranges = ranges.clone();
            let row_id_ranges = Arc::clone(&row_id_ranges);
            let auths = auths.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|_| PlanError::Interrupted)?;
                scan_one(
                    connector,
                    &index_table,
                    &constraint,
                    ranges,
                    &row_id_ranges,
                    &auths,
                )
                .await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        let mut failure: Option<PlanError> = None;
        for ((constraint, _), handle) in constraint_ranges.iter().zip(handles) {
            if failure.is_some() {
                handle.abort();
                continue;
            }
            match handle.await {
                Ok(Ok(row_ids)) => results.push((constraint.clone(), row_ids)),
                Ok(Err(error)) => failure = Some(error),
                Err(join_error) => {
                    failure = Some(if join_error.is_cancelled() {
                        PlanError::Interrupted
                    } else {
                        PlanError::scan(join_error.to_string())
                    });
                }
            }
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(results),
        }
    }
}

async fn scan_one(
    connector: Arc<dyn IndexConnector>,
    index_table: &str,
    constraint: &ColumnConstraint,
    ranges: Vec<ByteRange>,
    row_id_ranges: &[ByteRange],
    auths: &Authorizations,
) -> Result<BTreeSet<RowId>> {
    if ranges.is_empty() {
        // Unsatisfiable domain: matches nothing.
        debug!(
            "constraint on {} has no index ranges, matches no rows",
            constraint.name()
        );
        return Ok(BTreeSet::new());
    }

    let scanner = connector
        .create_batch_scanner(index_table, auths, SCANNER_QUERY_THREADS)
        .await?;
    let mut scanner = ScannerGuard(scanner);
    scanner.set_ranges(ranges);
    scanner.fetch_column_family(index_column_family(
        constraint.column.family(),
        constraint.column.qualifier(),
    ));

    let mut row_ids = BTreeSet::new();
    {
        let mut entries = scanner.entries();
        while let Some(entry) = entries.next().await {
            let entry = entry?;
            // The column qualifier of an index entry carries the row id.
            if in_range(&entry.column_qualifier, row_id_ranges) {
                row_ids.insert(RowId::new(entry.column_qualifier));
            }
        }
    }

    info!(
        "retrieved {} row ids for index column {}",
        row_ids.len(),
        constraint.name()
    );
    Ok(row_ids)
}

/// True if `key` lies inside at least one of `ranges`. Unbounded sides
/// always pass.
fn in_range(key: &[u8], ranges: &[ByteRange]) -> bool {
    ranges.iter().any(|range| range.contains(key))
}

/// Folds set-intersection over per-constraint row-id sets in submission
/// order, seeded from the first set. An empty seed stays empty.
pub fn intersect_all<I>(sets: I) -> BTreeSet<RowId>
where
    I: IntoIterator<Item = BTreeSet<RowId>>,
{
    let mut sets = sets.into_iter();
    let Some(mut seed) = sets.next() else {
        return BTreeSet::new();
    };
    for other in sets {
        seed.retain(|row_id| other.contains(row_id));
        if seed.is_empty() {
            break;
        }
    }
    seed
}
