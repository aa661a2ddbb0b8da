//! Memoized cardinality estimation for indexed column constraints.
//!
//! For each constraint the estimate is the sum of per-range cardinalities
//! read from the metrics store, with every `(column, range)` lookup memoized
//! across queries until an external invalidation event. Estimates for
//! different constraints are computed concurrently; in short-circuit mode
//! the call returns as soon as any constraint proves small enough, dropping
//! the in-flight work for the others.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use parking_lot::RwLock;
use tokio::task::JoinSet;
use tokio::time::timeout;

use crate::connector::{Authorizations, MetricsReader};
use crate::error::{PlanError, Result};
use crate::types::{ByteRange, ColumnConstraint};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MemoKey {
    schema: String,
    table: String,
    column: String,
    range: ByteRange,
}

/// Constraint cardinalities in ascending estimate order.
///
/// Ties break by constraint submission order, so iteration is deterministic
/// for a fixed input. `short_circuited` marks results produced by an early
/// return; such results may omit constraints whose estimates were still in
/// flight.
#[derive(Debug, Clone)]
pub struct Cardinalities {
    entries: Vec<(u64, ColumnConstraint)>,
    short_circuited: bool,
}

impl Cardinalities {
    pub fn entries(&self) -> &[(u64, ColumnConstraint)] {
        &self.entries
    }

    pub fn smallest(&self) -> Option<&(u64, ColumnConstraint)> {
        self.entries.first()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn short_circuited(&self) -> bool {
        self.short_circuited
    }
}

/// Concurrent cache of per-`(column, range)` cardinality estimates.
///
/// Safe to share across planning calls; readers and writers take the memo
/// lock only for the duration of a map access.
#[derive(Debug, Default)]
pub struct CardinalityCache {
    memo: Arc<RwLock<HashMap<MemoKey, u64>>>,
}

impl CardinalityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every memoized estimate.
    pub fn invalidate(&self) {
        self.memo.write().clear();
    }

    /// Drops the memoized estimates of one table, e.g. after its index was
    /// rewritten.
    pub fn invalidate_table(&self, schema: &str, table: &str) {
        self.memo
            .write()
            .retain(|key, _| key.schema != schema || key.table != table);
    }

    #[cfg(test)]
    fn memo_len(&self) -> usize {
        self.memo.read().len()
    }

    /// Estimates the cardinality of each constraint over its shard-prefixed
    /// ranges and returns the estimates in ascending order.
    ///
    /// With `small_card_threshold > 0` the call short-circuits: estimates
    /// are computed in parallel and the call returns as soon as some
    /// constraint's estimate is at or below the threshold, polling at
    /// `poll_interval` to bound wake-up latency. With a threshold of zero
    /// the call waits for every constraint.
    #[allow(clippy::too_many_arguments)]
    pub async fn cardinalities(
        &self,
        metrics: &Arc<dyn MetricsReader>,
        schema: &str,
        table: &str,
        auths: &Authorizations,
        constraint_ranges: &[(ColumnConstraint, Vec<ByteRange>)],
        small_card_threshold: u64,
        poll_interval: Duration,
    ) -> Result<Cardinalities> {
        let mut tasks = JoinSet::new();
        for (idx, (constraint, ranges)) in constraint_ranges.iter().enumerate() {
            let metrics = Arc::clone(metrics);
            let memo = Arc::clone(&self.memo);
            let auths = auths.clone();
            let column = constraint.column.clone();
            let ranges = ranges.clone();
            let schema = schema.to_string();
            let table = table.to_string();
            tasks.spawn(async move {
                let mut total: u64 = 0;
                for range in ranges {
                    let key = MemoKey {
                        schema: schema.clone(),
                        table: table.clone(),
                        column: column.name().to_string(),
                        range: range.clone(),
                    };
                    if let Some(cached) = memo.read().get(&key).copied() {
                        total = total.saturating_add(cached);
                        continue;
                    }
                    let cardinality = metrics.cardinality(&column, &range, &auths).await?;
                    memo.write().insert(key, cardinality);
                    total = total.saturating_add(cardinality);
                }
                Ok::<(usize, u64), PlanError>((idx, total))
            });
        }

        let short_circuit = small_card_threshold > 0 && !poll_interval.is_zero();
        let mut collected: BTreeMap<(u64, usize), ColumnConstraint> = BTreeMap::new();
        let mut short_circuited = false;

        loop {
            let joined = if short_circuit {
                match timeout(poll_interval, tasks.join_next()).await {
                    // Poll expired with nothing completed; check again.
                    Err(_) => continue,
                    Ok(joined) => joined,
                }
            } else {
                tasks.join_next().await
            };
            let Some(result) = joined else {
                break;
            };
            match result {
                Ok(Ok((idx, cardinality))) => {
                    let constraint = constraint_ranges[idx].0.clone();
                    debug!(
                        "cardinality of column {} is {}",
                        constraint.name(),
                        cardinality
                    );
                    collected.insert((cardinality, idx), constraint);
                    if small_card_threshold > 0 && cardinality <= small_card_threshold {
                        info!(
                            "cardinality {} is at or below threshold {}, short-circuiting",
                            cardinality, small_card_threshold
                        );
                        short_circuited = true;
                        tasks.abort_all();
                        break;
                    }
                }
                Ok(Err(error)) => {
                    tasks.abort_all();
                    return Err(error);
                }
                Err(join_error) => {
                    tasks.abort_all();
                    return Err(if join_error.is_cancelled() {
                        PlanError::Interrupted
                    } else {
                        PlanError::metrics(join_error.to_string())
                    });
                }
            }
        }

        Ok(Cardinalities {
            entries: collected
                .into_iter()
                .map(|((cardinality, _), constraint)| (cardinality, constraint))
                .collect(),
            short_circuited,
        })
    }
}
