//! Top-level planning policy: decide whether the secondary index beats a
//! direct base-table scan, and when it does, emit the tablet splits.
//!
//! The decision combines cardinality estimates from the metrics store with
//! the configured selectivity thresholds. Cheap exits come first: a disabled
//! index or a query with no indexed constraints never touches the store, and
//! a single high-cardinality column is rejected before any scan is issued.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread::available_parallelism;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::Semaphore;

use crate::binner::bin_ranges;
use crate::cardinality::CardinalityCache;
use crate::connector::{
    index_table_name, Authorizations, IndexConnector, MetricsReader, RowSerializer,
};
use crate::error::{PlanError, Result};
use crate::scanner::{intersect_all, IndexScanner};
use crate::storage::ShardedIndexStorage;
use crate::types::{ByteRange, ColumnConstraint, PlanResult, RowId, TabletSplit};

/// Per-query session configuration for the planner.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Master switch for the secondary index.
    pub optimize_index_enabled: bool,
    /// Consult the cardinality cache before scanning.
    pub index_metrics_enabled: bool,
    /// Allow the cardinality cache to return early once some column proves
    /// small enough.
    pub index_short_circuit_enabled: bool,
    /// Maximum ratio of index-scanned rows to table rows before falling back
    /// to a direct table scan. Must be in `[0, 1]`.
    pub index_threshold: f64,
    /// Percentage of table rows below which a single column is small enough
    /// to skip intersection. Must be in `[0, 1]`.
    pub index_small_card_threshold: f64,
    /// Absolute row cap for the small-cardinality threshold.
    pub index_small_card_row_threshold: u64,
    /// Target number of row-id ranges per emitted tablet split.
    pub num_index_rows_per_split: usize,
    /// Wake-up bound while waiting for short-circuitable cardinalities.
    pub index_cardinality_cache_polling: Duration,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            optimize_index_enabled: true,
            index_metrics_enabled: true,
            index_short_circuit_enabled: true,
            index_threshold: 0.2,
            index_small_card_threshold: 0.01,
            index_small_card_row_threshold: 100_000,
            num_index_rows_per_split: 10_000,
            index_cardinality_cache_polling: Duration::from_millis(10),
        }
    }
}

impl PlannerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.index_threshold) {
            return Err(PlanError::InvalidConfig(format!(
                "index threshold must be in [0, 1], got {}",
                self.index_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.index_small_card_threshold) {
            return Err(PlanError::InvalidConfig(format!(
                "small cardinality threshold must be in [0, 1], got {}",
                self.index_small_card_threshold
            )));
        }
        if self.num_index_rows_per_split == 0 {
            return Err(PlanError::InvalidConfig(
                "number of index rows per split must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Decides whether to answer a query through the secondary index and, if
/// so, which tablet splits to hand to the engine.
///
/// The planner owns a bounded concurrency gate of width `4 × cpu_count`
/// shared by all of its scan tasks; it is created at construction and closed
/// by [`IndexPlanner::shutdown`].
pub struct IndexPlanner {
    scanner: IndexScanner,
    metrics: Arc<dyn MetricsReader>,
    cache: CardinalityCache,
    storage: ShardedIndexStorage,
    permits: Arc<Semaphore>,
}

impl IndexPlanner {
    pub fn new(
        connector: Arc<dyn IndexConnector>,
        metrics: Arc<dyn MetricsReader>,
        storage: ShardedIndexStorage,
    ) -> Self {
        let width = 4 * available_parallelism().map(|n| n.get()).unwrap_or(1);
        let permits = Arc::new(Semaphore::new(width));
        Self {
            scanner: IndexScanner::new(connector, Arc::clone(&permits)),
            metrics,
            cache: CardinalityCache::new(),
            storage,
            permits,
        }
    }

    /// The cardinality cache backing this planner, exposed so callers can
    /// wire invalidation events to it.
    pub fn cardinality_cache(&self) -> &CardinalityCache {
        &self.cache
    }

    /// Interrupts outstanding work, best effort. Scan tasks waiting for a
    /// pool slot fail with [`PlanError::Interrupted`]. Idempotent.
    pub fn shutdown(&self) {
        self.permits.close();
    }

    /// Plans one query against `schema.table`.
    ///
    /// `constraints` are the per-column predicates of the query; this method
    /// filters for the indexed ones. `row_id_ranges` is the predicate
    /// already known on the base-table row-id space; row-ids read from the
    /// index are filtered against it. Returns
    /// [`PlanResult::DoNotUseIndex`] when the index is disabled, unusable,
    /// or predicted to scan too large a fraction of the table.
    #[allow(clippy::too_many_arguments)]
    pub async fn apply(
        &self,
        schema: &str,
        table: &str,
        config: &PlannerConfig,
        constraints: &[ColumnConstraint],
        row_id_ranges: &[ByteRange],
        serializer: &dyn RowSerializer,
        auths: &Authorizations,
    ) -> Result<PlanResult> {
        config.validate()?;

        if !config.optimize_index_enabled {
            debug!("secondary index is disabled");
            return Ok(PlanResult::DoNotUseIndex);
        }
        debug!("secondary index is enabled");

        let constraint_ranges = self.indexed_constraint_ranges(constraints, serializer)?;
        if constraint_ranges.is_empty() {
            debug!("query contains no constraints on indexed columns, skipping secondary index");
            return Ok(PlanResult::DoNotUseIndex);
        }

        let index_table = index_table_name(schema, table);

        if !config.index_metrics_enabled {
            debug!("use of index metrics is disabled");
            let scanned = self
                .scanner
                .scan(&index_table, &constraint_ranges, row_id_ranges, auths)
                .await?;
            let row_ids = intersect_all(scanned.into_iter().map(|(_, set)| set));
            if row_ids.is_empty() {
                debug!("query would return no results, returning empty list of splits");
            }
            let splits = bin_row_ids(config.num_index_rows_per_split, &row_ids)?;
            debug!(
                "number of splits for {}.{} is {} with {} ranges",
                schema,
                table,
                splits.len(),
                row_ids.len()
            );
            return Ok(PlanResult::UseIndex(splits));
        }

        debug!("use of index metrics is enabled");
        self.plan_with_metrics(
            schema,
            table,
            config,
            &index_table,
            &constraint_ranges,
            row_id_ranges,
            auths,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn plan_with_metrics(
        &self,
        schema: &str,
        table: &str,
        config: &PlannerConfig,
        index_table: &str,
        constraint_ranges: &[(ColumnConstraint, Vec<ByteRange>)],
        row_id_ranges: &[ByteRange],
        auths: &Authorizations,
    ) -> Result<PlanResult> {
        let num_rows = self.metrics.num_rows_in_table(schema, table).await?;
        let small_threshold = smallest_cardinality_threshold(config, num_rows);

        let (cache_threshold, poll) = if config.index_short_circuit_enabled {
            (small_threshold, config.index_cardinality_cache_polling)
        } else {
            // A zero threshold disables the short circuit.
            (0, Duration::ZERO)
        };
        let cardinalities = self
            .cache
            .cardinalities(
                &self.metrics,
                schema,
                table,
                auths,
                constraint_ranges,
                cache_threshold,
                poll,
            )
            .await?;
        let Some((lowest_cardinality, lowest_constraint)) = cardinalities.smallest().cloned()
        else {
            return Ok(PlanResult::DoNotUseIndex);
        };

        let threshold = config.index_threshold;
        let row_ids = if lowest_cardinality > small_threshold {
            info!(
                "smallest cardinality is {}, num rows is {}, threshold is {}",
                lowest_cardinality, num_rows, small_threshold
            );
            // No column is small enough on its own. With a single column the
            // scan volume is already known, so the selectivity check can run
            // before any scan is issued.
            if constraint_ranges.len() == 1 {
                let ratio = lowest_cardinality as f64 / num_rows as f64;
                debug!(
                    "use of index would scan {} of {} rows, ratio {}, threshold {}",
                    lowest_cardinality, num_rows, ratio, threshold
                );
                if ratio >= threshold {
                    return Ok(PlanResult::DoNotUseIndex);
                }
            }

            debug!(
                "{} indexed columns, intersecting row ids",
                constraint_ranges.len()
            );
            let scanned = self
                .scanner
                .scan(index_table, constraint_ranges, row_id_ranges, auths)
                .await?;
            let intersected = intersect_all(scanned.into_iter().map(|(_, set)| set));
            debug!(
                "intersection results in {} row ids from secondary index",
                intersected.len()
            );
            intersected
        } else {
            debug!("not intersecting columns, using column with lowest cardinality");
            let lowest_only: Vec<(ColumnConstraint, Vec<ByteRange>)> = constraint_ranges
                .iter()
                .filter(|(constraint, _)| *constraint == lowest_constraint)
                .cloned()
                .collect();
            let scanned = self
                .scanner
                .scan(index_table, &lowest_only, row_id_ranges, auths)
                .await?;
            scanned
                .into_iter()
                .next()
                .map(|(_, set)| set)
                .unwrap_or_default()
        };

        if row_ids.is_empty() {
            debug!("query would return no results, returning empty list of splits");
            return Ok(PlanResult::UseIndex(Vec::new()));
        }

        let num_entries = row_ids.len() as u64;
        let ratio = num_entries as f64 / num_rows as f64;
        debug!(
            "use of index would scan {} of {} rows, ratio {}, threshold {}",
            num_entries, num_rows, ratio, threshold
        );
        if ratio >= threshold {
            return Ok(PlanResult::DoNotUseIndex);
        }

        let splits = bin_row_ids(config.num_index_rows_per_split, &row_ids)?;
        debug!(
            "number of splits for {}.{} is {} with {} ranges",
            schema,
            table,
            splits.len(),
            num_entries
        );
        Ok(PlanResult::UseIndex(splits))
    }

    /// Pairs each indexed constraint with the physical (shard-expanded)
    /// index ranges of its domain, preserving the caller's constraint
    /// order. Non-indexed constraints are logged and skipped. A constraint
    /// whose domain serializes to no ranges is kept with an empty range
    /// list: its scan matches nothing.
    fn indexed_constraint_ranges(
        &self,
        constraints: &[ColumnConstraint],
        serializer: &dyn RowSerializer,
    ) -> Result<Vec<(ColumnConstraint, Vec<ByteRange>)>> {
        let mut constraint_ranges = Vec::new();
        for constraint in constraints {
            if !constraint.indexed {
                warn!(
                    "query contains constraint on non-indexed column {}; is it worth indexing?",
                    constraint.name()
                );
                continue;
            }
            let logical = serializer.domain_to_byte_ranges(&constraint.domain)?;
            let physical = self.storage.expand_ranges(&logical);
            constraint_ranges.push((constraint.clone(), physical));
        }
        Ok(constraint_ranges)
    }
}

/// Number of rows at or below which a single column is small enough to skip
/// intersection: the minimum of the percentage-based threshold and the
/// absolute row threshold.
fn smallest_cardinality_threshold(config: &PlannerConfig, num_rows: u64) -> u64 {
    let percentage = (num_rows as f64 * config.index_small_card_threshold) as u64;
    percentage.min(config.index_small_card_row_threshold)
}

/// Materializes a row-id set into exact per-row ranges, in byte order, and
/// bins them into splits.
fn bin_row_ids(rows_per_split: usize, row_ids: &BTreeSet<RowId>) -> Result<Vec<TabletSplit>> {
    let ranges: Vec<ByteRange> = row_ids.iter().map(RowId::to_exact_range).collect();
    bin_ranges(rows_per_split, ranges)
}
