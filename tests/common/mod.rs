//! In-memory test doubles for the planner's external collaborators: a
//! sorted key-value store populated the way the index writer would, a
//! metrics store with configurable cardinalities, and an identity row
//! serializer.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;

use tablet_index_planner::{
    index_column_family, Authorizations, BatchScanner, ByteRange, ColumnConstraint, Domain,
    IndexColumn, IndexConnector, IndexPlanner, MetricsReader, PlanError, Result, RowSerializer,
    ScanEntry, ShardedIndexStorage, TabletSplit, ValueRange,
};

pub const NUM_SHARDS: u32 = 4;
pub const SCHEMA: &str = "default";
pub const TABLE: &str = "users";

pub fn column(name: &str) -> IndexColumn {
    IndexColumn::new(b"cf".to_vec(), name.as_bytes().to_vec(), name)
}

pub fn eq_constraint(name: &str, value: &str) -> ColumnConstraint {
    ColumnConstraint::new(
        column(name),
        Domain::new(vec![ValueRange::exact(value.as_bytes().to_vec())]),
        true,
    )
}

pub fn between_constraint(name: &str, low: &str, high: &str) -> ColumnConstraint {
    ColumnConstraint::new(
        column(name),
        Domain::new(vec![ValueRange::between(
            low.as_bytes().to_vec(),
            high.as_bytes().to_vec(),
        )]),
        true,
    )
}

pub fn unindexed_constraint(name: &str, value: &str) -> ColumnConstraint {
    ColumnConstraint::new(
        column(name),
        Domain::new(vec![ValueRange::exact(value.as_bytes().to_vec())]),
        false,
    )
}

/// Flattens splits back into row-id strings, in split order.
pub fn split_rows(splits: &[TabletSplit]) -> Vec<Vec<String>> {
    splits
        .iter()
        .map(|split| {
            split
                .ranges()
                .iter()
                .map(|range| {
                    String::from_utf8_lossy(range.exact_key().expect("split ranges are exact rows"))
                        .into_owned()
                })
                .collect()
        })
        .collect()
}

/// Sorted key-value store holding index tables written with the writer's
/// conventions: sharded value key, `family_qualifier` column family tag,
/// row id in the column qualifier.
pub struct MemoryKvStore {
    tables: HashMap<String, Vec<ScanEntry>>,
    scanners_created: Arc<AtomicUsize>,
    scanners_closed: Arc<AtomicUsize>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self {
            tables: HashMap::new(),
            scanners_created: Arc::new(AtomicUsize::new(0)),
            scanners_closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn write_index_entry(
        &mut self,
        table: &str,
        storage: &ShardedIndexStorage,
        column: &IndexColumn,
        value: &str,
        row_id: &str,
    ) {
        let entries = self.tables.entry(table.to_string()).or_default();
        entries.push(ScanEntry {
            row: storage.encode(value.as_bytes()),
            column_family: index_column_family(column.family(), column.qualifier()),
            column_qualifier: row_id.as_bytes().to_vec(),
            value: Vec::new(),
        });
        entries.sort_by(|a, b| (&a.row, &a.column_qualifier).cmp(&(&b.row, &b.column_qualifier)));
    }

    pub fn scanners_created(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.scanners_created)
    }

    pub fn scanners_closed(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.scanners_closed)
    }
}

#[async_trait]
impl IndexConnector for MemoryKvStore {
    async fn create_batch_scanner(
        &self,
        table: &str,
        _auths: &Authorizations,
        _query_threads: usize,
    ) -> Result<Box<dyn BatchScanner>> {
        self.scanners_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryScanner {
            entries: self.tables.get(table).cloned().unwrap_or_default(),
            ranges: Vec::new(),
            family: None,
            closed: false,
            closes: Arc::clone(&self.scanners_closed),
        }))
    }
}

pub struct MemoryScanner {
    entries: Vec<ScanEntry>,
    ranges: Vec<ByteRange>,
    family: Option<Vec<u8>>,
    closed: bool,
    closes: Arc<AtomicUsize>,
}

impl BatchScanner for MemoryScanner {
    fn set_ranges(&mut self, ranges: Vec<ByteRange>) {
        self.ranges = ranges;
    }

    fn fetch_column_family(&mut self, family: Vec<u8>) {
        self.family = Some(family);
    }

    fn entries(&mut self) -> BoxStream<'_, Result<ScanEntry>> {
        let matching: Vec<Result<ScanEntry>> = self
            .entries
            .iter()
            .filter(|entry| {
                self.family
                    .as_ref()
                    .map_or(true, |family| &entry.column_family == family)
                    && self.ranges.iter().any(|range| range.contains(&entry.row))
            })
            .cloned()
            .map(Ok)
            .collect();
        futures::stream::iter(matching).boxed()
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Metrics store with a fixed row count and per-column cardinalities.
///
/// A column's configured cardinality is attributed to the shard-0 form of
/// each value range (other shards report zero), so summing across the
/// shard fan-out recovers the configured estimate.
pub struct MemoryMetrics {
    num_rows: u64,
    cardinalities: HashMap<String, u64>,
    delays: HashMap<String, Duration>,
    reads: Arc<AtomicUsize>,
    fail: bool,
}

impl MemoryMetrics {
    pub fn new(num_rows: u64, cardinalities: &[(&str, u64)]) -> Self {
        Self {
            num_rows,
            cardinalities: cardinalities
                .iter()
                .map(|(name, cardinality)| (name.to_string(), *cardinality))
                .collect(),
            delays: HashMap::new(),
            reads: Arc::new(AtomicUsize::new(0)),
            fail: false,
        }
    }

    pub fn with_delay(mut self, name: &str, delay: Duration) -> Self {
        self.delays.insert(name.to_string(), delay);
        self
    }

    pub fn failing() -> Self {
        let mut metrics = Self::new(0, &[]);
        metrics.fail = true;
        metrics
    }

    /// Counter of `cardinality` reads served, for asserting on cache
    /// behavior after the reader has been handed to a planner.
    pub fn reads_handle(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.reads)
    }
}

#[async_trait]
impl MetricsReader for MemoryMetrics {
    async fn num_rows_in_table(&self, _schema: &str, _table: &str) -> Result<u64> {
        if self.fail {
            return Err(PlanError::metrics("metrics table unavailable"));
        }
        Ok(self.num_rows)
    }

    async fn cardinality(
        &self,
        column: &IndexColumn,
        range: &ByteRange,
        _auths: &Authorizations,
    ) -> Result<u64> {
        if self.fail {
            return Err(PlanError::metrics("metrics table unavailable"));
        }
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(column.name()) {
            tokio::time::sleep(*delay).await;
        }
        let shard_zero = match range.start() {
            tablet_index_planner::RangeBound::Inclusive(key)
            | tablet_index_planner::RangeBound::Exclusive(key) => key.first() == Some(&b'0'),
            tablet_index_planner::RangeBound::Unbounded => false,
        };
        if shard_zero {
            Ok(self.cardinalities.get(column.name()).copied().unwrap_or(0))
        } else {
            Ok(0)
        }
    }
}

/// Serializer for tests whose domains are already expressed over the index
/// value encoding.
pub struct IdentitySerializer;

impl RowSerializer for IdentitySerializer {
    fn domain_to_byte_ranges(&self, domain: &Domain) -> Result<Vec<ByteRange>> {
        Ok(domain
            .ranges()
            .iter()
            .map(|value_range| ByteRange::new(value_range.low.clone(), value_range.high.clone()))
            .collect())
    }
}

/// A planner wired to in-memory collaborators, plus the counters the tests
/// assert on.
pub struct TestHarness {
    pub planner: IndexPlanner,
    pub scanners_created: Arc<AtomicUsize>,
    pub scanners_closed: Arc<AtomicUsize>,
}

impl TestHarness {
    /// `entries` are `(column, value, row_id)` triples written to the index
    /// table of `default.users` through the writer's conventions.
    pub fn new(
        entries: &[(&str, &str, &str)],
        metrics: MemoryMetrics,
    ) -> Self {
        let storage = ShardedIndexStorage::new(NUM_SHARDS).unwrap();
        let mut store = MemoryKvStore::new();
        let index_table = tablet_index_planner::index_table_name(SCHEMA, TABLE);
        for (name, value, row_id) in entries {
            store.write_index_entry(&index_table, &storage, &column(name), value, row_id);
        }
        let scanners_created = store.scanners_created();
        let scanners_closed = store.scanners_closed();
        let planner = IndexPlanner::new(Arc::new(store), Arc::new(metrics), storage);
        Self {
            planner,
            scanners_created,
            scanners_closed,
        }
    }

    pub fn scans_issued(&self) -> usize {
        self.scanners_created.load(Ordering::SeqCst)
    }
}
