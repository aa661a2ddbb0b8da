//! Capability traits for the external collaborators of the planner.
//!
//! The planner never talks to the key-value store, the metrics store, or the
//! row serializer directly; it goes through these seams so that connectors
//! (and tests) can supply their own implementations.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::types::{ByteRange, Domain, IndexColumn};

/// Number of query threads requested per batch scanner.
pub const SCANNER_QUERY_THREADS: usize = 10;

/// Scan-time visibility labels, passed through to the store untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Authorizations(pub Vec<String>);

impl Authorizations {
    pub fn empty() -> Self {
        Self(Vec::new())
    }
}

/// One entry streamed back from a batch scan of an index table.
///
/// The entry key is the sharded index row (`shard_prefix ++ value`); the
/// column qualifier carries the base-table row id the entry points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
    pub row: Vec<u8>,
    pub column_family: Vec<u8>,
    pub column_qualifier: Vec<u8>,
    pub value: Vec<u8>,
}

/// A scoped multi-range scanner over one table.
///
/// Callers must invoke [`BatchScanner::close`] on every exit path once the
/// scan is finished or abandoned; the scanner holds server-side resources
/// until then.
pub trait BatchScanner: Send {
    /// Restricts the scan to the given key ranges.
    fn set_ranges(&mut self, ranges: Vec<ByteRange>);

    /// Restricts the scan to entries in the given column family.
    fn fetch_column_family(&mut self, family: Vec<u8>);

    /// Streams the matching entries. Ranges and column-family filters must
    /// be configured before the first poll.
    fn entries(&mut self) -> BoxStream<'_, Result<ScanEntry>>;

    /// Releases the scanner's resources. Must be idempotent.
    fn close(&mut self);
}

/// Handle to the key-value store, shared read-only across scan tasks.
#[async_trait]
pub trait IndexConnector: Send + Sync {
    /// Opens a batch scanner against `table`. `query_threads` is a hint for
    /// the store-side fan-out of the scan.
    async fn create_batch_scanner(
        &self,
        table: &str,
        auths: &Authorizations,
        query_threads: usize,
    ) -> Result<Box<dyn BatchScanner>>;
}

/// Reader over the metrics store maintained by the index writer.
#[async_trait]
pub trait MetricsReader: Send + Sync {
    /// Total number of rows in the base table.
    async fn num_rows_in_table(&self, schema: &str, table: &str) -> Result<u64>;

    /// Number of index entries for `column` within one shard-prefixed range.
    async fn cardinality(
        &self,
        column: &IndexColumn,
        range: &ByteRange,
        auths: &Authorizations,
    ) -> Result<u64>;
}

/// Turns a typed predicate domain into byte ranges over the index value
/// encoding. The planner does not interpret types; it consumes whatever
/// ranges come back.
pub trait RowSerializer: Send + Sync {
    fn domain_to_byte_ranges(&self, domain: &Domain) -> Result<Vec<ByteRange>>;
}

/// Name of the index table for a base table, by the index writer's
/// convention.
pub fn index_table_name(schema: &str, table: &str) -> String {
    format!("{}.{}_idx", schema, table)
}

/// Column-family tag under which the writer stores entries for one indexed
/// column. Must match the writer byte for byte, or scans come back empty.
pub fn index_column_family(family: &[u8], qualifier: &[u8]) -> Vec<u8> {
    let mut tag = Vec::with_capacity(family.len() + 1 + qualifier.len());
    tag.extend_from_slice(family);
    tag.push(b'_');
    tag.extend_from_slice(qualifier);
    tag
}
