// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! # Tablet Index Planner
//!
//! This crate provides the secondary-index query planner for connectors to
//! distributed, sorted key-value stores. Given the per-column predicates of
//! a query, the planner decides whether scanning the *index tables* (which
//! map `(column, value) → row-id`) is cheaper than scanning the base table
//! directly and, if so, produces row-id ranges packed into tablet splits
//! for parallel execution.
//!
//! ## Architecture Overview
//!
//! Planning runs in two phases:
//!
//! 1. **Estimate Phase**: per-constraint cardinality estimates are read from
//!    a metrics store (through [`connector::MetricsReader`]) and memoized by
//!    the [`cardinality::CardinalityCache`]. When short-circuiting is
//!    enabled, estimation returns as soon as any column proves selective
//!    enough to carry the query on its own.
//! 2. **Scan Phase**: the [`scanner::IndexScanner`] fans one task out per
//!    indexed constraint, streams the matching index entries, filters the
//!    referenced row-ids against the caller's row-id ranges, and intersects
//!    the per-constraint sets. The surviving row-ids are packed into
//!    [`types::TabletSplit`]s by [`binner::bin_ranges`].
//!
//! The decision between the phases, the selectivity thresholds, and the
//! final `use it / don't use it` verdict live in [`planner::IndexPlanner`],
//! configured per query through [`planner::PlannerConfig`].
//!
//! ## Core Components
//!
//! ### Storage Addressing
//! - [`storage::ShardedIndexStorage`]: codec fanning every logical index key
//!   across N physical shards via a fixed-width, zero-padded decimal prefix,
//!   so index load spreads across all tablet servers. Readers expand every
//!   lookup across all shards.
//!
//! ### Capability Seams
//! - [`connector::IndexConnector`] / [`connector::BatchScanner`]: scoped
//!   multi-range scans against the store.
//! - [`connector::MetricsReader`]: row counts and per-range cardinalities.
//! - [`connector::RowSerializer`]: typed predicate domains to byte ranges.
//!
//! The planner never interprets column types; its currency is byte ranges
//! over the store's sort order and opaque row-ids.
//!
//! ## Decision Outcomes
//!
//! [`types::PlanResult`] separates the three outcomes that matter to the
//! engine: use the produced splits, use an *empty* split list (the
//! predicates provably match no rows), or do not use the index at all.
//! Failures are [`error::PlanError`] values, never encoded in the plan.
//!
//! ## Concurrency Model
//!
//! Scan tasks run on the async runtime, gated by a per-planner semaphore of
//! width `4 × cpu_count`. Results are consumed in submission order so that
//! the intersection seed, and therefore the emitted splits, are
//! deterministic for a fixed input. Any task failure cancels its siblings;
//! scanners are released on every exit path.

pub mod binner;
pub mod cardinality;
pub mod connector;
pub mod error;
pub mod planner;
pub mod scanner;
pub mod storage;
pub mod types;

pub use crate::cardinality::{Cardinalities, CardinalityCache};
pub use crate::connector::{
    index_column_family, index_table_name, Authorizations, BatchScanner, IndexConnector,
    MetricsReader, RowSerializer, ScanEntry,
};
pub use crate::error::{PlanError, Result};
pub use crate::planner::{IndexPlanner, PlannerConfig};
pub use crate::storage::ShardedIndexStorage;
pub use crate::types::{
    ByteRange, ColumnConstraint, Domain, IndexColumn, PlanResult, RangeBound, RowId, TabletSplit,
    ValueRange,
};
