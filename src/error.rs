//! Error types shared across the planner.

use thiserror::Error;

/// Result type used throughout this crate.
pub type Result<T, E = PlanError> = std::result::Result<T, E>;

/// Failures surfaced by the planner and its collaborators.
///
/// "Do not use the index" is not an error; it is the
/// [`PlanResult::DoNotUseIndex`](crate::types::PlanResult::DoNotUseIndex)
/// variant returned by a successful planning call.
#[derive(Debug, Error)]
pub enum PlanError {
    /// A configuration value is outside its documented range. This is a
    /// programmer error, not a runtime condition.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The metrics store could not be read. Fatal to the planning call.
    #[error("metrics store unavailable: {source}")]
    MetricsUnavailable {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A scan task against the index table failed. Sibling tasks are
    /// cancelled before this is surfaced; partial results are never kept.
    #[error("index scan failed: {source}")]
    ScanFailure {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The planning call was cancelled externally, or the planner was shut
    /// down while work was outstanding.
    #[error("index planning interrupted")]
    Interrupted,
}

impl PlanError {
    /// Wraps a metrics-store failure.
    pub fn metrics(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        PlanError::MetricsUnavailable {
            source: source.into(),
        }
    }

    /// Wraps a scan failure.
    pub fn scan(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        PlanError::ScanFailure {
            source: source.into(),
        }
    }
}
