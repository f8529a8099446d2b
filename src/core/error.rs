use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid timeline: {0}")]
    InvalidTimeline(String),

    #[error("contribution element '{id}': {reason}")]
    InvalidContribution { id: String, reason: String },

    #[error("{field} must be {expected}, got {value}")]
    InvalidRate {
        field: String,
        expected: &'static str,
        value: f64,
    },

    #[error("asset allocations must sum to 100%, got {:.4}%", .0 * 100.0)]
    AllocationSum(f64),

    #[error("correlation matrix: {0}")]
    CorrelationMatrix(String),

    #[error("correlation matrix is not positive semi-definite (pivot {pivot} at row {row})")]
    NotPositiveSemiDefinite { row: usize, pivot: f64 },

    #[error("unknown historical index '{0}'")]
    UnknownIndex(String),

    #[error("withdrawal segments leave a gap between {after} and {before}")]
    SegmentGap { after: i32, before: i32 },

    #[error("withdrawal segments overlap in year {0}")]
    SegmentOverlap(i32),

    #[error(
        "withdrawal segments must cover {expected_start}..={expected_end}, got {actual_start}..={actual_end}"
    )]
    SegmentCoverage {
        expected_start: i32,
        expected_end: i32,
        actual_start: i32,
        actual_end: i32,
    },

    #[error("withdrawal segment '{name}': {reason}")]
    InvalidSegment { name: String, reason: String },

    #[error("household: {0}")]
    InvalidHousehold(String),

    #[error("withdrawal strategy: {0}")]
    InvalidStrategy(String),

    #[error("monte carlo: {0}")]
    MonteCarlo(String),

    #[error("distribution: {0}")]
    Distribution(String),
}

impl ConfigError {
    pub(crate) fn rate(field: impl Into<String>, expected: &'static str, value: f64) -> Self {
        ConfigError::InvalidRate {
            field: field.into(),
            expected,
            value,
        }
    }
}
