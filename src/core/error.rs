use std::fmt;

use thiserror::Error;

use super::types::Bucket;

#[derive(Clone, Debug, PartialEq, Error)]
pub enum FieldIssue {
    #[error("{value} is outside [{min}, {max}]")]
    OutOfRange { value: f64, min: f64, max: f64 },
    #[error("must be a finite number")]
    NotFinite,
    #[error("must be >= 0, got {value}")]
    Negative { value: f64 },
    #[error("allocation sums to {sum:.4}, expected 1 +/- 0.01")]
    AllocationSum { sum: f64 },
    #[error("{0}")]
    Inconsistent(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldError {
    pub field: String,
    pub issue: FieldIssue,
}

impl FieldError {
    pub fn new(field: impl Into<String>, issue: FieldIssue) -> Self {
        Self {
            field: field.into(),
            issue,
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.issue)
    }
}

/// Every problem found in a profile, reported together.
#[derive(Clone, Debug, PartialEq, Error)]
#[error("invalid household profile ({} issue(s)): {}", .errors.len(), join_errors(.errors))]
pub struct ValidationError {
    pub errors: Vec<FieldError>,
}

impl ValidationError {
    pub fn has_field(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }
}

fn join_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum ComputationError {
    #[error("trial {trial} year {year}: {bucket:?} balance went negative ({value})")]
    NegativeBalance {
        trial: u32,
        year: u32,
        bucket: Bucket,
        value: f64,
    },
    #[error("trial {trial} year {year}: non-finite {what}")]
    NonFinite {
        trial: u32,
        year: u32,
        what: &'static str,
    },
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("internal invariant violated: {0}")]
    Computation(#[from] ComputationError),
    #[error("simulation batch was cancelled")]
    Cancelled,
    #[error("simulation worker exited without a result")]
    WorkerLost,
}
