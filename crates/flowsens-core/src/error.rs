//! Request-level error taxonomy.
//!
//! [`GridError`] covers the failures that abort a whole analysis request:
//!
//! | Category | Variants |
//! |----------|----------|
//! | Structural | [`GridError::Structural`] |
//! | Lookup | [`GridError::InjectionNotFound`], [`GridError::BranchNotFound`], [`GridError::HvdcNotFound`], ... |
//! | Parameter validation | [`GridError::InvalidParameter`] |
//!
//! Numerical failures (singular Jacobian, iteration cap) are not errors: they are
//! reported as a per-component or per-state status so that the rest of a request
//! still produces results. Electrical unreachability is reported as `NaN` values.
//!
//! # Example
//!
//! ```ignore
//! use flowsens_core::{GridError, GridResult};
//!
//! fn resolve(grid: &Grid, id: &str) -> GridResult<usize> {
//!     grid.generator_index(id)
//!         .ok_or_else(|| GridError::InjectionNotFound(id.to_string()))
//! }
//! ```

use thiserror::Error;

/// Errors that abort an entire request.
#[derive(Error, Debug)]
pub enum GridError {
    /// Malformed topology reference (missing voltage level, node out of range, ...)
    #[error("Structural error: {0}")]
    Structural(String),

    #[error("Injection '{0}' not found")]
    InjectionNotFound(String),

    #[error("Branch '{0}' not found")]
    BranchNotFound(String),

    #[error("HVDC line '{0}' not found")]
    HvdcNotFound(String),

    #[error("Bus '{0}' not found")]
    BusNotFound(String),

    #[error("Phase shifter '{0}' not found")]
    PhaseShifterNotFound(String),

    #[error("Variable set '{0}' not found")]
    VariableSetNotFound(String),

    #[error("Contingency element '{0}' not found")]
    ContingencyElementNotFound(String),

    /// Out-of-range configuration or argument (invalid tap position, percentile, ...)
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Operation not available on this element (tap change on a fixed pi-model, ...)
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Request aborted through its cancellation token.
    #[error("Analysis cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Convenience type alias for Results using GridError.
pub type GridResult<T> = Result<T, GridError>;

impl GridError {
    /// True for the "unknown id" family of errors.
    pub fn is_lookup(&self) -> bool {
        matches!(
            self,
            GridError::InjectionNotFound(_)
                | GridError::BranchNotFound(_)
                | GridError::HvdcNotFound(_)
                | GridError::BusNotFound(_)
                | GridError::PhaseShifterNotFound(_)
                | GridError::VariableSetNotFound(_)
                | GridError::ContingencyElementNotFound(_)
        )
    }
}

impl From<serde_json::Error> for GridError {
    fn from(err: serde_json::Error) -> Self {
        GridError::Parse(err.to_string())
    }
}

impl From<toml::de::Error> for GridError {
    fn from(err: toml::de::Error) -> Self {
        GridError::Parse(err.to_string())
    }
}
