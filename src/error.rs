use thiserror::Error;

/// Main error type for the sheet-loom engine.
/// Aggregates errors from the standard library, dependencies, and internal modules.
#[derive(Error, Debug)]
pub enum SheetLoomError {
    #[error("{0}")]
    WithContextError(String),

    /// Backend execution failure, surfaced verbatim.
    #[error("{0}")]
    BackendError(#[from] anyhow::Error),

    // Standard library errors
    #[error("{0}")]
    ParseIntError(#[from] std::num::ParseIntError),

    #[error("{0}")]
    ParseFloatError(#[from] std::num::ParseFloatError),

    #[error("{0}")]
    ParseDateTimeError(#[from] chrono::ParseError),

    // Spreadsheet module errors
    #[error("{0}")]
    SpreadsheetError(#[from] crate::spreadsheet::SpreadsheetError),

    // Region module errors
    #[error("{0}")]
    RegionError(#[from] crate::region::RegionError),

    // Schema module errors
    #[error("{0}")]
    SchemaError(#[from] crate::schema::SchemaError),

    // Plan module errors
    #[error("{0}")]
    PlanError(#[from] crate::plan::PlanError),

    // Rule module errors
    #[error("{0}")]
    RuleError(#[from] crate::rules::RuleError),
}

pub trait ResultMessage {
    fn with_prefix(self, message: &str) -> Self;
}

impl<T> ResultMessage for Result<T, SheetLoomError> {
    fn with_prefix(self, message: &str) -> Self {
        self.map_err(|e| SheetLoomError::WithContextError(format!("{}: {}", message, e)))
    }
}
