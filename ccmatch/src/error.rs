//! Error types for contract violations.
//!
//! Data conditions (no candidates, too few matches, low contrast) are not
//! errors; they travel as enum variants on the results of each stage.

use thiserror::Error;

/// Malformed catalog input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("catalog must have at least 2 columns, got {width}")]
    TooNarrow { width: usize },

    #[error("row {row} has {found} columns, expected {expected}")]
    RaggedRow {
        row: usize,
        found: usize,
        expected: usize,
    },

    #[error("column '{role}' at index {index} is outside a catalog of width {width}")]
    ColumnOutOfRange {
        role: &'static str,
        index: usize,
        width: usize,
    },
}

/// Failure of a reference catalog provider.
#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("failed to read reference catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("reference catalog parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Caller bugs that abort a calibration run.
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Reference(#[from] ReferenceError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("source row {row} references tile {tile}, which is not in the tile list")]
    UnknownTile { row: usize, tile: i64 },
}
