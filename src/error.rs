//! Error types for the student vault.
//!
//! Contains error variants for:
//! - Input validation (malformed roll number, negative or unparseable amount)
//! - Persistence failures of the backing blob store
//! - Export encoding failures
//! - Unreadable or invalid configuration
//!
//! A missing record is never an error: lookups return `Option` and
//! deletes/clears on absent keys are no-ops.

use rust_decimal::Decimal;

use crate::dto::Field;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid roll number {candidate:?}: enter the last 2 digits (01-99, A0-A9, or B0)")]
    InvalidIdentifier { candidate: String },

    #[error("invalid {field} amount {input:?}: {reason}")]
    InvalidAmount {
        field: Field,
        input: String,
        reason: &'static str,
    },

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("export error: {0}")]
    Export(#[from] ExportError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed vault JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupt vault data: {0}")]
    Corrupt(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("workbook error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("amount {0} cannot be written as a spreadsheet number")]
    Amount(Decimal),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
