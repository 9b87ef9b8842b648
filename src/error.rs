use std::time::Duration;

use thiserror::Error;

use crate::models::InvoiceStatus;

#[derive(Error, Debug)]
pub enum SpendError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Upload is empty or has no header row")]
    EmptyUpload,

    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Invoice {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: i64,
        from: InvoiceStatus,
        to: InvoiceStatus,
    },

    #[error("Invoice not found: {0}")]
    InvoiceNotFound(i64),

    #[error("Invoice {0} is still processing (pass --force if its import failed)")]
    InvoiceBusy(i64),

    #[error("Expense not found: {0}")]
    ExpenseNotFound(i64),

    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    #[error("Invalid date window: {0}")]
    InvalidWindow(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, SpendError>;

/// Failures of the external categorization service. None of these are fatal to
/// an import; the classifier turns them into the default category.
#[derive(Error, Debug)]
pub enum AiError {
    #[error("AI request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("AI service returned HTTP {0}")]
    Status(u16),

    #[error("AI call timed out after {0:?}")]
    Timeout(Duration),

    #[error("AI returned an unrecognized category: {0:?}")]
    UnrecognizedLabel(String),

    #[error("AI returned an empty response")]
    EmptyResponse,

    #[error("AI call slots are closed")]
    Unavailable,
}
