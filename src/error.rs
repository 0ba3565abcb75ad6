//! Error handling for the tax engine
//!
//! Engine entry points return `EngineResult` so callers can match on the
//! failure class; the CLI and persistence shell use anyhow for context
//! chaining. Statutory floors (negative net income, exhausted basis) are
//! never errors.

use thiserror::Error;

/// Core error types for a calculation run
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed input detected before any module runs
    #[error("invalid record {record}: {field}: {reason}")]
    InvalidRecord {
        record: String,
        field: String,
        reason: String,
    },

    /// A tax-year constant the calculation needs is absent
    #[error("tax year {tax_year} configuration is missing '{key}'")]
    ConfigurationMissing { tax_year: i32, key: String },

    #[error("database error: {0}")]
    Database(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("io error")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn config_missing(tax_year: i32, key: impl Into<String>) -> Self {
        EngineError::ConfigurationMissing {
            tax_year,
            key: key.into(),
        }
    }
}

/// Result type for engine operations
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Result type alias for the CLI and persistence layers
pub type Result<T> = anyhow::Result<T>;
