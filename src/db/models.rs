// Database models for persisted calculations

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A committed calculation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculationRun {
    pub id: Option<i64>,
    pub tax_year: i32,
    pub filing_status: String,
    /// blake3 digest of the breakdown
    pub fingerprint: String,
    pub total_tax: Decimal,
    pub created_at: DateTime<Utc>,
}
