use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// One data row of the source file, still as text, aligned with
/// [`RawBatch::columns`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// 1-based line number in the source file (the header is line 1).
    pub line: u64,
    pub fields: Vec<String>,
}

/// Rows in file order, plus the normalized header they are aligned with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawBatch {
    pub columns: Vec<String>,
    pub records: Vec<RawRecord>,
}

impl RawBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanRecord {
    pub sale_id: i64,
    pub product: String,
    pub category: Option<String>,
    pub region: Option<String>,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub sale_date: NaiveDate,
    pub line_total: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanBatch {
    pub records: Vec<CleanRecord>,
    /// Decimal places `line_total` was rounded to.
    pub precision: u32,
}

impl CleanBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum QuarantineReason {
    MissingField { column: String },
    InvalidId { value: String },
    InvalidQuantity { value: String },
    InvalidPrice { value: String },
    InvalidDate { value: String },
    NegativeQuantity { value: i64 },
    NegativePrice { value: Decimal },
    TotalOverflow,
    DuplicateId { first_line: u64 },
}

impl fmt::Display for QuarantineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuarantineReason::MissingField { column } => write!(f, "missing value for '{}'", column),
            QuarantineReason::InvalidId { value } => write!(f, "invalid sale_id '{}'", value),
            QuarantineReason::InvalidQuantity { value } => write!(f, "invalid quantity '{}'", value),
            QuarantineReason::InvalidPrice { value } => write!(f, "invalid price '{}'", value),
            QuarantineReason::InvalidDate { value } => write!(f, "invalid sale_date '{}'", value),
            QuarantineReason::NegativeQuantity { value } => write!(f, "negative quantity {}", value),
            QuarantineReason::NegativePrice { value } => write!(f, "negative price {}", value),
            QuarantineReason::TotalOverflow => write!(f, "line total overflows"),
            QuarantineReason::DuplicateId { first_line } => {
                write!(f, "duplicate sale_id, first seen on line {}", first_line)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuarantinedRow {
    pub line: u64,
    pub sale_id: Option<String>,
    #[serde(flatten)]
    pub reason: QuarantineReason,
}

/// Aggregates over the accepted rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total_quantity: i64,
    pub total_revenue: Decimal,
}

#[derive(Debug, Clone, Default)]
pub struct TransformResult {
    pub batch: CleanBatch,
    pub quarantined: Vec<QuarantinedRow>,
    pub summary: BatchSummary,
}

/// 每次執行寫入目的表的附加欄位
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub loaded_at: DateTime<Utc>,
}

impl RunMetadata {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            loaded_at: Utc::now(),
        }
    }
}

impl Default for RunMetadata {
    fn default() -> Self {
        Self::new()
    }
}
