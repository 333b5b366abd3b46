use crate::domain::model::{
    BatchSummary, CleanBatch, CleanRecord, QuarantineReason, QuarantinedRow, RawBatch, RawRecord,
    TransformResult,
};
use crate::utils::error::{EtlError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashMap;
use std::str::FromStr;

pub const REQUIRED_COLUMNS: [&str; 5] = ["sale_id", "product", "quantity", "price", "sale_date"];
pub const DEFAULT_PRECISION: u32 = 2;

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y"];
const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Validates raw rows, normalizes types and derives `line_total`.
///
/// Rows that fail validation are quarantined and reported; only a batch
/// missing required columns fails as a whole. Zero quantity or zero price is
/// valid and yields a zero total.
#[derive(Debug, Clone)]
pub struct Transformer {
    precision: u32,
}

impl Transformer {
    pub fn new(precision: u32) -> Self {
        Self { precision }
    }

    pub fn precision(&self) -> u32 {
        self.precision
    }

    pub fn transform(&self, raw: RawBatch) -> Result<TransformResult> {
        let mut result = TransformResult {
            batch: CleanBatch {
                records: Vec::with_capacity(raw.len()),
                precision: self.precision,
            },
            ..Default::default()
        };

        if raw.is_empty() {
            tracing::info!(accepted = 0, quarantined = 0, "Nothing to transform");
            return Ok(result);
        }

        let columns = ColumnMap::resolve(&raw)?;
        let mut first_seen: HashMap<i64, u64> = HashMap::new();

        for record in &raw.records {
            // 批次總量無法累加的列與單筆溢位同樣隔離，摘要永遠等於已接受列的總和
            let outcome = self.clean_row(record, &columns).and_then(|clean| {
                if let Some(&first_line) = first_seen.get(&clean.sale_id) {
                    return Err(QuarantineReason::DuplicateId { first_line });
                }
                let summary = BatchSummary {
                    total_quantity: result
                        .summary
                        .total_quantity
                        .checked_add(clean.quantity)
                        .ok_or(QuarantineReason::TotalOverflow)?,
                    total_revenue: result
                        .summary
                        .total_revenue
                        .checked_add(clean.line_total)
                        .ok_or(QuarantineReason::TotalOverflow)?,
                };
                first_seen.insert(clean.sale_id, record.line);
                Ok((clean, summary))
            });

            match outcome {
                Ok((clean, summary)) => {
                    result.summary = summary;
                    result.batch.records.push(clean);
                }
                Err(reason) => {
                    let sale_id = record
                        .fields
                        .get(columns.sale_id)
                        .filter(|v| !v.is_empty())
                        .cloned();
                    tracing::warn!(line = record.line, "Quarantined row: {}", reason);
                    result.quarantined.push(QuarantinedRow {
                        line: record.line,
                        sale_id,
                        reason,
                    });
                }
            }
        }

        tracing::info!(
            accepted = result.batch.len(),
            quarantined = result.quarantined.len(),
            total_revenue = %result.summary.total_revenue,
            "Transformed {} valid rows ({} quarantined)",
            result.batch.len(),
            result.quarantined.len()
        );

        Ok(result)
    }

    fn clean_row(
        &self,
        record: &RawRecord,
        columns: &ColumnMap,
    ) -> std::result::Result<CleanRecord, QuarantineReason> {
        let sale_id_raw = required(record, columns.sale_id, "sale_id")?;
        let sale_id = sale_id_raw
            .parse::<i64>()
            .map_err(|_| QuarantineReason::InvalidId {
                value: sale_id_raw.to_string(),
            })?;

        let product = required(record, columns.product, "product")?.to_string();

        let quantity_raw = required(record, columns.quantity, "quantity")?;
        let quantity = parse_quantity(quantity_raw).ok_or_else(|| QuarantineReason::InvalidQuantity {
            value: quantity_raw.to_string(),
        })?;
        if quantity < 0 {
            return Err(QuarantineReason::NegativeQuantity { value: quantity });
        }

        let price_raw = required(record, columns.price, "price")?;
        let unit_price = parse_decimal(price_raw).ok_or_else(|| QuarantineReason::InvalidPrice {
            value: price_raw.to_string(),
        })?;
        if unit_price < Decimal::ZERO {
            return Err(QuarantineReason::NegativePrice { value: unit_price });
        }

        let date_raw = required(record, columns.sale_date, "sale_date")?;
        let sale_date = parse_sale_date(date_raw).ok_or_else(|| QuarantineReason::InvalidDate {
            value: date_raw.to_string(),
        })?;

        let line_total =
            line_total(quantity, unit_price, self.precision).ok_or(QuarantineReason::TotalOverflow)?;

        Ok(CleanRecord {
            sale_id,
            product,
            category: optional(record, columns.category),
            region: optional(record, columns.region),
            quantity,
            unit_price,
            sale_date,
            line_total,
        })
    }
}

impl Default for Transformer {
    fn default() -> Self {
        Self::new(DEFAULT_PRECISION)
    }
}

/// `quantity × unit_price`, rounded half away from zero to `precision` places
/// and always carrying exactly `precision` places. `None` on overflow, or
/// when the value is too large to carry that many places.
pub fn line_total(quantity: i64, unit_price: Decimal, precision: u32) -> Option<Decimal> {
    let mut total = Decimal::from(quantity)
        .checked_mul(unit_price)?
        .round_dp_with_strategy(precision, RoundingStrategy::MidpointAwayFromZero);
    total.rescale(precision);
    // 數值太大時 rescale 會保留較少的小數位
    (total.scale() == precision).then_some(total)
}

pub fn parse_sale_date(value: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
                .map(|dt| dt.date())
        })
        .or_else(|| DateTime::parse_from_rfc3339(value).ok().map(|dt| dt.date_naive()))
}

// "3" 或 "3.0" 都接受，"3.5" 不接受
fn parse_quantity(value: &str) -> Option<i64> {
    value.parse::<i64>().ok().or_else(|| {
        let d = parse_decimal(value)?;
        if d.fract().is_zero() {
            d.to_i64()
        } else {
            None
        }
    })
}

fn parse_decimal(value: &str) -> Option<Decimal> {
    Decimal::from_str(value)
        .or_else(|_| Decimal::from_scientific(value))
        .ok()
}

fn required<'a>(
    record: &'a RawRecord,
    index: usize,
    column: &str,
) -> std::result::Result<&'a str, QuarantineReason> {
    match record.fields.get(index).map(|v| v.trim()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(QuarantineReason::MissingField {
            column: column.to_string(),
        }),
    }
}

fn optional(record: &RawRecord, index: Option<usize>) -> Option<String> {
    index
        .and_then(|i| record.fields.get(i))
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

struct ColumnMap {
    sale_id: usize,
    product: usize,
    quantity: usize,
    price: usize,
    sale_date: usize,
    category: Option<usize>,
    region: Option<usize>,
}

impl ColumnMap {
    fn resolve(raw: &RawBatch) -> Result<Self> {
        let missing: Vec<&str> = REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|c| raw.column_index(c).is_none())
            .collect();

        if !missing.is_empty() {
            return Err(EtlError::TransformInvalid {
                message: format!("missing required columns: {}", missing.join(", ")),
            });
        }

        let index = |name: &str| raw.column_index(name).unwrap_or_default();
        Ok(Self {
            sale_id: index("sale_id"),
            product: index("product"),
            quantity: index("quantity"),
            price: index("price"),
            sale_date: index("sale_date"),
            category: raw.column_index("category"),
            region: raw.column_index("region"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::ErrorKind;

    fn batch(rows: &[&str]) -> RawBatch {
        let columns = "sale_id,product,category,region,quantity,price,sale_date"
            .split(',')
            .map(str::to_string)
            .collect();
        let records = rows
            .iter()
            .enumerate()
            .map(|(i, row)| RawRecord {
                line: i as u64 + 2,
                fields: row.split(',').map(str::to_string).collect(),
            })
            .collect();
        RawBatch { columns, records }
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_valid_rows_get_line_totals() {
        let raw = batch(&[
            "1,Camiseta,Roupas,Sul,2,39.90,2025-01-03",
            "2,Tenis,Calcados,Norte,1,199,2025-01-04",
        ]);

        let result = Transformer::default().transform(raw).unwrap();

        assert_eq!(result.batch.len(), 2);
        assert!(result.quarantined.is_empty());
        let first = &result.batch.records[0];
        assert_eq!(first.line_total.to_string(), "79.80");
        assert_eq!(first.category.as_deref(), Some("Roupas"));
        assert_eq!(result.batch.records[1].line_total.to_string(), "199.00");
        assert_eq!(result.summary.total_quantity, 3);
        assert_eq!(result.summary.total_revenue, dec("278.80"));
    }

    #[test]
    fn test_negative_values_are_quarantined() {
        let raw = batch(&[
            "1,A,,,-1,10.00,2025-01-01",
            "2,B,,,1,-10.00,2025-01-01",
            "3,C,,,1,10.00,2025-01-01",
        ]);

        let result = Transformer::default().transform(raw).unwrap();

        assert_eq!(result.batch.len(), 1);
        assert_eq!(result.batch.records[0].sale_id, 3);
        assert_eq!(result.quarantined.len(), 2);
        assert_eq!(
            result.quarantined[0].reason,
            QuarantineReason::NegativeQuantity { value: -1 }
        );
        assert_eq!(result.quarantined[1].line, 3);
        assert!(matches!(
            result.quarantined[1].reason,
            QuarantineReason::NegativePrice { .. }
        ));
    }

    #[test]
    fn test_zero_quantity_and_price_are_kept() {
        let raw = batch(&["1,A,,,0,10.00,2025-01-01", "2,B,,,4,0,2025-01-01"]);

        let result = Transformer::default().transform(raw).unwrap();

        assert_eq!(result.batch.len(), 2);
        assert!(result.batch.records.iter().all(|r| r.line_total == Decimal::ZERO));
        assert_eq!(result.batch.records[0].line_total.to_string(), "0.00");
    }

    #[test]
    fn test_rounding_is_half_away_from_zero() {
        // 3 × 0.335 = 1.005，銀行家捨入會得到 1.00
        assert_eq!(line_total(3, dec("0.335"), 2).unwrap().to_string(), "1.01");
        assert_eq!(line_total(1, dec("2.675"), 2).unwrap().to_string(), "2.68");
        assert_eq!(line_total(1, dec("2.674"), 2).unwrap().to_string(), "2.67");
        assert_eq!(line_total(3, dec("0.5"), 0).unwrap().to_string(), "2");
        assert_eq!(line_total(2, dec("5"), 2).unwrap().to_string(), "10.00");
    }

    #[test]
    fn test_line_total_too_large_for_precision() {
        // 10^13 × 10^8 = 10^21，八位小數超出 Decimal 的 28 位有效數字
        assert_eq!(line_total(10_000_000_000_000, dec("100000000"), 8), None);
        assert_eq!(
            line_total(10_000_000_000_000, dec("100000000"), 2).unwrap().scale(),
            2
        );

        let raw = batch(&["1,Iate,,,10000000000000,100000000,2025-01-01"]);
        let result = Transformer::new(8).transform(raw).unwrap();

        assert!(result.batch.is_empty());
        assert_eq!(result.quarantined[0].reason, QuarantineReason::TotalOverflow);
    }

    #[test]
    fn test_batch_totals_never_wrap() {
        let raw = batch(&[
            "1,A,,,9223372036854775807,0,2025-01-01",
            "2,B,,,1,0,2025-01-01",
            "3,C,,,0,1.50,2025-01-01",
        ]);

        let result = Transformer::default().transform(raw).unwrap();

        assert_eq!(result.batch.len(), 2);
        assert_eq!(result.summary.total_quantity, i64::MAX);
        assert_eq!(result.quarantined.len(), 1);
        assert_eq!(result.quarantined[0].line, 3);
        assert_eq!(result.quarantined[0].reason, QuarantineReason::TotalOverflow);
    }

    #[test]
    fn test_line_total_consistent_for_every_record() {
        let raw = batch(&[
            "1,A,,,7,3.333,2025-01-01",
            "2,B,,,11,0.125,2025-01-01",
            "3,C,,,1000,19.999,2025-01-01",
        ]);

        let transformer = Transformer::new(2);
        let result = transformer.transform(raw).unwrap();

        for record in &result.batch.records {
            let expected = (Decimal::from(record.quantity) * record.unit_price)
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
            assert_eq!(record.line_total, expected);
            assert_eq!(record.line_total.scale(), 2);
        }
    }

    #[test]
    fn test_unparseable_fields_are_quarantined() {
        let raw = batch(&[
            "x1,A,,,1,1.00,2025-01-01",
            "2,B,,,many,1.00,2025-01-01",
            "3,C,,,1,cheap,2025-01-01",
            "4,D,,,1,1.00,yesterday",
            "5,,,,1,1.00,2025-01-01",
            "6,F,,,2.0,1.00,2025-01-01",
        ]);

        let result = Transformer::default().transform(raw).unwrap();

        assert_eq!(result.batch.len(), 1);
        assert_eq!(result.batch.records[0].quantity, 2);
        let reasons: Vec<&QuarantineReason> = result.quarantined.iter().map(|q| &q.reason).collect();
        assert!(matches!(reasons[0], QuarantineReason::InvalidId { .. }));
        assert!(matches!(reasons[1], QuarantineReason::InvalidQuantity { .. }));
        assert!(matches!(reasons[2], QuarantineReason::InvalidPrice { .. }));
        assert!(matches!(reasons[3], QuarantineReason::InvalidDate { .. }));
        assert_eq!(
            reasons[4],
            &QuarantineReason::MissingField {
                column: "product".to_string()
            }
        );
    }

    #[test]
    fn test_duplicate_ids_keep_first_occurrence() {
        let raw = batch(&[
            "1,A,,,1,1.00,2025-01-01",
            "1,A again,,,9,9.00,2025-01-02",
            "2,B,,,1,1.00,2025-01-01",
        ]);

        let result = Transformer::default().transform(raw).unwrap();

        assert_eq!(result.batch.len(), 2);
        assert_eq!(result.batch.records[0].product, "A");
        assert_eq!(
            result.quarantined[0].reason,
            QuarantineReason::DuplicateId { first_line: 2 }
        );
        assert_eq!(result.quarantined[0].sale_id.as_deref(), Some("1"));
    }

    #[test]
    fn test_dates_normalized() {
        let expected = NaiveDate::from_ymd_opt(2025, 3, 9).unwrap();
        for input in [
            "2025-03-09",
            "2025/03/09",
            "09/03/2025",
            "2025-03-09 14:30:00",
            "2025-03-09T14:30:00",
            "2025-03-09T14:30:00-03:00",
        ] {
            assert_eq!(parse_sale_date(input), Some(expected), "input {input}");
        }
        assert_eq!(parse_sale_date("31/02/2025"), None);
    }

    #[test]
    fn test_missing_required_columns_is_fatal() {
        let raw = RawBatch {
            columns: vec!["sale_id".to_string(), "product".to_string()],
            records: vec![RawRecord {
                line: 2,
                fields: vec!["1".to_string(), "A".to_string()],
            }],
        };

        let err = Transformer::default().transform(raw).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TransformInvalid);
        assert!(err.to_string().contains("quantity, price, sale_date"));
    }

    #[test]
    fn test_empty_batch_is_not_invalid() {
        let result = Transformer::default().transform(RawBatch::default()).unwrap();
        assert!(result.batch.is_empty());
        assert!(result.quarantined.is_empty());
        assert_eq!(result.batch.precision, 2);
    }
}
