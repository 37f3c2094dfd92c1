//! Column decoders shared by the store and the landing-table reader.

use crate::model::{parse_amount, parse_timestamp};
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use rusqlite::types::{Type, Value};
use rusqlite::Row;

pub(crate) fn decimal_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let value: Value = row.get(idx)?;
    decimal_from_value(value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Amounts may arrive as TEXT, INTEGER or REAL depending on who wrote them.
pub(crate) fn decimal_from_value(value: Value) -> crate::error::EtlResult<Decimal> {
    match value {
        Value::Text(s) => parse_amount(&s),
        Value::Integer(i) => Ok(Decimal::from(i)),
        Value::Real(f) => Decimal::try_from(f).map_err(|e| crate::error::EtlError::InvalidAmount {
            value: f.to_string(),
            reason: e.to_string(),
        }),
        Value::Null => Err(crate::error::EtlError::InvalidAmount {
            value: "NULL".into(),
            reason: "amount is required".into(),
        }),
        Value::Blob(_) => Err(crate::error::EtlError::InvalidAmount {
            value: "<blob>".into(),
            reason: "unsupported storage class".into(),
        }),
    }
}
