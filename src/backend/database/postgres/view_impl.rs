use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{Column, Row, ValueRef};

use super::schema::ROW_VERSION_COLUMN;
use super::type_cache::{PgKind, TypeOidCache};
use crate::error::{map_sqlx_error, DbError, DbResult};
use crate::models::{Field, FieldValue, Identifier, Record, ViewRecord};

/// Decode column `index` of `row` into a typed value.
pub fn decode_value(row: &PgRow, index: usize, types: &TypeOidCache) -> DbResult<FieldValue> {
    let raw = row.try_get_raw(index).map_err(map_sqlx_error)?;
    let type_info = raw.type_info().into_owned();
    let kind = types.resolve(&type_info).ok_or_else(|| {
        DbError::data_conversion(format!(
            "Unsupported column type {} for column {}",
            type_info,
            row.columns()[index].name()
        ))
    })?;

    let value = match kind {
        PgKind::Bool => row
            .try_get::<Option<bool>, _>(index)
            .map(|v| v.map(FieldValue::Bool)),
        PgKind::Int2 => row
            .try_get::<Option<i16>, _>(index)
            .map(|v| v.map(|v| FieldValue::Int(i32::from(v)))),
        PgKind::Int4 => row
            .try_get::<Option<i32>, _>(index)
            .map(|v| v.map(FieldValue::Int)),
        PgKind::Int8 => row
            .try_get::<Option<i64>, _>(index)
            .map(|v| v.map(FieldValue::BigInt)),
        PgKind::Float4 => row
            .try_get::<Option<f32>, _>(index)
            .map(|v| v.map(|v| FieldValue::Double(f64::from(v)))),
        PgKind::Float8 => row
            .try_get::<Option<f64>, _>(index)
            .map(|v| v.map(FieldValue::Double)),
        PgKind::Text => row
            .try_get::<Option<String>, _>(index)
            .map(|v| v.map(FieldValue::Text)),
        PgKind::Timestamp => row
            .try_get::<Option<NaiveDateTime>, _>(index)
            .map(|v| v.map(FieldValue::Timestamp)),
        PgKind::TimestampTz => row
            .try_get::<Option<DateTime<Utc>>, _>(index)
            .map(|v| v.map(|v| FieldValue::Timestamp(v.naive_utc()))),
        PgKind::Json => row
            .try_get::<Option<JsonValue>, _>(index)
            .map(|v| v.map(FieldValue::Json)),
        PgKind::Uuid => row
            .try_get::<Option<uuid::Uuid>, _>(index)
            .map(|v| v.map(|v| FieldValue::Uuid(Identifier::from(v)))),
    }
    .map_err(map_sqlx_error)?;

    Ok(value.unwrap_or(FieldValue::Null(kind.sql_type())))
}

/// Materialize a full record. The storage-managed row version is left out
/// unless `with_row_version` is set.
pub fn decode_record(row: &PgRow, types: &TypeOidCache, with_row_version: bool) -> DbResult<Record> {
    let mut record = Record::with_capacity(row.len());
    for column in row.columns() {
        if column.name() == ROW_VERSION_COLUMN && !with_row_version {
            continue;
        }
        let value = decode_value(row, column.ordinal(), types)?;
        record.push_back(Field::from_value(column.name(), value));
    }
    Ok(record)
}

/// Row handed out by `view`: kept in wire form, decoded only on extraction.
pub struct PgViewRecord {
    row: PgRow,
    types: Arc<TypeOidCache>,
}

impl PgViewRecord {
    pub fn new(row: PgRow, types: Arc<TypeOidCache>) -> Self {
        Self { row, types }
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.row.columns().iter().map(|c| c.name()).collect()
    }
}

impl ViewRecord for PgViewRecord {
    fn len(&self) -> usize {
        self.row.len()
    }

    fn extract(&self, index: usize) -> DbResult<Option<String>> {
        if index >= self.row.len() {
            return Err(DbError::invalid_query(format!(
                "Column index {} out of range ({} columns)",
                index,
                self.row.len()
            )));
        }
        Ok(decode_value(&self.row, index, &self.types)?.to_text())
    }

    fn extract_by_name(&self, name: &str) -> DbResult<Option<String>> {
        let index = self
            .row
            .columns()
            .iter()
            .position(|c| c.name() == name)
            .ok_or_else(|| DbError::invalid_query(format!("No column named '{}'", name)))?;
        self.extract(index)
    }
}
