use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

use crate::error::{DbError, DbResult};

/// Column types the value model can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    Int,
    BigInt,
    DoublePrecision,
    Text,
    Boolean,
    Timestamp,
    Jsonb,
    Uuid,
}

impl SqlType {
    /// Column definition used by `CREATE TABLE`.
    pub fn column_definition(self) -> &'static str {
        match self {
            SqlType::Int => "INT",
            SqlType::BigInt => "BIGINT",
            SqlType::DoublePrecision => "DOUBLE PRECISION",
            SqlType::Text => "TEXT",
            SqlType::Boolean => "BOOLEAN",
            SqlType::Timestamp => "TIMESTAMP",
            SqlType::Jsonb => "JSONB",
            SqlType::Uuid => "UUID DEFAULT gen_random_uuid() PRIMARY KEY",
        }
    }

    /// Bare type name, used for casts of bound parameters.
    pub fn type_name(self) -> &'static str {
        match self {
            SqlType::Int => "INT",
            SqlType::BigInt => "BIGINT",
            SqlType::DoublePrecision => "DOUBLE PRECISION",
            SqlType::Text => "TEXT",
            SqlType::Boolean => "BOOLEAN",
            SqlType::Timestamp => "TIMESTAMP",
            SqlType::Jsonb => "JSONB",
            SqlType::Uuid => "UUID",
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Uuid-like record key.
///
/// `explicit == false` asks storage to generate the value on insert; the
/// textual id then holds the [`Identifier::DEFAULT_VALUE`] sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identifier {
    id: String,
    explicit: bool,
}

impl Identifier {
    pub const DEFAULT_VALUE: &'static str = "default";

    /// Explicit identifier. A parseable UUID is stored in its lowercase
    /// hyphenated form, the way PostgreSQL returns it.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: canonical_id(id.into()),
            explicit: true,
        }
    }

    /// Identifier that storage fills in on insert.
    pub fn generated() -> Self {
        Self::default()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = canonical_id(id.into());
        self.explicit = true;
    }

    pub fn is_explicit(&self) -> bool {
        self.explicit
    }

    pub fn is_unset(&self) -> bool {
        !self.explicit && self.id == Self::DEFAULT_VALUE
    }

    /// Parse the textual id as a real UUID for binding.
    pub fn to_uuid(&self) -> DbResult<uuid::Uuid> {
        uuid::Uuid::parse_str(&self.id)
            .map_err(|e| DbError::data_conversion(format!("Invalid uuid '{}': {}", self.id, e)))
    }
}

fn canonical_id(id: String) -> String {
    match uuid::Uuid::parse_str(&id) {
        Ok(parsed) => parsed.hyphenated().to_string(),
        Err(_) => id,
    }
}

/// Drop sub-microsecond precision; `TIMESTAMP` columns keep microseconds.
pub fn truncate_to_micros(ts: NaiveDateTime) -> NaiveDateTime {
    let nanos = ts.nanosecond();
    ts.with_nanosecond(nanos - nanos % 1_000).unwrap_or(ts)
}

impl Default for Identifier {
    fn default() -> Self {
        Self {
            id: Self::DEFAULT_VALUE.to_string(),
            explicit: false,
        }
    }
}

impl From<uuid::Uuid> for Identifier {
    fn from(value: uuid::Uuid) -> Self {
        Identifier::new(value.to_string())
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Closed set of values a field can hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Int(i32),
    BigInt(i64),
    Double(f64),
    Bool(bool),
    Text(String),
    Timestamp(NaiveDateTime),
    Json(JsonValue),
    Uuid(Identifier),
    /// SQL NULL that still remembers its column type.
    Null(SqlType),
}

impl FieldValue {
    pub fn sql_type(&self) -> SqlType {
        match self {
            FieldValue::Int(_) => SqlType::Int,
            FieldValue::BigInt(_) => SqlType::BigInt,
            FieldValue::Double(_) => SqlType::DoublePrecision,
            FieldValue::Bool(_) => SqlType::Boolean,
            FieldValue::Text(_) => SqlType::Text,
            FieldValue::Timestamp(_) => SqlType::Timestamp,
            FieldValue::Json(_) => SqlType::Jsonb,
            FieldValue::Uuid(_) => SqlType::Uuid,
            FieldValue::Null(sql_type) => *sql_type,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null(_))
    }

    /// Bring the value to the precision storage keeps.
    fn normalized(self) -> Self {
        match self {
            FieldValue::Timestamp(ts) => FieldValue::Timestamp(truncate_to_micros(ts)),
            other => other,
        }
    }

    /// Textual rendering, as a view row would show it.
    pub fn to_text(&self) -> Option<String> {
        match self {
            FieldValue::Int(v) => Some(v.to_string()),
            FieldValue::BigInt(v) => Some(v.to_string()),
            FieldValue::Double(v) => Some(v.to_string()),
            FieldValue::Bool(v) => Some(if *v { "t" } else { "f" }.to_string()),
            FieldValue::Text(v) => Some(v.clone()),
            FieldValue::Timestamp(v) => Some(v.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
            FieldValue::Json(v) => Some(v.to_string()),
            FieldValue::Uuid(v) => Some(v.id().to_string()),
            FieldValue::Null(_) => None,
        }
    }
}

/// Rust types that map one-to-one onto a [`FieldValue`] variant.
pub trait FieldType: Clone + Sized {
    const SQL_TYPE: SqlType;

    fn into_value(self) -> FieldValue;

    fn from_value(value: &FieldValue) -> Option<&Self>;
}

macro_rules! impl_field_type {
    ($ty:ty, $variant:ident, $sql:expr) => {
        impl FieldType for $ty {
            const SQL_TYPE: SqlType = $sql;

            fn into_value(self) -> FieldValue {
                FieldValue::$variant(self)
            }

            fn from_value(value: &FieldValue) -> Option<&Self> {
                match value {
                    FieldValue::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

impl_field_type!(i32, Int, SqlType::Int);
impl_field_type!(i64, BigInt, SqlType::BigInt);
impl_field_type!(f64, Double, SqlType::DoublePrecision);
impl_field_type!(bool, Bool, SqlType::Boolean);
impl_field_type!(String, Text, SqlType::Text);
impl_field_type!(JsonValue, Json, SqlType::Jsonb);

impl FieldType for NaiveDateTime {
    const SQL_TYPE: SqlType = SqlType::Timestamp;

    fn into_value(self) -> FieldValue {
        FieldValue::Timestamp(truncate_to_micros(self))
    }

    fn from_value(value: &FieldValue) -> Option<&Self> {
        match value {
            FieldValue::Timestamp(v) => Some(v),
            _ => None,
        }
    }
}
impl_field_type!(Identifier, Uuid, SqlType::Uuid);

/// A named, typed column value.
///
/// The declared type is fixed at construction; `set_value` only ever
/// replaces the value with one of the same type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    name: String,
    value: FieldValue,
}

impl Field {
    pub fn new<T: FieldType>(name: impl Into<String>, value: T) -> Self {
        Self {
            name: name.into(),
            value: value.into_value(),
        }
    }

    pub fn from_value(name: impl Into<String>, value: FieldValue) -> Self {
        Self {
            name: name.into(),
            value: value.normalized(),
        }
    }

    /// Field holding the default value of `T`.
    pub fn with_default<T: FieldType + Default>(name: impl Into<String>) -> Self {
        Self::new(name, T::default())
    }

    /// Typed NULL.
    pub fn null(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            value: FieldValue::Null(sql_type),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn value(&self) -> &FieldValue {
        &self.value
    }

    pub fn into_value(self) -> FieldValue {
        self.value
    }

    pub fn sql_type(&self) -> SqlType {
        self.value.sql_type()
    }

    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    /// Borrow the value as `T`; fails unless `T` is exactly the field's type.
    pub fn get<T: FieldType>(&self) -> DbResult<&T> {
        if let Some(v) = T::from_value(&self.value) {
            return Ok(v);
        }
        if self.value.is_null() && self.sql_type() == T::SQL_TYPE {
            return Err(DbError::data_conversion(format!(
                "Field '{}' is NULL",
                self.name
            )));
        }
        Err(DbError::data_conversion(format!(
            "Incorrect type requested for field '{}': stored {}, requested {}",
            self.name,
            self.sql_type(),
            T::SQL_TYPE
        )))
    }

    /// Owned copy of the value as `T`.
    pub fn extract<T: FieldType>(&self) -> DbResult<T> {
        self.get::<T>().cloned()
    }

    /// `None` for a typed NULL, the value otherwise.
    pub fn get_opt<T: FieldType>(&self) -> DbResult<Option<&T>> {
        if self.value.is_null() && self.sql_type() == T::SQL_TYPE {
            return Ok(None);
        }
        self.get::<T>().map(Some)
    }

    pub fn set_value<T: FieldType>(&mut self, value: T) -> DbResult<()> {
        if T::SQL_TYPE != self.sql_type() {
            return Err(DbError::data_conversion(format!(
                "Cannot store {} into field '{}' of type {}",
                T::SQL_TYPE,
                self.name,
                self.sql_type()
            )));
        }
        self.value = value.into_value();
        Ok(())
    }

    /// Replace the value with a NULL of the same type.
    pub fn set_null(&mut self) {
        self.value = FieldValue::Null(self.sql_type());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbErrorCode;
    use serde_json::json;

    #[test]
    fn test_get_matching_type() {
        let field = Field::new("id", 42i32);
        assert_eq!(field.name(), "id");
        assert_eq!(*field.get::<i32>().unwrap(), 42);
        assert_eq!(field.extract::<i32>().unwrap(), 42);
        assert_eq!(field.sql_type(), SqlType::Int);
    }

    #[test]
    fn test_get_mismatched_type_fails_loudly() {
        let field = Field::new("id", 42i32);
        let err = field.get::<i64>().unwrap_err();
        assert_eq!(err.code(), DbErrorCode::DataConversionError);

        let field = Field::new("name", "Alice".to_string());
        assert!(field.get::<i32>().is_err());
        assert!(field.get::<Identifier>().is_err());
    }

    #[test]
    fn test_set_value_keeps_declared_type() {
        let mut field = Field::new("name", String::new());
        field.set_value("Bob".to_string()).unwrap();
        assert_eq!(field.get::<String>().unwrap(), "Bob");

        let err = field.set_value(7i64).unwrap_err();
        assert_eq!(err.code(), DbErrorCode::DataConversionError);
        assert_eq!(field.sql_type(), SqlType::Text);
    }

    #[test]
    fn test_clone_is_deep_for_json() {
        let original = Field::new("properties", json!({"dosage": {"mg": 50}}));
        let mut copy = original.clone();
        copy.set_value(json!({"dosage": {"mg": 100}})).unwrap();

        assert_eq!(
            original.get::<JsonValue>().unwrap()["dosage"]["mg"],
            json!(50)
        );
        assert_eq!(copy.get::<JsonValue>().unwrap()["dosage"]["mg"], json!(100));
    }

    #[test]
    fn test_typed_null() {
        let mut field = Field::null("description", SqlType::Text);
        assert!(field.is_null());
        assert_eq!(field.sql_type(), SqlType::Text);
        assert!(field.get::<String>().is_err());
        assert_eq!(field.get_opt::<String>().unwrap(), None);
        assert!(field.get_opt::<i32>().is_err());

        field.set_value("filled".to_string()).unwrap();
        assert_eq!(field.get_opt::<String>().unwrap().unwrap(), "filled");

        field.set_null();
        assert!(field.is_null());
        assert_eq!(field.sql_type(), SqlType::Text);
    }

    #[test]
    fn test_identifier_sentinel() {
        let id = Identifier::default();
        assert!(id.is_unset());
        assert!(!id.is_explicit());
        assert_eq!(id.id(), Identifier::DEFAULT_VALUE);

        let explicit = Identifier::new("550e8400-e29b-41d4-a716-446655440001");
        assert!(explicit.is_explicit());
        assert!(explicit.to_uuid().is_ok());

        let bad = Identifier::new("not-a-uuid");
        assert_eq!(
            bad.to_uuid().unwrap_err().code(),
            DbErrorCode::DataConversionError
        );
    }

    #[test]
    fn test_identifier_is_canonicalized() {
        let upper = Identifier::new("550E8400-E29B-41D4-A716-446655440001");
        assert_eq!(upper.id(), "550e8400-e29b-41d4-a716-446655440001");
        assert_eq!(upper, Identifier::new("550e8400e29b41d4a716446655440001"));

        let mut id = Identifier::generated();
        id.set_id("{550E8400-E29B-41D4-A716-446655440001}");
        assert_eq!(id.id(), "550e8400-e29b-41d4-a716-446655440001");

        assert_eq!(Identifier::new("not-a-uuid").id(), "not-a-uuid");
    }

    #[test]
    fn test_timestamp_keeps_microseconds() {
        let precise = chrono::NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_nano_opt(8, 30, 0, 123_456_789)
            .unwrap();
        let expected = chrono::NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_micro_opt(8, 30, 0, 123_456)
            .unwrap();

        let field = Field::new("taken_at", precise);
        assert_eq!(field.extract::<NaiveDateTime>().unwrap(), expected);

        let mut field = Field::new("taken_at", expected);
        field.set_value(precise).unwrap();
        assert_eq!(field.extract::<NaiveDateTime>().unwrap(), expected);

        let field = Field::from_value("taken_at", FieldValue::Timestamp(precise));
        assert_eq!(field, Field::new("taken_at", expected));
    }

    #[test]
    fn test_column_definitions() {
        assert_eq!(SqlType::Int.column_definition(), "INT");
        assert_eq!(SqlType::Jsonb.column_definition(), "JSONB");
        assert_eq!(
            SqlType::Uuid.column_definition(),
            "UUID DEFAULT gen_random_uuid() PRIMARY KEY"
        );
    }

    #[test]
    fn test_to_text() {
        assert_eq!(FieldValue::Int(5).to_text().unwrap(), "5");
        assert_eq!(FieldValue::Bool(true).to_text().unwrap(), "t");
        assert_eq!(FieldValue::Null(SqlType::Int).to_text(), None);
    }
}
