use std::collections::HashMap;
use std::time::Instant;

use sqlx::postgres::types::Oid;
use sqlx::postgres::{PgConnection, PgTypeInfo};
use sqlx::{Row, TypeInfo};

use crate::error::{map_sqlx_error, DbResult};
use crate::logging::log_statement;
use crate::models::SqlType;

/// Backend column types the decoder understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PgKind {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Text,
    Timestamp,
    TimestampTz,
    Json,
    Uuid,
}

impl PgKind {
    /// Map a `pg_type.typname` (case-insensitive) to a kind.
    pub fn from_type_name(name: &str) -> Option<PgKind> {
        match name.to_ascii_lowercase().as_str() {
            "bool" | "boolean" => Some(PgKind::Bool),
            "int2" | "smallint" => Some(PgKind::Int2),
            "int4" | "int" | "integer" => Some(PgKind::Int4),
            "int8" | "bigint" => Some(PgKind::Int8),
            "float4" | "real" => Some(PgKind::Float4),
            "float8" | "double precision" => Some(PgKind::Float8),
            "text" | "varchar" | "bpchar" | "char" | "name" => Some(PgKind::Text),
            "timestamp" => Some(PgKind::Timestamp),
            "timestamptz" => Some(PgKind::TimestampTz),
            "json" | "jsonb" => Some(PgKind::Json),
            "uuid" => Some(PgKind::Uuid),
            _ => None,
        }
    }

    pub fn sql_type(self) -> SqlType {
        match self {
            PgKind::Bool => SqlType::Boolean,
            PgKind::Int2 | PgKind::Int4 => SqlType::Int,
            PgKind::Int8 => SqlType::BigInt,
            PgKind::Float4 | PgKind::Float8 => SqlType::DoublePrecision,
            PgKind::Text => SqlType::Text,
            PgKind::Timestamp | PgKind::TimestampTz => SqlType::Timestamp,
            PgKind::Json => SqlType::Jsonb,
            PgKind::Uuid => SqlType::Uuid,
        }
    }
}

/// Type names resolved once per connection.
pub const CACHED_TYPE_NAMES: &[&str] = &[
    "bool",
    "int2",
    "int4",
    "int8",
    "float4",
    "float8",
    "text",
    "varchar",
    "bpchar",
    "name",
    "timestamp",
    "timestamptz",
    "json",
    "jsonb",
    "uuid",
];

/// Column type OIDs of one connection, resolved once at connect.
#[derive(Debug, Clone, Default)]
pub struct TypeOidCache {
    by_oid: HashMap<u32, PgKind>,
}

impl TypeOidCache {
    pub fn from_entries<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, u32)>,
    {
        let by_oid = entries
            .into_iter()
            .filter_map(|(name, oid)| PgKind::from_type_name(name).map(|kind| (oid, kind)))
            .collect();
        Self { by_oid }
    }

    /// Query `pg_type` for the OIDs of every supported type.
    pub async fn load(conn: &mut PgConnection) -> DbResult<Self> {
        let sql = "SELECT typname::text AS typname, oid FROM pg_type WHERE typname::text = ANY($1)";
        let started = Instant::now();
        let names: Vec<String> = CACHED_TYPE_NAMES.iter().map(|s| s.to_string()).collect();
        let rows = sqlx::query(sql)
            .bind(names)
            .fetch_all(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;
        log_statement(sql, rows.len() as u64, started);

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = row.try_get("typname").map_err(map_sqlx_error)?;
            let oid: Oid = row.try_get("oid").map_err(map_sqlx_error)?;
            entries.push((name, oid.0));
        }
        Ok(Self::from_entries(
            entries.iter().map(|(name, oid)| (name.as_str(), *oid)),
        ))
    }

    pub fn len(&self) -> usize {
        self.by_oid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_oid.is_empty()
    }

    pub fn get(&self, oid: u32) -> Option<PgKind> {
        self.by_oid.get(&oid).copied()
    }

    /// Resolve a column type: cached OID first, then the driver's type name.
    pub fn resolve(&self, type_info: &PgTypeInfo) -> Option<PgKind> {
        type_info
            .oid()
            .and_then(|oid| self.get(oid.0))
            .or_else(|| PgKind::from_type_name(type_info.name()))
    }
}
