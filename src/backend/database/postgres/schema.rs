//! SQL text for schema management and data statements.
//!
//! Every identifier goes through [`quote_identifier`]; values never appear
//! in the generated text, only `$n` placeholders.

use std::collections::HashSet;

use super::filter_impl::PostgresConditionCompiler;
use crate::backend::database::filter::ConditionCompiler;
use crate::error::{DbError, DbResult};
use crate::models::{FieldValue, Record, SqlType};
use crate::utils::{quote_identifier, quote_identifier_list, validate_identifier};

/// Storage-managed row version, present in every table this crate creates.
pub const ROW_VERSION_COLUMN: &str = "row_version";

/// PostgreSQL accepts at most this many bind parameters per statement.
pub const MAX_BIND_PARAMS: usize = 65_535;

pub const TRGM_EXTENSION_SQL: &str = "CREATE EXTENSION IF NOT EXISTS pg_trgm";

pub const CHECK_TABLE_SQL: &str = "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
     WHERE table_schema = current_schema() AND table_name = $1)";

pub const LIST_TABLES_SQL: &str = "SELECT table_name::text FROM information_schema.tables \
     WHERE table_schema = current_schema() AND table_type = 'BASE TABLE' ORDER BY table_name";

pub const CONSTRAINT_EXISTS_SQL: &str =
    "SELECT EXISTS (SELECT 1 FROM pg_constraint WHERE conname = $1)";

pub const INDEX_EXISTS_SQL: &str = "SELECT EXISTS (SELECT 1 FROM pg_indexes \
     WHERE schemaname = current_schema() AND indexname = $1)";

pub fn create_table_sql(table: &str, template: &Record) -> DbResult<String> {
    let table = quote_identifier(table)?;
    if template.is_empty() {
        return Err(DbError::invalid_query(
            "Table template must contain at least one field",
        ));
    }

    let mut seen = HashSet::new();
    let mut identifier_columns = 0;
    let mut columns = Vec::with_capacity(template.len() + 1);
    for field in template.iter() {
        if field.name() == ROW_VERSION_COLUMN {
            return Err(DbError::invalid_query(format!(
                "Column name '{}' is reserved",
                ROW_VERSION_COLUMN
            )));
        }
        if !seen.insert(field.name()) {
            return Err(DbError::invalid_query(format!(
                "Duplicate column '{}' in table template",
                field.name()
            )));
        }
        if field.sql_type() == SqlType::Uuid {
            identifier_columns += 1;
        }
        columns.push(format!(
            "{} {}",
            quote_identifier(field.name())?,
            field.sql_type().column_definition()
        ));
    }
    if identifier_columns > 1 {
        return Err(DbError::invalid_query(
            "A table can have at most one identifier column",
        ));
    }
    columns.push(format!(
        "\"{}\" BIGINT NOT NULL DEFAULT 1",
        ROW_VERSION_COLUMN
    ));

    Ok(format!("CREATE TABLE {} ({})", table, columns.join(", ")))
}

pub fn drop_table_sql(table: &str) -> DbResult<String> {
    Ok(format!("DROP TABLE IF EXISTS {}", quote_identifier(table)?))
}

pub fn truncate_table_sql(table: &str) -> DbResult<String> {
    Ok(format!("TRUNCATE TABLE {}", quote_identifier(table)?))
}

/// Field names joined with `_`, then the table name: `id_test_table`.
pub fn unique_constraint_name(table: &str, key_fields: &[&str]) -> DbResult<String> {
    if key_fields.is_empty() {
        return Err(DbError::invalid_query(
            "Unique constraint needs at least one field",
        ));
    }
    let mut name = String::new();
    for field in key_fields {
        validate_identifier(field)?;
        name.push_str(field);
        name.push('_');
    }
    name.push_str(table);
    validate_identifier(&name)?;
    Ok(name)
}

pub fn add_unique_constraint_sql(table: &str, key_fields: &[&str]) -> DbResult<String> {
    let name = unique_constraint_name(table, key_fields)?;
    Ok(format!(
        "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({})",
        quote_identifier(table)?,
        quote_identifier(&name)?,
        quote_identifier_list(key_fields)?
    ))
}

pub fn search_index_name(table: &str) -> String {
    format!("idx_{}_fts", table)
}

pub fn trigram_index_name(table: &str) -> String {
    format!("idx_{}_trgm", table)
}

/// GIN index over the text-search vector and GiST trigram index over the
/// search document.
pub fn create_search_index_sql(table: &str, search_fields: &[String]) -> DbResult<[String; 2]> {
    let compiler = PostgresConditionCompiler::new();
    let quoted_table = quote_identifier(table)?;
    Ok([
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} USING gin ({})",
            quote_identifier(&search_index_name(table))?,
            quoted_table,
            compiler.search_vector(search_fields)?
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} USING gist (({}) gist_trgm_ops)",
            quote_identifier(&trigram_index_name(table))?,
            quoted_table,
            compiler.search_document(search_fields)?
        ),
    ])
}

pub fn drop_search_index_sql(table: &str) -> DbResult<[String; 2]> {
    Ok([
        format!(
            "DROP INDEX IF EXISTS {}",
            quote_identifier(&search_index_name(table))?
        ),
        format!(
            "DROP INDEX IF EXISTS {}",
            quote_identifier(&trigram_index_name(table))?
        ),
    ])
}

pub fn create_database_sql(name: &str, owner: &str) -> DbResult<String> {
    Ok(format!(
        "CREATE DATABASE {} WITH OWNER = {} ENCODING = 'UTF8' TEMPLATE template0",
        quote_identifier(name)?,
        quote_identifier(owner)?
    ))
}

pub fn select_sql(table: &str, suffix: &str) -> DbResult<String> {
    Ok(format!("SELECT * FROM {}{}", quote_identifier(table)?, suffix))
}

pub fn count_sql(table: &str, where_clause: &str) -> DbResult<String> {
    Ok(format!(
        "SELECT COUNT(*) FROM {}{}",
        quote_identifier(table)?,
        where_clause
    ))
}

pub fn delete_sql(table: &str, where_clause: &str) -> DbResult<String> {
    Ok(format!(
        "DELETE FROM {}{}",
        quote_identifier(table)?,
        where_clause
    ))
}

/// Conflict handling of an upsert.
#[derive(Debug, Clone, Copy)]
pub struct OnConflict<'a> {
    pub conflict_fields: &'a [String],
    pub replace_fields: &'a [&'a str],
}

/// Multi-row `INSERT` with optional upsert and `RETURNING` clauses.
#[derive(Debug, Clone, Copy)]
pub struct InsertStatement<'a> {
    table: &'a str,
    on_conflict: Option<OnConflict<'a>>,
    returning: &'a [&'a str],
}

impl<'a> InsertStatement<'a> {
    pub fn new(table: &'a str) -> Self {
        Self {
            table,
            on_conflict: None,
            returning: &[],
        }
    }

    pub fn on_conflict(mut self, on_conflict: OnConflict<'a>) -> Self {
        self.on_conflict = Some(on_conflict);
        self
    }

    pub fn returning(mut self, returning: &'a [&'a str]) -> Self {
        self.returning = returning;
        self
    }

    /// Column names taken from the first row; every row must carry the same set.
    pub fn columns(rows: &[Record]) -> DbResult<Vec<String>> {
        let first = rows
            .first()
            .ok_or_else(|| DbError::invalid_query("Nothing to insert"))?;
        if first.is_empty() {
            return Err(DbError::invalid_query("Cannot insert an empty record"));
        }
        let columns: Vec<String> = first.names().map(str::to_string).collect();
        for column in &columns {
            validate_identifier(column)?;
        }
        Ok(columns)
    }

    /// Rows per statement that stays under the bind parameter limit.
    pub fn max_rows_per_statement(column_count: usize) -> usize {
        (MAX_BIND_PARAMS / column_count.max(1)).max(1)
    }

    /// Build the statement text and its parameters.
    pub fn build(&self, rows: &[Record]) -> DbResult<(String, Vec<FieldValue>)> {
        let columns = Self::columns(rows)?;
        let mut params = Vec::new();
        let mut tuples = Vec::with_capacity(rows.len());

        for (index, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(DbError::invalid_query(format!(
                    "Row {} has {} fields, expected {}",
                    index,
                    row.len(),
                    columns.len()
                )));
            }
            let mut values = Vec::with_capacity(columns.len());
            for column in &columns {
                let field = row.find(column).ok_or_else(|| {
                    DbError::invalid_query(format!("Row {} is missing field '{}'", index, column))
                })?;
                match field.value() {
                    FieldValue::Uuid(id) if !id.is_explicit() => values.push("DEFAULT".to_string()),
                    value => {
                        params.push(value.clone());
                        values.push(format!("${}", params.len()));
                    }
                }
            }
            tuples.push(format!("({})", values.join(", ")));
        }

        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            quote_identifier(self.table)?,
            quote_identifier_list(&columns)?,
            tuples.join(", ")
        );

        if let Some(on_conflict) = &self.on_conflict {
            sql.push_str(&self.conflict_clause(on_conflict, &columns)?);
        }

        if !self.returning.is_empty() {
            sql.push_str(" RETURNING ");
            sql.push_str(&quote_identifier_list(self.returning)?);
        }

        Ok((sql, params))
    }

    fn conflict_clause(&self, on_conflict: &OnConflict<'_>, columns: &[String]) -> DbResult<String> {
        if on_conflict.conflict_fields.is_empty() {
            return Err(DbError::invalid_query("Upsert needs conflict fields"));
        }
        for field in on_conflict
            .conflict_fields
            .iter()
            .map(String::as_str)
            .chain(on_conflict.replace_fields.iter().copied())
        {
            if !columns.iter().any(|c| c == field) {
                return Err(DbError::invalid_query(format!(
                    "Upsert field '{}' is not part of the inserted rows",
                    field
                )));
            }
        }

        let target = quote_identifier_list(on_conflict.conflict_fields)?;
        if on_conflict.replace_fields.is_empty() {
            return Ok(format!(" ON CONFLICT ({}) DO NOTHING", target));
        }

        let mut assignments = on_conflict
            .replace_fields
            .iter()
            .map(|field| {
                let column = quote_identifier(field)?;
                Ok(format!("{} = EXCLUDED.{}", column, column))
            })
            .collect::<DbResult<Vec<_>>>()?;
        assignments.push(format!(
            "\"{col}\" = {}.\"{col}\" + 1",
            quote_identifier(self.table)?,
            col = ROW_VERSION_COLUMN
        ));

        Ok(format!(
            " ON CONFLICT ({}) DO UPDATE SET {}",
            target,
            assignments.join(", ")
        ))
    }
}
