//! In-memory storage engine.
//!
//! Behaves like the PostgreSQL engine for everything higher layers rely on:
//! column typing, unique constraints, upsert, ordering, paging, transaction
//! sequencing and rollback. Full-text search degrades to a case-insensitive
//! word match over the registered search fields; similarity ordering is
//! accepted but leaves the row order unchanged.

use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::backend::database::settings::{SearchIndexState, TableRegistry};
use crate::backend::{DatabaseType, DbInterface};
use crate::error::{DbError, DbErrorCode, DbResult};
use crate::models::{
    Conditions, Field, FieldCondition, FieldValue, Identifier, Operator, OrderDirection, Record,
    SqlType, ViewRecord,
};
use crate::utils::{validate_identifier, validate_identifiers};

const ROW_VERSION_COLUMN: &str = "row_version";

#[derive(Debug, Clone)]
struct MockRow {
    record: Record,
    row_version: i64,
}

#[derive(Debug, Clone, Default)]
struct MockTable {
    columns: Vec<(String, SqlType)>,
    rows: Vec<MockRow>,
    unique_keys: Vec<Vec<String>>,
    search_index: bool,
}

impl MockTable {
    fn column_type(&self, name: &str) -> DbResult<SqlType> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, sql_type)| *sql_type)
            .ok_or_else(|| DbError::invalid_query(format!("Column '{}' does not exist", name)))
    }

    fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|(column, _)| column == name)
    }

    /// Complete `record` into a stored row in column order.
    fn normalize(&self, record: &Record) -> DbResult<Record> {
        for field in record.iter() {
            let expected = self.column_type(field.name())?;
            if field.sql_type() != expected {
                return Err(DbError::data_conversion(format!(
                    "Column '{}' is {}, got {}",
                    field.name(),
                    expected,
                    field.sql_type()
                )));
            }
        }

        let mut row = Record::with_capacity(self.columns.len());
        for (name, sql_type) in &self.columns {
            let value = match record.find(name).map(Field::value) {
                Some(FieldValue::Uuid(id)) if !id.is_explicit() => generated_identifier(),
                Some(FieldValue::Uuid(id)) => {
                    id.to_uuid()?;
                    FieldValue::Uuid(id.clone())
                }
                Some(value) => value.clone(),
                None if *sql_type == SqlType::Uuid => generated_identifier(),
                None => FieldValue::Null(*sql_type),
            };
            row.push_back(Field::from_value(name.clone(), value));
        }
        Ok(row)
    }

    /// Index of a stored row equal to `row` on `key`, NULLs never matching.
    fn find_conflict(&self, key: &[String], row: &Record, skip: Option<usize>) -> Option<usize> {
        self.rows.iter().enumerate().position(|(index, existing)| {
            Some(index) != skip && same_key(key, &existing.record, row)
        })
    }

    fn check_unique(&self, row: &Record, skip: Option<usize>) -> DbResult<()> {
        for key in &self.unique_keys {
            if self.find_conflict(key, row, skip).is_some() {
                return Err(DbError::query(
                    DbErrorCode::ConstraintViolation,
                    format!("Duplicate key value violates unique constraint on ({})", key.join(", ")),
                ));
            }
        }
        Ok(())
    }
}

fn generated_identifier() -> FieldValue {
    FieldValue::Uuid(Identifier::from(uuid::Uuid::new_v4()))
}

fn same_key(key: &[String], left: &Record, right: &Record) -> bool {
    key.iter().all(|name| match (left.find(name), right.find(name)) {
        (Some(l), Some(r)) => !l.is_null() && !r.is_null() && l.value() == r.value(),
        _ => false,
    })
}

/// Ordering of two non-null values of comparable types.
fn compare_values(left: &FieldValue, right: &FieldValue) -> Option<Ordering> {
    use FieldValue::*;
    match (left, right) {
        (Int(l), Int(r)) => Some(l.cmp(r)),
        (BigInt(l), BigInt(r)) => Some(l.cmp(r)),
        (Int(l), BigInt(r)) => Some(i64::from(*l).cmp(r)),
        (BigInt(l), Int(r)) => Some(l.cmp(&i64::from(*r))),
        (Double(l), Double(r)) => l.partial_cmp(r),
        (Int(l), Double(r)) => f64::from(*l).partial_cmp(r),
        (Double(l), Int(r)) => l.partial_cmp(&f64::from(*r)),
        (BigInt(l), Double(r)) => (*l as f64).partial_cmp(r),
        (Double(l), BigInt(r)) => l.partial_cmp(&(*r as f64)),
        (Bool(l), Bool(r)) => Some(l.cmp(r)),
        (Text(l), Text(r)) => Some(l.cmp(r)),
        (Timestamp(l), Timestamp(r)) => Some(l.cmp(r)),
        (Uuid(l), Uuid(r)) => Some(l.id().cmp(r.id())),
        (Json(l), Json(r)) if l == r => Some(Ordering::Equal),
        _ => None,
    }
}

/// SQL `LIKE` with `%` and `_` wildcards.
fn like_match(text: &[char], pattern: &[char]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some(('%', rest)) => (0..=text.len()).any(|skip| like_match(&text[skip..], rest)),
        Some(('_', rest)) => !text.is_empty() && like_match(&text[1..], rest),
        Some((c, rest)) => text.first() == Some(c) && like_match(&text[1..], rest),
    }
}

fn like(text: &str, pattern: &str, case_insensitive: bool) -> bool {
    let (text, pattern) = if case_insensitive {
        (text.to_lowercase(), pattern.to_lowercase())
    } else {
        (text.to_string(), pattern.to_string())
    };
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    like_match(&text, &pattern)
}

fn matches_condition(row: &Record, condition: &FieldCondition) -> DbResult<bool> {
    let field = row.at(&condition.field)?;
    if let FieldValue::Null(_) = condition.value {
        return match condition.op {
            Operator::Eq => Ok(field.is_null()),
            Operator::Ne => Ok(!field.is_null()),
            op => Err(DbError::invalid_query(format!(
                "Operator {} cannot compare '{}' with NULL",
                op, condition.field
            ))),
        };
    }
    if let FieldValue::Uuid(id) = &condition.value {
        if !id.is_explicit() {
            return Err(DbError::invalid_query(format!(
                "Cannot filter '{}' on an unset identifier",
                condition.field
            )));
        }
    }
    if field.is_null() {
        return Ok(false);
    }

    match condition.op {
        Operator::Like | Operator::ILike => match (field.value(), &condition.value) {
            (FieldValue::Text(text), FieldValue::Text(pattern)) => {
                Ok(like(text, pattern, condition.op == Operator::ILike))
            }
            _ => Err(DbError::invalid_query(format!(
                "Operator {} needs text operands on '{}'",
                condition.op, condition.field
            ))),
        },
        op @ (Operator::Eq | Operator::Ne)
            if matches!(
                (field.value(), &condition.value),
                (FieldValue::Json(_), FieldValue::Json(_))
            ) =>
        {
            let equal = field.value() == &condition.value;
            Ok((op == Operator::Eq) == equal)
        }
        op => {
            let ordering = compare_values(field.value(), &condition.value).ok_or_else(|| {
                DbError::invalid_query(format!(
                    "Cannot compare '{}' of type {} with {}",
                    condition.field,
                    field.sql_type(),
                    condition.value.sql_type()
                ))
            })?;
            Ok(match op {
                Operator::Eq => ordering == Ordering::Equal,
                Operator::Ne => ordering != Ordering::Equal,
                Operator::Lt => ordering == Ordering::Less,
                Operator::Le => ordering != Ordering::Greater,
                Operator::Gt => ordering == Ordering::Greater,
                Operator::Ge => ordering != Ordering::Less,
                Operator::Like | Operator::ILike => false,
            })
        }
    }
}

/// Every word of `text` occurs in the concatenated search fields.
fn matches_pattern(row: &Record, search_fields: &[String], text: &str) -> bool {
    let document = search_fields
        .iter()
        .filter_map(|name| row.find(name).and_then(|f| f.value().to_text()))
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    text.split_whitespace()
        .all(|word| document.contains(&word.to_lowercase()))
}

/// NULLs sort last ascending and first descending.
fn compare_rows(left: &Record, right: &Record, conditions: &Conditions) -> Ordering {
    for order in conditions.order() {
        let l = left.find(&order.field).map(Field::value);
        let r = right.find(&order.field).map(Field::value);
        let ordering = match (l, r) {
            (Some(l), Some(r)) => match (l.is_null(), r.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => compare_values(l, r).unwrap_or(Ordering::Equal),
            },
            _ => Ordering::Equal,
        };
        let ordering = match order.direction {
            OrderDirection::Ascending => ordering,
            OrderDirection::Descending => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

type MockTables = BTreeMap<String, MockTable>;

/// In-memory [`DbInterface`] for tests of higher layers.
#[derive(Debug)]
pub struct MockDbClient {
    tables: MockTables,
    snapshot: Option<MockTables>,
    registry: TableRegistry,
    connected: bool,
}

impl Default for MockDbClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDbClient {
    pub fn new() -> Self {
        Self {
            tables: MockTables::new(),
            snapshot: None,
            registry: TableRegistry::new(),
            connected: true,
        }
    }

    fn ensure_connected(&self) -> DbResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(DbError::connection(
                DbErrorCode::ConnectionFailed,
                "Connection is closed",
            ))
        }
    }

    fn table(&self, name: &str) -> DbResult<&MockTable> {
        self.ensure_connected()?;
        validate_identifier(name)?;
        self.tables
            .get(name)
            .ok_or_else(|| DbError::invalid_query(format!("Table '{}' does not exist", name)))
    }

    fn table_mut(&mut self, name: &str) -> DbResult<&mut MockTable> {
        self.table(name)?;
        self.tables
            .get_mut(name)
            .ok_or_else(|| DbError::invalid_query(format!("Table '{}' does not exist", name)))
    }

    fn check_fields_exist(&self, table: &str, fields: &[&str]) -> DbResult<()> {
        let t = self.table(table)?;
        validate_identifiers(fields.iter().copied())?;
        for field in fields {
            t.column_type(field)?;
        }
        Ok(())
    }

    /// Indices of the rows matching the filtering part of `conditions`.
    fn matching_rows(&self, table: &str, conditions: &Conditions) -> DbResult<Vec<usize>> {
        let t = self.table(table)?;
        let search_fields = if conditions.needs_search_fields() {
            self.registry.search_fields(table)?.to_vec()
        } else {
            Vec::new()
        };
        for condition in conditions.field_conditions() {
            validate_identifier(&condition.field)?;
            t.column_type(&condition.field)?;
        }

        let mut matched = Vec::new();
        for (index, row) in t.rows.iter().enumerate() {
            let mut keep = true;
            for condition in conditions.field_conditions() {
                if !matches_condition(&row.record, condition)? {
                    keep = false;
                    break;
                }
            }
            if keep {
                if let Some(pattern) = conditions.pattern() {
                    keep = matches_pattern(&row.record, &search_fields, &pattern.text);
                }
            }
            if keep {
                matched.push(index);
            }
        }
        Ok(matched)
    }

    /// Matching rows, ordered and paged.
    fn query_rows(&self, table: &str, conditions: &Conditions) -> DbResult<Vec<MockRow>> {
        let t = self.table(table)?;
        for order in conditions.order() {
            validate_identifier(&order.field)?;
            t.column_type(&order.field)?;
        }
        let mut rows: Vec<MockRow> = self
            .matching_rows(table, conditions)?
            .into_iter()
            .map(|index| t.rows[index].clone())
            .collect();
        rows.sort_by(|l, r| compare_rows(&l.record, &r.record, conditions));

        if let Some(page) = conditions.page() {
            page.validate()?;
            let offset = usize::try_from(page.offset()).unwrap_or(usize::MAX);
            rows = rows
                .into_iter()
                .skip(offset)
                .take(page.page_size() as usize)
                .collect();
        }
        Ok(rows)
    }

    /// Append rows after checking every constraint; nothing is stored on error.
    fn insert_rows(&mut self, table: &str, rows: &[Record]) -> DbResult<Vec<MockRow>> {
        let t = self.table(table)?;
        let mut staged = t.clone();
        let mut inserted = Vec::with_capacity(rows.len());
        for row in rows {
            if row.is_empty() {
                return Err(DbError::invalid_query("Cannot insert an empty record"));
            }
            let stored = MockRow {
                record: staged.normalize(row)?,
                row_version: 1,
            };
            staged.check_unique(&stored.record, None)?;
            staged.rows.push(stored.clone());
            inserted.push(stored);
        }
        *self.table_mut(table)? = staged;
        debug!(table, rows = inserted.len(), "Mock insert");
        Ok(inserted)
    }

    /// Number of rows held in `table`, ignoring transactions.
    pub fn row_count(&self, table: &str) -> usize {
        self.tables.get(table).map(|t| t.rows.len()).unwrap_or(0)
    }
}

/// Row returned by [`MockDbClient::view`]; includes the row version.
#[derive(Debug, Clone)]
pub struct MockViewRecord {
    names: Vec<String>,
    values: Vec<FieldValue>,
}

impl MockViewRecord {
    fn from_row(row: &MockRow) -> Self {
        let mut names: Vec<String> = row.record.names().map(str::to_string).collect();
        let mut values: Vec<FieldValue> = row.record.iter().map(|f| f.value().clone()).collect();
        names.push(ROW_VERSION_COLUMN.to_string());
        values.push(FieldValue::BigInt(row.row_version));
        Self { names, values }
    }
}

impl ViewRecord for MockViewRecord {
    fn len(&self) -> usize {
        self.values.len()
    }

    fn extract(&self, index: usize) -> DbResult<Option<String>> {
        self.values
            .get(index)
            .map(FieldValue::to_text)
            .ok_or_else(|| {
                DbError::invalid_query(format!(
                    "Column index {} out of range ({} columns)",
                    index,
                    self.values.len()
                ))
            })
    }

    fn extract_by_name(&self, name: &str) -> DbResult<Option<String>> {
        let index = self
            .names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| DbError::invalid_query(format!("No column named '{}'", name)))?;
        self.extract(index)
    }
}

#[async_trait]
impl DbInterface for MockDbClient {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Mock
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn drop_connect(&mut self) -> DbResult<()> {
        if let Some(snapshot) = self.snapshot.take() {
            self.tables = snapshot;
        }
        self.connected = false;
        Ok(())
    }

    async fn health_check(&mut self) -> DbResult<()> {
        self.ensure_connected()
    }

    async fn start_transaction(&mut self) -> DbResult<()> {
        self.ensure_connected()?;
        if self.snapshot.is_some() {
            return Err(DbError::transaction(
                DbErrorCode::TransactionStartFailed,
                "Transaction is already in progress",
            ));
        }
        self.snapshot = Some(self.tables.clone());
        Ok(())
    }

    async fn commit_transaction(&mut self) -> DbResult<()> {
        self.ensure_connected()?;
        match self.snapshot.take() {
            Some(_) => Ok(()),
            None => Err(DbError::transaction(
                DbErrorCode::TransactionCommitFailed,
                "No transaction in progress",
            )),
        }
    }

    async fn rollback_transaction(&mut self) -> DbResult<()> {
        self.ensure_connected()?;
        match self.snapshot.take() {
            Some(snapshot) => {
                self.tables = snapshot;
                Ok(())
            }
            None => Err(DbError::transaction(
                DbErrorCode::TransactionRollbackFailed,
                "No transaction in progress",
            )),
        }
    }

    fn is_transaction_in_progress(&self) -> bool {
        self.snapshot.is_some()
    }

    async fn create_table(&mut self, table: &str, template: &Record) -> DbResult<()> {
        self.ensure_connected()?;
        validate_identifier(table)?;
        if self.tables.contains_key(table) {
            return Err(DbError::invalid_query(format!(
                "Table '{}' already exists",
                table
            )));
        }
        if template.is_empty() {
            return Err(DbError::invalid_query(
                "Table template must contain at least one field",
            ));
        }

        let mut columns: Vec<(String, SqlType)> = Vec::with_capacity(template.len());
        for field in template.iter() {
            validate_identifier(field.name())?;
            if field.name() == ROW_VERSION_COLUMN {
                return Err(DbError::invalid_query(format!(
                    "Column name '{}' is reserved",
                    ROW_VERSION_COLUMN
                )));
            }
            if columns.iter().any(|(name, _)| name == field.name()) {
                return Err(DbError::invalid_query(format!(
                    "Duplicate column '{}' in table template",
                    field.name()
                )));
            }
            columns.push((field.name().to_string(), field.sql_type()));
        }
        let identifiers: Vec<String> = columns
            .iter()
            .filter(|(_, sql_type)| *sql_type == SqlType::Uuid)
            .map(|(name, _)| name.clone())
            .collect();
        if identifiers.len() > 1 {
            return Err(DbError::invalid_query(
                "A table can have at most one identifier column",
            ));
        }

        let table_state = MockTable {
            columns,
            unique_keys: if identifiers.is_empty() {
                Vec::new()
            } else {
                vec![identifiers]
            },
            ..MockTable::default()
        };
        self.tables.insert(table.to_string(), table_state);
        info!(table, "Mock table created");
        Ok(())
    }

    async fn remove_table(&mut self, table: &str) -> DbResult<()> {
        self.ensure_connected()?;
        validate_identifier(table)?;
        self.tables.remove(table);
        self.registry.forget(table);
        Ok(())
    }

    async fn check_table(&mut self, table: &str) -> DbResult<bool> {
        self.ensure_connected()?;
        validate_identifier(table)?;
        Ok(self.tables.contains_key(table))
    }

    async fn truncate_table(&mut self, table: &str) -> DbResult<()> {
        self.table_mut(table)?.rows.clear();
        Ok(())
    }

    async fn list_tables(&mut self) -> DbResult<Vec<String>> {
        self.ensure_connected()?;
        Ok(self.tables.keys().cloned().collect())
    }

    async fn make_unique_constraint(&mut self, table: &str, key_fields: &[&str]) -> DbResult<()> {
        if key_fields.is_empty() {
            return Err(DbError::invalid_query(
                "Unique constraint needs at least one field",
            ));
        }
        self.check_fields_exist(table, key_fields)?;
        let key: Vec<String> = key_fields.iter().map(|f| f.to_string()).collect();

        let t = self.table_mut(table)?;
        if !t.unique_keys.contains(&key) {
            for (index, row) in t.rows.iter().enumerate() {
                if t.find_conflict(&key, &row.record, Some(index)).is_some() {
                    return Err(DbError::query(
                        DbErrorCode::ConstraintViolation,
                        format!("Existing rows are not unique on ({})", key.join(", ")),
                    ));
                }
            }
            t.unique_keys.push(key);
        }
        self.registry.set_conflict_fields(table, key_fields)
    }

    async fn set_search_fields(&mut self, table: &str, fields: &[&str]) -> DbResult<()> {
        let state = if self.table(table)?.search_index {
            SearchIndexState::Active
        } else {
            SearchIndexState::Dropped
        };
        self.registry.set_search_fields(table, fields, state)
    }

    fn set_conflict_fields(&mut self, table: &str, fields: &[&str]) -> DbResult<()> {
        self.registry.set_conflict_fields(table, fields)
    }

    async fn setup_search_index(&mut self, table: &str, fields: &[&str]) -> DbResult<()> {
        if fields.is_empty() {
            return Err(DbError::invalid_query("No search fields given"));
        }
        self.check_fields_exist(table, fields)?;
        self.table_mut(table)?.search_index = true;
        self.registry
            .set_search_fields(table, fields, SearchIndexState::Active)
    }

    async fn drop_search_index(&mut self, table: &str) -> DbResult<()> {
        self.registry.check_drop(table)?;
        self.table_mut(table)?.search_index = false;
        self.registry.set_search_state(table, SearchIndexState::Dropped);
        Ok(())
    }

    async fn remove_search_index(&mut self, table: &str) -> DbResult<()> {
        self.registry.check_remove(table)?;
        self.table_mut(table)?.search_index = false;
        self.registry.set_search_state(table, SearchIndexState::Absent);
        Ok(())
    }

    async fn restore_search_index(&mut self, table: &str) -> DbResult<()> {
        self.registry.check_restore(table)?;
        self.table_mut(table)?.search_index = true;
        self.registry.set_search_state(table, SearchIndexState::Active);
        Ok(())
    }

    fn search_index_state(&self, table: &str) -> SearchIndexState {
        self.registry.search_state(table)
    }

    async fn insert(&mut self, table: &str, rows: &[Record]) -> DbResult<()> {
        self.insert_rows(table, rows)?;
        Ok(())
    }

    async fn insert_with_returning(
        &mut self,
        table: &str,
        rows: &[Record],
        returning: &[&str],
    ) -> DbResult<Vec<Record>> {
        if returning.is_empty() {
            return Err(DbError::invalid_query("No fields to return"));
        }
        let t = self.table(table)?;
        validate_identifiers(returning.iter().copied())?;
        for name in returning {
            if *name != ROW_VERSION_COLUMN && !t.has_column(name) {
                return Err(DbError::invalid_query(format!(
                    "Column '{}' does not exist",
                    name
                )));
            }
        }

        let inserted = self.insert_rows(table, rows)?;
        Ok(inserted
            .iter()
            .map(|row| {
                returning
                    .iter()
                    .map(|name| match row.record.find(name) {
                        Some(field) => field.clone(),
                        None => Field::new(*name, row.row_version),
                    })
                    .collect()
            })
            .collect())
    }

    async fn upsert(
        &mut self,
        table: &str,
        rows: &[Record],
        replace_fields: &[&str],
    ) -> DbResult<()> {
        let conflict_fields = self.registry.conflict_fields(table)?.to_vec();
        let t = self.table(table)?;
        if !t.unique_keys.contains(&conflict_fields) {
            return Err(DbError::invalid_query(format!(
                "No unique constraint on ({}) matches the conflict fields",
                conflict_fields.join(", ")
            )));
        }
        for row in rows {
            for name in conflict_fields.iter().map(String::as_str).chain(replace_fields.iter().copied()) {
                if row.find(name).is_none() {
                    return Err(DbError::invalid_query(format!(
                        "Upsert field '{}' is not among the inserted columns",
                        name
                    )));
                }
            }
        }

        let mut staged = t.clone();
        let mut touched = Vec::new();
        for row in rows {
            let stored = staged.normalize(row)?;
            match staged.find_conflict(&conflict_fields, &stored, None) {
                Some(index) if replace_fields.is_empty() => {
                    debug!(table, index, "Mock upsert kept existing row");
                }
                Some(index) if touched.contains(&index) => {
                    return Err(DbError::query(
                        DbErrorCode::QueryExecutionFailed,
                        "ON CONFLICT DO UPDATE command cannot affect row a second time",
                    ));
                }
                Some(index) => {
                    let mut updated = staged.rows[index].record.clone();
                    for name in replace_fields {
                        let value = stored.at(name)?.value().clone();
                        if let Some(field) = updated.find_mut(name) {
                            *field = Field::from_value(*name, value);
                        }
                    }
                    staged.check_unique(&updated, Some(index))?;
                    staged.rows[index].record = updated;
                    staged.rows[index].row_version += 1;
                    touched.push(index);
                }
                None => {
                    staged.check_unique(&stored, None)?;
                    touched.push(staged.rows.len());
                    staged.rows.push(MockRow {
                        record: stored,
                        row_version: 1,
                    });
                }
            }
        }
        *self.table_mut(table)? = staged;
        Ok(())
    }

    async fn select(&mut self, table: &str, conditions: &Conditions) -> DbResult<Vec<Record>> {
        Ok(self
            .query_rows(table, conditions)?
            .into_iter()
            .map(|row| row.record)
            .collect())
    }

    async fn view(
        &mut self,
        table: &str,
        conditions: &Conditions,
    ) -> DbResult<Vec<Box<dyn ViewRecord>>> {
        Ok(self
            .query_rows(table, conditions)?
            .iter()
            .map(|row| Box::new(MockViewRecord::from_row(row)) as Box<dyn ViewRecord>)
            .collect())
    }

    async fn remove(&mut self, table: &str, conditions: &Conditions) -> DbResult<u64> {
        let matched = self.matching_rows(table, conditions)?;
        let t = self.table_mut(table)?;
        let mut index = 0;
        t.rows.retain(|_| {
            let keep = !matched.contains(&index);
            index += 1;
            keep
        });
        Ok(matched.len() as u64)
    }

    async fn count(&mut self, table: &str, conditions: &Conditions) -> DbResult<u32> {
        let matched = self.matching_rows(table, conditions)?.len();
        u32::try_from(matched)
            .map_err(|_| DbError::data_conversion(format!("Row count {} exceeds u32", matched)))
    }
}
