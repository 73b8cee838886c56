use std::collections::HashMap;

use crate::error::{DbError, DbResult};
use crate::utils::validate_identifier;

/// Full-text index lifecycle of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchIndexState {
    /// No search fields known.
    #[default]
    Absent,
    /// Fields known and the index exists.
    Active,
    /// Fields remembered, index suspended.
    Dropped,
}

impl SearchIndexState {
    /// Whether pattern and similarity conditions can be compiled.
    pub fn has_fields(self) -> bool {
        !matches!(self, SearchIndexState::Absent)
    }
}

/// Per-table configuration kept by a client between calls.
#[derive(Debug, Clone, Default)]
pub struct TableSettings {
    pub search_fields: Vec<String>,
    pub search_state: SearchIndexState,
    pub conflict_fields: Vec<String>,
}

/// Settings of every table a client has been told about.
#[derive(Debug, Default)]
pub struct TableRegistry {
    tables: HashMap<String, TableSettings>,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, table: &str) -> Option<&TableSettings> {
        self.tables.get(table)
    }

    pub fn entry(&mut self, table: &str) -> &mut TableSettings {
        self.tables.entry(table.to_string()).or_default()
    }

    pub fn forget(&mut self, table: &str) {
        self.tables.remove(table);
    }

    pub fn search_state(&self, table: &str) -> SearchIndexState {
        self.get(table)
            .map(|s| s.search_state)
            .unwrap_or_default()
    }

    /// Search fields of `table`, or `InvalidQuery` if none are registered.
    pub fn search_fields(&self, table: &str) -> DbResult<&[String]> {
        match self.get(table) {
            Some(settings) if settings.search_state.has_fields() => Ok(&settings.search_fields),
            _ => Err(DbError::invalid_query(format!(
                "No search fields registered for table '{}'",
                table
            ))),
        }
    }

    /// Conflict fields of `table`, or `InvalidQuery` if none are declared.
    pub fn conflict_fields(&self, table: &str) -> DbResult<&[String]> {
        match self.get(table) {
            Some(settings) if !settings.conflict_fields.is_empty() => {
                Ok(&settings.conflict_fields)
            }
            _ => Err(DbError::invalid_query(format!(
                "No conflict fields declared for table '{}'",
                table
            ))),
        }
    }

    pub fn set_conflict_fields(&mut self, table: &str, fields: &[&str]) -> DbResult<()> {
        validate_identifier(table)?;
        let fields = owned_field_list(fields)?;
        self.entry(table).conflict_fields = fields;
        Ok(())
    }

    /// Store search fields with the state observed in storage.
    pub fn set_search_fields(
        &mut self,
        table: &str,
        fields: &[&str],
        state: SearchIndexState,
    ) -> DbResult<()> {
        validate_identifier(table)?;
        let fields = owned_field_list(fields)?;
        let settings = self.entry(table);
        settings.search_fields = fields;
        settings.search_state = state;
        Ok(())
    }

    /// `drop` is only valid from `Active`.
    pub fn check_drop(&self, table: &str) -> DbResult<()> {
        match self.search_state(table) {
            SearchIndexState::Active => Ok(()),
            state => Err(invalid_transition(table, "drop", state)),
        }
    }

    /// `restore` is only valid from `Dropped`.
    pub fn check_restore(&self, table: &str) -> DbResult<()> {
        match self.search_state(table) {
            SearchIndexState::Dropped => Ok(()),
            state => Err(invalid_transition(table, "restore", state)),
        }
    }

    /// `remove` is valid whenever fields are known.
    pub fn check_remove(&self, table: &str) -> DbResult<()> {
        match self.search_state(table) {
            SearchIndexState::Absent => Err(invalid_transition(table, "remove", SearchIndexState::Absent)),
            _ => Ok(()),
        }
    }

    pub fn set_search_state(&mut self, table: &str, state: SearchIndexState) {
        let settings = self.entry(table);
        settings.search_state = state;
        if state == SearchIndexState::Absent {
            settings.search_fields.clear();
        }
    }
}

fn owned_field_list(fields: &[&str]) -> DbResult<Vec<String>> {
    if fields.is_empty() {
        return Err(DbError::invalid_query("Field list cannot be empty"));
    }
    fields
        .iter()
        .map(|field| validate_identifier(field).map(|_| field.to_string()))
        .collect()
}

fn invalid_transition(table: &str, action: &str, state: SearchIndexState) -> DbError {
    DbError::invalid_query(format!(
        "Cannot {} search index of table '{}' in state {:?}",
        action, table, state
    ))
}
