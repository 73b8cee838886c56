use std::ops::{Index, IndexMut};

use super::field::Field;
use crate::error::{DbError, DbResult};

/// One row: an ordered, owned sequence of fields.
///
/// Field names are expected to be unique within a record; this is not
/// enforced here.
#[derive(Debug, Clone, Default)]
pub struct Record {
    fields: Vec<Field>,
}

impl Record {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    pub fn push_back(&mut self, field: Field) {
        self.fields.push(field);
    }

    pub fn pop_back(&mut self) -> Option<Field> {
        self.fields.pop()
    }

    pub fn clear(&mut self) {
        self.fields.clear();
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn get(&self, index: usize) -> Option<&Field> {
        self.fields.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Field> {
        self.fields.get_mut(index)
    }

    pub fn find(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name() == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.iter_mut().find(|f| f.name() == name)
    }

    /// Field by name, failing with `InvalidQuery` if absent.
    pub fn at(&self, name: &str) -> DbResult<&Field> {
        self.find(name)
            .ok_or_else(|| DbError::invalid_query(format!("Record has no field '{}'", name)))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Field> {
        self.fields.iter()
    }
}

impl Index<usize> for Record {
    type Output = Field;

    fn index(&self, index: usize) -> &Self::Output {
        &self.fields[index]
    }
}

impl IndexMut<usize> for Record {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.fields[index]
    }
}

/// Field-set equality: same fields, in any order.
impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .fields
                .iter()
                .all(|field| other.find(field.name()) == Some(field))
    }
}

impl From<Vec<Field>> for Record {
    fn from(fields: Vec<Field>) -> Self {
        Self { fields }
    }
}

impl FromIterator<Field> for Record {
    fn from_iter<I: IntoIterator<Item = Field>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Record {
    type Item = Field;
    type IntoIter = std::vec::IntoIter<Field>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl<'a> IntoIterator for &'a Record {
    type Item = &'a Field;
    type IntoIter = std::slice::Iter<'a, Field>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

/// Read-only, backend-native row with text-only extraction.
pub trait ViewRecord: Send + Sync {
    /// Number of columns in the row.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Column value by position as text; `Ok(None)` for SQL NULL.
    fn extract(&self, index: usize) -> DbResult<Option<String>>;

    /// Column value by name as text; `Ok(None)` for SQL NULL.
    fn extract_by_name(&self, name: &str) -> DbResult<Option<String>>;
}

/// Capability set of higher-layer record types stored through the core.
pub trait RecordConvertible: Sized {
    fn to_record(&self) -> Record;

    fn from_record(record: &Record) -> DbResult<Self>;
}
