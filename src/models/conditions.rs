use std::fmt;

use super::field::{Field, FieldType, FieldValue};
use crate::error::{DbError, DbResult};

/// Comparison operator of a [`FieldCondition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    ILike,
}

impl Operator {
    pub fn as_sql(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "<>",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Like => "LIKE",
            Operator::ILike => "ILIKE",
        }
    }

    /// Parse either the SQL symbol or the two-letter mnemonic (`eq`, `ne`, ...).
    pub fn parse(s: &str) -> Option<Operator> {
        match s.to_lowercase().as_str() {
            "=" | "==" | "eq" => Some(Operator::Eq),
            "<>" | "!=" | "ne" => Some(Operator::Ne),
            "<" | "lt" => Some(Operator::Lt),
            "<=" | "le" => Some(Operator::Le),
            ">" | "gt" => Some(Operator::Gt),
            ">=" | "ge" => Some(Operator::Ge),
            "like" => Some(Operator::Like),
            "ilike" => Some(Operator::ILike),
            _ => None,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// `<field> <op> <value>`; the field name is the column, the field value is bound.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldCondition {
    pub field: String,
    pub op: Operator,
    pub value: FieldValue,
}

impl FieldCondition {
    pub fn new<T: FieldType>(field: impl Into<String>, op: Operator, value: T) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into_value(),
        }
    }

    pub fn from_field(field: &Field, op: Operator) -> Self {
        Self {
            field: field.name().to_string(),
            op,
            value: field.value().clone(),
        }
    }
}

/// Full-text predicate over the table's registered search fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternCondition {
    pub text: String,
}

impl PatternCondition {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Trigram ranking over the search fields; orders rows, never filters them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimilarityCondition {
    pub text: String,
}

impl SimilarityCondition {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderDirection {
    #[default]
    Ascending,
    Descending,
}

impl OrderDirection {
    pub fn from_str(s: &str) -> OrderDirection {
        match s.to_lowercase().as_str() {
            "descending" | "desc" => OrderDirection::Descending,
            _ => OrderDirection::Ascending,
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            OrderDirection::Ascending => "ASC",
            OrderDirection::Descending => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderCondition {
    pub field: String,
    pub direction: OrderDirection,
}

impl OrderCondition {
    pub fn new(field: impl Into<String>, direction: OrderDirection) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }

    pub fn asc(field: impl Into<String>) -> Self {
        Self::new(field, OrderDirection::Ascending)
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self::new(field, OrderDirection::Descending)
    }

    /// Build from a column name and an optional direction keyword.
    pub fn from_params(field: Option<&str>, direction: Option<&str>) -> Option<OrderCondition> {
        field.map(|name| {
            let direction = direction
                .map(OrderDirection::from_str)
                .unwrap_or(OrderDirection::Ascending);
            OrderCondition::new(name, direction)
        })
    }
}

/// One-based page of `page_size` rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCondition {
    page_size: u32,
    page_number: u32,
}

impl PageCondition {
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size,
            page_number: 1,
        }
    }

    pub fn with_page(page_size: u32, page_number: u32) -> Self {
        Self {
            page_size,
            page_number,
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn page_number(&self) -> u32 {
        self.page_number
    }

    pub fn set_page_number(&mut self, page_number: u32) {
        self.page_number = page_number;
    }

    pub fn next_page(&mut self) {
        self.page_number = self.page_number.saturating_add(1);
    }

    pub fn validate(&self) -> DbResult<()> {
        if self.page_size == 0 {
            return Err(DbError::invalid_query("Page size must be greater than 0"));
        }
        if self.page_number == 0 {
            return Err(DbError::invalid_query("Page numbers start at 1"));
        }
        Ok(())
    }

    /// Rows to skip before this page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page_number.saturating_sub(1)) * u64::from(self.page_size)
    }

    /// Number of pages needed for `total` rows.
    pub fn page_count(&self, total: u64) -> u64 {
        if self.page_size == 0 {
            return 0;
        }
        total.div_ceil(u64::from(self.page_size))
    }
}

/// Everything a query needs to know about which rows it targets.
///
/// Field conditions are ANDed in insertion order. Only one pattern and one
/// similarity condition may be set at a time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conditions {
    fields: Vec<FieldCondition>,
    pattern: Option<PatternCondition>,
    similarity: Option<SimilarityCondition>,
    order: Vec<OrderCondition>,
    page: Option<PageCondition>,
}

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_field_condition(&mut self, condition: FieldCondition) -> &mut Self {
        self.fields.push(condition);
        self
    }

    /// Shorthand for `field = value`.
    pub fn add_equal<T: FieldType>(&mut self, field: impl Into<String>, value: T) -> &mut Self {
        self.add_field_condition(FieldCondition::new(field, Operator::Eq, value))
    }

    pub fn add_pattern_condition(&mut self, condition: PatternCondition) -> DbResult<&mut Self> {
        if self.pattern.is_some() {
            return Err(DbError::invalid_query(
                "A pattern condition is already set; pop it first",
            ));
        }
        self.pattern = Some(condition);
        Ok(self)
    }

    pub fn pop_pattern_condition(&mut self) -> Option<PatternCondition> {
        self.pattern.take()
    }

    pub fn add_similarity_condition(
        &mut self,
        condition: SimilarityCondition,
    ) -> DbResult<&mut Self> {
        if self.similarity.is_some() {
            return Err(DbError::invalid_query(
                "A similarity condition is already set; pop it first",
            ));
        }
        self.similarity = Some(condition);
        Ok(self)
    }

    pub fn pop_similarity_condition(&mut self) -> Option<SimilarityCondition> {
        self.similarity.take()
    }

    pub fn add_order_condition(&mut self, condition: OrderCondition) -> &mut Self {
        self.order.push(condition);
        self
    }

    /// Sets or replaces the page.
    pub fn set_page_condition(&mut self, page: PageCondition) -> &mut Self {
        self.page = Some(page);
        self
    }

    pub fn clear_page_condition(&mut self) -> Option<PageCondition> {
        self.page.take()
    }

    pub fn field_conditions(&self) -> &[FieldCondition] {
        &self.fields
    }

    pub fn pattern(&self) -> Option<&PatternCondition> {
        self.pattern.as_ref()
    }

    pub fn similarity(&self) -> Option<&SimilarityCondition> {
        self.similarity.as_ref()
    }

    pub fn order(&self) -> &[OrderCondition] {
        &self.order
    }

    pub fn page(&self) -> Option<&PageCondition> {
        self.page.as_ref()
    }

    pub fn page_mut(&mut self) -> Option<&mut PageCondition> {
        self.page.as_mut()
    }

    /// Whether the conditions need registered search fields.
    pub fn needs_search_fields(&self) -> bool {
        self.pattern.is_some() || self.similarity.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
            && self.pattern.is_none()
            && self.similarity.is_none()
            && self.order.is_empty()
            && self.page.is_none()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
