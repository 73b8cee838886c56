use crate::error::DbResult;
use crate::models::{Conditions, FieldValue};

/// SQL fragments compiled from [`Conditions`].
///
/// Each clause is either empty or starts with a space, so they can be
/// appended to a statement in order. `params` are bound positionally.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledConditions {
    pub where_clause: String,
    pub order_clause: String,
    pub limit_clause: String,
    pub params: Vec<FieldValue>,
}

impl CompiledConditions {
    /// `WHERE`, `ORDER BY` and `LIMIT` clauses in statement order.
    pub fn suffix(&self) -> String {
        format!(
            "{}{}{}",
            self.where_clause, self.order_clause, self.limit_clause
        )
    }
}

/// Turns backend-agnostic conditions into dialect-specific SQL.
pub trait ConditionCompiler: Send + Sync {
    /// Compile every part of `conditions` for a `SELECT`.
    ///
    /// `search_fields` are the table's registered search fields; they must be
    /// non-empty when the conditions carry a pattern or similarity condition.
    fn compile(
        &self,
        conditions: &Conditions,
        search_fields: &[String],
    ) -> DbResult<CompiledConditions>;

    /// Compile only the filtering part (field and pattern conditions), for
    /// statements that cannot order or page such as `DELETE` and `COUNT`.
    fn compile_filter(
        &self,
        conditions: &Conditions,
        search_fields: &[String],
    ) -> DbResult<CompiledConditions>;

    /// Get the parameter placeholder for the given index
    ///
    /// For example:
    /// - PostgreSQL: $1, $2, $3...
    fn get_param_placeholder(&self, index: usize) -> String;

    /// Searchable text document built from the search fields.
    fn search_document(&self, search_fields: &[String]) -> DbResult<String>;
}
