use super::super::filter::{CompiledConditions, ConditionCompiler};
use crate::error::{DbError, DbResult};
use crate::models::{Conditions, FieldCondition, FieldValue, Operator};
use crate::utils::quote_identifier;

/// Text-search configuration used by both the index and the queries.
pub const TEXT_SEARCH_CONFIG: &str = "simple";

/// PostgreSQL condition compiler.
///
/// Column names are validated and quoted; every value becomes a `$n`
/// parameter.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresConditionCompiler;

impl PostgresConditionCompiler {
    pub fn new() -> Self {
        Self
    }

    /// `to_tsvector('simple', <document>)`, shared with the index definition.
    pub fn search_vector(&self, search_fields: &[String]) -> DbResult<String> {
        Ok(format!(
            "to_tsvector('{}', {})",
            TEXT_SEARCH_CONFIG,
            self.search_document(search_fields)?
        ))
    }

    fn compile_where(
        &self,
        conditions: &Conditions,
        search_fields: &[String],
        params: &mut Vec<FieldValue>,
    ) -> DbResult<String> {
        let mut predicates = Vec::new();

        for condition in conditions.field_conditions() {
            predicates.push(self.handle_field_condition(condition, params)?);
        }

        if let Some(pattern) = conditions.pattern() {
            let vector = self.search_vector(search_fields)?;
            params.push(FieldValue::Text(pattern.text.clone()));
            predicates.push(format!(
                "{} @@ plainto_tsquery('{}', {})",
                vector,
                TEXT_SEARCH_CONFIG,
                self.get_param_placeholder(params.len())
            ));
        }

        if predicates.is_empty() {
            Ok(String::new())
        } else {
            Ok(format!(" WHERE {}", predicates.join(" AND ")))
        }
    }

    fn handle_field_condition(
        &self,
        condition: &FieldCondition,
        params: &mut Vec<FieldValue>,
    ) -> DbResult<String> {
        let column = quote_identifier(&condition.field)?;

        match &condition.value {
            FieldValue::Null(_) => match condition.op {
                Operator::Eq => Ok(format!("{} IS NULL", column)),
                Operator::Ne => Ok(format!("{} IS NOT NULL", column)),
                op => Err(DbError::invalid_query(format!(
                    "Operator {} cannot compare '{}' with NULL",
                    op, condition.field
                ))),
            },
            FieldValue::Uuid(id) if !id.is_explicit() => Err(DbError::invalid_query(format!(
                "Cannot filter '{}' on an unset identifier",
                condition.field
            ))),
            value => {
                params.push(value.clone());
                Ok(format!(
                    "{} {} {}",
                    column,
                    condition.op.as_sql(),
                    self.get_param_placeholder(params.len())
                ))
            }
        }
    }

    fn compile_order(
        &self,
        conditions: &Conditions,
        search_fields: &[String],
        params: &mut Vec<FieldValue>,
    ) -> DbResult<String> {
        let mut terms = Vec::new();

        if let Some(similarity) = conditions.similarity() {
            let document = self.search_document(search_fields)?;
            params.push(FieldValue::Text(similarity.text.clone()));
            terms.push(format!(
                "({}) <-> {} ASC",
                document,
                self.get_param_placeholder(params.len())
            ));
        }

        for order in conditions.order() {
            terms.push(format!(
                "{} {}",
                quote_identifier(&order.field)?,
                order.direction.as_sql()
            ));
        }

        if terms.is_empty() {
            Ok(String::new())
        } else {
            Ok(format!(" ORDER BY {}", terms.join(", ")))
        }
    }

    fn compile_limit(&self, conditions: &Conditions) -> DbResult<String> {
        match conditions.page() {
            Some(page) => {
                page.validate()?;
                Ok(format!(
                    " LIMIT {} OFFSET {}",
                    page.page_size(),
                    page.offset()
                ))
            }
            None => Ok(String::new()),
        }
    }
}

impl ConditionCompiler for PostgresConditionCompiler {
    fn compile(
        &self,
        conditions: &Conditions,
        search_fields: &[String],
    ) -> DbResult<CompiledConditions> {
        let mut params = Vec::new();
        let where_clause = self.compile_where(conditions, search_fields, &mut params)?;
        let order_clause = self.compile_order(conditions, search_fields, &mut params)?;
        let limit_clause = self.compile_limit(conditions)?;
        Ok(CompiledConditions {
            where_clause,
            order_clause,
            limit_clause,
            params,
        })
    }

    fn compile_filter(
        &self,
        conditions: &Conditions,
        search_fields: &[String],
    ) -> DbResult<CompiledConditions> {
        let mut params = Vec::new();
        let where_clause = self.compile_where(conditions, search_fields, &mut params)?;
        Ok(CompiledConditions {
            where_clause,
            params,
            ..Default::default()
        })
    }

    fn get_param_placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn search_document(&self, search_fields: &[String]) -> DbResult<String> {
        if search_fields.is_empty() {
            return Err(DbError::invalid_query(
                "Search requires registered search fields",
            ));
        }
        let parts = search_fields
            .iter()
            .map(|field| Ok(format!("coalesce({}::text, '')", quote_identifier(field)?)))
            .collect::<DbResult<Vec<_>>>()?;
        Ok(parts.join(" || ' ' || "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbErrorCode;
    use crate::models::{
        FieldCondition, OrderCondition, PageCondition, PatternCondition, SimilarityCondition,
        SqlType,
    };

    fn fields() -> Vec<String> {
        vec!["name".to_string(), "description".to_string()]
    }

    #[test]
    fn test_empty_conditions() {
        let compiled = PostgresConditionCompiler::new()
            .compile(&Conditions::new(), &[])
            .unwrap();
        assert_eq!(compiled.suffix(), "");
        assert!(compiled.params.is_empty());
    }

    #[test]
    fn test_field_conditions_are_anded_in_order() {
        let mut conditions = Conditions::new();
        conditions
            .add_equal("name", "Alice".to_string())
            .add_field_condition(FieldCondition::new("id", Operator::Ge, 10i32));

        let compiled = PostgresConditionCompiler::new()
            .compile(&conditions, &[])
            .unwrap();
        assert_eq!(compiled.where_clause, " WHERE \"name\" = $1 AND \"id\" >= $2");
        assert_eq!(
            compiled.params,
            vec![FieldValue::Text("Alice".to_string()), FieldValue::Int(10)]
        );
    }

    #[test]
    fn test_null_comparisons() {
        let mut conditions = Conditions::new();
        conditions
            .add_field_condition(FieldCondition {
                field: "description".to_string(),
                op: Operator::Eq,
                value: FieldValue::Null(SqlType::Text),
            })
            .add_field_condition(FieldCondition {
                field: "name".to_string(),
                op: Operator::Ne,
                value: FieldValue::Null(SqlType::Text),
            });
        let compiled = PostgresConditionCompiler::new()
            .compile(&conditions, &[])
            .unwrap();
        assert_eq!(
            compiled.where_clause,
            " WHERE \"description\" IS NULL AND \"name\" IS NOT NULL"
        );
        assert!(compiled.params.is_empty());

        let mut conditions = Conditions::new();
        conditions.add_field_condition(FieldCondition {
            field: "id".to_string(),
            op: Operator::Lt,
            value: FieldValue::Null(SqlType::Int),
        });
        assert!(PostgresConditionCompiler::new()
            .compile(&conditions, &[])
            .is_err());
    }

    #[test]
    fn test_invalid_column_is_rejected() {
        let mut conditions = Conditions::new();
        conditions.add_equal("name; DROP TABLE x", 1i32);
        let err = PostgresConditionCompiler::new()
            .compile(&conditions, &[])
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidIdentifier { .. }));
    }

    #[test]
    fn test_pattern_condition() {
        let mut conditions = Conditions::new();
        conditions.add_equal("id", 1i32);
        conditions
            .add_pattern_condition(PatternCondition::new("fruit"))
            .unwrap();

        let compiled = PostgresConditionCompiler::new()
            .compile(&conditions, &fields())
            .unwrap();
        assert_eq!(
            compiled.where_clause,
            " WHERE \"id\" = $1 AND to_tsvector('simple', coalesce(\"name\"::text, '') || ' ' || coalesce(\"description\"::text, '')) @@ plainto_tsquery('simple', $2)"
        );
        assert_eq!(compiled.params[1], FieldValue::Text("fruit".to_string()));
    }

    #[test]
    fn test_pattern_without_search_fields() {
        let mut conditions = Conditions::new();
        conditions
            .add_pattern_condition(PatternCondition::new("fruit"))
            .unwrap();
        let err = PostgresConditionCompiler::new()
            .compile(&conditions, &[])
            .unwrap_err();
        assert_eq!(err.code(), DbErrorCode::InvalidQuery);
    }

    #[test]
    fn test_similarity_orders_before_explicit_order() {
        let mut conditions = Conditions::new();
        conditions
            .add_similarity_condition(SimilarityCondition::new("An sweet"))
            .unwrap();
        conditions.add_order_condition(OrderCondition::desc("id"));
        conditions.set_page_condition(PageCondition::new(2));

        let compiled = PostgresConditionCompiler::new()
            .compile(&conditions, &fields())
            .unwrap();
        assert_eq!(compiled.where_clause, "");
        assert_eq!(
            compiled.order_clause,
            " ORDER BY (coalesce(\"name\"::text, '') || ' ' || coalesce(\"description\"::text, '')) <-> $1 ASC, \"id\" DESC"
        );
        assert_eq!(compiled.limit_clause, " LIMIT 2 OFFSET 0");
    }

    #[test]
    fn test_paging() {
        let mut conditions = Conditions::new();
        conditions.set_page_condition(PageCondition::with_page(150, 4));
        let compiled = PostgresConditionCompiler::new()
            .compile(&conditions, &[])
            .unwrap();
        assert_eq!(compiled.limit_clause, " LIMIT 150 OFFSET 450");

        conditions.set_page_condition(PageCondition::with_page(150, 0));
        assert!(PostgresConditionCompiler::new()
            .compile(&conditions, &[])
            .is_err());
    }

    #[test]
    fn test_filter_ignores_order_and_page() {
        let mut conditions = Conditions::new();
        conditions.add_equal("id", 3i32);
        conditions.add_order_condition(OrderCondition::asc("name"));
        conditions.set_page_condition(PageCondition::new(10));

        let compiled = PostgresConditionCompiler::new()
            .compile_filter(&conditions, &[])
            .unwrap();
        assert_eq!(compiled.suffix(), " WHERE \"id\" = $1");
    }
}
