//! Value and predicate model shared by every backend.

pub mod conditions;
pub mod field;
pub mod record;

pub use conditions::{
    Conditions, FieldCondition, Operator, OrderCondition, OrderDirection, PageCondition,
    PatternCondition, SimilarityCondition,
};
pub use field::{Field, FieldType, FieldValue, Identifier, SqlType};
pub use record::{Record, RecordConvertible, ViewRecord};
