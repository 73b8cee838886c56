use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{DbError, DbErrorCode, DbResult};

lazy_static! {
    static ref IDENTIFIER: Regex =
        Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("valid identifier regex");
}

/// PostgreSQL truncates identifiers beyond this many bytes.
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

pub fn is_valid_identifier(name: &str) -> bool {
    name.len() <= MAX_IDENTIFIER_LENGTH && IDENTIFIER.is_match(name)
}

/// Reject anything that is not a plain SQL identifier.
///
/// Every table and column name interpolated into SQL text goes through here
/// first; values are always bound.
pub fn validate_identifier(name: &str) -> DbResult<()> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(DbError::invalid_identifier(
            DbErrorCode::InvalidQuery,
            format!("Invalid identifier: '{}'", name),
        ))
    }
}

pub fn validate_identifiers<'a, I>(names: I) -> DbResult<()>
where
    I: IntoIterator<Item = &'a str>,
{
    names.into_iter().try_for_each(validate_identifier)
}

/// Validate and double-quote an identifier.
pub fn quote_identifier(name: &str) -> DbResult<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name))
}

/// Validate and quote a list of identifiers, joined with `", "`.
pub fn quote_identifier_list<S: AsRef<str>>(names: &[S]) -> DbResult<String> {
    let quoted = names
        .iter()
        .map(|name| quote_identifier(name.as_ref()))
        .collect::<DbResult<Vec<_>>>()?;
    Ok(quoted.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        for name in ["test_table", "_private", "Medicaments2", "a"] {
            assert!(is_valid_identifier(name), "{} should be valid", name);
        }
    }

    #[test]
    fn test_invalid_identifiers() {
        for name in [
            "",
            "1bad",
            "1bad name; DROP TABLE x",
            "name with space",
            "quote\"d",
            "semi;colon",
            "dash-ed",
        ] {
            let err = validate_identifier(name).unwrap_err();
            assert_eq!(err.code(), DbErrorCode::InvalidQuery);
            assert!(matches!(err, DbError::InvalidIdentifier { .. }));
        }
        assert!(!is_valid_identifier(&"x".repeat(MAX_IDENTIFIER_LENGTH + 1)));
    }

    #[test]
    fn test_quote_identifier_list() {
        assert_eq!(
            quote_identifier_list(&["id", "name"]).unwrap(),
            "\"id\", \"name\""
        );
        assert!(quote_identifier_list(&["id", "bad name"]).is_err());
    }
}
