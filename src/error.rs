use std::fmt;
use thiserror::Error;

/// Stable integer error space shared by every storage backend.
///
/// The hundreds digit is the class: 2xx success, 4xx caller/query errors,
/// 5xx backend/operational errors, 6xx internal errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum DbErrorCode {
    Success = 200,

    InvalidQuery = 400,
    PermissionDenied = 403,
    RecordNotFound = 404,
    DuplicateRecord = 409,
    DataConversionError = 412,
    InvalidData = 413,
    ConstraintViolation = 422,

    ConnectionFailed = 500,
    DisconnectionFailed = 501,
    QueryExecutionFailed = 502,
    PreparedStatementFailed = 503,
    TransactionStartFailed = 504,
    TransactionCommitFailed = 505,
    TransactionRollbackFailed = 506,
    ConnectionTimeout = 507,
    ConnectionPoolExhausted = 508,
    DeadlockDetected = 509,
    SystemRollback = 510,

    NullPointerException = 600,
    UnknownError = 601,
}

impl DbErrorCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        use DbErrorCode::*;
        let code = match value {
            200 => Success,
            400 => InvalidQuery,
            403 => PermissionDenied,
            404 => RecordNotFound,
            409 => DuplicateRecord,
            412 => DataConversionError,
            413 => InvalidData,
            422 => ConstraintViolation,
            500 => ConnectionFailed,
            501 => DisconnectionFailed,
            502 => QueryExecutionFailed,
            503 => PreparedStatementFailed,
            504 => TransactionStartFailed,
            505 => TransactionCommitFailed,
            506 => TransactionRollbackFailed,
            507 => ConnectionTimeout,
            508 => ConnectionPoolExhausted,
            509 => DeadlockDetected,
            510 => SystemRollback,
            600 => NullPointerException,
            601 => UnknownError,
            _ => return None,
        };
        Some(code)
    }

    pub fn is_success(self) -> bool {
        self.as_u16() / 100 == 2
    }

    pub fn is_client_error(self) -> bool {
        self.as_u16() / 100 == 4
    }

    pub fn is_backend_error(self) -> bool {
        self.as_u16() / 100 == 5
    }

    pub fn is_internal_error(self) -> bool {
        self.as_u16() / 100 == 6
    }
}

impl fmt::Display for DbErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(decode_error(*self))
    }
}

/// Fixed human-readable message for an error code.
pub fn decode_error(code: DbErrorCode) -> &'static str {
    match code {
        DbErrorCode::Success => "200: Operation succeeded.",
        DbErrorCode::InvalidQuery => "400: Invalid query syntax.",
        DbErrorCode::PermissionDenied => "403: Permission denied.",
        DbErrorCode::RecordNotFound => "404: No records found.",
        DbErrorCode::DuplicateRecord => "409: Duplicate record exists.",
        DbErrorCode::DataConversionError => "412: Data conversion error.",
        DbErrorCode::InvalidData => "413: Invalid data.",
        DbErrorCode::ConstraintViolation => "422: Constraint violation occurred.",
        DbErrorCode::ConnectionFailed => "500: Failed to connect to the database.",
        DbErrorCode::DisconnectionFailed => "501: Failed to disconnect from the database.",
        DbErrorCode::QueryExecutionFailed => "502: Failed to execute the query.",
        DbErrorCode::PreparedStatementFailed => "503: Failed to prepare the statement.",
        DbErrorCode::TransactionStartFailed => "504: Failed to start the transaction.",
        DbErrorCode::TransactionCommitFailed => "505: Failed to commit the transaction.",
        DbErrorCode::TransactionRollbackFailed => "506: Failed to rollback the transaction.",
        DbErrorCode::ConnectionTimeout => "507: Connection to the database timed out.",
        DbErrorCode::ConnectionPoolExhausted => "508: Connection pool exhausted.",
        DbErrorCode::DeadlockDetected => "509: Deadlock detected.",
        DbErrorCode::SystemRollback => "510: Transaction rolled back by the server.",
        DbErrorCode::NullPointerException => "600: Null pointer exception.",
        DbErrorCode::UnknownError => "601: Unknown database error.",
    }
}

/// Error taxonomy surfaced across the storage contract boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DbError {
    #[error("ConnectionException: {message} ({code})")]
    Connection { code: DbErrorCode, message: String },

    #[error("QueryException: {message} ({code})")]
    Query { code: DbErrorCode, message: String },

    #[error("TransactionException: {message} ({code})")]
    Transaction { code: DbErrorCode, message: String },

    #[error("InvalidIdentifierException: {message} ({code})")]
    InvalidIdentifier { code: DbErrorCode, message: String },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl DbError {
    pub fn connection(code: DbErrorCode, message: impl Into<String>) -> Self {
        DbError::Connection {
            code,
            message: message.into(),
        }
    }

    pub fn query(code: DbErrorCode, message: impl Into<String>) -> Self {
        DbError::Query {
            code,
            message: message.into(),
        }
    }

    pub fn transaction(code: DbErrorCode, message: impl Into<String>) -> Self {
        DbError::Transaction {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_identifier(code: DbErrorCode, message: impl Into<String>) -> Self {
        DbError::InvalidIdentifier {
            code,
            message: message.into(),
        }
    }

    /// Shorthand for the value-model type check failure.
    pub fn data_conversion(message: impl Into<String>) -> Self {
        DbError::query(DbErrorCode::DataConversionError, message)
    }

    /// Shorthand for a malformed request that never reached the backend.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        DbError::query(DbErrorCode::InvalidQuery, message)
    }

    pub fn code(&self) -> DbErrorCode {
        match self {
            DbError::Connection { code, .. }
            | DbError::Query { code, .. }
            | DbError::Transaction { code, .. }
            | DbError::InvalidIdentifier { code, .. } => *code,
            DbError::Configuration(_) => DbErrorCode::InvalidData,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            DbError::Connection { message, .. }
            | DbError::Query { message, .. }
            | DbError::Transaction { message, .. }
            | DbError::InvalidIdentifier { message, .. } => message,
            DbError::Configuration(message) => message,
        }
    }

    pub fn is_transaction_error(&self) -> bool {
        matches!(self, DbError::Transaction { .. })
    }
}

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        DbError::query(DbErrorCode::UnknownError, err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::data_conversion(err.to_string())
    }
}

pub type DbResult<T> = Result<T, DbError>;

/// Translate a driver error into the taxonomy, keeping the driver message.
///
/// SQLSTATE classes drive the mapping; see PostgreSQL appendix A.
pub fn map_sqlx_error(error: sqlx::Error) -> DbError {
    match &error {
        sqlx::Error::Database(db_err) => {
            let message = db_err.message().to_string();
            let state = db_err.code().map(|c| c.to_string()).unwrap_or_default();
            let code = sqlstate_to_code(&state);
            match state.get(..2) {
                Some("40") => DbError::transaction(code, message),
                Some("08") | Some("28") | Some("53") | Some("57") => {
                    DbError::connection(code, message)
                }
                _ => DbError::query(code, message),
            }
        }
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::Protocol(_) => {
            DbError::connection(DbErrorCode::ConnectionFailed, error.to_string())
        }
        sqlx::Error::Configuration(_) => {
            DbError::connection(DbErrorCode::ConnectionFailed, error.to_string())
        }
        sqlx::Error::PoolTimedOut => {
            DbError::connection(DbErrorCode::ConnectionTimeout, error.to_string())
        }
        sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => {
            DbError::connection(DbErrorCode::DisconnectionFailed, error.to_string())
        }
        sqlx::Error::RowNotFound => {
            DbError::invalid_identifier(DbErrorCode::RecordNotFound, error.to_string())
        }
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnIndexOutOfBounds { .. } => {
            DbError::data_conversion(error.to_string())
        }
        _ => DbError::query(DbErrorCode::QueryExecutionFailed, error.to_string()),
    }
}

/// Map a five-character SQLSTATE to an error code.
pub fn sqlstate_to_code(state: &str) -> DbErrorCode {
    match state {
        "40P01" => DbErrorCode::DeadlockDetected,
        "23505" => DbErrorCode::ConstraintViolation,
        "42501" => DbErrorCode::PermissionDenied,
        "53300" => DbErrorCode::ConnectionPoolExhausted,
        "42P01" => DbErrorCode::InvalidQuery,
        _ => match state.get(..2) {
            Some("40") => DbErrorCode::SystemRollback,
            Some("23") => DbErrorCode::ConstraintViolation,
            Some("42") => DbErrorCode::InvalidQuery,
            Some("22") => DbErrorCode::InvalidData,
            Some("08") => DbErrorCode::ConnectionFailed,
            Some("28") => DbErrorCode::PermissionDenied,
            Some("53") => DbErrorCode::ConnectionPoolExhausted,
            Some("57") => DbErrorCode::ConnectionFailed,
            Some("25") => DbErrorCode::TransactionStartFailed,
            _ => DbErrorCode::QueryExecutionFailed,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_messages() {
        assert_eq!(decode_error(DbErrorCode::Success), "200: Operation succeeded.");
        assert_eq!(
            decode_error(DbErrorCode::ConnectionPoolExhausted),
            "508: Connection pool exhausted."
        );
        assert_eq!(
            decode_error(DbErrorCode::RecordNotFound),
            "404: No records found."
        );
    }

    #[test]
    fn test_code_classes() {
        assert!(DbErrorCode::Success.is_success());
        assert!(DbErrorCode::DuplicateRecord.is_client_error());
        assert!(DbErrorCode::DeadlockDetected.is_backend_error());
        assert!(DbErrorCode::UnknownError.is_internal_error());
        assert!(!DbErrorCode::InvalidQuery.is_backend_error());
    }

    #[test]
    fn test_code_round_trip_through_integer() {
        for code in [
            DbErrorCode::InvalidQuery,
            DbErrorCode::ConstraintViolation,
            DbErrorCode::TransactionCommitFailed,
            DbErrorCode::NullPointerException,
        ] {
            assert_eq!(DbErrorCode::from_u16(code.as_u16()), Some(code));
        }
        assert_eq!(DbErrorCode::from_u16(299), None);
    }

    #[test]
    fn test_sqlstate_mapping() {
        assert_eq!(sqlstate_to_code("40P01"), DbErrorCode::DeadlockDetected);
        assert_eq!(sqlstate_to_code("40001"), DbErrorCode::SystemRollback);
        assert_eq!(sqlstate_to_code("23505"), DbErrorCode::ConstraintViolation);
        assert_eq!(sqlstate_to_code("23503"), DbErrorCode::ConstraintViolation);
        assert_eq!(sqlstate_to_code("42601"), DbErrorCode::InvalidQuery);
        assert_eq!(sqlstate_to_code("22P02"), DbErrorCode::InvalidData);
        assert_eq!(sqlstate_to_code("XX000"), DbErrorCode::QueryExecutionFailed);
    }

    #[test]
    fn test_error_carries_code_and_message() {
        let err = DbError::invalid_identifier(DbErrorCode::RecordNotFound, "Record not found");
        assert_eq!(err.code(), DbErrorCode::RecordNotFound);
        assert_eq!(err.message(), "Record not found");
        assert!(err.to_string().starts_with("InvalidIdentifierException"));

        let err = DbError::transaction(DbErrorCode::TransactionStartFailed, "already started");
        assert!(err.is_transaction_error());
    }

    #[test]
    fn test_non_database_sqlx_errors() {
        let err = map_sqlx_error(sqlx::Error::PoolTimedOut);
        assert_eq!(err.code(), DbErrorCode::ConnectionTimeout);

        let err = map_sqlx_error(sqlx::Error::RowNotFound);
        assert_eq!(err.code(), DbErrorCode::RecordNotFound);
        assert!(matches!(err, DbError::InvalidIdentifier { .. }));

        let err = map_sqlx_error(sqlx::Error::ColumnNotFound("name".to_string()));
        assert_eq!(err.code(), DbErrorCode::DataConversionError);
    }
}
