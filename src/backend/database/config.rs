use url::Url;

use crate::error::{DbError, DbResult};

/// Database used for maintenance connections (database creation).
pub const MAINTENANCE_DATABASE: &str = "template1";

/// Parameters of one physical PostgreSQL connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgConnectParams {
    pub host: String,
    pub port: u16,
    pub db_name: String,
    pub login: String,
    pub password: String,
}

impl PgConnectParams {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        db_name: impl Into<String>,
        login: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            db_name: db_name.into(),
            login: login.into(),
            password: password.into(),
        }
    }

    /// Same server and credentials, different database.
    pub fn for_database(&self, db_name: impl Into<String>) -> Self {
        Self {
            db_name: db_name.into(),
            ..self.clone()
        }
    }

    /// Parameters for the maintenance connection.
    pub fn maintenance(&self) -> Self {
        self.for_database(MAINTENANCE_DATABASE)
    }

    /// Build a `postgres://` URL with user info and database percent-encoded.
    pub fn make_connect_string(&self) -> DbResult<String> {
        self.validate()?;

        let mut url = Url::parse("postgres://localhost")
            .map_err(|e| DbError::Configuration(format!("Invalid base URL: {}", e)))?;
        url.set_host(Some(&self.host))
            .map_err(|e| DbError::Configuration(format!("Invalid host '{}': {}", self.host, e)))?;
        url.set_port(Some(self.port))
            .map_err(|_| DbError::Configuration(format!("Invalid port {}", self.port)))?;
        url.set_username(&self.login)
            .map_err(|_| DbError::Configuration(format!("Invalid login '{}'", self.login)))?;
        if !self.password.is_empty() {
            url.set_password(Some(&self.password))
                .map_err(|_| DbError::Configuration("Invalid password".to_string()))?;
        }
        url.set_path(&self.db_name);

        Ok(url.to_string())
    }

    pub fn validate(&self) -> DbResult<()> {
        if self.host.is_empty() {
            return Err(DbError::Configuration("Host cannot be empty".to_string()));
        }
        if self.port == 0 {
            return Err(DbError::Configuration(
                "Port must be greater than 0".to_string(),
            ));
        }
        if self.db_name.is_empty() {
            return Err(DbError::Configuration(
                "Database name cannot be empty".to_string(),
            ));
        }
        if self.login.is_empty() {
            return Err(DbError::Configuration("Login cannot be empty".to_string()));
        }
        Ok(())
    }
}

impl Default for PgConnectParams {
    fn default() -> Self {
        Self::new("localhost", 5432, "postgres", "postgres", "")
    }
}
