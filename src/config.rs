use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::backend::database::PgConnectParams;
use crate::error::{DbError, DbResult};

lazy_static! {
    static ref ENV_VAR: Regex =
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("valid env var regex");
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub database: String,
    pub login: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default)]
    pub create_database_if_missing: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_port() -> u16 {
    5432
}

fn default_pool_size() -> usize {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DatabaseConfig {
    /// Load configuration from a YAML file, expanding `${VAR}` references first.
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> DbResult<Self> {
        let path = config_path.as_ref();

        if !path.exists() {
            return Err(DbError::Configuration(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let content = fs::read_to_string(path).map_err(|e| {
            DbError::Configuration(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
            .map_err(|e| DbError::Configuration(format!("{}: {}", path.display(), e.message())))
    }

    pub fn from_yaml(content: &str) -> DbResult<Self> {
        let expanded = expand_env_vars(content)?;
        let config: DatabaseConfig = serde_yaml::from_str(&expanded)
            .map_err(|e| DbError::Configuration(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> DbResult<()> {
        if self.pool_size == 0 {
            return Err(DbError::Configuration(
                "Pool size must be greater than 0".to_string(),
            ));
        }
        self.connect_params().validate()
    }

    pub fn connect_params(&self) -> PgConnectParams {
        PgConnectParams::new(
            self.host.clone(),
            self.port,
            self.database.clone(),
            self.login.clone(),
            self.password.clone(),
        )
    }
}

/// Expand environment variables in format ${VAR_NAME} or ${VAR_NAME:-default}
pub fn expand_env_vars(content: &str) -> DbResult<String> {
    let mut missing = None;
    let expanded = ENV_VAR.replace_all(content, |caps: &Captures| {
        let name = &caps[1];
        match std::env::var(name) {
            Ok(value) => value,
            Err(_) => match caps.get(2) {
                Some(default) => default.as_str().to_string(),
                None => {
                    missing.get_or_insert_with(|| name.to_string());
                    String::new()
                }
            },
        }
    });

    match missing {
        Some(name) => Err(DbError::Configuration(format!(
            "Environment variable {} not found and no default provided",
            name
        ))),
        None => Ok(expanded.into_owned()),
    }
}
