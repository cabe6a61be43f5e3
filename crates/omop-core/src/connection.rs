//! Connection configuration file.

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use omop_model::EtlError;
use serde::{Deserialize, Serialize};

const DEFAULT_PORT: u16 = 5432;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dbms {
    Postgresql,
    Duckdb,
}

impl fmt::Display for Dbms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Dbms::Postgresql => "postgresql",
            Dbms::Duckdb => "duckdb",
        })
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// `{dbms, server, port?, dbname, user, password, schema?}`
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub dbms: Dbms,
    pub server: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    #[serde(default)]
    pub schema: Option<String>,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("dbms", &self.dbms)
            .field("server", &self.server)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("user", &self.user)
            .field("password", &"***")
            .field("schema", &self.schema)
            .finish()
    }
}

impl ConnectionConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read connection file: {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("parse connection file: {}", path.display()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations no linked driver can serve.
    pub fn validate(&self) -> std::result::Result<(), EtlError> {
        match self.dbms {
            Dbms::Postgresql => {}
            Dbms::Duckdb => {
                return Err(EtlError::FatalSetup(
                    "dbms \"duckdb\" is not supported by this build; use postgresql".to_string(),
                ));
            }
        }
        if self.server.trim().is_empty() || self.dbname.trim().is_empty() {
            return Err(EtlError::FatalSetup(
                "connection file needs a server and a dbname".to_string(),
            ));
        }
        Ok(())
    }

    /// `host:port/dbname`, for log messages.
    pub fn target(&self) -> String {
        format!("{}:{}/{}", self.server, self.port, self.dbname)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_defaults_and_password_is_hidden() {
        let config = ConnectionConfig::from_json(
            r#"{"dbms":"postgresql","server":"db","dbname":"cdm","user":"etl","password":"secret"}"#,
        )
        .unwrap();
        assert_eq!(config.port, 5432);
        assert_eq!(config.target(), "db:5432/cdm");
        assert!(!format!("{config:?}").contains("secret"));
    }

    #[test]
    fn duckdb_is_rejected() {
        let err = ConnectionConfig::from_json(
            r#"{"dbms":"duckdb","server":"x","dbname":"y","user":"u","password":"p"}"#,
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EtlError>(),
            Some(EtlError::FatalSetup(_))
        ));
    }
}
