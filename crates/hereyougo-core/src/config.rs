//! Database configuration.
//!
//! Accepts either a PDO-style DSN (`mysql:host=localhost;dbname=hereyougo`)
//! or its discrete parts, and is deserializable from the `db` section of
//! the application configuration.

use crate::error::{ConfigError, Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

/// Database connection configuration.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Full DSN, takes priority over the discrete parts
    pub dsn: Option<String>,
    /// Driver name used when no DSN is given
    #[serde(alias = "type")]
    pub driver: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dbname: Option<String>,
    pub charset: Option<String>,
    pub user: Option<String>,
    #[serde(alias = "passwd")]
    pub password: Option<String>,
    /// Driver specific options
    pub options: BTreeMap<String, String>,
}

impl DatabaseConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the JSON rendering of a configuration section.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| {
            Error::Config(ConfigError {
                message: format!("malformed database configuration: {}", e),
                source: Some(Box::new(e)),
            })
        })
    }

    pub fn dsn(mut self, dsn: impl Into<String>) -> Self {
        self.dsn = Some(dsn.into());
        self
    }

    pub fn driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = Some(driver.into());
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn dbname(mut self, dbname: impl Into<String>) -> Self {
        self.dbname = Some(dbname.into());
        self
    }

    pub fn charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = Some(charset.into());
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// The DSN, assembled from the discrete parts when not given verbatim.
    pub fn data_source(&self) -> Result<String> {
        if let Some(dsn) = &self.dsn {
            return Ok(dsn.clone());
        }
        let driver = self
            .driver
            .as_deref()
            .ok_or_else(|| Error::config("database configuration needs either dsn or type"))?;

        let mut parts = Vec::new();
        if let Some(host) = &self.host {
            parts.push(format!("host={}", host));
        }
        if let Some(dbname) = &self.dbname {
            parts.push(format!("dbname={}", dbname));
        }
        if let Some(port) = self.port {
            parts.push(format!("port={}", port));
        }
        if let Some(charset) = &self.charset {
            parts.push(format!("charset={}", charset));
        }
        Ok(format!("{}:{}", driver, parts.join(";")))
    }

    /// Driver name, the DSN part before the first `:`.
    pub fn driver_name(&self) -> Result<String> {
        let dsn = self.data_source()?;
        match dsn.split_once(':') {
            Some((driver, _)) if !driver.trim().is_empty() => Ok(driver.trim().to_lowercase()),
            _ => Err(Error::config(format!("DSN has no driver prefix: {}", dsn))),
        }
    }

    /// Database name from the DSN `dbname=` attribute.
    pub fn database_name(&self) -> Option<String> {
        let dsn = self.data_source().ok()?;
        let (_, attributes) = dsn.split_once(':')?;
        attributes
            .split(';')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| key.trim() == "dbname")
            .map(|(_, value)| value.trim().to_string())
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("dsn", &self.dsn)
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("charset", &self.charset)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dsn_from_parts() {
        let config = DatabaseConfig::new()
            .driver("mysql")
            .host("localhost")
            .dbname("hereyougo")
            .port(3306);
        assert_eq!(
            config.data_source().unwrap(),
            "mysql:host=localhost;dbname=hereyougo;port=3306"
        );
        assert_eq!(config.driver_name().unwrap(), "mysql");
        assert_eq!(config.database_name().as_deref(), Some("hereyougo"));
    }

    #[test]
    fn verbatim_dsn_wins() {
        let config = DatabaseConfig::from_json(
            r#"{"dsn": "MySQL:host=db;dbname=trips", "user": "hereyougo", "passwd": "foobar"}"#,
        )
        .unwrap();
        assert_eq!(config.driver_name().unwrap(), "mysql");
        assert_eq!(config.database_name().as_deref(), Some("trips"));
        assert_eq!(config.password.as_deref(), Some("foobar"));
    }

    #[test]
    fn missing_driver_is_config_error() {
        let err = DatabaseConfig::new().host("x").driver_name().unwrap_err();
        assert_eq!(err.code(), "bad_config");
        assert!(DatabaseConfig::from_json("{").is_err());
    }

    #[test]
    fn debug_redacts_password() {
        let config = DatabaseConfig::new().dsn("mysql:host=x").password("foobar");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("foobar"));
        assert!(rendered.contains("<redacted>"));
    }
}
