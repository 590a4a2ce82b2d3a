//! Error types for entity layer operations.
//!
//! Every error carries a stable machine code ([`Error::code`]) and a public
//! detail payload ([`Error::details`]) that presentation layers may print or
//! serialize. Payloads never include credentials or bound parameter values.

use serde_json::json;
use std::fmt;

/// The primary error type for all entity layer operations.
#[derive(Debug)]
pub enum Error {
    /// Internal schema/model inconsistency (bad declaration, index conflict,
    /// ambiguous primary key match)
    Broken(BrokenError),
    /// No row matches a requested primary key
    NotFound(NotFoundError),
    /// A value does not have the expected shape
    BadType(BadTypeError),
    /// Underlying database call failed
    Database(DatabaseError),
    /// Configuration errors
    Config(ConfigError),
}

#[derive(Debug)]
pub struct BrokenError {
    /// What is broken, usually `Class` or `Class->property`
    pub what: String,
    pub reason: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct NotFoundError {
    pub class: String,
    /// The selector that matched nothing (normalized primary key)
    pub selector: serde_json::Value,
}

#[derive(Debug)]
pub struct BadTypeError {
    pub what: String,
    pub expected: String,
    pub actual: Option<String>,
}

#[derive(Debug)]
pub struct DatabaseError {
    /// Connection method that failed (`query`, `execute`, `last_insert_id`)
    pub method: &'static str,
    /// Connection identifier, `dbi#<id>`
    pub target: String,
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Shorthand for a [`BrokenError`] without source.
    pub fn broken(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Broken(BrokenError {
            what: what.into(),
            reason: reason.into(),
            source: None,
        })
    }

    pub fn not_found(class: impl Into<String>, selector: serde_json::Value) -> Self {
        Error::NotFound(NotFoundError {
            class: class.into(),
            selector,
        })
    }

    pub fn bad_type(what: impl Into<String>, expected: impl Into<String>) -> Self {
        Error::BadType(BadTypeError {
            what: what.into(),
            expected: expected.into(),
            actual: None,
        })
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            message: message.into(),
            source: None,
        })
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Broken(_) => "broken_model",
            Error::NotFound(_) => "entity_not_found",
            Error::BadType(_) => "bad_type",
            Error::Database(_) => "dbi_call_failed",
            Error::Config(_) => "bad_config",
        }
    }

    /// Public detail payload.
    pub fn details(&self) -> serde_json::Value {
        match self {
            Error::Broken(e) => json!({ "what": e.what, "reason": e.reason }),
            Error::NotFound(e) => json!({ "class": e.class, "selector": e.selector }),
            Error::BadType(e) => json!({
                "what": e.what,
                "expected": e.expected,
                "actual": e.actual,
            }),
            Error::Database(e) => json!({
                "method": e.method,
                "target": e.target,
                "sql": e.sql,
                "error": e.message,
            }),
            Error::Config(e) => json!({ "reason": e.message }),
        }
    }

    /// Is this a missing entity (recoverable)?
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Is this a model/schema defect?
    pub fn is_broken(&self) -> bool {
        matches!(self, Error::Broken(_))
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Database(e) => e.sql.as_deref(),
            _ => None,
        }
    }
}

impl BrokenError {
    /// Attach the underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl DatabaseError {
    /// Wrap a driver failure with the call that produced it.
    pub fn call_failed(
        method: &'static str,
        connection_id: &str,
        sql: Option<&str>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            method,
            target: format!("dbi#{connection_id}"),
            sql: sql.map(str::to_string),
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Broken(e) => write!(f, "Broken model: {}", e),
            Error::NotFound(e) => write!(f, "Not found: {}", e),
            Error::BadType(e) => write!(f, "Bad type: {}", e),
            Error::Database(e) => write!(f, "Database call failed: {}", e),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Broken(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Database(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::NotFound(_) | Error::BadType(_) => None,
        }
    }
}

impl fmt::Display for BrokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.what, self.reason)
    }
}

impl fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no {} matches {}", self.class, self.selector)
    }
}

impl fmt::Display for BadTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(actual) = &self.actual {
            write!(
                f,
                "{}: expected {}, found {}",
                self.what, self.expected, actual
            )
        } else {
            write!(f, "{}: expected {}", self.what, self.expected)
        }
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}: {}", self.method, self.target, self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<BrokenError> for Error {
    fn from(err: BrokenError) -> Self {
        Error::Broken(err)
    }
}

impl From<NotFoundError> for Error {
    fn from(err: NotFoundError) -> Self {
        Error::NotFound(err)
    }
}

impl From<BadTypeError> for Error {
    fn from(err: BadTypeError) -> Self {
        Error::BadType(err)
    }
}

impl From<DatabaseError> for Error {
    fn from(err: DatabaseError) -> Self {
        Error::Database(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Result type alias for entity layer operations.
pub type Result<T> = std::result::Result<T, Error>;
